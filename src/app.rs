//! ms-daq application.
//!
//! This module contains a top-level structure [`App`] that represents the whole
//! ms-daq application. The application configures the streams listed in the
//! configuration file, dispatches the interrupts of the IP core and writes
//! each recorded window to the output directory, as a raw data file and a
//! JSON metadata file.

use crate::{
    args::Args,
    config::{DaqConfig, IrqSchemeKind, RecMode, StreamConfig},
    daq::MsDaq,
    dmabuf::DmaBuffer,
    irq::InterruptHandler,
    sim::SimIpCore,
    stream::{StreamHandle, StreamState},
    uio::UioRegisters,
    window::{WinInfo, Window, WindowState},
};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// ms-daq application.
///
/// This struct owns the driver and the objects of which the application is
/// formed, and runs them concurrently.
#[derive(Debug)]
pub struct App {
    irq: IrqSource,
    recorder: Recorder,
}

#[derive(Debug)]
enum IrqSource {
    Uio(InterruptHandler),
    Simulator(Simulator),
}

impl IrqSource {
    async fn run(self) -> Result<()> {
        match self {
            IrqSource::Uio(handler) => handler.run().await,
            IrqSource::Simulator(simulator) => simulator.run().await,
        }
    }
}

/// Event sent from the interrupt callbacks to the [`Recorder`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Event {
    /// A window is ready.
    Window(WinInfo),
    /// A stream using the stream IRQ scheme got an interrupt.
    Stream(u8),
}

impl App {
    /// Creates a new application.
    #[tracing::instrument(name = "App::new", level = "debug")]
    pub async fn new(args: &Args) -> Result<App> {
        let config = DaqConfig::load(&args.config).await?;

        let (daq, irq) = if args.simulate {
            let sim = Arc::new(simulated_core(&config));
            let daq = Arc::new(MsDaq::new(
                Arc::clone(&sim),
                Arc::clone(&sim),
                config.max_streams,
                config.max_windows,
            )?);
            let simulator = Simulator::new(
                sim,
                Arc::clone(&daq),
                &config,
                Duration::from_millis(args.sim_period_ms),
            );
            (daq, IrqSource::Simulator(simulator))
        } else {
            let (regs, uio) = UioRegisters::open(&args.uio).await?;
            let dmabuf = DmaBuffer::new(&args.dmabuf)
                .await
                .context("failed to open DMA buffer")?;
            check_buffers(&config, &dmabuf)?;
            let daq = Arc::new(MsDaq::new(
                regs,
                dmabuf,
                config.max_streams,
                config.max_windows,
            )?);
            let handler = InterruptHandler::new(uio, Arc::clone(&daq));
            (daq, IrqSource::Uio(handler))
        };

        let capacity = config
            .streams
            .iter()
            .map(|entry| usize::from(entry.config.win_cnt))
            .sum::<usize>()
            + usize::from(config.max_streams);
        let (sender, receiver) = mpsc::channel(capacity);
        start_streams(&daq, &config, &sender)?;
        let recorder = Recorder::new(daq, receiver, &config, args.output_dir.clone());

        Ok(App { irq, recorder })
    }

    /// Runs the application.
    ///
    /// This only returns if one of the objects that form the application fails.
    #[tracing::instrument(name = "App::run", level = "debug", skip_all)]
    pub async fn run(self) -> Result<()> {
        tokio::select! {
            ret = self.irq.run() => ret,
            ret = self.recorder.run() => ret,
        }
    }
}

fn check_buffers(config: &DaqConfig, dmabuf: &DmaBuffer) -> Result<()> {
    let start = u64::from(dmabuf.phys_addr());
    let end = start + dmabuf.size() as u64;
    for entry in &config.streams {
        let buf_start = u64::from(entry.config.buf_start_addr);
        if buf_start < start || buf_start + entry.config.buf_size() > end {
            anyhow::bail!(
                "buffer of stream {} is outside of the DMA buffer",
                entry.stream
            );
        }
    }
    Ok(())
}

fn forward(sender: &mpsc::Sender<Event>, event: Event) {
    if let Err(err) = sender.try_send(event) {
        tracing::warn!(?event, %err, "failed to forward IRQ event");
    }
}

/// Configures and starts the streams listed in the configuration.
///
/// The interrupt callbacks of each stream forward [`Event`]s to `sender`.
pub fn start_streams(daq: &MsDaq, config: &DaqConfig, sender: &mpsc::Sender<Event>) -> Result<()> {
    for entry in &config.streams {
        let stream = daq.stream(entry.stream)?;
        stream
            .configure(&entry.config)
            .with_context(|| format!("failed to configure stream {}", entry.stream))?;
        match entry.irq {
            IrqSchemeKind::Window => {
                let sender = sender.clone();
                stream.set_irq_callback_win(Some(Arc::new(move |window: Window<'_>| {
                    forward(&sender, Event::Window(window.info()))
                })))?;
            }
            IrqSchemeKind::Stream => {
                let sender = sender.clone();
                stream.set_irq_callback_str(Some(Arc::new(move |stream: StreamHandle<'_>| {
                    forward(&sender, Event::Stream(stream.nr()))
                })))?;
            }
            IrqSchemeKind::None => (),
        }
        stream.set_irq_enable(true);
        stream.set_enable(true)?;
        if entry.arm && entry.config.rec_mode != RecMode::Continuous {
            stream
                .arm()
                .with_context(|| format!("failed to arm stream {}", entry.stream))?;
        }
    }
    Ok(())
}

/// Metadata of a recorded window.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct WindowMetadata {
    /// Stream number.
    pub stream: u8,
    /// Window number.
    pub win: u8,
    /// Sequence number of the window in the stream.
    pub sequence: u64,
    /// Timestamp of the window.
    pub timestamp: u64,
    /// Size of a sample in bytes.
    pub sample_bytes: u32,
    /// Number of samples written to the data file.
    pub samples: u32,
    /// Number of samples before the trigger in the data file, if the window
    /// contains a trigger.
    pub pre_trig_samples: Option<u32>,
    /// Address of the last sample of the window.
    pub last_spl_addr: u32,
}

/// Window recorder.
///
/// Receives the [`Event`]s produced by the interrupt callbacks, copies the
/// recorded windows and writes them to the output directory.
#[derive(Debug)]
pub struct Recorder {
    daq: Arc<MsDaq>,
    receiver: mpsc::Receiver<Event>,
    output_dir: PathBuf,
    rearm: Vec<bool>,
    sequence: Vec<u64>,
}

impl Recorder {
    /// Creates a recorder.
    pub fn new(
        daq: Arc<MsDaq>,
        receiver: mpsc::Receiver<Event>,
        config: &DaqConfig,
        output_dir: PathBuf,
    ) -> Recorder {
        let streams = usize::from(daq.max_streams());
        let mut rearm = vec![false; streams];
        for entry in &config.streams {
            rearm[usize::from(entry.stream)] = entry.arm;
        }
        Recorder {
            daq,
            receiver,
            output_dir,
            rearm,
            sequence: vec![0; streams],
        }
    }

    /// Runs the recorder.
    ///
    /// This function only returns if there is an error.
    pub async fn run(mut self) -> Result<()> {
        while let Some(event) = self.receiver.recv().await {
            self.process(event).await?;
        }
        anyhow::bail!("IRQ event channel closed")
    }

    /// Processes an event, returning the number of windows written.
    pub async fn process(&mut self, event: Event) -> Result<usize> {
        match event {
            Event::Window(info) => Ok(self.record(info).await?.into()),
            Event::Stream(nr) => {
                let daq = Arc::clone(&self.daq);
                let stream = daq.stream(nr)?;
                let total = stream.total_windows();
                if total == 0 {
                    return Ok(0);
                }
                // oldest window first
                let start = stream.last_written_win().wrapping_add(1) % total;
                let mut recorded = 0;
                for k in 0..total {
                    let win = (start + k) % total;
                    if self.record(WinInfo { stream: nr, win }).await? {
                        recorded += 1;
                    }
                }
                Ok(recorded)
            }
        }
    }

    async fn record(&mut self, info: WinInfo) -> Result<bool> {
        let daq = Arc::clone(&self.daq);
        let stream = daq.stream(info.stream)?;
        let window = stream.window(info.win)?;
        if window.state() != WindowState::Ready {
            tracing::trace!(?info, "window no longer ready");
            return Ok(false);
        }
        let config = stream.config().context("window of unconfigured stream")?;
        let sequence = self.sequence[usize::from(info.stream)];
        self.sequence[usize::from(info.stream)] += 1;
        let (metadata, data) = read_window(&window, &config, sequence)?;
        window.mark_as_free();
        if config.rec_mode == RecMode::SingleShot
            && self.rearm[usize::from(info.stream)]
            && stream.state() == StreamState::SingleShotDone
        {
            stream.arm()?;
        }

        let name = format!("str{}_win{:06}", info.stream, sequence);
        let path = self.output_dir.join(format!("{name}.bin"));
        tokio::fs::write(&path, &data)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        let path = self.output_dir.join(format!("{name}.json"));
        tokio::fs::write(&path, serde_json::to_vec_pretty(&metadata)?)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        tracing::info!(
            stream = info.stream,
            win = info.win,
            sequence,
            samples = metadata.samples,
            timestamp = metadata.timestamp,
            "window recorded"
        );
        Ok(true)
    }
}

fn read_window(
    window: &Window<'_>,
    config: &StreamConfig,
    sequence: u64,
) -> Result<(WindowMetadata, Vec<u8>)> {
    let mut data = vec![0; config.win_size as usize];
    let available_pre = window.pre_trig_samples().ok();
    let (len, pre_trig_samples) = match available_pre {
        Some(available) if config.rec_mode != RecMode::Continuous => {
            let pre = match config.pre_trig_samples {
                0 => available,
                n => n.min(available),
            };
            let post = config.post_trig_samples.max(1);
            (window.get_data_unwrapped_trig(pre, post, &mut data)?, Some(pre))
        }
        _ => (window.get_data_unwrapped(&mut data)?, None),
    };
    data.truncate(len);
    let metadata = WindowMetadata {
        stream: window.info().stream,
        win: window.info().win,
        sequence,
        timestamp: window.timestamp(),
        sample_bytes: config.sample_bytes(),
        // len is at most win_size
        samples: len as u32 / config.sample_bytes(),
        pre_trig_samples,
        last_spl_addr: window.last_spl_addr(),
    };
    Ok((metadata, data))
}

fn simulated_core(config: &DaqConfig) -> SimIpCore {
    let mut widths = vec![8; usize::from(config.max_streams)];
    for entry in &config.streams {
        widths[usize::from(entry.stream)] = entry.config.width_bits;
    }
    let start = config
        .streams
        .iter()
        .map(|entry| u64::from(entry.config.buf_start_addr))
        .min()
        .unwrap_or(0);
    let end = config
        .streams
        .iter()
        .map(|entry| u64::from(entry.config.buf_start_addr) + entry.config.buf_size())
        .max()
        .unwrap_or(0);
    // start fits in u32 since it comes from a u32 address
    SimIpCore::new(config.max_windows, &widths, start as u32, (end - start) as usize)
}

/// Sample source for the simulated IP core.
///
/// At each period, this pushes a ramp of samples to each configured stream,
/// injects triggers and closes the windows of manual streams, and dispatches
/// the interrupts of the simulated IP core.
#[derive(Debug)]
pub struct Simulator {
    sim: Arc<SimIpCore>,
    daq: Arc<MsDaq>,
    period: Duration,
    sources: Vec<Source>,
}

#[derive(Debug)]
struct Source {
    stream: u8,
    sample_bytes: usize,
    samples_per_tick: u32,
    rec_mode: RecMode,
    counter: u64,
}

// Triggers and manual window closes happen every this many ticks.
const TRIGGER_TICKS: u64 = 4;

impl Simulator {
    /// Creates a simulator.
    pub fn new(
        sim: Arc<SimIpCore>,
        daq: Arc<MsDaq>,
        config: &DaqConfig,
        period: Duration,
    ) -> Simulator {
        let sources = config
            .streams
            .iter()
            .map(|entry| Source {
                stream: entry.stream,
                sample_bytes: entry.config.sample_bytes() as usize,
                samples_per_tick: entry.config.win_samples() / 2 + 1,
                rec_mode: entry.config.rec_mode,
                counter: 0,
            })
            .collect();
        Simulator {
            sim,
            daq,
            period,
            sources,
        }
    }

    /// Runs the simulator.
    ///
    /// This function only returns if there is an error.
    pub async fn run(mut self) -> Result<()> {
        let mut interval = tokio::time::interval(self.period);
        for tick in 0.. {
            interval.tick().await;
            self.tick(tick)?;
        }
        Ok(())
    }

    fn tick(&mut self, tick: u64) -> Result<()> {
        let event = tick % TRIGGER_TICKS == TRIGGER_TICKS - 1;
        for source in self.sources.iter_mut() {
            let mut data = Vec::with_capacity(source.samples_per_tick as usize * source.sample_bytes);
            for _ in 0..source.samples_per_tick {
                let value = source.counter.to_le_bytes();
                let n = source.sample_bytes.min(value.len());
                data.extend_from_slice(&value[..n]);
                data.resize(data.len() + source.sample_bytes - n, 0);
                source.counter += 1;
            }
            let half = data.len() / 2 - data.len() / 2 % source.sample_bytes;
            self.sim.push_samples(source.stream, &data[..half]);
            if event {
                match source.rec_mode {
                    RecMode::TriggerMask | RecMode::SingleShot => self.sim.trigger(source.stream),
                    RecMode::Manual => {
                        let stream = self.daq.stream(source.stream)?;
                        stream.close_window()?;
                        stream.arm()?;
                    }
                    RecMode::Continuous => (),
                }
            }
            self.sim.push_samples(source.stream, &data[half..]);
        }
        if self.sim.irq_pending() {
            self.daq.handle_irq();
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sim::test::{ramp16, MEM_BASE};

    fn daq_config(rec_mode: RecMode, irq: IrqSchemeKind) -> DaqConfig {
        DaqConfig::from_json(&format!(
            r#"{{"max_streams": 2, "max_windows": 4, "streams": [
                {{"stream": 1, "irq": {}, "config": {{"width_bits": 16,
                  "rec_mode": {}, "win_cnt": 4, "win_size": 8,
                  "buf_start_addr": {MEM_BASE}, "post_trig_samples": 2}}}}]}}"#,
            serde_json::to_string(&irq).unwrap(),
            serde_json::to_string(&rec_mode).unwrap(),
        ))
        .unwrap()
    }

    fn output_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ms-daq-{}-{name}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn records_windows() {
        let config = daq_config(RecMode::Continuous, IrqSchemeKind::Window);
        let sim = Arc::new(simulated_core(&config));
        let daq = Arc::new(MsDaq::new(Arc::clone(&sim), Arc::clone(&sim), 2, 4).unwrap());
        let (sender, mut receiver) = mpsc::channel(8);
        start_streams(&daq, &config, &sender).unwrap();
        sim.push_samples(1, &ramp16(0..8));
        assert!(sim.irq_pending());
        daq.handle_irq();
        let events: Vec<Event> = std::iter::from_fn(|| receiver.try_recv().ok()).collect();
        assert_eq!(
            events,
            [
                Event::Window(WinInfo { stream: 1, win: 0 }),
                Event::Window(WinInfo { stream: 1, win: 1 })
            ]
        );

        let dir = output_dir("records_windows");
        let mut recorder = Recorder::new(Arc::clone(&daq), receiver, &config, dir.clone());
        for event in events {
            assert_eq!(recorder.process(event).await.unwrap(), 1);
        }
        // already freed
        let stale = Event::Window(WinInfo { stream: 1, win: 0 });
        assert_eq!(recorder.process(stale).await.unwrap(), 0);
        assert_eq!(daq.stream(1).unwrap().used_windows(), 1);

        let data = std::fs::read(dir.join("str1_win000001.bin")).unwrap();
        assert_eq!(data, ramp16(4..8));
        let metadata: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.join("str1_win000001.json")).unwrap())
                .unwrap();
        assert_eq!(metadata["win"], 1);
        assert_eq!(metadata["samples"], 4);
        assert_eq!(metadata["timestamp"], 7);
        assert!(metadata["pre_trig_samples"].is_null());
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn stream_scheme_rearms_single_shot() {
        let config = daq_config(RecMode::SingleShot, IrqSchemeKind::Stream);
        let sim = Arc::new(simulated_core(&config));
        let daq = Arc::new(MsDaq::new(Arc::clone(&sim), Arc::clone(&sim), 2, 4).unwrap());
        let (sender, mut receiver) = mpsc::channel(8);
        start_streams(&daq, &config, &sender).unwrap();
        sim.push_samples(1, &ramp16(0..3));
        sim.trigger(1);
        sim.push_samples(1, &ramp16(3..6));
        daq.handle_irq();
        let stream = daq.stream(1).unwrap();
        assert_eq!(stream.state(), StreamState::SingleShotDone);
        assert_eq!(receiver.try_recv().unwrap(), Event::Stream(1));

        let dir = output_dir("single_shot");
        let mut recorder = Recorder::new(Arc::clone(&daq), receiver, &config, dir.clone());
        assert_eq!(recorder.process(Event::Stream(1)).await.unwrap(), 1);
        assert_eq!(stream.state(), StreamState::Recording);
        // two pre-trigger samples, the trigger and one more post-trigger sample
        let data = std::fs::read(dir.join("str1_win000000.bin")).unwrap();
        assert_eq!(data, ramp16(1..5));
        let metadata: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.join("str1_win000000.json")).unwrap())
                .unwrap();
        assert_eq!(metadata["pre_trig_samples"], 2);
        assert_eq!(metadata["timestamp"], 3);
        std::fs::remove_dir_all(dir).unwrap();
    }
}
