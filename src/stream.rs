//! Acquisition streams.
//!
//! A stream records samples of a fixed width into its own ring of windows.
//! Each stream goes through the following states:
//!
//! ```text
//! Disabled        --configure-->          Configured
//! Configured      --arm-->                Armed
//! Configured      --set_enable(true)-->   Recording
//! Armed           --set_enable(true)-->   Recording
//! Recording       --set_enable(false)-->  Configured
//! Recording       --single shot done-->   SingleShotDone
//! SingleShotDone  --arm-->                Recording
//! ```
//!
//! [`StreamHandle::disable`] returns to `Disabled` from any state.

use crate::config::{OverflowPolicy, RecMode, StreamConfig};
use crate::daq::{lock, MsDaq};
use crate::error::{Error, Result};
use crate::irq::{IrqScheme, StreamIrqHandler, WindowIrqHandler};
use crate::register::{map, Field};
use crate::window::{Window, WindowPool, WindowState};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// State of a stream.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum StreamState {
    /// The stream is not configured, or has been disabled.
    Disabled,
    /// The stream is configured but not recording.
    Configured,
    /// The stream has been armed but not enabled yet.
    Armed,
    /// The stream is recording.
    Recording,
    /// A single-shot recording has completed. The stream must be armed again
    /// to record another window.
    SingleShotDone,
}

impl StreamState {
    fn from_u8(value: u8) -> StreamState {
        match value {
            1 => StreamState::Configured,
            2 => StreamState::Armed,
            3 => StreamState::Recording,
            4 => StreamState::SingleShotDone,
            _ => StreamState::Disabled,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            StreamState::Disabled => 0,
            StreamState::Configured => 1,
            StreamState::Armed => 2,
            StreamState::Recording => 3,
            StreamState::SingleShotDone => 4,
        }
    }
}

/// Driver state of a stream.
#[derive(Debug)]
pub(crate) struct Stream {
    pub(crate) nr: u8,
    state: AtomicU8,
    config: Mutex<Option<StreamConfig>>,
    pub(crate) pool: WindowPool,
    irq: Mutex<IrqScheme>,
    // held while windows change hands between the IP core and the driver;
    // taken before `config`
    pub(crate) dispatch: Mutex<()>,
}

impl Stream {
    pub(crate) fn new(nr: u8, max_windows: u8) -> Stream {
        Stream {
            nr,
            state: AtomicU8::new(StreamState::Disabled.as_u8()),
            config: Mutex::new(None),
            pool: WindowPool::new(max_windows),
            irq: Mutex::new(IrqScheme::None),
            dispatch: Mutex::new(()),
        }
    }

    pub(crate) fn bit(&self) -> Field {
        Field::bit(self.nr)
    }

    pub(crate) fn state(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: StreamState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    pub(crate) fn transition(&self, from: StreamState, to: StreamState) -> bool {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn config(&self) -> Option<StreamConfig> {
        *lock(&self.config)
    }

    pub(crate) fn irq_scheme(&self) -> IrqScheme {
        lock(&self.irq).clone()
    }

    /// Hands the window that the IP core writes next to it, if the stream is
    /// recording and the window is free.
    ///
    /// Requires the dispatch lock, so that a stopped stream is never left
    /// with a filling window.
    pub(crate) fn resume_filling(&self, daq: &MsDaq, _dispatch: &MutexGuard<'_, ()>) {
        if self.state() != StreamState::Recording {
            return;
        }
        let win = daq.regs().get_field(map::ctx_scfg(self.nr), map::SCFG_WINCUR);
        // WINCUR is a 5-bit field
        let win = win as u8;
        if self.pool.begin_filling(win) {
            tracing::trace!(stream = self.nr, win, "window filling");
        }
    }
}

/// Handle to a stream of the IP core.
///
/// This is obtained with [`MsDaq::stream`]. All the operations take `&self`,
/// so handles can be used concurrently from several threads.
#[derive(Copy, Clone)]
pub struct StreamHandle<'a> {
    daq: &'a MsDaq,
    stream: &'a Stream,
}

impl std::fmt::Debug for StreamHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("nr", &self.stream.nr)
            .field("state", &self.stream.state())
            .finish()
    }
}

impl<'a> StreamHandle<'a> {
    pub(crate) fn new(daq: &'a MsDaq, stream: &'a Stream) -> StreamHandle<'a> {
        StreamHandle { daq, stream }
    }

    /// Returns the stream number.
    pub fn nr(&self) -> u8 {
        self.stream.nr
    }

    /// Returns the state of the stream.
    pub fn state(&self) -> StreamState {
        self.stream.state()
    }

    /// Returns the configuration of the stream, or `None` if it has never been
    /// configured.
    pub fn config(&self) -> Option<StreamConfig> {
        self.stream.config()
    }

    fn configured(&self) -> Result<StreamConfig> {
        self.stream.config().ok_or(Error::StrNotConfigured)
    }

    /// Configures the stream.
    ///
    /// The stream must be disabled. All the windows of the stream are marked
    /// as free, so any window that the application has not processed yet is
    /// lost.
    #[tracing::instrument(
        name = "StreamHandle::configure",
        level = "debug",
        skip(self),
        fields(stream = self.stream.nr)
    )]
    pub fn configure(&self, config: &StreamConfig) -> Result<()> {
        let _dispatch = lock(&self.stream.dispatch);
        let mut current = lock(&self.stream.config);
        let regs = self.daq.regs();
        let nr = self.stream.nr;
        if !matches!(
            self.stream.state(),
            StreamState::Disabled | StreamState::Configured
        ) || regs.get_bit(map::STRENA, self.stream.bit())
        {
            return Err(Error::StrNotDisabled);
        }
        config.validate(self.daq.max_windows())?;

        regs.write(map::posttrig(nr), config.post_trig_samples);
        self.daq.modify(map::mode(nr), |r| {
            map::MODE_RECM.set(map::MODE_ARM.set(r, 0), config.rec_mode.bits())
        });
        self.daq.modify(map::ctx_scfg(nr), |r| {
            let r = map::SCFG_RINGBUF.set(r, config.win_as_ringbuf.into());
            let r = map::SCFG_OVERWRITE.set(
                r,
                (config.overflow == OverflowPolicy::OverwriteOldest).into(),
            );
            let r = map::SCFG_WINCNT.set(r, u32::from(config.win_cnt) - 1);
            map::SCFG_WINCUR.set(r, 0)
        });
        regs.write(map::ctx_bufstart(nr), config.buf_start_addr);
        regs.write(map::ctx_winsize(nr), config.win_size);
        regs.write(map::ctx_ptr(nr), config.buf_start_addr);
        regs.write(
            map::ctx_winend(nr),
            config.buf_start_addr.wrapping_add(config.win_size),
        );
        let stride = self.daq.window_stride();
        for win in 0..self.daq.max_windows() {
            regs.write(map::win_wincnt(nr, win, stride), 0);
        }
        // drop interrupts of the previous configuration
        regs.write(map::IRQVEC, self.stream.bit().shifted_mask());

        self.stream.pool.reset(config.win_cnt);
        *current = Some(*config);
        self.stream.set_state(StreamState::Configured);
        tracing::info!(
            stream = nr,
            rec_mode = ?config.rec_mode,
            win_cnt = config.win_cnt,
            win_size = config.win_size,
            "stream configured"
        );
        Ok(())
    }

    /// Starts or stops recording.
    ///
    /// Stopping a stream abandons the window that the IP core was filling, if
    /// any. In [`RecMode::TriggerMask`] mode, stopping a stream while the
    /// abandoned window does not contain a trigger returns
    /// [`Error::NoTrigInWin`]. The stream is stopped nevertheless.
    #[tracing::instrument(
        name = "StreamHandle::set_enable",
        level = "debug",
        skip(self),
        fields(stream = self.stream.nr)
    )]
    pub fn set_enable(&self, enable: bool) -> Result<()> {
        if !enable {
            return match self.stream.state() {
                StreamState::Disabled => Ok(()),
                _ => self.stop(StreamState::Configured),
            };
        }
        self.configured()?;
        let dispatch = lock(&self.stream.dispatch);
        match self.stream.state() {
            StreamState::Disabled => return Err(Error::StrNotConfigured),
            StreamState::Recording | StreamState::SingleShotDone => return Ok(()),
            StreamState::Configured | StreamState::Armed => (),
        }
        self.daq
            .modify(map::STRENA, |r| self.stream.bit().set(r, 1));
        self.stream.set_state(StreamState::Recording);
        self.stream.resume_filling(self.daq, &dispatch);
        tracing::info!(stream = self.stream.nr, "stream enabled");
        Ok(())
    }

    /// Disables the stream.
    ///
    /// This stops recording and disables the interrupts of the stream. Ready
    /// windows stay owned by the application.
    #[tracing::instrument(
        name = "StreamHandle::disable",
        level = "debug",
        skip(self),
        fields(stream = self.stream.nr)
    )]
    pub fn disable(&self) -> Result<()> {
        match self.stream.state() {
            StreamState::Disabled => Ok(()),
            _ => self.stop(StreamState::Disabled),
        }
    }

    fn stop(&self, target: StreamState) -> Result<()> {
        let regs = self.daq.regs();
        let nr = self.stream.nr;
        let stride = self.daq.window_stride();
        let bit = self.stream.bit();
        let _dispatch = lock(&self.stream.dispatch);

        self.daq.modify(map::STRENA, |r| bit.set(r, 0));
        self.daq.modify(map::mode(nr), |r| map::MODE_ARM.set(r, 0));
        if target == StreamState::Disabled {
            self.daq.modify(map::IRQENA, |r| bit.set(r, 0));
        }

        let mut result = Ok(());
        // The dispatcher acknowledges the IRQ of a stream only while holding
        // the dispatch lock, so a pending IRQ means that the window in
        // LASTWIN was completed and is left to the dispatcher.
        let completed = (bit.get(regs.read(map::IRQVEC)) != 0)
            .then(|| regs.read(map::lastwin(nr)));
        // WINCUR is a 5-bit field
        let win = regs.get_field(map::ctx_scfg(nr), map::SCFG_WINCUR) as u8;
        if completed != Some(u32::from(win))
            && win < self.stream.pool.total()
            && self.stream.pool.state(win) != WindowState::Ready
        {
            // the partial data of the window the IP core was writing is lost
            let wincnt = map::win_wincnt(nr, win, stride);
            let had_trigger = regs.get_bit(wincnt, map::WINCNT_ISTRIG);
            regs.write(wincnt, 0);
            if self.stream.pool.abandon(win) {
                tracing::debug!(stream = nr, win, "partially filled window abandoned");
                let mask_mode = self
                    .stream
                    .config()
                    .is_some_and(|c| c.rec_mode == RecMode::TriggerMask);
                if mask_mode && !had_trigger {
                    result = Err(Error::NoTrigInWin);
                }
            }
        }
        self.stream.set_state(target);
        tracing::info!(stream = nr, state = ?target, "stream stopped");
        result
    }

    /// Arms the stream.
    ///
    /// In [`RecMode::TriggerMask`] and [`RecMode::SingleShot`] modes the
    /// stream accepts a trigger once armed. In [`RecMode::Manual`] mode the
    /// stream records while armed. Arming a stream in
    /// [`StreamState::SingleShotDone`] starts a new recording.
    #[tracing::instrument(
        name = "StreamHandle::arm",
        level = "debug",
        skip(self),
        fields(stream = self.stream.nr)
    )]
    pub fn arm(&self) -> Result<()> {
        let config = self.configured()?;
        if self.stream.state() == StreamState::Disabled {
            return Err(Error::StrNotConfigured);
        }
        config.validate_trigger()?;
        let dispatch = lock(&self.stream.dispatch);
        self.daq
            .modify(map::mode(self.stream.nr), |r| map::MODE_ARM.set(r, 1));
        if self
            .stream
            .transition(StreamState::Configured, StreamState::Armed)
        {
            tracing::debug!(stream = self.stream.nr, "stream armed");
        } else if self
            .stream
            .transition(StreamState::SingleShotDone, StreamState::Recording)
        {
            self.stream.resume_filling(self.daq, &dispatch);
            tracing::debug!(stream = self.stream.nr, "single shot rearmed");
        }
        Ok(())
    }

    /// Closes the current window of a stream in [`RecMode::Manual`] mode.
    ///
    /// The IP core completes the window and raises an interrupt.
    pub fn close_window(&self) -> Result<()> {
        let config = self.configured()?;
        if config.rec_mode != RecMode::Manual {
            return Err(Error::IllegalRecMode);
        }
        self.daq
            .modify(map::mode(self.stream.nr), |r| map::MODE_ARM.set(r, 0));
        Ok(())
    }

    /// Registers a callback invoked once for each window recorded by the
    /// stream.
    ///
    /// `None` unregisters the callback. This is mutually exclusive with
    /// [`set_irq_callback_str`](StreamHandle::set_irq_callback_str).
    pub fn set_irq_callback_win(&self, handler: Option<Arc<dyn WindowIrqHandler>>) -> Result<()> {
        let mut irq = lock(&self.stream.irq);
        match handler {
            Some(_) if matches!(*irq, IrqScheme::Stream(_)) => {
                return Err(Error::IrqSchemesWinAndStrAreExclusive)
            }
            Some(handler) => *irq = IrqScheme::Window(handler),
            None if matches!(*irq, IrqScheme::Window(_)) => *irq = IrqScheme::None,
            None => (),
        }
        Ok(())
    }

    /// Registers a callback invoked once for each interrupt of the stream.
    ///
    /// `None` unregisters the callback. This is mutually exclusive with
    /// [`set_irq_callback_win`](StreamHandle::set_irq_callback_win).
    pub fn set_irq_callback_str(&self, handler: Option<Arc<dyn StreamIrqHandler>>) -> Result<()> {
        let mut irq = lock(&self.stream.irq);
        match handler {
            Some(_) if matches!(*irq, IrqScheme::Window(_)) => {
                return Err(Error::IrqSchemesWinAndStrAreExclusive)
            }
            Some(handler) => *irq = IrqScheme::Stream(handler),
            None if matches!(*irq, IrqScheme::Stream(_)) => *irq = IrqScheme::None,
            None => (),
        }
        Ok(())
    }

    /// Enables or disables the interrupt of the stream.
    pub fn set_irq_enable(&self, enable: bool) {
        let bit = self.stream.bit();
        self.daq
            .modify(map::IRQENA, |r| bit.set(r, enable.into()));
    }

    /// Returns the number of free windows.
    pub fn free_windows(&self) -> u8 {
        self.stream.pool.free()
    }

    /// Returns the number of windows that are filling or ready.
    pub fn used_windows(&self) -> u8 {
        self.stream.pool.used()
    }

    /// Returns the number of windows of the stream.
    pub fn total_windows(&self) -> u8 {
        self.stream.pool.total()
    }

    /// Returns the window the IP core writes to.
    pub fn current_win(&self) -> u8 {
        // WINCUR is a 5-bit field
        self.daq
            .regs()
            .get_field(map::ctx_scfg(self.stream.nr), map::SCFG_WINCUR) as u8
    }

    /// Returns the address the IP core writes the next sample to.
    pub fn current_ptr(&self) -> u32 {
        self.daq.regs().read(map::ctx_ptr(self.stream.nr))
    }

    /// Returns the last window completed by the IP core.
    pub fn last_written_win(&self) -> u8 {
        self.daq.regs().read(map::lastwin(self.stream.nr)) as u8
    }

    /// Returns `true` if the IP core is recording samples of this stream.
    pub fn is_recording(&self) -> bool {
        self.daq
            .regs()
            .get_bit(map::mode(self.stream.nr), map::MODE_REC)
    }

    /// Returns the maximum fill level of the input FIFO of the stream.
    pub fn max_lvl(&self) -> u32 {
        self.daq.regs().read(map::maxlvl(self.stream.nr))
    }

    /// Clears the maximum fill level of the input FIFO of the stream.
    pub fn clr_max_lvl(&self) {
        self.daq.regs().write(map::maxlvl(self.stream.nr), 0);
    }

    /// Returns the number of windows that were overwritten by the IP core
    /// before the application freed them.
    pub fn overruns(&self) -> u32 {
        self.stream.pool.overruns()
    }

    /// Returns a window of the stream.
    pub fn window(&self, win: u8) -> Result<Window<'a>> {
        self.configured()?;
        if win >= self.stream.pool.total() {
            return Err(Error::IllegalWinNr);
        }
        Ok(Window::new(self.daq, self.stream, win))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::register::RegisterAccess;
    use crate::sim::test::{ramp16, s16, setup, stream_config};

    #[test]
    fn configure_requires_disabled_stream() {
        let (_sim, daq) = setup(1, 8);
        let stream = daq.stream(0).unwrap();
        let config = stream_config(RecMode::Continuous, 4, 16, 0);
        stream.configure(&config).unwrap();
        assert_eq!(stream.state(), StreamState::Configured);
        stream.set_enable(true).unwrap();
        let other = stream_config(RecMode::TriggerMask, 2, 32, 4);
        assert_eq!(stream.configure(&other), Err(Error::StrNotDisabled));
        assert_eq!(stream.config(), Some(config));
        assert_eq!(stream.total_windows(), 4);
        assert_eq!(stream.state(), StreamState::Recording);
        stream.set_enable(false).unwrap();
        stream.configure(&other).unwrap();
        assert_eq!(stream.config(), Some(other));
        assert_eq!(stream.total_windows(), 2);
    }

    #[test]
    fn configure_rejected_while_armed_or_done() {
        let (sim, daq) = setup(1, 4);
        let stream = daq.stream(0).unwrap();
        let other = stream_config(RecMode::Continuous, 4, 32, 0);

        let config = stream_config(RecMode::TriggerMask, 2, 16, 2);
        stream.configure(&config).unwrap();
        stream.arm().unwrap();
        assert_eq!(stream.state(), StreamState::Armed);
        assert_eq!(stream.configure(&other), Err(Error::StrNotDisabled));
        assert_eq!(stream.config(), Some(config));
        assert_eq!(stream.total_windows(), 2);
        assert_eq!(stream.state(), StreamState::Armed);

        stream.disable().unwrap();
        let config = stream_config(RecMode::SingleShot, 2, 8, 1);
        stream.configure(&config).unwrap();
        stream.set_irq_enable(true);
        stream.set_enable(true).unwrap();
        stream.arm().unwrap();
        sim.push_samples(0, &ramp16(0..2));
        sim.trigger(0);
        sim.push_samples(0, &s16(2));
        daq.handle_irq();
        assert_eq!(stream.state(), StreamState::SingleShotDone);
        assert_eq!(stream.configure(&other), Err(Error::StrNotDisabled));
        assert_eq!(stream.config(), Some(config));
        assert_eq!(stream.used_windows(), 1);
        assert_eq!(stream.window(0).unwrap().state(), WindowState::Ready);
        assert_eq!(map::MODE_RECM.get(sim.read(map::mode(0))), 2);
    }

    #[test]
    fn configure_validation() {
        let (sim, daq) = setup(1, 8);
        let stream = daq.stream(0).unwrap();
        for width_bits in [8, 16, 32] {
            let s = u32::from(width_bits / 8);
            for win_size in 0..64 {
                let mut config = stream_config(RecMode::Continuous, 2, win_size, 0);
                config.width_bits = width_bits;
                let ret = stream.configure(&config);
                if win_size % s == 0 {
                    assert_eq!(ret, Ok(()));
                    assert_eq!(sim.read(map::ctx_winsize(0)), win_size);
                } else {
                    assert_eq!(ret, Err(Error::WinSizeMustBeMultipleOfSamples));
                }
            }
        }
        let mut config = stream_config(RecMode::Continuous, 9, 16, 0);
        assert_eq!(stream.configure(&config), Err(Error::IllegalWinCnt));
        config.win_cnt = 8;
        config.width_bits = 4;
        assert_eq!(stream.configure(&config), Err(Error::IllegalStrWidth));
    }

    #[test]
    fn configure_registers() {
        let (sim, daq) = setup(2, 8);
        let stream = daq.stream(1).unwrap();
        let mut config = stream_config(RecMode::SingleShot, 5, 64, 7);
        config.overflow = OverflowPolicy::OverwriteOldest;
        stream.configure(&config).unwrap();
        assert_eq!(sim.read(map::posttrig(1)), 7);
        assert_eq!(map::MODE_RECM.get(sim.read(map::mode(1))), 2);
        let scfg = sim.read(map::ctx_scfg(1));
        assert_eq!(map::SCFG_RINGBUF.get(scfg), 1);
        assert_eq!(map::SCFG_OVERWRITE.get(scfg), 1);
        assert_eq!(map::SCFG_WINCNT.get(scfg), 4);
        assert_eq!(map::SCFG_WINCUR.get(scfg), 0);
        assert_eq!(sim.read(map::ctx_bufstart(1)), config.buf_start_addr);
        assert_eq!(sim.read(map::ctx_winsize(1)), 64);
        assert_eq!(stream.free_windows(), 5);
    }

    #[test]
    fn enable_requires_configuration() {
        let (_sim, daq) = setup(1, 4);
        let stream = daq.stream(0).unwrap();
        assert_eq!(stream.set_enable(true), Err(Error::StrNotConfigured));
        assert_eq!(stream.arm(), Err(Error::StrNotConfigured));
        assert_eq!(stream.set_enable(false), Ok(()));
        assert_eq!(stream.disable(), Ok(()));
        stream
            .configure(&stream_config(RecMode::Continuous, 2, 8, 0))
            .unwrap();
        stream.disable().unwrap();
        assert_eq!(stream.set_enable(true), Err(Error::StrNotConfigured));
    }

    #[test]
    fn arm_checks_trigger_settings() {
        let (_sim, daq) = setup(1, 4);
        let stream = daq.stream(0).unwrap();
        let mut config = stream_config(RecMode::TriggerMask, 2, 8, 5);
        stream.configure(&config).unwrap();
        assert_eq!(stream.arm(), Err(Error::MorePostTrigThanConfigured));
        config.post_trig_samples = 2;
        config.pre_trig_samples = 3;
        stream.configure(&config).unwrap();
        assert_eq!(stream.arm(), Err(Error::MorePreTrigThanAvailable));
        config.pre_trig_samples = 2;
        stream.configure(&config).unwrap();
        stream.arm().unwrap();
        assert_eq!(stream.state(), StreamState::Armed);
        stream.set_enable(true).unwrap();
        assert_eq!(stream.state(), StreamState::Recording);
    }

    #[test]
    fn trigger_mask_stop_without_trigger() {
        let (sim, daq) = setup(1, 4);
        let stream = daq.stream(0).unwrap();
        stream
            .configure(&stream_config(RecMode::TriggerMask, 2, 16, 3))
            .unwrap();
        stream.set_irq_enable(true);
        stream.set_enable(true).unwrap();
        stream.arm().unwrap();
        sim.push_samples(0, &ramp16(0..5));
        assert_eq!(stream.used_windows(), 1);
        assert_eq!(stream.set_enable(false), Err(Error::NoTrigInWin));
        assert_eq!(stream.state(), StreamState::Configured);
        assert_eq!(stream.free_windows(), 2);
        assert!(!sim.get_bit(map::STRENA, Field::bit(0)));
        assert!(!sim.get_bit(map::mode(0), map::MODE_ARM));
        assert!(!stream.is_recording());

        // a window with a trigger can be stopped without error
        stream.set_enable(true).unwrap();
        stream.arm().unwrap();
        sim.push_samples(0, &ramp16(0..5));
        sim.trigger(0);
        sim.push_samples(0, &s16(5));
        assert_eq!(stream.set_enable(false), Ok(()));
        assert_eq!(stream.free_windows(), 2);
        assert!(!sim.irq_pending());
    }

    #[test]
    fn trigger_mask_ignores_trigger_until_armed() {
        let (sim, daq) = setup(1, 4);
        let stream = daq.stream(0).unwrap();
        stream
            .configure(&stream_config(RecMode::TriggerMask, 2, 16, 2))
            .unwrap();
        stream.set_irq_enable(true);
        stream.set_enable(true).unwrap();
        sim.push_samples(0, &ramp16(0..4));
        sim.trigger(0);
        sim.push_samples(0, &ramp16(4..12));
        assert!(!sim.irq_pending());
        stream.arm().unwrap();
        sim.trigger(0);
        sim.push_samples(0, &ramp16(12..14));
        assert!(sim.irq_pending());
        daq.handle_irq();
        let window = stream.window(0).unwrap();
        assert_eq!(window.state(), WindowState::Ready);
        assert!(window.contains_trigger());
        assert_eq!(window.pre_trig_samples(), Ok(6));
        assert_eq!(window.timestamp(), 12);
        // triggers are accepted once per arm
        assert_eq!(stream.state(), StreamState::Recording);
        assert!(!sim.get_bit(map::mode(0), map::MODE_ARM));
    }

    #[test]
    fn single_shot() {
        let (sim, daq) = setup(1, 4);
        let stream = daq.stream(0).unwrap();
        stream
            .configure(&stream_config(RecMode::SingleShot, 2, 8, 2))
            .unwrap();
        stream.set_irq_enable(true);
        stream.set_enable(true).unwrap();
        // not armed yet
        sim.push_samples(0, &ramp16(100..104));
        assert!(!stream.is_recording());
        stream.arm().unwrap();
        sim.push_samples(0, &ramp16(0..3));
        sim.trigger(0);
        sim.push_samples(0, &ramp16(3..7));
        daq.handle_irq();
        assert_eq!(stream.state(), StreamState::SingleShotDone);
        assert_eq!(stream.used_windows(), 1);
        assert!(!stream.is_recording());

        let window = stream.window(0).unwrap();
        assert_eq!(window.no_of_samples(), 4);
        assert_eq!(window.pre_trig_samples(), Ok(2));
        let mut data = [0; 8];
        assert_eq!(window.get_data_unwrapped(&mut data), Ok(8));
        assert_eq!(data.to_vec(), ramp16(1..5));

        // rearm for another shot
        stream.arm().unwrap();
        assert_eq!(stream.state(), StreamState::Recording);
        assert_eq!(stream.window(1).unwrap().state(), WindowState::Filling);
        sim.push_samples(0, &s16(7));
        sim.trigger(0);
        sim.push_samples(0, &ramp16(8..12));
        daq.handle_irq();
        assert_eq!(stream.state(), StreamState::SingleShotDone);
        assert_eq!(stream.used_windows(), 2);
        let window = stream.window(1).unwrap();
        assert_eq!(window.no_of_samples(), 3);
        assert_eq!(window.pre_trig_samples(), Ok(1));
        let mut data = [0; 6];
        assert_eq!(window.get_data_unwrapped(&mut data), Ok(6));
        assert_eq!(data.to_vec(), ramp16(7..10));
    }

    #[test]
    fn manual_mode() {
        let (sim, daq) = setup(1, 4);
        let stream = daq.stream(0).unwrap();
        stream
            .configure(&stream_config(RecMode::Manual, 2, 16, 0))
            .unwrap();
        stream.set_irq_enable(true);
        stream.set_enable(true).unwrap();
        sim.push_samples(0, &ramp16(100..102));
        assert!(!stream.is_recording());
        stream.arm().unwrap();
        sim.push_samples(0, &ramp16(0..3));
        assert!(stream.is_recording());
        assert!(!sim.irq_pending());
        stream.close_window().unwrap();
        assert!(sim.irq_pending());
        daq.handle_irq();
        let window = stream.window(0).unwrap();
        assert_eq!(window.state(), WindowState::Ready);
        assert_eq!(window.no_of_samples(), 3);
        assert!(!window.contains_trigger());
        assert_eq!(window.pre_trig_samples(), Err(Error::NoTrigInWin));
        let mut data = [0; 16];
        assert_eq!(window.get_data_unwrapped(&mut data), Ok(6));
        assert_eq!(data[..6].to_vec(), ramp16(0..3));
        assert_eq!(stream.window(1).unwrap().state(), WindowState::Filling);
    }

    #[test]
    fn close_window_requires_manual_mode() {
        let (_sim, daq) = setup(1, 4);
        let stream = daq.stream(0).unwrap();
        assert_eq!(stream.close_window(), Err(Error::StrNotConfigured));
        stream
            .configure(&stream_config(RecMode::Continuous, 2, 8, 0))
            .unwrap();
        assert_eq!(stream.close_window(), Err(Error::IllegalRecMode));
    }

    #[test]
    fn disable_keeps_ready_windows() {
        let (sim, daq) = setup(1, 4);
        let stream = daq.stream(0).unwrap();
        stream
            .configure(&stream_config(RecMode::Continuous, 4, 8, 0))
            .unwrap();
        stream.set_irq_enable(true);
        stream.set_enable(true).unwrap();
        sim.push_samples(0, &ramp16(0..10));
        daq.handle_irq();
        assert_eq!(stream.used_windows(), 3);
        stream.disable().unwrap();
        assert_eq!(stream.state(), StreamState::Disabled);
        assert_eq!(stream.used_windows(), 2);
        assert!(!sim.get_bit(map::IRQENA, Field::bit(0)));
        assert_eq!(sim.read(map::win_wincnt(0, 2, daq.window_stride())), 0);
        let window = stream.window(1).unwrap();
        let mut data = [0; 8];
        assert_eq!(window.get_data_unwrapped(&mut data), Ok(8));
        assert_eq!(data.to_vec(), ramp16(4..8));
        window.mark_as_free();
        assert_eq!(stream.used_windows(), 1);
    }

    #[test]
    fn max_lvl() {
        let (sim, daq) = setup(1, 4);
        let stream = daq.stream(0).unwrap();
        stream
            .configure(&stream_config(RecMode::Continuous, 1, 8, 0))
            .unwrap();
        stream.set_irq_enable(true);
        stream.set_enable(true).unwrap();
        sim.push_samples(0, &ramp16(0..7));
        assert_eq!(stream.max_lvl(), 3);
        stream.clr_max_lvl();
        assert_eq!(stream.max_lvl(), 0);
    }
}
