//! Software model of the IP core.
//!
//! [`SimIpCore`] implements [`RegisterAccess`] and [`DataCopy`] on top of a
//! register file and a memory array, and models how the IP core records the
//! samples of each stream into windows. It is used by the tests and by the
//! `--simulate` mode of the `ms-daq` application.
//!
//! Samples are pushed with [`SimIpCore::push_samples`] and triggers are
//! injected with [`SimIpCore::trigger`]. The timestamp counter advances by
//! one for each sample pushed to any stream.

use crate::config::RecMode;
use crate::daq::lock;
use crate::register::{map, DataCopy, Field, RegisterAccess};
use std::collections::HashMap;
use std::sync::Mutex;

/// Simulated IP core.
#[derive(Debug)]
pub struct SimIpCore {
    state: Mutex<Sim>,
}

#[derive(Debug)]
struct Sim {
    regs: HashMap<u32, u32>,
    mem_base: u32,
    mem: Vec<u8>,
    stride: u32,
    streams: Vec<SimStream>,
    clock: u64,
}

#[derive(Debug)]
struct SimStream {
    sample_bytes: u32,
    trigger_pending: bool,
    open: Option<OpenWindow>,
}

#[derive(Debug, Copy, Clone)]
struct OpenWindow {
    win: u8,
    // bytes written, saturated at the window size
    count: u32,
    // next write offset inside the window
    offset: u32,
    last: u32,
    triggered: bool,
    post_left: u32,
    trigger_ts: u64,
}

// Registers of a stream at the time a sample arrives.
#[derive(Debug, Copy, Clone)]
struct StreamRegs {
    mode: RecMode,
    armed: bool,
    win_cnt: u8,
    ringbuf: bool,
    overwrite: bool,
    post_trig: u32,
    buf_start: u32,
    win_size: u32,
}

impl SimIpCore {
    /// Creates a simulated IP core.
    ///
    /// There is one stream for each entry in `stream_width_bits`, which gives
    /// the sample width of the stream. The simulated memory covers the
    /// addresses `mem_base..mem_base + mem_size`.
    ///
    /// # Panics
    ///
    /// Panics if a width is not a non-zero multiple of 8 bits.
    pub fn new(
        max_windows: u8,
        stream_width_bits: &[u16],
        mem_base: u32,
        mem_size: usize,
    ) -> SimIpCore {
        let streams = stream_width_bits
            .iter()
            .map(|&bits| {
                assert!(bits != 0 && bits % 8 == 0, "invalid stream width {bits}");
                SimStream {
                    sample_bytes: u32::from(bits / 8),
                    trigger_pending: false,
                    open: None,
                }
            })
            .collect();
        SimIpCore {
            state: Mutex::new(Sim {
                regs: HashMap::new(),
                mem_base,
                mem: vec![0; mem_size],
                stride: map::window_stride(max_windows),
                streams,
                clock: 0,
            }),
        }
    }

    /// Pushes samples to a stream.
    ///
    /// `data` contains the samples back to back. Trailing bytes that do not
    /// form a complete sample are ignored.
    pub fn push_samples(&self, stream: u8, data: &[u8]) {
        let mut sim = lock(&self.state);
        let bytes = sim.streams[usize::from(stream)].sample_bytes as usize;
        for sample in data.chunks_exact(bytes) {
            sim.sample(stream, sample);
        }
    }

    /// Injects a trigger into a stream.
    ///
    /// The trigger applies to the next sample pushed to the stream.
    pub fn trigger(&self, stream: u8) {
        lock(&self.state).streams[usize::from(stream)].trigger_pending = true;
    }

    /// Returns `true` if the IP core is asserting its interrupt output.
    pub fn irq_pending(&self) -> bool {
        let sim = lock(&self.state);
        map::GCFG_IRQENA.get(sim.reg(map::GCFG)) != 0
            && sim.reg(map::IRQVEC) & sim.reg(map::IRQENA) != 0
    }

    /// Returns the current value of the timestamp counter.
    pub fn clock(&self) -> u64 {
        lock(&self.state).clock
    }
}

impl Sim {
    fn reg(&self, offset: u32) -> u32 {
        self.regs.get(&offset).copied().unwrap_or(0)
    }

    fn set_reg(&mut self, offset: u32, value: u32) {
        self.regs.insert(offset, value);
    }

    fn modify(&mut self, offset: u32, f: impl FnOnce(u32) -> u32) {
        let value = f(self.reg(offset));
        self.set_reg(offset, value);
    }

    fn stream_regs(&self, stream: u8) -> StreamRegs {
        let mode = self.reg(map::mode(stream));
        let scfg = self.reg(map::ctx_scfg(stream));
        StreamRegs {
            mode: RecMode::from_bits(map::MODE_RECM.get(mode)),
            armed: map::MODE_ARM.get(mode) != 0,
            win_cnt: map::SCFG_WINCNT.get(scfg) as u8 + 1,
            ringbuf: map::SCFG_RINGBUF.get(scfg) != 0,
            overwrite: map::SCFG_OVERWRITE.get(scfg) != 0,
            post_trig: self.reg(map::posttrig(stream)),
            buf_start: self.reg(map::ctx_bufstart(stream)),
            win_size: self.reg(map::ctx_winsize(stream)),
        }
    }

    fn set_recording(&mut self, stream: u8, recording: bool) {
        self.modify(map::mode(stream), |r| map::MODE_REC.set(r, recording.into()));
    }

    fn sample(&mut self, stream: u8, sample: &[u8]) {
        let now = self.clock;
        self.clock += 1;
        let trigger = std::mem::take(&mut self.streams[usize::from(stream)].trigger_pending);
        if map::GCFG_ENA.get(self.reg(map::GCFG)) == 0
            || Field::bit(stream).get(self.reg(map::STRENA)) == 0
        {
            return;
        }
        let regs = self.stream_regs(stream);
        if regs.win_size < self.streams[usize::from(stream)].sample_bytes {
            return;
        }
        let open = self.streams[usize::from(stream)].open;
        let recording = match regs.mode {
            RecMode::Continuous | RecMode::TriggerMask => true,
            RecMode::SingleShot => regs.armed || open.is_some_and(|o| o.triggered),
            RecMode::Manual => regs.armed,
        };
        if !recording {
            self.set_recording(stream, false);
            return;
        }
        let mut window = match open {
            Some(window) => window,
            None => match self.open_window(stream, &regs) {
                Some(window) => window,
                None => {
                    self.modify(map::maxlvl(stream), |r| r.saturating_add(1));
                    return;
                }
            },
        };
        self.set_recording(stream, true);

        let sample_bytes = self.streams[usize::from(stream)].sample_bytes;
        if window.offset >= regs.win_size {
            if regs.ringbuf {
                window.offset = 0;
            } else {
                // linear window full, drop pre-trigger samples
                self.streams[usize::from(stream)].open = Some(window);
                return;
            }
        }
        let start = regs
            .buf_start
            .wrapping_add(regs.win_size * u32::from(window.win));
        let addr = start + window.offset;
        let pos = (addr - self.mem_base) as usize;
        self.mem[pos..pos + sample.len()].copy_from_slice(sample);
        window.last = addr;
        window.offset += sample_bytes;
        window.count = (window.count + sample_bytes).min(regs.win_size);

        if trigger
            && regs.armed
            && !window.triggered
            && matches!(regs.mode, RecMode::TriggerMask | RecMode::SingleShot)
        {
            window.triggered = true;
            window.post_left = regs.post_trig.max(1);
            window.trigger_ts = now;
            self.modify(map::mode(stream), |r| map::MODE_ARM.set(r, 0));
        }

        let close = if window.triggered {
            window.post_left -= 1;
            window.post_left == 0 || (!regs.ringbuf && window.offset >= regs.win_size)
        } else {
            regs.mode == RecMode::Continuous && window.count == regs.win_size
        };
        if close {
            self.close_window(stream, window, now);
        } else {
            self.set_reg(
                map::win_wincnt(stream, window.win, self.stride),
                window_counter(&window),
            );
            self.set_reg(map::ctx_ptr(stream), start + window.offset);
            self.streams[usize::from(stream)].open = Some(window);
        }
    }

    fn open_window(&mut self, stream: u8, regs: &StreamRegs) -> Option<OpenWindow> {
        let win = map::SCFG_WINCUR.get(self.reg(map::ctx_scfg(stream))) as u8;
        if win >= regs.win_cnt {
            return None;
        }
        let wincnt = map::win_wincnt(stream, win, self.stride);
        if map::WINCNT_CNT.get(self.reg(wincnt)) != 0 && !regs.overwrite {
            return None;
        }
        self.set_reg(wincnt, 0);
        Some(OpenWindow {
            win,
            count: 0,
            offset: 0,
            last: regs.buf_start,
            triggered: false,
            post_left: 0,
            trigger_ts: 0,
        })
    }

    fn close_window(&mut self, stream: u8, window: OpenWindow, now: u64) {
        let regs = self.stream_regs(stream);
        let stride = self.stride;
        let win = window.win;
        let ts = if window.triggered {
            window.trigger_ts
        } else {
            now
        };
        self.set_reg(map::win_wincnt(stream, win, stride), window_counter(&window));
        self.set_reg(map::win_last(stream, win, stride), window.last);
        self.set_reg(map::win_tslo(stream, win, stride), ts as u32);
        self.set_reg(map::win_tshi(stream, win, stride), (ts >> 32) as u32);
        self.set_reg(map::lastwin(stream), u32::from(win));
        let next = (win + 1) % regs.win_cnt;
        self.modify(map::ctx_scfg(stream), |r| {
            map::SCFG_WINCUR.set(r, u32::from(next))
        });
        self.set_reg(
            map::ctx_ptr(stream),
            regs.buf_start.wrapping_add(regs.win_size * u32::from(next)),
        );
        self.modify(map::IRQVEC, |r| Field::bit(stream).set(r, 1));
        if regs.mode == RecMode::SingleShot {
            self.set_recording(stream, false);
        }
        self.streams[usize::from(stream)].open = None;
    }

    fn stream_nr(&self, offset: u32, reg: fn(u8) -> u32) -> Option<u8> {
        (0..self.streams.len() as u8).find(|&n| reg(n) == offset)
    }
}

fn window_counter(window: &OpenWindow) -> u32 {
    map::WINCNT_ISTRIG.set(
        map::WINCNT_CNT.set(0, window.count),
        window.triggered.into(),
    )
}

impl RegisterAccess for SimIpCore {
    fn read(&self, offset: u32) -> u32 {
        lock(&self.state).reg(offset)
    }

    fn write(&self, offset: u32, value: u32) {
        let mut sim = lock(&self.state);
        if offset == map::IRQVEC {
            sim.modify(map::IRQVEC, |r| r & !value);
        } else if offset == map::STRENA {
            let old = sim.reg(map::STRENA);
            sim.set_reg(map::STRENA, value);
            for n in 0..sim.streams.len() as u8 {
                let bit = Field::bit(n);
                if bit.get(old) != 0 && bit.get(value) == 0 {
                    // the partially filled window is abandoned
                    sim.streams[usize::from(n)].open = None;
                    sim.streams[usize::from(n)].trigger_pending = false;
                    sim.set_recording(n, false);
                }
            }
        } else if let Some(n) = sim.stream_nr(offset, map::mode) {
            let old = sim.reg(offset);
            // the recording bit is read-only
            sim.set_reg(offset, map::MODE_REC.set(value, map::MODE_REC.get(old)));
            let manual = RecMode::from_bits(map::MODE_RECM.get(value)) == RecMode::Manual;
            let disarmed = map::MODE_ARM.get(old) != 0 && map::MODE_ARM.get(value) == 0;
            if manual && disarmed {
                if let Some(window) = sim.streams[usize::from(n)].open {
                    let now = sim.clock;
                    sim.close_window(n, window, now);
                }
                sim.set_recording(n, false);
            }
        } else {
            sim.set_reg(offset, value);
        }
    }
}

impl DataCopy for SimIpCore {
    fn copy(&self, src_addr: u32, dst: &mut [u8]) {
        let sim = lock(&self.state);
        let offset = src_addr.wrapping_sub(sim.mem_base) as usize;
        assert!(
            src_addr >= sim.mem_base && offset + dst.len() <= sim.mem.len(),
            "address range {src_addr:#x}+{} outside of the simulated memory",
            dst.len()
        );
        dst.copy_from_slice(&sim.mem[offset..offset + dst.len()]);
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    pub(crate) const MEM_BASE: u32 = 0x1000_0000;

    /// 16-bit sample with value `n`.
    pub(crate) fn s16(n: u16) -> [u8; 2] {
        n.to_le_bytes()
    }

    /// Ramp of 16-bit samples.
    pub(crate) fn ramp16(range: std::ops::Range<u16>) -> Vec<u8> {
        range.flat_map(u16::to_le_bytes).collect()
    }

    /// Simulated IP core with 16-bit streams and the driver on top of it.
    pub(crate) fn setup(
        max_streams: u8,
        max_windows: u8,
    ) -> (std::sync::Arc<SimIpCore>, crate::MsDaq) {
        let widths = vec![16; usize::from(max_streams)];
        let sim = std::sync::Arc::new(SimIpCore::new(max_windows, &widths, MEM_BASE, 4096));
        let daq = crate::MsDaq::new(
            std::sync::Arc::clone(&sim),
            std::sync::Arc::clone(&sim),
            max_streams,
            max_windows,
        )
        .unwrap();
        (sim, daq)
    }

    /// Configuration of a 16-bit stream at the start of the simulated memory.
    pub(crate) fn stream_config(
        rec_mode: RecMode,
        win_cnt: u8,
        win_size: u32,
        post_trig_samples: u32,
    ) -> crate::config::StreamConfig {
        crate::config::StreamConfig {
            width_bits: 16,
            rec_mode,
            win_cnt,
            win_size,
            buf_start_addr: MEM_BASE,
            post_trig_samples,
            pre_trig_samples: 0,
            win_as_ringbuf: true,
            overflow: Default::default(),
        }
    }

    #[test]
    fn irqvec_write_one_to_clear() {
        let sim = SimIpCore::new(4, &[8], MEM_BASE, 16);
        {
            let mut s = lock(&sim.state);
            s.set_reg(map::IRQVEC, 0b101);
        }
        sim.write(map::IRQVEC, 0b001);
        assert_eq!(sim.read(map::IRQVEC), 0b100);
    }

    #[test]
    fn samples_ignored_while_disabled() {
        let sim = SimIpCore::new(4, &[16], MEM_BASE, 64);
        sim.write(map::GCFG, 1);
        sim.write(map::ctx_winsize(0), 8);
        sim.write(map::ctx_bufstart(0), MEM_BASE);
        sim.push_samples(0, &ramp16(0..8));
        assert_eq!(sim.read(map::win_wincnt(0, 0, 0x40)), 0);
        assert_eq!(sim.clock(), 8);
    }

    #[test]
    fn continuous_recording() {
        let sim = SimIpCore::new(4, &[16], MEM_BASE, 64);
        sim.write(map::GCFG, 0x101);
        sim.write(map::IRQENA, 1);
        sim.write(map::ctx_scfg(0), map::SCFG_RINGBUF.set(map::SCFG_WINCNT.set(0, 1), 1));
        sim.write(map::ctx_winsize(0), 8);
        sim.write(map::ctx_bufstart(0), MEM_BASE);
        sim.write(map::STRENA, 1);
        sim.push_samples(0, &ramp16(0..3));
        assert!(!sim.irq_pending());
        assert_eq!(sim.read(map::win_wincnt(0, 0, 0x40)), 6);
        sim.push_samples(0, &s16(3));
        assert!(sim.irq_pending());
        assert_eq!(sim.read(map::lastwin(0)), 0);
        assert_eq!(sim.read(map::win_last(0, 0, 0x40)), MEM_BASE + 6);
        assert_eq!(sim.read(map::win_tslo(0, 0, 0x40)), 3);
        assert_eq!(map::SCFG_WINCUR.get(sim.read(map::ctx_scfg(0))), 1);
        let mut data = [0; 8];
        sim.copy(MEM_BASE, &mut data);
        assert_eq!(data.to_vec(), ramp16(0..4));
        // window 0 is not free, so window 1 is filled and then samples drop
        sim.push_samples(0, &ramp16(4..10));
        assert_eq!(sim.read(map::lastwin(0)), 1);
        assert_eq!(sim.read(map::maxlvl(0)), 2);
    }
}
