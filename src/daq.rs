//! Multi-stream DAQ IP core.
//!
//! This module contains [`MsDaq`], the driver for one instance of the IP
//! core.

use crate::error::{Error, Result};
use crate::register::{map, DataCopy, RegisterAccess};
use crate::stream::{Stream, StreamHandle};
use crate::window::{WinInfo, Window};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Maximum number of streams supported by the IP core.
pub const MAX_STREAMS: u8 = 32;
/// Maximum number of windows per stream supported by the IP core.
pub const MAX_WINDOWS: u8 = 32;

/// Multi-stream DAQ IP core.
///
/// This struct represents an instance of the IP core. It owns the register
/// access and data copy implementations given by the platform, and the driver
/// state of each stream.
///
/// All the methods take `&self`. The driver is typically wrapped in an
/// [`Arc`](std::sync::Arc) and shared between the task that dispatches the
/// interrupts (see [`MsDaq::handle_irq`]) and the tasks that process the
/// recorded windows.
///
/// # Examples
///
/// ```
/// use ms_daq::{config::StreamConfig, sim::SimIpCore, MsDaq};
/// use std::sync::Arc;
///
/// # fn main() -> Result<(), ms_daq::Error> {
/// let sim = Arc::new(SimIpCore::new(4, &[16], 0x1000_0000, 4096));
/// let daq = MsDaq::new(Arc::clone(&sim), Arc::clone(&sim), 1, 4)?;
/// let stream = daq.stream(0)?;
/// stream.configure(&StreamConfig {
///     width_bits: 16,
///     rec_mode: Default::default(),
///     win_cnt: 4,
///     win_size: 64,
///     buf_start_addr: 0x1000_0000,
///     post_trig_samples: 0,
///     pre_trig_samples: 0,
///     win_as_ringbuf: true,
///     overflow: Default::default(),
/// })?;
/// stream.set_irq_enable(true);
/// stream.set_enable(true)?;
/// # Ok(())
/// # }
/// ```
pub struct MsDaq {
    regs: Box<dyn RegisterAccess>,
    copier: Box<dyn DataCopy>,
    streams: Box<[Stream]>,
    max_windows: u8,
    stride: u32,
    // serializes read-modify-write of registers shared between streams
    modify_lock: Mutex<()>,
}

impl std::fmt::Debug for MsDaq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MsDaq")
            .field("max_streams", &self.streams.len())
            .field("max_windows", &self.max_windows)
            .field("stride", &self.stride)
            .finish_non_exhaustive()
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MsDaq {
    /// Initializes the IP core.
    ///
    /// `max_streams` and `max_windows` must match the synthesis parameters of
    /// the IP core. All the streams are left disabled, with interrupts
    /// disabled and all windows free. The IP core is globally enabled.
    #[tracing::instrument(name = "MsDaq::new", level = "debug", skip(regs, copier))]
    pub fn new<R, C>(regs: R, copier: C, max_streams: u8, max_windows: u8) -> Result<MsDaq>
    where
        R: RegisterAccess + 'static,
        C: DataCopy + 'static,
    {
        if !(1..=MAX_STREAMS).contains(&max_streams) {
            return Err(Error::IllegalStrNr);
        }
        if !(1..=MAX_WINDOWS).contains(&max_windows) {
            return Err(Error::IllegalWinCnt);
        }
        let stride = map::window_stride(max_windows);

        regs.write(map::GCFG, 0);
        regs.write(map::STRENA, 0);
        regs.write(map::IRQENA, 0);
        regs.write(map::IRQVEC, u32::MAX);
        for stream in 0..max_streams {
            regs.write(map::maxlvl(stream), 0);
            for win in 0..max_windows {
                regs.write(map::win_wincnt(stream, win, stride), 0);
            }
        }
        regs.write(
            map::GCFG,
            map::GCFG_IRQENA.set(map::GCFG_ENA.set(0, 1), 1),
        );
        tracing::info!(max_streams, max_windows, "multi-stream DAQ initialized");

        Ok(MsDaq {
            regs: Box::new(regs),
            copier: Box::new(copier),
            streams: (0..max_streams)
                .map(|nr| Stream::new(nr, max_windows))
                .collect(),
            max_windows,
            stride,
            modify_lock: Mutex::new(()),
        })
    }

    /// Returns the number of streams of the IP core.
    pub fn max_streams(&self) -> u8 {
        // at most MAX_STREAMS
        self.streams.len() as u8
    }

    /// Returns the maximum number of windows per stream.
    pub fn max_windows(&self) -> u8 {
        self.max_windows
    }

    /// Returns a handle to a stream.
    pub fn stream(&self, nr: u8) -> Result<StreamHandle<'_>> {
        self.streams
            .get(usize::from(nr))
            .map(|stream| StreamHandle::new(self, stream))
            .ok_or(Error::IllegalStrNr)
    }

    /// Returns an iterator over all the streams.
    pub fn streams(&self) -> impl Iterator<Item = StreamHandle<'_>> {
        self.streams
            .iter()
            .map(move |stream| StreamHandle::new(self, stream))
    }

    /// Returns a window.
    pub fn window(&self, info: WinInfo) -> Result<Window<'_>> {
        self.stream(info.stream)?.window(info.win)
    }

    pub(crate) fn streams_internal(&self) -> &[Stream] {
        &self.streams
    }

    pub(crate) fn regs(&self) -> &dyn RegisterAccess {
        &*self.regs
    }

    pub(crate) fn copier(&self) -> &dyn DataCopy {
        &*self.copier
    }

    pub(crate) fn window_stride(&self) -> u32 {
        self.stride
    }

    /// Read-modify-write of a register.
    pub(crate) fn modify(&self, offset: u32, f: impl FnOnce(u32) -> u32) {
        let _guard = lock(&self.modify_lock);
        let value = self.regs.read(offset);
        self.regs.write(offset, f(value));
    }
}
