//! Windows.
//!
//! Each stream records into a fixed ring of windows. This module contains the
//! per-stream window pool, which tracks the ownership of each window, and the
//! consumer API used by the application to read recorded windows and give
//! them back to the pool.
//!
//! A window is in one of three states:
//!
//! - [`WindowState::Free`]: owned by the pool. The IP core may start writing
//!   to it.
//! - [`WindowState::Filling`]: owned by the IP core, which is writing to it.
//!   At most one window per stream is in this state.
//! - [`WindowState::Ready`]: owned by the application. The IP core does not
//!   write to it until it is released with [`Window::mark_as_free`].
//!
//! State changes are atomic compare-and-swap operations, so the interrupt
//! dispatcher and application threads can work on the same pool without
//! locks.

use crate::daq::{lock, MsDaq};
use crate::error::{Error, Result};
use crate::register::map;
use crate::stream::{Stream, StreamHandle};
use std::ops::{Deref, Range};
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

const NO_WIN: u8 = u8::MAX;

/// Ownership state of a window.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum WindowState {
    /// The window is free.
    Free,
    /// The IP core is writing to the window.
    Filling,
    /// The window contains data to be processed by the application.
    Ready,
}

impl WindowState {
    fn from_u8(value: u8) -> WindowState {
        match value {
            1 => WindowState::Filling,
            2 => WindowState::Ready,
            _ => WindowState::Free,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            WindowState::Free => 0,
            WindowState::Filling => 1,
            WindowState::Ready => 2,
        }
    }
}

/// Outcome of handing a window completed by the IP core to the application.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Promotion {
    /// The window is now ready.
    Ready,
    /// The window was still ready, so the IP core has overwritten data that
    /// the application had not released.
    Overrun,
}

/// Window pool of a stream.
#[derive(Debug)]
pub(crate) struct WindowPool {
    slots: Box<[AtomicU8]>,
    total: AtomicU8,
    filling: AtomicU8,
    last_processed: AtomicU8,
    overruns: AtomicU32,
}

impl WindowPool {
    pub(crate) fn new(max_windows: u8) -> WindowPool {
        WindowPool {
            slots: (0..max_windows).map(|_| AtomicU8::new(0)).collect(),
            total: AtomicU8::new(0),
            filling: AtomicU8::new(NO_WIN),
            last_processed: AtomicU8::new(NO_WIN),
            overruns: AtomicU32::new(0),
        }
    }

    /// Resizes the pool and marks all the windows as free.
    pub(crate) fn reset(&self, total: u8) {
        for slot in self.slots.iter() {
            slot.store(WindowState::Free.as_u8(), Ordering::Release);
        }
        self.total.store(total, Ordering::Release);
        self.filling.store(NO_WIN, Ordering::Release);
        self.last_processed.store(NO_WIN, Ordering::Release);
        self.overruns.store(0, Ordering::Release);
    }

    pub(crate) fn total(&self) -> u8 {
        self.total.load(Ordering::Acquire)
    }

    pub(crate) fn state(&self, win: u8) -> WindowState {
        WindowState::from_u8(self.slots[usize::from(win)].load(Ordering::Acquire))
    }

    pub(crate) fn free(&self) -> u8 {
        let total = usize::from(self.total());
        let free = self.slots[..total]
            .iter()
            .filter(|s| s.load(Ordering::Acquire) == WindowState::Free.as_u8())
            .count();
        // free <= total <= u8::MAX
        free as u8
    }

    pub(crate) fn used(&self) -> u8 {
        self.total() - self.free()
    }

    pub(crate) fn filling(&self) -> Option<u8> {
        match self.filling.load(Ordering::Acquire) {
            NO_WIN => None,
            win => Some(win),
        }
    }

    pub(crate) fn last_processed(&self) -> Option<u8> {
        match self.last_processed.load(Ordering::Acquire) {
            NO_WIN => None,
            win => Some(win),
        }
    }

    pub(crate) fn set_last_processed(&self, win: u8) {
        self.last_processed.store(win, Ordering::Release);
    }

    pub(crate) fn overruns(&self) -> u32 {
        self.overruns.load(Ordering::Acquire)
    }

    fn cas(&self, win: u8, from: WindowState, to: WindowState) -> bool {
        self.slots[usize::from(win)]
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Hands a free window to the IP core.
    ///
    /// Returns `false` if another window is already filling or if the window
    /// is not free.
    pub(crate) fn begin_filling(&self, win: u8) -> bool {
        if win >= self.total() {
            return false;
        }
        if self
            .filling
            .compare_exchange(NO_WIN, win, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        if self.cas(win, WindowState::Free, WindowState::Filling) {
            true
        } else {
            self.filling.store(NO_WIN, Ordering::Release);
            false
        }
    }

    /// Marks a window completed by the IP core as ready.
    ///
    /// The window may not have been seen filling if the IP core went through
    /// it between two interrupts.
    pub(crate) fn promote(&self, win: u8) -> Promotion {
        if self.cas(win, WindowState::Filling, WindowState::Ready) {
            let _ = self
                .filling
                .compare_exchange(win, NO_WIN, Ordering::AcqRel, Ordering::Acquire);
            Promotion::Ready
        } else if self.cas(win, WindowState::Free, WindowState::Ready) {
            Promotion::Ready
        } else {
            self.overruns.fetch_add(1, Ordering::AcqRel);
            Promotion::Overrun
        }
    }

    /// Returns the filling window to the pool without handing it to the
    /// application.
    pub(crate) fn abandon(&self, win: u8) -> bool {
        if self.cas(win, WindowState::Filling, WindowState::Free) {
            let _ = self
                .filling
                .compare_exchange(win, NO_WIN, Ordering::AcqRel, Ordering::Acquire);
            true
        } else {
            false
        }
    }

    /// Returns a ready window to the pool.
    pub(crate) fn release(&self, win: u8) -> bool {
        self.cas(win, WindowState::Ready, WindowState::Free)
    }
}

/// Contiguous address ranges that hold the data of a window, in capture
/// order.
///
/// There are at most two ranges: the data from the start position to the end
/// of the ring, and the data that wrapped to the beginning of the ring.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Segments {
    ranges: [Range<u32>; 2],
    len: usize,
}

impl Segments {
    /// Returns the total number of bytes in the segments.
    pub fn total_len(&self) -> u32 {
        self.iter().map(|r| r.end - r.start).sum()
    }
}

impl Deref for Segments {
    type Target = [Range<u32>];

    fn deref(&self) -> &[Range<u32>] {
        &self.ranges[..self.len]
    }
}

/// Splits a block of `len` bytes that starts at `start` inside the ring
/// `ring` into contiguous ranges.
///
/// # Panics
///
/// Panics if `len` is non-zero and `start` is outside the ring, or if `len`
/// is larger than the ring.
pub fn unwrap_segments(ring: Range<u32>, start: u32, len: u32) -> Segments {
    if len == 0 {
        return Segments {
            ranges: [start..start, start..start],
            len: 0,
        };
    }
    assert!(ring.contains(&start), "start address outside of the ring");
    assert!(len <= ring.end - ring.start, "block larger than the ring");
    let to_end = ring.end - start;
    if len <= to_end {
        Segments {
            ranges: [start..start + len, start..start],
            len: 1,
        }
    } else {
        let wrapped = len - to_end;
        Segments {
            ranges: [start..ring.end, ring.start..ring.start + wrapped],
            len: 2,
        }
    }
}

/// Window identifier.
///
/// This is a plain value that can be stored or sent to other threads. Use
/// [`MsDaq::window`] to obtain a [`Window`] from it.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct WinInfo {
    /// Stream number.
    pub stream: u8,
    /// Window number.
    pub win: u8,
}

/// Window of a stream.
///
/// This is a handle that borrows the driver. The metadata and data accessors
/// can only be used while the window is [`WindowState::Ready`]. Calling them
/// on a free or filling window is a programming error and panics.
#[derive(Copy, Clone)]
pub struct Window<'a> {
    daq: &'a MsDaq,
    stream: &'a Stream,
    win: u8,
}

impl std::fmt::Debug for Window<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Window")
            .field("stream", &self.stream.nr)
            .field("win", &self.win)
            .field("state", &self.state())
            .finish()
    }
}

impl<'a> Window<'a> {
    pub(crate) fn new(daq: &'a MsDaq, stream: &'a Stream, win: u8) -> Window<'a> {
        Window { daq, stream, win }
    }

    /// Returns the identifier of the window.
    pub fn info(&self) -> WinInfo {
        WinInfo {
            stream: self.stream.nr,
            win: self.win,
        }
    }

    /// Returns the window number.
    pub fn nr(&self) -> u8 {
        self.win
    }

    /// Returns the stream the window belongs to.
    pub fn stream(&self) -> StreamHandle<'a> {
        StreamHandle::new(self.daq, self.stream)
    }

    /// Returns the ownership state of the window.
    pub fn state(&self) -> WindowState {
        self.stream.pool.state(self.win)
    }

    fn ready_layout(&self) -> crate::config::StreamConfig {
        assert_eq!(
            self.state(),
            WindowState::Ready,
            "window {} of stream {} is not ready",
            self.win,
            self.stream.nr
        );
        match self.stream.config() {
            Some(config) => config,
            None => panic!("stream {} is not configured", self.stream.nr),
        }
    }

    fn wincnt(&self) -> u32 {
        self.daq.regs().read(map::win_wincnt(
            self.stream.nr,
            self.win,
            self.daq.window_stride(),
        ))
    }

    /// Returns the number of valid bytes in the window.
    ///
    /// # Panics
    ///
    /// Panics if the window is not ready.
    pub fn no_of_bytes(&self) -> u32 {
        let config = self.ready_layout();
        self.bytes(&config)
    }

    fn bytes(&self, config: &crate::config::StreamConfig) -> u32 {
        let count = map::WINCNT_CNT.get(self.wincnt()).min(config.win_size);
        count - count % config.sample_bytes()
    }

    /// Returns the number of valid samples in the window.
    ///
    /// # Panics
    ///
    /// Panics if the window is not ready.
    pub fn no_of_samples(&self) -> u32 {
        let config = self.ready_layout();
        self.bytes(&config) / config.sample_bytes()
    }

    /// Returns `true` if the window contains a trigger.
    ///
    /// # Panics
    ///
    /// Panics if the window is not ready.
    pub fn contains_trigger(&self) -> bool {
        self.ready_layout();
        map::WINCNT_ISTRIG.get(self.wincnt()) != 0
    }

    /// Returns the number of samples recorded before the trigger.
    ///
    /// Fails with [`Error::NoTrigInWin`] if the window does not contain a
    /// trigger.
    ///
    /// # Panics
    ///
    /// Panics if the window is not ready.
    pub fn pre_trig_samples(&self) -> Result<u32> {
        let config = self.ready_layout();
        if map::WINCNT_ISTRIG.get(self.wincnt()) == 0 {
            return Err(Error::NoTrigInWin);
        }
        let samples = self.bytes(&config) / config.sample_bytes();
        Ok(samples.saturating_sub(config.post_trig_samples.max(1)))
    }

    /// Returns the timestamp of the window.
    ///
    /// For windows that contain a trigger, this is the timestamp of the
    /// trigger. Otherwise it is the timestamp at which the window was closed.
    ///
    /// # Panics
    ///
    /// Panics if the window is not ready.
    pub fn timestamp(&self) -> u64 {
        self.ready_layout();
        let stride = self.daq.window_stride();
        let regs = self.daq.regs();
        let lo = regs.read(map::win_tslo(self.stream.nr, self.win, stride));
        let hi = regs.read(map::win_tshi(self.stream.nr, self.win, stride));
        (u64::from(hi) << 32) | u64::from(lo)
    }

    /// Returns the address of the last sample written to the window.
    ///
    /// # Panics
    ///
    /// Panics if the window is not ready.
    pub fn last_spl_addr(&self) -> u32 {
        self.ready_layout();
        self.last_addr()
    }

    fn last_addr(&self) -> u32 {
        self.daq.regs().read(map::win_last(
            self.stream.nr,
            self.win,
            self.daq.window_stride(),
        ))
    }

    // Offset of the oldest sample inside the window.
    fn first_offset(&self, config: &crate::config::StreamConfig, bytes: u32) -> u32 {
        let win_size = config.win_size;
        let last = self.last_addr().wrapping_sub(config.win_start(self.win)) % win_size;
        (last + config.sample_bytes() + win_size - bytes) % win_size
    }

    fn copy(&self, config: &crate::config::StreamConfig, offset: u32, len: u32, dst: &mut [u8]) {
        let start = config.win_start(self.win);
        let segments = unwrap_segments(start..start + config.win_size, start + offset, len);
        let mut pos = 0;
        for segment in segments.iter() {
            let n = (segment.end - segment.start) as usize;
            self.daq.copier().copy(segment.start, &mut dst[pos..pos + n]);
            pos += n;
        }
    }

    /// Copies the data of the window to `dst`.
    ///
    /// The samples are written in capture order, from the oldest to the
    /// newest, reassembling data that wraps around the end of the window.
    /// Returns the number of bytes copied, which is
    /// [`no_of_bytes`](Window::no_of_bytes).
    ///
    /// Fails with [`Error::BufferTooSmall`] without touching `dst` if `dst`
    /// cannot hold all the data.
    ///
    /// # Panics
    ///
    /// Panics if the window is not ready.
    pub fn get_data_unwrapped(&self, dst: &mut [u8]) -> Result<usize> {
        let config = self.ready_layout();
        let bytes = self.bytes(&config);
        if dst.len() < bytes as usize {
            return Err(Error::BufferTooSmall);
        }
        if bytes == 0 {
            return Ok(0);
        }
        let first = self.first_offset(&config, bytes);
        self.copy(&config, first, bytes, dst);
        Ok(bytes as usize)
    }

    /// Copies the data around the trigger to `dst`.
    ///
    /// This copies `pre_trig` samples before the trigger followed by
    /// `post_trig` samples starting with the trigger sample. Returns the
    /// number of bytes copied.
    ///
    /// # Panics
    ///
    /// Panics if the window is not ready.
    pub fn get_data_unwrapped_trig(
        &self,
        pre_trig: u32,
        post_trig: u32,
        dst: &mut [u8],
    ) -> Result<usize> {
        let config = self.ready_layout();
        let available_pre = self.pre_trig_samples()?;
        let w = config.sample_bytes();
        let len = (u64::from(pre_trig) + u64::from(post_trig)) * u64::from(w);
        if (dst.len() as u64) < len {
            return Err(Error::BufferTooSmall);
        }
        if post_trig > config.post_trig_samples.max(1) {
            return Err(Error::MorePostTrigThanConfigured);
        }
        if pre_trig > available_pre {
            return Err(Error::MorePreTrigThanAvailable);
        }
        // at most the window size, since both counts are bounded by it
        let len = len as u32;
        let bytes = self.bytes(&config);
        if len == 0 || bytes == 0 {
            return Ok(0);
        }
        let first = self.first_offset(&config, bytes);
        let skip = (available_pre - pre_trig) * w;
        let offset = (first + skip) % config.win_size;
        self.copy(&config, offset, len, dst);
        Ok(len as usize)
    }

    /// Returns the window to the pool.
    ///
    /// This gives the window back to the IP core, which may record new data
    /// into it. If the stream is recording and the IP core was waiting for
    /// this window, the window starts filling.
    ///
    /// # Panics
    ///
    /// Panics if the window is not ready.
    pub fn mark_as_free(&self) {
        let dispatch = lock(&self.stream.dispatch);
        assert!(
            self.stream.pool.release(self.win),
            "window {} of stream {} is not ready",
            self.win,
            self.stream.nr
        );
        self.daq.regs().write(
            map::win_wincnt(self.stream.nr, self.win, self.daq.window_stride()),
            0,
        );
        tracing::trace!(stream = self.stream.nr, win = self.win, "window freed");
        self.stream.resume_filling(self.daq, &dispatch);
    }
}
