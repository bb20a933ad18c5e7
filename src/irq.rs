//! Interrupt handling.
//!
//! The IP core raises one interrupt for all the streams. [`MsDaq::handle_irq`]
//! reads the IRQ vector, hands the windows completed by the IP core to the
//! application and invokes the callbacks registered for each stream.
//!
//! On Linux, [`InterruptHandler`] waits for the interrupts of the UIO device
//! and calls [`MsDaq::handle_irq`].

use crate::config::RecMode;
use crate::daq::{lock, MsDaq};
use crate::register::{map, Field};
use crate::stream::{Stream, StreamHandle, StreamState};
use crate::uio::Uio;
use crate::window::{Promotion, Window, WindowState};
use anyhow::Result;
use std::sync::Arc;

// Bounds the number of times the dispatcher looks again for windows completed
// while the callbacks of a stream were running.
const MAX_ROUNDS: usize = 4;

/// Callback invoked once for each recorded window.
///
/// The callback runs in the context of [`MsDaq::handle_irq`], which is
/// usually the interrupt task, so it should return quickly. A typical
/// callback sends [`Window::info`] to a processing task. The window stays
/// ready until [`Window::mark_as_free`] is called.
///
/// This is implemented for closures taking a [`Window`].
pub trait WindowIrqHandler: Send + Sync {
    /// Handles a recorded window.
    fn on_window(&self, window: Window<'_>);
}

/// Callback invoked once for each interrupt of a stream.
///
/// The callback is invoked after all the new windows of the stream are
/// ready. It is responsible for finding them, for instance by looking at the
/// [`WindowState`](crate::window::WindowState) of each window.
///
/// This is implemented for closures taking a [`StreamHandle`].
pub trait StreamIrqHandler: Send + Sync {
    /// Handles an interrupt of the stream.
    fn on_stream(&self, stream: StreamHandle<'_>);
}

impl<F> WindowIrqHandler for F
where
    F: Fn(Window<'_>) + Send + Sync,
{
    fn on_window(&self, window: Window<'_>) {
        self(window)
    }
}

impl<F> StreamIrqHandler for F
where
    F: Fn(StreamHandle<'_>) + Send + Sync,
{
    fn on_stream(&self, stream: StreamHandle<'_>) {
        self(stream)
    }
}

/// Callbacks registered for a stream.
#[derive(Clone, Default)]
pub(crate) enum IrqScheme {
    #[default]
    None,
    Window(Arc<dyn WindowIrqHandler>),
    Stream(Arc<dyn StreamIrqHandler>),
}

impl std::fmt::Debug for IrqScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            IrqScheme::None => "None",
            IrqScheme::Window(_) => "Window",
            IrqScheme::Stream(_) => "Stream",
        })
    }
}

impl MsDaq {
    /// Handles an interrupt of the IP core.
    ///
    /// For each stream that has a pending interrupt, this acknowledges the
    /// interrupt, marks the windows completed by the IP core as ready and
    /// invokes the callbacks of the stream. No driver lock is held while
    /// callbacks run, so callbacks may use the driver.
    ///
    /// A spurious call does nothing.
    pub fn handle_irq(&self) {
        let pending = self.regs().read(map::IRQVEC);
        if pending == 0 {
            return;
        }
        tracing::trace!(pending = format_args!("{pending:#010x}"), "IRQ");
        let known = Field::new(0, self.max_streams()).shifted_mask();
        if pending & !known != 0 {
            tracing::warn!(
                pending = format_args!("{pending:#010x}"),
                "IRQ for unknown stream"
            );
            self.regs().write(map::IRQVEC, pending & !known);
        }
        for stream in self.streams_internal() {
            if stream.bit().get(pending) != 0 {
                self.dispatch(stream);
            }
        }
    }

    fn dispatch(&self, stream: &Stream) {
        let bit = stream.bit();
        let dispatch = lock(&stream.dispatch);
        let Some(config) = stream.config() else {
            self.regs().write(map::IRQVEC, bit.shifted_mask());
            tracing::debug!(stream = stream.nr, "IRQ for unconfigured stream");
            return;
        };
        let scheme = stream.irq_scheme();
        let mut ready = Vec::new();
        for round in 0..MAX_ROUNDS {
            // the IRQ is known to be pending in the first round
            if round > 0 && bit.get(self.regs().read(map::IRQVEC)) == 0 {
                break;
            }
            // acknowledge before reading LASTWIN so that windows completed
            // afterwards raise the IRQ again
            self.regs().write(map::IRQVEC, bit.shifted_mask());
            let last = self.regs().read(map::lastwin(stream.nr));
            if last >= u32::from(config.win_cnt) {
                tracing::warn!(stream = stream.nr, last, "last window out of range");
                break;
            }
            // fits in u8 since it is smaller than win_cnt
            let last = last as u8;
            let new_windows = completed_windows(stream, config.win_cnt, last);
            if new_windows == 0 {
                break;
            }
            for _ in 0..new_windows {
                let win = stream
                    .pool
                    .last_processed()
                    .map_or(0, |w| (w + 1) % config.win_cnt);
                stream.pool.set_last_processed(win);
                match stream.pool.promote(win) {
                    Promotion::Ready => {
                        tracing::trace!(stream = stream.nr, win, "window ready");
                        ready.push(win);
                    }
                    Promotion::Overrun => {
                        tracing::warn!(
                            stream = stream.nr,
                            win,
                            "window overwritten before being freed"
                        );
                    }
                }
            }
            if config.rec_mode == RecMode::SingleShot
                && stream.transition(StreamState::Recording, StreamState::SingleShotDone)
            {
                tracing::debug!(stream = stream.nr, "single shot done");
            }
            stream.resume_filling(self, &dispatch);
        }
        drop(dispatch);

        match &scheme {
            IrqScheme::Window(handler) => {
                for win in ready {
                    handler.on_window(Window::new(self, stream, win));
                }
            }
            IrqScheme::Stream(handler) => handler.on_stream(StreamHandle::new(self, stream)),
            IrqScheme::None => (),
        }
    }
}

/// Number of windows completed by the IP core since the last one processed.
///
/// LASTWIN equal to the last processed window means either no new window or a
/// full lap of the ring. A full lap requires the IP core to have entered that
/// window again after it was processed, so the window is filling.
fn completed_windows(stream: &Stream, win_cnt: u8, last: u8) -> u8 {
    match stream.pool.last_processed() {
        None => last + 1,
        Some(prev) if prev == last => {
            if stream.pool.state(last) == WindowState::Filling {
                win_cnt
            } else {
                0
            }
        }
        Some(prev) => (last + win_cnt - prev) % win_cnt,
    }
}

/// Interrupt handler.
///
/// Receives the interrupts of the IP core through its UIO device and
/// dispatches them with [`MsDaq::handle_irq`]. It is necessary to call
/// [`InterruptHandler::run`] in order to receive and process interrupts.
#[derive(Debug)]
pub struct InterruptHandler {
    uio: Uio,
    daq: Arc<MsDaq>,
}

impl InterruptHandler {
    /// Creates an interrupt handler.
    pub fn new(uio: Uio, daq: Arc<MsDaq>) -> InterruptHandler {
        InterruptHandler { uio, daq }
    }

    /// Runs the interrupt handler.
    ///
    /// This function only returns if there is an error.
    pub async fn run(mut self) -> Result<()> {
        loop {
            self.uio.irq_enable().await?;
            let count = self.uio.irq_wait().await?;
            tracing::trace!(count, "UIO interrupt");
            self.daq.handle_irq();
        }
    }
}
