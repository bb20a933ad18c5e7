//! ms-daq is a userspace driver for the PSI multi-stream DAQ FPGA IP core.
//!
//! The IP core records several independent streams of samples into rings of
//! windows in memory. The driver configures the streams, arms them under one
//! of several trigger policies, dispatches the interrupts raised when windows
//! complete, and gives the application access to the recorded windows while
//! the IP core keeps recording.
//!
//! [`MsDaq`] is the entry point of the driver. The register space and the
//! sample memory are reached through the [`RegisterAccess`] and [`DataCopy`]
//! traits, which are implemented for Linux UIO devices in [`uio`] and
//! [`dmabuf`], and for a software model of the IP core in [`sim`].
//!
//! The crate also contains the `ms-daq` application, which configures the
//! streams from a JSON file and writes the recorded windows to disk.

#![warn(missing_docs)]

pub mod app;
pub mod args;
pub mod config;
pub mod daq;
pub mod dmabuf;
pub mod error;
pub mod irq;
pub mod register;
pub mod sim;
pub mod stream;
pub mod uio;
pub mod window;

pub use daq::MsDaq;
pub use error::{Error, Result};
pub use register::{DataCopy, RegisterAccess};
