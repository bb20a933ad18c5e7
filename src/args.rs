//! ms-daq CLI arguments.
//!
//! This module contains the definition of the CLI arguments for the ms-daq
//! application.

use clap::Parser;
use std::path::PathBuf;

/// ms-daq CLI arguments.
#[derive(Parser, Debug, Clone, Eq, PartialEq, Hash)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Stream configuration file (JSON)
    #[clap(long)]
    pub config: PathBuf,
    /// Name of the UIO device of the IP core
    #[clap(long, default_value = "psi-ms-daq")]
    pub uio: String,
    /// Name of the u-dma-buf device holding the sample buffers
    #[clap(long, default_value = "udmabuf0")]
    pub dmabuf: String,
    /// Directory where recorded windows are written
    #[clap(long, default_value = ".")]
    pub output_dir: PathBuf,
    /// Use a simulated IP core instead of the hardware
    #[clap(long)]
    pub simulate: bool,
    /// Period of the simulated sample source in milliseconds
    #[clap(long, default_value_t = 100)]
    pub sim_period_ms: u64,
}
