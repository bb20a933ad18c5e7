//! Userspace access to the acquisition buffer.
//!
//! The IP core writes the samples of all the streams into a physically
//! contiguous buffer allocated by the `u-dma-buf` kernel module. This module
//! maps the buffer and copies data out of it, translating the addresses seen
//! by the IP core into offsets in the mapping.
//!
//! The device is opened with `O_SYNC`, so the mapping is not cached and no
//! cache maintenance is needed before reading data written by the IP core.

use crate::register::DataCopy;
use anyhow::{Context, Result};
use std::os::unix::io::AsRawFd;
use tokio::fs;

/// Acquisition DMA buffer.
///
/// This struct corresponds to a `u-dma-buf` device.
#[derive(Debug)]
pub struct DmaBuffer {
    _file: fs::File,
    buffer: *mut libc::c_void,
    phys_addr: u32,
    size: usize,
}

// The mapping is read-only.
unsafe impl Send for DmaBuffer {}
unsafe impl Sync for DmaBuffer {}

impl DmaBuffer {
    /// Opens a `u-dma-buf` device.
    ///
    /// The name of the device corresponds to the filename of the character
    /// device in `/dev`.
    pub async fn new(name: &str) -> Result<DmaBuffer> {
        let file = fs::OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_SYNC)
            .open(format!("/dev/{name}"))
            .await
            .with_context(|| format!("failed to open /dev/{name}"))?;
        let phys_addr = read_sysfs(name, "phys_addr").await?;
        let phys_addr = u32::try_from(phys_addr)
            .context("DMA buffer is outside of the 32-bit address space")?;
        let size = read_sysfs(name, "size").await?;
        let buffer = unsafe {
            match libc::mmap(
                std::ptr::null_mut::<libc::c_void>(),
                size,
                libc::PROT_READ,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            ) {
                libc::MAP_FAILED => anyhow::bail!("mmap {name} failed"),
                x => x,
            }
        };
        tracing::info!(name, phys_addr = format_args!("{phys_addr:#x}"), size, "mapped DMA buffer");
        Ok(DmaBuffer {
            _file: file,
            buffer,
            phys_addr,
            size,
        })
    }

    /// Returns the physical address of the buffer.
    pub fn phys_addr(&self) -> u32 {
        self.phys_addr
    }

    /// Returns the size of the buffer in bytes.
    pub fn size(&self) -> usize {
        self.size
    }
}

async fn read_sysfs(name: &str, attr: &str) -> Result<usize> {
    let path = format!("/sys/class/u-dma-buf/{name}/{attr}");
    let value = fs::read_to_string(&path)
        .await
        .with_context(|| format!("failed to read {path}"))?;
    parse_sysfs_value(&value).with_context(|| format!("invalid contents in {path}"))
}

// u-dma-buf prints phys_addr in hex and size in decimal
fn parse_sysfs_value(value: &str) -> Result<usize> {
    let value = value.trim_end();
    Ok(match value.strip_prefix("0x") {
        Some(hex) => usize::from_str_radix(hex, 16)?,
        None => value.parse::<usize>()?,
    })
}

impl DataCopy for DmaBuffer {
    /// Copies data written by the IP core.
    ///
    /// # Panics
    ///
    /// This function panics if the source range is not inside the buffer.
    fn copy(&self, src_addr: u32, dst: &mut [u8]) {
        let offset = src_addr.wrapping_sub(self.phys_addr) as usize;
        assert!(
            src_addr >= self.phys_addr && offset + dst.len() <= self.size,
            "address range {src_addr:#x}+{} outside of the DMA buffer",
            dst.len()
        );
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.buffer.add(offset) as *const u8,
                dst.as_mut_ptr(),
                dst.len(),
            );
        }
    }
}

impl Drop for DmaBuffer {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.buffer, self.size);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sysfs_values() {
        assert_eq!(parse_sysfs_value("0x3f000000\n").unwrap(), 0x3f00_0000);
        assert_eq!(parse_sysfs_value("4194304\n").unwrap(), 4_194_304);
        assert!(parse_sysfs_value("abc").is_err());
    }
}
