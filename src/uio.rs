//! UIO device access.
//!
//! The registers of the IP core are exposed by the kernel as a UIO device.
//! This module opens the device, maps its register space and forwards its
//! interrupt to userspace.

use crate::register::RegisterAccess;
use anyhow::{Context, Result};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// UIO device.
#[derive(Debug)]
pub struct Uio {
    num: usize,
    file: fs::File,
}

/// Memory-mapped region of a UIO device.
///
/// Dropping this struct unmaps the region.
#[derive(Debug)]
pub struct Mapping {
    base: *mut libc::c_void,
    effective: *mut libc::c_void,
    map_size: usize,
    len: usize,
}

// The mapping is plain device memory that is only accessed through volatile
// reads and writes.
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

impl Uio {
    /// Opens the UIO device `/dev/uio<num>`.
    pub async fn from_num(num: usize) -> Result<Uio> {
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(format!("/dev/uio{num}"))
            .await
            .with_context(|| format!("failed to open /dev/uio{num}"))?;
        Ok(Uio { num, file })
    }

    /// Opens a UIO device by name.
    ///
    /// The name is matched against `/sys/class/uio/uio*/name`, which comes
    /// from the device tree node of the IP core.
    pub async fn from_name(name: &str) -> Result<Uio> {
        match Self::find_by_name(name).await? {
            Some(num) => {
                tracing::debug!(name, num, "found UIO device");
                Self::from_num(num).await
            }
            None => anyhow::bail!("UIO device {name} not found"),
        }
    }

    async fn find_by_name(name: &str) -> Result<Option<usize>> {
        let mut entries = fs::read_dir(Path::new("/sys/class/uio")).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(num) = file_name
                .to_str()
                .and_then(|f| f.strip_prefix("uio"))
                .and_then(|n| n.parse::<usize>().ok())
            else {
                continue;
            };
            let this_name = fs::read_to_string(entry.path().join("name")).await?;
            if this_name.trim_end() == name {
                return Ok(Some(num));
            }
        }
        Ok(None)
    }

    /// Maps a memory region of the UIO device.
    ///
    /// Regions are numbered as in `/sys/class/uio/uio*/maps/map<n>`. The
    /// register space of the IP core is region `0`.
    pub async fn map_mapping(&self, mapping: usize) -> Result<Mapping> {
        let offset = mapping * page_size::get();
        let fd = self.file.as_raw_fd();
        let len = self.map_size(mapping).await?;
        let effective_offset = self.map_offset(mapping).await?;
        let map_size = len + effective_offset;

        let base = unsafe {
            match libc::mmap(
                std::ptr::null_mut::<libc::c_void>(),
                map_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                offset as libc::off_t,
            ) {
                libc::MAP_FAILED => anyhow::bail!("mmap of UIO region {mapping} failed"),
                x => x,
            }
        };
        let effective = unsafe { base.add(effective_offset) };
        Ok(Mapping {
            base,
            effective,
            map_size,
            len,
        })
    }

    async fn read_mapping_hex(&self, mapping: usize, fname: &str) -> Result<usize> {
        let path = format!("/sys/class/uio/uio{}/maps/map{}/{}", self.num, mapping, fname);
        let n = fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read {path}"))?;
        parse_hex(&n).with_context(|| format!("invalid contents in {path}"))
    }

    /// Returns the size of a region, from `/sys/class/uio/uio*/maps/map*/size`.
    pub async fn map_size(&self, mapping: usize) -> Result<usize> {
        self.read_mapping_hex(mapping, "size").await
    }

    /// Returns the offset of a region inside its page, from
    /// `/sys/class/uio/uio*/maps/map*/offset`.
    pub async fn map_offset(&self, mapping: usize) -> Result<usize> {
        self.read_mapping_hex(mapping, "offset").await
    }

    /// Unmasks the interrupt of the UIO device.
    ///
    /// The UIO framework masks the interrupt each time it fires, so this must
    /// be called before each [`irq_wait`](Uio::irq_wait).
    pub async fn irq_enable(&mut self) -> Result<()> {
        let bytes = 1u32.to_ne_bytes();
        self.file.write_all(&bytes).await?;
        Ok(())
    }

    /// Waits for an interrupt.
    ///
    /// Returns the total number of interrupts of the device so far.
    pub async fn irq_wait(&mut self) -> Result<u32> {
        let mut bytes = [0; 4];
        self.file.read_exact(&mut bytes).await?;
        Ok(u32::from_ne_bytes(bytes))
    }
}

fn parse_hex(s: &str) -> Result<usize> {
    let digits = s
        .trim_end()
        .strip_prefix("0x")
        .ok_or_else(|| anyhow::anyhow!("prefix 0x not present"))?;
    Ok(usize::from_str_radix(digits, 16)?)
}

impl Mapping {
    /// Returns the virtual address of the start of the region.
    pub fn addr(&self) -> *mut libc::c_void {
        self.effective
    }

    /// Returns the size of the region in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the region is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        if unsafe { libc::munmap(self.base, self.map_size) } != 0 {
            tracing::error!(
                error = %std::io::Error::last_os_error(),
                "munmap of UIO region failed"
            );
        }
    }
}

/// Registers of the IP core mapped through a UIO device.
#[derive(Debug)]
pub struct UioRegisters(Mapping);

impl UioRegisters {
    /// Opens the UIO device called `name` and maps its registers.
    pub async fn open(name: &str) -> Result<(UioRegisters, Uio)> {
        let uio = Uio::from_name(name)
            .await
            .with_context(|| format!("failed to open {name} UIO"))?;
        let mapping = uio
            .map_mapping(0)
            .await
            .with_context(|| format!("failed to map {name} UIO"))?;
        tracing::info!(name, size = mapping.len(), "mapped IP core registers");
        Ok((UioRegisters(mapping), uio))
    }

    fn register(&self, offset: u32) -> *mut u32 {
        let offset = offset as usize;
        assert!(
            offset % 4 == 0 && offset + 4 <= self.0.len(),
            "register offset {offset:#x} out of range"
        );
        unsafe { self.0.addr().add(offset) as *mut u32 }
    }
}

impl RegisterAccess for UioRegisters {
    fn read(&self, offset: u32) -> u32 {
        unsafe { self.register(offset).read_volatile() }
    }

    fn write(&self, offset: u32, value: u32) {
        unsafe { self.register(offset).write_volatile(value) }
    }
}
