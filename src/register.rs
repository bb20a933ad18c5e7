//! Register access.
//!
//! The driver never touches the IP core address space directly. Register
//! accesses go through a [`RegisterAccess`] implementation, and sample data is
//! copied out of the acquisition buffers through a [`DataCopy`]
//! implementation. Both are supplied by the platform: [`crate::uio`] and
//! [`crate::dmabuf`] on Linux, or [`crate::sim::SimIpCore`] in tests.

use std::sync::Arc;

pub mod map;

/// Bit field inside a 32-bit register.
///
/// This is a stateless helper that extracts and inserts a field of `width`
/// bits starting at bit `lsb` of a raw register value.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Field {
    /// Position of the least significant bit of the field.
    pub lsb: u8,
    /// Width of the field in bits.
    pub width: u8,
}

impl Field {
    /// Creates a field.
    ///
    /// # Panics
    ///
    /// Panics if the field does not fit in 32 bits.
    pub const fn new(lsb: u8, width: u8) -> Field {
        assert!(width >= 1 && lsb as u32 + width as u32 <= 32);
        Field { lsb, width }
    }

    /// Creates a single-bit field.
    pub const fn bit(n: u8) -> Field {
        Field::new(n, 1)
    }

    /// Returns the mask of the field, not shifted.
    pub const fn mask(self) -> u32 {
        if self.width == 32 {
            u32::MAX
        } else {
            (1 << self.width) - 1
        }
    }

    /// Returns the mask of the field in register position.
    pub const fn shifted_mask(self) -> u32 {
        self.mask() << self.lsb
    }

    /// Extracts the field from a register value.
    pub const fn get(self, reg: u32) -> u32 {
        (reg >> self.lsb) & self.mask()
    }

    /// Inserts `value` into the field of a register value.
    ///
    /// Bits of `value` that do not fit in the field are discarded. Bits of
    /// `reg` outside the field are preserved.
    pub const fn set(self, reg: u32, value: u32) -> u32 {
        (reg & !self.shifted_mask()) | ((value & self.mask()) << self.lsb)
    }
}

/// Register access shim.
///
/// Gives 32-bit access to the registers of an IP core. Offsets are byte
/// offsets relative to the base of the IP core.
///
/// The read-modify-write helpers are not atomic. Callers that share a
/// register between contexts must serialize them.
pub trait RegisterAccess: Send + Sync {
    /// Reads a register.
    fn read(&self, offset: u32) -> u32;

    /// Writes a register.
    fn write(&self, offset: u32, value: u32);

    /// Reads a single bit of a register.
    fn get_bit(&self, offset: u32, bit: Field) -> bool {
        bit.get(self.read(offset)) != 0
    }

    /// Sets or clears a single bit of a register.
    fn set_bit(&self, offset: u32, bit: Field, value: bool) {
        self.set_field(offset, bit, value.into());
    }

    /// Reads a field of a register.
    fn get_field(&self, offset: u32, field: Field) -> u32 {
        field.get(self.read(offset))
    }

    /// Writes a field of a register, preserving the other bits.
    fn set_field(&self, offset: u32, field: Field, value: u32) {
        let reg = self.read(offset);
        self.write(offset, field.set(reg, value));
    }
}

/// Data copy function.
///
/// Copies recorded data out of the memory written by the IP core. This allows
/// the platform to handle address translation and cache coherency.
pub trait DataCopy: Send + Sync {
    /// Copies `dst.len()` bytes starting at `src_addr` into `dst`.
    ///
    /// The `src_addr` is the address as seen by the IP core.
    fn copy(&self, src_addr: u32, dst: &mut [u8]);
}

impl<T: RegisterAccess + ?Sized> RegisterAccess for Arc<T> {
    fn read(&self, offset: u32) -> u32 {
        (**self).read(offset)
    }

    fn write(&self, offset: u32, value: u32) {
        (**self).write(offset, value)
    }
}

impl<T: DataCopy + ?Sized> DataCopy for Arc<T> {
    fn copy(&self, src_addr: u32, dst: &mut [u8]) {
        (**self).copy(src_addr, dst)
    }
}
