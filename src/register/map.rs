//! Register map of the multi-stream DAQ IP core.
//!
//! Offsets are byte offsets from the base address of the IP core.

use super::Field;

// Global registers

/// General configuration register.
pub const GCFG: u32 = 0x000;
/// Global enable of the IP core.
pub const GCFG_ENA: Field = Field::bit(0);
/// Global enable of the IRQ output.
pub const GCFG_IRQENA: Field = Field::bit(8);
/// IRQ vector. One bit per stream, write 1 to clear.
pub const IRQVEC: u32 = 0x010;
/// IRQ enable. One bit per stream.
pub const IRQENA: u32 = 0x014;
/// Stream enable. One bit per stream.
pub const STRENA: u32 = 0x020;

// Per-stream acquisition registers

/// Maximum fill level of the input FIFO of a stream.
pub const fn maxlvl(stream: u8) -> u32 {
    0x200 + 0x10 * stream as u32
}

/// Number of post-trigger samples of a stream.
pub const fn posttrig(stream: u8) -> u32 {
    0x204 + 0x10 * stream as u32
}

/// Recording mode register of a stream.
pub const fn mode(stream: u8) -> u32 {
    0x208 + 0x10 * stream as u32
}

/// Recording mode.
pub const MODE_RECM: Field = Field::new(0, 2);
/// Arm bit. Cleared by the IP core when a trigger is accepted.
pub const MODE_ARM: Field = Field::bit(8);
/// Recording status bit (read-only).
pub const MODE_REC: Field = Field::bit(16);

/// Last window written by a stream.
pub const fn lastwin(stream: u8) -> u32 {
    0x20c + 0x10 * stream as u32
}

// Per-stream context memory

/// Stream configuration word in the context memory.
pub const fn ctx_scfg(stream: u8) -> u32 {
    0x1000 + 0x20 * stream as u32
}

/// Windows are used as ring buffers.
pub const SCFG_RINGBUF: Field = Field::bit(0);
/// Windows are overwritten even if they are not free.
pub const SCFG_OVERWRITE: Field = Field::bit(8);
/// Number of windows minus one.
pub const SCFG_WINCNT: Field = Field::new(16, 5);
/// Window currently being written.
pub const SCFG_WINCUR: Field = Field::new(24, 5);

/// Start address of the buffer of a stream.
pub const fn ctx_bufstart(stream: u8) -> u32 {
    0x1004 + 0x20 * stream as u32
}

/// Window size in bytes.
pub const fn ctx_winsize(stream: u8) -> u32 {
    0x1008 + 0x20 * stream as u32
}

/// Next address the IP core writes to.
pub const fn ctx_ptr(stream: u8) -> u32 {
    0x100c + 0x20 * stream as u32
}

/// End address of the current window.
pub const fn ctx_winend(stream: u8) -> u32 {
    0x1010 + 0x20 * stream as u32
}

// Per-window registers
//
// The window registers of each stream are spaced by `stride`, which is
// given by [`window_stride`].

/// Returns the spacing between the window registers of consecutive streams.
pub const fn window_stride(max_windows: u8) -> u32 {
    (max_windows as u32).next_power_of_two() * 0x10
}

/// Window counter register.
pub const fn win_wincnt(stream: u8, win: u8, stride: u32) -> u32 {
    0x4000 + stride * stream as u32 + 0x10 * win as u32
}

/// Number of bytes written to the window.
pub const WINCNT_CNT: Field = Field::new(0, 31);
/// The window contains a trigger.
pub const WINCNT_ISTRIG: Field = Field::bit(31);

/// Address of the last sample written to a window.
pub const fn win_last(stream: u8, win: u8, stride: u32) -> u32 {
    0x4004 + stride * stream as u32 + 0x10 * win as u32
}

/// Timestamp of a window, low word.
pub const fn win_tslo(stream: u8, win: u8, stride: u32) -> u32 {
    0x4008 + stride * stream as u32 + 0x10 * win as u32
}

/// Timestamp of a window, high word.
pub const fn win_tshi(stream: u8, win: u8, stride: u32) -> u32 {
    0x400c + stride * stream as u32 + 0x10 * win as u32
}
