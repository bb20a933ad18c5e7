//! Stream configuration.
//!
//! This module contains the configuration of an acquisition stream and the
//! schema of the JSON configuration file used by the `ms-daq` application.

use crate::error::{Error, Result};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Recording mode of a stream.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecMode {
    /// Continuous recording. Windows close when they are full.
    #[default]
    Continuous,
    /// Pre-trigger data is recorded continuously, but triggers are only
    /// accepted after the stream has been armed.
    TriggerMask,
    /// Recording starts when the stream is armed and stops after one trigger.
    SingleShot,
    /// Recording is controlled by software. The stream records while armed
    /// and the window is closed by [`StreamHandle::close_window`].
    ///
    /// [`StreamHandle::close_window`]: crate::stream::StreamHandle::close_window
    Manual,
}

impl RecMode {
    pub(crate) fn bits(self) -> u32 {
        match self {
            RecMode::Continuous => 0,
            RecMode::TriggerMask => 1,
            RecMode::SingleShot => 2,
            RecMode::Manual => 3,
        }
    }

    pub(crate) fn from_bits(bits: u32) -> RecMode {
        match bits & 3 {
            0 => RecMode::Continuous,
            1 => RecMode::TriggerMask,
            2 => RecMode::SingleShot,
            _ => RecMode::Manual,
        }
    }
}

/// Policy when the IP core needs a new window and none is free.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// New samples are dropped until the application frees a window.
    ///
    /// A window that has been handed to the application is never
    /// overwritten.
    #[default]
    DropNewest,
    /// The IP core reuses the oldest window even if the application has not
    /// freed it. The driver counts each such event as an overrun.
    OverwriteOldest,
}

/// Stream configuration.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct StreamConfig {
    /// Width of a sample in bits. Must be a non-zero multiple of 8.
    pub width_bits: u16,
    /// Recording mode.
    #[serde(default)]
    pub rec_mode: RecMode,
    /// Number of windows.
    pub win_cnt: u8,
    /// Size of each window in bytes. Must be a multiple of the sample size.
    pub win_size: u32,
    /// Start address of the buffer of this stream, as seen by the IP core.
    pub buf_start_addr: u32,
    /// Number of post-trigger samples, including the trigger sample.
    #[serde(default)]
    pub post_trig_samples: u32,
    /// Number of pre-trigger samples the application wants to keep.
    #[serde(default)]
    pub pre_trig_samples: u32,
    /// Use each window as a ring buffer (`false` selects linear windows).
    #[serde(default = "default_true")]
    pub win_as_ringbuf: bool,
    /// Overflow policy.
    #[serde(default)]
    pub overflow: OverflowPolicy,
}

fn default_true() -> bool {
    true
}

impl StreamConfig {
    /// Returns the size of a sample in bytes.
    pub fn sample_bytes(&self) -> u32 {
        u32::from(self.width_bits / 8)
    }

    /// Returns the capacity of a window in samples.
    pub fn win_samples(&self) -> u32 {
        self.win_size / self.sample_bytes().max(1)
    }

    /// Returns the start address of window `win`.
    pub fn win_start(&self, win: u8) -> u32 {
        self.buf_start_addr
            .wrapping_add(self.win_size.wrapping_mul(u32::from(win)))
    }

    /// Returns the total size in bytes of the buffer of this stream.
    pub fn buf_size(&self) -> u64 {
        u64::from(self.win_size) * u64::from(self.win_cnt)
    }

    /// Checks the configuration.
    ///
    /// `max_windows` is the maximum number of windows per stream supported by
    /// the IP core.
    pub fn validate(&self, max_windows: u8) -> Result<()> {
        if self.width_bits == 0 || self.width_bits % 8 != 0 {
            return Err(Error::IllegalStrWidth);
        }
        if self.win_cnt == 0 || self.win_cnt > max_windows {
            return Err(Error::IllegalWinCnt);
        }
        if self.win_size % self.sample_bytes() != 0 {
            return Err(Error::WinSizeMustBeMultipleOfSamples);
        }
        Ok(())
    }

    /// Checks the trigger settings against the window capacity.
    pub fn validate_trigger(&self) -> Result<()> {
        let capacity = self.win_samples();
        if self.post_trig_samples > capacity {
            return Err(Error::MorePostTrigThanConfigured);
        }
        if self.pre_trig_samples > capacity - self.post_trig_samples {
            return Err(Error::MorePreTrigThanAvailable);
        }
        Ok(())
    }
}

/// IRQ scheme selected for a stream in the configuration file.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum IrqSchemeKind {
    /// One callback per recorded window.
    #[default]
    Window,
    /// One callback per interrupt of the stream.
    Stream,
    /// No callback.
    None,
}

/// Configuration of a stream in the configuration file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StreamEntry {
    /// Stream number.
    pub stream: u8,
    /// IRQ scheme.
    #[serde(default)]
    pub irq: IrqSchemeKind,
    /// Arm the stream after enabling it.
    #[serde(default = "default_true")]
    pub arm: bool,
    /// Stream configuration.
    pub config: StreamConfig,
}

/// `ms-daq` configuration file.
///
/// The configuration file is a JSON document that describes the IP core
/// instance and the streams that are used.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DaqConfig {
    /// Number of streams of the IP core.
    pub max_streams: u8,
    /// Maximum number of windows per stream of the IP core.
    pub max_windows: u8,
    /// Streams to configure.
    pub streams: Vec<StreamEntry>,
}

impl DaqConfig {
    /// Loads a configuration file.
    pub async fn load(path: &Path) -> anyhow::Result<DaqConfig> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_json(&text)
    }

    /// Parses a configuration from JSON.
    pub fn from_json(text: &str) -> anyhow::Result<DaqConfig> {
        let config: DaqConfig =
            serde_json::from_str(text).context("failed to parse configuration")?;
        for entry in &config.streams {
            if entry.stream >= config.max_streams {
                anyhow::bail!("stream {} out of range", entry.stream);
            }
            entry
                .config
                .validate(config.max_windows)
                .with_context(|| format!("invalid configuration for stream {}", entry.stream))?;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn config(width_bits: u16, win_size: u32) -> StreamConfig {
        StreamConfig {
            width_bits,
            rec_mode: RecMode::Continuous,
            win_cnt: 4,
            win_size,
            buf_start_addr: 0x1000_0000,
            post_trig_samples: 0,
            pre_trig_samples: 0,
            win_as_ringbuf: true,
            overflow: OverflowPolicy::DropNewest,
        }
    }

    #[test]
    fn window_size_multiple_of_sample() {
        for width_bits in [8, 16, 24, 32, 64] {
            let s = u32::from(width_bits / 8);
            for w in 0..200 {
                let ret = config(width_bits, w).validate(8);
                if w % s == 0 {
                    assert_eq!(ret, Ok(()), "w = {w}, s = {s}");
                } else {
                    assert_eq!(ret, Err(Error::WinSizeMustBeMultipleOfSamples));
                }
            }
        }
    }

    #[test]
    fn illegal_width() {
        assert_eq!(config(0, 16).validate(8), Err(Error::IllegalStrWidth));
        assert_eq!(config(12, 16).validate(8), Err(Error::IllegalStrWidth));
    }

    #[test]
    fn illegal_win_cnt() {
        let mut c = config(16, 16);
        c.win_cnt = 0;
        assert_eq!(c.validate(8), Err(Error::IllegalWinCnt));
        c.win_cnt = 9;
        assert_eq!(c.validate(8), Err(Error::IllegalWinCnt));
        c.win_cnt = 8;
        assert_eq!(c.validate(8), Ok(()));
    }

    #[test]
    fn trigger_settings() {
        let mut c = config(16, 16);
        c.post_trig_samples = 9;
        assert_eq!(c.validate_trigger(), Err(Error::MorePostTrigThanConfigured));
        c.post_trig_samples = 6;
        c.pre_trig_samples = 3;
        assert_eq!(c.validate_trigger(), Err(Error::MorePreTrigThanAvailable));
        c.pre_trig_samples = 2;
        assert_eq!(c.validate_trigger(), Ok(()));
    }

    #[test]
    fn window_geometry() {
        let c = config(32, 64);
        assert_eq!(c.sample_bytes(), 4);
        assert_eq!(c.win_samples(), 16);
        assert_eq!(c.win_start(3), 0x1000_00c0);
        assert_eq!(c.buf_size(), 256);
    }

    #[test]
    fn parse_json() {
        let json = r#"{
  "max_streams": 2,
  "max_windows": 8,
  "streams": [
    {
      "stream": 1,
      "config": {
        "width_bits": 16,
        "rec_mode": "trigger_mask",
        "win_cnt": 4,
        "win_size": 1024,
        "buf_start_addr": 268435456,
        "post_trig_samples": 100
      }
    }
  ]
}"#;
        let config = DaqConfig::from_json(json).unwrap();
        let entry = &config.streams[0];
        assert_eq!(entry.stream, 1);
        assert_eq!(entry.irq, IrqSchemeKind::Window);
        assert!(entry.arm);
        assert_eq!(entry.config.rec_mode, RecMode::TriggerMask);
        assert!(entry.config.win_as_ringbuf);
        assert_eq!(entry.config.overflow, OverflowPolicy::DropNewest);
        assert_eq!(entry.config.pre_trig_samples, 0);
    }

    #[test]
    fn reject_invalid_json() {
        let json = r#"{"max_streams": 1, "max_windows": 4, "streams": [
            {"stream": 1, "config": {"width_bits": 16, "win_cnt": 2,
             "win_size": 16, "buf_start_addr": 0}}]}"#;
        assert!(DaqConfig::from_json(json).is_err());
        let json = r#"{"max_streams": 1, "max_windows": 4, "streams": [
            {"stream": 0, "config": {"width_bits": 16, "win_cnt": 2,
             "win_size": 15, "buf_start_addr": 0}}]}"#;
        assert!(DaqConfig::from_json(json).is_err());
    }
}
