//! Driver error codes.
//!
//! Every fallible driver operation returns one of these errors. Each variant
//! has a stable numeric [`code`](Error::code) which matches the return codes
//! used by the IP core documentation.

/// Driver error.
#[derive(thiserror::Error, Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Error {
    /// The stream number is out of range for this IP core.
    #[error("illegal stream number")]
    IllegalStrNr,
    /// The stream width is not supported.
    #[error("illegal stream width (must be a non-zero multiple of 8 bits)")]
    IllegalStrWidth,
    /// The operation requires the stream to be disabled.
    #[error("stream is not disabled")]
    StrNotDisabled,
    /// The window count is out of range.
    #[error("illegal window count")]
    IllegalWinCnt,
    /// The window number is out of range for this stream.
    #[error("illegal window number")]
    IllegalWinNr,
    /// The window does not contain a trigger.
    #[error("window does not contain a trigger")]
    NoTrigInWin,
    /// The destination buffer cannot hold all the requested data.
    #[error("buffer too small")]
    BufferTooSmall,
    /// More post-trigger samples requested than configured to be recorded.
    #[error("more post-trigger samples than configured")]
    MorePostTrigThanConfigured,
    /// More pre-trigger samples requested than available.
    #[error("more pre-trigger samples than available")]
    MorePreTrigThanAvailable,
    /// The window size is not a multiple of the sample size.
    #[error("window size must be a multiple of the sample size")]
    WinSizeMustBeMultipleOfSamples,
    /// Window and stream IRQ schemes cannot be used at the same time.
    #[error("window and stream IRQ schemes are exclusive")]
    IrqSchemesWinAndStrAreExclusive,
    /// The stream has not been configured.
    #[error("stream is not configured")]
    StrNotConfigured,
    /// The operation is not available in the configured recording mode.
    #[error("operation not allowed in this recording mode")]
    IllegalRecMode,
}

/// Result type used by the driver.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the numeric return code of the error.
    ///
    /// Success is represented by `0` and errors by negative numbers.
    pub fn code(self) -> i32 {
        match self {
            Error::IllegalStrNr => -1,
            Error::IllegalStrWidth => -2,
            Error::StrNotDisabled => -3,
            Error::IllegalWinCnt => -4,
            Error::IllegalWinNr => -5,
            Error::NoTrigInWin => -6,
            Error::BufferTooSmall => -7,
            Error::MorePostTrigThanConfigured => -8,
            Error::MorePreTrigThanAvailable => -9,
            Error::WinSizeMustBeMultipleOfSamples => -10,
            Error::IrqSchemesWinAndStrAreExclusive => -11,
            Error::StrNotConfigured => -12,
            Error::IllegalRecMode => -13,
        }
    }
}
