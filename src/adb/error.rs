use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// A specialized `Result` type for ADB operations.
pub type AdbResult<T> = Result<T, AdbError>;

/// The error type for ADB transport operations.
///
/// Ordinary command failures (non-zero exit, `error` on stderr) are not errors at
/// this layer: they come back as a failed [`CommandOutput`](super::CommandOutput).
/// Only faults the transport cannot recover from by reconnecting end up here.
#[derive(Debug, Error)]
pub enum AdbError {
    #[error("Failed to launch '{program}': {source}")]
    LaunchFailed {
        program: PathBuf,
        source: std::io::Error,
    },

    #[error("Operation timed out after {duration:?}: {description}")]
    Timeout {
        duration: Duration,
        description: String,
    },

    #[error("No device connected")]
    NotConnected,

    #[error("Could not parse screen size from 'wm size' output: {output:?}")]
    ScreenSizeParseFailed { output: String },

    #[error("Screenshot could not be decoded: {description}")]
    ScreenshotDecodeFailed { description: String },

    #[error("Platform-tools download failed: {description}")]
    FetchFailed { description: String },
}

impl AdbError {
    /// Launch failures and timeouts are fatal; everything else is a device-side problem.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AdbError::LaunchFailed { .. } | AdbError::Timeout { .. })
    }
}
