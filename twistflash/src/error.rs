//! Error types for twistflash.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for twistflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for twistflash operations.
///
/// Device absence is deliberately not represented here: lookups that can
/// legitimately come up empty return `Option` instead, so only genuine
/// failures (enumeration, I/O, the external tool) surface as errors.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (firmware file access, process plumbing).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error (enumeration or port access failed).
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The external flashing tool could not be started at all.
    #[error("Flashing tool `{program}` could not be started: {source}")]
    ToolUnavailable {
        /// Program name or path that was invoked.
        program: String,
        /// Underlying spawn error.
        source: io::Error,
    },

    /// The external flashing tool stopped producing output.
    #[error("Flashing tool produced no output for {0:?}, giving up")]
    ToolTimeout(Duration),
}
