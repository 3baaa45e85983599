//! Error types for key sealing.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Faults reported by a sealing device.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// No object is present at the handle.
    #[error("handle {0:#010x} not found")]
    HandleNotFound(u32),

    /// The object failed the device's integrity check on load.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// The device is unreachable or was reset.
    #[error("device fault: {0}")]
    Fault(String),
}

/// Errors that can occur while sealing or unsealing.
#[derive(Debug, Error)]
pub enum SealError {
    /// The sealed blob file does not exist.
    #[error("secret file not found: {}", .0.display())]
    SecretFileNotFound(PathBuf),

    /// Device-layer failure.
    #[error("sealing device error: {0}")]
    SealingDeviceError(#[from] DeviceError),

    /// The blob file is not a valid private/public pair.
    #[error("invalid sealed blob: {0}")]
    InvalidBlob(String),

    /// A device call did not finish in time.
    #[error("sealing device timed out after {0:?}")]
    Timeout(Duration),

    /// Every lookup tier failed.
    #[error("secret {name} unavailable: {reason}")]
    Unavailable { name: String, reason: String },

    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SealError {
    /// True for errors a caller may treat as "nothing sealed here yet".
    pub fn is_not_found(&self) -> bool {
        matches!(self, SealError::SecretFileNotFound(_))
    }
}

/// Result type for sealing operations.
pub type Result<T> = std::result::Result<T, SealError>;
