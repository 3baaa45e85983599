//! Error types for the permissions module.

use thiserror::Error;

/// Errors that can occur during permission operations.
#[derive(Debug, Error)]
pub enum PermsError {
    /// Authorization failure. The message never names the missing grant.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Referenced folder, secret, or grant does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Request is well-formed but not allowed (e.g. sharing with yourself).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Core error (hierarchy validation).
    #[error("core error: {0}")]
    Core(#[from] berryvault_core::CoreError),

    /// Store error.
    #[error("store error: {0}")]
    Store(#[from] berryvault_store::StoreError),
}

/// Result type for permission operations.
pub type Result<T> = std::result::Result<T, PermsError>;
