//! Error types for envelope encryption.

use thiserror::Error;

use berryvault_core::CoreError;
use berryvault_seal::SealError;

/// Errors from encrypting or decrypting envelopes.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// Every decryption tier failed. Callers listing many values should
    /// render [`DECRYPT_PLACEHOLDER`](crate::DECRYPT_PLACEHOLDER) instead.
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// A scoped key could not be produced and the policy forbids falling back.
    #[error("key unavailable: {0}")]
    KeyUnavailable(String),

    /// Upload rejected by the file policy.
    #[error("file rejected: {0}")]
    FileRejected(String),

    #[error("sealing error: {0}")]
    Seal(#[from] SealError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for envelope operations.
pub type Result<T> = std::result::Result<T, EnvelopeError>;
