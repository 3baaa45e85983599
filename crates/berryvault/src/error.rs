//! Error types for the vault facade.

use berryvault_channel::ChannelError;
use berryvault_core::CoreError;
use berryvault_envelope::EnvelopeError;
use berryvault_perms::PermsError;
use berryvault_seal::SealError;
use berryvault_store::StoreError;
use thiserror::Error;

/// Errors that can occur during vault operations.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Authorization failure.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Folder, secret, or grant does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Rejected request (bad name, sharing with yourself, wrong payload kind).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Hierarchy or crypto primitive error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Key sealing error.
    #[error("sealing error: {0}")]
    Seal(#[from] SealError),

    /// Envelope encryption error.
    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    /// Real-time channel error.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Bad configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error on an upload blob.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VaultError {
    /// Whether the error is the caller's fault and safe to show as-is.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            VaultError::AccessDenied(_)
                | VaultError::NotFound(_)
                | VaultError::InvalidInput(_)
                | VaultError::Core(CoreError::CircularReference { .. })
                | VaultError::Core(CoreError::InvalidHierarchy(_))
                | VaultError::Core(CoreError::UnknownFolder(_))
                | VaultError::Envelope(EnvelopeError::FileRejected(_))
        )
    }
}

impl From<PermsError> for VaultError {
    fn from(e: PermsError) -> Self {
        match e {
            PermsError::AccessDenied(msg) => VaultError::AccessDenied(msg),
            PermsError::NotFound(msg) => VaultError::NotFound(msg),
            PermsError::InvalidInput(msg) => VaultError::InvalidInput(msg),
            PermsError::Core(e) => VaultError::Core(e),
            PermsError::Store(e) => VaultError::Store(e),
        }
    }
}

/// Result type for vault operations.
pub type Result<T> = std::result::Result<T, VaultError>;
