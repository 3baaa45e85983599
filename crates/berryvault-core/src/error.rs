//! Error types for BerryVault Core.

use thiserror::Error;

use crate::types::FolderId;

/// Core errors: hierarchy validation and symmetric crypto.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The proposed hierarchy is structurally invalid (e.g. a folder as its own parent).
    #[error("invalid hierarchy: {0}")]
    InvalidHierarchy(String),

    /// Re-parenting would place a folder beneath one of its own descendants.
    #[error("circular reference: folder {folder} cannot be moved under {parent}")]
    CircularReference { folder: FolderId, parent: FolderId },

    #[error("unknown folder: {0}")]
    UnknownFolder(FolderId),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("encryption error: {0}")]
    EncryptionError(String),

    #[error("decryption error: {0}")]
    DecryptionError(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
