//! # BerryVault Core
//!
//! Pure primitives for BerryVault: identifiers, the vault data model, the
//! folder hierarchy, and the symmetric/ECDH building blocks used by the
//! envelope and channel layers.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`Folder`], [`Secret`] - Owned vault entities
//! - [`FolderPermission`], [`SecretPermission`] - Per-grantee access triples
//! - [`UserSecretView`] - A user's private placement of a secret
//! - [`FolderArena`] - Id-indexed folder tree with cycle-safe traversal
//! - [`ChangeSet`] - An ordered batch of [`Mutation`]s committed atomically by a store
//!
//! ## Crypto
//!
//! [`EncryptionKey`] wraps ChaCha20-Poly1305 with a random nonce prefixed to
//! every ciphertext. [`EphemeralKeyPair`] and [`SharedKey`] provide X25519
//! agreement with context-bound key derivation.

pub mod crypto;
pub mod error;
pub mod hierarchy;
pub mod model;
pub mod mutation;
pub mod types;

pub use crypto::{
    EncryptionKey, EncryptionNonce, EphemeralKeyPair, SharedKey, X25519PublicKey, NONCE_LEN,
};
pub use error::{CoreError, Result};
pub use hierarchy::{FolderArena, FolderNode};
pub use model::{
    Access, Action, EffectivePermissions, Folder, FolderPermission, FolderType, Secret,
    SecretPayload, SecretPermission, UserSecretView,
};
pub use mutation::{ChangeSet, Mutation};
pub use types::{now_millis, FolderId, IdKind, SecretId, UserId};
