//! # BerryVault
//!
//! A self-hosted secret vault: folders of secrets shared between users,
//! keys sealed to the host, and an end-to-end encrypted real-time channel.
//!
//! ## Overview
//!
//! - **Folders and secrets**: each owned by one user; folders form a tree
//!   that is guarded against cycles
//! - **Sharing**: a SHARED folder mirrors its grants onto every secret in it
//! - **Views**: each user files a secret in their own folder without moving
//!   it for anyone else
//! - **Sealing**: keys are bound to a sealing device, or kept as plain
//!   files when there is none
//! - **Envelopes**: values use the global key; files use a per-user key and
//!   fall back through older formats on decrypt
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use berryvault::{NewSecret, Vault, VaultConfig};
//! use berryvault::core::UserId;
//! use berryvault::perms::FolderShare;
//! use berryvault::seal::PlainFactory;
//! use berryvault::store::SqliteStore;
//!
//! async fn example() -> berryvault::Result<()> {
//!     berryvault::init_tracing("berryvault=info").ok();
//!
//!     let config = VaultConfig::from_env()?;
//!     let store = SqliteStore::open("vault.db")?;
//!     let vault = Vault::open(store, &config, Arc::new(PlainFactory))?;
//!
//!     let alice = UserId(1);
//!     let team = vault.create_folder(alice, "team", None, None).await?;
//!     vault
//!         .create_secret(alice, NewSecret {
//!             name: "db password".into(),
//!             folder: Some(team.id),
//!             secret_type: "password".into(),
//!             value: "hunter2".into(),
//!             ..NewSecret::default()
//!         })
//!         .await?;
//!     vault.share_folder(alice, team.id, UserId(2), FolderShare::default()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `berryvault::core` - ids, model, hierarchy and crypto primitives
//! - `berryvault::store` - storage trait, SQLite and in-memory backends
//! - `berryvault::perms` - access checks and propagation planners
//! - `berryvault::seal` - key sealing providers and bootstrap lookup
//! - `berryvault::envelope` - envelope encryption
//! - `berryvault::channel` - the encrypted real-time channel

pub mod config;
pub mod error;
pub mod telemetry;
pub mod vault;

pub use berryvault_channel as channel;
pub use berryvault_core as core;
pub use berryvault_envelope as envelope;
pub use berryvault_perms as perms;
pub use berryvault_seal as seal;
pub use berryvault_store as store;

pub use config::VaultConfig;
pub use error::{Result, VaultError};
pub use telemetry::init_tracing;
pub use vault::{
    FileDownload, FolderEntry, NewFile, NewSecret, RevealedSecret, SecretEntry, SecretUpdate,
    Target, Vault, FILE_SECRET_TYPE,
};

pub use berryvault_core::{
    Access, Action, EffectivePermissions, Folder, FolderId, FolderType, Secret, SecretId,
    SecretPayload, SecretPermission, UserId, UserSecretView,
};
