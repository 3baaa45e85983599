//! # BerryVault Permissions
//!
//! Access control, permission propagation, and per-user views.
//!
//! ## Overview
//!
//! Permissions are a fixed read/write/delete triple held per (folder, grantee)
//! and per (secret, grantee). When a folder is SHARED, its grants are mirrored
//! onto every secret filed in it; the planners in [`propagation`] compute
//! those mirrors as a [`ChangeSet`] so the store can commit them atomically
//! with the write that triggered them.
//!
//! ## Key Concepts
//!
//! - **can / effective_permissions**: owner, else direct grant, else the
//!   secret's real folder grant (one level only)
//! - **Propagation**: share, unshare, folder mode change, move, create
//! - **Views**: each user's private placement of a secret
//! - **Guards**: composable `(identity, resource) -> Result<()>` checks
//!
//! ## Usage
//!
//! ```rust,no_run
//! use berryvault_perms::{plan_share_folder, FolderContents, FolderShare};
//! use berryvault_store::{MemoryStore, VaultStore};
//! use berryvault_core::{FolderId, UserId};
//!
//! async fn example(store: &MemoryStore) {
//!     let contents = FolderContents::load(store, FolderId(1)).await.unwrap();
//!     let changes =
//!         plan_share_folder(&contents, UserId(1), UserId(2), FolderShare::default()).unwrap();
//!     store.apply(changes).await.unwrap();
//! }
//! ```
//!
//! [`ChangeSet`]: berryvault_core::ChangeSet

pub mod access;
pub mod error;
pub mod guard;
pub mod propagation;
pub mod views;

pub use access::{
    can, effective_permissions, folder_access, load_secret_grants, secret_access, Resource,
    SecretGrants,
};
pub use error::{PermsError, Result};
pub use guard::{allows, guarded, not_self, owner_only, require, Guard, Owned};
pub use propagation::{
    plan_create_folder, plan_create_secret, plan_delete_folder, plan_delete_secret,
    plan_move_secret, plan_set_folder_type, plan_share_folder, plan_share_secret,
    plan_unshare_folder, plan_unshare_secret, plan_update_folder, plan_update_secret,
    FolderContents, FolderShare, FolderUpdate, SecretShare,
};
pub use views::{load_view, resolve_view, set_view};
