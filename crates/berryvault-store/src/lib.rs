//! # BerryVault Store
//!
//! Storage abstraction for BerryVault. Provides a trait-based interface for
//! folders, secrets, grants and views with SQLite and in-memory backends.
//!
//! ## Overview
//!
//! Reads go through narrow query methods. Writes go through a single entry
//! point, [`VaultStore::apply`], which commits a whole [`ChangeSet`] in one
//! transaction: either every permission and view upsert of a propagation
//! lands together with the triggering write, or none of them does.
//!
//! ## Key Types
//!
//! - [`VaultStore`] - The async trait for all storage operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use berryvault_store::{SqliteStore, VaultStore};
//! use berryvault_core::{ChangeSet, IdKind};
//!
//! async fn example() {
//!     let store = SqliteStore::open("vault.db").unwrap();
//!     let id = store.allocate_id(IdKind::Folder).await.unwrap();
//!     // let changes = ChangeSet::new().with(Mutation::PutFolder(folder));
//!     // store.apply(changes).await.unwrap();
//! }
//! ```
//!
//! [`ChangeSet`]: berryvault_core::ChangeSet

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::VaultStore;
