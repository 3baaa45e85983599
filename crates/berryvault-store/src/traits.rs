//! VaultStore trait: the abstract interface for vault persistence.
//!
//! This trait allows the vault to be storage-agnostic. Implementations
//! include SQLite (primary) and in-memory (for tests).

use std::sync::Arc;

use async_trait::async_trait;
use berryvault_core::{
    ChangeSet, Folder, FolderId, FolderPermission, IdKind, Secret, SecretId, SecretPermission,
    UserId, UserSecretView,
};

use crate::error::Result;

/// The VaultStore trait: async interface for vault persistence.
///
/// All methods are async to support both sync (SQLite) and async backends.
/// For SQLite, we use `spawn_blocking` internally to avoid blocking the runtime.
///
/// # Design Notes
///
/// - **Atomic writes**: `apply` commits a whole change set or nothing.
/// - **Upserts**: permission and view rows are keyed by their pair; applying
///   an upsert twice never duplicates a row.
/// - **Cascades**: deleting a folder or secret removes the weak rows that
///   reference it, as documented on [`berryvault_core::Mutation`].
/// - **Owner immutability**: replacing a secret with a different owner is rejected.
#[async_trait]
pub trait VaultStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────

    /// Reserve the next id from a sequence.
    async fn allocate_id(&self, kind: IdKind) -> Result<u64>;

    /// Apply a change set atomically.
    async fn apply(&self, changes: ChangeSet) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Folder Queries
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_folder(&self, id: FolderId) -> Result<Option<Folder>>;

    /// All folders, for building a hierarchy arena.
    async fn list_folders(&self) -> Result<Vec<Folder>>;

    async fn list_folders_owned_by(&self, owner: UserId) -> Result<Vec<Folder>>;

    async fn get_folder_permission(
        &self,
        folder: FolderId,
        grantee: UserId,
    ) -> Result<Option<FolderPermission>>;

    /// All grants on a folder.
    async fn list_folder_permissions(&self, folder: FolderId) -> Result<Vec<FolderPermission>>;

    /// All folder grants held by a user.
    async fn list_folder_permissions_for(&self, grantee: UserId) -> Result<Vec<FolderPermission>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Secret Queries
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_secret(&self, id: SecretId) -> Result<Option<Secret>>;

    /// Secrets whose real folder is `folder`.
    async fn list_secrets_in_folder(&self, folder: FolderId) -> Result<Vec<Secret>>;

    async fn list_secrets_owned_by(&self, owner: UserId) -> Result<Vec<Secret>>;

    async fn get_secret_permission(
        &self,
        secret: SecretId,
        grantee: UserId,
    ) -> Result<Option<SecretPermission>>;

    /// All grants on a secret.
    async fn list_secret_permissions(&self, secret: SecretId) -> Result<Vec<SecretPermission>>;

    /// All secret grants held by a user.
    async fn list_secret_permissions_for(&self, grantee: UserId) -> Result<Vec<SecretPermission>>;

    // ─────────────────────────────────────────────────────────────────────────
    // View Queries
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_view(&self, user: UserId, secret: SecretId) -> Result<Option<UserSecretView>>;

    async fn list_views_for(&self, user: UserId) -> Result<Vec<UserSecretView>>;
}

#[async_trait]
impl<S: VaultStore + ?Sized> VaultStore for Arc<S> {
    async fn allocate_id(&self, kind: IdKind) -> Result<u64> {
        (**self).allocate_id(kind).await
    }

    async fn apply(&self, changes: ChangeSet) -> Result<()> {
        (**self).apply(changes).await
    }

    async fn get_folder(&self, id: FolderId) -> Result<Option<Folder>> {
        (**self).get_folder(id).await
    }

    async fn list_folders(&self) -> Result<Vec<Folder>> {
        (**self).list_folders().await
    }

    async fn list_folders_owned_by(&self, owner: UserId) -> Result<Vec<Folder>> {
        (**self).list_folders_owned_by(owner).await
    }

    async fn get_folder_permission(
        &self,
        folder: FolderId,
        grantee: UserId,
    ) -> Result<Option<FolderPermission>> {
        (**self).get_folder_permission(folder, grantee).await
    }

    async fn list_folder_permissions(&self, folder: FolderId) -> Result<Vec<FolderPermission>> {
        (**self).list_folder_permissions(folder).await
    }

    async fn list_folder_permissions_for(&self, grantee: UserId) -> Result<Vec<FolderPermission>> {
        (**self).list_folder_permissions_for(grantee).await
    }

    async fn get_secret(&self, id: SecretId) -> Result<Option<Secret>> {
        (**self).get_secret(id).await
    }

    async fn list_secrets_in_folder(&self, folder: FolderId) -> Result<Vec<Secret>> {
        (**self).list_secrets_in_folder(folder).await
    }

    async fn list_secrets_owned_by(&self, owner: UserId) -> Result<Vec<Secret>> {
        (**self).list_secrets_owned_by(owner).await
    }

    async fn get_secret_permission(
        &self,
        secret: SecretId,
        grantee: UserId,
    ) -> Result<Option<SecretPermission>> {
        (**self).get_secret_permission(secret, grantee).await
    }

    async fn list_secret_permissions(&self, secret: SecretId) -> Result<Vec<SecretPermission>> {
        (**self).list_secret_permissions(secret).await
    }

    async fn list_secret_permissions_for(&self, grantee: UserId) -> Result<Vec<SecretPermission>> {
        (**self).list_secret_permissions_for(grantee).await
    }

    async fn get_view(&self, user: UserId, secret: SecretId) -> Result<Option<UserSecretView>> {
        (**self).get_view(user, secret).await
    }

    async fn list_views_for(&self, user: UserId) -> Result<Vec<UserSecretView>> {
        (**self).list_views_for(user).await
    }
}
