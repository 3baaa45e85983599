//! In-memory implementation of the VaultStore trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard};

use async_trait::async_trait;

use berryvault_core::{
    now_millis, ChangeSet, Folder, FolderId, FolderPermission, IdKind, Mutation, Secret, SecretId,
    SecretPermission, UserId, UserSecretView,
};

use crate::error::{Result, StoreError};
use crate::traits::VaultStore;

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Clone)]
struct MemoryStoreInner {
    next_folder: u64,
    next_secret: u64,

    folders: BTreeMap<FolderId, Folder>,

    /// (folder, grantee) -> grant.
    folder_permissions: BTreeMap<(FolderId, UserId), FolderPermission>,

    secrets: BTreeMap<SecretId, Secret>,

    /// (secret, grantee) -> grant.
    secret_permissions: BTreeMap<(SecretId, UserId), SecretPermission>,

    /// (user, secret) -> view.
    views: BTreeMap<(UserId, SecretId), UserSecretView>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner {
                next_folder: 1,
                next_secret: 1,
                folders: BTreeMap::new(),
                folder_permissions: BTreeMap::new(),
                secrets: BTreeMap::new(),
                secret_permissions: BTreeMap::new(),
                views: BTreeMap::new(),
            }),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStoreInner {
    fn require_folder(&self, id: Option<FolderId>) -> Result<()> {
        match id {
            Some(id) if !self.folders.contains_key(&id) => {
                Err(StoreError::NotFound(format!("folder {}", id)))
            }
            _ => Ok(()),
        }
    }

    fn require_secret(&self, id: SecretId) -> Result<()> {
        if self.secrets.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("secret {}", id)))
        }
    }

    fn apply(&mut self, mutation: Mutation) -> Result<()> {
        match mutation {
            Mutation::PutFolder(folder) => {
                self.require_folder(folder.parent)?;
                let folder = match self.folders.get(&folder.id) {
                    // owner and creation time are fixed at insert
                    Some(existing) => Folder {
                        owner: existing.owner,
                        created_at: existing.created_at,
                        ..folder
                    },
                    None => folder,
                };
                self.folders.insert(folder.id, folder);
            }
            Mutation::DeleteFolder(id) => {
                if self.folders.remove(&id).is_none() {
                    return Err(StoreError::NotFound(format!("folder {}", id)));
                }
                self.folder_permissions.retain(|(folder, _), _| *folder != id);
                for secret in self.secrets.values_mut() {
                    if secret.folder == Some(id) {
                        secret.folder = None;
                    }
                }
                for view in self.views.values_mut() {
                    if view.folder == Some(id) {
                        view.folder = None;
                    }
                }
                for folder in self.folders.values_mut() {
                    if folder.parent == Some(id) {
                        folder.parent = None;
                    }
                }
            }
            Mutation::SetFolderType {
                folder,
                folder_type,
            } => {
                let entry = self
                    .folders
                    .get_mut(&folder)
                    .ok_or_else(|| StoreError::NotFound(format!("folder {}", folder)))?;
                entry.folder_type = folder_type;
                entry.updated_at = now_millis();
            }
            Mutation::UpsertFolderPermission(perm) => {
                self.require_folder(Some(perm.folder))?;
                self.folder_permissions
                    .insert((perm.folder, perm.grantee), perm);
            }
            Mutation::DeleteFolderPermission { folder, grantee } => {
                self.folder_permissions.remove(&(folder, grantee));
            }
            Mutation::PutSecret(secret) => {
                self.require_folder(secret.folder)?;
                if let Some(existing) = self.secrets.get(&secret.id) {
                    if existing.owner != secret.owner {
                        return Err(StoreError::Constraint(format!(
                            "owner of secret {} is immutable",
                            secret.id
                        )));
                    }
                    let created_at = existing.created_at;
                    self.secrets.insert(
                        secret.id,
                        Secret {
                            created_at,
                            ..secret
                        },
                    );
                } else {
                    self.secrets.insert(secret.id, secret);
                }
            }
            Mutation::SetSecretFolder { secret, folder } => {
                self.require_folder(folder)?;
                let entry = self
                    .secrets
                    .get_mut(&secret)
                    .ok_or_else(|| StoreError::NotFound(format!("secret {}", secret)))?;
                entry.folder = folder;
                entry.updated_at = now_millis();
            }
            Mutation::DeleteSecret(id) => {
                if self.secrets.remove(&id).is_none() {
                    return Err(StoreError::NotFound(format!("secret {}", id)));
                }
                self.secret_permissions.retain(|(secret, _), _| *secret != id);
                self.views.retain(|(_, secret), _| *secret != id);
            }
            Mutation::UpsertSecretPermission(perm) => {
                self.require_secret(perm.secret)?;
                self.secret_permissions
                    .insert((perm.secret, perm.grantee), perm);
            }
            Mutation::DeleteSecretPermission { secret, grantee } => {
                self.secret_permissions.remove(&(secret, grantee));
            }
            Mutation::SetView(view) => {
                self.require_secret(view.secret)?;
                self.require_folder(view.folder)?;
                self.views.insert((view.user, view.secret), view);
            }
            Mutation::DeleteView { user, secret } => {
                self.views.remove(&(user, secret));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl VaultStore for MemoryStore {
    async fn allocate_id(&self, kind: IdKind) -> Result<u64> {
        let mut inner = self
            .inner
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        let counter = match kind {
            IdKind::Folder => &mut inner.next_folder,
            IdKind::Secret => &mut inner.next_secret,
        };
        let id = *counter;
        *counter += 1;
        Ok(id)
    }

    async fn apply(&self, changes: ChangeSet) -> Result<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;

        // Work on a copy so a failing mutation leaves the store untouched.
        let mut staged = inner.clone();
        for mutation in changes {
            staged.apply(mutation)?;
        }
        *inner = staged;
        Ok(())
    }

    async fn get_folder(&self, id: FolderId) -> Result<Option<Folder>> {
        Ok(self.read()?.folders.get(&id).cloned())
    }

    async fn list_folders(&self) -> Result<Vec<Folder>> {
        Ok(self.read()?.folders.values().cloned().collect())
    }

    async fn list_folders_owned_by(&self, owner: UserId) -> Result<Vec<Folder>> {
        Ok(self
            .read()?
            .folders
            .values()
            .filter(|f| f.owner == owner)
            .cloned()
            .collect())
    }

    async fn get_folder_permission(
        &self,
        folder: FolderId,
        grantee: UserId,
    ) -> Result<Option<FolderPermission>> {
        Ok(self
            .read()?
            .folder_permissions
            .get(&(folder, grantee))
            .copied())
    }

    async fn list_folder_permissions(&self, folder: FolderId) -> Result<Vec<FolderPermission>> {
        Ok(self
            .read()?
            .folder_permissions
            .values()
            .filter(|p| p.folder == folder)
            .copied()
            .collect())
    }

    async fn list_folder_permissions_for(&self, grantee: UserId) -> Result<Vec<FolderPermission>> {
        Ok(self
            .read()?
            .folder_permissions
            .values()
            .filter(|p| p.grantee == grantee)
            .copied()
            .collect())
    }

    async fn get_secret(&self, id: SecretId) -> Result<Option<Secret>> {
        Ok(self.read()?.secrets.get(&id).cloned())
    }

    async fn list_secrets_in_folder(&self, folder: FolderId) -> Result<Vec<Secret>> {
        Ok(self
            .read()?
            .secrets
            .values()
            .filter(|s| s.folder == Some(folder))
            .cloned()
            .collect())
    }

    async fn list_secrets_owned_by(&self, owner: UserId) -> Result<Vec<Secret>> {
        Ok(self
            .read()?
            .secrets
            .values()
            .filter(|s| s.owner == owner)
            .cloned()
            .collect())
    }

    async fn get_secret_permission(
        &self,
        secret: SecretId,
        grantee: UserId,
    ) -> Result<Option<SecretPermission>> {
        Ok(self
            .read()?
            .secret_permissions
            .get(&(secret, grantee))
            .copied())
    }

    async fn list_secret_permissions(&self, secret: SecretId) -> Result<Vec<SecretPermission>> {
        Ok(self
            .read()?
            .secret_permissions
            .values()
            .filter(|p| p.secret == secret)
            .copied()
            .collect())
    }

    async fn list_secret_permissions_for(&self, grantee: UserId) -> Result<Vec<SecretPermission>> {
        Ok(self
            .read()?
            .secret_permissions
            .values()
            .filter(|p| p.grantee == grantee)
            .copied()
            .collect())
    }

    async fn get_view(&self, user: UserId, secret: SecretId) -> Result<Option<UserSecretView>> {
        Ok(self.read()?.views.get(&(user, secret)).copied())
    }

    async fn list_views_for(&self, user: UserId) -> Result<Vec<UserSecretView>> {
        Ok(self
            .read()?
            .views
            .values()
            .filter(|v| v.user == user)
            .copied()
            .collect())
    }
}
