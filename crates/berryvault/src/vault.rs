//! The Vault: folders, secrets, sharing and files behind one API.
//!
//! Every mutating operation loads a snapshot, hands it to a pure planner in
//! `berryvault-perms`, and applies the resulting change set in a single
//! store transaction.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use berryvault_core::{
    now_millis, Action, EffectivePermissions, Folder, FolderArena, FolderId, FolderType, IdKind,
    Secret, SecretId, SecretPayload, SecretPermission, UserId,
};
use berryvault_envelope::{
    allocate_blob_path, key_from_material, resolve_blob_path, secure_delete_file,
    EnvelopeService, UploadPolicy, DECRYPT_PLACEHOLDER, GLOBAL_KEY_NAME,
};
use berryvault_perms::{
    allows, effective_permissions, folder_access, guarded, load_view, plan_create_folder,
    plan_create_secret, plan_delete_folder, plan_delete_secret, plan_move_secret,
    plan_share_folder, plan_share_secret, plan_unshare_folder, plan_unshare_secret,
    plan_update_folder, plan_update_secret, FolderContents, FolderShare, FolderUpdate, Guard,
    PermsError, Resource, SecretShare,
};
use berryvault_seal::{AsyncSealer, PlainFactory, ProviderFactory, SealingProvider};
use berryvault_store::VaultStore;

use crate::config::VaultConfig;
use crate::error::{Result, VaultError};

/// Secret type recorded for uploaded files.
pub const FILE_SECRET_TYPE: &str = "file";

/// A folder or secret addressed by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Folder(FolderId),
    Secret(SecretId),
}

/// A folder as seen by one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderEntry {
    pub folder: Folder,
    /// `/`-prefixed, slash-joined names from the root.
    pub path: String,
    pub permissions: EffectivePermissions,
}

/// A secret as seen by one user, without its value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretEntry {
    pub secret: Secret,
    /// The folder this user sees the secret in.
    pub view_folder: Option<FolderId>,
    pub permissions: EffectivePermissions,
}

/// A secret with its decrypted value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevealedSecret {
    pub secret: Secret,
    /// `None` for file secrets; the placeholder if decryption failed.
    pub value: Option<String>,
    pub view_folder: Option<FolderId>,
    pub permissions: EffectivePermissions,
}

#[derive(Debug, Clone, Default)]
pub struct NewSecret {
    pub name: String,
    pub description: Option<String>,
    pub folder: Option<FolderId>,
    pub secret_type: String,
    pub value: String,
}

/// Requested changes to a secret. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct SecretUpdate {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub value: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewFile {
    pub name: String,
    pub description: Option<String>,
    pub folder: Option<FolderId>,
    pub original_name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Decrypted file contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDownload {
    pub original_name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Run blob I/O off the async runtime.
async fn blocking_io<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| VaultError::Io(std::io::Error::other(e)))?
}

fn clean_name(name: &str, what: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(VaultError::InvalidInput(format!("{} name is required", what)));
    }
    Ok(name.to_string())
}

/// The vault facade.
pub struct Vault<S: VaultStore> {
    store: Arc<S>,
    envelope: Arc<EnvelopeService>,
    uploads: UploadPolicy,
    upload_root: PathBuf,
}

impl<S: VaultStore> Vault<S> {
    /// Assemble a vault from parts.
    pub fn new(store: S, envelope: EnvelopeService, config: &VaultConfig) -> Self {
        Self {
            store: Arc::new(store),
            envelope: Arc::new(envelope),
            uploads: config.upload_policy(),
            upload_root: config.file_upload_path.clone(),
        }
    }

    /// Build the sealing provider from `config` and assemble a vault.
    ///
    /// `devices` is used only when hardware sealing is enabled; otherwise
    /// keys are kept as plain files in `secrets_dir`. A provisioned global
    /// key is resolved through the bootstrap lookup tiers; when no tier has
    /// one, a key is generated and sealed into `secrets_dir` on first use.
    pub fn open(
        store: S,
        config: &VaultConfig,
        devices: Arc<dyn ProviderFactory>,
    ) -> Result<Self> {
        let factory: Arc<dyn ProviderFactory> = if config.use_hardware_sealing {
            devices
        } else {
            Arc::new(PlainFactory)
        };
        let provider: Arc<dyn SealingProvider> = Arc::from(factory.build(&config.secrets_dir)?);
        let sealer = AsyncSealer::new(provider, config.device_timeout);
        let mut envelope = EnvelopeService::new(sealer, config.downgrade_policy);

        match config.secret_lookup(factory).get_sealed_secret(GLOBAL_KEY_NAME) {
            Ok(material) => {
                let key = key_from_material(&material)?;
                tracing::debug!(fingerprint = %key.fingerprint(), "global key provisioned");
                envelope = envelope.with_global_key(key);
            }
            Err(e) if e.is_not_found() => {
                tracing::info!("no provisioned global key, one will be generated");
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            hardware = envelope.is_hardware(),
            policy = %config.downgrade_policy,
            "vault opened"
        );
        Ok(Self::new(store, envelope, config))
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn envelope(&self) -> &EnvelopeService {
        &self.envelope
    }

    pub fn upload_root(&self) -> &Path {
        &self.upload_root
    }

    async fn require_folder(&self, id: FolderId) -> Result<Folder> {
        self.store
            .get_folder(id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("folder {}", id)))
    }

    async fn require_secret(&self, id: SecretId) -> Result<Secret> {
        self.store
            .get_secret(id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("secret {}", id)))
    }

    async fn load_contents(&self, folder: Option<FolderId>) -> Result<Option<FolderContents>> {
        match folder {
            Some(id) => Ok(Some(FolderContents::load(&*self.store, id).await?)),
            None => Ok(None),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Permission Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Effective permissions of `user` on a folder or secret.
    pub async fn effective_permissions(
        &self,
        user: UserId,
        target: Target,
    ) -> Result<EffectivePermissions> {
        match target {
            Target::Folder(id) => {
                let folder = self.require_folder(id).await?;
                Ok(effective_permissions(&*self.store, user, Resource::Folder(&folder)).await?)
            }
            Target::Secret(id) => {
                let secret = self.require_secret(id).await?;
                Ok(effective_permissions(&*self.store, user, Resource::Secret(&secret)).await?)
            }
        }
    }

    /// Whether `user` may perform `action` on a folder or secret.
    pub async fn can(&self, user: UserId, action: Action, target: Target) -> Result<bool> {
        Ok(self.effective_permissions(user, target).await?.allows(action))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Folder Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a folder, optionally under a parent the owner can write to.
    pub async fn create_folder(
        &self,
        owner: UserId,
        name: &str,
        description: Option<String>,
        parent: Option<FolderId>,
    ) -> Result<Folder> {
        let name = clean_name(name, "folder")?;
        let parent_perms = match parent {
            Some(id) => {
                let parent = self.require_folder(id).await?;
                Some(effective_permissions(&*self.store, owner, Resource::Folder(&parent)).await?)
            }
            None => None,
        };

        let id = FolderId::new(self.store.allocate_id(IdKind::Folder).await?);
        let now = now_millis();
        let folder = Folder {
            id,
            name,
            description,
            owner,
            parent,
            folder_type: FolderType::Regular,
            created_at: now,
            updated_at: now,
        };

        let changes = plan_create_folder(folder.clone(), parent_perms)?;
        self.store.apply(changes).await?;
        tracing::info!(folder = %id, %owner, "folder created");
        Ok(folder)
    }

    /// Rename, describe, re-parent or change the mode of a folder.
    pub async fn update_folder(
        &self,
        actor: UserId,
        id: FolderId,
        update: FolderUpdate,
    ) -> Result<Folder> {
        let contents = FolderContents::load(&*self.store, id).await?;
        let actor_perms =
            effective_permissions(&*self.store, actor, Resource::Folder(&contents.folder)).await?;

        let parent_perms = match update.parent {
            Some(Some(parent_id)) => {
                let parent = self.require_folder(parent_id).await?;
                Some(effective_permissions(&*self.store, actor, Resource::Folder(&parent)).await?)
            }
            _ => None,
        };
        let folders = self.store.list_folders().await?;
        let arena = FolderArena::from_folders(&folders);

        let changes = plan_update_folder(
            &contents,
            &arena,
            actor,
            actor_perms,
            parent_perms,
            update,
        )?;
        self.store.apply(changes).await?;
        self.require_folder(id).await
    }

    /// Delete a folder. Its secrets and child folders become unfiled.
    pub async fn delete_folder(&self, actor: UserId, id: FolderId) -> Result<()> {
        let folder = self.require_folder(id).await?;
        let perms = effective_permissions(&*self.store, actor, Resource::Folder(&folder)).await?;
        let changes = plan_delete_folder(&folder, perms)?;
        self.store.apply(changes).await?;
        tracing::info!(folder = %id, user = %actor, "folder deleted");
        Ok(())
    }

    async fn folder_entries(&self, user: UserId, include_owned: bool) -> Result<Vec<FolderEntry>> {
        let folders = self.store.list_folders().await?;
        let arena = FolderArena::from_folders(&folders);
        let by_id: BTreeMap<FolderId, &Folder> = folders.iter().map(|f| (f.id, f)).collect();

        let mut entries = BTreeMap::new();
        if include_owned {
            for folder in folders.iter().filter(|f| f.owner == user) {
                entries.insert(folder.id, (*folder).clone());
            }
        }
        let grants = self.store.list_folder_permissions_for(user).await?;
        for grant in grants.iter().filter(|g| g.access.can_read) {
            if let Some(folder) = by_id.get(&grant.folder).filter(|f| f.owner != user) {
                entries.insert(folder.id, (*folder).clone());
            }
        }

        let mut listed: Vec<FolderEntry> = entries
            .into_values()
            .map(|folder| {
                let grant = grants.iter().find(|g| g.folder == folder.id);
                let permissions = folder_access(user, &folder, grant);
                let path = arena
                    .full_path(folder.id)
                    .unwrap_or_else(|| folder.name.clone());
                FolderEntry {
                    folder,
                    path,
                    permissions,
                }
            })
            .collect();
        listed.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(listed)
    }

    /// Folders `user` owns or can read.
    pub async fn list_folders(&self, user: UserId) -> Result<Vec<FolderEntry>> {
        self.folder_entries(user, true).await
    }

    /// Folders shared with `user` by someone else.
    pub async fn list_shared_folders(&self, user: UserId) -> Result<Vec<FolderEntry>> {
        self.folder_entries(user, false).await
    }

    /// Grant `grantee` access to a folder and everything filed in it.
    pub async fn share_folder(
        &self,
        actor: UserId,
        id: FolderId,
        grantee: UserId,
        share: FolderShare,
    ) -> Result<()> {
        let contents = FolderContents::load(&*self.store, id).await?;
        let changes = plan_share_folder(&contents, actor, grantee, share)?;
        self.store.apply(changes).await?;
        Ok(())
    }

    /// Revoke a folder grant and everything it propagated.
    pub async fn unshare_folder(&self, actor: UserId, id: FolderId, grantee: UserId) -> Result<()> {
        let contents = FolderContents::load(&*self.store, id).await?;
        let changes = plan_unshare_folder(&contents, actor, grantee)?;
        self.store.apply(changes).await?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Secret Operations
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn create_secret(&self, owner: UserId, new: NewSecret) -> Result<Secret> {
        let name = clean_name(&new.name, "secret")?;
        let dest = self.load_contents(new.folder).await?;
        let envelope = self.envelope.encrypt_value(&new.value).await?;

        let id = SecretId::new(self.store.allocate_id(IdKind::Secret).await?);
        let now = now_millis();
        let secret = Secret {
            id,
            owner,
            name,
            description: new.description,
            folder: new.folder,
            secret_type: new.secret_type,
            payload: SecretPayload::Inline {
                envelope: envelope.into_bytes(),
            },
            created_at: now,
            updated_at: now,
        };

        let changes = plan_create_secret(secret.clone(), dest.as_ref())?;
        self.store.apply(changes).await?;
        tracing::info!(secret = %id, %owner, folder = ?secret.folder, "secret created");
        Ok(secret)
    }

    /// Fetch a readable secret and decrypt its value.
    pub async fn get_secret(&self, user: UserId, id: SecretId) -> Result<RevealedSecret> {
        let secret = self.require_secret(id).await?;
        let permissions = effective_permissions(&*self.store, user, Resource::Secret(&secret)).await?;
        allows::<Secret>(permissions, Action::Read, "read this secret").check(user, &secret)?;

        let value = match &secret.payload {
            SecretPayload::Inline { envelope } => Some(match std::str::from_utf8(envelope) {
                Ok(encrypted) => self.envelope.decrypt_value(encrypted).await,
                Err(_) => {
                    tracing::error!(secret = %id, "stored envelope is not text");
                    DECRYPT_PLACEHOLDER.to_string()
                }
            }),
            SecretPayload::File { .. } => None,
        };
        let view_folder = load_view(&*self.store, user, &secret).await?;
        Ok(RevealedSecret {
            secret,
            value,
            view_folder,
            permissions,
        })
    }

    /// Secrets `user` owns or can read, each placed by the user's view.
    pub async fn list_secrets(&self, user: UserId) -> Result<Vec<SecretEntry>> {
        let mut candidates: BTreeMap<SecretId, Secret> = BTreeMap::new();

        for secret in self.store.list_secrets_owned_by(user).await? {
            candidates.insert(secret.id, secret);
        }
        for grant in self.store.list_secret_permissions_for(user).await? {
            if candidates.contains_key(&grant.secret) {
                continue;
            }
            if let Some(secret) = self.store.get_secret(grant.secret).await? {
                candidates.insert(secret.id, secret);
            }
        }
        for grant in self.store.list_folder_permissions_for(user).await? {
            if !grant.access.can_read {
                continue;
            }
            for secret in self.store.list_secrets_in_folder(grant.folder).await? {
                candidates.entry(secret.id).or_insert(secret);
            }
        }

        let mut entries = Vec::with_capacity(candidates.len());
        for secret in candidates.into_values() {
            let permissions =
                effective_permissions(&*self.store, user, Resource::Secret(&secret)).await?;
            if !permissions.can_read {
                continue;
            }
            let view_folder = load_view(&*self.store, user, &secret).await?;
            entries.push(SecretEntry {
                secret,
                view_folder,
                permissions,
            });
        }
        tracing::debug!(%user, count = entries.len(), "secrets listed");
        Ok(entries)
    }

    /// Change a secret's name, description or value.
    pub async fn update_secret(
        &self,
        actor: UserId,
        id: SecretId,
        update: SecretUpdate,
    ) -> Result<Secret> {
        let current = self.require_secret(id).await?;
        let perms = effective_permissions(&*self.store, actor, Resource::Secret(&current)).await?;

        let mut updated = current.clone();
        if let Some(name) = update.name {
            updated.name = clean_name(&name, "secret")?;
        }
        if let Some(description) = update.description {
            updated.description = description;
        }
        if let Some(value) = update.value {
            if current.payload.is_file() {
                return Err(VaultError::InvalidInput(
                    "file secrets are replaced by uploading a new file".into(),
                ));
            }
            berryvault_perms::require(&perms, Action::Write, "update this secret")?;
            let envelope = self.envelope.encrypt_value(&value).await?;
            updated.payload = SecretPayload::Inline {
                envelope: envelope.into_bytes(),
            };
        }
        updated.updated_at = now_millis();

        let changes = plan_update_secret(&current, updated, perms)?;
        self.store.apply(changes).await?;
        self.require_secret(id).await
    }

    /// Delete a secret; a file secret's blob is wiped after the commit.
    pub async fn delete_secret(&self, actor: UserId, id: SecretId) -> Result<()> {
        let secret = self.require_secret(id).await?;
        let perms = effective_permissions(&*self.store, actor, Resource::Secret(&secret)).await?;
        let changes = plan_delete_secret(&secret, perms)?;
        self.store.apply(changes).await?;

        if let SecretPayload::File { path, .. } = &secret.payload {
            let wiped = match resolve_blob_path(&self.upload_root, path) {
                Ok(blob) => blocking_io(move || Ok(secure_delete_file(&blob)?)).await,
                Err(e) => Err(e.into()),
            };
            if let Err(e) = wiped {
                tracing::warn!(secret = %id, error = %e, "file blob could not be wiped");
            }
        }
        tracing::info!(secret = %id, user = %actor, "secret deleted");
        Ok(())
    }

    /// Grant or update `grantee`'s access to one secret.
    ///
    /// Bits left `None` keep their current value (false for a new grant).
    pub async fn share_secret(
        &self,
        actor: UserId,
        id: SecretId,
        grantee: UserId,
        share: SecretShare,
    ) -> Result<()> {
        let secret = self.require_secret(id).await?;
        let perms = effective_permissions(&*self.store, actor, Resource::Secret(&secret)).await?;
        let existing = self.store.get_secret_permission(id, grantee).await?;
        let changes = plan_share_secret(&secret, actor, perms, grantee, existing.as_ref(), share)?;
        self.store.apply(changes).await?;
        Ok(())
    }

    pub async fn unshare_secret(&self, actor: UserId, id: SecretId, grantee: UserId) -> Result<()> {
        let secret = self.require_secret(id).await?;
        let perms = effective_permissions(&*self.store, actor, Resource::Secret(&secret)).await?;
        let existing = self.store.get_secret_permission(id, grantee).await?;
        let changes = plan_unshare_secret(&secret, perms, grantee, existing.as_ref())?;
        self.store.apply(changes).await?;
        Ok(())
    }

    /// Everyone holding a grant on a secret the caller can read.
    pub async fn shared_users(&self, actor: UserId, id: SecretId) -> Result<Vec<SecretPermission>> {
        let secret = self.require_secret(id).await?;
        let perms = effective_permissions(&*self.store, actor, Resource::Secret(&secret)).await?;
        allows::<Secret>(perms, Action::Read, "read this secret").check(actor, &secret)?;
        Ok(self.store.list_secret_permissions(id).await?)
    }

    /// Move a secret. The owner moves the real folder; anyone else moves
    /// only their own view.
    pub async fn move_secret(
        &self,
        actor: UserId,
        id: SecretId,
        dest: Option<FolderId>,
    ) -> Result<()> {
        let secret = self.require_secret(id).await?;
        let grants = self.store.list_secret_permissions(id).await?;
        let dest = self.load_contents(dest).await?;
        let changes = plan_move_secret(&secret, actor, &grants, dest.as_ref())?;
        self.store.apply(changes).await?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // File Secrets
    // ─────────────────────────────────────────────────────────────────────────

    /// Encrypt an upload under the owner's key and store it as a secret.
    pub async fn upload_file(&self, owner: UserId, file: NewFile) -> Result<Secret> {
        let name = clean_name(&file.name, "secret")?;
        let size = file.data.len() as u64;
        self.uploads.validate(size, &file.mime_type)?;
        let dest = self.load_contents(file.folder).await?;

        let encrypted = self.envelope.encrypt_file(&file.data, Some(owner)).await?;
        let root = self.upload_root.clone();
        let mime_type = file.mime_type.clone();
        let location = blocking_io(move || {
            let location = allocate_blob_path(&root, owner, &mime_type)?;
            std::fs::write(&location.absolute, &encrypted)?;
            Ok(location)
        })
        .await?;

        let id = SecretId::new(self.store.allocate_id(IdKind::Secret).await?);
        let now = now_millis();
        let secret = Secret {
            id,
            owner,
            name,
            description: file.description,
            folder: file.folder,
            secret_type: FILE_SECRET_TYPE.to_string(),
            payload: SecretPayload::File {
                path: location.relative.clone(),
                original_name: file.original_name,
                mime_type: file.mime_type,
                size,
            },
            created_at: now,
            updated_at: now,
        };

        let committed = match plan_create_secret(secret.clone(), dest.as_ref()) {
            Ok(changes) => self.store.apply(changes).await.map_err(VaultError::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = committed {
            let orphan = location.absolute.clone();
            if let Err(wipe) = blocking_io(move || Ok(secure_delete_file(&orphan)?)).await {
                tracing::warn!(path = %location.relative, error = %wipe, "orphaned upload blob");
            }
            return Err(e);
        }

        tracing::info!(secret = %id, %owner, size, "file uploaded");
        Ok(secret)
    }

    /// Decrypt a readable file secret.
    pub async fn download_file(&self, user: UserId, id: SecretId) -> Result<FileDownload> {
        let secret = self.require_secret(id).await?;
        let perms = effective_permissions(&*self.store, user, Resource::Secret(&secret)).await?;
        let (path, original_name, mime_type) = guarded(
            &allows::<Secret>(perms, Action::Read, "read this secret"),
            user,
            &secret,
            |secret| match &secret.payload {
                SecretPayload::File {
                    path,
                    original_name,
                    mime_type,
                    ..
                } => Ok((path.clone(), original_name.clone(), mime_type.clone())),
                SecretPayload::Inline { .. } => Err(PermsError::InvalidInput(format!(
                    "secret {} is not a file",
                    secret.id
                ))),
            },
        )?;

        let blob = resolve_blob_path(&self.upload_root, &path)?;
        let encrypted = blocking_io(move || {
            std::fs::read(&blob).map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    VaultError::NotFound(format!("file for secret {}", id))
                } else {
                    VaultError::Io(e)
                }
            })
        })
        .await?;
        let data = self.envelope.decrypt_file(&encrypted).await?;
        Ok(FileDownload {
            original_name,
            mime_type,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berryvault_core::Access;
    use berryvault_envelope::DowngradePolicy;
    use berryvault_seal::{DeviceFactory, SoftwareDevice};
    use berryvault_store::MemoryStore;

    const ALICE: UserId = UserId(1);
    const BOB: UserId = UserId(2);
    const CAROL: UserId = UserId(3);

    fn config(dir: &Path) -> VaultConfig {
        VaultConfig {
            secrets_dir: dir.join("secrets"),
            runtime_secrets_mount: dir.join("mount"),
            file_upload_path: dir.join("uploads"),
            ..VaultConfig::default()
        }
    }

    fn plain_vault(dir: &Path) -> Vault<MemoryStore> {
        Vault::open(MemoryStore::new(), &config(dir), Arc::new(PlainFactory)).unwrap()
    }

    fn hardware_vault(dir: &Path) -> (Arc<SoftwareDevice>, Vault<MemoryStore>) {
        let device = Arc::new(SoftwareDevice::ephemeral());
        let config = VaultConfig {
            use_hardware_sealing: true,
            ..config(dir)
        };
        let vault =
            Vault::open(MemoryStore::new(), &config, Arc::new(DeviceFactory::new(device.clone())))
                .unwrap();
        (device, vault)
    }

    fn new_secret(name: &str, folder: Option<FolderId>, value: &str) -> NewSecret {
        NewSecret {
            name: name.into(),
            folder,
            secret_type: "password".into(),
            value: value.into(),
            ..NewSecret::default()
        }
    }

    #[tokio::test]
    async fn test_create_and_get_secret() {
        let dir = tempfile::tempdir().unwrap();
        let vault = plain_vault(dir.path());

        let secret = vault
            .create_secret(ALICE, new_secret("db", None, "hunter2"))
            .await
            .unwrap();
        let revealed = vault.get_secret(ALICE, secret.id).await.unwrap();
        assert_eq!(revealed.value.as_deref(), Some("hunter2"));
        assert_eq!(revealed.permissions, EffectivePermissions::OWNER);
        assert!(matches!(
            vault.get_secret(BOB, secret.id).await,
            Err(VaultError::AccessDenied(_))
        ));
        assert!(matches!(
            vault.get_secret(ALICE, SecretId(999)).await,
            Err(VaultError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_blank_names_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let vault = plain_vault(dir.path());
        assert!(matches!(
            vault.create_folder(ALICE, "   ", None, None).await,
            Err(VaultError::InvalidInput(_))
        ));
        assert!(matches!(
            vault.create_secret(ALICE, new_secret("", None, "x")).await,
            Err(VaultError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_list_folders_with_paths() {
        let dir = tempfile::tempdir().unwrap();
        let vault = plain_vault(dir.path());

        let work = vault.create_folder(ALICE, "work", None, None).await.unwrap();
        let infra = vault
            .create_folder(ALICE, "infra", None, Some(work.id))
            .await
            .unwrap();
        vault
            .share_folder(ALICE, infra.id, BOB, FolderShare::default())
            .await
            .unwrap();

        let listed = vault.list_folders(ALICE).await.unwrap();
        let paths: Vec<_> = listed.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["/work", "/work/infra"]);

        let shared = vault.list_shared_folders(BOB).await.unwrap();
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].folder.id, infra.id);
        assert!(shared[0].permissions.can_read);
        assert!(!shared[0].permissions.can_write);
        assert!(vault.list_shared_folders(ALICE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_folder_rejects_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let vault = plain_vault(dir.path());

        let a = vault.create_folder(ALICE, "a", None, None).await.unwrap();
        let b = vault.create_folder(ALICE, "b", None, Some(a.id)).await.unwrap();
        let err = vault
            .update_folder(
                ALICE,
                a.id,
                FolderUpdate {
                    parent: Some(Some(b.id)),
                    ..FolderUpdate::default()
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_client_error(), "{err}");

        let renamed = vault
            .update_folder(
                ALICE,
                b.id,
                FolderUpdate {
                    name: Some("b2".into()),
                    parent: Some(None),
                    ..FolderUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.name, "b2");
        assert_eq!(renamed.parent, None);
    }

    #[tokio::test]
    async fn test_create_folder_under_foreign_parent_denied() {
        let dir = tempfile::tempdir().unwrap();
        let vault = plain_vault(dir.path());

        let parent = vault.create_folder(ALICE, "p", None, None).await.unwrap();
        assert!(matches!(
            vault.create_folder(BOB, "c", None, Some(parent.id)).await,
            Err(VaultError::AccessDenied(_))
        ));

        vault
            .share_folder(
                ALICE,
                parent.id,
                BOB,
                FolderShare {
                    access: Access::new(true, true, false),
                    inherit: true,
                },
            )
            .await
            .unwrap();
        let child = vault.create_folder(BOB, "c", None, Some(parent.id)).await.unwrap();
        assert_eq!(child.owner, BOB);
    }

    #[tokio::test]
    async fn test_delete_folder_unfiles_secrets() {
        let dir = tempfile::tempdir().unwrap();
        let vault = plain_vault(dir.path());

        let folder = vault.create_folder(ALICE, "f", None, None).await.unwrap();
        let secret = vault
            .create_secret(ALICE, new_secret("s", Some(folder.id), "v"))
            .await
            .unwrap();
        assert!(matches!(
            vault.delete_folder(BOB, folder.id).await,
            Err(VaultError::AccessDenied(_))
        ));
        vault.delete_folder(ALICE, folder.id).await.unwrap();

        let entries = vault.list_secrets(ALICE).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].secret.id, secret.id);
        assert_eq!(entries[0].secret.folder, None);
        assert_eq!(entries[0].view_folder, None);
    }

    #[tokio::test]
    async fn test_share_secret_partial_update() {
        let dir = tempfile::tempdir().unwrap();
        let vault = plain_vault(dir.path());
        let secret = vault
            .create_secret(ALICE, new_secret("s", None, "v"))
            .await
            .unwrap();

        vault
            .share_secret(
                ALICE,
                secret.id,
                BOB,
                SecretShare {
                    can_read: Some(true),
                    ..SecretShare::default()
                },
            )
            .await
            .unwrap();
        vault
            .share_secret(
                ALICE,
                secret.id,
                BOB,
                SecretShare {
                    can_write: Some(true),
                    ..SecretShare::default()
                },
            )
            .await
            .unwrap();

        let users = vault.shared_users(ALICE, secret.id).await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].access, Access::new(true, true, false));

        // A writer can reshare but not with the owner or themselves.
        assert!(matches!(
            vault
                .share_secret(BOB, secret.id, ALICE, SecretShare::from(Access::READ))
                .await,
            Err(VaultError::InvalidInput(_))
        ));
        assert!(matches!(
            vault
                .share_secret(BOB, secret.id, BOB, SecretShare::from(Access::READ))
                .await,
            Err(VaultError::InvalidInput(_))
        ));
        vault
            .share_secret(BOB, secret.id, CAROL, SecretShare::from(Access::READ))
            .await
            .unwrap();
        assert!(vault.can(CAROL, Action::Read, Target::Secret(secret.id)).await.unwrap());

        vault.unshare_secret(ALICE, secret.id, CAROL).await.unwrap();
        assert!(!vault.can(CAROL, Action::Read, Target::Secret(secret.id)).await.unwrap());
        assert!(matches!(
            vault.unshare_secret(ALICE, secret.id, CAROL).await,
            Err(VaultError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_secret_requires_write() {
        let dir = tempfile::tempdir().unwrap();
        let vault = plain_vault(dir.path());
        let secret = vault
            .create_secret(ALICE, new_secret("s", None, "old"))
            .await
            .unwrap();
        vault
            .share_secret(ALICE, secret.id, BOB, SecretShare::from(Access::READ))
            .await
            .unwrap();

        let denied = vault
            .update_secret(
                BOB,
                secret.id,
                SecretUpdate {
                    value: Some("new".into()),
                    ..SecretUpdate::default()
                },
            )
            .await;
        assert!(matches!(denied, Err(VaultError::AccessDenied(_))));

        let updated = vault
            .update_secret(
                ALICE,
                secret.id,
                SecretUpdate {
                    name: Some("renamed".into()),
                    value: Some("new".into()),
                    ..SecretUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.owner, ALICE);
        let revealed = vault.get_secret(BOB, secret.id).await.unwrap();
        assert_eq!(revealed.value.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_non_owner_move_changes_only_own_view() {
        let dir = tempfile::tempdir().unwrap();
        let vault = plain_vault(dir.path());

        let secret = vault
            .create_secret(ALICE, new_secret("s", None, "v"))
            .await
            .unwrap();
        vault
            .share_secret(ALICE, secret.id, BOB, SecretShare::from(Access::READ))
            .await
            .unwrap();
        let bobs = vault.create_folder(BOB, "mine", None, None).await.unwrap();

        vault.move_secret(BOB, secret.id, Some(bobs.id)).await.unwrap();

        let for_bob = vault.get_secret(BOB, secret.id).await.unwrap();
        assert_eq!(for_bob.view_folder, Some(bobs.id));
        let for_alice = vault.get_secret(ALICE, secret.id).await.unwrap();
        assert_eq!(for_alice.secret.folder, None);
        assert_eq!(for_alice.view_folder, None);

        assert!(matches!(
            vault.move_secret(CAROL, secret.id, None).await,
            Err(VaultError::AccessDenied(_))
        ));
    }

    #[tokio::test]
    async fn test_file_roundtrip_hardware() {
        let dir = tempfile::tempdir().unwrap();
        let (_device, vault) = hardware_vault(dir.path());

        let data = b"\x89PNG fake image bytes".to_vec();
        let secret = vault
            .upload_file(
                ALICE,
                NewFile {
                    name: "scan".into(),
                    description: None,
                    folder: None,
                    original_name: "scan.png".into(),
                    mime_type: "image/png".into(),
                    data: data.clone(),
                },
            )
            .await
            .unwrap();

        let SecretPayload::File { path, size, .. } = &secret.payload else {
            panic!("expected a file payload");
        };
        assert_eq!(*size, data.len() as u64);
        let blob = vault.upload_root().join(path);
        let stored = std::fs::read(&blob).unwrap();
        assert!(stored.starts_with(b"TPM_USER_1:"));

        let download = vault.download_file(ALICE, secret.id).await.unwrap();
        assert_eq!(download.data, data);
        assert_eq!(download.original_name, "scan.png");
        assert!(matches!(
            vault.download_file(BOB, secret.id).await,
            Err(VaultError::AccessDenied(_))
        ));

        vault.delete_secret(ALICE, secret.id).await.unwrap();
        assert!(!blob.exists());
    }

    #[tokio::test]
    async fn test_upload_rejections() {
        let dir = tempfile::tempdir().unwrap();
        let vault = plain_vault(dir.path());
        let file = |mime: &str, data: Vec<u8>| NewFile {
            name: "f".into(),
            description: None,
            folder: None,
            original_name: "f".into(),
            mime_type: mime.into(),
            data,
        };

        assert!(vault
            .upload_file(ALICE, file("application/pdf", vec![1]))
            .await
            .unwrap_err()
            .is_client_error());
        assert!(vault
            .upload_file(ALICE, file("image/png", Vec::new()))
            .await
            .unwrap_err()
            .is_client_error());

        let inline = vault
            .create_secret(ALICE, new_secret("s", None, "v"))
            .await
            .unwrap();
        assert!(matches!(
            vault.download_file(ALICE, inline.id).await,
            Err(VaultError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_fail_closed_upload_without_device() {
        let dir = tempfile::tempdir().unwrap();
        let device = Arc::new(SoftwareDevice::ephemeral());
        let config = VaultConfig {
            use_hardware_sealing: true,
            downgrade_policy: DowngradePolicy::FailClosed,
            ..config(dir.path())
        };
        let vault =
            Vault::open(MemoryStore::new(), &config, Arc::new(DeviceFactory::new(device.clone())))
                .unwrap();
        device.inject_fault(berryvault_seal::DeviceOp::CreateSealed);

        let result = vault
            .upload_file(
                ALICE,
                NewFile {
                    name: "f".into(),
                    description: None,
                    folder: None,
                    original_name: "f.png".into(),
                    mime_type: "image/png".into(),
                    data: vec![1, 2, 3],
                },
            )
            .await;
        assert!(matches!(result, Err(VaultError::Envelope(_))));
        assert!(vault.list_secrets(ALICE).await.unwrap().is_empty());
    }

    fn write_key(dir: &Path, name: &str, byte: u8) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join(name), [byte; 32]).unwrap();
    }

    #[tokio::test]
    async fn test_global_key_from_runtime_mount() {
        let dir = tempfile::tempdir().unwrap();
        write_key(&dir.path().join("mount"), GLOBAL_KEY_NAME, 7);

        let vault = plain_vault(dir.path());
        let key = vault.envelope().global_key().await.unwrap();
        assert_eq!(key.as_bytes(), &[7; 32]);
        assert!(!dir.path().join("secrets").join(GLOBAL_KEY_NAME).exists());
    }

    #[tokio::test]
    async fn test_global_key_file_override_wins() {
        let dir = tempfile::tempdir().unwrap();
        write_key(&dir.path().join("mount"), GLOBAL_KEY_NAME, 7);
        write_key(&dir.path().join("provisioned"), "enc.key", 9);

        let mut config = config(dir.path());
        config.secret_files.insert(
            "ENCRYPTION_KEY_FILE".into(),
            dir.path().join("provisioned").join("enc.key"),
        );
        let vault = Vault::open(MemoryStore::new(), &config, Arc::new(PlainFactory)).unwrap();
        let key = vault.envelope().global_key().await.unwrap();
        assert_eq!(key.as_bytes(), &[9; 32]);
    }

    #[tokio::test]
    async fn test_global_key_from_secrets_dir() {
        let dir = tempfile::tempdir().unwrap();
        write_key(&dir.path().join("secrets"), GLOBAL_KEY_NAME, 5);

        let vault = plain_vault(dir.path());
        let key = vault.envelope().global_key().await.unwrap();
        assert_eq!(key.as_bytes(), &[5; 32]);
    }

    #[tokio::test]
    async fn test_global_key_generated_once_when_unprovisioned() {
        let dir = tempfile::tempdir().unwrap();
        let first = *plain_vault(dir.path())
            .envelope()
            .global_key()
            .await
            .unwrap()
            .as_bytes();
        assert!(dir.path().join("secrets").join(GLOBAL_KEY_NAME).exists());

        let reopened = plain_vault(dir.path());
        assert_eq!(reopened.envelope().global_key().await.unwrap().as_bytes(), &first);
    }

    #[test]
    fn test_unreadable_provisioned_key_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        // A plain file where the device expects a sealed blob.
        write_key(&dir.path().join("mount"), GLOBAL_KEY_NAME, 7);
        let config = VaultConfig {
            use_hardware_sealing: true,
            ..config(dir.path())
        };
        let device = Arc::new(SoftwareDevice::ephemeral());
        let opened = Vault::open(MemoryStore::new(), &config, Arc::new(DeviceFactory::new(device)));
        assert!(matches!(
            opened,
            Err(VaultError::Seal(berryvault_seal::SealError::Unavailable { .. }))
        ));
    }
}
