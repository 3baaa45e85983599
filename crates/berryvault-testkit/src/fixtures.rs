//! Test fixtures and helpers.
//!
//! Common setup code for integration tests and benches.

use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;

use berryvault::{NewSecret, Vault, VaultConfig};
use berryvault_core::{Folder, Secret, UserId};
use berryvault_envelope::DowngradePolicy;
use berryvault_perms::FolderShare;
use berryvault_seal::{DeviceFactory, SoftwareDevice};
use berryvault_store::{MemoryStore, SqliteStore, VaultStore};

/// A vault backed by a software sealing device in a temporary directory.
pub struct VaultFixture<S: VaultStore> {
    pub vault: Vault<S>,
    pub device: Arc<SoftwareDevice>,
    pub config: VaultConfig,
    /// Keeps the directory alive for the fixture's lifetime.
    pub dir: TempDir,
}

impl VaultFixture<MemoryStore> {
    /// In-memory store, fail-open downgrade policy.
    pub fn memory() -> Self {
        Self::memory_with(DowngradePolicy::FailOpen)
    }

    pub fn memory_with(policy: DowngradePolicy) -> Self {
        Self::build(|_| MemoryStore::new(), policy)
    }
}

impl VaultFixture<SqliteStore> {
    /// SQLite database file inside the fixture directory.
    pub fn sqlite() -> Self {
        Self::build(
            |dir| SqliteStore::open(dir.join("vault.db")).expect("open sqlite store"),
            DowngradePolicy::FailOpen,
        )
    }
}

impl<S: VaultStore> VaultFixture<S> {
    fn build(store: impl FnOnce(&Path) -> S, policy: DowngradePolicy) -> Self {
        let dir = tempfile::tempdir().expect("create fixture directory");
        let device = Arc::new(
            SoftwareDevice::open(dir.path().join("device.state")).expect("open software device"),
        );
        let config = VaultConfig {
            use_hardware_sealing: true,
            secrets_dir: dir.path().join("secrets"),
            runtime_secrets_mount: dir.path().join("mount"),
            file_upload_path: dir.path().join("uploads"),
            downgrade_policy: policy,
            ..VaultConfig::default()
        };
        let vault = Vault::open(
            store(dir.path()),
            &config,
            Arc::new(DeviceFactory::new(device.clone())),
        )
        .expect("open vault");
        Self {
            vault,
            device,
            config,
            dir,
        }
    }

    /// The `n`th test user (ids start at 1).
    pub fn user(&self, n: u64) -> UserId {
        UserId(n + 1)
    }

    /// A REGULAR folder with `count` password secrets.
    pub async fn folder_with_secrets(
        &self,
        owner: UserId,
        name: &str,
        count: usize,
    ) -> (Folder, Vec<Secret>) {
        let folder = self
            .vault
            .create_folder(owner, name, None, None)
            .await
            .expect("create folder");
        let mut secrets = Vec::with_capacity(count);
        for i in 0..count {
            let secret = self
                .vault
                .create_secret(
                    owner,
                    NewSecret {
                        name: format!("{}-{}", name, i),
                        folder: Some(folder.id),
                        secret_type: "password".into(),
                        value: format!("value-{}", i),
                        ..NewSecret::default()
                    },
                )
                .await
                .expect("create secret");
            secrets.push(secret);
        }
        (folder, secrets)
    }

    /// A folder shared read-only with every grantee.
    pub async fn shared_folder(
        &self,
        owner: UserId,
        grantees: &[UserId],
        count: usize,
    ) -> (Folder, Vec<Secret>) {
        let (folder, secrets) = self.folder_with_secrets(owner, "shared", count).await;
        for grantee in grantees {
            self.vault
                .share_folder(owner, folder.id, *grantee, FolderShare::default())
                .await
                .expect("share folder");
        }
        let folder = self
            .vault
            .store()
            .get_folder(folder.id)
            .await
            .expect("load folder")
            .expect("folder exists");
        (folder, secrets)
    }
}

/// `count` distinct users, starting at id 1.
pub fn users(count: usize) -> Vec<UserId> {
    (1..=count as u64).map(UserId).collect()
}
