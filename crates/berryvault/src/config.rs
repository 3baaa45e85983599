//! Vault configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use berryvault_channel::ChannelConfig;
use berryvault_envelope::{DowngradePolicy, UploadPolicy, DEFAULT_MAX_FILE_SIZE};
use berryvault_seal::{ProviderFactory, SecretLookup, BOOTSTRAP_SECRETS};

use crate::error::{Result, VaultError};

/// Configuration for a [`Vault`](crate::Vault).
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Seal keys with a device instead of keeping plain key files.
    pub use_hardware_sealing: bool,
    /// The application's own secrets directory.
    pub secrets_dir: PathBuf,
    /// Runtime-provided secrets (container secrets mount).
    pub runtime_secrets_mount: PathBuf,
    /// `<NAME>_FILE` overrides for bootstrap secrets, keyed by variable.
    pub secret_files: BTreeMap<String, PathBuf>,
    /// Root directory for encrypted upload blobs.
    pub file_upload_path: PathBuf,
    pub max_file_size: u64,
    pub allowed_file_types: Vec<String>,
    /// What to do when a per-user sealed key cannot be used.
    pub downgrade_policy: DowngradePolicy,
    /// Upper bound on a single sealing-device call.
    pub device_timeout: Duration,
    pub channel: ChannelConfig,
}

impl Default for VaultConfig {
    fn default() -> Self {
        let uploads = UploadPolicy::default();
        Self {
            use_hardware_sealing: false,
            secrets_dir: PathBuf::from("/app/secrets"),
            runtime_secrets_mount: PathBuf::from("/secrets"),
            secret_files: BTreeMap::new(),
            file_upload_path: PathBuf::from("/app/uploads"),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            allowed_file_types: uploads.allowed_types,
            downgrade_policy: DowngradePolicy::default(),
            device_timeout: Duration::from_secs(10),
            channel: ChannelConfig::default(),
        }
    }
}

fn truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

impl VaultConfig {
    /// Read overrides from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides from `env`; unset keys keep their defaults.
    pub fn from_lookup<F>(env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = env("USE_TPM_SEALING") {
            config.use_hardware_sealing = truthy(&value);
        }
        if let Some(dir) = env("TPM_SECRETS_DIR").filter(|v| !v.trim().is_empty()) {
            config.secrets_dir = PathBuf::from(dir);
        }
        for name in BOOTSTRAP_SECRETS {
            let var = format!("{}_FILE", name.to_uppercase());
            if let Some(path) = env(&var).filter(|v| !v.trim().is_empty()) {
                config.secret_files.insert(var, PathBuf::from(path));
            }
        }
        if let Some(dir) = env("FILE_UPLOAD_PATH").filter(|v| !v.trim().is_empty()) {
            config.file_upload_path = PathBuf::from(dir);
        }
        if let Some(size) = env("MAX_FILE_SIZE") {
            config.max_file_size = size
                .trim()
                .parse()
                .map_err(|e| VaultError::Config(format!("MAX_FILE_SIZE {:?}: {}", size, e)))?;
        }
        if let Some(policy) = env("SEALED_KEY_DOWNGRADE") {
            config.downgrade_policy = policy.parse().map_err(VaultError::Config)?;
        }

        tracing::debug!(
            hardware = config.use_hardware_sealing,
            secrets_dir = %config.secrets_dir.display(),
            policy = %config.downgrade_policy,
            "configuration loaded"
        );
        Ok(config)
    }

    /// Upload limits.
    pub fn upload_policy(&self) -> UploadPolicy {
        UploadPolicy {
            max_file_size: self.max_file_size,
            allowed_types: self.allowed_file_types.clone(),
        }
    }

    /// Bootstrap secret lookup over the three configured tiers.
    pub fn secret_lookup(&self, factory: Arc<dyn ProviderFactory>) -> SecretLookup {
        let overrides = self.secret_files.clone();
        SecretLookup::new(
            factory,
            self.runtime_secrets_mount.clone(),
            self.secrets_dir.clone(),
        )
        .with_env(move |var| overrides.get(var).map(|p| p.display().to_string()))
    }
}
