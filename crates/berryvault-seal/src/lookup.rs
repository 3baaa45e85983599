//! Named secret lookup across deployment tiers.
//!
//! A named secret (`jwt_secret`, `encryption_key`, ...) is looked up in
//! order:
//!
//! 1. the file named by the `<NAME>_FILE` environment variable
//! 2. the runtime secrets mount (`/secrets/<name>`)
//! 3. the application's own secrets directory
//!
//! Each tier builds its own provider scoped to that directory, so a device
//! or file error in one tier falls through to the next.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use zeroize::Zeroizing;

use crate::device::SealingDevice;
use crate::error::{Result, SealError};
use crate::sealer::{DeviceSealer, PlainSealer, SealingProvider};

/// Secrets read at startup.
pub const BOOTSTRAP_SECRETS: [&str; 5] = [
    "jwt_secret",
    "encryption_key",
    "app_secret",
    "mariadb_user",
    "password_salt",
];

/// Builds a provider scoped to one directory.
pub trait ProviderFactory: Send + Sync {
    fn build(&self, dir: &Path) -> Result<Box<dyn SealingProvider>>;
}

/// Device-backed providers sharing one device.
pub struct DeviceFactory<D: SealingDevice> {
    device: Arc<D>,
}

impl<D: SealingDevice> DeviceFactory<D> {
    pub fn new(device: Arc<D>) -> Self {
        Self { device }
    }
}

impl<D: SealingDevice + 'static> ProviderFactory for DeviceFactory<D> {
    fn build(&self, dir: &Path) -> Result<Box<dyn SealingProvider>> {
        let sealer = DeviceSealer::new(self.device.clone(), dir)?;
        sealer.generate_or_load_primary()?;
        Ok(Box::new(sealer))
    }
}

/// Plain file providers.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainFactory;

impl ProviderFactory for PlainFactory {
    fn build(&self, dir: &Path) -> Result<Box<dyn SealingProvider>> {
        Ok(Box::new(PlainSealer::new(dir)?))
    }
}

type EnvReader = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Three-tier lookup of named secrets.
#[derive(Clone)]
pub struct SecretLookup {
    factory: Arc<dyn ProviderFactory>,
    runtime_mount: PathBuf,
    secrets_dir: PathBuf,
    env: EnvReader,
}

impl SecretLookup {
    pub fn new(
        factory: Arc<dyn ProviderFactory>,
        runtime_mount: impl Into<PathBuf>,
        secrets_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            factory,
            runtime_mount: runtime_mount.into(),
            secrets_dir: secrets_dir.into(),
            env: Arc::new(|key| std::env::var(key).ok()),
        }
    }

    /// Replace the environment source.
    pub fn with_env<F>(mut self, env: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Arc::new(env);
        self
    }

    /// The application's own secrets directory (tier 3).
    pub fn secrets_dir(&self) -> &Path {
        &self.secrets_dir
    }

    /// A provider for the application's own secrets directory.
    pub fn primary_provider(&self) -> Result<Box<dyn SealingProvider>> {
        self.factory.build(&self.secrets_dir)
    }

    /// Candidate (directory, file name) pairs in lookup order.
    fn tiers(&self, name: &str) -> Vec<(&'static str, PathBuf, String)> {
        let mut tiers = Vec::with_capacity(3);

        let env_name = format!("{}_FILE", name.to_uppercase());
        if let Some(path) = (self.env)(&env_name) {
            let path = PathBuf::from(path);
            match (path.parent(), path.file_name().and_then(|n| n.to_str())) {
                (Some(dir), Some(file)) => {
                    tiers.push(("env", dir.to_path_buf(), file.to_string()));
                }
                _ => tracing::warn!(var = %env_name, "ignoring malformed secret file override"),
            }
        }

        if self.runtime_mount.join(name).exists() {
            tiers.push(("mount", self.runtime_mount.clone(), name.to_string()));
        }

        tiers.push(("app", self.secrets_dir.clone(), name.to_string()));
        tiers
    }

    /// Fetch a named secret, falling through the tiers.
    ///
    /// Not-found is returned only when every tier reported not-found; any
    /// other failure along the way makes the secret `Unavailable`.
    pub fn get_sealed_secret(&self, name: &str) -> Result<Zeroizing<Vec<u8>>> {
        let mut last_error = None;
        let mut all_missing = true;

        for (tier, dir, file) in self.tiers(name) {
            let attempt = self
                .factory
                .build(&dir)
                .and_then(|provider| provider.unseal(&file));
            match attempt {
                Ok(secret) => {
                    tracing::debug!(name, tier, "secret resolved");
                    return Ok(secret);
                }
                Err(e) => {
                    tracing::warn!(name, tier, dir = %dir.display(), error = %e, "secret tier failed");
                    all_missing &= e.is_not_found();
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if all_missing => Err(e),
            Some(e) => Err(SealError::Unavailable {
                name: name.to_string(),
                reason: e.to_string(),
            }),
            None => Err(SealError::Unavailable {
                name: name.to_string(),
                reason: "no lookup tier".into(),
            }),
        }
    }
}
