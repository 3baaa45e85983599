//! Sealing providers.
//!
//! A provider seals named secrets into files in one directory. The
//! hardware-backed [`DeviceSealer`] binds them to a [`SealingDevice`]; the
//! [`PlainSealer`] keeps them as plain files for hosts with no device.
//! Callers hold a `dyn SealingProvider` and never branch on which one.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use zeroize::Zeroizing;

use crate::blob::{decode_blob, encode_blob};
use crate::device::{ObjectAttributes, ObjectHandle, SealingDevice, PERSISTENT_HANDLE};
use crate::error::{DeviceError, Result, SealError};

/// Seal and unseal named secrets in a directory.
pub trait SealingProvider: Send + Sync {
    /// Make sure the root sealing key is available. Idempotent.
    fn generate_or_load_primary(&self) -> Result<()>;

    /// Seal `secret` into the file `name`; returns its path.
    fn seal(&self, secret: &[u8], name: &str) -> Result<PathBuf>;

    /// Recover the secret sealed in `name`.
    fn unseal(&self, name: &str) -> Result<Zeroizing<Vec<u8>>>;

    /// Directory the provider reads and writes.
    fn secrets_dir(&self) -> &Path;

    /// Whether this provider is backed by a device.
    fn is_hardware(&self) -> bool;
}

fn blob_path(dir: &Path, name: &str) -> Result<PathBuf> {
    if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(SealError::InvalidBlob(format!("invalid secret name {:?}", name)));
    }
    Ok(dir.join(name))
}

fn create_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| {
        tracing::warn!(dir = %dir.display(), error = %e, "cannot create secrets directory");
        SealError::Io(e)
    })
}

/// Device-backed provider.
pub struct DeviceSealer<D: SealingDevice> {
    device: Arc<D>,
    secrets_dir: PathBuf,
    persistent_handle: u32,
    primary: Mutex<Option<ObjectHandle>>,
}

impl<D: SealingDevice> DeviceSealer<D> {
    /// Create a sealer for `secrets_dir`, creating the directory if needed.
    pub fn new(device: Arc<D>, secrets_dir: impl Into<PathBuf>) -> Result<Self> {
        let secrets_dir = secrets_dir.into();
        create_dir(&secrets_dir)?;
        Ok(Self {
            device,
            secrets_dir,
            persistent_handle: PERSISTENT_HANDLE,
            primary: Mutex::new(None),
        })
    }

    /// Use a different persistent slot for the primary.
    pub fn with_persistent_handle(mut self, handle: u32) -> Self {
        self.persistent_handle = handle;
        self
    }

    fn primary_handle(&self) -> Result<ObjectHandle> {
        let cached = *self
            .primary
            .lock()
            .map_err(|_| DeviceError::Fault("primary handle lock poisoned".into()))?;
        match cached {
            Some(handle) => Ok(handle),
            None => {
                self.generate_or_load_primary()?;
                self.primary
                    .lock()
                    .map_err(|_| DeviceError::Fault("primary handle lock poisoned".into()))?
                    .ok_or_else(|| DeviceError::Fault("primary key unavailable".into()).into())
            }
        }
    }
}

impl<D: SealingDevice> SealingProvider for DeviceSealer<D> {
    fn generate_or_load_primary(&self) -> Result<()> {
        let mut primary = self
            .primary
            .lock()
            .map_err(|_| DeviceError::Fault("primary handle lock poisoned".into()))?;

        let handle = match self.device.load_persistent(self.persistent_handle) {
            Ok(handle) => {
                tracing::debug!(handle = format_args!("{:#010x}", handle), "using persistent primary key");
                handle
            }
            Err(DeviceError::HandleNotFound(_)) => {
                tracing::info!("no persistent primary key, creating one");
                let transient = self.device.create_primary(ObjectAttributes::PRIMARY)?;
                self.device
                    .evict_control(transient, self.persistent_handle)?;
                tracing::info!(
                    handle = format_args!("{:#010x}", self.persistent_handle),
                    "created and persisted primary key"
                );
                transient
            }
            Err(e) => return Err(e.into()),
        };

        *primary = Some(handle);
        Ok(())
    }

    fn seal(&self, secret: &[u8], name: &str) -> Result<PathBuf> {
        let path = blob_path(&self.secrets_dir, name)?;
        let parent = self.primary_handle()?;
        let (private, public) =
            self.device
                .create_sealed(parent, secret, ObjectAttributes::SEALED_OBJECT)?;
        std::fs::write(&path, encode_blob(&private, &public)?)?;
        tracing::info!(path = %path.display(), "sealed secret written");
        Ok(path)
    }

    fn unseal(&self, name: &str) -> Result<Zeroizing<Vec<u8>>> {
        let path = blob_path(&self.secrets_dir, name)?;
        if !path.exists() {
            return Err(SealError::SecretFileNotFound(path));
        }
        let parent = self.primary_handle()?;
        let data = std::fs::read(&path)?;
        let (private, public) = decode_blob(&data)?;

        let object = self.device.load(parent, &private, &public)?;
        let unsealed = self.device.unseal(object).map(Zeroizing::new);
        if let Err(e) = self.device.flush(object) {
            tracing::debug!(error = %e, "flush after unseal failed");
        }
        let unsealed = unsealed?;
        tracing::debug!(name, size = unsealed.len(), "unsealed secret");
        Ok(unsealed)
    }

    fn secrets_dir(&self) -> &Path {
        &self.secrets_dir
    }

    fn is_hardware(&self) -> bool {
        true
    }
}

impl<D: SealingDevice> fmt::Debug for DeviceSealer<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSealer")
            .field("secrets_dir", &self.secrets_dir)
            .field("persistent_handle", &format_args!("{:#010x}", self.persistent_handle))
            .finish_non_exhaustive()
    }
}

/// Plain at-rest files, used when no sealing device is configured.
#[derive(Debug, Clone)]
pub struct PlainSealer {
    secrets_dir: PathBuf,
}

impl PlainSealer {
    pub fn new(secrets_dir: impl Into<PathBuf>) -> Result<Self> {
        let secrets_dir = secrets_dir.into();
        create_dir(&secrets_dir)?;
        Ok(Self { secrets_dir })
    }
}

impl SealingProvider for PlainSealer {
    fn generate_or_load_primary(&self) -> Result<()> {
        Ok(())
    }

    fn seal(&self, secret: &[u8], name: &str) -> Result<PathBuf> {
        let path = blob_path(&self.secrets_dir, name)?;
        std::fs::write(&path, secret)?;
        Ok(path)
    }

    fn unseal(&self, name: &str) -> Result<Zeroizing<Vec<u8>>> {
        let path = blob_path(&self.secrets_dir, name)?;
        if !path.exists() {
            return Err(SealError::SecretFileNotFound(path));
        }
        Ok(Zeroizing::new(std::fs::read(&path)?))
    }

    fn secrets_dir(&self) -> &Path {
        &self.secrets_dir
    }

    fn is_hardware(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::software::{DeviceOp, SoftwareDevice};

    fn sealer(dir: &Path) -> (Arc<SoftwareDevice>, DeviceSealer<SoftwareDevice>) {
        let device = Arc::new(SoftwareDevice::ephemeral());
        let sealer = DeviceSealer::new(device.clone(), dir).unwrap();
        (device, sealer)
    }

    #[test]
    fn test_primary_not_found_then_created_in_one_call() {
        let dir = tempfile::tempdir().unwrap();
        let (device, sealer) = sealer(dir.path());

        sealer.generate_or_load_primary().unwrap();
        assert_eq!(device.call_count(DeviceOp::LoadPersistent), 1);
        assert_eq!(device.call_count(DeviceOp::CreatePrimary), 1);
        assert_eq!(device.call_count(DeviceOp::EvictControl), 1);

        // Usable immediately, no second acquisition round trip.
        sealer.seal(b"k", "encryption_key").unwrap();
        assert_eq!(device.call_count(DeviceOp::LoadPersistent), 1);
    }

    #[test]
    fn test_generate_or_load_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (device, sealer) = sealer(dir.path());
        sealer.generate_or_load_primary().unwrap();
        sealer.generate_or_load_primary().unwrap();
        assert_eq!(device.call_count(DeviceOp::CreatePrimary), 1);
        assert_eq!(device.call_count(DeviceOp::LoadPersistent), 2);

        // A second sealer over the same device finds the persisted primary.
        let other = DeviceSealer::new(device.clone(), dir.path()).unwrap();
        other.generate_or_load_primary().unwrap();
        assert_eq!(device.call_count(DeviceOp::CreatePrimary), 1);
    }

    #[test]
    fn test_seal_unseal_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let (_device, sealer) = sealer(dir.path());
        let path = sealer.seal(b"jwt-signing-key", "jwt_secret").unwrap();
        assert!(path.exists());
        let on_disk = std::fs::read(&path).unwrap();
        assert!(!on_disk.windows(15).any(|w| w == b"jwt-signing-key"));
        assert_eq!(&*sealer.unseal("jwt_secret").unwrap(), b"jwt-signing-key");
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let (_device, sealer) = sealer(dir.path());
        assert!(matches!(
            sealer.unseal("nope"),
            Err(SealError::SecretFileNotFound(_))
        ));
    }

    #[test]
    fn test_device_fault_surfaces() {
        let dir = tempfile::tempdir().unwrap();
        let (device, sealer) = sealer(dir.path());
        sealer.seal(b"v", "app_secret").unwrap();
        device.inject_fault(DeviceOp::Unseal);
        assert!(matches!(
            sealer.unseal("app_secret"),
            Err(SealError::SealingDeviceError(DeviceError::Fault(_)))
        ));
    }

    #[test]
    fn test_load_persistent_fault_is_not_masked() {
        let dir = tempfile::tempdir().unwrap();
        let (device, sealer) = sealer(dir.path());
        device.inject_fault(DeviceOp::LoadPersistent);
        assert!(sealer.generate_or_load_primary().is_err());
        assert_eq!(device.call_count(DeviceOp::CreatePrimary), 0);
    }

    #[test]
    fn test_path_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let plain = PlainSealer::new(dir.path()).unwrap();
        assert!(plain.seal(b"x", "../escape").is_err());
    }

    #[test]
    fn test_plain_sealer() {
        let dir = tempfile::tempdir().unwrap();
        let plain = PlainSealer::new(dir.path().join("nested")).unwrap();
        plain.seal(b"plain", "password_salt").unwrap();
        assert_eq!(&*plain.unseal("password_salt").unwrap(), b"plain");
        assert!(!plain.is_hardware());
    }
}
