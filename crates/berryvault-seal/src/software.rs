//! Software emulation of a sealing device.
//!
//! Stands in for a TPM where none is present and in tests. A per-device
//! seed plays the role of the endorsement hierarchy: primary keys are
//! derived from it, sealed objects are encrypted under a key derived from
//! their parent and their own public area, so a tampered public part or a
//! different device fails to load.
//!
//! The device can persist its seed and persistent handles to a state file,
//! which makes `generate_or_load_primary` idempotent across restarts.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use berryvault_core::EncryptionKey;

use crate::device::{ObjectAttributes, ObjectHandle, PrivateBlob, PublicBlob, SealingDevice};
use crate::error::DeviceError;

const PRIMARY_CONTEXT: &str = "berryvault software device 2024 primary key v1";
const OBJECT_CONTEXT: &str = "berryvault software device 2024 sealed object v1";
const NAME_CONTEXT: &str = "berryvault software device 2024 object name v1";

/// First transient handle, matching the TPM transient range.
const TRANSIENT_BASE: u32 = 0x8000_0000;

/// Device commands, for fault injection and call accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceOp {
    LoadPersistent,
    CreatePrimary,
    EvictControl,
    CreateSealed,
    Load,
    Unseal,
    Flush,
}

/// Public area of a sealed object.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PublicArea {
    object_type: String,
    attributes: ObjectAttributes,
    /// Name of the parent primary key.
    parent_name: [u8; 32],
    /// Per-object randomness.
    unique: [u8; 32],
}

/// On-disk state: the seed and what is persisted where.
#[derive(Serialize, Deserialize)]
struct PersistedState {
    seed: [u8; 32],
    /// persistent handle -> primary unique value
    persistent: Vec<(u32, [u8; 32])>,
}

enum Object {
    Primary {
        key: Zeroizing<[u8; 32]>,
        name: [u8; 32],
        unique: [u8; 32],
    },
    Sealed { data: Zeroizing<Vec<u8>> },
}

struct DeviceState {
    seed: Zeroizing<[u8; 32]>,
    persistent: HashMap<u32, [u8; 32]>,
    transient: HashMap<ObjectHandle, Object>,
    next_handle: u32,
    faults: HashSet<DeviceOp>,
    calls: HashMap<DeviceOp, usize>,
}

/// A software sealing device.
pub struct SoftwareDevice {
    state: Mutex<DeviceState>,
    state_file: Option<PathBuf>,
}

impl SoftwareDevice {
    /// A device that lives only as long as this value.
    pub fn ephemeral() -> Self {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        Self::from_parts(seed, HashMap::new(), None)
    }

    /// Open (or create) a device whose seed and persistent handles are kept
    /// in `state_file`.
    pub fn open(state_file: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = state_file.as_ref().to_path_buf();
        if path.exists() {
            let bytes = std::fs::read(&path)?;
            let persisted: PersistedState = ciborium::from_reader(bytes.as_slice())
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
            let persistent = persisted.persistent.into_iter().collect();
            Ok(Self::from_parts(persisted.seed, persistent, Some(path)))
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut seed = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut seed);
            let device = Self::from_parts(seed, HashMap::new(), Some(path));
            device.save()?;
            Ok(device)
        }
    }

    fn from_parts(
        seed: [u8; 32],
        persistent: HashMap<u32, [u8; 32]>,
        state_file: Option<PathBuf>,
    ) -> Self {
        Self {
            state: Mutex::new(DeviceState {
                seed: Zeroizing::new(seed),
                persistent,
                transient: HashMap::new(),
                next_handle: TRANSIENT_BASE,
                faults: HashSet::new(),
                calls: HashMap::new(),
            }),
            state_file,
        }
    }

    /// Make every subsequent `op` fail with a device fault.
    pub fn inject_fault(&self, op: DeviceOp) {
        if let Ok(mut state) = self.state.lock() {
            state.faults.insert(op);
        }
    }

    /// Clear all injected faults.
    pub fn clear_faults(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.faults.clear();
        }
    }

    /// Simulate a device reset: every transient handle is invalidated.
    pub fn reset(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.transient.clear();
        }
    }

    /// How many times `op` has been issued.
    pub fn call_count(&self, op: DeviceOp) -> usize {
        self.state
            .lock()
            .map(|s| s.calls.get(&op).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn save(&self) -> std::io::Result<()> {
        let Some(path) = &self.state_file else {
            return Ok(());
        };
        let persisted = {
            let state = self
                .state
                .lock()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
            PersistedState {
                seed: *state.seed,
                persistent: state.persistent.iter().map(|(h, u)| (*h, *u)).collect(),
            }
        };
        let mut bytes = Vec::new();
        ciborium::into_writer(&persisted, &mut bytes)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        std::fs::write(path, bytes)
    }

    /// Lock the state and account for one `op`, failing if a fault is armed.
    fn begin(&self, op: DeviceOp) -> Result<MutexGuard<'_, DeviceState>, DeviceError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| DeviceError::Fault("device state poisoned".into()))?;
        *state.calls.entry(op).or_insert(0) += 1;
        if state.faults.contains(&op) {
            return Err(DeviceError::Fault(format!("injected fault on {:?}", op)));
        }
        Ok(state)
    }
}

impl DeviceState {
    fn primary_from_unique(&self, unique: &[u8; 32]) -> Object {
        let mut material = Vec::with_capacity(64);
        material.extend_from_slice(&*self.seed);
        material.extend_from_slice(unique);
        let key = blake3::derive_key(PRIMARY_CONTEXT, &material);
        let name = blake3::derive_key(NAME_CONTEXT, &key);
        Object::Primary {
            key: Zeroizing::new(key),
            name,
            unique: *unique,
        }
    }

    fn insert_transient(&mut self, object: Object) -> ObjectHandle {
        let handle = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1).max(TRANSIENT_BASE);
        self.transient.insert(handle, object);
        handle
    }

    /// Resolve a handle to a primary key (transient or persistent).
    fn primary(&self, handle: ObjectHandle) -> Result<(Zeroizing<[u8; 32]>, [u8; 32]), DeviceError> {
        if let Some(unique) = self.persistent.get(&handle) {
            return match self.primary_from_unique(unique) {
                Object::Primary { key, name, .. } => Ok((key, name)),
                Object::Sealed { .. } => Err(DeviceError::Fault("not a primary".into())),
            };
        }
        match self.transient.get(&handle) {
            Some(Object::Primary { key, name, .. }) => Ok((key.clone(), *name)),
            Some(Object::Sealed { .. }) => Err(DeviceError::Fault(format!(
                "handle {:#010x} is not a storage key",
                handle
            ))),
            None => Err(DeviceError::HandleNotFound(handle)),
        }
    }
}

/// Key for one sealed object, bound to its parent and public area.
fn object_key(parent_key: &[u8; 32], public: &[u8]) -> EncryptionKey {
    let mut hasher = blake3::Hasher::new_derive_key(OBJECT_CONTEXT);
    hasher.update(parent_key);
    hasher.update(public);
    EncryptionKey::from_bytes(*hasher.finalize().as_bytes())
}

impl SealingDevice for SoftwareDevice {
    fn load_persistent(&self, handle: u32) -> Result<ObjectHandle, DeviceError> {
        let state = self.begin(DeviceOp::LoadPersistent)?;
        if state.persistent.contains_key(&handle) {
            Ok(handle)
        } else {
            Err(DeviceError::HandleNotFound(handle))
        }
    }

    fn create_primary(&self, attributes: ObjectAttributes) -> Result<ObjectHandle, DeviceError> {
        let mut state = self.begin(DeviceOp::CreatePrimary)?;
        if !attributes.contains(ObjectAttributes::RESTRICTED) {
            return Err(DeviceError::Fault("primary must be a restricted key".into()));
        }
        let mut unique = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut unique);
        let object = state.primary_from_unique(&unique);
        if let Object::Primary { name, .. } = &object {
            tracing::debug!(name = %hex::encode(&name[..8]), "software primary created");
        }
        Ok(state.insert_transient(object))
    }

    fn evict_control(&self, object: ObjectHandle, persistent: u32) -> Result<(), DeviceError> {
        {
            let mut state = self.begin(DeviceOp::EvictControl)?;
            let unique = match state.transient.get(&object) {
                Some(Object::Primary { unique, .. }) => *unique,
                Some(Object::Sealed { .. }) => {
                    return Err(DeviceError::Fault("only primaries can be persisted".into()))
                }
                None => return Err(DeviceError::HandleNotFound(object)),
            };
            if state.persistent.contains_key(&persistent) {
                return Err(DeviceError::Fault(format!(
                    "persistent handle {:#010x} already in use",
                    persistent
                )));
            }
            state.persistent.insert(persistent, unique);
        }
        self.save()
            .map_err(|e| DeviceError::Fault(format!("persisting state: {}", e)))
    }

    fn create_sealed(
        &self,
        parent: ObjectHandle,
        data: &[u8],
        attributes: ObjectAttributes,
    ) -> Result<(PrivateBlob, PublicBlob), DeviceError> {
        let state = self.begin(DeviceOp::CreateSealed)?;
        let (parent_key, parent_name) = state.primary(parent)?;

        let mut unique = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut unique);
        let area = PublicArea {
            object_type: "keyedhash".into(),
            attributes,
            parent_name,
            unique,
        };
        let mut public = Vec::new();
        ciborium::into_writer(&area, &mut public)
            .map_err(|e| DeviceError::Fault(format!("marshal public area: {}", e)))?;

        let private = object_key(&parent_key, &public)
            .seal(data)
            .map_err(|e| DeviceError::Fault(e.to_string()))?;
        Ok((PrivateBlob(private), PublicBlob(public)))
    }

    fn load(
        &self,
        parent: ObjectHandle,
        private: &PrivateBlob,
        public: &PublicBlob,
    ) -> Result<ObjectHandle, DeviceError> {
        let mut state = self.begin(DeviceOp::Load)?;
        let (parent_key, parent_name) = state.primary(parent)?;

        let area: PublicArea = ciborium::from_reader(public.0.as_slice())
            .map_err(|e| DeviceError::Integrity(format!("unmarshal public area: {}", e)))?;
        if area.parent_name != parent_name {
            return Err(DeviceError::Integrity("object was sealed under another parent".into()));
        }
        if !area.attributes.is_device_bound() {
            return Err(DeviceError::Integrity("object is not device-bound".into()));
        }

        let data = object_key(&parent_key, &public.0)
            .open(&private.0)
            .map_err(|_| DeviceError::Integrity("private area does not match".into()))?;
        Ok(state.insert_transient(Object::Sealed {
            data: Zeroizing::new(data),
        }))
    }

    fn unseal(&self, object: ObjectHandle) -> Result<Vec<u8>, DeviceError> {
        let state = self.begin(DeviceOp::Unseal)?;
        match state.transient.get(&object) {
            Some(Object::Sealed { data }) => Ok(data.to_vec()),
            Some(Object::Primary { .. }) => {
                Err(DeviceError::Fault("cannot unseal a storage key".into()))
            }
            None => Err(DeviceError::HandleNotFound(object)),
        }
    }

    fn flush(&self, object: ObjectHandle) -> Result<(), DeviceError> {
        let mut state = self.begin(DeviceOp::Flush)?;
        state
            .transient
            .remove(&object)
            .map(|_| ())
            .ok_or(DeviceError::HandleNotFound(object))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::PERSISTENT_HANDLE;

    fn primary(device: &SoftwareDevice) -> ObjectHandle {
        device.create_primary(ObjectAttributes::PRIMARY).unwrap()
    }

    #[test]
    fn test_seal_load_unseal() {
        let device = SoftwareDevice::ephemeral();
        let parent = primary(&device);
        let (private, public) = device
            .create_sealed(parent, b"root key", ObjectAttributes::SEALED_OBJECT)
            .unwrap();
        let object = device.load(parent, &private, &public).unwrap();
        assert_eq!(device.unseal(object).unwrap(), b"root key");
        device.flush(object).unwrap();
        assert_eq!(device.unseal(object), Err(DeviceError::HandleNotFound(object)));
    }

    #[test]
    fn test_tampered_public_fails_integrity() {
        let device = SoftwareDevice::ephemeral();
        let parent = primary(&device);
        let (private, mut public) = device
            .create_sealed(parent, b"x", ObjectAttributes::SEALED_OBJECT)
            .unwrap();
        let last = public.0.len() - 1;
        public.0[last] ^= 0x01;
        assert!(matches!(
            device.load(parent, &private, &public),
            Err(DeviceError::Integrity(_))
        ));
    }

    #[test]
    fn test_other_device_cannot_load() {
        let a = SoftwareDevice::ephemeral();
        let b = SoftwareDevice::ephemeral();
        let pa = primary(&a);
        let pb = primary(&b);
        let (private, public) = a
            .create_sealed(pa, b"bound", ObjectAttributes::SEALED_OBJECT)
            .unwrap();
        assert!(b.load(pb, &private, &public).is_err());
    }

    #[test]
    fn test_persistent_primary_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("device.cbor");

        let (private, public) = {
            let device = SoftwareDevice::open(&state).unwrap();
            assert_eq!(
                device.load_persistent(PERSISTENT_HANDLE),
                Err(DeviceError::HandleNotFound(PERSISTENT_HANDLE))
            );
            let handle = primary(&device);
            device.evict_control(handle, PERSISTENT_HANDLE).unwrap();
            device
                .create_sealed(PERSISTENT_HANDLE, b"kept", ObjectAttributes::SEALED_OBJECT)
                .unwrap()
        };

        let device = SoftwareDevice::open(&state).unwrap();
        let parent = device.load_persistent(PERSISTENT_HANDLE).unwrap();
        let object = device.load(parent, &private, &public).unwrap();
        assert_eq!(device.unseal(object).unwrap(), b"kept");
    }

    #[test]
    fn test_reset_invalidates_transient_handles() {
        let device = SoftwareDevice::ephemeral();
        let parent = primary(&device);
        device.reset();
        assert!(matches!(
            device.create_sealed(parent, b"x", ObjectAttributes::SEALED_OBJECT),
            Err(DeviceError::HandleNotFound(_))
        ));
    }

    #[test]
    fn test_fault_injection_and_call_count() {
        let device = SoftwareDevice::ephemeral();
        device.inject_fault(DeviceOp::CreatePrimary);
        assert!(matches!(
            device.create_primary(ObjectAttributes::PRIMARY),
            Err(DeviceError::Fault(_))
        ));
        device.clear_faults();
        assert!(device.create_primary(ObjectAttributes::PRIMARY).is_ok());
        assert_eq!(device.call_count(DeviceOp::CreatePrimary), 2);
    }
}
