//! The sealing device interface.
//!
//! Mirrors the handful of TPM 2.0 commands the sealer needs: reference a
//! persistent primary, create and persist one, create a sealed child, load
//! it back, and release its data.

use serde::{Deserialize, Serialize};

use crate::error::DeviceError;

/// Well-known persistent slot of the primary sealing key.
pub const PERSISTENT_HANDLE: u32 = 0x8101_0001;

/// A device object handle (transient or persistent).
pub type ObjectHandle = u32;

/// Object attribute bits, following the TPMA_OBJECT layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectAttributes(pub u32);

impl ObjectAttributes {
    pub const FIXED_TPM: Self = Self(1 << 1);
    pub const FIXED_PARENT: Self = Self(1 << 4);
    pub const SENSITIVE_DATA_ORIGIN: Self = Self(1 << 5);
    pub const USER_WITH_AUTH: Self = Self(1 << 6);
    pub const NO_DA: Self = Self(1 << 10);
    pub const RESTRICTED: Self = Self(1 << 16);
    pub const DECRYPT: Self = Self(1 << 17);

    /// Primary storage key: restricted decryption key that never leaves the device.
    pub const PRIMARY: Self = Self(
        Self::RESTRICTED.0
            | Self::DECRYPT.0
            | Self::FIXED_TPM.0
            | Self::FIXED_PARENT.0
            | Self::SENSITIVE_DATA_ORIGIN.0
            | Self::USER_WITH_AUTH.0,
    );

    /// Sealed data object: device-bound, password-authorized, no lockout.
    pub const SEALED_OBJECT: Self = Self(
        Self::USER_WITH_AUTH.0 | Self::FIXED_TPM.0 | Self::FIXED_PARENT.0 | Self::NO_DA.0,
    );

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether the object can never be duplicated off its device and parent.
    pub const fn is_device_bound(&self) -> bool {
        self.contains(Self::FIXED_TPM) && self.contains(Self::FIXED_PARENT)
    }
}

/// Marshaled private area of a sealed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateBlob(pub Vec<u8>);

/// Marshaled public area of a sealed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicBlob(pub Vec<u8>);

/// A TPM-like sealing device.
///
/// Calls block on device I/O. Callers on an async path go through
/// [`crate::blocking::with_device_timeout`].
pub trait SealingDevice: Send + Sync {
    /// Reference an object already persisted at `handle`.
    fn load_persistent(&self, handle: u32) -> Result<ObjectHandle, DeviceError>;

    /// Create a primary key under the owner hierarchy.
    fn create_primary(&self, attributes: ObjectAttributes) -> Result<ObjectHandle, DeviceError>;

    /// Make a transient object persistent at `persistent`.
    fn evict_control(&self, object: ObjectHandle, persistent: u32) -> Result<(), DeviceError>;

    /// Seal `data` as a child of `parent`.
    fn create_sealed(
        &self,
        parent: ObjectHandle,
        data: &[u8],
        attributes: ObjectAttributes,
    ) -> Result<(PrivateBlob, PublicBlob), DeviceError>;

    /// Load a sealed child under `parent`.
    fn load(
        &self,
        parent: ObjectHandle,
        private: &PrivateBlob,
        public: &PublicBlob,
    ) -> Result<ObjectHandle, DeviceError>;

    /// Release a loaded object's data under password authorization.
    fn unseal(&self, object: ObjectHandle) -> Result<Vec<u8>, DeviceError>;

    /// Drop a transient object.
    fn flush(&self, object: ObjectHandle) -> Result<(), DeviceError>;
}
