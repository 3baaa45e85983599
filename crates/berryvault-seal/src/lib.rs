//! # BerryVault Key Sealing
//!
//! Binds root secrets to a sealing device so they cannot be read off disk.
//!
//! ## Overview
//!
//! A sealed secret is stored as a blob file holding the device's private and
//! public parts for one sealed object. Only the device that created the
//! blob, under the same persistent primary key, can load and unseal it.
//!
//! Hosts with no device use the [`PlainSealer`], which keeps secrets as
//! plain files; callers hold a `dyn SealingProvider` either way.
//!
//! ## Key Types
//!
//! - [`SealingDevice`]: the device command surface (TPM-like)
//! - [`SoftwareDevice`]: an emulated device for hosts and tests
//! - [`DeviceSealer`] / [`PlainSealer`]: [`SealingProvider`] implementations
//! - [`SecretLookup`]: env override, runtime mount, then own directory
//! - [`AsyncSealer`]: device calls off the async runtime, with a timeout
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use berryvault_seal::{DeviceSealer, SealingProvider, SoftwareDevice};
//!
//! let device = Arc::new(SoftwareDevice::open("/var/lib/berryvault/device.state").unwrap());
//! let sealer = DeviceSealer::new(device, "/var/lib/berryvault/secrets").unwrap();
//! sealer.generate_or_load_primary().unwrap();
//!
//! sealer.seal(b"root key material", "encryption_key").unwrap();
//! let key = sealer.unseal("encryption_key").unwrap();
//! ```

pub mod blob;
pub mod blocking;
pub mod device;
pub mod error;
pub mod lookup;
pub mod sealer;
pub mod software;

pub use blob::{decode_blob, encode_blob};
pub use blocking::{with_device_timeout, AsyncSealer};
pub use device::{
    ObjectAttributes, ObjectHandle, PrivateBlob, PublicBlob, SealingDevice, PERSISTENT_HANDLE,
};
pub use error::{DeviceError, Result, SealError};
pub use lookup::{
    DeviceFactory, PlainFactory, ProviderFactory, SecretLookup, BOOTSTRAP_SECRETS,
};
pub use sealer::{DeviceSealer, PlainSealer, SealingProvider};
pub use software::{DeviceOp, SoftwareDevice};
