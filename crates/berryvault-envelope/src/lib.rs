//! # BerryVault Envelope Encryption
//!
//! Encryption of secret values and file blobs at rest.
//!
//! ## Overview
//!
//! Text values are encrypted under one global key, loaded from the sealer
//! once per process. File blobs are encrypted under a per-owner key sealed
//! by the device when hardware sealing is on, and carry a header naming
//! that key:
//!
//! ```text
//! TPM_USER_<id>:<ciphertext>      per-user sealed key
//! TPM_SEALED:<name>:<ciphertext>  legacy sealed key file
//! <ciphertext>                    global key
//! ```
//!
//! Ciphertext is ChaCha20-Poly1305 with the nonce prepended.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use berryvault_envelope::{DowngradePolicy, EnvelopeService};
//! use berryvault_seal::{AsyncSealer, PlainSealer};
//!
//! async fn example() {
//!     let provider = Arc::new(PlainSealer::new("/app/secrets").unwrap());
//!     let sealer = AsyncSealer::new(provider, Duration::from_secs(10));
//!     let service = EnvelopeService::new(sealer, DowngradePolicy::default());
//!
//!     let stored = service.encrypt_value("hunter2").await.unwrap();
//!     assert_eq!(service.decrypt_value(&stored).await, "hunter2");
//! }
//! ```

pub mod error;
pub mod files;
pub mod header;
pub mod policy;
pub mod service;

pub use error::{EnvelopeError, Result};
pub use files::{
    allocate_blob_path, extension_for, resolve_blob_path, secure_delete_file, BlobLocation,
    UploadPolicy, DEFAULT_MAX_FILE_SIZE,
};
pub use header::{encode_envelope, Envelope, EnvelopeHeader};
pub use policy::DowngradePolicy;
pub use service::{
    key_from_material, user_key_name, EnvelopeService, DECRYPT_PLACEHOLDER, GLOBAL_KEY_NAME,
};
