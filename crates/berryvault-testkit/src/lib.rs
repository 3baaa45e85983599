//! # BerryVault Testkit
//!
//! Testing utilities for BerryVault.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: a ready vault over an in-memory or SQLite store, with a
//!   software sealing device in a temporary directory
//! - **Generators**: Proptest strategies for ids, grants, envelopes and
//!   folder trees
//! - **Benches**: criterion benches for envelope encryption and
//!   propagation planning (`cargo bench -p berryvault-testkit`)
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use berryvault_testkit::fixtures::VaultFixture;
//!
//! async fn example() {
//!     let fixture = VaultFixture::memory();
//!     let (folder, secrets) = fixture.folder_with_secrets(fixture.user(0), "team", 3).await;
//!     assert_eq!(secrets.len(), 3);
//!     # let _ = folder;
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use berryvault_testkit::generators::{envelope_header, payload};
//!
//! proptest! {
//!     #[test]
//!     fn header_survives_encoding(header in envelope_header(), body in payload(256)) {
//!         // ...
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{users, VaultFixture};
pub use generators::{ShareScenario, share_scenario};
