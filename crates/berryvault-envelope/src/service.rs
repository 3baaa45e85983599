//! The envelope encryption service.
//!
//! Plain values are always encrypted under the global key. Files are
//! encrypted under their owner's sealed key when hardware sealing is on,
//! tagged `TPM_USER_<id>:` so the reader can find the key again.
//!
//! Decryption walks user header, legacy header, then the global key. A
//! tier that fails falls through to the next when the [`DowngradePolicy`]
//! allows it; only the last failure is surfaced.

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine as _;
use tokio::sync::{Mutex, OnceCell};
use zeroize::Zeroizing;

use berryvault_core::{EncryptionKey, UserId};
use berryvault_seal::AsyncSealer;

use crate::error::{EnvelopeError, Result};
use crate::header::{encode_envelope, Envelope, EnvelopeHeader};
use crate::policy::DowngradePolicy;

/// Sealed name of the global key.
pub const GLOBAL_KEY_NAME: &str = "encryption_key";

/// Rendered in place of a value that cannot be decrypted.
pub const DECRYPT_PLACEHOLDER: &str = "[Error: Unable to decrypt value]";

/// Sealed file name of a user's file key.
pub fn user_key_name(user: UserId) -> String {
    format!("user_{}_key.sealed", user.0)
}

/// Interpret sealed key material: 32 raw bytes, or base64 of 32 bytes.
pub fn key_from_material(material: &[u8]) -> Result<EncryptionKey> {
    if material.len() == 32 {
        return Ok(EncryptionKey::from_slice(material)?);
    }
    let text = std::str::from_utf8(material)
        .map_err(|_| EnvelopeError::KeyUnavailable("key material is not 32 bytes".into()))?
        .trim();
    let decoded = Zeroizing::new(
        STANDARD
            .decode(text)
            .or_else(|_| URL_SAFE.decode(text))
            .map_err(|_| EnvelopeError::KeyUnavailable("key material is not base64".into()))?,
    );
    Ok(EncryptionKey::from_slice(&decoded)?)
}

/// Encrypts values and files under global and per-user keys.
pub struct EnvelopeService {
    sealer: AsyncSealer,
    policy: DowngradePolicy,
    global: OnceCell<EncryptionKey>,
    key_creation: Mutex<()>,
}

impl EnvelopeService {
    pub fn new(sealer: AsyncSealer, policy: DowngradePolicy) -> Self {
        Self {
            sealer,
            policy,
            global: OnceCell::new(),
            key_creation: Mutex::new(()),
        }
    }

    /// Use `key` as the global key instead of loading it from the sealer.
    pub fn with_global_key(mut self, key: EncryptionKey) -> Self {
        self.global = OnceCell::new_with(Some(key));
        self
    }

    pub fn policy(&self) -> DowngradePolicy {
        self.policy
    }

    /// Whether per-user file keys are in use.
    pub fn is_hardware(&self) -> bool {
        self.sealer.provider().is_hardware()
    }

    /// The global key, loaded (or generated) on first use.
    pub async fn global_key(&self) -> Result<&EncryptionKey> {
        self.global
            .get_or_try_init(|| self.load_or_create_key(GLOBAL_KEY_NAME))
            .await
    }

    /// Unseal the key stored under `name`, generating and sealing a fresh
    /// one if nothing is sealed there yet.
    async fn load_or_create_key(&self, name: &str) -> Result<EncryptionKey> {
        let _creating = self.key_creation.lock().await;
        match self.sealer.unseal(name).await {
            Ok(material) => {
                let key = key_from_material(&material)?;
                tracing::debug!(name, fingerprint = %key.fingerprint(), "loaded sealed key");
                Ok(key)
            }
            Err(e) if e.is_not_found() => {
                let key = EncryptionKey::generate();
                self.sealer
                    .seal(Zeroizing::new(key.as_bytes().to_vec()), name)
                    .await?;
                tracing::info!(
                    name,
                    fingerprint = %key.fingerprint(),
                    hardware = self.is_hardware(),
                    "generated new key"
                );
                Ok(key)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The user's file key, created on first use.
    pub async fn ensure_user_key(&self, user: UserId) -> Result<EncryptionKey> {
        self.load_or_create_key(&user_key_name(user)).await
    }

    /// Encrypt a text value under the global key; output is base64.
    pub async fn encrypt_value(&self, value: &str) -> Result<String> {
        if value.is_empty() {
            return Ok(String::new());
        }
        let key = self.global_key().await?;
        let sealed = key
            .seal(value.as_bytes())
            .map_err(|e| EnvelopeError::EncryptionFailed(e.to_string()))?;
        Ok(STANDARD.encode(sealed))
    }

    /// Decrypt a value from [`encrypt_value`](Self::encrypt_value).
    pub async fn try_decrypt_value(&self, encrypted: &str) -> Result<String> {
        if encrypted.is_empty() {
            return Ok(String::new());
        }
        let failed = EnvelopeError::DecryptionFailed;
        let key = self.global_key().await.map_err(|e| failed(e.to_string()))?;
        let sealed = STANDARD
            .decode(encrypted.trim())
            .map_err(|e| failed(format!("invalid base64: {}", e)))?;
        let plain = key.open(&sealed).map_err(|e| failed(e.to_string()))?;
        String::from_utf8(plain).map_err(|_| failed("value is not UTF-8".into()))
    }

    /// Decrypt a value, rendering [`DECRYPT_PLACEHOLDER`] on failure.
    pub async fn decrypt_value(&self, encrypted: &str) -> String {
        match self.try_decrypt_value(encrypted).await {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(error = %e, "value could not be decrypted");
                DECRYPT_PLACEHOLDER.to_string()
            }
        }
    }

    /// Encrypt file contents, under the owner's key when hardware sealing is on.
    pub async fn encrypt_file(&self, data: &[u8], owner: Option<UserId>) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }

        if let (true, Some(user)) = (self.is_hardware(), owner) {
            let attempt = async {
                let key = self.ensure_user_key(user).await?;
                key.seal(data).map_err(EnvelopeError::from)
            };
            match attempt.await {
                Ok(body) => return Ok(encode_envelope(&EnvelopeHeader::User(user), &body)),
                Err(e) if self.policy.allows_fallback() => {
                    tracing::warn!(%user, error = %e, "user key unavailable, encrypting under global key");
                }
                Err(e) => {
                    return Err(EnvelopeError::KeyUnavailable(format!(
                        "user {} key: {}",
                        user, e
                    )))
                }
            }
        }

        let key = self.global_key().await?;
        key.seal(data)
            .map_err(|e| EnvelopeError::EncryptionFailed(e.to_string()))
    }

    async fn open_with_sealed_key(&self, name: &str, body: &[u8]) -> Result<Vec<u8>> {
        let material = self.sealer.unseal(name).await?;
        let key = key_from_material(&material)?;
        Ok(key.open(body)?)
    }

    /// Decrypt file contents through the fallback chain.
    pub async fn decrypt_file(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }

        let envelope = Envelope::parse(data);
        let sealed_name = match &envelope.header {
            EnvelopeHeader::User(user) => Some(user_key_name(*user)),
            EnvelopeHeader::Legacy(name) => Some(name.clone()),
            EnvelopeHeader::Untagged => None,
        };

        if let Some(name) = sealed_name {
            match self.open_with_sealed_key(&name, envelope.body).await {
                Ok(plain) => return Ok(plain),
                Err(e) if self.policy.allows_fallback() => {
                    tracing::warn!(
                        header = %envelope.header,
                        error = %e,
                        "sealed key tier failed, falling back to global key"
                    );
                }
                Err(e) => {
                    return Err(EnvelopeError::DecryptionFailed(format!(
                        "{}: {}",
                        envelope.header, e
                    )))
                }
            }
        }

        let key = self
            .global_key()
            .await
            .map_err(|e| EnvelopeError::DecryptionFailed(e.to_string()))?;
        key.open(envelope.body)
            .map_err(|e| EnvelopeError::DecryptionFailed(e.to_string()))
    }
}
