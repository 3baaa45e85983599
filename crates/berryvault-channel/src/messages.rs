//! Channel wire events.
//!
//! An event is a name and a JSON body. After the handshake every
//! application event body is `{"encrypted": "<base64>"}`, where the
//! base64 decodes to `nonce || ciphertext` under the connection's
//! transport key.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use berryvault_core::{EncryptionKey, X25519PublicKey};

use crate::error::{ChannelError, Result};

/// Event names.
pub mod names {
    pub const INITIATE_KEY_EXCHANGE: &str = "initiate_key_exchange";
    pub const SERVER_PUBLIC_KEY: &str = "server_public_key";
    pub const CLIENT_PUBLIC_KEY: &str = "client_public_key";
    pub const KEY_EXCHANGE_COMPLETE: &str = "key_exchange_complete";
    pub const AUTHENTICATE: &str = "authenticate";
    pub const AUTHENTICATED: &str = "authenticated";
    pub const AUTH_ERROR: &str = "auth_error";
    pub const ERROR: &str = "error";
}

/// One event on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Event {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// An event with an empty body.
    pub fn bare(event: impl Into<String>) -> Self {
        Self::new(event, Value::Null)
    }

    /// `{"message": ...}` body, used for errors.
    pub fn message(event: impl Into<String>, message: &str) -> Self {
        Self::new(event, json!({ "message": message }))
    }

    /// `{"encrypted": ...}` body.
    pub fn encrypted(event: impl Into<String>, encrypted: String) -> Self {
        Self::new(event, json!({ "encrypted": encrypted }))
    }

    /// A string field of the body.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.data.get(name).and_then(Value::as_str)
    }

    /// The `encrypted` field, if present.
    pub fn encrypted_field(&self) -> Option<&str> {
        self.field("encrypted")
    }
}

/// Encrypt a JSON payload; returns base64 of `nonce || ciphertext`.
pub fn seal_payload(key: &EncryptionKey, payload: &Value) -> Result<String> {
    let plaintext = serde_json::to_vec(payload)
        .map_err(|e| ChannelError::InvalidMessage(e.to_string()))?;
    Ok(STANDARD.encode(key.seal(&plaintext)?))
}

/// Inverse of [`seal_payload`].
pub fn open_payload(key: &EncryptionKey, encrypted: &str) -> Result<Value> {
    let sealed = STANDARD
        .decode(encrypted)
        .map_err(|e| ChannelError::InvalidMessage(format!("invalid base64: {}", e)))?;
    let plaintext = key.open(&sealed)?;
    serde_json::from_slice(&plaintext).map_err(|e| ChannelError::InvalidMessage(e.to_string()))
}

/// Public keys travel as base64 of the 32 raw bytes.
pub fn encode_public_key(key: &X25519PublicKey) -> String {
    STANDARD.encode(key.as_bytes())
}

pub fn decode_public_key(encoded: &str) -> Result<X25519PublicKey> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| ChannelError::InvalidMessage(format!("invalid public key: {}", e)))?;
    Ok(X25519PublicKey::from_slice(&bytes)?)
}
