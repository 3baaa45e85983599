//! Envelope header codec.
//!
//! File envelopes carry an optional ASCII header naming the key that
//! encrypted them:
//!
//! - `TPM_USER_<id>:` : the owner's sealed per-user key
//! - `TPM_SEALED:<name>:` : a sealed key file (legacy envelopes)
//! - no header : the global key
//!
//! The header is followed directly by the AEAD ciphertext.

use std::fmt;

use berryvault_core::UserId;

const USER_PREFIX: &[u8] = b"TPM_USER_";
const LEGACY_PREFIX: &[u8] = b"TPM_SEALED:";

/// Which key an envelope was written under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeHeader {
    /// Per-user sealed key.
    User(UserId),
    /// Legacy sealed key file.
    Legacy(String),
    /// Global key.
    Untagged,
}

impl EnvelopeHeader {
    /// Header bytes as written before the ciphertext.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            EnvelopeHeader::User(user) => format!("TPM_USER_{}:", user.0).into_bytes(),
            EnvelopeHeader::Legacy(name) => format!("TPM_SEALED:{}:", name).into_bytes(),
            EnvelopeHeader::Untagged => Vec::new(),
        }
    }
}

impl fmt::Display for EnvelopeHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvelopeHeader::User(user) => write!(f, "user:{}", user.0),
            EnvelopeHeader::Legacy(name) => write!(f, "legacy:{}", name),
            EnvelopeHeader::Untagged => f.write_str("untagged"),
        }
    }
}

/// A parsed envelope borrowing its ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope<'a> {
    pub header: EnvelopeHeader,
    pub body: &'a [u8],
}

impl<'a> Envelope<'a> {
    /// Split `data` into header and ciphertext.
    ///
    /// A tagged prefix that does not parse (missing colon, non-numeric id,
    /// non-UTF-8 name) is treated as untagged, so the whole input goes to
    /// the global-key tier.
    pub fn parse(data: &'a [u8]) -> Self {
        if let Some(rest) = data.strip_prefix(USER_PREFIX) {
            if let Some(envelope) = parse_user(rest) {
                return envelope;
            }
            tracing::debug!("malformed user envelope header");
        } else if let Some(rest) = data.strip_prefix(LEGACY_PREFIX) {
            if let Some(envelope) = parse_legacy(rest) {
                return envelope;
            }
            tracing::debug!("malformed legacy envelope header");
        }
        Envelope {
            header: EnvelopeHeader::Untagged,
            body: data,
        }
    }
}

fn parse_user(rest: &[u8]) -> Option<Envelope<'_>> {
    let colon = rest.iter().position(|&b| b == b':')?;
    let digits = &rest[..colon];
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let user = std::str::from_utf8(digits).ok()?.parse::<UserId>().ok()?;
    Some(Envelope {
        header: EnvelopeHeader::User(user),
        body: &rest[colon + 1..],
    })
}

fn parse_legacy(rest: &[u8]) -> Option<Envelope<'_>> {
    let colon = rest.iter().position(|&b| b == b':')?;
    let name = std::str::from_utf8(&rest[..colon]).ok()?;
    if name.is_empty() {
        return None;
    }
    Some(Envelope {
        header: EnvelopeHeader::Legacy(name.to_string()),
        body: &rest[colon + 1..],
    })
}

/// Prefix `body` with the header bytes.
pub fn encode_envelope(header: &EnvelopeHeader, body: &[u8]) -> Vec<u8> {
    let mut out = header.to_bytes();
    out.extend_from_slice(body);
    out
}
