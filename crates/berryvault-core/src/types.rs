//! Strong identifier types for BerryVault.
//!
//! All identifiers are newtypes over the store's integer keys to prevent
//! passing a folder id where a secret id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Create from the raw integer key.
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// Get the raw integer key.
            pub const fn get(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse().map(Self)
            }
        }
    };
}

id_type!(
    /// Identifier of a vault user.
    UserId,
    "UserId"
);

id_type!(
    /// Identifier of a folder.
    FolderId,
    "FolderId"
);

id_type!(
    /// Identifier of a secret.
    SecretId,
    "SecretId"
);

/// Which id sequence to allocate from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdKind {
    Folder,
    Secret,
}

impl IdKind {
    /// Stable name used as the sequence key in storage.
    pub const fn as_str(&self) -> &'static str {
        match self {
            IdKind::Folder => "folder",
            IdKind::Secret => "secret",
        }
    }
}

/// Get current time in milliseconds.
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display_and_parse() {
        let id = UserId::new(7);
        assert_eq!(id.to_string(), "7");
        assert_eq!("7".parse::<UserId>().unwrap(), id);
        assert!("seven".parse::<UserId>().is_err());
    }

    #[test]
    fn test_id_debug() {
        let id = FolderId::new(42);
        assert_eq!(format!("{:?}", id), "FolderId(42)");
    }

    #[test]
    fn test_id_serde_transparent() {
        let json = serde_json::to_string(&SecretId::new(9)).unwrap();
        assert_eq!(json, "9");
    }
}
