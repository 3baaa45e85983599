//! Sealed-key downgrade policy.

use std::fmt;
use std::str::FromStr;

/// What to do when a per-user or legacy sealed key cannot be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DowngradePolicy {
    /// Fall back to the global key and log a warning.
    #[default]
    FailOpen,
    /// Refuse: the operation fails instead of using a weaker key.
    FailClosed,
}

impl DowngradePolicy {
    pub fn allows_fallback(self) -> bool {
        matches!(self, DowngradePolicy::FailOpen)
    }
}

impl FromStr for DowngradePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail-open" | "open" => Ok(DowngradePolicy::FailOpen),
            "fail-closed" | "closed" => Ok(DowngradePolicy::FailClosed),
            other => Err(format!("unknown downgrade policy {:?}", other)),
        }
    }
}

impl fmt::Display for DowngradePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DowngradePolicy::FailOpen => "fail-open",
            DowngradePolicy::FailClosed => "fail-closed",
        })
    }
}
