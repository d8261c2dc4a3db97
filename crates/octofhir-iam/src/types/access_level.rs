//! Hierarchical access levels.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::IamError;

/// Access level, totally ordered from `None` to `Emergency`.
///
/// The derived ordering follows declaration order, so `granted >= required`
/// is the sufficiency check.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    /// No access.
    #[default]
    None,
    /// Read access.
    Read,
    /// Create and update.
    Write,
    /// Delete.
    Delete,
    /// Administrative access.
    Admin,
    /// Break-glass access.
    Emergency,
}

impl AccessLevel {
    /// All levels in ascending order.
    pub const ALL: [AccessLevel; 6] = [
        Self::None,
        Self::Read,
        Self::Write,
        Self::Delete,
        Self::Admin,
        Self::Emergency,
    ];

    /// Numeric rank of the level (`none = 0` .. `emergency = 5`).
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Read => 1,
            Self::Write => 2,
            Self::Delete => 3,
            Self::Admin => 4,
            Self::Emergency => 5,
        }
    }

    /// Returns `true` if this level is at least `required`.
    #[must_use]
    pub const fn satisfies(self, required: AccessLevel) -> bool {
        self.rank() >= required.rank()
    }

    /// Wire name of the level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::Admin => "admin",
            Self::Emergency => "emergency",
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessLevel {
    type Err = IamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "delete" => Ok(Self::Delete),
            "admin" => Ok(Self::Admin),
            "emergency" => Ok(Self::Emergency),
            other => Err(IamError::invalid_input(format!(
                "unknown access level '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_matches_rank() {
        for pair in AccessLevel::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[0].rank() < pair[1].rank());
        }
    }

    #[test]
    fn test_satisfies() {
        assert!(AccessLevel::Admin.satisfies(AccessLevel::Write));
        assert!(AccessLevel::Write.satisfies(AccessLevel::Write));
        assert!(!AccessLevel::Read.satisfies(AccessLevel::Write));
        assert!(AccessLevel::Emergency.satisfies(AccessLevel::Admin));
        assert!(AccessLevel::None.satisfies(AccessLevel::None));
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!("WRITE".parse::<AccessLevel>().unwrap(), AccessLevel::Write);
        assert_eq!(AccessLevel::Emergency.to_string(), "emergency");
        assert!("superuser".parse::<AccessLevel>().is_err());
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&AccessLevel::Delete).unwrap();
        assert_eq!(json, "\"delete\"");
        let level: AccessLevel = serde_json::from_str("\"admin\"").unwrap();
        assert_eq!(level, AccessLevel::Admin);
    }
}
