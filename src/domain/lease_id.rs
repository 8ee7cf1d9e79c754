//! Type-safe lease identifier.
//!
//! [`LeaseId`] is a newtype wrapper around [`uuid::Uuid`] (v4) so that lease
//! identifiers cannot be confused with account or principal IDs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Unique identifier for a lease.
///
/// Generated once when the lease record is created. Ending a lease never
/// reuses its ID; a new request always produces a new `LeaseId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaseId(uuid::Uuid);

impl LeaseId {
    /// Creates a new random `LeaseId` (UUID v4).
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Creates a `LeaseId` from an existing [`uuid::Uuid`].
    #[must_use]
    pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner [`uuid::Uuid`].
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for LeaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LeaseId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s).map(Self)
    }
}

impl From<uuid::Uuid> for LeaseId {
    fn from(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }
}

impl From<LeaseId> for uuid::Uuid {
    fn from(id: LeaseId) -> Self {
        id.0
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn new_generates_unique_ids() {
        assert_ne!(LeaseId::new(), LeaseId::new());
    }

    #[test]
    fn parses_display_output() {
        let id = LeaseId::new();
        let Ok(parsed) = id.to_string().parse::<LeaseId>() else {
            panic!("display output should parse");
        };
        assert_eq!(parsed, id);
    }

    #[test]
    fn rejects_non_uuid() {
        assert!("lease-1".parse::<LeaseId>().is_err());
    }

    #[test]
    fn ordering_follows_uuid_ordering() {
        let a = LeaseId::from_uuid(uuid::Uuid::from_u128(1));
        let b = LeaseId::from_uuid(uuid::Uuid::from_u128(2));
        assert!(a < b);
    }
}
