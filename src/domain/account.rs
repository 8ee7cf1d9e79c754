//! Leasable cloud accounts and their status lifecycle.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Status of an account in the pool.
///
/// ```text
/// NotReady ──provisioned──▶ Ready ──lease created──▶ Leased
///    │                        ▲                        │
///    │                        └──── lease ended ───────┘
///    └──provisioning failed──▶ Orphaned
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub enum AccountStatus {
    /// No status has been assigned.
    None,
    /// Provisioned and available for a new lease.
    Ready,
    /// Awaiting provisioning or reset.
    NotReady,
    /// Referenced by exactly one active lease.
    Leased,
    /// Provisioning failed; needs operator attention.
    Orphaned,
}

impl AccountStatus {
    /// Every status, in a stable order.
    pub const ALL: [Self; 5] = [
        Self::None,
        Self::Ready,
        Self::NotReady,
        Self::Leased,
        Self::Orphaned,
    ];

    /// Returns the wire name of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Ready => "Ready",
            Self::NotReady => "NotReady",
            Self::Leased => "Leased",
            Self::Orphaned => "Orphaned",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("invalid account status: {s}"))
    }
}

/// A leasable cloud account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Cloud account ID.
    pub id: String,
    /// Current pool status.
    pub account_status: AccountStatus,
    /// Role the service assumes to administer the account.
    pub admin_role_arn: String,
    /// Role principals assume when logging in to the account.
    pub principal_role_arn: String,
    /// Fingerprint of the policy attached to the principal role.
    #[serde(default)]
    pub principal_policy_hash: Option<String>,
    /// Creation time (epoch seconds).
    #[serde(with = "chrono::serde::ts_seconds")]
    #[schema(value_type = i64)]
    pub created_on: DateTime<Utc>,
    /// Last modification time (epoch seconds).
    #[serde(with = "chrono::serde::ts_seconds")]
    #[schema(value_type = i64)]
    pub last_modified_on: DateTime<Utc>,
}

impl Account {
    /// Creates a newly admitted account in [`AccountStatus::NotReady`].
    #[must_use]
    pub fn admit(id: String, admin_role_arn: String, principal_role_arn: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            account_status: AccountStatus::NotReady,
            admin_role_arn,
            principal_role_arn,
            principal_policy_hash: None,
            created_on: now,
            last_modified_on: now,
        }
    }

    /// Returns a copy moved to `status` with a fresh modification time.
    #[must_use]
    pub fn with_status(&self, status: AccountStatus) -> Self {
        Self {
            account_status: status,
            last_modified_on: Utc::now(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_every_wire_name() {
        for status in AccountStatus::ALL {
            assert_eq!(status.as_str().parse::<AccountStatus>(), Ok(status));
        }
        assert!("Active".parse::<AccountStatus>().is_err());
    }

    #[test]
    fn admitted_account_starts_not_ready() {
        let account = Account::admit(
            "123456789012".into(),
            "arn:aws:iam::123456789012:role/Admin".into(),
            "arn:aws:iam::123456789012:role/DCEPrincipal".into(),
        );
        assert_eq!(account.account_status, AccountStatus::NotReady);
        assert!(account.principal_policy_hash.is_none());
    }

    #[test]
    fn serializes_camel_case_with_epoch_seconds() {
        let account = Account::admit("1".into(), "admin".into(), "principal".into());
        let Ok(json) = serde_json::to_value(&account) else {
            panic!("serialization failed");
        };
        assert_eq!(json["accountStatus"], "NotReady");
        assert!(json["createdOn"].is_i64());
        assert_eq!(json["adminRoleArn"], "admin");
    }
}
