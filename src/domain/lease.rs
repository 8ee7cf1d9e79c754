//! Leases: time- and budget-bounded grants of one account to one principal.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::LeaseId;

/// Lease status. `Inactive` is terminal for a lease record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum LeaseStatus {
    /// The principal currently holds the account.
    Active,
    /// The lease has ended.
    Inactive,
}

impl LeaseStatus {
    /// Returns the wire name of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Inactive => "Inactive",
        }
    }
}

impl fmt::Display for LeaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Active" => Ok(Self::Active),
            "Inactive" => Ok(Self::Inactive),
            other => Err(format!("invalid lease status: {other}")),
        }
    }
}

/// Why a lease is in its current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum LeaseStatusReason {
    /// The lease is active.
    Active,
    /// The lease passed its expiry time.
    Expired,
    /// Lease spend reached the lease budget.
    OverBudget,
    /// Principal spend reached the principal budget ceiling.
    OverPrincipalBudget,
    /// Ended on request.
    Destroyed,
    /// Creation was rolled back.
    Rollback,
}

impl LeaseStatusReason {
    const ALL: [Self; 6] = [
        Self::Active,
        Self::Expired,
        Self::OverBudget,
        Self::OverPrincipalBudget,
        Self::Destroyed,
        Self::Rollback,
    ];

    /// Returns the wire name of the reason.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Expired => "Expired",
            Self::OverBudget => "OverBudget",
            Self::OverPrincipalBudget => "OverPrincipalBudget",
            Self::Destroyed => "Destroyed",
            Self::Rollback => "Rollback",
        }
    }

    /// Returns `true` if the reason may be used to end a lease.
    #[must_use]
    pub const fn ends_lease(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl fmt::Display for LeaseStatusReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeaseStatusReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|reason| reason.as_str() == s)
            .ok_or_else(|| format!("invalid lease status reason: {s}"))
    }
}

/// A grant of one account to one principal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    /// Lease identifier.
    #[schema(value_type = uuid::Uuid)]
    pub id: LeaseId,
    /// Principal holding the lease.
    pub principal_id: String,
    /// Leased account.
    pub account_id: String,
    /// Current status.
    pub lease_status: LeaseStatus,
    /// Reason for the current status.
    pub lease_status_reason: LeaseStatusReason,
    /// Spend limit for this lease.
    pub budget_amount: f64,
    /// Currency of `budget_amount`.
    pub budget_currency: String,
    /// Recipients of budget notifications.
    #[serde(default)]
    pub budget_notification_emails: Vec<String>,
    /// Expiry time (epoch seconds).
    #[serde(with = "chrono::serde::ts_seconds")]
    #[schema(value_type = i64)]
    pub expires_on: DateTime<Utc>,
    /// Creation time (epoch seconds).
    #[serde(with = "chrono::serde::ts_seconds")]
    #[schema(value_type = i64)]
    pub created_on: DateTime<Utc>,
    /// Last modification time (epoch seconds).
    #[serde(with = "chrono::serde::ts_seconds")]
    #[schema(value_type = i64)]
    pub last_modified_on: DateTime<Utc>,
    /// Time of the last status change (epoch seconds).
    #[serde(with = "chrono::serde::ts_seconds")]
    #[schema(value_type = i64)]
    pub lease_status_modified_on: DateTime<Utc>,
}

/// Budget attached to a new lease.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaseBudget {
    /// Spend limit.
    pub amount: f64,
    /// Currency code.
    pub currency: String,
    /// Notification recipients.
    pub notification_emails: Vec<String>,
}

impl Lease {
    /// Creates a new `Active` lease.
    #[must_use]
    pub fn activate(
        principal_id: String,
        account_id: String,
        budget: LeaseBudget,
        expires_on: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: LeaseId::new(),
            principal_id,
            account_id,
            lease_status: LeaseStatus::Active,
            lease_status_reason: LeaseStatusReason::Active,
            budget_amount: budget.amount,
            budget_currency: budget.currency,
            budget_notification_emails: budget.notification_emails,
            expires_on,
            created_on: now,
            last_modified_on: now,
            lease_status_modified_on: now,
        }
    }

    /// Returns `true` if the lease is `Active`.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.lease_status == LeaseStatus::Active
    }

    /// Returns an `Inactive` copy of this lease carrying `reason`.
    #[must_use]
    pub fn ended(&self, reason: LeaseStatusReason) -> Self {
        let now = Utc::now();
        Self {
            lease_status: LeaseStatus::Inactive,
            lease_status_reason: reason,
            last_modified_on: now,
            lease_status_modified_on: now,
            ..self.clone()
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn budget() -> LeaseBudget {
        LeaseBudget {
            amount: 300.0,
            currency: "USD".into(),
            notification_emails: vec!["p1@example.com".into()],
        }
    }

    #[test]
    fn activate_sets_active_status_and_reason() {
        let lease = Lease::activate("p1".into(), "a1".into(), budget(), Utc::now() + Duration::days(3));
        assert!(lease.is_active());
        assert_eq!(lease.lease_status_reason, LeaseStatusReason::Active);
    }

    #[test]
    fn ended_keeps_identity_and_records_reason() {
        let lease = Lease::activate("p1".into(), "a1".into(), budget(), Utc::now() + Duration::days(3));
        let ended = lease.ended(LeaseStatusReason::OverBudget);
        assert_eq!(ended.id, lease.id);
        assert_eq!(ended.lease_status, LeaseStatus::Inactive);
        assert_eq!(ended.lease_status_reason, LeaseStatusReason::OverBudget);
        assert_eq!(ended.created_on, lease.created_on);
    }

    #[test]
    fn reason_parsing_rejects_unknown_values() {
        assert_eq!("OverPrincipalBudget".parse(), Ok(LeaseStatusReason::OverPrincipalBudget));
        assert!("Cancelled".parse::<LeaseStatusReason>().is_err());
        assert!(!LeaseStatusReason::Active.ends_lease());
        assert!(LeaseStatusReason::Expired.ends_lease());
    }

    #[test]
    fn serializes_with_lease_prefixed_status_fields() {
        let lease = Lease::activate("p1".into(), "a1".into(), budget(), Utc::now() + Duration::days(3));
        let Ok(json) = serde_json::to_value(&lease) else {
            panic!("serialization failed");
        };
        assert_eq!(json["leaseStatus"], "Active");
        assert_eq!(json["leaseStatusReason"], "Active");
        assert_eq!(json["principalId"], "p1");
        assert!(json["leaseStatusModifiedOn"].is_i64());
    }
}
