//! Usage summaries delivered by the usage aggregator's change feed.
//!
//! The aggregator stores two summary shapes in one table, told apart by
//! the sort-key prefix:
//!
//! - `Usage-Lease-Summary-<leaseID>`: rolling spend for one lease.
//! - `Usage-Principal-<principalID>-<periodStart>`: rolling spend for one
//!   principal over the current budget period.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::GatewayError;

/// Sort-key prefix of lease summary records.
pub const USAGE_LEASE_SUMMARY_PREFIX: &str = "Usage-Lease-Summary-";

/// Sort-key prefix of principal summary records.
pub const USAGE_PRINCIPAL_PREFIX: &str = "Usage-Principal-";

/// Kind of change reported by the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    /// A new item was written.
    Insert,
    /// An existing item was updated.
    Modify,
    /// An item was deleted.
    Remove,
}

/// New image of a changed usage item, already decoded from the store's
/// attribute map.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UsageImage {
    /// Partition key.
    #[serde(rename = "PK", default)]
    pub partition_key: String,
    /// Sort key; its prefix encodes the summary kind.
    #[serde(rename = "SK")]
    pub sort_key: String,
    /// Lease the spend belongs to (lease summaries).
    #[serde(default)]
    pub lease_id: Option<String>,
    /// Principal the spend belongs to.
    #[serde(default)]
    pub principal_id: Option<String>,
    /// Accumulated cost.
    #[serde(default)]
    pub cost_amount: Option<f64>,
    /// Lease budget (lease summaries).
    #[serde(default)]
    pub budget_amount: Option<f64>,
    /// Start of the summary period (epoch seconds).
    #[serde(default)]
    pub date: Option<i64>,
}

/// One record of a change-feed batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    /// Change kind.
    pub event_name: ChangeKind,
    /// Image after the change; absent for removals.
    #[serde(default)]
    pub new_image: Option<UsageImage>,
}

/// Rolling spend for a single lease.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaseUsageSummary {
    /// Lease ID as stored by the aggregator.
    pub lease_id: String,
    /// Principal owning the lease, when recorded.
    pub principal_id: Option<String>,
    /// Accumulated cost.
    pub cost_amount: f64,
    /// Lease budget.
    pub budget_amount: f64,
}

impl LeaseUsageSummary {
    /// Spend at or above the budget is over budget.
    #[must_use]
    pub fn is_over_budget(&self) -> bool {
        self.cost_amount >= self.budget_amount
    }
}

/// Rolling spend for a principal over one budget period.
#[derive(Debug, Clone, PartialEq)]
pub struct PrincipalUsageSummary {
    /// Principal ID.
    pub principal_id: String,
    /// Accumulated cost in the period.
    pub cost_amount: f64,
    /// Start of the period, when recorded.
    pub period_start: Option<DateTime<Utc>>,
}

impl PrincipalUsageSummary {
    /// Spend at or above `ceiling` is over budget.
    #[must_use]
    pub fn is_over_budget(&self, ceiling: f64) -> bool {
        self.cost_amount >= ceiling
    }
}

/// A usage image classified by its sort key.
#[derive(Debug, Clone, PartialEq)]
pub enum UsageSummary {
    /// Lease-scoped summary.
    Lease(LeaseUsageSummary),
    /// Principal-scoped summary.
    Principal(PrincipalUsageSummary),
}

/// Summary kind encoded in a sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryKind {
    /// `Usage-Lease-Summary-<leaseID>`
    Lease,
    /// `Usage-Principal-<principalID>-<periodStart>`
    Principal,
}

/// Classifies a sort key by prefix. The remainder must be non-empty; the
/// principal itself is read from the image, so principal IDs may contain
/// any character. Unmatched keys (daily lease rows, other tables) return
/// `None`.
#[must_use]
pub fn classify_sort_key(sort_key: &str) -> Option<SummaryKind> {
    let has_suffix = |prefix: &str| {
        sort_key
            .strip_prefix(prefix)
            .is_some_and(|rest| !rest.trim().is_empty())
    };
    if has_suffix(USAGE_LEASE_SUMMARY_PREFIX) {
        Some(SummaryKind::Lease)
    } else if has_suffix(USAGE_PRINCIPAL_PREFIX) {
        Some(SummaryKind::Principal)
    } else {
        None
    }
}

impl UsageImage {
    /// Converts the image into a typed summary.
    ///
    /// Returns `Ok(None)` for images whose sort key matches neither
    /// summary kind.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Internal`] when a matched image lacks a
    /// field its summary kind requires.
    pub fn summary(&self) -> Result<Option<UsageSummary>, GatewayError> {
        let Some(kind) = classify_sort_key(&self.sort_key) else {
            return Ok(None);
        };
        let summary = match kind {
            SummaryKind::Lease => UsageSummary::Lease(LeaseUsageSummary {
                lease_id: self.required(self.lease_id.clone(), "leaseId")?,
                principal_id: self.principal_id.clone(),
                cost_amount: self.required(self.cost_amount, "costAmount")?,
                budget_amount: self.required(self.budget_amount, "budgetAmount")?,
            }),
            SummaryKind::Principal => UsageSummary::Principal(PrincipalUsageSummary {
                principal_id: self.required(self.principal_id.clone(), "principalId")?,
                cost_amount: self.required(self.cost_amount, "costAmount")?,
                period_start: self
                    .date
                    .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
            }),
        };
        Ok(Some(summary))
    }

    fn required<T>(&self, value: Option<T>, field: &str) -> Result<T, GatewayError> {
        value.ok_or_else(|| {
            GatewayError::internal(
                "Failed to unmarshal stream image",
                format!("{} is missing {field}", self.sort_key),
            )
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn lease_image(cost: f64, budget: f64) -> UsageImage {
        UsageImage {
            partition_key: "Usage-Lease-1".into(),
            sort_key: "Usage-Lease-Summary-6a0c4c8e-40ad-4e39-a0b4-4a4a3f5b1c7d".into(),
            lease_id: Some("6a0c4c8e-40ad-4e39-a0b4-4a4a3f5b1c7d".into()),
            principal_id: Some("p1".into()),
            cost_amount: Some(cost),
            budget_amount: Some(budget),
            date: None,
        }
    }

    #[test]
    fn classifies_summary_prefixes() {
        assert_eq!(
            classify_sort_key("Usage-Lease-Summary-abc-123"),
            Some(SummaryKind::Lease)
        );
        assert_eq!(
            classify_sort_key("Usage-Principal-user_1-1700000000"),
            Some(SummaryKind::Principal)
        );
        assert_eq!(classify_sort_key("Usage-Lease-Daily-abc-1700000000"), None);
        assert_eq!(
            classify_sort_key("Usage-Principal-jane.doe@example.com-1700000000"),
            Some(SummaryKind::Principal)
        );
        assert_eq!(classify_sort_key("Usage-Lease-Summary-"), None);
        assert_eq!(classify_sort_key("Usage-Principal- "), None);
        assert_eq!(classify_sort_key("Lease-abc"), None);
    }

    #[test]
    fn lease_budget_boundary_is_inclusive() {
        let Ok(Some(UsageSummary::Lease(at))) = lease_image(300.0, 300.0).summary() else {
            panic!("expected lease summary");
        };
        assert!(at.is_over_budget());

        let Ok(Some(UsageSummary::Lease(under))) = lease_image(299.99, 300.0).summary() else {
            panic!("expected lease summary");
        };
        assert!(!under.is_over_budget());
    }

    #[test]
    fn principal_budget_uses_ceiling() {
        let image = UsageImage {
            sort_key: "Usage-Principal-p1-1700000000".into(),
            principal_id: Some("p1".into()),
            cost_amount: Some(100.0),
            date: Some(1_700_000_000),
            ..UsageImage::default()
        };
        let Ok(Some(UsageSummary::Principal(summary))) = image.summary() else {
            panic!("expected principal summary");
        };
        assert!(summary.is_over_budget(100.0));
        assert!(!summary.is_over_budget(100.01));
        assert!(summary.period_start.is_some());
    }

    #[test]
    fn matched_image_missing_fields_is_internal_error() {
        let mut image = lease_image(1.0, 2.0);
        image.budget_amount = None;
        let Err(err) = image.summary() else {
            panic!("expected error");
        };
        assert_eq!(err.public_message(), "Failed to unmarshal stream image");
    }

    #[test]
    fn unmatched_image_is_ignored() {
        let image = UsageImage {
            sort_key: "Usage-Lease-Daily-x".into(),
            ..UsageImage::default()
        };
        assert!(matches!(image.summary(), Ok(None)));
    }

    #[test]
    fn change_record_deserializes_feed_shape() {
        let json = r#"{
            "eventName": "MODIFY",
            "newImage": {"PK": "Usage-Principal-p1", "SK": "Usage-Principal-p1-1700000000",
                         "principalId": "p1", "costAmount": 12.5}
        }"#;
        let Ok(record) = serde_json::from_str::<ChangeRecord>(json) else {
            panic!("deserialization failed");
        };
        assert_eq!(record.event_name, ChangeKind::Modify);
        assert_eq!(
            record.new_image.and_then(|image| image.cost_amount),
            Some(12.5)
        );
    }
}
