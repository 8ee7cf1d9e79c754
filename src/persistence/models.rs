//! Database row models for accounts and leases.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{Account, Lease, LeaseId};
use crate::error::GatewayError;

/// A row of the `accounts` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AccountRow {
    /// Cloud account ID.
    pub id: String,
    /// Status wire name.
    pub account_status: String,
    /// Admin role ARN.
    pub admin_role_arn: String,
    /// Principal role ARN.
    pub principal_role_arn: String,
    /// Principal policy fingerprint.
    pub principal_policy_hash: Option<String>,
    /// Creation timestamp.
    pub created_on: DateTime<Utc>,
    /// Last modification timestamp.
    pub last_modified_on: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = GatewayError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        Ok(Self {
            account_status: row.account_status.parse().map_err(GatewayError::Persistence)?,
            id: row.id,
            admin_role_arn: row.admin_role_arn,
            principal_role_arn: row.principal_role_arn,
            principal_policy_hash: row.principal_policy_hash,
            created_on: row.created_on,
            last_modified_on: row.last_modified_on,
        })
    }
}

/// A row of the `leases` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LeaseRow {
    /// Lease ID.
    pub id: Uuid,
    /// Principal holding the lease.
    pub principal_id: String,
    /// Leased account.
    pub account_id: String,
    /// Status wire name.
    pub lease_status: String,
    /// Status reason wire name.
    pub lease_status_reason: String,
    /// Budget amount.
    pub budget_amount: f64,
    /// Budget currency.
    pub budget_currency: String,
    /// Notification recipients.
    pub budget_notification_emails: Vec<String>,
    /// Expiry timestamp.
    pub expires_on: DateTime<Utc>,
    /// Creation timestamp.
    pub created_on: DateTime<Utc>,
    /// Last modification timestamp.
    pub last_modified_on: DateTime<Utc>,
    /// Last status change timestamp.
    pub lease_status_modified_on: DateTime<Utc>,
}

impl TryFrom<LeaseRow> for Lease {
    type Error = GatewayError;

    fn try_from(row: LeaseRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: LeaseId::from_uuid(row.id),
            lease_status: row.lease_status.parse().map_err(GatewayError::Persistence)?,
            lease_status_reason: row
                .lease_status_reason
                .parse()
                .map_err(GatewayError::Persistence)?,
            principal_id: row.principal_id,
            account_id: row.account_id,
            budget_amount: row.budget_amount,
            budget_currency: row.budget_currency,
            budget_notification_emails: row.budget_notification_emails,
            expires_on: row.expires_on,
            created_on: row.created_on,
            last_modified_on: row.last_modified_on,
            lease_status_modified_on: row.lease_status_modified_on,
        })
    }
}
