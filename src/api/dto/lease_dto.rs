//! Lease DTOs: creation, termination, listing, and credential vending.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::domain::{LeaseId, LeaseStatus, LeaseStatusReason};
use crate::error::GatewayError;
use crate::persistence::LeaseQuery;
use crate::service::{NewLease, VendedCredentials};

/// Request body for `POST /leases`.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateLeaseRequest {
    /// Principal that will hold the lease.
    pub principal_id: String,
    /// Specific account to lease.
    #[serde(default)]
    pub account_id: Option<String>,
    /// Spend limit.
    pub budget_amount: f64,
    /// Budget currency; the configured default when omitted.
    #[serde(default)]
    pub budget_currency: Option<String>,
    /// Budget notification recipients.
    #[serde(default)]
    pub budget_notification_emails: Vec<String>,
    /// Requested expiry (epoch seconds).
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    #[schema(value_type = Option<i64>)]
    pub expires_on: Option<DateTime<Utc>>,
}

impl From<CreateLeaseRequest> for NewLease {
    fn from(req: CreateLeaseRequest) -> Self {
        Self {
            principal_id: req.principal_id,
            account_id: req.account_id.filter(|id| !id.is_empty()),
            budget_amount: req.budget_amount,
            budget_currency: req.budget_currency.filter(|c| !c.is_empty()),
            budget_notification_emails: req.budget_notification_emails,
            expires_on: req.expires_on,
        }
    }
}

/// Request body for `DELETE /leases`.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EndLeaseRequest {
    /// Principal holding the lease.
    pub principal_id: String,
    /// Leased account.
    pub account_id: String,
    /// Termination reason; `Destroyed` when omitted.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Optional request body for `DELETE /leases/{id}`.
#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EndLeaseByIdRequest {
    /// Termination reason; `Destroyed` when omitted.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Parses a termination reason, defaulting to `Destroyed`.
///
/// # Errors
///
/// Returns [`GatewayError::ClientError`] for unknown reasons.
pub fn parse_reason(raw: Option<&str>) -> Result<LeaseStatusReason, GatewayError> {
    match raw.map(str::trim).filter(|r| !r.is_empty()) {
        None => Ok(LeaseStatusReason::Destroyed),
        Some(reason) => reason.parse().map_err(|_| {
            GatewayError::ClientError(format!("Invalid lease status reason: {reason}"))
        }),
    }
}

/// Query parameters for `GET /leases`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct LeaseListParams {
    /// Only leases held by this principal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal_id: Option<String>,
    /// Only leases of this account.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    /// Only leases in this status (`Active` or `Inactive`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Cursor returned in the previous page's `Link` header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_lease_id: Option<String>,
    /// Page size.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl LeaseListParams {
    /// Converts the parameters into a store query.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::ClientError`] if the status or cursor is
    /// malformed.
    pub fn to_query(&self) -> Result<LeaseQuery, GatewayError> {
        let status = self
            .status
            .as_deref()
            .map(str::parse::<LeaseStatus>)
            .transpose()
            .map_err(GatewayError::ClientError)?;
        let after = self
            .next_lease_id
            .as_deref()
            .map(str::parse::<LeaseId>)
            .transpose()
            .map_err(|e| GatewayError::ClientError(format!("Invalid nextLeaseId: {e}")))?;

        let defaults = LeaseQuery::default();
        Ok(LeaseQuery {
            principal_id: self.principal_id.clone(),
            account_id: self.account_id.clone(),
            status,
            after,
            limit: self.limit.unwrap_or(defaults.limit),
        }
        .clamped())
    }

    /// Builds the `Link` header value pointing at the page after `next`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Internal`] if the query cannot be encoded.
    pub fn next_link(&self, next: LeaseId) -> Result<String, GatewayError> {
        let params = Self {
            next_lease_id: Some(next.to_string()),
            ..self.clone()
        };
        let query = serde_urlencoded::to_string(&params)
            .map_err(|e| GatewayError::internal("Failed to build pagination link", e))?;
        Ok(format!("</leases?{query}>; rel=\"next\""))
    }
}

/// Optional request body for the credential endpoints.
#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LeaseAuthRequest {
    /// Requested session length; clamped to the configured ceiling.
    #[serde(default)]
    pub duration_seconds: Option<u64>,
}

/// Response body of the credential endpoints (201 Created).
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LeaseAuthResponse {
    /// Access key ID.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
    /// Session token.
    pub session_token: String,
    /// Federated console sign-in URL.
    pub console_url: String,
    /// Credential expiry (epoch seconds).
    pub expires_on: i64,
}

impl From<VendedCredentials> for LeaseAuthResponse {
    fn from(vended: VendedCredentials) -> Self {
        Self {
            access_key_id: vended.credentials.access_key_id,
            secret_access_key: vended.credentials.secret_access_key,
            session_token: vended.credentials.session_token,
            console_url: vended.console_url,
            expires_on: vended.credentials.expiration.timestamp(),
        }
    }
}
