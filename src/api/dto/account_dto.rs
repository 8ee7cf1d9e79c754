//! Account administration DTOs.

use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

use crate::domain::AccountStatus;

/// Request body for `POST /accounts`.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountRequest {
    /// Cloud account ID.
    pub id: String,
    /// Role the gateway assumes to administer the account.
    pub admin_role_arn: String,
}

/// Request body for `PUT /accounts/{id}/status`.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAccountStatusRequest {
    /// Status the account must currently be in.
    pub from_status: AccountStatus,
    /// Status to move the account to.
    pub to_status: AccountStatus,
}

/// Query parameters for `GET /accounts`.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct AccountListParams {
    /// Only accounts in this status.
    pub status: Option<AccountStatus>,
}
