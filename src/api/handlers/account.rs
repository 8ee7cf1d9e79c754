//! Account administration handlers. Every route requires the
//! administrator role.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};

use crate::api::caller::require_admin;
use crate::api::dto::{AccountListParams, CreateAccountRequest, UpdateAccountStatusRequest};
use crate::app_state::AppState;
use crate::domain::{Account, Caller};
use crate::error::{ErrorResponse, GatewayError};

/// `POST /accounts`: Admit an account to the pool.
///
/// # Errors
///
/// Returns [`GatewayError`] on a duplicate ID or provisioning failure.
#[utoipa::path(
    post,
    path = "/accounts",
    tag = "Accounts",
    summary = "Add an account to the pool",
    description = "Records the account as NotReady, provisions the principal role, and queues a reset when a reset destination is configured.",
    request_body = CreateAccountRequest,
    responses(
        (status = 201, description = "Account admitted", body = Account),
        (status = 401, description = "Caller is not an administrator", body = ErrorResponse),
        (status = 409, description = "Account already exists", body = ErrorResponse),
        (status = 500, description = "Principal role provisioning failed", body = ErrorResponse),
    )
)]
pub async fn create_account(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<CreateAccountRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    require_admin(&caller)?;
    let account = state.accounts.create(&req.id, &req.admin_role_arn).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

/// `GET /accounts`: List accounts.
///
/// # Errors
///
/// Returns [`GatewayError`] on store failure.
#[utoipa::path(
    get,
    path = "/accounts",
    tag = "Accounts",
    summary = "List accounts",
    params(AccountListParams),
    responses(
        (status = 200, description = "Accounts ordered by ID", body = Vec<Account>),
        (status = 401, description = "Caller is not an administrator", body = ErrorResponse),
    )
)]
pub async fn list_accounts(
    State(state): State<AppState>,
    caller: Caller,
    Query(params): Query<AccountListParams>,
) -> Result<impl IntoResponse, GatewayError> {
    require_admin(&caller)?;
    Ok(Json(state.accounts.list(params.status).await?))
}

/// `GET /accounts/{id}`: Get one account.
///
/// # Errors
///
/// Returns [`GatewayError::NotFound`] if the account does not exist.
#[utoipa::path(
    get,
    path = "/accounts/{id}",
    tag = "Accounts",
    summary = "Get an account",
    params(
        ("id" = String, Path, description = "Cloud account ID"),
    ),
    responses(
        (status = 200, description = "Account", body = Account),
        (status = 404, description = "Account not found", body = ErrorResponse),
    )
)]
pub async fn get_account(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    require_admin(&caller)?;
    Ok(Json(state.accounts.get(&id).await?))
}

/// `PUT /accounts/{id}/status`: Conditionally change an account's status.
///
/// # Errors
///
/// Returns [`GatewayError::Conflict`] if the account is not in
/// `fromStatus`.
#[utoipa::path(
    put,
    path = "/accounts/{id}/status",
    tag = "Accounts",
    summary = "Change account status",
    description = "Moves the account from `fromStatus` to `toStatus` only if it is currently `fromStatus`. `Leased` is managed by leases and rejected here.",
    params(
        ("id" = String, Path, description = "Cloud account ID"),
    ),
    request_body = UpdateAccountStatusRequest,
    responses(
        (status = 200, description = "Account updated", body = Account),
        (status = 400, description = "Status is managed by leases", body = ErrorResponse),
        (status = 404, description = "Account not found", body = ErrorResponse),
        (status = 409, description = "Account is not in fromStatus", body = ErrorResponse),
    )
)]
pub async fn update_account_status(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    Json(req): Json<UpdateAccountStatusRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    require_admin(&caller)?;
    let account = state
        .accounts
        .transition_status(&id, req.from_status, req.to_status)
        .await?;
    Ok(Json(account))
}

/// `DELETE /accounts/{id}`: Remove an account from the pool.
///
/// # Errors
///
/// Returns [`GatewayError::Conflict`] while the account is leased.
#[utoipa::path(
    delete,
    path = "/accounts/{id}",
    tag = "Accounts",
    summary = "Delete an account",
    params(
        ("id" = String, Path, description = "Cloud account ID"),
    ),
    responses(
        (status = 204, description = "Account deleted"),
        (status = 404, description = "Account not found", body = ErrorResponse),
        (status = 409, description = "Account is leased", body = ErrorResponse),
    )
)]
pub async fn delete_account(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    require_admin(&caller)?;
    state.accounts.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Account routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/accounts", post(create_account).get(list_accounts))
        .route("/accounts/{id}", get(get_account).delete(delete_account))
        .route("/accounts/{id}/status", put(update_account_status))
}
