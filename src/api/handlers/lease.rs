//! Lease handlers: create, list, read, end, and credential vending.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::dto::{
    CreateLeaseRequest, EndLeaseByIdRequest, EndLeaseRequest, LeaseAuthRequest, LeaseAuthResponse,
    LeaseListParams, optional_json, parse_reason,
};
use crate::app_state::AppState;
use crate::domain::{Caller, Lease, LeaseId};
use crate::error::{ErrorResponse, GatewayError};

/// `POST /leases`: Create a lease.
///
/// # Errors
///
/// Returns [`GatewayError`] on validation failure, an existing lease, or
/// an empty pool.
#[utoipa::path(
    post,
    path = "/leases",
    tag = "Leases",
    summary = "Create a lease",
    description = "Leases a Ready account to the principal. Non-administrators may only request leases for themselves.",
    request_body = CreateLeaseRequest,
    responses(
        (status = 201, description = "Lease created", body = Lease),
        (status = 400, description = "Invalid budget or expiry", body = ErrorResponse),
        (status = 409, description = "Principal already holds an active lease", body = ErrorResponse),
        (status = 503, description = "No Ready account", body = ErrorResponse),
    )
)]
pub async fn create_lease(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<CreateLeaseRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let lease = state.leases.create(&caller, req.into()).await?;
    Ok((StatusCode::CREATED, Json(lease)))
}

/// `GET /leases`: List leases with cursor pagination.
///
/// # Errors
///
/// Returns [`GatewayError`] on malformed filters or store failure.
#[utoipa::path(
    get,
    path = "/leases",
    tag = "Leases",
    summary = "List leases",
    description = "Returns one page of leases ordered by ID. A `Link` header with `rel=\"next\"` points at the following page and is omitted on the last page.",
    params(LeaseListParams),
    responses(
        (status = 200, description = "Page of leases", body = Vec<Lease>),
        (status = 400, description = "Malformed filter", body = ErrorResponse),
    )
)]
pub async fn list_leases(
    State(state): State<AppState>,
    caller: Caller,
    Query(params): Query<LeaseListParams>,
) -> Result<impl IntoResponse, GatewayError> {
    let page = state.leases.list(&caller, params.to_query()?).await?;

    let mut response = Json(page.items).into_response();
    if let Some(next) = page.next {
        let link = params.next_link(next)?;
        let value = HeaderValue::from_str(&link)
            .map_err(|e| GatewayError::internal("Failed to build pagination link", e))?;
        response.headers_mut().insert(header::LINK, value);
    }
    Ok(response)
}

/// `DELETE /leases`: End the active lease of a principal/account pair.
///
/// # Errors
///
/// Returns [`GatewayError`] if the pair has no active lease.
#[utoipa::path(
    delete,
    path = "/leases",
    tag = "Leases",
    summary = "End a lease by principal and account",
    request_body = EndLeaseRequest,
    responses(
        (status = 200, description = "Lease ended", body = Lease),
        (status = 400, description = "No active lease for the pair", body = ErrorResponse),
        (status = 401, description = "Caller may not end this lease", body = ErrorResponse),
    )
)]
pub async fn end_lease(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<EndLeaseRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let reason = parse_reason(req.reason.as_deref())?;
    let lease = state
        .leases
        .end_pair(&caller, &req.principal_id, &req.account_id, reason)
        .await?;
    Ok(Json(lease))
}

/// `GET /leases/{id}`: Get one lease.
///
/// # Errors
///
/// Returns [`GatewayError::NotFound`] if the lease does not exist.
#[utoipa::path(
    get,
    path = "/leases/{id}",
    tag = "Leases",
    summary = "Get a lease",
    params(
        ("id" = uuid::Uuid, Path, description = "Lease UUID"),
    ),
    responses(
        (status = 200, description = "Lease", body = Lease),
        (status = 401, description = "Caller may not read this lease", body = ErrorResponse),
        (status = 404, description = "Lease not found", body = ErrorResponse),
    )
)]
pub async fn get_lease(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<uuid::Uuid>,
) -> Result<impl IntoResponse, GatewayError> {
    let lease = state.leases.get(&caller, LeaseId::from_uuid(id)).await?;
    Ok(Json(lease))
}

/// `DELETE /leases/{id}`: End a lease by ID.
///
/// # Errors
///
/// Returns [`GatewayError::NotFound`] if the lease does not exist.
#[utoipa::path(
    delete,
    path = "/leases/{id}",
    tag = "Leases",
    summary = "End a lease by ID",
    description = "Ends the lease with the given reason (default `Destroyed`). Ending an inactive lease returns it unchanged.",
    params(
        ("id" = uuid::Uuid, Path, description = "Lease UUID"),
    ),
    request_body(content = EndLeaseByIdRequest, description = "Optional termination reason"),
    responses(
        (status = 200, description = "Lease ended", body = Lease),
        (status = 400, description = "Invalid reason", body = ErrorResponse),
        (status = 404, description = "Lease not found", body = ErrorResponse),
    )
)]
pub async fn end_lease_by_id(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<uuid::Uuid>,
    body: Bytes,
) -> Result<impl IntoResponse, GatewayError> {
    let req: EndLeaseByIdRequest = optional_json(&body)?;
    let reason = parse_reason(req.reason.as_deref())?;
    let lease = state
        .leases
        .end_for(&caller, LeaseId::from_uuid(id), reason)
        .await?;
    Ok(Json(lease))
}

/// `POST /leases/auth`: Credentials for the caller's own active lease.
///
/// # Errors
///
/// Returns [`GatewayError`] if no lease resolves or the caller is not
/// authorized.
#[utoipa::path(
    post,
    path = "/leases/auth",
    tag = "Leases",
    summary = "Vend credentials for the caller's lease",
    request_body(content = LeaseAuthRequest, description = "Optional session duration"),
    responses(
        (status = 201, description = "Credentials issued", body = LeaseAuthResponse),
        (status = 401, description = "Lease is not active", body = ErrorResponse),
        (status = 404, description = "Caller has no active lease", body = ErrorResponse),
    )
)]
pub async fn authorize_own_lease(
    State(state): State<AppState>,
    caller: Caller,
    body: Bytes,
) -> Result<impl IntoResponse, GatewayError> {
    let req: LeaseAuthRequest = optional_json(&body)?;
    let vended = state
        .credentials
        .authorize(&caller, None, req.duration_seconds)
        .await?;
    Ok((StatusCode::CREATED, Json(LeaseAuthResponse::from(vended))))
}

/// `POST /leases/{id}/auth`: Credentials for a specific lease.
///
/// # Errors
///
/// Returns [`GatewayError`] if the lease does not exist, is not active,
/// or belongs to someone else.
#[utoipa::path(
    post,
    path = "/leases/{id}/auth",
    tag = "Leases",
    summary = "Vend credentials for a lease",
    params(
        ("id" = uuid::Uuid, Path, description = "Lease UUID"),
    ),
    request_body(content = LeaseAuthRequest, description = "Optional session duration"),
    responses(
        (status = 201, description = "Credentials issued", body = LeaseAuthResponse),
        (status = 401, description = "Lease is not active or not the caller's", body = ErrorResponse),
        (status = 404, description = "Lease not found", body = ErrorResponse),
    )
)]
pub async fn authorize_lease(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<uuid::Uuid>,
    body: Bytes,
) -> Result<impl IntoResponse, GatewayError> {
    let req: LeaseAuthRequest = optional_json(&body)?;
    let vended = state
        .credentials
        .authorize(&caller, Some(LeaseId::from_uuid(id)), req.duration_seconds)
        .await?;
    Ok((StatusCode::CREATED, Json(LeaseAuthResponse::from(vended))))
}

/// Lease routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/leases",
            post(create_lease).get(list_leases).delete(end_lease),
        )
        .route("/leases/auth", post(authorize_own_lease))
        .route("/leases/{id}", get(get_lease).delete(end_lease_by_id))
        .route("/leases/{id}/auth", post(authorize_lease))
}
