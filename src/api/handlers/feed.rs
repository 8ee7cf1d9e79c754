//! Ingestion endpoints for the usage change feed and account topic
//! deliveries, plus the pool counter read-out. All require the
//! administrator role.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::caller::require_admin;
use crate::api::dto::{
    AppliedIncrements, PoolMetricsResponse, TopicEnvelope, UsageBatchRequest, UsageBatchResponse,
};
use crate::app_state::AppState;
use crate::domain::Caller;
use crate::error::{ErrorResponse, GatewayError};

/// `POST /usage/changes`: Apply a usage change-feed batch.
///
/// # Errors
///
/// Returns [`GatewayError::Multi`] if any record failed; the host should
/// redeliver the batch.
#[utoipa::path(
    post,
    path = "/usage/changes",
    tag = "Feeds",
    summary = "Apply usage change records",
    description = "Ends leases whose lease summary reaches its budget and every active lease of a principal whose summary reaches the principal ceiling. Failing records do not stop the batch.",
    request_body = UsageBatchRequest,
    responses(
        (status = 200, description = "Batch handled", body = UsageBatchResponse),
        (status = 500, description = "At least one record failed", body = ErrorResponse),
    )
)]
pub async fn apply_usage_changes(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<UsageBatchRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    require_admin(&caller)?;
    let processed = state.budget.handle_batch(&req.records).await?;
    Ok(Json(UsageBatchResponse { processed }))
}

/// `POST /events/account`: Apply one account lifecycle event to the pool
/// counters.
///
/// # Errors
///
/// Returns [`GatewayError::ClientError`] for unknown topics or payloads.
#[utoipa::path(
    post,
    path = "/events/account",
    tag = "Feeds",
    summary = "Apply an account event",
    request_body = TopicEnvelope,
    responses(
        (status = 200, description = "Counters adjusted", body = AppliedIncrements),
        (status = 400, description = "Unknown topic or malformed event", body = ErrorResponse),
    )
)]
pub async fn apply_account_event(
    State(state): State<AppState>,
    caller: Caller,
    Json(envelope): Json<TopicEnvelope>,
) -> Result<impl IntoResponse, GatewayError> {
    require_admin(&caller)?;
    let applied = state
        .metrics
        .handle_message(&envelope.topic_arn, &envelope.message)
        .await?;
    Ok(Json(AppliedIncrements::from(applied)))
}

/// `GET /metrics/accounts`: Current pool counters.
///
/// # Errors
///
/// Returns [`GatewayError`] on store failure.
#[utoipa::path(
    get,
    path = "/metrics/accounts",
    tag = "Feeds",
    summary = "Pool counters",
    responses(
        (status = 200, description = "Counter values", body = PoolMetricsResponse),
    )
)]
pub async fn account_metrics(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<impl IntoResponse, GatewayError> {
    require_admin(&caller)?;
    let snapshot = state.metrics.current().await?;
    Ok(Json(PoolMetricsResponse::from(snapshot)))
}

/// Feed and metrics routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/usage/changes", post(apply_usage_changes))
        .route("/events/account", post(apply_account_event))
        .route("/metrics/accounts", get(account_metrics))
}
