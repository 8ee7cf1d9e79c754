//! OpenAPI document for the REST surface.

use utoipa::OpenApi;

use crate::api::dto;
use crate::api::handlers;
use crate::domain;
use crate::error;

/// OpenAPI description of every REST endpoint.
#[derive(Debug, OpenApi)]
#[openapi(
    info(title = "lease-gateway", description = "Sandbox account leasing with budget enforcement and credential vending"),
    paths(
        handlers::lease::create_lease,
        handlers::lease::list_leases,
        handlers::lease::end_lease,
        handlers::lease::get_lease,
        handlers::lease::end_lease_by_id,
        handlers::lease::authorize_own_lease,
        handlers::lease::authorize_lease,
        handlers::account::create_account,
        handlers::account::list_accounts,
        handlers::account::get_account,
        handlers::account::update_account_status,
        handlers::account::delete_account,
        handlers::feed::apply_usage_changes,
        handlers::feed::apply_account_event,
        handlers::feed::account_metrics,
        handlers::system::health_handler,
    ),
    components(
        schemas(
            domain::Lease,
            domain::LeaseStatus,
            domain::LeaseStatusReason,
            domain::Account,
            domain::AccountStatus,
            domain::ChangeRecord,
            domain::ChangeKind,
            domain::UsageImage,
            dto::CreateLeaseRequest,
            dto::EndLeaseRequest,
            dto::EndLeaseByIdRequest,
            dto::LeaseAuthRequest,
            dto::LeaseAuthResponse,
            dto::CreateAccountRequest,
            dto::UpdateAccountStatusRequest,
            dto::UsageBatchRequest,
            dto::UsageBatchResponse,
            dto::TopicEnvelope,
            dto::AppliedIncrements,
            dto::PoolMetricsResponse,
            handlers::system::HealthResponse,
            error::ErrorResponse,
            error::ErrorBody,
        )
    ),
    tags(
        (name = "Leases", description = "Lease lifecycle and credential vending"),
        (name = "Accounts", description = "Account pool administration"),
        (name = "Feeds", description = "Usage change feed, account events, and pool counters"),
        (name = "System", description = "Service health"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_lease_routes() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/leases"));
        assert!(doc.paths.paths.contains_key("/leases/{id}/auth"));
        assert!(doc.paths.paths.contains_key("/metrics/accounts"));
    }
}
