//! Shared application state injected into all Axum handlers.

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;

use crate::cloud::{AccountManager, Transport};
use crate::config::GatewayConfig;
use crate::persistence::Stores;
use crate::service::{
    AccountService, BudgetEnforcer, CredentialService, EventPublisher, LeasePolicy, LeaseService,
    MetricsTopics, PoolMetrics,
};

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Lease state machine.
    pub leases: Arc<LeaseService>,
    /// Account state machine.
    pub accounts: Arc<AccountService>,
    /// Usage change-feed consumer.
    pub budget: Arc<BudgetEnforcer>,
    /// Credential vending.
    pub credentials: Arc<CredentialService>,
    /// Pool counter aggregation.
    pub metrics: Arc<PoolMetrics>,
    /// Group whose members act as administrators.
    pub admin_group_name: Arc<str>,
}

impl AppState {
    /// Wires the service graph over `stores`, publishing through
    /// `transport` and reaching the cloud through `manager`.
    #[must_use]
    pub fn new(
        config: &GatewayConfig,
        stores: &Stores,
        transport: &Arc<dyn Transport>,
        manager: &Arc<dyn AccountManager>,
    ) -> Self {
        let publisher = Arc::new(EventPublisher::from_endpoints(transport, &config.endpoints));

        let leases = Arc::new(LeaseService::new(
            Arc::clone(&stores.leases),
            Arc::clone(&stores.accounts),
            Arc::clone(&publisher),
            LeasePolicy::from(config),
        ));
        let accounts = Arc::new(AccountService::new(
            Arc::clone(&stores.accounts),
            Arc::clone(&stores.leases),
            Arc::clone(manager),
            publisher,
            config.principal_role_name.clone(),
        ));
        let budget = Arc::new(BudgetEnforcer::new(
            Arc::clone(&leases),
            config.principal_budget_amount,
        ));
        let credentials = Arc::new(CredentialService::new(
            Arc::clone(&stores.leases),
            Arc::clone(&stores.accounts),
            Arc::clone(manager),
            Duration::from_secs(config.principal_session_duration_secs),
        ));
        let metrics = Arc::new(PoolMetrics::new(
            Arc::clone(&stores.accounts),
            Arc::clone(&stores.counters),
            MetricsTopics::from(config),
            TimeDelta::seconds(config.pool_metrics_max_age_secs),
        ));

        Self {
            leases,
            accounts,
            budget,
            credentials,
            metrics,
            admin_group_name: Arc::from(config.admin_group_name.as_str()),
        }
    }
}
