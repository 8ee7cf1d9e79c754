//! Service layer: the lease and account state machines and the
//! components that react to their transitions.
//!
//! [`LeaseService`] and [`AccountService`] own every state change and hand
//! the resulting [`crate::domain::DomainEvent`]s to the
//! [`EventPublisher`]. [`BudgetEnforcer`] and the expiry sweep call back
//! into [`LeaseService`] to end leases. [`PoolMetrics`] folds account
//! events into pool counters, and [`CredentialService`] turns an active
//! lease into a cloud session.

pub mod account_service;
pub mod budget_enforcer;
pub mod credential_service;
pub mod event_publisher;
pub mod lease_service;
pub mod pool_metrics;

pub use account_service::AccountService;
pub use budget_enforcer::BudgetEnforcer;
pub use credential_service::{CredentialService, VendedCredentials};
pub use event_publisher::{EventPublisher, Sink};
pub use lease_service::{LeasePolicy, LeaseService, NewLease};
pub use pool_metrics::{MetricsTopics, PoolMetrics};
