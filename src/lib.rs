//! # lease-gateway
//!
//! REST gateway that leases sandbox cloud accounts to principals, enforces
//! lease and principal budgets from a usage change feed, and vends
//! temporary credentials for active leases.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP)                 Usage change feed
//!     │                                │
//!     ├── REST Handlers (api/)         │
//!     │                                │
//!     ├── LeaseService ◄── BudgetEnforcer (service/)
//!     ├── AccountService               │
//!     ├── CredentialService            │
//!     │                                │
//!     ├── EventPublisher ──► Transport (cloud/: in-process broker, SNS/SQS)
//!     │                          │
//!     │                          └──► PoolMetrics
//!     │
//!     └── Stores (persistence/: in-memory, PostgreSQL)
//! ```
//!
//! Every state change is a conditional write against the store, so
//! concurrent requests coordinate without in-process locks.

pub mod api;
pub mod app_state;
pub mod cloud;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod service;

#[cfg(test)]
#[allow(clippy::panic)]
pub(crate) mod fixtures;
