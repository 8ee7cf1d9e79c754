//! Domain layer: accounts, leases, usage summaries, events, and counters.
//!
//! This module contains the server-side domain model. It performs no I/O;
//! persistence lives in [`crate::persistence`] and orchestration in
//! [`crate::service`].

pub mod account;
pub mod caller;
pub mod domain_event;
pub mod lease;
pub mod lease_id;
pub mod pool_counter;
pub mod usage;

pub use account::{Account, AccountStatus};
pub use caller::Caller;
pub use domain_event::{AccountUpdate, DomainEvent, EventCategory, LeaseUpdate};
pub use lease::{Lease, LeaseBudget, LeaseStatus, LeaseStatusReason};
pub use lease_id::LeaseId;
pub use pool_counter::{CounterIncrements, PoolCounter};
pub use usage::{ChangeKind, ChangeRecord, UsageImage, UsageSummary};
