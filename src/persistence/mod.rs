//! Persistence layer: account, lease, and pool-counter stores.
//!
//! The store is the single source of truth for entity state. Every
//! mutation goes through a conditional write ([`AccountStore::compare_and_swap`],
//! [`LeaseStore::compare_and_swap`]) or an atomic counter adjustment
//! ([`CounterStore::increment`]), so independent invocations racing on the
//! same record cannot lose updates. Two implementations are provided:
//! [`memory::MemoryStore`] and [`postgres::PostgresStore`].

pub mod memory;
pub mod models;
pub mod postgres;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Account, AccountStatus, CounterIncrements, Lease, LeaseId, LeaseStatus, PoolCounter};
use crate::error::GatewayError;

/// Default page size for lease listings.
pub const DEFAULT_PAGE_LIMIT: usize = 25;

/// Largest page size a caller may request.
pub const MAX_PAGE_LIMIT: usize = 100;

/// Filter and cursor for lease listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseQuery {
    /// Only leases held by this principal.
    pub principal_id: Option<String>,
    /// Only leases of this account.
    pub account_id: Option<String>,
    /// Only leases in this status.
    pub status: Option<LeaseStatus>,
    /// Resume after this lease ID (exclusive).
    pub after: Option<LeaseId>,
    /// Maximum number of leases per page.
    pub limit: usize,
}

impl Default for LeaseQuery {
    fn default() -> Self {
        Self {
            principal_id: None,
            account_id: None,
            status: None,
            after: None,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl LeaseQuery {
    /// Active leases held by `principal_id`.
    #[must_use]
    pub fn active_for_principal(principal_id: impl Into<String>) -> Self {
        Self {
            principal_id: Some(principal_id.into()),
            status: Some(LeaseStatus::Active),
            ..Self::default()
        }
    }

    /// Returns `true` if `lease` passes the filters (the cursor is not
    /// considered).
    #[must_use]
    pub fn matches(&self, lease: &Lease) -> bool {
        self.principal_id
            .as_deref()
            .is_none_or(|p| p == lease.principal_id)
            && self.account_id.as_deref().is_none_or(|a| a == lease.account_id)
            && self.status.is_none_or(|s| s == lease.lease_status)
    }

    /// Clamps the page size to `1..=MAX_PAGE_LIMIT`.
    #[must_use]
    pub fn clamped(mut self) -> Self {
        self.limit = self.limit.clamp(1, MAX_PAGE_LIMIT);
        self
    }
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// Items on this page, ordered by ID.
    pub items: Vec<T>,
    /// Cursor for the next page; `None` on the last page.
    pub next: Option<LeaseId>,
}

/// Counter values plus the time they were last rebuilt from a full scan.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CounterSnapshot {
    /// Current value per counter; absent counters were never written.
    pub counts: CounterIncrements,
    /// Time of the last full rebuild.
    pub last_initialized: Option<DateTime<Utc>>,
}

impl CounterSnapshot {
    /// Returns `true` if any counter has never been written.
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        PoolCounter::ALL
            .iter()
            .any(|counter| !self.counts.contains_key(counter))
    }
}

/// The stores the services are wired against.
#[derive(Debug, Clone)]
pub struct Stores {
    /// Account records.
    pub accounts: Arc<dyn AccountStore>,
    /// Lease records.
    pub leases: Arc<dyn LeaseStore>,
    /// Pool counters.
    pub counters: Arc<dyn CounterStore>,
}

impl Stores {
    /// Uses one backend for all three stores.
    #[must_use]
    pub fn shared<S>(store: &Arc<S>) -> Self
    where
        S: AccountStore + LeaseStore + CounterStore + 'static,
    {
        Self {
            accounts: Arc::clone(store) as Arc<dyn AccountStore>,
            leases: Arc::clone(store) as Arc<dyn LeaseStore>,
            counters: Arc::clone(store) as Arc<dyn CounterStore>,
        }
    }
}

/// Account records.
#[async_trait]
pub trait AccountStore: Send + Sync + fmt::Debug {
    /// Inserts a new account.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Conflict`] if the ID is already present.
    async fn insert(&self, account: &Account) -> Result<(), GatewayError>;

    /// Fetches an account.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotFound`] if the account does not exist.
    async fn get(&self, id: &str) -> Result<Account, GatewayError>;

    /// Lists accounts, optionally restricted to one status, ordered by ID.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Persistence`] on store failure.
    async fn list(&self, status: Option<AccountStatus>) -> Result<Vec<Account>, GatewayError>;

    /// Replaces the stored record with `account` if its current status is
    /// `expected`, returning the previous record.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotFound`] if the account does not exist and
    /// [`GatewayError::Conflict`] if its status is not `expected`.
    async fn compare_and_swap(
        &self,
        expected: AccountStatus,
        account: &Account,
    ) -> Result<Account, GatewayError>;

    /// Deletes an account if its current status is `expected`, returning
    /// the removed record.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotFound`] if the account does not exist and
    /// [`GatewayError::Conflict`] if its status is not `expected`.
    async fn delete(&self, id: &str, expected: AccountStatus) -> Result<Account, GatewayError>;
}

/// Lease records.
#[async_trait]
pub trait LeaseStore: Send + Sync + fmt::Debug {
    /// Inserts a new lease.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Conflict`] if the lease is `Active` and its
    /// principal or account already has an `Active` lease.
    async fn insert(&self, lease: &Lease) -> Result<(), GatewayError>;

    /// Fetches a lease.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotFound`] if the lease does not exist.
    async fn get(&self, id: LeaseId) -> Result<Lease, GatewayError>;

    /// Returns one page of leases matching `query`, ordered by ID.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Persistence`] on store failure.
    async fn list_page(&self, query: &LeaseQuery) -> Result<Page<Lease>, GatewayError>;

    /// Replaces the stored lease with `lease` if its current status is
    /// `expected`, returning the previous record.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotFound`] if the lease does not exist and
    /// [`GatewayError::Conflict`] if its status is not `expected`.
    async fn compare_and_swap(&self, expected: LeaseStatus, lease: &Lease)
    -> Result<Lease, GatewayError>;
}

/// Pool counters.
#[async_trait]
pub trait CounterStore: Send + Sync + fmt::Debug {
    /// Atomically adds `delta` to `counter`, creating it at zero if absent.
    /// Returns the new value.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Persistence`] on store failure.
    async fn increment(&self, counter: PoolCounter, delta: i64) -> Result<i64, GatewayError>;

    /// Reads every counter.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Persistence`] on store failure.
    async fn snapshot(&self) -> Result<CounterSnapshot, GatewayError>;

    /// Overwrites every counter with `counts` and records `at` as the
    /// rebuild time.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Persistence`] on store failure.
    async fn reinitialize(
        &self,
        counts: &CounterIncrements,
        at: DateTime<Utc>,
    ) -> Result<(), GatewayError>;
}

/// Conflict for a principal whose active lease holds `account_id`.
fn principal_lease_conflict(account_id: &str) -> GatewayError {
    GatewayError::Conflict(format!(
        "Principal already has an existing lease: {account_id}"
    ))
}

/// Conflict for an account that already backs an active lease.
fn account_lease_conflict(account_id: &str) -> GatewayError {
    GatewayError::Conflict(format!("account {account_id} already has an active lease"))
}

fn status_conflict(kind: &str, id: &str, expected: &str, actual: &str) -> GatewayError {
    GatewayError::Conflict(format!(
        "{kind} {id} is in status {actual}, expected {expected}"
    ))
}
