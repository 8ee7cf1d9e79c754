//! In-memory store for single-process deployments and tests.
//!
//! Each table sits behind its own [`tokio::sync::RwLock`]. Conditional
//! writes check and write under one write-lock acquisition, which gives
//! them the same atomicity the PostgreSQL store gets from row locks.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{
    AccountStore, CounterSnapshot, CounterStore, LeaseQuery, LeaseStore, Page,
    account_lease_conflict, principal_lease_conflict, status_conflict,
};
use crate::domain::{
    Account, AccountStatus, CounterIncrements, Lease, LeaseId, LeaseStatus, PoolCounter,
};
use crate::error::GatewayError;

/// Store holding accounts, leases, and counters in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    accounts: RwLock<BTreeMap<String, Account>>,
    leases: RwLock<BTreeMap<LeaseId, Lease>>,
    counters: RwLock<CounterSnapshot>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn insert(&self, account: &Account) -> Result<(), GatewayError> {
        let mut map = self.accounts.write().await;
        if map.contains_key(&account.id) {
            return Err(GatewayError::Conflict(format!(
                "account {} already exists",
                account.id
            )));
        }
        map.insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Account, GatewayError> {
        self.accounts
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::not_found("account", id))
    }

    async fn list(&self, status: Option<AccountStatus>) -> Result<Vec<Account>, GatewayError> {
        let map = self.accounts.read().await;
        Ok(map
            .values()
            .filter(|a| status.is_none_or(|s| s == a.account_status))
            .cloned()
            .collect())
    }

    async fn compare_and_swap(
        &self,
        expected: AccountStatus,
        account: &Account,
    ) -> Result<Account, GatewayError> {
        let mut map = self.accounts.write().await;
        let current = map
            .get_mut(&account.id)
            .ok_or_else(|| GatewayError::not_found("account", account.id.as_str()))?;
        if current.account_status != expected {
            return Err(status_conflict(
                "account",
                &account.id,
                expected.as_str(),
                current.account_status.as_str(),
            ));
        }
        Ok(std::mem::replace(current, account.clone()))
    }

    async fn delete(&self, id: &str, expected: AccountStatus) -> Result<Account, GatewayError> {
        let mut map = self.accounts.write().await;
        let current = map
            .get(id)
            .ok_or_else(|| GatewayError::not_found("account", id))?;
        if current.account_status != expected {
            return Err(status_conflict(
                "account",
                id,
                expected.as_str(),
                current.account_status.as_str(),
            ));
        }
        map.remove(id)
            .ok_or_else(|| GatewayError::not_found("account", id))
    }
}

#[async_trait]
impl LeaseStore for MemoryStore {
    async fn insert(&self, lease: &Lease) -> Result<(), GatewayError> {
        let mut map = self.leases.write().await;
        if map.contains_key(&lease.id) {
            return Err(GatewayError::Conflict(format!(
                "lease {} already exists",
                lease.id
            )));
        }
        if lease.is_active() {
            let clash = map.values().find(|other| {
                other.is_active()
                    && (other.principal_id == lease.principal_id
                        || other.account_id == lease.account_id)
            });
            if let Some(other) = clash {
                return Err(if other.principal_id == lease.principal_id {
                    principal_lease_conflict(&other.account_id)
                } else {
                    account_lease_conflict(&other.account_id)
                });
            }
        }
        map.insert(lease.id, lease.clone());
        Ok(())
    }

    async fn get(&self, id: LeaseId) -> Result<Lease, GatewayError> {
        self.leases
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| GatewayError::not_found("lease", id.to_string()))
    }

    async fn list_page(&self, query: &LeaseQuery) -> Result<Page<Lease>, GatewayError> {
        let map = self.leases.read().await;
        let mut matching = map
            .values()
            .filter(|lease| query.after.is_none_or(|after| lease.id > after))
            .filter(|lease| query.matches(lease));
        let items: Vec<Lease> = matching.by_ref().take(query.limit).cloned().collect();
        let next = if matching.next().is_some() {
            items.last().map(|lease| lease.id)
        } else {
            None
        };
        Ok(Page { items, next })
    }

    async fn compare_and_swap(
        &self,
        expected: LeaseStatus,
        lease: &Lease,
    ) -> Result<Lease, GatewayError> {
        let mut map = self.leases.write().await;
        let current = map
            .get_mut(&lease.id)
            .ok_or_else(|| GatewayError::not_found("lease", lease.id.to_string()))?;
        if current.lease_status != expected {
            return Err(status_conflict(
                "lease",
                &lease.id.to_string(),
                expected.as_str(),
                current.lease_status.as_str(),
            ));
        }
        Ok(std::mem::replace(current, lease.clone()))
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment(&self, counter: PoolCounter, delta: i64) -> Result<i64, GatewayError> {
        let mut state = self.counters.write().await;
        let value = state.counts.entry(counter).or_insert(0);
        *value = value.saturating_add(delta);
        Ok(*value)
    }

    async fn snapshot(&self) -> Result<CounterSnapshot, GatewayError> {
        Ok(self.counters.read().await.clone())
    }

    async fn reinitialize(
        &self,
        counts: &CounterIncrements,
        at: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        let mut state = self.counters.write().await;
        state.counts = PoolCounter::ALL
            .into_iter()
            .map(|counter| (counter, counts.get(&counter).copied().unwrap_or(0)))
            .collect();
        state.last_initialized = Some(at);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{LeaseBudget, LeaseStatusReason};
    use chrono::Duration;

    fn account(id: &str, status: AccountStatus) -> Account {
        Account::admit(id.into(), "admin".into(), "principal".into()).with_status(status)
    }

    fn lease(principal: &str, account: &str) -> Lease {
        Lease::activate(
            principal.into(),
            account.into(),
            LeaseBudget {
                amount: 100.0,
                currency: "USD".into(),
                notification_emails: Vec::new(),
            },
            Utc::now() + Duration::days(1),
        )
    }

    #[tokio::test]
    async fn account_insert_rejects_duplicates() {
        let store = MemoryStore::new();
        assert!(AccountStore::insert(&store, &account("1", AccountStatus::Ready)).await.is_ok());
        let Err(err) = AccountStore::insert(&store, &account("1", AccountStatus::Ready)).await else {
            panic!("duplicate insert should fail");
        };
        assert!(matches!(err, GatewayError::Conflict(_)));
    }

    #[tokio::test]
    async fn account_cas_fails_on_status_mismatch() {
        let store = MemoryStore::new();
        let ready = account("1", AccountStatus::Ready);
        let _ = AccountStore::insert(&store, &ready).await;

        let leased = ready.with_status(AccountStatus::Leased);
        let Ok(previous) = AccountStore::compare_and_swap(&store, AccountStatus::Ready, &leased).await
        else {
            panic!("first transition should succeed");
        };
        assert_eq!(previous.account_status, AccountStatus::Ready);

        // A second racer still believes the account is Ready.
        let result = AccountStore::compare_and_swap(&store, AccountStatus::Ready, &leased).await;
        assert!(matches!(result, Err(GatewayError::Conflict(_))));
    }

    #[tokio::test]
    async fn account_delete_requires_expected_status() {
        let store = MemoryStore::new();
        let _ = AccountStore::insert(&store, &account("1", AccountStatus::Leased)).await;
        let result = AccountStore::delete(&store, "1", AccountStatus::Ready).await;
        assert!(matches!(result, Err(GatewayError::Conflict(_))));
        let missing = AccountStore::delete(&store, "2", AccountStatus::Ready).await;
        assert!(matches!(missing, Err(GatewayError::NotFound { .. })));
    }

    #[tokio::test]
    async fn second_active_lease_for_principal_conflicts() {
        let store = MemoryStore::new();
        assert!(LeaseStore::insert(&store, &lease("p1", "a1")).await.is_ok());
        let Err(GatewayError::Conflict(message)) = LeaseStore::insert(&store, &lease("p1", "a2")).await
        else {
            panic!("second active lease should conflict");
        };
        assert_eq!(message, "Principal already has an existing lease: a1");
    }

    #[tokio::test]
    async fn inactive_leases_do_not_block_new_ones() {
        let store = MemoryStore::new();
        let first = lease("p1", "a1");
        let _ = LeaseStore::insert(&store, &first).await;
        let ended = first.ended(LeaseStatusReason::Destroyed);
        let _ = LeaseStore::compare_and_swap(&store, LeaseStatus::Active, &ended).await;
        assert!(LeaseStore::insert(&store, &lease("p1", "a1")).await.is_ok());
    }

    #[tokio::test]
    async fn list_page_walks_cursor_to_the_end() {
        let store = MemoryStore::new();
        for i in 0..5 {
            let mut l = lease(&format!("p{i}"), &format!("a{i}"));
            l.lease_status = LeaseStatus::Inactive;
            let _ = LeaseStore::insert(&store, &l).await;
        }

        let mut query = LeaseQuery {
            limit: 2,
            ..LeaseQuery::default()
        };
        let mut seen = Vec::new();
        let mut pages = 0;
        loop {
            let Ok(page) = store.list_page(&query).await else {
                panic!("list failed");
            };
            pages += 1;
            seen.extend(page.items.iter().map(|l| l.id));
            match page.next {
                Some(next) => query.after = Some(next),
                None => break,
            }
        }
        assert_eq!(pages, 3);
        assert_eq!(seen.len(), 5);
        let mut sorted = seen.clone();
        sorted.sort();
        assert_eq!(seen, sorted);
    }

    #[tokio::test]
    async fn list_page_filters_by_principal_and_status() {
        let store = MemoryStore::new();
        let _ = LeaseStore::insert(&store, &lease("p1", "a1")).await;
        let _ = LeaseStore::insert(&store, &lease("p2", "a2")).await;
        let Ok(page) = store.list_page(&LeaseQuery::active_for_principal("p2")).await else {
            panic!("list failed");
        };
        assert_eq!(page.items.len(), 1);
        assert!(page.next.is_none());
    }

    #[tokio::test]
    async fn counters_increment_and_reinitialize() {
        let store = MemoryStore::new();
        let Ok(snapshot) = store.snapshot().await else {
            panic!("snapshot failed");
        };
        assert!(snapshot.is_incomplete());

        let _ = store.increment(PoolCounter::TotalAccountsCount, 1).await;
        let Ok(value) = store.increment(PoolCounter::TotalAccountsCount, 1).await else {
            panic!("increment failed");
        };
        assert_eq!(value, 2);

        let mut counts = CounterIncrements::new();
        counts.insert(PoolCounter::TotalAccountsCount, 7);
        let now = Utc::now();
        let _ = store.reinitialize(&counts, now).await;
        let Ok(snapshot) = store.snapshot().await else {
            panic!("snapshot failed");
        };
        assert!(!snapshot.is_incomplete());
        assert_eq!(snapshot.counts.get(&PoolCounter::TotalAccountsCount), Some(&7));
        assert_eq!(snapshot.counts.get(&PoolCounter::ReadyAccountsCount), Some(&0));
        assert_eq!(snapshot.last_initialized, Some(now));
    }
}
