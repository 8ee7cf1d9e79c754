//! Named account-pool counters and the increments a transition implies.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{Account, AccountStatus};

/// Name of a pool counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub enum PoolCounter {
    /// Accounts in [`AccountStatus::Leased`].
    LeasedAccountsCount,
    /// Accounts in [`AccountStatus::Ready`].
    ReadyAccountsCount,
    /// Accounts in [`AccountStatus::NotReady`].
    NotReadyAccountsCount,
    /// Accounts in [`AccountStatus::Orphaned`].
    OrphanedAccountsCount,
    /// Accounts in [`AccountStatus::None`].
    NoneAccountsCount,
    /// All accounts in the pool.
    TotalAccountsCount,
}

impl PoolCounter {
    /// Every counter, in a stable order.
    pub const ALL: [Self; 6] = [
        Self::LeasedAccountsCount,
        Self::ReadyAccountsCount,
        Self::NotReadyAccountsCount,
        Self::OrphanedAccountsCount,
        Self::NoneAccountsCount,
        Self::TotalAccountsCount,
    ];

    /// Counter tracking accounts in `status`.
    #[must_use]
    pub const fn for_status(status: AccountStatus) -> Self {
        match status {
            AccountStatus::None => Self::NoneAccountsCount,
            AccountStatus::Ready => Self::ReadyAccountsCount,
            AccountStatus::NotReady => Self::NotReadyAccountsCount,
            AccountStatus::Leased => Self::LeasedAccountsCount,
            AccountStatus::Orphaned => Self::OrphanedAccountsCount,
        }
    }

    /// Returns the stored counter name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LeasedAccountsCount => "LeasedAccountsCount",
            Self::ReadyAccountsCount => "ReadyAccountsCount",
            Self::NotReadyAccountsCount => "NotReadyAccountsCount",
            Self::OrphanedAccountsCount => "OrphanedAccountsCount",
            Self::NoneAccountsCount => "NoneAccountsCount",
            Self::TotalAccountsCount => "TotalAccountsCount",
        }
    }

    /// Parses a stored counter name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|counter| counter.as_str() == name)
    }
}

impl fmt::Display for PoolCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signed adjustments keyed by counter.
pub type CounterIncrements = BTreeMap<PoolCounter, i64>;

/// Maps an account transition to counter increments.
///
/// - create (`old` absent): `+1` new status, `+1` total
/// - delete (`new` absent): `-1` old status, `-1` total
/// - status change: `-1` old status, `+1` new status
/// - anything else: no increments
#[must_use]
pub fn status_increments(old: Option<&Account>, new: Option<&Account>) -> CounterIncrements {
    let mut increments = CounterIncrements::new();
    match (old, new) {
        (None, Some(new)) => {
            increments.insert(PoolCounter::TotalAccountsCount, 1);
            increments.insert(PoolCounter::for_status(new.account_status), 1);
        }
        (Some(old), None) => {
            increments.insert(PoolCounter::TotalAccountsCount, -1);
            increments.insert(PoolCounter::for_status(old.account_status), -1);
        }
        (Some(old), Some(new)) if old.account_status != new.account_status => {
            increments.insert(PoolCounter::for_status(old.account_status), -1);
            increments.insert(PoolCounter::for_status(new.account_status), 1);
        }
        _ => {}
    }
    increments
}

/// Counts accounts per status from a full scan. Used only to rebuild
/// missing or stale counters.
#[must_use]
pub fn count_accounts<'a>(accounts: impl IntoIterator<Item = &'a Account>) -> CounterIncrements {
    let mut counts: CounterIncrements = PoolCounter::ALL.into_iter().map(|c| (c, 0)).collect();
    for account in accounts {
        *counts.entry(PoolCounter::TotalAccountsCount).or_default() += 1;
        *counts
            .entry(PoolCounter::for_status(account.account_status))
            .or_default() += 1;
    }
    counts
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn account(status: AccountStatus) -> Account {
        Account::admit("1".into(), "admin".into(), "principal".into()).with_status(status)
    }

    #[test]
    fn create_increments_status_and_total() {
        let new = account(AccountStatus::NotReady);
        let inc = status_increments(None, Some(&new));
        assert_eq!(inc.get(&PoolCounter::TotalAccountsCount), Some(&1));
        assert_eq!(inc.get(&PoolCounter::NotReadyAccountsCount), Some(&1));
        assert_eq!(inc.len(), 2);
    }

    #[test]
    fn delete_decrements_status_and_total() {
        let old = account(AccountStatus::Ready);
        let inc = status_increments(Some(&old), None);
        assert_eq!(inc.get(&PoolCounter::TotalAccountsCount), Some(&-1));
        assert_eq!(inc.get(&PoolCounter::ReadyAccountsCount), Some(&-1));
    }

    #[test]
    fn status_change_moves_one_between_counters() {
        let old = account(AccountStatus::Ready);
        let new = account(AccountStatus::Leased);
        let inc = status_increments(Some(&old), Some(&new));
        assert_eq!(inc.get(&PoolCounter::ReadyAccountsCount), Some(&-1));
        assert_eq!(inc.get(&PoolCounter::LeasedAccountsCount), Some(&1));
        assert!(!inc.contains_key(&PoolCounter::TotalAccountsCount));
    }

    #[test]
    fn update_without_status_change_is_noop() {
        let old = account(AccountStatus::Ready);
        let mut new = old.clone();
        new.principal_policy_hash = Some("abc".into());
        assert!(status_increments(Some(&old), Some(&new)).is_empty());
    }

    #[test]
    fn count_accounts_per_status_sums_to_total() {
        let accounts = vec![
            account(AccountStatus::Ready),
            account(AccountStatus::Ready),
            account(AccountStatus::Leased),
        ];
        let counts = count_accounts(&accounts);
        assert_eq!(counts.get(&PoolCounter::TotalAccountsCount), Some(&3));
        assert_eq!(counts.get(&PoolCounter::ReadyAccountsCount), Some(&2));
        assert_eq!(counts.get(&PoolCounter::OrphanedAccountsCount), Some(&0));
        let per_status: i64 = counts
            .iter()
            .filter(|(c, _)| **c != PoolCounter::TotalAccountsCount)
            .map(|(_, v)| *v)
            .sum();
        assert_eq!(per_status, 3);
    }

    #[test]
    fn counter_names_round_trip() {
        for counter in PoolCounter::ALL {
            assert_eq!(PoolCounter::from_name(counter.as_str()), Some(counter));
        }
    }
}
