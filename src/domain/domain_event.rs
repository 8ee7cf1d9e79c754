//! Domain events reflecting account and lease state transitions.
//!
//! Every committed transition emits a [`DomainEvent`] through the event
//! publisher. Events carry the before/after entities so subscribers can
//! derive deltas without querying the store.

use serde::{Deserialize, Serialize};

use super::{Account, Lease};

/// Publishing category. Each category has its own ordered sink list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    /// Account admitted to the pool.
    AccountCreate,
    /// Account record changed.
    AccountUpdate,
    /// Account decommissioned.
    AccountDelete,
    /// Account needs to be reset.
    AccountReset,
    /// Lease created.
    LeaseCreate,
    /// Lease ended.
    LeaseEnd,
    /// Lease record changed.
    LeaseUpdate,
}

impl EventCategory {
    /// Every category, in a stable order.
    pub const ALL: [Self; 7] = [
        Self::AccountCreate,
        Self::AccountUpdate,
        Self::AccountDelete,
        Self::AccountReset,
        Self::LeaseCreate,
        Self::LeaseEnd,
        Self::LeaseUpdate,
    ];

    /// Returns the category name used in logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AccountCreate => "account_create",
            Self::AccountUpdate => "account_update",
            Self::AccountDelete => "account_delete",
            Self::AccountReset => "account_reset",
            Self::LeaseCreate => "lease_create",
            Self::LeaseEnd => "lease_end",
            Self::LeaseUpdate => "lease_update",
        }
    }
}

/// Payload of an account update: the record before and after the change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountUpdate {
    /// Record before the change.
    pub old_account: Option<Account>,
    /// Record after the change.
    pub new_account: Option<Account>,
}

/// Payload of a lease update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseUpdate {
    /// Record before the change.
    pub old_lease: Lease,
    /// Record after the change.
    pub new_lease: Lease,
}

/// Immutable fact describing a state transition.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    /// An account was admitted.
    AccountCreated(Account),
    /// An account record changed.
    AccountUpdated(AccountUpdate),
    /// An account was removed from the pool.
    AccountDeleted(Account),
    /// An account must be reset before reuse.
    AccountReset(Account),
    /// A lease was created.
    LeaseCreated(Lease),
    /// A lease ended.
    LeaseEnded(Lease),
    /// A lease record changed outside of creation and termination.
    ///
    /// No gateway operation edits a live lease, so the gateway itself never
    /// raises this event. The category and its `LEASE_UPDATED_TOPIC` route
    /// exist so deployments wiring every lease topic keep one shape.
    LeaseUpdated(LeaseUpdate),
}

impl DomainEvent {
    /// Builds an [`DomainEvent::AccountUpdated`] from the old and new records.
    #[must_use]
    pub fn account_updated(old: Account, new: Account) -> Self {
        Self::AccountUpdated(AccountUpdate {
            old_account: Some(old),
            new_account: Some(new),
        })
    }

    /// Returns the publishing category of this event.
    #[must_use]
    pub const fn category(&self) -> EventCategory {
        match self {
            Self::AccountCreated(_) => EventCategory::AccountCreate,
            Self::AccountUpdated(_) => EventCategory::AccountUpdate,
            Self::AccountDeleted(_) => EventCategory::AccountDelete,
            Self::AccountReset(_) => EventCategory::AccountReset,
            Self::LeaseCreated(_) => EventCategory::LeaseCreate,
            Self::LeaseEnded(_) => EventCategory::LeaseEnd,
            Self::LeaseUpdated(_) => EventCategory::LeaseUpdate,
        }
    }

    /// Serializes the transport payload.
    ///
    /// Single-entity events carry the entity itself; update events carry
    /// an `{old…, new…}` pair.
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if serialization fails.
    pub fn to_message(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::AccountCreated(account)
            | Self::AccountDeleted(account)
            | Self::AccountReset(account) => serde_json::to_string(account),
            Self::AccountUpdated(update) => serde_json::to_string(update),
            Self::LeaseCreated(lease) | Self::LeaseEnded(lease) => serde_json::to_string(lease),
            Self::LeaseUpdated(update) => serde_json::to_string(update),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::AccountStatus;

    fn account() -> Account {
        Account::admit("123".into(), "admin".into(), "principal".into())
    }

    #[test]
    fn category_matches_variant() {
        let acct = account();
        assert_eq!(
            DomainEvent::AccountCreated(acct.clone()).category(),
            EventCategory::AccountCreate
        );
        assert_eq!(
            DomainEvent::AccountReset(acct).category(),
            EventCategory::AccountReset
        );
    }

    #[test]
    fn account_update_message_carries_both_images() {
        let old = account();
        let new = old.with_status(AccountStatus::Ready);
        let Ok(message) = DomainEvent::account_updated(old, new).to_message() else {
            panic!("serialization failed");
        };
        let Ok(update) = serde_json::from_str::<AccountUpdate>(&message) else {
            panic!("message should decode as an account update");
        };
        assert_eq!(
            update.old_account.map(|a| a.account_status),
            Some(AccountStatus::NotReady)
        );
        assert_eq!(
            update.new_account.map(|a| a.account_status),
            Some(AccountStatus::Ready)
        );
    }

    #[test]
    fn account_created_message_is_the_account() {
        let acct = account();
        let Ok(message) = DomainEvent::AccountCreated(acct.clone()).to_message() else {
            panic!("serialization failed");
        };
        let Ok(decoded) = serde_json::from_str::<Account>(&message) else {
            panic!("message should decode as an account");
        };
        assert_eq!(decoded.id, acct.id);
    }
}
