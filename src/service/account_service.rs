//! Account state machine: admission, conditional status changes, and
//! decommissioning.

use std::sync::Arc;

use super::EventPublisher;
use crate::cloud::AccountManager;
use crate::cloud::aws::principal_role_arn;
use crate::domain::{Account, AccountStatus, DomainEvent, EventCategory, LeaseStatus};
use crate::error::GatewayError;
use crate::persistence::{AccountStore, LeaseQuery, LeaseStore};

/// Orchestrates account transitions and principal-role provisioning.
#[derive(Debug, Clone)]
pub struct AccountService {
    accounts: Arc<dyn AccountStore>,
    leases: Arc<dyn LeaseStore>,
    manager: Arc<dyn AccountManager>,
    publisher: Arc<EventPublisher>,
    principal_role_name: String,
}

impl AccountService {
    /// Creates a new `AccountService`.
    #[must_use]
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        leases: Arc<dyn LeaseStore>,
        manager: Arc<dyn AccountManager>,
        publisher: Arc<EventPublisher>,
        principal_role_name: String,
    ) -> Self {
        Self {
            accounts,
            leases,
            manager,
            publisher,
            principal_role_name,
        }
    }

    /// Admits an account to the pool and provisions its principal role.
    ///
    /// The account starts `NotReady`. After provisioning it becomes
    /// `Ready`, unless an account reset destination is configured, in
    /// which case it stays `NotReady` until the reset completes. A
    /// provisioning failure leaves it `Orphaned`. Creating an account that
    /// was admitted but never provisioned resumes provisioning.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::ClientError`] if the ID or admin role is missing.
    /// - [`GatewayError::Conflict`] if the account already exists and is
    ///   not awaiting provisioning.
    /// - [`GatewayError::Internal`] if provisioning or publishing fails.
    pub async fn create(&self, id: &str, admin_role_arn: &str) -> Result<Account, GatewayError> {
        if id.trim().is_empty() {
            return Err(GatewayError::ClientError("id is required".to_string()));
        }
        if admin_role_arn.trim().is_empty() {
            return Err(GatewayError::ClientError(
                "adminRoleArn is required".to_string(),
            ));
        }

        let admitted = Account::admit(
            id.to_string(),
            admin_role_arn.to_string(),
            principal_role_arn(id, &self.principal_role_name),
        );
        let account = match self.accounts.insert(&admitted).await {
            Ok(()) => {
                tracing::info!(account_id = %admitted.id, "account admitted");
                admitted
            }
            Err(GatewayError::Conflict(message)) => {
                let existing = self.accounts.get(id).await?;
                if !awaits_provisioning(&existing, admin_role_arn) {
                    return Err(GatewayError::Conflict(message));
                }
                tracing::warn!(account_id = %id, "resuming provisioning of admitted account");
                existing
            }
            Err(e) => return Err(e),
        };
        self.publisher
            .publish(&DomainEvent::AccountCreated(account.clone()))
            .await?;

        let access = match self.manager.upsert_principal_access(&account).await {
            Ok(access) => access,
            Err(cause) => {
                tracing::error!(account_id = %account.id, error = %cause, "principal provisioning failed");
                let orphaned = account.with_status(AccountStatus::Orphaned);
                let previous = self
                    .accounts
                    .compare_and_swap(AccountStatus::NotReady, &orphaned)
                    .await?;
                self.publisher
                    .publish(&DomainEvent::account_updated(previous, orphaned))
                    .await?;
                return Err(GatewayError::internal(
                    format!("Failed to create principal access to account {id}"),
                    cause,
                ));
            }
        };

        let awaits_reset = self.publisher.is_enabled(EventCategory::AccountReset);
        let mut provisioned = account.with_status(if awaits_reset {
            AccountStatus::NotReady
        } else {
            AccountStatus::Ready
        });
        provisioned.principal_role_arn = access.role_arn;
        provisioned.principal_policy_hash = Some(access.policy_hash);

        let previous = self
            .accounts
            .compare_and_swap(AccountStatus::NotReady, &provisioned)
            .await?;
        self.publisher
            .publish(&DomainEvent::account_updated(previous, provisioned.clone()))
            .await?;
        if awaits_reset {
            self.publisher
                .publish(&DomainEvent::AccountReset(provisioned.clone()))
                .await?;
        }
        tracing::info!(
            account_id = %provisioned.id,
            status = %provisioned.account_status,
            "account provisioned"
        );
        Ok(provisioned)
    }

    /// Moves account `id` from `from` to `to` if it is currently `from`.
    ///
    /// `Leased` is owned by the lease state machine and cannot be entered
    /// or left here.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::ClientError`] if either status is `Leased`.
    /// - [`GatewayError::NotFound`] if the account does not exist.
    /// - [`GatewayError::Conflict`] if the current status is not `from`.
    pub async fn transition_status(
        &self,
        id: &str,
        from: AccountStatus,
        to: AccountStatus,
    ) -> Result<Account, GatewayError> {
        if from == AccountStatus::Leased || to == AccountStatus::Leased {
            return Err(GatewayError::ClientError(
                "Account status Leased is managed by leases".to_string(),
            ));
        }
        let current = self.accounts.get(id).await?;
        let next = current.with_status(to);
        let previous = self.accounts.compare_and_swap(from, &next).await?;
        if previous.account_status != to {
            self.publisher
                .publish(&DomainEvent::account_updated(previous, next.clone()))
                .await?;
        }
        tracing::info!(account_id = %id, %from, %to, "account status changed");
        Ok(next)
    }

    /// Removes account `id` from the pool.
    ///
    /// Principal access is removed best-effort; a failure is logged and
    /// does not block the deletion.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotFound`] if the account does not exist and
    /// [`GatewayError::Conflict`] if it is leased.
    pub async fn delete(&self, id: &str) -> Result<Account, GatewayError> {
        let current = self.accounts.get(id).await?;
        let active = self
            .leases
            .list_page(&LeaseQuery {
                account_id: Some(id.to_string()),
                status: Some(LeaseStatus::Active),
                limit: 1,
                ..LeaseQuery::default()
            })
            .await?;
        if current.account_status == AccountStatus::Leased || !active.items.is_empty() {
            return Err(GatewayError::Conflict(format!(
                "Unable to delete account {id}: account is leased."
            )));
        }

        let removed = self.accounts.delete(id, current.account_status).await?;
        if let Err(e) = self.manager.delete_principal_access(&removed).await {
            tracing::warn!(account_id = %id, error = %e, "failed to remove principal access");
        }
        self.publisher
            .publish(&DomainEvent::AccountDeleted(removed.clone()))
            .await?;
        tracing::info!(account_id = %id, "account deleted");
        Ok(removed)
    }

    /// Fetches account `id`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotFound`] if the account does not exist.
    pub async fn get(&self, id: &str) -> Result<Account, GatewayError> {
        self.accounts.get(id).await
    }

    /// Lists accounts, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Persistence`] on store failure.
    pub async fn list(&self, status: Option<AccountStatus>) -> Result<Vec<Account>, GatewayError> {
        self.accounts.list(status).await
    }
}

/// An account admitted with the same admin role whose principal access was
/// never provisioned. Creating it again resumes where the first attempt
/// stopped.
fn awaits_provisioning(account: &Account, admin_role_arn: &str) -> bool {
    account.account_status == AccountStatus::NotReady
        && account.principal_policy_hash.is_none()
        && account.admin_role_arn == admin_role_arn
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::config::EventEndpoints;
    use crate::domain::{Caller, LeaseStatusReason};
    use crate::fixtures::Harness;
    use crate::service::NewLease;

    #[tokio::test]
    async fn create_provisions_and_awaits_reset() {
        let h = Harness::new().await;
        let Ok(account) = h.accounts.create("a1", "arn:aws:iam::a1:role/Admin").await else {
            panic!("account should be created");
        };
        assert_eq!(account.account_status, AccountStatus::NotReady);
        assert!(account.principal_policy_hash.is_some());
        assert_eq!(h.published(EventCategory::AccountCreate).len(), 1);
        assert_eq!(h.published(EventCategory::AccountReset).len(), 1);
    }

    #[tokio::test]
    async fn create_without_reset_destination_goes_ready() {
        let h = Harness::with_config(|c| c.endpoints = EventEndpoints::default()).await;
        let Ok(account) = h.accounts.create("a1", "arn:aws:iam::a1:role/Admin").await else {
            panic!("account should be created");
        };
        assert_eq!(account.account_status, AccountStatus::Ready);
    }

    #[tokio::test]
    async fn provisioning_failure_orphans_the_account() {
        let h = Harness::new().await;
        h.manager.fail_provisioning(true);
        let result = h.accounts.create("a1", "arn:aws:iam::a1:role/Admin").await;
        assert!(matches!(result, Err(GatewayError::Internal { .. })));
        assert_eq!(h.account_status("a1").await, AccountStatus::Orphaned);
    }

    #[tokio::test]
    async fn create_resumes_after_failed_publish() {
        let h = Harness::new().await;
        h.transport.set_failing(true);
        let first = h.accounts.create("a1", "arn:aws:iam::a1:role/Admin").await;
        assert!(matches!(first, Err(GatewayError::Internal { .. })));
        let Ok(stored) = h.accounts.get("a1").await else {
            panic!("account should be admitted");
        };
        assert_eq!(stored.account_status, AccountStatus::NotReady);
        assert!(stored.principal_policy_hash.is_none());

        h.transport.set_failing(false);
        let Ok(account) = h.accounts.create("a1", "arn:aws:iam::a1:role/Admin").await else {
            panic!("retry should resume provisioning");
        };
        assert_eq!(account.account_status, AccountStatus::NotReady);
        assert!(account.principal_policy_hash.is_some());
        assert_eq!(h.published(EventCategory::AccountCreate).len(), 1);
        assert_eq!(h.published(EventCategory::AccountReset).len(), 1);

        let again = h.accounts.create("a1", "arn:aws:iam::a1:role/Admin").await;
        assert!(matches!(again, Err(GatewayError::Conflict(_))));
    }

    #[tokio::test]
    async fn duplicate_account_conflicts() {
        let h = Harness::new().await;
        let _ = h.accounts.create("a1", "arn:aws:iam::a1:role/Admin").await;
        let result = h.accounts.create("a1", "arn:aws:iam::a1:role/Admin").await;
        assert!(matches!(result, Err(GatewayError::Conflict(_))));
    }

    #[tokio::test]
    async fn transition_is_conditional_on_current_status() {
        let h = Harness::new().await;
        let _ = h.accounts.create("a1", "arn:aws:iam::a1:role/Admin").await;

        let stale = h
            .accounts
            .transition_status("a1", AccountStatus::Ready, AccountStatus::Orphaned)
            .await;
        assert!(matches!(stale, Err(GatewayError::Conflict(_))));

        let Ok(ready) = h
            .accounts
            .transition_status("a1", AccountStatus::NotReady, AccountStatus::Ready)
            .await
        else {
            panic!("transition should succeed");
        };
        assert_eq!(ready.account_status, AccountStatus::Ready);

        let leased = h
            .accounts
            .transition_status("a1", AccountStatus::Ready, AccountStatus::Leased)
            .await;
        assert!(matches!(leased, Err(GatewayError::ClientError(_))));
    }

    #[tokio::test]
    async fn delete_refuses_leased_accounts() {
        let h = Harness::new().await;
        h.ready_account("a1").await;
        let Ok(lease) = h
            .leases
            .create(
                &Caller::user("p1"),
                NewLease {
                    principal_id: "p1".into(),
                    budget_amount: 10.0,
                    ..NewLease::default()
                },
            )
            .await
        else {
            panic!("lease should be created");
        };

        let result = h.accounts.delete("a1").await;
        assert!(matches!(result, Err(GatewayError::Conflict(_))));

        let _ = h.leases.end(lease.id, LeaseStatusReason::Destroyed).await;
        assert!(h.accounts.delete("a1").await.is_ok());
        assert!(matches!(h.accounts.get("a1").await, Err(GatewayError::NotFound { .. })));
        assert_eq!(h.published(EventCategory::AccountDelete).len(), 1);
    }

    #[tokio::test]
    async fn delete_survives_principal_cleanup_failure() {
        let h = Harness::new().await;
        h.ready_account("a1").await;
        h.manager.fail_cleanup(true);
        assert!(h.accounts.delete("a1").await.is_ok());
    }
}
