//! Credential vending: turns an authorized lease into a temporary
//! session in the leased account plus a console sign-in URL.

use std::sync::Arc;
use std::time::Duration;

use crate::cloud::{AccountManager, SessionCredentials};
use crate::domain::{Caller, Lease, LeaseId};
use crate::error::GatewayError;
use crate::persistence::{AccountStore, LeaseQuery, LeaseStore};

/// Shortest session STS will issue.
const MIN_SESSION_SECS: u64 = 900;

/// Credentials issued for a lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendedCredentials {
    /// Temporary credentials for the principal role.
    pub credentials: SessionCredentials,
    /// Federated console sign-in URL.
    pub console_url: String,
}

/// Issues principal-role sessions for active leases.
#[derive(Debug, Clone)]
pub struct CredentialService {
    leases: Arc<dyn LeaseStore>,
    accounts: Arc<dyn AccountStore>,
    manager: Arc<dyn AccountManager>,
    session_ceiling: Duration,
}

impl CredentialService {
    /// Creates a service whose sessions never exceed `session_ceiling`.
    #[must_use]
    pub fn new(
        leases: Arc<dyn LeaseStore>,
        accounts: Arc<dyn AccountStore>,
        manager: Arc<dyn AccountManager>,
        session_ceiling: Duration,
    ) -> Self {
        Self {
            leases,
            accounts,
            manager,
            session_ceiling,
        }
    }

    /// Session length for a request, clamped to the ceiling.
    #[must_use]
    pub fn session_duration(&self, requested_secs: Option<u64>) -> Duration {
        let ceiling = self.session_ceiling.as_secs();
        let floor = MIN_SESSION_SECS.min(ceiling);
        Duration::from_secs(requested_secs.unwrap_or(ceiling).clamp(floor, ceiling))
    }

    /// Issues credentials for `lease_id`, or for the caller's own active
    /// lease when no ID is given.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::NotFound`] if no lease resolves.
    /// - [`GatewayError::Unauthorized`] if the lease is not `Active` or the
    ///   caller may not act on it.
    /// - [`GatewayError::Internal`] if the leased account is missing or a
    ///   cloud call fails.
    pub async fn authorize(
        &self,
        caller: &Caller,
        lease_id: Option<LeaseId>,
        requested_secs: Option<u64>,
    ) -> Result<VendedCredentials, GatewayError> {
        let lease = self.resolve(caller, lease_id).await?;

        if !lease.is_active() {
            return Err(GatewayError::Unauthorized(
                "Unable to authorize against non-active lease".to_string(),
            ));
        }
        if !caller.may_act_on(&lease) {
            return Err(GatewayError::Unauthorized(format!(
                "User {} does not have access to lease {}",
                caller.username.as_deref().unwrap_or_default(),
                lease.id
            )));
        }

        let account = match self.accounts.get(&lease.account_id).await {
            Ok(account) => account,
            Err(e) if e.is_not_found() => {
                return Err(GatewayError::internal(
                    "Account record is missing for the requested lease",
                    e,
                ));
            }
            Err(e) => return Err(e),
        };

        let session_name = caller
            .username
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(&lease.principal_id);
        let duration = self.session_duration(requested_secs);

        let credentials = self
            .manager
            .assume_role(&account.principal_role_arn, session_name, duration)
            .await
            .map_err(|e| {
                tracing::error!(role_arn = %account.principal_role_arn, error = %e, "role assumption failed");
                GatewayError::internal(
                    format!("Failed to assume role {}", account.principal_role_arn),
                    e,
                )
            })?;

        let console_url = self.manager.console_url(&credentials).await.map_err(|e| {
            tracing::error!(role_arn = %account.principal_role_arn, error = %e, "console url failed");
            GatewayError::internal(
                format!(
                    "Failed to generate console URL for {}",
                    account.principal_role_arn
                ),
                e,
            )
        })?;

        tracing::info!(
            target: "audit",
            access_key_id = %credentials.access_key_id,
            principal_id = %lease.principal_id,
            username = caller.username.as_deref().unwrap_or_default(),
            lease_id = %lease.id,
            "lease credentials issued"
        );

        Ok(VendedCredentials {
            credentials,
            console_url,
        })
    }

    async fn resolve(&self, caller: &Caller, lease_id: Option<LeaseId>) -> Result<Lease, GatewayError> {
        if let Some(id) = lease_id {
            return self.leases.get(id).await;
        }

        let username = caller.username.clone().unwrap_or_default();
        if username.is_empty() {
            return Err(GatewayError::not_found("lease for user", username));
        }

        let page = self
            .leases
            .list_page(&LeaseQuery::active_for_principal(&username))
            .await?;
        let mut active = page.items.into_iter();
        let Some(lease) = active.next() else {
            return Err(GatewayError::not_found("lease for user", username));
        };
        if let Some(other) = active.next() {
            tracing::error!(
                principal_id = %username,
                chosen = %lease.id,
                other = %other.id,
                "principal holds more than one active lease"
            );
        }
        Ok(lease)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::LeaseStatusReason;
    use crate::fixtures::Harness;
    use crate::service::NewLease;

    async fn leased(h: &Harness, principal: &str) -> Lease {
        h.ready_account(&format!("acct-{principal}")).await;
        let Ok(lease) = h
            .leases
            .create(
                &Caller::admin("ops"),
                NewLease {
                    principal_id: principal.into(),
                    budget_amount: 10.0,
                    ..NewLease::default()
                },
            )
            .await
        else {
            panic!("lease should be created");
        };
        lease
    }

    #[tokio::test]
    async fn principal_gets_credentials_for_own_lease() {
        let h = Harness::new().await;
        let lease = leased(&h, "p1").await;

        let Ok(vended) = h.credentials.authorize(&Caller::user("p1"), None, None).await else {
            panic!("credentials should be issued");
        };
        assert!(vended.credentials.expiration > chrono::Utc::now());
        assert!(vended.console_url.contains("SigninToken"));
        assert_eq!(
            h.manager.last_session_name().as_deref(),
            Some("p1")
        );

        let by_id = h
            .credentials
            .authorize(&Caller::user("p1"), Some(lease.id), None)
            .await;
        assert!(by_id.is_ok());
    }

    #[tokio::test]
    async fn other_users_are_unauthorized_but_admins_are_not() {
        let h = Harness::new().await;
        let lease = leased(&h, "p1").await;

        let result = h
            .credentials
            .authorize(&Caller::user("p2"), Some(lease.id), None)
            .await;
        assert!(matches!(result, Err(GatewayError::Unauthorized(_))));

        let admin = h
            .credentials
            .authorize(&Caller::admin("ops"), Some(lease.id), None)
            .await;
        assert!(admin.is_ok());
    }

    #[tokio::test]
    async fn inactive_lease_is_unauthorized() {
        let h = Harness::new().await;
        let lease = leased(&h, "p1").await;
        let _ = h.leases.end(lease.id, LeaseStatusReason::Destroyed).await;

        let result = h
            .credentials
            .authorize(&Caller::user("p1"), Some(lease.id), None)
            .await;
        let Err(GatewayError::Unauthorized(message)) = result else {
            panic!("expected unauthorized");
        };
        assert_eq!(message, "Unable to authorize against non-active lease");
    }

    #[tokio::test]
    async fn missing_lease_is_not_found() {
        let h = Harness::new().await;
        let result = h.credentials.authorize(&Caller::user("p1"), None, None).await;
        assert!(matches!(result, Err(GatewayError::NotFound { .. })));
        let result = h
            .credentials
            .authorize(&Caller::user("p1"), Some(LeaseId::new()), None)
            .await;
        assert!(matches!(result, Err(GatewayError::NotFound { .. })));
    }

    #[tokio::test]
    async fn missing_account_is_an_internal_error() {
        let h = Harness::new().await;
        let lease = leased(&h, "p1").await;
        h.remove_account_record(&lease.account_id).await;

        let result = h
            .credentials
            .authorize(&Caller::user("p1"), Some(lease.id), None)
            .await;
        let Err(GatewayError::Internal { message, .. }) = result else {
            panic!("expected internal error");
        };
        assert_eq!(message, "Account record is missing for the requested lease");
    }

    #[tokio::test]
    async fn duration_is_clamped_to_ceiling() {
        let h = Harness::new().await;
        assert_eq!(h.credentials.session_duration(None), Duration::from_secs(3600));
        assert_eq!(
            h.credentials.session_duration(Some(86_400)),
            Duration::from_secs(3600)
        );
        assert_eq!(
            h.credentials.session_duration(Some(60)),
            Duration::from_secs(900)
        );
        assert_eq!(
            h.credentials.session_duration(Some(1800)),
            Duration::from_secs(1800)
        );
    }
}
