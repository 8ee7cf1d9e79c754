//! Lease state machine: creation, termination, lookup, and listing.
//!
//! Creation claims an account with a `Ready → Leased` conditional
//! transition before the lease record is written, and hands the account
//! back if the write fails. Termination flips the lease `Active →
//! Inactive` conditionally and then releases the account according to the
//! configured reset policy.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use super::EventPublisher;
use crate::config::GatewayConfig;
use crate::domain::{
    Account, AccountStatus, Caller, DomainEvent, Lease, LeaseBudget, LeaseId, LeaseStatus,
    LeaseStatusReason,
};
use crate::error::GatewayError;
use crate::persistence::{AccountStore, LeaseQuery, LeaseStore, Page};

/// Limits and defaults applied to new leases.
#[derive(Debug, Clone, PartialEq)]
pub struct LeasePolicy {
    /// Largest budget a lease may request.
    pub max_budget_amount: f64,
    /// Longest span between now and a lease's expiry.
    pub max_lease_period: TimeDelta,
    /// Lease length when no expiry is requested.
    pub default_lease_length: TimeDelta,
    /// Currency when none is requested.
    pub default_currency: String,
    /// Ended leases send their account to `NotReady` for a reset.
    pub reset_on_lease_end: bool,
}

impl From<&GatewayConfig> for LeasePolicy {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            max_budget_amount: config.max_lease_budget_amount,
            max_lease_period: TimeDelta::seconds(config.max_lease_period_secs),
            default_lease_length: TimeDelta::days(config.default_lease_length_days),
            default_currency: config.default_budget_currency.clone(),
            reset_on_lease_end: config.reset_on_lease_end,
        }
    }
}

/// A lease creation request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewLease {
    /// Principal that will hold the lease.
    pub principal_id: String,
    /// Specific account to lease; any `Ready` account when `None`.
    pub account_id: Option<String>,
    /// Spend limit.
    pub budget_amount: f64,
    /// Currency of the budget.
    pub budget_currency: Option<String>,
    /// Budget notification recipients.
    pub budget_notification_emails: Vec<String>,
    /// Requested expiry.
    pub expires_on: Option<DateTime<Utc>>,
}

/// Orchestrates lease transitions and the account transitions they imply.
#[derive(Debug, Clone)]
pub struct LeaseService {
    leases: Arc<dyn LeaseStore>,
    accounts: Arc<dyn AccountStore>,
    publisher: Arc<EventPublisher>,
    policy: LeasePolicy,
}

impl LeaseService {
    /// Creates a new `LeaseService`.
    #[must_use]
    pub fn new(
        leases: Arc<dyn LeaseStore>,
        accounts: Arc<dyn AccountStore>,
        publisher: Arc<EventPublisher>,
        policy: LeasePolicy,
    ) -> Self {
        Self {
            leases,
            accounts,
            publisher,
            policy,
        }
    }

    /// Creates an `Active` lease on a `Ready` account.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::Unauthorized`] if a non-administrator requests a
    ///   lease for someone else.
    /// - [`GatewayError::ClientError`] if the budget or expiry is invalid.
    /// - [`GatewayError::Conflict`] if the principal already holds an
    ///   `Active` lease.
    /// - [`GatewayError::ServiceUnavailable`] if no account is `Ready`.
    pub async fn create(&self, caller: &Caller, request: NewLease) -> Result<Lease, GatewayError> {
        if request.principal_id.trim().is_empty() {
            return Err(GatewayError::ClientError(
                "principalId is required".to_string(),
            ));
        }
        if !caller.may_act_for(&request.principal_id) {
            return Err(GatewayError::Unauthorized(format!(
                "User {} may not create a lease for principal {}",
                caller.username.as_deref().unwrap_or_default(),
                request.principal_id
            )));
        }

        let now = Utc::now();
        let expires_on = self.validate(&request, now)?;

        let existing = self
            .leases
            .list_page(&LeaseQuery::active_for_principal(&request.principal_id))
            .await?;
        if let Some(lease) = existing.items.first() {
            return Err(GatewayError::Conflict(format!(
                "Principal already has an existing lease: {}",
                lease.account_id
            )));
        }

        let candidates = match &request.account_id {
            Some(id) => vec![self.accounts.get(id).await?],
            None => self.accounts.list(Some(AccountStatus::Ready)).await?,
        };

        let budget = LeaseBudget {
            amount: request.budget_amount,
            currency: request
                .budget_currency
                .clone()
                .unwrap_or_else(|| self.policy.default_currency.clone()),
            notification_emails: request.budget_notification_emails.clone(),
        };

        for candidate in candidates {
            let Some(account) = self.claim(&candidate).await? else {
                continue;
            };

            let lease = Lease::activate(
                request.principal_id.clone(),
                account.id.clone(),
                budget.clone(),
                expires_on,
            );
            if let Err(e) = self.leases.insert(&lease).await {
                self.unclaim(&account).await;
                return Err(e);
            }

            self.publisher
                .publish(&DomainEvent::account_updated(candidate, account))
                .await?;
            self.publisher
                .publish(&DomainEvent::LeaseCreated(lease.clone()))
                .await?;
            tracing::info!(
                lease_id = %lease.id,
                principal_id = %lease.principal_id,
                account_id = %lease.account_id,
                "lease created"
            );
            return Ok(lease);
        }

        Err(GatewayError::ServiceUnavailable(
            "No available accounts at this moment".to_string(),
        ))
    }

    fn validate(&self, request: &NewLease, now: DateTime<Utc>) -> Result<DateTime<Utc>, GatewayError> {
        if !request.budget_amount.is_finite() || request.budget_amount <= 0.0 {
            return Err(GatewayError::ClientError(format!(
                "Requested lease has an invalid budget amount of {}",
                request.budget_amount
            )));
        }

        let expires_on = request
            .expires_on
            .unwrap_or(now + self.policy.default_lease_length);
        if expires_on < now {
            return Err(GatewayError::ClientError(format!(
                "Requested lease has a desired expiry date less than today: {}",
                expires_on.timestamp()
            )));
        }

        if request.budget_amount > self.policy.max_budget_amount {
            return Err(GatewayError::ClientError(format!(
                "Requested lease has a budget amount of {}, which is greater than max lease budget amount of {}",
                request.budget_amount, self.policy.max_budget_amount
            )));
        }

        let max_end = now + self.policy.max_lease_period;
        if expires_on > max_end {
            return Err(GatewayError::ClientError(format!(
                "Requested lease has a budget expires on of {}, which is greater than max lease period of {}",
                expires_on.timestamp(),
                max_end.timestamp()
            )));
        }
        Ok(expires_on)
    }

    /// Moves `candidate` from `Ready` to `Leased`. Returns `None` if another
    /// caller got there first.
    async fn claim(&self, candidate: &Account) -> Result<Option<Account>, GatewayError> {
        if candidate.account_status != AccountStatus::Ready {
            return Ok(None);
        }
        let leased = candidate.with_status(AccountStatus::Leased);
        match self
            .accounts
            .compare_and_swap(AccountStatus::Ready, &leased)
            .await
        {
            Ok(_) => Ok(Some(leased)),
            Err(GatewayError::Conflict(reason)) => {
                tracing::debug!(account_id = %candidate.id, %reason, "account claimed concurrently");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn unclaim(&self, account: &Account) {
        let ready = account.with_status(AccountStatus::Ready);
        if let Err(e) = self
            .accounts
            .compare_and_swap(AccountStatus::Leased, &ready)
            .await
        {
            tracing::error!(account_id = %account.id, error = %e, "failed to roll back account claim");
        }
    }

    /// Ends the lease `id` on behalf of `caller`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotFound`] if the lease does not exist and
    /// [`GatewayError::Unauthorized`] if the caller may not act on it.
    pub async fn end_for(
        &self,
        caller: &Caller,
        id: LeaseId,
        reason: LeaseStatusReason,
    ) -> Result<Lease, GatewayError> {
        let lease = self.leases.get(id).await?;
        authorize(caller, &lease)?;
        self.finish(lease, reason).await
    }

    /// Ends the `Active` lease held by `principal_id` on `account_id`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::ClientError`] if the pair has no lease or
    /// no `Active` lease, and [`GatewayError::Unauthorized`] if the caller
    /// may not act for the principal.
    pub async fn end_pair(
        &self,
        caller: &Caller,
        principal_id: &str,
        account_id: &str,
        reason: LeaseStatusReason,
    ) -> Result<Lease, GatewayError> {
        if !caller.may_act_for(principal_id) {
            return Err(unauthorized(caller, principal_id));
        }
        let query = LeaseQuery {
            principal_id: Some(principal_id.to_string()),
            account_id: Some(account_id.to_string()),
            ..LeaseQuery::default()
        };
        let mut found = false;
        let mut active = None;
        self.list_pages(query, |page| {
            found |= !page.is_empty();
            active = page.iter().find(|l| l.is_active()).cloned();
            active.is_none()
        })
        .await?;

        match active {
            Some(lease) => self.finish(lease, reason).await,
            None if found => Err(GatewayError::ClientError(format!(
                "Lease for principal {principal_id} and account {account_id} is not active"
            ))),
            None => Err(GatewayError::ClientError(format!(
                "No leases found for principal {principal_id} and account {account_id}"
            ))),
        }
    }

    /// Ends lease `id` without an authorization check. Used by budget
    /// enforcement and the expiry sweep.
    ///
    /// Already-`Inactive` leases are returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotFound`] if the lease does not exist and
    /// [`GatewayError::ClientError`] if `reason` cannot end a lease.
    pub async fn end(&self, id: LeaseId, reason: LeaseStatusReason) -> Result<Lease, GatewayError> {
        let lease = self.leases.get(id).await?;
        self.finish(lease, reason).await
    }

    async fn finish(&self, lease: Lease, reason: LeaseStatusReason) -> Result<Lease, GatewayError> {
        if !reason.ends_lease() {
            return Err(GatewayError::ClientError(format!(
                "Lease status reason {reason} cannot end a lease"
            )));
        }
        if !lease.is_active() {
            return Ok(lease);
        }

        let ended = lease.ended(reason);
        match self.leases.compare_and_swap(LeaseStatus::Active, &ended).await {
            Ok(_) => {}
            Err(GatewayError::Conflict(_)) => {
                // Someone else ended it first; their reason stands.
                return self.leases.get(lease.id).await;
            }
            Err(e) => return Err(e),
        }
        tracing::info!(
            lease_id = %ended.id,
            principal_id = %ended.principal_id,
            account_id = %ended.account_id,
            reason = %reason,
            "lease ended"
        );

        let released = self.release(&ended).await?;
        self.publisher
            .publish(&DomainEvent::LeaseEnded(ended.clone()))
            .await?;
        if let Some((old, new)) = released {
            let needs_reset = new.account_status == AccountStatus::NotReady;
            self.publisher
                .publish(&DomainEvent::account_updated(old, new.clone()))
                .await?;
            if needs_reset {
                self.publisher.publish(&DomainEvent::AccountReset(new)).await?;
            }
        }
        Ok(ended)
    }

    /// Hands the lease's account back to the pool. Returns the account
    /// before and after, or `None` if it was not `Leased`.
    async fn release(&self, lease: &Lease) -> Result<Option<(Account, Account)>, GatewayError> {
        let account = match self.accounts.get(&lease.account_id).await {
            Ok(account) => account,
            Err(e) if e.is_not_found() => {
                tracing::error!(
                    lease_id = %lease.id,
                    account_id = %lease.account_id,
                    "ended lease references a missing account"
                );
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let target = if self.policy.reset_on_lease_end {
            AccountStatus::NotReady
        } else {
            AccountStatus::Ready
        };
        let released = account.with_status(target);
        match self
            .accounts
            .compare_and_swap(AccountStatus::Leased, &released)
            .await
        {
            Ok(previous) => Ok(Some((previous, released))),
            Err(GatewayError::Conflict(reason)) => {
                tracing::warn!(account_id = %account.id, %reason, "account was not leased at lease end");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Fetches lease `id` on behalf of `caller`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotFound`] if the lease does not exist and
    /// [`GatewayError::Unauthorized`] if the caller may not read it.
    pub async fn get(&self, caller: &Caller, id: LeaseId) -> Result<Lease, GatewayError> {
        let lease = self.leases.get(id).await?;
        authorize(caller, &lease)?;
        Ok(lease)
    }

    /// Returns one page of leases visible to `caller`.
    ///
    /// Non-administrators only see their own leases; a query for another
    /// principal is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Unauthorized`] if the query reaches beyond
    /// the caller's own leases.
    pub async fn list(&self, caller: &Caller, query: LeaseQuery) -> Result<Page<Lease>, GatewayError> {
        let mut query = query.clamped();
        if !caller.is_admin {
            let Some(username) = caller.username.clone() else {
                return Err(GatewayError::Unauthorized(
                    "Listing leases requires an authenticated caller".to_string(),
                ));
            };
            match &query.principal_id {
                Some(principal) if principal != &username => {
                    return Err(unauthorized(caller, principal));
                }
                _ => query.principal_id = Some(username),
            }
        }
        self.leases.list_page(&query).await
    }

    /// Walks every page matching `query`, calling `visitor` once per page
    /// until it returns `false` or the pages run out.
    ///
    /// # Errors
    ///
    /// Returns the first store error.
    pub async fn list_pages<F>(&self, mut query: LeaseQuery, mut visitor: F) -> Result<(), GatewayError>
    where
        F: FnMut(&[Lease]) -> bool + Send,
    {
        loop {
            let page = self.leases.list_page(&query).await?;
            if !visitor(&page.items) {
                return Ok(());
            }
            match page.next {
                Some(next) => query.after = Some(next),
                None => return Ok(()),
            }
        }
    }

    /// Returns every `Active` lease held by `principal_id`.
    ///
    /// # Errors
    ///
    /// Returns the first store error.
    pub async fn active_for_principal(&self, principal_id: &str) -> Result<Vec<Lease>, GatewayError> {
        let mut leases = Vec::new();
        self.list_pages(LeaseQuery::active_for_principal(principal_id), |page| {
            leases.extend_from_slice(page);
            true
        })
        .await?;
        Ok(leases)
    }

    /// Ends every `Active` lease whose expiry is at or before `now` with
    /// reason `Expired`. Returns the number of leases ended.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Multi`] listing every lease that could not
    /// be ended; the others are still ended.
    pub async fn end_expired(&self, now: DateTime<Utc>) -> Result<usize, GatewayError> {
        let query = LeaseQuery {
            status: Some(LeaseStatus::Active),
            ..LeaseQuery::default()
        };
        let mut expired = Vec::new();
        self.list_pages(query, |page| {
            expired.extend(page.iter().filter(|l| l.expires_on <= now).map(|l| l.id));
            true
        })
        .await?;

        let mut errors = Vec::new();
        let mut ended = 0;
        for id in expired {
            match self.end(id, LeaseStatusReason::Expired).await {
                Ok(_) => ended += 1,
                Err(e) => errors.push(e),
            }
        }
        GatewayError::collect("Failed to end expired leases", errors)?;
        Ok(ended)
    }

    /// Runs [`LeaseService::end_expired`] every `period` until the task is
    /// dropped.
    pub async fn run_expiry_sweep(self: Arc<Self>, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.end_expired(Utc::now()).await {
                Ok(0) => tracing::trace!("no expired leases"),
                Ok(count) => tracing::info!(count, "expired leases ended"),
                Err(e) => tracing::error!(error = %e, "lease expiry sweep failed"),
            }
        }
    }
}

fn authorize(caller: &Caller, lease: &Lease) -> Result<(), GatewayError> {
    if caller.may_act_on(lease) {
        Ok(())
    } else {
        Err(GatewayError::Unauthorized(format!(
            "User {} does not have access to lease {}",
            caller.username.as_deref().unwrap_or_default(),
            lease.id
        )))
    }
}

fn unauthorized(caller: &Caller, principal_id: &str) -> GatewayError {
    GatewayError::Unauthorized(format!(
        "User {} may not act for principal {principal_id}",
        caller.username.as_deref().unwrap_or_default()
    ))
}
