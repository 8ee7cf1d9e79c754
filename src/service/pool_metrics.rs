//! Pool metrics aggregation.
//!
//! Account lifecycle events arrive as topic messages and become signed
//! counter increments (see [`status_increments`]). Counters are adjusted
//! one at a time through [`CounterStore::increment`]; the full scan in
//! [`PoolMetrics::rebuild`] runs only when counters are missing, stale,
//! or the consumer lost messages.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::broadcast;

use crate::cloud::broker::BrokerMessage;
use crate::config::GatewayConfig;
use crate::domain::pool_counter::{count_accounts, status_increments};
use crate::domain::{Account, AccountUpdate, CounterIncrements};
use crate::error::GatewayError;
use crate::persistence::{AccountStore, CounterSnapshot, CounterStore};

/// Topics carrying account lifecycle events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsTopics {
    /// Topic of `AccountCreated` messages.
    pub created: Option<String>,
    /// Topic of `AccountUpdated` messages.
    pub updated: Option<String>,
    /// Topic of `AccountDeleted` messages.
    pub deleted: Option<String>,
}

impl From<&GatewayConfig> for MetricsTopics {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            created: config.endpoints.account_created_topic.clone(),
            updated: config.endpoints.account_updated_topic.clone(),
            deleted: config.endpoints.account_deleted_topic.clone(),
        }
    }
}

impl MetricsTopics {
    /// Returns `true` if `topic` is one of the account topics.
    #[must_use]
    pub fn contains(&self, topic: &str) -> bool {
        [&self.created, &self.updated, &self.deleted]
            .into_iter()
            .any(|t| t.as_deref() == Some(topic))
    }
}

/// Maintains per-status account counters.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    accounts: Arc<dyn AccountStore>,
    counters: Arc<dyn CounterStore>,
    topics: MetricsTopics,
    max_age: TimeDelta,
}

impl PoolMetrics {
    /// Creates an aggregator that rebuilds counters older than `max_age`.
    #[must_use]
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        counters: Arc<dyn CounterStore>,
        topics: MetricsTopics,
        max_age: TimeDelta,
    ) -> Self {
        Self {
            accounts,
            counters,
            topics,
            max_age,
        }
    }

    /// Applies one account lifecycle message published on `topic`.
    ///
    /// Returns the increments applied; empty when the counters were
    /// rebuilt instead or the message changes no status.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::ClientError`] if the topic is not an account
    ///   topic or the message does not decode.
    /// - [`GatewayError::Persistence`] on store failure.
    pub async fn handle_message(
        &self,
        topic: &str,
        message: &str,
    ) -> Result<CounterIncrements, GatewayError> {
        let increments = self.decode(topic, message)?;

        if self.ensure_fresh(Utc::now()).await? {
            return Ok(CounterIncrements::new());
        }

        for (counter, delta) in &increments {
            if *delta == 0 {
                continue;
            }
            let value = self.counters.increment(*counter, *delta).await?;
            tracing::debug!(counter = counter.as_str(), delta, value, "pool counter adjusted");
        }
        Ok(increments)
    }

    fn decode(&self, topic: &str, message: &str) -> Result<CounterIncrements, GatewayError> {
        let malformed = |e: serde_json::Error| {
            GatewayError::ClientError(format!("Failed to decode account event: {e}"))
        };

        if self.topics.created.as_deref() == Some(topic) {
            let account: Account = serde_json::from_str(message).map_err(malformed)?;
            Ok(status_increments(None, Some(&account)))
        } else if self.topics.updated.as_deref() == Some(topic) {
            let update: AccountUpdate = serde_json::from_str(message).map_err(malformed)?;
            Ok(status_increments(
                update.old_account.as_ref(),
                update.new_account.as_ref(),
            ))
        } else if self.topics.deleted.as_deref() == Some(topic) {
            let account: Account = serde_json::from_str(message).map_err(malformed)?;
            Ok(status_increments(Some(&account), None))
        } else {
            Err(GatewayError::ClientError(format!(
                "Unsupported event topic {topic}"
            )))
        }
    }

    /// Rebuilds the counters if any is missing or they were last rebuilt
    /// more than the maximum age before `now`. Returns `true` on rebuild.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Persistence`] on store failure.
    pub async fn ensure_fresh(&self, now: DateTime<Utc>) -> Result<bool, GatewayError> {
        let snapshot = self.counters.snapshot().await?;
        let stale = snapshot
            .last_initialized
            .is_none_or(|at| now - at > self.max_age);
        if !snapshot.is_incomplete() && !stale {
            return Ok(false);
        }
        self.rebuild(now).await?;
        Ok(true)
    }

    /// Recomputes every counter from a full scan of account records.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Persistence`] on store failure.
    pub async fn rebuild(&self, now: DateTime<Utc>) -> Result<CounterIncrements, GatewayError> {
        let accounts = self.accounts.list(None).await?;
        let counts = count_accounts(&accounts);
        self.counters.reinitialize(&counts, now).await?;
        tracing::info!(accounts = accounts.len(), "pool counters rebuilt");
        Ok(counts)
    }

    /// Returns the current counters, rebuilding them first if needed.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Persistence`] on store failure.
    pub async fn current(&self) -> Result<CounterSnapshot, GatewayError> {
        self.ensure_fresh(Utc::now()).await?;
        self.counters.snapshot().await
    }

    /// Consumes account topic messages from the in-process broker until
    /// the channel closes. Lost messages trigger a rebuild.
    pub async fn run(self: Arc<Self>, mut receiver: broadcast::Receiver<BrokerMessage>) {
        tracing::info!("pool metrics consumer started");
        loop {
            match receiver.recv().await {
                Ok(message) => {
                    let Some(topic) = message.destination.topic() else {
                        continue;
                    };
                    if !self.topics.contains(topic) {
                        continue;
                    }
                    if let Err(e) = self.handle_message(topic, &message.body).await {
                        tracing::error!(topic, error = %e, "failed to apply account event");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(lagged = n, "pool metrics consumer lagged behind broker");
                    if let Err(e) = self.rebuild(Utc::now()).await {
                        tracing::error!(error = %e, "failed to rebuild pool counters");
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        tracing::info!("pool metrics consumer stopped");
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{AccountStatus, EventCategory, PoolCounter};
    use crate::fixtures::Harness;

    fn count(snapshot: &CounterSnapshot, counter: PoolCounter) -> i64 {
        snapshot.counts.get(&counter).copied().unwrap_or_default()
    }

    async fn replay(h: &Harness, category: EventCategory) {
        for message in h.published(category) {
            let Some(topic) = message.destination.topic() else {
                panic!("account events go to topics");
            };
            let result = h.metrics.handle_message(topic, &message.body).await;
            assert!(result.is_ok(), "{result:?}");
        }
    }

    #[tokio::test]
    async fn creates_and_deletes_keep_totals_consistent() {
        let h = Harness::with_config(|c| c.endpoints.reset_queue_url = None).await;
        let _ = h.metrics.rebuild(Utc::now()).await;

        for i in 0..5 {
            let id = format!("a{i}");
            assert!(h.accounts.create(&id, "arn:aws:iam::1:role/Admin").await.is_ok());
        }
        for i in 0..2 {
            assert!(h.accounts.delete(&format!("a{i}")).await.is_ok());
        }
        replay(&h, EventCategory::AccountCreate).await;
        replay(&h, EventCategory::AccountUpdate).await;
        replay(&h, EventCategory::AccountDelete).await;

        let Ok(snapshot) = h.metrics.current().await else {
            panic!("snapshot should load");
        };
        assert_eq!(count(&snapshot, PoolCounter::TotalAccountsCount), 3);
        assert_eq!(count(&snapshot, PoolCounter::ReadyAccountsCount), 3);
        let per_status: i64 = PoolCounter::ALL
            .into_iter()
            .filter(|c| *c != PoolCounter::TotalAccountsCount)
            .map(|c| count(&snapshot, c))
            .sum();
        assert_eq!(per_status, 3);
    }

    #[tokio::test]
    async fn missing_counters_are_rebuilt_instead_of_incremented() {
        let h = Harness::new().await;
        h.ready_account("a1").await;
        h.ready_account("a2").await;

        let account = Account::admit("a3".into(), "admin".into(), "principal".into());
        let Ok(body) = serde_json::to_string(&account) else {
            panic!("account should serialize");
        };
        let Ok(applied) = h
            .metrics
            .handle_message(EventCategory::AccountCreate.as_str(), &body)
            .await
        else {
            panic!("message should apply");
        };
        assert!(applied.is_empty());

        let Ok(snapshot) = h.metrics.current().await else {
            panic!("snapshot should load");
        };
        assert_eq!(count(&snapshot, PoolCounter::TotalAccountsCount), 2);
        assert!(snapshot.last_initialized.is_some());
    }

    #[tokio::test]
    async fn status_change_moves_one_count() {
        let h = Harness::new().await;
        h.ready_account("a1").await;
        let _ = h.metrics.rebuild(Utc::now()).await;

        let old = Account::admit("a1".into(), "admin".into(), "principal".into())
            .with_status(AccountStatus::Ready);
        let new = old.with_status(AccountStatus::Leased);
        let Ok(body) = crate::domain::DomainEvent::account_updated(old, new).to_message() else {
            panic!("event should serialize");
        };
        let Ok(applied) = h
            .metrics
            .handle_message(EventCategory::AccountUpdate.as_str(), &body)
            .await
        else {
            panic!("message should apply");
        };
        assert_eq!(applied.get(&PoolCounter::ReadyAccountsCount), Some(&-1));
        assert_eq!(applied.get(&PoolCounter::LeasedAccountsCount), Some(&1));

        let Ok(snapshot) = h.metrics.current().await else {
            panic!("snapshot should load");
        };
        assert_eq!(count(&snapshot, PoolCounter::ReadyAccountsCount), 0);
        assert_eq!(count(&snapshot, PoolCounter::LeasedAccountsCount), 1);
        assert_eq!(count(&snapshot, PoolCounter::TotalAccountsCount), 1);
    }

    #[tokio::test]
    async fn stale_counters_are_rebuilt() {
        let h = Harness::new().await;
        h.ready_account("a1").await;
        let long_ago = Utc::now() - TimeDelta::days(30);
        let _ = h.metrics.rebuild(long_ago).await;

        assert_eq!(h.metrics.ensure_fresh(Utc::now()).await.ok(), Some(true));
        assert_eq!(h.metrics.ensure_fresh(Utc::now()).await.ok(), Some(false));
    }

    #[tokio::test]
    async fn unknown_topic_and_bad_payload_are_rejected() {
        let h = Harness::new().await;
        let result = h.metrics.handle_message("elsewhere", "{}").await;
        assert!(matches!(result, Err(GatewayError::ClientError(_))));
        let result = h
            .metrics
            .handle_message(EventCategory::AccountCreate.as_str(), "not json")
            .await;
        assert!(matches!(result, Err(GatewayError::ClientError(_))));
    }

    #[tokio::test]
    async fn consumer_applies_broker_messages() {
        let h = Harness::new().await;
        let broker = crate::cloud::broker::InProcessBroker::new(16);
        let receiver = broker.subscribe();
        let task = tokio::spawn(Arc::clone(&h.metrics).run(receiver));

        let _ = h.metrics.rebuild(Utc::now()).await;
        h.ready_account("a1").await;
        let account = Account::admit("a1".into(), "admin".into(), "principal".into())
            .with_status(AccountStatus::Ready);
        let Ok(body) = serde_json::to_string(&account) else {
            panic!("account should serialize");
        };
        let _ = crate::cloud::Transport::publish_to_topic(
            &broker,
            EventCategory::AccountCreate.as_str(),
            &body,
        )
        .await;
        drop(broker);
        let _ = task.await;

        let Ok(snapshot) = h.metrics.current().await else {
            panic!("snapshot should load");
        };
        assert_eq!(count(&snapshot, PoolCounter::TotalAccountsCount), 1);
        assert_eq!(count(&snapshot, PoolCounter::ReadyAccountsCount), 1);
    }
}
