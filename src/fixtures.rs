//! Test doubles and a fully wired in-memory service graph.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};

use crate::app_state::AppState;
use crate::cloud::aws::{policy_hash, principal_policy_document, principal_role_arn};
use crate::cloud::broker::{BrokerMessage, Destination};
use crate::cloud::{AccountManager, CloudError, PrincipalAccess, SessionCredentials, Transport};
use crate::config::{EventEndpoints, GatewayConfig};
use crate::domain::{Account, AccountStatus, EventCategory};
use crate::persistence::memory::MemoryStore;
use crate::persistence::{AccountStore, Stores};
use crate::service::{AccountService, BudgetEnforcer, CredentialService, LeaseService, PoolMetrics};

/// Transport that records every message it is handed.
#[derive(Debug, Default)]
pub(crate) struct RecordingTransport {
    sent: Mutex<Vec<BrokerMessage>>,
    failing: AtomicBool,
}

impl RecordingTransport {
    /// A transport that rejects every message.
    pub(crate) fn failing() -> Self {
        let transport = Self::default();
        transport.set_failing(true);
        transport
    }

    /// Switches rejection of every message on or off.
    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Messages accepted so far, in order.
    pub(crate) fn sent(&self) -> Vec<BrokerMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn record(&self, destination: Destination, body: &str) -> Result<(), CloudError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CloudError::Closed(format!("{destination:?}")));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(BrokerMessage {
                destination,
                body: body.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn publish_to_topic(&self, topic: &str, message: &str) -> Result<(), CloudError> {
        self.record(Destination::Topic(topic.to_string()), message)
    }

    async fn send_to_queue(&self, queue_url: &str, message: &str) -> Result<(), CloudError> {
        self.record(Destination::Queue(queue_url.to_string()), message)
    }
}

/// Account manager answering from memory, with switchable failures.
#[derive(Debug, Default)]
pub(crate) struct ScriptedAccountManager {
    fail_provisioning: AtomicBool,
    fail_cleanup: AtomicBool,
    last_session_name: Mutex<Option<String>>,
}

impl ScriptedAccountManager {
    pub(crate) fn fail_provisioning(&self, fail: bool) {
        self.fail_provisioning.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_cleanup(&self, fail: bool) {
        self.fail_cleanup.store(fail, Ordering::SeqCst);
    }

    /// Session name of the most recent role assumption.
    pub(crate) fn last_session_name(&self) -> Option<String> {
        self.last_session_name.lock().ok().and_then(|name| name.clone())
    }
}

#[async_trait]
impl AccountManager for ScriptedAccountManager {
    async fn upsert_principal_access(
        &self,
        account: &Account,
    ) -> Result<PrincipalAccess, CloudError> {
        if self.fail_provisioning.load(Ordering::SeqCst) {
            return Err(CloudError::Sdk {
                service: "iam",
                message: "AccessDenied: not authorized to perform iam:CreateRole".to_string(),
            });
        }
        let document =
            principal_policy_document(account, &account.principal_role_arn, "TestPolicy");
        Ok(PrincipalAccess {
            role_arn: account.principal_role_arn.clone(),
            policy_hash: policy_hash(&document),
        })
    }

    async fn delete_principal_access(&self, _account: &Account) -> Result<(), CloudError> {
        if self.fail_cleanup.load(Ordering::SeqCst) {
            return Err(CloudError::Sdk {
                service: "iam",
                message: "dispatch failure: connection reset".to_string(),
            });
        }
        Ok(())
    }

    async fn assume_role(
        &self,
        _role_arn: &str,
        session_name: &str,
        duration: Duration,
    ) -> Result<SessionCredentials, CloudError> {
        if let Ok(mut last) = self.last_session_name.lock() {
            *last = Some(session_name.to_string());
        }
        let lifetime = TimeDelta::from_std(duration)
            .map_err(|e| CloudError::Config(e.to_string()))?;
        Ok(SessionCredentials {
            access_key_id: "ASIATESTKEY".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: "token".to_string(),
            expiration: Utc::now() + lifetime,
        })
    }

    async fn console_url(&self, credentials: &SessionCredentials) -> Result<String, CloudError> {
        Ok(format!(
            "https://signin.aws.amazon.com/federation?Action=login&SigninToken=signin-{}",
            credentials.access_key_id
        ))
    }
}

/// Every event endpoint named after its category.
pub(crate) fn category_endpoints() -> EventEndpoints {
    let name = |category: EventCategory| Some(category.as_str().to_string());
    EventEndpoints {
        account_created_topic: name(EventCategory::AccountCreate),
        account_updated_topic: name(EventCategory::AccountUpdate),
        account_deleted_topic: name(EventCategory::AccountDelete),
        reset_queue_url: name(EventCategory::AccountReset),
        lease_added_topic: name(EventCategory::LeaseCreate),
        lease_ended_topic: name(EventCategory::LeaseEnd),
        lease_updated_topic: name(EventCategory::LeaseUpdate),
    }
}

/// In-memory service graph with recording doubles at the cloud seam.
#[derive(Debug)]
pub(crate) struct Harness {
    pub(crate) leases: Arc<LeaseService>,
    pub(crate) accounts: Arc<AccountService>,
    pub(crate) budget: Arc<BudgetEnforcer>,
    pub(crate) credentials: Arc<CredentialService>,
    pub(crate) metrics: Arc<PoolMetrics>,
    pub(crate) store: Arc<MemoryStore>,
    pub(crate) transport: Arc<RecordingTransport>,
    pub(crate) manager: Arc<ScriptedAccountManager>,
    pub(crate) state: AppState,
}

impl Harness {
    pub(crate) async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub(crate) async fn with_config(adjust: impl FnOnce(&mut GatewayConfig)) -> Self {
        let mut config = GatewayConfig {
            endpoints: category_endpoints(),
            ..GatewayConfig::default()
        };
        adjust(&mut config);

        let store = Arc::new(MemoryStore::new());
        let recorder = Arc::new(RecordingTransport::default());
        let scripted = Arc::new(ScriptedAccountManager::default());
        let transport: Arc<dyn Transport> = Arc::clone(&recorder) as Arc<dyn Transport>;
        let manager: Arc<dyn AccountManager> = Arc::clone(&scripted) as Arc<dyn AccountManager>;

        let state = AppState::new(&config, &Stores::shared(&store), &transport, &manager);
        Self {
            leases: Arc::clone(&state.leases),
            accounts: Arc::clone(&state.accounts),
            budget: Arc::clone(&state.budget),
            credentials: Arc::clone(&state.credentials),
            metrics: Arc::clone(&state.metrics),
            store,
            transport: recorder,
            manager: scripted,
            state,
        }
    }

    /// Inserts a `Ready` account without provisioning or events.
    pub(crate) async fn ready_account(&self, id: &str) -> Account {
        let account = Account::admit(
            id.to_string(),
            format!("arn:aws:iam::{id}:role/Admin"),
            principal_role_arn(id, "DCEPrincipal"),
        )
        .with_status(AccountStatus::Ready);
        let inserted = AccountStore::insert(self.store.as_ref(), &account).await;
        assert!(inserted.is_ok(), "{inserted:?}");
        account
    }

    /// Current status of account `id`.
    pub(crate) async fn account_status(&self, id: &str) -> AccountStatus {
        match AccountStore::get(self.store.as_ref(), id).await {
            Ok(account) => account.account_status,
            Err(e) => panic!("account {id} should exist: {e}"),
        }
    }

    /// Drops account `id` from the store behind the services' backs.
    pub(crate) async fn remove_account_record(&self, id: &str) {
        let status = self.account_status(id).await;
        let removed = AccountStore::delete(self.store.as_ref(), id, status).await;
        assert!(removed.is_ok(), "{removed:?}");
    }

    /// Messages delivered to the destination of `category`.
    pub(crate) fn published(&self, category: EventCategory) -> Vec<BrokerMessage> {
        self.transport
            .sent()
            .into_iter()
            .filter(|message| match &message.destination {
                Destination::Topic(name) | Destination::Queue(name) => name == category.as_str(),
            })
            .collect()
    }
}
