//! DTOs for the change-feed, event ingestion, and metrics endpoints.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{ChangeRecord, CounterIncrements};
use crate::persistence::CounterSnapshot;

/// Request body for `POST /usage/changes`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UsageBatchRequest {
    /// Change records in feed order.
    pub records: Vec<ChangeRecord>,
}

/// Response body for `POST /usage/changes`.
#[derive(Debug, Serialize, ToSchema)]
pub struct UsageBatchResponse {
    /// Number of records handled.
    pub processed: usize,
}

/// Topic delivery envelope accepted by `POST /events/account`.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct TopicEnvelope {
    /// Topic the message was published to.
    #[serde(alias = "topicArn")]
    pub topic_arn: String,
    /// Serialized event payload.
    #[serde(alias = "message")]
    pub message: String,
}

/// Counter increments applied for one event.
#[derive(Debug, Serialize, ToSchema)]
pub struct AppliedIncrements {
    /// Signed adjustment per counter; empty when counters were rebuilt.
    pub applied: BTreeMap<String, i64>,
}

impl From<CounterIncrements> for AppliedIncrements {
    fn from(increments: CounterIncrements) -> Self {
        Self {
            applied: increments
                .into_iter()
                .map(|(counter, delta)| (counter.as_str().to_string(), delta))
                .collect(),
        }
    }
}

/// Response body for `GET /metrics/accounts`.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolMetricsResponse {
    /// Current value per counter.
    pub counts: BTreeMap<String, i64>,
    /// Time of the last full rebuild (epoch seconds).
    pub last_initialized: Option<i64>,
}

impl From<CounterSnapshot> for PoolMetricsResponse {
    fn from(snapshot: CounterSnapshot) -> Self {
        Self {
            counts: snapshot
                .counts
                .into_iter()
                .map(|(counter, value)| (counter.as_str().to_string(), value))
                .collect(),
            last_initialized: snapshot.last_initialized.map(|at| at.timestamp()),
        }
    }
}
