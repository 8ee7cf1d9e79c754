//! Cloud-provider seam.
//!
//! Two capabilities are consumed by the services:
//!
//! - [`AccountManager`]: role assumption, principal-role provisioning, and
//!   console sign-in URLs.
//! - [`Transport`]: delivery of serialized events to a named topic or
//!   queue.
//!
//! [`aws::AwsClient`] implements both on the AWS SDK;
//! [`broker::InProcessBroker`] implements [`Transport`] inside the process.

pub mod aws;
pub mod broker;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::Account;

/// Failure of a cloud call.
#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    /// A required setting is absent.
    #[error("cloud configuration is incomplete: {0}")]
    Config(String),

    /// An AWS SDK call failed.
    #[error("{service} call failed: {message}")]
    Sdk {
        /// Service that was called.
        service: &'static str,
        /// Error chain reported by the SDK.
        message: String,
    },

    /// The request could not be sent or the response not read.
    #[error("request to {service} failed: {message}")]
    Http {
        /// Service that was called.
        service: &'static str,
        /// Transport failure detail.
        message: String,
    },

    /// The service answered with a non-success status.
    #[error("{service} returned {status}: {body}")]
    Status {
        /// Service that was called.
        service: &'static str,
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The response body did not have the expected shape.
    #[error("unexpected response from {service}: {message}")]
    Decode {
        /// Service that was called.
        service: &'static str,
        /// Decode failure detail.
        message: String,
    },

    /// The in-process destination has been shut down.
    #[error("destination {0} is closed")]
    Closed(String),
}

/// Temporary credentials for an assumed role.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredentials {
    /// Access key ID.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
    /// Session token.
    pub session_token: String,
    /// Time the credentials stop working.
    pub expiration: DateTime<Utc>,
}

impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &"<redacted>")
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// Result of provisioning the principal role in an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalAccess {
    /// ARN of the principal role.
    pub role_arn: String,
    /// Fingerprint of the attached policy document.
    pub policy_hash: String,
}

/// Account-level cloud operations.
#[async_trait]
pub trait AccountManager: Send + Sync + fmt::Debug {
    /// Creates or updates the principal role and its policy in `account`,
    /// acting through the account's admin role.
    ///
    /// # Errors
    ///
    /// Returns a [`CloudError`] if any provisioning call fails.
    async fn upsert_principal_access(
        &self,
        account: &Account,
    ) -> Result<PrincipalAccess, CloudError>;

    /// Removes the principal role and its policy from `account`.
    ///
    /// # Errors
    ///
    /// Returns a [`CloudError`] if a removal call fails.
    async fn delete_principal_access(&self, account: &Account) -> Result<(), CloudError>;

    /// Assumes `role_arn` for `duration`.
    ///
    /// # Errors
    ///
    /// Returns a [`CloudError`] if the role cannot be assumed.
    async fn assume_role(
        &self,
        role_arn: &str,
        session_name: &str,
        duration: Duration,
    ) -> Result<SessionCredentials, CloudError>;

    /// Derives a console sign-in URL for an assumed session.
    ///
    /// # Errors
    ///
    /// Returns a [`CloudError`] if the federation endpoint rejects the
    /// session.
    async fn console_url(&self, credentials: &SessionCredentials) -> Result<String, CloudError>;
}

/// Delivery of serialized events.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Publishes `message` to a fan-out topic.
    ///
    /// # Errors
    ///
    /// Returns a [`CloudError`] if the topic rejects the message.
    async fn publish_to_topic(&self, topic: &str, message: &str) -> Result<(), CloudError>;

    /// Sends `message` to a point-to-point queue.
    ///
    /// # Errors
    ///
    /// Returns a [`CloudError`] if the queue rejects the message.
    async fn send_to_queue(&self, queue_url: &str, message: &str) -> Result<(), CloudError>;
}

/// Truncates a role session name to the 64 characters STS accepts and
/// replaces characters outside `[\w+=,.@-]`.
#[must_use]
pub fn role_session_name(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || "_+=,.@-".contains(c) {
                c
            } else {
                '-'
            }
        })
        .take(64)
        .collect()
}
