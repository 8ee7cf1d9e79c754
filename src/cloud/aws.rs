//! AWS client for STS, IAM, SNS, SQS, and console federation.
//!
//! Service calls go through the AWS SDK. Principal provisioning acts as the
//! account's admin role: each operation assumes that role through STS and
//! builds an IAM client on the returned session. The federation sign-in
//! token endpoint has no SDK and is called with `reqwest`.

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_iam::config::Credentials;
use aws_sdk_iam::operation::create_role::CreateRoleError;
use aws_sdk_iam::operation::delete_role::DeleteRoleError;
use aws_sdk_iam::operation::delete_role_policy::DeleteRolePolicyError;
use aws_sdk_sts::error::DisplayErrorContext;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use super::{
    AccountManager, CloudError, PrincipalAccess, SessionCredentials, Transport, role_session_name,
};
use crate::config::GatewayConfig;
use crate::domain::Account;

const PROVISIONING_SESSION: &str = "lease-gateway-provisioning";
const PROVISIONING_DURATION: Duration = Duration::from_secs(900);
const MAX_ROLE_SESSION_SECS: u64 = 43_200;

/// Settings for [`AwsClient`] drawn from the gateway configuration.
#[derive(Debug, Clone)]
pub struct AwsSettings {
    /// Region for STS, SNS, and SQS.
    pub region: String,
    /// Principal role name provisioned in each account.
    pub principal_role_name: String,
    /// Inline policy name attached to the principal role.
    pub principal_policy_name: String,
    /// ARN trusted to assume the principal role.
    pub principal_trusted_arn: Option<String>,
    /// `MaxSessionDuration` of the principal role, in seconds.
    pub principal_max_session_secs: i32,
    /// Federation endpoint.
    pub federation_endpoint: String,
    /// Issuer passed to the federation login action.
    pub federation_issuer: String,
    /// Console landing page.
    pub console_destination_url: String,
}

impl From<&GatewayConfig> for AwsSettings {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            region: config.region.clone(),
            principal_role_name: config.principal_role_name.clone(),
            principal_policy_name: config.principal_policy_name.clone(),
            principal_trusted_arn: config.principal_trusted_arn.clone(),
            principal_max_session_secs: i32::try_from(
                config
                    .principal_session_duration_secs
                    .clamp(3600, MAX_ROLE_SESSION_SECS),
            )
            .unwrap_or(i32::MAX),
            federation_endpoint: config.federation_endpoint.clone(),
            federation_issuer: config.federation_issuer.clone(),
            console_destination_url: config.console_destination_url.clone(),
        }
    }
}

/// AWS SDK clients for the services the gateway talks to.
#[derive(Debug, Clone)]
pub struct AwsClient {
    sdk: SdkConfig,
    sts: aws_sdk_sts::Client,
    sns: aws_sdk_sns::Client,
    sqs: aws_sdk_sqs::Client,
    http: reqwest::Client,
    settings: AwsSettings,
}

impl AwsClient {
    /// Creates a client on an already loaded SDK configuration.
    #[must_use]
    pub fn new(sdk: &SdkConfig, settings: AwsSettings) -> Self {
        Self {
            sdk: sdk.clone(),
            sts: aws_sdk_sts::Client::new(sdk),
            sns: aws_sdk_sns::Client::new(sdk),
            sqs: aws_sdk_sqs::Client::new(sdk),
            http: reqwest::Client::new(),
            settings,
        }
    }

    /// Loads the SDK configuration (default credential chain, configured
    /// region) and creates a client.
    pub async fn from_config(config: &GatewayConfig) -> Self {
        let sdk = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;
        Self::new(&sdk, AwsSettings::from(config))
    }

    /// IAM client acting as the admin role of `account`.
    async fn admin_iam(&self, account: &Account) -> Result<aws_sdk_iam::Client, CloudError> {
        let session = self
            .assume_role(
                &account.admin_role_arn,
                PROVISIONING_SESSION,
                PROVISIONING_DURATION,
            )
            .await?;
        let credentials = Credentials::new(
            session.access_key_id,
            session.secret_access_key,
            Some(session.session_token),
            Some(SystemTime::from(session.expiration)),
            "lease-gateway-admin-role",
        );
        let config = aws_sdk_iam::config::Builder::from(&self.sdk)
            .credentials_provider(credentials)
            .build();
        Ok(aws_sdk_iam::Client::from_conf(config))
    }
}

#[async_trait]
impl AccountManager for AwsClient {
    async fn upsert_principal_access(
        &self,
        account: &Account,
    ) -> Result<PrincipalAccess, CloudError> {
        let trusted = self.settings.principal_trusted_arn.as_deref().ok_or_else(|| {
            CloudError::Config("PRINCIPAL_TRUSTED_ARN is not set".to_string())
        })?;
        let iam = self.admin_iam(account).await?;
        let role_name = self.settings.principal_role_name.as_str();
        let role_arn = principal_role_arn(&account.id, role_name);
        let trust = trust_policy_document(trusted);

        let created = iam
            .create_role()
            .role_name(role_name)
            .assume_role_policy_document(&trust)
            .max_session_duration(self.settings.principal_max_session_secs)
            .description("Role assumed by lease principals")
            .send()
            .await;
        match created {
            Ok(_) => tracing::info!(account_id = %account.id, role_name, "principal role created"),
            Err(e)
                if e
                    .as_service_error()
                    .is_some_and(CreateRoleError::is_entity_already_exists_exception) =>
            {
                iam.update_assume_role_policy()
                    .role_name(role_name)
                    .policy_document(&trust)
                    .send()
                    .await
                    .map_err(|e| sdk_error("iam", e))?;
                tracing::debug!(account_id = %account.id, role_name, "principal role already present");
            }
            Err(e) => return Err(sdk_error("iam", e)),
        }

        let policy =
            principal_policy_document(account, &role_arn, &self.settings.principal_policy_name);
        iam.put_role_policy()
            .role_name(role_name)
            .policy_name(&self.settings.principal_policy_name)
            .policy_document(&policy)
            .send()
            .await
            .map_err(|e| sdk_error("iam", e))?;

        Ok(PrincipalAccess {
            role_arn,
            policy_hash: policy_hash(&policy),
        })
    }

    async fn delete_principal_access(&self, account: &Account) -> Result<(), CloudError> {
        let iam = self.admin_iam(account).await?;
        let role_name = self.settings.principal_role_name.as_str();

        let detached = iam
            .delete_role_policy()
            .role_name(role_name)
            .policy_name(&self.settings.principal_policy_name)
            .send()
            .await;
        if let Err(e) = detached
            && !e
                .as_service_error()
                .is_some_and(DeleteRolePolicyError::is_no_such_entity_exception)
        {
            return Err(sdk_error("iam", e));
        }

        let deleted = iam.delete_role().role_name(role_name).send().await;
        if let Err(e) = deleted
            && !e
                .as_service_error()
                .is_some_and(DeleteRoleError::is_no_such_entity_exception)
        {
            return Err(sdk_error("iam", e));
        }
        Ok(())
    }

    async fn assume_role(
        &self,
        role_arn: &str,
        session_name: &str,
        duration: Duration,
    ) -> Result<SessionCredentials, CloudError> {
        let seconds = i32::try_from(duration.as_secs()).map_err(|_| {
            CloudError::Config(format!("session duration {duration:?} is out of range"))
        })?;
        let output = self
            .sts
            .assume_role()
            .role_arn(role_arn)
            .role_session_name(role_session_name(session_name))
            .duration_seconds(seconds)
            .send()
            .await
            .map_err(|e| sdk_error("sts", e))?;
        let credentials = output.credentials().ok_or_else(|| CloudError::Decode {
            service: "sts",
            message: "AssumeRole returned no credentials".to_string(),
        })?;
        session_credentials(credentials)
    }

    async fn console_url(&self, credentials: &SessionCredentials) -> Result<String, CloudError> {
        let session = serde_json::json!({
            "sessionId": credentials.access_key_id,
            "sessionKey": credentials.secret_access_key,
            "sessionToken": credentials.session_token,
        })
        .to_string();
        let token_url = Url::parse_with_params(
            &self.settings.federation_endpoint,
            &[("Action", "getSigninToken"), ("Session", session.as_str())],
        )
        .map_err(|e| CloudError::Config(format!("invalid federation endpoint: {e}")))?;

        let response = self
            .http
            .get(token_url)
            .send()
            .await
            .map_err(|e| CloudError::Http {
                service: "federation",
                message: e.to_string(),
            })?;
        let status = response.status();
        let body = response.text().await.map_err(|e| CloudError::Http {
            service: "federation",
            message: e.to_string(),
        })?;
        if !status.is_success() {
            return Err(CloudError::Status {
                service: "federation",
                status: status.as_u16(),
                body,
            });
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "PascalCase")]
        struct SigninToken {
            signin_token: String,
        }
        let token: SigninToken = serde_json::from_str(&body).map_err(|e| CloudError::Decode {
            service: "federation",
            message: e.to_string(),
        })?;

        login_url(
            &self.settings.federation_endpoint,
            &self.settings.federation_issuer,
            &self.settings.console_destination_url,
            &token.signin_token,
        )
    }
}

#[async_trait]
impl Transport for AwsClient {
    async fn publish_to_topic(&self, topic: &str, message: &str) -> Result<(), CloudError> {
        self.sns
            .publish()
            .topic_arn(topic)
            .message(message)
            .send()
            .await
            .map_err(|e| sdk_error("sns", e))?;
        Ok(())
    }

    async fn send_to_queue(&self, queue_url: &str, message: &str) -> Result<(), CloudError> {
        self.sqs
            .send_message()
            .queue_url(queue_url)
            .message_body(message)
            .send()
            .await
            .map_err(|e| sdk_error("sqs", e))?;
        Ok(())
    }
}

fn sdk_error(service: &'static str, err: impl std::error::Error) -> CloudError {
    CloudError::Sdk {
        service,
        message: DisplayErrorContext(err).to_string(),
    }
}

fn session_credentials(
    credentials: &aws_sdk_sts::types::Credentials,
) -> Result<SessionCredentials, CloudError> {
    let seconds = credentials.expiration().secs();
    let expiration =
        DateTime::<Utc>::from_timestamp(seconds, 0).ok_or_else(|| CloudError::Decode {
            service: "sts",
            message: format!("expiration {seconds} is out of range"),
        })?;
    Ok(SessionCredentials {
        access_key_id: credentials.access_key_id().to_string(),
        secret_access_key: credentials.secret_access_key().to_string(),
        session_token: credentials.session_token().to_string(),
        expiration,
    })
}

/// ARN of the principal role in `account_id`.
#[must_use]
pub fn principal_role_arn(account_id: &str, role_name: &str) -> String {
    format!("arn:aws:iam::{account_id}:role/{role_name}")
}

fn trust_policy_document(trusted_arn: &str) -> String {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "AWS": trusted_arn },
            "Action": "sts:AssumeRole",
        }],
    })
    .to_string()
}

/// Inline policy for the principal role: everything except changes to
/// the roles and policies that control the account.
#[must_use]
pub fn principal_policy_document(account: &Account, role_arn: &str, policy_name: &str) -> String {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Sid": "AllowAccountUse",
                "Effect": "Allow",
                "Action": "*",
                "Resource": "*",
            },
            {
                "Sid": "DenyControlPlaneChanges",
                "Effect": "Deny",
                "Action": "iam:*",
                "Resource": [
                    role_arn,
                    account.admin_role_arn,
                    format!("arn:aws:iam::{}:policy/{policy_name}", account.id),
                ],
            },
        ],
    })
    .to_string()
}

/// Hex SHA-256 of a policy document.
#[must_use]
pub fn policy_hash(document: &str) -> String {
    hex::encode(Sha256::digest(document.as_bytes()))
}

fn login_url(
    endpoint: &str,
    issuer: &str,
    destination: &str,
    signin_token: &str,
) -> Result<String, CloudError> {
    Url::parse_with_params(
        endpoint,
        &[
            ("Action", "login"),
            ("Issuer", issuer),
            ("Destination", destination),
            ("SigninToken", signin_token),
        ],
    )
    .map(String::from)
    .map_err(|e| CloudError::Config(format!("invalid federation endpoint: {e}")))
}
