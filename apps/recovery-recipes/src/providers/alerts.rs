// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Recovery alerts sub-service.
//!
//! Owners subscribe an email or phone number to be told when a recovery is
//! started on their account, so they can cancel within the grace period.
//! Requests are authenticated with a Sign-In with Ethereum (EIP-4361)
//! message signed by an owner key.

use alloy::primitives::{Address, Bytes};
use alloy::signers::{local::PrivateKeySigner, SignerSync};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use super::recovery_service::{RecoveryServiceClient, ServiceError, SignedMessage};
use crate::models::Channel;

const SUBSCRIBE_PATH: &str = "/v1/alerts/subscribe";
const ACTIVATE_PATH: &str = "/v1/alerts/activate";
const SUBSCRIPTIONS_PATH: &str = "/v1/alerts/subscriptions";

const SIWE_STATEMENT: &str = "Manage social recovery alerts for this account";

/// An alert subscription on one channel.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: String,
    pub channel: Channel,
    pub target: String,
    #[serde(default)]
    pub active: bool,
}

/// Fields of an EIP-4361 message.
#[derive(Debug, Clone)]
pub struct SiweMessage {
    pub domain: String,
    pub address: Address,
    pub statement: String,
    pub uri: String,
    pub chain_id: u64,
    pub nonce: String,
    pub issued_at: DateTime<Utc>,
}

impl SiweMessage {
    /// Message for `service_url`, with a fresh nonce.
    pub fn for_service(
        service_url: &str,
        address: Address,
        chain_id: u64,
        issued_at: DateTime<Utc>,
    ) -> Result<Self, ServiceError> {
        let parsed = url::Url::parse(service_url)
            .map_err(|e| ServiceError::InvalidConfig(format!("invalid alerts URL: {e}")))?;
        let domain = match (parsed.host_str(), parsed.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(ServiceError::InvalidConfig(format!(
                    "alerts URL has no host: {service_url}"
                )))
            }
        };

        Ok(Self {
            domain,
            address,
            statement: SIWE_STATEMENT.to_string(),
            uri: parsed.as_str().trim_end_matches('/').to_string(),
            chain_id,
            nonce: Uuid::new_v4().simple().to_string(),
            issued_at,
        })
    }

    /// Render the canonical EIP-4361 text.
    pub fn render(&self) -> String {
        format!(
            "{domain} wants you to sign in with your Ethereum account:\n\
             {address}\n\
             \n\
             {statement}\n\
             \n\
             URI: {uri}\n\
             Version: 1\n\
             Chain ID: {chain_id}\n\
             Nonce: {nonce}\n\
             Issued At: {issued_at}",
            domain = self.domain,
            address = self.address.to_checksum(None),
            statement = self.statement,
            uri = self.uri,
            chain_id = self.chain_id,
            nonce = self.nonce,
            issued_at = self.issued_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        )
    }

    /// Sign the rendered message with EIP-191 personal-sign.
    pub fn sign(&self, signer: &PrivateKeySigner) -> Result<SignedMessage, ServiceError> {
        let message = self.render();
        let signature = signer
            .sign_message_sync(message.as_bytes())
            .map_err(|e| ServiceError::InvalidConfig(format!("failed to sign SIWE message: {e}")))?;
        Ok(SignedMessage {
            message,
            signature: Bytes::from(signature.as_bytes().to_vec()),
        })
    }
}

/// Client for the alerts endpoints; shares transport with the recovery service.
#[derive(Debug, Clone)]
pub struct AlertsClient {
    inner: RecoveryServiceClient,
    chain_id: u64,
}

impl AlertsClient {
    pub fn new(base_url: &str, chain_id: u64) -> Result<Self, ServiceError> {
        Ok(Self {
            inner: RecoveryServiceClient::new(base_url)?,
            chain_id,
        })
    }

    /// Fresh SIWE authentication for `account`, signed by an owner.
    pub fn authenticate(
        &self,
        account: Address,
        owner: &PrivateKeySigner,
    ) -> Result<SignedMessage, ServiceError> {
        SiweMessage::for_service(self.inner.base_url(), account, self.chain_id, Utc::now())?
            .sign(owner)
    }

    /// Subscribe a channel; the service sends a code to `target`.
    pub async fn subscribe(
        &self,
        account: Address,
        channel: Channel,
        target: &str,
        auth: &SignedMessage,
    ) -> Result<String, ServiceError> {
        let payload = json!({
            "chainId": self.chain_id,
            "account": account,
            "channel": channel,
            "target": target,
            "message": auth.message,
            "signature": auth.signature,
        });
        let response: Value = self.inner.post_json(SUBSCRIBE_PATH, &payload).await?;
        let subscription_id = response
            .get("subscriptionId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ServiceError::InvalidResponse("missing subscriptionId in response".to_string())
            })?
            .to_string();

        info!(%account, %channel, subscription_id = %subscription_id, "Alerts: subscription pending verification");
        Ok(subscription_id)
    }

    /// Activate a subscription with the code delivered to its target.
    pub async fn verify(&self, subscription_id: &str, code: &str) -> Result<bool, ServiceError> {
        let response: Value = self
            .inner
            .post_json(
                ACTIVATE_PATH,
                &json!({ "subscriptionId": subscription_id, "code": code.trim() }),
            )
            .await?;
        Ok(response
            .get("active")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    pub async fn list(
        &self,
        account: Address,
        auth: &SignedMessage,
    ) -> Result<Vec<Subscription>, ServiceError> {
        let payload = json!({
            "chainId": self.chain_id,
            "account": account,
            "message": auth.message,
            "signature": auth.signature,
        });
        self.inner.post_json(SUBSCRIPTIONS_PATH, &payload).await
    }
}
