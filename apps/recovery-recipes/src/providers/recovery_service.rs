// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Recovery coordination service client.
//!
//! Two paths share one client:
//! - **Guardian signatures**: EOA guardians sign off-chain, the service
//!   collects the signatures and relays execute/finalize.
//! - **Custodial guardian**: the service itself is a guardian and approves
//!   after the owner passes a one-time code on every registered channel.

use std::time::Duration;

use alloy::primitives::{Address, Bytes};
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::models::Channel;

const CREATE_RECOVERY_PATH: &str = "/v1/recoveries/create";
const SIGN_RECOVERY_PATH: &str = "/v1/recoveries/sign";
const EXECUTE_RECOVERY_PATH: &str = "/v1/recoveries/execute";
const FINALIZE_RECOVERY_PATH: &str = "/v1/recoveries/finalize";
const FETCH_RECOVERIES_PATH: &str = "/v1/recoveries/fetchByAddress";
const REGISTER_CHANNEL_PATH: &str = "/v1/guardian/register";
const CONFIRM_REGISTRATION_PATH: &str = "/v1/guardian/register/confirm";
const REQUEST_CHALLENGE_PATH: &str = "/v1/guardian/challenge";
const SUBMIT_CHALLENGE_PATH: &str = "/v1/guardian/challenge/submit";
const CREATE_AND_EXECUTE_PATH: &str = "/v1/guardian/recover";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Recovery service configuration invalid: {0}")]
    InvalidConfig(String),

    #[error("Recovery service request to {path} failed")]
    Request {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Recovery service returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Recovery service response was invalid: {0}")]
    InvalidResponse(String),
}

/// Status the service reports for a recovery it coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceRecoveryStatus {
    Pending,
    Executed,
    Finalized,
    Cancelled,
    #[serde(other)]
    Unknown,
}

/// A recovery request as recorded by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRecovery {
    pub id: String,
    pub chain_id: u64,
    pub account: Address,
    pub new_owners: Vec<Address>,
    pub new_threshold: u64,
    pub status: ServiceRecoveryStatus,
    #[serde(default)]
    pub signature_count: usize,
    #[serde(default)]
    pub execute_tx: Option<String>,
    #[serde(default)]
    pub finalize_tx: Option<String>,
    /// Unix seconds; set once the recovery is executed.
    #[serde(default)]
    pub execute_after: Option<i64>,
}

/// Recovery parameters shared by every request body.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryParams<'a> {
    pub chain_id: u64,
    pub account: Address,
    pub new_owners: &'a [Address],
    pub new_threshold: u64,
}

/// One-time-code challenge issued on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub challenge_id: String,
    pub channel: Channel,
    /// Masked destination (e.g. `j***@example.com`).
    #[serde(default)]
    pub target: Option<String>,
}

/// Outcome of submitting a one-time code.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeVerification {
    pub verified: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Owner authentication attached to custodial and alerts requests.
#[derive(Debug, Clone)]
pub struct SignedMessage {
    pub message: String,
    pub signature: Bytes,
}

#[derive(Debug, Clone)]
pub struct RecoveryServiceClient {
    base_url: String,
    http: Client,
}

impl RecoveryServiceClient {
    pub fn new(base_url: &str) -> Result<Self, ServiceError> {
        let parsed = url::Url::parse(base_url)
            .map_err(|e| ServiceError::InvalidConfig(format!("invalid base URL {base_url}: {e}")))?;

        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ServiceError::InvalidConfig(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // -------------------------------------------------------------------------
    // Guardian signature path
    // -------------------------------------------------------------------------

    /// Open a recovery request with the first guardian signature.
    pub async fn create_request(
        &self,
        params: RecoveryParams<'_>,
        signer: Address,
        signature: &Bytes,
    ) -> Result<ServiceRecovery, ServiceError> {
        let payload = json!({
            "chainId": params.chain_id,
            "account": params.account,
            "newOwners": params.new_owners,
            "newThreshold": params.new_threshold,
            "signer": signer,
            "signature": signature,
        });
        let record: ServiceRecovery = self.post_json(CREATE_RECOVERY_PATH, &payload).await?;
        info!(
            recovery_id = %record.id,
            account = %record.account,
            status = ?record.status,
            "Recovery service: request created"
        );
        Ok(record)
    }

    /// Add another guardian signature to an existing request.
    pub async fn submit_signature(
        &self,
        recovery_id: &str,
        signer: Address,
        signature: &Bytes,
    ) -> Result<ServiceRecovery, ServiceError> {
        let payload = json!({
            "id": recovery_id,
            "signer": signer,
            "signature": signature,
        });
        self.post_json(SIGN_RECOVERY_PATH, &payload).await
    }

    /// Relay the collected signatures on-chain.
    pub async fn execute(&self, recovery_id: &str) -> Result<ServiceRecovery, ServiceError> {
        self.post_json(EXECUTE_RECOVERY_PATH, &json!({ "id": recovery_id }))
            .await
    }

    pub async fn finalize(&self, recovery_id: &str) -> Result<ServiceRecovery, ServiceError> {
        self.post_json(FINALIZE_RECOVERY_PATH, &json!({ "id": recovery_id }))
            .await
    }

    pub async fn fetch_by_account(
        &self,
        chain_id: u64,
        account: Address,
    ) -> Result<Vec<ServiceRecovery>, ServiceError> {
        let query = [
            ("chainId", chain_id.to_string()),
            ("account", account.to_string()),
        ];
        self.get_json(FETCH_RECOVERIES_PATH, &query).await
    }

    /// The executed recovery awaiting finalization, if the service has one.
    pub async fn get_executed(
        &self,
        chain_id: u64,
        account: Address,
    ) -> Result<Option<ServiceRecovery>, ServiceError> {
        let records = self.fetch_by_account(chain_id, account).await?;
        Ok(records
            .into_iter()
            .find(|record| record.status == ServiceRecoveryStatus::Executed))
    }

    // -------------------------------------------------------------------------
    // Custodial guardian path
    // -------------------------------------------------------------------------

    /// Start registering a verification channel for the account.
    pub async fn register_channel(
        &self,
        chain_id: u64,
        account: Address,
        channel: Channel,
        target: &str,
        auth: &SignedMessage,
    ) -> Result<Challenge, ServiceError> {
        let payload = json!({
            "chainId": chain_id,
            "account": account,
            "channel": channel,
            "target": target,
            "message": auth.message,
            "signature": auth.signature,
        });
        self.post_json(REGISTER_CHANNEL_PATH, &payload).await
    }

    /// Confirm a channel registration; returns the service guardian address
    /// that must be added to the module.
    pub async fn confirm_registration(
        &self,
        challenge_id: &str,
        code: &str,
    ) -> Result<Address, ServiceError> {
        let response: Value = self
            .post_json(
                CONFIRM_REGISTRATION_PATH,
                &json!({ "challengeId": challenge_id, "code": code }),
            )
            .await?;

        response
            .get("guardianAddress")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ServiceError::InvalidResponse("missing guardianAddress in response".to_string())
            })?
            .parse()
            .map_err(|e| ServiceError::InvalidResponse(format!("invalid guardianAddress: {e}")))
    }

    pub async fn request_challenge(
        &self,
        params: RecoveryParams<'_>,
        channel: Channel,
    ) -> Result<Challenge, ServiceError> {
        let payload = json!({
            "chainId": params.chain_id,
            "account": params.account,
            "newOwners": params.new_owners,
            "newThreshold": params.new_threshold,
            "channel": channel,
        });
        self.post_json(REQUEST_CHALLENGE_PATH, &payload).await
    }

    pub async fn submit_challenge(
        &self,
        challenge_id: &str,
        code: &str,
    ) -> Result<ChallengeVerification, ServiceError> {
        self.post_json(
            SUBMIT_CHALLENGE_PATH,
            &json!({ "challengeId": challenge_id, "code": code.trim() }),
        )
        .await
    }

    /// Have the custodial guardian sign and execute in one step.
    pub async fn create_and_execute(
        &self,
        params: RecoveryParams<'_>,
        challenge_ids: &[String],
    ) -> Result<ServiceRecovery, ServiceError> {
        let payload = json!({
            "chainId": params.chain_id,
            "account": params.account,
            "newOwners": params.new_owners,
            "newThreshold": params.new_threshold,
            "challengeIds": challenge_ids,
        });
        self.post_json(CREATE_AND_EXECUTE_PATH, &payload).await
    }

    // -------------------------------------------------------------------------
    // Transport
    // -------------------------------------------------------------------------

    pub(crate) async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        payload: &Value,
    ) -> Result<T, ServiceError> {
        debug!(path, "Recovery service POST");
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .json(payload)
            .send()
            .await
            .map_err(|source| ServiceError::Request {
                path: path.to_string(),
                source,
            })?;
        decode_response(path, response).await
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ServiceError> {
        debug!(path, "Recovery service GET");
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .query(query)
            .send()
            .await
            .map_err(|source| ServiceError::Request {
                path: path.to_string(),
                source,
            })?;
        decode_response(path, response).await
    }
}

async fn decode_response<T: DeserializeOwned>(
    path: &str,
    response: Response,
) -> Result<T, ServiceError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ServiceError::Api {
            status: status.as_u16(),
            message: extract_error_message(&body),
        });
    }

    response
        .json()
        .await
        .map_err(|e| ServiceError::InvalidResponse(format!("{path} invalid JSON: {e}")))
}

/// Prefer the service's `message`/`error` field, fall back to the raw body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .or_else(|| value.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                "empty response body".to_string()
            } else {
                trimmed.to_string()
            }
        })
}
