// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Execution backends: where an authorized recovery is sent.
//!
//! [`OnChainBackend`] relays guardian signatures to the module from any EOA.
//! [`ServiceBackend`] lets the recovery service relay them (and act as the
//! custodial guardian). Cancellation always goes through the smart account,
//! because the module only accepts `cancelRecovery()` from the account.

use std::sync::Arc;

use alloy::{
    primitives::Address,
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::types::TransactionRequest,
    signers::local::PrivateKeySigner,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::blockchain::account::wait_for_receipt;
use crate::blockchain::module::{
    cancel_recovery_call, finalize_recovery_call, multi_confirm_recovery_call,
};
use crate::blockchain::{
    Call, ChainClient, ChainError, InclusionPolicy, RecoveryModule, SmartAccount,
};
use crate::config::{OWNER_PRIVATE_KEY_ENV, RECOVERY_SERVICE_URL_ENV, SAFE_ADDRESS_ENV};
use crate::error::RecoveryError;
use crate::models::{ApprovalKind, GuardianApproval, RecoveryRequest};
use crate::providers::{RecoveryServiceClient, ServiceRecovery, ServiceRecoveryStatus};

/// Result of one backend submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Submission {
    pub success: bool,
    pub tx_hash: Option<String>,
    /// Deadline reported by the backend, when it knows one.
    pub execute_after: Option<DateTime<Utc>>,
    /// Request id assigned by a remote coordinator.
    pub remote_id: Option<String>,
}

impl Submission {
    pub fn succeeded(tx_hash: Option<String>) -> Self {
        Self {
            success: true,
            tx_hash,
            ..Self::default()
        }
    }

    pub fn failed(tx_hash: Option<String>) -> Self {
        Self {
            success: false,
            tx_hash,
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait RecoveryBackend: Send + Sync {
    /// Module instance every submission addresses.
    fn module_address(&self) -> Address;

    /// Forward one approval; returns the remote request id if the backend
    /// tracks requests remotely.
    async fn record_approval(
        &self,
        _request: &RecoveryRequest,
        _approval: &GuardianApproval,
    ) -> Result<Option<String>, RecoveryError> {
        Ok(None)
    }

    async fn execute(&self, request: &RecoveryRequest) -> Result<Submission, RecoveryError>;

    /// A `success: false` submission means the finalize call reported failure.
    async fn finalize(&self, request: &RecoveryRequest) -> Result<Submission, RecoveryError>;

    async fn cancel(&self, request: &RecoveryRequest) -> Result<Submission, RecoveryError>;

    /// Deadline currently registered on-chain, if any.
    async fn pending_deadline(
        &self,
        request: &RecoveryRequest,
    ) -> Result<Option<DateTime<Utc>>, RecoveryError>;
}

// =============================================================================
// Account-side operations shared by both backends
// =============================================================================

/// Module reads plus the calls only the account itself may make.
///
/// Without an account (the owner key is what is being recovered) only the
/// reads are available.
pub struct AccountControls {
    module: RecoveryModule<DynProvider>,
    account: Option<Arc<dyn SmartAccount>>,
}

impl AccountControls {
    pub fn new(module: RecoveryModule<DynProvider>, account: Arc<dyn SmartAccount>) -> Self {
        Self {
            module,
            account: Some(account),
        }
    }

    pub fn read_only(module: RecoveryModule<DynProvider>) -> Self {
        Self {
            module,
            account: None,
        }
    }

    pub fn module(&self) -> &RecoveryModule<DynProvider> {
        &self.module
    }

    async fn cancel(&self, request: &RecoveryRequest) -> Result<Submission, RecoveryError> {
        let Some(account) = self.account.as_ref() else {
            return Err(RecoveryError::invalid_config(
                OWNER_PRIVATE_KEY_ENV,
                "cancelling a recovery requires the account owner key",
            ));
        };
        if request.account != account.address() {
            return Err(RecoveryError::invalid_config(
                SAFE_ADDRESS_ENV,
                format!(
                    "cancel must be sent by {} but the configured account is {}",
                    request.account,
                    account.address()
                ),
            ));
        }

        let handle = account
            .submit(vec![cancel_recovery_call(self.module.address())])
            .await?;
        let receipt = account.wait_for_inclusion(&handle).await?;
        if !receipt.success {
            return Err(RecoveryError::submission_failed(
                "cancelRecovery reverted",
                Some(receipt.tx_hash),
            ));
        }
        Ok(Submission::succeeded(Some(receipt.tx_hash)))
    }

    async fn deadline(&self, account: Address) -> Result<Option<DateTime<Utc>>, RecoveryError> {
        Ok(self
            .module
            .pending_recovery(account)
            .await?
            .map(|pending| pending.execute_after))
    }

    /// Deadline read after a mined execution; a failed read is logged and
    /// yields `None`.
    async fn deadline_after_execute(&self, account: Address) -> Option<DateTime<Utc>> {
        match self.deadline(account).await {
            Ok(deadline) => deadline,
            Err(e) => {
                warn!(account = %account, error = %e, "Could not read recovery deadline after execution");
                None
            }
        }
    }
}

// =============================================================================
// On-chain backend
// =============================================================================

/// Relays signatures straight to the module from a relayer EOA.
pub struct OnChainBackend {
    controls: AccountControls,
    relayer: DynProvider,
    relayer_address: Address,
    inclusion: InclusionPolicy,
}

impl OnChainBackend {
    pub fn new(
        client: &ChainClient,
        controls: AccountControls,
        relayer: PrivateKeySigner,
        inclusion: InclusionPolicy,
    ) -> Self {
        let relayer_address = relayer.address();
        let provider = ProviderBuilder::new()
            .wallet(ChainClient::create_wallet(relayer))
            .connect_http(client.network().rpc_url.clone())
            .erased();

        Self {
            controls,
            relayer: provider,
            relayer_address,
            inclusion,
        }
    }

    /// Send from the relayer and wait for the receipt.
    ///
    /// A refused send (failed gas estimation, dead RPC) is an error carrying
    /// the node's reason; a mined receipt reports its own status.
    async fn relay(&self, call: Call, label: &str) -> Result<(String, bool), RecoveryError> {
        let tx = TransactionRequest::default()
            .from(self.relayer_address)
            .to(call.to)
            .value(call.value)
            .input(call.data.into());

        let pending = self.relayer.send_transaction(tx).await.map_err(|e| {
            warn!(call = label, error = %e, "Relayer transaction rejected");
            ChainError::TransactionFailed(format!("{label} not sent: {e}"))
        })?;
        let tx_hash = format!("{:?}", pending.tx_hash());
        info!(call = label, tx_hash = %tx_hash, relayer = %self.relayer_address, "Relayed recovery call");

        let receipt = wait_for_receipt(&self.relayer, &tx_hash, self.inclusion).await?;
        Ok((receipt.tx_hash, receipt.success))
    }
}

#[async_trait]
impl RecoveryBackend for OnChainBackend {
    fn module_address(&self) -> Address {
        self.controls.module().address()
    }

    async fn execute(&self, request: &RecoveryRequest) -> Result<Submission, RecoveryError> {
        let signatures = request.signatures();
        if signatures.len() != request.approvals.len() {
            return Err(RecoveryError::invalid_config(
                RECOVERY_SERVICE_URL_ENV,
                "one-time-code approvals can only be executed by the recovery service",
            ));
        }

        let call = multi_confirm_recovery_call(
            self.module_address(),
            request.account,
            &request.new_owners,
            request.new_threshold,
            &signatures,
        );
        let (tx_hash, success) = self.relay(call, "multiConfirmRecovery").await?;
        if !success {
            return Err(RecoveryError::submission_failed(
                "multiConfirmRecovery reverted",
                Some(tx_hash),
            ));
        }
        Ok(Submission {
            success: true,
            execute_after: self.controls.deadline_after_execute(request.account).await,
            tx_hash: Some(tx_hash),
            remote_id: None,
        })
    }

    async fn finalize(&self, request: &RecoveryRequest) -> Result<Submission, RecoveryError> {
        let call = finalize_recovery_call(self.module_address(), request.account);
        let (tx_hash, success) = self.relay(call, "finalizeRecovery").await?;
        Ok(if success {
            Submission::succeeded(Some(tx_hash))
        } else {
            Submission::failed(Some(tx_hash))
        })
    }

    async fn cancel(&self, request: &RecoveryRequest) -> Result<Submission, RecoveryError> {
        self.controls.cancel(request).await
    }

    async fn pending_deadline(
        &self,
        request: &RecoveryRequest,
    ) -> Result<Option<DateTime<Utc>>, RecoveryError> {
        self.controls.deadline(request.account).await
    }
}

// =============================================================================
// Recovery service backend
// =============================================================================

/// Lets the recovery service coordinate signatures and relay transactions.
pub struct ServiceBackend {
    service: RecoveryServiceClient,
    controls: AccountControls,
}

impl ServiceBackend {
    pub fn new(service: RecoveryServiceClient, controls: AccountControls) -> Self {
        Self { service, controls }
    }

    fn remote_id<'a>(&self, request: &'a RecoveryRequest) -> Result<&'a str, RecoveryError> {
        request.remote_id.as_deref().ok_or_else(|| {
            RecoveryError::invalid_config(
                "recovery request",
                "no recovery service request id; record a guardian signature first",
            )
        })
    }
}

fn deadline_of(record: &ServiceRecovery) -> Option<DateTime<Utc>> {
    record
        .execute_after
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

#[async_trait]
impl RecoveryBackend for ServiceBackend {
    fn module_address(&self) -> Address {
        self.controls.module().address()
    }

    async fn record_approval(
        &self,
        request: &RecoveryRequest,
        approval: &GuardianApproval,
    ) -> Result<Option<String>, RecoveryError> {
        let ApprovalKind::Signature { signer, signature } = &approval.kind else {
            // Custodial approvals are redeemed all at once on execute.
            return Ok(None);
        };

        let record = match request.remote_id.as_deref() {
            None => {
                self.service
                    .create_request(request.service_params(), *signer, signature)
                    .await?
            }
            Some(id) => self.service.submit_signature(id, *signer, signature).await?,
        };
        Ok(Some(record.id))
    }

    async fn execute(&self, request: &RecoveryRequest) -> Result<Submission, RecoveryError> {
        let record = if request.is_custodial() {
            self.service
                .create_and_execute(request.service_params(), &request.challenge_ids())
                .await?
        } else {
            self.service.execute(self.remote_id(request)?).await?
        };

        if record.status != ServiceRecoveryStatus::Executed {
            return Err(RecoveryError::submission_failed(
                format!("recovery service reported {:?} after execute", record.status),
                record.execute_tx,
            ));
        }

        let execute_after = match deadline_of(&record) {
            Some(deadline) => Some(deadline),
            None => self.controls.deadline_after_execute(request.account).await,
        };
        Ok(Submission {
            success: true,
            tx_hash: record.execute_tx,
            execute_after,
            remote_id: Some(record.id),
        })
    }

    async fn finalize(&self, request: &RecoveryRequest) -> Result<Submission, RecoveryError> {
        let record = self.service.finalize(self.remote_id(request)?).await?;
        let success = record.status == ServiceRecoveryStatus::Finalized;
        if !success {
            warn!(recovery_id = %record.id, status = ?record.status, "Service did not finalize recovery");
        }
        Ok(Submission {
            success,
            tx_hash: record.finalize_tx,
            ..Submission::default()
        })
    }

    async fn cancel(&self, request: &RecoveryRequest) -> Result<Submission, RecoveryError> {
        self.controls.cancel(request).await
    }

    async fn pending_deadline(
        &self,
        request: &RecoveryRequest,
    ) -> Result<Option<DateTime<Utc>>, RecoveryError> {
        self.controls.deadline(request.account).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::{NetworkConfig, MODULE_AFTER_3_MINUTES};
    use crate::error::error_chain;
    use crate::models::{Channel, GracePeriodPolicy, RecoveryStatus};
    use alloy::primitives::{address, Bytes, U256};
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use serde_json::{json, Value};
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ACCOUNT: Address = address!("1111111111111111111111111111111111111111");
    const NEW_OWNER: Address = address!("2222222222222222222222222222222222222222");
    const GUARDIAN_A: Address = address!("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
    const GUARDIAN_B: Address = address!("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");

    const RELAYER_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn offline_client() -> ChainClient {
        // Nothing listens here; every RPC call is refused.
        ChainClient::new(NetworkConfig {
            chain_id: 31337,
            rpc_url: "http://127.0.0.1:9".parse().unwrap(),
            explorer_url: None,
        })
    }

    fn offline_module() -> RecoveryModule<DynProvider> {
        offline_client().module(MODULE_AFTER_3_MINUTES)
    }

    fn offline_relayer() -> OnChainBackend {
        let client = offline_client();
        OnChainBackend::new(
            &client,
            AccountControls::read_only(client.module(MODULE_AFTER_3_MINUTES)),
            ChainClient::create_signer(RELAYER_KEY).unwrap(),
            InclusionPolicy::default(),
        )
    }

    fn backend(server: &MockServer) -> ServiceBackend {
        ServiceBackend::new(
            RecoveryServiceClient::new(&server.uri()).unwrap(),
            AccountControls::read_only(offline_module()),
        )
    }

    fn request(approvals: Vec<GuardianApproval>) -> RecoveryRequest {
        let created_at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        RecoveryRequest {
            id: Uuid::new_v4(),
            chain_id: 31337,
            account: ACCOUNT,
            new_owners: vec![NEW_OWNER],
            new_threshold: 1,
            status: RecoveryStatus::Executable,
            approvals,
            required_approvals: 2,
            policy: GracePeriodPolicy::After3Minutes,
            module: MODULE_AFTER_3_MINUTES,
            nonce: U256::ZERO,
            created_at,
            executed_at: None,
            execute_after: None,
            remote_id: None,
            execute_tx: None,
            finalize_tx: None,
            cancel_tx: None,
        }
    }

    fn signed(guardian: Address, byte: u8) -> GuardianApproval {
        GuardianApproval::signature(guardian, Bytes::from(vec![byte; 65]), Utc::now())
    }

    fn record(status: &str) -> Value {
        json!({
            "id": "rec-1",
            "chainId": 31337,
            "account": ACCOUNT,
            "newOwners": [NEW_OWNER],
            "newThreshold": 1,
            "status": status,
        })
    }

    #[tokio::test]
    async fn first_signature_creates_then_later_ones_sign() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/recoveries/create"))
            .and(body_partial_json(json!({ "signer": GUARDIAN_A })))
            .respond_with(ResponseTemplate::new(200).set_body_json(record("PENDING")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/recoveries/sign"))
            .and(body_partial_json(json!({ "id": "rec-1", "signer": GUARDIAN_B })))
            .respond_with(ResponseTemplate::new(200).set_body_json(record("PENDING")))
            .expect(1)
            .mount(&server)
            .await;

        let backend = backend(&server);
        let first = signed(GUARDIAN_A, 1);
        let remote = backend
            .record_approval(&request(vec![first.clone()]), &first)
            .await
            .unwrap();
        assert_eq!(remote.as_deref(), Some("rec-1"));

        let second = signed(GUARDIAN_B, 2);
        let mut tracked = request(vec![first, second.clone()]);
        tracked.remote_id = remote;
        let remote = backend.record_approval(&tracked, &second).await.unwrap();
        assert_eq!(remote.as_deref(), Some("rec-1"));
    }

    #[tokio::test]
    async fn one_time_codes_are_not_forwarded_individually() {
        let server = MockServer::start().await;
        let backend = backend(&server);
        let approval = GuardianApproval::one_time_code(Channel::Email, "o@example.org", "ch-1", Utc::now());
        let remote = backend
            .record_approval(&request(vec![approval.clone()]), &approval)
            .await
            .unwrap();
        assert!(remote.is_none());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn custodial_execution_uses_create_and_execute() {
        let server = MockServer::start().await;
        let mut executed = record("EXECUTED");
        executed["executeTx"] = json!("0xexec");
        executed["executeAfter"] = json!(1_800_000_000);
        Mock::given(method("POST"))
            .and(path("/v1/guardian/recover"))
            .and(body_partial_json(json!({ "challengeIds": ["ch-email", "ch-sms"] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(executed))
            .expect(1)
            .mount(&server)
            .await;

        let approvals = vec![
            GuardianApproval::one_time_code(Channel::Email, "o@example.org", "ch-email", Utc::now()),
            GuardianApproval::one_time_code(Channel::Sms, "+15550100", "ch-sms", Utc::now()),
        ];
        let submission = backend(&server).execute(&request(approvals)).await.unwrap();

        assert!(submission.success);
        assert_eq!(submission.tx_hash.as_deref(), Some("0xexec"));
        assert_eq!(submission.remote_id.as_deref(), Some("rec-1"));
        assert_eq!(
            submission.execute_after,
            DateTime::from_timestamp(1_800_000_000, 0)
        );
    }

    #[tokio::test]
    async fn execute_requires_executed_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/recoveries/execute"))
            .respond_with(ResponseTemplate::new(200).set_body_json(record("PENDING")))
            .mount(&server)
            .await;

        let mut tracked = request(vec![signed(GUARDIAN_A, 1), signed(GUARDIAN_B, 2)]);
        tracked.remote_id = Some("rec-1".to_string());
        let err = backend(&server).execute(&tracked).await.unwrap_err();
        assert_matches!(err, RecoveryError::SubmissionFailed { .. });
    }

    #[tokio::test]
    async fn execute_without_remote_request_is_rejected() {
        let server = MockServer::start().await;
        let err = backend(&server)
            .execute(&request(vec![signed(GUARDIAN_A, 1)]))
            .await
            .unwrap_err();
        assert_matches!(err, RecoveryError::InvalidConfig { .. });
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn finalize_reports_failure_without_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/recoveries/finalize"))
            .respond_with(ResponseTemplate::new(200).set_body_json(record("EXECUTED")))
            .mount(&server)
            .await;

        let mut tracked = request(Vec::new());
        tracked.remote_id = Some("rec-1".to_string());
        let submission = backend(&server).finalize(&tracked).await.unwrap();
        assert!(!submission.success);
    }

    #[tokio::test]
    async fn cancel_needs_the_account() {
        let server = MockServer::start().await;
        let err = backend(&server)
            .cancel(&request(Vec::new()))
            .await
            .unwrap_err();
        assert_matches!(err, RecoveryError::InvalidConfig { ref name, .. } if name == OWNER_PRIVATE_KEY_ENV);
    }

    #[tokio::test]
    async fn custodial_execution_survives_unreadable_deadline() {
        let server = MockServer::start().await;
        let mut executed = record("EXECUTED");
        executed["executeTx"] = json!("0xexec");
        Mock::given(method("POST"))
            .and(path("/v1/guardian/recover"))
            .respond_with(ResponseTemplate::new(200).set_body_json(executed))
            .expect(1)
            .mount(&server)
            .await;

        let approvals = vec![GuardianApproval::one_time_code(
            Channel::Email,
            "o@example.org",
            "ch-email",
            Utc::now(),
        )];
        // The service omits executeAfter and the module read hits a dead RPC.
        let submission = backend(&server).execute(&request(approvals)).await.unwrap();

        assert!(submission.success);
        assert_eq!(submission.tx_hash.as_deref(), Some("0xexec"));
        assert_eq!(submission.remote_id.as_deref(), Some("rec-1"));
        assert_eq!(submission.execute_after, None);
    }

    #[tokio::test]
    async fn refused_relay_keeps_the_node_error() {
        let relayer = offline_relayer();
        let err = relayer
            .execute(&request(vec![signed(GUARDIAN_A, 1), signed(GUARDIAN_B, 2)]))
            .await
            .unwrap_err();

        assert_matches!(err, RecoveryError::Chain(ChainError::TransactionFailed(ref reason)) if reason.starts_with("multiConfirmRecovery not sent: "));
        let rendered = error_chain(&err);
        assert!(rendered.contains("caused by: Transaction failed: multiConfirmRecovery not sent:"));
    }

    #[tokio::test]
    async fn finalize_on_unreachable_node_is_an_error() {
        let err = offline_relayer()
            .finalize(&request(Vec::new()))
            .await
            .unwrap_err();
        assert_matches!(err, RecoveryError::Chain(ChainError::TransactionFailed(ref reason)) if reason.starts_with("finalizeRecovery not sent: "));
    }
}
