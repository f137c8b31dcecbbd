// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Recovery Orchestrator
//!
//! Walks a [`RecoveryRequest`] through its lifecycle:
//!
//! ```text
//! PENDING --threshold met--> EXECUTABLE --execute--> EXECUTED
//! EXECUTED --grace period elapsed + finalize--> FINALIZED
//! EXECUTED --cancel--> CANCELLED
//! ```
//!
//! Every transition takes the current request by reference and returns an
//! updated copy. Submissions go to a [`RecoveryBackend`]; approvals come from
//! [`ApprovalSource`]s. Nothing is retried: the first failure stops the flow.

pub mod approvals;
pub mod backend;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::{GUARDIAN_THRESHOLD_ENV, NEW_OWNER_ADDRESSES_ENV, NEW_THRESHOLD_ENV};
use crate::error::RecoveryError;
use crate::models::{GracePeriodPolicy, GuardianApproval, RecoveryRequest, RecoveryStatus};

pub use approvals::{ApprovalSource, ChallengeService, ChannelGuardian, EoaGuardian};
pub use backend::{AccountControls, OnChainBackend, RecoveryBackend, ServiceBackend, Submission};

/// Default interval between grace-period progress checks.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Parameters for a new recovery attempt.
#[derive(Debug, Clone)]
pub struct RecoveryDraft {
    pub chain_id: u64,
    pub account: Address,
    pub new_owners: Vec<Address>,
    pub new_threshold: u64,
    pub required_approvals: usize,
    pub policy: GracePeriodPolicy,
    /// Module instance resolved from `policy`.
    pub module: Address,
    /// Current module nonce for `account`.
    pub nonce: U256,
}

pub struct RecoveryOrchestrator<B> {
    backend: B,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
}

impl<B: RecoveryBackend> RecoveryOrchestrator<B> {
    pub fn new(backend: B, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            clock,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Validate a draft and create a PENDING request.
    pub fn open(&self, draft: RecoveryDraft) -> Result<RecoveryRequest, RecoveryError> {
        if draft.new_owners.is_empty() {
            return Err(RecoveryError::invalid_config(
                NEW_OWNER_ADDRESSES_ENV,
                "at least one new owner is required",
            ));
        }
        if draft.new_owners.contains(&Address::ZERO) {
            return Err(RecoveryError::invalid_config(
                NEW_OWNER_ADDRESSES_ENV,
                "the zero address cannot be an owner",
            ));
        }
        let distinct: HashSet<&Address> = draft.new_owners.iter().collect();
        if distinct.len() != draft.new_owners.len() {
            return Err(RecoveryError::invalid_config(
                NEW_OWNER_ADDRESSES_ENV,
                "new owners must be distinct",
            ));
        }
        if draft.new_threshold == 0 || draft.new_threshold > draft.new_owners.len() as u64 {
            return Err(RecoveryError::invalid_config(
                NEW_THRESHOLD_ENV,
                format!(
                    "must be between 1 and {} (the number of new owners)",
                    draft.new_owners.len()
                ),
            ));
        }
        if draft.required_approvals == 0 {
            return Err(RecoveryError::invalid_config(
                GUARDIAN_THRESHOLD_ENV,
                "at least one guardian approval is required",
            ));
        }
        self.ensure_module(draft.policy, draft.module)?;

        let request = RecoveryRequest {
            id: Uuid::new_v4(),
            chain_id: draft.chain_id,
            account: draft.account,
            new_owners: draft.new_owners,
            new_threshold: draft.new_threshold,
            status: RecoveryStatus::Pending,
            approvals: Vec::new(),
            required_approvals: draft.required_approvals,
            policy: draft.policy,
            module: draft.module,
            nonce: draft.nonce,
            created_at: self.clock.now(),
            executed_at: None,
            execute_after: None,
            remote_id: None,
            execute_tx: None,
            finalize_tx: None,
            cancel_tx: None,
        };
        info!(
            recovery_id = %request.id,
            account = %request.account,
            policy = %request.policy,
            module = %request.module,
            required = request.required_approvals,
            "Recovery request opened"
        );
        Ok(request)
    }

    /// Record one approval. A second approval from the same guardian replaces
    /// the first.
    pub async fn record_approval(
        &self,
        request: &RecoveryRequest,
        approval: GuardianApproval,
    ) -> Result<RecoveryRequest, RecoveryError> {
        if !matches!(
            request.status,
            RecoveryStatus::Pending | RecoveryStatus::Executable
        ) {
            return Err(RecoveryError::InvalidTransition {
                action: "record an approval on",
                status: request.status,
            });
        }
        self.ensure_module(request.policy, request.module)?;

        let mut updated = request.clone();
        match updated
            .approvals
            .iter_mut()
            .find(|existing| existing.guardian == approval.guardian)
        {
            Some(existing) => {
                warn!(guardian = %approval.guardian, "Replacing earlier approval from guardian");
                *existing = approval.clone();
            }
            None => updated.approvals.push(approval.clone()),
        }

        if let Some(remote_id) = self.backend.record_approval(&updated, &approval).await? {
            updated.remote_id = Some(remote_id);
        }

        if updated.threshold_met() {
            updated.status = RecoveryStatus::Executable;
        }
        info!(
            recovery_id = %updated.id,
            guardian = %approval.guardian,
            collected = updated.approval_count(),
            required = updated.required_approvals,
            status = %updated.status,
            "Guardian approval recorded"
        );
        Ok(updated)
    }

    /// Ask every source for an approval, in order. Any failure aborts the
    /// whole collection.
    pub async fn collect_approvals(
        &self,
        request: &RecoveryRequest,
        sources: &[Box<dyn ApprovalSource>],
    ) -> Result<RecoveryRequest, RecoveryError> {
        if sources.len() < request.required_approvals {
            return Err(RecoveryError::ThresholdNotMet {
                collected: sources.len(),
                required: request.required_approvals,
            });
        }

        let mut current = request.clone();
        for source in sources {
            info!(recovery_id = %current.id, guardian = %source.guardian(), "Requesting guardian approval");
            let approval = source.approve(&current).await?;
            current = self.record_approval(&current, approval).await?;
        }

        if !current.threshold_met() {
            return Err(RecoveryError::ThresholdNotMet {
                collected: current.approval_count(),
                required: current.required_approvals,
            });
        }
        Ok(current)
    }

    /// Submit an authorized request. Not idempotent.
    pub async fn execute(&self, request: &RecoveryRequest) -> Result<RecoveryRequest, RecoveryError> {
        match request.status {
            RecoveryStatus::Executable => {}
            RecoveryStatus::Pending => {
                return Err(RecoveryError::ThresholdNotMet {
                    collected: request.approval_count(),
                    required: request.required_approvals,
                })
            }
            status => {
                return Err(RecoveryError::InvalidTransition {
                    action: "execute",
                    status,
                })
            }
        }
        self.ensure_module(request.policy, request.module)?;

        let submission = self.backend.execute(request).await?;
        if !submission.success {
            return Err(RecoveryError::submission_failed(
                "recovery execution was not accepted",
                submission.tx_hash,
            ));
        }

        let now = self.clock.now();
        let mut updated = request.clone();
        updated.status = RecoveryStatus::Executed;
        updated.executed_at = Some(now);
        updated.execute_after = Some(
            submission
                .execute_after
                .unwrap_or_else(|| now + policy_delay(request.policy)),
        );
        updated.execute_tx = submission.tx_hash;
        if submission.remote_id.is_some() {
            updated.remote_id = submission.remote_id;
        }

        info!(
            recovery_id = %updated.id,
            account = %updated.account,
            tx_hash = ?updated.execute_tx,
            execute_after = ?updated.execute_after,
            "Recovery executed; grace period started"
        );
        Ok(updated)
    }

    /// Wait until finalization is allowed. The deadline registered on-chain
    /// wins over the locally computed one. Returns the request with the
    /// deadline it waited for.
    pub async fn await_grace_period(
        &self,
        request: &RecoveryRequest,
        shutdown: &CancellationToken,
    ) -> Result<RecoveryRequest, RecoveryError> {
        if request.status != RecoveryStatus::Executed {
            return Err(RecoveryError::InvalidTransition {
                action: "wait on",
                status: request.status,
            });
        }

        let deadline = match self.backend.pending_deadline(request).await {
            Ok(Some(deadline)) => deadline,
            Ok(None) => local_deadline(request),
            Err(e) => {
                warn!(recovery_id = %request.id, error = %e, "Could not read deadline from chain; using local estimate");
                local_deadline(request)
            }
        };
        info!(recovery_id = %request.id, %deadline, "Waiting for grace period");

        loop {
            if shutdown.is_cancelled() {
                return Err(RecoveryError::Aborted);
            }

            let now = self.clock.now();
            if now >= deadline {
                break;
            }
            let remaining = (deadline - now).to_std().unwrap_or_default();
            let step = remaining.min(self.poll_interval);

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Err(RecoveryError::Aborted),
                _ = self.clock.sleep(step) => {
                    info!(recovery_id = %request.id, remaining_secs = remaining.saturating_sub(step).as_secs(), "Grace period running");
                }
            }
        }

        let mut updated = request.clone();
        updated.execute_after = Some(deadline);
        Ok(updated)
    }

    /// Finalize after the grace period. `Ok(None)` when the backend reports
    /// that the finalize call failed.
    pub async fn finalize(
        &self,
        request: &RecoveryRequest,
    ) -> Result<Option<RecoveryRequest>, RecoveryError> {
        if request.status != RecoveryStatus::Executed {
            return Err(RecoveryError::InvalidTransition {
                action: "finalize",
                status: request.status,
            });
        }
        let deadline = local_deadline(request);
        if self.clock.now() < deadline {
            return Err(RecoveryError::GracePeriodActive {
                execute_after: deadline,
            });
        }
        self.ensure_module(request.policy, request.module)?;

        let submission = self.backend.finalize(request).await?;
        if !submission.success {
            warn!(recovery_id = %request.id, tx_hash = ?submission.tx_hash, "Finalize call failed");
            return Ok(None);
        }

        let mut updated = request.clone();
        updated.status = RecoveryStatus::Finalized;
        updated.finalize_tx = submission.tx_hash;
        info!(
            recovery_id = %updated.id,
            account = %updated.account,
            new_owners = ?updated.new_owners,
            tx_hash = ?updated.finalize_tx,
            "Recovery finalized"
        );
        Ok(Some(updated))
    }

    /// Cancel an executed recovery from the account itself.
    pub async fn cancel(&self, request: &RecoveryRequest) -> Result<RecoveryRequest, RecoveryError> {
        if request.status != RecoveryStatus::Executed {
            return Err(RecoveryError::InvalidTransition {
                action: "cancel",
                status: request.status,
            });
        }
        self.ensure_module(request.policy, request.module)?;

        let submission = self.backend.cancel(request).await?;
        if !submission.success {
            return Err(RecoveryError::submission_failed(
                "cancelRecovery was not accepted",
                submission.tx_hash,
            ));
        }

        let mut updated = request.clone();
        updated.status = RecoveryStatus::Cancelled;
        updated.cancel_tx = submission.tx_hash;
        info!(recovery_id = %updated.id, tx_hash = ?updated.cancel_tx, "Recovery cancelled");
        Ok(updated)
    }

    /// Collect, execute, wait out the grace period, then finalize.
    pub async fn drive(
        &self,
        request: &RecoveryRequest,
        sources: &[Box<dyn ApprovalSource>],
        shutdown: &CancellationToken,
    ) -> Result<Option<RecoveryRequest>, RecoveryError> {
        let approved = self.collect_approvals(request, sources).await?;
        if shutdown.is_cancelled() {
            return Err(RecoveryError::Aborted);
        }
        let executed = self.execute(&approved).await?;
        let ready = self.await_grace_period(&executed, shutdown).await?;
        self.finalize(&ready).await
    }

    fn ensure_module(&self, policy: GracePeriodPolicy, module: Address) -> Result<(), RecoveryError> {
        let configured = self.backend.module_address();
        if module != configured {
            return Err(RecoveryError::PolicyMismatch {
                policy,
                requested: module.to_string(),
                configured: configured.to_string(),
            });
        }
        Ok(())
    }
}

fn policy_delay(policy: GracePeriodPolicy) -> chrono::Duration {
    chrono::Duration::seconds(policy.duration().as_secs() as i64)
}

/// Deadline known to the request: the recorded one, else execution time
/// plus the policy delay.
fn local_deadline(request: &RecoveryRequest) -> DateTime<Utc> {
    request.execute_after.unwrap_or_else(|| {
        request.executed_at.unwrap_or(request.created_at) + policy_delay(request.policy)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::{
        ChainClient, ModuleRegistry, MODULE_AFTER_3_DAYS, MODULE_AFTER_3_MINUTES,
    };
    use crate::clock::ManualClock;
    use crate::input::ScriptedInput;
    use crate::models::{ApprovalKind, Channel};
    use crate::providers::{Challenge, ChallengeVerification, RecoveryParams, ServiceError};
    use alloy::primitives::{address, Bytes};
    use alloy::signers::local::PrivateKeySigner;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    const ACCOUNT: Address = address!("1111111111111111111111111111111111111111");
    const NEW_OWNER: Address = address!("2222222222222222222222222222222222222222");

    const HARDHAT_KEYS: [&str; 2] = [
        "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
        "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d",
    ];

    #[derive(Default)]
    struct Calls {
        recorded: Vec<String>,
        executed: usize,
        finalized: usize,
        cancelled: usize,
    }

    struct FakeBackend {
        module: Address,
        calls: Mutex<Calls>,
        chain_deadline: Option<DateTime<Utc>>,
        finalize_succeeds: bool,
    }

    impl FakeBackend {
        fn new(module: Address) -> Self {
            Self {
                module,
                calls: Mutex::new(Calls::default()),
                chain_deadline: None,
                finalize_succeeds: true,
            }
        }
    }

    #[async_trait]
    impl RecoveryBackend for FakeBackend {
        fn module_address(&self) -> Address {
            self.module
        }

        async fn record_approval(
            &self,
            request: &RecoveryRequest,
            approval: &GuardianApproval,
        ) -> Result<Option<String>, RecoveryError> {
            self.calls
                .lock()
                .unwrap()
                .recorded
                .push(approval.guardian.clone());
            Ok(Some(
                request
                    .remote_id
                    .clone()
                    .unwrap_or_else(|| "remote-1".to_string()),
            ))
        }

        async fn execute(&self, _request: &RecoveryRequest) -> Result<Submission, RecoveryError> {
            self.calls.lock().unwrap().executed += 1;
            Ok(Submission {
                success: true,
                tx_hash: Some("0xexec".to_string()),
                execute_after: self.chain_deadline,
                remote_id: None,
            })
        }

        async fn finalize(&self, _request: &RecoveryRequest) -> Result<Submission, RecoveryError> {
            self.calls.lock().unwrap().finalized += 1;
            Ok(if self.finalize_succeeds {
                Submission::succeeded(Some("0xfinal".to_string()))
            } else {
                Submission::failed(None)
            })
        }

        async fn cancel(&self, _request: &RecoveryRequest) -> Result<Submission, RecoveryError> {
            self.calls.lock().unwrap().cancelled += 1;
            Ok(Submission::succeeded(Some("0xcancel".to_string())))
        }

        async fn pending_deadline(
            &self,
            _request: &RecoveryRequest,
        ) -> Result<Option<DateTime<Utc>>, RecoveryError> {
            Ok(self.chain_deadline)
        }
    }

    struct FailingSource;

    #[async_trait]
    impl ApprovalSource for FailingSource {
        fn guardian(&self) -> String {
            "broken".to_string()
        }

        async fn approve(&self, _request: &RecoveryRequest) -> Result<GuardianApproval, RecoveryError> {
            Err(RecoveryError::ChannelVerificationFailed {
                channel: "email".to_string(),
                reason: "code rejected".to_string(),
            })
        }
    }

    struct FakeChallenges {
        accept: bool,
        submitted: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ChallengeService for FakeChallenges {
        async fn request_challenge(
            &self,
            _params: RecoveryParams<'_>,
            channel: Channel,
        ) -> Result<Challenge, ServiceError> {
            Ok(Challenge {
                challenge_id: format!("challenge-{channel}"),
                channel,
                target: None,
            })
        }

        async fn submit_challenge(
            &self,
            challenge_id: &str,
            code: &str,
        ) -> Result<ChallengeVerification, ServiceError> {
            self.submitted
                .lock()
                .unwrap()
                .push((challenge_id.to_string(), code.to_string()));
            Ok(ChallengeVerification {
                verified: self.accept,
                reason: (!self.accept).then(|| "wrong code".to_string()),
            })
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn guardian(index: usize) -> PrivateKeySigner {
        ChainClient::create_signer(HARDHAT_KEYS[index]).unwrap()
    }

    fn eoa(index: usize, clock: &Arc<ManualClock>) -> Box<dyn ApprovalSource> {
        Box::new(EoaGuardian::new(guardian(index), clock.clone()))
    }

    fn eoa_sources(count: usize, clock: &Arc<ManualClock>) -> Vec<Box<dyn ApprovalSource>> {
        (0..count).map(|i| eoa(i, clock)).collect()
    }

    fn orchestrator(backend: FakeBackend) -> (RecoveryOrchestrator<FakeBackend>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at(start()));
        let orchestrator = RecoveryOrchestrator::new(backend, clock.clone())
            .with_poll_interval(Duration::from_secs(60));
        (orchestrator, clock)
    }

    fn draft(required: usize) -> RecoveryDraft {
        RecoveryDraft {
            chain_id: 31337,
            account: ACCOUNT,
            new_owners: vec![NEW_OWNER],
            new_threshold: 1,
            required_approvals: required,
            policy: GracePeriodPolicy::After3Minutes,
            module: MODULE_AFTER_3_MINUTES,
            nonce: U256::ZERO,
        }
    }

    fn signature_approval(index: usize) -> GuardianApproval {
        GuardianApproval::signature(guardian(index).address(), Bytes::from(vec![index as u8; 65]), start())
    }

    #[tokio::test]
    async fn two_guardians_drive_recovery_to_finalized() {
        let (orchestrator, clock) = orchestrator(FakeBackend::new(MODULE_AFTER_3_MINUTES));
        let request = orchestrator.open(draft(2)).unwrap();
        assert_eq!(request.status, RecoveryStatus::Pending);

        let finalized = orchestrator
            .drive(&request, &eoa_sources(2, &clock), &CancellationToken::new())
            .await
            .unwrap()
            .expect("finalize succeeds");

        assert_eq!(finalized.status, RecoveryStatus::Finalized);
        assert_eq!(finalized.approval_count(), 2);
        assert_eq!(finalized.remote_id.as_deref(), Some("remote-1"));
        assert_eq!(finalized.execute_tx.as_deref(), Some("0xexec"));
        assert_eq!(finalized.finalize_tx.as_deref(), Some("0xfinal"));
        assert!(clock.now() >= start() + chrono::Duration::minutes(3));

        // Input request is untouched.
        assert_eq!(request.status, RecoveryStatus::Pending);
        assert!(request.approvals.is_empty());

        let calls = orchestrator.backend().calls.lock().unwrap();
        assert_eq!(calls.recorded.len(), 2);
        assert_eq!(calls.executed, 1);
        assert_eq!(calls.finalized, 1);
    }

    #[tokio::test]
    async fn guardian_signatures_recover_to_guardians() {
        let (orchestrator, clock) = orchestrator(FakeBackend::new(MODULE_AFTER_3_MINUTES));
        let request = orchestrator.open(draft(2)).unwrap();
        let approved = orchestrator
            .collect_approvals(&request, &eoa_sources(2, &clock))
            .await
            .unwrap();
        assert_eq!(approved.status, RecoveryStatus::Executable);

        let domain = crate::blockchain::RecoveryDomain::new(31337, MODULE_AFTER_3_MINUTES);
        let hash = domain.signing_hash(ACCOUNT, &[NEW_OWNER], 1, U256::ZERO);
        for (signer, signature) in approved.signatures() {
            let parsed = alloy::primitives::Signature::try_from(signature.as_ref()).unwrap();
            assert_eq!(parsed.recover_address_from_prehash(&hash).unwrap(), signer);
        }
    }

    #[tokio::test]
    async fn rejected_channel_aborts_before_execution() {
        let (orchestrator, clock) = orchestrator(FakeBackend::new(MODULE_AFTER_3_MINUTES));
        let request = orchestrator.open(draft(2)).unwrap();
        let sources: Vec<Box<dyn ApprovalSource>> = vec![eoa(0, &clock), Box::new(FailingSource)];

        let err = orchestrator
            .drive(&request, &sources, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_matches!(err, RecoveryError::ChannelVerificationFailed { .. });

        let calls = orchestrator.backend().calls.lock().unwrap();
        assert_eq!(calls.executed, 0);
        assert_eq!(calls.recorded.len(), 1);
    }

    #[tokio::test]
    async fn too_few_sources_fail_before_prompting() {
        let (orchestrator, clock) = orchestrator(FakeBackend::new(MODULE_AFTER_3_MINUTES));
        let request = orchestrator.open(draft(3)).unwrap();
        let err = orchestrator
            .collect_approvals(&request, &eoa_sources(2, &clock))
            .await
            .unwrap_err();
        assert_matches!(err, RecoveryError::ThresholdNotMet { collected: 2, required: 3 });
        assert!(orchestrator.backend().calls.lock().unwrap().recorded.is_empty());
    }

    #[tokio::test]
    async fn duplicate_sources_count_once() {
        let (orchestrator, clock) = orchestrator(FakeBackend::new(MODULE_AFTER_3_MINUTES));
        let request = orchestrator.open(draft(2)).unwrap();
        let sources: Vec<Box<dyn ApprovalSource>> = vec![eoa(0, &clock), eoa(0, &clock)];
        let err = orchestrator
            .collect_approvals(&request, &sources)
            .await
            .unwrap_err();
        assert_matches!(err, RecoveryError::ThresholdNotMet { collected: 1, required: 2 });
    }

    #[tokio::test]
    async fn re_recording_replaces_earlier_approval() {
        let (orchestrator, _) = orchestrator(FakeBackend::new(MODULE_AFTER_3_MINUTES));
        let request = orchestrator.open(draft(2)).unwrap();

        let first = orchestrator
            .record_approval(&request, signature_approval(0))
            .await
            .unwrap();
        let mut replacement = signature_approval(0);
        replacement.kind = ApprovalKind::Signature {
            signer: guardian(0).address(),
            signature: Bytes::from(vec![0xee; 65]),
        };
        let second = orchestrator.record_approval(&first, replacement.clone()).await.unwrap();

        assert_eq!(second.approval_count(), 1);
        assert_eq!(second.approvals[0], replacement);
        assert_eq!(second.status, RecoveryStatus::Pending);

        let third = orchestrator
            .record_approval(&second, signature_approval(1))
            .await
            .unwrap();
        assert_eq!(third.status, RecoveryStatus::Executable);
    }

    #[tokio::test]
    async fn execute_requires_threshold() {
        let (orchestrator, _) = orchestrator(FakeBackend::new(MODULE_AFTER_3_MINUTES));
        let request = orchestrator.open(draft(2)).unwrap();
        let partial = orchestrator
            .record_approval(&request, signature_approval(0))
            .await
            .unwrap();

        let err = orchestrator.execute(&partial).await.unwrap_err();
        assert_matches!(err, RecoveryError::ThresholdNotMet { collected: 1, required: 2 });
        assert_eq!(orchestrator.backend().calls.lock().unwrap().executed, 0);
    }

    #[tokio::test]
    async fn mismatched_policy_is_rejected_before_submission() {
        let (orchestrator, _) = orchestrator(FakeBackend::new(MODULE_AFTER_3_DAYS));
        let err = orchestrator.open(draft(1)).unwrap_err();
        assert_matches!(
            err,
            RecoveryError::PolicyMismatch { policy: GracePeriodPolicy::After3Minutes, .. }
        );
        let calls = orchestrator.backend().calls.lock().unwrap();
        assert!(calls.recorded.is_empty());
        assert_eq!(calls.executed, 0);
    }

    #[tokio::test]
    async fn open_rejects_invalid_owner_sets() {
        let (orchestrator, _) = orchestrator(FakeBackend::new(MODULE_AFTER_3_MINUTES));

        let mut duplicated = draft(1);
        duplicated.new_owners = vec![NEW_OWNER, NEW_OWNER];
        assert_matches!(
            orchestrator.open(duplicated),
            Err(RecoveryError::InvalidConfig { .. })
        );

        let mut threshold_too_high = draft(1);
        threshold_too_high.new_threshold = 2;
        assert_matches!(
            orchestrator.open(threshold_too_high),
            Err(RecoveryError::InvalidConfig { .. })
        );

        assert_matches!(
            orchestrator.open(draft(0)),
            Err(RecoveryError::InvalidConfig { .. })
        );
    }

    #[tokio::test]
    async fn finalize_before_deadline_is_rejected() {
        let (orchestrator, clock) = orchestrator(FakeBackend::new(MODULE_AFTER_3_MINUTES));
        let request = orchestrator.open(draft(1)).unwrap();
        let approved = orchestrator
            .record_approval(&request, signature_approval(0))
            .await
            .unwrap();
        let executed = orchestrator.execute(&approved).await.unwrap();

        clock.advance(Duration::from_secs(60));
        let err = orchestrator.finalize(&executed).await.unwrap_err();
        assert_matches!(err, RecoveryError::GracePeriodActive { execute_after }
            if execute_after == start() + chrono::Duration::minutes(3));
        assert_eq!(orchestrator.backend().calls.lock().unwrap().finalized, 0);

        clock.advance(Duration::from_secs(120));
        let finalized = orchestrator.finalize(&executed).await.unwrap().unwrap();
        assert_eq!(finalized.status, RecoveryStatus::Finalized);
    }

    #[tokio::test]
    async fn every_policy_holds_finalize_until_its_deadline() {
        let registry = ModuleRegistry::canonical();
        for policy in GracePeriodPolicy::ALL {
            let module = registry.address_for(policy);
            let (orchestrator, clock) = orchestrator(FakeBackend::new(module));
            let request = orchestrator
                .open(RecoveryDraft {
                    policy,
                    module,
                    ..draft(1)
                })
                .unwrap();
            let approved = orchestrator
                .record_approval(&request, signature_approval(0))
                .await
                .unwrap();
            let executed = orchestrator.execute(&approved).await.unwrap();
            let deadline = start() + policy_delay(policy);
            assert_eq!(executed.execute_after, Some(deadline));

            clock.advance(policy.duration() - Duration::from_secs(1));
            assert_matches!(
                orchestrator.finalize(&executed).await,
                Err(RecoveryError::GracePeriodActive { execute_after }) if execute_after == deadline,
                "{policy} finalized early"
            );
            assert_eq!(orchestrator.backend().calls.lock().unwrap().finalized, 0);

            clock.advance(Duration::from_secs(1));
            let finalized = orchestrator.finalize(&executed).await.unwrap().unwrap();
            assert_eq!(finalized.status, RecoveryStatus::Finalized);
        }
    }

    #[tokio::test]
    async fn two_guardian_recovery_step_by_step() {
        let (orchestrator, clock) = orchestrator(FakeBackend::new(MODULE_AFTER_3_MINUTES));
        let request = orchestrator.open(draft(2)).unwrap();

        let first = eoa(0, &clock).approve(&request).await.unwrap();
        let partial = orchestrator.record_approval(&request, first).await.unwrap();
        assert_eq!(partial.status, RecoveryStatus::Pending);
        assert_matches!(
            orchestrator.execute(&partial).await,
            Err(RecoveryError::ThresholdNotMet { collected: 1, required: 2 })
        );
        assert_eq!(orchestrator.backend().calls.lock().unwrap().executed, 0);

        let second = eoa(1, &clock).approve(&partial).await.unwrap();
        let approved = orchestrator.record_approval(&partial, second).await.unwrap();
        assert_eq!(approved.status, RecoveryStatus::Executable);

        let executed = orchestrator.execute(&approved).await.unwrap();
        assert_eq!(executed.status, RecoveryStatus::Executed);
        assert_eq!(executed.execute_tx.as_deref(), Some("0xexec"));

        assert_matches!(
            orchestrator.finalize(&executed).await,
            Err(RecoveryError::GracePeriodActive { .. })
        );

        clock.advance(GracePeriodPolicy::After3Minutes.duration());
        let finalized = orchestrator.finalize(&executed).await.unwrap().unwrap();
        assert_eq!(finalized.status, RecoveryStatus::Finalized);
        assert_eq!(finalized.approval_count(), 2);

        let calls = orchestrator.backend().calls.lock().unwrap();
        assert_eq!(calls.executed, 1);
        assert_eq!(calls.finalized, 1);
    }

    #[tokio::test]
    async fn approvals_carry_the_orchestrator_clock() {
        let (orchestrator, clock) = orchestrator(FakeBackend::new(MODULE_AFTER_3_MINUTES));
        clock.advance(Duration::from_secs(90));
        let request = orchestrator.open(draft(2)).unwrap();

        let service = Arc::new(FakeChallenges {
            accept: true,
            submitted: Mutex::new(Vec::new()),
        });
        let sources: Vec<Box<dyn ApprovalSource>> = vec![
            eoa(0, &clock),
            Box::new(ChannelGuardian::new(
                service,
                Arc::new(ScriptedInput::new(["123456"])),
                clock.clone(),
                Channel::Email,
                "owner@example.org",
            )),
        ];
        let approved = orchestrator.collect_approvals(&request, &sources).await.unwrap();

        let expected = start() + chrono::Duration::seconds(90);
        assert_eq!(approved.created_at, expected);
        assert!(approved
            .approvals
            .iter()
            .all(|approval| approval.verified_at == expected));
    }

    #[tokio::test]
    async fn failed_finalize_returns_none() {
        let mut backend = FakeBackend::new(MODULE_AFTER_3_MINUTES);
        backend.finalize_succeeds = false;
        let (orchestrator, clock) = orchestrator(backend);
        let request = orchestrator.open(draft(1)).unwrap();

        let outcome = orchestrator
            .drive(&request, &eoa_sources(1, &clock), &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.is_none());
        assert_eq!(orchestrator.backend().calls.lock().unwrap().finalized, 1);
    }

    #[tokio::test]
    async fn chain_deadline_overrides_local_estimate() {
        let chain_deadline = start() + chrono::Duration::minutes(10);
        let mut backend = FakeBackend::new(MODULE_AFTER_3_MINUTES);
        backend.chain_deadline = Some(chain_deadline);
        let (orchestrator, clock) = orchestrator(backend);

        let request = orchestrator.open(draft(1)).unwrap();
        let approved = orchestrator
            .record_approval(&request, signature_approval(0))
            .await
            .unwrap();
        let executed = orchestrator.execute(&approved).await.unwrap();
        let ready = orchestrator
            .await_grace_period(&executed, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(ready.execute_after, Some(chain_deadline));
        assert!(clock.now() >= chain_deadline);
    }

    #[tokio::test]
    async fn cancelled_token_aborts_the_wait() {
        let (orchestrator, _) = orchestrator(FakeBackend::new(MODULE_AFTER_3_MINUTES));
        let request = orchestrator.open(draft(1)).unwrap();
        let approved = orchestrator
            .record_approval(&request, signature_approval(0))
            .await
            .unwrap();
        let executed = orchestrator.execute(&approved).await.unwrap();

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let err = orchestrator
            .await_grace_period(&executed, &shutdown)
            .await
            .unwrap_err();
        assert_matches!(err, RecoveryError::Aborted);
    }

    #[tokio::test]
    async fn cancel_only_while_executed() {
        let (orchestrator, _) = orchestrator(FakeBackend::new(MODULE_AFTER_3_MINUTES));
        let request = orchestrator.open(draft(1)).unwrap();

        let snapshot = request.clone();
        let err = orchestrator.cancel(&request).await.unwrap_err();
        assert_matches!(
            err,
            RecoveryError::InvalidTransition { action: "cancel", status: RecoveryStatus::Pending }
        );
        assert_eq!(request, snapshot);
        assert_eq!(orchestrator.backend().calls.lock().unwrap().cancelled, 0);

        let approved = orchestrator
            .record_approval(&request, signature_approval(0))
            .await
            .unwrap();
        let executed = orchestrator.execute(&approved).await.unwrap();
        let cancelled = orchestrator.cancel(&executed).await.unwrap();
        assert_eq!(cancelled.status, RecoveryStatus::Cancelled);
        assert_eq!(cancelled.cancel_tx.as_deref(), Some("0xcancel"));

        assert_matches!(
            orchestrator.cancel(&cancelled).await,
            Err(RecoveryError::InvalidTransition { status: RecoveryStatus::Cancelled, .. })
        );
        assert_matches!(
            orchestrator.finalize(&cancelled).await,
            Err(RecoveryError::InvalidTransition { status: RecoveryStatus::Cancelled, .. })
        );
    }

    #[tokio::test]
    async fn finalized_recovery_cannot_be_cancelled() {
        let (orchestrator, clock) = orchestrator(FakeBackend::new(MODULE_AFTER_3_MINUTES));
        let request = orchestrator.open(draft(1)).unwrap();
        let approved = orchestrator
            .record_approval(&request, signature_approval(0))
            .await
            .unwrap();
        let executed = orchestrator.execute(&approved).await.unwrap();
        clock.advance(GracePeriodPolicy::After3Minutes.duration());
        let finalized = orchestrator.finalize(&executed).await.unwrap().unwrap();

        let snapshot = finalized.clone();
        assert_matches!(
            orchestrator.cancel(&finalized).await,
            Err(RecoveryError::InvalidTransition { action: "cancel", status: RecoveryStatus::Finalized })
        );
        assert_eq!(finalized, snapshot);
        assert_eq!(orchestrator.backend().calls.lock().unwrap().cancelled, 0);
    }

    #[tokio::test]
    async fn channel_guardians_verify_codes_in_order() {
        let (orchestrator, clock) = orchestrator(FakeBackend::new(MODULE_AFTER_3_MINUTES));
        let request = orchestrator.open(draft(2)).unwrap();

        let service = Arc::new(FakeChallenges {
            accept: true,
            submitted: Mutex::new(Vec::new()),
        });
        let input = Arc::new(ScriptedInput::new(["111111", "222222"]));
        let sources: Vec<Box<dyn ApprovalSource>> = vec![
            Box::new(ChannelGuardian::new(
                service.clone(),
                input.clone(),
                clock.clone(),
                Channel::Email,
                "owner@example.org",
            )),
            Box::new(ChannelGuardian::new(
                service.clone(),
                input.clone(),
                clock.clone(),
                Channel::Sms,
                "+15550100",
            )),
        ];

        let approved = orchestrator.collect_approvals(&request, &sources).await.unwrap();
        assert!(approved.is_custodial());
        assert_eq!(
            approved.challenge_ids(),
            vec!["challenge-email", "challenge-sms"]
        );
        assert_eq!(
            *service.submitted.lock().unwrap(),
            vec![
                ("challenge-email".to_string(), "111111".to_string()),
                ("challenge-sms".to_string(), "222222".to_string()),
            ]
        );
        assert_eq!(input.asked().len(), 2);
    }

    #[tokio::test]
    async fn rejected_code_stops_remaining_channels() {
        let (orchestrator, clock) = orchestrator(FakeBackend::new(MODULE_AFTER_3_MINUTES));
        let request = orchestrator.open(draft(2)).unwrap();

        let service = Arc::new(FakeChallenges {
            accept: false,
            submitted: Mutex::new(Vec::new()),
        });
        let input = Arc::new(ScriptedInput::new(["000000", "222222"]));
        let sources: Vec<Box<dyn ApprovalSource>> = vec![
            Box::new(ChannelGuardian::new(
                service.clone(),
                input.clone(),
                clock.clone(),
                Channel::Email,
                "owner@example.org",
            )),
            Box::new(ChannelGuardian::new(
                service.clone(),
                input.clone(),
                clock.clone(),
                Channel::Sms,
                "+15550100",
            )),
        ];

        let err = orchestrator
            .drive(&request, &sources, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_matches!(
            err,
            RecoveryError::ChannelVerificationFailed { ref channel, ref reason }
                if channel == "email" && reason == "wrong code"
        );
        assert_eq!(input.asked().len(), 1);
        assert_eq!(orchestrator.backend().calls.lock().unwrap().executed, 0);
    }

    #[tokio::test]
    async fn empty_code_is_rejected_without_submitting() {
        let service = Arc::new(FakeChallenges {
            accept: true,
            submitted: Mutex::new(Vec::new()),
        });
        let (orchestrator, clock) = orchestrator(FakeBackend::new(MODULE_AFTER_3_MINUTES));
        let source = ChannelGuardian::new(
            service.clone(),
            Arc::new(ScriptedInput::new([""])),
            clock,
            Channel::Sms,
            "+15550100",
        );
        let request = orchestrator.open(draft(1)).unwrap();

        assert_matches!(
            source.approve(&request).await,
            Err(RecoveryError::ChannelVerificationFailed { .. })
        );
        assert!(service.submitted.lock().unwrap().is_empty());
    }
}
