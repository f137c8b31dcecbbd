// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Guardian approval sources.
//!
//! - [`EoaGuardian`] signs the module's `ExecuteRecovery` message locally.
//! - [`ChannelGuardian`] asks the recovery service for a one-time code on a
//!   channel and submits the code the operator types in.

use std::sync::Arc;

use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::blockchain::RecoveryDomain;
use crate::clock::Clock;
use crate::error::RecoveryError;
use crate::input::InputProvider;
use crate::models::{Channel, GuardianApproval, RecoveryRequest};
use crate::providers::{
    Challenge, ChallengeVerification, RecoveryParams, RecoveryServiceClient, ServiceError,
};

/// Something that can produce one guardian approval for a request.
#[async_trait]
pub trait ApprovalSource: Send + Sync {
    /// Guardian identity, for narration.
    fn guardian(&self) -> String;

    async fn approve(&self, request: &RecoveryRequest) -> Result<GuardianApproval, RecoveryError>;
}

/// Guardian holding its own key.
pub struct EoaGuardian {
    signer: PrivateKeySigner,
    clock: Arc<dyn Clock>,
}

impl EoaGuardian {
    pub fn new(signer: PrivateKeySigner, clock: Arc<dyn Clock>) -> Self {
        Self { signer, clock }
    }
}

#[async_trait]
impl ApprovalSource for EoaGuardian {
    fn guardian(&self) -> String {
        self.signer.address().to_string()
    }

    async fn approve(&self, request: &RecoveryRequest) -> Result<GuardianApproval, RecoveryError> {
        let domain = RecoveryDomain::new(request.chain_id, request.module);
        let signature = domain.sign(
            &self.signer,
            request.account,
            &request.new_owners,
            request.new_threshold,
            request.nonce,
        )?;

        info!(
            guardian = %self.signer.address(),
            account = %request.account,
            nonce = %request.nonce,
            "Guardian signed recovery"
        );
        Ok(GuardianApproval::signature(
            self.signer.address(),
            signature,
            self.clock.now(),
        ))
    }
}

/// Challenge endpoints of the custodial guardian.
#[async_trait]
pub trait ChallengeService: Send + Sync {
    async fn request_challenge(
        &self,
        params: RecoveryParams<'_>,
        channel: Channel,
    ) -> Result<Challenge, ServiceError>;

    async fn submit_challenge(
        &self,
        challenge_id: &str,
        code: &str,
    ) -> Result<ChallengeVerification, ServiceError>;
}

#[async_trait]
impl ChallengeService for RecoveryServiceClient {
    async fn request_challenge(
        &self,
        params: RecoveryParams<'_>,
        channel: Channel,
    ) -> Result<Challenge, ServiceError> {
        RecoveryServiceClient::request_challenge(self, params, channel).await
    }

    async fn submit_challenge(
        &self,
        challenge_id: &str,
        code: &str,
    ) -> Result<ChallengeVerification, ServiceError> {
        RecoveryServiceClient::submit_challenge(self, challenge_id, code).await
    }
}

/// One registered verification channel of the custodial guardian.
///
/// A rejected code is fatal: there is no second attempt on the same channel.
pub struct ChannelGuardian {
    service: Arc<dyn ChallengeService>,
    input: Arc<dyn InputProvider>,
    clock: Arc<dyn Clock>,
    channel: Channel,
    target: String,
}

impl ChannelGuardian {
    pub fn new(
        service: Arc<dyn ChallengeService>,
        input: Arc<dyn InputProvider>,
        clock: Arc<dyn Clock>,
        channel: Channel,
        target: impl Into<String>,
    ) -> Self {
        Self {
            service,
            input,
            clock,
            channel,
            target: target.into(),
        }
    }

    fn rejected(&self, reason: impl Into<String>) -> RecoveryError {
        RecoveryError::ChannelVerificationFailed {
            channel: self.channel.to_string(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ApprovalSource for ChannelGuardian {
    fn guardian(&self) -> String {
        format!("{}:{}", self.channel, self.target)
    }

    async fn approve(&self, request: &RecoveryRequest) -> Result<GuardianApproval, RecoveryError> {
        let challenge = self
            .service
            .request_challenge(request.service_params(), self.channel)
            .await?;

        let destination = challenge.target.as_deref().unwrap_or(&self.target);
        let code = self
            .input
            .prompt(&format!(
                "One-time code sent via {} to {}",
                self.channel, destination
            ))
            .await?;
        if code.is_empty() {
            return Err(self.rejected("no code entered"));
        }

        let verification = match self
            .service
            .submit_challenge(&challenge.challenge_id, &code)
            .await
        {
            Ok(verification) => verification,
            Err(ServiceError::Api { status, message }) => {
                return Err(self.rejected(format!("service returned {status}: {message}")))
            }
            Err(other) => return Err(other.into()),
        };

        if !verification.verified {
            warn!(channel = %self.channel, reason = ?verification.reason, "Channel verification rejected");
            return Err(self.rejected(
                verification
                    .reason
                    .unwrap_or_else(|| "code rejected".to_string()),
            ));
        }

        info!(channel = %self.channel, challenge_id = %challenge.challenge_id, "Channel verified");
        Ok(GuardianApproval::one_time_code(
            self.channel,
            &self.target,
            challenge.challenge_id,
            self.clock.now(),
        ))
    }
}
