// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Recovery Data Models
//!
//! The state object that every lifecycle step takes and returns.
//!
//! ## Model Categories
//!
//! - **Policies**: [`GracePeriodPolicy`] selects both the finalization delay
//!   and the deployed module instance.
//! - **Approvals**: [`GuardianApproval`] is one guardian's proof, either an
//!   EIP-712 signature or a verified one-time code.
//! - **Requests**: [`RecoveryRequest`] is one in-flight recovery attempt.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::providers::RecoveryParams;

// =============================================================================
// Grace Period Policy
// =============================================================================

/// Delay between execution and finalization.
///
/// Each variant corresponds to a separately deployed recovery module, so the
/// policy chosen when guardians are registered must be the one used when the
/// recovery is executed and finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GracePeriodPolicy {
    After3Minutes,
    After3Days,
    After7Days,
    After14Days,
}

impl GracePeriodPolicy {
    pub const ALL: [GracePeriodPolicy; 4] = [
        GracePeriodPolicy::After3Minutes,
        GracePeriodPolicy::After3Days,
        GracePeriodPolicy::After7Days,
        GracePeriodPolicy::After14Days,
    ];

    pub fn duration(self) -> Duration {
        const DAY: u64 = 24 * 60 * 60;
        match self {
            Self::After3Minutes => Duration::from_secs(3 * 60),
            Self::After3Days => Duration::from_secs(3 * DAY),
            Self::After7Days => Duration::from_secs(7 * DAY),
            Self::After14Days => Duration::from_secs(14 * DAY),
        }
    }

    /// Short suffix used in per-policy environment overrides (`3M`, `7D`, ...).
    pub fn env_suffix(self) -> &'static str {
        match self {
            Self::After3Minutes => "3M",
            Self::After3Days => "3D",
            Self::After7Days => "7D",
            Self::After14Days => "14D",
        }
    }
}

impl fmt::Display for GracePeriodPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::After3Minutes => "3 minutes",
            Self::After3Days => "3 days",
            Self::After7Days => "7 days",
            Self::After14Days => "14 days",
        };
        f.write_str(label)
    }
}

impl FromStr for GracePeriodPolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized: String = raw
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .collect();
        match normalized.as_str() {
            "3m" | "3min" | "3mins" | "3minutes" | "after3minutes" => Ok(Self::After3Minutes),
            "3d" | "3days" | "after3days" => Ok(Self::After3Days),
            "7d" | "7days" | "after7days" => Ok(Self::After7Days),
            "14d" | "14days" | "after14days" => Ok(Self::After14Days),
            _ => Err(format!(
                "unknown grace period `{raw}` (expected one of 3m, 3d, 7d, 14d)"
            )),
        }
    }
}

// =============================================================================
// Lifecycle Status
// =============================================================================

/// Lifecycle state of a [`RecoveryRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryStatus {
    /// Approvals are still being collected.
    Pending,
    /// Enough approvals to submit.
    Executable,
    /// Submitted on-chain; the grace period is running.
    Executed,
    Finalized,
    Cancelled,
}

impl fmt::Display for RecoveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "PENDING",
            Self::Executable => "EXECUTABLE",
            Self::Executed => "EXECUTED",
            Self::Finalized => "FINALIZED",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(label)
    }
}

// =============================================================================
// Guardian Approvals
// =============================================================================

/// Out-of-band channel a custodial guardian verifies through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Email => "email",
            Self::Sms => "sms",
        })
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(Self::Email),
            "sms" | "phone" => Ok(Self::Sms),
            other => Err(format!("unknown channel `{other}` (expected email or sms)")),
        }
    }
}

/// How a guardian proved its approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApprovalKind {
    /// EIP-712 `ExecuteRecovery` signature by an EOA guardian.
    Signature { signer: Address, signature: Bytes },
    /// One-time code accepted by the recovery service.
    OneTimeCode { channel: Channel, challenge_id: String },
}

/// One guardian's proof of authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardianApproval {
    /// Guardian identity: signer address or `channel:target`.
    pub guardian: String,
    pub kind: ApprovalKind,
    pub verified_at: DateTime<Utc>,
}

impl GuardianApproval {
    pub fn signature(signer: Address, signature: Bytes, verified_at: DateTime<Utc>) -> Self {
        Self {
            guardian: signer.to_string(),
            kind: ApprovalKind::Signature { signer, signature },
            verified_at,
        }
    }

    pub fn one_time_code(
        channel: Channel,
        target: &str,
        challenge_id: impl Into<String>,
        verified_at: DateTime<Utc>,
    ) -> Self {
        Self {
            guardian: format!("{channel}:{target}"),
            kind: ApprovalKind::OneTimeCode {
                channel,
                challenge_id: challenge_id.into(),
            },
            verified_at,
        }
    }
}

// =============================================================================
// Recovery Request
// =============================================================================

/// One in-flight recovery attempt.
///
/// Lifecycle functions never mutate a request in place; they return an
/// updated copy so the previous state stays available to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryRequest {
    pub id: Uuid,
    pub chain_id: u64,
    /// Smart account being recovered.
    pub account: Address,
    pub new_owners: Vec<Address>,
    /// Signing threshold the account will have after recovery.
    pub new_threshold: u64,
    pub status: RecoveryStatus,
    pub approvals: Vec<GuardianApproval>,
    /// Guardian approvals needed before execution.
    pub required_approvals: usize,
    pub policy: GracePeriodPolicy,
    /// Module instance the policy resolved to.
    pub module: Address,
    /// Module nonce the guardian signatures commit to.
    pub nonce: U256,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    /// Earliest moment finalization is legal.
    pub execute_after: Option<DateTime<Utc>>,
    /// Request id assigned by the recovery service, when one is used.
    pub remote_id: Option<String>,
    pub execute_tx: Option<String>,
    pub finalize_tx: Option<String>,
    pub cancel_tx: Option<String>,
}

impl RecoveryRequest {
    /// Recovery parameters in the shape the recovery service expects.
    pub fn service_params(&self) -> RecoveryParams<'_> {
        RecoveryParams {
            chain_id: self.chain_id,
            account: self.account,
            new_owners: &self.new_owners,
            new_threshold: self.new_threshold,
        }
    }

    /// Count of distinct guardians that approved.
    pub fn approval_count(&self) -> usize {
        self.approvals.len()
    }

    pub fn threshold_met(&self) -> bool {
        self.approval_count() >= self.required_approvals
    }

    /// Signature approvals ordered by signer address.
    pub fn signatures(&self) -> Vec<(Address, Bytes)> {
        let mut signatures: Vec<(Address, Bytes)> = self
            .approvals
            .iter()
            .filter_map(|approval| match &approval.kind {
                ApprovalKind::Signature { signer, signature } => Some((*signer, signature.clone())),
                ApprovalKind::OneTimeCode { .. } => None,
            })
            .collect();
        signatures.sort_by_key(|(signer, _)| *signer);
        signatures
    }

    /// Challenge ids of verified one-time-code approvals.
    pub fn challenge_ids(&self) -> Vec<String> {
        self.approvals
            .iter()
            .filter_map(|approval| match &approval.kind {
                ApprovalKind::OneTimeCode { challenge_id, .. } => Some(challenge_id.clone()),
                ApprovalKind::Signature { .. } => None,
            })
            .collect()
    }

    /// Whether every approval is a one-time-code approval (custodial variant).
    pub fn is_custodial(&self) -> bool {
        !self.approvals.is_empty()
            && self
                .approvals
                .iter()
                .all(|approval| matches!(approval.kind, ApprovalKind::OneTimeCode { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grace_period_parses_common_spellings() {
        assert_eq!("3m".parse(), Ok(GracePeriodPolicy::After3Minutes));
        assert_eq!("3 minutes".parse(), Ok(GracePeriodPolicy::After3Minutes));
        assert_eq!("7_days".parse(), Ok(GracePeriodPolicy::After7Days));
        assert_eq!("After14Days".parse(), Ok(GracePeriodPolicy::After14Days));
        assert!("5d".parse::<GracePeriodPolicy>().is_err());
    }

    #[test]
    fn grace_period_durations_are_ordered() {
        let durations: Vec<Duration> = GracePeriodPolicy::ALL
            .iter()
            .map(|policy| policy.duration())
            .collect();
        assert_eq!(durations[0], Duration::from_secs(180));
        assert!(durations.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn status_serializes_in_upper_case() {
        assert_eq!(
            serde_json::to_string(&RecoveryStatus::Executable).unwrap(),
            "\"EXECUTABLE\""
        );
    }

    #[test]
    fn channel_parses_phone_alias() {
        assert_eq!("SMS".parse(), Ok(Channel::Sms));
        assert_eq!("phone".parse(), Ok(Channel::Sms));
        assert_eq!("email".parse(), Ok(Channel::Email));
        assert!("fax".parse::<Channel>().is_err());
    }
}
