// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::error::Error as StdError;

use chrono::{DateTime, Utc};

use crate::blockchain::ChainError;
use crate::models::{GracePeriodPolicy, RecoveryStatus};
use crate::providers::ServiceError;

/// Every way a recipe can stop. None of these are retried.
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error("Missing configuration: {0}")]
    MissingConfig(String),

    #[error("Invalid configuration for {name}: {reason}")]
    InvalidConfig { name: String, reason: String },

    #[error("Threshold not met: {collected} of {required} guardian approvals")]
    ThresholdNotMet { collected: usize, required: usize },

    #[error("Verification failed on channel {channel}: {reason}")]
    ChannelVerificationFailed { channel: String, reason: String },

    #[error("Cannot {action} a recovery request that is {status}")]
    InvalidTransition {
        action: &'static str,
        status: RecoveryStatus,
    },

    #[error("Grace period still running; finalization allowed after {execute_after}")]
    GracePeriodActive { execute_after: DateTime<Utc> },

    #[error(
        "Recovery request targets the {policy} module at {requested} but the backend addresses {configured}"
    )]
    PolicyMismatch {
        policy: GracePeriodPolicy,
        requested: String,
        configured: String,
    },

    #[error("Recovery module {module} is not enabled on account {account}")]
    ModuleNotEnabled { account: String, module: String },

    #[error("On-chain submission failed: {reason}{}", tx_suffix(.tx_hash))]
    SubmissionFailed {
        reason: String,
        tx_hash: Option<String>,
    },

    #[error("Recovery service error")]
    Service(#[from] ServiceError),

    #[error("Chain error")]
    Chain(#[from] ChainError),

    #[error("Operator input failed: {0}")]
    Input(String),

    #[error("Aborted by operator")]
    Aborted,
}

fn tx_suffix(tx_hash: &Option<String>) -> String {
    tx_hash
        .as_ref()
        .map(|hash| format!(" (tx {hash})"))
        .unwrap_or_default()
}

impl RecoveryError {
    pub fn invalid_config(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn submission_failed(reason: impl Into<String>, tx_hash: Option<String>) -> Self {
        Self::SubmissionFailed {
            reason: reason.into(),
            tx_hash,
        }
    }
}

/// Render an error with every nested cause, one per line.
pub fn error_chain(err: &dyn StdError) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str("\n  caused by: ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}
