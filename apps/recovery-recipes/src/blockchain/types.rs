// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Blockchain types and constants.

use std::collections::HashMap;
use std::time::Duration;

use alloy::primitives::{address, Address, Bytes, U256};
use serde::{Deserialize, Serialize};

use crate::models::GracePeriodPolicy;

/// EVM network configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Chain ID
    pub chain_id: u64,
    /// RPC endpoint URL
    pub rpc_url: url::Url,
    /// Block explorer URL, used for operator links only
    pub explorer_url: Option<String>,
}

impl NetworkConfig {
    /// Explorer link for a transaction hash, if an explorer is configured.
    pub fn tx_link(&self, tx_hash: &str) -> Option<String> {
        self.explorer_url
            .as_ref()
            .map(|base| format!("{}/tx/{}", base.trim_end_matches('/'), tx_hash))
    }
}

/// Deployed social recovery module, 3-minute grace period (testing only).
pub const MODULE_AFTER_3_MINUTES: Address = address!("949d01d424be050d09c16025dd007cb59b3a8c66");
/// Deployed social recovery module, 3-day grace period.
pub const MODULE_AFTER_3_DAYS: Address = address!("38275826e1933303e508433dd5f289315da2541c");
/// Deployed social recovery module, 7-day grace period.
pub const MODULE_AFTER_7_DAYS: Address = address!("088f6cfd8bb1ddb1bb069ccb3fc1a98927d233f2");
/// Deployed social recovery module, 14-day grace period.
pub const MODULE_AFTER_14_DAYS: Address = address!("9bacd92f4687db306d7ded5d4513a51ea05df25b");

/// Safe `MultiSendCallOnly` v1.4.1.
pub const DEFAULT_MULTISEND_CALL_ONLY: Address =
    address!("9641d764fc13c8b624c04430c7356c1c7c8102e2");

/// Maps each grace-period policy to the module instance it addresses.
#[derive(Debug, Clone)]
pub struct ModuleRegistry {
    modules: HashMap<GracePeriodPolicy, Address>,
}

impl ModuleRegistry {
    /// Registry with the canonical deployments.
    pub fn canonical() -> Self {
        let modules = GracePeriodPolicy::ALL
            .into_iter()
            .map(|policy| (policy, canonical_module(policy)))
            .collect();
        Self { modules }
    }

    /// Replace the module address for one policy (local deployments, forks).
    pub fn with_override(mut self, policy: GracePeriodPolicy, module: Address) -> Self {
        self.modules.insert(policy, module);
        self
    }

    pub fn address_for(&self, policy: GracePeriodPolicy) -> Address {
        self.modules
            .get(&policy)
            .copied()
            .unwrap_or_else(|| canonical_module(policy))
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::canonical()
    }
}

fn canonical_module(policy: GracePeriodPolicy) -> Address {
    match policy {
        GracePeriodPolicy::After3Minutes => MODULE_AFTER_3_MINUTES,
        GracePeriodPolicy::After3Days => MODULE_AFTER_3_DAYS,
        GracePeriodPolicy::After7Days => MODULE_AFTER_7_DAYS,
        GracePeriodPolicy::After14Days => MODULE_AFTER_14_DAYS,
    }
}

/// A call the smart account should perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

impl Call {
    pub fn new(to: Address, data: impl Into<Bytes>) -> Self {
        Self {
            to,
            value: U256::ZERO,
            data: data.into(),
        }
    }
}

/// Handle returned by a submission, used to poll for inclusion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationHandle {
    pub tx_hash: String,
}

/// Receipt of an included submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InclusionReceipt {
    pub tx_hash: String,
    pub block_number: u64,
    pub success: bool,
}

/// How long and how often to poll for inclusion.
#[derive(Debug, Clone, Copy)]
pub struct InclusionPolicy {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for InclusionPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(180),
        }
    }
}
