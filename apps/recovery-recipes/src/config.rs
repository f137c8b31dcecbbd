// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Recipe Configuration
//!
//! Recipes read their settings from the environment. A required value that
//! is not set is asked for through the [`InputProvider`]; an empty answer is
//! a configuration error.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `RPC_URL` | JSON-RPC endpoint of the target chain | Prompted |
//! | `CHAIN_ID` | Expected chain id (checked against the node) | Prompted |
//! | `EXPLORER_URL` | Block explorer base URL for transaction links | None |
//! | `SAFE_ADDRESS` | Safe smart account being protected or recovered | Prompted |
//! | `OWNER_PRIVATE_KEY` | Owner key (hex or PEM) that executes Safe transactions | Prompted |
//! | `RELAYER_PRIVATE_KEY` | Key that pays for relayed recovery calls | First guardian key |
//! | `GUARDIAN_PRIVATE_KEYS` | Comma-separated guardian keys (hex) | Prompted |
//! | `GUARDIAN_ADDRESSES` | Comma-separated guardian addresses to register | Derived from keys |
//! | `REVOKE_GUARDIAN_ADDRESSES` | Comma-separated guardians to remove during setup | None |
//! | `GUARDIAN_THRESHOLD` | Guardian approvals required to recover | Number of guardians |
//! | `NEW_OWNER_ADDRESSES` | Comma-separated owners after recovery | Prompted |
//! | `NEW_THRESHOLD` | Safe threshold after recovery | `1` |
//! | `GRACE_PERIOD` | `3m`, `3d`, `7d` or `14d`; selects the module instance | Prompted |
//! | `RECOVERY_MODULE_<3M\|3D\|7D\|14D>` | Module address override for one grace period | Canonical deployment |
//! | `RECOVERY_SERVICE_URL` | Recovery service base URL | Prompted when needed |
//! | `ALERTS_SERVICE_URL` | Alerts endpoints base URL | `RECOVERY_SERVICE_URL` |
//! | `RECOVERY_CHANNELS` | Comma-separated custodial channels (`email`, `sms`) | `email` |
//! | `RECOVERY_EMAIL` | Email address of the email channel | Prompted when needed |
//! | `RECOVERY_PHONE` | Phone number of the sms channel | Prompted when needed |
//! | `MULTISEND_ADDRESS` | `MultiSendCallOnly` used to batch Safe calls | v1.4.1 deployment |
//! | `INCLUSION_POLL_INTERVAL_SECS` | Seconds between receipt polls | `2` |
//! | `INCLUSION_TIMEOUT_SECS` | Seconds to wait for inclusion | `180` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |
//!
//! Any key variable may instead be given as `<NAME>_PATH`, pointing to a
//! file holding the hex key or PEM document.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;

use crate::blockchain::{
    load_signer, InclusionPolicy, ModuleRegistry, NetworkConfig, DEFAULT_MULTISEND_CALL_ONLY,
};
use crate::error::RecoveryError;
use crate::input::InputProvider;
use crate::models::{Channel, GracePeriodPolicy};

pub const RPC_URL_ENV: &str = "RPC_URL";
pub const CHAIN_ID_ENV: &str = "CHAIN_ID";
pub const EXPLORER_URL_ENV: &str = "EXPLORER_URL";
pub const SAFE_ADDRESS_ENV: &str = "SAFE_ADDRESS";
pub const OWNER_PRIVATE_KEY_ENV: &str = "OWNER_PRIVATE_KEY";
pub const RELAYER_PRIVATE_KEY_ENV: &str = "RELAYER_PRIVATE_KEY";
pub const GUARDIAN_PRIVATE_KEYS_ENV: &str = "GUARDIAN_PRIVATE_KEYS";
pub const GUARDIAN_ADDRESSES_ENV: &str = "GUARDIAN_ADDRESSES";
pub const REVOKE_GUARDIAN_ADDRESSES_ENV: &str = "REVOKE_GUARDIAN_ADDRESSES";
pub const GUARDIAN_THRESHOLD_ENV: &str = "GUARDIAN_THRESHOLD";
pub const NEW_OWNER_ADDRESSES_ENV: &str = "NEW_OWNER_ADDRESSES";
pub const NEW_THRESHOLD_ENV: &str = "NEW_THRESHOLD";
pub const GRACE_PERIOD_ENV: &str = "GRACE_PERIOD";
pub const RECOVERY_MODULE_ENV_PREFIX: &str = "RECOVERY_MODULE_";
pub const RECOVERY_SERVICE_URL_ENV: &str = "RECOVERY_SERVICE_URL";
pub const ALERTS_SERVICE_URL_ENV: &str = "ALERTS_SERVICE_URL";
pub const RECOVERY_CHANNELS_ENV: &str = "RECOVERY_CHANNELS";
pub const RECOVERY_EMAIL_ENV: &str = "RECOVERY_EMAIL";
pub const RECOVERY_PHONE_ENV: &str = "RECOVERY_PHONE";
pub const MULTISEND_ADDRESS_ENV: &str = "MULTISEND_ADDRESS";
pub const INCLUSION_POLL_INTERVAL_ENV: &str = "INCLUSION_POLL_INTERVAL_SECS";
pub const INCLUSION_TIMEOUT_ENV: &str = "INCLUSION_TIMEOUT_SECS";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

const PATH_SUFFIX: &str = "_PATH";

type Lookup = dyn Fn(&str) -> Option<String> + Send + Sync;

/// Typed access to recipe settings.
pub struct Settings {
    lookup: Box<Lookup>,
    input: Arc<dyn InputProvider>,
}

impl Settings {
    /// Settings backed by the process environment.
    pub fn from_env(input: Arc<dyn InputProvider>) -> Self {
        Self::with_lookup(|name| std::env::var(name).ok(), input)
    }

    pub fn with_lookup<F>(lookup: F, input: Arc<dyn InputProvider>) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            lookup: Box::new(lookup),
            input,
        }
    }

    pub fn input(&self) -> Arc<dyn InputProvider> {
        self.input.clone()
    }

    /// Non-empty, trimmed value of `name`, if set.
    pub fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    /// Value of `name`, prompting the operator when it is not set.
    pub async fn required(&self, name: &str) -> Result<String, RecoveryError> {
        if let Some(value) = self.optional(name) {
            return Ok(value);
        }
        let answer = self.input.prompt(name).await?;
        if answer.trim().is_empty() {
            return Err(RecoveryError::MissingConfig(name.to_string()));
        }
        Ok(answer.trim().to_string())
    }

    pub async fn address(&self, name: &str) -> Result<Address, RecoveryError> {
        parse_address(name, &self.required(name).await?)
    }

    pub fn optional_address(&self, name: &str) -> Result<Option<Address>, RecoveryError> {
        self.optional(name)
            .map(|raw| parse_address(name, &raw))
            .transpose()
    }

    /// Comma-separated address list; at least one entry.
    pub async fn addresses(&self, name: &str) -> Result<Vec<Address>, RecoveryError> {
        let raw = self.required(name).await?;
        let addresses = split_list(&raw)
            .map(|item| parse_address(name, item))
            .collect::<Result<Vec<_>, _>>()?;
        if addresses.is_empty() {
            return Err(RecoveryError::MissingConfig(name.to_string()));
        }
        Ok(addresses)
    }

    /// Signing key from `name`, or from the file named by `<name>_PATH`.
    pub async fn signer(&self, name: &str) -> Result<PrivateKeySigner, RecoveryError> {
        let raw = match self.key_file(name)? {
            Some(contents) => contents,
            None => self.required(name).await?,
        };
        load_signer(&raw).map_err(|e| RecoveryError::invalid_config(name, e.to_string()))
    }

    pub async fn optional_signer(
        &self,
        name: &str,
    ) -> Result<Option<PrivateKeySigner>, RecoveryError> {
        if self.optional(name).is_none() && self.optional(&path_var(name)).is_none() {
            return Ok(None);
        }
        self.signer(name).await.map(Some)
    }

    /// Comma-separated hex keys; a `<name>_PATH` file holds one key per line.
    pub async fn signers(&self, name: &str) -> Result<Vec<PrivateKeySigner>, RecoveryError> {
        let raw = match self.key_file(name)? {
            Some(contents) => contents.lines().collect::<Vec<_>>().join(","),
            None => self.required(name).await?,
        };
        let signers = split_list(&raw)
            .map(|item| {
                load_signer(item).map_err(|e| RecoveryError::invalid_config(name, e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if signers.is_empty() {
            return Err(RecoveryError::MissingConfig(name.to_string()));
        }
        Ok(signers)
    }

    pub async fn url(&self, name: &str) -> Result<url::Url, RecoveryError> {
        let raw = self.required(name).await?;
        url::Url::parse(&raw).map_err(|e| RecoveryError::invalid_config(name, e.to_string()))
    }

    pub async fn u64(&self, name: &str) -> Result<u64, RecoveryError> {
        parse_value(name, &self.required(name).await?)
    }

    pub fn u64_or(&self, name: &str, default: u64) -> Result<u64, RecoveryError> {
        self.optional(name)
            .map(|raw| parse_value(name, &raw))
            .unwrap_or(Ok(default))
    }

    pub async fn grace_period(&self) -> Result<GracePeriodPolicy, RecoveryError> {
        parse_value(GRACE_PERIOD_ENV, &self.required(GRACE_PERIOD_ENV).await?)
    }

    pub async fn network(&self) -> Result<NetworkConfig, RecoveryError> {
        Ok(NetworkConfig {
            chain_id: self.u64(CHAIN_ID_ENV).await?,
            rpc_url: self.url(RPC_URL_ENV).await?,
            explorer_url: self.optional(EXPLORER_URL_ENV),
        })
    }

    /// Canonical module deployments with any `RECOVERY_MODULE_<suffix>`
    /// overrides applied.
    pub fn module_registry(&self) -> Result<ModuleRegistry, RecoveryError> {
        let mut registry = ModuleRegistry::canonical();
        for policy in GracePeriodPolicy::ALL {
            let name = format!("{RECOVERY_MODULE_ENV_PREFIX}{}", policy.env_suffix());
            if let Some(module) = self.optional_address(&name)? {
                registry = registry.with_override(policy, module);
            }
        }
        Ok(registry)
    }

    pub fn multisend(&self) -> Result<Address, RecoveryError> {
        Ok(self
            .optional_address(MULTISEND_ADDRESS_ENV)?
            .unwrap_or(DEFAULT_MULTISEND_CALL_ONLY))
    }

    pub fn inclusion(&self) -> Result<InclusionPolicy, RecoveryError> {
        let defaults = InclusionPolicy::default();
        let poll_interval = self.u64_or(INCLUSION_POLL_INTERVAL_ENV, defaults.poll_interval.as_secs())?;
        let timeout = self.u64_or(INCLUSION_TIMEOUT_ENV, defaults.timeout.as_secs())?;
        if poll_interval == 0 {
            return Err(RecoveryError::invalid_config(
                INCLUSION_POLL_INTERVAL_ENV,
                "must be at least 1 second",
            ));
        }
        Ok(InclusionPolicy {
            poll_interval: Duration::from_secs(poll_interval),
            timeout: Duration::from_secs(timeout),
        })
    }

    /// Custodial channels with their targets, in configured order.
    pub async fn channels(&self) -> Result<Vec<(Channel, String)>, RecoveryError> {
        let raw = self
            .optional(RECOVERY_CHANNELS_ENV)
            .unwrap_or_else(|| Channel::Email.to_string());

        let mut channels = Vec::new();
        for item in split_list(&raw) {
            let channel: Channel = parse_value(RECOVERY_CHANNELS_ENV, item)?;
            if channels.iter().any(|(existing, _)| *existing == channel) {
                continue;
            }
            let target_var = match channel {
                Channel::Email => RECOVERY_EMAIL_ENV,
                Channel::Sms => RECOVERY_PHONE_ENV,
            };
            channels.push((channel, self.required(target_var).await?));
        }
        if channels.is_empty() {
            return Err(RecoveryError::MissingConfig(RECOVERY_CHANNELS_ENV.to_string()));
        }
        Ok(channels)
    }

    fn key_file(&self, name: &str) -> Result<Option<String>, RecoveryError> {
        let path_name = path_var(name);
        let Some(path) = self.optional(&path_name) else {
            return Ok(None);
        };
        std::fs::read_to_string(&path)
            .map(Some)
            .map_err(|e| RecoveryError::invalid_config(path_name, format!("cannot read {path}: {e}")))
    }
}

fn path_var(name: &str) -> String {
    format!("{name}{PATH_SUFFIX}")
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|item| !item.is_empty())
}

fn parse_address(name: &str, raw: &str) -> Result<Address, RecoveryError> {
    raw.trim()
        .parse()
        .map_err(|e| RecoveryError::invalid_config(name, format!("invalid address `{raw}`: {e}")))
}

fn parse_value<T>(name: &str, raw: &str) -> Result<T, RecoveryError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| RecoveryError::invalid_config(name, e.to_string()))
}
