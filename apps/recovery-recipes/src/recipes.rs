// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Recipes
//!
//! End-to-end flows run by the binaries:
//!
//! | Recipe | What it does |
//! |--------|--------------|
//! | [`setup_guardians`] | Enables the module on the Safe and registers EOA guardians |
//! | [`register_channels`] | Registers email/sms channels with the custodial guardian |
//! | [`recover_with_guardians`] | Collects guardian signatures, executes, waits, finalizes |
//! | [`recover_with_channels`] | Same, approved by one-time codes on every channel |
//! | [`cancel_recovery`] | Cancels the executed recovery from the Safe |
//! | [`subscribe_alerts`] | Subscribes channels to recovery alerts |
//!
//! The grace period chosen at setup selects the module instance; recovering
//! with a different one addresses a module that has no guardians.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use alloy::providers::DynProvider;
use alloy::signers::local::PrivateKeySigner;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::blockchain::module::{
    add_guardian_call, enable_module_call, previous_guardian, revoke_guardian_call,
};
use crate::blockchain::{
    ChainClient, NetworkConfig, RecoveryModule, SafeAccount, SmartAccount,
};
use crate::clock::{Clock, SystemClock};
use crate::config::*;
use crate::error::RecoveryError;
use crate::models::{GracePeriodPolicy, RecoveryRequest, RecoveryStatus};
use crate::orchestrator::{
    AccountControls, ApprovalSource, ChannelGuardian, EoaGuardian, OnChainBackend,
    RecoveryBackend, RecoveryDraft, RecoveryOrchestrator, ServiceBackend,
};
use crate::providers::{
    AlertsClient, RecoveryServiceClient, ServiceError, SiweMessage, Subscription,
};

/// Outcome of [`setup_guardians`].
#[derive(Debug, Clone)]
pub struct GuardianSetup {
    pub module: Address,
    pub guardians: Vec<Address>,
    pub threshold: u64,
    /// `None` when nothing had to change.
    pub tx_hash: Option<String>,
}

// =============================================================================
// Shared steps
// =============================================================================

struct Target {
    client: ChainClient,
    account: Address,
    policy: GracePeriodPolicy,
    module: Address,
}

impl Target {
    fn module(&self) -> RecoveryModule<DynProvider> {
        self.client.module(self.module)
    }

    fn network(&self) -> &NetworkConfig {
        self.client.network()
    }
}

/// Connect to the chain and resolve the Safe and the module for its policy.
async fn resolve_target(settings: &Settings) -> Result<Target, RecoveryError> {
    let client = ChainClient::new(settings.network().await?);
    client.verify_chain_id().await?;
    let block = client.get_block_number().await?;

    let account = settings.address(SAFE_ADDRESS_ENV).await?;
    let policy = settings.grace_period().await?;
    let module = settings.module_registry()?.address_for(policy);

    info!(
        chain_id = client.network().chain_id,
        block,
        %account,
        %policy,
        %module,
        "Connected"
    );
    Ok(Target {
        client,
        account,
        policy,
        module,
    })
}

async fn ensure_module_enabled(target: &Target) -> Result<(), RecoveryError> {
    if target
        .client
        .safe(target.account)
        .is_module_enabled(target.module)
        .await?
    {
        return Ok(());
    }
    warn!(
        account = %target.account,
        policy = %target.policy,
        module = %target.module,
        "Module for this grace period is not enabled; was setup run with a different GRACE_PERIOD?"
    );
    Err(RecoveryError::ModuleNotEnabled {
        account: target.account.to_string(),
        module: target.module.to_string(),
    })
}

/// Owner-executed Safe account. Only threshold-one Safes can be driven by a
/// single owner key.
async fn owner_account(
    settings: &Settings,
    target: &Target,
    owner: PrivateKeySigner,
) -> Result<SafeAccount, RecoveryError> {
    let safe = target.client.safe(target.account);
    let owners = safe.owners().await?;
    if !owners.contains(&owner.address()) {
        return Err(RecoveryError::invalid_config(
            OWNER_PRIVATE_KEY_ENV,
            format!("{} is not an owner of {}", owner.address(), target.account),
        ));
    }
    let threshold = safe.threshold().await?;
    if threshold != U256::from(1) {
        return Err(RecoveryError::invalid_config(
            SAFE_ADDRESS_ENV,
            format!("Safe threshold is {threshold}; only threshold-one Safes can be driven by one owner key"),
        ));
    }

    Ok(SafeAccount::new(
        target.network().clone(),
        target.account,
        owner,
        settings.inclusion()?,
    )
    .with_multisend(settings.multisend()?))
}

async fn submit_and_wait(
    account: &dyn SmartAccount,
    calls: Vec<crate::blockchain::Call>,
    label: &str,
) -> Result<String, RecoveryError> {
    let handle = account.submit(calls).await?;
    let receipt = account.wait_for_inclusion(&handle).await?;
    if !receipt.success {
        return Err(RecoveryError::submission_failed(
            format!("{label} reverted"),
            Some(receipt.tx_hash),
        ));
    }
    info!(tx_hash = %receipt.tx_hash, block = receipt.block_number, "{label} included");
    Ok(receipt.tx_hash)
}

/// One guardian change made from the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardianChange {
    Add {
        guardian: Address,
        threshold: u64,
    },
    Revoke {
        previous: Address,
        guardian: Address,
        threshold: u64,
    },
}

/// Plan the module calls that take the guardian set from `existing` to
/// `existing + add - revoke`, keeping the threshold between one and the
/// guardian count after every step.
///
/// The module keeps guardians in a linked list with new entries at the head,
/// so revocations are planned against the list as it will be after the
/// additions.
pub fn plan_guardian_changes(
    existing: &[Address],
    add: &[Address],
    revoke: &[Address],
    threshold: u64,
) -> Result<Vec<GuardianChange>, RecoveryError> {
    let mut list: Vec<Address> = existing.to_vec();
    let mut changes = Vec::new();

    for guardian in add {
        if list.contains(guardian) || revoke.contains(guardian) {
            continue;
        }
        list.insert(0, *guardian);
        changes.push(GuardianChange::Add {
            guardian: *guardian,
            threshold: threshold.min(list.len() as u64),
        });
    }

    for guardian in revoke {
        let Some(previous) = previous_guardian(&list, *guardian) else {
            warn!(%guardian, "Not a registered guardian; nothing to revoke");
            continue;
        };
        list.retain(|g| g != guardian);
        changes.push(GuardianChange::Revoke {
            previous,
            guardian: *guardian,
            threshold: threshold.min(list.len() as u64),
        });
    }

    let total = list.len() as u64;
    if threshold == 0 || threshold > total {
        return Err(RecoveryError::invalid_config(
            GUARDIAN_THRESHOLD_ENV,
            format!("must be between 1 and {total} (the number of guardians)"),
        ));
    }
    Ok(changes)
}

/// Enable the module if needed and apply guardian changes, in one Safe
/// transaction.
async fn register_guardians(
    target: &Target,
    account: &SafeAccount,
    add: &[Address],
    revoke: &[Address],
    threshold: u64,
) -> Result<GuardianSetup, RecoveryError> {
    let module = target.module();
    let mut calls = Vec::new();

    let enabled = target
        .client
        .safe(target.account)
        .is_module_enabled(target.module)
        .await?;
    if !enabled {
        info!(module = %target.module, policy = %target.policy, "Enabling recovery module");
        calls.push(enable_module_call(target.account, target.module));
    }

    let existing = module.guardians(target.account).await?;
    for change in plan_guardian_changes(&existing, add, revoke, threshold)? {
        calls.push(match change {
            GuardianChange::Add { guardian, threshold } => {
                info!(%guardian, threshold, "Adding guardian");
                add_guardian_call(target.module, guardian, threshold)
            }
            GuardianChange::Revoke {
                previous,
                guardian,
                threshold,
            } => {
                info!(%guardian, threshold, "Revoking guardian");
                revoke_guardian_call(target.module, previous, guardian, threshold)
            }
        });
    }

    let tx_hash = if calls.is_empty() {
        info!("Module already enabled and guardians already registered");
        None
    } else {
        Some(submit_and_wait(account, calls, "Guardian setup").await?)
    };

    let registered = module.guardians(target.account).await?;
    let on_chain_threshold = module.threshold(target.account).await?;
    if on_chain_threshold != U256::from(threshold) {
        warn!(
            configured = threshold,
            on_chain = %on_chain_threshold,
            "Guardian threshold on-chain differs from the configured one"
        );
    }
    info!(
        guardians = ?registered,
        threshold = %on_chain_threshold,
        explorer = ?tx_hash.as_deref().and_then(|hash| target.network().tx_link(hash)),
        "Guardians registered"
    );

    Ok(GuardianSetup {
        module: target.module,
        guardians: registered,
        threshold,
        tx_hash,
    })
}

fn recovery_service(base_url: url::Url) -> Result<RecoveryServiceClient, RecoveryError> {
    Ok(RecoveryServiceClient::new(base_url.as_str())?)
}

/// Guardian approvals the module requires for the account.
async fn module_threshold(target: &Target) -> Result<usize, RecoveryError> {
    let threshold = target.module().threshold(target.account).await?;
    let threshold = u64::try_from(threshold)
        .ok()
        .and_then(|value| usize::try_from(value).ok())
        .ok_or_else(|| {
            RecoveryError::invalid_config(
                GUARDIAN_THRESHOLD_ENV,
                format!("threshold {threshold} out of range"),
            )
        })?;
    if threshold == 0 {
        return Err(RecoveryError::invalid_config(
            SAFE_ADDRESS_ENV,
            format!(
                "no guardians are registered for the {} module; run setup first",
                target.policy
            ),
        ));
    }
    Ok(threshold)
}

/// The recovery service is a single module guardian however many channels
/// it verifies, so it can only carry a threshold-one module on its own.
fn ensure_custodial_threshold(threshold: usize) -> Result<(), RecoveryError> {
    if threshold > 1 {
        return Err(RecoveryError::ThresholdNotMet {
            collected: 1,
            required: threshold,
        });
    }
    Ok(())
}

async fn recovery_draft(
    settings: &Settings,
    target: &Target,
    required_approvals: usize,
) -> Result<RecoveryDraft, RecoveryError> {
    Ok(RecoveryDraft {
        chain_id: target.network().chain_id,
        account: target.account,
        new_owners: settings.addresses(NEW_OWNER_ADDRESSES_ENV).await?,
        new_threshold: settings.u64_or(NEW_THRESHOLD_ENV, 1)?,
        required_approvals,
        policy: target.policy,
        module: target.module,
        nonce: target.module().nonce(target.account).await?,
    })
}

/// Run the full lifecycle and report the resulting owners.
async fn drive_recovery<B: RecoveryBackend>(
    orchestrator: &RecoveryOrchestrator<B>,
    target: &Target,
    draft: RecoveryDraft,
    sources: &[Box<dyn ApprovalSource>],
    shutdown: &CancellationToken,
) -> Result<Option<RecoveryRequest>, RecoveryError> {
    let request = orchestrator.open(draft)?;
    let Some(finalized) = orchestrator.drive(&request, sources, shutdown).await? else {
        warn!(recovery_id = %request.id, "Recovery executed but finalization failed; rerun finalize later");
        return Ok(None);
    };

    let owners = target.client.safe(target.account).owners().await?;
    info!(
        recovery_id = %finalized.id,
        owners = ?owners,
        explorer = ?finalized.finalize_tx.as_deref().and_then(|hash| target.network().tx_link(hash)),
        "Safe owners after recovery"
    );
    Ok(Some(finalized))
}

// =============================================================================
// Recipes
// =============================================================================

/// Enable the module for the configured grace period and register the EOA
/// guardians (`GUARDIAN_ADDRESSES`, or the addresses of
/// `GUARDIAN_PRIVATE_KEYS`).
pub async fn setup_guardians(settings: &Settings) -> Result<GuardianSetup, RecoveryError> {
    let target = resolve_target(settings).await?;
    let owner = settings.signer(OWNER_PRIVATE_KEY_ENV).await?;
    let account = owner_account(settings, &target, owner).await?;

    let guardians = if settings.optional(GUARDIAN_ADDRESSES_ENV).is_some() {
        settings.addresses(GUARDIAN_ADDRESSES_ENV).await?
    } else {
        settings
            .signers(GUARDIAN_PRIVATE_KEYS_ENV)
            .await?
            .iter()
            .map(PrivateKeySigner::address)
            .collect()
    };
    let revoke = match settings.optional(REVOKE_GUARDIAN_ADDRESSES_ENV) {
        Some(_) => settings.addresses(REVOKE_GUARDIAN_ADDRESSES_ENV).await?,
        None => Vec::new(),
    };
    let threshold = settings.u64_or(GUARDIAN_THRESHOLD_ENV, guardians.len() as u64)?;

    register_guardians(&target, &account, &guardians, &revoke, threshold).await
}

/// Register each configured channel with the custodial guardian, then add
/// the service's guardian address to the module.
pub async fn register_channels(settings: &Settings) -> Result<GuardianSetup, RecoveryError> {
    let target = resolve_target(settings).await?;
    let owner = settings.signer(OWNER_PRIVATE_KEY_ENV).await?;
    let service = recovery_service(settings.url(RECOVERY_SERVICE_URL_ENV).await?)?;
    let channels = settings.channels().await?;
    let input = settings.input();

    let mut service_guardian = None;
    for (channel, destination) in &channels {
        let auth = SiweMessage::for_service(
            service.base_url(),
            target.account,
            target.network().chain_id,
            Utc::now(),
        )?
        .sign(&owner)?;
        let challenge = service
            .register_channel(
                target.network().chain_id,
                target.account,
                *channel,
                destination,
                &auth,
            )
            .await?;

        let code = input
            .prompt(&format!("Registration code sent via {channel} to {destination}"))
            .await?;
        if code.is_empty() {
            return Err(RecoveryError::ChannelVerificationFailed {
                channel: channel.to_string(),
                reason: "no code entered".to_string(),
            });
        }
        let guardian = service
            .confirm_registration(&challenge.challenge_id, &code)
            .await?;
        info!(%channel, %guardian, "Channel registered");

        match service_guardian {
            Some(previous) if previous != guardian => {
                return Err(ServiceError::InvalidResponse(format!(
                    "service reported guardian {guardian} after {previous}"
                ))
                .into())
            }
            _ => service_guardian = Some(guardian),
        }
    }

    let guardian = service_guardian
        .ok_or_else(|| RecoveryError::MissingConfig(RECOVERY_CHANNELS_ENV.to_string()))?;
    let account = owner_account(settings, &target, owner).await?;
    let existing = target.module().guardians(target.account).await?;
    let threshold = settings.u64_or(
        GUARDIAN_THRESHOLD_ENV,
        existing.len().max(1) as u64,
    )?;
    register_guardians(&target, &account, &[guardian], &[], threshold).await
}

/// Recover with EOA guardian keys. Signatures are relayed by the recovery
/// service when `RECOVERY_SERVICE_URL` is set, otherwise sent on-chain by
/// `RELAYER_PRIVATE_KEY` (default: the first guardian key).
pub async fn recover_with_guardians(
    settings: &Settings,
    shutdown: &CancellationToken,
) -> Result<Option<RecoveryRequest>, RecoveryError> {
    let target = resolve_target(settings).await?;
    ensure_module_enabled(&target).await?;

    let guardians = settings.signers(GUARDIAN_PRIVATE_KEYS_ENV).await?;
    let module = target.module();
    for guardian in &guardians {
        if !module.is_guardian(target.account, guardian.address()).await? {
            return Err(RecoveryError::invalid_config(
                GUARDIAN_PRIVATE_KEYS_ENV,
                format!(
                    "{} is not a guardian of {} on the {} module",
                    guardian.address(),
                    target.account,
                    target.policy
                ),
            ));
        }
    }

    let required = module_threshold(&target).await?;
    let draft = recovery_draft(settings, &target, required).await?;
    let relayer = match settings.optional_signer(RELAYER_PRIVATE_KEY_ENV).await? {
        Some(relayer) => relayer,
        None => guardians[0].clone(),
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let sources: Vec<Box<dyn ApprovalSource>> = guardians
        .into_iter()
        .map(|signer| {
            Box::new(EoaGuardian::new(signer, clock.clone())) as Box<dyn ApprovalSource>
        })
        .collect();

    match settings.optional(RECOVERY_SERVICE_URL_ENV) {
        Some(_) => {
            let service = recovery_service(settings.url(RECOVERY_SERVICE_URL_ENV).await?)?;
            let backend = ServiceBackend::new(service, AccountControls::read_only(target.module()));
            let orchestrator = RecoveryOrchestrator::new(backend, clock);
            drive_recovery(&orchestrator, &target, draft, &sources, shutdown).await
        }
        None => {
            let backend = OnChainBackend::new(
                &target.client,
                AccountControls::read_only(target.module()),
                relayer,
                settings.inclusion()?,
            );
            let orchestrator = RecoveryOrchestrator::new(backend, clock);
            drive_recovery(&orchestrator, &target, draft, &sources, shutdown).await
        }
    }
}

/// Recover through the custodial guardian: every configured channel must
/// pass its one-time code.
pub async fn recover_with_channels(
    settings: &Settings,
    shutdown: &CancellationToken,
) -> Result<Option<RecoveryRequest>, RecoveryError> {
    let target = resolve_target(settings).await?;
    ensure_module_enabled(&target).await?;
    ensure_custodial_threshold(module_threshold(&target).await?)?;

    let service = recovery_service(settings.url(RECOVERY_SERVICE_URL_ENV).await?)?;
    let channels = settings.channels().await?;
    let draft = recovery_draft(settings, &target, channels.len()).await?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let challenges = Arc::new(service.clone());
    let sources: Vec<Box<dyn ApprovalSource>> = channels
        .into_iter()
        .map(|(channel, destination)| {
            Box::new(ChannelGuardian::new(
                challenges.clone(),
                settings.input(),
                clock.clone(),
                channel,
                destination,
            )) as Box<dyn ApprovalSource>
        })
        .collect();

    let backend = ServiceBackend::new(service, AccountControls::read_only(target.module()));
    let orchestrator = RecoveryOrchestrator::new(backend, clock);
    drive_recovery(&orchestrator, &target, draft, &sources, shutdown).await
}

/// Cancel the recovery currently executed on the module, from the Safe.
/// `Ok(None)` when nothing is pending.
pub async fn cancel_recovery(settings: &Settings) -> Result<Option<RecoveryRequest>, RecoveryError> {
    let target = resolve_target(settings).await?;
    let module = target.module();
    let Some(pending) = module.pending_recovery(target.account).await? else {
        info!(account = %target.account, policy = %target.policy, "No executed recovery to cancel");
        return Ok(None);
    };
    info!(
        new_owners = ?pending.new_owners,
        new_threshold = %pending.new_threshold,
        execute_after = %pending.execute_after,
        approvals = %pending.approvals,
        "Pending recovery found"
    );

    let owner = settings.signer(OWNER_PRIVATE_KEY_ENV).await?;
    let confirmed = settings
        .input()
        .confirm(&format!(
            "Cancel recovery of {} to owners {:?}?",
            target.account, pending.new_owners
        ))
        .await?;
    if !confirmed {
        return Err(RecoveryError::Aborted);
    }

    // The service only knows about recoveries it relayed.
    let service_record = match settings.optional(RECOVERY_SERVICE_URL_ENV) {
        Some(_) => {
            recovery_service(settings.url(RECOVERY_SERVICE_URL_ENV).await?)?
                .get_executed(target.network().chain_id, target.account)
                .await?
        }
        None => None,
    };
    if let Some(record) = &service_record {
        info!(recovery_id = %record.id, execute_tx = ?record.execute_tx, "Recovery service record found");
    }

    let new_threshold = u64::try_from(pending.new_threshold).map_err(|_| {
        RecoveryError::invalid_config(SAFE_ADDRESS_ENV, "pending recovery threshold out of range")
    })?;
    let now = Utc::now();
    let request = RecoveryRequest {
        id: Uuid::new_v4(),
        chain_id: target.network().chain_id,
        account: target.account,
        new_owners: pending.new_owners,
        new_threshold,
        status: RecoveryStatus::Executed,
        approvals: Vec::new(),
        required_approvals: u64::try_from(pending.approvals)
            .ok()
            .and_then(|count| usize::try_from(count).ok())
            .unwrap_or(usize::MAX),
        policy: target.policy,
        module: target.module,
        nonce: module.nonce(target.account).await?,
        created_at: now,
        executed_at: None,
        execute_after: Some(pending.execute_after),
        remote_id: service_record.as_ref().map(|record| record.id.clone()),
        execute_tx: service_record.and_then(|record| record.execute_tx),
        finalize_tx: None,
        cancel_tx: None,
    };

    let account: Arc<dyn SmartAccount> =
        Arc::new(owner_account(settings, &target, owner.clone()).await?);
    let backend = OnChainBackend::new(
        &target.client,
        AccountControls::new(target.module(), account),
        owner,
        settings.inclusion()?,
    );
    let orchestrator = RecoveryOrchestrator::new(backend, Arc::new(SystemClock));
    let cancelled = orchestrator.cancel(&request).await?;
    info!(
        explorer = ?cancelled.cancel_tx.as_deref().and_then(|hash| target.network().tx_link(hash)),
        "Recovery cancelled"
    );
    Ok(Some(cancelled))
}

/// Subscribe the configured channels to recovery alerts and return the
/// account's subscriptions.
pub async fn subscribe_alerts(settings: &Settings) -> Result<Vec<Subscription>, RecoveryError> {
    let alerts_url = match settings.optional(ALERTS_SERVICE_URL_ENV) {
        Some(_) => settings.url(ALERTS_SERVICE_URL_ENV).await?,
        None => settings.url(RECOVERY_SERVICE_URL_ENV).await?,
    };
    let chain_id = settings.u64(CHAIN_ID_ENV).await?;
    let account = settings.address(SAFE_ADDRESS_ENV).await?;
    let owner = settings.signer(OWNER_PRIVATE_KEY_ENV).await?;
    let channels = settings.channels().await?;
    let input = settings.input();

    let alerts = AlertsClient::new(alerts_url.as_str(), chain_id)?;
    for (channel, destination) in &channels {
        let auth = alerts.authenticate(account, &owner)?;
        let subscription_id = alerts.subscribe(account, *channel, destination, &auth).await?;
        let code = input
            .prompt(&format!("Alert verification code sent via {channel} to {destination}"))
            .await?;
        if !alerts.verify(&subscription_id, &code).await? {
            return Err(RecoveryError::ChannelVerificationFailed {
                channel: channel.to_string(),
                reason: "alert subscription code rejected".to_string(),
            });
        }
        info!(%channel, subscription_id = %subscription_id, "Alerts active");
    }

    let auth = alerts.authenticate(account, &owner)?;
    let subscriptions = alerts.list(account, &auth).await?;
    info!(count = subscriptions.len(), "Alert subscriptions");
    Ok(subscriptions)
}
