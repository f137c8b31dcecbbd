// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Safe and social recovery module contract interactions.

use alloy::{
    primitives::{Address, Bytes, U256},
    providers::Provider,
    sol,
    sol_types::SolCall,
};
use chrono::{DateTime, Utc};

use super::client::ChainError;
use super::types::Call;

// Social recovery module interface (one deployment per grace period)
sol! {
    #[sol(rpc)]
    interface ISocialRecoveryModule {
        struct RecoveryRequest {
            uint256 guardiansApprovalCount;
            uint256 newThreshold;
            uint64 executeAfter;
            address[] newOwners;
        }

        struct SignatureData {
            address signer;
            bytes signature;
        }

        function addGuardianWithThreshold(address guardian, uint256 threshold) external;
        function revokeGuardianWithThreshold(address prevGuardian, address guardian, uint256 threshold) external;
        function multiConfirmRecovery(address wallet, address[] calldata newOwners, uint256 newThreshold, SignatureData[] calldata signatures, bool execute) external;
        function finalizeRecovery(address wallet) external;
        function cancelRecovery() external;
        function getRecoveryRequest(address wallet) external view returns (RecoveryRequest memory request);
        function nonce(address wallet) external view returns (uint256);
        function threshold(address wallet) external view returns (uint256);
        function getGuardians(address wallet) external view returns (address[] memory);
        function isGuardian(address wallet, address guardian) external view returns (bool);
    }
}

// Safe account interface (the subset the recipes touch)
sol! {
    #[sol(rpc)]
    interface ISafe {
        function isModuleEnabled(address module) external view returns (bool);
        function enableModule(address module) external;
        function getOwners() external view returns (address[] memory);
        function getThreshold() external view returns (uint256);
        function execTransaction(
            address to,
            uint256 value,
            bytes calldata data,
            uint8 operation,
            uint256 safeTxGas,
            uint256 baseGas,
            uint256 gasPrice,
            address gasToken,
            address refundReceiver,
            bytes memory signatures
        ) external payable returns (bool success);
    }

    interface IMultiSend {
        function multiSend(bytes memory transactions) external payable;
    }
}

/// Recovery currently registered on-chain for an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRecovery {
    pub approvals: U256,
    pub new_owners: Vec<Address>,
    pub new_threshold: U256,
    pub execute_after: DateTime<Utc>,
}

/// Social recovery module wrapper bound to one deployment.
pub struct RecoveryModule<P> {
    contract: ISocialRecoveryModule::ISocialRecoveryModuleInstance<P>,
    address: Address,
}

impl<P: Provider + Clone> RecoveryModule<P> {
    pub fn new(provider: &P, address: Address) -> Self {
        let contract = ISocialRecoveryModule::new(address, provider.clone());
        Self { contract, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Nonce the next recovery signatures must commit to.
    pub async fn nonce(&self, account: Address) -> Result<U256, ChainError> {
        self.contract
            .nonce(account)
            .call()
            .await
            .map_err(|e| ChainError::ContractError(e.to_string()))
    }

    /// Guardian approvals the module requires for this account.
    pub async fn threshold(&self, account: Address) -> Result<U256, ChainError> {
        self.contract
            .threshold(account)
            .call()
            .await
            .map_err(|e| ChainError::ContractError(e.to_string()))
    }

    pub async fn guardians(&self, account: Address) -> Result<Vec<Address>, ChainError> {
        self.contract
            .getGuardians(account)
            .call()
            .await
            .map_err(|e| ChainError::ContractError(e.to_string()))
    }

    pub async fn is_guardian(&self, account: Address, guardian: Address) -> Result<bool, ChainError> {
        self.contract
            .isGuardian(account, guardian)
            .call()
            .await
            .map_err(|e| ChainError::ContractError(e.to_string()))
    }

    /// The executed recovery awaiting finalization, if any.
    ///
    /// The module reports an empty request with `executeAfter == 0` when
    /// nothing is pending.
    pub async fn pending_recovery(
        &self,
        account: Address,
    ) -> Result<Option<PendingRecovery>, ChainError> {
        let request = self
            .contract
            .getRecoveryRequest(account)
            .call()
            .await
            .map_err(|e| ChainError::ContractError(e.to_string()))?;

        if request.executeAfter == 0 {
            return Ok(None);
        }

        let execute_after = DateTime::from_timestamp(request.executeAfter as i64, 0)
            .ok_or_else(|| {
                ChainError::ContractError(format!(
                    "executeAfter out of range: {}",
                    request.executeAfter
                ))
            })?;

        Ok(Some(PendingRecovery {
            approvals: request.guardiansApprovalCount,
            new_owners: request.newOwners,
            new_threshold: request.newThreshold,
            execute_after,
        }))
    }
}

/// Safe account read wrapper.
pub struct SafeContract<P> {
    contract: ISafe::ISafeInstance<P>,
}

impl<P: Provider + Clone> SafeContract<P> {
    pub fn new(provider: &P, address: Address) -> Self {
        Self {
            contract: ISafe::new(address, provider.clone()),
        }
    }

    pub async fn is_module_enabled(&self, module: Address) -> Result<bool, ChainError> {
        self.contract
            .isModuleEnabled(module)
            .call()
            .await
            .map_err(|e| ChainError::ContractError(e.to_string()))
    }

    pub async fn owners(&self) -> Result<Vec<Address>, ChainError> {
        self.contract
            .getOwners()
            .call()
            .await
            .map_err(|e| ChainError::ContractError(e.to_string()))
    }

    pub async fn threshold(&self) -> Result<U256, ChainError> {
        self.contract
            .getThreshold()
            .call()
            .await
            .map_err(|e| ChainError::ContractError(e.to_string()))
    }
}

/// `enableModule(module)` executed by the account on itself.
pub fn enable_module_call(account: Address, module: Address) -> Call {
    Call::new(account, ISafe::enableModuleCall { module }.abi_encode())
}

pub fn add_guardian_call(module: Address, guardian: Address, threshold: u64) -> Call {
    let data = ISocialRecoveryModule::addGuardianWithThresholdCall {
        guardian,
        threshold: U256::from(threshold),
    }
    .abi_encode();
    Call::new(module, data)
}

/// `prev_guardian` is the guardian preceding `guardian` in the module's
/// linked list (the sentinel `0x…01` for the head).
pub fn revoke_guardian_call(
    module: Address,
    prev_guardian: Address,
    guardian: Address,
    threshold: u64,
) -> Call {
    let data = ISocialRecoveryModule::revokeGuardianWithThresholdCall {
        prevGuardian: prev_guardian,
        guardian,
        threshold: U256::from(threshold),
    }
    .abi_encode();
    Call::new(module, data)
}

/// Cancels the pending recovery; the account must be the sender.
pub fn cancel_recovery_call(module: Address) -> Call {
    Call::new(module, ISocialRecoveryModule::cancelRecoveryCall {}.abi_encode())
}

/// Confirms and executes a recovery in one transaction from any sender.
pub fn multi_confirm_recovery_call(
    module: Address,
    account: Address,
    new_owners: &[Address],
    new_threshold: u64,
    signatures: &[(Address, Bytes)],
) -> Call {
    let signatures = signatures
        .iter()
        .map(|(signer, signature)| ISocialRecoveryModule::SignatureData {
            signer: *signer,
            signature: signature.clone(),
        })
        .collect();
    let data = ISocialRecoveryModule::multiConfirmRecoveryCall {
        wallet: account,
        newOwners: new_owners.to_vec(),
        newThreshold: U256::from(new_threshold),
        signatures,
        execute: true,
    }
    .abi_encode();
    Call::new(module, data)
}

pub fn finalize_recovery_call(module: Address, account: Address) -> Call {
    let data = ISocialRecoveryModule::finalizeRecoveryCall { wallet: account }.abi_encode();
    Call::new(module, data)
}

/// Previous entry in the module's guardian linked list.
pub fn previous_guardian(guardians: &[Address], guardian: Address) -> Option<Address> {
    const SENTINEL: Address = Address::new([
        0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1,
    ]);
    let index = guardians.iter().position(|g| *g == guardian)?;
    Some(if index == 0 {
        SENTINEL
    } else {
        guardians[index - 1]
    })
}
