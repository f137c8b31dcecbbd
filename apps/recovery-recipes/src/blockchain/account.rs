// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Submitting calls from the smart account.
//!
//! [`SafeAccount`] executes calls through `execTransaction` using the
//! owner's pre-validated signature (`r = owner, s = 0, v = 1`), which the
//! Safe accepts when the owner is the transaction sender. This covers Safes
//! with a signing threshold of one. Several calls are batched through
//! `MultiSendCallOnly` with a delegatecall.

use std::time::Instant;

use alloy::{
    network::EthereumWallet,
    primitives::{Address, Bytes, B256, U256},
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::types::TransactionRequest,
    signers::local::PrivateKeySigner,
    sol_types::SolCall,
};
use async_trait::async_trait;
use tracing::{debug, info};

use super::client::ChainError;
use super::module::{IMultiSend, ISafe};
use super::types::{
    Call, InclusionPolicy, InclusionReceipt, NetworkConfig, OperationHandle,
    DEFAULT_MULTISEND_CALL_ONLY,
};

const OPERATION_CALL: u8 = 0;
const OPERATION_DELEGATECALL: u8 = 1;

/// A smart account that can execute calls as itself.
#[async_trait]
pub trait SmartAccount: Send + Sync {
    fn address(&self) -> Address;

    /// Submit one or more calls executed with the account as `msg.sender`.
    async fn submit(&self, calls: Vec<Call>) -> Result<OperationHandle, ChainError>;

    /// Poll until the submission is included or the timeout passes.
    async fn wait_for_inclusion(
        &self,
        handle: &OperationHandle,
    ) -> Result<InclusionReceipt, ChainError>;
}

/// Safe account driven by a single owner key.
pub struct SafeAccount {
    address: Address,
    owner: Address,
    network: NetworkConfig,
    multisend: Address,
    inclusion: InclusionPolicy,
    provider: DynProvider,
}

impl SafeAccount {
    pub fn new(
        network: NetworkConfig,
        address: Address,
        owner: PrivateKeySigner,
        inclusion: InclusionPolicy,
    ) -> Self {
        let owner_address = owner.address();
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(owner))
            .connect_http(network.rpc_url.clone())
            .erased();

        Self {
            address,
            owner: owner_address,
            network,
            multisend: DEFAULT_MULTISEND_CALL_ONLY,
            inclusion,
            provider,
        }
    }

    pub fn with_multisend(mut self, multisend: Address) -> Self {
        self.multisend = multisend;
        self
    }

    fn exec_transaction_data(&self, calls: &[Call]) -> Result<Bytes, ChainError> {
        let (to, value, data, operation) = match calls {
            [] => {
                return Err(ChainError::TransactionFailed(
                    "no calls to submit".to_string(),
                ))
            }
            [single] => (single.to, single.value, single.data.clone(), OPERATION_CALL),
            many => {
                let batch = IMultiSend::multiSendCall {
                    transactions: encode_multisend(many),
                }
                .abi_encode();
                (self.multisend, U256::ZERO, Bytes::from(batch), OPERATION_DELEGATECALL)
            }
        };

        let exec = ISafe::execTransactionCall {
            to,
            value,
            data,
            operation,
            safeTxGas: U256::ZERO,
            baseGas: U256::ZERO,
            gasPrice: U256::ZERO,
            gasToken: Address::ZERO,
            refundReceiver: Address::ZERO,
            signatures: prevalidated_signature(self.owner),
        };
        Ok(Bytes::from(exec.abi_encode()))
    }
}

#[async_trait]
impl SmartAccount for SafeAccount {
    fn address(&self) -> Address {
        self.address
    }

    async fn submit(&self, calls: Vec<Call>) -> Result<OperationHandle, ChainError> {
        let data = self.exec_transaction_data(&calls)?;
        let tx = TransactionRequest::default()
            .from(self.owner)
            .to(self.address)
            .input(data.into());

        let pending = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(|e| ChainError::TransactionFailed(format!("Failed to send: {e}")))?;

        let tx_hash = format!("{:?}", pending.tx_hash());
        info!(
            account = %self.address,
            calls = calls.len(),
            tx_hash = %tx_hash,
            explorer = ?self.network.tx_link(&tx_hash),
            "Submitted account transaction"
        );
        Ok(OperationHandle { tx_hash })
    }

    async fn wait_for_inclusion(
        &self,
        handle: &OperationHandle,
    ) -> Result<InclusionReceipt, ChainError> {
        wait_for_receipt(&self.provider, &handle.tx_hash, self.inclusion).await
    }
}

/// Poll `eth_getTransactionReceipt` at a fixed interval until it appears.
pub async fn wait_for_receipt<P: Provider>(
    provider: &P,
    tx_hash: &str,
    policy: InclusionPolicy,
) -> Result<InclusionReceipt, ChainError> {
    let hash: B256 = tx_hash
        .parse()
        .map_err(|e| ChainError::InvalidAddress(format!("Invalid tx hash: {e}")))?;
    let started = Instant::now();

    loop {
        let receipt = provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| ChainError::RpcError(format!("Failed to get receipt: {e}")))?;

        if let Some(receipt) = receipt {
            return Ok(InclusionReceipt {
                tx_hash: tx_hash.to_string(),
                block_number: receipt.block_number.unwrap_or(0),
                success: receipt.status(),
            });
        }

        if started.elapsed() >= policy.timeout {
            return Err(ChainError::InclusionTimeout {
                tx_hash: tx_hash.to_string(),
                waited_secs: policy.timeout.as_secs(),
            });
        }

        debug!(tx_hash = %tx_hash, "Receipt not available yet");
        tokio::time::sleep(policy.poll_interval).await;
    }
}

/// Safe signature that is valid when `owner` sends the transaction.
pub fn prevalidated_signature(owner: Address) -> Bytes {
    let mut signature = Vec::with_capacity(65);
    signature.extend_from_slice(&[0u8; 12]);
    signature.extend_from_slice(owner.as_slice());
    signature.extend_from_slice(&[0u8; 32]);
    signature.push(1);
    Bytes::from(signature)
}

/// Pack calls in the `MultiSend` layout:
/// `operation (1) | to (20) | value (32) | data length (32) | data`.
pub fn encode_multisend(calls: &[Call]) -> Bytes {
    let mut packed = Vec::new();
    for call in calls {
        packed.push(OPERATION_CALL);
        packed.extend_from_slice(call.to.as_slice());
        packed.extend_from_slice(&call.value.to_be_bytes::<32>());
        packed.extend_from_slice(&U256::from(call.data.len()).to_be_bytes::<32>());
        packed.extend_from_slice(&call.data);
    }
    Bytes::from(packed)
}
