// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Read-only EVM client for the Safe and the recovery module.

use alloy::{
    network::EthereumWallet,
    primitives::Address,
    providers::{DynProvider, Provider, ProviderBuilder},
    signers::local::PrivateKeySigner,
};

use super::module::{RecoveryModule, SafeContract};
use super::types::NetworkConfig;

/// EVM client shared by the recipes.
pub struct ChainClient {
    /// Network configuration
    network: NetworkConfig,
    /// Alloy HTTP provider
    provider: DynProvider,
}

impl ChainClient {
    /// Create a new client for the specified network.
    pub fn new(network: NetworkConfig) -> Self {
        let provider = ProviderBuilder::new()
            .connect_http(network.rpc_url.clone())
            .erased();

        Self { network, provider }
    }

    /// Chain id reported by the node; must match the configured one.
    pub async fn verify_chain_id(&self) -> Result<u64, ChainError> {
        let reported = self
            .provider
            .get_chain_id()
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))?;

        if reported != self.network.chain_id {
            return Err(ChainError::ChainMismatch {
                configured: self.network.chain_id,
                reported,
            });
        }
        Ok(reported)
    }

    /// Get the current block number.
    pub async fn get_block_number(&self) -> Result<u64, ChainError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))
    }

    pub fn module(&self, address: Address) -> RecoveryModule<DynProvider> {
        RecoveryModule::new(&self.provider, address)
    }

    pub fn safe(&self, account: Address) -> SafeContract<DynProvider> {
        SafeContract::new(&self.provider, account)
    }

    /// Get the network configuration.
    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    /// Create a signer from a private key (hex string, `0x` prefix optional).
    pub fn create_signer(private_key_hex: &str) -> Result<PrivateKeySigner, ChainError> {
        let trimmed = private_key_hex.trim();
        let key_bytes = alloy::hex::decode(trimmed.strip_prefix("0x").unwrap_or(trimmed))
            .map_err(|e| ChainError::InvalidPrivateKey(e.to_string()))?;

        PrivateKeySigner::from_slice(&key_bytes)
            .map_err(|e| ChainError::InvalidPrivateKey(e.to_string()))
    }

    /// Create an Ethereum wallet from a signer.
    pub fn create_wallet(signer: PrivateKeySigner) -> EthereumWallet {
        EthereumWallet::from(signer)
    }
}

/// Errors that can occur during blockchain operations.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("RPC error: {0}")]
    RpcError(String),

    #[error("Configured chain id {configured} but node reports {reported}")]
    ChainMismatch { configured: u64, reported: u64 },

    #[error("Contract error: {0}")]
    ContractError(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Transaction {tx_hash} not included after {waited_secs}s")]
    InclusionTimeout { tx_hash: String, waited_secs: u64 },
}
