// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Key loading and recovery message signing.
//!
//! Guardian and owner keys arrive as hex strings or PEM documents (SEC1 or
//! PKCS#8). Guardians approve a recovery by signing the module's EIP-712
//! `ExecuteRecovery` message.

use alloy::{
    primitives::{Address, Bytes, B256, U256},
    signers::{local::PrivateKeySigner, SignerSync},
    sol,
    sol_types::{eip712_domain, SolStruct},
};
use k256::SecretKey;

use super::client::{ChainClient, ChainError};

sol! {
    /// Message every guardian signs to approve a recovery.
    struct ExecuteRecovery {
        address wallet;
        address[] newOwners;
        uint256 newThreshold;
        uint256 nonce;
    }
}

// Must match the module's `NAME` and `VERSION` constants.
const RECOVERY_DOMAIN_NAME: &str = "Social Recovery Module";
const RECOVERY_DOMAIN_VERSION: &str = "0.0.1";

/// Parse a private key from PEM format to hex string.
///
/// # Returns
/// * `Ok(String)` - Hex-encoded private key (64 characters, no 0x prefix)
/// * `Err(ChainError)` - If PEM parsing fails
pub fn pem_to_hex(pem_bytes: &[u8]) -> Result<String, ChainError> {
    let pem_str = std::str::from_utf8(pem_bytes)
        .map_err(|e| ChainError::InvalidPrivateKey(format!("Invalid UTF-8: {e}")))?;

    let pem = pem::parse(pem_str)
        .map_err(|e| ChainError::InvalidPrivateKey(format!("Invalid PEM: {e}")))?;

    let secret_key = SecretKey::from_sec1_der(pem.contents())
        .or_else(|_| parse_pkcs8_to_secret_key(pem.contents()))
        .map_err(|e| ChainError::InvalidPrivateKey(format!("Invalid key format: {e}")))?;

    Ok(alloy::hex::encode(secret_key.to_bytes()))
}

fn parse_pkcs8_to_secret_key(der: &[u8]) -> Result<SecretKey, String> {
    use k256::pkcs8::DecodePrivateKey;
    SecretKey::from_pkcs8_der(der).map_err(|e| e.to_string())
}

/// Create a signer from PEM-encoded private key.
pub fn signer_from_pem(pem_bytes: &[u8]) -> Result<PrivateKeySigner, ChainError> {
    let hex_key = pem_to_hex(pem_bytes)?;
    ChainClient::create_signer(&hex_key)
}

/// Create a signer from either a hex key or a PEM document.
pub fn load_signer(raw: &str) -> Result<PrivateKeySigner, ChainError> {
    let trimmed = raw.trim();
    if trimmed.starts_with("-----BEGIN") {
        // Env files often carry PEM with literal `\n` separators.
        signer_from_pem(trimmed.replace("\\n", "\n").as_bytes())
    } else {
        ChainClient::create_signer(trimmed)
    }
}

/// EIP-712 domain of one recovery module deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryDomain {
    pub chain_id: u64,
    pub module: Address,
}

impl RecoveryDomain {
    pub fn new(chain_id: u64, module: Address) -> Self {
        Self { chain_id, module }
    }

    /// Digest a guardian signs to approve the given recovery.
    pub fn signing_hash(
        &self,
        account: Address,
        new_owners: &[Address],
        new_threshold: u64,
        nonce: U256,
    ) -> B256 {
        let domain = eip712_domain! {
            name: RECOVERY_DOMAIN_NAME,
            version: RECOVERY_DOMAIN_VERSION,
            chain_id: self.chain_id,
            verifying_contract: self.module,
        };
        let message = ExecuteRecovery {
            wallet: account,
            newOwners: new_owners.to_vec(),
            newThreshold: U256::from(new_threshold),
            nonce,
        };
        message.eip712_signing_hash(&domain)
    }

    /// Sign the recovery digest, returning the 65-byte `r || s || v` form.
    pub fn sign(
        &self,
        signer: &PrivateKeySigner,
        account: Address,
        new_owners: &[Address],
        new_threshold: u64,
        nonce: U256,
    ) -> Result<Bytes, ChainError> {
        let hash = self.signing_hash(account, new_owners, new_threshold, nonce);
        let signature = signer
            .sign_hash_sync(&hash)
            .map_err(|e| ChainError::Signing(e.to_string()))?;
        Ok(Bytes::from(signature.as_bytes().to_vec()))
    }
}
