// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Blockchain integration for Safe accounts and the social recovery module.
//!
//! This module provides functionality for:
//! - Reading guardian, threshold and pending-recovery state from the module
//! - Building the account calls that enable the module and manage guardians
//! - Executing calls from the Safe and polling for inclusion
//! - Loading keys and signing recovery approvals

pub mod account;
pub mod client;
pub mod module;
pub mod signing;
pub mod types;

pub use account::{SafeAccount, SmartAccount};
pub use client::{ChainClient, ChainError};
pub use module::{PendingRecovery, RecoveryModule, SafeContract};
pub use signing::{load_signer, RecoveryDomain};
pub use types::*;
