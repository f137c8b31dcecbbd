// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Relational Recovery Recipes - Safe social recovery orchestration
//!
//! Scripted flows that register guardians on a Safe smart account's
//! social recovery module, collect guardian approvals, execute a recovery,
//! wait out its grace period and finalize it (or cancel it in time).
//!
//! ## Modules
//!
//! - `blockchain` - RPC client, Safe account, recovery module bindings
//! - `providers` - Custodial guardian service and alerts service clients
//! - `orchestrator` - Recovery state machine and approval sources
//! - `recipes` - End-to-end flows behind the binaries in `src/bin`
//! - `config` - Environment settings with interactive fallback

pub mod blockchain;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod input;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod providers;
pub mod recipes;
