// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Plumbing shared by the recipe binaries.

use std::future::Future;
use std::process::ExitCode;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::config::Settings;
use crate::error::{error_chain, RecoveryError};
use crate::input::ConsoleInput;
use crate::logging::init_tracing;

/// Tracing plus environment-backed settings that prompt on the console.
pub fn bootstrap() -> Settings {
    init_tracing();
    Settings::from_env(Arc::new(ConsoleInput::new()))
}

/// Token cancelled on the first Ctrl-C.
pub fn shutdown_on_ctrl_c() -> CancellationToken {
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupted; stopping");
                token.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });
    shutdown
}

/// Run `recipe` until it finishes or `shutdown` fires.
pub async fn run_until_cancelled<T, F>(
    recipe: F,
    shutdown: &CancellationToken,
) -> Result<T, RecoveryError>
where
    F: Future<Output = Result<T, RecoveryError>>,
{
    tokio::select! {
        result = recipe => result,
        _ = shutdown.cancelled() => Err(RecoveryError::Aborted),
    }
}

/// Print the outcome and map it to an exit code. Errors are printed with
/// their full cause chain.
pub fn finish<T>(result: Result<T, RecoveryError>, report: impl FnOnce(&T) -> String) -> ExitCode {
    match result {
        Ok(value) => {
            println!("{}", report(&value));
            ExitCode::SUCCESS
        }
        Err(RecoveryError::Aborted) => {
            eprintln!("Aborted.");
            ExitCode::from(130)
        }
        Err(e) => {
            eprintln!("Error: {}", error_chain(&e));
            ExitCode::FAILURE
        }
    }
}
