// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Cancel an executed recovery during its grace period.

use std::process::ExitCode;

use recovery_recipes::cli::{bootstrap, finish, run_until_cancelled, shutdown_on_ctrl_c};
use recovery_recipes::recipes::cancel_recovery;

#[tokio::main]
async fn main() -> ExitCode {
    let settings = bootstrap();
    let shutdown = shutdown_on_ctrl_c();

    let result = run_until_cancelled(cancel_recovery(&settings), &shutdown).await;
    finish(result, |outcome| match outcome {
        Some(request) => format!(
            "Recovery cancelled{}",
            request
                .cancel_tx
                .as_deref()
                .map(|tx| format!(" in {tx}"))
                .unwrap_or_default()
        ),
        None => "No executed recovery to cancel".to_string(),
    })
}
