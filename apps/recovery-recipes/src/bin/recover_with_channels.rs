// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Recover a Safe through the custodial guardian with one-time codes.

use std::process::ExitCode;

use recovery_recipes::cli::{bootstrap, finish, run_until_cancelled, shutdown_on_ctrl_c};
use recovery_recipes::recipes::recover_with_channels;

#[tokio::main]
async fn main() -> ExitCode {
    let settings = bootstrap();
    let shutdown = shutdown_on_ctrl_c();

    let result = run_until_cancelled(recover_with_channels(&settings, &shutdown), &shutdown).await;
    finish(result, |outcome| match outcome {
        Some(request) => format!(
            "Recovery {} finalized; new owners {:?}",
            request.id, request.new_owners
        ),
        None => "Recovery executed but not finalized".to_string(),
    })
}
