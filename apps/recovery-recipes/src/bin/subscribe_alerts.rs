// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Subscribe channels to recovery alerts for a Safe.

use std::process::ExitCode;

use recovery_recipes::cli::{bootstrap, finish, run_until_cancelled, shutdown_on_ctrl_c};
use recovery_recipes::recipes::subscribe_alerts;

#[tokio::main]
async fn main() -> ExitCode {
    let settings = bootstrap();
    let shutdown = shutdown_on_ctrl_c();

    let result = run_until_cancelled(subscribe_alerts(&settings), &shutdown).await;
    finish(result, |subscriptions| {
        subscriptions
            .iter()
            .map(|s| {
                format!(
                    "{} {} {}",
                    s.channel,
                    s.target,
                    if s.active { "active" } else { "pending" }
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    })
}
