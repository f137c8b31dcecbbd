// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Enable the social recovery module on a Safe and register guardians.

use std::process::ExitCode;

use recovery_recipes::cli::{bootstrap, finish, run_until_cancelled, shutdown_on_ctrl_c};
use recovery_recipes::recipes::setup_guardians;

#[tokio::main]
async fn main() -> ExitCode {
    let settings = bootstrap();
    let shutdown = shutdown_on_ctrl_c();

    let result = run_until_cancelled(setup_guardians(&settings), &shutdown).await;
    finish(result, |setup| {
        format!(
            "Module {} has {} guardian(s), threshold {}",
            setup.module,
            setup.guardians.len(),
            setup.threshold
        )
    })
}
