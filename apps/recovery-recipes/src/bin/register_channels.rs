// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Register email/sms channels with the custodial guardian and add it to
//! the module.

use std::process::ExitCode;

use recovery_recipes::cli::{bootstrap, finish, run_until_cancelled, shutdown_on_ctrl_c};
use recovery_recipes::recipes::register_channels;

#[tokio::main]
async fn main() -> ExitCode {
    let settings = bootstrap();
    let shutdown = shutdown_on_ctrl_c();

    let result = run_until_cancelled(register_channels(&settings), &shutdown).await;
    finish(result, |setup| {
        format!(
            "Custodial guardian registered on module {} ({} guardian(s) total)",
            setup.module,
            setup.guardians.len()
        )
    })
}
