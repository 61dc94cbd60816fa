// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 gateflow contributors

//! Cancel-run command - ask a running engine to stop scheduling

use colored::Colorize;
use miette::Result;

use super::Workspace;
use crate::ledger::RunLedger;
use crate::utils::print_info;

/// Run the cancel-run command
pub async fn run(workspace: Workspace, run_id: String) -> Result<()> {
    let ledger = workspace.ledger()?;
    let record = ledger.require(&run_id).await?;

    if record.is_sealed() {
        println!(
            "Run {} already finished as {}; nothing to cancel.",
            run_id.bold(),
            record.status
        );
        return Ok(());
    }

    ledger.request_cancel(&run_id).await?;
    println!("{} {}", "Cancellation requested for".bold(), run_id.bold());
    print_info("running tasks finish; everything not yet scheduled is skipped");
    print_info(&format!(
        "continue later with 'gateflow resume-run {}'",
        run_id
    ));

    Ok(())
}
