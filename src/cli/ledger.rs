// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 gateflow contributors

//! Ledger command - list and prune recorded runs

use colored::Colorize;
use miette::Result;
use std::time::SystemTime;

use super::{LedgerAction, Workspace};
use crate::ledger::{RunLedger, TaskState};
use crate::utils::{format_duration, print_header, print_success, status_label};

/// Run the ledger command
pub async fn run(workspace: Workspace, action: LedgerAction) -> Result<()> {
    let ledger = workspace.ledger()?;

    match action {
        LedgerAction::List => {
            let runs = ledger.list().await?;

            print_header("Runs");
            println!("  Location: {}", workspace.ledger_dir().display());
            println!();

            if runs.is_empty() {
                println!("{}", "  No runs recorded.".dimmed());
                return Ok(());
            }

            let now = SystemTime::now();
            for run in &runs {
                let age = now
                    .duration_since(run.created_at)
                    .map(format_duration)
                    .unwrap_or_else(|_| "0s".to_string());
                let done = run
                    .tasks
                    .values()
                    .filter(|t| t.state == TaskState::Succeeded)
                    .count();
                println!(
                    "  {:20} {:10} {}/{} succeeded  {}",
                    run.run_id,
                    status_label(run.status).to_string(),
                    done,
                    run.tasks.len(),
                    format!("{} ago, {}", age, run.pipeline).dimmed()
                );
            }

            Ok(())
        }

        LedgerAction::Prune { retention_days } => {
            let mut settings = workspace.settings();
            if let Some(days) = retention_days {
                settings.retention_days = days;
            }
            let days = settings.retention_days;

            let removed = ledger.purge_expired(settings.retention()).await?;
            if removed.is_empty() {
                println!(
                    "{}",
                    format!("No finished runs older than {} days.", days).dimmed()
                );
            } else {
                print_success(&format!(
                    "Removed {} run(s): {}",
                    removed.len(),
                    removed.join(", ")
                ));
            }

            Ok(())
        }
    }
}
