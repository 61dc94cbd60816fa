// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 gateflow contributors

//! Status command - show where a run stands

use colored::Colorize;
use miette::{IntoDiagnostic, Result};
use std::time::SystemTime;

use super::{OutputFormat, Workspace};
use crate::ledger::{RunLedger, RunRecord};
use crate::utils::{format_duration, print_header, status_label, task_detail, task_glyph};

/// Run the status command; returns the run's exit code
pub async fn run(workspace: Workspace, run_id: String, format: OutputFormat) -> Result<u8> {
    let ledger = workspace.ledger()?;
    let record = ledger.require(&run_id).await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&record).into_diagnostic()?);
        }
        OutputFormat::Text => print_run(&record, &workspace.task_order()),
    }

    Ok(record.status.exit_code())
}

/// Print a run record, tasks in `order` first and any others after
pub fn print_run(record: &RunRecord, order: &[String]) {
    println!();
    print_header(&format!("Run {} ({})", record.run_id, record.pipeline));

    let age = SystemTime::now()
        .duration_since(record.created_at)
        .map(format_duration)
        .unwrap_or_else(|_| "0s".to_string());
    println!("  Status:  {}", status_label(record.status));
    println!("  Started: {} ago", age);
    if let Some(first) = &record.first_failure {
        println!("  First failure: {}", first.red().bold());
    }
    println!();

    let mut ids: Vec<&String> = order.iter().filter(|id| record.tasks.contains_key(*id)).collect();
    ids.extend(record.tasks.keys().filter(|id| !order.contains(*id)));

    let width = ids.iter().map(|id| id.len()).max().unwrap_or(0);
    for id in &ids {
        let Some(task) = record.task(id) else {
            continue;
        };
        let detail = task_detail(task);
        println!(
            "  {} {:width$}  {:9} {}",
            task_glyph(task),
            id,
            task.state.to_string(),
            detail.dimmed(),
            width = width
        );
    }

    let mut skipped = record.skipped_by_failure();
    skipped.sort_by_key(|id| ids.iter().position(|listed| *listed == id));
    if !skipped.is_empty() {
        println!();
        println!(
            "  {} skipped because of upstream failures: {}",
            skipped.len(),
            skipped.join(", ")
        );
    }
    println!();
}
