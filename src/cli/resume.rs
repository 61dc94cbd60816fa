// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 gateflow contributors

//! Resume-run command - continue a run from its ledger record

use colored::Colorize;
use miette::Result;

use super::start::{attach, prepare, report};
use super::Workspace;
use crate::ledger::ResumeOptions;

/// Run the resume-run command; returns the run's exit code
pub async fn run(
    workspace: Workspace,
    run_id: String,
    retry_failed: bool,
    concurrency: Option<usize>,
    verbose: bool,
) -> Result<u8> {
    let graph = prepare(&workspace)?;
    let engine = attach(workspace.engine(concurrency)?, &graph, &run_id, verbose);

    println!(
        "{} {}{}",
        "Resuming run".bold(),
        run_id.bold(),
        if retry_failed {
            " (retrying failed tasks)".dimmed().to_string()
        } else {
            String::new()
        }
    );

    let result = engine
        .resume(&graph, &run_id, ResumeOptions { retry_failed })
        .await?;
    Ok(report(&result, &workspace))
}
