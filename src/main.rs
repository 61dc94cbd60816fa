// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 gateflow contributors

//! gateflow - data pipeline orchestrator with quality gates

use clap::Parser;
use miette::Result;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gateflow::cli::{Cli, Commands, Workspace};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize tracing; logs go to stderr so stdout stays machine-readable
    let default_filter = if cli.verbose {
        "gateflow=info"
    } else {
        "gateflow=warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    // Change to specified directory if provided
    if let Some(ref dir) = cli.directory {
        std::env::set_current_dir(dir).map_err(|e| {
            miette::miette!("Failed to change to directory '{}': {}", dir.display(), e)
        })?;
    }

    let pipeline = cli.pipeline;
    let ledger_dir = cli.ledger_dir;

    // Dispatch to command handlers
    let code = match cli.command {
        Commands::StartRun {
            run_id,
            concurrency,
        } => {
            let workspace = Workspace::load(&pipeline, ledger_dir)?;
            gateflow::cli::start::run(workspace, run_id, concurrency, cli.verbose).await?
        }
        Commands::ResumeRun {
            run_id,
            retry_failed,
            concurrency,
        } => {
            let workspace = Workspace::load(&pipeline, ledger_dir)?;
            gateflow::cli::resume::run(workspace, run_id, retry_failed, concurrency, cli.verbose)
                .await?
        }
        Commands::CancelRun { run_id } => {
            let workspace = Workspace::open(&pipeline, ledger_dir)?;
            gateflow::cli::cancel::run(workspace, run_id).await?;
            0
        }
        Commands::Status { run_id, format } => {
            let workspace = Workspace::open(&pipeline, ledger_dir)?;
            gateflow::cli::status::run(workspace, run_id, format).await?
        }
        Commands::Validate => {
            let workspace = Workspace::open(&pipeline, ledger_dir)?;
            gateflow::cli::validate::run(workspace, cli.verbose).await?;
            0
        }
        Commands::Graph { format } => {
            let workspace = Workspace::load(&pipeline, ledger_dir)?;
            gateflow::cli::graph::run(workspace, format).await?;
            0
        }
        Commands::Ledger { action } => {
            let workspace = Workspace::open(&pipeline, ledger_dir)?;
            gateflow::cli::ledger::run(workspace, action).await?;
            0
        }
    };

    Ok(ExitCode::from(code))
}
