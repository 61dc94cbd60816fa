// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 gateflow contributors

//! CLI command definitions and handlers
//!
//! Defines the operator interface for gateflow.

pub mod cancel;
pub mod graph;
pub mod ledger;
pub mod resume;
pub mod start;
pub mod status;
pub mod validate;

mod workspace;

pub use workspace::Workspace;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Data pipeline orchestrator with quality gates
#[derive(Parser, Debug)]
#[clap(
    name = "gateflow",
    version,
    about = "Run data pipelines layer by layer, stopping at failed quality gates",
    long_about = None,
    after_help = "Examples:\n\
        gateflow validate                   Check the pipeline definition\n\
        gateflow start-run 2024-01-01       Start a run\n\
        gateflow status 2024-01-01          Show where a run stands\n\
        gateflow resume-run 2024-01-01      Continue an interrupted run\n\n\
        Exit codes: 0 succeeded, 1 failed, cancelled or unfinished, 2 finished with warnings."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Change to directory before executing
    #[clap(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,

    /// Pipeline definition (YAML, or TOML by extension)
    #[clap(
        short,
        long,
        global = true,
        env = "GATEFLOW_PIPELINE",
        default_value = "gateflow.yaml"
    )]
    pub pipeline: PathBuf,

    /// Ledger directory (overrides settings.ledger_dir)
    #[clap(long, global = true, env = "GATEFLOW_LEDGER_DIR", value_name = "DIR")]
    pub ledger_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a new run of the pipeline
    StartRun {
        /// Run identifier, typically the data date
        run_id: String,

        /// Maximum tasks in flight (overrides settings.concurrency)
        #[clap(long, env = "GATEFLOW_CONCURRENCY")]
        concurrency: Option<usize>,
    },

    /// Continue a crashed, cancelled or failed run
    ResumeRun {
        run_id: String,

        /// Also re-execute failed tasks and the tasks skipped because of them
        #[clap(long)]
        retry_failed: bool,

        /// Maximum tasks in flight (overrides settings.concurrency)
        #[clap(long, env = "GATEFLOW_CONCURRENCY")]
        concurrency: Option<usize>,
    },

    /// Ask the process driving a run to stop scheduling new tasks
    CancelRun { run_id: String },

    /// Show the state of a run
    Status {
        run_id: String,

        /// Output format
        #[clap(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Validate the pipeline definition
    Validate,

    /// Show the pipeline as a graph
    Graph {
        /// Output format
        #[clap(short, long, value_enum, default_value = "text")]
        format: GraphFormat,
    },

    /// Inspect and prune the run ledger
    Ledger {
        #[clap(subcommand)]
        action: LedgerAction,
    },
}

/// Ledger management actions
#[derive(Subcommand, Debug, Clone)]
pub enum LedgerAction {
    /// List recorded runs, newest first
    List,

    /// Delete finished runs older than the retention window
    Prune {
        /// Retention in days (overrides settings.retention_days)
        #[clap(long)]
        retention_days: Option<u64>,
    },
}

/// Output format for the status command
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Graph output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GraphFormat {
    Text,
    Dot,
    Mermaid,
}
