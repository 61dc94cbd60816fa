// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 gateflow contributors

//! # gateflow - Data Pipeline Orchestrator
//!
//! `gateflow` runs a graph of data tasks (transfer, load, quality gate,
//! transform, report) layer by layer, stops at failed quality gates and
//! records every run in a ledger so it can be resumed.
//!
//! ## Features
//!
//! - **Explicit dependency graph** - tasks declare their edges; cycles are rejected up front
//! - **Quality gates** - a blocking gate failure skips everything downstream
//! - **Retries with backoff** - transient failures are retried per task policy
//! - **Resumable runs** - crashed, cancelled or failed runs continue from the ledger
//!
//! ## Quick Start
//!
//! ```bash
//! # Check the definition
//! gateflow validate
//!
//! # Run the pipeline for a data date
//! gateflow start-run 2024-01-01
//!
//! # Inspect and continue
//! gateflow status 2024-01-01
//! gateflow resume-run 2024-01-01 --retry-failed
//! ```

pub mod cli;
pub mod collaborators;
pub mod errors;
pub mod ledger;
pub mod pipeline;
pub mod quality;
pub mod utils;

// Re-export commonly used types
pub use errors::{GateflowError, GateflowResult, TaskError};
pub use ledger::{FileLedger, MemoryLedger, RunLedger, RunStatus, TaskState};
pub use pipeline::{DependencyGraph, ExecutionEngine, PipelineDefinition, RunResult, TaskSpec};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
