// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 gateflow contributors

//! Run ledger
//!
//! The ledger is the only mutable state shared between concurrently running
//! tasks. Every state change goes through [`RunLedger::record_transition`],
//! which backends must make atomic with respect to each other.

mod filesystem;
mod memory;
mod record;

pub use filesystem::FileLedger;
pub use memory::MemoryLedger;
pub use record::{
    AttemptRecord, ResumeOptions, RunRecord, RunStatus, SkipReason, TaskOutcome, TaskRecord,
    TaskState, Transition,
};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::time::{Duration, SystemTime};

use crate::errors::GateflowError;

static RUN_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("valid run id pattern"));

/// Reject run ids that are not safe to use as file names
pub fn validate_run_id(run_id: &str) -> Result<(), GateflowError> {
    if RUN_ID_PATTERN.is_match(run_id) {
        Ok(())
    } else {
        Err(GateflowError::InvalidRunId {
            run_id: run_id.to_string(),
        })
    }
}

/// Storage for run records
#[async_trait]
pub trait RunLedger: Send + Sync {
    /// Persist a new run; fails if the id is taken
    async fn create(&self, record: RunRecord) -> Result<(), GateflowError>;

    /// Load a run
    async fn load(&self, run_id: &str) -> Result<Option<RunRecord>, GateflowError>;

    /// Atomically apply one task transition and persist it
    async fn record_transition(
        &self,
        run_id: &str,
        task_id: &str,
        transition: Transition,
    ) -> Result<TaskRecord, GateflowError>;

    /// Seal a run once every task is terminal
    async fn finish(&self, run_id: &str) -> Result<RunRecord, GateflowError>;

    /// Reopen a run and return the tasks still to execute
    async fn resume(
        &self,
        run_id: &str,
        options: ResumeOptions,
    ) -> Result<BTreeSet<String>, GateflowError>;

    /// Ask the engine driving a run to stop scheduling
    async fn request_cancel(&self, run_id: &str) -> Result<(), GateflowError>;

    /// Whether a cancel was requested for a run
    async fn is_cancel_requested(&self, run_id: &str) -> Result<bool, GateflowError>;

    /// All runs, newest first
    async fn list(&self) -> Result<Vec<RunRecord>, GateflowError>;

    /// Delete finished runs older than the retention window; returns their ids
    async fn purge_expired(&self, retention: Duration) -> Result<Vec<String>, GateflowError>;

    /// Load a run or fail with `RunNotFound`
    async fn require(&self, run_id: &str) -> Result<RunRecord, GateflowError> {
        self.load(run_id)
            .await?
            .ok_or_else(|| GateflowError::RunNotFound {
                run_id: run_id.to_string(),
            })
    }
}

/// Whether a finished run has outlived the retention window
fn is_expired(record: &RunRecord, retention: Duration, now: SystemTime) -> bool {
    record
        .finished_at
        .and_then(|finished| now.duration_since(finished).ok())
        .is_some_and(|age| age > retention)
}

/// Finish bookkeeping shared by every backend
fn seal(record: &mut RunRecord) -> Result<(), GateflowError> {
    if record.is_sealed() {
        return Ok(());
    }
    let pending = record.non_terminal();
    if !pending.is_empty() {
        return Err(GateflowError::ExecutionFailed {
            message: format!(
                "run '{}' cannot finish while tasks are unresolved: {}",
                record.run_id,
                pending.into_iter().collect::<Vec<_>>().join(", ")
            ),
            help: None,
        });
    }
    record.seal();
    Ok(())
}
