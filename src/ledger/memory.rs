// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 gateflow contributors

//! In-memory ledger
//!
//! Used by tests and by embedders that persist runs elsewhere.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;

use super::{is_expired, seal, ResumeOptions, RunLedger, RunRecord, TaskRecord, Transition};
use crate::errors::GateflowError;

#[derive(Default)]
struct State {
    runs: HashMap<String, RunRecord>,
    cancelled: HashSet<String>,
}

/// Ledger kept entirely in memory
#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<State>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a stored run, e.g. to simulate a crash mid-run
    pub async fn put(&self, record: RunRecord) {
        let mut state = self.state.lock().await;
        state.runs.insert(record.run_id.clone(), record);
    }
}

fn not_found(run_id: &str) -> GateflowError {
    GateflowError::RunNotFound {
        run_id: run_id.to_string(),
    }
}

#[async_trait]
impl RunLedger for MemoryLedger {
    async fn create(&self, record: RunRecord) -> Result<(), GateflowError> {
        let mut state = self.state.lock().await;
        if state.runs.contains_key(&record.run_id) {
            return Err(GateflowError::RunAlreadyExists {
                run_id: record.run_id,
            });
        }
        state.runs.insert(record.run_id.clone(), record);
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Option<RunRecord>, GateflowError> {
        Ok(self.state.lock().await.runs.get(run_id).cloned())
    }

    async fn record_transition(
        &self,
        run_id: &str,
        task_id: &str,
        transition: Transition,
    ) -> Result<TaskRecord, GateflowError> {
        let mut state = self.state.lock().await;
        let record = state.runs.get_mut(run_id).ok_or_else(|| not_found(run_id))?;
        record.apply(task_id, transition)
    }

    async fn finish(&self, run_id: &str) -> Result<RunRecord, GateflowError> {
        let mut state = self.state.lock().await;
        let record = state.runs.get_mut(run_id).ok_or_else(|| not_found(run_id))?;
        seal(record)?;
        let sealed = record.clone();
        state.cancelled.remove(run_id);
        Ok(sealed)
    }

    async fn resume(
        &self,
        run_id: &str,
        options: ResumeOptions,
    ) -> Result<BTreeSet<String>, GateflowError> {
        let mut state = self.state.lock().await;
        let record = state.runs.get_mut(run_id).ok_or_else(|| not_found(run_id))?;
        let pending = record.prepare_resume(options);
        state.cancelled.remove(run_id);
        Ok(pending)
    }

    async fn request_cancel(&self, run_id: &str) -> Result<(), GateflowError> {
        let mut state = self.state.lock().await;
        if !state.runs.contains_key(run_id) {
            return Err(not_found(run_id));
        }
        state.cancelled.insert(run_id.to_string());
        Ok(())
    }

    async fn is_cancel_requested(&self, run_id: &str) -> Result<bool, GateflowError> {
        Ok(self.state.lock().await.cancelled.contains(run_id))
    }

    async fn list(&self) -> Result<Vec<RunRecord>, GateflowError> {
        let state = self.state.lock().await;
        let mut runs: Vec<RunRecord> = state.runs.values().cloned().collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs)
    }

    async fn purge_expired(&self, retention: Duration) -> Result<Vec<String>, GateflowError> {
        let now = SystemTime::now();
        let mut state = self.state.lock().await;
        let expired: Vec<String> = state
            .runs
            .values()
            .filter(|r| is_expired(r, retention, now))
            .map(|r| r.run_id.clone())
            .collect();
        for run_id in &expired {
            state.runs.remove(run_id);
            state.cancelled.remove(run_id);
        }
        Ok(expired)
    }
}
