// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 gateflow contributors

//! Run and task records
//!
//! The state machine lives here so every ledger backend applies exactly
//! the same rules; backends only decide how records are stored.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::SystemTime;

use crate::errors::GateflowError;
use crate::quality::{CheckResult, GateOutcome};

/// Per-task state within one run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl TaskState {
    /// Succeeded, Failed and Skipped never change again within a run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Why a task was skipped
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// An ancestor failed or a blocking gate failed; `origin` is that task
    UpstreamFailed { origin: String },
    /// The run was cancelled before the task was scheduled
    Cancelled,
}

/// Payload reported by a successful (or gate-evaluated) attempt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskOutcome {
    Moved {
        #[serde(default)]
        rows_affected: Option<u64>,
    },
    Gate {
        outcome: GateOutcome,
        blocking: bool,
        checks: Vec<CheckResult>,
    },
    Transformed,
    Refreshed,
}

impl TaskOutcome {
    /// Gate verdict, if this payload came from a quality gate
    pub fn gate_outcome(&self) -> Option<GateOutcome> {
        match self {
            Self::Gate { outcome, .. } => Some(*outcome),
            _ => None,
        }
    }
}

/// One attempt in a task's history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttemptRecord {
    pub number: u32,
    pub started_at: SystemTime,
    #[serde(default)]
    pub finished_at: Option<SystemTime>,
    #[serde(default)]
    pub error: Option<String>,
}

/// A state change requested by the engine
#[derive(Debug, Clone)]
pub enum Transition {
    /// Pending → Running, opening a new attempt
    Start,
    /// Running → Succeeded
    Succeed { outcome: TaskOutcome },
    /// Running → Pending after a failed attempt that will be retried
    Retry { error: String },
    /// Running → Failed, terminal
    Fail {
        error: String,
        outcome: Option<TaskOutcome>,
    },
    /// Pending → Skipped, without invocation
    Skip { reason: SkipReason },
}

impl Transition {
    fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Succeed { .. } => "succeed",
            Self::Retry { .. } => "retry",
            Self::Fail { .. } => "fail",
            Self::Skip { .. } => "skip",
        }
    }
}

/// Everything the ledger knows about one task in one run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskRecord {
    pub state: TaskState,
    pub attempts: u32,
    pub max_attempts: u32,
    #[serde(default)]
    pub history: Vec<AttemptRecord>,
    #[serde(default)]
    pub outcome: Option<TaskOutcome>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub skip_reason: Option<SkipReason>,
    pub updated_at: SystemTime,
}

impl TaskRecord {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            state: TaskState::Pending,
            attempts: 0,
            max_attempts,
            history: Vec::new(),
            outcome: None,
            last_error: None,
            skip_reason: None,
            updated_at: SystemTime::now(),
        }
    }

    /// Apply a transition, rejecting anything the state machine forbids
    pub fn apply(
        &mut self,
        task_id: &str,
        transition: Transition,
        now: SystemTime,
    ) -> Result<(), GateflowError> {
        let allowed = matches!(
            (self.state, &transition),
            (TaskState::Pending, Transition::Start)
                | (TaskState::Pending, Transition::Skip { .. })
                | (TaskState::Running, Transition::Succeed { .. })
                | (TaskState::Running, Transition::Retry { .. })
                | (TaskState::Running, Transition::Fail { .. })
        );
        if !allowed {
            return Err(GateflowError::InvalidTransition {
                task_id: task_id.to_string(),
                from: self.state.to_string(),
                transition: transition.name().to_string(),
            });
        }

        match transition {
            Transition::Start => {
                self.attempts += 1;
                self.state = TaskState::Running;
                self.history.push(AttemptRecord {
                    number: self.attempts,
                    started_at: now,
                    finished_at: None,
                    error: None,
                });
            }
            Transition::Succeed { outcome } => {
                self.close_attempt(now, None);
                self.state = TaskState::Succeeded;
                self.outcome = Some(outcome);
                self.last_error = None;
            }
            Transition::Retry { error } => {
                self.close_attempt(now, Some(error.clone()));
                self.state = TaskState::Pending;
                self.last_error = Some(error);
            }
            Transition::Fail { error, outcome } => {
                self.close_attempt(now, Some(error.clone()));
                self.state = TaskState::Failed;
                self.outcome = outcome;
                self.last_error = Some(error);
            }
            Transition::Skip { reason } => {
                self.state = TaskState::Skipped;
                self.skip_reason = Some(reason);
            }
        }

        self.updated_at = now;
        Ok(())
    }

    fn close_attempt(&mut self, now: SystemTime, error: Option<String>) {
        if let Some(attempt) = self.history.last_mut() {
            if attempt.finished_at.is_none() {
                attempt.finished_at = Some(now);
                attempt.error = error;
            }
        }
    }

    /// Whether dependents of this task may run
    pub fn unblocks_dependents(&self) -> bool {
        self.state == TaskState::Succeeded
    }
}

/// Overall status of a run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Succeeded,
    Warn,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Operator exit code: 0 success, 1 failure, cancellation or an
    /// unfinished run, 2 warning
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Succeeded => 0,
            Self::Running | Self::Failed | Self::Cancelled => 1,
            Self::Warn => 2,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Warn => write!(f, "warn"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Options for reopening a run
#[derive(Debug, Clone, Copy, Default)]
pub struct ResumeOptions {
    /// Also reopen terminally failed tasks and the tasks skipped because of
    /// them, with a fresh attempt budget
    pub retry_failed: bool,
}

/// Persisted record of one execution of a pipeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunRecord {
    pub run_id: String,
    pub pipeline: String,
    pub fingerprint: String,
    pub status: RunStatus,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
    #[serde(default)]
    pub finished_at: Option<SystemTime>,
    /// First task that failed terminally
    #[serde(default)]
    pub first_failure: Option<String>,
    pub tasks: BTreeMap<String, TaskRecord>,
}

impl RunRecord {
    /// Fresh run with every task Pending
    pub fn new(
        run_id: impl Into<String>,
        pipeline: impl Into<String>,
        fingerprint: impl Into<String>,
        tasks: impl IntoIterator<Item = (String, u32)>,
    ) -> Self {
        let now = SystemTime::now();
        Self {
            run_id: run_id.into(),
            pipeline: pipeline.into(),
            fingerprint: fingerprint.into(),
            status: RunStatus::Running,
            created_at: now,
            updated_at: now,
            finished_at: None,
            first_failure: None,
            tasks: tasks
                .into_iter()
                .map(|(id, max_attempts)| (id, TaskRecord::new(max_attempts)))
                .collect(),
        }
    }

    /// Sealed runs reject every further transition
    pub fn is_sealed(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn task(&self, task_id: &str) -> Option<&TaskRecord> {
        self.tasks.get(task_id)
    }

    pub fn state_of(&self, task_id: &str) -> Option<TaskState> {
        self.tasks.get(task_id).map(|t| t.state)
    }

    /// Apply a transition to one task and keep run bookkeeping current
    pub fn apply(
        &mut self,
        task_id: &str,
        transition: Transition,
    ) -> Result<TaskRecord, GateflowError> {
        if self.is_sealed() {
            return Err(GateflowError::RunSealed {
                run_id: self.run_id.clone(),
            });
        }

        let now = SystemTime::now();
        let is_failure = matches!(transition, Transition::Fail { .. });
        let record = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| GateflowError::UnknownTask {
                run_id: self.run_id.clone(),
                task_id: task_id.to_string(),
            })?;
        record.apply(task_id, transition, now)?;
        let snapshot = record.clone();

        if is_failure && self.first_failure.is_none() {
            self.first_failure = Some(task_id.to_string());
        }
        self.updated_at = now;

        Ok(snapshot)
    }

    /// Ids of tasks that are not terminal yet
    pub fn non_terminal(&self) -> BTreeSet<String> {
        self.tasks
            .iter()
            .filter(|(_, t)| !t.state.is_terminal())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Ids of tasks skipped because something upstream failed
    pub fn skipped_by_failure(&self) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|(_, t)| matches!(t.skip_reason, Some(SkipReason::UpstreamFailed { .. })))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Status implied by the task records.
    ///
    /// Any terminal failure fails the run; cancellation skips make it
    /// Cancelled; a degraded gate (Warn, or non-blocking Fail) makes it Warn.
    pub fn derived_status(&self) -> RunStatus {
        let tasks = || self.tasks.values();

        if !self.non_terminal().is_empty() {
            RunStatus::Running
        } else if tasks().any(|t| t.state == TaskState::Failed) {
            RunStatus::Failed
        } else if tasks().any(|t| t.skip_reason == Some(SkipReason::Cancelled)) {
            RunStatus::Cancelled
        } else if tasks().any(|t| {
            t.outcome
                .as_ref()
                .and_then(TaskOutcome::gate_outcome)
                .is_some_and(|o| o.is_degraded())
        }) {
            RunStatus::Warn
        } else {
            RunStatus::Succeeded
        }
    }

    /// Record the final status and seal the run
    pub fn seal(&mut self) -> RunStatus {
        let now = SystemTime::now();
        self.status = self.derived_status();
        self.finished_at = Some(now);
        self.updated_at = now;
        self.status
    }

    /// Reopen a run after a crash, a cancellation or an operator retry.
    ///
    /// Running tasks count as failed attempts: they go back to Pending when
    /// attempts remain and to Failed otherwise, since whatever they did
    /// externally cannot be trusted. Returns the ids left to execute.
    pub fn prepare_resume(&mut self, options: ResumeOptions) -> BTreeSet<String> {
        let now = SystemTime::now();

        for (id, task) in self.tasks.iter_mut() {
            match task.state {
                TaskState::Running => {
                    let error = "interrupted before completion".to_string();
                    task.close_attempt(now, Some(error.clone()));
                    task.last_error = Some(error);
                    task.state = if task.attempts < task.max_attempts {
                        TaskState::Pending
                    } else {
                        if self.first_failure.is_none() {
                            self.first_failure = Some(id.clone());
                        }
                        TaskState::Failed
                    };
                    task.updated_at = now;
                }
                TaskState::Skipped if task.skip_reason == Some(SkipReason::Cancelled) => {
                    task.state = TaskState::Pending;
                    task.skip_reason = None;
                    task.updated_at = now;
                }
                _ => {}
            }
        }

        if options.retry_failed {
            for task in self.tasks.values_mut() {
                let reopen = task.state == TaskState::Failed
                    || matches!(task.skip_reason, Some(SkipReason::UpstreamFailed { .. }));
                if reopen {
                    task.state = TaskState::Pending;
                    task.attempts = 0;
                    task.outcome = None;
                    task.skip_reason = None;
                    task.updated_at = now;
                }
            }
            self.first_failure = None;
        }

        let pending = self.non_terminal();
        if !pending.is_empty() {
            self.status = RunStatus::Running;
            self.finished_at = None;
        }
        self.updated_at = now;

        pending
    }
}
