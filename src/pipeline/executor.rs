// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 gateflow contributors

//! Execution engine
//!
//! Drives a run over a [`DependencyGraph`] one layer at a time. Tasks of a
//! layer run concurrently, bounded by a semaphore; every state change is
//! written to the ledger before the next layer is scheduled.

use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::ProgressBar;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::collaborators::{Collaborators, InvocationContext, MoveParams};
use crate::errors::{GateflowError, TaskError};
use crate::ledger::{
    validate_run_id, ResumeOptions, RunLedger, RunRecord, RunStatus, SkipReason, TaskOutcome,
    TaskState, Transition,
};
use crate::pipeline::{DependencyGraph, RetryPolicy, Settings, TaskKind, TaskSpec};
use crate::quality::{self, GateOutcome};

/// Result of driving a run to completion
#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: String,
    pub status: RunStatus,
    /// First task that failed terminally (a blocking gate counts)
    pub first_failure: Option<String>,
    /// Skipped tasks, in definition order
    pub skipped: Vec<String>,
    /// Final ledger record
    pub record: RunRecord,
    /// Wall time of this invocation (not of the whole run when resumed)
    pub duration: Duration,
}

impl RunResult {
    pub fn exit_code(&self) -> u8 {
        self.status.exit_code()
    }

    pub fn state_of(&self, task_id: &str) -> Option<TaskState> {
        self.record.state_of(task_id)
    }
}

/// Pipeline execution engine
pub struct ExecutionEngine {
    collaborators: Collaborators,
    ledger: Arc<dyn RunLedger>,
    concurrency: usize,
    cancel: CancellationToken,
    progress: Option<ProgressBar>,
}

impl ExecutionEngine {
    pub fn new(collaborators: Collaborators, ledger: Arc<dyn RunLedger>) -> Self {
        Self {
            collaborators,
            ledger,
            concurrency: Settings::default().concurrency,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    /// Maximum number of collaborator calls in flight
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Token that stops scheduling when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Create a run and execute it
    pub async fn start(
        &self,
        graph: &DependencyGraph,
        run_id: &str,
    ) -> Result<RunResult, GateflowError> {
        validate_run_id(run_id)?;

        let record = RunRecord::new(
            run_id,
            graph.name(),
            graph.fingerprint(),
            graph
                .tasks()
                .iter()
                .map(|t| (t.id.clone(), t.retry_policy().max_attempts.max(1))),
        );
        self.ledger.create(record).await?;
        info!(run_id, pipeline = graph.name(), tasks = graph.len(), "run created");

        self.drive(graph, run_id)
            .instrument(info_span!("run", run_id = %run_id))
            .await
    }

    /// Continue a run from its ledger record
    pub async fn resume(
        &self,
        graph: &DependencyGraph,
        run_id: &str,
        options: ResumeOptions,
    ) -> Result<RunResult, GateflowError> {
        let record = self.ledger.require(run_id).await?;
        if record.fingerprint != graph.fingerprint() {
            return Err(GateflowError::DefinitionChanged {
                run_id: run_id.to_string(),
                expected: record.fingerprint,
                actual: graph.fingerprint().to_string(),
            });
        }

        let pending = self.ledger.resume(run_id, options).await?;
        info!(
            run_id,
            pending = pending.len(),
            retry_failed = options.retry_failed,
            "run resumed"
        );

        self.drive(graph, run_id)
            .instrument(info_span!("run", run_id = %run_id))
            .await
    }

    async fn drive(
        &self,
        graph: &DependencyGraph,
        run_id: &str,
    ) -> Result<RunResult, GateflowError> {
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        if let Some(bar) = &self.progress {
            let record = self.ledger.require(run_id).await?;
            let done = record.tasks.len() - record.non_terminal().len();
            bar.set_length(graph.len() as u64);
            bar.set_position(done as u64);
        }

        for (depth, layer) in graph.topological_layers().iter().enumerate() {
            // Reload so the previous layer's outcomes are what we schedule on
            let record = self.ledger.require(run_id).await?;
            let cancelled = self.cancel_requested(run_id).await?;
            let mut workers = JoinSet::new();

            for task_id in layer {
                let state = record
                    .state_of(task_id)
                    .ok_or_else(|| GateflowError::UnknownTask {
                        run_id: run_id.to_string(),
                        task_id: task_id.clone(),
                    })?;
                if state.is_terminal() {
                    continue;
                }

                if let Some(reason) = blocked_by(graph, &record, task_id)? {
                    self.skip(run_id, task_id, reason).await?;
                    continue;
                }
                if cancelled {
                    self.skip(run_id, task_id, SkipReason::Cancelled).await?;
                    continue;
                }

                let task = graph
                    .task(task_id)
                    .cloned()
                    .ok_or_else(|| GateflowError::UnknownTask {
                        run_id: run_id.to_string(),
                        task_id: task_id.clone(),
                    })?;
                let worker = Worker {
                    run_id: run_id.to_string(),
                    task,
                    collaborators: self.collaborators.clone(),
                    ledger: self.ledger.clone(),
                    semaphore: semaphore.clone(),
                    cancel: self.cancel.clone(),
                };
                let span = info_span!("task", task = %task_id, layer = depth);
                workers.spawn(worker.run().instrument(span));
            }

            while let Some(joined) = workers.join_next().await {
                let (task_id, state) = joined.map_err(|e| GateflowError::ExecutionFailed {
                    message: format!("task worker aborted: {}", e),
                    help: None,
                })??;

                self.advance(1);
                if state == TaskState::Failed {
                    self.cascade(graph, run_id, &task_id).await?;
                }
            }
        }

        let record = self.ledger.finish(run_id).await?;
        let duration = started.elapsed();
        if let Some(bar) = &self.progress {
            bar.finish_and_clear();
        }

        let skipped: Vec<String> = graph
            .tasks()
            .iter()
            .filter(|t| record.state_of(&t.id) == Some(TaskState::Skipped))
            .map(|t| t.id.clone())
            .collect();

        match record.status {
            RunStatus::Failed => error!(
                status = %record.status,
                first_failure = record.first_failure.as_deref().unwrap_or("-"),
                skipped = skipped.len(),
                "run finished"
            ),
            RunStatus::Warn | RunStatus::Cancelled => {
                warn!(status = %record.status, skipped = skipped.len(), "run finished")
            }
            _ => info!(status = %record.status, elapsed_ms = duration.as_millis() as u64, "run finished"),
        }

        Ok(RunResult {
            run_id: record.run_id.clone(),
            status: record.status,
            first_failure: record.first_failure.clone(),
            skipped,
            record,
            duration,
        })
    }

    async fn cancel_requested(&self, run_id: &str) -> Result<bool, GateflowError> {
        if self.cancel.is_cancelled() {
            return Ok(true);
        }
        self.ledger.is_cancel_requested(run_id).await
    }

    async fn skip(
        &self,
        run_id: &str,
        task_id: &str,
        reason: SkipReason,
    ) -> Result<(), GateflowError> {
        match &reason {
            SkipReason::UpstreamFailed { origin } => {
                info!(task = task_id, origin = %origin, "skipped: upstream failed")
            }
            SkipReason::Cancelled => info!(task = task_id, "skipped: run cancelled"),
        }
        self.ledger
            .record_transition(run_id, task_id, Transition::Skip { reason })
            .await?;
        self.advance(1);
        Ok(())
    }

    /// Skip every pending descendant of a failed task
    async fn cascade(
        &self,
        graph: &DependencyGraph,
        run_id: &str,
        origin: &str,
    ) -> Result<(), GateflowError> {
        let record = self.ledger.require(run_id).await?;
        let descendants = graph.descendants(origin);
        let pending: Vec<&String> = descendants
            .iter()
            .filter(|id| record.state_of(id) == Some(TaskState::Pending))
            .collect();

        if !pending.is_empty() {
            warn!(origin, skipped = pending.len(), "failure cascades to dependents");
        }
        for task_id in pending {
            let reason = SkipReason::UpstreamFailed {
                origin: origin.to_string(),
            };
            self.skip(run_id, task_id, reason).await?;
        }
        Ok(())
    }

    fn advance(&self, n: u64) {
        if let Some(bar) = &self.progress {
            bar.inc(n);
        }
    }
}

/// Why a task cannot run given its predecessors' states, if it cannot.
///
/// A predecessor that is not terminal means layers were scheduled out of
/// order, which is reported as an error rather than silently waited on.
fn blocked_by(
    graph: &DependencyGraph,
    record: &RunRecord,
    task_id: &str,
) -> Result<Option<SkipReason>, GateflowError> {
    let mut cancelled = false;

    for dep in graph.dependencies(task_id).unwrap_or_default() {
        let upstream = record
            .task(&dep)
            .ok_or_else(|| GateflowError::UnknownTask {
                run_id: record.run_id.clone(),
                task_id: dep.clone(),
            })?;

        if upstream.unblocks_dependents() {
            continue;
        }
        match upstream.state {
            TaskState::Failed => return Ok(Some(SkipReason::UpstreamFailed { origin: dep })),
            TaskState::Skipped => match &upstream.skip_reason {
                Some(SkipReason::UpstreamFailed { origin }) => {
                    return Ok(Some(SkipReason::UpstreamFailed {
                        origin: origin.clone(),
                    }))
                }
                _ => cancelled = true,
            },
            _ => {
                return Err(GateflowError::ExecutionFailed {
                    message: format!(
                        "task '{}' was scheduled before its dependency '{}' finished",
                        task_id, dep
                    ),
                    help: None,
                })
            }
        }
    }

    Ok(cancelled.then_some(SkipReason::Cancelled))
}

/// One task's attempts, owned so it can run on its own tokio task
struct Worker {
    run_id: String,
    task: TaskSpec,
    collaborators: Collaborators,
    ledger: Arc<dyn RunLedger>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self) -> Result<(String, TaskState), GateflowError> {
        let policy = self.task.retry_policy();
        self.resume_backoff(&policy).await?;

        loop {
            let permit = self.semaphore.clone().acquire_owned().await.map_err(|_| {
                GateflowError::ExecutionFailed {
                    message: "scheduler shut down".to_string(),
                    help: None,
                }
            })?;

            if self.cancel.is_cancelled() || self.ledger.is_cancel_requested(&self.run_id).await? {
                drop(permit);
                info!("skipped: run cancelled");
                let record = self
                    .record(Transition::Skip {
                        reason: SkipReason::Cancelled,
                    })
                    .await?;
                return Ok((self.task.id, record.state));
            }

            let started = self.record(Transition::Start).await?;
            let ctx = InvocationContext {
                run_id: self.run_id.clone(),
                task_id: self.task.id.clone(),
                attempt: started.attempts,
            };
            debug!(attempt = ctx.attempt, kind = %self.task.kind, "attempt started");

            let result = self.attempt(&ctx).await;
            drop(permit);

            let transition = match result {
                Ok(outcome) => match blocking_failure(&self.task, &outcome) {
                    Some(err) => {
                        error!(error = %err, "blocking quality gate failed");
                        Transition::Fail {
                            error: err.to_string(),
                            outcome: Some(outcome),
                        }
                    }
                    None => {
                        if let Some(gate) = outcome.gate_outcome() {
                            match gate {
                                GateOutcome::Pass => info!(outcome = %gate, "quality gate evaluated"),
                                _ => warn!(outcome = %gate, "quality gate degraded"),
                            }
                        }
                        Transition::Succeed { outcome }
                    }
                },
                Err(err) if err.is_retryable() && policy.allows_retry(started.attempts) => {
                    let delay = policy.backoff(started.attempts);
                    warn!(
                        attempt = started.attempts,
                        max_attempts = started.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "attempt failed, retrying"
                    );
                    self.record(Transition::Retry {
                        error: err.to_string(),
                    })
                    .await?;

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancel.cancelled() => {}
                    }
                    continue;
                }
                Err(err) => {
                    error!(attempt = started.attempts, error = %err, "task failed");
                    Transition::Fail {
                        error: err.to_string(),
                        outcome: None,
                    }
                }
            };

            let record = self.record(transition).await?;
            return Ok((self.task.id, record.state));
        }
    }

    /// Wait out the backoff owed by an attempt that failed or was
    /// interrupted before the run stopped
    async fn resume_backoff(&self, policy: &RetryPolicy) -> Result<(), GateflowError> {
        let record = self.ledger.require(&self.run_id).await?;
        let Some(task) = record.task(&self.task.id) else {
            return Ok(());
        };
        if task.attempts == 0 || task.last_error.is_none() {
            return Ok(());
        }

        let delay = policy.backoff(task.attempts);
        info!(
            attempt = task.attempts,
            delay_ms = delay.as_millis() as u64,
            "resuming after failed attempt"
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.cancel.cancelled() => {}
        }
        Ok(())
    }

    async fn record(
        &self,
        transition: Transition,
    ) -> Result<crate::ledger::TaskRecord, GateflowError> {
        self.ledger
            .record_transition(&self.run_id, &self.task.id, transition)
            .await
    }

    /// One collaborator call, bounded by the task's timeout
    async fn attempt(&self, ctx: &InvocationContext) -> Result<TaskOutcome, TaskError> {
        let call = invoke(&self.collaborators, &self.task, ctx);
        match self.task.timeout() {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                TaskError::transient(format!("timed out after {}s", limit.as_secs()))
            })?,
            None => call.await,
        }
    }
}

/// Call the collaborator a task kind maps to
async fn invoke(
    collaborators: &Collaborators,
    task: &TaskSpec,
    ctx: &InvocationContext,
) -> Result<TaskOutcome, TaskError> {
    match &task.kind {
        TaskKind::Transfer {
            source,
            destination,
        } => {
            let params = MoveParams::Transfer {
                source: source.clone(),
                destination: destination.clone(),
            };
            move_data(collaborators, ctx, &params).await
        }
        TaskKind::Load { source, table } => {
            let params = MoveParams::Load {
                source: source.clone(),
                table: table.clone(),
            };
            move_data(collaborators, ctx, &params).await
        }
        TaskKind::QualityGate {
            scope, rule_set, ..
        } => {
            let checks = collaborators
                .checker
                .run_scan(ctx, scope, rule_set.as_deref())
                .await?;
            Ok(TaskOutcome::Gate {
                outcome: quality::evaluate(scope, &checks),
                blocking: task.is_blocking_gate(),
                checks,
            })
        }
        TaskKind::Transform { model } => {
            let reply = collaborators.transformer.invoke(ctx, model).await?;
            if reply.success {
                Ok(TaskOutcome::Transformed)
            } else {
                Err(TaskError::transient(reply.error_detail.unwrap_or_else(
                    || format!("transform of '{}' reported failure", model),
                )))
            }
        }
        TaskKind::Report { target } => {
            let reply = collaborators.reporter.refresh(ctx, target).await?;
            if reply.success {
                Ok(TaskOutcome::Refreshed)
            } else {
                Err(TaskError::transient(format!(
                    "refresh of '{}' reported failure",
                    target
                )))
            }
        }
    }
}

async fn move_data(
    collaborators: &Collaborators,
    ctx: &InvocationContext,
    params: &MoveParams,
) -> Result<TaskOutcome, TaskError> {
    let reply = collaborators.mover.invoke(ctx, params).await?;
    if reply.success {
        Ok(TaskOutcome::Moved {
            rows_affected: reply.rows_affected,
        })
    } else {
        Err(TaskError::transient(
            reply
                .error_detail
                .unwrap_or_else(|| "data movement reported failure".to_string()),
        ))
    }
}

/// A Fail verdict from a blocking gate, as a task error
fn blocking_failure(task: &TaskSpec, outcome: &TaskOutcome) -> Option<TaskError> {
    match (&task.kind, outcome) {
        (
            TaskKind::QualityGate { scope, .. },
            TaskOutcome::Gate {
                outcome: GateOutcome::Fail,
                blocking: true,
                checks,
            },
        ) => Some(TaskError::QualityGateFailure {
            gate: task.id.clone(),
            scope: scope.clone(),
            failed_checks: quality::failed_checks(scope, checks),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{
        DataMover, MoveOutcome, QualityChecker, RefreshOutcome, Reporter, TransformOutcome,
        Transformer,
    };
    use crate::ledger::MemoryLedger;
    use crate::pipeline::PipelineDefinition;
    use crate::quality::{CheckResult, CheckStatus};
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Collaborator double that counts calls per task
    #[derive(Default)]
    struct FakeCollaborator {
        calls: Mutex<HashMap<String, u32>>,
        scans: HashMap<String, Vec<CheckResult>>,
        transient_failures: HashMap<String, u32>,
        terminal: HashSet<String>,
        delay: Option<Duration>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeCollaborator {
        fn with_scan(mut self, scope: &str, checks: Vec<CheckResult>) -> Self {
            self.scans.insert(scope.to_string(), checks);
            self
        }

        /// Fail the first `n` attempts of a task with a transient error
        fn failing(mut self, task: &str, n: u32) -> Self {
            self.transient_failures.insert(task.to_string(), n);
            self
        }

        fn broken(mut self, task: &str) -> Self {
            self.terminal.insert(task.to_string());
            self
        }

        fn slow(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        fn calls(&self, task: &str) -> u32 {
            self.calls.lock().unwrap().get(task).copied().unwrap_or(0)
        }

        async fn call(&self, ctx: &InvocationContext) -> Result<(), TaskError> {
            let count = {
                let mut calls = self.calls.lock().unwrap();
                let count = calls.entry(ctx.task_id.clone()).or_insert(0);
                *count += 1;
                *count
            };

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.terminal.contains(&ctx.task_id) {
                return Err(TaskError::terminal("permission denied"));
            }
            if count <= self.transient_failures.get(&ctx.task_id).copied().unwrap_or(0) {
                return Err(TaskError::transient("connection reset"));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl DataMover for FakeCollaborator {
        async fn invoke(
            &self,
            ctx: &InvocationContext,
            _params: &MoveParams,
        ) -> Result<MoveOutcome, TaskError> {
            self.call(ctx).await?;
            Ok(MoveOutcome::succeeded(Some(10)))
        }
    }

    #[async_trait]
    impl QualityChecker for FakeCollaborator {
        async fn run_scan(
            &self,
            ctx: &InvocationContext,
            scope: &str,
            _rule_set: Option<&str>,
        ) -> Result<Vec<CheckResult>, TaskError> {
            self.call(ctx).await?;
            Ok(self.scans.get(scope).cloned().unwrap_or_default())
        }
    }

    #[async_trait]
    impl Transformer for FakeCollaborator {
        async fn invoke(
            &self,
            ctx: &InvocationContext,
            _model: &str,
        ) -> Result<TransformOutcome, TaskError> {
            self.call(ctx).await?;
            Ok(TransformOutcome {
                success: true,
                error_detail: None,
            })
        }
    }

    #[async_trait]
    impl Reporter for FakeCollaborator {
        async fn refresh(
            &self,
            ctx: &InvocationContext,
            _target: &str,
        ) -> Result<RefreshOutcome, TaskError> {
            self.call(ctx).await?;
            Ok(RefreshOutcome { success: true })
        }
    }

    const RETAIL_PIPELINE: &str = r#"
name: retail
settings:
  default_retry:
    max_attempts: 3
    backoff_base_ms: 1
    backoff_max_ms: 5
tasks:
  - id: T1
    kind: { type: transfer, source: data/retail.csv, destination: landing/retail.csv }
  - id: T2
    kind: { type: load, source: landing/retail.csv, table: raw_invoices }
    depends_on: [T1]
  - id: G1
    kind: { type: quality_gate, scope: raw }
    depends_on: [T2]
  - id: T3
    kind: { type: transform, model: models/transform }
    depends_on: [G1]
  - id: G2
    kind: { type: quality_gate, scope: transformed }
    depends_on: [T3]
  - id: T4
    kind: { type: report, target: dashboard }
    depends_on: [G2]
"#;

    fn graph(yaml: &str) -> DependencyGraph {
        DependencyGraph::from_definition(&PipelineDefinition::from_yaml(yaml).unwrap()).unwrap()
    }

    fn passing() -> Vec<CheckResult> {
        vec![CheckResult::new("row_count", CheckStatus::Pass, "ok")]
    }

    fn engine(fake: &Arc<FakeCollaborator>, ledger: &Arc<MemoryLedger>) -> ExecutionEngine {
        ExecutionEngine::new(Collaborators::from_single(fake.clone()), ledger.clone())
    }

    #[tokio::test]
    async fn test_blocking_gate_failure_skips_descendants() {
        let fake = Arc::new(
            FakeCollaborator::default()
                .with_scan(
                    "raw",
                    vec![
                        CheckResult::new("row_count", CheckStatus::Pass, "ok"),
                        CheckResult::new("no_null_customer", CheckStatus::Fail, "12 nulls"),
                    ],
                )
                .with_scan("transformed", passing()),
        );
        let ledger = Arc::new(MemoryLedger::new());

        let result = engine(&fake, &ledger)
            .start(&graph(RETAIL_PIPELINE), "2024-01-01")
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.exit_code(), 1);
        assert_eq!(result.first_failure.as_deref(), Some("G1"));
        assert_eq!(result.state_of("T1"), Some(TaskState::Succeeded));
        assert_eq!(result.state_of("T2"), Some(TaskState::Succeeded));
        assert_eq!(result.state_of("G1"), Some(TaskState::Failed));
        assert_eq!(result.skipped, vec!["T3", "G2", "T4"]);
        for id in ["T3", "G2", "T4"] {
            assert_eq!(fake.calls(id), 0, "{} must not be invoked", id);
            assert_eq!(
                result.record.task(id).unwrap().skip_reason,
                Some(SkipReason::UpstreamFailed {
                    origin: "G1".into()
                })
            );
        }

        // Gate failures are never retried
        assert_eq!(fake.calls("G1"), 1);
        let gate = result.record.task("G1").unwrap();
        assert_eq!(
            gate.outcome.as_ref().and_then(TaskOutcome::gate_outcome),
            Some(GateOutcome::Fail)
        );
        assert!(gate.last_error.as_deref().unwrap().contains("no_null_customer"));
    }

    #[tokio::test]
    async fn test_gate_warning_lets_report_run() {
        let fake = Arc::new(
            FakeCollaborator::default()
                .with_scan("raw", passing())
                .with_scan(
                    "transformed",
                    vec![
                        CheckResult::new("row_count", CheckStatus::Pass, "ok"),
                        CheckResult::new("freshness", CheckStatus::Warn, "26h old"),
                    ],
                ),
        );
        let ledger = Arc::new(MemoryLedger::new());

        let result = engine(&fake, &ledger)
            .start(&graph(RETAIL_PIPELINE), "2024-01-02")
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Warn);
        assert_eq!(result.exit_code(), 2);
        assert!(result.skipped.is_empty());
        assert!(result
            .record
            .tasks
            .values()
            .all(|t| t.state == TaskState::Succeeded));
        assert_eq!(fake.calls("T4"), 1);
    }

    #[tokio::test]
    async fn test_non_blocking_gate_failure_is_a_warning() {
        let yaml = RETAIL_PIPELINE.replace(
            "kind: { type: quality_gate, scope: raw }",
            "kind: { type: quality_gate, scope: raw, blocking: false }",
        );
        let fake = Arc::new(
            FakeCollaborator::default()
                .with_scan("raw", vec![CheckResult::new("row_count", CheckStatus::Fail, "0 rows")])
                .with_scan("transformed", passing()),
        );
        let ledger = Arc::new(MemoryLedger::new());

        let result = engine(&fake, &ledger)
            .start(&graph(&yaml), "r1")
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Warn);
        assert_eq!(result.state_of("G1"), Some(TaskState::Succeeded));
        assert_eq!(fake.calls("T3"), 1);
        assert_eq!(fake.calls("T4"), 1);
    }

    #[tokio::test]
    async fn test_retry_until_success_records_each_attempt() {
        let fake = Arc::new(
            FakeCollaborator::default()
                .with_scan("raw", passing())
                .with_scan("transformed", passing())
                .failing("T2", 2),
        );
        let ledger = Arc::new(MemoryLedger::new());

        let result = engine(&fake, &ledger)
            .start(&graph(RETAIL_PIPELINE), "r1")
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Succeeded);
        let load = result.record.task("T2").unwrap();
        assert_eq!(load.state, TaskState::Succeeded);
        assert_eq!(load.attempts, 3);
        assert_eq!(load.history.len(), 3);
        assert_eq!(load.history[0].error.as_deref(), Some("transient failure: connection reset"));
        assert_eq!(fake.calls("T2"), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_the_run() {
        let fake = Arc::new(FakeCollaborator::default().failing("T1", 10));
        let ledger = Arc::new(MemoryLedger::new());

        let result = engine(&fake, &ledger)
            .start(&graph(RETAIL_PIPELINE), "r1")
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(fake.calls("T1"), 3);
        assert_eq!(result.record.task("T1").unwrap().attempts, 3);
        assert_eq!(result.skipped.len(), 5);
        assert_eq!(fake.calls("T2"), 0);
    }

    #[tokio::test]
    async fn test_terminal_error_is_not_retried() {
        let fake = Arc::new(FakeCollaborator::default().broken("T1"));
        let ledger = Arc::new(MemoryLedger::new());

        let result = engine(&fake, &ledger)
            .start(&graph(RETAIL_PIPELINE), "r1")
            .await
            .unwrap();

        assert_eq!(result.state_of("T1"), Some(TaskState::Failed));
        assert_eq!(fake.calls("T1"), 1);
        assert_eq!(
            result.record.task("T1").unwrap().last_error.as_deref(),
            Some("terminal failure: permission denied")
        );
    }

    #[tokio::test]
    async fn test_resume_after_crash_reruns_interrupted_task() {
        let graph = graph(RETAIL_PIPELINE);
        let ledger = Arc::new(MemoryLedger::new());

        // Crash while T2 was running: T1 done, T2 mid-attempt
        let mut record = RunRecord::new(
            "crashed",
            graph.name(),
            graph.fingerprint(),
            graph.tasks().iter().map(|t| (t.id.clone(), 3)),
        );
        record.apply("T1", Transition::Start).unwrap();
        record
            .apply(
                "T1",
                Transition::Succeed {
                    outcome: TaskOutcome::Moved { rows_affected: None },
                },
            )
            .unwrap();
        record.apply("T2", Transition::Start).unwrap();
        ledger.put(record).await;

        let fake = Arc::new(
            FakeCollaborator::default()
                .with_scan("raw", passing())
                .with_scan("transformed", passing()),
        );
        let result = engine(&fake, &ledger)
            .resume(&graph, "crashed", ResumeOptions::default())
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Succeeded);
        assert_eq!(fake.calls("T1"), 0);
        assert_eq!(fake.calls("T2"), 1);
        let load = result.record.task("T2").unwrap();
        assert_eq!(load.attempts, 2);
        assert_eq!(
            load.history[0].error.as_deref(),
            Some("interrupted before completion")
        );
    }

    const SLOW_RETRY_PIPELINE: &str = r#"
name: slow-retry
settings:
  default_retry:
    max_attempts: 3
    backoff_base_ms: 200
    backoff_max_ms: 200
tasks:
  - id: T1
    kind: { type: transfer, source: data/retail.csv, destination: landing/retail.csv }
"#;

    #[tokio::test]
    async fn test_interrupted_attempt_waits_out_backoff_on_resume() {
        let graph = graph(SLOW_RETRY_PIPELINE);
        let ledger = Arc::new(MemoryLedger::new());

        let mut record = RunRecord::new(
            "crashed",
            graph.name(),
            graph.fingerprint(),
            graph.tasks().iter().map(|t| (t.id.clone(), 3)),
        );
        record.apply("T1", Transition::Start).unwrap();
        ledger.put(record).await;

        let fake = Arc::new(FakeCollaborator::default());
        let started = Instant::now();
        let result = engine(&fake, &ledger)
            .resume(&graph, "crashed", ResumeOptions::default())
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Succeeded);
        assert_eq!(result.record.task("T1").unwrap().attempts, 2);
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_crash_during_backoff_still_waits_on_resume() {
        let graph = graph(SLOW_RETRY_PIPELINE);
        let ledger = Arc::new(MemoryLedger::new());

        // Crash after the retry was recorded, before the next attempt started
        let mut record = RunRecord::new(
            "crashed",
            graph.name(),
            graph.fingerprint(),
            graph.tasks().iter().map(|t| (t.id.clone(), 3)),
        );
        record.apply("T1", Transition::Start).unwrap();
        record
            .apply(
                "T1",
                Transition::Retry {
                    error: "transient failure: connection reset".to_string(),
                },
            )
            .unwrap();
        ledger.put(record).await;

        let fake = Arc::new(FakeCollaborator::default());
        let started = Instant::now();
        let result = engine(&fake, &ledger)
            .resume(&graph, "crashed", ResumeOptions::default())
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Succeeded);
        assert_eq!(fake.calls("T1"), 1);
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[test]
    fn test_cycle_is_rejected_before_any_execution() {
        let yaml = r#"
name: loop
tasks:
  - id: a
    kind: { type: transform, model: a }
    depends_on: [b]
  - id: b
    kind: { type: transform, model: b }
    depends_on: [a]
"#;
        let definition = PipelineDefinition::from_yaml(yaml).unwrap();
        let err = DependencyGraph::from_definition(&definition).unwrap_err();
        assert!(matches!(err, GateflowError::CircularDependency { .. }));
    }

    #[tokio::test]
    async fn test_cancel_then_resume() {
        let graph = graph(RETAIL_PIPELINE);
        let ledger = Arc::new(MemoryLedger::new());
        let fake = Arc::new(
            FakeCollaborator::default()
                .with_scan("raw", passing())
                .with_scan("transformed", passing()),
        );

        let token = CancellationToken::new();
        token.cancel();
        let result = engine(&fake, &ledger)
            .with_cancellation(token)
            .start(&graph, "r1")
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Cancelled);
        assert_eq!(result.skipped.len(), 6);
        assert_eq!(
            result.record.task("T4").unwrap().skip_reason,
            Some(SkipReason::Cancelled)
        );
        assert_eq!(fake.calls("T1"), 0);

        let result = engine(&fake, &ledger)
            .resume(&graph, "r1", ResumeOptions::default())
            .await
            .unwrap();
        assert_eq!(result.status, RunStatus::Succeeded);
        assert_eq!(fake.calls("T4"), 1);
    }

    #[tokio::test]
    async fn test_cancel_requested_through_ledger() {
        let graph = graph(RETAIL_PIPELINE);
        let ledger = Arc::new(MemoryLedger::new());
        let fake = Arc::new(FakeCollaborator::default());

        let record = RunRecord::new(
            "r1",
            graph.name(),
            graph.fingerprint(),
            graph.tasks().iter().map(|t| (t.id.clone(), 1)),
        );
        ledger.put(record).await;
        // Another process asked for the stop; no in-process token involved
        ledger.request_cancel("r1").await.unwrap();

        let result = engine(&fake, &ledger)
            .drive(&graph, "r1")
            .await
            .unwrap();
        assert_eq!(result.status, RunStatus::Cancelled);
        assert_eq!(fake.calls("T1"), 0);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let mut yaml = String::from("name: wide\ntasks:\n");
        for i in 0..6 {
            yaml.push_str(&format!(
                "  - id: t{}\n    kind: {{ type: transform, model: m{} }}\n",
                i, i
            ));
        }
        let fake = Arc::new(FakeCollaborator::default().slow(Duration::from_millis(30)));
        let ledger = Arc::new(MemoryLedger::new());

        let result = engine(&fake, &ledger)
            .with_concurrency(2)
            .start(&graph(&yaml), "r1")
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Succeeded);
        assert_eq!(fake.max_in_flight.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeout_is_a_transient_failure() {
        let yaml = r#"
name: slow
tasks:
  - id: refresh
    kind: { type: report, target: dashboard }
    timeout_secs: 1
    retry: { max_attempts: 2, backoff_base_ms: 1, backoff_max_ms: 1 }
"#;
        let fake = Arc::new(FakeCollaborator::default().slow(Duration::from_millis(1500)));
        let ledger = Arc::new(MemoryLedger::new());

        let result = engine(&fake, &ledger)
            .start(&graph(yaml), "r1")
            .await
            .unwrap();

        let task = result.record.task("refresh").unwrap();
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.attempts, 2);
        assert_eq!(
            task.last_error.as_deref(),
            Some("transient failure: timed out after 1s")
        );
    }

    #[tokio::test]
    async fn test_duplicate_run_id_is_rejected() {
        let fake = Arc::new(FakeCollaborator::default().with_scan("raw", passing()));
        let ledger = Arc::new(MemoryLedger::new());
        let graph = graph(RETAIL_PIPELINE);

        engine(&fake, &ledger).start(&graph, "r1").await.unwrap();
        let err = engine(&fake, &ledger).start(&graph, "r1").await.unwrap_err();
        assert!(matches!(err, GateflowError::RunAlreadyExists { .. }));

        let err = engine(&fake, &ledger).start(&graph, "../r2").await.unwrap_err();
        assert!(matches!(err, GateflowError::InvalidRunId { .. }));
    }

    #[tokio::test]
    async fn test_resume_refuses_changed_definition() {
        let fake = Arc::new(FakeCollaborator::default().broken("T1"));
        let ledger = Arc::new(MemoryLedger::new());
        engine(&fake, &ledger)
            .start(&graph(RETAIL_PIPELINE), "r1")
            .await
            .unwrap();

        let edited = graph(&RETAIL_PIPELINE.replace("models/transform", "models/transform_v2"));
        let err = engine(&fake, &ledger)
            .resume(&edited, "r1", ResumeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GateflowError::DefinitionChanged { .. }));
    }

    #[tokio::test]
    async fn test_retry_failed_reruns_failure_and_skipped_descendants() {
        let graph = graph(RETAIL_PIPELINE);
        let ledger = Arc::new(MemoryLedger::new());

        let broken = Arc::new(FakeCollaborator::default().broken("T3").with_scan("raw", passing()));
        let first = engine(&broken, &ledger).start(&graph, "r1").await.unwrap();
        assert_eq!(first.status, RunStatus::Failed);
        assert_eq!(first.skipped, vec!["G2", "T4"]);

        // Without the flag nothing is reopened
        let fixed = Arc::new(
            FakeCollaborator::default()
                .with_scan("raw", passing())
                .with_scan("transformed", passing()),
        );
        let again = engine(&fixed, &ledger)
            .resume(&graph, "r1", ResumeOptions::default())
            .await
            .unwrap();
        assert_eq!(again.status, RunStatus::Failed);
        assert_eq!(fixed.calls("T3"), 0);

        let retried = engine(&fixed, &ledger)
            .resume(&graph, "r1", ResumeOptions { retry_failed: true })
            .await
            .unwrap();
        assert_eq!(retried.status, RunStatus::Succeeded);
        assert_eq!(fixed.calls("T1"), 0);
        assert_eq!(fixed.calls("T3"), 1);
        assert_eq!(fixed.calls("T4"), 1);
        assert_eq!(retried.record.task("T3").unwrap().attempts, 1);
    }
}
