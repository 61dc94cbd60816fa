// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 gateflow contributors

//! Pipeline definition structures
//!
//! Defines the schema for gateflow.yaml (or gateflow.toml) files.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::GateflowError;

/// Pipeline definition loaded once at process start
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// Definition version, bumped by authors when the graph changes
    #[serde(default = "default_version")]
    pub version: String,

    /// Pipeline name
    pub name: String,

    /// Pipeline description
    #[serde(default)]
    pub description: Option<String>,

    /// Engine and ledger settings
    #[serde(default)]
    pub settings: Settings,

    /// Command templates for the shell-backed collaborators
    #[serde(default)]
    pub collaborators: CommandTemplates,

    /// Tasks and their declared edges
    pub tasks: Vec<TaskSpec>,
}

fn default_version() -> String {
    "1".to_string()
}

impl PipelineDefinition {
    /// Load a definition from a YAML or TOML file (chosen by extension)
    pub fn from_file(path: &Path) -> Result<Self, GateflowError> {
        if !path.exists() {
            return Err(GateflowError::PipelineNotFound {
                path: path.to_path_buf(),
            });
        }

        let content =
            std::fs::read_to_string(path).map_err(|e| GateflowError::FileReadError {
                path: path.to_path_buf(),
                error: e.to_string(),
            })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(&content),
            _ => Self::from_yaml(&content),
        }
    }

    /// Parse a definition from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self, GateflowError> {
        serde_yaml::from_str(yaml).map_err(Into::into)
    }

    /// Parse a definition from TOML
    pub fn from_toml(source: &str) -> Result<Self, GateflowError> {
        toml::from_str(source).map_err(Into::into)
    }

    /// Fill in each task's retry policy from the pipeline default.
    ///
    /// After this every task carries an explicit policy, so the dependency
    /// graph and the ledger never need the settings block.
    pub fn resolved_tasks(&self) -> Vec<TaskSpec> {
        self.tasks
            .iter()
            .cloned()
            .map(|mut task| {
                if task.retry.is_none() {
                    task.retry = Some(self.settings.default_retry);
                }
                task
            })
            .collect()
    }
}

/// Engine and ledger settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Maximum number of tasks running at once within a layer
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Directory holding run ledger files
    #[serde(default = "default_ledger_dir")]
    pub ledger_dir: PathBuf,

    /// Days a finished run is kept before `ledger prune` removes it
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,

    /// Retry policy for tasks that do not declare their own
    #[serde(default)]
    pub default_retry: RetryPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            ledger_dir: default_ledger_dir(),
            retention_days: default_retention_days(),
            default_retry: RetryPolicy::default(),
        }
    }
}

impl Settings {
    /// Retention window as a duration
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days.saturating_mul(24 * 60 * 60))
    }
}

fn default_concurrency() -> usize {
    4
}

fn default_ledger_dir() -> PathBuf {
    PathBuf::from(".gateflow/runs")
}

fn default_retention_days() -> u64 {
    30
}

/// Retry policy for a task
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts allowed, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Upper bound for any retry delay
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based): `base * 2^(attempt-1)`,
    /// capped at `backoff_max_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63);
        let delay = self.backoff_base_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.backoff_max_ms))
    }

    /// Whether another attempt may follow `attempts` made so far
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    60_000
}

/// Command templates used by the shell collaborator.
///
/// Templates may reference `{run_id}`, `{task_id}` and the fields of the
/// task kind they serve, e.g. `{source}` or `{scope}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandTemplates {
    /// Shell used to run the templates
    #[serde(default = "default_shell")]
    pub shell: String,

    #[serde(default)]
    pub transfer: Option<String>,

    #[serde(default)]
    pub load: Option<String>,

    #[serde(default)]
    pub quality: Option<String>,

    #[serde(default)]
    pub transform: Option<String>,

    #[serde(default)]
    pub report: Option<String>,
}

impl Default for CommandTemplates {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            transfer: None,
            load: None,
            quality: None,
            transform: None,
            report: None,
        }
    }
}

impl CommandTemplates {
    /// Template configured for a task kind
    pub fn for_kind(&self, kind: &TaskKind) -> Option<&str> {
        match kind {
            TaskKind::Transfer { .. } => self.transfer.as_deref(),
            TaskKind::Load { .. } => self.load.as_deref(),
            TaskKind::QualityGate { .. } => self.quality.as_deref(),
            TaskKind::Transform { .. } => self.transform.as_deref(),
            TaskKind::Report { .. } => self.report.as_deref(),
        }
    }
}

fn default_shell() -> String {
    "sh".to_string()
}

/// A single pipeline task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Task id (must be unique within the pipeline)
    pub id: String,

    /// Task description
    #[serde(default)]
    pub description: Option<String>,

    /// What the task does and which collaborator it calls
    pub kind: TaskKind,

    /// Ids of the tasks that must finish first
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Retry policy (pipeline default when absent)
    #[serde(default)]
    pub retry: Option<RetryPolicy>,

    /// Per-attempt timeout in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl TaskSpec {
    /// Short name of the task kind
    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }

    /// Effective retry policy
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.unwrap_or_default()
    }

    /// Per-attempt timeout
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Whether this task is a gate whose Fail stops its dependents
    pub fn is_blocking_gate(&self) -> bool {
        matches!(self.kind, TaskKind::QualityGate { blocking: true, .. })
    }
}

/// Task kinds, each carrying only the fields it needs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskKind {
    /// Move raw files into object storage
    Transfer { source: String, destination: String },

    /// Load staged data into a warehouse table
    Load { source: String, table: String },

    /// Run data-quality checks over a scope
    QualityGate {
        scope: String,

        #[serde(default)]
        rule_set: Option<String>,

        #[serde(default = "default_true")]
        blocking: bool,
    },

    /// Build a modeled schema
    Transform { model: String },

    /// Refresh a dashboard or report
    Report { target: String },
}

fn default_true() -> bool {
    true
}

impl TaskKind {
    /// Short lowercase name of the kind
    pub fn name(&self) -> &'static str {
        match self {
            Self::Transfer { .. } => "transfer",
            Self::Load { .. } => "load",
            Self::QualityGate { .. } => "quality",
            Self::Transform { .. } => "transform",
            Self::Report { .. } => "report",
        }
    }

    /// Named parameters this kind exposes to command templates
    pub fn parameters(&self) -> Vec<(&'static str, &str)> {
        match self {
            Self::Transfer {
                source,
                destination,
            } => vec![("source", source.as_str()), ("destination", destination.as_str())],
            Self::Load { source, table } => {
                vec![("source", source.as_str()), ("table", table.as_str())]
            }
            Self::QualityGate {
                scope, rule_set, ..
            } => vec![
                ("scope", scope.as_str()),
                ("rule_set", rule_set.as_deref().unwrap_or("")),
            ],
            Self::Transform { model } => vec![("model", model.as_str())],
            Self::Report { target } => vec![("target", target.as_str())],
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QualityGate {
                scope,
                blocking: false,
                ..
            } => write!(f, "quality[{}, non-blocking]", scope),
            Self::QualityGate { scope, .. } => write!(f, "quality[{}]", scope),
            other => write!(f, "{}", other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAREHOUSE_PIPELINE: &str = r#"
version: "3"
name: "retail-warehouse"
settings:
  concurrency: 2
  default_retry:
    max_attempts: 5
    backoff_base_ms: 10
collaborators:
  transfer: "cp {source} {destination}"
tasks:
  - id: transfer_raw
    kind:
      type: transfer
      source: data/retail.csv
      destination: landing/retail.csv
  - id: load_raw
    kind:
      type: load
      source: landing/retail.csv
      table: raw_invoices
    depends_on: [transfer_raw]
    retry:
      max_attempts: 2
  - id: check_raw
    kind:
      type: quality_gate
      scope: raw
      rule_set: checks/raw.yml
    depends_on: [load_raw]
  - id: check_report
    kind:
      type: quality_gate
      scope: reported
      blocking: false
    depends_on: [check_raw]
"#;

    #[test]
    fn test_parse_pipeline() {
        let pipeline = PipelineDefinition::from_yaml(WAREHOUSE_PIPELINE).unwrap();
        assert_eq!(pipeline.name, "retail-warehouse");
        assert_eq!(pipeline.version, "3");
        assert_eq!(pipeline.tasks.len(), 4);
        assert_eq!(pipeline.settings.concurrency, 2);
        assert_eq!(pipeline.settings.ledger_dir, PathBuf::from(".gateflow/runs"));
        assert_eq!(pipeline.collaborators.shell, "sh");
        assert_eq!(
            pipeline.collaborators.for_kind(&pipeline.tasks[0].kind),
            Some("cp {source} {destination}")
        );
    }

    #[test]
    fn test_gate_defaults_to_blocking() {
        let pipeline = PipelineDefinition::from_yaml(WAREHOUSE_PIPELINE).unwrap();
        let blocking = |id: &str| {
            pipeline
                .tasks
                .iter()
                .find(|t| t.id == id)
                .unwrap()
                .is_blocking_gate()
        };
        assert!(blocking("check_raw"));
        assert!(!blocking("check_report"));
        assert!(!blocking("load_raw"));
    }

    #[test]
    fn test_resolved_tasks_inherit_default_retry() {
        let pipeline = PipelineDefinition::from_yaml(WAREHOUSE_PIPELINE).unwrap();
        let tasks = pipeline.resolved_tasks();

        let transfer = tasks.iter().find(|t| t.id == "transfer_raw").unwrap();
        assert_eq!(transfer.retry_policy().max_attempts, 5);
        assert_eq!(transfer.retry_policy().backoff_base_ms, 10);

        // Task-level policy wins, missing fields use the built-in defaults
        let load = tasks.iter().find(|t| t.id == "load_raw").unwrap();
        assert_eq!(load.retry_policy().max_attempts, 2);
        assert_eq!(load.retry_policy().backoff_base_ms, 1_000);
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            backoff_base_ms: 100,
            backoff_max_ms: 1_000,
        };

        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(4), Duration::from_millis(800));
        assert_eq!(policy.backoff(5), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(200), Duration::from_millis(1_000));

        assert!(policy.allows_retry(9));
        assert!(!policy.allows_retry(10));
    }

    #[test]
    fn test_parse_toml_pipeline() {
        let source = r#"
name = "nightly"

[[tasks]]
id = "publish"
kind = { type = "report", target = "sales_dashboard" }
"#;

        let pipeline = PipelineDefinition::from_toml(source).unwrap();
        assert_eq!(pipeline.version, "1");
        assert_eq!(
            pipeline.tasks[0].kind,
            TaskKind::Report {
                target: "sales_dashboard".into()
            }
        );
    }

    #[test]
    fn test_kind_parameters() {
        let gate = TaskKind::QualityGate {
            scope: "transformed".into(),
            rule_set: None,
            blocking: true,
        };
        assert_eq!(gate.parameters(), vec![("scope", "transformed"), ("rule_set", "")]);
        assert_eq!(gate.to_string(), "quality[transformed]");
    }
}
