// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 gateflow contributors

//! Error types
//!
//! `GateflowError` covers everything that can stop the orchestrator itself:
//! broken pipeline definitions, ledger problems and I/O. Failures of the
//! work a task performs are described by [`TaskError`] and never abort a run
//! on their own; the engine records them and applies the retry and
//! propagation rules.

mod task;

pub use task::TaskError;

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for gateflow operations
pub type GateflowResult<T> = Result<T, GateflowError>;

/// Main error type for gateflow
#[derive(Error, Debug, Diagnostic)]
pub enum GateflowError {
    // ─────────────────────────────────────────────────────────────────────────
    // Definition Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Circular dependency detected between tasks: {}", involved_ids.join(", "))]
    #[diagnostic(
        code(gateflow::circular_dependency),
        help("Review the depends_on lists of these tasks to remove the cycle")
    )]
    CircularDependency { involved_ids: Vec<String> },

    #[error("Task '{task_id}' depends on unknown task '{missing_id}'")]
    #[diagnostic(
        code(gateflow::dangling_dependency),
        help("Check that '{missing_id}' is defined in your pipeline")
    )]
    DanglingDependency { task_id: String, missing_id: String },

    #[error("Task id '{task_id}' is defined more than once")]
    #[diagnostic(
        code(gateflow::duplicate_task),
        help("Task ids must be unique within a pipeline")
    )]
    DuplicateTask { task_id: String },

    #[error("Task '{task_id}' is invalid: {reason}")]
    #[diagnostic(code(gateflow::invalid_task))]
    InvalidTask { task_id: String, reason: String },

    #[error("Invalid pipeline configuration: {reason}")]
    #[diagnostic(code(gateflow::invalid_pipeline))]
    InvalidPipeline {
        reason: String,
        #[help]
        help: Option<String>,
    },

    #[error("Pipeline file not found: {path}")]
    #[diagnostic(
        code(gateflow::pipeline_not_found),
        help("Pass --pipeline <FILE> or create gateflow.yaml in the working directory")
    )]
    PipelineNotFound { path: PathBuf },

    // ─────────────────────────────────────────────────────────────────────────
    // Run Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Run '{run_id}' not found in the ledger")]
    #[diagnostic(
        code(gateflow::run_not_found),
        help("Start it with 'gateflow start-run {run_id}' or list runs with 'gateflow ledger list'")
    )]
    RunNotFound { run_id: String },

    #[error("Run '{run_id}' already exists")]
    #[diagnostic(
        code(gateflow::run_already_exists),
        help("Use 'gateflow resume-run {run_id}' to continue it")
    )]
    RunAlreadyExists { run_id: String },

    #[error("Invalid run id '{run_id}'")]
    #[diagnostic(
        code(gateflow::invalid_run_id),
        help("Run ids may contain letters, digits, '.', '_' and '-', and must start with a letter or digit")
    )]
    InvalidRunId { run_id: String },

    #[error("Pipeline definition changed since run '{run_id}' started")]
    #[diagnostic(
        code(gateflow::definition_changed),
        help("Resume with the definition the run was started with (fingerprint {expected}), or start a new run")
    )]
    DefinitionChanged {
        run_id: String,
        expected: String,
        actual: String,
    },

    #[error("Run '{run_id}' is finished and can no longer be modified")]
    #[diagnostic(
        code(gateflow::run_sealed),
        help("Use 'gateflow resume-run {run_id} --retry-failed' to re-execute failed tasks")
    )]
    RunSealed { run_id: String },

    #[error("Task '{task_id}' cannot go from {from} via '{transition}'")]
    #[diagnostic(code(gateflow::invalid_transition))]
    InvalidTransition {
        task_id: String,
        from: String,
        transition: String,
    },

    #[error("Task '{task_id}' is not part of run '{run_id}'")]
    #[diagnostic(code(gateflow::unknown_task))]
    UnknownTask { run_id: String, task_id: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Execution Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Execution failed: {message}")]
    #[diagnostic(code(gateflow::execution_failed))]
    ExecutionFailed {
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("Ledger error: {message}")]
    #[diagnostic(code(gateflow::ledger_error))]
    Ledger { message: String },

    // ─────────────────────────────────────────────────────────────────────────
    // IO/System Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Failed to read file '{path}': {error}")]
    #[diagnostic(code(gateflow::file_read_error))]
    FileReadError { path: PathBuf, error: String },

    #[error("Failed to write file '{path}': {error}")]
    #[diagnostic(code(gateflow::file_write_error))]
    FileWriteError { path: PathBuf, error: String },

    #[error("IO error: {message}")]
    #[diagnostic(code(gateflow::io_error))]
    Io { message: String },

    #[error("YAML parsing error: {message}")]
    #[diagnostic(code(gateflow::yaml_error))]
    Yaml { message: String },

    #[error("JSON parsing error: {message}")]
    #[diagnostic(code(gateflow::json_error))]
    Json { message: String },

    #[error("TOML parsing error: {message}")]
    #[diagnostic(code(gateflow::toml_error))]
    Toml { message: String },
}

impl From<std::io::Error> for GateflowError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { message: e.to_string() }
    }
}

impl From<serde_yaml::Error> for GateflowError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml { message: e.to_string() }
    }
}

impl From<serde_json::Error> for GateflowError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json { message: e.to_string() }
    }
}

impl From<toml::de::Error> for GateflowError {
    fn from(e: toml::de::Error) -> Self {
        Self::Toml { message: e.to_string() }
    }
}

impl GateflowError {
    /// Whether this error comes from a broken pipeline definition.
    ///
    /// Definition errors are raised while building the dependency graph and
    /// never reach execution.
    pub fn is_definition_error(&self) -> bool {
        matches!(
            self,
            Self::CircularDependency { .. }
                | Self::DanglingDependency { .. }
                | Self::DuplicateTask { .. }
                | Self::InvalidTask { .. }
                | Self::InvalidPipeline { .. }
        )
    }

    /// Create a ledger error from any displayable cause
    pub fn ledger(message: impl std::fmt::Display) -> Self {
        Self::Ledger {
            message: message.to_string(),
        }
    }
}
