// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 gateflow contributors

//! Pipeline validation
//!
//! Validates a pipeline definition before any run is created.

use std::collections::{BTreeSet, HashSet};

use crate::collaborators::{placeholders, COMMON_PLACEHOLDERS};
use crate::errors::GateflowError;
use crate::pipeline::{DependencyGraph, PipelineDefinition, RetryPolicy, TaskKind, TaskSpec};

/// Pipeline validator
pub struct PipelineValidator;

impl PipelineValidator {
    /// Validate a pipeline definition
    pub fn validate(definition: &PipelineDefinition) -> Result<ValidationResult, GateflowError> {
        let mut result = ValidationResult::new();

        if definition.name.trim().is_empty() {
            result.add_error("Pipeline name is empty");
        }
        if definition.tasks.is_empty() {
            result.add_error("Pipeline has no tasks defined");
        }
        if definition.settings.concurrency == 0 {
            result.add_error("settings.concurrency must be at least 1");
        }
        Self::validate_retry("settings.default_retry", &definition.settings.default_retry, &mut result);

        // Structure: ids, duplicates, dangling edges, cycles
        match DependencyGraph::from_definition(definition) {
            Ok(_) => {}
            Err(e) if e.is_definition_error() => result.add_error(&e.to_string()),
            Err(e) => return Err(e),
        }

        let mut reported = HashSet::new();
        for task in &definition.tasks {
            Self::validate_task(task, &mut result);
            Self::validate_template(task, definition, &mut reported, &mut result);
        }

        Ok(result)
    }

    fn validate_task(task: &TaskSpec, result: &mut ValidationResult) {
        if let Some(retry) = &task.retry {
            Self::validate_retry(&format!("Task '{}': retry", task.id), retry, result);
        }
        if task.timeout_secs == Some(0) {
            result.add_error(&format!("Task '{}': timeout_secs must be positive", task.id));
        }

        for (field, value) in task.kind.parameters() {
            if field == "rule_set" {
                continue;
            }
            if value.trim().is_empty() {
                result.add_error(&format!("Task '{}': {} is empty", task.id, field));
            }
        }

        if let TaskKind::QualityGate { rule_set, .. } = &task.kind {
            if rule_set.as_deref().is_some_and(|r| r.trim().is_empty()) {
                result.add_error(&format!("Task '{}': rule_set is empty", task.id));
            }
            if task.depends_on.is_empty() {
                result.add_warning(&format!(
                    "Task '{}': quality gate has no dependencies and will check data before anything is loaded",
                    task.id
                ));
            }
        }
    }

    fn validate_retry(context: &str, retry: &RetryPolicy, result: &mut ValidationResult) {
        if retry.max_attempts == 0 {
            result.add_error(&format!("{}: max_attempts must be at least 1", context));
        }
        if retry.backoff_base_ms > retry.backoff_max_ms {
            result.add_error(&format!(
                "{}: backoff_base_ms ({}) exceeds backoff_max_ms ({})",
                context, retry.backoff_base_ms, retry.backoff_max_ms
            ));
        }
    }

    /// Check the shell template serving a task, once per kind
    fn validate_template(
        task: &TaskSpec,
        definition: &PipelineDefinition,
        reported: &mut HashSet<&'static str>,
        result: &mut ValidationResult,
    ) {
        let kind = task.kind_name();
        if !reported.insert(kind) {
            return;
        }

        let Some(template) = definition.collaborators.for_kind(&task.kind) else {
            result.add_warning(&format!(
                "No '{}' command configured under collaborators; '{}' tasks will fail with the shell collaborator",
                kind, kind
            ));
            return;
        };

        let known: BTreeSet<&str> = task
            .kind
            .parameters()
            .into_iter()
            .map(|(name, _)| name)
            .chain(COMMON_PLACEHOLDERS.iter().copied())
            .collect();
        for name in placeholders(template) {
            if !known.contains(name.as_str()) {
                result.add_warning(&format!(
                    "collaborators.{}: unknown placeholder '{{{}}}' will be passed through unchanged",
                    kind, name
                ));
            }
        }
    }
}

/// Result of pipeline validation
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }

    pub fn add_warning(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}
