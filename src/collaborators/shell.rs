// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 gateflow contributors

//! Shell collaborator
//!
//! Runs the command templates from the pipeline definition. Exit code 0 is
//! success; 126 and 127 (not executable, not found) are terminal; any other
//! non-zero code is a failure worth retrying.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Deserialize;
use std::collections::HashMap;
use tokio::process::Command;
use tracing::debug;

use super::{
    DataMover, InvocationContext, MoveOutcome, MoveParams, QualityChecker, RefreshOutcome,
    Reporter, TransformOutcome, Transformer,
};
use crate::errors::TaskError;
use crate::pipeline::CommandTemplates;
use crate::quality::CheckResult;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([a-z_]+)\}").expect("valid placeholder pattern"));

/// Placeholders available to every template
pub const COMMON_PLACEHOLDERS: &[&str] = &["run_id", "task_id", "attempt"];

/// Names of the `{placeholder}`s used by a template
pub fn placeholders(template: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(template)
        .map(|c| c[1].to_string())
        .collect()
}

/// Substitute known placeholders; unknown ones are left untouched
pub fn render(template: &str, values: &HashMap<&str, String>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            values
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Last line of a transfer or load may report the rows it touched
#[derive(Debug, Deserialize)]
struct MoveReport {
    #[serde(default)]
    rows_affected: Option<u64>,
}

struct ProcessOutput {
    code: i32,
    stdout: String,
    stderr: String,
}

impl ProcessOutput {
    fn success(&self) -> bool {
        self.code == 0
    }

    /// Short description of a failed command
    fn failure_detail(&self) -> String {
        let tail = self
            .stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("no error output");
        format!("exit code {}: {}", self.code, tail.trim())
    }
}

/// Collaborator backed by shell command templates
pub struct ShellCollaborator {
    templates: CommandTemplates,
}

impl ShellCollaborator {
    pub fn new(templates: CommandTemplates) -> Self {
        Self { templates }
    }

    /// Check whether the configured shell can be found
    pub fn check_available(&self) -> bool {
        which::which(&self.templates.shell).is_ok()
    }

    async fn run(
        &self,
        kind: &str,
        template: Option<&str>,
        ctx: &InvocationContext,
        params: &[(&str, &str)],
    ) -> Result<ProcessOutput, TaskError> {
        let template = template.ok_or_else(|| {
            TaskError::terminal(format!("no command configured for '{}' tasks", kind))
        })?;

        let mut values: HashMap<&str, String> = params
            .iter()
            .map(|(k, v)| (*k, v.to_string()))
            .collect();
        values.insert("run_id", ctx.run_id.clone());
        values.insert("task_id", ctx.task_id.clone());
        values.insert("attempt", ctx.attempt.to_string());

        let command = render(template, &values);
        debug!(task = %ctx.task_id, attempt = ctx.attempt, command = %command, "running collaborator command");

        let output = Command::new(&self.templates.shell)
            .arg("-c")
            .arg(&command)
            .env("GATEFLOW_RUN_ID", &ctx.run_id)
            .env("GATEFLOW_TASK_ID", &ctx.task_id)
            .env("GATEFLOW_ATTEMPT", ctx.attempt.to_string())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                TaskError::terminal(format!(
                    "failed to start shell '{}': {}",
                    self.templates.shell, e
                ))
            })?;

        let result = ProcessOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        match result.code {
            126 | 127 => Err(TaskError::terminal(result.failure_detail())),
            _ => Ok(result),
        }
    }
}

#[async_trait]
impl DataMover for ShellCollaborator {
    async fn invoke(
        &self,
        ctx: &InvocationContext,
        params: &MoveParams,
    ) -> Result<MoveOutcome, TaskError> {
        let (kind, template, values) = match params {
            MoveParams::Transfer {
                source,
                destination,
            } => (
                "transfer",
                self.templates.transfer.as_deref(),
                vec![("source", source.as_str()), ("destination", destination.as_str())],
            ),
            MoveParams::Load { source, table } => (
                "load",
                self.templates.load.as_deref(),
                vec![("source", source.as_str()), ("table", table.as_str())],
            ),
        };

        let output = self.run(kind, template, ctx, &values).await?;
        if !output.success() {
            return Ok(MoveOutcome::failed(output.failure_detail()));
        }

        let rows_affected = output
            .stdout
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .and_then(|l| serde_json::from_str::<MoveReport>(l.trim()).ok())
            .and_then(|r| r.rows_affected);

        Ok(MoveOutcome::succeeded(rows_affected))
    }
}

#[async_trait]
impl QualityChecker for ShellCollaborator {
    async fn run_scan(
        &self,
        ctx: &InvocationContext,
        scope: &str,
        rule_set: Option<&str>,
    ) -> Result<Vec<CheckResult>, TaskError> {
        let values = vec![("scope", scope), ("rule_set", rule_set.unwrap_or(""))];
        let output = self
            .run("quality", self.templates.quality.as_deref(), ctx, &values)
            .await?;

        let mut checks = Vec::new();
        for line in output.stdout.lines().map(str::trim) {
            // Scanners print banners and summaries around the JSON rows
            if !line.starts_with('{') {
                continue;
            }
            let check = serde_json::from_str::<CheckResult>(line).map_err(|e| {
                TaskError::terminal(format!("malformed check result '{}': {}", line, e))
            })?;
            checks.push(check);
        }

        // Scanners commonly exit non-zero when checks fail; only a scan that
        // produced nothing counts as a broken run
        if !output.success() && checks.is_empty() {
            return Err(TaskError::transient(output.failure_detail()));
        }

        Ok(checks)
    }
}

#[async_trait]
impl Transformer for ShellCollaborator {
    async fn invoke(
        &self,
        ctx: &InvocationContext,
        model: &str,
    ) -> Result<TransformOutcome, TaskError> {
        let output = self
            .run(
                "transform",
                self.templates.transform.as_deref(),
                ctx,
                &[("model", model)],
            )
            .await?;

        Ok(TransformOutcome {
            success: output.success(),
            error_detail: (!output.success()).then(|| output.failure_detail()),
        })
    }
}

#[async_trait]
impl Reporter for ShellCollaborator {
    async fn refresh(
        &self,
        ctx: &InvocationContext,
        target: &str,
    ) -> Result<RefreshOutcome, TaskError> {
        let output = self
            .run(
                "report",
                self.templates.report.as_deref(),
                ctx,
                &[("target", target)],
            )
            .await?;

        Ok(RefreshOutcome {
            success: output.success(),
        })
    }
}
