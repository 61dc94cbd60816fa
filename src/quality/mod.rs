// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 gateflow contributors

//! Quality gate evaluation
//!
//! Turns the check results returned by a quality scan into a single gate
//! outcome. Evaluation looks only at the scan it is given; nothing carries
//! over from earlier gates.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Verdict of one named check
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Warn => write!(f, "warn"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

/// One row of a quality scan
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckResult {
    pub check_name: String,
    pub result: CheckStatus,
    #[serde(default)]
    pub message: String,
    /// Data region the check belongs to; untagged checks count for any scope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl CheckResult {
    pub fn new(check_name: impl Into<String>, result: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            check_name: check_name.into(),
            result,
            message: message.into(),
            scope: None,
        }
    }

    fn in_scope(&self, scope: &str) -> bool {
        self.scope.as_deref().map_or(true, |s| s == scope)
    }
}

/// Aggregated outcome of a gate
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum GateOutcome {
    Pass,
    Warn,
    Fail,
}

impl GateOutcome {
    /// Anything but a clean pass
    pub fn is_degraded(&self) -> bool {
        !matches!(self, Self::Pass)
    }
}

impl From<CheckStatus> for GateOutcome {
    fn from(status: CheckStatus) -> Self {
        match status {
            CheckStatus::Pass => Self::Pass,
            CheckStatus::Warn => Self::Warn,
            CheckStatus::Fail => Self::Fail,
        }
    }
}

impl std::fmt::Display for GateOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Warn => write!(f, "warn"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

/// Aggregate a scan into a gate outcome.
///
/// Fail if any in-scope check failed, else Warn if any warned, else Pass.
/// A scope without checks passes, but is reported as a configuration
/// warning because it usually means the rule set is incomplete.
pub fn evaluate(scope: &str, checks: &[CheckResult]) -> GateOutcome {
    let mut considered = checks.iter().filter(|c| c.in_scope(scope)).peekable();

    if considered.peek().is_none() {
        warn!(
            scope = scope,
            "no quality checks defined for scope; treating gate as passed"
        );
        return GateOutcome::Pass;
    }

    considered
        .map(|c| GateOutcome::from(c.result))
        .max()
        .unwrap_or(GateOutcome::Pass)
}

/// Names of the failed in-scope checks, in scan order
pub fn failed_checks(scope: &str, checks: &[CheckResult]) -> Vec<String> {
    checks
        .iter()
        .filter(|c| c.in_scope(scope) && c.result == CheckStatus::Fail)
        .map(|c| c.check_name.clone())
        .collect()
}
