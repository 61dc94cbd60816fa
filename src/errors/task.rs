// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 gateflow contributors

//! Task-level failures

use thiserror::Error;

/// Why a single task attempt did not succeed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Timeouts, network trouble, a collaborator reporting `success: false`.
    /// Retried while attempts remain.
    #[error("transient failure: {detail}")]
    Transient { detail: String },

    /// Retrying cannot help (missing executable, rejected request).
    #[error("terminal failure: {detail}")]
    Terminal { detail: String },

    /// The scan ran fine and its verdict was Fail on a blocking gate.
    #[error("quality gate '{gate}' failed for scope '{scope}': {}", failed_checks.join(", "))]
    QualityGateFailure {
        gate: String,
        scope: String,
        failed_checks: Vec<String>,
    },
}

impl TaskError {
    pub fn transient(detail: impl Into<String>) -> Self {
        Self::Transient {
            detail: detail.into(),
        }
    }

    pub fn terminal(detail: impl Into<String>) -> Self {
        Self::Terminal {
            detail: detail.into(),
        }
    }

    /// Whether the retry policy applies to this failure
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_errors_retry() {
        assert!(TaskError::transient("timeout").is_retryable());
        assert!(!TaskError::terminal("no such table").is_retryable());

        let gate = TaskError::QualityGateFailure {
            gate: "check_raw".into(),
            scope: "raw".into(),
            failed_checks: vec!["row_count".into(), "freshness".into()],
        };
        assert!(!gate.is_retryable());
        assert_eq!(
            gate.to_string(),
            "quality gate 'check_raw' failed for scope 'raw': row_count, freshness"
        );
    }
}
