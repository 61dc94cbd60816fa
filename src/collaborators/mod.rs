// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 gateflow contributors

//! External collaborators
//!
//! The orchestrator never moves data, runs SQL or evaluates rules itself.
//! Each task kind calls one of these narrow contracts, and the engine only
//! looks at what comes back. Implementations must tolerate being called
//! again for the same task: retries and resumed runs re-invoke them.

mod shell;

pub use shell::{placeholders, ShellCollaborator, COMMON_PLACEHOLDERS};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::errors::TaskError;
use crate::pipeline::CommandTemplates;
use crate::quality::CheckResult;

/// Identifies the attempt a collaborator is serving
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationContext {
    pub run_id: String,
    pub task_id: String,
    pub attempt: u32,
}

/// Parameters of a data movement task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveParams {
    Transfer { source: String, destination: String },
    Load { source: String, table: String },
}

/// Reply of a transfer or load
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MoveOutcome {
    pub success: bool,
    #[serde(default)]
    pub rows_affected: Option<u64>,
    #[serde(default)]
    pub error_detail: Option<String>,
}

impl MoveOutcome {
    pub fn succeeded(rows_affected: Option<u64>) -> Self {
        Self {
            success: true,
            rows_affected,
            error_detail: None,
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            rows_affected: None,
            error_detail: Some(detail.into()),
        }
    }
}

/// Reply of a transform
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransformOutcome {
    pub success: bool,
    #[serde(default)]
    pub error_detail: Option<String>,
}

/// Reply of a dashboard refresh
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub success: bool,
}

/// File transfer and warehouse load
#[async_trait]
pub trait DataMover: Send + Sync {
    async fn invoke(
        &self,
        ctx: &InvocationContext,
        params: &MoveParams,
    ) -> Result<MoveOutcome, TaskError>;
}

/// Data-quality scans
#[async_trait]
pub trait QualityChecker: Send + Sync {
    /// Run the checks of `rule_set` over `scope`, in rule order
    async fn run_scan(
        &self,
        ctx: &InvocationContext,
        scope: &str,
        rule_set: Option<&str>,
    ) -> Result<Vec<CheckResult>, TaskError>;
}

/// Modeling engine
#[async_trait]
pub trait Transformer: Send + Sync {
    async fn invoke(
        &self,
        ctx: &InvocationContext,
        model: &str,
    ) -> Result<TransformOutcome, TaskError>;
}

/// Dashboard and report refresh
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn refresh(
        &self,
        ctx: &InvocationContext,
        target: &str,
    ) -> Result<RefreshOutcome, TaskError>;
}

/// The set of collaborators a run talks to
#[derive(Clone)]
pub struct Collaborators {
    pub mover: Arc<dyn DataMover>,
    pub checker: Arc<dyn QualityChecker>,
    pub transformer: Arc<dyn Transformer>,
    pub reporter: Arc<dyn Reporter>,
}

impl Collaborators {
    /// Use one object for every contract
    pub fn from_single<C>(collaborator: Arc<C>) -> Self
    where
        C: DataMover + QualityChecker + Transformer + Reporter + 'static,
    {
        Self {
            mover: collaborator.clone(),
            checker: collaborator.clone(),
            transformer: collaborator.clone(),
            reporter: collaborator,
        }
    }

    /// Shell-command collaborators driven by the definition's templates
    pub fn shell(templates: &CommandTemplates) -> Self {
        Self::from_single(Arc::new(ShellCollaborator::new(templates.clone())))
    }
}
