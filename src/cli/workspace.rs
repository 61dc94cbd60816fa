// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 gateflow contributors

//! What a command works against: the definition and the ledger directory

use miette::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::collaborators::Collaborators;
use crate::errors::GateflowError;
use crate::ledger::FileLedger;
use crate::pipeline::{DependencyGraph, ExecutionEngine, PipelineDefinition, Settings};

/// Resolved configuration for one CLI invocation.
///
/// Flags and environment win over the definition's `settings`, which win
/// over the built-in defaults.
pub struct Workspace {
    pipeline_path: PathBuf,
    definition: Option<PipelineDefinition>,
    ledger_dir: PathBuf,
}

impl Workspace {
    /// Load a workspace whose definition must exist
    pub fn load(pipeline: &Path, ledger_dir: Option<PathBuf>) -> Result<Self> {
        let definition = PipelineDefinition::from_file(pipeline)?;
        Ok(Self::resolve(pipeline, Some(definition), ledger_dir))
    }

    /// Load a workspace that can do without a definition, as ledger
    /// commands only need the ledger directory
    pub fn open(pipeline: &Path, ledger_dir: Option<PathBuf>) -> Result<Self> {
        let definition = if pipeline.exists() {
            Some(PipelineDefinition::from_file(pipeline)?)
        } else {
            None
        };
        Ok(Self::resolve(pipeline, definition, ledger_dir))
    }

    fn resolve(
        pipeline: &Path,
        definition: Option<PipelineDefinition>,
        ledger_dir: Option<PathBuf>,
    ) -> Self {
        let ledger_dir = ledger_dir.unwrap_or_else(|| {
            definition
                .as_ref()
                .map(|d| d.settings.ledger_dir.clone())
                .unwrap_or_else(|| Settings::default().ledger_dir)
        });

        Self {
            pipeline_path: pipeline.to_path_buf(),
            definition,
            ledger_dir,
        }
    }

    pub fn pipeline_path(&self) -> &Path {
        &self.pipeline_path
    }

    pub fn definition(&self) -> Result<&PipelineDefinition, GateflowError> {
        self.definition
            .as_ref()
            .ok_or_else(|| GateflowError::PipelineNotFound {
                path: self.pipeline_path.clone(),
            })
    }

    pub fn settings(&self) -> Settings {
        self.definition
            .as_ref()
            .map(|d| d.settings.clone())
            .unwrap_or_default()
    }

    pub fn ledger_dir(&self) -> &Path {
        &self.ledger_dir
    }

    pub fn graph(&self) -> Result<DependencyGraph, GateflowError> {
        DependencyGraph::from_definition(self.definition()?)
    }

    pub fn ledger(&self) -> Result<Arc<FileLedger>, GateflowError> {
        Ok(Arc::new(FileLedger::open(&self.ledger_dir)?))
    }

    /// Engine wired to the shell collaborators and the file ledger
    pub fn engine(&self, concurrency: Option<usize>) -> Result<ExecutionEngine, GateflowError> {
        let definition = self.definition()?;
        let concurrency = concurrency.unwrap_or(definition.settings.concurrency);

        Ok(ExecutionEngine::new(
            Collaborators::shell(&definition.collaborators),
            self.ledger()?,
        )
        .with_concurrency(concurrency))
    }

    /// Task ids in definition order, when the definition is available
    pub fn task_order(&self) -> Vec<String> {
        self.definition
            .as_ref()
            .map(|d| d.tasks.iter().map(|t| t.id.clone()).collect())
            .unwrap_or_default()
    }
}
