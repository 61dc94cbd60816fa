// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 gateflow contributors

//! Pipeline definitions, dependency graph and execution engine
//!
//! This module holds the static side of a pipeline (the definition and the
//! validated graph built from it) and the engine that drives runs over it.

mod dag;
mod definition;
mod executor;
mod fingerprint;
mod validation;

pub use dag::DependencyGraph;
pub use definition::*;
pub use executor::{ExecutionEngine, RunResult};
pub use fingerprint::{fingerprint, DefinitionHasher};
pub use validation::{PipelineValidator, ValidationResult};
