// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 gateflow contributors

//! Start-run command - create a run and drive it to completion

use colored::Colorize;
use miette::Result;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::status::print_run;
use super::Workspace;
use crate::errors::GateflowError;
use crate::pipeline::{DependencyGraph, ExecutionEngine, PipelineValidator, RunResult};
use crate::utils::{print_error, print_warning, run_progress, status_label};

/// Run the start-run command; returns the run's exit code
pub async fn run(
    workspace: Workspace,
    run_id: String,
    concurrency: Option<usize>,
    verbose: bool,
) -> Result<u8> {
    let graph = prepare(&workspace)?;
    let engine = workspace.engine(concurrency)?;
    let engine = attach(engine, &graph, &run_id, verbose);

    println!(
        "{} {} ({} tasks in {} layers)",
        "Starting run".bold(),
        run_id.bold(),
        graph.len(),
        graph.topological_layers().len()
    );

    let result = engine.start(&graph, &run_id).await?;
    Ok(report(&result, &workspace))
}

/// Validate the definition and build its graph, refusing invalid pipelines
pub(super) fn prepare(workspace: &Workspace) -> Result<DependencyGraph> {
    let definition = workspace.definition()?;
    let validation = PipelineValidator::validate(definition)?;

    for warning in &validation.warnings {
        print_warning(warning);
    }
    if !validation.is_valid() {
        for error in &validation.errors {
            print_error(error);
        }
        return Err(GateflowError::InvalidPipeline {
            reason: format!(
                "pipeline '{}' has {} error(s)",
                definition.name,
                validation.errors.len()
            ),
            help: Some("Run 'gateflow validate' for details".to_string()),
        }
        .into());
    }

    Ok(workspace.graph()?)
}

/// Progress bar and Ctrl-C handling for a foreground run
pub(super) fn attach(
    engine: ExecutionEngine,
    graph: &DependencyGraph,
    run_id: &str,
    verbose: bool,
) -> ExecutionEngine {
    let token = engine.cancellation_token();
    install_interrupt(token);

    // Verbose runs log every transition; a bar would garble them
    engine.with_progress(run_progress(graph.len() as u64, run_id, verbose))
}

fn install_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; letting running tasks finish");
            token.cancel();
        }
    });
}

/// Print the outcome of a run and map it to an exit code
pub(super) fn report(result: &RunResult, workspace: &Workspace) -> u8 {
    print_run(&result.record, &workspace.task_order());
    println!(
        "Run {} finished as {} in {:.2}s",
        result.run_id,
        status_label(result.status),
        result.duration.as_secs_f64()
    );
    result.exit_code()
}
