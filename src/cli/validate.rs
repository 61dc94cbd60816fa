// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 gateflow contributors

//! Validate command - check the pipeline definition

use colored::Colorize;
use miette::Result;

use super::Workspace;
use crate::collaborators::ShellCollaborator;
use crate::pipeline::{DependencyGraph, PipelineValidator};

/// Run the validate command
pub async fn run(workspace: Workspace, verbose: bool) -> Result<()> {
    println!("{}", "Validating pipeline...".bold());
    println!();

    let definition = match workspace.definition() {
        Ok(d) => d,
        Err(e) => {
            eprintln!("  {} Failed to load pipeline", "✗".red());
            eprintln!();
            return Err(e.into());
        }
    };

    println!(
        "  {} {} parsed",
        "✓".green(),
        workspace.pipeline_path().display()
    );

    let validation = PipelineValidator::validate(definition)?;

    let shell = ShellCollaborator::new(definition.collaborators.clone());
    let shell_missing = !shell.check_available();

    if !validation.errors.is_empty() {
        println!();
        println!("{}:", "Errors".red().bold());
        for error in &validation.errors {
            println!("  {} {}", "✗".red(), error);
        }
    }

    if !validation.warnings.is_empty() || shell_missing {
        println!();
        println!("{}:", "Warnings".yellow().bold());
        for warning in &validation.warnings {
            println!("  {} {}", "⚠".yellow(), warning);
        }
        if shell_missing {
            println!(
                "  {} shell '{}' not found on PATH",
                "⚠".yellow(),
                definition.collaborators.shell
            );
        }
    }

    if verbose && validation.is_valid() {
        let graph = DependencyGraph::from_definition(definition)?;
        println!();
        println!("{}:", "Pipeline summary".bold());
        println!("  Name: {} (version {})", definition.name, definition.version);
        println!("  Tasks: {}", graph.len());
        println!("  Layers: {}", graph.topological_layers().len());
        println!("  Max parallelism: {}", graph.max_parallelism());
        println!("  Fingerprint: {}", graph.fingerprint().dimmed());
    }

    println!();

    if !validation.is_valid() {
        Err(miette::miette!("Pipeline validation failed"))
    } else if validation.has_warnings() || shell_missing {
        println!("{}", "Pipeline is valid but has warnings.".yellow().bold());
        Ok(())
    } else {
        println!("{}", "Pipeline is valid!".green().bold());
        Ok(())
    }
}
