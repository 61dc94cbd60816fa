// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 gateflow contributors

//! Graph command - show the pipeline's layers and edges

use miette::Result;

use super::{GraphFormat, Workspace};

/// Run the graph command
pub async fn run(workspace: Workspace, format: GraphFormat) -> Result<()> {
    let graph = workspace.graph()?;

    let output = match format {
        GraphFormat::Text => graph.to_text(),
        GraphFormat::Dot => graph.to_dot(),
        GraphFormat::Mermaid => graph.to_mermaid(),
    };

    println!("{}", output);

    Ok(())
}
