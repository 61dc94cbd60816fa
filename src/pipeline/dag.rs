// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 gateflow contributors

//! Dependency graph for pipeline tasks
//!
//! Builds and validates the task DAG once per definition, detecting
//! duplicates, dangling edges and cycles before anything executes, and
//! partitions tasks into layers that can run side by side.

use once_cell::sync::Lazy;
use petgraph::algo::{has_path_connecting, tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, EdgeRef};
use petgraph::Direction;
use regex::Regex;
use std::collections::{HashMap, HashSet};

use crate::errors::GateflowError;
use crate::pipeline::{fingerprint, PipelineDefinition, TaskSpec};

// Task ids end up in ledger keys, log fields and rendered graphs
static TASK_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").expect("valid task id pattern"));

/// Immutable, validated task graph
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    name: String,
    fingerprint: String,
    tasks: Vec<TaskSpec>,
    graph: DiGraph<usize, ()>,
    id_to_index: HashMap<String, NodeIndex>,
    layers: Vec<Vec<String>>,
}

impl DependencyGraph {
    /// Build the graph for a definition, with default retry policies applied
    pub fn from_definition(definition: &PipelineDefinition) -> Result<Self, GateflowError> {
        let mut dag = Self::build(definition.resolved_tasks())?;
        dag.name = definition.name.clone();
        Ok(dag)
    }

    /// Build and validate the graph for a task list
    pub fn build(tasks: Vec<TaskSpec>) -> Result<Self, GateflowError> {
        let mut graph = DiGraph::new();
        let mut id_to_index = HashMap::new();

        for (idx, task) in tasks.iter().enumerate() {
            if !TASK_ID_PATTERN.is_match(&task.id) {
                return Err(GateflowError::InvalidTask {
                    task_id: task.id.clone(),
                    reason: "ids must start with a letter or digit and contain only letters, digits, '.', '_' or '-'".to_string(),
                });
            }
            if id_to_index.contains_key(&task.id) {
                return Err(GateflowError::DuplicateTask {
                    task_id: task.id.clone(),
                });
            }
            let node = graph.add_node(idx);
            id_to_index.insert(task.id.clone(), node);
        }

        for task in &tasks {
            let node = id_to_index[&task.id];
            for dep in &task.depends_on {
                if dep == &task.id {
                    return Err(GateflowError::CircularDependency {
                        involved_ids: vec![task.id.clone()],
                    });
                }

                let dep_node =
                    id_to_index
                        .get(dep)
                        .ok_or_else(|| GateflowError::DanglingDependency {
                            task_id: task.id.clone(),
                            missing_id: dep.clone(),
                        })?;

                if !graph.contains_edge(*dep_node, node) {
                    graph.add_edge(*dep_node, node, ());
                }
            }
        }

        let mut dag = Self {
            name: "pipeline".to_string(),
            fingerprint: fingerprint(&tasks)?,
            tasks,
            graph,
            id_to_index,
            layers: Vec::new(),
        };
        dag.layers = dag.compute_layers()?;

        Ok(dag)
    }

    /// Longest-path layering over a topological order.
    ///
    /// A task sits one layer below its deepest predecessor; ties keep
    /// definition order.
    fn compute_layers(&self) -> Result<Vec<Vec<String>>, GateflowError> {
        let order = toposort(&self.graph, None).map_err(|_| self.cycle_error())?;

        let mut depth: HashMap<NodeIndex, usize> = HashMap::new();
        for node in order {
            let level = self
                .graph
                .neighbors_directed(node, Direction::Incoming)
                .map(|pred| depth[&pred] + 1)
                .max()
                .unwrap_or(0);
            depth.insert(node, level);
        }

        let count = depth.values().copied().max().map_or(0, |d| d + 1);
        let mut layers = vec![Vec::new(); count];
        for (idx, task) in self.tasks.iter().enumerate() {
            let node = NodeIndex::new(idx);
            layers[depth[&node]].push(task.id.clone());
        }

        Ok(layers)
    }

    /// Collect every task sitting on a cycle
    fn cycle_error(&self) -> GateflowError {
        let mut involved_ids: Vec<String> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| component.len() > 1)
            .flatten()
            .map(|node| self.id_of(node).to_string())
            .collect();
        involved_ids.sort();

        GateflowError::CircularDependency { involved_ids }
    }

    fn id_of(&self, node: NodeIndex) -> &str {
        &self.tasks[self.graph[node]].id
    }

    /// Pipeline name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Digest of the task definitions
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Tasks partitioned into ordered layers; every predecessor of a task
    /// lives in a strictly earlier layer
    pub fn topological_layers(&self) -> &[Vec<String>] {
        &self.layers
    }

    /// Widest layer, i.e. the most tasks that can ever run at once
    pub fn max_parallelism(&self) -> usize {
        self.layers.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// All tasks in definition order
    pub fn tasks(&self) -> &[TaskSpec] {
        &self.tasks
    }

    /// Number of tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Look up a task by id
    pub fn task(&self, id: &str) -> Option<&TaskSpec> {
        self.id_to_index
            .get(id)
            .map(|node| &self.tasks[self.graph[*node]])
    }

    /// Direct predecessors of a task
    pub fn dependencies(&self, id: &str) -> Option<Vec<String>> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Direct dependents of a task
    pub fn dependents(&self, id: &str) -> Option<Vec<String>> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &str, direction: Direction) -> Option<Vec<String>> {
        let node = self.id_to_index.get(id)?;
        let mut ids: Vec<String> = self
            .graph
            .neighbors_directed(*node, direction)
            .map(|n| self.id_of(n).to_string())
            .collect();
        ids.sort_by_key(|id| self.id_to_index[id]);
        Some(ids)
    }

    /// Every task reachable from `id`, in definition order
    pub fn descendants(&self, id: &str) -> Vec<String> {
        let Some(start) = self.id_to_index.get(id) else {
            return Vec::new();
        };

        let mut reached = HashSet::new();
        let mut bfs = Bfs::new(&self.graph, *start);
        while let Some(node) = bfs.next(&self.graph) {
            if node != *start {
                reached.insert(node);
            }
        }

        self.tasks
            .iter()
            .enumerate()
            .filter(|(idx, _)| reached.contains(&NodeIndex::new(*idx)))
            .map(|(_, task)| task.id.clone())
            .collect()
    }

    /// Check if task `a` depends (directly or transitively) on task `b`
    pub fn depends_on(&self, a: &str, b: &str) -> bool {
        let (Some(node_a), Some(node_b)) = (self.id_to_index.get(a), self.id_to_index.get(b))
        else {
            return false;
        };
        a != b && has_path_connecting(&self.graph, *node_b, *node_a, None)
    }

    /// Generate Mermaid diagram of the DAG
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");

        for task in &self.tasks {
            out.push_str(&format!("    {}[\"{} ({})\"]\n", task.id, task.id, task.kind));
        }

        for edge in self.graph.edge_references() {
            out.push_str(&format!(
                "    {} --> {}\n",
                self.id_of(edge.source()),
                self.id_of(edge.target())
            ));
        }

        out
    }

    /// Generate DOT diagram of the DAG
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph pipeline {\n");
        out.push_str("    rankdir=TB;\n");
        out.push_str("    node [shape=box, style=rounded];\n\n");

        for task in &self.tasks {
            let shape = if matches!(task.kind, crate::pipeline::TaskKind::QualityGate { .. }) {
                ", shape=diamond"
            } else {
                ""
            };
            out.push_str(&format!(
                "    \"{}\" [label=\"{}\\n{}\"{}];\n",
                task.id, task.id, task.kind, shape
            ));
        }

        for edge in self.graph.edge_references() {
            out.push_str(&format!(
                "    \"{}\" -> \"{}\";\n",
                self.id_of(edge.source()),
                self.id_of(edge.target())
            ));
        }

        out.push_str("}\n");
        out
    }

    /// Generate text representation of the layered execution order
    pub fn to_text(&self) -> String {
        let mut out = String::new();

        for (i, layer) in self.layers.iter().enumerate() {
            out.push_str(&format!("Layer {}:\n", i + 1));
            for id in layer {
                let Some(task) = self.task(id) else { continue };
                out.push_str(&format!("  - {} ({})", id, task.kind));
                if !task.depends_on.is_empty() {
                    out.push_str(&format!(" [depends: {}]", task.depends_on.join(", ")));
                }
                out.push('\n');
            }
        }

        out
    }
}
