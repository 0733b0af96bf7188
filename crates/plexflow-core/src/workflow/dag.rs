//! Round planning and dependency diagnostics for pipelines.
//!
//! Uses `petgraph` to model `depends_on` edges. Topological sort detects
//! cycles, depth-based grouping produces the static round schedule, and
//! Tarjan's SCC names the cycles that keep a stuck pipeline from progressing.

use std::collections::{HashMap, HashSet};

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use plexflow_types::workflow::PipelineStep;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("step '{step_id}' depends on unknown step '{dependency}'")]
    UnknownDependency { step_id: String, dependency: String },

    #[error("cycle detected involving steps {steps:?}")]
    CycleDetected { steps: Vec<String> },

    #[error("duplicate step id '{0}'")]
    DuplicateStepId(String),
}

// ---------------------------------------------------------------------------
// Graph construction
// ---------------------------------------------------------------------------

struct PipelineGraph<'a> {
    graph: DiGraph<&'a str, ()>,
    nodes: Vec<NodeIndex>,
    /// `(step, dependency)` pairs whose dependency is not in the step set.
    missing: Vec<(String, String)>,
}

/// Edge from dependency -> dependent; unknown dependencies are collected, not
/// added.
fn build_graph<'a>(steps: &[&'a PipelineStep]) -> Result<PipelineGraph<'a>, PlanError> {
    let mut id_to_idx: HashMap<&str, usize> = HashMap::with_capacity(steps.len());
    for (i, step) in steps.iter().enumerate() {
        if id_to_idx.insert(step.id.as_str(), i).is_some() {
            return Err(PlanError::DuplicateStepId(step.id.clone()));
        }
    }

    let mut graph = DiGraph::<&str, ()>::new();
    let nodes: Vec<_> = steps.iter().map(|s| graph.add_node(s.id.as_str())).collect();
    let mut missing = Vec::new();

    for (to_idx, step) in steps.iter().enumerate() {
        for dep in &step.depends_on {
            match id_to_idx.get(dep.as_str()) {
                Some(from_idx) => {
                    graph.add_edge(nodes[*from_idx], nodes[to_idx], ());
                }
                None => missing.push((step.id.clone(), dep.clone())),
            }
        }
    }

    Ok(PipelineGraph {
        graph,
        nodes,
        missing,
    })
}

/// Strongly connected components that form cycles, members in declaration
/// order, components ordered by their first member.
fn cycles_of(pg: &PipelineGraph<'_>) -> Vec<Vec<String>> {
    let position: HashMap<NodeIndex, usize> =
        pg.nodes.iter().enumerate().map(|(i, n)| (*n, i)).collect();

    let mut cycles: Vec<Vec<usize>> = tarjan_scc(&pg.graph)
        .into_iter()
        .filter(|component| {
            component.len() > 1
                || component
                    .first()
                    .is_some_and(|n| pg.graph.contains_edge(*n, *n))
        })
        .map(|component| {
            let mut members: Vec<usize> = component.iter().map(|n| position[n]).collect();
            members.sort_unstable();
            members
        })
        .collect();
    cycles.sort();

    cycles
        .into_iter()
        .map(|members| {
            members
                .into_iter()
                .map(|i| pg.graph[pg.nodes[i]].to_string())
                .collect()
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Round plan
// ---------------------------------------------------------------------------

/// Static round schedule for a pipeline.
///
/// Round `n` holds every step whose longest dependency chain has length `n`;
/// within a round, steps keep declaration order. This is the schedule the
/// resolver follows when every step succeeds.
pub fn plan_rounds(steps: &[PipelineStep]) -> Result<Vec<Vec<&PipelineStep>>, PlanError> {
    if steps.is_empty() {
        return Ok(vec![]);
    }

    let refs: Vec<&PipelineStep> = steps.iter().collect();
    let pg = build_graph(&refs)?;
    if let Some((step_id, dependency)) = pg.missing.first().cloned() {
        return Err(PlanError::UnknownDependency {
            step_id,
            dependency,
        });
    }

    let sorted = toposort(&pg.graph, None).map_err(|_| PlanError::CycleDetected {
        steps: cycles_of(&pg).into_iter().flatten().collect(),
    })?;

    // Root nodes have depth 0
    let mut depths: HashMap<&str, usize> = HashMap::new();
    let by_id: HashMap<&str, &PipelineStep> = steps.iter().map(|s| (s.id.as_str(), s)).collect();
    for node in sorted {
        let step_id = pg.graph[node];
        let depth = by_id[step_id]
            .depends_on
            .iter()
            .map(|dep| depths.get(dep.as_str()).copied().unwrap_or(0) + 1)
            .max()
            .unwrap_or(0);
        depths.insert(step_id, depth);
    }

    let max_depth = depths.values().copied().max().unwrap_or(0);
    let mut rounds: Vec<Vec<&PipelineStep>> = vec![vec![]; max_depth + 1];
    for step in steps {
        rounds[depths[step.id.as_str()]].push(step);
    }

    Ok(rounds)
}

/// Check a pipeline for duplicate ids, unknown references and cycles.
pub fn validate_pipeline(steps: &[PipelineStep]) -> Result<(), PlanError> {
    plan_rounds(steps).map(|_| ())
}

// ---------------------------------------------------------------------------
// Stuck-pipeline diagnosis
// ---------------------------------------------------------------------------

/// Why the remaining steps of a pipeline cannot become ready.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnosis {
    /// `(step, dependency)` pairs naming ids that are not in the pipeline.
    pub missing: Vec<(String, String)>,
    /// Groups of remaining steps that depend on each other.
    pub cycles: Vec<Vec<String>>,
}

/// Diagnose the steps left over when no further step can become ready.
///
/// `known` is every id in the pipeline, completed or not; dependencies on
/// completed steps are satisfied and never reported.
pub fn diagnose(remaining: &[&PipelineStep], known: &HashSet<&str>) -> Diagnosis {
    let missing = remaining
        .iter()
        .flat_map(|step| {
            step.depends_on
                .iter()
                .filter(|dep| !known.contains(dep.as_str()))
                .map(|dep| (step.id.clone(), dep.clone()))
        })
        .collect();

    // Only edges between remaining steps can form a blocking cycle
    let cycles = match build_graph(remaining) {
        Ok(pg) => cycles_of(&pg),
        Err(_) => Vec::new(),
    };

    Diagnosis { missing, cycles }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
