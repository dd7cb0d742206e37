//! Analysis driver: orchestrates graph construction, solving, and
//! publication of the results back into the program.
//!
//! The driver is the only component that touches the IR. It builds one
//! flattened constraint graph for the whole program, runs the solver to a
//! global fixed point (recursive call cycles are just cycles in the flat
//! graph), writes every inferred range into its value's metadata slot, and
//! reports which functions changed relative to the previous run so that
//! invalidation-sensitive consumers know what to re-examine. Running twice
//! on unchanged IR publishes bit-identical ranges and reports no changes.

use indexmap::{IndexMap, IndexSet};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use tracing::debug;

use rangeflow_core::ir::{FunctionId, Program, Statement};

use crate::error::AnalysisError;
use crate::graph::ConstraintGraph;
use crate::solver::{Solver, SolverStats, SolverStrategy};

/// How aggressively call/return edges are expanded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Link arguments to parameters and returns to call results; ranges flow
    /// through the whole call graph.
    #[default]
    Interprocedural,
    /// Analyze each function against unconstrained parameters and call
    /// results. Cheaper, strictly less precise.
    Local,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub strategy: SolverStrategy,
    pub mode: ExecutionMode,
}

/// Outcome of one driver run, consumed by the pass manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisReport {
    /// Functions whose published ranges differ from the previous run.
    pub changed: IndexSet<FunctionId>,
    /// Monotonically increasing per-function version counters.
    pub versions: IndexMap<FunctionId, u64>,
    /// Call-graph cycles (mutual or self recursion), in the order petgraph
    /// discovers them.
    pub recursion_groups: Vec<Vec<FunctionId>>,
    pub stats: SolverStats,
}

/// The range analysis pass. Keeps version counters across runs; everything
/// else is recomputed per invocation.
#[derive(Debug, Default)]
pub struct RangeAnalysis {
    config: AnalysisConfig,
    versions: IndexMap<FunctionId, u64>,
}

impl RangeAnalysis {
    pub fn new(config: AnalysisConfig) -> Self {
        Self {
            config,
            versions: IndexMap::new(),
        }
    }

    /// Analyze the whole program and publish ranges into the value metadata.
    /// On error nothing is published.
    pub fn run(&mut self, program: &mut Program) -> Result<AnalysisReport, AnalysisError> {
        let mut graph = ConstraintGraph::build(program, self.config.mode)?;
        let recursion_groups = self.recursion_groups(program);
        if !recursion_groups.is_empty() {
            debug!(groups = recursion_groups.len(), "recursive call cycles present");
        }

        let stats = Solver::new(self.config.strategy).solve(&mut graph);

        let mut changed: IndexSet<FunctionId> = IndexSet::new();
        for (_, node) in graph.vars() {
            if node.is_literal {
                continue;
            }
            let Some(func) = program.functions.get_mut(&node.function) else {
                continue;
            };
            let Some(info) = func.values.get_mut(&node.value) else {
                continue;
            };
            let published = Some(node.range);
            if info.range != published {
                info.range = published;
                changed.insert(node.function);
            }
        }

        for &fid in program.functions.keys() {
            self.versions.entry(fid).or_insert(0);
        }
        for &fid in &changed {
            if let Some(v) = self.versions.get_mut(&fid) {
                *v += 1;
            }
        }

        debug!(
            changed = changed.len(),
            components = stats.components,
            widening_steps = stats.widening_steps,
            "range analysis finished"
        );
        Ok(AnalysisReport {
            changed,
            versions: self.versions.clone(),
            recursion_groups,
            stats,
        })
    }

    /// Call-graph cycles, from petgraph's SCC over the call edges.
    fn recursion_groups(&self, program: &Program) -> Vec<Vec<FunctionId>> {
        let mut cg: DiGraph<FunctionId, ()> = DiGraph::new();
        let mut nodes: IndexMap<FunctionId, NodeIndex> = IndexMap::new();
        for &fid in program.functions.keys() {
            nodes.insert(fid, cg.add_node(fid));
        }
        for (&fid, func) in &program.functions {
            for stmt in &func.stmts {
                if let Statement::Call { callee, .. } = stmt {
                    if let (Some(&from), Some(&to)) = (nodes.get(&fid), nodes.get(callee)) {
                        cg.update_edge(from, to, ());
                    }
                }
            }
        }
        petgraph::algo::tarjan_scc(&cg)
            .into_iter()
            .filter(|group| {
                group.len() > 1 || group.iter().any(|&n| cg.find_edge(n, n).is_some())
            })
            .map(|group| group.into_iter().map(|n| cg[n]).collect())
            .collect()
    }
}

/// Convenience wrapper: analyze with default configuration and a throwaway
/// driver.
pub fn analyze(program: &mut Program) -> Result<AnalysisReport, AnalysisError> {
    RangeAnalysis::new(AnalysisConfig::default()).run(program)
}
