//! Whole-program integer range analysis.
//!
//! The engine turns an SSA program ([`rangeflow_core::ir`]) into a single
//! flattened constraint graph, decomposes it into strongly-connected
//! components, and solves each component to a fixed point with widening and
//! narrowing over the interval domain ([`rangeflow_core::range`]). The
//! resulting ranges are published back into the program's value metadata and
//! summarized in an [`AnalysisReport`] for the passes that consume them
//! (bit-width minimization, dead-code elimination).
//!
//! Entry point: [`RangeAnalysis::run`].

pub mod analysis;
pub mod error;
pub mod graph;
pub mod scc;
pub mod solver;

pub use analysis::{AnalysisConfig, AnalysisReport, ExecutionMode, RangeAnalysis};
pub use error::AnalysisError;
pub use graph::{ConstraintGraph, OpId, VarId};
pub use solver::{Solver, SolverStats, SolverStrategy};
