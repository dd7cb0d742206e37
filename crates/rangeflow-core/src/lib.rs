//! Data model for the Rangeflow whole-program range analysis.
//!
//! This crate holds the two things every other part of the pipeline agrees
//! on: the SSA program representation the analysis consumes ([`ir`]) and the
//! interval abstract domain it computes over ([`range`]). The engine itself
//! (constraint graph, SCC decomposition, solver, driver) lives in
//! `rangeflow-analysis`.

pub mod ir;
pub mod range;

pub use ir::{
    BinaryOp, Function, FunctionBuilder, FunctionId, Predicate, Program, Statement, UnaryOp,
    ValueId, ValueInfo,
};
pub use range::{Bound, Range, RangeKind, MAX_BITWIDTH};
