//! Fatal analysis errors.
//!
//! Everything here means the input IR is malformed; the analysis never
//! publishes a partial result on error. Imprecision (non-converging loops,
//! possible division by zero) is not an error; the domain absorbs it.

use rangeflow_core::ir::{FunctionId, ValueId};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    #[error("function `{function}`: value {value:?} has invalid bit-width {bitwidth}")]
    InvalidBitwidth {
        function: String,
        value: ValueId,
        bitwidth: u8,
    },

    #[error(
        "function `{function}`, statement {stmt}: operand width {found} disagrees with \
         expected width {expected}"
    )]
    WidthMismatch {
        function: String,
        stmt: usize,
        expected: u8,
        found: u8,
    },

    #[error("function `{function}`: reference to undeclared value {value:?}")]
    UnknownValue { function: String, value: ValueId },

    #[error("function `{function}`: value {value:?} is defined more than once")]
    Redefinition { function: String, value: ValueId },

    #[error("function `{function}`: call to unknown function {callee:?}")]
    UnknownCallee {
        function: String,
        callee: FunctionId,
    },

    #[error(
        "function `{function}`: call to `{callee}` passes {found} arguments, expected {expected}"
    )]
    CallArity {
        function: String,
        callee: String,
        expected: usize,
        found: usize,
    },
}
