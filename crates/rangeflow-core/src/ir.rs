//! SSA program representation consumed by the range analysis.
//!
//! The IR is deliberately minimal: integer-typed SSA values with a declared
//! bit-width and signedness, defining statements with a closed operator set,
//! explicit phi merges and explicit sigma (branch-restriction) statements in
//! the style of eSSA. Producing this IR from source text is the job of the
//! surrounding compiler front end; this crate only defines the interface and
//! a builder used by front ends and tests.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::range::Range;

/// Identifies one function within a [`Program`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FunctionId(pub u32);

/// Identifies one SSA value within its function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ValueId(pub u32);

/// Declared properties of one SSA value, plus the metadata slot the analysis
/// publishes into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueInfo {
    pub bitwidth: u8,
    pub signed: bool,
    /// Literal constants carry their value; everything else is `None`.
    pub literal: Option<i128>,
    /// Inferred range, written back by the analysis driver. `None` until the
    /// first analysis run.
    pub range: Option<Range>,
}

impl ValueInfo {
    pub fn new(bitwidth: u8, signed: bool) -> Self {
        Self {
            bitwidth,
            signed,
            literal: None,
            range: None,
        }
    }

    pub fn literal(bitwidth: u8, signed: bool, value: i128) -> Self {
        Self {
            bitwidth,
            signed,
            literal: Some(value),
            range: None,
        }
    }

    pub fn is_literal(&self) -> bool {
        self.literal.is_some()
    }
}

/// Width-changing and arithmetic unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
    Abs,
    Trunc,
    SignExtend,
    ZeroExtend,
}

/// Width-preserving binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Sdiv,
    Udiv,
    Srem,
    Urem,
    Shl,
    Lshr,
    Ashr,
    And,
    Or,
    Xor,
}

/// Comparison predicates; the `S`/`U` prefix picks the interpretation of the
/// operand bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Predicate {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
    Ult,
    Ule,
    Ugt,
    Uge,
}

impl Predicate {
    /// The predicate obtained by swapping the comparison operands:
    /// `a < b` iff `b > a`.
    pub fn swap(self) -> Self {
        match self {
            Predicate::Eq => Predicate::Eq,
            Predicate::Ne => Predicate::Ne,
            Predicate::Slt => Predicate::Sgt,
            Predicate::Sle => Predicate::Sge,
            Predicate::Sgt => Predicate::Slt,
            Predicate::Sge => Predicate::Sle,
            Predicate::Ult => Predicate::Ugt,
            Predicate::Ule => Predicate::Uge,
            Predicate::Ugt => Predicate::Ult,
            Predicate::Uge => Predicate::Ule,
        }
    }

    /// The logical negation: `!(a < b)` iff `a >= b`.
    pub fn invert(self) -> Self {
        match self {
            Predicate::Eq => Predicate::Ne,
            Predicate::Ne => Predicate::Eq,
            Predicate::Slt => Predicate::Sge,
            Predicate::Sle => Predicate::Sgt,
            Predicate::Sgt => Predicate::Sle,
            Predicate::Sge => Predicate::Slt,
            Predicate::Ult => Predicate::Uge,
            Predicate::Ule => Predicate::Ugt,
            Predicate::Ugt => Predicate::Ule,
            Predicate::Uge => Predicate::Ult,
        }
    }
}

/// One SSA statement. Every integer value is defined by exactly one
/// statement (or is a parameter / literal with no defining statement).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Statement {
    Unary {
        op: UnaryOp,
        dst: ValueId,
        src: ValueId,
    },
    Binary {
        op: BinaryOp,
        dst: ValueId,
        lhs: ValueId,
        rhs: ValueId,
    },
    /// Comparison producing a 1-bit value.
    Cmp {
        pred: Predicate,
        dst: ValueId,
        lhs: ValueId,
        rhs: ValueId,
    },
    /// SSA merge point.
    Phi {
        dst: ValueId,
        srcs: SmallVec<[ValueId; 2]>,
    },
    /// Branch restriction: `dst` is `src` on the successor where `cond`
    /// evaluated to `on_true`.
    Sigma {
        dst: ValueId,
        src: ValueId,
        cond: ValueId,
        on_true: bool,
    },
    Call {
        dst: Option<ValueId>,
        callee: FunctionId,
        args: Vec<ValueId>,
    },
    Return {
        value: Option<ValueId>,
    },
}

impl Statement {
    /// The value this statement defines, if any.
    pub fn defined(&self) -> Option<ValueId> {
        match *self {
            Statement::Unary { dst, .. }
            | Statement::Binary { dst, .. }
            | Statement::Cmp { dst, .. }
            | Statement::Phi { dst, .. }
            | Statement::Sigma { dst, .. } => Some(dst),
            Statement::Call { dst, .. } => dst,
            Statement::Return { .. } => None,
        }
    }
}

/// One function body in SSA form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub params: Vec<ValueId>,
    pub values: IndexMap<ValueId, ValueInfo>,
    pub stmts: Vec<Statement>,
}

impl Function {
    pub fn value(&self, id: ValueId) -> Option<&ValueInfo> {
        self.values.get(&id)
    }

    /// Values returned by this function, in statement order.
    pub fn returned_values(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.stmts.iter().filter_map(|s| match s {
            Statement::Return { value } => *value,
            _ => None,
        })
    }
}

/// A whole program: the unit the analysis runs over.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub functions: IndexMap<FunctionId, Function>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// The id the next [`add_function`](Self::add_function) call will assign.
    /// Lets a function body reference itself (recursion) before insertion.
    pub fn next_function_id(&self) -> FunctionId {
        FunctionId(self.functions.len() as u32)
    }

    pub fn add_function(&mut self, function: Function) -> FunctionId {
        let id = self.next_function_id();
        self.functions.insert(id, function);
        id
    }

    pub fn function(&self, id: FunctionId) -> Option<&Function> {
        self.functions.get(&id)
    }
}

/// Incremental construction of one [`Function`].
///
/// Allocates value ids, records declared widths, and appends statements. No
/// validation happens here; the analysis rejects malformed input when it
/// builds its constraint graph.
#[derive(Debug)]
pub struct FunctionBuilder {
    function: Function,
    next_value: u32,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            function: Function {
                name: name.into(),
                params: Vec::new(),
                values: IndexMap::new(),
                stmts: Vec::new(),
            },
            next_value: 0,
        }
    }

    fn alloc(&mut self, info: ValueInfo) -> ValueId {
        let id = ValueId(self.next_value);
        self.next_value += 1;
        self.function.values.insert(id, info);
        id
    }

    pub fn value(&mut self, bitwidth: u8, signed: bool) -> ValueId {
        self.alloc(ValueInfo::new(bitwidth, signed))
    }

    pub fn literal(&mut self, bitwidth: u8, signed: bool, value: i128) -> ValueId {
        self.alloc(ValueInfo::literal(bitwidth, signed, value))
    }

    pub fn param(&mut self, bitwidth: u8, signed: bool) -> ValueId {
        let id = self.value(bitwidth, signed);
        self.function.params.push(id);
        id
    }

    pub fn unary(&mut self, op: UnaryOp, dst: ValueId, src: ValueId) -> &mut Self {
        self.function.stmts.push(Statement::Unary { op, dst, src });
        self
    }

    pub fn binary(&mut self, op: BinaryOp, dst: ValueId, lhs: ValueId, rhs: ValueId) -> &mut Self {
        self.function
            .stmts
            .push(Statement::Binary { op, dst, lhs, rhs });
        self
    }

    pub fn cmp(&mut self, pred: Predicate, dst: ValueId, lhs: ValueId, rhs: ValueId) -> &mut Self {
        self.function
            .stmts
            .push(Statement::Cmp { pred, dst, lhs, rhs });
        self
    }

    pub fn phi(&mut self, dst: ValueId, srcs: impl IntoIterator<Item = ValueId>) -> &mut Self {
        self.function.stmts.push(Statement::Phi {
            dst,
            srcs: srcs.into_iter().collect(),
        });
        self
    }

    pub fn sigma(&mut self, dst: ValueId, src: ValueId, cond: ValueId, on_true: bool) -> &mut Self {
        self.function.stmts.push(Statement::Sigma {
            dst,
            src,
            cond,
            on_true,
        });
        self
    }

    pub fn call(
        &mut self,
        dst: Option<ValueId>,
        callee: FunctionId,
        args: impl IntoIterator<Item = ValueId>,
    ) -> &mut Self {
        self.function.stmts.push(Statement::Call {
            dst,
            callee,
            args: args.into_iter().collect(),
        });
        self
    }

    pub fn ret(&mut self, value: Option<ValueId>) -> &mut Self {
        self.function.stmts.push(Statement::Return { value });
        self
    }

    pub fn finish(self) -> Function {
        self.function
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_allocates_sequential_ids() {
        let mut b = FunctionBuilder::new("f");
        let p = b.param(8, true);
        let c = b.literal(8, true, 3);
        let d = b.value(8, true);
        b.binary(BinaryOp::Add, d, p, c).ret(Some(d));
        let f = b.finish();

        assert_eq!(p, ValueId(0));
        assert_eq!(c, ValueId(1));
        assert_eq!(d, ValueId(2));
        assert_eq!(f.params, vec![p]);
        assert_eq!(f.stmts.len(), 2);
        assert_eq!(f.returned_values().collect::<Vec<_>>(), vec![d]);
        assert!(f.value(c).unwrap().is_literal());
    }

    #[test]
    fn predicate_tables_are_involutions() {
        let all = [
            Predicate::Eq,
            Predicate::Ne,
            Predicate::Slt,
            Predicate::Sle,
            Predicate::Sgt,
            Predicate::Sge,
            Predicate::Ult,
            Predicate::Ule,
            Predicate::Ugt,
            Predicate::Uge,
        ];
        for p in all {
            assert_eq!(p.swap().swap(), p);
            assert_eq!(p.invert().invert(), p);
        }
        assert_eq!(Predicate::Slt.swap(), Predicate::Sgt);
        assert_eq!(Predicate::Ule.invert(), Predicate::Ugt);
    }

    #[test]
    fn program_ids_follow_insertion_order() {
        let mut p = Program::new();
        let reserved = p.next_function_id();
        let f = FunctionBuilder::new("main").finish();
        assert_eq!(p.add_function(f), reserved);
        assert_eq!(p.next_function_id(), FunctionId(1));
    }

    #[test]
    fn program_round_trips_through_serde() {
        let mut b = FunctionBuilder::new("f");
        let p = b.param(8, true);
        let c = b.literal(8, true, 3);
        let d = b.value(8, true);
        b.binary(BinaryOp::Add, d, p, c).ret(Some(d));

        let mut program = Program::new();
        program.add_function(b.finish());

        let json = serde_json::to_string(&program).unwrap();
        let back: Program = serde_json::from_str(&json).unwrap();
        assert_eq!(back, program);
    }
}
