//! Constraint graph built from the SSA program.
//!
//! One `VarNode` per integer SSA value, one `OpNode` per defining statement.
//! Nodes live in arenas addressed by `u32` newtype indices, so the cycles
//! created by loop-carried phis need no reference counting. The def map
//! (value → defining op) and use map (value → reading ops) give the solver
//! both directions of traversal; call/return edges across functions are
//! materialized as extra phi-style ops, turning the whole program into one
//! flat graph.

use indexmap::IndexMap;
use smallvec::SmallVec;

use rangeflow_core::ir::{
    BinaryOp, Function, FunctionId, Predicate, Program, Statement, UnaryOp, ValueId,
};
use rangeflow_core::range::{Range, MAX_BITWIDTH};

use crate::analysis::ExecutionMode;
use crate::error::AnalysisError;

/// Index of a [`VarNode`] in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId(pub u32);

/// Index of an [`OpNode`] in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpId(pub u32);

/// Widened-bound classification used by the Crop strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AbstractState {
    #[default]
    Bounded,
    LowUnbounded,
    HighUnbounded,
    Unbounded,
}

/// One SSA value inside the constraint graph.
#[derive(Debug, Clone)]
pub struct VarNode {
    pub function: FunctionId,
    pub value: ValueId,
    pub bitwidth: u8,
    pub signed: bool,
    pub is_literal: bool,
    pub range: Range,
    pub abstract_state: AbstractState,
}

/// The operator of one constraint edge.
#[derive(Debug, Clone)]
pub enum OpKind {
    Unary {
        op: UnaryOp,
        src: VarId,
    },
    Binary {
        op: BinaryOp,
        lhs: VarId,
        rhs: VarId,
    },
    Cmp {
        pred: Predicate,
        lhs: VarId,
        rhs: VarId,
    },
    /// SSA merge; also used for the call/return linking edges.
    Phi {
        srcs: SmallVec<[VarId; 2]>,
    },
    Sigma {
        src: VarId,
    },
}

/// Branch-derived restriction attached to a sigma edge.
#[derive(Debug, Clone)]
pub enum Intersect {
    /// No restriction.
    Full,
    /// Variable-vs-constant guard, known at construction time.
    Fixed(Range),
    /// Variable-vs-variable guard; the region is resolved once the bound's
    /// component has stabilized.
    Symbolic {
        bound: VarId,
        pred: Predicate,
        resolved: Option<Range>,
    },
}

/// One constraint: how the sink's range derives from the sources.
#[derive(Debug, Clone)]
pub struct OpNode {
    pub sink: VarId,
    pub kind: OpKind,
    pub intersect: Intersect,
}

impl OpNode {
    /// Source variables, in operand order.
    pub fn sources(&self) -> SmallVec<[VarId; 2]> {
        match &self.kind {
            OpKind::Unary { src, .. } | OpKind::Sigma { src } => SmallVec::from_slice(&[*src]),
            OpKind::Binary { lhs, rhs, .. } | OpKind::Cmp { lhs, rhs, .. } => {
                SmallVec::from_slice(&[*lhs, *rhs])
            }
            OpKind::Phi { srcs } => srcs.clone(),
        }
    }
}

/// The whole-program constraint graph. Owns every node; mutated exclusively
/// by the solver during one analysis run.
#[derive(Debug)]
pub struct ConstraintGraph {
    vars: Vec<VarNode>,
    ops: Vec<OpNode>,
    lookup: IndexMap<(FunctionId, ValueId), VarId>,
    defs: Vec<Option<OpId>>,
    uses: Vec<Vec<OpId>>,
    /// bound variable → sigma ops whose symbolic intersection waits on it.
    symbolic_uses: IndexMap<VarId, Vec<OpId>>,
}

impl ConstraintGraph {
    pub fn build(program: &Program, mode: ExecutionMode) -> Result<Self, AnalysisError> {
        Builder::new(program, mode).build()
    }

    pub fn var_count(&self) -> usize {
        self.vars.len()
    }

    pub fn op_count(&self) -> usize {
        self.ops.len()
    }

    pub fn var(&self, id: VarId) -> &VarNode {
        &self.vars[id.0 as usize]
    }

    pub fn var_mut(&mut self, id: VarId) -> &mut VarNode {
        &mut self.vars[id.0 as usize]
    }

    pub fn op(&self, id: OpId) -> &OpNode {
        &self.ops[id.0 as usize]
    }

    pub fn op_mut(&mut self, id: OpId) -> &mut OpNode {
        &mut self.ops[id.0 as usize]
    }

    pub fn var_ids(&self) -> impl Iterator<Item = VarId> {
        (0..self.vars.len() as u32).map(VarId)
    }

    pub fn vars(&self) -> impl Iterator<Item = (VarId, &VarNode)> + '_ {
        self.vars
            .iter()
            .enumerate()
            .map(|(i, v)| (VarId(i as u32), v))
    }

    pub fn lookup(&self, function: FunctionId, value: ValueId) -> Option<VarId> {
        self.lookup.get(&(function, value)).copied()
    }

    pub fn def(&self, var: VarId) -> Option<OpId> {
        self.defs[var.0 as usize]
    }

    pub fn uses(&self, var: VarId) -> &[OpId] {
        &self.uses[var.0 as usize]
    }

    pub fn symbolic_uses(&self, bound: VarId) -> &[OpId] {
        self.symbolic_uses
            .get(&bound)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// True when the variable's defining op reads the variable itself.
    pub fn has_self_loop(&self, var: VarId) -> bool {
        self.def(var)
            .map(|op| self.op(op).sources().contains(&var))
            .unwrap_or(false)
    }

    /// Transfer function of one op: compute the sink's range from the
    /// current source ranges and the op's intersection.
    pub fn eval(&self, id: OpId) -> Range {
        let op = self.op(id);
        let bw = self.var(op.sink).bitwidth;
        let raw = match &op.kind {
            OpKind::Unary { op: uop, src } => {
                let r = self.var(*src).range;
                match uop {
                    UnaryOp::Neg => r.negate(),
                    UnaryOp::Not => r.bit_not(),
                    UnaryOp::Abs => r.abs(),
                    UnaryOp::Trunc => r.truncate(bw),
                    UnaryOp::SignExtend => r.sext_or_trunc(bw),
                    UnaryOp::ZeroExtend => r.zext_or_trunc(bw),
                }
            }
            OpKind::Binary { op: bop, lhs, rhs } => {
                let a = self.var(*lhs).range;
                let b = self.var(*rhs).range;
                match bop {
                    BinaryOp::Add => a.add(&b),
                    BinaryOp::Sub => a.sub(&b),
                    BinaryOp::Mul => a.mul(&b),
                    BinaryOp::Sdiv => a.sdiv(&b),
                    BinaryOp::Udiv => a.udiv(&b),
                    BinaryOp::Srem => a.srem(&b),
                    BinaryOp::Urem => a.urem(&b),
                    BinaryOp::Shl => a.shl(&b),
                    BinaryOp::Lshr => a.shr(&b, false),
                    BinaryOp::Ashr => a.shr(&b, true),
                    BinaryOp::And => a.bit_and(&b),
                    BinaryOp::Or => a.bit_or(&b),
                    BinaryOp::Xor => a.bit_xor(&b),
                }
            }
            OpKind::Cmp { pred, lhs, rhs } => {
                self.var(*lhs).range.cmp(*pred, &self.var(*rhs).range, bw)
            }
            OpKind::Phi { srcs } => srcs
                .iter()
                .fold(Range::empty(bw), |acc, s| acc.union_with(&self.var(*s).range)),
            OpKind::Sigma { src } => self.var(*src).range,
        };

        let bound = match &op.intersect {
            Intersect::Full => return raw,
            Intersect::Fixed(r) => *r,
            Intersect::Symbolic { resolved, .. } => match resolved {
                Some(r) => *r,
                // Not resolved yet: no restriction.
                None => return raw,
            },
        };
        if raw.is_empty() {
            return raw;
        }
        let restricted = raw.intersect_with(&bound);
        // Restrict only when the guard actually tightens; a temporarily
        // empty intersection must not wipe out the incoming range.
        if !restricted.is_empty() && restricted.span() < raw.span() {
            restricted
        } else {
            raw
        }
    }
}

struct Builder<'p> {
    program: &'p Program,
    mode: ExecutionMode,
    vars: Vec<VarNode>,
    ops: Vec<OpNode>,
    lookup: IndexMap<(FunctionId, ValueId), VarId>,
    defs: Vec<Option<OpId>>,
    uses: Vec<Vec<OpId>>,
    symbolic_uses: IndexMap<VarId, Vec<OpId>>,
    /// (callee, parameter index) → actual-argument vars across call sites.
    param_links: IndexMap<(FunctionId, usize), Vec<VarId>>,
    /// call-result var → callee whose returns feed it.
    result_links: Vec<(VarId, FunctionId)>,
}

impl<'p> Builder<'p> {
    fn new(program: &'p Program, mode: ExecutionMode) -> Self {
        Self {
            program,
            mode,
            vars: Vec::new(),
            ops: Vec::new(),
            lookup: IndexMap::new(),
            defs: Vec::new(),
            uses: Vec::new(),
            symbolic_uses: IndexMap::new(),
            param_links: IndexMap::new(),
            result_links: Vec::new(),
        }
    }

    fn build(mut self) -> Result<ConstraintGraph, AnalysisError> {
        for (&fid, func) in &self.program.functions {
            self.add_function_vars(fid, func)?;
        }
        for (&fid, func) in &self.program.functions {
            self.add_function_ops(fid, func)?;
        }
        if self.mode == ExecutionMode::Interprocedural {
            self.link_calls()?;
        }
        Ok(ConstraintGraph {
            vars: self.vars,
            ops: self.ops,
            lookup: self.lookup,
            defs: self.defs,
            uses: self.uses,
            symbolic_uses: self.symbolic_uses,
        })
    }

    fn add_function_vars(&mut self, fid: FunctionId, func: &Function) -> Result<(), AnalysisError> {
        for (&vid, info) in &func.values {
            if info.bitwidth == 0 || info.bitwidth > MAX_BITWIDTH {
                return Err(AnalysisError::InvalidBitwidth {
                    function: func.name.clone(),
                    value: vid,
                    bitwidth: info.bitwidth,
                });
            }
            let range = match info.literal {
                Some(c) => Range::constant(info.bitwidth, c),
                None => Range::empty(info.bitwidth),
            };
            let id = VarId(self.vars.len() as u32);
            self.vars.push(VarNode {
                function: fid,
                value: vid,
                bitwidth: info.bitwidth,
                signed: info.signed,
                is_literal: info.is_literal(),
                range,
                abstract_state: AbstractState::default(),
            });
            self.defs.push(None);
            self.uses.push(Vec::new());
            self.lookup.insert((fid, vid), id);
        }
        Ok(())
    }

    fn var_of(
        &self,
        fid: FunctionId,
        vid: ValueId,
        func: &Function,
    ) -> Result<VarId, AnalysisError> {
        self.lookup
            .get(&(fid, vid))
            .copied()
            .ok_or_else(|| AnalysisError::UnknownValue {
                function: func.name.clone(),
                value: vid,
            })
    }

    fn bw(&self, var: VarId) -> u8 {
        self.vars[var.0 as usize].bitwidth
    }

    fn expect_width(
        &self,
        func: &Function,
        stmt: usize,
        expected: u8,
        var: VarId,
    ) -> Result<(), AnalysisError> {
        let found = self.bw(var);
        if found != expected {
            return Err(AnalysisError::WidthMismatch {
                function: func.name.clone(),
                stmt,
                expected,
                found,
            });
        }
        Ok(())
    }

    fn add_op(&mut self, func: &Function, node: OpNode) -> Result<(), AnalysisError> {
        let id = OpId(self.ops.len() as u32);
        let sink = node.sink;
        let slot = &mut self.defs[sink.0 as usize];
        if slot.is_some() || self.vars[sink.0 as usize].is_literal {
            return Err(AnalysisError::Redefinition {
                function: func.name.clone(),
                value: self.vars[sink.0 as usize].value,
            });
        }
        *slot = Some(id);
        for src in node.sources() {
            let list = &mut self.uses[src.0 as usize];
            if !list.contains(&id) {
                list.push(id);
            }
        }
        if let Intersect::Symbolic { bound, .. } = node.intersect {
            self.symbolic_uses.entry(bound).or_default().push(id);
        }
        self.ops.push(node);
        Ok(())
    }

    fn add_function_ops(&mut self, fid: FunctionId, func: &Function) -> Result<(), AnalysisError> {
        // Comparison defs, for deriving sigma restrictions from conditions.
        let mut cmp_defs: IndexMap<ValueId, (Predicate, ValueId, ValueId)> = IndexMap::new();
        for stmt in &func.stmts {
            if let Statement::Cmp {
                pred, dst, lhs, rhs, ..
            } = stmt
            {
                cmp_defs.insert(*dst, (*pred, *lhs, *rhs));
            }
        }

        for (si, stmt) in func.stmts.iter().enumerate() {
            match stmt {
                Statement::Unary { op, dst, src } => {
                    let dst_v = self.var_of(fid, *dst, func)?;
                    let src_v = self.var_of(fid, *src, func)?;
                    let (dst_bw, src_bw) = (self.bw(dst_v), self.bw(src_v));
                    let widths_ok = match op {
                        UnaryOp::Neg | UnaryOp::Not | UnaryOp::Abs => src_bw == dst_bw,
                        UnaryOp::Trunc => src_bw >= dst_bw,
                        UnaryOp::SignExtend | UnaryOp::ZeroExtend => src_bw <= dst_bw,
                    };
                    if !widths_ok {
                        return Err(AnalysisError::WidthMismatch {
                            function: func.name.clone(),
                            stmt: si,
                            expected: dst_bw,
                            found: src_bw,
                        });
                    }
                    self.add_op(
                        func,
                        OpNode {
                            sink: dst_v,
                            kind: OpKind::Unary { op: *op, src: src_v },
                            intersect: Intersect::Full,
                        },
                    )?;
                }
                Statement::Binary { op, dst, lhs, rhs } => {
                    let dst_v = self.var_of(fid, *dst, func)?;
                    let lhs_v = self.var_of(fid, *lhs, func)?;
                    let rhs_v = self.var_of(fid, *rhs, func)?;
                    let dst_bw = self.bw(dst_v);
                    self.expect_width(func, si, dst_bw, lhs_v)?;
                    let shift = matches!(op, BinaryOp::Shl | BinaryOp::Lshr | BinaryOp::Ashr);
                    if !shift {
                        self.expect_width(func, si, dst_bw, rhs_v)?;
                    }
                    self.add_op(
                        func,
                        OpNode {
                            sink: dst_v,
                            kind: OpKind::Binary {
                                op: *op,
                                lhs: lhs_v,
                                rhs: rhs_v,
                            },
                            intersect: Intersect::Full,
                        },
                    )?;
                }
                Statement::Cmp { pred, dst, lhs, rhs } => {
                    let dst_v = self.var_of(fid, *dst, func)?;
                    let lhs_v = self.var_of(fid, *lhs, func)?;
                    let rhs_v = self.var_of(fid, *rhs, func)?;
                    self.expect_width(func, si, self.bw(lhs_v), rhs_v)?;
                    self.add_op(
                        func,
                        OpNode {
                            sink: dst_v,
                            kind: OpKind::Cmp {
                                pred: *pred,
                                lhs: lhs_v,
                                rhs: rhs_v,
                            },
                            intersect: Intersect::Full,
                        },
                    )?;
                }
                Statement::Phi { dst, srcs } => {
                    let dst_v = self.var_of(fid, *dst, func)?;
                    let dst_bw = self.bw(dst_v);
                    let mut sources = SmallVec::new();
                    for s in srcs {
                        let sv = self.var_of(fid, *s, func)?;
                        self.expect_width(func, si, dst_bw, sv)?;
                        sources.push(sv);
                    }
                    self.add_op(
                        func,
                        OpNode {
                            sink: dst_v,
                            kind: OpKind::Phi { srcs: sources },
                            intersect: Intersect::Full,
                        },
                    )?;
                }
                Statement::Sigma {
                    dst,
                    src,
                    cond,
                    on_true,
                } => {
                    let dst_v = self.var_of(fid, *dst, func)?;
                    let src_v = self.var_of(fid, *src, func)?;
                    self.expect_width(func, si, self.bw(dst_v), src_v)?;
                    self.var_of(fid, *cond, func)?;
                    let intersect = self.sigma_intersect(fid, func, &cmp_defs, *src, *cond, *on_true)?;
                    self.add_op(
                        func,
                        OpNode {
                            sink: dst_v,
                            kind: OpKind::Sigma { src: src_v },
                            intersect,
                        },
                    )?;
                }
                Statement::Call { dst, callee, args } => {
                    let callee_func = self.program.function(*callee).ok_or_else(|| {
                        AnalysisError::UnknownCallee {
                            function: func.name.clone(),
                            callee: *callee,
                        }
                    })?;
                    if args.len() != callee_func.params.len() {
                        return Err(AnalysisError::CallArity {
                            function: func.name.clone(),
                            callee: callee_func.name.clone(),
                            expected: callee_func.params.len(),
                            found: args.len(),
                        });
                    }
                    for (pi, (&arg, &param)) in
                        args.iter().zip(callee_func.params.iter()).enumerate()
                    {
                        let arg_v = self.var_of(fid, arg, func)?;
                        let param_v = self.var_of(*callee, param, callee_func)?;
                        self.expect_width(func, si, self.bw(param_v), arg_v)?;
                        self.param_links
                            .entry((*callee, pi))
                            .or_default()
                            .push(arg_v);
                    }
                    if let Some(dst) = dst {
                        let dst_v = self.var_of(fid, *dst, func)?;
                        if self.defs[dst_v.0 as usize].is_some() {
                            return Err(AnalysisError::Redefinition {
                                function: func.name.clone(),
                                value: *dst,
                            });
                        }
                        self.result_links.push((dst_v, *callee));
                    }
                }
                Statement::Return { value } => {
                    if let Some(v) = value {
                        self.var_of(fid, *v, func)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Derive the restriction a sigma edge applies from the comparison that
    /// defines its condition. A condition that is not a comparison over the
    /// sigma source constrains nothing.
    fn sigma_intersect(
        &self,
        fid: FunctionId,
        func: &Function,
        cmp_defs: &IndexMap<ValueId, (Predicate, ValueId, ValueId)>,
        src: ValueId,
        cond: ValueId,
        on_true: bool,
    ) -> Result<Intersect, AnalysisError> {
        let Some(&(pred, lhs, rhs)) = cmp_defs.get(&cond) else {
            return Ok(Intersect::Full);
        };
        let pred = if on_true { pred } else { pred.invert() };
        let (pred, other) = if src == lhs {
            (pred, rhs)
        } else if src == rhs {
            (pred.swap(), lhs)
        } else {
            return Ok(Intersect::Full);
        };
        let other_v = self.var_of(fid, other, func)?;
        let other_node = &self.vars[other_v.0 as usize];
        if other_node.is_literal {
            Ok(Intersect::Fixed(Range::satisfying_cmp_region(
                pred,
                &other_node.range,
            )))
        } else {
            Ok(Intersect::Symbolic {
                bound: other_v,
                pred,
                resolved: None,
            })
        }
    }

    /// Materialize the inter-procedural edges: every parameter merges the
    /// actual arguments of its call sites, every call result merges the
    /// callee's returned values.
    fn link_calls(&mut self) -> Result<(), AnalysisError> {
        let param_links = std::mem::take(&mut self.param_links);
        for ((callee, pi), args) in param_links {
            let callee_func = match self.program.function(callee) {
                Some(f) => f,
                None => continue,
            };
            let param = callee_func.params[pi];
            let param_v = self.var_of(callee, param, callee_func)?;
            self.add_op(
                callee_func,
                OpNode {
                    sink: param_v,
                    kind: OpKind::Phi {
                        srcs: args.into_iter().collect(),
                    },
                    intersect: Intersect::Full,
                },
            )?;
        }

        let result_links = std::mem::take(&mut self.result_links);
        for (dst_v, callee) in result_links {
            let callee_func = match self.program.function(callee) {
                Some(f) => f,
                None => continue,
            };
            let mut rets: SmallVec<[VarId; 2]> = SmallVec::new();
            for rv in callee_func.returned_values() {
                let ret_v = self.var_of(callee, rv, callee_func)?;
                let dst_bw = self.bw(dst_v);
                if self.bw(ret_v) != dst_bw {
                    return Err(AnalysisError::WidthMismatch {
                        function: callee_func.name.clone(),
                        stmt: 0,
                        expected: dst_bw,
                        found: self.bw(ret_v),
                    });
                }
                rets.push(ret_v);
            }
            if rets.is_empty() {
                // A callee with no returned value leaves the result
                // unconstrained; the solver collapses it to full.
                continue;
            }
            self.add_op(
                callee_func,
                OpNode {
                    sink: dst_v,
                    kind: OpKind::Phi { srcs: rets },
                    intersect: Intersect::Full,
                },
            )?;
        }
        Ok(())
    }
}
