//! Fixed-point solver: widening and narrowing over the SCC condensation.
//!
//! Each component runs a short warm-up of plain re-evaluations, a widening
//! phase that jumps bounds to the component's interesting constants (the
//! jump-set) instead of creeping one step at a time, symbolic-intersection
//! resolution, and a capped narrowing phase that recovers the precision
//! widening gave up. Two scheduling strategies are supported: `Cousot`
//! (jump-set widening, interval narrowing) and `Crop` (growth to the width
//! bounds, then abstract-state cropping along the component's own edges).
//! Termination never depends on loop trip counts: every phase is bounded and
//! the overflow path collapses survivors to the full range.

use std::collections::{BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use rangeflow_core::range::{Bound, Range};

use crate::graph::{AbstractState, ConstraintGraph, Intersect, OpId, OpKind, VarId};
use crate::scc::SccDecomposition;

/// Plain re-evaluations per component node before widening starts.
const WARMUP_FACTOR: usize = 16;
/// Hard ceiling on widening meets per component node; reaching it collapses
/// the component to full ranges.
const WIDENING_FACTOR: usize = 64;
/// Narrowing meets per component node; narrowing is not guaranteed to
/// converge, so it is cut off rather than trusted.
const NARROWING_FACTOR: usize = 32;

/// Scheduling strategy for the widening/narrowing phases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolverStrategy {
    /// Jump-set widening and interval narrowing over the component worklist.
    #[default]
    Cousot,
    /// Growth to the width bounds, then abstract-state cropping restricted
    /// to the component's own edges.
    Crop,
}

/// Counters exposed for the termination-bound tests and the driver report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolverStats {
    pub components: usize,
    pub widening_steps: usize,
    pub narrowing_steps: usize,
    /// Components force-collapsed to full ranges by the widening cap.
    pub collapsed: usize,
}

/// Interesting constant bounds of one component, harvested from literals and
/// comparison guards. Widening lands on these instead of iterating.
#[derive(Debug, Default)]
struct JumpSet(Vec<Bound>);

impl JumpSet {
    fn build(graph: &ConstraintGraph, component: &[VarId], comp_ops: &[OpId]) -> Self {
        let mut constants = Vec::new();
        let mut push = |c: Bound| constants.push(c);

        for &v in component {
            let node = graph.var(v);
            if node.is_literal && node.range.is_constant() {
                push(node.range.signed_min());
            }
            let Some(def) = graph.def(v) else { continue };
            match &graph.op(def).kind {
                OpKind::Binary { lhs, rhs, .. } => {
                    for &s in &[*lhs, *rhs] {
                        let sn = graph.var(s);
                        if sn.is_literal && sn.range.is_constant() {
                            push(sn.range.signed_min());
                        }
                    }
                }
                OpKind::Cmp { pred, lhs, rhs } => {
                    use rangeflow_core::ir::Predicate::*;
                    for &s in &[*lhs, *rhs] {
                        let sn = graph.var(s);
                        if !(sn.is_literal && sn.range.is_constant()) {
                            continue;
                        }
                        let c = match pred {
                            Ult | Ule | Ugt | Uge => sn.range.unsigned_min(),
                            _ => sn.range.signed_min(),
                        };
                        match pred {
                            Eq | Ne => {
                                push(c - 1);
                                push(c);
                                push(c + 1);
                            }
                            Sgt | Sle | Ugt | Ule => {
                                push(c);
                                push(c + 1);
                            }
                            Sge | Slt | Uge | Ult => {
                                push(c - 1);
                                push(c);
                            }
                        }
                    }
                }
                OpKind::Phi { srcs } => {
                    for &s in srcs {
                        let sn = graph.var(s);
                        if sn.is_literal && sn.range.is_constant() {
                            push(sn.range.signed_min());
                        }
                    }
                }
                OpKind::Unary { .. } | OpKind::Sigma { .. } => {}
            }
        }

        // Bounds of the fixed sigma restrictions feeding this component.
        for &op in comp_ops {
            if let Intersect::Fixed(r) = &graph.op(op).intersect {
                if r.is_regular() {
                    push(r.signed_min() - 1);
                    push(r.signed_min());
                    push(r.signed_max());
                    push(r.signed_max() + 1);
                }
            }
        }

        constants.sort_unstable();
        constants.dedup();
        JumpSet(constants)
    }

    fn first_greater(&self, val: Bound) -> Bound {
        self.0
            .iter()
            .find(|&&c| c >= val)
            .copied()
            .unwrap_or(Range::MAX)
    }

    fn first_less(&self, val: Bound) -> Bound {
        self.0
            .iter()
            .rev()
            .find(|&&c| c <= val)
            .copied()
            .unwrap_or(Range::MIN)
    }
}

/// Runs the whole graph to a global fixed point.
#[derive(Debug)]
pub struct Solver {
    strategy: SolverStrategy,
    stats: SolverStats,
}

impl Solver {
    pub fn new(strategy: SolverStrategy) -> Self {
        Self {
            strategy,
            stats: SolverStats::default(),
        }
    }

    pub fn solve(&mut self, graph: &mut ConstraintGraph) -> SolverStats {
        let scc = SccDecomposition::compute(graph);
        self.stats.components = scc.len();
        debug!(
            components = scc.len(),
            vars = graph.var_count(),
            ops = graph.op_count(),
            strategy = ?self.strategy,
            "solving constraint graph"
        );

        for (cid, component) in scc.components().iter().enumerate() {
            if component.len() == 1 && !graph.has_self_loop(component[0]) {
                self.solve_trivial(graph, component[0]);
            } else {
                self.solve_cyclic(graph, component, &scc, cid as u32);
            }
            self.propagate_to_next(graph, component, &scc, cid as u32);
        }
        self.stats
    }

    fn solve_trivial(&mut self, graph: &mut ConstraintGraph, v: VarId) {
        if let Some(def) = graph.def(v) {
            let evaluated = graph.eval(def);
            graph.var_mut(v).range = evaluated;
        }
        if graph.var(v).range.is_empty() && !graph.var(v).is_literal {
            // Nothing constrains this node (entry parameter, unlinked call
            // result): it can be anything of its width.
            let bw = graph.var(v).bitwidth;
            graph.var_mut(v).range = Range::full(bw);
        }
        self.resolve_futures(graph, &[v]);
    }

    fn solve_cyclic(
        &mut self,
        graph: &mut ConstraintGraph,
        component: &[VarId],
        scc: &SccDecomposition,
        cid: u32,
    ) {
        let comp_ops: Vec<OpId> = component
            .iter()
            .flat_map(|&v| graph.uses(v).iter().copied())
            .filter(|&op| scc.component_of(graph.op(op).sink) == cid)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let jumps = JumpSet::build(graph, component, &comp_ops);
        trace!(size = component.len(), constants = jumps.0.len(), "component");

        // Warm-up: plain evaluation for a bounded number of steps seeds the
        // cycle with concrete values before widening kicks in.
        let mut active = self.entry_points(graph, component);
        self.bounded_fixed(graph, &comp_ops, scc, cid, active, component.len() * WARMUP_FACTOR);

        active = self.entry_points(graph, component);
        let widen_cap = component.len() * WIDENING_FACTOR.max(2 * self.jump_width(&jumps));
        let converged = match self.strategy {
            SolverStrategy::Cousot => {
                self.worklist(graph, &comp_ops, scc, cid, active, widen_cap, |g, op, j| {
                    Self::meet_widen(g, op, j)
                }, &jumps, true)
            }
            SolverStrategy::Crop => {
                self.worklist(graph, &comp_ops, scc, cid, active, widen_cap, |g, op, _| {
                    Self::meet_growth(g, op)
                }, &jumps, true)
            }
        };
        if !converged {
            // Widening failed to stabilize under the cap (degenerate
            // jump-set): collapse to the sound worst case.
            warn!(size = component.len(), "widening cap hit, collapsing component");
            for &v in component {
                let bw = graph.var(v).bitwidth;
                graph.var_mut(v).range = Range::full(bw);
            }
            self.stats.collapsed += 1;
        }

        self.resolve_futures(graph, component);

        for &v in component {
            if graph.var(v).range.is_empty() && !graph.var(v).is_literal {
                let bw = graph.var(v).bitwidth;
                graph.var_mut(v).range = Range::full(bw);
            }
        }

        let narrow_cap = component.len() * NARROWING_FACTOR;
        match self.strategy {
            SolverStrategy::Cousot => {
                let active: BTreeSet<VarId> = component.iter().copied().collect();
                self.worklist(graph, &comp_ops, scc, cid, active, narrow_cap, |g, op, _| {
                    Self::meet_narrow(g, op)
                }, &jumps, false);
            }
            SolverStrategy::Crop => {
                for &v in component {
                    let node = graph.var(v);
                    let state = Self::classify(&node.range);
                    graph.var_mut(v).abstract_state = state;
                }
                for &op in &comp_ops {
                    self.crop_from(graph, &comp_ops, op);
                }
            }
        }
    }

    fn jump_width(&self, jumps: &JumpSet) -> usize {
        jumps.0.len() + 2
    }

    /// Component members that already carry a value and can seed the
    /// worklist.
    fn entry_points(&self, graph: &ConstraintGraph, component: &[VarId]) -> BTreeSet<VarId> {
        component
            .iter()
            .copied()
            .filter(|&v| !graph.var(v).range.is_empty())
            .collect()
    }

    /// Queue-based plain evaluation with an eval budget; used to warm the
    /// component up before widening.
    fn bounded_fixed(
        &mut self,
        graph: &mut ConstraintGraph,
        comp_ops: &[OpId],
        scc: &SccDecomposition,
        cid: u32,
        active: BTreeSet<VarId>,
        mut budget: usize,
    ) {
        let mut queue: VecDeque<VarId> = active.into_iter().collect();
        while let Some(v) = queue.pop_front() {
            for i in 0..graph.uses(v).len() {
                let op = graph.uses(v)[i];
                if comp_ops.binary_search(&op).is_err() {
                    continue;
                }
                if budget == 0 {
                    return;
                }
                budget -= 1;
                if Self::meet_fixed(graph, op) {
                    let next = graph.op(op).sink;
                    if scc.component_of(next) == cid && !queue.contains(&next) {
                        queue.push_back(next);
                    }
                }
            }
        }
    }

    /// Ordered worklist iteration with one meet operator. Returns false when
    /// the step cap cut the iteration short.
    #[allow(clippy::too_many_arguments)]
    fn worklist(
        &mut self,
        graph: &mut ConstraintGraph,
        comp_ops: &[OpId],
        scc: &SccDecomposition,
        cid: u32,
        mut active: BTreeSet<VarId>,
        cap: usize,
        meet: impl Fn(&mut ConstraintGraph, OpId, &JumpSet) -> bool,
        jumps: &JumpSet,
        widening: bool,
    ) -> bool {
        let mut steps = 0usize;
        while let Some(&v) = active.iter().next() {
            active.remove(&v);
            for i in 0..graph.uses(v).len() {
                let op = graph.uses(v)[i];
                if comp_ops.binary_search(&op).is_err() {
                    continue;
                }
                if steps >= cap {
                    return false;
                }
                steps += 1;
                if meet(graph, op, jumps) {
                    let sink = graph.op(op).sink;
                    if scc.component_of(sink) == cid {
                        active.insert(sink);
                    }
                }
            }
        }
        if widening {
            self.stats.widening_steps += steps;
        } else {
            self.stats.narrowing_steps += steps;
        }
        true
    }

    // ---- meet operators -----------------------------------------------------

    /// Plain re-evaluation.
    fn meet_fixed(graph: &mut ConstraintGraph, op: OpId) -> bool {
        let new = graph.eval(op);
        let sink = graph.op(op).sink;
        let old = graph.var(sink).range;
        graph.var_mut(sink).range = new;
        old != new
    }

    /// Jump-set widening: a growing bound lands on the next interesting
    /// constant, or the width bound when none is left.
    fn meet_widen(graph: &mut ConstraintGraph, op: OpId, jumps: &JumpSet) -> bool {
        let new = graph.eval(op);
        let sink = graph.op(op).sink;
        let old = graph.var(sink).range;
        let bw = graph.var(sink).bitwidth;

        let widened = if old.is_empty() {
            new
        } else if new.is_empty() {
            old
        } else {
            let (ol, oh) = (old.signed_min(), old.signed_max());
            let (nl, nh) = (new.signed_min(), new.signed_max());
            if nl < ol || nh > oh {
                let l = if nl < ol { jumps.first_less(nl) } else { ol };
                let h = if nh > oh { jumps.first_greater(nh) } else { oh };
                Range::new(bw, l, h)
            } else {
                old
            }
        };
        graph.var_mut(sink).range = widened;
        old != widened
    }

    /// Growth analysis: a growing bound goes straight to the width bound.
    fn meet_growth(graph: &mut ConstraintGraph, op: OpId) -> bool {
        let new = graph.eval(op);
        let sink = graph.op(op).sink;
        let old = graph.var(sink).range;
        let bw = graph.var(sink).bitwidth;

        let grown = if old.is_empty() {
            new
        } else if new.is_empty() {
            old
        } else {
            let (ol, oh) = (old.signed_min(), old.signed_max());
            let (nl, nh) = (new.signed_min(), new.signed_max());
            if nl < ol || nh > oh {
                let l = if nl < ol { Range::MIN } else { ol };
                let h = if nh > oh { Range::MAX } else { oh };
                Range::new(bw, l, h)
            } else {
                old
            }
        };
        graph.var_mut(sink).range = grown;
        old != grown
    }

    /// Narrowing: a bound widened to the width limit may come back in;
    /// anything else only moves outward (soundness).
    fn meet_narrow(graph: &mut ConstraintGraph, op: OpId) -> bool {
        let new = graph.eval(op);
        let sink = graph.op(op).sink;
        let old = graph.var(sink).range;
        let bw = graph.var(sink).bitwidth;
        let min_s = Range::full(bw).signed_min();
        let max_s = Range::full(bw).signed_max();

        let narrowed = if new.is_constant() {
            new
        } else if old.is_empty() || new.is_empty() {
            if !new.is_full_set() {
                new
            } else {
                old
            }
        } else {
            let (ol, oh) = (old.signed_min(), old.signed_max());
            let (nl, nh) = (new.signed_min(), new.signed_max());
            let mut l = ol;
            let mut h = oh;
            if ol == min_s && nl != min_s {
                l = nl;
            } else if nl < ol {
                l = nl;
            }
            if oh == max_s && nh != max_s {
                h = nh;
            } else if nh > oh {
                h = nh;
            }
            if l <= h {
                Range::new(bw, l, h)
            } else {
                old
            }
        };
        graph.var_mut(sink).range = narrowed;
        old != narrowed
    }

    /// Cropping: shrink one widened side back to the evaluated bound, guided
    /// by the abstract state recorded after growth.
    fn meet_crop(graph: &mut ConstraintGraph, op: OpId) -> bool {
        let new = graph.eval(op);
        let sink = graph.op(op).sink;
        let old = graph.var(sink).range;
        let state = graph.var(sink).abstract_state;
        let bw = graph.var(sink).bitwidth;

        let cropped = if old.is_empty() || new.is_empty() {
            new
        } else {
            let low_open = matches!(state, AbstractState::LowUnbounded | AbstractState::Unbounded);
            let high_open =
                matches!(state, AbstractState::HighUnbounded | AbstractState::Unbounded);
            if low_open && new.signed_min() > old.signed_min() {
                Range::new(bw, new.signed_min(), old.signed_max())
            } else if high_open && new.signed_max() < old.signed_max() {
                Range::new(bw, old.signed_min(), new.signed_max())
            } else {
                old
            }
        };
        graph.var_mut(sink).range = cropped;
        old != cropped
    }

    fn classify(range: &Range) -> AbstractState {
        if range.is_empty() {
            return AbstractState::Bounded;
        }
        let bw = range.bitwidth();
        let at_min = range.signed_min() == Range::full(bw).signed_min();
        let at_max = range.signed_max() == Range::full(bw).signed_max();
        match (at_min, at_max) {
            (true, true) => AbstractState::Unbounded,
            (true, false) => AbstractState::LowUnbounded,
            (false, true) => AbstractState::HighUnbounded,
            (false, false) => AbstractState::Bounded,
        }
    }

    /// Depth-first cropping from one op across the component, each sink
    /// visited once.
    fn crop_from(&mut self, graph: &mut ConstraintGraph, comp_ops: &[OpId], start: OpId) {
        let mut pending: BTreeSet<OpId> = BTreeSet::new();
        let mut visited: BTreeSet<VarId> = BTreeSet::new();
        pending.insert(start);
        while let Some(&op) = pending.iter().next() {
            pending.remove(&op);
            let sink = graph.op(op).sink;
            if !visited.insert(sink) {
                continue;
            }
            Self::meet_crop(graph, op);
            self.stats.narrowing_steps += 1;
            for &next in graph.uses(sink) {
                if comp_ops.binary_search(&next).is_ok() {
                    pending.insert(next);
                }
            }
        }
    }

    /// Resolve symbolic sigma restrictions whose bound lives in `vars`; from
    /// here on those sigmas intersect with a concrete region.
    fn resolve_futures(&mut self, graph: &mut ConstraintGraph, vars: &[VarId]) {
        for &v in vars {
            for i in 0..graph.symbolic_uses(v).len() {
                let op = graph.symbolic_uses(v)[i];
                let bound_range = graph.var(v).range;
                let bw = graph.var(graph.op(op).sink).bitwidth;
                if let Intersect::Symbolic { pred, resolved, .. } =
                    &mut graph.op_mut(op).intersect
                {
                    *resolved = Some(Self::symbolic_region(*pred, &bound_range, bw));
                }
            }
        }
    }

    /// Region a sigma sink is confined to once its variable bound has
    /// stabilized. Unlike the constant case, only the sound side of the
    /// bound's interval may be used: `x < y` caps `x` at `y`'s *upper*
    /// bound. An upper bound sitting at the width limit stands for the
    /// widened infinity and is not tightened further.
    fn symbolic_region(pred: rangeflow_core::ir::Predicate, bound: &Range, bw: u8) -> Range {
        use rangeflow_core::ir::Predicate::*;
        if bound.is_empty() {
            return Range::empty(bw);
        }
        let min_s = Range::full(bw).signed_min();
        let max_s = Range::full(bw).signed_max();
        let max_u = Range::full(bw).unsigned_max();
        match pred {
            Eq => *bound,
            Sle => Range::new(bw, Range::MIN, bound.signed_max()),
            Slt => {
                let u = bound.signed_max();
                Range::new(bw, Range::MIN, if u == max_s { u } else { u - 1 })
            }
            Sge => Range::new(bw, bound.signed_min(), Range::MAX),
            Sgt => {
                let l = bound.signed_min();
                Range::new(bw, if l == min_s { l } else { l + 1 }, Range::MAX)
            }
            Ule => Range::new(bw, 0, bound.unsigned_max()),
            Ult => {
                let u = bound.unsigned_max();
                Range::new(bw, 0, if u == max_u { u } else { u - 1 })
            }
            Uge => Range::new(bw, bound.unsigned_min(), max_u),
            Ugt => {
                let l = bound.unsigned_min();
                Range::new(bw, if l == max_u { l } else { l + 1 }, max_u)
            }
            Ne => Range::full(bw),
        }
    }

    /// Evaluate the uses that leave the component once, seeding entry points
    /// for the components downstream.
    fn propagate_to_next(
        &mut self,
        graph: &mut ConstraintGraph,
        component: &[VarId],
        scc: &SccDecomposition,
        cid: u32,
    ) {
        for &v in component {
            for i in 0..graph.uses(v).len() {
                let op = graph.uses(v)[i];
                let sink = graph.op(op).sink;
                if scc.component_of(sink) != cid {
                    let evaluated = graph.eval(op);
                    graph.var_mut(sink).range = evaluated;
                }
            }
        }
    }
}
