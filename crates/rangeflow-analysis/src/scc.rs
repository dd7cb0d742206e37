//! Strongly-connected components of the constraint graph (Nuutila).
//!
//! Edges follow the def → use direction: `v → sink(op)` for every op that
//! reads `v`. Symbolic sigma intersections add pseudo-edges from the bound
//! variable to the restricted sink, so a bound's component always precedes
//! the components that consume it; the pseudo-edges exist only here and
//! never carry ranges. The DFS is iterative so that deep def-use chains
//! cannot overflow the stack.

use crate::graph::{ConstraintGraph, VarId};

/// Components of the condensation, in topological order.
#[derive(Debug)]
pub struct SccDecomposition {
    components: Vec<Vec<VarId>>,
    component_of: Vec<u32>,
}

impl SccDecomposition {
    pub fn compute(graph: &ConstraintGraph) -> Self {
        Nuutila::new(graph).run()
    }

    /// Components in processing order: every component comes after all
    /// components it depends on.
    pub fn components(&self) -> &[Vec<VarId>] {
        &self.components
    }

    pub fn component_of(&self, var: VarId) -> u32 {
        self.component_of[var.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

struct Nuutila<'g> {
    graph: &'g ConstraintGraph,
    /// Adjacency including the control-dependence pseudo-edges.
    adj: Vec<Vec<VarId>>,
    dfs: Vec<i64>,
    root: Vec<VarId>,
    in_component: Vec<bool>,
    stack: Vec<VarId>,
    /// Component roots in completion order (reverse topological).
    roots: Vec<VarId>,
    members: Vec<Vec<VarId>>,
    index: i64,
}

impl<'g> Nuutila<'g> {
    fn new(graph: &'g ConstraintGraph) -> Self {
        let n = graph.var_count();
        let mut adj = vec![Vec::new(); n];
        for v in graph.var_ids() {
            for &op in graph.uses(v) {
                adj[v.0 as usize].push(graph.op(op).sink);
            }
            for &op in graph.symbolic_uses(v) {
                adj[v.0 as usize].push(graph.op(op).sink);
            }
        }
        Self {
            graph,
            adj,
            dfs: vec![-1; n],
            root: (0..n as u32).map(VarId).collect(),
            in_component: vec![false; n],
            stack: Vec::new(),
            roots: Vec::new(),
            members: Vec::new(),
            index: 0,
        }
    }

    fn run(mut self) -> SccDecomposition {
        for v in self.graph.var_ids() {
            if self.dfs[v.0 as usize] < 0 {
                self.visit(v);
            }
        }

        let mut components = Vec::with_capacity(self.roots.len());
        let mut component_of = vec![0u32; self.graph.var_count()];
        // Roots complete in reverse topological order; reverse for the
        // solver's processing order.
        for (cid, comp) in self.members.into_iter().rev().enumerate() {
            for &v in &comp {
                component_of[v.0 as usize] = cid as u32;
            }
            components.push(comp);
        }
        SccDecomposition {
            components,
            component_of,
        }
    }

    /// Iterative rendition of Nuutila's recursive visit.
    fn visit(&mut self, start: VarId) {
        let mut frames: Vec<(VarId, usize)> = vec![(start, 0)];
        self.dfs[start.0 as usize] = self.index;
        self.index += 1;

        while let Some(&mut (v, ref mut child)) = frames.last_mut() {
            let vi = v.0 as usize;
            if *child < self.adj[vi].len() {
                let w = self.adj[vi][*child];
                *child += 1;
                if self.dfs[w.0 as usize] < 0 {
                    self.dfs[w.0 as usize] = self.index;
                    self.index += 1;
                    frames.push((w, 0));
                } else {
                    self.absorb_root(v, w);
                }
            } else {
                frames.pop();
                self.finish(v);
                if let Some(&(parent, _)) = frames.last() {
                    self.absorb_root(parent, v);
                }
            }
        }
    }

    fn absorb_root(&mut self, v: VarId, w: VarId) {
        let (vi, wi) = (v.0 as usize, w.0 as usize);
        if !self.in_component[wi]
            && self.dfs[self.root[vi].0 as usize] >= self.dfs[self.root[wi].0 as usize]
        {
            self.root[vi] = self.root[wi];
        }
    }

    fn finish(&mut self, v: VarId) {
        let vi = v.0 as usize;
        if self.root[vi] == v {
            let mut comp = vec![v];
            self.in_component[vi] = true;
            while let Some(&top) = self.stack.last() {
                if self.dfs[top.0 as usize] > self.dfs[vi] {
                    self.stack.pop();
                    self.in_component[top.0 as usize] = true;
                    comp.push(top);
                } else {
                    break;
                }
            }
            comp.sort_unstable();
            self.roots.push(v);
            self.members.push(comp);
        } else {
            self.stack.push(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ExecutionMode;
    use crate::graph::ConstraintGraph;
    use rangeflow_core::ir::{BinaryOp, FunctionBuilder, Program};

    #[test]
    fn straight_line_code_gives_singleton_components_in_order() {
        let mut b = FunctionBuilder::new("f");
        let a = b.param(8, true);
        let one = b.literal(8, true, 1);
        let x = b.value(8, true);
        let y = b.value(8, true);
        b.binary(BinaryOp::Add, x, a, one);
        b.binary(BinaryOp::Add, y, x, one);

        let mut program = Program::new();
        let fid = program.add_function(b.finish());
        let g = ConstraintGraph::build(&program, ExecutionMode::Interprocedural).unwrap();
        let scc = SccDecomposition::compute(&g);

        assert_eq!(scc.len(), g.var_count());
        let x_v = g.lookup(fid, x).unwrap();
        let y_v = g.lookup(fid, y).unwrap();
        let a_v = g.lookup(fid, a).unwrap();
        assert!(scc.component_of(a_v) < scc.component_of(x_v));
        assert!(scc.component_of(x_v) < scc.component_of(y_v));
    }

    #[test]
    fn loop_carried_phi_forms_one_component() {
        // i = phi(zero, inc); inc = i + one
        let mut b = FunctionBuilder::new("loop");
        let zero = b.literal(8, true, 0);
        let one = b.literal(8, true, 1);
        let i = b.value(8, true);
        let inc = b.value(8, true);
        b.phi(i, [zero, inc]);
        b.binary(BinaryOp::Add, inc, i, one);

        let mut program = Program::new();
        let fid = program.add_function(b.finish());
        let g = ConstraintGraph::build(&program, ExecutionMode::Interprocedural).unwrap();
        let scc = SccDecomposition::compute(&g);

        let i_v = g.lookup(fid, i).unwrap();
        let inc_v = g.lookup(fid, inc).unwrap();
        let zero_v = g.lookup(fid, zero).unwrap();
        assert_eq!(scc.component_of(i_v), scc.component_of(inc_v));
        assert_ne!(scc.component_of(i_v), scc.component_of(zero_v));
        assert!(scc.component_of(zero_v) < scc.component_of(i_v));

        let cyclic = scc
            .components()
            .iter()
            .filter(|c| c.len() > 1)
            .collect::<Vec<_>>();
        assert_eq!(cyclic.len(), 1);
        assert_eq!(cyclic[0].len(), 2);
    }
}
