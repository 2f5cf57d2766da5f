//! Interference graph and move-set construction from a liveness-annotated
//! flow graph: a `def`-`live_out` edge for every instruction, suppressed
//! between a move's own src/dst pair (the "move exception" that makes
//! coalescing possible at all).

use crate::regalloc::flow::FlowGraph;
use crate::symbol::Temp;
use hashbrown::{HashMap, HashSet};
use indexmap::IndexSet;

#[derive(Default)]
pub struct InterferenceGraph {
    /// Every temp that appears in the flow graph, in first-seen order —
    /// iterating this (rather than a `HashMap`'s arbitrary bucket order)
    /// keeps coloring deterministic.
    pub nodes: IndexSet<Temp>,
    pub adj: HashMap<Temp, IndexSet<Temp>>,
    /// Move-related `(dst, src)` pairs, in the order they were seen.
    pub moves: Vec<(Temp, Temp)>,
}

impl InterferenceGraph {
    fn add_node(&mut self, t: Temp) {
        if self.nodes.insert(t) {
            self.adj.insert(t, IndexSet::new());
        }
    }

    fn add_edge(&mut self, u: Temp, v: Temp) {
        if u == v {
            return;
        }
        self.add_node(u);
        self.add_node(v);
        self.adj.get_mut(&u).unwrap().insert(v);
        self.adj.get_mut(&v).unwrap().insert(u);
    }

    #[must_use]
    pub fn degree(&self, t: Temp) -> usize {
        self.adj.get(&t).map_or(0, IndexSet::len)
    }

    #[must_use]
    pub fn interferes(&self, u: Temp, v: Temp) -> bool {
        self.adj.get(&u).is_some_and(|a| a.contains(&v))
    }
}

/// Builds the interference graph and move-set for one procedure's flow
/// graph. `computeLiveInOut` has already run as part of [`flow::build`].
#[must_use]
pub fn build(fg: &FlowGraph) -> InterferenceGraph {
    let mut g = InterferenceGraph::default();

    for instr in &fg.instrs {
        for &t in instr.uses() {
            g.add_node(t);
        }
        for &t in instr.defs() {
            g.add_node(t);
        }
    }

    for (i, instr) in fg.instrs.iter().enumerate() {
        let move_src: Option<Temp> = if instr.is_move() { instr.uses().first().copied() } else { None };

        for &def in instr.defs() {
            for &out in &fg.live_out[i] {
                if instr.is_move() && move_src == Some(out) {
                    continue;
                }
                g.add_edge(def, out);
            }
        }
    }

    let mut seen_moves: HashSet<(Temp, Temp)> = HashSet::new();
    for instr in &fg.instrs {
        if !instr.is_move() {
            continue;
        }
        let (src, dst) = (instr.uses()[0], instr.defs()[0]);
        if seen_moves.insert((src, dst)) {
            g.moves.push((dst, src));
        }
    }

    g
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regalloc::flow;
    use crate::symbol::Interner;

    fn mov(dst: Temp, src: Temp) -> crate::assem::Instr {
        crate::assem::Instr::Move { template: "move `d0, `s0\n".to_string(), src, dst }
    }
    fn oper(uses: Vec<Temp>, defs: Vec<Temp>) -> crate::assem::Instr {
        crate::assem::Instr::Oper { template: "op\n".to_string(), srcs: uses, dsts: defs, jumps: vec![], is_exit: false }
    }

    /// `a = 1; b = a; c = a + b` -- without the move exception, `b`'s def
    /// would interfere with `a` (live across the move), which would make
    /// `a`/`b` uncoalescable even though the move is their only use.
    #[test]
    fn move_src_dst_pair_does_not_interfere_with_each_other() {
        let mut interner = Interner::new();
        let a = interner.new_temp();
        let b = interner.new_temp();
        let c = interner.new_temp();
        let instrs = vec![oper(vec![], vec![a]), mov(b, a), oper(vec![a, b], vec![c])];
        let fg = flow::build(instrs);
        let ig = build(&fg);
        assert!(!ig.interferes(a, b));
        assert_eq!(ig.moves, vec![(b, a)]);
    }

    /// Two temps simultaneously live across a third's definition must
    /// interfere with it (but not necessarily with each other).
    #[test]
    fn def_interferes_with_everything_live_out() {
        let mut interner = Interner::new();
        let a = interner.new_temp();
        let b = interner.new_temp();
        let c = interner.new_temp();
        // a and b both live into the final use; c is defined while both are
        // live, so c must interfere with both.
        let instrs = vec![
            oper(vec![], vec![a]),
            oper(vec![], vec![b]),
            oper(vec![], vec![c]),
            oper(vec![a, b, c], vec![]),
        ];
        let fg = flow::build(instrs);
        let ig = build(&fg);
        assert!(ig.interferes(c, a));
        assert!(ig.interferes(c, b));
    }

    #[test]
    fn duplicate_moves_are_recorded_once() {
        let mut interner = Interner::new();
        let a = interner.new_temp();
        let b = interner.new_temp();
        let instrs = vec![oper(vec![], vec![a]), mov(b, a), mov(b, a)];
        let fg = flow::build(instrs);
        let ig = build(&fg);
        assert_eq!(ig.moves.len(), 1);
    }
}
