//! Control-flow graph over selected instructions, plus the liveness
//! fixed-point that feeds interference-graph construction. Nodes are
//! indices into a `Vec<Instr>` rather than a pointer graph, so node
//! identity and iteration order are both determined solely by instruction
//! position, keeping the whole pass deterministic.

use crate::assem::Instr;
use crate::symbol::{Label, Temp};
use hashbrown::HashMap;
use indexmap::IndexSet;

pub struct FlowGraph {
    pub instrs: Vec<Instr>,
    pub succ: Vec<Vec<usize>>,
    pub pred: Vec<Vec<usize>>,
    pub is_move: Vec<bool>,
    pub live_in: Vec<IndexSet<Temp>>,
    pub live_out: Vec<IndexSet<Temp>>,
}

/// Builds the successor/predecessor graph over `instrs`, treating a
/// fallthrough (the next instruction in program order) as an implicit edge
/// and every `jumps()` target as an explicit one.
#[must_use]
pub fn build(instrs: Vec<Instr>) -> FlowGraph {
    let n = instrs.len();
    let mut by_label: HashMap<Label, usize> = HashMap::new();
    for (i, instr) in instrs.iter().enumerate() {
        if let Instr::Label { label, .. } = instr {
            by_label.insert(*label, i);
        }
    }

    let mut succ = vec![Vec::new(); n];
    let mut pred = vec![Vec::new(); n];
    let is_move: Vec<bool> = instrs.iter().map(Instr::is_move).collect();

    for (i, instr) in instrs.iter().enumerate() {
        let mut targets = Vec::new();

        if let Some(jumps) = instr.jumps() {
            for l in jumps {
                if let Some(&t) = by_label.get(l) {
                    targets.push(t);
                }
            }
        }
        if !instr.is_exit() && i + 1 < n {
            targets.push(i + 1);
        }
        targets.sort_unstable();
        targets.dedup();

        for &t in &targets {
            succ[i].push(t);
            pred[t].push(i);
        }
    }

    let live_in = vec![IndexSet::new(); n];
    let live_out = vec![IndexSet::new(); n];
    let mut fg = FlowGraph { instrs, succ, pred, is_move, live_in, live_out };
    compute_liveness(&mut fg);
    fg
}

/// Iterates `in[n] = use[n] ∪ (out[n] − def[n])`, `out[n] = ⋃ in[s]` to a
/// fixed point. Visits instructions in reverse program order, which
/// converges in far fewer passes than an unordered visit order would.
fn compute_liveness(fg: &mut FlowGraph) {
    let n = fg.instrs.len();
    loop {
        let mut changed = false;
        for i in (0..n).rev() {
            let uses = fg.instrs[i].uses();
            let defs = fg.instrs[i].defs();

            let mut new_out = IndexSet::new();
            for &s in &fg.succ[i] {
                for t in &fg.live_in[s] {
                    new_out.insert(*t);
                }
            }

            let mut new_in = IndexSet::new();
            for &u in uses {
                new_in.insert(u);
            }
            for t in &new_out {
                if !defs.contains(t) {
                    new_in.insert(*t);
                }
            }

            if new_in != fg.live_in[i] || new_out != fg.live_out[i] {
                changed = true;
            }
            fg.live_in[i] = new_in;
            fg.live_out[i] = new_out;
        }
        if !changed {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::Interner;

    fn mov(dst: Temp, src: Temp) -> Instr {
        Instr::Move { template: "move `d0, `s0\n".to_string(), src, dst }
    }
    fn oper(uses: Vec<Temp>, defs: Vec<Temp>) -> Instr {
        Instr::Oper { template: "op\n".to_string(), srcs: uses, dsts: defs, jumps: vec![], is_exit: false }
    }

    /// `a = 1; b = a; c = b + b` -- every def is live until its last use.
    #[test]
    fn liveness_propagates_backward_through_a_straight_line() {
        let mut interner = Interner::new();
        let a = interner.new_temp();
        let b = interner.new_temp();
        let c = interner.new_temp();

        let instrs = vec![oper(vec![], vec![a]), mov(b, a), oper(vec![b, b], vec![c])];
        let fg = build(instrs);

        assert!(fg.live_out[0].contains(&a));
        assert!(fg.live_in[1].contains(&a));
        assert!(fg.live_out[1].contains(&b));
        assert!(fg.live_in[2].contains(&b));
        assert!(fg.live_out[2].is_empty());
    }

    #[test]
    fn liveness_is_a_fixed_point() {
        let mut interner = Interner::new();
        let a = interner.new_temp();
        let b = interner.new_temp();
        let instrs = vec![oper(vec![], vec![a]), oper(vec![a], vec![b]), oper(vec![b], vec![])];
        let fg = build(instrs);
        let before_in = fg.live_in.clone();
        let before_out = fg.live_out.clone();

        let mut fg2 = FlowGraph { instrs: fg.instrs, succ: fg.succ, pred: fg.pred, is_move: fg.is_move, live_in: fg.live_in, live_out: fg.live_out };
        compute_liveness(&mut fg2);

        assert_eq!(fg2.live_in, before_in);
        assert_eq!(fg2.live_out, before_out);
    }

    #[test]
    fn conditional_branch_has_both_a_jump_and_a_fallthrough_successor() {
        let mut interner = Interner::new();
        let taken = interner.new_label();
        let after = interner.new_label();
        let instrs = vec![
            Instr::Oper { template: "beqz `s0, `j0\n".to_string(), srcs: vec![interner.new_temp()], dsts: vec![], jumps: vec![taken], is_exit: false },
            oper(vec![], vec![]),
            Instr::Label { template: String::new(), label: taken },
            oper(vec![], vec![]),
            Instr::Label { template: String::new(), label: after },
        ];
        let fg = build(instrs);
        assert_eq!(fg.succ[0].len(), 2);
        assert!(fg.succ[0].contains(&1));
        assert!(fg.succ[0].contains(&2));
    }

    #[test]
    fn unconditional_jump_has_only_its_jump_target_as_successor() {
        let mut interner = Interner::new();
        let target = interner.new_label();
        let instrs = vec![
            Instr::Oper { template: "b `j0\n".to_string(), srcs: vec![], dsts: vec![], jumps: vec![target], is_exit: true },
            oper(vec![], vec![]),
            Instr::Label { template: String::new(), label: target },
        ];
        let fg = build(instrs);
        assert_eq!(fg.succ[0], vec![2]);
    }
}
