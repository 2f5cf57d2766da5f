//! Iterated-coalescing graph coloring with spill-and-rerun, driven by a
//! worklist discipline with Briggs/George coalescing tests: simplify and
//! coalesce nodes of low enough degree, freeze remaining move-related nodes
//! when stuck, and potentially-spill the rest, until every node is
//! assigned, combined, or marked for spill.

use crate::regalloc::interference::InterferenceGraph;
use crate::symbol::Temp;
use hashbrown::{HashMap, HashSet};
use indexmap::IndexSet;

pub enum Coloring {
    /// Every non-precolored temp maps to one of the precolored registers.
    Ok(HashMap<Temp, Temp>),
    /// Coloring failed; these temps must be spilled and the instruction
    /// stream rewritten before trying again.
    Spill(Vec<Temp>),
}

struct Coalescer<'a> {
    g: &'a InterferenceGraph,
    k: usize,
    precolored: HashSet<Temp>,
    /// Working copy of adjacency; coalescing redirects edges here, leaving
    /// `g.adj` untouched for cost/degree bookkeeping that predates a merge.
    adj: HashMap<Temp, IndexSet<Temp>>,
    degree: HashMap<Temp, usize>,

    simplify_worklist: IndexSet<Temp>,
    freeze_worklist: IndexSet<Temp>,
    spill_worklist: IndexSet<Temp>,
    worklist_moves: Vec<(Temp, Temp)>,
    active_moves: HashSet<(Temp, Temp)>,
    frozen_moves: HashSet<(Temp, Temp)>,
    move_list: HashMap<Temp, Vec<(Temp, Temp)>>,

    select_stack: Vec<Temp>,
    alias: HashMap<Temp, Temp>,
    coalesced: HashSet<Temp>,
    spilled: IndexSet<Temp>,
    colored: HashMap<Temp, Temp>,

    /// Chaitin spill-cost numerator: uses-and-defs count per temp, supplied
    /// by the caller from the original instruction stream.
    spill_cost: HashMap<Temp, usize>,
}

impl<'a> Coalescer<'a> {
    fn new(g: &'a InterferenceGraph, precolored: &[Temp], spill_cost: HashMap<Temp, usize>) -> Self {
        let k = precolored.len();
        let precolored_set: HashSet<Temp> = precolored.iter().copied().collect();

        let mut adj: HashMap<Temp, IndexSet<Temp>> = HashMap::new();
        for &n in &g.nodes {
            adj.insert(n, g.adj.get(&n).cloned().unwrap_or_default());
        }
        let mut degree: HashMap<Temp, usize> = HashMap::new();
        for &n in &g.nodes {
            let d = if precolored_set.contains(&n) { usize::MAX / 2 } else { adj[&n].len() };
            degree.insert(n, d);
        }

        let mut move_list: HashMap<Temp, Vec<(Temp, Temp)>> = HashMap::new();
        for &(d, s) in &g.moves {
            move_list.entry(d).or_default().push((d, s));
            move_list.entry(s).or_default().push((d, s));
        }

        let mut colored = HashMap::new();
        for &p in precolored {
            colored.insert(p, p);
        }

        Coalescer {
            g,
            k,
            precolored: precolored_set,
            adj,
            degree,
            simplify_worklist: IndexSet::new(),
            freeze_worklist: IndexSet::new(),
            spill_worklist: IndexSet::new(),
            worklist_moves: g.moves.clone(),
            active_moves: HashSet::new(),
            frozen_moves: HashSet::new(),
            move_list,
            select_stack: Vec::new(),
            alias: HashMap::new(),
            coalesced: HashSet::new(),
            spilled: IndexSet::new(),
            colored,
            spill_cost,
        }
    }

    fn is_move_related(&self, t: Temp) -> bool {
        self.move_list.get(&t).is_some_and(|ms| {
            ms.iter().any(|m| !self.frozen_moves.contains(m) && self.worklist_moves.contains(m) || self.active_moves.contains(m))
        })
    }

    fn build_initial_worklists(&mut self) {
        for &n in &self.g.nodes {
            if self.precolored.contains(&n) {
                continue;
            }
            if self.degree[&n] >= self.k {
                self.spill_worklist.insert(n);
            } else if self.is_move_related(n) {
                self.freeze_worklist.insert(n);
            } else {
                self.simplify_worklist.insert(n);
            }
        }
    }

    fn adjacent(&self, t: Temp) -> Vec<Temp> {
        self.adj.get(&t).into_iter().flatten().copied()
            .filter(|n| !self.select_stack.contains(n) && !self.coalesced.contains(n))
            .collect()
    }

    fn decrement_degree(&mut self, t: Temp) {
        if self.precolored.contains(&t) {
            return;
        }
        let d = self.degree[&t];
        self.degree.insert(t, d - 1);
        if d == self.k {
            let mut to_enable = self.adjacent(t);
            to_enable.push(t);
            for m in to_enable {
                self.enable_moves(m);
            }
            self.spill_worklist.shift_remove(&t);
            if self.is_move_related(t) {
                self.freeze_worklist.insert(t);
            } else {
                self.simplify_worklist.insert(t);
            }
        }
    }

    fn enable_moves(&mut self, t: Temp) {
        let Some(ms) = self.move_list.get(&t).cloned() else { return };
        for m in ms {
            if self.active_moves.remove(&m) {
                self.worklist_moves.retain(|x| *x != m);
                // re-add to the front of worklist_moves conceptually; keep
                // it in worklist_moves as "not active" by leaving it out of
                // active_moves, letting the main loop pick it up again.
                if !self.worklist_moves.contains(&m) {
                    self.worklist_moves.push(m);
                }
            }
        }
    }

    fn simplify(&mut self) {
        let n = *self.simplify_worklist.iter().next().expect("non-empty");
        self.simplify_worklist.shift_remove(&n);
        self.select_stack.push(n);
        for m in self.adjacent(n) {
            self.decrement_degree(m);
        }
    }

    fn get_alias(&self, t: Temp) -> Temp {
        let mut cur = t;
        while self.coalesced.contains(&cur) {
            cur = self.alias[&cur];
        }
        cur
    }

    fn add_worklist(&mut self, t: Temp) {
        if !self.precolored.contains(&t) && !self.is_move_related(t) && self.degree[&t] < self.k {
            self.freeze_worklist.shift_remove(&t);
            self.simplify_worklist.insert(t);
        }
    }

    fn ok(&self, t: Temp, r: Temp) -> bool {
        self.degree[&t] < self.k || self.precolored.contains(&t) || self.adj.get(&r).is_some_and(|a| a.contains(&t))
    }

    fn conservative(&self, nodes: &HashSet<Temp>) -> bool {
        let k_count = nodes.iter().filter(|&&n| self.degree[&n] >= self.k).count();
        k_count < self.k
    }

    fn combine(&mut self, u: Temp, v: Temp) {
        self.freeze_worklist.shift_remove(&v);
        self.spill_worklist.shift_remove(&v);
        self.coalesced.insert(v);
        self.alias.insert(v, u);

        let v_moves = self.move_list.get(&v).cloned().unwrap_or_default();
        self.move_list.entry(u).or_default().extend(v_moves);

        let v_adj: Vec<Temp> = self.adj.get(&v).into_iter().flatten().copied().collect();
        for t in v_adj {
            self.add_edge(t, u);
            self.decrement_degree(t);
        }
        if self.degree[&u] >= self.k {
            self.freeze_worklist.shift_remove(&u);
            self.spill_worklist.insert(u);
        }
    }

    fn add_edge(&mut self, u: Temp, v: Temp) {
        if u == v {
            return;
        }
        let inserted_u = self.adj.entry(u).or_default().insert(v);
        if inserted_u && !self.precolored.contains(&u) {
            *self.degree.entry(u).or_insert(0) += 1;
        }
        let inserted_v = self.adj.entry(v).or_default().insert(u);
        if inserted_v && !self.precolored.contains(&v) {
            *self.degree.entry(v).or_insert(0) += 1;
        }
    }

    fn coalesce(&mut self) {
        let Some(m) = self.worklist_moves.pop() else { return };
        let (d, s) = m;
        let x = self.get_alias(d);
        let y = self.get_alias(s);
        let (u, v) = if self.precolored.contains(&y) { (y, x) } else { (x, y) };
        self.active_moves.remove(&m);

        if u == v {
            self.add_worklist(u);
        } else if self.precolored.contains(&v) || self.adj.get(&u).is_some_and(|a| a.contains(&v)) {
            self.add_worklist(u);
            self.add_worklist(v);
        } else {
            let briggs_ok = if self.precolored.contains(&u) {
                self.adjacent(v).into_iter().all(|t| self.ok(t, u))
            } else {
                let mut combined: HashSet<Temp> = self.adjacent(u).into_iter().collect();
                combined.extend(self.adjacent(v));
                self.conservative(&combined)
            };
            if briggs_ok {
                self.combine(u, v);
                self.add_worklist(u);
            } else {
                self.active_moves.insert(m);
            }
        }
    }

    fn freeze_moves(&mut self, u: Temp) {
        let ms = self.move_list.get(&u).cloned().unwrap_or_default();
        for m in ms {
            if !self.active_moves.remove(&m) {
                continue;
            }
            self.frozen_moves.insert(m);
            let (d, s) = m;
            let v = if self.get_alias(d) == self.get_alias(u) { self.get_alias(s) } else { self.get_alias(d) };
            if !self.is_move_related(v) && self.degree[&v] < self.k {
                self.freeze_worklist.shift_remove(&v);
                self.simplify_worklist.insert(v);
            }
        }
    }

    fn freeze(&mut self) {
        let n = *self.freeze_worklist.iter().next().expect("non-empty");
        self.freeze_worklist.shift_remove(&n);
        self.simplify_worklist.insert(n);
        self.freeze_moves(n);
    }

    /// Lowest `uses_and_defs / degree` ratio, lowest temp id to break ties
    /// so the choice stays deterministic.
    fn select_spill(&mut self) -> Temp {
        let mut best: Option<(Temp, f64)> = None;
        for &n in &self.spill_worklist {
            let cost = *self.spill_cost.get(&n).unwrap_or(&1) as f64;
            let ratio = cost / self.degree[&n].max(1) as f64;
            let better = match best {
                None => true,
                Some((bn, br)) => ratio < br || (ratio == br && n.raw() < bn.raw()),
            };
            if better {
                best = Some((n, ratio));
            }
        }
        let n = best.expect("non-empty spill worklist").0;
        self.spill_worklist.shift_remove(&n);
        self.simplify_worklist.insert(n);
        self.freeze_moves(n);
        n
    }

    fn assign_colors(&mut self, reg_colors: &[Temp]) -> Vec<Temp> {
        let mut order = std::mem::take(&mut self.select_stack);
        order.reverse();
        let mut actually_spilled = Vec::new();

        for n in order.drain(..) {
            let mut ok_colors: IndexSet<Temp> = reg_colors.iter().copied().collect();
            for w in self.adj.get(&n).into_iter().flatten().copied() {
                let w = self.get_alias(w);
                if let Some(&c) = self.colored.get(&w) {
                    ok_colors.shift_remove(&c);
                }
            }
            match ok_colors.into_iter().next() {
                Some(c) => {
                    self.colored.insert(n, c);
                }
                None => {
                    self.spilled.insert(n);
                    actually_spilled.push(n);
                }
            }
        }
        for &v in &self.coalesced.iter().copied().collect::<Vec<_>>() {
            let a = self.get_alias(v);
            if let Some(&c) = self.colored.get(&a) {
                self.colored.insert(v, c);
            }
        }
        actually_spilled
    }
}

/// Colors `g` against the `reg_colors` palette (one precolored [`Temp`] per
/// physical register). Returns a spill set when no valid coloring exists;
/// the caller rewrites the instruction stream and tries again.
#[must_use]
pub fn color(g: &InterferenceGraph, reg_colors: &[Temp], spill_cost: HashMap<Temp, usize>) -> Coloring {
    let mut c = Coalescer::new(g, reg_colors, spill_cost);
    c.build_initial_worklists();

    loop {
        if !c.simplify_worklist.is_empty() {
            c.simplify();
        } else if !c.worklist_moves.is_empty() {
            c.coalesce();
        } else if !c.freeze_worklist.is_empty() {
            c.freeze();
        } else if !c.spill_worklist.is_empty() {
            c.select_spill();
        } else {
            break;
        }
    }

    let spilled = c.assign_colors(reg_colors);
    if !spilled.is_empty() {
        return Coloring::Spill(spilled);
    }

    let mut result = HashMap::new();
    for &n in &g.nodes {
        if c.precolored.contains(&n) {
            continue;
        }
        let a = c.get_alias(n);
        if let Some(&col) = c.colored.get(&a) {
            result.insert(n, col);
        }
    }
    Coloring::Ok(result)
}

/// Counts per-temp occurrences across an instruction stream's uses/defs,
/// the numerator of Chaitin's spill-cost ratio.
#[must_use]
pub fn spill_costs(instrs: &[crate::assem::Instr]) -> HashMap<Temp, usize> {
    let mut counts = HashMap::new();
    for instr in instrs {
        for &t in instr.uses().iter().chain(instr.defs()) {
            *counts.entry(t).or_insert(0usize) += 1;
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::Interner;

    fn edge(g: &mut InterferenceGraph, u: Temp, v: Temp) {
        g.nodes.insert(u);
        g.nodes.insert(v);
        g.adj.entry(u).or_default().insert(v);
        g.adj.entry(v).or_default().insert(u);
    }

    #[test]
    fn two_interfering_temps_get_distinct_colors_when_k_allows_it() {
        let mut interner = Interner::new();
        let r0 = interner.new_temp();
        let r1 = interner.new_temp();
        let a = interner.new_temp();
        let b = interner.new_temp();
        let mut g = InterferenceGraph::default();
        edge(&mut g, a, b);
        let palette = [r0, r1];
        match color(&g, &palette, HashMap::new()) {
            Coloring::Ok(colors) => assert_ne!(colors[&a], colors[&b]),
            Coloring::Spill(_) => panic!("two interfering temps must fit in two colors"),
        }
    }

    #[test]
    fn two_interfering_temps_must_spill_with_only_one_color() {
        let mut interner = Interner::new();
        let r0 = interner.new_temp();
        let a = interner.new_temp();
        let b = interner.new_temp();
        let mut g = InterferenceGraph::default();
        edge(&mut g, a, b);
        let palette = [r0];
        match color(&g, &palette, HashMap::new()) {
            Coloring::Spill(spills) => assert!(!spills.is_empty()),
            Coloring::Ok(_) => panic!("two mutually interfering temps cannot share one color"),
        }
    }

    #[test]
    fn non_interfering_temps_connected_only_by_a_move_coalesce_to_one_color() {
        let mut interner = Interner::new();
        let r0 = interner.new_temp();
        let r1 = interner.new_temp();
        let a = interner.new_temp();
        let b = interner.new_temp();
        let mut g = InterferenceGraph::default();
        g.nodes.insert(a);
        g.nodes.insert(b);
        g.adj.entry(a).or_default();
        g.adj.entry(b).or_default();
        g.moves.push((b, a));
        let palette = [r0, r1];
        match color(&g, &palette, HashMap::new()) {
            Coloring::Ok(colors) => assert_eq!(colors[&a], colors[&b]),
            Coloring::Spill(_) => panic!("a move with no interference must always coalesce"),
        }
    }

    #[test]
    fn precolored_temps_keep_their_own_color() {
        let mut interner = Interner::new();
        let r0 = interner.new_temp();
        let r1 = interner.new_temp();
        let a = interner.new_temp();
        let mut g = InterferenceGraph::default();
        edge(&mut g, a, r0);
        let palette = [r0, r1];
        match color(&g, &palette, HashMap::new()) {
            Coloring::Ok(colors) => {
                assert!(!colors.contains_key(&r0));
                assert_eq!(colors[&a], r1);
            }
            Coloring::Spill(_) => panic!("one interference with one precolored neighbor must color"),
        }
    }
}
