//! Canonicalizes a procedure's tree-IR body into a flat, trace-scheduled
//! statement list free of `Seq` and `EsEq`, in three stages: linearize
//! (`reorder`/`do_stm`/`do_exp`), split into basic blocks, then schedule
//! into a trace that makes every conditional's false branch fall through.

use crate::symbol::{Interner, Label};
use crate::tree::{Expr, Stmt};
use hashbrown::HashMap;

fn nop() -> Stmt { Stmt::exp(Expr::Const(0)) }

/// `true` when evaluating `e` after `s` cannot observe a difference from
/// evaluating it before `s` — `s` has no effect, or `e` is a constant/label
/// that no statement could affect.
fn commute(s: &Stmt, e: &Expr) -> bool {
    s.is_null() || matches!(e, Expr::Name(_) | Expr::Const(_))
}

/// Pulls side effects out of a list of expressions left-to-right, in
/// program order, introducing a fresh temp only when two expressions
/// can't be proven to commute. `Call`s are always captured into a fresh
/// temp first, since a call's side effects can never be assumed to commute
/// with anything.
fn reorder(exps: Vec<Expr>, interner: &mut Interner) -> (Stmt, Vec<Expr>) {
    if exps.is_empty() {
        return (nop(), Vec::new());
    }
    let mut it = exps.into_iter();
    let first = it.next().unwrap();
    let rest: Vec<Expr> = it.collect();

    if matches!(first, Expr::Call(..)) {
        let t = interner.new_temp();
        let captured = Expr::es_eq(Stmt::mov(Expr::Temp(t), first), Expr::Temp(t));
        let mut all = vec![captured];
        all.extend(rest);
        return reorder(all, interner);
    }

    let (s1, e) = do_exp(first, interner);
    let (s2, mut rest_es) = reorder(rest, interner);
    if commute(&s2, &e) {
        let mut out = vec![e];
        out.append(&mut rest_es);
        (Stmt::seq(s1, s2), out)
    } else {
        let t = interner.new_temp();
        let stmts = Stmt::seq(s1, Stmt::seq(s2, Stmt::mov(Expr::Temp(t), e)));
        let mut out = vec![Expr::Temp(t)];
        out.append(&mut rest_es);
        (stmts, out)
    }
}

fn do_exp(e: Expr, interner: &mut Interner) -> (Stmt, Expr) {
    match e {
        Expr::Const(_) | Expr::Name(_) | Expr::Temp(_) => (nop(), e),
        Expr::BinOp(op, a, b) => {
            let (stmts, mut es) = reorder(vec![*a, *b], interner);
            let eb = es.pop().unwrap();
            let ea = es.pop().unwrap();
            (stmts, Expr::bin(op, ea, eb))
        }
        Expr::Mem(a) => {
            let (stmts, mut es) = reorder(vec![*a], interner);
            (stmts, Expr::mem(es.pop().unwrap()))
        }
        Expr::EsEq(s, e) => {
            let s1 = do_stmt(*s, interner);
            let (s2, e2) = do_exp(*e, interner);
            (Stmt::seq(s1, s2), e2)
        }
        Expr::Call(f, args) => {
            let mut all = vec![*f];
            all.extend(args);
            let (stmts, mut es) = reorder(all, interner);
            let f2 = es.remove(0);
            (stmts, Expr::call(f2, es))
        }
    }
}

fn do_stmt(s: Stmt, interner: &mut Interner) -> Stmt {
    match s {
        Stmt::Seq(a, b) => Stmt::seq(do_stmt(*a, interner), do_stmt(*b, interner)),
        Stmt::Jump(e, labs) => {
            let (stmts, mut es) = reorder(vec![*e], interner);
            Stmt::seq(stmts, Stmt::Jump(Box::new(es.pop().unwrap()), labs))
        }
        Stmt::CJump(op, a, b, t, f) => {
            let (stmts, mut es) = reorder(vec![*a, *b], interner);
            let eb = es.pop().unwrap();
            let ea = es.pop().unwrap();
            Stmt::seq(stmts, Stmt::CJump(op, Box::new(ea), Box::new(eb), t, f))
        }
        Stmt::Move(dst, src) => match (*dst, *src) {
            (Expr::Temp(t), Expr::Call(f, args)) => {
                let mut all = vec![*f];
                all.extend(args);
                let (stmts, mut es) = reorder(all, interner);
                let f2 = es.remove(0);
                Stmt::seq(stmts, Stmt::mov(Expr::Temp(t), Expr::call(f2, es)))
            }
            (Expr::Temp(t), b) => {
                let (stmts, mut es) = reorder(vec![b], interner);
                Stmt::seq(stmts, Stmt::mov(Expr::Temp(t), es.pop().unwrap()))
            }
            (Expr::Mem(a), b) => {
                let (stmts, mut es) = reorder(vec![*a, b], interner);
                let eb = es.pop().unwrap();
                let ea = es.pop().unwrap();
                Stmt::seq(stmts, Stmt::mov(Expr::mem(ea), eb))
            }
            (Expr::EsEq(s, e), b) => do_stmt(Stmt::seq(*s, Stmt::mov(*e, b)), interner),
            (dst, b) => {
                let (stmts, mut es) = reorder(vec![dst, b], interner);
                let eb = es.pop().unwrap();
                let ed = es.pop().unwrap();
                Stmt::seq(stmts, Stmt::mov(ed, eb))
            }
        },
        Stmt::Exp(e) => match *e {
            Expr::Call(f, args) => {
                let mut all = vec![*f];
                all.extend(args);
                let (stmts, mut es) = reorder(all, interner);
                let f2 = es.remove(0);
                Stmt::seq(stmts, Stmt::exp(Expr::call(f2, es)))
            }
            other => {
                let (stmts, mut es) = reorder(vec![other], interner);
                Stmt::seq(stmts, Stmt::exp(es.pop().unwrap()))
            }
        },
        Stmt::Label(_) => s,
    }
}

fn flatten(s: Stmt, out: &mut Vec<Stmt>) {
    match s {
        Stmt::Seq(a, b) => {
            flatten(*a, out);
            flatten(*b, out);
        }
        other if other.is_null() => {}
        other => out.push(other),
    }
}

/// Eliminates every `EsEq` and `Seq`, yielding a flat statement list with
/// `Call`s captured into fresh temps per the rules above.
#[must_use]
pub fn linearize(body: Stmt, interner: &mut Interner) -> Vec<Stmt> {
    let tree = do_stmt(body, interner);
    let mut out = Vec::new();
    flatten(tree, &mut out);
    if out.is_empty() {
        out.push(nop());
    }
    out
}

/// A maximal run of statements starting with exactly one `Label` and
/// ending with exactly one `Jump`/`CJump`.
pub struct BasicBlocks {
    pub blocks: Vec<Vec<Stmt>>,
    pub done_label: Label,
}

/// Splits a linearized statement list into basic blocks, synthesizing a
/// leading `Label` or trailing `Jump` wherever one is missing.
#[must_use]
pub fn basic_blocks(stmts: Vec<Stmt>, interner: &mut Interner) -> BasicBlocks {
    let mut with_labels: Vec<Stmt> = Vec::with_capacity(stmts.len() + 4);
    let mut need_label = true;
    for s in stmts {
        if matches!(s, Stmt::Label(_)) {
            with_labels.push(s);
            need_label = false;
        } else {
            if need_label {
                with_labels.push(Stmt::Label(interner.new_label()));
            }
            need_label = matches!(s, Stmt::Jump(..) | Stmt::CJump(..));
            with_labels.push(s);
        }
    }
    if with_labels.is_empty() {
        with_labels.push(Stmt::Label(interner.new_label()));
    }

    let mut blocks: Vec<Vec<Stmt>> = Vec::new();
    for s in with_labels {
        if matches!(s, Stmt::Label(_)) {
            blocks.push(vec![s]);
        } else {
            blocks.last_mut().expect("every block starts with a label").push(s);
        }
    }

    let done_label = interner.new_label();
    let next_labels: Vec<Label> = blocks
        .iter()
        .skip(1)
        .map(|b| match b[0] {
            Stmt::Label(l) => l,
            _ => unreachable!("every block starts with a label"),
        })
        .chain(std::iter::once(done_label))
        .collect();
    for (block, next) in blocks.iter_mut().zip(next_labels) {
        let ends_with_jump = matches!(block.last(), Some(Stmt::Jump(..)) | Some(Stmt::CJump(..)));
        if !ends_with_jump {
            block.push(Stmt::Jump(Box::new(Expr::Name(next)), vec![next]));
        }
    }

    BasicBlocks { blocks, done_label }
}

/// Schedules basic blocks into a single trace via depth-first traversal of
/// the jump graph, negating a `CJump` (and swapping its targets) when doing
/// so lets its false branch fall straight into the next block, and
/// dropping an unconditional `Jump` that becomes a pure fallthrough.
#[must_use]
pub fn trace_schedule(bb: BasicBlocks, interner: &mut Interner) -> Vec<Stmt> {
    let BasicBlocks { mut blocks, done_label } = bb;
    let mut by_label: HashMap<Label, usize> = HashMap::new();
    for (i, b) in blocks.iter().enumerate() {
        if let Stmt::Label(l) = b[0] {
            by_label.insert(l, i);
        }
    }

    let mut marked = vec![false; blocks.len()];
    let mut order = Vec::with_capacity(blocks.len());

    for start in 0..blocks.len() {
        if marked[start] {
            continue;
        }
        let mut cur = start;
        loop {
            marked[cur] = true;
            order.push(cur);
            let last = blocks[cur].last().expect("block is non-empty").clone();
            match last {
                Stmt::Jump(e, labs) if labs.len() == 1 => {
                    let target = match *e {
                        Expr::Name(l) => by_label.get(&l).copied(),
                        _ => None,
                    };
                    match target {
                        Some(next) if !marked[next] => {
                            blocks[cur].pop(); // now a pure fallthrough
                            cur = next;
                        }
                        _ => break,
                    }
                }
                Stmt::CJump(op, a, b, t, f) => {
                    if let Some(&fi) = by_label.get(&f) {
                        if !marked[fi] {
                            cur = fi;
                            continue;
                        }
                    }
                    if let Some(&ti) = by_label.get(&t) {
                        if !marked[ti] {
                            let last_idx = blocks[cur].len() - 1;
                            blocks[cur][last_idx] = Stmt::CJump(op.negate(), a, b, f, t);
                            cur = ti;
                            continue;
                        }
                    }
                    // Both branches already scheduled elsewhere: synthesize a
                    // fresh false label so the false label still immediately
                    // follows the CJump, with an explicit jump onward to the
                    // real false target.
                    let f_prime = interner.new_label();
                    let last_idx = blocks[cur].len() - 1;
                    blocks[cur][last_idx] = Stmt::CJump(op, a, b, t, f_prime);
                    blocks[cur].push(Stmt::Label(f_prime));
                    blocks[cur].push(Stmt::Jump(Box::new(Expr::Name(f)), vec![f]));
                    break;
                }
                _ => break,
            }
        }
    }

    let mut out = Vec::new();
    for idx in order {
        out.extend(blocks[idx].iter().cloned());
    }
    out.push(Stmt::Label(done_label));
    out
}

/// Runs the full pipeline: linearize, split into basic blocks, trace
/// schedule. The returned list is free of `Seq`/`EsEq` and ends at a fresh
/// `done_label`.
#[must_use]
pub fn canonicalize(body: Stmt, interner: &mut Interner) -> Vec<Stmt> {
    let linear = linearize(body, interner);
    let blocks = basic_blocks(linear, interner);
    trace_schedule(blocks, interner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::Interner;
    use crate::tree::{BinOp, RelOp};

    fn expr_is_clean(e: &Expr) -> bool {
        match e {
            Expr::Const(_) | Expr::Name(_) | Expr::Temp(_) => true,
            Expr::BinOp(_, a, b) => expr_is_clean(a) && expr_is_clean(b),
            Expr::Mem(a) => expr_is_clean(a),
            Expr::Call(f, args) => expr_is_clean(f) && args.iter().all(expr_is_clean),
            Expr::EsEq(..) => false,
        }
    }

    fn stmt_is_clean(s: &Stmt) -> bool {
        match s {
            Stmt::Move(d, e) => expr_is_clean(d) && expr_is_clean(e),
            Stmt::Exp(e) => expr_is_clean(e),
            Stmt::Jump(e, _) => expr_is_clean(e),
            Stmt::CJump(_, a, b, _, _) => expr_is_clean(a) && expr_is_clean(b),
            Stmt::Label(_) => true,
            Stmt::Seq(..) => false,
        }
    }

    /// A body with a nested call inside an arithmetic expression, two
    /// branches, and a write through memory -- enough shape to exercise
    /// `reorder`'s call-capture rule and the trace scheduler's block split.
    fn sample_body(interner: &mut Interner) -> Stmt {
        let x = interner.new_temp();
        let f = interner.new_label();
        let t = interner.new_label();
        let done = interner.new_label();
        Stmt::seq_all(vec![
            Stmt::mov(
                Expr::Temp(x),
                Expr::bin(BinOp::Plus, Expr::call(Expr::Name(f), vec![Expr::Const(1)]), Expr::Const(2)),
            ),
            Stmt::CJump(RelOp::Lt, Box::new(Expr::Temp(x)), Box::new(Expr::Const(10)), t, done),
            Stmt::Label(t),
            Stmt::mov(Expr::mem(Expr::Temp(x)), Expr::Temp(x)),
            Stmt::Label(done),
        ])
    }

    #[test]
    fn canonical_form_has_no_seq_or_eseq() {
        let mut interner = Interner::new();
        let body = sample_body(&mut interner);
        let out = canonicalize(body, &mut interner);
        assert!(out.iter().all(stmt_is_clean));
    }

    #[test]
    fn canonical_form_begins_with_a_label() {
        let mut interner = Interner::new();
        let body = sample_body(&mut interner);
        let out = canonicalize(body, &mut interner);
        assert!(matches!(out.first(), Some(Stmt::Label(_))));
    }

    /// `true` if `e` itself is a `Call`, or contains one nested anywhere
    /// below the top level.
    fn contains_call(e: &Expr) -> bool {
        match e {
            Expr::Const(_) | Expr::Name(_) | Expr::Temp(_) => false,
            Expr::BinOp(_, a, b) => contains_call(a) || contains_call(b),
            Expr::Mem(a) => contains_call(a),
            Expr::Call(f, args) => contains_call(f) || args.iter().any(contains_call),
            Expr::EsEq(_, e) => contains_call(e),
        }
    }

    #[test]
    fn calls_appear_only_as_move_targets_or_expression_statements() {
        let mut interner = Interner::new();
        let body = sample_body(&mut interner);
        let out = canonicalize(body, &mut interner);
        for s in &out {
            match s {
                Stmt::Move(d, e) => {
                    assert!(!contains_call(d));
                    // e is either a bare Call, or contains no Call at all.
                    assert!(matches!(**e, Expr::Call(..)) || !contains_call(e));
                }
                Stmt::Exp(e) => {
                    assert!(matches!(**e, Expr::Call(..)) || !contains_call(e));
                }
                Stmt::Jump(e, _) => assert!(!contains_call(e)),
                Stmt::CJump(_, a, b, _, _) => {
                    assert!(!contains_call(a));
                    assert!(!contains_call(b));
                }
                Stmt::Label(_) => {}
                Stmt::Seq(..) => panic!("Seq must not survive canonicalization"),
            }
        }
    }

    #[test]
    fn canonicalize_is_idempotent_on_already_canonical_input() {
        // Re-running canonicalization over its own output must not
        // reintroduce any Seq/EsEq, and every label the first pass produced
        // must still head a block in the second pass -- re-splitting an
        // already-canonical trace only re-inserts the explicit jumps the
        // trace scheduler had elided as fallthroughs, it never drops a
        // label.
        let mut interner = Interner::new();
        let body = sample_body(&mut interner);
        let once = canonicalize(body, &mut interner);
        let once_labels: Vec<Label> = once.iter().filter_map(|s| match s {
            Stmt::Label(l) => Some(*l),
            _ => None,
        }).collect();

        let twice = canonicalize(Stmt::seq_all(once), &mut interner);
        let twice_labels: std::collections::HashSet<Label> = twice.iter().filter_map(|s| match s {
            Stmt::Label(l) => Some(*l),
            _ => None,
        }).collect();

        assert!(twice.iter().all(stmt_is_clean));
        assert!(matches!(twice.first(), Some(Stmt::Label(_))));
        for l in once_labels {
            assert!(twice_labels.contains(&l));
        }
    }
}
