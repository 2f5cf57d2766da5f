//! Escape analysis: walks the AST before semantic analysis and sets each
//! binding's `escape` flag when a nested function captures it, so
//! [`crate::translate`] can decide `InFrame` vs `InReg`. A variable escapes
//! only when referenced from a strictly deeper lexical depth than where it
//! was bound; a reference at the same depth (including from within the
//! binding function's own body) does not mark it.

use crate::ast::{Declaration, Exp, Var};
use crate::symbol::Symbol;
use hashbrown::HashMap;

#[derive(Copy, Clone)]
struct EscapeEntry {
    depth: u32,
    // Points at the `escape: bool` field of the AST binding site this entry
    // describes. Sound because the analyzer holds `&mut Exp` for the whole
    // walk and every slot is written at most from this single-threaded pass.
    slot: *mut bool,
}

struct Scopes {
    stack: Vec<HashMap<Symbol, EscapeEntry>>,
}

impl Scopes {
    fn new() -> Self { Scopes { stack: vec![HashMap::new()] } }
    fn begin(&mut self) { self.stack.push(HashMap::new()); }
    fn end(&mut self) { self.stack.pop(); }
    fn enter(&mut self, sym: Symbol, entry: EscapeEntry) {
        self.stack.last_mut().expect("begin_scope before enter").insert(sym, entry);
    }
    fn look(&self, sym: Symbol) -> Option<EscapeEntry> {
        self.stack.iter().rev().find_map(|scope| scope.get(&sym).copied())
    }
}

pub struct EscapeAnalyzer {
    scopes: Scopes,
}

impl Default for EscapeAnalyzer {
    fn default() -> Self { EscapeAnalyzer { scopes: Scopes::new() } }
}

impl EscapeAnalyzer {
    #[must_use] pub fn new() -> Self { Self::default() }

    pub fn analyze(&mut self, exp: &mut Exp) { self.trans_exp(exp, 0); }

    fn trans_var(&mut self, var: &mut Var, depth: u32) {
        match var {
            Var::Simple(sym, _) => {
                if let Some(entry) = self.scopes.look(*sym) {
                    if depth > entry.depth {
                        // SAFETY: see `EscapeEntry::slot`.
                        unsafe { *entry.slot = true; }
                    }
                }
            }
            Var::Field(base, _, _) => self.trans_var(base, depth),
            Var::Subscript(base, idx, _) => {
                self.trans_var(base, depth);
                self.trans_exp(idx, depth);
            }
        }
    }

    fn trans_decl(&mut self, decl: &mut Declaration, depth: u32) {
        match decl {
            Declaration::Functions(funcs) => {
                for f in funcs.iter_mut() {
                    self.scopes.begin();
                    for p in f.params.iter_mut() {
                        p.escape = false;
                        let slot: *mut bool = &mut p.escape;
                        self.scopes.enter(p.name, EscapeEntry { depth: depth + 1, slot });
                    }
                    self.trans_exp(&mut f.body, depth + 1);
                    self.scopes.end();
                }
            }
            Declaration::Var(v) => {
                v.escape = false;
                self.trans_exp(&mut v.init, depth);
                let slot: *mut bool = &mut v.escape;
                self.scopes.enter(v.name, EscapeEntry { depth: depth + 1, slot });
            }
            Declaration::Types(_) => {}
        }
    }

    fn trans_exp(&mut self, exp: &mut Exp, depth: u32) {
        match exp {
            Exp::Var(v) => self.trans_var(v, depth),
            Exp::Nil(_) | Exp::Int(_, _) | Exp::Str(_, _) | Exp::Break(_) => {}
            Exp::Call { args, .. } => {
                for a in args.iter_mut() { self.trans_exp(a, depth); }
            }
            Exp::Oper { left, right, .. } => {
                self.trans_exp(left, depth);
                self.trans_exp(right, depth);
            }
            Exp::Record { fields, .. } => {
                for f in fields.iter_mut() { self.trans_exp(&mut f.expr, depth); }
            }
            Exp::Seq(exps, _) => {
                for e in exps.iter_mut() { self.trans_exp(e, depth); }
            }
            Exp::Assign { var, exp, .. } => {
                self.trans_var(var, depth);
                self.trans_exp(exp, depth);
            }
            Exp::If { pred, then, els, .. } => {
                self.trans_exp(pred, depth);
                self.trans_exp(then, depth);
                if let Some(e) = els { self.trans_exp(e, depth); }
            }
            Exp::While { pred, body, .. } => {
                self.trans_exp(pred, depth);
                self.trans_exp(body, depth);
            }
            Exp::For { var, escape, lo, hi, body, .. } => {
                self.trans_exp(lo, depth);
                self.trans_exp(hi, depth);
                *escape = false;
                self.scopes.begin();
                let slot: *mut bool = escape;
                self.scopes.enter(*var, EscapeEntry { depth: depth + 1, slot });
                self.trans_exp(body, depth + 1);
                self.scopes.end();
            }
            Exp::Let { decls, body, .. } => {
                self.scopes.begin();
                for d in decls.iter_mut() { self.trans_decl(d, depth); }
                self.trans_exp(body, depth);
                self.scopes.end();
            }
            Exp::Array { size, init, .. } => {
                self.trans_exp(size, depth);
                self.trans_exp(init, depth);
            }
        }
    }
}

/// Runs escape analysis over a whole program, mutating `escape` flags in
/// place.
pub fn find_escapes(prog: &mut Exp) {
    EscapeAnalyzer::new().analyze(prog);
}
