//! Scoped value/type environments and the built-ins table, implemented over
//! `im::HashMap` so that entering a nested scope is just handing a child
//! scope a new persistent map rather than mutating a shared stack.

use crate::symbol::{Interner, Label, Symbol};
use crate::translate::{Level, TranslateAccess};
use crate::types::semant_ty::{SemTy, Ty};
use im::HashMap as ImHashMap;

#[derive(Clone)]
pub enum ValueEntry {
    /// `read_only` is set for a `for` loop's induction variable, which may
    /// not be assigned to from within the loop body.
    Var { ty: Ty, access: TranslateAccess, read_only: bool },
    Fun { level: Option<Level>, label: Label, formals: Vec<Ty>, result: Ty },
}

/// A persistent, Symbol-keyed scope. Lexical scoping falls out of ordinary
/// Rust variable scoping: `env.bind(sym, v)` returns a new environment that
/// shadows `sym` in the current scope; the parent's copy, still held by an
/// enclosing stack frame, is untouched and needs no explicit `end_scope`.
#[derive(Clone)]
pub struct Env<V: Clone>(ImHashMap<Symbol, V>);

impl<V: Clone> Default for Env<V> {
    fn default() -> Self { Env(ImHashMap::new()) }
}

impl<V: Clone> Env<V> {
    #[must_use] pub fn new() -> Self { Self::default() }

    #[must_use]
    pub fn get(&self, sym: Symbol) -> Option<&V> { self.0.get(&sym) }

    #[must_use]
    pub fn bind(&self, sym: Symbol, v: V) -> Self {
        let mut m = self.0.clone();
        m.insert(sym, v);
        Env(m)
    }
}

pub type TypeEnv = Env<Ty>;
pub type ValueEnv = Env<ValueEntry>;

/// Seeds the type environment with the two predefined types.
#[must_use]
pub fn init_base_tenv(interner: &mut Interner) -> TypeEnv {
    let mut env = TypeEnv::new();
    env = env.bind(interner.intern("int"), SemTy::int());
    env = env.bind(interner.intern("string"), SemTy::string());
    env
}

fn builtins() -> Vec<(&'static str, Vec<fn() -> Ty>, fn() -> Ty)> {
    vec![
        ("print", vec![SemTy::string as fn() -> Ty], SemTy::unit as fn() -> Ty),
        ("printi", vec![SemTy::int], SemTy::unit),
        ("flush", vec![], SemTy::unit),
        ("getchar", vec![], SemTy::string),
        ("ord", vec![SemTy::string], SemTy::int),
        ("chr", vec![SemTy::int], SemTy::string),
        ("size", vec![SemTy::string], SemTy::int),
        ("substring", vec![SemTy::string, SemTy::int, SemTy::int], SemTy::string),
        ("concat", vec![SemTy::string, SemTy::string], SemTy::string),
        ("not", vec![SemTy::int], SemTy::int),
        ("exit", vec![SemTy::int], SemTy::unit),
    ]
}

/// Seeds the value environment with the eleven built-in runtime functions.
/// Each gets a named label so the instruction selector's call sites
/// reference the runtime's externally callable symbol directly.
#[must_use]
pub fn init_base_venv(interner: &mut Interner) -> ValueEnv {
    let mut env = ValueEnv::new();
    for (name, args, result) in builtins() {
        let sym = interner.intern(name);
        let label = interner.named_label(name);
        let entry = ValueEntry::Fun {
            level: None,
            label,
            formals: args.into_iter().map(|f| f()).collect(),
            result: result(),
        };
        env = env.bind(sym, entry);
    }
    env
}
