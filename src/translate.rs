//! Lowers typed AST shapes to tree IR while tracking nested-function
//! lexical structure (`Level`) and the fragment list. `Ex`/`Nx`/`Cx` is the
//! usual three-way split for "translated expression, not yet committed to a
//! context": a pure value, a statement with no value, or a conditional
//! waiting on its true/false labels.

use crate::frame::{Frame, FrameAccess, MachineRegs};
use crate::symbol::{Interner, Label, Temp};
use crate::tree::{Expr, RelOp, Stmt};
use hashbrown::HashMap;
use std::rc::Rc;

struct LevelData {
    id: u32,
    frame: std::cell::RefCell<Frame>,
    parent: Option<Level>,
}

/// A lexical nesting level: a frame plus a parent link, rooted at a
/// synthetic outermost level with no frame of its own. Two levels compare
/// equal only by identity (`id`), never by structure.
#[derive(Clone)]
pub struct Level(Rc<LevelData>);

impl PartialEq for Level {
    fn eq(&self, other: &Self) -> bool { self.0.id == other.0.id }
}
impl Eq for Level {}

impl Level {
    /// The sentinel root of the level tree; translating top-level `main`
    /// creates its one child.
    #[must_use]
    pub fn outermost(interner: &mut Interner, regs: &MachineRegs, main_label: Label) -> Level {
        let frame = Frame::new(interner, regs, main_label, &[]);
        Level(Rc::new(LevelData { id: 0, frame: std::cell::RefCell::new(frame), parent: None }))
    }

    /// A new child level one lexical nesting deeper than `self`, with a
    /// static-link formal prepended to `formal_escapes`.
    #[must_use]
    pub fn new_level(
        &self,
        interner: &mut Interner,
        regs: &MachineRegs,
        name: Label,
        formal_escapes: &[bool],
        next_id: &mut u32,
    ) -> Level {
        let mut escapes_with_link = Vec::with_capacity(formal_escapes.len() + 1);
        escapes_with_link.push(true); // static link always escapes
        escapes_with_link.extend_from_slice(formal_escapes);
        let frame = Frame::new(interner, regs, name, &escapes_with_link);
        *next_id += 1;
        Level(Rc::new(LevelData { id: *next_id, frame: std::cell::RefCell::new(frame), parent: Some(self.clone()) }))
    }

    /// Formal accesses excluding the static link, paired with this level.
    #[must_use]
    pub fn formals(&self) -> Vec<TranslateAccess> {
        self.0.frame.borrow().formals.iter().skip(1).map(|a| TranslateAccess { level: self.clone(), access: *a }).collect()
    }

    #[must_use]
    pub fn alloc_local(&self, interner: &mut Interner, escapes: bool) -> TranslateAccess {
        let access = self.0.frame.borrow_mut().alloc_local(interner, escapes);
        TranslateAccess { level: self.clone(), access }
    }

    #[must_use]
    pub fn name(&self) -> Label { self.0.frame.borrow().name }

    /// The lexically enclosing level, or `None` for the outermost level.
    #[must_use]
    pub fn parent_level(&self) -> Option<Level> { self.parent() }

    pub fn with_frame<R>(&self, f: impl FnOnce(&Frame) -> R) -> R { f(&self.0.frame.borrow()) }
    pub fn with_frame_mut<R>(&self, f: impl FnOnce(&mut Frame) -> R) -> R { f(&mut self.0.frame.borrow_mut()) }

    fn static_link_access(&self) -> FrameAccess { self.0.frame.borrow().formals[0] }
    fn parent(&self) -> Option<Level> { self.0.parent.clone() }

    /// The address of `target`'s frame as seen from `self`, walking the
    /// static-link chain. Used by call sites to pass the static-link
    /// argument to a callee whose defining level is `target`.
    #[must_use]
    pub fn static_link_to(&self, target: &Level, regs: &MachineRegs) -> Expr {
        let mut fp_expr = Expr::Temp(regs.fp);
        let mut cur = self.clone();
        while cur != *target {
            fp_expr = cur.static_link_access().materialize(fp_expr);
            cur = cur.parent().expect("target level must be an ancestor of the call site's level");
        }
        fp_expr
    }
}

/// A pair identifying where a variable lives: its defining level and its
/// access within that level's frame.
#[derive(Clone)]
pub struct TranslateAccess {
    pub level: Level,
    pub access: FrameAccess,
}

impl TranslateAccess {
    /// Materializes this access as a tree expression when read/written from
    /// use-site level `use_level`, walking the static-link chain
    /// `depth(use_level) - depth(self.level)` hops.
    #[must_use]
    pub fn simple_var(&self, use_level: &Level, regs: &MachineRegs) -> Expr {
        let mut fp_expr = Expr::Temp(regs.fp);
        let mut cur = use_level.clone();
        while cur != self.level {
            fp_expr = cur.static_link_access().materialize(fp_expr);
            cur = cur.parent().expect("use-level must be a descendant of the defining level");
        }
        self.access.materialize(fp_expr)
    }
}

/// The three lowering shapes every translated expression reduces to.
pub enum TrExp {
    Ex(Expr),
    Nx(Stmt),
    Cx(Box<dyn FnOnce(Label, Label) -> Stmt>),
}

impl TrExp {
    #[must_use]
    pub fn unit() -> TrExp { TrExp::Nx(Stmt::exp(Expr::Const(0))) }

    /// Converts to an ordinary value expression.
    pub fn un_ex(self, interner: &mut Interner) -> Expr {
        match self {
            TrExp::Ex(e) => e,
            TrExp::Nx(s) => Expr::es_eq(s, Expr::Const(0)),
            TrExp::Cx(f) => {
                let r = interner.new_temp();
                let t = interner.new_label();
                let fl = interner.new_label();
                let body = Stmt::seq_all(vec![
                    Stmt::mov(Expr::Temp(r), Expr::Const(1)),
                    f(t, fl),
                    Stmt::Label(fl),
                    Stmt::mov(Expr::Temp(r), Expr::Const(0)),
                    Stmt::Label(t),
                ]);
                Expr::es_eq(body, Expr::Temp(r))
            }
        }
    }

    /// Converts to a statement executed for effect only.
    pub fn un_nx(self, interner: &mut Interner) -> Stmt {
        match self {
            TrExp::Ex(e) => Stmt::exp(e),
            TrExp::Nx(s) => s,
            TrExp::Cx(f) => {
                let t = interner.new_label();
                let fl = interner.new_label();
                Stmt::seq_all(vec![f(t, fl), Stmt::Label(fl), Stmt::Label(t)])
            }
        }
    }

    /// Converts to a conditional: a function from (true label, false
    /// label) to the statement that branches accordingly.
    pub fn un_cx(self) -> Box<dyn FnOnce(Label, Label) -> Stmt> {
        match self {
            TrExp::Cx(f) => f,
            TrExp::Ex(Expr::Const(0)) => Box::new(|_t, f| Stmt::Jump(Box::new(Expr::Name(f)), vec![f])),
            TrExp::Ex(Expr::Const(1)) => Box::new(|t, _f| Stmt::Jump(Box::new(Expr::Name(t)), vec![t])),
            TrExp::Ex(e) => Box::new(move |t, f| Stmt::CJump(RelOp::Eq, Box::new(e), Box::new(Expr::Const(0)), f, t)),
            TrExp::Nx(_) => unreachable!("un_cx on Nx: the type checker must never produce this"),
        }
    }
}

/// Owns the per-compilation fragment list and de-duplicates string
/// literals: two occurrences of an identical literal share one fragment.
#[derive(Default)]
pub struct Translator {
    pub frags: Vec<crate::frame::Fragment>,
    string_cache: HashMap<String, Label>,
    next_level_id: u32,
}

impl Translator {
    #[must_use] pub fn new() -> Self { Self::default() }

    pub fn next_level_id(&mut self) -> &mut u32 { &mut self.next_level_id }

    /// Interns a string literal into a `.data` fragment, returning the
    /// (possibly pre-existing) label.
    pub fn string_fragment(&mut self, interner: &mut Interner, text: &str) -> Label {
        if let Some(&l) = self.string_cache.get(text) {
            return l;
        }
        let l = interner.new_label();
        self.string_cache.insert(text.to_string(), l);
        self.frags.push(crate::frame::Fragment::Str { label: l, text: text.to_string() });
        l
    }

    /// Finalizes a procedure body (its frame's shift statements prepended)
    /// into a `Proc` fragment.
    pub fn proc_entry_exit(&mut self, interner: &mut Interner, level: &Level, body: TrExp) {
        let body_stmt = body.un_nx(interner);
        let full_body = level.with_frame(|f| Stmt::seq(f.shift.clone(), body_stmt));
        let frame = level.with_frame(Clone::clone);
        self.frags.push(crate::frame::Fragment::Proc { body: full_body, frame });
    }
}
