//! Semantic (checked) types. Record and array identity is nominal (fresh
//! per declaration), implemented with a monotonic id rather than structural
//! comparison, so two record types with identical field lists still count
//! as distinct.

use crate::symbol::Symbol;
use std::cell::RefCell;
use std::rc::Rc;

pub type Ty = Rc<SemTy>;

#[derive(Debug)]
pub enum SemTy {
    Int,
    String,
    Nil,
    Unit,
    Record { fields: Vec<(Symbol, Ty)>, id: u64 },
    Array { element: Ty, id: u64 },
    /// Exists only during type-declaration resolution; the lazily settable
    /// target models a forward-declared type name without needing a cyclic
    /// object graph.
    Name { name: Symbol, resolved: RefCell<Option<Ty>> },
}

impl SemTy {
    #[must_use] pub fn int() -> Ty { Rc::new(SemTy::Int) }
    #[must_use] pub fn string() -> Ty { Rc::new(SemTy::String) }
    #[must_use] pub fn nil() -> Ty { Rc::new(SemTy::Nil) }
    #[must_use] pub fn unit() -> Ty { Rc::new(SemTy::Unit) }

    #[must_use]
    pub fn name_placeholder(name: Symbol) -> Ty {
        Rc::new(SemTy::Name { name, resolved: RefCell::new(None) })
    }

    /// Follows `Name` aliases through to a concrete type. Returns `None` if
    /// a placeholder was never resolved (a cyclic synonym chain).
    #[must_use]
    pub fn actual(ty: &Ty) -> Option<Ty> {
        let mut cur = ty.clone();
        let mut hops = 0u32;
        loop {
            match &*cur {
                SemTy::Name { resolved, .. } => {
                    let next = resolved.borrow().clone()?;
                    cur = next;
                    hops += 1;
                    if hops > 10_000 {
                        return None; // pathological chain; treat as unresolved
                    }
                }
                _ => return Some(cur),
            }
        }
    }

    /// Structural/nominal type compatibility for assignment and equality.
    /// `Nil` is compatible with any record; aliases are followed first.
    #[must_use]
    pub fn compatible(a: &Ty, b: &Ty) -> bool {
        let (Some(a), Some(b)) = (SemTy::actual(a), SemTy::actual(b)) else { return false };
        match (&*a, &*b) {
            (SemTy::Nil, SemTy::Record { .. }) | (SemTy::Record { .. }, SemTy::Nil) => true,
            (SemTy::Record { id: i1, .. }, SemTy::Record { id: i2, .. }) => i1 == i2,
            (SemTy::Array { id: i1, .. }, SemTy::Array { id: i2, .. }) => i1 == i2,
            (SemTy::Int, SemTy::Int)
            | (SemTy::String, SemTy::String)
            | (SemTy::Nil, SemTy::Nil)
            | (SemTy::Unit, SemTy::Unit) => true,
            _ => false,
        }
    }

    #[must_use]
    pub fn is_int(ty: &Ty) -> bool { matches!(SemTy::actual(ty).as_deref(), Some(SemTy::Int)) }
    #[must_use]
    pub fn is_string(ty: &Ty) -> bool { matches!(SemTy::actual(ty).as_deref(), Some(SemTy::String)) }

    #[must_use]
    pub fn describe(ty: &Ty) -> String {
        match SemTy::actual(ty).as_deref() {
            Some(SemTy::Int) => "int".to_string(),
            Some(SemTy::String) => "string".to_string(),
            Some(SemTy::Nil) => "nil".to_string(),
            Some(SemTy::Unit) => "unit".to_string(),
            Some(SemTy::Record { id, .. }) => format!("record#{id}"),
            Some(SemTy::Array { id, .. }) => format!("array#{id}"),
            Some(SemTy::Name { .. }) | None => "<unresolved>".to_string(),
        }
    }
}

/// A monotonic generator for fresh nominal type ids, owned by the
/// compilation rather than a global so repeated compilations in one
/// process never share identity.
#[derive(Default)]
pub struct TypeIdGen(u64);

impl TypeIdGen {
    #[must_use] pub fn new() -> Self { Self::default() }
    pub fn fresh(&mut self) -> u64 {
        self.0 += 1;
        self.0
    }
}
