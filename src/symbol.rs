//! Dense integer identities for names, labels, and virtual registers.
//!
//! `Symbol` is interned per [`Interner`], one of which lives for a single
//! compilation. `Label` and `Temp` are disjoint subkinds: both are fresh
//! monotonic counters, not sub-ranges of the symbol table, so that
//! label/temp generation stays deterministic independent of how many
//! identifiers a given source file happens to mention.

use hashbrown::HashMap;
use std::fmt;

/// A type that is isomorphic to a dense `usize`, used as the index type of
/// an [`IdxVec`].
pub trait Idx: Copy + Eq + std::hash::Hash {
    fn into_usize(self) -> usize;
    fn from_usize(n: usize) -> Self;
}

macro_rules! mk_idx {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u32);

        impl Idx for $name {
            #[inline] fn into_usize(self) -> usize { self.0 as usize }
            #[inline] fn from_usize(n: usize) -> Self { $name(n as u32) }
        }

        impl $name {
            /// Raw numeric id, used only for diagnostics and deterministic tiebreaks.
            #[must_use] pub fn raw(self) -> u32 { self.0 }
        }
    };
}

mk_idx!(
    /// An interned identifier: a variable, type, or function name.
    /// Lookups by text are case-insensitive.
    Symbol
);
mk_idx!(
    /// A code-address label, disjoint from [`Symbol`] and [`Temp`].
    Label
);
mk_idx!(
    /// A virtual register, disjoint from [`Symbol`] and [`Label`].
    Temp
);

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "Sym({})", self.0) }
}
impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "L{}", self.0) }
}
impl fmt::Debug for Temp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "t{}", self.0) }
}

/// A `Vec<T>` indexed by a dense [`Idx`] type instead of `usize`.
#[derive(Clone, Debug)]
pub struct IdxVec<I: Idx, T>(Vec<T>, std::marker::PhantomData<I>);

impl<I: Idx, T> Default for IdxVec<I, T> {
    fn default() -> Self { IdxVec(Vec::new(), std::marker::PhantomData) }
}

impl<I: Idx, T> IdxVec<I, T> {
    #[must_use] pub fn new() -> Self { Self::default() }
    pub fn push(&mut self, v: T) -> I {
        let i = I::from_usize(self.0.len());
        self.0.push(v);
        i
    }
    #[must_use] pub fn len(&self) -> usize { self.0.len() }
    #[must_use] pub fn is_empty(&self) -> bool { self.0.is_empty() }
    pub fn iter(&self) -> impl Iterator<Item = (I, &T)> {
        self.0.iter().enumerate().map(|(i, v)| (I::from_usize(i), v))
    }
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (I, &mut T)> {
        self.0.iter_mut().enumerate().map(|(i, v)| (I::from_usize(i), v))
    }
    pub fn values(&self) -> std::slice::Iter<'_, T> { self.0.iter() }
}

impl<I: Idx, T> std::ops::Index<I> for IdxVec<I, T> {
    type Output = T;
    fn index(&self, i: I) -> &T { &self.0[i.into_usize()] }
}
impl<I: Idx, T> std::ops::IndexMut<I> for IdxVec<I, T> {
    fn index_mut(&mut self, i: I) -> &mut T { &mut self.0[i.into_usize()] }
}

/// The string <-> [`Symbol`] interning table, plus fresh [`Label`] and
/// [`Temp`] generators. One instance lives for the whole compilation; there
/// is no process-wide global table.
#[derive(Default)]
pub struct Interner {
    strings: Vec<String>,
    // lower-cased text -> Symbol, so lookup is case-insensitive.
    lookup: HashMap<String, Symbol>,
    next_label: u32,
    next_temp: u32,
    label_names: HashMap<Label, Symbol>,
}

impl Interner {
    #[must_use] pub fn new() -> Self { Self::default() }

    /// Interns `s`, returning the existing symbol if an identifier that
    /// case-insensitively matches `s` has already been interned.
    pub fn intern(&mut self, s: &str) -> Symbol {
        let key = s.to_ascii_lowercase();
        if let Some(&sym) = self.lookup.get(&key) {
            return sym;
        }
        let sym = Symbol(self.strings.len() as u32);
        self.strings.push(s.to_string());
        self.lookup.insert(key, sym);
        sym
    }

    #[must_use] pub fn resolve(&self, sym: Symbol) -> &str { &self.strings[sym.0 as usize] }

    /// A fresh label, e.g. for loop/branch targets synthesized during
    /// translation or canonicalization.
    pub fn new_label(&mut self) -> Label {
        let l = Label(self.next_label);
        self.next_label += 1;
        l
    }

    /// A fresh label with a human-readable name hint (used for named
    /// procedure entry points so the emitted assembly is readable).
    pub fn named_label(&mut self, name: &str) -> Label {
        let sym = self.intern(name);
        let l = Label(self.next_label);
        self.next_label += 1;
        self.label_names.insert(l, sym);
        l
    }

    /// A fresh virtual register.
    pub fn new_temp(&mut self) -> Temp {
        let t = Temp(self.next_temp);
        self.next_temp += 1;
        t
    }

    /// The assembly-visible name of a label: its hint if it has one,
    /// otherwise a synthesized `L<id>`.
    #[must_use] pub fn label_string(&self, l: Label) -> String {
        match self.label_names.get(&l) {
            Some(&sym) => self.resolve(sym).to_string(),
            None => format!("L{}", l.0),
        }
    }
}
