//! The tree intermediate representation shared between `Translate` and the
//! canonicalizer.

use crate::symbol::{Label, Temp};

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum BinOp {
    Plus,
    Minus,
    Mul,
    Div,
    And,
    Or,
    Xor,
    LShift,
    RShift,
    ArShift,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum RelOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Ult,
    Ule,
    Ugt,
    Uge,
}

impl RelOp {
    /// The operator for the negated condition.
    #[must_use]
    pub fn negate(self) -> RelOp {
        match self {
            RelOp::Eq => RelOp::Ne,
            RelOp::Ne => RelOp::Eq,
            RelOp::Lt => RelOp::Ge,
            RelOp::Ge => RelOp::Lt,
            RelOp::Gt => RelOp::Le,
            RelOp::Le => RelOp::Gt,
            RelOp::Ult => RelOp::Uge,
            RelOp::Uge => RelOp::Ult,
            RelOp::Ugt => RelOp::Ule,
            RelOp::Ule => RelOp::Ugt,
        }
    }

    /// The operator for the operands swapped left-for-right.
    #[must_use]
    pub fn commute(self) -> RelOp {
        match self {
            RelOp::Eq => RelOp::Eq,
            RelOp::Ne => RelOp::Ne,
            RelOp::Lt => RelOp::Gt,
            RelOp::Gt => RelOp::Lt,
            RelOp::Le => RelOp::Ge,
            RelOp::Ge => RelOp::Le,
            RelOp::Ult => RelOp::Ugt,
            RelOp::Ugt => RelOp::Ult,
            RelOp::Ule => RelOp::Uge,
            RelOp::Uge => RelOp::Ule,
        }
    }
}

#[derive(Clone, Debug)]
pub enum Expr {
    Const(i32),
    Name(Label),
    Temp(Temp),
    BinOp(BinOp, Box<Expr>, Box<Expr>),
    Mem(Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    /// A statement whose side effect must run before `expr` is evaluated.
    /// Eliminated by the canonicalizer; never present afterward.
    EsEq(Box<Stmt>, Box<Expr>),
}

#[derive(Clone, Debug)]
pub enum Stmt {
    Move(Box<Expr>, Box<Expr>),
    Exp(Box<Expr>),
    Jump(Box<Expr>, Vec<Label>),
    CJump(RelOp, Box<Expr>, Box<Expr>, Label, Label),
    /// Sequencing of two statements. Eliminated by the canonicalizer; never
    /// present afterward.
    Seq(Box<Stmt>, Box<Stmt>),
    Label(Label),
}

impl Expr {
    #[must_use]
    pub fn bin(op: BinOp, l: Expr, r: Expr) -> Expr { Expr::BinOp(op, Box::new(l), Box::new(r)) }
    #[must_use]
    pub fn mem(addr: Expr) -> Expr { Expr::Mem(Box::new(addr)) }
    #[must_use]
    pub fn call(f: Expr, args: Vec<Expr>) -> Expr { Expr::Call(Box::new(f), args) }
    #[must_use]
    pub fn es_eq(s: Stmt, e: Expr) -> Expr { Expr::EsEq(Box::new(s), Box::new(e)) }
}

impl Stmt {
    #[must_use]
    pub fn mov(dst: Expr, src: Expr) -> Stmt { Stmt::Move(Box::new(dst), Box::new(src)) }
    #[must_use]
    pub fn exp(e: Expr) -> Stmt { Stmt::Exp(Box::new(e)) }
    #[must_use]
    pub fn seq(a: Stmt, b: Stmt) -> Stmt { Stmt::Seq(Box::new(a), Box::new(b)) }
    #[must_use]
    pub fn seq_all(stmts: Vec<Stmt>) -> Stmt {
        let mut it = stmts.into_iter().rev();
        let mut acc = it.next().unwrap_or(Stmt::Exp(Box::new(Expr::Const(0))));
        for s in it {
            acc = Stmt::seq(s, acc);
        }
        acc
    }

    /// `true` for a statement with no observable effect, used by the
    /// canonicalizer's `commute` predicate (`isNullStm` in the source).
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Stmt::Exp(e) if matches!(**e, Expr::Const(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_RELOPS: [RelOp; 10] = [
        RelOp::Eq, RelOp::Ne, RelOp::Lt, RelOp::Gt, RelOp::Le, RelOp::Ge,
        RelOp::Ult, RelOp::Ule, RelOp::Ugt, RelOp::Uge,
    ];

    #[test]
    fn negate_is_an_involution() {
        for op in ALL_RELOPS {
            assert_eq!(op.negate().negate(), op);
        }
    }

    #[test]
    fn commute_is_an_involution() {
        for op in ALL_RELOPS {
            assert_eq!(op.commute().commute(), op);
        }
    }

    #[test]
    fn negate_and_commute_disagree_for_every_strict_ordering() {
        for op in [RelOp::Lt, RelOp::Gt, RelOp::Le, RelOp::Ge, RelOp::Ult, RelOp::Ugt, RelOp::Ule, RelOp::Uge] {
            assert_ne!(op.negate(), op.commute());
        }
    }
}
