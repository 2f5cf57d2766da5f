//! Recursive-descent, precedence-climbing parser, covering the full Tiger
//! grammar: the operator-precedence expression chain
//! (`or_exp`/`and_exp`/`relational_exp`/`add_exp`/`mul_exp`/`unary_exp`)
//! plus every declaration and statement production.

use crate::ast::*;
use crate::diagnostics::ParseError;
use crate::lexer::{Lexer, TokKind, Token};
use crate::symbol::Interner;

pub struct Parser<'s> {
    lexer: Lexer<'s>,
    lookahead: Token,
    interner: &'s mut Interner,
}

type PResult<T> = Result<T, ParseError>;

impl<'s> Parser<'s> {
    pub fn new(src: &'s str, interner: &'s mut Interner) -> Result<Self, crate::diagnostics::LexError> {
        let mut lexer = Lexer::new(src);
        let lookahead = lexer.next_token()?;
        Ok(Parser { lexer, lookahead, interner })
    }

    fn bump(&mut self) -> PResult<Token> {
        let next = self.lexer.next_token().map_err(|_| ParseError::UnexpectedEof {
            pos: self.lookahead.pos,
            expected: "a valid token".to_string(),
        })?;
        Ok(std::mem::replace(&mut self.lookahead, next))
    }

    fn expect(&mut self, kind: &TokKind, what: &str) -> PResult<Token> {
        if std::mem::discriminant(&self.lookahead.kind) == std::mem::discriminant(kind) {
            self.bump()
        } else {
            Err(self.unexpected(what))
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        if self.lookahead.is_eof() {
            ParseError::UnexpectedEof { pos: self.lookahead.pos, expected: expected.to_string() }
        } else {
            ParseError::UnexpectedToken {
                pos: self.lookahead.pos,
                expected: expected.to_string(),
                found: format!("{:?}", self.lookahead.kind),
            }
        }
    }

    fn at(&self, kind: &TokKind) -> bool {
        std::mem::discriminant(&self.lookahead.kind) == std::mem::discriminant(kind)
    }

    fn ident(&mut self) -> PResult<crate::symbol::Symbol> {
        match self.lookahead.kind.clone() {
            TokKind::Ident(s) => {
                self.bump()?;
                Ok(self.interner.intern(&s))
            }
            _ => Err(self.unexpected("an identifier")),
        }
    }

    /// Entry point: parses a whole program, which is one expression.
    pub fn parse(&mut self) -> PResult<Exp> {
        let e = self.exp()?;
        if !self.lookahead.is_eof() {
            return Err(self.unexpected("end of file"));
        }
        Ok(e)
    }

    // ---- expression precedence chain, lowest to highest ----

    fn exp(&mut self) -> PResult<Exp> { self.or_exp() }

    fn or_exp(&mut self) -> PResult<Exp> {
        let mut left = self.and_exp()?;
        while self.at(&TokKind::Or) {
            let pos = self.bump()?.pos;
            let right = self.and_exp()?;
            left = Exp::Oper { left: Box::new(left), op: OperatorWithPos { op: Operator::Or, pos }, right: Box::new(right) };
        }
        Ok(left)
    }

    fn and_exp(&mut self) -> PResult<Exp> {
        let mut left = self.relational_exp()?;
        while self.at(&TokKind::And) {
            let pos = self.bump()?.pos;
            let right = self.relational_exp()?;
            left = Exp::Oper { left: Box::new(left), op: OperatorWithPos { op: Operator::And, pos }, right: Box::new(right) };
        }
        Ok(left)
    }

    fn relational_exp(&mut self) -> PResult<Exp> {
        let left = self.add_exp()?;
        let op = match &self.lookahead.kind {
            TokKind::Eq => Operator::Eq,
            TokKind::Neq => Operator::Neq,
            TokKind::Gt => Operator::Gt,
            TokKind::Ge => Operator::Ge,
            TokKind::Lt => Operator::Lt,
            TokKind::Le => Operator::Le,
            _ => return Ok(left),
        };
        let pos = self.bump()?.pos;
        let right = self.add_exp()?;
        Ok(Exp::Oper { left: Box::new(left), op: OperatorWithPos { op, pos }, right: Box::new(right) })
    }

    fn add_exp(&mut self) -> PResult<Exp> {
        let mut left = self.mul_exp()?;
        loop {
            let op = match &self.lookahead.kind {
                TokKind::Plus => Operator::Plus,
                TokKind::Minus => Operator::Minus,
                _ => break,
            };
            let pos = self.bump()?.pos;
            let right = self.mul_exp()?;
            left = Exp::Oper { left: Box::new(left), op: OperatorWithPos { op, pos }, right: Box::new(right) };
        }
        Ok(left)
    }

    fn mul_exp(&mut self) -> PResult<Exp> {
        let mut left = self.unary_exp()?;
        loop {
            let op = match &self.lookahead.kind {
                TokKind::Times => Operator::Mul,
                TokKind::Div => Operator::Div,
                _ => break,
            };
            let pos = self.bump()?.pos;
            let right = self.unary_exp()?;
            left = Exp::Oper { left: Box::new(left), op: OperatorWithPos { op, pos }, right: Box::new(right) };
        }
        Ok(left)
    }

    fn unary_exp(&mut self) -> PResult<Exp> {
        if self.at(&TokKind::Minus) {
            let pos = self.bump()?.pos;
            let e = self.unary_exp()?;
            return Ok(Exp::Oper {
                left: Box::new(Exp::Int(0, pos)),
                op: OperatorWithPos { op: Operator::Minus, pos },
                right: Box::new(e),
            });
        }
        self.postfix_exp()
    }

    /// Handles trailing `:=` assignment on an lvalue-shaped primary, which
    /// sits above primary but below unary in precedence.
    fn postfix_exp(&mut self) -> PResult<Exp> {
        let e = self.primary_exp()?;
        if self.at(&TokKind::Assign) {
            let pos = self.bump()?.pos;
            let var = exp_to_var(e).map_err(|_| ParseError::UnexpectedToken {
                pos,
                expected: "an lvalue before ':='".to_string(),
                found: ":=".to_string(),
            })?;
            let rhs = self.exp()?;
            return Ok(Exp::Assign { var, exp: Box::new(rhs), pos });
        }
        Ok(e)
    }

    fn primary_exp(&mut self) -> PResult<Exp> {
        let pos = self.lookahead.pos;
        match self.lookahead.kind.clone() {
            TokKind::Nil => { self.bump()?; Ok(Exp::Nil(pos)) }
            TokKind::Break => { self.bump()?; Ok(Exp::Break(pos)) }
            TokKind::Int(n) => { self.bump()?; Ok(Exp::Int(n, pos)) }
            TokKind::Str(s) => { self.bump()?; Ok(Exp::Str(s, pos)) }
            TokKind::OpenParen => self.paren_or_seq(),
            TokKind::If => self.if_exp(),
            TokKind::While => self.while_exp(),
            TokKind::For => self.for_exp(),
            TokKind::Let => self.let_exp(),
            TokKind::Ident(_) => self.ident_led_exp(),
            _ => Err(self.unexpected("an expression")),
        }
    }

    fn paren_or_seq(&mut self) -> PResult<Exp> {
        let pos = self.bump()?.pos; // '('
        if self.at(&TokKind::CloseParen) {
            self.bump()?;
            return Ok(Exp::Seq(vec![], pos));
        }
        let mut exps = vec![self.exp()?];
        while self.at(&TokKind::Semicolon) {
            self.bump()?;
            exps.push(self.exp()?);
        }
        self.expect(&TokKind::CloseParen, "')'")?;
        if exps.len() == 1 {
            Ok(exps.pop().unwrap())
        } else {
            Ok(Exp::Seq(exps, pos))
        }
    }

    fn if_exp(&mut self) -> PResult<Exp> {
        let pos = self.bump()?.pos;
        let pred = Box::new(self.exp()?);
        self.expect(&TokKind::Then, "'then'")?;
        let then = Box::new(self.exp()?);
        let els = if self.at(&TokKind::Else) {
            self.bump()?;
            Some(Box::new(self.exp()?))
        } else {
            None
        };
        Ok(Exp::If { pred, then, els, pos })
    }

    fn while_exp(&mut self) -> PResult<Exp> {
        let pos = self.bump()?.pos;
        let pred = Box::new(self.exp()?);
        self.expect(&TokKind::Do, "'do'")?;
        let body = Box::new(self.exp()?);
        Ok(Exp::While { pred, body, pos })
    }

    fn for_exp(&mut self) -> PResult<Exp> {
        let pos = self.bump()?.pos;
        let var = self.ident()?;
        self.expect(&TokKind::Assign, "':='")?;
        let lo = Box::new(self.exp()?);
        self.expect(&TokKind::To, "'to'")?;
        let hi = Box::new(self.exp()?);
        self.expect(&TokKind::Do, "'do'")?;
        let body = Box::new(self.exp()?);
        Ok(Exp::For { var, escape: true, lo, hi, body, pos })
    }

    fn let_exp(&mut self) -> PResult<Exp> {
        let pos = self.bump()?.pos;
        let mut decls = Vec::new();
        while !self.at(&TokKind::In) {
            decls.push(self.declaration()?);
        }
        self.expect(&TokKind::In, "'in'")?;
        let mut body = Vec::new();
        if !self.at(&TokKind::End) {
            body.push(self.exp()?);
            while self.at(&TokKind::Semicolon) {
                self.bump()?;
                body.push(self.exp()?);
            }
        }
        self.expect(&TokKind::End, "'end'")?;
        let body = if body.len() == 1 { body.pop().unwrap() } else { Exp::Seq(body, pos) };
        Ok(Exp::Let { decls, body: Box::new(body), pos })
    }

    fn declaration(&mut self) -> PResult<Declaration> {
        match &self.lookahead.kind {
            TokKind::Type => self.type_decls(),
            TokKind::Function => self.func_decls(),
            TokKind::Var => self.var_decl().map(Declaration::Var),
            _ => Err(self.unexpected("a declaration")),
        }
    }

    fn type_decls(&mut self) -> PResult<Declaration> {
        let mut decls = vec![self.one_type_decl()?];
        while self.at(&TokKind::Type) {
            decls.push(self.one_type_decl()?);
        }
        Ok(Declaration::Types(decls))
    }

    fn one_type_decl(&mut self) -> PResult<TypeDecl> {
        let pos = self.bump()?.pos; // 'type'
        let ty_name = self.ident()?;
        self.expect(&TokKind::Eq, "'='")?;
        let typ = self.ty()?;
        Ok(TypeDecl { ty_name, typ, pos })
    }

    fn ty(&mut self) -> PResult<Ty> {
        let pos = self.lookahead.pos;
        match self.lookahead.kind.clone() {
            TokKind::Ident(_) => {
                let name = self.ident()?;
                Ok(Ty::Name(name, pos))
            }
            TokKind::OpenCurly => {
                self.bump()?;
                let fields = self.field_list(&TokKind::CloseCurly)?;
                self.expect(&TokKind::CloseCurly, "'}'")?;
                Ok(Ty::Record(fields, pos))
            }
            TokKind::Array => {
                self.bump()?;
                self.expect(&TokKind::Of, "'of'")?;
                let elem = self.ident()?;
                Ok(Ty::Array(elem, pos))
            }
            _ => Err(self.unexpected("a type")),
        }
    }

    fn field_list(&mut self, end: &TokKind) -> PResult<Vec<Field>> {
        let mut fields = Vec::new();
        if self.at(end) {
            return Ok(fields);
        }
        fields.push(self.one_field()?);
        while self.at(&TokKind::Comma) {
            self.bump()?;
            fields.push(self.one_field()?);
        }
        Ok(fields)
    }

    fn one_field(&mut self) -> PResult<Field> {
        let pos = self.lookahead.pos;
        let name = self.ident()?;
        self.expect(&TokKind::Colon, "':'")?;
        let typ = self.ident()?;
        Ok(Field { name, escape: true, typ, pos })
    }

    fn func_decls(&mut self) -> PResult<Declaration> {
        let mut decls = vec![self.one_func_decl()?];
        while self.at(&TokKind::Function) {
            decls.push(self.one_func_decl()?);
        }
        Ok(Declaration::Functions(decls))
    }

    fn one_func_decl(&mut self) -> PResult<FuncDecl> {
        let pos = self.bump()?.pos; // 'function'
        let name = self.ident()?;
        self.expect(&TokKind::OpenParen, "'('")?;
        let params = self.field_list(&TokKind::CloseParen)?;
        self.expect(&TokKind::CloseParen, "')'")?;
        let result_ty = if self.at(&TokKind::Colon) {
            self.bump()?;
            Some(self.ident()?)
        } else {
            None
        };
        self.expect(&TokKind::Eq, "'='")?;
        let body = self.exp()?;
        Ok(FuncDecl { name, params, result_ty, body, pos })
    }

    fn var_decl(&mut self) -> PResult<VarDecl> {
        let pos = self.bump()?.pos; // 'var'
        let name = self.ident()?;
        let typ = if self.at(&TokKind::Colon) {
            self.bump()?;
            Some(self.ident()?)
        } else {
            None
        };
        self.expect(&TokKind::Assign, "':='")?;
        let init = self.exp()?;
        Ok(VarDecl { name, escape: true, typ, init, pos })
    }

    /// Parses anything that starts with an identifier: a bare variable
    /// lvalue with optional field/subscript chain, a function call, or a
    /// record/array literal.
    fn ident_led_exp(&mut self) -> PResult<Exp> {
        let pos = self.lookahead.pos;
        let name = self.ident()?;

        if self.at(&TokKind::OpenParen) {
            self.bump()?;
            let mut args = Vec::new();
            if !self.at(&TokKind::CloseParen) {
                args.push(self.exp()?);
                while self.at(&TokKind::Comma) {
                    self.bump()?;
                    args.push(self.exp()?);
                }
            }
            self.expect(&TokKind::CloseParen, "')'")?;
            return Ok(Exp::Call { func: name, args, pos });
        }

        if self.at(&TokKind::OpenCurly) {
            self.bump()?;
            let mut fields = Vec::new();
            if !self.at(&TokKind::CloseCurly) {
                fields.push(self.record_field()?);
                while self.at(&TokKind::Comma) {
                    self.bump()?;
                    fields.push(self.record_field()?);
                }
            }
            self.expect(&TokKind::CloseCurly, "'}'")?;
            return Ok(Exp::Record { fields, typ: name, pos });
        }

        // `ident [ size ] of init` — array literal. Distinguish from a
        // subscripted lvalue by the trailing `of`.
        if self.at(&TokKind::OpenBrac) {
            self.bump()?;
            let size = self.exp()?;
            self.expect(&TokKind::CloseBrac, "']'")?;
            if self.at(&TokKind::Of) {
                self.bump()?;
                let init = self.exp()?;
                return Ok(Exp::Array { typ: name, size: Box::new(size), init: Box::new(init), pos });
            }
            // Not an array literal: `name[size]` is a subscript lvalue
            // chain, continued below with any further `.`/`[` suffixes.
            let base = Var::Simple(name, pos);
            let var = Var::Subscript(Box::new(base), Box::new(size), pos);
            return self.var_tail(var).map(Exp::Var);
        }

        self.var_tail(Var::Simple(name, pos)).map(Exp::Var)
    }

    fn record_field(&mut self) -> PResult<RecordField> {
        let pos = self.lookahead.pos;
        let ident = self.ident()?;
        self.expect(&TokKind::Eq, "'='")?;
        let expr = self.exp()?;
        Ok(RecordField { ident, expr, pos })
    }

    /// Continues an lvalue with any further `.field` or `[idx]` suffixes.
    fn var_tail(&mut self, mut var: Var) -> PResult<Var> {
        loop {
            if self.at(&TokKind::Dot) {
                let pos = self.bump()?.pos;
                let field = self.ident()?;
                var = Var::Field(Box::new(var), field, pos);
            } else if self.at(&TokKind::OpenBrac) {
                let pos = self.bump()?.pos;
                let idx = self.exp()?;
                self.expect(&TokKind::CloseBrac, "']'")?;
                var = Var::Subscript(Box::new(var), Box::new(idx), pos);
            } else {
                break;
            }
        }
        Ok(var)
    }
}

/// Converts a parsed primary expression back into an lvalue for `:=`, since
/// the parser builds `Var` chains as `Exp::Var` until an assignment proves
/// they were lvalues all along.
fn exp_to_var(e: Exp) -> Result<Var, ()> {
    match e {
        Exp::Var(v) => Ok(v),
        _ => Err(()),
    }
}

/// Parses `src` into a single top-level expression (a whole Tiger program).
pub fn parse_program(src: &str, interner: &mut Interner) -> Result<Exp, crate::diagnostics::Error> {
    let mut parser = Parser::new(src, interner).map_err(crate::diagnostics::Error::Lex)?;
    parser.parse().map_err(crate::diagnostics::Error::Parse)
}
