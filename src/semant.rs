//! The combined type-checker and IR-emitter: one large recursive pass over
//! the AST, built on the `TrExp`/`Level` substrate in `translate.rs` and the
//! `Env`/`SemTy` substrate in `types/`.
//!
//! Type-checking and IR emission happen in the same traversal: every
//! `trans_*` function returns both the checked [`Ty`] and the [`TrExp`]
//! lowering in one pass.

use crate::ast;
use crate::diagnostics::TypeError;
use crate::frame::MachineRegs;
use crate::symbol::{Interner, Label, Symbol};
use crate::translate::{Level, TrExp, Translator};
use crate::tree::{BinOp, Expr, RelOp, Stmt};
use crate::types::env::{TypeEnv, ValueEntry, ValueEnv};
use crate::types::semant_ty::{SemTy, Ty, TypeIdGen};
use hashbrown::HashSet;

/// Internal runtime entry points the selector/emitter never see as Tiger
/// identifiers: they are synthesized directly as `Call`s by this pass.
struct RuntimeLabels {
    alloc_record: Label,
    init_array: Label,
    string_equal: Label,
    string_compare: Label,
}

impl RuntimeLabels {
    fn new(interner: &mut Interner) -> Self {
        RuntimeLabels {
            alloc_record: interner.named_label("allocRecord"),
            init_array: interner.named_label("initArray"),
            string_equal: interner.named_label("stringEqual"),
            string_compare: interner.named_label("stringCompare"),
        }
    }
}

/// Threads everything the traversal needs that the AST itself doesn't
/// carry: interning, the machine register set, the fragment accumulator,
/// the nominal-type id generator, and the well-known runtime labels.
pub struct Semant<'a> {
    interner: &'a mut Interner,
    regs: &'a MachineRegs,
    translator: &'a mut Translator,
    type_ids: TypeIdGen,
    runtime: RuntimeLabels,
}

type TResult<T> = Result<T, TypeError>;

impl<'a> Semant<'a> {
    #[must_use]
    pub fn new(interner: &'a mut Interner, regs: &'a MachineRegs, translator: &'a mut Translator) -> Self {
        let runtime = RuntimeLabels::new(interner);
        Semant { interner, regs, translator, type_ids: TypeIdGen::new(), runtime }
    }

    /// `trans_prog(ast) -> Result<(), TypeError>`. Translates the whole
    /// program as the body of a synthetic `main` procedure at the
    /// outermost level, emitting one `Proc` fragment for `main` plus one
    /// for every user-defined function, and one `Str` fragment per
    /// distinct string literal (invariants 1 and 8).
    pub fn trans_prog(&mut self, ast: &ast::Exp) -> TResult<()> {
        let main_label = self.interner.named_label("main");
        let outermost = Level::outermost(self.interner, self.regs, main_label);
        let venv = crate::types::env::init_base_venv(self.interner);
        let tenv = crate::types::env::init_base_tenv(self.interner);
        let (body, _ty) = self.trans_exp(ast, &outermost, &venv, &tenv, None)?;
        self.translator.proc_entry_exit(self.interner, &outermost, body);
        Ok(())
    }

    fn fresh_level(&mut self, parent: &Level, name: Label, formal_escapes: &[bool]) -> Level {
        let mut next_id = *self.translator.next_level_id();
        let level = parent.new_level(self.interner, self.regs, name, formal_escapes, &mut next_id);
        *self.translator.next_level_id() = next_id;
        level
    }

    // ---------------------------------------------------------------
    // Variables
    // ---------------------------------------------------------------

    fn trans_var(&mut self, var: &ast::Var, level: &Level, venv: &ValueEnv, tenv: &TypeEnv) -> TResult<(TrExp, Ty)> {
        match var {
            ast::Var::Simple(sym, pos) => match venv.get(*sym) {
                Some(ValueEntry::Var { ty, access, .. }) => {
                    let expr = access.simple_var(level, self.regs);
                    Ok((TrExp::Ex(expr), ty.clone()))
                }
                Some(ValueEntry::Fun { .. }) => Err(TypeError::UndefinedVariable(*pos, *sym)),
                None => Err(TypeError::UndefinedVariable(*pos, *sym)),
            },
            ast::Var::Field(base, field, pos) => {
                let (base_tr, base_ty) = self.trans_var(base, level, venv, tenv)?;
                let base_actual = SemTy::actual(&base_ty).ok_or(TypeError::NotARecord(*pos))?;
                let SemTy::Record { fields, .. } = &*base_actual else {
                    return Err(TypeError::NotARecord(*pos));
                };
                let Some(idx) = fields.iter().position(|(n, _)| n == field) else {
                    return Err(TypeError::UndefinedField(*pos, *field));
                };
                let field_ty = fields[idx].1.clone();
                let base_addr = base_tr.un_ex(self.interner);
                let offset = idx as i32 * crate::frame::WORD_SIZE;
                let addr = Expr::mem(Expr::bin(BinOp::Plus, base_addr, Expr::Const(offset)));
                Ok((TrExp::Ex(addr), field_ty))
            }
            ast::Var::Subscript(base, idx_exp, pos) => {
                let (base_tr, base_ty) = self.trans_var(base, level, venv, tenv)?;
                let base_actual = SemTy::actual(&base_ty).ok_or(TypeError::NotAnArray(*pos))?;
                let SemTy::Array { element, .. } = &*base_actual else {
                    return Err(TypeError::NotAnArray(*pos));
                };
                let element = element.clone();
                let (idx_tr, idx_ty) = self.trans_exp(idx_exp, level, venv, tenv, None)?;
                if !SemTy::is_int(&idx_ty) {
                    return Err(self.mismatch(idx_exp.pos(), &SemTy::int(), &idx_ty));
                }
                let base_addr = base_tr.un_ex(self.interner);
                let idx_val = idx_tr.un_ex(self.interner);
                let byte_off = Expr::bin(BinOp::Mul, idx_val, Expr::Const(crate::frame::WORD_SIZE));
                let addr = Expr::mem(Expr::bin(BinOp::Plus, base_addr, byte_off));
                Ok((TrExp::Ex(addr), element))
            }
        }
    }

    // ---------------------------------------------------------------
    // Types
    // ---------------------------------------------------------------

    fn trans_ty(&mut self, ty: &ast::Ty, tenv: &TypeEnv) -> TResult<Ty> {
        match ty {
            ast::Ty::Name(sym, pos) => tenv.get(*sym).cloned().ok_or(TypeError::UndefinedType(*pos, *sym)),
            ast::Ty::Array(sym, pos) => {
                let element = tenv.get(*sym).cloned().ok_or(TypeError::UndefinedType(*pos, *sym))?;
                Ok(std::rc::Rc::new(SemTy::Array { element, id: self.type_ids.fresh() }))
            }
            ast::Ty::Record(fields, pos) => {
                let mut seen = HashSet::new();
                let mut out = Vec::with_capacity(fields.len());
                for f in fields {
                    if !seen.insert(f.name) {
                        return Err(TypeError::DuplicateRecordField(f.pos, f.name));
                    }
                    let fty = tenv.get(f.typ).cloned().ok_or(TypeError::UndefinedType(f.pos, f.typ))?;
                    out.push((f.name, fty));
                }
                let _ = pos;
                Ok(std::rc::Rc::new(SemTy::Record { fields: out, id: self.type_ids.fresh() }))
            }
        }
    }

    fn mismatch(&self, pos: crate::position::Pos, expected: &Ty, found: &Ty) -> TypeError {
        TypeError::TypeMismatch { pos, expected: SemTy::describe(expected), found: SemTy::describe(found) }
    }

    // ---------------------------------------------------------------
    // Expressions
    // ---------------------------------------------------------------

    fn trans_exp(
        &mut self,
        exp: &ast::Exp,
        level: &Level,
        venv: &ValueEnv,
        tenv: &TypeEnv,
        break_label: Option<Label>,
    ) -> TResult<(TrExp, Ty)> {
        match exp {
            ast::Exp::Var(v) => self.trans_var(v, level, venv, tenv),
            ast::Exp::Nil(_) => Ok((TrExp::Ex(Expr::Const(0)), SemTy::nil())),
            ast::Exp::Int(n, _) => Ok((TrExp::Ex(Expr::Const(*n as i32)), SemTy::int())),
            ast::Exp::Str(s, _) => {
                let label = self.translator.string_fragment(self.interner, s);
                Ok((TrExp::Ex(Expr::Name(label)), SemTy::string()))
            }
            ast::Exp::Break(pos) => match break_label {
                Some(l) => Ok((TrExp::Nx(Stmt::Jump(Box::new(Expr::Name(l)), vec![l])), SemTy::unit())),
                None => Err(TypeError::BreakOutsideLoop(*pos)),
            },
            ast::Exp::Call { func, args, pos } => self.trans_call(*func, args, *pos, level, venv, tenv, break_label),
            ast::Exp::Oper { left, op, right } => self.trans_oper(left, op, right, level, venv, tenv, break_label),
            ast::Exp::Record { fields, typ, pos } => self.trans_record(fields, *typ, *pos, level, venv, tenv, break_label),
            ast::Exp::Seq(exps, _) => self.trans_seq(exps, level, venv, tenv, break_label),
            ast::Exp::Assign { var, exp, pos } => self.trans_assign(var, exp, *pos, level, venv, tenv, break_label),
            ast::Exp::If { pred, then, els, pos } => self.trans_if(pred, then, els.as_deref(), *pos, level, venv, tenv, break_label),
            ast::Exp::While { pred, body, pos } => self.trans_while(pred, body, *pos, level, venv, tenv),
            ast::Exp::For { var, escape, lo, hi, body, pos } => {
                self.trans_for(*var, *escape, lo, hi, body, *pos, level, venv, tenv)
            }
            ast::Exp::Let { decls, body, pos } => self.trans_let(decls, body, *pos, level, venv, tenv, break_label),
            ast::Exp::Array { typ, size, init, pos } => self.trans_array(*typ, size, init, *pos, level, venv, tenv, break_label),
        }
    }

    fn trans_call(
        &mut self,
        func: Symbol,
        args: &[ast::Exp],
        pos: crate::position::Pos,
        level: &Level,
        venv: &ValueEnv,
        tenv: &TypeEnv,
        break_label: Option<Label>,
    ) -> TResult<(TrExp, Ty)> {
        let Some(entry) = venv.get(func) else {
            return Err(TypeError::UndefinedFunction(pos, func));
        };
        let ValueEntry::Fun { level: def_level, label, formals, result } = entry else {
            return Err(TypeError::NotAFunction(pos, func));
        };
        let (def_level, label, formals, result) = (def_level.clone(), *label, formals.clone(), result.clone());
        if args.len() != formals.len() {
            return Err(TypeError::ArityMismatch { pos, expected: formals.len(), found: args.len() });
        }
        let mut arg_exprs = Vec::with_capacity(args.len());
        for (a, want) in args.iter().zip(formals.iter()) {
            let (a_tr, a_ty) = self.trans_exp(a, level, venv, tenv, break_label)?;
            if !SemTy::compatible(&a_ty, want) {
                return Err(self.mismatch(a.pos(), want, &a_ty));
            }
            arg_exprs.push(a_tr.un_ex(self.interner));
        }
        let call = match def_level {
            // A built-in: no enclosing Tiger frame, hence no static link.
            None => Expr::call(Expr::Name(label), arg_exprs),
            Some(def_level) => {
                // The static link argument is the address of the callee's
                // *parent* frame, as seen from the call site.
                let target = def_level.parent_level().expect("user function level always has a parent");
                let link = level.static_link_to(&target, self.regs);
                let mut all = Vec::with_capacity(arg_exprs.len() + 1);
                all.push(link);
                all.extend(arg_exprs);
                Expr::call(Expr::Name(label), all)
            }
        };
        Ok((TrExp::Ex(call), result))
    }

    fn trans_oper(
        &mut self,
        left: &ast::Exp,
        op: &ast::OperatorWithPos,
        right: &ast::Exp,
        level: &Level,
        venv: &ValueEnv,
        tenv: &TypeEnv,
        break_label: Option<Label>,
    ) -> TResult<(TrExp, Ty)> {
        use ast::Operator as O;

        // `&` and `|` short-circuit on the unconverted Cx operands, never
        // lowering to integer multiplication.
        if matches!(op.op, O::And | O::Or) {
            let (l_tr, l_ty) = self.trans_exp(left, level, venv, tenv, break_label)?;
            if !SemTy::is_int(&l_ty) {
                return Err(self.mismatch(left.pos(), &SemTy::int(), &l_ty));
            }
            let (r_tr, r_ty) = self.trans_exp(right, level, venv, tenv, break_label)?;
            if !SemTy::is_int(&r_ty) {
                return Err(self.mismatch(right.pos(), &SemTy::int(), &r_ty));
            }
            let l_cx = l_tr.un_cx();
            let r_cx = r_tr.un_cx();
            let second = self.interner.new_label();
            let combined: Box<dyn FnOnce(Label, Label) -> Stmt> = if matches!(op.op, O::And) {
                Box::new(move |t, f| Stmt::seq(l_cx(second, f), Stmt::seq(Stmt::Label(second), r_cx(t, f))))
            } else {
                Box::new(move |t, f| Stmt::seq(l_cx(t, second), Stmt::seq(Stmt::Label(second), r_cx(t, f))))
            };
            return Ok((TrExp::Cx(combined), SemTy::int()));
        }

        let (l_tr, l_ty) = self.trans_exp(left, level, venv, tenv, break_label)?;
        let (r_tr, r_ty) = self.trans_exp(right, level, venv, tenv, break_label)?;

        match op.op {
            O::Plus | O::Minus | O::Mul | O::Div => {
                if !SemTy::is_int(&l_ty) {
                    return Err(self.mismatch(left.pos(), &SemTy::int(), &l_ty));
                }
                if !SemTy::is_int(&r_ty) {
                    return Err(self.mismatch(right.pos(), &SemTy::int(), &r_ty));
                }
                let bop = match op.op {
                    O::Plus => BinOp::Plus,
                    O::Minus => BinOp::Minus,
                    O::Mul => BinOp::Mul,
                    O::Div => BinOp::Div,
                    _ => unreachable!(),
                };
                let e = Expr::bin(bop, l_tr.un_ex(self.interner), r_tr.un_ex(self.interner));
                Ok((TrExp::Ex(e), SemTy::int()))
            }
            O::Lt | O::Le | O::Gt | O::Ge => {
                let relop = match op.op {
                    O::Lt => RelOp::Lt,
                    O::Le => RelOp::Le,
                    O::Gt => RelOp::Gt,
                    O::Ge => RelOp::Ge,
                    _ => unreachable!(),
                };
                if SemTy::is_int(&l_ty) && SemTy::is_int(&r_ty) {
                    let l = l_tr.un_ex(self.interner);
                    let r = r_tr.un_ex(self.interner);
                    let cx: Box<dyn FnOnce(Label, Label) -> Stmt> =
                        Box::new(move |t, f| Stmt::CJump(relop, Box::new(l), Box::new(r), t, f));
                    Ok((TrExp::Cx(cx), SemTy::int()))
                } else if SemTy::is_string(&l_ty) && SemTy::is_string(&r_ty) {
                    let l = l_tr.un_ex(self.interner);
                    let r = r_tr.un_ex(self.interner);
                    let cmp = Expr::call(Expr::Name(self.runtime.string_compare), vec![l, r]);
                    let cx: Box<dyn FnOnce(Label, Label) -> Stmt> =
                        Box::new(move |t, f| Stmt::CJump(relop, Box::new(cmp), Box::new(Expr::Const(0)), t, f));
                    Ok((TrExp::Cx(cx), SemTy::int()))
                } else {
                    Err(self.mismatch(right.pos(), &l_ty, &r_ty))
                }
            }
            O::Eq | O::Neq => {
                if !SemTy::compatible(&l_ty, &r_ty) {
                    return Err(self.mismatch(right.pos(), &l_ty, &r_ty));
                }
                let relop = if matches!(op.op, O::Eq) { RelOp::Eq } else { RelOp::Ne };
                if SemTy::is_string(&l_ty) || SemTy::is_string(&r_ty) {
                    let l = l_tr.un_ex(self.interner);
                    let r = r_tr.un_ex(self.interner);
                    let call = Expr::call(Expr::Name(self.runtime.string_equal), vec![l, r]);
                    // stringEqual returns 1 for equal, 0 otherwise; Eq wants
                    // the result != 0, Neq wants it == 0.
                    let want = if matches!(op.op, O::Eq) { RelOp::Ne } else { RelOp::Eq };
                    let cx: Box<dyn FnOnce(Label, Label) -> Stmt> =
                        Box::new(move |t, f| Stmt::CJump(want, Box::new(call), Box::new(Expr::Const(0)), t, f));
                    Ok((TrExp::Cx(cx), SemTy::int()))
                } else {
                    // Int, records, arrays, and Nil compare by raw value/address.
                    let l = l_tr.un_ex(self.interner);
                    let r = r_tr.un_ex(self.interner);
                    let cx: Box<dyn FnOnce(Label, Label) -> Stmt> =
                        Box::new(move |t, f| Stmt::CJump(relop, Box::new(l), Box::new(r), t, f));
                    Ok((TrExp::Cx(cx), SemTy::int()))
                }
            }
            O::And | O::Or => unreachable!("handled above"),
        }
    }

    fn trans_record(
        &mut self,
        fields: &[ast::RecordField],
        typ: Symbol,
        pos: crate::position::Pos,
        level: &Level,
        venv: &ValueEnv,
        tenv: &TypeEnv,
        break_label: Option<Label>,
    ) -> TResult<(TrExp, Ty)> {
        let ty = tenv.get(typ).cloned().ok_or(TypeError::UndefinedType(pos, typ))?;
        let actual = SemTy::actual(&ty).ok_or(TypeError::NotARecord(pos))?;
        let SemTy::Record { fields: decl_fields, .. } = &*actual else {
            return Err(TypeError::NotARecord(pos));
        };
        if fields.len() != decl_fields.len() {
            return Err(TypeError::ArityMismatch { pos, expected: decl_fields.len(), found: fields.len() });
        }
        let decl_fields = decl_fields.clone();
        let mut values = Vec::with_capacity(fields.len());
        for (given, (decl_name, decl_ty)) in fields.iter().zip(decl_fields.iter()) {
            if given.ident != *decl_name {
                return Err(TypeError::UndefinedField(given.pos, given.ident));
            }
            let (v_tr, v_ty) = self.trans_exp(&given.expr, level, venv, tenv, break_label)?;
            if !SemTy::compatible(&v_ty, decl_ty) {
                return Err(self.mismatch(given.pos, decl_ty, &v_ty));
            }
            values.push(v_tr.un_ex(self.interner));
        }
        let r = self.interner.new_temp();
        let bytes = decl_fields.len() as i32 * crate::frame::WORD_SIZE;
        let mut stmts = vec![Stmt::mov(
            Expr::Temp(r),
            Expr::call(Expr::Name(self.runtime.alloc_record), vec![Expr::Const(bytes)]),
        )];
        for (i, v) in values.into_iter().enumerate() {
            let off = i as i32 * crate::frame::WORD_SIZE;
            let addr = Expr::mem(Expr::bin(BinOp::Plus, Expr::Temp(r), Expr::Const(off)));
            stmts.push(Stmt::mov(addr, v));
        }
        let body = Stmt::seq_all(stmts);
        Ok((TrExp::Ex(Expr::es_eq(body, Expr::Temp(r))), ty))
    }

    fn trans_array(
        &mut self,
        typ: Symbol,
        size: &ast::Exp,
        init: &ast::Exp,
        pos: crate::position::Pos,
        level: &Level,
        venv: &ValueEnv,
        tenv: &TypeEnv,
        break_label: Option<Label>,
    ) -> TResult<(TrExp, Ty)> {
        let ty = tenv.get(typ).cloned().ok_or(TypeError::UndefinedType(pos, typ))?;
        let actual = SemTy::actual(&ty).ok_or(TypeError::NotAnArray(pos))?;
        let SemTy::Array { element, .. } = &*actual else {
            return Err(TypeError::NotAnArray(pos));
        };
        let element = element.clone();
        let (size_tr, size_ty) = self.trans_exp(size, level, venv, tenv, break_label)?;
        if !SemTy::is_int(&size_ty) {
            return Err(self.mismatch(size.pos(), &SemTy::int(), &size_ty));
        }
        let (init_tr, init_ty) = self.trans_exp(init, level, venv, tenv, break_label)?;
        if !SemTy::compatible(&init_ty, &element) {
            return Err(self.mismatch(init.pos(), &element, &init_ty));
        }
        let size_e = size_tr.un_ex(self.interner);
        let init_e = init_tr.un_ex(self.interner);
        let call = Expr::call(Expr::Name(self.runtime.init_array), vec![size_e, init_e]);
        Ok((TrExp::Ex(call), ty))
    }

    fn trans_seq(
        &mut self,
        exps: &[ast::Exp],
        level: &Level,
        venv: &ValueEnv,
        tenv: &TypeEnv,
        break_label: Option<Label>,
    ) -> TResult<(TrExp, Ty)> {
        if exps.is_empty() {
            return Ok((TrExp::unit(), SemTy::unit()));
        }
        let mut stmts = Vec::new();
        let mut last_tr = None;
        let mut last_ty = SemTy::unit();
        for (i, e) in exps.iter().enumerate() {
            let (tr, ty) = self.trans_exp(e, level, venv, tenv, break_label)?;
            if i + 1 == exps.len() {
                last_tr = Some(tr);
                last_ty = ty;
            } else {
                stmts.push(tr.un_nx(self.interner));
            }
        }
        let last_tr = last_tr.expect("exps non-empty");
        if stmts.is_empty() {
            return Ok((last_tr, last_ty));
        }
        let prelude = Stmt::seq_all(stmts);
        let combined = match last_tr {
            TrExp::Ex(e) => TrExp::Ex(Expr::es_eq(prelude, e)),
            TrExp::Nx(s) => TrExp::Nx(Stmt::seq(prelude, s)),
            TrExp::Cx(f) => TrExp::Cx(Box::new(move |t, fl| Stmt::seq(prelude, f(t, fl)))),
        };
        Ok((combined, last_ty))
    }

    fn trans_assign(
        &mut self,
        var: &ast::Var,
        exp: &ast::Exp,
        pos: crate::position::Pos,
        level: &Level,
        venv: &ValueEnv,
        tenv: &TypeEnv,
        break_label: Option<Label>,
    ) -> TResult<(TrExp, Ty)> {
        if let ast::Var::Simple(sym, vpos) = var {
            if let Some(ValueEntry::Var { read_only: true, .. }) = venv.get(*sym) {
                let _ = vpos;
                return Err(TypeError::NotAssignable(pos));
            }
        }
        let (var_tr, var_ty) = self.trans_var(var, level, venv, tenv)?;
        let (exp_tr, exp_ty) = self.trans_exp(exp, level, venv, tenv, break_label)?;
        if !SemTy::compatible(&exp_ty, &var_ty) {
            return Err(self.mismatch(exp.pos(), &var_ty, &exp_ty));
        }
        let TrExp::Ex(addr) = var_tr else {
            return Err(TypeError::NotAssignable(pos));
        };
        let rhs = exp_tr.un_ex(self.interner);
        Ok((TrExp::Nx(Stmt::mov(addr, rhs)), SemTy::unit()))
    }

    fn trans_if(
        &mut self,
        pred: &ast::Exp,
        then: &ast::Exp,
        els: Option<&ast::Exp>,
        pos: crate::position::Pos,
        level: &Level,
        venv: &ValueEnv,
        tenv: &TypeEnv,
        break_label: Option<Label>,
    ) -> TResult<(TrExp, Ty)> {
        let (pred_tr, pred_ty) = self.trans_exp(pred, level, venv, tenv, break_label)?;
        if !SemTy::is_int(&pred_ty) {
            return Err(self.mismatch(pred.pos(), &SemTy::int(), &pred_ty));
        }
        let (then_tr, then_ty) = self.trans_exp(then, level, venv, tenv, break_label)?;

        let Some(els) = els else {
            if !matches!(&*SemTy::actual(&then_ty).unwrap_or_else(SemTy::unit), SemTy::Unit) {
                return Err(self.mismatch(then.pos(), &SemTy::unit(), &then_ty));
            }
            let t = self.interner.new_label();
            let f = self.interner.new_label();
            let pred_cx = pred_tr.un_cx();
            let then_stmt = then_tr.un_nx(self.interner);
            let stmt = Stmt::seq_all(vec![pred_cx(t, f), Stmt::Label(t), then_stmt, Stmt::Label(f)]);
            return Ok((TrExp::Nx(stmt), SemTy::unit()));
        };

        let (els_tr, els_ty) = self.trans_exp(els, level, venv, tenv, break_label)?;
        if !SemTy::compatible(&then_ty, &els_ty) {
            return Err(self.mismatch(els.pos(), &then_ty, &els_ty));
        }
        let result_ty = if matches!(&*SemTy::actual(&then_ty).unwrap(), SemTy::Nil) { els_ty } else { then_ty };

        let t = self.interner.new_label();
        let f = self.interner.new_label();
        let join = self.interner.new_label();
        let pred_cx = pred_tr.un_cx();

        if matches!(&*SemTy::actual(&result_ty).unwrap_or_else(SemTy::unit), SemTy::Unit) {
            let then_stmt = then_tr.un_nx(self.interner);
            let els_stmt = els_tr.un_nx(self.interner);
            let stmt = Stmt::seq_all(vec![
                pred_cx(t, f),
                Stmt::Label(t),
                then_stmt,
                Stmt::Jump(Box::new(Expr::Name(join)), vec![join]),
                Stmt::Label(f),
                els_stmt,
                Stmt::Label(join),
            ]);
            Ok((TrExp::Nx(stmt), SemTy::unit()))
        } else {
            let r = self.interner.new_temp();
            let then_e = then_tr.un_ex(self.interner);
            let els_e = els_tr.un_ex(self.interner);
            let stmt = Stmt::seq_all(vec![
                pred_cx(t, f),
                Stmt::Label(t),
                Stmt::mov(Expr::Temp(r), then_e),
                Stmt::Jump(Box::new(Expr::Name(join)), vec![join]),
                Stmt::Label(f),
                Stmt::mov(Expr::Temp(r), els_e),
                Stmt::Label(join),
            ]);
            Ok((TrExp::Ex(Expr::es_eq(stmt, Expr::Temp(r))), result_ty))
        }
    }

    fn trans_while(
        &mut self,
        pred: &ast::Exp,
        body: &ast::Exp,
        _pos: crate::position::Pos,
        level: &Level,
        venv: &ValueEnv,
        tenv: &TypeEnv,
    ) -> TResult<(TrExp, Ty)> {
        let test = self.interner.new_label();
        let body_label = self.interner.new_label();
        let done = self.interner.new_label();

        let (pred_tr, pred_ty) = self.trans_exp(pred, level, venv, tenv, None)?;
        if !SemTy::is_int(&pred_ty) {
            return Err(self.mismatch(pred.pos(), &SemTy::int(), &pred_ty));
        }
        let (body_tr, body_ty) = self.trans_exp(body, level, venv, tenv, Some(done))?;
        if !matches!(&*SemTy::actual(&body_ty).unwrap_or_else(SemTy::unit), SemTy::Unit) {
            return Err(self.mismatch(body.pos(), &SemTy::unit(), &body_ty));
        }
        let pred_cx = pred_tr.un_cx();
        let body_stmt = body_tr.un_nx(self.interner);
        let stmt = Stmt::seq_all(vec![
            Stmt::Label(test),
            pred_cx(body_label, done),
            Stmt::Label(body_label),
            body_stmt,
            Stmt::Jump(Box::new(Expr::Name(test)), vec![test]),
            Stmt::Label(done),
        ]);
        Ok((TrExp::Nx(stmt), SemTy::unit()))
    }

    fn trans_for(
        &mut self,
        var: Symbol,
        escape: bool,
        lo: &ast::Exp,
        hi: &ast::Exp,
        body: &ast::Exp,
        _pos: crate::position::Pos,
        level: &Level,
        venv: &ValueEnv,
        tenv: &TypeEnv,
    ) -> TResult<(TrExp, Ty)> {
        let (lo_tr, lo_ty) = self.trans_exp(lo, level, venv, tenv, None)?;
        if !SemTy::is_int(&lo_ty) {
            return Err(self.mismatch(lo.pos(), &SemTy::int(), &lo_ty));
        }
        let (hi_tr, hi_ty) = self.trans_exp(hi, level, venv, tenv, None)?;
        if !SemTy::is_int(&hi_ty) {
            return Err(self.mismatch(hi.pos(), &SemTy::int(), &hi_ty));
        }

        let lo_access = level.alloc_local(self.interner, false);
        let hi_access = level.alloc_local(self.interner, false);
        let i_access = level.alloc_local(self.interner, escape);

        let lo_e = lo_access.simple_var(level, self.regs);
        let hi_e = hi_access.simple_var(level, self.regs);
        let i_e = i_access.simple_var(level, self.regs);

        let venv = venv.bind(var, ValueEntry::Var { ty: SemTy::int(), access: i_access.clone(), read_only: true });
        let done = self.interner.new_label();
        let test = self.interner.new_label();
        let cont = self.interner.new_label();

        let (body_tr, body_ty) = self.trans_exp(body, level, &venv, tenv, Some(done))?;
        if !matches!(&*SemTy::actual(&body_ty).unwrap_or_else(SemTy::unit), SemTy::Unit) {
            return Err(self.mismatch(body.pos(), &SemTy::unit(), &body_ty));
        }
        let body_stmt = body_tr.un_nx(self.interner);

        let stmt = Stmt::seq_all(vec![
            Stmt::mov(lo_e.clone(), lo_tr.un_ex(self.interner)),
            Stmt::mov(hi_e.clone(), hi_tr.un_ex(self.interner)),
            Stmt::mov(i_e.clone(), lo_e.clone()),
            // `lo > hi`: zero iterations.
            Stmt::CJump(RelOp::Gt, Box::new(lo_e), Box::new(hi_e.clone()), done, test),
            Stmt::Label(test),
            body_stmt,
            // Stop *after* the body runs with `i == hi`, rather than
            // incrementing first and risking overflow at `i == MAX_INT`.
            Stmt::CJump(RelOp::Eq, Box::new(i_e.clone()), Box::new(hi_e), done, cont),
            Stmt::Label(cont),
            Stmt::mov(i_e.clone(), Expr::bin(BinOp::Plus, i_e, Expr::Const(1))),
            Stmt::Jump(Box::new(Expr::Name(test)), vec![test]),
            Stmt::Label(done),
        ]);
        Ok((TrExp::Nx(stmt), SemTy::unit()))
    }

    // ---------------------------------------------------------------
    // `let` and its three-phase declaration walk
    // ---------------------------------------------------------------

    fn trans_let(
        &mut self,
        decls: &[ast::Declaration],
        body: &ast::Exp,
        _pos: crate::position::Pos,
        level: &Level,
        venv: &ValueEnv,
        tenv: &TypeEnv,
        break_label: Option<Label>,
    ) -> TResult<(TrExp, Ty)> {
        let mut venv = venv.clone();
        let mut tenv = tenv.clone();
        let mut prelude = Vec::new();

        for decl in decls {
            match decl {
                ast::Declaration::Types(group) => {
                    tenv = self.trans_type_group(group, tenv)?;
                }
                ast::Declaration::Functions(group) => {
                    venv = self.trans_function_group(group, level, venv, &tenv)?;
                }
                ast::Declaration::Var(v) => {
                    let (new_venv, stmt) = self.trans_var_decl(v, level, &venv, &tenv, break_label)?;
                    venv = new_venv;
                    prelude.push(stmt);
                }
            }
        }

        let (body_tr, body_ty) = self.trans_exp(body, level, &venv, &tenv, break_label)?;
        if prelude.is_empty() {
            return Ok((body_tr, body_ty));
        }
        let pre = Stmt::seq_all(prelude);
        let combined = match body_tr {
            TrExp::Ex(e) => TrExp::Ex(Expr::es_eq(pre, e)),
            TrExp::Nx(s) => TrExp::Nx(Stmt::seq(pre, s)),
            TrExp::Cx(f) => TrExp::Cx(Box::new(move |t, fl| Stmt::seq(pre, f(t, fl)))),
        };
        Ok((combined, body_ty))
    }

    fn trans_type_group(&mut self, group: &[ast::TypeDecl], tenv: TypeEnv) -> TResult<TypeEnv> {
        let mut seen = HashSet::new();
        for d in group {
            if !seen.insert(d.ty_name) {
                return Err(TypeError::DuplicateTypeDecl(d.pos, d.ty_name));
            }
        }

        // Phase 1: a placeholder for every name in the group, so mutually
        // recursive references resolve against a real `Ty` handle.
        let mut tenv = tenv;
        for d in group {
            tenv = tenv.bind(d.ty_name, SemTy::name_placeholder(d.ty_name));
        }

        // Phase 2: resolve each right-hand side, then settle the
        // placeholder's `resolved` cell in place so every earlier reference
        // observes the resolution transparently.
        for d in group {
            let resolved = self.trans_ty(&d.typ, &tenv)?;
            let placeholder = tenv.get(d.ty_name).expect("bound in phase 1").clone();
            if let SemTy::Name { resolved: cell, .. } = &*placeholder {
                *cell.borrow_mut() = Some(resolved);
            }
        }

        for d in group {
            let placeholder = tenv.get(d.ty_name).expect("bound in phase 1");
            if SemTy::actual(placeholder).is_none() {
                return Err(TypeError::CyclicTypeDecl(d.pos, d.ty_name));
            }
        }

        Ok(tenv)
    }

    fn trans_function_group(
        &mut self,
        group: &[ast::FuncDecl],
        level: &Level,
        venv: ValueEnv,
        tenv: &TypeEnv,
    ) -> TResult<ValueEnv> {
        let mut seen = HashSet::new();
        for f in group {
            if !seen.insert(f.name) {
                return Err(TypeError::DuplicateFunctionDecl(f.pos, f.name));
            }
        }

        // Phase 1: a `Fun` entry (level, label, signature) for every
        // sibling, with no body translated yet, so the group can call
        // itself and each other.
        struct Pending {
            child_level: Level,
            result: Ty,
        }
        let mut venv = venv;
        let mut pending = Vec::with_capacity(group.len());
        for f in group {
            let formal_tys = f
                .params
                .iter()
                .map(|p| tenv.get(p.typ).cloned().ok_or(TypeError::UndefinedType(p.pos, p.typ)))
                .collect::<TResult<Vec<_>>>()?;
            let result = match f.result_ty {
                Some(sym) => tenv.get(sym).cloned().ok_or(TypeError::UndefinedType(f.pos, sym))?,
                None => SemTy::unit(),
            };
            let escapes: Vec<bool> = f.params.iter().map(|p| p.escape).collect();
            let fn_name = self.interner.resolve(f.name).to_string();
            let fn_label = self.interner.named_label(&fn_name);
            let child_level = self.fresh_level(level, fn_label, &escapes);
            venv = venv.bind(
                f.name,
                ValueEntry::Fun { level: Some(child_level.clone()), label: fn_label, formals: formal_tys, result: result.clone() },
            );
            pending.push(Pending { child_level, result });
        }

        // Phase 2: translate each body in a fresh scope with its own
        // parameters bound, then close the fragment.
        for (f, p) in group.iter().zip(pending.into_iter()) {
            let mut body_venv = venv.clone();
            for (param, access) in f.params.iter().zip(p.child_level.formals().into_iter()) {
                let ty = tenv.get(param.typ).cloned().ok_or(TypeError::UndefinedType(param.pos, param.typ))?;
                body_venv = body_venv.bind(param.name, ValueEntry::Var { ty, access, read_only: false });
            }
            let (body_tr, body_ty) = self.trans_exp(&f.body, &p.child_level, &body_venv, tenv, None)?;
            if !SemTy::compatible(&body_ty, &p.result) {
                return Err(self.mismatch(f.body.pos(), &p.result, &body_ty));
            }
            self.translator.proc_entry_exit(self.interner, &p.child_level, body_tr);
        }

        Ok(venv)
    }

    fn trans_var_decl(
        &mut self,
        v: &ast::VarDecl,
        level: &Level,
        venv: &ValueEnv,
        tenv: &TypeEnv,
        break_label: Option<Label>,
    ) -> TResult<(ValueEnv, Stmt)> {
        let (init_tr, init_ty) = self.trans_exp(&v.init, level, venv, tenv, break_label)?;
        let declared_ty = match v.typ {
            Some(sym) => {
                let t = tenv.get(sym).cloned().ok_or(TypeError::UndefinedType(v.pos, sym))?;
                if !SemTy::compatible(&init_ty, &t) {
                    return Err(self.mismatch(v.init.pos(), &t, &init_ty));
                }
                t
            }
            None => {
                if matches!(&*SemTy::actual(&init_ty).unwrap_or_else(SemTy::unit), SemTy::Nil) {
                    return Err(TypeError::TypeMismatch {
                        pos: v.pos,
                        expected: "a record type annotation".to_string(),
                        found: "nil".to_string(),
                    });
                }
                init_ty
            }
        };
        let access = level.alloc_local(self.interner, v.escape);
        let addr = access.simple_var(level, self.regs);
        let stmt = Stmt::mov(addr, init_tr.un_ex(self.interner));
        let venv = venv.bind(v.name, ValueEntry::Var { ty: declared_ty, access, read_only: false });
        Ok((venv, stmt))
    }
}
