//! MIPS instruction selection by maximal munch: `munch_exp`/`munch_stm`
//! recursively tile the tree IR into `Instr`s, preferring the largest
//! pattern that matches at each node.

use crate::assem::Instr;
use crate::frame::MachineRegs;
use crate::symbol::{Interner, Label, Temp};
use crate::tree::{BinOp, Expr, RelOp, Stmt};

pub struct Selector<'a> {
    regs: &'a MachineRegs,
    instrs: Vec<Instr>,
}

impl<'a> Selector<'a> {
    #[must_use]
    pub fn new(regs: &'a MachineRegs) -> Self { Selector { regs, instrs: Vec::new() } }

    #[must_use]
    pub fn finish(self) -> Vec<Instr> { self.instrs }

    fn emit(&mut self, i: Instr) { self.instrs.push(i); }

    /// Selects instructions for every statement in a canonicalized trace.
    pub fn munch_stmts(&mut self, stmts: &[Stmt], interner: &mut Interner) {
        for s in stmts {
            self.munch_stmt(s, interner);
        }
    }

    fn munch_stmt(&mut self, s: &Stmt, interner: &mut Interner) {
        match s {
            Stmt::Label(l) => self.emit(Instr::Label { template: String::new(), label: *l }),

            Stmt::Move(dst, src) => self.munch_move(dst, src, interner),

            Stmt::Exp(e) => {
                if let Expr::Call(..) = &**e {
                    self.munch_call(e, None, interner);
                } else {
                    self.munch_exp(e, interner);
                }
            }

            Stmt::Jump(e, labs) => {
                if matches!(&**e, Expr::Name(_)) {
                    self.emit(Instr::Oper { template: "b `j0\n".to_string(), srcs: vec![], dsts: vec![], jumps: labs.clone(), is_exit: true });
                } else {
                    let t = self.munch_exp(e, interner);
                    self.emit(Instr::Oper { template: "jr `s0\n".to_string(), srcs: vec![t], dsts: vec![], jumps: labs.clone(), is_exit: true });
                }
            }

            Stmt::CJump(op, a, b, t, f) => self.munch_cjump(*op, a, b, *t, *f, interner),

            Stmt::Seq(..) => unreachable!("canonicalized trace must be Seq-free"),
        }
    }

    fn munch_move(&mut self, dst: &Expr, src: &Expr, interner: &mut Interner) {
        match (dst, src) {
            // Move/Mem(+,a,Const) <- e : sw
            (Expr::Mem(addr), _) => {
                if let Expr::BinOp(BinOp::Plus, base, off) = &**addr {
                    if let Expr::Const(c) = &**off {
                        let b = self.munch_exp(base, interner);
                        let s = self.munch_exp(src, interner);
                        self.emit(Instr::Oper {
                            template: format!("sw `s0, {c}(`s1)\n"),
                            srcs: vec![s, b],
                            dsts: vec![],
                            jumps: vec![],
                            is_exit: false,
                        });
                        return;
                    }
                }
                let a = self.munch_exp(addr, interner);
                let s = self.munch_exp(src, interner);
                self.emit(Instr::Oper { template: "sw `s0, 0(`s1)\n".to_string(), srcs: vec![s, a], dsts: vec![], jumps: vec![], is_exit: false });
            }

            // Move/Temp <- Mem(+,a,Const): lw
            (Expr::Temp(t), Expr::Mem(addr)) => {
                if let Expr::BinOp(BinOp::Plus, base, off) = &**addr {
                    if let Expr::Const(c) = &**off {
                        let b = self.munch_exp(base, interner);
                        self.emit(Instr::Oper {
                            template: format!("lw `d0, {c}(`s0)\n"),
                            srcs: vec![b],
                            dsts: vec![*t],
                            jumps: vec![],
                            is_exit: false,
                        });
                        return;
                    }
                }
                let a = self.munch_exp(addr, interner);
                self.emit(Instr::Oper { template: "lw `d0, 0(`s0)\n".to_string(), srcs: vec![a], dsts: vec![*t], jumps: vec![], is_exit: false });
            }

            // Move/Temp <- Call: generated through the ordinary call-lowering
            // path, with the return value copied into `t`.
            (Expr::Temp(t), Expr::Call(..)) => {
                self.munch_call(src, Some(*t), interner);
            }

            // Move/Temp <- Temp: emitted as its own `Instr::Move` so the
            // allocator can try to coalesce it away.
            (Expr::Temp(t), Expr::Temp(s)) => {
                self.emit(Instr::Move { template: "move `d0, `s0\n".to_string(), src: *s, dst: *t });
            }

            (Expr::Temp(t), _) => {
                let s = self.munch_exp(src, interner);
                self.emit(Instr::Move { template: "move `d0, `s0\n".to_string(), src: s, dst: *t });
            }

            _ => unreachable!("Translate never emits a Move with a non-Temp/Mem destination"),
        }
    }

    fn munch_cjump(&mut self, op: RelOp, a: &Expr, b: &Expr, t: Label, f: Label, interner: &mut Interner) {
        // CJump against a literal zero collapses to a one-operand branch.
        if let Expr::Const(0) = b {
            let ta = self.munch_exp(a, interner);
            let template = match op {
                RelOp::Eq => "beqz `s0, `j0\n",
                RelOp::Ne => "bnez `s0, `j0\n",
                RelOp::Lt => "bltz `s0, `j0\n",
                RelOp::Le => "blez `s0, `j0\n",
                RelOp::Gt => "bgtz `s0, `j0\n",
                RelOp::Ge => "bgez `s0, `j0\n",
                _ => "beqz `s0, `j0\n",
            };
            self.emit(Instr::Oper { template: template.to_string(), srcs: vec![ta], dsts: vec![], jumps: vec![t, f], is_exit: false });
            self.emit(Instr::Oper { template: "b `j0\n".to_string(), srcs: vec![], dsts: vec![], jumps: vec![f], is_exit: true });
            return;
        }
        let ta = self.munch_exp(a, interner);
        let tb = self.munch_exp(b, interner);
        let mnemonic = match op {
            RelOp::Eq => "beq",
            RelOp::Ne => "bne",
            RelOp::Lt => "blt",
            RelOp::Le => "ble",
            RelOp::Gt => "bgt",
            RelOp::Ge => "bge",
            RelOp::Ult => "bltu",
            RelOp::Ule => "bleu",
            RelOp::Ugt => "bgtu",
            RelOp::Uge => "bgeu",
        };
        self.emit(Instr::Oper {
            template: format!("{mnemonic} `s0, `s1, `j0\n"),
            srcs: vec![ta, tb],
            dsts: vec![],
            jumps: vec![t, f],
            is_exit: false,
        });
        self.emit(Instr::Oper { template: "b `j0\n".to_string(), srcs: vec![], dsts: vec![], jumps: vec![f], is_exit: true });
    }

    /// Lowers `Call(Name(f), args)` per the MIPS `o32` convention: the
    /// first four arguments in `$a0..$a3`, the rest on the stack at
    /// `[sp + i*4]`; every caller-saved register is listed as a `def` so
    /// the allocator never keeps a live value across the call in one.
    fn munch_call(&mut self, call: &Expr, result: Option<Temp>, interner: &mut Interner) -> Temp {
        let Expr::Call(f, args) = call else { unreachable!("munch_call requires a Call") };
        let Expr::Name(label) = &**f else { unreachable!("indirect calls are not produced by Translate") };

        let mut arg_temps = Vec::with_capacity(args.len());
        for a in args {
            arg_temps.push(self.munch_exp(a, interner));
        }

        let mut srcs = Vec::new();
        for (i, t) in arg_temps.iter().enumerate().take(4) {
            self.emit(Instr::Move { template: "move `d0, `s0\n".to_string(), src: *t, dst: self.regs.args[i] });
            srcs.push(self.regs.args[i]);
        }
        for (i, t) in arg_temps.iter().enumerate().skip(4) {
            let off = (i - 4) as i32 * crate::frame::WORD_SIZE;
            self.emit(Instr::Oper {
                template: format!("sw `s0, {off}(`s1)\n"),
                srcs: vec![*t, self.regs.sp],
                dsts: vec![],
                jumps: vec![],
                is_exit: false,
            });
        }

        let mut dsts = vec![self.regs.ra, self.regs.rv];
        dsts.extend_from_slice(&self.regs.args);
        dsts.extend_from_slice(&self.regs.caller_saves);

        self.emit(Instr::Oper {
            template: "jal `j0\n".to_string(),
            srcs,
            dsts,
            jumps: vec![*label],
            is_exit: false,
        });

        let dst = result.unwrap_or_else(|| interner.new_temp());
        self.emit(Instr::Move { template: "move `d0, `s0\n".to_string(), src: self.regs.rv, dst });
        dst
    }

    /// Munches `e`, returning the temp holding its value.
    fn munch_exp(&mut self, e: &Expr, interner: &mut Interner) -> Temp {
        match e {
            Expr::Temp(t) => *t,

            Expr::Const(c) => {
                let d = interner.new_temp();
                self.emit(Instr::Oper { template: format!("li `d0, {c}\n"), srcs: vec![], dsts: vec![d], jumps: vec![], is_exit: false });
                d
            }

            Expr::Name(l) => {
                let d = interner.new_temp();
                self.emit(Instr::Oper { template: "la `d0, `j0\n".to_string(), srcs: vec![], dsts: vec![d], jumps: vec![*l], is_exit: false });
                d
            }

            // BinOp(+, t, Const): addi
            Expr::BinOp(BinOp::Plus, a, b) if matches!(&**b, Expr::Const(_)) => {
                let Expr::Const(c) = &**b else { unreachable!() };
                let ta = self.munch_exp(a, interner);
                let d = interner.new_temp();
                self.emit(Instr::Oper { template: format!("addi `d0, `s0, {c}\n"), srcs: vec![ta], dsts: vec![d], jumps: vec![], is_exit: false });
                d
            }
            Expr::BinOp(BinOp::Plus, a, b) if matches!(&**a, Expr::Const(_)) => self.munch_exp(&Expr::bin(BinOp::Plus, (**b).clone(), (**a).clone()), interner),

            // BinOp(-, t, Const): addi with the negated constant.
            Expr::BinOp(BinOp::Minus, a, b) if matches!(&**b, Expr::Const(_)) => {
                let Expr::Const(c) = &**b else { unreachable!() };
                let ta = self.munch_exp(a, interner);
                let d = interner.new_temp();
                self.emit(Instr::Oper { template: format!("addi `d0, `s0, {}\n", -c), srcs: vec![ta], dsts: vec![d], jumps: vec![], is_exit: false });
                d
            }

            Expr::BinOp(op, a, b) => {
                let ta = self.munch_exp(a, interner);
                let tb = self.munch_exp(b, interner);
                let d = interner.new_temp();
                let template = match op {
                    BinOp::Plus => "add `d0, `s0, `s1\n",
                    BinOp::Minus => "sub `d0, `s0, `s1\n",
                    BinOp::Mul => "mul `d0, `s0, `s1\n",
                    BinOp::Div => "div `d0, `s0, `s1\n",
                    BinOp::And => "and `d0, `s0, `s1\n",
                    BinOp::Or => "or `d0, `s0, `s1\n",
                    BinOp::Xor => "xor `d0, `s0, `s1\n",
                    BinOp::LShift => "sllv `d0, `s0, `s1\n",
                    BinOp::RShift => "srlv `d0, `s0, `s1\n",
                    BinOp::ArShift => "srav `d0, `s0, `s1\n",
                };
                self.emit(Instr::Oper { template: template.to_string(), srcs: vec![ta, tb], dsts: vec![d], jumps: vec![], is_exit: false });
                d
            }

            // Mem(+, a, Const): lw
            Expr::Mem(addr) => {
                if let Expr::BinOp(BinOp::Plus, base, off) = &**addr {
                    if let Expr::Const(c) = &**off {
                        let b = self.munch_exp(base, interner);
                        let d = interner.new_temp();
                        self.emit(Instr::Oper { template: format!("lw `d0, {c}(`s0)\n"), srcs: vec![b], dsts: vec![d], jumps: vec![], is_exit: false });
                        return d;
                    }
                }
                let a = self.munch_exp(addr, interner);
                let d = interner.new_temp();
                self.emit(Instr::Oper { template: "lw `d0, 0(`s0)\n".to_string(), srcs: vec![a], dsts: vec![d], jumps: vec![], is_exit: false });
                d
            }

            Expr::Call(..) => self.munch_call(e, None, interner),

            Expr::EsEq(..) => unreachable!("canonicalized trace must be EsEq-free"),
        }
    }
}

/// Selects instructions for one procedure's canonicalized body.
#[must_use]
pub fn select(stmts: &[Stmt], regs: &MachineRegs, interner: &mut Interner) -> Vec<Instr> {
    let mut sel = Selector::new(regs);
    sel.munch_stmts(stmts, interner);
    sel.finish()
}
