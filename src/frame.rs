//! MIPS stack-frame layout: formal-parameter accesses, the static-link
//! discipline, and fragment accumulation. A formal lives in the frame (not
//! a register) when it escapes, or when it falls past the fourth argument
//! register.

use crate::symbol::{Interner, Label, Temp};
use crate::tree::{BinOp, Expr, Stmt};

pub const WORD_SIZE: i32 = 4;
pub const ARG_REGS: usize = 4;

/// The fixed set of MIPS machine registers the rest of the compiler refers
/// to by name, allocated once as [`Temp`]s at the start of a compilation
/// (`v0, v1, a0..a3, t0..t9, s0..s7, zero, gp, fp, sp, ra, rv`).
#[derive(Clone, Copy)]
pub struct MachineRegs {
    pub v0: Temp,
    pub v1: Temp,
    pub args: [Temp; ARG_REGS],
    pub callee_saves: [Temp; 8],
    pub caller_saves: [Temp; 10],
    pub zero: Temp,
    pub gp: Temp,
    pub fp: Temp,
    pub sp: Temp,
    pub ra: Temp,
    pub rv: Temp,
}

impl MachineRegs {
    pub fn new(interner: &mut Interner) -> Self {
        let mut t = || interner.new_temp();
        MachineRegs {
            v0: t(),
            v1: t(),
            args: [t(), t(), t(), t()],
            callee_saves: [t(), t(), t(), t(), t(), t(), t(), t()],
            caller_saves: [t(), t(), t(), t(), t(), t(), t(), t(), t(), t()],
            zero: t(),
            gp: t(),
            fp: t(),
            sp: t(),
            ra: t(),
            rv: t(),
        }
    }

    /// The register names the selector/emitter must use in assembly
    /// templates, in the same order the source's `regList` defines them.
    #[must_use]
    pub fn names(&self) -> Vec<(Temp, &'static str)> {
        let mut v = vec![
            (self.args[0], "$a0"), (self.args[1], "$a1"), (self.args[2], "$a2"), (self.args[3], "$a3"),
        ];
        let t_names = ["$t0", "$t1", "$t2", "$t3", "$t4", "$t5", "$t6", "$t7", "$t8", "$t9"];
        for (reg, name) in self.caller_saves.iter().zip(t_names) {
            v.push((*reg, name));
        }
        let s_names = ["$s0", "$s1", "$s2", "$s3", "$s4", "$s5", "$s6", "$s7"];
        for (reg, name) in self.callee_saves.iter().zip(s_names) {
            v.push((*reg, name));
        }
        v.push((self.fp, "$fp"));
        v.push((self.rv, "$rv"));
        v.push((self.sp, "$sp"));
        v.push((self.ra, "$ra"));
        v.push((self.v0, "$v0"));
        v.push((self.v1, "$v1"));
        v.push((self.zero, "$zero"));
        v.push((self.gp, "$gp"));
        v
    }

    /// The genuinely allocatable general-purpose registers, in
    /// register-allocator color order: argument registers, caller-saves,
    /// then callee-saves. Excludes `$fp`/`$sp`/`$ra`/`$v0`/`$v1`/`$zero`/
    /// `$gp`, which have fixed hardware roles and must never be handed out
    /// as an ordinary temp's color.
    #[must_use]
    pub fn precolored(&self) -> Vec<Temp> {
        let mut v: Vec<Temp> = self.args.to_vec();
        v.extend_from_slice(&self.caller_saves);
        v.extend_from_slice(&self.callee_saves);
        v
    }
}

/// Where one formal or local variable lives.
#[derive(Copy, Clone, Debug)]
pub enum FrameAccess {
    InFrame(i32),
    InReg(Temp),
}

impl FrameAccess {
    /// The tree expression that reads/writes this access given the frame
    /// pointer of the frame that *owns* the access, already materialized as
    /// `fp_expr` (used when walking a static-link chain to a non-local
    /// frame; for a local access `fp_expr` is simply `Temp(fp)`).
    #[must_use]
    pub fn materialize(&self, fp_expr: Expr) -> Expr {
        match self {
            FrameAccess::InFrame(offset) => {
                Expr::mem(Expr::bin(BinOp::Plus, fp_expr, Expr::Const(*offset)))
            }
            FrameAccess::InReg(t) => Expr::Temp(*t),
        }
    }
}

/// A function's compile-time stack layout.
#[derive(Clone)]
pub struct Frame {
    pub name: Label,
    pub formals: Vec<FrameAccess>,
    locals: i32,
    /// Statements that copy incoming argument registers into their formal
    /// accesses; prepended to the function body by `Translate`.
    pub shift: Stmt,
}

impl Frame {
    /// Builds the frame for a new function: lays out formal accesses per
    /// the escape/position rule above, and synthesizes the shift
    /// statements that copy the first [`ARG_REGS`] formals out of their
    /// incoming argument registers.
    pub fn new(interner: &mut Interner, regs: &MachineRegs, name: Label, formal_escapes: &[bool]) -> Frame {
        let mut formals = Vec::with_capacity(formal_escapes.len());
        let mut next_offset = WORD_SIZE;
        for (i, &escapes) in formal_escapes.iter().enumerate() {
            let acc = if escapes || i >= ARG_REGS {
                let off = next_offset;
                next_offset += WORD_SIZE;
                FrameAccess::InFrame(off)
            } else {
                FrameAccess::InReg(interner.new_temp())
            };
            formals.push(acc);
        }

        let mut shifts = Vec::new();
        for (i, acc) in formals.iter().enumerate().take(ARG_REGS) {
            let dst = acc.materialize(Expr::Temp(regs.fp));
            shifts.push(Stmt::mov(dst, Expr::Temp(regs.args[i])));
        }
        let shift = if shifts.is_empty() {
            Stmt::exp(Expr::Const(0))
        } else {
            Stmt::seq_all(shifts)
        };

        Frame { name, formals, locals: 0, shift }
    }

    /// Reserves a new local stack slot (or register, for a non-escaping
    /// local) and returns its access.
    pub fn alloc_local(&mut self, interner: &mut Interner, escapes: bool) -> FrameAccess {
        if escapes {
            self.locals += 1;
            FrameAccess::InFrame(-(self.locals * WORD_SIZE))
        } else {
            FrameAccess::InReg(interner.new_temp())
        }
    }

    #[must_use]
    pub fn locals_count(&self) -> i32 { self.locals }

    /// Total frame size in bytes, rounded to an 8-byte boundary as MIPS
    /// `o32` convention expects.
    #[must_use]
    pub fn frame_size(&self) -> i32 {
        let in_frame_formals = self.formals.iter().filter(|f| matches!(f, FrameAccess::InFrame(_))).count() as i32;
        let raw = WORD_SIZE + self.locals * WORD_SIZE + in_frame_formals * WORD_SIZE;
        (raw + 7) & !7
    }
}

/// A unit of compiler output: either a procedure body with its frame, or a
/// named string constant destined for `.data`.
pub enum Fragment {
    Proc { body: Stmt, frame: Frame },
    Str { label: Label, text: String },
}
