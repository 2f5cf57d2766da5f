//! Target assembly instructions with symbolic operands, emitted by the
//! instruction selector and consumed by the register allocator and the
//! final emitter: an operation (`Oper`), a register-to-register move
//! (`Move`), or a label.

use crate::symbol::{Label, Temp};

/// One target instruction. `template` is assembly text with `` `s0.. ``,
/// `` `d0.. ``, `` `j0.. `` placeholders resolved by index against
/// `srcs`/`dsts`/`jumps` at emit time.
#[derive(Clone, Debug)]
pub enum Instr {
    /// `is_exit` is `false` for an instruction that also falls through to
    /// the next one in program order despite listing jump targets (a
    /// conditional branch, or a `jal` call returning to its successor), and
    /// `true` for one that never does (an unconditional branch or an
    /// indirect jump). Ignored when `jumps` is empty.
    Oper { template: String, srcs: Vec<Temp>, dsts: Vec<Temp>, jumps: Vec<Label>, is_exit: bool },
    Label { template: String, label: Label },
    Move { template: String, src: Temp, dst: Temp },
}

impl Instr {
    #[must_use]
    pub fn uses(&self) -> &[Temp] {
        match self {
            Instr::Oper { srcs, .. } => srcs,
            Instr::Move { src, .. } => std::slice::from_ref(src),
            Instr::Label { .. } => &[],
        }
    }

    #[must_use]
    pub fn defs(&self) -> &[Temp] {
        match self {
            Instr::Oper { dsts, .. } => dsts,
            Instr::Move { dst, .. } => std::slice::from_ref(dst),
            Instr::Label { .. } => &[],
        }
    }

    #[must_use]
    pub fn jumps(&self) -> Option<&[Label]> {
        match self {
            Instr::Oper { jumps, .. } if !jumps.is_empty() => Some(jumps),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_move(&self) -> bool { matches!(self, Instr::Move { .. }) }

    /// `true` when this instruction never falls through to the next one in
    /// program order (an unconditional branch or indirect jump). `false`
    /// for everything else, including a `Label`/`Move`/ordinary `Oper` and
    /// jump-carrying instructions (conditional branches, calls) that do
    /// fall through.
    #[must_use]
    pub fn is_exit(&self) -> bool {
        matches!(self, Instr::Oper { jumps, is_exit, .. } if !jumps.is_empty() && *is_exit)
    }

    /// Renders `template`, substituting every `` `s<i> ``/`` `d<i> ``/`` `j<i> ``
    /// placeholder with the assembly-visible name for the temp/label at that
    /// index, drawn from `temp_name`/`label_name`.
    pub fn format(&self, temp_name: &dyn Fn(Temp) -> String, label_name: &dyn Fn(Label) -> String) -> String {
        match self {
            Instr::Label { template, label } => {
                let _ = template;
                format!("{}:", label_name(*label))
            }
            Instr::Oper { template, srcs, dsts, jumps, .. } => {
                render_template(template, srcs, dsts, jumps, temp_name, label_name)
            }
            Instr::Move { template, src, dst } => {
                render_template(template, std::slice::from_ref(src), std::slice::from_ref(dst), &[], temp_name, label_name)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::Interner;

    #[test]
    fn conditional_branch_falls_through_despite_carrying_a_jump() {
        let mut interner = Interner::new();
        let t = interner.new_label();
        let f = interner.new_label();
        let instr = Instr::Oper {
            template: "beq `s0, `s1, `j0\n".to_string(),
            srcs: vec![interner.new_temp(), interner.new_temp()],
            dsts: vec![],
            jumps: vec![t, f],
            is_exit: false,
        };
        assert!(!instr.is_exit());
        assert_eq!(instr.jumps(), Some(&[t, f][..]));
    }

    #[test]
    fn unconditional_jump_does_not_fall_through() {
        let mut interner = Interner::new();
        let l = interner.new_label();
        let instr = Instr::Oper { template: "b `j0\n".to_string(), srcs: vec![], dsts: vec![], jumps: vec![l], is_exit: true };
        assert!(instr.is_exit());
    }

    #[test]
    fn an_oper_with_no_jump_targets_is_never_an_exit() {
        let instr = Instr::Oper { template: "nop\n".to_string(), srcs: vec![], dsts: vec![], jumps: vec![], is_exit: true };
        assert!(!instr.is_exit());
    }

    #[test]
    fn render_template_substitutes_by_index() {
        let mut interner = Interner::new();
        let a = interner.new_temp();
        let b = interner.new_temp();
        let l = interner.named_label("foo");
        let instr = Instr::Oper { template: "add `d0, `s0, `s1 ; `j0\n".to_string(), srcs: vec![a, b], dsts: vec![a], jumps: vec![l], is_exit: false };
        let name = |t: Temp| if t == a { "$t0".to_string() } else { "$t1".to_string() };
        let label_name = |l: Label| interner.label_string(l);
        assert_eq!(instr.format(&name, &label_name), "add $t0, $t0, $t1 ; foo\n");
    }
}

fn render_template(
    template: &str,
    srcs: &[Temp],
    dsts: &[Temp],
    jumps: &[Label],
    temp_name: &dyn Fn(Temp) -> String,
    label_name: &dyn Fn(Label) -> String,
) -> String {
    let bytes = template.as_bytes();
    let mut out = String::with_capacity(template.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'`' && i + 2 < bytes.len() {
            let kind = bytes[i + 1];
            let mut j = i + 2;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            if j > i + 2 {
                let idx: usize = template[i + 2..j].parse().expect("digits");
                match kind {
                    b's' => out.push_str(&temp_name(srcs[idx])),
                    b'd' => out.push_str(&temp_name(dsts[idx])),
                    b'j' => out.push_str(&label_name(jumps[idx])),
                    _ => out.push_str(&template[i..j]),
                }
                i = j;
                continue;
            }
        }
        out.push(bytes[i] as char);
        i += 1;
    }
    out
}
