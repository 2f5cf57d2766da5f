//! Final assembly-text writer: runs each procedure fragment through
//! selection and register allocation, formats the colored instructions,
//! and lays out the runtime prelude, `.globl main`, `.data`, and `.text`
//! sections.

use crate::assem::Instr;
use crate::frame::{Fragment, MachineRegs};
use crate::regalloc;
use crate::symbol::{Interner, Temp};
use crate::{canon, select};

/// The hand-written MIPS runtime, providing `initArray`, `allocRecord`, and
/// the eleven Tiger built-ins, prepended verbatim ahead of every compiled
/// program.
pub const RUNTIME_PRELUDE: &str = include_str!("../assets/runtime.s");

/// Lowers every fragment to text and assembles the final output file,
/// allocating registers against the machine's full allocatable palette.
#[must_use]
pub fn emit(frags: Vec<Fragment>, regs: &MachineRegs, interner: &mut Interner) -> String {
    let palette = regs.precolored();
    emit_with_palette(frags, regs, interner, &palette)
}

/// As [`emit`], but colors against the given `palette` rather than the
/// machine's full register set (the CLI driver's `-k` override).
#[must_use]
pub fn emit_with_palette(frags: Vec<Fragment>, regs: &MachineRegs, interner: &mut Interner, palette: &[Temp]) -> String {
    let mut data = String::new();
    let mut text = String::new();

    for frag in frags {
        match frag {
            Fragment::Str { label, text: s } => emit_string(&mut data, label, &s, interner),
            Fragment::Proc { body, frame } => emit_proc(&mut text, body, frame, regs, palette, interner),
        }
    }

    let mut out = String::new();
    out.push_str(RUNTIME_PRELUDE);
    out.push_str("\t.globl main\n");
    out.push_str("\t.data\n");
    out.push_str(&data);
    out.push_str("\n\t.text\n");
    out.push_str(&text);
    out
}

fn emit_string(out: &mut String, label: crate::symbol::Label, text: &str, interner: &Interner) {
    out.push_str(&format!("{}:\n", interner.label_string(label)));
    out.push_str(&format!("\t.word {}\n", text.len()));
    out.push_str(&format!("\t.ascii \"{}\"\n", escape_ascii(text)));
    out.push_str("\t.align 2\n");
}

fn escape_ascii(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out
}

fn emit_proc(out: &mut String, body: crate::tree::Stmt, mut frame: crate::frame::Frame, regs: &MachineRegs, palette: &[Temp], interner: &mut Interner) {
    let canon = canon::canonicalize(body, interner);
    let selected = select::select(&canon, regs, interner);
    let (instrs, colors) = regalloc::allocate(selected, &mut frame, regs, palette, interner);

    let reg_names: std::collections::HashMap<Temp, &'static str> = regs.names().into_iter().collect();
    let temp_name = |t: Temp| -> String {
        colors
            .get(&t)
            .and_then(|c| reg_names.get(c))
            .or_else(|| reg_names.get(&t))
            .map(|s| (*s).to_string())
            .unwrap_or_else(|| format!("${}", t.raw()))
    };
    let label_name = |l: crate::symbol::Label| interner.label_string(l);

    out.push_str(&format!("{}:\n", interner.label_string(frame.name)));
    out.push_str(&prolog(&frame, regs));
    for instr in &instrs {
        // A move whose source and destination were colored (or already
        // are) the same register is a no-op; dropping it here is
        // equivalent to the allocator's redundant-move removal, since by
        // this point every temp has a fixed color.
        if let Instr::Move { src, dst, .. } = instr {
            if temp_name(*src) == temp_name(*dst) {
                continue;
            }
        }
        if let Instr::Label { .. } = instr {
            out.push_str(&instr.format(&temp_name, &label_name));
            out.push('\n');
        } else {
            out.push('\t');
            out.push_str(&instr.format(&temp_name, &label_name));
        }
    }
    out.push_str(&epilog(&frame, regs));
}

fn prolog(frame: &crate::frame::Frame, regs: &MachineRegs) -> String {
    let size = frame.frame_size();
    let ra_slot = size - 4;
    let sp = reg_name(regs, regs.sp);
    let fp = reg_name(regs, regs.fp);
    let ra = reg_name(regs, regs.ra);
    format!(
        "\tsubu {sp}, {sp}, {size}\n\
         \tsw {ra}, {ra_slot}({sp})\n\
         \tsw {fp}, 0({sp})\n\
         \tmove {fp}, {sp}\n"
    )
}

fn epilog(frame: &crate::frame::Frame, regs: &MachineRegs) -> String {
    let size = frame.frame_size();
    let sp = reg_name(regs, regs.sp);
    let fp = reg_name(regs, regs.fp);
    let ra = reg_name(regs, regs.ra);
    format!(
        "\tlw {ra}, {}({sp})\n\
         \tlw {fp}, 0({sp})\n\
         \taddu {sp}, {sp}, {size}\n\
         \tjr {ra}\n",
        size - 4
    )
}

fn reg_name(regs: &MachineRegs, t: Temp) -> &'static str {
    regs.names().into_iter().find(|(rt, _)| *rt == t).map(|(_, n)| n).unwrap_or("$?")
}
