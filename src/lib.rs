//! Ahead-of-time compiler from Tiger to MIPS assembly. The crate root wires
//! the pipeline: lex and parse into an AST, resolve variable escapes,
//! type-check while lowering to the tree IR, then per-procedure
//! canonicalize, select, allocate registers, and emit.

pub mod assem;
pub mod ast;
pub mod canon;
pub mod diagnostics;
pub mod emit;
pub mod escape;
pub mod frame;
pub mod lexer;
pub mod parser;
pub mod position;
pub mod regalloc;
pub mod select;
pub mod semant;
pub mod symbol;
pub mod translate;
pub mod tree;
pub mod types;

use diagnostics::Error;
use frame::MachineRegs;
use symbol::Interner;

/// Runs the full pipeline over Tiger source text and returns the MIPS
/// assembly text for it, or the first diagnostic encountered. There is no
/// recovery: compilation stops at the first error in any phase.
pub fn compile(src: &str) -> Result<String, (Interner, Error)> {
    let mut interner = Interner::new();
    match compile_with_interner(src, &mut interner) {
        Ok(asm) => Ok(asm),
        Err(e) => Err((interner, e)),
    }
}

fn compile_with_interner(src: &str, interner: &mut Interner) -> Result<String, Error> {
    let mut ast = parser::parse_program(src, interner)?;
    escape::find_escapes(&mut ast);

    let regs = MachineRegs::new(interner);
    let mut translator = translate::Translator::new();
    let mut sem = semant::Semant::new(interner, &regs, &mut translator);
    sem.trans_prog(&ast).map_err(Error::from)?;

    Ok(emit::emit(translator.frags, &regs, interner))
}
