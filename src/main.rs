//! CLI driver: `tigerc --source <path> [-v] [-k N]`. Parses arguments by
//! hand, type-checks and compiles the named source file, and writes the
//! resulting assembly to `<path>.s` next to it.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use tigerc::diagnostics::Diagnostic;
use tigerc::frame::MachineRegs;
use tigerc::symbol::Interner;

struct Options {
    source: PathBuf,
    verbose: bool,
    k: Option<usize>,
}

fn parse_args() -> Result<Options, String> {
    let mut source = None;
    let mut verbose = false;
    let mut k = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--source" => {
                let path = args.next().ok_or("--source requires a path argument")?;
                source = Some(PathBuf::from(path));
            }
            "-v" => verbose = true,
            "-k" => {
                let n = args.next().ok_or("-k requires a register-count argument")?;
                k = Some(n.parse::<usize>().map_err(|_| "-k expects an integer")?);
            }
            other => return Err(format!("unrecognized argument '{other}'")),
        }
    }

    let source = source.ok_or("missing required --source <path>")?;
    Ok(Options { source, verbose, k })
}

fn main() -> ExitCode {
    let opts = match parse_args() {
        Ok(o) => o,
        Err(msg) => {
            eprintln!("tigerc: {msg}");
            eprintln!("usage: tigerc --source <path> [-v] [-k N]");
            return ExitCode::FAILURE;
        }
    };

    if opts.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    match run(&opts.source, opts.k) {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => code,
    }
}

fn run(source: &Path, k: Option<usize>) -> Result<(), ExitCode> {
    log::info!("reading {}", source.display());
    let text = std::fs::read_to_string(source).map_err(|e| {
        eprintln!("{}: {e}", source.display());
        ExitCode::FAILURE
    })?;

    let mut interner = Interner::new();
    match compile(&text, &mut interner, k) {
        Ok(asm) => {
            let out_path = source.with_extension("s");
            log::info!("writing {}", out_path.display());
            std::fs::write(&out_path, asm).map_err(|e| {
                eprintln!("{}: {e}", out_path.display());
                ExitCode::FAILURE
            })?;
            Ok(())
        }
        Err(e) => {
            let strings = |s: tigerc::symbol::Symbol| interner.resolve(s);
            let diag = Diagnostic { path: source, error: &e, strings: &strings };
            eprintln!("{diag}");
            Err(ExitCode::FAILURE)
        }
    }
}

/// Runs lex/parse/escape/semant+translate/emit over `text`, honoring an
/// optional `-k` override of the allocatable register count.
fn compile(text: &str, interner: &mut Interner, k: Option<usize>) -> Result<String, tigerc::diagnostics::Error> {
    use tigerc::diagnostics::Error;

    log::debug!("parsing");
    let mut ast = tigerc::parser::parse_program(text, interner)?;

    log::debug!("resolving escapes");
    tigerc::escape::find_escapes(&mut ast);

    let regs = MachineRegs::new(interner);
    let mut translator = tigerc::translate::Translator::new();

    log::debug!("type-checking and translating");
    let mut sem = tigerc::semant::Semant::new(interner, &regs, &mut translator);
    sem.trans_prog(&ast).map_err(Error::from)?;

    log::debug!("emitting");
    let palette = match k {
        Some(n) => regs.precolored().into_iter().take(n).collect(),
        None => regs.precolored(),
    };
    Ok(tigerc::emit::emit_with_palette(translator.frags, &regs, interner, &palette))
}
