//! Exercises the `tigerc` binary itself: reading a source file from disk and
//! writing the `.s` sibling, rather than calling the library entry point
//! directly as `tests/end_to_end.rs` does.

use std::process::Command;

fn tigerc() -> Command {
    Command::new(env!("CARGO_BIN_EXE_tigerc"))
}

#[test]
fn compiling_a_source_file_writes_an_s_sibling_next_to_it() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("hello.tig");
    std::fs::write(&source, r#"print("hi\n")"#).unwrap();

    let status = tigerc().arg("--source").arg(&source).status().unwrap();
    assert!(status.success());

    let out = source.with_extension("s");
    let asm = std::fs::read_to_string(&out).unwrap();
    assert!(asm.contains("jal print"));
}

#[test]
fn a_type_error_exits_nonzero_and_reports_the_phase() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("bad.tig");
    std::fs::write(&source, "1 + \"oops\"").unwrap();

    let output = tigerc().arg("--source").arg(&source).output().unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("type error:"), "stderr was: {stderr}");
}

#[test]
fn missing_source_file_fails_without_panicking() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.tig");

    let output = tigerc().arg("--source").arg(&missing).output().unwrap();
    assert!(!output.status.success());
}

#[test]
fn k_flag_is_accepted_and_still_produces_valid_output() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("k.tig");
    std::fs::write(&source, "let var x := 1 in printi(x) end").unwrap();

    let status = tigerc().arg("--source").arg(&source).arg("-k").arg("3").status().unwrap();
    assert!(status.success());
    let asm = std::fs::read_to_string(source.with_extension("s")).unwrap();
    assert!(asm.contains("jal printi"));
}
