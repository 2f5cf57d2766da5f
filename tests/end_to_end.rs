//! Scenario tests compiling literal Tiger programs end-to-end and
//! asserting on the emitted assembly text: string printing, arithmetic, a
//! static-link variable capture, a recursive record type, a register spill,
//! a loop with a break, a `for` loop, and string-literal deduplication.

fn compile_ok(src: &str) -> String {
    match tigerc::compile(src) {
        Ok(asm) => asm,
        Err((interner, e)) => {
            let strings = |s: tigerc::symbol::Symbol| interner.resolve(s);
            let diag = tigerc::diagnostics::Diagnostic {
                path: std::path::Path::new("<test>"),
                error: &e,
                strings: &strings,
            };
            panic!("expected compilation to succeed, got: {diag}");
        }
    }
}

#[test]
fn hello_prints_a_string_literal() {
    let asm = compile_ok(r#"print("hello\n")"#);
    assert!(asm.contains(".ascii \"hello\\n\""), "missing string fragment:\n{asm}");
    assert!(asm.contains("main:"), "missing main procedure:\n{asm}");
    assert!(asm.contains("la "), "missing address load of the string label:\n{asm}");
    assert!(asm.contains("jal print"), "missing call to print:\n{asm}");
}

#[test]
fn arith_evaluates_constant_folding_friendly_expression() {
    let asm = compile_ok("let var x := 2+3*4 in printi(x) end");
    assert!(asm.contains("li "), "missing an immediate load:\n{asm}");
    assert!(asm.contains("mul "), "missing the multiplication:\n{asm}");
    assert!(asm.contains("jal printi"), "missing call to printi:\n{asm}");
}

#[test]
fn nested_function_reads_an_enclosing_variable_through_a_static_link() {
    let asm = compile_ok(
        "let function outer() = \
             let var x := 1 \
                 function inner() = printi(x) \
             in inner() end \
         in outer() end",
    );
    assert!(asm.contains("jal printi"), "inner must still call printi:\n{asm}");
    // inner dereferences outer's frame pointer once to recover x: a load
    // through a non-trivial offset off some base register, then a second
    // load at x's own offset. We don't pin down exact offsets, just that
    // at least two loads occur along the static-link chain.
    let lw_count = asm.matches("lw ").count();
    assert!(lw_count >= 2, "expected at least two loads walking the static link:\n{asm}");
}

#[test]
fn recursive_record_type_allocates_and_projects_a_field() {
    let asm = compile_ok(
        "let \
             type list = { head: int, tail: list } \
             var l : list := list { head = 1, tail = nil } \
         in l.tail end",
    );
    assert!(asm.contains("jal allocRecord"), "record literal must allocate:\n{asm}");
}

#[test]
fn a_long_chain_of_live_locals_forces_at_least_one_spill() {
    let mut src = String::from("let ");
    for i in 0..40 {
        src.push_str(&format!("var v{i} := {i}\n"));
    }
    src.push_str("in printi(v0");
    for i in 1..40 {
        src.push_str(&format!(" + v{i}"));
    }
    src.push_str(") end");

    let asm = compile_ok(&src);
    // A spilled temp is backed by an fp-relative slot: at least one load or
    // store besides the prolog/epilog's own frame-pointer bookkeeping must
    // reference a negative offset off `$fp`.
    assert!(asm.contains("($fp)"), "expected at least one fp-relative spill slot:\n{asm}");
    assert!(asm.contains("jal printi"));
}

#[test]
fn loop_with_break_exits_the_while_and_prints_the_counter() {
    let asm = compile_ok(
        "let var i := 0 \
         in while 1 do (i := i + 1; if i = 3 then break else ()); \
            printi(i) \
         end",
    );
    assert!(asm.contains("jal printi"));
    // The loop body increments i and conditionally branches; some
    // conditional branch must be present to test the break condition.
    assert!(asm.contains("beq") || asm.contains("beqz"), "expected the break's equality test:\n{asm}");
}

#[test]
fn for_loop_counts_from_lo_to_hi_and_prints_each_value() {
    let asm = compile_ok("for i := 1 to 3 do printi(i)");
    assert!(asm.contains("jal printi"), "loop body must call printi:\n{asm}");
    assert!(asm.contains("bgt"), "expected the lo > hi zero-iteration test:\n{asm}");
    assert!(asm.contains("beq"), "expected the i == hi termination test:\n{asm}");
    assert!(asm.contains("addi"), "expected the increment of the loop counter:\n{asm}");
}

#[test]
fn string_literal_deduplication_emits_one_fragment_for_identical_strings() {
    let asm = compile_ok(r#"(print("same"); print("same"))"#);
    assert_eq!(asm.matches(".ascii \"same\"").count(), 1, "identical literals must share one StringFrag:\n{asm}");
}

#[test]
fn every_program_begins_with_the_runtime_prelude_and_the_required_sections() {
    let asm = compile_ok("printi(1)");
    let globl_at = asm.find("\t.globl main").expect("missing .globl main");
    let data_at = asm.find("\t.data").expect("missing .data section");
    let text_at = asm.find("\n\t.text").expect("missing .text section");
    assert!(globl_at < data_at);
    assert!(data_at < text_at);
    assert!(asm.starts_with("#"), "runtime prelude should lead the file:\n{asm}");
}
