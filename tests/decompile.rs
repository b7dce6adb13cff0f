//! End-to-end tests of the decompilation pipeline.
//!
//! Every script here is assembled with [`NcsAssembler`] and run through the public
//! [`Decompiler`] API, the same way a tool embedding the crate would.

use ncscope::{
    analysis::{StructType, Type},
    prelude::*,
};

const MANIFEST: &str = "\
// 0
void PrintInteger(int nInteger);
// 1
float VectorMagnitude(vector vVector);
// 2
void PrintString(string sString);
// 3
void DelayCommand(float fSeconds, action aActionToDelay);
";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn decompiler() -> Result<Decompiler> {
    init_tracing();
    Ok(Decompiler::new(
        ActionTable::parse(MANIFEST)?,
        DecompilerConfig::default(),
    ))
}

/// `int sub1() { int n = 5; return n; }` called from `main`.
fn returning_local() -> Result<Vec<u8>> {
    let mut asm = NcsAssembler::new();
    asm.jsr("main")?.retn()?;

    asm.label("main")?;
    asm.rsadd(TypeCode::Int)?;
    asm.jsr("get")?;
    asm.movsp(-4)?.retn()?;

    asm.label("get")?;
    asm.rsadd(TypeCode::Int)?;
    asm.const_int(5)?.cpdownsp(-8, 4)?.movsp(-4)?;
    asm.cptopsp(-4, 4)?.cpdownsp(-12, 4)?;
    asm.movsp(-8)?.retn()?;
    asm.finish()
}

/// Two void subroutines after `main`.
fn two_helpers() -> Result<Vec<u8>> {
    let mut asm = NcsAssembler::new();
    asm.jsr("main")?.retn()?;
    asm.label("main")?.jsr("first")?.jsr("second")?.retn()?;
    asm.label("first")?.const_int(1)?.action(0, 1)?.retn()?;
    asm.label("second")?.const_int(2)?.action(0, 1)?.retn()?;
    asm.finish()
}

#[test]
fn test_header_only_script() -> Result<()> {
    let bytes = NcsAssembler::new().finish()?;
    assert_eq!(bytes.len(), 13);
    assert!(decode_stream(b"NCS V1.0")?.is_empty());
    let instructions = decode_stream(&bytes)?;
    assert_eq!(instructions.len(), 1);
    assert_eq!(instructions[0].opcode, Opcode::T);

    let result = decompiler()?.decompile(&bytes);
    assert!(result.diagnostics().is_empty());
    assert!(result.subroutine_names().is_empty());
    assert_eq!(result.source(), "");
    Ok(())
}

#[test]
fn test_corrupted_header() -> Result<()> {
    let mut bytes = returning_local()?;
    bytes[4] = b'X';

    let result = decompiler()?.decompile(&bytes);
    assert!(result.has_failures());
    assert_eq!(result.diagnostics().len(), 1);
    assert_eq!(result.diagnostics()[0].kind, DiagnosticKind::Format);
    assert!(result.subroutines().is_empty());
    assert!(result.source().starts_with("// could not be decompiled:"));
    Ok(())
}

#[test]
fn test_local_and_return() -> Result<()> {
    let result = decompiler()?.decompile(&returning_local()?);
    assert!(result.diagnostics().is_empty(), "{:?}", result.diagnostics());
    assert_eq!(result.subroutine_names(), vec!["main", "sub1"]);

    let source = result.source();
    assert!(source.starts_with("int sub1();\n"));
    assert!(source.contains("int sub1() {\n    int nVar1 = 5;\n    return nVar1;\n}\n"));
    assert!(source.contains("void main() {\n    sub1();\n}\n"));

    let locals = result.variables("sub1").unwrap_or_default();
    assert_eq!(locals.len(), 1);
    assert_eq!(locals[0].name, "nVar1");
    assert_eq!(locals[0].ty, Type::Int);
    Ok(())
}

#[test]
fn test_mutual_recursion() -> Result<()> {
    // int a(int n) { if (n) return b(n); else return 0; }
    // int b(int n) { return a(n - 1); }
    let mut asm = NcsAssembler::new();
    asm.jsr("main")?.retn()?;

    asm.label("main")?;
    asm.rsadd(TypeCode::Int)?.const_int(3)?.jsr("a")?;
    asm.movsp(-4)?.retn()?;

    asm.label("a")?;
    asm.cptopsp(-4, 4)?.jz("base")?;
    asm.rsadd(TypeCode::Int)?.cptopsp(-8, 4)?.jsr("b")?;
    asm.cpdownsp(-12, 4)?.movsp(-4)?.jmp("end")?;
    asm.label("base")?;
    asm.const_int(0)?.cpdownsp(-12, 4)?.movsp(-4)?;
    asm.label("end")?;
    asm.movsp(-4)?.retn()?;

    asm.label("b")?;
    asm.rsadd(TypeCode::Int)?.cptopsp(-8, 4)?;
    asm.const_int(1)?.op(Opcode::Sub, TypeCode::IntInt)?;
    asm.jsr("a")?.cpdownsp(-12, 4)?;
    asm.movsp(-4)?.movsp(-4)?.retn()?;

    let result = decompiler()?.decompile(&asm.finish()?);
    assert!(result.diagnostics().is_empty(), "{:?}", result.diagnostics());

    let source = result.source();
    assert!(source.contains("int sub1(int nParam1);\nint sub2(int nParam1);\n"));
    assert!(source.contains("    if (nParam1) {\n        return sub2(nParam1);\n    }"));
    assert!(source.contains("return 0;"));
    assert!(source.contains("    return sub1(nParam1 - 1);\n"));
    assert!(source.contains("    sub1(3);\n"));
    // The returned call is not evaluated a second time
    assert_eq!(source.matches("sub2(nParam1)").count(), 1);
    Ok(())
}

#[test]
fn test_vector_from_three_floats() -> Result<()> {
    let mut asm = NcsAssembler::new();
    asm.rsadd(TypeCode::Float)?;
    asm.rsadd(TypeCode::Float)?;
    asm.rsadd(TypeCode::Float)?;
    asm.const_float(1.0)?.const_float(2.0)?.const_float(3.0)?;
    asm.cpdownsp(-24, 12)?.movsp(-12)?;
    asm.cptopsp(-12, 12)?.action(1, 1)?.movsp(-4)?;
    asm.movsp(-12)?.retn()?;

    let result = decompiler()?.decompile(&asm.finish()?);
    assert!(result.diagnostics().is_empty(), "{:?}", result.diagnostics());

    let locals = result.variables("main").unwrap_or_default();
    assert_eq!(locals.len(), 1);
    assert_eq!(locals[0].ty, Type::Struct(StructType::vector()));
    assert_eq!(locals[0].name, "vVar1");

    let source = result.source();
    assert!(source.contains("vector vVar1 = [1.0, 2.0, 3.0];"));
    assert!(source.contains("VectorMagnitude(vVar1);"));
    // Vectors are built in, never declared as a structure
    assert!(!source.contains("struct"));
    Ok(())
}

#[test]
fn test_dead_code_excluded() -> Result<()> {
    let mut asm = NcsAssembler::new();
    asm.jmp("end")?;
    asm.const_int(77)?.action(0, 1)?;
    asm.label("end")?.retn()?;

    let result = decompiler()?.decompile(&asm.finish()?);
    assert!(result.diagnostics().is_empty(), "{:?}", result.diagnostics());
    assert!(!result.source().contains("PrintInteger"));
    assert!(!result.source().contains("77"));
    assert!(result.source().contains("void main() {"));
    Ok(())
}

#[test]
fn test_while_loop() -> Result<()> {
    let mut asm = NcsAssembler::new();
    asm.rsadd(TypeCode::Int)?;
    asm.const_int(0)?.cpdownsp(-8, 4)?.movsp(-4)?;
    asm.label("top")?;
    asm.cptopsp(-4, 4)?.const_int(3)?.op(Opcode::Lt, TypeCode::IntInt)?;
    asm.jz("end")?;
    asm.cptopsp(-4, 4)?.action(0, 1)?;
    asm.incisp(-4)?;
    asm.jmp("top")?;
    asm.label("end")?;
    asm.movsp(-4)?.retn()?;

    let result = decompiler()?.decompile(&asm.finish()?);
    assert!(result.diagnostics().is_empty(), "{:?}", result.diagnostics());

    let source = result.source();
    assert!(source.contains("    int nVar1 = 0;\n"));
    assert!(source.contains("    while (nVar1 < 3) {\n        PrintInteger(nVar1);\n"));
    assert!(!source.contains("goto"));
    Ok(())
}

#[test]
fn test_globals() -> Result<()> {
    let mut asm = NcsAssembler::new();
    asm.jsr("globals")?.retn()?;

    asm.label("globals")?;
    asm.rsadd(TypeCode::Int)?;
    asm.const_int(5)?.cpdownsp(-8, 4)?.movsp(-4)?;
    asm.savebp()?.jsr("main")?.restorebp()?;
    asm.movsp(-4)?.retn()?;

    asm.label("main")?;
    asm.cptopbp(-8, 4)?.action(0, 1)?;
    asm.retn()?;

    let result = decompiler()?.decompile(&asm.finish()?);
    assert!(result.diagnostics().is_empty(), "{:?}", result.diagnostics());
    assert_eq!(result.subroutine_names(), vec!["main"]);

    let globals = result.globals();
    assert_eq!(globals.len(), 1);
    assert_eq!(globals[0].name, "nGlobal1");
    assert_eq!(globals[0].ty, Type::Int);

    let source = result.source();
    assert!(source.starts_with("int nGlobal1 = 5;\n"));
    assert!(source.contains("void main() {\n    PrintInteger(nGlobal1);\n}\n"));
    Ok(())
}

#[test]
fn test_globals_addressed_below_saved_base_pointer() -> Result<()> {
    let mut asm = NcsAssembler::new();
    asm.jsr("globals")?.retn()?;

    asm.label("globals")?;
    asm.rsadd(TypeCode::Int)?;
    asm.const_int(5)?.cpdownsp(-8, 4)?.movsp(-4)?;
    asm.rsadd(TypeCode::String)?;
    asm.const_string("x")?.cpdownsp(-8, 4)?.movsp(-4)?;
    asm.savebp()?.jsr("main")?.restorebp()?;
    asm.movsp(-8)?.retn()?;

    asm.label("main")?;
    asm.cptopbp(-12, 4)?.action(0, 1)?;
    asm.cptopbp(-8, 4)?.action(2, 1)?;
    asm.retn()?;

    let result = decompiler()?.decompile(&asm.finish()?);
    assert!(result.diagnostics().is_empty(), "{:?}", result.diagnostics());

    let globals = result.globals();
    assert_eq!(globals.len(), 2);
    assert_eq!(globals[0].ty, Type::Int);
    assert_eq!(globals[1].ty, Type::String);

    let source = result.source();
    assert!(source.starts_with("int nGlobal1 = 5;\nstring sGlobal2 = \"x\";\n"));
    assert!(source.contains("    PrintInteger(nGlobal1);\n    PrintString(sGlobal2);\n"));
    Ok(())
}

#[test]
fn test_saved_base_pointer_is_not_a_global() -> Result<()> {
    let mut asm = NcsAssembler::new();
    asm.jsr("globals")?.retn()?;

    asm.label("globals")?;
    asm.rsadd(TypeCode::Int)?;
    asm.savebp()?.jsr("main")?.restorebp()?;
    asm.movsp(-4)?.retn()?;

    asm.label("main")?;
    asm.cptopbp(-4, 4)?.action(0, 1)?;
    asm.retn()?;

    let result = decompiler()?.decompile(&asm.finish()?);
    assert!(result.has_failures());
    assert!(result
        .diagnostics()
        .iter()
        .any(|d| d.kind == DiagnosticKind::Structural && d.subroutine.as_deref() == Some("main")));
    assert!(result.source().contains("// void main()"));
    Ok(())
}

#[test]
fn test_member_store_into_copy() -> Result<()> {
    let mut asm = NcsAssembler::new();
    asm.rsadd(TypeCode::Float)?;
    asm.rsadd(TypeCode::Float)?;
    asm.rsadd(TypeCode::Float)?;
    asm.cptopsp(-12, 12)?;
    asm.const_float(9.0)?.cpdownsp(-16, 4)?.movsp(-4)?;
    asm.cpdownsp(-24, 12)?.movsp(-12)?;
    asm.movsp(-12)?.retn()?;

    let result = decompiler()?.decompile(&asm.finish()?);
    assert!(result.diagnostics().is_empty(), "{:?}", result.diagnostics());

    let source = result.source();
    assert!(source.contains("    vVar1 = [9.0, vVar1.y, vVar1.z];\n"), "{source}");
    assert!(!source.contains("vector vVar1 = vVar1"));
    Ok(())
}

#[test]
fn test_locals_left_at_return() -> Result<()> {
    // Compiled code pops its locals before RETN, a leftover slot is a broken frame
    let mut asm = NcsAssembler::new();
    asm.rsadd(TypeCode::Int)?.const_int(5)?.retn()?;

    let result = decompiler()?.decompile(&asm.finish()?);
    assert!(result.has_failures());
    let diagnostic = &result.diagnostics()[0];
    assert_eq!(diagnostic.kind, DiagnosticKind::Structural);
    assert!(diagnostic.message.contains("left on the stack at return"));
    assert!(result.source().contains("// void main()\n// could not be decompiled:"));
    Ok(())
}

#[test]
fn test_join_depth_mismatch_fails_one_subroutine() -> Result<()> {
    let mut asm = NcsAssembler::new();
    asm.jsr("main")?.retn()?;

    asm.label("main")?.jsr("helper")?;
    asm.const_int(1)?.jz("skip")?;
    asm.const_int(2)?;
    asm.label("skip")?.retn()?;

    asm.label("helper")?.const_int(2)?.action(0, 1)?.retn()?;

    let result = decompiler()?.decompile(&asm.finish()?);
    assert!(result.has_failures());
    assert_eq!(result.diagnostics().len(), 1);
    let diagnostic = &result.diagnostics()[0];
    assert_eq!(diagnostic.kind, DiagnosticKind::Structural);
    assert_eq!(diagnostic.subroutine.as_deref(), Some("main"));
    assert!(diagnostic.message.contains("join point"));

    let source = result.source();
    assert!(source.contains("// void main()\n// could not be decompiled:"));
    assert!(source.contains("void sub1() {\n    PrintInteger(2);\n}\n"));
    Ok(())
}

#[test]
fn test_backward_branch_depth_mismatch() -> Result<()> {
    let mut asm = NcsAssembler::new();
    asm.label("top")?.const_int(1)?.jmp("top")?;
    asm.retn()?;

    let result = decompiler()?.decompile(&asm.finish()?);
    assert!(result.has_failures());
    let diagnostic = &result.diagnostics()[0];
    assert_eq!(diagnostic.kind, DiagnosticKind::Structural);
    assert!(diagnostic.message.contains("backward branch"));
    Ok(())
}

/// `main` passes a constant to `mid`, which forwards its parameter to `leaf`. The type of
/// `leaf`'s parameter is only known one iteration after `mid`'s.
fn forwarded_parameter() -> Result<Vec<u8>> {
    let mut asm = NcsAssembler::new();
    asm.jsr("main")?.retn()?;
    asm.label("main")?.const_int(5)?.jsr("mid")?.retn()?;
    asm.label("leaf")?.movsp(-4)?.retn()?;
    asm.label("mid")?.cptopsp(-4, 4)?.jsr("leaf")?.movsp(-4)?.retn()?;
    asm.finish()
}

#[test]
fn test_iteration_cap_is_reported() -> Result<()> {
    let bytes = forwarded_parameter()?;

    let result = decompiler()?.decompile(&bytes);
    assert!(result.diagnostics().is_empty(), "{:?}", result.diagnostics());
    assert!(result.source().contains("void sub1(int nParam1);"));

    let capped = Decompiler::new(
        ActionTable::parse(MANIFEST)?,
        DecompilerConfig::default().with_max_iterations(1),
    )
    .decompile(&bytes);
    assert!(!capped.has_failures());
    assert!(capped
        .diagnostics()
        .iter()
        .all(|d| d.kind == DiagnosticKind::Convergence));
    assert!(capped
        .diagnostics()
        .iter()
        .any(|d| d.message.contains("iteration cap")));
    assert!(capped
        .diagnostics()
        .iter()
        .any(|d| d.subroutine.as_deref() == Some("sub1")));
    Ok(())
}

#[test]
fn test_recursive_cycle_assumes_no_parameters() -> Result<()> {
    let mut asm = NcsAssembler::new();
    asm.jsr("main")?.retn()?;
    asm.label("main")?.jsr("ping")?.retn()?;
    asm.label("ping")?.jsr("pong")?.retn()?;
    asm.label("pong")?.jsr("ping")?.retn()?;

    let result = decompiler()?.decompile(&asm.finish()?);
    assert!(!result.has_failures());
    assert_eq!(result.diagnostics().len(), 1);
    let diagnostic = &result.diagnostics()[0];
    assert_eq!(diagnostic.kind, DiagnosticKind::Convergence);
    assert_eq!(diagnostic.subroutine.as_deref(), Some("sub1"));
    assert!(diagnostic.message.contains("assumed"));

    let source = result.source();
    assert!(source.contains("void sub1();\nvoid sub2();\n"));
    assert!(source.contains("void sub1() {\n    sub2();\n}\n"));
    Ok(())
}

#[test]
fn test_delayed_action() -> Result<()> {
    let mut asm = NcsAssembler::new();
    asm.store_state(8, 0)?.jmp("resume")?;
    asm.const_int(7)?.action(0, 1)?.retn()?;
    asm.label("resume")?;
    asm.const_float(2.0)?.action(3, 2)?;
    asm.retn()?;

    let result = decompiler()?.decompile(&asm.finish()?);
    assert!(result.diagnostics().is_empty(), "{:?}", result.diagnostics());
    assert!(result
        .source()
        .contains("void main() {\n    DelayCommand(2.0, PrintInteger(7));\n}\n"));
    Ok(())
}

#[test]
fn test_no_effect_instructions() -> Result<()> {
    let mut asm = NcsAssembler::new();
    asm.nop()?.store_stateall()?;
    asm.const_int(3)?.action(0, 1)?;
    asm.nop()?.retn()?;

    let result = decompiler()?.decompile(&asm.finish()?);
    assert!(result.diagnostics().is_empty(), "{:?}", result.diagnostics());
    assert!(result.source().contains("void main() {\n    PrintInteger(3);\n}\n"));
    Ok(())
}

#[test]
fn test_regenerate_is_stable() -> Result<()> {
    let result = decompiler()?.decompile(&returning_local()?);
    let first = result.regenerate();
    let second = result.regenerate();
    assert_eq!(first, second);
    assert_eq!(first, result.source());
    Ok(())
}

#[test]
fn test_rename_collision_keeps_state() -> Result<()> {
    let mut result = decompiler()?.decompile(&two_helpers()?);
    assert_eq!(result.subroutine_names(), vec!["main", "sub1", "sub2"]);
    let before = result.source().to_string();

    assert!(matches!(
        result.rename_subroutine("sub1", "sub2"),
        Err(Error::NameCollision(_))
    ));
    assert!(matches!(
        result.rename_subroutine("sub2", "main"),
        Err(Error::NameCollision(_))
    ));
    assert_eq!(result.source(), before);
    assert_eq!(result.regenerate(), before);
    assert_eq!(result.subroutine_names(), vec!["main", "sub1", "sub2"]);

    let renamed = result.rename_subroutine("sub2", "PrintTwo")?.to_string();
    assert!(renamed.contains("void PrintTwo();"));
    assert!(renamed.contains("    PrintTwo();\n"));
    assert!(!renamed.contains("sub2"));
    assert_eq!(result.subroutine_names(), vec!["main", "sub1", "PrintTwo"]);
    Ok(())
}

#[test]
fn test_batch_keeps_input_order() -> Result<()> {
    let good = returning_local()?;
    let helpers = two_helpers()?;
    let mut bad = returning_local()?;
    bad[5] = b'9';

    let decompiler = decompiler()?;
    let results = decompiler.decompile_batch(&[good.as_slice(), bad.as_slice(), helpers.as_slice()]);
    assert_eq!(results.len(), 3);
    assert!(!results[0].has_failures());
    assert!(results[1].has_failures());
    assert_eq!(results[1].diagnostics()[0].kind, DiagnosticKind::Format);
    assert_eq!(results[2].subroutine_names(), vec!["main", "sub1", "sub2"]);

    // Parallel runs produce the same text as sequential ones
    assert_eq!(results[0].source(), decompiler.decompile(&good).source());
    Ok(())
}

#[test]
fn test_decompile_file() -> Result<()> {
    let path = std::env::temp_dir().join(format!("ncscope-{}.ncs", std::process::id()));
    std::fs::write(&path, two_helpers()?)?;

    let decompiler = decompiler()?;
    let result = decompiler.decompile_file(&path);
    std::fs::remove_file(&path)?;

    let result = result?;
    assert!(result.source().contains("    PrintInteger(2);\n"));

    let missing = decompiler.decompile_file(&path);
    assert!(matches!(missing, Err(Error::FileError(_))));
    Ok(())
}
