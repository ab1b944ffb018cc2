//! CLI-level integration tests, in the teacher's `tempfile`-backed style
//! (`crates/compiler/src/script.rs`): write a fixture to a temp
//! directory, invoke the built binary, then check what it wrote.

use std::fs;
use std::process::Command;

#[test]
fn build_emits_a_compilable_looking_c_file() {
    let temp = tempfile::tempdir().unwrap();
    let fixture = fs::read_to_string(concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures/return_constant.json")).unwrap();
    let source = temp.path().join("program.sf");
    fs::write(&source, fixture).unwrap();
    let output = temp.path().join("program.c");

    let status = Command::new(env!("CARGO_BIN_EXE_sfc"))
        .arg(temp.path())
        .arg("-s")
        .arg("program.sf")
        .arg("-o")
        .arg("program.c")
        .status()
        .unwrap();

    assert!(status.success());
    let generated = fs::read_to_string(&output).unwrap();
    assert!(generated.contains("int main(void) {"));
    assert!(generated.contains("static void run(void) {"));
}

#[test]
fn build_rejects_an_output_path_that_reuses_the_ast_extension() {
    let temp = tempfile::tempdir().unwrap();
    let fixture = fs::read_to_string(concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures/return_constant.json")).unwrap();
    let source = temp.path().join("program.sf");
    fs::write(&source, fixture).unwrap();

    let status = Command::new(env!("CARGO_BIN_EXE_sfc"))
        .arg(temp.path())
        .arg("-s")
        .arg("program.sf")
        .arg("-o")
        .arg("program.sf")
        .status()
        .unwrap();

    assert!(!status.success());
}

#[test]
fn keep_il_writes_a_sidecar_next_to_the_output() {
    let temp = tempfile::tempdir().unwrap();
    let fixture = fs::read_to_string(concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures/count_to_five.json")).unwrap();
    let source = temp.path().join("loop.sf");
    fs::write(&source, fixture).unwrap();

    let status = Command::new(env!("CARGO_BIN_EXE_sfc"))
        .arg(temp.path())
        .arg("-s")
        .arg("loop.sf")
        .arg("-o")
        .arg("loop.c")
        .arg("--keep-il")
        .status()
        .unwrap();

    assert!(status.success());
    assert!(temp.path().join("loop.il.json").exists());
}
