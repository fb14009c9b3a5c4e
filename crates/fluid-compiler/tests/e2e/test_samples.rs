use super::helpers::*;
use fluid_compiler::{compile, print_chunk, CompileOptions};

fn sample(name: &str) -> String {
    let manifest = env!("CARGO_MANIFEST_DIR");
    let path = format!("{manifest}/../../tests/fluid_samples/{name}.fluid");
    std::fs::read_to_string(&path).unwrap_or_else(|e| {
        panic!("failed to read {path}: {e}");
    })
}

/// Compile a sample and check that printing it back re-parses to the same tree.
fn check_sample(name: &str) {
    let source = sample(name);
    let options = CompileOptions::new().with_chunk_name(name);
    compile(source.as_bytes(), &options).unwrap_or_else(|e| {
        panic!("failed to compile {name}: {e}");
    });
    let block = parse_str(&source);
    let printed = print_chunk(&block);
    assert_eq!(parse_str(&printed), block, "round trip of {name}:\n{printed}");
}

#[test]
fn e2e_sample_fibonacci() {
    check_sample("fibonacci");
}

#[test]
fn e2e_sample_closures() {
    check_sample("closures");
}

#[test]
fn e2e_sample_pipes() {
    check_sample("pipes");
}

#[test]
fn e2e_sample_safety() {
    check_sample("safety");
}

#[test]
fn e2e_sample_control_flow() {
    check_sample("control_flow");
}

#[test]
fn e2e_sample_tables() {
    check_sample("tables");
}

#[test]
fn e2e_sample_globals() {
    check_sample("globals");
}
