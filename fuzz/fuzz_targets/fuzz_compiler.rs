#![no_main]

use fluid_compiler::{compile, disassemble, CompileOptions};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // The compiler must never panic on any input.
    if let Ok(proto) = compile(data, &CompileOptions::new().with_chunk_name("fuzz")) {
        let _ = disassemble(&proto);
    }
    let _ = compile(data, &CompileOptions::default().with_constant_folding(false));
});
