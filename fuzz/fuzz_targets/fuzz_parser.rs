#![no_main]

use fluid_compiler::{parse, print_chunk, CompileOptions};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = parse(data, &CompileOptions::default().accumulate(64));

    // Whatever parses must print back to source that parses to the same tree.
    if let Ok(mut block) = parse(data, &CompileOptions::default()) {
        let printed = print_chunk(&block);
        let mut reparsed = parse(printed.as_bytes(), &CompileOptions::default())
            .unwrap_or_else(|e| panic!("printed chunk failed to parse: {e}\n{printed}"));
        block.clear_spans();
        reparsed.clear_spans();
        assert_eq!(block, reparsed, "round trip changed the tree:\n{printed}");
    }
});
