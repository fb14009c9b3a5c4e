#![no_main]

use fluid_compiler::lexer::Lexer;
use fluid_compiler::token::Token;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Errors are fine, panics are bugs.
    let mut lexer = Lexer::new(data);
    while let Ok(tok) = lexer.next_token() {
        if tok.token == Token::Eof {
            break;
        }
    }
});
