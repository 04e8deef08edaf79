//! POSIX shell dialect: lexer plus block-structure parser.

mod lexer;
mod parser;

use super::Diagnostic;

/// Runs both validation stages over a shell script.
pub(super) fn check(source: &str) -> Vec<Diagnostic> {
    match lexer::tokenize(source) {
        Ok(tokens) => parser::check_structure(source, &tokens),
        Err(err) => vec![err.into_diagnostic()],
    }
}
