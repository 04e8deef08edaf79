//! Static syntax validation for provisioning scripts.
//!
//! Validation runs in two stages: the dialect's lexer tokenises the source,
//! then a structural parser checks that every block construct is opened and
//! closed correctly. Nothing is ever executed. A lexer error stops validation
//! (it is the deepest stage reached); structural errors are collected in
//! source order because the parser recovers after each one.

mod powershell;
mod shell;

use serde::Serialize;

use crate::script::ScriptKind;

/// Byte range within a script source.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct Span {
    pub(crate) start: usize,
    pub(crate) end: usize,
}

impl Span {
    pub(crate) const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// Dialect-level syntax error prior to line/column resolution.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Diagnostic {
    pub(crate) message: String,
    pub(crate) span: Option<Span>,
}

impl Diagnostic {
    pub(crate) fn at(span: Span, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            span: Some(span),
        }
    }
}

/// A single parse error with an optional 1-based position.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseError {
    /// Human-readable description.
    pub message: String,
    /// 1-based line number, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    /// 1-based column (in characters), when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
}

impl ParseError {
    /// Creates an error without position information.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
            column: None,
        }
    }

    fn from_diagnostic(source: &str, diagnostic: Diagnostic) -> Self {
        let (line, column) = diagnostic.span.map_or((None, None), |span| {
            let (row, col) = locate(source, span.start);
            (Some(row), Some(col))
        });
        Self {
            message: diagnostic.message,
            line,
            column,
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(column)) => write!(formatter, "{line}:{column}: {}", self.message),
            (Some(line), None) => write!(formatter, "{line}: {}", self.message),
            _ => formatter.write_str(&self.message),
        }
    }
}

/// Outcome of the syntax stage.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyntaxOutcome {
    /// Both stages completed without errors.
    Pass,
    /// At least one error was found.
    Fail,
}

/// Result of validating one script.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyntaxResult {
    /// Pass or fail.
    pub outcome: SyntaxOutcome,
    /// Errors in source order; empty on success.
    pub errors: Vec<ParseError>,
}

impl SyntaxResult {
    /// A passing result.
    #[must_use]
    pub const fn pass() -> Self {
        Self {
            outcome: SyntaxOutcome::Pass,
            errors: Vec::new(),
        }
    }

    /// Builds a result from a list of errors; an empty list passes.
    #[must_use]
    pub fn from_errors(errors: Vec<ParseError>) -> Self {
        let outcome = if errors.is_empty() {
            SyntaxOutcome::Pass
        } else {
            SyntaxOutcome::Fail
        };
        Self { outcome, errors }
    }

    /// Returns `true` when validation passed.
    #[must_use]
    pub const fn passed(&self) -> bool {
        matches!(self.outcome, SyntaxOutcome::Pass)
    }
}

/// Validates `source` as a script of the given dialect without executing it.
///
/// Never panics on malformed input; every problem is reported as data.
#[must_use]
pub fn validate(kind: ScriptKind, source: &str) -> SyntaxResult {
    let diagnostics = match kind {
        ScriptKind::Shell => shell::check(source),
        ScriptKind::PowerShell => powershell::check(source),
    };
    SyntaxResult::from_errors(
        diagnostics
            .into_iter()
            .map(|diagnostic| ParseError::from_diagnostic(source, diagnostic))
            .collect(),
    )
}

/// Resolves a byte offset to a 1-based `(line, column)` pair.
pub(crate) fn locate(source: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut column = 1;
    for (index, ch) in source.char_indices() {
        if index >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    (line, column)
}

/// Resolves the 1-based line of a byte offset.
pub(crate) fn line_of(source: &str, offset: usize) -> usize {
    locate(source, offset).0
}
