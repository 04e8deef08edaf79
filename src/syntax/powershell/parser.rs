//! Structural checks for PowerShell token streams.
//!
//! Brackets are balanced on a stack of levels; each level also tracks what
//! the current statement still owes (a `( … )` condition, a `{ … }` block, a
//! function name) and which construct just finished, so that `else`,
//! `catch`, and `finally` can be checked against their predecessors.

use super::lexer::{Closer, Group, Token, TokenKind};
use crate::syntax::{Diagnostic, Span, line_of};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Construct {
    If,
    Try,
    Catch,
    Do,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Stage {
    Condition,
    Block,
    Name,
    /// Optional `( … )` parameter list, then the body.
    Parameters,
    /// Optional `[Type]` filters, then the handler block.
    TypeFilters,
    /// `switch` may carry `-Regex`-style options before its condition.
    SwitchOptions,
}

#[derive(Clone, Copy, Debug)]
struct Expect {
    keyword: &'static str,
    span: Span,
    stage: Stage,
    /// `false` for the trailing condition of `do { } while ( … )`.
    needs_block: bool,
    /// Construct recorded once the block closes.
    produces: Option<Construct>,
    /// `foreach` is also the `ForEach-Object` alias; anything other than a
    /// `(` turns the statement into a command.
    alias: bool,
}

impl Expect {
    fn message(&self, source: &str) -> String {
        let line = line_of(source, self.span.start);
        match self.stage {
            Stage::Condition | Stage::SwitchOptions => {
                format!("`{}` at line {line} is missing its `(` condition", self.keyword)
            }
            Stage::Name => format!("`{}` at line {line} is missing a name", self.keyword),
            Stage::Block | Stage::Parameters | Stage::TypeFilters => {
                format!("`{}` at line {line} is missing its `{{` block", self.keyword)
            }
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Level {
    group: Option<(Group, Span)>,
    statement_start: bool,
    expect: Option<Expect>,
    /// Construct whose block just closed at this level, with its keyword span.
    last: Option<(Construct, Span)>,
    /// Construct produced when this level's block closes.
    on_close: Option<Construct>,
    opened_by: Option<Span>,
}

impl Level {
    const fn new(group: Option<(Group, Span)>, statement_start: bool) -> Self {
        Self {
            group,
            statement_start,
            expect: None,
            last: None,
            on_close: None,
            opened_by: None,
        }
    }
}

struct Parser<'a> {
    source: &'a str,
    root: Level,
    nested: Vec<Level>,
    diagnostics: Vec<Diagnostic>,
}

/// Checks bracket balance and keyword structure.
pub(super) fn check_structure(source: &str, tokens: &[Token]) -> Vec<Diagnostic> {
    let mut parser = Parser {
        source,
        root: Level::new(None, true),
        nested: Vec::new(),
        diagnostics: Vec::new(),
    };
    for token in tokens {
        parser.token(token);
    }
    parser.finish()
}

impl Parser<'_> {
    fn error(&mut self, span: Span, message: String) {
        self.diagnostics.push(Diagnostic::at(span, message));
    }

    fn level(&mut self) -> &mut Level {
        self.nested.last_mut().unwrap_or(&mut self.root)
    }

    fn token(&mut self, token: &Token) {
        match &token.kind {
            TokenKind::StatementEnd => {
                let level = self.level();
                if level.expect.is_none() {
                    level.statement_start = true;
                }
            }
            TokenKind::Open(group) => self.open(*group, token.span),
            TokenKind::Close(closer) => self.close(*closer, token.span),
            TokenKind::Word(text) => self.word(text, token.span),
            TokenKind::Comma | TokenKind::Other => self.other(&token.kind),
        }
    }

    /// Reports an owed element and drops the expectation.
    fn abandon_expect(&mut self) {
        if let Some(expect) = self.level().expect.take() {
            let message = expect.message(self.source);
            self.error(expect.span, message);
        }
    }

    /// Drops the expectation, reporting it unless the keyword doubles as a
    /// command name.
    fn abandon_or_alias(&mut self) {
        if self.level().expect.is_some_and(|expect| expect.alias) {
            self.level().expect = None;
        } else {
            self.abandon_expect();
        }
    }

    /// Closes out `try`/`do` constructs that needed a continuation.
    fn settle_last(&mut self) {
        match self.level().last.take() {
            Some((Construct::Try, span)) => {
                let line = line_of(self.source, span.start);
                self.error(
                    span,
                    format!("`try` block at line {line} is missing a `catch` or `finally` block"),
                );
            }
            Some((Construct::Do, span)) => {
                let line = line_of(self.source, span.start);
                self.error(
                    span,
                    format!("`do` block at line {line} is missing its `while` or `until` condition"),
                );
            }
            _ => {}
        }
    }

    fn begin_plain_statement(&mut self) {
        let level = self.level();
        if level.statement_start {
            level.statement_start = false;
            self.settle_last();
        }
    }

    fn other(&mut self, kind: &TokenKind) {
        let expect = self.level().expect;
        match expect {
            Some(Expect {
                stage: Stage::TypeFilters,
                ..
            }) if *kind == TokenKind::Comma => {}
            Some(_) => self.abandon_or_alias(),
            None => self.begin_plain_statement(),
        }
    }

    fn open(&mut self, group: Group, span: Span) {
        let mut on_close = None;
        let mut opened_by = None;

        if let Some(mut expect) = self.level().expect {
            let level_expect = match (expect.stage, group) {
                (Stage::Condition | Stage::SwitchOptions, Group::Paren) => {
                    expect.alias = false;
                    if expect.needs_block {
                        expect.stage = Stage::Block;
                        Some(expect)
                    } else {
                        None
                    }
                }
                (Stage::Parameters, Group::Paren) => {
                    expect.stage = Stage::Block;
                    Some(expect)
                }
                (Stage::TypeFilters, Group::Bracket) => Some(expect),
                (Stage::Block | Stage::Parameters | Stage::TypeFilters, Group::Brace) => {
                    on_close = expect.produces;
                    opened_by = Some(expect.span);
                    None
                }
                _ => {
                    self.abandon_or_alias();
                    None
                }
            };
            let level = self.level();
            level.expect = level_expect;
            level.statement_start = false;
        } else {
            self.begin_plain_statement();
        }

        let statement_start = !matches!(group, Group::Bracket);
        let mut level = Level::new(Some((group, span)), statement_start);
        level.on_close = on_close;
        level.opened_by = opened_by;
        self.nested.push(level);
    }

    fn close(&mut self, closer: Closer, span: Span) {
        let open = self.level().group;
        match open {
            Some((group, _)) if group.closer() == closer => {
                self.abandon_expect();
                self.settle_last();
                let closed = self.nested.pop();
                let produced = closed.and_then(|level| level.on_close.zip(level.opened_by));
                let parent = self.level();
                if let Some((construct, keyword_span)) = produced {
                    parent.last = Some((construct, keyword_span));
                    parent.statement_start = true;
                } else if closed.is_some_and(|level| level.opened_by.is_some()) {
                    parent.statement_start = true;
                }
            }
            Some((group, open_span)) => {
                let line = line_of(self.source, open_span.start);
                self.error(
                    span,
                    format!(
                        "unexpected `{}` (expected `{}` to close `{}` opened at line {line})",
                        closer.as_str(),
                        group.closer().as_str(),
                        group.opener()
                    ),
                );
            }
            None => self.error(span, format!("unexpected `{}`", closer.as_str())),
        }
    }

    fn word(&mut self, text: &str, span: Span) {
        if let Some(mut expect) = self.level().expect {
            match expect.stage {
                Stage::Name => {
                    expect.stage = Stage::Parameters;
                    self.level().expect = Some(expect);
                }
                Stage::SwitchOptions if text.starts_with('-') => {}
                _ => self.abandon_or_alias(),
            }
            return;
        }

        if !self.level().statement_start {
            return;
        }
        if matches!(self.level().group, Some((Group::HashLiteral, _))) {
            // `@{ Process = 1 }`: statements inside a hashtable start with a key.
            self.begin_plain_statement();
            return;
        }
        self.level().statement_start = false;

        let keyword = text.to_ascii_lowercase();
        let last = self.level().last.take();
        let last_construct = last.map(|(construct, _)| construct);

        let continues = match keyword.as_str() {
            "elseif" | "else" => last_construct == Some(Construct::If),
            "catch" | "finally" => {
                matches!(last_construct, Some(Construct::Try | Construct::Catch))
            }
            "while" | "until" => last_construct == Some(Construct::Do),
            _ => false,
        };
        if !continues {
            self.level().last = last;
            self.settle_last();
        }

        let owe = |name: &'static str, stage: Stage, produces: Option<Construct>| Expect {
            keyword: name,
            span,
            stage,
            needs_block: true,
            produces,
            alias: false,
        };

        let next = match keyword.as_str() {
            "if" => Some(owe("if", Stage::Condition, Some(Construct::If))),
            "elseif" => {
                if !continues {
                    self.misplaced("elseif", "an `if` or `elseif`", span);
                }
                Some(owe("elseif", Stage::Condition, Some(Construct::If)))
            }
            "else" => {
                if !continues {
                    self.misplaced("else", "an `if` or `elseif`", span);
                }
                Some(owe("else", Stage::Block, None))
            }
            "while" if continues => Some(Expect {
                needs_block: false,
                ..owe("while", Stage::Condition, None)
            }),
            "until" if continues => Some(Expect {
                needs_block: false,
                ..owe("until", Stage::Condition, None)
            }),
            "while" => Some(owe("while", Stage::Condition, None)),
            "for" => Some(owe("for", Stage::Condition, None)),
            "foreach" => Some(Expect {
                alias: true,
                ..owe("foreach", Stage::Condition, None)
            }),
            "switch" => Some(owe("switch", Stage::SwitchOptions, None)),
            "do" => Some(owe("do", Stage::Block, Some(Construct::Do))),
            "try" => Some(owe("try", Stage::Block, Some(Construct::Try))),
            "catch" => {
                if !continues {
                    self.misplaced("catch", "a `try` or `catch`", span);
                }
                Some(owe("catch", Stage::TypeFilters, Some(Construct::Catch)))
            }
            "finally" => {
                if !continues {
                    self.misplaced("finally", "a `try` or `catch`", span);
                }
                Some(owe("finally", Stage::Block, None))
            }
            "trap" => Some(owe("trap", Stage::TypeFilters, None)),
            "begin" => Some(owe("begin", Stage::Block, None)),
            "process" => Some(owe("process", Stage::Block, None)),
            "end" => Some(owe("end", Stage::Block, None)),
            "dynamicparam" => Some(owe("dynamicparam", Stage::Block, None)),
            "function" => Some(owe("function", Stage::Name, None)),
            "filter" => Some(owe("filter", Stage::Name, None)),
            "workflow" => Some(owe("workflow", Stage::Name, None)),
            _ => None,
        };
        self.level().expect = next;
    }

    fn misplaced(&mut self, keyword: &str, predecessor: &str, span: Span) {
        self.error(
            span,
            format!("`{keyword}` must follow {predecessor} block"),
        );
    }

    fn finish(mut self) -> Vec<Diagnostic> {
        while let Some(level) = self.nested.last().copied() {
            self.abandon_expect();
            self.settle_last();
            self.nested.pop();
            if let Some((group, span)) = level.group {
                let line = line_of(self.source, span.start);
                self.error(
                    span,
                    format!(
                        "`{}` opened at line {line} is never closed (expected `{}`)",
                        group.opener(),
                        group.closer().as_str()
                    ),
                );
            }
        }
        self.abandon_expect();
        self.settle_last();
        self.diagnostics.sort_by_key(|diagnostic| diagnostic.span.map(|span| span.start));
        self.diagnostics
    }
}
