//! Block-structure checker for shell token streams.
//!
//! Tracks `if`/`fi`, `while`/`until`/`for`/`select` … `do`/`done`,
//! `case`/`esac`, `{`/`}`, and `(`/`)` on an explicit stack. Reserved words
//! are only recognised in command position, matching how a shell reads them.
//! After a mismatch the offending token is skipped so later errors are still
//! reported.

use std::iter::Peekable;
use std::slice::Iter;

use super::lexer::{Operator, Token, TokenKind};
use crate::syntax::{Diagnostic, Span, line_of};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum IfStage {
    Condition,
    Body,
    Else,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum CaseStage {
    Subject,
    In,
    Pattern { start: bool },
    Body,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum FrameKind {
    If(IfStage),
    LoopHeader,
    LoopBody,
    Case(CaseStage),
    Brace,
    Subshell,
}

impl FrameKind {
    const fn expected(self) -> &'static str {
        match self {
            Self::If(IfStage::Condition) => "then",
            Self::If(_) => "fi",
            Self::LoopHeader => "do",
            Self::LoopBody => "done",
            Self::Case(CaseStage::Subject | CaseStage::In) => "in",
            Self::Case(_) => "esac",
            Self::Brace => "}",
            Self::Subshell => ")",
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Frame {
    kind: FrameKind,
    opener: &'static str,
    span: Span,
}

struct Parser<'a> {
    source: &'a str,
    stack: Vec<Frame>,
    diagnostics: Vec<Diagnostic>,
    command_start: bool,
    /// The previous token was the first word of a simple command.
    after_command_name: bool,
    expect_target: Option<Span>,
    expect_function_name: bool,
    after_function_name: bool,
}

/// Checks block structure and returns every mismatch found.
pub(super) fn check_structure(source: &str, tokens: &[Token]) -> Vec<Diagnostic> {
    let mut parser = Parser {
        source,
        stack: Vec::new(),
        diagnostics: Vec::new(),
        command_start: true,
        after_command_name: false,
        expect_target: None,
        expect_function_name: false,
        after_function_name: false,
    };
    let mut tokens = tokens.iter().peekable();
    while let Some(token) = tokens.next() {
        parser.token(token, &mut tokens);
    }
    parser.finish()
}

impl Parser<'_> {
    fn error(&mut self, span: Span, message: String) {
        self.diagnostics.push(Diagnostic::at(span, message));
    }

    fn top(&self) -> Option<FrameKind> {
        self.stack.last().map(|frame| frame.kind)
    }

    fn set_top(&mut self, kind: FrameKind) {
        if let Some(frame) = self.stack.last_mut() {
            frame.kind = kind;
        }
    }

    fn open(&mut self, kind: FrameKind, opener: &'static str, span: Span) {
        self.stack.push(Frame { kind, opener, span });
    }

    fn unexpected(&mut self, text: &str, span: Span) {
        let context = self.stack.last().map_or_else(String::new, |frame| {
            format!(
                " (inside `{}` opened at line {})",
                frame.opener,
                line_of(self.source, frame.span.start)
            )
        });
        self.error(span, format!("unexpected `{text}`{context}"));
    }

    fn token(&mut self, token: &Token, rest: &mut Peekable<Iter<'_, Token>>) {
        match &token.kind {
            TokenKind::Newline => self.newline(token.span),
            TokenKind::Redirect { needs_target } => {
                self.flush_target(token.span);
                if *needs_target {
                    self.expect_target = Some(token.span);
                }
            }
            TokenKind::Operator(operator) => self.operator(*operator, token.span, rest),
            TokenKind::Word { text, plain } => self.word(text, *plain, token.span),
        }
    }

    fn flush_target(&mut self, at: Span) {
        if let Some(redirect) = self.expect_target.take() {
            let line = line_of(self.source, redirect.start);
            self.error(
                at,
                format!("missing redirection target for operator on line {line}"),
            );
        }
    }

    fn newline(&mut self, span: Span) {
        self.flush_target(span);
        self.after_command_name = false;
        self.after_function_name = false;
        self.command_start = true;
    }

    fn operator(&mut self, operator: Operator, span: Span, rest: &mut Peekable<Iter<'_, Token>>) {
        self.flush_target(span);
        let after_name = self.after_command_name || self.after_function_name;
        self.after_command_name = false;
        self.after_function_name = false;

        match operator {
            Operator::Pipe if matches!(self.top(), Some(FrameKind::Case(CaseStage::Pattern { .. }))) => {}
            Operator::Semi
            | Operator::Amp
            | Operator::AndIf
            | Operator::OrIf
            | Operator::Pipe
            | Operator::PipeAmp => {
                if matches!(self.top(), Some(FrameKind::Case(stage)) if stage != CaseStage::Body) {
                    self.unexpected(operator.as_str(), span);
                }
                self.command_start = true;
            }
            Operator::DoubleSemi | Operator::SemiAmp | Operator::DoubleSemiAmp => {
                if self.top() == Some(FrameKind::Case(CaseStage::Body)) {
                    self.set_top(FrameKind::Case(CaseStage::Pattern { start: true }));
                } else {
                    self.unexpected(operator.as_str(), span);
                }
                self.command_start = true;
            }
            Operator::LParen => self.left_paren(span, after_name, rest),
            Operator::RParen => match self.top() {
                Some(FrameKind::Case(CaseStage::Pattern { start: false })) => {
                    self.set_top(FrameKind::Case(CaseStage::Body));
                    self.command_start = true;
                }
                Some(FrameKind::Subshell) => {
                    self.stack.pop();
                    self.command_start = false;
                }
                _ => self.unexpected(")", span),
            },
        }
    }

    fn left_paren(&mut self, span: Span, after_name: bool, rest: &mut Peekable<Iter<'_, Token>>) {
        if self.top() == Some(FrameKind::Case(CaseStage::Pattern { start: true })) {
            self.set_top(FrameKind::Case(CaseStage::Pattern { start: false }));
            return;
        }
        let closes_immediately = rest
            .peek()
            .is_some_and(|next| next.kind == TokenKind::Operator(Operator::RParen));
        if after_name && closes_immediately {
            rest.next();
            self.command_start = true;
            return;
        }
        if self.command_start {
            self.open(FrameKind::Subshell, "(", span);
            self.command_start = true;
            return;
        }
        self.unexpected("(", span);
    }

    fn word(&mut self, text: &str, plain: bool, span: Span) {
        if self.expect_target.take().is_some() {
            self.after_command_name = false;
            return;
        }
        if self.expect_function_name {
            self.expect_function_name = false;
            self.after_function_name = true;
            self.command_start = true;
            return;
        }
        self.after_function_name = false;

        match self.top() {
            Some(FrameKind::Case(CaseStage::Subject)) => {
                self.set_top(FrameKind::Case(CaseStage::In));
                return;
            }
            Some(FrameKind::Case(CaseStage::In)) => {
                if !(plain && text == "in") {
                    self.error(span, format!("expected `in` after `case` subject, found `{text}`"));
                }
                self.set_top(FrameKind::Case(CaseStage::Pattern { start: true }));
                return;
            }
            Some(FrameKind::Case(CaseStage::Pattern { start })) => {
                if start && plain && text == "esac" {
                    self.stack.pop();
                    self.command_start = false;
                } else {
                    self.set_top(FrameKind::Case(CaseStage::Pattern { start: false }));
                }
                return;
            }
            _ => {}
        }

        if self.command_start && plain && self.reserved(text, span) {
            self.after_command_name = false;
            return;
        }

        self.after_command_name = self.command_start;
        self.command_start = false;
    }

    /// Handles `text` as a reserved word; returns `false` for ordinary words.
    fn reserved(&mut self, text: &str, span: Span) -> bool {
        match text {
            "if" => {
                self.open(FrameKind::If(IfStage::Condition), "if", span);
                self.command_start = true;
            }
            "then" => {
                if self.top() == Some(FrameKind::If(IfStage::Condition)) {
                    self.set_top(FrameKind::If(IfStage::Body));
                } else {
                    self.unexpected(text, span);
                }
                self.command_start = true;
            }
            "elif" => {
                if self.top() == Some(FrameKind::If(IfStage::Body)) {
                    self.set_top(FrameKind::If(IfStage::Condition));
                } else {
                    self.unexpected(text, span);
                }
                self.command_start = true;
            }
            "else" => {
                if self.top() == Some(FrameKind::If(IfStage::Body)) {
                    self.set_top(FrameKind::If(IfStage::Else));
                } else {
                    self.unexpected(text, span);
                }
                self.command_start = true;
            }
            "fi" => {
                if matches!(
                    self.top(),
                    Some(FrameKind::If(IfStage::Body | IfStage::Else))
                ) {
                    self.stack.pop();
                } else {
                    self.unexpected(text, span);
                }
                self.command_start = false;
            }
            "while" | "until" => {
                let opener = if text == "while" { "while" } else { "until" };
                self.open(FrameKind::LoopHeader, opener, span);
                self.command_start = true;
            }
            "for" | "select" => {
                let opener = if text == "for" { "for" } else { "select" };
                self.open(FrameKind::LoopHeader, opener, span);
                self.command_start = false;
            }
            "do" => {
                if self.top() == Some(FrameKind::LoopHeader) {
                    self.set_top(FrameKind::LoopBody);
                } else {
                    self.unexpected(text, span);
                }
                self.command_start = true;
            }
            "done" => {
                if self.top() == Some(FrameKind::LoopBody) {
                    self.stack.pop();
                } else {
                    self.unexpected(text, span);
                }
                self.command_start = false;
            }
            "case" => {
                self.open(FrameKind::Case(CaseStage::Subject), "case", span);
                self.command_start = false;
            }
            "esac" => {
                if self.top() == Some(FrameKind::Case(CaseStage::Body)) {
                    self.stack.pop();
                } else {
                    self.unexpected(text, span);
                }
                self.command_start = false;
            }
            "{" => {
                self.open(FrameKind::Brace, "{", span);
                self.command_start = true;
            }
            "}" => {
                if self.top() == Some(FrameKind::Brace) {
                    self.stack.pop();
                } else {
                    self.unexpected(text, span);
                }
                self.command_start = false;
            }
            "function" => {
                self.expect_function_name = true;
                self.command_start = false;
            }
            "!" | "time" => self.command_start = true,
            _ => return false,
        }
        true
    }

    fn finish(mut self) -> Vec<Diagnostic> {
        let end = Span::new(self.source.len(), self.source.len());
        self.flush_target(end);
        if self.expect_function_name {
            self.error(end, String::from("expected a function name after `function`"));
        }
        let unclosed = std::mem::take(&mut self.stack);
        for frame in unclosed {
            let line = line_of(self.source, frame.span.start);
            self.error(
                frame.span,
                format!(
                    "`{}` opened at line {line} is never closed (expected `{}`)",
                    frame.opener,
                    frame.kind.expected()
                ),
            );
        }
        self.diagnostics.sort_by_key(|diagnostic| diagnostic.span.map(|span| span.start));
        self.diagnostics
    }
}
