//! Shell tokeniser.
//!
//! Produces words, control operators, redirections, and newlines. Quoting,
//! expansions, and here-document bodies are consumed here so that the
//! structural parser only ever sees top-level tokens.

use std::collections::VecDeque;
use std::iter::Peekable;
use std::str::CharIndices;

use thiserror::Error;

use crate::syntax::{Diagnostic, Span};

/// Control operators that separate or group commands.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum Operator {
    Semi,
    DoubleSemi,
    SemiAmp,
    DoubleSemiAmp,
    Amp,
    AndIf,
    Pipe,
    PipeAmp,
    OrIf,
    LParen,
    RParen,
}

impl Operator {
    pub(super) const fn as_str(self) -> &'static str {
        match self {
            Self::Semi => ";",
            Self::DoubleSemi => ";;",
            Self::SemiAmp => ";&",
            Self::DoubleSemiAmp => ";;&",
            Self::Amp => "&",
            Self::AndIf => "&&",
            Self::Pipe => "|",
            Self::PipeAmp => "|&",
            Self::OrIf => "||",
            Self::LParen => "(",
            Self::RParen => ")",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(super) enum TokenKind {
    /// A word. Plain words carry no quoting or expansion and may therefore be
    /// reserved words when they appear in command position.
    Word { text: String, plain: bool },
    Operator(Operator),
    /// A redirection operator; `needs_target` is false for here-documents,
    /// whose delimiter is consumed by the lexer.
    Redirect { needs_target: bool },
    Newline,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(super) struct Token {
    pub(super) kind: TokenKind,
    pub(super) span: Span,
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub(super) enum LexError {
    #[error("unterminated single-quoted string")]
    UnterminatedSingleQuote { span: Span },
    #[error("unterminated double-quoted string")]
    UnterminatedDoubleQuote { span: Span },
    #[error("unterminated command substitution `$(`")]
    UnterminatedCommandSubstitution { span: Span },
    #[error("unterminated arithmetic expression `((`")]
    UnterminatedArithmetic { span: Span },
    #[error("unterminated parameter expansion `${{`")]
    UnterminatedParameterExpansion { span: Span },
    #[error("unterminated backtick command substitution")]
    UnterminatedBacktick { span: Span },
    #[error("unterminated parenthesised word")]
    UnterminatedGroup { span: Span },
    #[error("here-document delimited by `{delimiter}` is never terminated")]
    UnterminatedHereDoc { delimiter: String, span: Span },
    #[error("missing here-document delimiter after `<<`")]
    MissingHereDocDelimiter { span: Span },
    #[error("trailing backslash at end of input")]
    TrailingBackslash { span: Span },
}

impl LexError {
    const fn span(&self) -> Span {
        match self {
            Self::UnterminatedSingleQuote { span }
            | Self::UnterminatedDoubleQuote { span }
            | Self::UnterminatedCommandSubstitution { span }
            | Self::UnterminatedArithmetic { span }
            | Self::UnterminatedParameterExpansion { span }
            | Self::UnterminatedBacktick { span }
            | Self::UnterminatedGroup { span }
            | Self::UnterminatedHereDoc { span, .. }
            | Self::MissingHereDocDelimiter { span }
            | Self::TrailingBackslash { span } => *span,
        }
    }

    pub(super) fn into_diagnostic(self) -> Diagnostic {
        Diagnostic::at(self.span(), self.to_string())
    }
}

/// Here-document whose body starts after the next newline.
struct PendingHereDoc {
    delimiter: String,
    strip_tabs: bool,
    span: Span,
}

struct Lexer<'a> {
    input: &'a str,
    chars: Peekable<CharIndices<'a>>,
    pending: VecDeque<PendingHereDoc>,
    tokens: Vec<Token>,
    /// Inside `[[ … ]]`, where parentheses and `<`/`>` are operands.
    in_conditional: bool,
}

/// Tokenises a complete shell script.
pub(super) fn tokenize(input: &str) -> Result<Vec<Token>, LexError> {
    let mut lexer = Lexer {
        input,
        chars: input.char_indices().peekable(),
        pending: VecDeque::new(),
        tokens: Vec::new(),
        in_conditional: false,
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

const fn is_word_boundary(ch: char) -> bool {
    matches!(
        ch,
        ' ' | '\t' | '\r' | '\n' | ';' | '&' | '|' | '(' | ')' | '<' | '>'
    )
}

impl Lexer<'_> {
    fn peek(&mut self) -> Option<(usize, char)> {
        self.chars.peek().copied()
    }

    fn peek_char(&mut self) -> Option<char> {
        self.peek().map(|(_, ch)| ch)
    }

    fn peek_second(&self) -> Option<char> {
        let mut lookahead = self.chars.clone();
        lookahead.next();
        lookahead.next().map(|(_, ch)| ch)
    }

    fn bump(&mut self) -> Option<(usize, char)> {
        self.chars.next()
    }

    fn offset(&mut self) -> usize {
        self.peek().map_or(self.input.len(), |(index, _)| index)
    }

    const fn to_end(&self, start: usize) -> Span {
        Span::new(start, self.input.len())
    }

    fn push(&mut self, kind: TokenKind, start: usize) {
        let end = self.offset();
        self.tokens.push(Token {
            kind,
            span: Span::new(start, end),
        });
    }

    fn run(&mut self) -> Result<(), LexError> {
        while let Some((start, ch)) = self.peek() {
            match ch {
                ' ' | '\t' | '\r' => {
                    self.bump();
                }
                '\n' => {
                    self.bump();
                    self.push(TokenKind::Newline, start);
                    self.read_heredoc_bodies()?;
                }
                '\\' if self.peek_second() == Some('\n') => {
                    self.bump();
                    self.bump();
                }
                '#' => self.skip_comment(),
                '(' | ')' | '|' | '<' | '>' if self.in_conditional => {
                    if ch == '|' && self.peek_second() == Some('|') {
                        self.lex_operator(start, ch);
                    } else {
                        self.lex_word(start)?;
                    }
                }
                ';' | '&' | '|' => self.lex_operator(start, ch),
                '(' if self.peek_second() == Some('(') => {
                    self.bump();
                    self.bump();
                    self.read_arithmetic(start)?;
                    self.push(
                        TokenKind::Word {
                            text: String::from("(("),
                            plain: false,
                        },
                        start,
                    );
                }
                '(' => {
                    self.bump();
                    self.push(TokenKind::Operator(Operator::LParen), start);
                }
                ')' => {
                    self.bump();
                    self.push(TokenKind::Operator(Operator::RParen), start);
                }
                '<' | '>' => self.lex_redirection(start, ch)?,
                _ => self.lex_word(start)?,
            }
        }

        match self.pending.pop_front() {
            Some(pending) => Err(LexError::UnterminatedHereDoc {
                delimiter: pending.delimiter,
                span: pending.span,
            }),
            None => Ok(()),
        }
    }

    fn skip_comment(&mut self) {
        while let Some(ch) = self.peek_char() {
            if ch == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn lex_operator(&mut self, start: usize, ch: char) {
        self.bump();
        let operator = match ch {
            ';' => match self.peek_char() {
                Some(';') => {
                    self.bump();
                    if self.peek_char() == Some('&') {
                        self.bump();
                        Operator::DoubleSemiAmp
                    } else {
                        Operator::DoubleSemi
                    }
                }
                Some('&') => {
                    self.bump();
                    Operator::SemiAmp
                }
                _ => Operator::Semi,
            },
            '&' => match self.peek_char() {
                Some('&') => {
                    self.bump();
                    Operator::AndIf
                }
                Some('>') => {
                    self.bump();
                    if self.peek_char() == Some('>') {
                        self.bump();
                    }
                    self.push(TokenKind::Redirect { needs_target: true }, start);
                    return;
                }
                _ => Operator::Amp,
            },
            _ => match self.peek_char() {
                Some('|') => {
                    self.bump();
                    Operator::OrIf
                }
                Some('&') => {
                    self.bump();
                    Operator::PipeAmp
                }
                _ => Operator::Pipe,
            },
        };
        self.push(TokenKind::Operator(operator), start);
    }

    fn lex_redirection(&mut self, start: usize, ch: char) -> Result<(), LexError> {
        self.bump();
        if self.peek_char() == Some('(') {
            self.bump();
            self.read_paren_body(start)
                .map_err(|span| LexError::UnterminatedCommandSubstitution { span })?;
            self.push(
                TokenKind::Word {
                    text: format!("{ch}(…)"),
                    plain: false,
                },
                start,
            );
            return Ok(());
        }

        if ch == '<' && self.peek_char() == Some('<') {
            self.bump();
            if self.peek_char() == Some('<') {
                self.bump();
                self.push(TokenKind::Redirect { needs_target: true }, start);
                return Ok(());
            }
            let strip_tabs = self.peek_char() == Some('-');
            if strip_tabs {
                self.bump();
            }
            self.read_heredoc_delimiter(start, strip_tabs)?;
            self.push(TokenKind::Redirect { needs_target: false }, start);
            return Ok(());
        }

        if matches!(self.peek_char(), Some('>' | '&' | '|')) {
            self.bump();
        }
        self.push(TokenKind::Redirect { needs_target: true }, start);
        Ok(())
    }

    fn read_heredoc_delimiter(&mut self, start: usize, strip_tabs: bool) -> Result<(), LexError> {
        while matches!(self.peek_char(), Some(' ' | '\t')) {
            self.bump();
        }

        let mut delimiter = String::new();
        let mut quoted = false;
        while let Some((pos, ch)) = self.peek() {
            if is_word_boundary(ch) {
                break;
            }
            self.bump();
            match ch {
                '\'' | '"' => {
                    quoted = true;
                    loop {
                        match self.bump() {
                            Some((_, close)) if close == ch => break,
                            Some((_, inner)) => delimiter.push(inner),
                            None => {
                                return Err(if ch == '\'' {
                                    LexError::UnterminatedSingleQuote {
                                        span: self.to_end(pos),
                                    }
                                } else {
                                    LexError::UnterminatedDoubleQuote {
                                        span: self.to_end(pos),
                                    }
                                });
                            }
                        }
                    }
                }
                '\\' => {
                    quoted = true;
                    if let Some((_, escaped)) = self.bump() {
                        delimiter.push(escaped);
                    }
                }
                _ => delimiter.push(ch),
            }
        }

        if delimiter.is_empty() && !quoted {
            return Err(LexError::MissingHereDocDelimiter {
                span: Span::new(start, self.offset()),
            });
        }
        let end = self.offset();
        self.pending.push_back(PendingHereDoc {
            delimiter,
            strip_tabs,
            span: Span::new(start, end),
        });
        Ok(())
    }

    fn read_heredoc_bodies(&mut self) -> Result<(), LexError> {
        while let Some(pending) = self.pending.pop_front() {
            loop {
                let line_start = self.offset();
                let rest = self.input.get(line_start..).unwrap_or_default();
                if rest.is_empty() {
                    return Err(LexError::UnterminatedHereDoc {
                        delimiter: pending.delimiter,
                        span: pending.span,
                    });
                }
                let line_len = rest.find('\n').unwrap_or(rest.len());
                let raw_line = rest.get(..line_len).unwrap_or_default();
                let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);
                let candidate = if pending.strip_tabs {
                    line.trim_start_matches('\t')
                } else {
                    line
                };
                let matched = candidate == pending.delimiter;
                self.advance_to(line_start + line_len + 1);
                if matched {
                    break;
                }
            }
        }
        Ok(())
    }

    fn advance_to(&mut self, offset: usize) {
        while let Some((index, _)) = self.peek() {
            if index >= offset {
                break;
            }
            self.bump();
        }
    }

    fn lex_word(&mut self, start: usize) -> Result<(), LexError> {
        let mut text = String::new();
        let mut plain = true;

        while let Some((pos, ch)) = self.peek() {
            if is_word_boundary(ch) {
                let operand = self.in_conditional
                    && matches!(ch, '(' | ')' | '|' | '<' | '>')
                    && !(ch == '|' && self.peek_second() == Some('|'));
                let array = ch == '(' && (text.ends_with('=') || text.ends_with("+="));
                if array {
                    self.bump();
                    self.read_paren_body(pos)
                        .map_err(|span| LexError::UnterminatedGroup { span })?;
                    plain = false;
                    continue;
                }
                if !operand {
                    break;
                }
                text.push(ch);
                self.bump();
                continue;
            }
            match ch {
                '\\' => {
                    self.bump();
                    match self.bump() {
                        None => {
                            return Err(LexError::TrailingBackslash {
                                span: Span::new(pos, pos + 1),
                            });
                        }
                        Some((_, '\n')) => {}
                        Some((_, escaped)) => {
                            text.push(escaped);
                            plain = false;
                        }
                    }
                }
                '\'' => {
                    plain = false;
                    self.read_single_quoted(pos)?;
                }
                '"' => {
                    plain = false;
                    self.read_double_quoted(pos)?;
                }
                '`' => {
                    plain = false;
                    self.read_backtick(pos)?;
                }
                '$' => {
                    plain = false;
                    self.read_dollar(pos)?;
                }
                _ => {
                    text.push(ch);
                    self.bump();
                }
            }
        }

        if plain && text == "[[" {
            self.in_conditional = true;
        } else if plain && text == "]]" {
            self.in_conditional = false;
        }
        self.push(TokenKind::Word { text, plain }, start);
        Ok(())
    }

    fn read_single_quoted(&mut self, start: usize) -> Result<(), LexError> {
        self.bump();
        while let Some((_, ch)) = self.bump() {
            if ch == '\'' {
                return Ok(());
            }
        }
        Err(LexError::UnterminatedSingleQuote {
            span: self.to_end(start),
        })
    }

    fn read_ansi_c_quoted(&mut self, start: usize) -> Result<(), LexError> {
        self.bump();
        while let Some((_, ch)) = self.bump() {
            match ch {
                '\\' => {
                    self.bump();
                }
                '\'' => return Ok(()),
                _ => {}
            }
        }
        Err(LexError::UnterminatedSingleQuote {
            span: self.to_end(start),
        })
    }

    fn read_double_quoted(&mut self, start: usize) -> Result<(), LexError> {
        self.bump();
        while let Some((pos, ch)) = self.peek() {
            match ch {
                '"' => {
                    self.bump();
                    return Ok(());
                }
                '\\' => {
                    self.bump();
                    self.bump();
                }
                '$' => self.read_dollar(pos)?,
                '`' => self.read_backtick(pos)?,
                _ => {
                    self.bump();
                }
            }
        }
        Err(LexError::UnterminatedDoubleQuote {
            span: self.to_end(start),
        })
    }

    fn read_backtick(&mut self, start: usize) -> Result<(), LexError> {
        self.bump();
        while let Some((_, ch)) = self.bump() {
            match ch {
                '\\' => {
                    self.bump();
                }
                '`' => return Ok(()),
                _ => {}
            }
        }
        Err(LexError::UnterminatedBacktick {
            span: self.to_end(start),
        })
    }

    /// Consumes an expansion introduced by `$` at `start`.
    fn read_dollar(&mut self, start: usize) -> Result<(), LexError> {
        self.bump();
        match self.peek_char() {
            Some('(') if self.peek_second() == Some('(') => {
                self.bump();
                self.bump();
                self.read_arithmetic(start)
            }
            Some('(') => {
                self.bump();
                self.read_paren_body(start)
                    .map_err(|span| LexError::UnterminatedCommandSubstitution { span })
            }
            Some('{') => {
                self.bump();
                self.read_parameter_expansion(start)
            }
            Some('\'') => {
                let quote_start = self.offset();
                self.read_ansi_c_quoted(quote_start)
            }
            _ => Ok(()),
        }
    }

    fn read_arithmetic(&mut self, start: usize) -> Result<(), LexError> {
        let mut depth = 0_usize;
        while let Some((_, ch)) = self.bump() {
            match ch {
                '(' => depth += 1,
                ')' if depth == 0 => {
                    if self.peek_char() == Some(')') {
                        self.bump();
                        return Ok(());
                    }
                }
                ')' => depth -= 1,
                _ => {}
            }
        }
        Err(LexError::UnterminatedArithmetic {
            span: self.to_end(start),
        })
    }

    fn read_parameter_expansion(&mut self, start: usize) -> Result<(), LexError> {
        let mut depth = 1_usize;
        while let Some((pos, ch)) = self.peek() {
            match ch {
                '\\' => {
                    self.bump();
                    self.bump();
                }
                '\'' => self.read_single_quoted(pos)?,
                '"' => self.read_double_quoted(pos)?,
                '`' => self.read_backtick(pos)?,
                '$' => self.read_dollar(pos)?,
                '{' => {
                    depth += 1;
                    self.bump();
                }
                '}' => {
                    self.bump();
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                _ => {
                    self.bump();
                }
            }
        }
        Err(LexError::UnterminatedParameterExpansion {
            span: self.to_end(start),
        })
    }

    /// Reads up to the `)` balancing an already consumed `(`.
    ///
    /// Quotes, nested expansions, and comments are honoured. `case` patterns
    /// close with a bare `)`, so those are not counted while a `case` opened
    /// inside the group is still pending its `esac`.
    fn read_paren_body(&mut self, start: usize) -> Result<(), Span> {
        let mut depth = 1_usize;
        let mut case_depth = 0_usize;
        let mut word = String::new();
        let mut at_word_start = true;

        while let Some((pos, ch)) = self.peek() {
            match ch {
                '\\' => {
                    self.bump();
                    self.bump();
                    at_word_start = false;
                }
                '\'' => {
                    self.read_single_quoted(pos).map_err(|err| err.span())?;
                    at_word_start = false;
                }
                '"' => {
                    self.read_double_quoted(pos).map_err(|err| err.span())?;
                    at_word_start = false;
                }
                '`' => {
                    self.read_backtick(pos).map_err(|err| err.span())?;
                    at_word_start = false;
                }
                '$' => {
                    self.read_dollar(pos).map_err(|err| err.span())?;
                    at_word_start = false;
                }
                '#' if at_word_start => self.skip_comment(),
                _ => {
                    self.bump();
                    if is_word_boundary(ch) {
                        match word.as_str() {
                            "case" => case_depth += 1,
                            "esac" => case_depth = case_depth.saturating_sub(1),
                            _ => {}
                        }
                        word.clear();
                        at_word_start = true;
                    } else {
                        word.push(ch);
                        at_word_start = false;
                    }
                    match ch {
                        '(' => depth += 1,
                        ')' if case_depth > 0 && depth == 1 => {}
                        ')' => {
                            depth -= 1;
                            if depth == 0 {
                                return Ok(());
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
        Err(self.to_end(start))
    }
}
