//! PowerShell tokeniser.
//!
//! Only the distinctions the structural parser needs are kept: barewords
//! (keyword candidates), grouping tokens, statement terminators, and commas.
//! Strings, variables, numbers, and operators collapse into `Other`.

use std::iter::Peekable;
use std::str::CharIndices;

use thiserror::Error;

use crate::syntax::{Diagnostic, Span};

/// Opening grouping tokens.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum Group {
    Brace,
    Paren,
    Bracket,
    HashLiteral,
    ArrayExpr,
    SubExpr,
}

impl Group {
    pub(super) const fn opener(self) -> &'static str {
        match self {
            Self::Brace => "{",
            Self::Paren => "(",
            Self::Bracket => "[",
            Self::HashLiteral => "@{",
            Self::ArrayExpr => "@(",
            Self::SubExpr => "$(",
        }
    }

    pub(super) const fn closer(self) -> Closer {
        match self {
            Self::Brace | Self::HashLiteral => Closer::Brace,
            Self::Paren | Self::ArrayExpr | Self::SubExpr => Closer::Paren,
            Self::Bracket => Closer::Bracket,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum Closer {
    Brace,
    Paren,
    Bracket,
}

impl Closer {
    pub(super) const fn as_str(self) -> &'static str {
        match self {
            Self::Brace => "}",
            Self::Paren => ")",
            Self::Bracket => "]",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(super) enum TokenKind {
    Word(String),
    Open(Group),
    Close(Closer),
    StatementEnd,
    Comma,
    Other,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(super) struct Token {
    pub(super) kind: TokenKind,
    pub(super) span: Span,
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub(super) enum LexError {
    #[error("unterminated string literal")]
    UnterminatedString { span: Span },
    #[error("unterminated here-string (expected `{terminator}` at the start of a line)")]
    UnterminatedHereString { terminator: &'static str, span: Span },
    #[error("unterminated block comment (expected `#>`)")]
    UnterminatedBlockComment { span: Span },
    #[error("unterminated braced variable `${{`")]
    UnterminatedBracedVariable { span: Span },
}

impl LexError {
    const fn span(&self) -> Span {
        match self {
            Self::UnterminatedString { span }
            | Self::UnterminatedHereString { span, .. }
            | Self::UnterminatedBlockComment { span }
            | Self::UnterminatedBracedVariable { span } => *span,
        }
    }

    pub(super) fn into_diagnostic(self) -> Diagnostic {
        Diagnostic::at(self.span(), self.to_string())
    }
}

const fn is_space(ch: char) -> bool {
    matches!(
        ch,
        ' ' | '\t' | '\r' | '\n' | '\u{0b}' | '\u{0c}' | '\u{a0}' | '\u{feff}'
    )
}

const fn is_word_stop(ch: char) -> bool {
    is_space(ch)
        || matches!(
            ch,
            '{' | '}' | '(' | ')' | '[' | ']' | ';' | ',' | '|' | '&' | '\'' | '"' | '$' | '`'
        )
}

const fn is_variable_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '_' | ':' | '?' | '^' | '$')
}

struct Lexer<'a> {
    input: &'a str,
    chars: Peekable<CharIndices<'a>>,
    tokens: Vec<Token>,
}

/// Tokenises a complete PowerShell script.
pub(super) fn tokenize(input: &str) -> Result<Vec<Token>, LexError> {
    let mut lexer = Lexer {
        input,
        chars: input.char_indices().peekable(),
        tokens: Vec::new(),
    };
    lexer.run()?;
    Ok(lexer.tokens)
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
                '\n' if self.ends_with_pipeline_operator() => {
                    self.bump();
                }
                '\n' | ';' => {
                    self.bump();
                    self.push(TokenKind::StatementEnd, start);
                }
                _ if is_space(ch) => {
                    self.bump();
                }
                '#' => self.skip_line_comment(),
                '<' if self.peek_second() == Some('#') => self.skip_block_comment(start)?,
                '`' => {
                    self.bump();
                    match self.peek_char() {
                        Some('\r') => {
                            self.bump();
                            if self.peek_char() == Some('\n') {
                                self.bump();
                            }
                        }
                        Some('\n') => {
                            self.bump();
                        }
                        Some(_) => {
                            self.bump();
                            self.push(TokenKind::Other, start);
                        }
                        None => {}
                    }
                }
                '\'' => {
                    self.read_single_quoted(start)?;
                    self.push(TokenKind::Other, start);
                }
                '"' => {
                    self.read_double_quoted(start)?;
                    self.push(TokenKind::Other, start);
                }
                '@' => self.lex_at(start)?,
                '$' => self.lex_dollar(start)?,
                '{' => self.open(Group::Brace, start),
                '(' => self.open(Group::Paren, start),
                '[' => self.open(Group::Bracket, start),
                '}' => self.close(Closer::Brace, start),
                ')' => self.close(Closer::Paren, start),
                ']' => self.close(Closer::Bracket, start),
                ',' => {
                    self.bump();
                    self.push(TokenKind::Comma, start);
                }
                '|' | '&' => {
                    self.bump();
                    if self.peek_char() == Some(ch) {
                        self.bump();
                    }
                    self.push(TokenKind::Other, start);
                }
                _ => self.lex_word(start),
            }
        }
        Ok(())
    }

    /// A trailing `|`, `||`, or `&&` carries the pipeline onto the next line.
    fn ends_with_pipeline_operator(&self) -> bool {
        self.tokens.last().is_some_and(|token| {
            token.kind == TokenKind::Other
                && matches!(
                    self.input.get(token.span.start..token.span.end),
                    Some("|" | "||" | "&&")
                )
        })
    }

    fn open(&mut self, group: Group, start: usize) {
        self.bump();
        self.push(TokenKind::Open(group), start);
    }

    fn close(&mut self, closer: Closer, start: usize) {
        self.bump();
        self.push(TokenKind::Close(closer), start);
    }

    fn skip_line_comment(&mut self) {
        while let Some(ch) = self.peek_char() {
            if ch == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn skip_block_comment(&mut self, start: usize) -> Result<(), LexError> {
        self.bump();
        self.bump();
        while let Some((_, ch)) = self.bump() {
            if ch == '#' && self.peek_char() == Some('>') {
                self.bump();
                return Ok(());
            }
        }
        Err(LexError::UnterminatedBlockComment {
            span: self.to_end(start),
        })
    }

    fn read_single_quoted(&mut self, start: usize) -> Result<(), LexError> {
        self.bump();
        while let Some((_, ch)) = self.bump() {
            if ch == '\'' {
                if self.peek_char() == Some('\'') {
                    self.bump();
                    continue;
                }
                return Ok(());
            }
        }
        Err(LexError::UnterminatedString {
            span: self.to_end(start),
        })
    }

    fn read_double_quoted(&mut self, start: usize) -> Result<(), LexError> {
        self.bump();
        while let Some((_, ch)) = self.peek() {
            match ch {
                '`' => {
                    self.bump();
                    self.bump();
                }
                '"' => {
                    self.bump();
                    if self.peek_char() == Some('"') {
                        self.bump();
                        continue;
                    }
                    return Ok(());
                }
                '$' if self.peek_second() == Some('(') => {
                    self.bump();
                    self.bump();
                    self.read_subexpression(start)?;
                }
                _ => {
                    self.bump();
                }
            }
        }
        Err(LexError::UnterminatedString {
            span: self.to_end(start),
        })
    }

    /// Skips the body of a `$(` nested inside an expandable string.
    fn read_subexpression(&mut self, start: usize) -> Result<(), LexError> {
        let mut depth = 1_usize;
        while let Some((pos, ch)) = self.peek() {
            match ch {
                '\'' => self.read_single_quoted(pos)?,
                '"' => self.read_double_quoted(pos)?,
                '`' => {
                    self.bump();
                    self.bump();
                }
                '(' => {
                    depth += 1;
                    self.bump();
                }
                ')' => {
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
        Err(LexError::UnterminatedString {
            span: self.to_end(start),
        })
    }

    fn lex_at(&mut self, start: usize) -> Result<(), LexError> {
        match self.peek_second() {
            Some('{') => {
                self.bump();
                self.open(Group::HashLiteral, start);
            }
            Some('(') => {
                self.bump();
                self.open(Group::ArrayExpr, start);
            }
            Some(quote @ ('\'' | '"')) if self.here_string_opens() => {
                self.read_here_string(start, quote)?;
                self.push(TokenKind::Other, start);
            }
            _ => self.lex_word(start),
        }
        Ok(())
    }

    /// `@'` / `@"` only open a here-string when nothing but whitespace
    /// follows on the same line.
    fn here_string_opens(&self) -> bool {
        let mut lookahead = self.chars.clone();
        lookahead.next();
        lookahead.next();
        for (_, ch) in lookahead {
            match ch {
                '\n' => return true,
                ' ' | '\t' | '\r' => {}
                _ => return false,
            }
        }
        false
    }

    fn read_here_string(&mut self, start: usize, quote: char) -> Result<(), LexError> {
        let terminator = if quote == '\'' { "'@" } else { "\"@" };
        while let Some((_, ch)) = self.bump() {
            if ch != '\n' {
                continue;
            }
            let line_start = self.offset();
            let rest = self.input.get(line_start..).unwrap_or_default();
            if rest.starts_with(terminator) {
                self.bump();
                self.bump();
                return Ok(());
            }
        }
        Err(LexError::UnterminatedHereString {
            terminator,
            span: self.to_end(start),
        })
    }

    fn lex_dollar(&mut self, start: usize) -> Result<(), LexError> {
        self.bump();
        match self.peek_char() {
            Some('(') => {
                self.open(Group::SubExpr, start);
            }
            Some('{') => {
                self.bump();
                loop {
                    match self.bump() {
                        Some((_, '}')) => break,
                        Some((_, '`')) => {
                            self.bump();
                        }
                        Some(_) => {}
                        None => {
                            return Err(LexError::UnterminatedBracedVariable {
                                span: self.to_end(start),
                            });
                        }
                    }
                }
                self.push(TokenKind::Other, start);
            }
            _ => {
                while self.peek_char().is_some_and(is_variable_char) {
                    self.bump();
                }
                self.push(TokenKind::Other, start);
            }
        }
        Ok(())
    }

    fn lex_word(&mut self, start: usize) {
        let mut text = String::new();
        while let Some(ch) = self.peek_char() {
            if is_word_stop(ch) && !text.is_empty() {
                break;
            }
            text.push(ch);
            self.bump();
            if is_word_stop(ch) {
                break;
            }
        }
        self.push(TokenKind::Word(text), start);
    }
}
