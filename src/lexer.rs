//! Lexer for the hyphae source language
//!
//! Produces a flat token stream with 1-indexed line/column spans, the
//! granularity the rest of the pipeline needs for `ERROR <code> at
//! <file>:<line>:<col>` reporting (see `errors::Location`).

use std::path::Path;

use crate::errors::{Diagnostics, ErrorCode, Location};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // literals
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Ident(String),

    // keywords
    Network,
    Frequencies,
    Hyphae,
    Topology,
    Types,
    State,
    On,
    Signal,
    Rest,
    Cycle,
    Rule,
    Emit,
    Spawn,
    Socket,
    FruitingBody,
    As,
    Match,
    If,
    Else,
    While,
    For,
    In,
    Let,
    Return,
    Break,
    Continue,
    Report,
    Where,
    Struct,
    Enum,

    // punctuation / operators
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Colon,
    ColonColon,
    Semi,
    Dot,
    DotDot,
    Arrow,   // ->
    FatArrow, // =>
    Pipe,    // |
    PipePipe,
    Amp,
    AmpAmp,
    Bang,
    Eq,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Underscore,

    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub col: usize,
}

pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: usize,
    col: usize,
    file: &'a Path,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str, file: &'a Path) -> Self {
        Lexer {
            src: src.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
            file,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<u8> {
        self.src.get(self.pos + 1).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn loc(&self, line: usize, col: usize) -> Location {
        Location::new(self.file.to_path_buf(), line, col)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n') => {
                    self.bump();
                }
                Some(b'/') if self.peek2() == Some(b'/') => {
                    while self.peek().is_some() && self.peek() != Some(b'\n') {
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    /// Tokenize the whole input, reporting lexical errors into `diags`
    /// but continuing so later stages still see as complete a token
    /// stream as possible.
    pub fn tokenize(mut self, diags: &mut Diagnostics) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia();
            let line = self.line;
            let col = self.col;
            let Some(c) = self.peek() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    line,
                    col,
                });
                break;
            };

            let kind = match c {
                b'{' => {
                    self.bump();
                    TokenKind::LBrace
                }
                b'}' => {
                    self.bump();
                    TokenKind::RBrace
                }
                b'(' => {
                    self.bump();
                    TokenKind::LParen
                }
                b')' => {
                    self.bump();
                    TokenKind::RParen
                }
                b'[' => {
                    self.bump();
                    TokenKind::LBracket
                }
                b']' => {
                    self.bump();
                    TokenKind::RBracket
                }
                b',' => {
                    self.bump();
                    TokenKind::Comma
                }
                b';' => {
                    self.bump();
                    TokenKind::Semi
                }
                b':' => {
                    self.bump();
                    if self.peek() == Some(b':') {
                        self.bump();
                        TokenKind::ColonColon
                    } else {
                        TokenKind::Colon
                    }
                }
                b'.' => {
                    self.bump();
                    if self.peek() == Some(b'.') {
                        self.bump();
                        TokenKind::DotDot
                    } else {
                        TokenKind::Dot
                    }
                }
                b'-' => {
                    self.bump();
                    if self.peek() == Some(b'>') {
                        self.bump();
                        TokenKind::Arrow
                    } else {
                        TokenKind::Minus
                    }
                }
                b'=' => {
                    self.bump();
                    match self.peek() {
                        Some(b'=') => {
                            self.bump();
                            TokenKind::EqEq
                        }
                        Some(b'>') => {
                            self.bump();
                            TokenKind::FatArrow
                        }
                        _ => TokenKind::Eq,
                    }
                }
                b'!' => {
                    self.bump();
                    if self.peek() == Some(b'=') {
                        self.bump();
                        TokenKind::NotEq
                    } else {
                        TokenKind::Bang
                    }
                }
                b'<' => {
                    self.bump();
                    if self.peek() == Some(b'=') {
                        self.bump();
                        TokenKind::Le
                    } else {
                        TokenKind::Lt
                    }
                }
                b'>' => {
                    self.bump();
                    if self.peek() == Some(b'=') {
                        self.bump();
                        TokenKind::Ge
                    } else {
                        TokenKind::Gt
                    }
                }
                b'&' => {
                    self.bump();
                    if self.peek() == Some(b'&') {
                        self.bump();
                        TokenKind::AmpAmp
                    } else {
                        TokenKind::Amp
                    }
                }
                b'|' => {
                    self.bump();
                    if self.peek() == Some(b'|') {
                        self.bump();
                        TokenKind::PipePipe
                    } else {
                        TokenKind::Pipe
                    }
                }
                b'+' => {
                    self.bump();
                    TokenKind::Plus
                }
                b'*' => {
                    self.bump();
                    TokenKind::Star
                }
                b'/' => {
                    self.bump();
                    TokenKind::Slash
                }
                b'%' => {
                    self.bump();
                    TokenKind::Percent
                }
                b'"' => match self.lex_string() {
                    Ok(s) => TokenKind::Str(s),
                    Err(msg) => {
                        diags.push(ErrorCode::Lexical, 1, self.loc(line, col), msg);
                        TokenKind::Str(String::new())
                    }
                },
                c if c.is_ascii_digit() => self.lex_number(diags, line, col),
                c if c.is_ascii_alphabetic() || c == b'_' => self.lex_ident_or_keyword(),
                other => {
                    self.bump();
                    diags.push(
                        ErrorCode::Lexical,
                        1,
                        self.loc(line, col),
                        format!("invalid character '{}'", other as char),
                    );
                    continue;
                }
            };

            tokens.push(Token { kind, line, col });
        }
        tokens
    }

    fn lex_string(&mut self) -> Result<String, String> {
        self.bump(); // opening quote
        let mut s = String::new();
        loop {
            match self.bump() {
                None => return Err("unterminated string literal".to_string()),
                Some(b'"') => break,
                Some(b'\\') => match self.bump() {
                    Some(b'n') => s.push('\n'),
                    Some(b't') => s.push('\t'),
                    Some(b'"') => s.push('"'),
                    Some(b'\\') => s.push('\\'),
                    Some(other) => s.push(other as char),
                    None => return Err("unterminated string literal".to_string()),
                },
                Some(c) => s.push(c as char),
            }
        }
        Ok(s)
    }

    fn lex_number(&mut self, diags: &mut Diagnostics, line: usize, col: usize) -> TokenKind {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        let mut is_float = false;
        if self.peek() == Some(b'.') && self.peek2().is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.bump();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
        if is_float {
            match text.parse::<f64>() {
                Ok(v) => TokenKind::Float(v),
                Err(_) => {
                    diags.push(
                        ErrorCode::Lexical,
                        1,
                        self.loc(line, col),
                        format!("malformed float literal '{text}'"),
                    );
                    TokenKind::Float(0.0)
                }
            }
        } else {
            match text.parse::<i64>() {
                Ok(v) => TokenKind::Int(v),
                Err(_) => {
                    diags.push(
                        ErrorCode::Lexical,
                        1,
                        self.loc(line, col),
                        format!("malformed integer literal '{text}'"),
                    );
                    TokenKind::Int(0)
                }
            }
        }
    }

    fn lex_ident_or_keyword(&mut self) -> TokenKind {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_')
        {
            self.bump();
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
        match text {
            "network" => TokenKind::Network,
            "frequencies" => TokenKind::Frequencies,
            "hyphae" => TokenKind::Hyphae,
            "topology" => TokenKind::Topology,
            "types" => TokenKind::Types,
            "state" => TokenKind::State,
            "on" => TokenKind::On,
            "signal" => TokenKind::Signal,
            "rest" => TokenKind::Rest,
            "cycle" => TokenKind::Cycle,
            "rule" => TokenKind::Rule,
            "emit" => TokenKind::Emit,
            "spawn" => TokenKind::Spawn,
            "socket" => TokenKind::Socket,
            "fruiting_body" => TokenKind::FruitingBody,
            "as" => TokenKind::As,
            "match" => TokenKind::Match,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "for" => TokenKind::For,
            "in" => TokenKind::In,
            "let" => TokenKind::Let,
            "return" => TokenKind::Return,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            "report" => TokenKind::Report,
            "where" => TokenKind::Where,
            "struct" => TokenKind::Struct,
            "enum" => TokenKind::Enum,
            "true" => TokenKind::Bool(true),
            "false" => TokenKind::Bool(false),
            "_" => TokenKind::Underscore,
            _ => TokenKind::Ident(text.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<TokenKind> {
        let mut diags = Diagnostics::new();
        let lexer = Lexer::new(src, Path::new("<test>"));
        lexer
            .tokenize(&mut diags)
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn lexes_keywords_and_punctuation() {
        let kinds = toks("network Foo { }");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Network,
                TokenKind::Ident("Foo".into()),
                TokenKind::LBrace,
                TokenKind::RBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexes_arrow_and_fat_arrow() {
        let kinds = toks("-> =>");
        assert_eq!(kinds, vec![TokenKind::Arrow, TokenKind::FatArrow, TokenKind::Eof]);
    }

    #[test]
    fn lexes_string_with_escapes() {
        let kinds = toks(r#""hello\nworld""#);
        assert_eq!(kinds, vec![TokenKind::Str("hello\nworld".to_string()), TokenKind::Eof]);
    }

    #[test]
    fn reports_unterminated_string() {
        let mut diags = Diagnostics::new();
        let lexer = Lexer::new("\"abc", Path::new("<test>"));
        lexer.tokenize(&mut diags);
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn lexes_range_dots() {
        let kinds = toks("0..5");
        assert_eq!(
            kinds,
            vec![TokenKind::Int(0), TokenKind::DotDot, TokenKind::Int(5), TokenKind::Eof]
        );
    }
}
