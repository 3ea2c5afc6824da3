//! Lexer for rendered conditional expressions

use crate::error::{ExprError, Result};

/// Token kinds produced by the lexer
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TokenKind {
    Number(f64),
    True,
    False,
    Unknown,
    And,
    Or,
    Not,
    Minus,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    LParen,
    RParen,
    Eof,
}

/// Token with its byte offset in the source
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub position: usize,
}

pub struct Lexer<'src> {
    source: &'src str,
    position: usize,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str) -> Self {
        Self {
            source,
            position: 0,
        }
    }

    /// Tokenize the whole input, ending with `Eof`
    pub fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn rest(&self) -> &'src str {
        &self.source[self.position..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.rest().chars().nth(1)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.position += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_whitespace();
        let start = self.position;

        let Some(c) = self.peek() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                position: start,
            });
        };

        let kind = match c {
            '(' => {
                self.bump();
                TokenKind::LParen
            },
            ')' => {
                self.bump();
                TokenKind::RParen
            },
            '-' => {
                self.bump();
                TokenKind::Minus
            },
            '<' | '>' | '=' | '!' => self.lex_operator(start)?,
            '&' | '|' => self.lex_symbolic_logic(c, start)?,
            '{' => return Err(self.lex_placeholder(start)),
            c if c.is_ascii_digit() => self.lex_number(start)?,
            '.' if matches!(self.peek_second(), Some(d) if d.is_ascii_digit()) => {
                self.lex_number(start)?
            },
            c if c.is_alphabetic() || c == '_' => self.lex_word(start)?,
            other => {
                return Err(ExprError::syntax(
                    start,
                    format!("unexpected character '{}'", other),
                ))
            },
        };

        Ok(Token {
            kind,
            position: start,
        })
    }

    fn lex_operator(&mut self, start: usize) -> Result<TokenKind> {
        let first = self.bump().unwrap_or_default();
        let followed_by_eq = self.peek() == Some('=');
        if followed_by_eq {
            self.bump();
        }

        match (first, followed_by_eq) {
            ('<', false) => Ok(TokenKind::Lt),
            ('<', true) => Ok(TokenKind::Le),
            ('>', false) => Ok(TokenKind::Gt),
            ('>', true) => Ok(TokenKind::Ge),
            ('=', true) => Ok(TokenKind::Eq),
            ('!', true) => Ok(TokenKind::Ne),
            ('!', false) => Ok(TokenKind::Not),
            _ => Err(ExprError::syntax(
                start,
                "assignment is not allowed, use '==' for equality",
            )),
        }
    }

    fn lex_symbolic_logic(&mut self, c: char, start: usize) -> Result<TokenKind> {
        self.bump();
        if self.peek() != Some(c) {
            return Err(ExprError::syntax(
                start,
                format!("unexpected character '{}', expected '{}{}'", c, c, c),
            ));
        }
        self.bump();
        Ok(if c == '&' {
            TokenKind::And
        } else {
            TokenKind::Or
        })
    }

    fn lex_number(&mut self, start: usize) -> Result<TokenKind> {
        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == '.') {
            self.bump();
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            self.bump();
            if matches!(self.peek(), Some('+' | '-')) {
                self.bump();
            }
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.bump();
            }
        }

        let text = &self.source[start..self.position];
        text.parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| ExprError::syntax(start, format!("invalid number '{}'", text)))
    }

    fn lex_word(&mut self, start: usize) -> Result<TokenKind> {
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.bump();
        }

        match &self.source[start..self.position] {
            "and" => Ok(TokenKind::And),
            "or" => Ok(TokenKind::Or),
            "not" => Ok(TokenKind::Not),
            "true" | "True" => Ok(TokenKind::True),
            "false" | "False" => Ok(TokenKind::False),
            "unknown" | "None" => Ok(TokenKind::Unknown),
            word => Err(ExprError::syntax(
                start,
                format!("unexpected identifier '{}'", word),
            )),
        }
    }

    fn lex_placeholder(&mut self, start: usize) -> ExprError {
        self.bump();
        let name_start = self.position;
        while matches!(self.peek(), Some(c) if c != '}') {
            self.bump();
        }
        if self.peek().is_none() {
            return ExprError::syntax(start, "unterminated '{'");
        }
        ExprError::UnresolvedPlaceholder(self.source[name_start..self.position].to_string())
    }
}

/// Tokenize an expression
pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    Lexer::new(source).tokenize()
}
