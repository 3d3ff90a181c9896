//! On-demand tokenizer for arithmetic expressions.

use super::EvalError;

/// Token kinds produced by [`Lexer`].
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    LParen,
    RParen,
    Comma,
    Eof,
}

impl TokenKind {
    /// Short human-readable description for error messages.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Number(n) => format!("number {n}"),
            TokenKind::Ident(name) => format!("name '{name}'"),
            TokenKind::Plus => "'+'".into(),
            TokenKind::Minus => "'-'".into(),
            TokenKind::Star => "'*'".into(),
            TokenKind::DoubleStar => "'**'".into(),
            TokenKind::Slash => "'/'".into(),
            TokenKind::DoubleSlash => "'//'".into(),
            TokenKind::Percent => "'%'".into(),
            TokenKind::LParen => "'('".into(),
            TokenKind::RParen => "')'".into(),
            TokenKind::Comma => "','".into(),
            TokenKind::Eof => "end of input".into(),
        }
    }
}

/// A token with its byte offset in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub position: usize,
}

/// Tokenizer that produces one token per call.
///
/// Tokens are pulled by the parser as it goes, so a rejected construct is
/// reported at the first point the grammar fails rather than wherever the
/// first unlexable character happens to sit.
pub struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    pub fn next_token(&mut self) -> Result<Token, EvalError> {
        self.skip_whitespace();
        let start = self.pos;
        let Some(&c) = self.bytes.get(self.pos) else {
            return Ok(Token {
                kind: TokenKind::Eof,
                position: start,
            });
        };

        let kind = match c {
            b'0'..=b'9' | b'.' => return self.number(start),
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => return Ok(self.ident(start)),
            b'+' => self.single(TokenKind::Plus),
            b'-' => self.single(TokenKind::Minus),
            b'%' => self.single(TokenKind::Percent),
            b'(' => self.single(TokenKind::LParen),
            b')' => self.single(TokenKind::RParen),
            b',' => self.single(TokenKind::Comma),
            b'*' => self.pair(b'*', TokenKind::DoubleStar, TokenKind::Star),
            b'/' => self.pair(b'/', TokenKind::DoubleSlash, TokenKind::Slash),
            _ => {
                let ch = self.src[start..].chars().next().unwrap_or('?');
                return Err(EvalError::Syntax {
                    position: start,
                    message: format!("unexpected character '{ch}'"),
                });
            }
        };

        Ok(Token {
            kind,
            position: start,
        })
    }

    fn skip_whitespace(&mut self) {
        while self
            .bytes
            .get(self.pos)
            .is_some_and(|b| b.is_ascii_whitespace())
        {
            self.pos += 1;
        }
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.pos += 1;
        kind
    }

    fn pair(&mut self, second: u8, doubled: TokenKind, plain: TokenKind) -> TokenKind {
        if self.bytes.get(self.pos + 1) == Some(&second) {
            self.pos += 2;
            doubled
        } else {
            self.pos += 1;
            plain
        }
    }

    fn digits(&mut self) -> usize {
        let start = self.pos;
        while self.bytes.get(self.pos).is_some_and(u8::is_ascii_digit) {
            self.pos += 1;
        }
        self.pos - start
    }

    fn number(&mut self, start: usize) -> Result<Token, EvalError> {
        let mut mantissa_digits = self.digits();
        if self.bytes.get(self.pos) == Some(&b'.') {
            self.pos += 1;
            mantissa_digits += self.digits();
        }
        if mantissa_digits == 0 {
            return Err(EvalError::Syntax {
                position: start,
                message: "'.' is not a number".to_string(),
            });
        }

        // Only consume an exponent when it is well formed; `2e` leaves the
        // `e` for the parser to reject.
        if matches!(self.bytes.get(self.pos), Some(b'e' | b'E')) {
            let mut probe = self.pos + 1;
            if matches!(self.bytes.get(probe), Some(b'+' | b'-')) {
                probe += 1;
            }
            if self.bytes.get(probe).is_some_and(u8::is_ascii_digit) {
                self.pos = probe;
                self.digits();
            }
        }

        let text = &self.src[start..self.pos];
        let value = text.parse::<f64>().map_err(|e| EvalError::Syntax {
            position: start,
            message: format!("invalid number '{text}': {e}"),
        })?;
        Ok(Token {
            kind: TokenKind::Number(value),
            position: start,
        })
    }

    fn ident(&mut self, start: usize) -> Token {
        while self
            .bytes
            .get(self.pos)
            .is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_')
        {
            self.pos += 1;
        }
        Token {
            kind: TokenKind::Ident(self.src[start..self.pos].to_string()),
            position: start,
        }
    }
}
