//! Tokenizer for server responses.
//!
//! Works on a complete response buffer (literals already inlined by the
//! framed reader), so it never blocks and never allocates for atoms.

#![allow(clippy::missing_errors_doc)]

mod token;

pub use token::Token;

use crate::{Error, Result};

/// Cursor over one response.
pub struct Lexer<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    /// Starts lexing `input` from the first byte.
    #[must_use]
    pub const fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    /// Current byte offset.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Unconsumed input.
    #[must_use]
    pub fn remaining(&self) -> &'a [u8] {
        &self.input[self.pos..]
    }

    /// Bytes consumed since offset `start`.
    #[must_use]
    pub fn since(&self, start: usize) -> &'a [u8] {
        &self.input[start.min(self.pos)..self.pos]
    }

    /// Returns true once everything is consumed.
    #[must_use]
    pub const fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    /// Next byte without consuming it.
    #[must_use]
    pub fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    /// Byte `offset` positions ahead.
    #[must_use]
    pub fn peek_at(&self, offset: usize) -> Option<u8> {
        self.input.get(self.pos + offset).copied()
    }

    /// Consumes one byte.
    pub fn advance(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    /// Consumes up to `n` bytes.
    pub fn skip(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.input.len());
    }

    /// Produces the next token.
    pub fn next_token(&mut self) -> Result<Token<'a>> {
        let Some(byte) = self.peek() else {
            return Ok(Token::Eof);
        };

        let single = match byte {
            b' ' => Some(Token::Space),
            b'(' => Some(Token::LParen),
            b')' => Some(Token::RParen),
            b'[' => Some(Token::LBracket),
            b']' => Some(Token::RBracket),
            b'*' => Some(Token::Asterisk),
            b'+' => Some(Token::Plus),
            _ => None,
        };
        if let Some(token) = single {
            self.advance();
            return Ok(token);
        }

        match byte {
            b'\r' if self.peek_at(1) == Some(b'\n') => {
                self.skip(2);
                Ok(Token::Crlf)
            }
            b'\r' => Err(self.error("CR without LF")),
            b'"' => self.quoted(),
            b'{' => self.literal(),
            _ if is_atom_char(byte) => Ok(self.atom_or_number()),
            _ => Err(self.error(&format!("unexpected byte {byte:#04x}"))),
        }
    }

    fn quoted(&mut self) -> Result<Token<'a>> {
        self.advance();
        let mut out = Vec::new();
        loop {
            match self.advance() {
                Some(b'"') => break,
                // Only `"` and `\` are legal escapes; keep anything else as-is.
                Some(b'\\') => match self.advance() {
                    Some(c) => out.push(c),
                    None => return Err(self.error("EOF inside quoted string")),
                },
                Some(c) => out.push(c),
                None => return Err(self.error("EOF inside quoted string")),
            }
        }
        Ok(Token::QuotedString(
            String::from_utf8_lossy(&out).into_owned(),
        ))
    }

    fn literal(&mut self) -> Result<Token<'a>> {
        self.advance();
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.advance();
        }
        let digits = &self.input[start..self.pos];
        let non_sync = self.peek() == Some(b'+');
        if non_sync {
            self.advance();
        }
        if self.advance() != Some(b'}') {
            return Err(self.error("malformed literal prefix"));
        }

        let size: usize = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| self.error("bad literal size"))?;

        if self.peek() == Some(b'\r') && self.peek_at(1) == Some(b'\n') {
            self.skip(2);
        } else if !non_sync {
            return Err(self.error("expected CRLF after literal prefix"));
        }

        let end = self
            .pos
            .checked_add(size)
            .filter(|end| *end <= self.input.len())
            .ok_or_else(|| self.error("literal runs past end of input"))?;
        let data = self.input[self.pos..end].to_vec();
        self.pos = end;
        Ok(Token::Literal(data))
    }

    fn atom_or_number(&mut self) -> Token<'a> {
        let start = self.pos;
        while self.peek().is_some_and(is_atom_char) {
            self.advance();
        }
        let raw = &self.input[start..self.pos];
        // Atom chars are all ASCII.
        let text = std::str::from_utf8(raw).unwrap_or_default();

        if raw.iter().all(u8::is_ascii_digit)
            && let Ok(n) = text.parse::<u64>()
        {
            return Token::Number(n);
        }
        if text.eq_ignore_ascii_case("NIL") {
            Token::Nil
        } else {
            Token::Atom(text)
        }
    }

    fn error(&self, message: &str) -> Error {
        Error::parse(self.pos, message)
    }

    /// Consumes a token of the same kind as `expected`.
    #[allow(clippy::needless_pass_by_value)]
    pub fn expect(&mut self, expected: Token<'_>) -> Result<()> {
        let token = self.next_token()?;
        if std::mem::discriminant(&token) == std::mem::discriminant(&expected) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {expected:?}, got {token:?}")))
        }
    }

    /// Consumes a single space.
    pub fn expect_space(&mut self) -> Result<()> {
        self.expect(Token::Space)
    }

    /// Reads an atom, quoted string or literal as text.
    pub fn read_astring(&mut self) -> Result<String> {
        match self.next_token()? {
            Token::Atom(s) => Ok(s.to_string()),
            Token::Number(n) => Ok(n.to_string()),
            Token::QuotedString(s) => Ok(s),
            Token::Literal(data) => Ok(String::from_utf8_lossy(&data).into_owned()),
            token => Err(self.error(&format!("expected astring, got {token:?}"))),
        }
    }

    /// Reads NIL or a string.
    pub fn read_nstring(&mut self) -> Result<Option<String>> {
        match self.next_token()? {
            Token::Nil => Ok(None),
            Token::QuotedString(s) => Ok(Some(s)),
            Token::Literal(data) => Ok(Some(String::from_utf8_lossy(&data).into_owned())),
            token => Err(self.error(&format!("expected nstring, got {token:?}"))),
        }
    }

    /// Reads NIL or a string as raw bytes.
    pub fn read_nstring_bytes(&mut self) -> Result<Option<Vec<u8>>> {
        match self.next_token()? {
            Token::Nil => Ok(None),
            Token::QuotedString(s) => Ok(Some(s.into_bytes())),
            Token::Literal(data) => Ok(Some(data)),
            token => Err(self.error(&format!("expected nstring, got {token:?}"))),
        }
    }

    /// Reads a 64-bit number.
    pub fn read_number64(&mut self) -> Result<u64> {
        match self.next_token()? {
            Token::Number(n) => Ok(n),
            token => Err(self.error(&format!("expected number, got {token:?}"))),
        }
    }

    /// Reads a number that must fit in 32 bits.
    pub fn read_number(&mut self) -> Result<u32> {
        let n = self.read_number64()?;
        u32::try_from(n).map_err(|_| self.error("number exceeds 32 bits"))
    }

    /// Reads an atom.
    pub fn read_atom_string(&mut self) -> Result<&'a str> {
        match self.next_token()? {
            Token::Atom(s) => Ok(s),
            token => Err(self.error(&format!("expected atom, got {token:?}"))),
        }
    }

    /// Skips any run of spaces.
    pub fn skip_spaces(&mut self) {
        while self.peek() == Some(b' ') {
            self.advance();
        }
    }
}

/// Returns true for bytes allowed inside an atom.
///
/// `\` is accepted so system flags lex as one atom.
#[must_use]
pub const fn is_atom_char(b: u8) -> bool {
    matches!(b,
        0x21 | 0x23..=0x24 | 0x26..=0x27 |
        0x2B..=0x5A |
        0x5C |
        0x5E..=0x7A |
        0x7C |
        0x7E
    )
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn tagged_line() {
        let mut lexer = Lexer::new(b"M0001 OK done\r\n");
        assert_eq!(lexer.next_token().unwrap(), Token::Atom("M0001"));
        assert_eq!(lexer.next_token().unwrap(), Token::Space);
        assert_eq!(lexer.next_token().unwrap(), Token::Atom("OK"));
        assert_eq!(lexer.next_token().unwrap(), Token::Space);
        assert_eq!(lexer.next_token().unwrap(), Token::Atom("done"));
        assert_eq!(lexer.next_token().unwrap(), Token::Crlf);
        assert_eq!(lexer.next_token().unwrap(), Token::Eof);
    }

    #[test]
    fn gmail_message_id_fits() {
        let mut lexer = Lexer::new(b"1278455344230334865");
        assert_eq!(
            lexer.next_token().unwrap(),
            Token::Number(1_278_455_344_230_334_865)
        );
    }

    #[test]
    fn read_number_rejects_wide_values() {
        let mut lexer = Lexer::new(b"4294967296");
        assert!(lexer.read_number().is_err());
    }

    #[test]
    fn quoted_string_with_escapes() {
        let mut lexer = Lexer::new(b"\"\\\\Inbox \\\"x\\\"\"");
        assert_eq!(
            lexer.next_token().unwrap(),
            Token::QuotedString("\\Inbox \"x\"".to_string())
        );
    }

    #[test]
    fn nil_any_case() {
        let mut lexer = Lexer::new(b"nil");
        assert_eq!(lexer.next_token().unwrap(), Token::Nil);
    }

    #[test]
    fn literal_payload() {
        let mut lexer = Lexer::new(b"{5}\r\nhello)");
        assert_eq!(lexer.next_token().unwrap(), Token::Literal(b"hello".to_vec()));
        assert_eq!(lexer.next_token().unwrap(), Token::RParen);
    }

    #[test]
    fn truncated_literal_is_an_error() {
        let mut lexer = Lexer::new(b"{10}\r\nshort");
        assert!(lexer.next_token().is_err());
    }

    #[test]
    fn brackets_split_atoms() {
        let mut lexer = Lexer::new(b"BODY[HEADER]");
        assert_eq!(lexer.next_token().unwrap(), Token::Atom("BODY"));
        assert_eq!(lexer.next_token().unwrap(), Token::LBracket);
        assert_eq!(lexer.next_token().unwrap(), Token::Atom("HEADER"));
        assert_eq!(lexer.next_token().unwrap(), Token::RBracket);
    }

    #[test]
    fn atom_chars() {
        assert!(is_atom_char(b'\\'));
        assert!(is_atom_char(b'#'));
        assert!(is_atom_char(b'$'));
        assert!(!is_atom_char(b'"'));
        assert!(!is_atom_char(b'%'));
        assert!(!is_atom_char(b']'));
        assert!(!is_atom_char(b'{'));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn never_panics(input in proptest::collection::vec(any::<u8>(), 0..256)) {
                let mut lexer = Lexer::new(&input);
                for _ in 0..512 {
                    match lexer.next_token() {
                        Ok(Token::Eof) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
            }
        }
    }
}
