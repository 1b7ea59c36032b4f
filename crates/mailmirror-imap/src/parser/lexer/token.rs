//! Lexical tokens.

/// Token produced by the [`Lexer`](super::Lexer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    /// Bare atom, including flags such as `\Seen`.
    Atom(&'a str),
    /// Quoted string with escapes removed.
    QuotedString(String),
    /// Literal payload from `{n}\r\n...`.
    Literal(Vec<u8>),
    /// Unsigned number. Wide enough for MODSEQ and X-GM-MSGID values.
    Number(u64),
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `[`
    LBracket,
    /// `]`
    RBracket,
    /// Single space.
    Space,
    /// `*`
    Asterisk,
    /// `+`
    Plus,
    /// `NIL`
    Nil,
    /// `\r\n`
    Crlf,
    /// End of input.
    Eof,
}
