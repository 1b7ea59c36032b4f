//! Shared grammar pieces: response codes, flag lists, LIST, SEARCH, STATUS.

use crate::parser::lexer::{Lexer, Token};
use crate::types::{
    Capability, Flag, Flags, ListResponse, Mailbox, MailboxAttribute, ResponseCode, Uid,
    UidValidity,
};
use crate::{Error, Result};

use super::types::StatusItem;

fn nonzero<T>(lexer: &Lexer<'_>, value: Option<T>, what: &str) -> Result<T> {
    value.ok_or_else(|| Error::parse(lexer.position(), format!("{what} of 0")))
}

/// Parses `[CODE args]`.
pub fn parse_response_code(lexer: &mut Lexer<'_>) -> Result<ResponseCode> {
    lexer.expect(Token::LBracket)?;
    let atom = lexer.read_atom_string()?;

    let code = match atom.to_ascii_uppercase().as_str() {
        "ALERT" => ResponseCode::Alert,
        "READ-ONLY" => ResponseCode::ReadOnly,
        "READ-WRITE" => ResponseCode::ReadWrite,
        "TRYCREATE" => ResponseCode::TryCreate,
        "NOMODSEQ" => ResponseCode::NoModSeq,
        "AUTHENTICATIONFAILED" => ResponseCode::AuthenticationFailed,
        "UIDNEXT" => {
            lexer.expect_space()?;
            let n = lexer.read_number()?;
            ResponseCode::UidNext(nonzero(lexer, Uid::new(n), "UIDNEXT")?)
        }
        "UIDVALIDITY" => {
            lexer.expect_space()?;
            let n = lexer.read_number()?;
            ResponseCode::UidValidity(nonzero(lexer, UidValidity::new(n), "UIDVALIDITY")?)
        }
        "UNSEEN" => {
            lexer.expect_space()?;
            ResponseCode::Unseen(lexer.read_number()?)
        }
        "HIGHESTMODSEQ" => {
            lexer.expect_space()?;
            ResponseCode::HighestModSeq(lexer.read_number64()?)
        }
        "APPENDUID" => {
            lexer.expect_space()?;
            let validity = lexer.read_number()?;
            lexer.expect_space()?;
            let uid = lexer.read_number()?;
            ResponseCode::AppendUid {
                uidvalidity: nonzero(lexer, UidValidity::new(validity), "UIDVALIDITY")?,
                uid: nonzero(lexer, Uid::new(uid), "UID")?,
            }
        }
        "CAPABILITY" => ResponseCode::Capability(parse_capability_data(lexer)?),
        "PERMANENTFLAGS" => {
            lexer.expect_space()?;
            ResponseCode::PermanentFlags(parse_flag_list(lexer)?.into_iter().collect())
        }
        _ => ResponseCode::Unknown(atom.to_string()),
    };

    // Arguments of unknown codes (and MODIFIED sets etc.) are not interpreted.
    while lexer.peek() != Some(b']') && !lexer.is_eof() {
        lexer.advance();
    }
    lexer.expect(Token::RBracket)?;

    Ok(code)
}

/// Parses the atoms after `CAPABILITY` or `ENABLED`.
pub fn parse_capability_data(lexer: &mut Lexer<'_>) -> Result<Vec<Capability>> {
    let mut caps = Vec::new();
    while lexer.peek() == Some(b' ') {
        lexer.advance();
        if let Token::Atom(s) = lexer.next_token()? {
            caps.push(Capability::parse(s));
        }
    }
    Ok(caps)
}

/// Parses `(flag flag ...)`.
pub fn parse_flag_list(lexer: &mut Lexer<'_>) -> Result<Flags> {
    lexer.expect(Token::LParen)?;
    let mut flags = Flags::new();
    loop {
        match lexer.next_token()? {
            Token::RParen => break,
            Token::Space => {}
            Token::Atom(s) if s != "\\" => flags.insert(Flag::parse(s)),
            // `\*` in PERMANENTFLAGS lexes as `\` followed by Asterisk.
            Token::Atom(_) | Token::Asterisk => {}
            token => {
                return Err(Error::parse(
                    lexer.position(),
                    format!("unexpected {token:?} in flag list"),
                ));
            }
        }
    }
    Ok(flags)
}

/// Parses the body of a LIST response.
pub fn parse_list_response(lexer: &mut Lexer<'_>) -> Result<ListResponse> {
    lexer.expect(Token::LParen)?;
    let mut attributes = Vec::new();
    loop {
        match lexer.next_token()? {
            Token::RParen => break,
            Token::Space => {}
            Token::Atom(s) => attributes.push(MailboxAttribute::parse(s)),
            token => {
                return Err(Error::parse(
                    lexer.position(),
                    format!("unexpected {token:?} in LIST attributes"),
                ));
            }
        }
    }
    lexer.expect_space()?;

    let delimiter = match lexer.next_token()? {
        Token::Nil => None,
        Token::QuotedString(s) => s.chars().next(),
        token => {
            return Err(Error::parse(
                lexer.position(),
                format!("expected delimiter, got {token:?}"),
            ));
        }
    };
    lexer.expect_space()?;
    let name = lexer.read_astring()?;

    Ok(ListResponse {
        attributes,
        delimiter,
        mailbox: Mailbox::new(name),
    })
}

/// Parses the numbers of a SEARCH response, ignoring a trailing `(MODSEQ n)`.
pub fn parse_search_response(lexer: &mut Lexer<'_>) -> Result<Vec<u32>> {
    let mut nums = Vec::new();
    while lexer.peek() == Some(b' ') {
        lexer.advance();
        match lexer.next_token()? {
            Token::Number(n) => {
                if let Ok(n) = u32::try_from(n)
                    && n > 0
                {
                    nums.push(n);
                }
            }
            Token::LParen => {
                while !matches!(lexer.next_token()?, Token::RParen | Token::Eof) {}
            }
            _ => break,
        }
    }
    Ok(nums)
}

/// Parses `mailbox (NAME value ...)` of a STATUS response.
pub fn parse_status_response(lexer: &mut Lexer<'_>) -> Result<(Mailbox, Vec<StatusItem>)> {
    let name = lexer.read_astring()?;
    lexer.expect_space()?;
    lexer.expect(Token::LParen)?;

    let mut items = Vec::new();
    loop {
        match lexer.next_token()? {
            Token::RParen | Token::Eof => break,
            Token::Atom(key) => {
                lexer.expect_space()?;
                let value = lexer.read_number64()?;
                let small = u32::try_from(value).unwrap_or(u32::MAX);
                let item = match key.to_ascii_uppercase().as_str() {
                    "MESSAGES" => Some(StatusItem::Messages(small)),
                    "UNSEEN" => Some(StatusItem::Unseen(small)),
                    "UIDNEXT" => Uid::new(small).map(StatusItem::UidNext),
                    "UIDVALIDITY" => UidValidity::new(small).map(StatusItem::UidValidity),
                    "HIGHESTMODSEQ" => Some(StatusItem::HighestModSeq(value)),
                    _ => None,
                };
                items.extend(item);
            }
            _ => {}
        }
    }

    Ok((Mailbox::new(name), items))
}

/// Consumes text up to and including CRLF.
pub fn read_text_until_crlf(lexer: &mut Lexer<'_>) -> String {
    let remaining = lexer.remaining();
    let end = remaining
        .windows(2)
        .position(|w| w == b"\r\n")
        .unwrap_or(remaining.len());
    lexer.skip(end);
    if lexer.peek() == Some(b'\r') {
        lexer.skip(2);
    }
    String::from_utf8_lossy(&remaining[..end]).into_owned()
}
