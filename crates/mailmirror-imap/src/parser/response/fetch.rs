//! FETCH data item parsing.

use crate::parser::lexer::{Lexer, Token};
use crate::types::Uid;
use crate::{Error, Result};

use super::helpers::parse_flag_list;
use super::types::FetchItem;

/// Parses the parenthesized item list of a FETCH response.
pub fn parse_fetch_response(lexer: &mut Lexer<'_>) -> Result<Vec<FetchItem>> {
    lexer.expect(Token::LParen)?;
    let mut items = Vec::new();

    loop {
        let name = match lexer.next_token()? {
            Token::RParen => break,
            Token::Space => continue,
            Token::Atom(name) => name,
            Token::Eof => return Err(Error::parse(lexer.position(), "unterminated FETCH list")),
            token => {
                return Err(Error::parse(
                    lexer.position(),
                    format!("expected FETCH item name, got {token:?}"),
                ));
            }
        };

        match name.to_ascii_uppercase().as_str() {
            "FLAGS" => {
                lexer.expect_space()?;
                items.push(FetchItem::Flags(parse_flag_list(lexer)?));
            }
            "UID" => {
                lexer.expect_space()?;
                let n = lexer.read_number()?;
                let uid = Uid::new(n).ok_or_else(|| Error::parse(lexer.position(), "UID of 0"))?;
                items.push(FetchItem::Uid(uid));
            }
            "RFC822.SIZE" => {
                lexer.expect_space()?;
                items.push(FetchItem::Rfc822Size(lexer.read_number()?));
            }
            "INTERNALDATE" => {
                lexer.expect_space()?;
                if let Some(date) = lexer.read_nstring()? {
                    items.push(FetchItem::InternalDate(date));
                }
            }
            "MODSEQ" => {
                lexer.expect_space()?;
                lexer.expect(Token::LParen)?;
                let n = lexer.read_number64()?;
                lexer.expect(Token::RParen)?;
                items.push(FetchItem::ModSeq(n));
            }
            "X-GM-MSGID" => {
                lexer.expect_space()?;
                items.push(FetchItem::GmMsgId(lexer.read_number64()?));
            }
            "X-GM-THRID" => {
                lexer.expect_space()?;
                items.push(FetchItem::GmThrId(lexer.read_number64()?));
            }
            "X-GM-LABELS" => {
                lexer.expect_space()?;
                items.push(FetchItem::GmLabels(parse_label_list(lexer)?));
            }
            "BODY" | "BINARY" => {
                let section = read_section(lexer)?;
                lexer.expect_space()?;
                let data = lexer.read_nstring_bytes()?;
                items.push(FetchItem::Body { section, data });
            }
            upper @ ("RFC822" | "RFC822.HEADER" | "RFC822.TEXT") => {
                let section = match upper {
                    "RFC822.HEADER" => Some("HEADER".to_string()),
                    "RFC822.TEXT" => Some("TEXT".to_string()),
                    _ => None,
                };
                lexer.expect_space()?;
                let data = lexer.read_nstring_bytes()?;
                items.push(FetchItem::Body { section, data });
            }
            other => {
                tracing::trace!(item = other, "skipping unrequested FETCH item");
                lexer.expect_space()?;
                skip_value(lexer)?;
            }
        }
    }

    Ok(items)
}

/// Reads `[section]<origin>` following BODY. Returns the upper-cased section.
fn read_section(lexer: &mut Lexer<'_>) -> Result<Option<String>> {
    if lexer.peek() != Some(b'[') {
        return Ok(None);
    }
    lexer.advance();

    let start = lexer.position();
    while lexer.peek().is_some_and(|b| b != b']') {
        lexer.advance();
    }
    let section = String::from_utf8_lossy(lexer.since(start)).to_ascii_uppercase();
    lexer.expect(Token::RBracket)?;

    if lexer.peek() == Some(b'<') {
        while lexer.peek().is_some_and(|b| b != b'>') {
            lexer.advance();
        }
        lexer.advance();
    }

    Ok(Some(section))
}

/// Parses `(label "label with space" \Important)`.
fn parse_label_list(lexer: &mut Lexer<'_>) -> Result<Vec<String>> {
    lexer.expect(Token::LParen)?;
    let mut labels = Vec::new();
    loop {
        match lexer.next_token()? {
            Token::RParen => break,
            Token::Space => {}
            Token::Atom(s) => labels.push(s.to_string()),
            Token::Number(n) => labels.push(n.to_string()),
            Token::QuotedString(s) => labels.push(s),
            Token::Literal(data) => labels.push(String::from_utf8_lossy(&data).into_owned()),
            token => {
                return Err(Error::parse(
                    lexer.position(),
                    format!("unexpected {token:?} in X-GM-LABELS"),
                ));
            }
        }
    }
    Ok(labels)
}

/// Skips one value: an atom, number, string, literal or balanced list.
fn skip_value(lexer: &mut Lexer<'_>) -> Result<()> {
    let mut depth = 0usize;
    loop {
        match lexer.next_token()? {
            Token::LParen => depth += 1,
            Token::RParen if depth > 0 => depth -= 1,
            Token::Eof => return Err(Error::parse(lexer.position(), "EOF while skipping value")),
            Token::LBracket => {
                while lexer.peek().is_some_and(|b| b != b']') {
                    lexer.advance();
                }
            }
            _ => {}
        }
        if depth == 0 && matches!(lexer.peek(), Some(b' ' | b')') | None) {
            return Ok(());
        }
    }
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

    fn parse(input: &[u8]) -> Result<Vec<FetchItem>> {
        parse_fetch_response(&mut Lexer::new(input))
    }

    #[test]
    fn uid_and_flags() {
        let items = parse(b"(UID 123 FLAGS (\\Seen $Label1))").unwrap();
        assert_eq!(items.len(), 2);
        assert!(matches!(items[0], FetchItem::Uid(u) if u.get() == 123));
        let FetchItem::Flags(flags) = &items[1] else {
            panic!("expected flags");
        };
        assert!(flags.is_seen());
        assert_eq!(flags.len(), 2);
    }

    #[test]
    fn zero_uid_rejected() {
        assert!(parse(b"(UID 0)").is_err());
    }

    #[test]
    fn gmail_items() {
        let items = parse(
            b"(X-GM-THRID 1278455344230334865 X-GM-MSGID 1278455344230334866 \
              X-GM-LABELS (\\Inbox \"\\\\Important\" \"Work Stuff\" mlr/thrid/42))",
        )
        .unwrap();
        assert_eq!(items[0], FetchItem::GmThrId(1278455344230334865));
        assert_eq!(items[1], FetchItem::GmMsgId(1278455344230334866));
        assert_eq!(
            items[2],
            FetchItem::GmLabels(vec![
                "\\Inbox".to_string(),
                "\\Important".to_string(),
                "Work Stuff".to_string(),
                "mlr/thrid/42".to_string(),
            ])
        );
    }

    #[test]
    fn body_peek_section_with_literal() {
        let items = parse(b"(BODY[HEADER.FIELDS (MESSAGE-ID)] {21}\r\nMessage-ID: <a@b>\r\n\r\n)")
            .unwrap();
        assert_eq!(
            items[0],
            FetchItem::Body {
                section: Some("HEADER.FIELDS (MESSAGE-ID)".to_string()),
                data: Some(b"Message-ID: <a@b>\r\n\r\n".to_vec()),
            }
        );
    }

    #[test]
    fn full_body_and_header_aliases() {
        let items = parse(b"(RFC822.HEADER {4}\r\nA: b BODY[] {2}\r\nhi RFC822.SIZE 2)").unwrap();
        assert_eq!(
            items[0],
            FetchItem::Body {
                section: Some("HEADER".to_string()),
                data: Some(b"A: b".to_vec()),
            }
        );
        assert_eq!(
            items[1],
            FetchItem::Body {
                section: Some(String::new()),
                data: Some(b"hi".to_vec()),
            }
        );
        assert_eq!(items[2], FetchItem::Rfc822Size(2));
    }

    #[test]
    fn modseq_and_internaldate() {
        let items =
            parse(b"(MODSEQ (12121231000) INTERNALDATE \"17-Jul-1996 02:44:25 -0700\")").unwrap();
        assert_eq!(items[0], FetchItem::ModSeq(12121231000));
        assert_eq!(
            items[1],
            FetchItem::InternalDate("17-Jul-1996 02:44:25 -0700".to_string())
        );
    }

    #[test]
    fn unknown_items_are_skipped() {
        let items = parse(
            b"(ENVELOPE (\"date\" \"subj\" NIL NIL NIL NIL NIL NIL NIL \"<id>\") UID 9 X-CUSTOM foo)",
        )
        .unwrap();
        assert_eq!(items, vec![FetchItem::Uid(Uid::new(9).unwrap())]);
    }

    #[test]
    fn nil_body() {
        let items = parse(b"(BODY[TEXT] NIL)").unwrap();
        assert_eq!(
            items[0],
            FetchItem::Body {
                section: Some("TEXT".to_string()),
                data: None,
            }
        );
    }
}
