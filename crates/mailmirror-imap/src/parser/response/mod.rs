//! Response parser.
//!
//! Turns one complete response (as assembled by the framed reader) into a
//! [`Response`].

#![allow(clippy::missing_errors_doc)]

mod fetch;
mod helpers;
mod types;

pub use types::{FetchItem, StatusItem, UntaggedResponse};

use crate::parser::lexer::{Lexer, Token};
use crate::types::{ResponseCode, SeqNum, Status, Tag};
use crate::{Error, Result};

use helpers::{
    parse_capability_data, parse_flag_list, parse_list_response, parse_response_code,
    parse_search_response, parse_status_response, read_text_until_crlf,
};

/// A parsed server response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Command completion.
    Tagged {
        /// Tag of the completed command.
        tag: Tag,
        /// Completion status.
        status: Status,
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// Server data.
    Untagged(UntaggedResponse),
    /// `+` continuation request.
    Continuation {
        /// Text after the `+`, if any.
        text: Option<String>,
    },
}

/// Stateless response parser.
pub struct ResponseParser;

impl ResponseParser {
    /// Parses one response.
    pub fn parse(input: &[u8]) -> Result<Response> {
        let mut lexer = Lexer::new(input);
        match lexer.next_token()? {
            Token::Asterisk => Self::untagged(&mut lexer),
            Token::Plus => Ok(Self::continuation(&mut lexer)),
            Token::Atom(tag) => Self::tagged(&mut lexer, tag),
            token => Err(Error::parse(0, format!("expected *, + or tag, got {token:?}"))),
        }
    }

    fn tagged(lexer: &mut Lexer<'_>, tag: &str) -> Result<Response> {
        lexer.expect_space()?;
        let status = Self::status(lexer)?;
        let (code, text) = Self::resp_text(lexer)?;
        Ok(Response::Tagged {
            tag: Tag::new(tag),
            status,
            code,
            text,
        })
    }

    fn untagged(lexer: &mut Lexer<'_>) -> Result<Response> {
        lexer.expect_space()?;
        let data = match lexer.next_token()? {
            Token::Atom(keyword) => Self::keyword_data(lexer, keyword)?,
            Token::Number(n) => Self::message_data(lexer, n)?,
            token => {
                return Err(Error::parse(
                    lexer.position(),
                    format!("unexpected {token:?} after *"),
                ));
            }
        };
        Ok(Response::Untagged(data))
    }

    fn keyword_data(lexer: &mut Lexer<'_>, keyword: &str) -> Result<UntaggedResponse> {
        let upper = keyword.to_ascii_uppercase();
        let data = match upper.as_str() {
            "OK" | "NO" | "BAD" | "PREAUTH" | "BYE" => {
                let (code, text) = Self::resp_text(lexer)?;
                match upper.as_str() {
                    "OK" => UntaggedResponse::Ok { code, text },
                    "NO" => UntaggedResponse::No { code, text },
                    "BAD" => UntaggedResponse::Bad { code, text },
                    "PREAUTH" => UntaggedResponse::PreAuth { code, text },
                    _ => UntaggedResponse::Bye { code, text },
                }
            }
            "CAPABILITY" => UntaggedResponse::Capability(parse_capability_data(lexer)?),
            "ENABLED" => UntaggedResponse::Enabled(parse_capability_data(lexer)?),
            "FLAGS" => {
                lexer.expect_space()?;
                UntaggedResponse::Flags(parse_flag_list(lexer)?)
            }
            "LIST" | "LSUB" => {
                lexer.expect_space()?;
                UntaggedResponse::List(parse_list_response(lexer)?)
            }
            "SEARCH" => UntaggedResponse::Search(parse_search_response(lexer)?),
            "STATUS" => {
                lexer.expect_space()?;
                let (mailbox, items) = parse_status_response(lexer)?;
                UntaggedResponse::Status { mailbox, items }
            }
            _ => {
                return Err(Error::parse(
                    lexer.position(),
                    format!("unknown untagged response {keyword}"),
                ));
            }
        };
        Ok(data)
    }

    fn message_data(lexer: &mut Lexer<'_>, n: u64) -> Result<UntaggedResponse> {
        lexer.expect_space()?;
        let keyword = lexer.read_atom_string()?.to_ascii_uppercase();
        let small = u32::try_from(n).map_err(|_| Error::parse(lexer.position(), "count too large"))?;
        let pos = lexer.position();
        let seq = SeqNum::new(small).ok_or_else(|| Error::parse(pos, "sequence number 0"));
        match keyword.as_str() {
            "EXISTS" => Ok(UntaggedResponse::Exists(small)),
            "RECENT" => Ok(UntaggedResponse::Recent(small)),
            "EXPUNGE" => Ok(UntaggedResponse::Expunge(seq?)),
            "FETCH" => {
                let seq = seq?;
                lexer.expect_space()?;
                let items = fetch::parse_fetch_response(lexer)?;
                Ok(UntaggedResponse::Fetch { seq, items })
            }
            _ => Err(Error::parse(
                lexer.position(),
                format!("unknown message data {keyword}"),
            )),
        }
    }

    fn continuation(lexer: &mut Lexer<'_>) -> Response {
        if lexer.peek() == Some(b' ') {
            lexer.advance();
        }
        let text = read_text_until_crlf(lexer);
        Response::Continuation {
            text: (!text.is_empty()).then_some(text),
        }
    }

    fn status(lexer: &mut Lexer<'_>) -> Result<Status> {
        let word = lexer.read_atom_string()?;
        match word.to_ascii_uppercase().as_str() {
            "OK" => Ok(Status::Ok),
            "NO" => Ok(Status::No),
            "BAD" => Ok(Status::Bad),
            "PREAUTH" => Ok(Status::PreAuth),
            "BYE" => Ok(Status::Bye),
            _ => Err(Error::parse(lexer.position(), format!("bad status {word}"))),
        }
    }

    /// `[SP] [code] [SP] text`; some servers omit the text entirely.
    fn resp_text(lexer: &mut Lexer<'_>) -> Result<(Option<ResponseCode>, String)> {
        lexer.skip_spaces();
        let code = if lexer.peek() == Some(b'[') {
            Some(parse_response_code(lexer)?)
        } else {
            None
        };
        lexer.skip_spaces();
        Ok((code, read_text_until_crlf(lexer)))
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
    use crate::types::{Capability, MailboxAttribute, Uid};

    use super::*;

    #[test]
    fn greeting() {
        let response = ResponseParser::parse(b"* OK Gimap ready for requests\r\n").unwrap();
        assert_eq!(
            response,
            Response::Untagged(UntaggedResponse::Ok {
                code: None,
                text: "Gimap ready for requests".to_string(),
            })
        );
    }

    #[test]
    fn tagged_no_with_code() {
        let response =
            ResponseParser::parse(b"M0002 NO [AUTHENTICATIONFAILED] Invalid credentials\r\n")
                .unwrap();
        let Response::Tagged {
            status, code, text, ..
        } = response
        else {
            panic!("expected tagged");
        };
        assert_eq!(status, Status::No);
        assert_eq!(code, Some(ResponseCode::AuthenticationFailed));
        assert_eq!(text, "Invalid credentials");
    }

    #[test]
    fn append_uid() {
        let response =
            ResponseParser::parse(b"M0005 OK [APPENDUID 38505 3955] APPEND completed\r\n").unwrap();
        let Response::Tagged { code, .. } = response else {
            panic!("expected tagged");
        };
        let Some(ResponseCode::AppendUid { uidvalidity, uid }) = code else {
            panic!("expected APPENDUID");
        };
        assert_eq!(uidvalidity.get(), 38505);
        assert_eq!(uid.get(), 3955);
    }

    #[test]
    fn capability_with_gmail() {
        let response =
            ResponseParser::parse(b"* CAPABILITY IMAP4rev1 UIDPLUS X-GM-EXT-1 AUTH=XOAUTH2\r\n")
                .unwrap();
        let Response::Untagged(UntaggedResponse::Capability(caps)) = response else {
            panic!("expected capability");
        };
        assert!(caps.contains(&Capability::GmailExt));
        assert!(caps.contains(&Capability::Auth("XOAUTH2".to_string())));
    }

    #[test]
    fn list_with_special_use() {
        let response =
            ResponseParser::parse(b"* LIST (\\All \\HasNoChildren) \"/\" \"[Gmail]/All Mail\"\r\n")
                .unwrap();
        let Response::Untagged(UntaggedResponse::List(list)) = response else {
            panic!("expected list");
        };
        assert!(list.has(&MailboxAttribute::All));
        assert_eq!(list.mailbox.as_str(), "[Gmail]/All Mail");
        assert_eq!(list.delimiter, Some('/'));
    }

    #[test]
    fn search_with_modseq_suffix() {
        let response = ResponseParser::parse(b"* SEARCH 2 84 882 (MODSEQ 917162500)\r\n").unwrap();
        assert_eq!(
            response,
            Response::Untagged(UntaggedResponse::Search(vec![2, 84, 882]))
        );
    }

    #[test]
    fn empty_search() {
        let response = ResponseParser::parse(b"* SEARCH\r\n").unwrap();
        assert_eq!(response, Response::Untagged(UntaggedResponse::Search(vec![])));
    }

    #[test]
    fn select_codes() {
        let response = ResponseParser::parse(b"* OK [UIDVALIDITY 3857529045] UIDs valid\r\n").unwrap();
        let Response::Untagged(UntaggedResponse::Ok { code, .. }) = response else {
            panic!("expected OK");
        };
        assert!(matches!(code, Some(ResponseCode::UidValidity(v)) if v.get() == 3857529045));

        let response = ResponseParser::parse(b"* OK [HIGHESTMODSEQ 715194045007]\r\n").unwrap();
        let Response::Untagged(UntaggedResponse::Ok { code, .. }) = response else {
            panic!("expected OK");
        };
        assert_eq!(code, Some(ResponseCode::HighestModSeq(715194045007)));
    }

    #[test]
    fn fetch_line() {
        let response = ResponseParser::parse(b"* 12 FETCH (UID 4827 FLAGS (\\Seen))\r\n").unwrap();
        let Response::Untagged(UntaggedResponse::Fetch { seq, items }) = response else {
            panic!("expected fetch");
        };
        assert_eq!(seq.get(), 12);
        assert!(items.contains(&FetchItem::Uid(Uid::new(4827).unwrap())));
    }

    #[test]
    fn exists_and_expunge() {
        assert_eq!(
            ResponseParser::parse(b"* 23 EXISTS\r\n").unwrap(),
            Response::Untagged(UntaggedResponse::Exists(23))
        );
        assert!(ResponseParser::parse(b"* 0 EXPUNGE\r\n").is_err());
    }

    #[test]
    fn continuation() {
        assert_eq!(
            ResponseParser::parse(b"+ idling\r\n").unwrap(),
            Response::Continuation {
                text: Some("idling".to_string())
            }
        );
        assert_eq!(
            ResponseParser::parse(b"+\r\n").unwrap(),
            Response::Continuation { text: None }
        );
    }
}
