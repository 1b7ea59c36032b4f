//! Structured view of one stored or fetched message.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset};
use regex::Regex;

use crate::address::{Address, parse_addresses};
use crate::charset::Decoder;
use crate::encoding::{collapse_whitespace, decode_header_value};
use crate::error::{Error, Result};
use crate::header::{Headers, split_message};
use crate::message::Part;
use crate::synthetic::{SyntheticHeaders, content_hash};

/// Message-Id given to messages that lack one.
pub const NO_MESSAGE_ID: &str = "<mailmirror@noid>";

/// Characters kept in [`ParsedMessage::text_preview`].
pub const PREVIEW_CHARS: usize = 200;

/// INTERNALDATE layout, e.g. `17-Jul-1996 02:44:25 -0700`.
pub const INTERNAL_DATE_FORMAT: &str = "%d-%b-%Y %H:%M:%S %z";

static EMBEDDED_MESSAGE_ID: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?im)^Message-ID:(.*)$").ok());

/// A non-inline part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Position in the MIME tree, e.g. `2` or `1.3`.
    pub path: String,
    /// `type/subtype`
    pub content_type: String,
    /// Decoded filename, if any.
    pub filename: Option<String>,
    /// Decoded size in bytes.
    pub size: usize,
    /// Content-ID, for inline images.
    pub content_id: Option<String>,
}

/// Result of [`ParsedMessage::parse`].
#[derive(Debug, Clone, Default)]
pub struct ParsedMessage {
    /// Raw header block (encoded words not decoded).
    pub headers: Headers,
    /// From
    pub from: Vec<Address>,
    /// Sender
    pub sender: Vec<Address>,
    /// Reply-To
    pub reply_to: Vec<Address>,
    /// To
    pub to: Vec<Address>,
    /// Cc
    pub cc: Vec<Address>,
    /// Bcc
    pub bcc: Vec<Address>,
    /// Decoded, whitespace-collapsed subject.
    pub subject: String,
    /// Date header.
    pub date: Option<DateTime<FixedOffset>>,
    /// INTERNALDATE, falling back to the Date header.
    pub arrived: Option<DateTime<FixedOffset>>,
    /// Message-Id as used for threading; a replacement for duplicates.
    pub message_id: String,
    /// The header's own Message-Id when `message_id` was replaced.
    pub duplicate_of: Option<String>,
    /// In-Reply-To
    pub in_reply_to: Option<String>,
    /// References, or In-Reply-To when References is empty.
    pub references: Vec<String>,
    /// Last entry of `references`.
    pub parent_id: Option<String>,
    /// Message-ID quoted inside a bounce.
    pub embedded_message_id: Option<String>,
    /// Non-inline parts.
    pub attachments: Vec<Attachment>,
    /// Concatenated `text/plain` parts.
    pub text: String,
    /// Concatenated `text/html` parts.
    pub html: String,
    /// First [`PREVIEW_CHARS`] characters of the text.
    pub text_preview: String,
    /// Provenance fields, when parsing a stored message.
    pub synthetic: SyntheticHeaders,
    /// SHA-256 of the original (unprefixed) bytes.
    pub content_hash: String,
    /// Message-Id seen before under a different UID.
    pub is_duplicate: bool,
    /// Decoding problems; non-empty means the stored copy gets `#err`.
    pub errors: Vec<String>,
}

impl ParsedMessage {
    /// Parses `raw` fetched as `uid` with the given INTERNALDATE.
    ///
    /// `known` maps Message-Ids to the UID that first carried them. A match
    /// with another UID marks the message as a duplicate and replaces its id.
    /// Synthetic fields at the top of `raw` are read into
    /// [`synthetic`](Self::synthetic) and excluded from the content hash.
    ///
    /// # Errors
    ///
    /// [`Error::Parse`] only for empty input. Everything else is tolerated and
    /// recorded in [`errors`](Self::errors).
    pub fn parse(
        raw: &[u8],
        uid: u32,
        internal_date: Option<&str>,
        known: &HashMap<String, u32>,
    ) -> Result<Self> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(Error::Parse(format!("UID {uid}: empty message")));
        }
        let original = crate::synthetic::strip(raw);
        let mut decoder = Decoder::new();
        let root = Part::parse(raw, &mut decoder);
        decoder.hint(root.charsets().iter().map(String::as_str));

        let headers = root.headers.clone();
        let synthetic = SyntheticHeaders::parse(&headers).unwrap_or_else(|e| {
            decoder.note(e.to_string());
            SyntheticHeaders::default()
        });
        let mut msg = Self {
            content_hash: content_hash(original),
            synthetic,
            ..Self::default()
        };

        let mut addrs = |name: &str| {
            headers
                .get(name)
                .map(|v| parse_addresses(&decode_header_value(v, &mut decoder, name)))
                .unwrap_or_default()
        };
        msg.from = addrs("From");
        msg.sender = addrs("Sender");
        msg.reply_to = addrs("Reply-To");
        msg.to = addrs("To");
        msg.cc = addrs("Cc");
        msg.bcc = addrs("Bcc");
        msg.subject = headers
            .get("Subject")
            .map(|v| decode_header_value(v, &mut decoder, "Subject"))
            .unwrap_or_default();

        msg.date = headers.get("Date").and_then(parse_date);
        msg.arrived = internal_date.and_then(parse_internal_date).or(msg.date);

        msg.in_reply_to = headers.get("In-Reply-To").and_then(|v| ids(v).pop());
        msg.references = headers.get("References").map(ids).unwrap_or_default();
        if msg.references.is_empty() {
            msg.references.extend(msg.in_reply_to.clone());
        }
        msg.parent_id = msg.references.last().cloned();

        let message_id = headers.get("Message-Id").and_then(|v| ids(v).into_iter().next());
        let message_id = message_id.unwrap_or_else(|| {
            tracing::debug!(uid, "message has no Message-Id");
            NO_MESSAGE_ID.to_string()
        });
        match known.get(&message_id) {
            Some(&first) if first != uid => {
                tracing::info!(uid, first, message_id = %message_id, "duplicate Message-Id");
                msg.is_duplicate = true;
                msg.message_id = crate::synthetic::dup_message_id(&msg.content_hash, uid.into());
                msg.duplicate_of = Some(message_id);
            }
            _ => msg.message_id = message_id,
        }

        let mut walk = Walk::default();
        walk.part(&root, "", &mut decoder);
        msg.text = walk.text;
        msg.html = walk.html;
        msg.attachments = walk.attachments;
        let preview_source = if msg.text.trim().is_empty() {
            strip_tags(&msg.html)
        } else {
            msg.text.clone()
        };
        msg.text_preview = collapse_whitespace(&preview_source)
            .chars()
            .take(PREVIEW_CHARS)
            .collect();

        if msg
            .from
            .iter()
            .any(|a| a.addr.to_ascii_lowercase().starts_with("mailer-daemon@"))
        {
            let (_, body) = split_message(original);
            msg.embedded_message_id = embedded_message_id(&String::from_utf8_lossy(body));
        }

        msg.headers = headers;
        msg.errors = decoder.into_errors();
        Ok(msg)
    }

    /// Ids this message links to for threading: its own id, references and
    /// the bounce-embedded id.
    #[must_use]
    pub fn thread_links(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.references.iter().map(String::as_str).collect();
        out.extend(self.in_reply_to.as_deref());
        out.extend(self.embedded_message_id.as_deref());
        out
    }
}

#[derive(Default)]
struct Walk {
    text: String,
    html: String,
    attachments: Vec<Attachment>,
}

impl Walk {
    fn part(&mut self, part: &Part, path: &str, decoder: &mut Decoder) {
        let ct = &part.content_type;
        let label = format!("{}({})", ct.mime_type(), if path.is_empty() { "0" } else { path });
        let filename = part.filename(decoder);
        if ct.is_multipart() && !part.children.is_empty() {
            for (i, child) in part.children.iter().enumerate() {
                let child_path = if path.is_empty() {
                    (i + 1).to_string()
                } else {
                    format!("{path}.{}", i + 1)
                };
                self.part(child, &child_path, decoder);
            }
        } else if ct.is_text() && filename.is_none() && !part.is_attachment() {
            let text = part.text(decoder, &label);
            if ct.sub_type == "html" {
                self.html.push_str(&text);
            } else {
                self.text.push_str(&text);
            }
        } else {
            let size = if ct.is_message() {
                part.body.len()
            } else {
                part.decoded_body(decoder, &label).len()
            };
            self.attachments.push(Attachment {
                path: if path.is_empty() { "1".into() } else { path.into() },
                content_type: ct.mime_type(),
                filename,
                size,
                content_id: part.headers.get("Content-ID").map(|v| v.trim().to_string()),
            });
        }
    }
}

/// Extracts every `<id>` from a Message-Id list. Headers without brackets
/// fall back to whitespace separated tokens.
fn ids(value: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = value;
    while let Some(open) = rest.find('<') {
        let Some(close) = rest[open..].find('>') else {
            break;
        };
        let id = &rest[open..=open + close];
        if id.len() > 2 && !id.contains(char::is_whitespace) {
            out.push(id.to_string());
        }
        rest = &rest[open + close + 1..];
    }
    if out.is_empty() {
        out = value.split_whitespace().map(ToString::to_string).collect();
    }
    out
}

/// Parses a Date header, ignoring a trailing `(TZ)` comment.
fn parse_date(value: &str) -> Option<DateTime<FixedOffset>> {
    let value = value.trim();
    DateTime::parse_from_rfc2822(value).ok().or_else(|| {
        let cut = value.find('(')?;
        DateTime::parse_from_rfc2822(value[..cut].trim()).ok()
    })
}

/// Parses an IMAP INTERNALDATE, with or without quotes.
#[must_use]
pub fn parse_internal_date(value: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_str(value.trim().trim_matches('"').trim(), INTERNAL_DATE_FORMAT).ok()
}

/// First `Message-ID:` line in `text`, as used to thread bounces.
#[must_use]
pub fn embedded_message_id(text: &str) -> Option<String> {
    let re = EMBEDDED_MESSAGE_ID.as_ref()?;
    re.captures_iter(text)
        .filter_map(|c| c.get(1))
        .find_map(|m| ids(m.as_str()).into_iter().next())
}

/// Crude tag stripper for previews of HTML-only mail.
fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
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

    fn parse(raw: &[u8]) -> ParsedMessage {
        ParsedMessage::parse(raw, 1, Some("\"17-Jul-1996 02:44:25 -0700\""), &HashMap::new())
            .unwrap()
    }

    #[test]
    fn plain_message() {
        let msg = parse(
            b"From: =?utf-8?B?SsO8cmdlbg==?= <jurgen@example.de>\r\n\
To: a@x.org, \"B\" <b@x.org>\r\n\
Subject: =?utf-8?Q?Gr=C3=BC=C3=9Fe?=\r\n\
Date: Tue, 1 Jul 2003 10:52:37 +0200 (CEST)\r\n\
Message-Id: <101@mlr>\r\n\
\r\n\
Hello   there,\r\n  world\r\n",
        );
        assert_eq!(msg.from[0].name, "Jürgen");
        assert_eq!(msg.to.len(), 2);
        assert_eq!(msg.subject, "Grüße");
        assert_eq!(msg.message_id, "<101@mlr>");
        assert_eq!(msg.date.unwrap().timestamp(), 1_057_049_557);
        assert_eq!(msg.arrived.unwrap().timestamp(), 837_596_665);
        assert_eq!(msg.text_preview, "Hello there, world");
        assert!(msg.errors.is_empty());
        assert!(!msg.is_duplicate);
    }

    #[test]
    fn references_and_parent() {
        let msg = parse(b"References: <1@x>\r\n\t<2@x>\r\nIn-Reply-To: <2@x>\r\n\r\n");
        assert_eq!(msg.references, vec!["<1@x>", "<2@x>"]);
        assert_eq!(msg.parent_id.as_deref(), Some("<2@x>"));

        let msg = parse(b"References:\r\nIn-Reply-To: <9@x> (comment)\r\n\r\n");
        assert_eq!(msg.references, vec!["<9@x>"]);
        assert_eq!(msg.parent_id.as_deref(), Some("<9@x>"));
    }

    #[test]
    fn missing_message_id() {
        let msg = parse(b"Subject: x\r\n\r\nbody");
        assert_eq!(msg.message_id, NO_MESSAGE_ID);
    }

    #[test]
    fn duplicate_message_id_is_replaced() {
        let known = HashMap::from([("<101@mlr>".to_string(), 5)]);
        let raw = b"Message-Id: <101@mlr>\r\n\r\nagain";
        let msg = ParsedMessage::parse(raw, 9, None, &known).unwrap();
        assert!(msg.is_duplicate);
        assert_eq!(msg.duplicate_of.as_deref(), Some("<101@mlr>"));
        assert!(msg.message_id.ends_with(".9@mailmirror.dup>"));

        let same = ParsedMessage::parse(raw, 5, None, &known).unwrap();
        assert!(!same.is_duplicate);
    }

    #[test]
    fn legacy_charset_without_declaration() {
        let msg = parse(b"Subject: caf\xe9\r\n\r\nna\xefve");
        assert_eq!(msg.subject, "café");
        assert_eq!(msg.text, "naïve");
        assert_eq!(msg.errors.len(), 2);
    }

    #[test]
    fn attachments_and_html_preview() {
        let raw = b"Content-Type: multipart/mixed; boundary=b\r\n\r\n\
--b\r\nContent-Type: text/html\r\n\r\n<p>Hi &amp; <b>bye</b></p>\r\n\
--b\r\nContent-Type: image/png\r\nContent-ID: <img1>\r\nContent-Transfer-Encoding: base64\r\n\r\niVBORw==\r\n\
--b\r\nContent-Type: message/rfc822\r\n\r\nSubject: inner\r\n\r\nx\r\n\
--b--\r\n";
        let msg = parse(raw);
        assert_eq!(msg.text_preview, "Hi & bye");
        assert_eq!(msg.attachments.len(), 2);
        assert_eq!(msg.attachments[0].path, "2");
        assert_eq!(msg.attachments[0].content_type, "image/png");
        assert_eq!(msg.attachments[0].size, 4);
        assert_eq!(msg.attachments[0].content_id.as_deref(), Some("<img1>"));
        assert_eq!(msg.attachments[1].content_type, "message/rfc822");
    }

    #[test]
    fn bounce_embeds_original_id() {
        let raw = b"From: MAILER-DAEMON@mx.example.com\r\nMessage-Id: <bounce@mx>\r\n\r\n\
Delivery failed.\r\n\r\nMessage-ID: <orig@me>\r\nSubject: hi\r\n";
        let msg = parse(raw);
        assert_eq!(msg.embedded_message_id.as_deref(), Some("<orig@me>"));
        assert!(msg.thread_links().contains(&"<orig@me>"));
    }

    #[test]
    fn synthetic_fields_do_not_change_the_hash() {
        let original = b"Subject: x\r\nMessage-Id: <1@x>\r\n\r\nbody".as_slice();
        let stored = SyntheticHeaders {
            uid: Some(3),
            ..SyntheticHeaders::default()
        }
        .serialize(original);
        let a = parse(original);
        let b = parse(&stored);
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(b.synthetic.uid, Some(3));
    }

    #[test]
    fn empty_input_is_an_error() {
        assert!(ParsedMessage::parse(b"\r\n", 1, None, &HashMap::new()).is_err());
    }

    #[test]
    fn internal_date_variants() {
        assert!(parse_internal_date("\" 5-Jan-2020 10:00:00 +0000\"").is_some());
        assert!(parse_internal_date("05-Jan-2020 10:00:00 +0000").is_some());
        assert!(parse_internal_date("yesterday").is_none());
    }
}
