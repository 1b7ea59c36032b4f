//! Provenance headers written in front of stored messages.
//!
//! Every message the mirror stores carries these fields ahead of the original
//! bytes. They are the only link between a local message and its remote copy,
//! so other components read them back with [`SyntheticHeaders::parse`].

use std::fmt::Write as _;

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::charset::Decoder;
use crate::error::{Error, Result};
use crate::header::Headers;

/// `X-SHA256`
pub const SHA256: &str = "X-SHA256";
/// `X-UID`: remote UID on non-Gmail servers.
pub const UID: &str = "X-UID";
/// `X-GM-UID`: remote UID in Gmail's All Mail.
pub const GM_UID: &str = "X-GM-UID";
/// `X-GM-MSGID`
pub const GM_MSGID: &str = "X-GM-MSGID";
/// `X-GM-THRID`
pub const GM_THRID: &str = "X-GM-THRID";
/// `X-Thread-ID`: forced thread membership.
pub const THREAD_ID: &str = "X-Thread-ID";
/// `X-Remote-Host`
pub const REMOTE_HOST: &str = "X-Remote-Host";
/// `X-Remote-Login`
pub const REMOTE_LOGIN: &str = "X-Remote-Login";
/// `X-GM-Login`
pub const GM_LOGIN: &str = "X-GM-Login";
/// `X-Remote-Folder`: folder the UID belongs to.
pub const REMOTE_FOLDER: &str = "X-Remote-Folder";

const ALL: &[&str] = &[
    SHA256,
    UID,
    GM_UID,
    GM_MSGID,
    GM_THRID,
    THREAD_ID,
    REMOTE_HOST,
    REMOTE_LOGIN,
    GM_LOGIN,
    REMOTE_FOLDER,
];

/// Typed view of the synthetic fields. Values are written as `<value>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyntheticHeaders {
    /// Content hash of the original bytes.
    pub sha256: Option<String>,
    /// Remote UID (non-Gmail).
    pub uid: Option<u32>,
    /// Remote UID (Gmail).
    pub gm_uid: Option<u32>,
    /// Gmail message id.
    pub gm_msgid: Option<u64>,
    /// Gmail thread id.
    pub gm_thrid: Option<u64>,
    /// Thread the message is pinned to.
    pub thread_id: Option<String>,
    /// Server the message came from.
    pub remote_host: Option<String>,
    /// Login it was fetched with.
    pub remote_login: Option<String>,
    /// Gmail login it was fetched with.
    pub gm_login: Option<String>,
    /// Remote folder of `uid` / `gm_uid`.
    pub remote_folder: Option<String>,
}

impl SyntheticHeaders {
    /// Remote UID, whichever header carries it.
    #[must_use]
    pub const fn remote_uid(&self) -> Option<u32> {
        match (self.gm_uid, self.uid) {
            (Some(uid), _) | (None, Some(uid)) => Some(uid),
            (None, None) => None,
        }
    }

    /// Reads the synthetic fields from a parsed header block.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidHeader`] when a numeric field does not hold a number.
    pub fn parse(headers: &Headers) -> Result<Self> {
        Ok(Self {
            sha256: text(headers, SHA256),
            uid: number(headers, UID)?,
            gm_uid: number(headers, GM_UID)?,
            gm_msgid: number(headers, GM_MSGID)?,
            gm_thrid: number(headers, GM_THRID)?,
            thread_id: headers.get(THREAD_ID).map(|v| v.trim().to_string()),
            remote_host: text(headers, REMOTE_HOST),
            remote_login: text(headers, REMOTE_LOGIN),
            gm_login: text(headers, GM_LOGIN),
            remote_folder: text(headers, REMOTE_FOLDER),
        })
    }

    /// Reads the synthetic fields straight from stored bytes.
    ///
    /// # Errors
    ///
    /// See [`parse`](Self::parse).
    pub fn from_message(raw: &[u8]) -> Result<Self> {
        Self::parse(&Headers::parse(raw, &mut Decoder::new()))
    }

    /// Header lines, CRLF terminated, in a fixed order.
    #[must_use]
    pub fn to_header_block(&self) -> String {
        let mut out = String::new();
        let mut line = |name: &str, value: Option<String>| {
            if let Some(value) = value {
                let _ = write!(out, "{name}: <{value}>\r\n");
            }
        };
        line(SHA256, self.sha256.clone());
        line(UID, self.uid.map(|v| v.to_string()));
        line(GM_UID, self.gm_uid.map(|v| v.to_string()));
        line(GM_MSGID, self.gm_msgid.map(|v| v.to_string()));
        line(GM_THRID, self.gm_thrid.map(|v| v.to_string()));
        line(REMOTE_HOST, self.remote_host.clone());
        line(REMOTE_LOGIN, self.remote_login.clone());
        line(GM_LOGIN, self.gm_login.clone());
        line(REMOTE_FOLDER, self.remote_folder.clone());
        if let Some(thread) = &self.thread_id {
            let _ = write!(out, "{THREAD_ID}: {thread}\r\n");
        }
        out
    }

    /// Prepends the synthetic fields to `original`, which is kept verbatim.
    #[must_use]
    pub fn serialize(&self, original: &[u8]) -> Vec<u8> {
        let block = self.to_header_block();
        let mut out = Vec::with_capacity(block.len() + original.len());
        out.extend_from_slice(block.as_bytes());
        out.extend_from_slice(original);
        out
    }
}

fn text(headers: &Headers, name: &str) -> Option<String> {
    headers.get(name).map(unbracket).filter(|v| !v.is_empty())
}

fn number<T: std::str::FromStr>(headers: &Headers, name: &str) -> Result<Option<T>> {
    let Some(value) = headers.get(name) else {
        return Ok(None);
    };
    unbracket(value)
        .parse()
        .map(Some)
        .map_err(|_| Error::InvalidHeader(format!("{name}: {value:?} is not a number")))
}

fn unbracket(value: &str) -> String {
    let value = value.trim();
    value
        .strip_prefix('<')
        .and_then(|v| v.strip_suffix('>'))
        .unwrap_or(value)
        .trim()
        .to_string()
}

/// Removes leading synthetic fields, returning the original bytes.
#[must_use]
pub fn strip(stored: &[u8]) -> &[u8] {
    let mut rest = stored;
    loop {
        let end = rest.iter().position(|&b| b == b'\n').map_or(rest.len(), |i| i + 1);
        let line = &rest[..end];
        let is_synthetic = line
            .iter()
            .position(|&b| b == b':')
            .and_then(|colon| std::str::from_utf8(&line[..colon]).ok())
            .is_some_and(|name| ALL.iter().any(|n| n.eq_ignore_ascii_case(name)));
        if !is_synthetic {
            return rest;
        }
        rest = &rest[end..];
    }
}

/// Lowercase hex SHA-256 of `raw`.
#[must_use]
pub fn content_hash(raw: &[u8]) -> String {
    format!("{:x}", Sha256::digest(raw))
}

/// Replacement Message-Id for a duplicate: `<{hash8}.{local_id}@mailmirror.dup>`.
#[must_use]
pub fn dup_message_id(hash: &str, local_id: u64) -> String {
    let short = hash.get(..8).unwrap_or(hash);
    format!("<{short}.{local_id}@mailmirror.dup>")
}

/// Fresh `<uuid@mailmirror.{label}>` id.
#[must_use]
pub fn generate_message_id(label: &str) -> String {
    format!("<{}@mailmirror.{label}>", uuid::Uuid::new_v4().simple())
}

/// Sender of thread-linking messages.
pub const LINK_FROM: &str = "mailmirror@link";
/// Subject of thread-linking messages.
pub const LINK_SUBJECT: &str = "Dummy: linking threads";

/// Builds the zero-body message that joins the threads of `references`.
#[must_use]
pub fn build_link_message(references: &[String]) -> Vec<u8> {
    let mut headers = Headers::new();
    headers.add("Subject", LINK_SUBJECT);
    headers.add("References", references.join(" "));
    headers.add("Message-Id", generate_message_id("link"));
    headers.add("From", LINK_FROM);
    headers.add("Date", Utc::now().to_rfc2822());
    let mut raw = headers.to_string().into_bytes();
    raw.extend_from_slice(b"\r\n");
    raw
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

    const ORIGINAL: &[u8] = b"Subject: hi\r\nMessage-Id: <1@x>\r\n\r\nbody\r\n";

    #[test]
    fn serialize_then_parse() {
        let synthetic = SyntheticHeaders {
            sha256: Some(content_hash(ORIGINAL)),
            gm_uid: Some(42),
            gm_msgid: Some(1278455344230334865),
            gm_thrid: Some(1278455344230334866),
            gm_login: Some("me@gmail.com".into()),
            thread_id: Some("<mailmirror/thrid/7@mailmirror.link>".into()),
            ..SyntheticHeaders::default()
        };
        let stored = synthetic.serialize(ORIGINAL);
        assert!(stored.ends_with(ORIGINAL));
        assert!(stored.starts_with(b"X-SHA256: <"));

        let back = SyntheticHeaders::from_message(&stored).unwrap();
        assert_eq!(back, synthetic);
        assert_eq!(back.remote_uid(), Some(42));
        assert_eq!(strip(&stored), ORIGINAL);
    }

    #[test]
    fn strip_leaves_plain_messages_alone() {
        assert_eq!(strip(ORIGINAL), ORIGINAL);
    }

    #[test]
    fn bad_number_is_an_error() {
        let err = SyntheticHeaders::from_message(b"X-UID: <abc>\r\n\r\n").unwrap_err();
        assert!(matches!(err, Error::InvalidHeader(_)));
    }

    #[test]
    fn hash_is_lowercase_hex() {
        assert_eq!(
            content_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn dup_id_format() {
        assert_eq!(
            dup_message_id("ba7816bf8f01cfea", 17),
            "<ba7816bf.17@mailmirror.dup>"
        );
    }

    #[test]
    fn link_message_shape() {
        let raw = build_link_message(&["<a@x>".to_string(), "<b@y>".to_string()]);
        let headers = Headers::parse(&raw, &mut Decoder::new());
        assert_eq!(headers.get("from"), Some(LINK_FROM));
        assert_eq!(headers.get("subject"), Some(LINK_SUBJECT));
        assert_eq!(headers.get("references"), Some("<a@x> <b@y>"));
        let id = headers.get("message-id").unwrap();
        assert!(id.starts_with('<') && id.ends_with("@mailmirror.link>"));
        assert!(raw.ends_with(b"\r\n\r\n"));
    }
}
