//! MIME part tree.

use std::fmt;

use crate::charset::Decoder;
use crate::content_type::{ContentType, Disposition};
use crate::encoding::{decode_base64, decode_header_value, decode_quoted_printable};
use crate::header::{Headers, split_message};

/// Nesting limit for multiparts; deeper parts are treated as opaque.
const MAX_DEPTH: usize = 32;

/// Transfer encoding types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// 7-bit ASCII.
    SevenBit,
    /// 8-bit binary.
    EightBit,
    /// Base64 encoding.
    Base64,
    /// Quoted-Printable encoding.
    QuotedPrintable,
    /// Binary (no encoding).
    Binary,
}

impl TransferEncoding {
    /// Parses transfer encoding from string.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "8bit" => Self::EightBit,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            "binary" => Self::Binary,
            _ => Self::SevenBit,
        }
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SevenBit => write!(f, "7bit"),
            Self::EightBit => write!(f, "8bit"),
            Self::Base64 => write!(f, "base64"),
            Self::QuotedPrintable => write!(f, "quoted-printable"),
            Self::Binary => write!(f, "binary"),
        }
    }
}

/// One node of the MIME tree.
#[derive(Debug, Clone)]
pub struct Part {
    /// Part headers.
    pub headers: Headers,
    /// Parsed Content-Type (defaults to text/plain).
    pub content_type: ContentType,
    /// Body as transmitted, before transfer decoding.
    pub body: Vec<u8>,
    /// Children of a multipart.
    pub children: Vec<Part>,
}

impl Part {
    /// Parses a message or body part and, for multiparts, its children.
    pub fn parse(raw: &[u8], decoder: &mut Decoder) -> Self {
        Self::parse_at(raw, decoder, 0)
    }

    fn parse_at(raw: &[u8], decoder: &mut Decoder, depth: usize) -> Self {
        let headers = Headers::parse(raw, decoder);
        let (_, body) = split_message(raw);
        let content_type = headers
            .get("content-type")
            .map(ContentType::parse)
            .unwrap_or_default();
        let mut children = Vec::new();
        if content_type.is_multipart() && depth < MAX_DEPTH {
            if let Some(boundary) = content_type.boundary() {
                children = split_multipart(body, boundary)
                    .into_iter()
                    .map(|part| Self::parse_at(part, decoder, depth + 1))
                    .collect();
            } else {
                decoder.note("multipart without boundary".to_string());
            }
        }
        Self {
            headers,
            content_type,
            body: body.to_vec(),
            children,
        }
    }

    /// Gets the transfer encoding.
    #[must_use]
    pub fn transfer_encoding(&self) -> TransferEncoding {
        self.headers
            .get("content-transfer-encoding")
            .map_or(TransferEncoding::SevenBit, TransferEncoding::parse)
    }

    /// Body after transfer decoding. Broken base64 yields the raw body and a
    /// recorded error.
    pub fn decoded_body(&self, decoder: &mut Decoder, label: &str) -> Vec<u8> {
        match self.transfer_encoding() {
            TransferEncoding::Base64 => decode_base64(&self.body).unwrap_or_else(|e| {
                decoder.note(format!("{label}: {e}"));
                self.body.clone()
            }),
            TransferEncoding::QuotedPrintable => decode_quoted_printable(&self.body),
            _ => self.body.clone(),
        }
    }

    /// Decoded text of a `text/*` part.
    pub fn text(&self, decoder: &mut Decoder, label: &str) -> String {
        let bytes = self.decoded_body(decoder, label);
        decoder.decode(&bytes, self.content_type.charset(), label)
    }

    /// Attachment filename from Content-Disposition or the `name` parameter.
    pub fn filename(&self, decoder: &mut Decoder) -> Option<String> {
        let disposition = self.headers.get("content-disposition").map(Disposition::parse);
        disposition
            .as_ref()
            .and_then(Disposition::filename)
            .or_else(|| self.content_type.name())
            .map(|name| decode_header_value(name, decoder, "filename"))
            .filter(|name| !name.is_empty())
    }

    /// True when Content-Disposition says `attachment`.
    #[must_use]
    pub fn is_attachment(&self) -> bool {
        self.headers
            .get("content-disposition")
            .is_some_and(|d| Disposition::parse(d).is_attachment())
    }

    /// Charsets declared anywhere in the tree, for decoder hints.
    #[must_use]
    pub fn charsets(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_charsets(&mut out);
        out
    }

    fn collect_charsets(&self, out: &mut Vec<String>) {
        if let Some(c) = self.content_type.charset() {
            let c = c.to_ascii_lowercase();
            if !out.contains(&c) {
                out.push(c);
            }
        }
        for child in &self.children {
            child.collect_charsets(out);
        }
    }
}

/// Splits a multipart body on `--boundary` lines. The preamble and epilogue
/// are dropped; a missing close delimiter ends the last part at EOF.
fn split_multipart<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();
    let mut parts = Vec::new();
    let mut current: Option<usize> = None;
    let mut pos = 0;
    while pos < body.len() {
        let end = body[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(body.len(), |i| pos + i + 1);
        let line = body[pos..end].trim_ascii_end();
        if let Some(rest) = line.strip_prefix(delimiter) {
            let closing = rest.starts_with(b"--");
            if closing || rest.trim_ascii().is_empty() {
                if let Some(start) = current.take() {
                    parts.push(trim_line_end(&body[start..pos]));
                }
                if closing {
                    return parts;
                }
                current = Some(end);
            }
        }
        pos = end;
    }
    if let Some(start) = current {
        parts.push(&body[start.min(body.len())..]);
    }
    parts
}

/// Drops the CRLF that belongs to the following delimiter.
fn trim_line_end(part: &[u8]) -> &[u8] {
    let part = part.strip_suffix(b"\n").unwrap_or(part);
    part.strip_suffix(b"\r").unwrap_or(part)
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

    const MULTIPART: &[u8] = b"Content-Type: multipart/mixed; boundary=\"XX\"\r\n\
\r\n\
preamble\r\n\
--XX\r\n\
Content-Type: text/plain; charset=koi8-r\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
8NLJ\r\n\
--XX\r\n\
Content-Type: application/pdf; name=\"a.pdf\"\r\n\
Content-Disposition: attachment\r\n\
\r\n\
%PDF\r\n\
--XX--\r\n\
epilogue\r\n";

    #[test]
    fn test_transfer_encoding_parse() {
        assert_eq!(TransferEncoding::parse("7bit"), TransferEncoding::SevenBit);
        assert_eq!(TransferEncoding::parse(" BASE64 "), TransferEncoding::Base64);
        assert_eq!(
            TransferEncoding::parse("quoted-printable"),
            TransferEncoding::QuotedPrintable
        );
    }

    #[test]
    fn test_multipart_tree() {
        let mut d = Decoder::new();
        let root = Part::parse(MULTIPART, &mut d);
        assert!(root.content_type.is_multipart());
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.children[0].text(&mut d, "1"), "При");
        assert_eq!(root.children[1].body, b"%PDF");
        assert!(root.children[1].is_attachment());
        assert_eq!(root.children[1].filename(&mut d).as_deref(), Some("a.pdf"));
        assert_eq!(root.charsets(), vec!["koi8-r".to_string()]);
        assert!(d.errors().is_empty());
    }

    #[test]
    fn test_unterminated_multipart() {
        let raw = b"Content-Type: multipart/alternative; boundary=b\n\n--b\n\nfirst\n--b\n\nsecond";
        let root = Part::parse(raw, &mut Decoder::new());
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.children[1].body, b"second");
    }

    #[test]
    fn test_broken_base64_is_recorded() {
        let raw = b"Content-Transfer-Encoding: base64\r\n\r\n!!not base64!!";
        let mut d = Decoder::new();
        let part = Part::parse(raw, &mut d);
        assert_eq!(part.decoded_body(&mut d, "1"), b"!!not base64!!");
        assert_eq!(d.errors().len(), 1);
    }
}
