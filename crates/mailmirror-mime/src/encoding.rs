//! Transfer-encoding and encoded-word decoding.
//!
//! Supports Base64, Quoted-Printable, and RFC 2047 header encoding. Everything
//! here decodes to bytes or goes through [`Decoder`] so a bad charset never
//! aborts a message.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::charset::Decoder;
use crate::error::{Error, Result};

/// Decodes Base64 data, ignoring embedded whitespace and line breaks.
///
/// # Errors
///
/// Returns an error if the input is not valid Base64.
pub fn decode_base64(data: &[u8]) -> Result<Vec<u8>> {
    let cleaned: Vec<u8> = data
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    STANDARD.decode(cleaned).map_err(Into::into)
}

/// Decodes Quoted-Printable data (RFC 2045).
///
/// Invalid escapes are kept literally, matching what mail clients display.
#[must_use]
pub fn decode_quoted_printable(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        let b = data[i];
        if b != b'=' {
            out.push(b);
            i += 1;
            continue;
        }
        match data.get(i + 1..i + 3) {
            Some([b'\r', b'\n']) => i += 3,
            Some([b'\n', _]) => i += 2,
            Some(&[hi, lo]) => match (hex(hi), hex(lo)) {
                (Some(hi), Some(lo)) => {
                    out.push((hi << 4) | lo);
                    i += 3;
                }
                _ => {
                    out.push(b'=');
                    i += 1;
                }
            },
            _ => {
                // "=\n" at the very end, or a dangling "=".
                if data.get(i + 1) != Some(&b'\n') {
                    out.push(b'=');
                }
                i = data.len().min(i + 2);
            }
        }
    }
    out
}

const fn hex(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Decodes one `=?charset?encoding?text?=` word to bytes and its charset.
///
/// # Errors
///
/// Returns [`Error::InvalidEncoding`] for anything that is not an encoded word.
pub fn decode_encoded_word(word: &str) -> Result<(Vec<u8>, String)> {
    let inner = word
        .strip_prefix("=?")
        .and_then(|w| w.strip_suffix("?="))
        .ok_or_else(|| Error::InvalidEncoding(format!("not an encoded word: {word}")))?;
    let mut parts = inner.splitn(3, '?');
    let (Some(charset), Some(encoding), Some(text)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::InvalidEncoding(format!("truncated encoded word: {word}")));
    };
    // RFC 2231 language suffix: "utf-8*en".
    let charset = charset.split('*').next().unwrap_or(charset).to_string();
    let bytes = match encoding {
        "B" | "b" => decode_base64(text.as_bytes())?,
        "Q" | "q" => decode_quoted_printable(text.replace('_', " ").as_bytes()),
        other => {
            return Err(Error::InvalidEncoding(format!("unknown encoding {other:?}")));
        }
    };
    Ok((bytes, charset))
}

/// Decodes every encoded word in a header value and collapses whitespace.
///
/// Whitespace between two adjacent encoded words is dropped. Words that fail
/// to decode are kept as written and reported through `decoder`.
pub fn decode_header_value(value: &str, decoder: &mut Decoder, label: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    let mut last_was_word = false;
    while let Some((start, end)) = next_encoded_word(rest) {
        let before = &rest[..start];
        let word = &rest[start..end];
        match decode_encoded_word(word) {
            Ok((bytes, charset)) => {
                if !(last_was_word && before.trim().is_empty()) {
                    out.push_str(before);
                }
                out.push_str(&decoder.decode(&bytes, Some(&charset), label));
                last_was_word = true;
            }
            Err(e) => {
                decoder.note(format!("{label}: {e}"));
                out.push_str(before);
                out.push_str(word);
                last_was_word = false;
            }
        }
        rest = &rest[end..];
    }
    out.push_str(rest);
    collapse_whitespace(&out)
}

/// Byte range of the next `=?..?..?..?=` in `text`.
fn next_encoded_word(text: &str) -> Option<(usize, usize)> {
    let start = text.find("=?")?;
    let body = start + 2;
    text[body..]
        .match_indices("?=")
        .map(|(i, _)| body + i)
        .find(|&i| text[body..i].matches('?').count() >= 2)
        .map(|i| (start, i + 2))
}

/// Replaces runs of whitespace (including folding) with a single space.
#[must_use]
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
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
    fn test_base64_decode_with_line_breaks() {
        let decoded = decode_base64(b"SGVsbG8s\r\nIFdvcmxkIQ==").unwrap();
        assert_eq!(decoded, b"Hello, World!");
        assert!(decode_base64(b"!!!").is_err());
    }

    #[test]
    fn test_quoted_printable_decode() {
        assert_eq!(decode_quoted_printable(b"Hello, World!"), b"Hello, World!");
        assert_eq!(decode_quoted_printable(b"H=C3=A9llo"), "Héllo".as_bytes());
    }

    #[test]
    fn test_quoted_printable_soft_line_break() {
        assert_eq!(decode_quoted_printable(b"Hello=\r\nWorld"), b"HelloWorld");
        assert_eq!(decode_quoted_printable(b"Hello=\nWorld"), b"HelloWorld");
    }

    #[test]
    fn test_quoted_printable_keeps_bad_escape() {
        assert_eq!(decode_quoted_printable(b"100=% sure="), b"100=% sure=");
    }

    #[test]
    fn test_rfc2047_decode() {
        let mut d = Decoder::new();
        assert_eq!(decode_header_value("Hello", &mut d, "s"), "Hello");
        assert_eq!(
            decode_header_value("=?utf-8?B?SMOpbGxv?=", &mut d, "s"),
            "Héllo"
        );
        assert_eq!(
            decode_header_value("=?utf-8?Q?H=C3=A9llo_there?=", &mut d, "s"),
            "Héllo there"
        );
        assert!(d.errors().is_empty());
    }

    #[test]
    fn test_rfc2047_adjacent_words_join() {
        let mut d = Decoder::new();
        let value = "Re: =?utf-8?Q?caf=C3=A9?=\r\n =?utf-8?Q?_cr=C3=A8me?= again";
        assert_eq!(decode_header_value(value, &mut d, "s"), "Re: café crème again");
    }

    #[test]
    fn test_rfc2047_legacy_charset() {
        let mut d = Decoder::new();
        assert_eq!(
            decode_header_value("=?koi8-r?B?8NLJ?=", &mut d, "s"),
            "При"
        );
    }

    #[test]
    fn test_rfc2047_bad_word_kept() {
        let mut d = Decoder::new();
        assert_eq!(
            decode_header_value("=?utf-8?X?abc?= tail", &mut d, "s"),
            "=?utf-8?X?abc?= tail"
        );
        assert_eq!(d.errors().len(), 1);
    }
}
