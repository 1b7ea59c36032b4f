//! Content-Type and Content-Disposition values.

use std::collections::HashMap;
use std::fmt;

/// MIME content type with parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// Main type (e.g., "text", "image", "multipart").
    pub main_type: String,
    /// Subtype (e.g., "plain", "html", "jpeg").
    pub sub_type: String,
    /// Parameters (e.g., charset=utf-8, boundary=xxx), names lowercased.
    pub parameters: HashMap<String, String>,
}

impl Default for ContentType {
    fn default() -> Self {
        Self::text_plain()
    }
}

impl ContentType {
    /// Creates a new content type.
    #[must_use]
    pub fn new(main_type: impl Into<String>, sub_type: impl Into<String>) -> Self {
        Self {
            main_type: main_type.into(),
            sub_type: sub_type.into(),
            parameters: HashMap::new(),
        }
    }

    /// `text/plain`, the RFC 2045 default.
    #[must_use]
    pub fn text_plain() -> Self {
        Self::new("text", "plain")
    }

    /// `type/subtype`
    #[must_use]
    pub fn mime_type(&self) -> String {
        format!("{}/{}", self.main_type, self.sub_type)
    }

    /// Returns the charset parameter if present.
    #[must_use]
    pub fn charset(&self) -> Option<&str> {
        self.parameters.get("charset").map(String::as_str)
    }

    /// Returns the boundary parameter if present.
    #[must_use]
    pub fn boundary(&self) -> Option<&str> {
        self.parameters.get("boundary").map(String::as_str)
    }

    /// Returns the legacy `name` parameter if present.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.parameters.get("name").map(String::as_str)
    }

    /// Checks if this is a multipart content type.
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        self.main_type == "multipart"
    }

    /// Checks if this is a text content type.
    #[must_use]
    pub fn is_text(&self) -> bool {
        self.main_type == "text"
    }

    /// Checks if this is an embedded message (`message/*`).
    #[must_use]
    pub fn is_message(&self) -> bool {
        self.main_type == "message"
    }

    /// Parses a content type string.
    ///
    /// Format: `type/subtype; param1=value1; param2="value 2"`. Anything
    /// without a `/` falls back to `text/plain`, keeping its parameters.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        let mut parts = split_params(s).into_iter();
        let type_str = parts.next().unwrap_or_default();
        let mut content_type = match type_str.split_once('/') {
            Some((main, sub)) if !main.trim().is_empty() && !sub.trim().is_empty() => Self::new(
                main.trim().to_ascii_lowercase(),
                sub.trim().to_ascii_lowercase(),
            ),
            _ => Self::text_plain(),
        };
        content_type.parameters = parse_params(parts);
        content_type
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.main_type, self.sub_type)?;
        let mut params: Vec<_> = self.parameters.iter().collect();
        params.sort();
        for (key, value) in params {
            if value.contains(|c: char| c.is_whitespace() || "()<>@,;:\\\"/[]?=".contains(c)) {
                write!(f, "; {key}=\"{value}\"")?;
            } else {
                write!(f, "; {key}={value}")?;
            }
        }
        Ok(())
    }
}

/// Content-Disposition: `attachment` / `inline` plus parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Disposition {
    /// Lowercased disposition type.
    pub kind: String,
    /// Parameters, names lowercased.
    pub parameters: HashMap<String, String>,
}

impl Disposition {
    /// Parses a Content-Disposition value.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        let mut parts = split_params(s).into_iter();
        let kind = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
        Self {
            kind,
            parameters: parse_params(parts),
        }
    }

    /// True for `attachment`.
    #[must_use]
    pub fn is_attachment(&self) -> bool {
        self.kind == "attachment"
    }

    /// Returns the filename parameter if present.
    #[must_use]
    pub fn filename(&self) -> Option<&str> {
        self.parameters.get("filename").map(String::as_str)
    }
}

/// Splits on `;` outside double quotes.
fn split_params(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut escaped = false;
    for c in s.chars() {
        match c {
            _ if escaped => {
                current.push(c);
                escaped = false;
            }
            '\\' if quoted => {
                current.push(c);
                escaped = true;
            }
            '"' => {
                current.push(c);
                quoted = !quoted;
            }
            ';' if !quoted => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
}

fn parse_params(parts: impl Iterator<Item = String>) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for param in parts {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = unquote(value.trim());
        match key.strip_suffix('*') {
            // RFC 2231: charset'language'percent-encoded
            Some(base) => {
                params.insert(base.to_string(), decode_extended(&value));
            }
            None => {
                params.entry(key).or_insert(value);
            }
        }
    }
    params
}

fn unquote(value: &str) -> String {
    let Some(inner) = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) else {
        return value.to_string();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn decode_extended(value: &str) -> String {
    let mut pieces = value.splitn(3, '\'');
    let (Some(charset), Some(_lang), Some(encoded)) = (pieces.next(), pieces.next(), pieces.next())
    else {
        return value.to_string();
    };
    let mut bytes = Vec::with_capacity(encoded.len());
    let raw = encoded.as_bytes();
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'%' {
            if let Some(b) = raw
                .get(i + 1..i + 3)
                .and_then(|h| std::str::from_utf8(h).ok())
                .and_then(|h| u8::from_str_radix(h, 16).ok())
            {
                bytes.push(b);
                i += 3;
                continue;
            }
        }
        bytes.push(raw[i]);
        i += 1;
    }
    crate::charset::Decoder::new().decode(&bytes, Some(charset), "parameter")
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
    fn test_content_type_parse() {
        let ct = ContentType::parse("Text/Plain; Charset=utf-8");
        assert_eq!(ct.mime_type(), "text/plain");
        assert_eq!(ct.charset(), Some("utf-8"));
        assert!(ct.is_text());
    }

    #[test]
    fn test_content_type_parse_quoted() {
        let ct = ContentType::parse("multipart/mixed; boundary=\"----=_Part_1;23\"");
        assert!(ct.is_multipart());
        assert_eq!(ct.boundary(), Some("----=_Part_1;23"));
    }

    #[test]
    fn test_content_type_garbage_defaults() {
        let ct = ContentType::parse("garbage; charset=koi8-r");
        assert_eq!(ct.mime_type(), "text/plain");
        assert_eq!(ct.charset(), Some("koi8-r"));
        assert_eq!(ContentType::parse("").mime_type(), "text/plain");
    }

    #[test]
    fn test_content_type_display() {
        let ct = ContentType::parse("text/plain; charset=utf-8; format=flowed");
        assert_eq!(ct.to_string(), "text/plain; charset=utf-8; format=flowed");
    }

    #[test]
    fn test_disposition_filename() {
        let d = Disposition::parse("attachment; filename=\"report q1.pdf\"");
        assert!(d.is_attachment());
        assert_eq!(d.filename(), Some("report q1.pdf"));
    }

    #[test]
    fn test_disposition_extended_filename() {
        let d = Disposition::parse("attachment; filename*=utf-8''na%C3%AFve.txt");
        assert_eq!(d.filename(), Some("naïve.txt"));
    }
}
