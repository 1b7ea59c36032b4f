//! Header block handling.

use std::fmt;

use crate::charset::Decoder;

/// Header fields in the order they appear, names matched case-insensitively.
///
/// Values are unfolded but otherwise raw: encoded words are left for
/// [`decode_header_value`](crate::encoding::decode_header_value).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

impl Headers {
    /// Creates a new empty header collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a field.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// Replaces every field called `name` with one value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.fields.push((name, value.into()));
    }

    /// Gets the first value for a header.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Gets all values for a header.
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Removes all values for a header.
    pub fn remove(&mut self, name: &str) {
        self.fields.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// Returns an iterator over all fields in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when there are no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Parses the header block at the start of `raw`.
    ///
    /// Parsing stops at the first empty line. Lines without a colon are
    /// skipped; 8-bit values go through `decoder`.
    pub fn parse(raw: &[u8], decoder: &mut Decoder) -> Self {
        let (block, _) = split_message(raw);
        let mut headers = Self::new();
        let mut current: Option<(String, Vec<u8>)> = None;
        for line in block.split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.starts_with(b" ") || line.starts_with(b"\t") {
                if let Some((_, value)) = current.as_mut() {
                    value.push(b' ');
                    value.extend_from_slice(line.trim_ascii());
                }
                continue;
            }
            if let Some((name, value)) = current.take() {
                headers.push_raw(name, &value, decoder);
            }
            let Some(colon) = line.iter().position(|&b| b == b':') else {
                continue;
            };
            let name = String::from_utf8_lossy(line[..colon].trim_ascii()).into_owned();
            if name.is_empty() {
                continue;
            }
            current = Some((name, line[colon + 1..].trim_ascii().to_vec()));
        }
        if let Some((name, value)) = current {
            headers.push_raw(name, &value, decoder);
        }
        headers
    }

    fn push_raw(&mut self, name: String, value: &[u8], decoder: &mut Decoder) {
        let value = if value.is_ascii() {
            String::from_utf8_lossy(value).into_owned()
        } else {
            decoder.decode(value, None, &name)
        };
        self.fields.push((name, value));
    }
}

/// Splits a message into its header block and body at the first empty line.
///
/// A message with no empty line is all header.
#[must_use]
pub fn split_message(raw: &[u8]) -> (&[u8], &[u8]) {
    let mut start = 0;
    while start <= raw.len() {
        let end = raw[start..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(raw.len(), |i| start + i);
        let line = &raw[start..end];
        if line.is_empty() || line == b"\r" {
            let body = (end + 1).min(raw.len());
            return (&raw[..start], &raw[body..]);
        }
        start = end + 1;
    }
    (raw, &[])
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.fields {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
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

    fn parse(raw: &[u8]) -> Headers {
        Headers::parse(raw, &mut Decoder::new())
    }

    #[test]
    fn test_headers_add_get() {
        let mut headers = Headers::new();
        headers.add("Content-Type", "text/plain");
        assert_eq!(headers.get("Content-Type"), Some("text/plain"));
        assert_eq!(headers.get("content-type"), Some("text/plain"));
    }

    #[test]
    fn test_headers_set() {
        let mut headers = Headers::new();
        headers.add("To", "alice@example.com");
        headers.add("to", "bob@example.com");
        assert_eq!(headers.get_all("To").len(), 2);

        headers.set("To", "charlie@example.com");
        assert_eq!(headers.get_all("To"), vec!["charlie@example.com"]);
    }

    #[test]
    fn test_headers_parse() {
        let raw = concat!(
            "From: sender@example.com\r\n",
            "To: recipient@example.com\r\n",
            "Subject: Test Message\r\n",
            "Content-Type: text/plain;\r\n",
            "\tcharset=utf-8\r\n",
            "\r\n",
            "Body: not a header\r\n"
        );

        let headers = parse(raw.as_bytes());
        assert_eq!(headers.len(), 4);
        assert_eq!(headers.get("From"), Some("sender@example.com"));
        assert_eq!(headers.get("Subject"), Some("Test Message"));
        assert_eq!(
            headers.get("Content-Type"),
            Some("text/plain; charset=utf-8")
        );
        assert!(headers.get("Body").is_none());
    }

    #[test]
    fn test_headers_parse_bare_lf_and_junk_lines() {
        let headers = parse(b"X-A: 1\nnot a header\nX-B: 2\n\nbody");
        assert_eq!(headers.get("x-a"), Some("1"));
        assert_eq!(headers.get("x-b"), Some("2"));
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn test_headers_parse_8bit_value() {
        let mut decoder = Decoder::new();
        let headers = Headers::parse(b"Subject: caf\xe9\r\n\r\n", &mut decoder);
        assert_eq!(headers.get("subject"), Some("café"));
        assert_eq!(decoder.errors().len(), 1);
    }

    #[test]
    fn test_split_message() {
        let (head, body) = split_message(b"A: 1\r\nB: 2\r\n\r\nhello\r\n");
        assert_eq!(head, b"A: 1\r\nB: 2\r\n");
        assert_eq!(body, b"hello\r\n");

        let (head, body) = split_message(b"A: 1\r\n");
        assert_eq!(head, b"A: 1\r\n");
        assert!(body.is_empty());
    }

    #[test]
    fn test_headers_display_keeps_order() {
        let mut headers = Headers::new();
        headers.add("Subject", "hi");
        headers.add("From", "a@b");
        assert_eq!(headers.to_string(), "Subject: hi\r\nFrom: a@b\r\n");
    }
}
