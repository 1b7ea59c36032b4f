//! Tolerant charset decoding.
//!
//! Decoding never fails. The chain is:
//!
//! 1. the declared charset (with a couple of real-world aliases),
//! 2. UTF-8 if the bytes are valid,
//! 3. charsets already seen working elsewhere in the same message,
//! 4. windows-1252, recording an error,
//!
//! and a declared charset that fails strict decoding falls back to lossy
//! replacement with that same charset.

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};

/// Labels some mailers emit that `encoding_rs` does not know or maps badly.
const ALIASES: &[(&str, &str)] = &[("gb2312", "gbk"), ("cp-1251", "windows-1251")];

/// Resolves a charset label, applying [`ALIASES`].
#[must_use]
pub fn lookup(label: &str) -> Option<&'static Encoding> {
    let label = label.trim().trim_matches('"').to_ascii_lowercase();
    if label.is_empty() || label == "unknown-8bit" {
        return None;
    }
    let label = ALIASES
        .iter()
        .find(|(from, _)| *from == label)
        .map_or(label.as_str(), |(_, to)| *to);
    Encoding::for_label(label.as_bytes())
}

/// Text decoder that remembers which charsets worked for the current message.
#[derive(Debug, Default)]
pub struct Decoder {
    hints: Vec<&'static Encoding>,
    errors: Vec<String>,
}

impl Decoder {
    /// A decoder with no hints.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the hint list, typically with every charset declared in the message.
    pub fn hint<'a>(&mut self, labels: impl IntoIterator<Item = &'a str>) {
        for encoding in labels.into_iter().filter_map(lookup) {
            if !self.hints.contains(&encoding) {
                self.hints.push(encoding);
            }
        }
    }

    /// Decodes `raw` as text. `label` names the part in recorded errors.
    pub fn decode(&mut self, raw: &[u8], declared: Option<&str>, label: &str) -> String {
        if raw.is_empty() {
            return String::new();
        }
        let declared = declared.and_then(lookup);
        if let Some(encoding) = declared {
            if let Some(text) = encoding.decode_without_bom_handling_and_without_replacement(raw) {
                return text.into_owned();
            }
        }
        if let Ok(text) = std::str::from_utf8(raw) {
            if let Some(encoding) = declared {
                self.error(format!("{label}: not {}, decoded as UTF-8", encoding.name()));
            }
            return text.to_string();
        }
        if let Some(encoding) = declared {
            self.error(format!("{label}: invalid {} bytes replaced", encoding.name()));
            return encoding.decode_without_bom_handling(raw).0.into_owned();
        }
        for encoding in &self.hints {
            if *encoding == UTF_8 {
                continue;
            }
            if let Some(text) = encoding.decode_without_bom_handling_and_without_replacement(raw) {
                return text.into_owned();
            }
        }
        self.error(format!("{label}: unknown charset, decoded as windows-1252"));
        WINDOWS_1252.decode_without_bom_handling(raw).0.into_owned()
    }

    fn error(&mut self, message: String) {
        tracing::debug!(%message, "charset fallback");
        self.errors.push(message);
    }

    /// Records a decoding problem found outside the charset chain.
    pub fn note(&mut self, message: String) {
        self.error(message);
    }

    /// Problems met so far.
    #[must_use]
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Takes the recorded problems.
    pub fn into_errors(self) -> Vec<String> {
        self.errors
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

    #[test]
    fn aliases_resolve() {
        assert_eq!(lookup("GB2312").unwrap().name(), "GBK");
        assert_eq!(lookup("cp-1251").unwrap().name(), "windows-1251");
        assert!(lookup("unknown-8bit").is_none());
        assert!(lookup("x-no-such-charset").is_none());
    }

    #[test]
    fn declared_charset_wins() {
        let mut d = Decoder::new();
        let text = d.decode(&[0xcf, 0xf0, 0xe8], Some("windows-1251"), "body");
        assert_eq!(text, "При");
        assert!(d.errors().is_empty());
    }

    #[test]
    fn undeclared_utf8_is_accepted() {
        let mut d = Decoder::new();
        assert_eq!(d.decode("héllo".as_bytes(), None, "body"), "héllo");
        assert!(d.errors().is_empty());
    }

    #[test]
    fn undeclared_garbage_falls_back_to_1252() {
        let mut d = Decoder::new();
        let text = d.decode(&[b'c', b'a', b'f', 0xe9], None, "subject");
        assert_eq!(text, "café");
        assert_eq!(d.errors().len(), 1);
        assert!(d.errors()[0].starts_with("subject"));
    }

    #[test]
    fn hints_are_tried_before_guessing() {
        let mut d = Decoder::new();
        d.hint(["koi8-r"]);
        let text = d.decode(&[0xf0, 0xd2, 0xc9], None, "subject");
        assert_eq!(text, "При");
        assert!(d.errors().is_empty());
    }

    #[test]
    fn broken_declared_charset_is_lossy() {
        let mut d = Decoder::new();
        let text = d.decode(&[b'a', 0xff, b'b'], Some("utf-8"), "body");
        assert_eq!(text, "a\u{fffd}b");
        assert_eq!(d.errors().len(), 1);
    }
}
