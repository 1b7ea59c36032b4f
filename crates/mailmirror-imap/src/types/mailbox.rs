//! Mailbox names, LIST data and SELECT status.

use super::{Flags, Uid, UidValidity};

/// Mailbox name as sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Mailbox(pub String);

impl Mailbox {
    /// Creates a mailbox name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The INBOX.
    #[must_use]
    pub fn inbox() -> Self {
        Self("INBOX".to_string())
    }

    /// Returns the name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// State of a mailbox after SELECT or EXAMINE.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailboxStatus {
    /// Number of messages.
    pub exists: u32,
    /// Number of recent messages.
    pub recent: u32,
    /// Next UID the server will assign.
    pub uid_next: Option<Uid>,
    /// Current UIDVALIDITY epoch.
    pub uid_validity: Option<UidValidity>,
    /// Flags defined in the mailbox.
    pub flags: Flags,
    /// True when opened read-only.
    pub read_only: bool,
    /// HIGHESTMODSEQ when CONDSTORE is active.
    pub highest_mod_seq: Option<u64>,
}

impl MailboxStatus {
    /// UIDNEXT as a plain number, 1 when the server omitted it.
    #[must_use]
    pub fn uid_next_or_default(&self) -> u32 {
        self.uid_next.map_or(1, Uid::get)
    }
}

/// One LIST response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListResponse {
    /// Mailbox attributes.
    pub attributes: Vec<MailboxAttribute>,
    /// Hierarchy delimiter.
    pub delimiter: Option<char>,
    /// Mailbox name.
    pub mailbox: Mailbox,
}

impl ListResponse {
    /// Returns true if the mailbox carries the attribute.
    #[must_use]
    pub fn has(&self, attr: &MailboxAttribute) -> bool {
        self.attributes.contains(attr)
    }

    /// Returns true if the mailbox can be selected.
    #[must_use]
    pub fn is_selectable(&self) -> bool {
        !self.has(&MailboxAttribute::NoSelect)
    }
}

/// Mailbox attribute, including SPECIAL-USE markers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MailboxAttribute {
    /// `\Noselect`
    NoSelect,
    /// `\HasChildren`
    HasChildren,
    /// `\HasNoChildren`
    HasNoChildren,
    /// `\All`
    All,
    /// `\Archive`
    Archive,
    /// `\Drafts`
    Drafts,
    /// `\Flagged`
    Flagged,
    /// `\Junk` (also Gmail's `\Spam`)
    Junk,
    /// `\Sent`
    Sent,
    /// `\Trash`
    Trash,
    /// `\Important`
    Important,
    /// Anything else.
    Other(String),
}

impl MailboxAttribute {
    /// Parses an attribute.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "\\NOSELECT" | "\\NONEXISTENT" => Self::NoSelect,
            "\\HASCHILDREN" => Self::HasChildren,
            "\\HASNOCHILDREN" => Self::HasNoChildren,
            "\\ALL" => Self::All,
            "\\ARCHIVE" => Self::Archive,
            "\\DRAFTS" => Self::Drafts,
            "\\FLAGGED" => Self::Flagged,
            "\\JUNK" | "\\SPAM" => Self::Junk,
            "\\SENT" => Self::Sent,
            "\\TRASH" => Self::Trash,
            "\\IMPORTANT" => Self::Important,
            _ => Self::Other(s.to_string()),
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

    #[test]
    fn special_use_attributes() {
        assert_eq!(MailboxAttribute::parse("\\All"), MailboxAttribute::All);
        assert_eq!(MailboxAttribute::parse("\\Spam"), MailboxAttribute::Junk);
        assert_eq!(MailboxAttribute::parse("\\junk"), MailboxAttribute::Junk);
        assert_eq!(
            MailboxAttribute::parse("\\Starred"),
            MailboxAttribute::Other("\\Starred".to_string())
        );
    }

    #[test]
    fn selectable() {
        let list = ListResponse {
            attributes: vec![MailboxAttribute::NoSelect, MailboxAttribute::HasChildren],
            delimiter: Some('/'),
            mailbox: Mailbox::new("[Gmail]"),
        };
        assert!(!list.is_selectable());
        assert!(list.has(&MailboxAttribute::HasChildren));
    }

    #[test]
    fn uid_next_defaults_to_one() {
        let status = MailboxStatus::default();
        assert_eq!(status.uid_next_or_default(), 1);
        let status = MailboxStatus {
            uid_next: Uid::new(42),
            ..MailboxStatus::default()
        };
        assert_eq!(status.uid_next_or_default(), 42);
    }
}
