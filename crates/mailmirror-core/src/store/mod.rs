//! Local message store.
//!
//! One store is one local mailbox. Messages are append-only: the raw bytes of a
//! stored message never change, only its flag set does. Placeholders and
//! superseded link messages are removed with [`MessageStore::expunge`].
//! Small key/value metadata (checkpoints, tag map, flag queue) lives beside the
//! messages.

mod memory;
mod sqlite;

use std::collections::BTreeSet;
use std::future::Future;

use chrono::{DateTime, Utc};
use mailmirror_imap::StoreOp;
use mailmirror_mime::charset::Decoder;
use mailmirror_mime::{Headers, split_message};
use serde::{Deserialize, Serialize};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::Result;

/// Local message identifier, assigned once and never reused.
pub type LocalId = u64;

/// Which part of a message [`MessageStore::fetch`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Part {
    /// Flags and arrival time only; `raw` is empty.
    Flags,
    /// The header block, synthetic fields included.
    Header,
    /// The whole stored message.
    Full,
}

/// A stored message as returned by [`MessageStore::fetch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    /// Local id.
    pub id: LocalId,
    /// Current flags.
    pub flags: BTreeSet<String>,
    /// Arrival time (the remote INTERNALDATE).
    pub arrived: DateTime<Utc>,
    /// Bytes selected by the requested [`Part`].
    pub raw: Vec<u8>,
}

impl StoredMessage {
    /// Returns true if the flag is set.
    #[must_use]
    pub fn has(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    /// Parses the header block of `raw`.
    #[must_use]
    pub fn headers(&self) -> Headers {
        let (header, _) = split_message(&self.raw);
        Headers::parse(header, &mut Decoder::new())
    }
}

/// How a flag change applies to the current set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagOp {
    /// Add the flags.
    Add,
    /// Remove the flags.
    Remove,
    /// Replace the whole set.
    Replace,
}

impl From<FlagOp> for StoreOp {
    fn from(op: FlagOp) -> Self {
        match op {
            FlagOp::Add => Self::Add,
            FlagOp::Remove => Self::Remove,
            FlagOp::Replace => Self::Replace,
        }
    }
}

/// A flag change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagDelta {
    /// Operation.
    pub op: FlagOp,
    /// Flags it applies to.
    pub flags: Vec<String>,
}

impl FlagDelta {
    /// Adds `flags`.
    #[must_use]
    pub fn add<I: IntoIterator<Item = S>, S: Into<String>>(flags: I) -> Self {
        Self::new(FlagOp::Add, flags)
    }

    /// Removes `flags`.
    #[must_use]
    pub fn remove<I: IntoIterator<Item = S>, S: Into<String>>(flags: I) -> Self {
        Self::new(FlagOp::Remove, flags)
    }

    /// Replaces the set with `flags`.
    #[must_use]
    pub fn replace<I: IntoIterator<Item = S>, S: Into<String>>(flags: I) -> Self {
        Self::new(FlagOp::Replace, flags)
    }

    fn new<I: IntoIterator<Item = S>, S: Into<String>>(op: FlagOp, flags: I) -> Self {
        Self {
            op,
            flags: flags.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the flag set after applying the change to `current`.
    #[must_use]
    pub fn apply(&self, current: &BTreeSet<String>) -> BTreeSet<String> {
        match self.op {
            FlagOp::Add => current.iter().chain(&self.flags).cloned().collect(),
            FlagOp::Remove => current
                .iter()
                .filter(|f| !self.flags.contains(f))
                .cloned()
                .collect(),
            FlagOp::Replace => self.flags.iter().cloned().collect(),
        }
    }
}

/// Search criteria for [`MessageStore::search`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Every message.
    All,
    /// Messages with one of these ids.
    Ids(Vec<LocalId>),
    /// Messages carrying the flag.
    Flag(String),
    /// Messages without the flag.
    NotFlag(String),
    /// Messages whose header contains `value`, case-insensitively.
    Header(String, String),
    /// All sub-queries match.
    And(Vec<Self>),
}

impl Query {
    /// Flag query.
    #[must_use]
    pub fn flag(flag: impl Into<String>) -> Self {
        Self::Flag(flag.into())
    }

    /// Header query.
    #[must_use]
    pub fn header(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Header(name.into(), value.into())
    }

    /// Returns true if any part looks at headers.
    #[must_use]
    pub fn needs_headers(&self) -> bool {
        match self {
            Self::Header(..) => true,
            Self::And(all) => all.iter().any(Self::needs_headers),
            _ => false,
        }
    }

    /// Evaluates the query against one message. `headers` is only consulted
    /// when [`needs_headers`](Self::needs_headers) is true.
    #[must_use]
    pub fn matches(&self, id: LocalId, flags: &BTreeSet<String>, headers: &Headers) -> bool {
        match self {
            Self::All => true,
            Self::Ids(ids) => ids.contains(&id),
            Self::Flag(flag) => flags.contains(flag),
            Self::NotFlag(flag) => !flags.contains(flag),
            Self::Header(name, value) => {
                let needle = value.to_lowercase();
                headers
                    .get_all(name)
                    .iter()
                    .any(|v| v.to_lowercase().contains(&needle))
            }
            Self::And(all) => all.iter().all(|q| q.matches(id, flags, headers)),
        }
    }
}

/// Primitives the sync engine needs from local storage.
///
/// Implementations serialize their own writes; callers may share one store
/// between tasks.
pub trait MessageStore: Send + Sync + 'static {
    /// Stores a new message and returns its id.
    fn append(
        &self,
        flags: &BTreeSet<String>,
        arrived: DateTime<Utc>,
        raw: &[u8],
    ) -> impl Future<Output = Result<LocalId>> + Send;

    /// Ids matching `query`, ascending.
    fn search(&self, query: &Query) -> impl Future<Output = Result<Vec<LocalId>>> + Send;

    /// Messages for `ids`, ascending by id. Unknown ids are left out.
    fn fetch(
        &self,
        ids: &[LocalId],
        part: Part,
    ) -> impl Future<Output = Result<Vec<StoredMessage>>> + Send;

    /// Applies a flag change to `ids`.
    fn store(&self, ids: &[LocalId], delta: &FlagDelta) -> impl Future<Output = Result<()>> + Send;

    /// Removes messages for good.
    fn expunge(&self, ids: &[LocalId]) -> impl Future<Output = Result<()>> + Send;

    /// Reads a metadata value.
    fn get_metadata(&self, key: &str) -> impl Future<Output = Result<Option<String>>> + Send;

    /// Writes a metadata value.
    fn set_metadata(&self, key: &str, value: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Cuts `raw` down to what `part` asks for.
pub(crate) fn select_part(raw: &[u8], part: Part) -> Vec<u8> {
    match part {
        Part::Flags => Vec::new(),
        Part::Header => split_message(raw).0.to_vec(),
        Part::Full => raw.to_vec(),
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

    fn set(flags: &[&str]) -> BTreeSet<String> {
        flags.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn delta_apply() {
        let current = set(&["\\Seen", "#inbox"]);
        assert_eq!(
            FlagDelta::add(["\\Flagged"]).apply(&current),
            set(&["\\Seen", "#inbox", "\\Flagged"])
        );
        assert_eq!(FlagDelta::remove(["#inbox"]).apply(&current), set(&["\\Seen"]));
        assert_eq!(FlagDelta::replace(["#spam"]).apply(&current), set(&["#spam"]));
    }

    #[test]
    fn query_matches_flags_and_headers() {
        let mut headers = Headers::new();
        headers.add("Message-Id", "<101@mlr>");
        let flags = set(&["#latest"]);
        let q = Query::And(vec![
            Query::flag("#latest"),
            Query::header("message-id", "101@MLR"),
        ]);
        assert!(q.needs_headers());
        assert!(q.matches(7, &flags, &headers));
        assert!(!Query::NotFlag("#latest".into()).matches(7, &flags, &headers));
        assert!(Query::Ids(vec![7]).matches(7, &flags, &Headers::new()));
    }
}
