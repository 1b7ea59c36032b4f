//! Local tags and their mapping to remote flags and Gmail labels.
//!
//! Local flags are a flat set of strings: IMAP system flags (`\Seen`), tags
//! derived from remote labels (`#inbox`, `Work`) and local-only markers
//! (`#latest`, `#dup`, ...) the remote side never sees.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use mailmirror_imap::{Flag, Flags};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::Result;
use crate::store::MessageStore;

/// Newest member of a thread.
pub const LATEST: &str = "#latest";
/// Thread-linking message.
pub const LINK: &str = "#link";
/// Message whose Message-Id is already taken by another message.
pub const DUP: &str = "#dup";
/// Header-only placeholder waiting for its body.
pub const PARTIAL: &str = "#partial";
/// Message decoded with errors.
pub const ERR: &str = "#err";

/// Gmail inbox.
pub const INBOX: &str = "#inbox";
/// Spam.
pub const SPAM: &str = "#spam";
/// Trash.
pub const TRASH: &str = "#trash";
/// Sent.
pub const SENT: &str = "#sent";
/// Gmail chats.
pub const CHATS: &str = "#chats";

/// Flags remote state never overwrites.
pub const LOCAL_ONLY: [&str; 5] = [LATEST, LINK, DUP, PARTIAL, ERR];

/// Flags kept in step with the server by CONDSTORE sync.
pub const MANAGED: [&str; 6] = [INBOX, SPAM, TRASH, "\\Flagged", "\\Seen", "\\Answered"];

/// Tags that come from folder membership rather than per-message state.
pub const FOLDER_TAGS: [&str; 4] = [INBOX, SENT, SPAM, TRASH];

/// Label prefix that pins a message to a thread.
pub const THREAD_LABEL_PREFIX: &str = "mailmirror/thrid/";

const TAGS_KEY: &str = "tags";

static PLAIN_TAG: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)^[\\]?[a-z0-9/#\-.,:;!?]*$").ok());

/// Returns true for flags the remote side does not own.
#[must_use]
pub fn is_local_only(flag: &str) -> bool {
    LOCAL_ONLY.contains(&flag)
}

/// Fixed mapping for Gmail system labels. `Some(None)` means the label is
/// dropped.
fn system_label(label: &str) -> Option<Option<&'static str>> {
    let mapped = match label.to_ascii_lowercase().as_str() {
        "\\inbox" => Some(INBOX),
        "\\junk" | "\\spam" => Some(SPAM),
        "\\trash" => Some(TRASH),
        "\\sent" => Some(SENT),
        "\\chats" => Some(CHATS),
        "\\drafts" | "\\draft" => Some("\\Draft"),
        "\\starred" | "\\flagged" => Some("\\Flagged"),
        "\\important" => None,
        _ => return None,
    };
    Some(mapped)
}

/// Tag for a label that is not a system label.
fn plain_tag(label: &str) -> String {
    if PLAIN_TAG.as_ref().is_some_and(|re| re.is_match(label)) {
        label.to_string()
    } else {
        let digest = format!("{:x}", Sha256::digest(label.to_lowercase().as_bytes()));
        format!("#{}", &digest[..8])
    }
}

/// Thread id carried by a `mailmirror/thrid/N` label.
#[must_use]
pub fn thread_label(label: &str) -> Option<String> {
    let id = label.strip_prefix(THREAD_LABEL_PREFIX)?;
    (!id.is_empty()).then(|| format!("<{id}@mailmirror.link>"))
}

/// Persistent label ↔ tag map, saved in the `tags` metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagMap {
    labels: BTreeMap<String, String>,
    #[serde(skip)]
    dirty: bool,
}

impl TagMap {
    /// Loads the map from `store`.
    ///
    /// # Errors
    ///
    /// Store or JSON errors.
    pub async fn load<S: MessageStore>(store: &S) -> Result<Self> {
        match store.get_metadata(TAGS_KEY).await? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Self::default()),
        }
    }

    /// Writes the map back if it changed.
    ///
    /// # Errors
    ///
    /// Store or JSON errors.
    pub async fn save<S: MessageStore>(&mut self, store: &S) -> Result<()> {
        if self.dirty {
            store
                .set_metadata(TAGS_KEY, &serde_json::to_string(self)?)
                .await?;
            self.dirty = false;
        }
        Ok(())
    }

    /// Local tag for a remote label, remembering new custom labels. `None`
    /// for dropped labels and thread pins.
    pub fn tag(&mut self, label: &str) -> Option<String> {
        if label.starts_with(THREAD_LABEL_PREFIX) {
            return None;
        }
        if let Some(mapped) = system_label(label) {
            return mapped.map(ToString::to_string);
        }
        let tag = plain_tag(label);
        if self.labels.get(label) != Some(&tag) {
            self.labels.insert(label.to_string(), tag.clone());
            self.dirty = true;
        }
        Some(tag)
    }

    /// Remote label for a local tag, used when pushing changes to Gmail.
    #[must_use]
    pub fn label(&self, tag: &str) -> Option<String> {
        let system = match tag {
            INBOX => Some("\\Inbox"),
            SPAM => Some("\\Spam"),
            TRASH => Some("\\Trash"),
            SENT => Some("\\Sent"),
            CHATS => Some("\\Chats"),
            _ => None,
        };
        if let Some(label) = system {
            return Some(label.to_string());
        }
        self.labels
            .iter()
            .find(|(_, t)| t.as_str() == tag)
            .map(|(label, _)| label.clone())
    }
}

/// Local flag set for a fetched row: its IMAP flags, its Gmail labels as tags
/// and the tag of the folder it was found in.
#[must_use]
pub fn remote_tags(
    flags: &Flags,
    labels: &[String],
    folder_tag: Option<&str>,
    tags: &mut TagMap,
) -> BTreeSet<String> {
    let mut out: BTreeSet<String> = flags
        .iter()
        .filter(|f| **f != Flag::Recent)
        .map(|f| f.as_str().to_string())
        .collect();
    out.extend(labels.iter().filter_map(|l| tags.tag(l)));
    out.extend(folder_tag.map(ToString::to_string));
    out
}

/// Merges remote state into local flags. Local-only flags always survive.
/// With `managed`, only flags in that set are taken from the remote side and
/// everything else stays; without it every other flag comes from `remote`.
#[must_use]
pub fn reconcile(
    local: &BTreeSet<String>,
    remote: &BTreeSet<String>,
    managed: Option<&[&str]>,
) -> BTreeSet<String> {
    let owned_by_remote = |f: &str| !is_local_only(f) && managed.is_none_or(|m| m.contains(&f));
    local
        .iter()
        .filter(|f| !owned_by_remote(f.as_str()))
        .chain(remote.iter().filter(|f| owned_by_remote(f.as_str())))
        .cloned()
        .collect()
}

/// Splits local tags into IMAP flags and Gmail labels for a remote STORE.
/// Local-only markers are dropped.
#[must_use]
pub fn split_for_remote(tags: &[String], map: &TagMap, gmail: bool) -> (Vec<Flag>, Vec<String>) {
    let mut flags = Vec::new();
    let mut labels = Vec::new();
    for tag in tags.iter().filter(|t| !is_local_only(t)) {
        if tag.starts_with('\\') {
            flags.push(Flag::parse(tag));
        } else if gmail {
            labels.extend(map.label(tag));
        } else if !tag.starts_with('#') {
            flags.push(Flag::Keyword(tag.clone()));
        }
    }
    (flags, labels)
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
    use crate::store::MemoryStore;

    fn set(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn system_labels() {
        let mut map = TagMap::default();
        assert_eq!(map.tag("\\Inbox").as_deref(), Some("#inbox"));
        assert_eq!(map.tag("\\Spam").as_deref(), Some("#spam"));
        assert_eq!(map.tag("\\Starred").as_deref(), Some("\\Flagged"));
        assert_eq!(map.tag("\\Drafts").as_deref(), Some("\\Draft"));
        assert_eq!(map.tag("\\Important"), None);
        assert_eq!(map.tag("mailmirror/thrid/42"), None);
        assert!(!map.dirty);
    }

    #[test]
    fn custom_labels() {
        let mut map = TagMap::default();
        assert_eq!(map.tag("Work/2024").as_deref(), Some("Work/2024"));
        let odd = map.tag("Привет мир").unwrap();
        assert!(odd.starts_with('#'));
        assert_eq!(odd.len(), 9);
        assert_eq!(map.tag("привет мир").unwrap(), odd);
        assert!(map.dirty);
        assert_eq!(map.label(&odd).as_deref(), Some("Привет мир"));
        assert_eq!(map.label("#trash").as_deref(), Some("\\Trash"));
    }

    #[tokio::test]
    async fn tag_map_persists() {
        let store = MemoryStore::new();
        let mut map = TagMap::default();
        map.tag("Receipts");
        map.save(&store).await.unwrap();
        let loaded = TagMap::load(&store).await.unwrap();
        assert_eq!(loaded.label("Receipts").as_deref(), Some("Receipts"));
    }

    #[test]
    fn thread_labels() {
        assert_eq!(
            thread_label("mailmirror/thrid/7").as_deref(),
            Some("<7@mailmirror.link>")
        );
        assert_eq!(thread_label("Work"), None);
    }

    #[test]
    fn reconcile_keeps_local_only_flags() {
        let local = set(&["#latest", "\\Seen", "Work"]);
        let remote = set(&["\\Flagged", "#inbox"]);
        assert_eq!(
            reconcile(&local, &remote, None),
            set(&["#latest", "\\Flagged", "#inbox"])
        );
        assert_eq!(
            reconcile(&local, &remote, Some(&MANAGED[..])),
            set(&["#latest", "Work", "\\Flagged", "#inbox"])
        );
    }

    #[test]
    fn remote_store_split() {
        let mut map = TagMap::default();
        map.tag("Work");
        let tags: Vec<String> = ["\\Seen", "#inbox", "#latest", "Work"]
            .iter()
            .map(ToString::to_string)
            .collect();
        let (flags, labels) = split_for_remote(&tags, &map, true);
        assert_eq!(flags, vec![Flag::Seen]);
        assert_eq!(labels, vec!["\\Inbox".to_string(), "Work".to_string()]);
        let (flags, labels) = split_for_remote(&tags, &map, false);
        assert_eq!(flags, vec![Flag::Seen, Flag::Keyword("Work".into())]);
        assert!(labels.is_empty());
    }
}
