//! In-memory store for tests and dry runs.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use mailmirror_mime::Headers;
use tokio::sync::Mutex;

use super::{FlagDelta, LocalId, MessageStore, Part, Query, StoredMessage, select_part};
use crate::Result;

#[derive(Debug, Default)]
struct Inner {
    next_id: LocalId,
    messages: BTreeMap<LocalId, StoredMessage>,
    metadata: HashMap<String, String>,
}

/// [`MessageStore`] kept in a map. Ids start at 1.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored messages.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.messages.len()
    }

    /// Returns true if nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl MessageStore for MemoryStore {
    async fn append(
        &self,
        flags: &BTreeSet<String>,
        arrived: DateTime<Utc>,
        raw: &[u8],
    ) -> Result<LocalId> {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let id = inner.next_id;
        inner.messages.insert(
            id,
            StoredMessage {
                id,
                flags: flags.clone(),
                arrived,
                raw: raw.to_vec(),
            },
        );
        Ok(id)
    }

    async fn search(&self, query: &Query) -> Result<Vec<LocalId>> {
        let inner = self.inner.lock().await;
        let needs_headers = query.needs_headers();
        Ok(inner
            .messages
            .values()
            .filter(|m| {
                let headers = if needs_headers {
                    m.headers()
                } else {
                    Headers::new()
                };
                query.matches(m.id, &m.flags, &headers)
            })
            .map(|m| m.id)
            .collect())
    }

    async fn fetch(&self, ids: &[LocalId], part: Part) -> Result<Vec<StoredMessage>> {
        let inner = self.inner.lock().await;
        let wanted: BTreeSet<LocalId> = ids.iter().copied().collect();
        Ok(wanted
            .iter()
            .filter_map(|id| inner.messages.get(id))
            .map(|m| StoredMessage {
                raw: select_part(&m.raw, part),
                ..m.clone()
            })
            .collect())
    }

    async fn store(&self, ids: &[LocalId], delta: &FlagDelta) -> Result<()> {
        let mut inner = self.inner.lock().await;
        for id in ids {
            if let Some(m) = inner.messages.get_mut(id) {
                m.flags = delta.apply(&m.flags);
            }
        }
        Ok(())
    }

    async fn expunge(&self, ids: &[LocalId]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        for id in ids {
            inner.messages.remove(id);
        }
        Ok(())
    }

    async fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.lock().await.metadata.get(key).cloned())
    }

    async fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.inner
            .lock()
            .await
            .metadata
            .insert(key.to_string(), value.to_string());
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

    #[tokio::test]
    async fn ids_are_never_reused() {
        let store = MemoryStore::new();
        let flags = BTreeSet::new();
        let a = store.append(&flags, Utc::now(), b"A: 1\r\n\r\n").await.unwrap();
        store.expunge(&[a]).await.unwrap();
        let b = store.append(&flags, Utc::now(), b"A: 2\r\n\r\n").await.unwrap();
        assert!(b > a);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn fetch_header_part() {
        let store = MemoryStore::new();
        let id = store
            .append(&BTreeSet::new(), Utc::now(), b"Subject: hi\r\n\r\nbody")
            .await
            .unwrap();
        let rows = store.fetch(&[id, 99], Part::Header).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].raw.ends_with(b"body"));
        assert_eq!(rows[0].headers().get("Subject"), Some("hi"));
    }
}
