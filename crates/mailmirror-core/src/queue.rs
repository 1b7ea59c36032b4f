//! Local flag changes waiting to be pushed to the server.
//!
//! A local mark applies at once and is queued. The next sync drains the queue
//! with remote STOREs to every folder copy of the message before pulling
//! remote flags, which then overwrite the local state. An entry whose STORE
//! fails stays queued for the next pass.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use mailmirror_imap::{Mailbox, StoreOp, Uid};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::Result;
use crate::flags::{TagMap, is_local_only, split_for_remote};
use crate::remote::Remote;
use crate::store::{FlagDelta, FlagOp, LocalId, MessageStore, Part};
use crate::uidmap::UidMapper;

const QUEUE_KEY: &str = "flag_queue";

/// One queued change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChange {
    /// Local messages it applies to.
    pub ids: Vec<LocalId>,
    /// The change.
    pub delta: FlagDelta,
}

/// Remote UIDs touched by a drain, per folder.
pub type Affected = BTreeMap<String, BTreeSet<Uid>>;

/// Persistent queue of local flag changes.
#[derive(Debug)]
pub struct FlagQueue<S> {
    store: Arc<S>,
    // serializes read-modify-write of the metadata entry
    edit: Mutex<()>,
}

impl<S: MessageStore> FlagQueue<S> {
    /// Queue stored in `store`'s metadata.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            edit: Mutex::new(()),
        }
    }

    /// Pending changes, oldest first.
    ///
    /// # Errors
    ///
    /// Store or JSON errors.
    pub async fn pending(&self) -> Result<Vec<PendingChange>> {
        match self.store.get_metadata(QUEUE_KEY).await? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    async fn save(&self, pending: &[PendingChange]) -> Result<()> {
        self.store
            .set_metadata(QUEUE_KEY, &serde_json::to_string(pending)?)
            .await
    }

    /// Applies `delta` to `ids` locally and queues it for the server.
    /// Local-only flags survive a replace.
    ///
    /// # Errors
    ///
    /// Store or JSON errors.
    pub async fn mark(&self, ids: &[LocalId], delta: FlagDelta) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        if delta.op == FlagOp::Replace {
            for message in self.store.fetch(ids, Part::Flags).await? {
                let mut next = delta.apply(&message.flags);
                next.extend(message.flags.iter().filter(|f| is_local_only(f)).cloned());
                self.store
                    .store(&[message.id], &FlagDelta::replace(next))
                    .await?;
            }
        } else {
            self.store.store(ids, &delta).await?;
        }

        let _edit = self.edit.lock().await;
        let mut pending = self.pending().await?;
        pending.push(PendingChange {
            ids: ids.to_vec(),
            delta,
        });
        self.save(&pending).await?;
        tracing::debug!(count = ids.len(), queued = pending.len(), "flag change queued");
        Ok(())
    }

    /// Moves queued changes of `from` to `to`, when a placeholder is replaced
    /// by its full message or merged into a duplicate.
    ///
    /// # Errors
    ///
    /// Store or JSON errors.
    pub async fn redirect(&self, from: LocalId, to: LocalId) -> Result<()> {
        let _edit = self.edit.lock().await;
        let mut pending = self.pending().await?;
        let mut moved = false;
        for change in &mut pending {
            for id in change.ids.iter_mut().filter(|id| **id == from) {
                *id = to;
                moved = true;
            }
            change.ids.sort_unstable();
            change.ids.dedup();
        }
        if moved {
            tracing::debug!(from, to, "queued flag change follows message");
            self.save(&pending).await?;
        }
        Ok(())
    }

    /// Every remote copy of `ids`, per folder.
    async fn locate(
        &self,
        mapper: &UidMapper<S>,
        ids: &[LocalId],
    ) -> Result<BTreeMap<String, BTreeSet<Uid>>> {
        let found = mapper.index().await?.remote_of(ids);
        Ok(found
            .into_iter()
            .map(|(folder, uids)| (folder, uids.into_iter().filter_map(Uid::new).collect()))
            .collect())
    }

    /// Pushes every queued change to the server and returns the UIDs that
    /// were stored, so the caller can re-read their flags. Changes queued
    /// while the drain runs stay queued.
    ///
    /// Takes the duplicate index of `mapper`; the caller must not hold the
    /// label map.
    ///
    /// # Errors
    ///
    /// Store or JSON errors. Remote failures keep the entry queued and are
    /// logged; an auth failure is returned.
    pub async fn drain<R: Remote>(
        &self,
        mapper: &UidMapper<S>,
        remote: &mut R,
        tags: &TagMap,
        gmail: bool,
    ) -> Result<Affected> {
        let pending = self.pending().await?;
        if pending.is_empty() {
            return Ok(Affected::new());
        }
        let drained = pending.len();

        let mut affected = Affected::new();
        let mut failed_at = BTreeSet::new();
        for (position, change) in pending.into_iter().enumerate() {
            let targets = self.locate(mapper, &change.ids).await?;
            let (flags, labels) = split_for_remote(&change.delta.flags, tags, gmail);
            let op = StoreOp::from(change.delta.op);
            let mut failed = false;

            for (folder, uids) in &targets {
                let uids: Vec<Uid> = uids.iter().copied().collect();
                let pushed = async {
                    remote.select(&Mailbox::new(folder.as_str()), false).await?;
                    if !flags.is_empty() || op == StoreOp::Replace {
                        remote.store(&uids, op, &flags).await?;
                    }
                    if gmail && (!labels.is_empty() || op == StoreOp::Replace) {
                        remote.store_labels(&uids, op, &labels).await?;
                    }
                    Ok::<_, crate::Error>(())
                }
                .await;
                match pushed {
                    Ok(()) => affected
                        .entry(folder.clone())
                        .or_default()
                        .extend(uids.iter().copied()),
                    Err(e) if e.is_auth() => return Err(e),
                    Err(e) => {
                        tracing::warn!(%folder, count = uids.len(), error = %e, "flag push failed, keeping it queued");
                        failed = true;
                    }
                }
            }
            if failed {
                failed_at.insert(position);
            }
        }

        // the drained entries are a prefix; later ones arrived meanwhile
        let _edit = self.edit.lock().await;
        let current = self.pending().await?;
        let kept: Vec<PendingChange> = current
            .into_iter()
            .enumerate()
            .filter(|(position, _)| *position >= drained || failed_at.contains(position))
            .map(|(_, change)| change)
            .collect();
        self.save(&kept).await?;
        tracing::info!(
            folders = affected.len(),
            still_queued = kept.len(),
            "flag queue drained"
        );
        Ok(affected)
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
    use chrono::Utc;
    use mailmirror_mime::SyntheticHeaders;

    use super::*;
    use crate::flags::LATEST;
    use crate::store::MemoryStore;

    async fn imported(store: &MemoryStore, uid: u32, flags: &[&str]) -> LocalId {
        let synthetic = SyntheticHeaders {
            uid: Some(uid),
            remote_folder: Some("INBOX".into()),
            ..SyntheticHeaders::default()
        };
        let raw = synthetic.serialize(b"Message-Id: <q@x>\r\n\r\nbody\r\n");
        let flags = flags.iter().map(ToString::to_string).collect();
        store.append(&flags, Utc::now(), &raw).await.unwrap()
    }

    #[tokio::test]
    async fn mark_applies_locally_and_queues() {
        let store = Arc::new(MemoryStore::new());
        let id = imported(&store, 5, &[LATEST, "\\Seen"]).await;
        let queue = FlagQueue::new(Arc::clone(&store));

        queue.mark(&[id], FlagDelta::add(["\\Flagged"])).await.unwrap();
        queue.mark(&[id], FlagDelta::replace(["Work"])).await.unwrap();

        let flags = &store.fetch(&[id], Part::Flags).await.unwrap()[0].flags;
        assert_eq!(
            flags.iter().map(String::as_str).collect::<Vec<_>>(),
            vec![LATEST, "Work"]
        );
        assert_eq!(queue.pending().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn locate_uses_synthetic_headers() {
        let store = Arc::new(MemoryStore::new());
        let a = imported(&store, 5, &[]).await;
        let b = imported(&store, 9, &[]).await;
        let local = store
            .append(&BTreeSet::new(), Utc::now(), b"Subject: draft\r\n\r\n")
            .await
            .unwrap();
        let queue = FlagQueue::new(Arc::clone(&store));
        let mapper = UidMapper::new(Arc::clone(&store));

        let found = queue.locate(&mapper, &[a, b, local]).await.unwrap();
        let uids: Vec<u32> = found["INBOX"].iter().map(|u| u.get()).collect();
        assert_eq!(uids, vec![5, 9]);
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn redirect_moves_queued_ids() {
        let store = Arc::new(MemoryStore::new());
        let placeholder = imported(&store, 5, &[]).await;
        let other = imported(&store, 6, &[]).await;
        let queue = FlagQueue::new(Arc::clone(&store));
        queue
            .mark(&[placeholder, other], FlagDelta::add(["\\Seen"]))
            .await
            .unwrap();

        queue.redirect(placeholder, other).await.unwrap();
        queue.redirect(999, other).await.unwrap();

        let pending = queue.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].ids, vec![other]);
    }
}
