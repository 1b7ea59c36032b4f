//! Remote UID ↔ local id correspondence, sync checkpoints and duplicate lookup.
//!
//! Nothing here keeps a separate table of which remote message a local
//! message came from: the synthetic headers written in front of every stored
//! message carry that, and [`DuplicateIndex`] is rebuilt from them. Only the
//! checkpoints, recorded duplicates and UIDVALIDITY resets live in metadata.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use mailmirror_mime::SyntheticHeaders;
use serde::{Deserialize, Serialize};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};

use crate::Result;
use crate::flags;
use crate::store::{LocalId, MessageStore, Part, Query};

const DUPLICATES_KEY: &str = "duplicates";
const RESETS_KEY: &str = "uid_resets";

/// Identifies one remote folder of one account: `host:user:tag` plus the
/// folder name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MailboxKey {
    account: String,
    folder: String,
}

impl MailboxKey {
    /// Key for `folder` of the account `host:user:tag`.
    #[must_use]
    pub fn new(account: impl Into<String>, folder: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            folder: folder.into(),
        }
    }

    /// Remote folder name.
    #[must_use]
    pub fn folder(&self) -> &str {
        &self.folder
    }
}

impl std::fmt::Display for MailboxKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.account, self.folder)
    }
}

/// Persisted sync progress of one folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// UIDVALIDITY the progress belongs to.
    pub uidvalidity: u32,
    /// First UID not yet imported.
    pub uidnext: u32,
}

/// Where a sync pass starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resume {
    /// First UID to look at.
    pub start: u32,
    /// True when the stored checkpoint belonged to another UIDVALIDITY.
    pub reset: bool,
}

impl Resume {
    /// True when the folder is scanned from the beginning.
    #[must_use]
    pub const fn is_initial(&self) -> bool {
        self.start <= 1
    }
}

/// A message that was not stored because identical content already was.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateLink {
    /// Content hash shared by both copies, when the match was by content.
    pub hash: Option<String>,
    /// Remote global id (X-GM-MSGID) of the skipped copy.
    pub msgid: Option<u64>,
    /// Local id of the stored copy.
    pub kept: LocalId,
    /// Folder of the skipped copy.
    pub folder: String,
    /// UID of the skipped copy.
    pub remote_uid: u32,
}

/// What a duplicate is looked up by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DupKey<'a> {
    /// `X-SHA256` of a fully stored message.
    Hash(&'a str),
    /// `X-GM-MSGID`.
    GmMsgid(u64),
    /// UID within a folder.
    Remote(&'a str, u32),
}

/// In-memory lookup tables built from the synthetic headers of every stored
/// message plus the recorded duplicate links.
#[derive(Debug, Clone, Default)]
pub struct DuplicateIndex {
    by_hash: HashMap<String, LocalId>,
    by_msgid: HashMap<u64, LocalId>,
    by_remote: HashMap<(String, u32), LocalId>,
}

impl DuplicateIndex {
    /// Scans `store`.
    ///
    /// UID entries of messages stored before a folder's UIDVALIDITY reset are
    /// left out; they describe the previous epoch.
    ///
    /// # Errors
    ///
    /// Store or metadata errors.
    pub async fn load<S: MessageStore>(store: &S) -> Result<Self> {
        let resets = load_resets(store).await?;
        let ids = store.search(&Query::All).await?;
        let mut index = Self::default();
        for message in store.fetch(&ids, Part::Header).await? {
            let mut synthetic = match SyntheticHeaders::parse(&message.headers()) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(id = message.id, error = %e, "unreadable synthetic headers");
                    continue;
                }
            };
            let stale = synthetic
                .remote_folder
                .as_deref()
                .and_then(|f| resets.get(f))
                .is_some_and(|&cutoff| message.id <= cutoff);
            if stale {
                synthetic.remote_folder = None;
            }
            index.insert(message.id, &synthetic, message.has(flags::PARTIAL));
        }
        let present: HashSet<LocalId> = ids.iter().copied().collect();
        for link in load_links(store).await? {
            if !present.contains(&link.kept) {
                continue;
            }
            index
                .by_remote
                .entry((link.folder.clone(), link.remote_uid))
                .or_insert(link.kept);
            if let Some(msgid) = link.msgid {
                index.by_msgid.entry(msgid).or_insert(link.kept);
            }
        }
        tracing::debug!(
            hashes = index.by_hash.len(),
            remote = index.by_remote.len(),
            "duplicate index loaded"
        );
        Ok(index)
    }

    /// Adds a stored message. Placeholders are not indexed by hash.
    pub fn insert(&mut self, id: LocalId, synthetic: &SyntheticHeaders, partial: bool) {
        if let (Some(hash), false) = (&synthetic.sha256, partial) {
            self.by_hash.entry(hash.clone()).or_insert(id);
        }
        if let Some(msgid) = synthetic.gm_msgid {
            self.by_msgid.entry(msgid).or_insert(id);
        }
        if let (Some(folder), Some(uid)) = (&synthetic.remote_folder, synthetic.remote_uid()) {
            self.by_remote.insert((folder.clone(), uid), id);
        }
    }

    /// Points every entry of `from` at `to`, e.g. when a placeholder is
    /// replaced by its full message or merged into a duplicate.
    pub fn redirect(&mut self, from: LocalId, to: LocalId) {
        for v in self
            .by_hash
            .values_mut()
            .chain(self.by_msgid.values_mut())
            .chain(self.by_remote.values_mut())
        {
            if *v == from {
                *v = to;
            }
        }
    }

    /// Drops every entry pointing at `id`.
    pub fn forget(&mut self, id: LocalId) {
        self.by_hash.retain(|_, v| *v != id);
        self.by_msgid.retain(|_, v| *v != id);
        self.by_remote.retain(|_, v| *v != id);
    }

    /// Drops the UID entries of `folder`.
    pub fn forget_folder(&mut self, folder: &str) {
        self.by_remote.retain(|(f, _), _| f != folder);
    }

    /// Local message already holding `key`.
    #[must_use]
    pub fn find(&self, key: DupKey<'_>) -> Option<LocalId> {
        match key {
            DupKey::Hash(hash) => self.by_hash.get(hash).copied(),
            DupKey::GmMsgid(msgid) => self.by_msgid.get(&msgid).copied(),
            DupKey::Remote(folder, uid) => self.by_remote.get(&(folder.to_string(), uid)).copied(),
        }
    }

    /// Local ids for the known UIDs of `folder`.
    #[must_use]
    pub fn map_remote_to_local(&self, folder: &str, uids: &[u32]) -> HashMap<u32, LocalId> {
        uids.iter()
            .filter_map(|&uid| self.find(DupKey::Remote(folder, uid)).map(|id| (uid, id)))
            .collect()
    }

    /// Every remote copy of `ids`, per folder. A merged message has one
    /// entry for each folder it was seen in.
    #[must_use]
    pub fn remote_of(&self, ids: &[LocalId]) -> BTreeMap<String, BTreeSet<u32>> {
        let mut out: BTreeMap<String, BTreeSet<u32>> = BTreeMap::new();
        for ((folder, uid), id) in &self.by_remote {
            if ids.contains(id) {
                out.entry(folder.clone()).or_default().insert(*uid);
            }
        }
        out
    }
}

async fn load_links<S: MessageStore>(store: &S) -> Result<Vec<DuplicateLink>> {
    match store.get_metadata(DUPLICATES_KEY).await? {
        Some(json) => Ok(serde_json::from_str(&json)?),
        None => Ok(Vec::new()),
    }
}

async fn load_resets<S: MessageStore>(store: &S) -> Result<BTreeMap<String, LocalId>> {
    match store.get_metadata(RESETS_KEY).await? {
        Some(json) => Ok(serde_json::from_str(&json)?),
        None => Ok(BTreeMap::new()),
    }
}

/// Checkpoints and duplicate lookup for one local store.
///
/// The [`DuplicateIndex`] sits behind a mutex; holding [`index`](Self::index)
/// while checking and appending keeps concurrent folders from importing the
/// same message twice.
#[derive(Debug)]
pub struct UidMapper<S> {
    store: Arc<S>,
    index: Mutex<Option<DuplicateIndex>>,
}

impl<S: MessageStore> UidMapper<S> {
    /// Mapper over `store`. The index is loaded on first use.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            index: Mutex::new(None),
        }
    }

    /// Stored checkpoint for `key`.
    ///
    /// # Errors
    ///
    /// Store or JSON errors.
    pub async fn checkpoint(&self, key: &MailboxKey) -> Result<Option<Checkpoint>> {
        match self.store.get_metadata(&format!("uidnext:{key}")).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Compares the remote UIDVALIDITY with the checkpoint and decides where
    /// to start. A changed UIDVALIDITY restarts at UID 1 and invalidates the
    /// folder's UID correspondences.
    ///
    /// # Errors
    ///
    /// Store or JSON errors.
    pub async fn resume(&self, key: &MailboxKey, uidvalidity: u32) -> Result<Resume> {
        match self.checkpoint(key).await? {
            Some(cp) if cp.uidvalidity == uidvalidity => Ok(Resume {
                start: cp.uidnext.max(1),
                reset: false,
            }),
            Some(cp) => {
                tracing::warn!(
                    mailbox = %key,
                    old = cp.uidvalidity,
                    new = uidvalidity,
                    "UIDVALIDITY changed, rescanning"
                );
                self.reset(key, uidvalidity).await?;
                Ok(Resume {
                    start: 1,
                    reset: true,
                })
            }
            None => Ok(Resume {
                start: 1,
                reset: false,
            }),
        }
    }

    async fn reset(&self, key: &MailboxKey, uidvalidity: u32) -> Result<()> {
        let folder = key.folder().to_string();
        let cutoff = self
            .store
            .search(&Query::All)
            .await?
            .last()
            .copied()
            .unwrap_or_default();
        let mut resets = load_resets(&*self.store).await?;
        resets.insert(folder.clone(), cutoff);
        self.store
            .set_metadata(RESETS_KEY, &serde_json::to_string(&resets)?)
            .await?;

        let mut links = load_links(&*self.store).await?;
        links.retain(|l| l.folder != folder);
        self.store
            .set_metadata(DUPLICATES_KEY, &serde_json::to_string(&links)?)
            .await?;

        if let Some(index) = self.index.lock().await.as_mut() {
            index.forget_folder(&folder);
        }
        self.advance(
            key,
            Checkpoint {
                uidvalidity,
                uidnext: 1,
            },
        )
        .await?;
        self.store.set_metadata(&format!("modseq:{key}"), "0").await
    }

    /// Stores a new checkpoint. Call only after the batch it covers is committed.
    ///
    /// # Errors
    ///
    /// Store or JSON errors.
    pub async fn advance(&self, key: &MailboxKey, checkpoint: Checkpoint) -> Result<()> {
        tracing::debug!(mailbox = %key, uidnext = checkpoint.uidnext, "checkpoint advanced");
        self.store
            .set_metadata(&format!("uidnext:{key}"), &serde_json::to_string(&checkpoint)?)
            .await
    }

    /// Stored HIGHESTMODSEQ for `key`; 0 when unknown.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn modseq(&self, key: &MailboxKey) -> Result<u64> {
        Ok(self
            .store
            .get_metadata(&format!("modseq:{key}"))
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    /// Stores HIGHESTMODSEQ for `key`.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn set_modseq(&self, key: &MailboxKey, modseq: u64) -> Result<()> {
        self.store
            .set_metadata(&format!("modseq:{key}"), &modseq.to_string())
            .await
    }

    /// Locks the duplicate index, loading it if needed.
    ///
    /// # Errors
    ///
    /// Store errors while loading.
    pub async fn index(&self) -> Result<MappedMutexGuard<'_, DuplicateIndex>> {
        let mut guard = self.index.lock().await;
        if guard.is_none() {
            *guard = Some(DuplicateIndex::load(&*self.store).await?);
        }
        Ok(MutexGuard::map(guard, |i| i.get_or_insert_with(DuplicateIndex::default)))
    }

    /// Forgets the loaded index so the next use rescans the store.
    pub async fn invalidate(&self) {
        *self.index.lock().await = None;
    }

    /// Local ids for the known UIDs of `folder`.
    ///
    /// # Errors
    ///
    /// Store errors while loading the index.
    pub async fn map_remote_to_local(
        &self,
        folder: &str,
        uids: &[u32],
    ) -> Result<HashMap<u32, LocalId>> {
        Ok(self.index().await?.map_remote_to_local(folder, uids))
    }

    /// Local message already holding `key`.
    ///
    /// # Errors
    ///
    /// Store errors while loading the index.
    pub async fn find_duplicate(&self, key: DupKey<'_>) -> Result<Option<LocalId>> {
        Ok(self.index().await?.find(key))
    }

    /// Points the locked `index` and the recorded duplicate links of `from`
    /// at `to`.
    ///
    /// # Errors
    ///
    /// Store or JSON errors.
    pub async fn redirect(
        &self,
        index: &mut DuplicateIndex,
        from: LocalId,
        to: LocalId,
    ) -> Result<()> {
        index.redirect(from, to);
        let mut links = load_links(&*self.store).await?;
        let mut moved = false;
        for link in links.iter_mut().filter(|l| l.kept == from) {
            link.kept = to;
            moved = true;
        }
        if moved {
            self.store
                .set_metadata(DUPLICATES_KEY, &serde_json::to_string(&links)?)
                .await?;
        }
        Ok(())
    }

    /// Persists `link` and adds it to the locked `index`.
    ///
    /// # Errors
    ///
    /// Store or JSON errors.
    pub async fn record_duplicate(
        &self,
        index: &mut DuplicateIndex,
        link: DuplicateLink,
    ) -> Result<()> {
        tracing::info!(
            kept = link.kept,
            folder = %link.folder,
            uid = link.remote_uid,
            "duplicate content linked"
        );
        index
            .by_remote
            .insert((link.folder.clone(), link.remote_uid), link.kept);
        if let Some(msgid) = link.msgid {
            index.by_msgid.entry(msgid).or_insert(link.kept);
        }
        let mut links = load_links(&*self.store).await?;
        links.push(link);
        self.store
            .set_metadata(DUPLICATES_KEY, &serde_json::to_string(&links)?)
            .await
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
    use std::collections::BTreeSet;

    use chrono::Utc;

    use super::*;
    use crate::store::MemoryStore;

    fn key() -> MailboxKey {
        MailboxKey::new("imap.example.com:me:mirror", "INBOX")
    }

    async fn stored(store: &MemoryStore, synthetic: SyntheticHeaders) -> LocalId {
        let raw = synthetic.serialize(b"Subject: x\r\n\r\nbody\r\n");
        store.append(&BTreeSet::new(), Utc::now(), &raw).await.unwrap()
    }

    #[test]
    fn key_display() {
        assert_eq!(key().to_string(), "imap.example.com:me:mirror:INBOX");
    }

    #[tokio::test]
    async fn first_sync_starts_at_one() {
        let mapper = UidMapper::new(Arc::new(MemoryStore::new()));
        let resume = mapper.resume(&key(), 7).await.unwrap();
        assert_eq!(resume, Resume { start: 1, reset: false });
        assert!(resume.is_initial());
    }

    #[tokio::test]
    async fn checkpoint_resumes_in_same_epoch() {
        let mapper = UidMapper::new(Arc::new(MemoryStore::new()));
        mapper
            .advance(&key(), Checkpoint { uidvalidity: 7, uidnext: 42 })
            .await
            .unwrap();
        let resume = mapper.resume(&key(), 7).await.unwrap();
        assert_eq!(resume, Resume { start: 42, reset: false });
    }

    #[tokio::test]
    async fn uidvalidity_change_resets_to_one() {
        let store = Arc::new(MemoryStore::new());
        let old = stored(
            &store,
            SyntheticHeaders {
                uid: Some(5),
                remote_folder: Some("INBOX".into()),
                sha256: Some("aa".into()),
                ..SyntheticHeaders::default()
            },
        )
        .await;
        let mapper = UidMapper::new(Arc::clone(&store));
        mapper
            .advance(&key(), Checkpoint { uidvalidity: 7, uidnext: 42 })
            .await
            .unwrap();
        assert_eq!(
            mapper.find_duplicate(DupKey::Remote("INBOX", 5)).await.unwrap(),
            Some(old)
        );

        let resume = mapper.resume(&key(), 8).await.unwrap();
        assert_eq!(resume, Resume { start: 1, reset: true });
        assert_eq!(
            mapper.checkpoint(&key()).await.unwrap(),
            Some(Checkpoint { uidvalidity: 8, uidnext: 1 })
        );
        assert_eq!(
            mapper.find_duplicate(DupKey::Remote("INBOX", 5)).await.unwrap(),
            None
        );
        // content hash still finds it
        assert_eq!(
            mapper.find_duplicate(DupKey::Hash("aa")).await.unwrap(),
            Some(old)
        );

        // a reload honours the reset too
        mapper.invalidate().await;
        assert_eq!(
            mapper.map_remote_to_local("INBOX", &[5]).await.unwrap(),
            HashMap::new()
        );
    }

    #[tokio::test]
    async fn index_from_synthetic_headers() {
        let store = Arc::new(MemoryStore::new());
        let id = stored(
            &store,
            SyntheticHeaders {
                gm_uid: Some(9),
                gm_msgid: Some(1234),
                remote_folder: Some("[Gmail]/All Mail".into()),
                sha256: Some("bb".into()),
                ..SyntheticHeaders::default()
            },
        )
        .await;
        let mapper = UidMapper::new(store);
        assert_eq!(
            mapper.find_duplicate(DupKey::GmMsgid(1234)).await.unwrap(),
            Some(id)
        );
        assert_eq!(
            mapper
                .map_remote_to_local("[Gmail]/All Mail", &[9, 10])
                .await
                .unwrap(),
            HashMap::from([(9, id)])
        );
    }

    #[tokio::test]
    async fn recorded_duplicates_survive_reload() {
        let store = Arc::new(MemoryStore::new());
        let kept = stored(
            &store,
            SyntheticHeaders {
                uid: Some(1),
                remote_folder: Some("INBOX".into()),
                sha256: Some("cc".into()),
                ..SyntheticHeaders::default()
            },
        )
        .await;
        let mapper = UidMapper::new(Arc::clone(&store));
        {
            let mut index = mapper.index().await.unwrap();
            mapper
                .record_duplicate(
                    &mut index,
                    DuplicateLink {
                        hash: Some("cc".into()),
                        msgid: None,
                        kept,
                        folder: "Sent".into(),
                        remote_uid: 3,
                    },
                )
                .await
                .unwrap();
        }
        mapper.invalidate().await;
        assert_eq!(
            mapper.find_duplicate(DupKey::Remote("Sent", 3)).await.unwrap(),
            Some(kept)
        );
    }
    #[tokio::test]
    async fn links_follow_a_replaced_placeholder() {
        let store = Arc::new(MemoryStore::new());
        let partial = stored(
            &store,
            SyntheticHeaders {
                uid: Some(1),
                remote_folder: Some("INBOX".into()),
                ..SyntheticHeaders::default()
            },
        )
        .await;
        let mapper = UidMapper::new(Arc::clone(&store));
        let mut index = mapper.index().await.unwrap();
        mapper
            .record_duplicate(
                &mut index,
                DuplicateLink {
                    hash: None,
                    msgid: None,
                    kept: partial,
                    folder: "Sent".into(),
                    remote_uid: 3,
                },
            )
            .await
            .unwrap();

        let full = stored(
            &store,
            SyntheticHeaders {
                uid: Some(1),
                remote_folder: Some("INBOX".into()),
                sha256: Some("dd".into()),
                ..SyntheticHeaders::default()
            },
        )
        .await;
        store.expunge(&[partial]).await.unwrap();
        mapper.redirect(&mut index, partial, full).await.unwrap();
        assert_eq!(
            index.remote_of(&[full]),
            BTreeMap::from([
                ("INBOX".to_string(), BTreeSet::from([1])),
                ("Sent".to_string(), BTreeSet::from([3])),
            ])
        );
        drop(index);

        mapper.invalidate().await;
        assert_eq!(
            mapper.find_duplicate(DupKey::Remote("Sent", 3)).await.unwrap(),
            Some(full)
        );
    }
}
