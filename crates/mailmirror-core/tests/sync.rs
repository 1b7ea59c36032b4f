//! Sync engine tests against an in-process scripted server.
//!
//! `FakeServer` keeps folders and messages in memory and records every UID
//! FETCH, so the tests can check round-trips, retries and what ends up in the
//! local store without a network.

#![allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::similar_names
)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mailmirror_core::flags::{INBOX, LATEST, PARTIAL, SENT, TRASH};
use mailmirror_core::store::{Part, StoredMessage};
use mailmirror_core::uidmap::MailboxKey;
use mailmirror_core::{
    AccountConfig, ChannelNotifier, Connect, FlagDelta, MemoryStore, MessageStore, Query, Remote,
    Result, SyncConfig, SyncEngine, SyncOptions,
};
use mailmirror_imap::{
    FetchAttribute, FetchFields, FetchRow, Flag, Flags, IdleEvent, ListResponse, Mailbox,
    MailboxAttribute, MailboxStatus, SearchCriteria, StoreOp, Uid, UidValidity,
};

#[derive(Debug, Clone)]
struct Message {
    raw: Vec<u8>,
    flags: Vec<Flag>,
    labels: Vec<String>,
    gm_msgid: Option<u64>,
    modseq: u64,
}

#[derive(Debug, Clone, Default)]
struct Folder {
    attributes: Vec<MailboxAttribute>,
    uidvalidity: u32,
    messages: BTreeMap<u32, Message>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FetchCall {
    folder: String,
    uids: Vec<u32>,
    kind: &'static str,
}

#[derive(Debug, Default)]
struct State {
    gmail: bool,
    condstore: bool,
    folders: BTreeMap<String, Folder>,
    modseq: u64,
    fetches: Vec<FetchCall>,
    /// 1-based fetch calls that fail with a timeout.
    fail: BTreeSet<usize>,
    connections: usize,
}

#[derive(Debug, Clone, Default)]
struct FakeServer(Arc<Mutex<State>>);

impl FakeServer {
    fn new(gmail: bool) -> Self {
        let server = Self::default();
        server.0.lock().unwrap().gmail = gmail;
        server
    }

    fn folder(&self, name: &str, attributes: &[MailboxAttribute]) {
        self.0.lock().unwrap().folders.insert(
            name.to_string(),
            Folder {
                attributes: attributes.to_vec(),
                uidvalidity: 1,
                messages: BTreeMap::new(),
            },
        );
    }

    fn add(&self, folder: &str, uid: u32, raw: Vec<u8>, flags: &[Flag]) {
        self.add_gmail(folder, uid, raw, flags, &[], None);
    }

    fn add_gmail(
        &self,
        folder: &str,
        uid: u32,
        raw: Vec<u8>,
        flags: &[Flag],
        labels: &[&str],
        gm_msgid: Option<u64>,
    ) {
        let mut state = self.0.lock().unwrap();
        state.modseq += 1;
        let modseq = state.modseq;
        state.folders.get_mut(folder).unwrap().messages.insert(
            uid,
            Message {
                raw,
                flags: flags.to_vec(),
                labels: labels.iter().map(ToString::to_string).collect(),
                gm_msgid,
                modseq,
            },
        );
    }

    fn set_flags(&self, folder: &str, uid: u32, flags: &[Flag]) {
        let mut state = self.0.lock().unwrap();
        state.modseq += 1;
        let modseq = state.modseq;
        let message = state
            .folders
            .get_mut(folder)
            .unwrap()
            .messages
            .get_mut(&uid)
            .unwrap();
        message.flags = flags.to_vec();
        message.modseq = modseq;
    }

    fn flags_of(&self, folder: &str, uid: u32) -> Vec<Flag> {
        self.0.lock().unwrap().folders[folder].messages[&uid]
            .flags
            .clone()
    }

    /// New epoch: same messages under new UIDs starting at `first`.
    fn renumber(&self, folder: &str, first: u32) {
        let mut state = self.0.lock().unwrap();
        let folder = state.folders.get_mut(folder).unwrap();
        folder.uidvalidity += 1;
        let old = std::mem::take(&mut folder.messages);
        folder.messages = old.into_values().zip(first..).map(|(m, u)| (u, m)).collect();
    }

    fn fetches(&self, kind: &str) -> Vec<FetchCall> {
        self.0
            .lock()
            .unwrap()
            .fetches
            .iter()
            .filter(|c| c.kind == kind)
            .cloned()
            .collect()
    }

    fn fail_fetches(&self, calls: impl IntoIterator<Item = usize>) {
        self.0.lock().unwrap().fail.extend(calls);
    }
}

#[derive(Debug)]
struct FakeRemote {
    server: FakeServer,
    selected: Option<String>,
}

impl FakeRemote {
    fn selected(&self) -> String {
        self.selected.clone().unwrap()
    }
}

fn header_of(raw: &[u8]) -> Vec<u8> {
    raw.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map_or_else(|| raw.to_vec(), |end| raw[..end + 4].to_vec())
}

fn apply(flags: &mut Vec<Flag>, op: StoreOp, given: &[Flag]) {
    match op {
        StoreOp::Add => {
            for flag in given {
                if !flags.contains(flag) {
                    flags.push(flag.clone());
                }
            }
        }
        StoreOp::Remove => flags.retain(|f| !given.contains(f)),
        StoreOp::Replace => *flags = given.to_vec(),
    }
}

impl Remote for FakeRemote {
    fn is_gmail(&self) -> bool {
        self.server.0.lock().unwrap().gmail
    }

    fn supports_condstore(&self) -> bool {
        self.server.0.lock().unwrap().condstore
    }

    async fn list(&mut self) -> Result<Vec<ListResponse>> {
        let state = self.server.0.lock().unwrap();
        Ok(state
            .folders
            .iter()
            .map(|(name, folder)| ListResponse {
                attributes: folder.attributes.clone(),
                delimiter: Some('/'),
                mailbox: Mailbox::new(name.as_str()),
            })
            .collect())
    }

    async fn select(&mut self, mailbox: &Mailbox, read_only: bool) -> Result<MailboxStatus> {
        let state = self.server.0.lock().unwrap();
        let folder = state
            .folders
            .get(mailbox.as_str())
            .ok_or_else(|| mailmirror_imap::Error::No("no such mailbox".into()))?;
        let next = folder.messages.keys().next_back().map_or(1, |u| u + 1);
        let status = MailboxStatus {
            exists: u32::try_from(folder.messages.len()).unwrap(),
            recent: 0,
            uid_next: Uid::new(next),
            uid_validity: UidValidity::new(folder.uidvalidity),
            flags: Flags::new(),
            read_only,
            highest_mod_seq: state.condstore.then_some(state.modseq.max(1)),
        };
        drop(state);
        self.selected = Some(mailbox.as_str().to_string());
        Ok(status)
    }

    async fn search(&mut self, criteria: &SearchCriteria) -> Result<Vec<Uid>> {
        let folder = self.selected();
        let state = self.server.0.lock().unwrap();
        let uids: Vec<u32> = state.folders[&folder].messages.keys().copied().collect();
        let found = match criteria {
            SearchCriteria::UidFrom(start) => {
                let mut found: Vec<u32> = uids.iter().copied().filter(|u| *u >= start.get()).collect();
                // `n:*` includes the highest UID even below n
                if found.is_empty() {
                    found.extend(uids.last().copied());
                }
                found
            }
            _ => uids,
        };
        Ok(found.into_iter().filter_map(Uid::new).collect())
    }

    async fn fetch(&mut self, uids: &[Uid], fields: &FetchFields) -> Result<Vec<FetchRow>> {
        let folder = self.selected();
        let attrs = fields.attributes();
        let wants = |a: &FetchAttribute| attrs.contains(a);
        let kind = if wants(&FetchAttribute::BodyPeek(String::new())) {
            "body"
        } else if wants(&FetchAttribute::BodyPeek("HEADER".into())) {
            "header"
        } else if wants(&FetchAttribute::Rfc822Size) {
            "size"
        } else {
            "flags"
        };

        let mut state = self.server.0.lock().unwrap();
        state.fetches.push(FetchCall {
            folder: folder.clone(),
            uids: uids.iter().map(|u| u.get()).collect(),
            kind,
        });
        let call = state.fetches.len();
        if state.fail.remove(&call) {
            return Err(mailmirror_imap::Error::Timeout(Duration::from_secs(1)).into());
        }

        let messages = &state.folders[&folder].messages;
        Ok(uids
            .iter()
            .filter_map(|uid| {
                let m = messages.get(&uid.get())?;
                Some(FetchRow {
                    uid: *uid,
                    flags: if wants(&FetchAttribute::Flags) {
                        m.flags.iter().cloned().collect()
                    } else {
                        Flags::new()
                    },
                    labels: if wants(&FetchAttribute::GmLabels) {
                        m.labels.clone()
                    } else {
                        Vec::new()
                    },
                    internal_date: wants(&FetchAttribute::InternalDate)
                        .then(|| "14-Mar-2024 09:30:00 +0000".to_string()),
                    size: wants(&FetchAttribute::Rfc822Size)
                        .then(|| u32::try_from(m.raw.len()).unwrap()),
                    gm_msgid: m.gm_msgid.filter(|_| wants(&FetchAttribute::GmMsgId)),
                    gm_thrid: None,
                    modseq: None,
                    header: (kind == "header").then(|| header_of(&m.raw)),
                    body: (kind == "body").then(|| m.raw.clone()),
                })
            })
            .collect())
    }

    async fn store(&mut self, uids: &[Uid], op: StoreOp, flags: &[Flag]) -> Result<Vec<Uid>> {
        let folder = self.selected();
        let mut state = self.server.0.lock().unwrap();
        state.modseq += 1;
        let modseq = state.modseq;
        let messages = &mut state.folders.get_mut(&folder).unwrap().messages;
        let mut stored = Vec::new();
        for uid in uids {
            if let Some(m) = messages.get_mut(&uid.get()) {
                apply(&mut m.flags, op, flags);
                m.modseq = modseq;
                stored.push(*uid);
            }
        }
        Ok(stored)
    }

    async fn store_labels(
        &mut self,
        uids: &[Uid],
        _op: StoreOp,
        _labels: &[String],
    ) -> Result<Vec<Uid>> {
        Ok(uids.to_vec())
    }

    async fn changed_since(&mut self, modseq: u64) -> Result<Vec<FetchRow>> {
        let folder = self.selected();
        let state = self.server.0.lock().unwrap();
        Ok(state.folders[&folder]
            .messages
            .iter()
            .filter(|(_, m)| m.modseq > modseq)
            .filter_map(|(uid, m)| {
                Some(FetchRow {
                    uid: Uid::new(*uid)?,
                    flags: m.flags.iter().cloned().collect(),
                    labels: m.labels.clone(),
                    internal_date: None,
                    size: None,
                    gm_msgid: m.gm_msgid,
                    gm_thrid: None,
                    modseq: Some(m.modseq),
                    header: None,
                    body: None,
                })
            })
            .collect())
    }

    async fn idle(&mut self, _timeout: Duration) -> Result<IdleEvent> {
        Ok(IdleEvent::Timeout)
    }

    async fn reconnect(&mut self) -> Result<()> {
        self.server.0.lock().unwrap().connections += 1;
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct FakeConnector(FakeServer);

impl Connect for FakeConnector {
    type Remote = FakeRemote;

    async fn connect(&self) -> Result<FakeRemote> {
        self.0.0.lock().unwrap().connections += 1;
        Ok(FakeRemote {
            server: self.0.clone(),
            selected: None,
        })
    }
}

fn message(n: u32, in_reply_to: Option<u32>) -> Vec<u8> {
    let reply = in_reply_to.map_or_else(String::new, |p| format!("In-Reply-To: <{p}@example.com>\r\n"));
    format!(
        "Message-Id: <{n}@example.com>\r\n{reply}From: alice@example.com\r\nTo: bob@example.com\r\nSubject: note {n}\r\nDate: Thu, 14 Mar 2024 09:30:00 +0000\r\n\r\nbody of {n}\r\n"
    )
    .into_bytes()
}

fn engine(
    server: &FakeServer,
    store: &Arc<MemoryStore>,
    config: SyncConfig,
    test: &str,
) -> Arc<SyncEngine<MemoryStore, FakeConnector>> {
    let lock_dir: PathBuf = std::env::temp_dir()
        .join("mailmirror-tests")
        .join(format!("{test}-{}", std::process::id()));
    Arc::new(
        SyncEngine::new(
            Arc::clone(store),
            FakeConnector(server.clone()),
            AccountConfig::new("imap.example.com", "bob"),
            config.retry_backoff(Duration::ZERO),
        )
        .lock_dir(lock_dir),
    )
}

async fn all(store: &MemoryStore) -> Vec<StoredMessage> {
    let ids = store.search(&Query::All).await.unwrap();
    store.fetch(&ids, Part::Flags).await.unwrap()
}

fn has(message: &StoredMessage, flag: &str) -> bool {
    message.flags.contains(flag)
}

#[tokio::test]
async fn same_message_in_two_folders_is_stored_once() {
    let server = FakeServer::new(false);
    server.folder("INBOX", &[]);
    server.folder("Sent", &[MailboxAttribute::Sent]);
    server.add("INBOX", 1, message(1, None), &[]);
    server.add("Sent", 7, message(1, None), &[Flag::Seen]);
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&server, &store, SyncConfig::default(), "two-folders");

    let reports = engine.sync_account(&SyncOptions::default()).await.unwrap();

    assert_eq!(reports.len(), 2);
    let messages = all(&store).await;
    assert_eq!(messages.len(), 1);
    let kept = &messages[0];
    for flag in [INBOX, SENT, "\\Seen", LATEST] {
        assert!(has(kept, flag), "missing {flag} in {:?}", kept.flags);
    }
    assert!(!has(kept, PARTIAL));
    assert_eq!(reports.iter().map(|r| r.duplicates).sum::<usize>(), 1);
}

#[tokio::test]
async fn second_run_fetches_nothing_and_changes_nothing() {
    let server = FakeServer::new(false);
    server.folder("INBOX", &[]);
    for uid in 1..=5 {
        server.add("INBOX", uid, message(uid, (uid > 1).then_some(1)), &[]);
    }
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&server, &store, SyncConfig::default(), "second-run");

    engine.sync_account(&SyncOptions::default()).await.unwrap();
    let before = all(&store).await;
    let fetches = server.0.lock().unwrap().fetches.len();

    let reports = engine.sync_account(&SyncOptions::default()).await.unwrap();

    assert_eq!(server.0.lock().unwrap().fetches.len(), fetches);
    assert_eq!(all(&store).await, before);
    assert_eq!(reports[0].new, 0);
    assert!(!reports[0].initial);
    assert_eq!(before.len(), 5);
    assert_eq!(before.iter().filter(|m| has(m, LATEST)).count(), 1);
}

#[tokio::test]
async fn header_batches_and_retry_of_one_round_trip() {
    let server = FakeServer::new(false);
    server.folder("INBOX", &[]);
    for uid in 1..=2500 {
        server.add("INBOX", uid, message(uid, None), &[]);
    }
    server.fail_fetches([2]);
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&server, &store, SyncConfig::default().batch_size(1000), "batches");
    let options = SyncOptions {
        bodies: false,
        ..SyncOptions::default()
    };

    let reports = engine.sync_account(&options).await.unwrap();

    let calls = server.fetches("header");
    let sizes: Vec<usize> = calls.iter().map(|c| c.uids.len()).collect();
    assert_eq!(sizes, vec![1000, 1000, 1000, 500]);
    assert_eq!(calls[1].uids, calls[2].uids);
    assert_eq!(calls[1].uids.first(), Some(&1001));
    assert_eq!(reports[0].new, 2500);
    assert_eq!(reports[0].skipped_batches, 0);
    assert_eq!(store.len().await, 2500);
    assert!(all(&store).await.iter().all(|m| has(m, PARTIAL)));
}

#[tokio::test]
async fn skipped_batch_holds_the_checkpoint() {
    let server = FakeServer::new(false);
    server.folder("INBOX", &[]);
    for uid in 1..=30 {
        server.add("INBOX", uid, message(uid, None), &[]);
    }
    // the second batch fails on every attempt
    server.fail_fetches([2, 3, 4]);
    let store = Arc::new(MemoryStore::new());
    let config = SyncConfig::default().batch_size(10).max_retries(2);
    let engine = engine(&server, &store, config, "skipped");
    let options = SyncOptions {
        bodies: false,
        ..SyncOptions::default()
    };

    let first = engine.sync_account(&options).await.unwrap();
    assert_eq!(first[0].skipped_batches, 1);
    assert_eq!(first[0].new, 20);
    let key = MailboxKey::new(AccountConfig::new("imap.example.com", "bob").key(), "INBOX");
    let checkpoint = engine.mapper().checkpoint(&key).await.unwrap().unwrap();
    assert_eq!(checkpoint.uidnext, 11);

    let second = engine.sync_account(&options).await.unwrap();
    assert_eq!(second[0].new, 10);
    assert_eq!(store.len().await, 30);
    let checkpoint = engine.mapper().checkpoint(&key).await.unwrap().unwrap();
    assert_eq!(checkpoint.uidnext, 31);
}

#[tokio::test]
async fn uidvalidity_change_does_not_duplicate_messages() {
    let server = FakeServer::new(false);
    server.folder("INBOX", &[]);
    server.add("INBOX", 1, message(1, None), &[]);
    server.add("INBOX", 2, message(2, Some(1)), &[]);
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&server, &store, SyncConfig::default(), "uidvalidity");
    engine.sync_account(&SyncOptions::default()).await.unwrap();

    server.renumber("INBOX", 100);
    let reports = engine.sync_account(&SyncOptions::default()).await.unwrap();

    assert!(reports[0].initial);
    assert_eq!(reports[0].duplicates, 2);
    let messages = all(&store).await;
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().all(|m| !has(m, PARTIAL)));

    // the new epoch is now known
    let fetches = server.0.lock().unwrap().fetches.len();
    engine.sync_account(&SyncOptions::default()).await.unwrap();
    assert_eq!(server.0.lock().unwrap().fetches.len(), fetches);
    assert_eq!(store.len().await, 2);
}

#[tokio::test]
async fn gmail_copies_merge_by_message_id_and_keep_labels() {
    let server = FakeServer::new(true);
    server.folder("[Gmail]/All Mail", &[MailboxAttribute::All]);
    server.folder("[Gmail]/Trash", &[MailboxAttribute::Trash]);
    server.folder("INBOX", &[]);
    server.add_gmail(
        "[Gmail]/All Mail",
        3,
        message(1, None),
        &[Flag::Seen],
        &["\\Inbox", "Work"],
        Some(77),
    );
    server.add_gmail("[Gmail]/Trash", 9, message(1, None), &[], &[], Some(77));
    server.add_gmail(
        "[Gmail]/All Mail",
        4,
        b"Subject: draft\r\n\r\nnot yet\r\n".to_vec(),
        &[Flag::Draft],
        &[],
        Some(78),
    );
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&server, &store, SyncConfig::default(), "gmail");

    engine.sync_account(&SyncOptions::default()).await.unwrap();

    let messages = all(&store).await;
    assert_eq!(messages.len(), 1);
    let kept = &messages[0];
    for flag in [INBOX, TRASH, "Work", "\\Seen"] {
        assert!(has(kept, flag), "missing {flag} in {:?}", kept.flags);
    }
    // one body fetched in total
    let bodies: usize = server.fetches("body").iter().map(|c| c.uids.len()).sum();
    assert_eq!(bodies, 1);
}

#[tokio::test]
async fn condstore_changes_update_managed_flags() {
    let server = FakeServer::new(false);
    server.0.lock().unwrap().condstore = true;
    server.folder("INBOX", &[]);
    server.add("INBOX", 1, message(1, None), &[Flag::Keyword("Work".into())]);
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&server, &store, SyncConfig::default(), "condstore");
    engine.sync_account(&SyncOptions::default()).await.unwrap();

    server.set_flags("INBOX", 1, &[Flag::Seen, Flag::Flagged]);
    let reports = engine.sync_account(&SyncOptions::default()).await.unwrap();

    let messages = all(&store).await;
    let kept = &messages[0];
    assert!(has(kept, "\\Seen"));
    assert!(has(kept, "\\Flagged"));
    // not managed, so a CONDSTORE pull leaves it
    assert!(has(kept, "Work"));
    assert!(has(kept, INBOX));
    assert_eq!(reports[0].updated_ids, vec![kept.id]);
}

#[tokio::test]
async fn queued_flag_change_reaches_the_server() {
    let server = FakeServer::new(false);
    server.folder("INBOX", &[]);
    server.add("INBOX", 4, message(4, None), &[]);
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&server, &store, SyncConfig::default(), "queue");
    engine.sync_account(&SyncOptions::default()).await.unwrap();
    let id = all(&store).await[0].id;

    engine
        .queue()
        .mark(&[id], FlagDelta::add(["\\Flagged"]))
        .await
        .unwrap();
    assert_eq!(engine.queue().pending().await.unwrap().len(), 1);

    engine.sync_account(&SyncOptions::default()).await.unwrap();

    assert!(engine.queue().pending().await.unwrap().is_empty());
    assert_eq!(server.flags_of("INBOX", 4), vec![Flag::Flagged]);
    let refreshed = server.fetches("flags");
    assert_eq!(refreshed.len(), 1);
    assert_eq!(refreshed[0].uids, vec![4]);
    let kept = &all(&store).await[0];
    assert!(has(kept, "\\Flagged"));
    assert!(has(kept, INBOX));
    assert!(has(kept, LATEST));
}

#[tokio::test]
async fn queued_change_on_a_placeholder_follows_its_body() {
    let server = FakeServer::new(false);
    server.folder("INBOX", &[]);
    server.add("INBOX", 4, message(4, None), &[]);
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&server, &store, SyncConfig::default(), "queue-placeholder");
    let headers_only = SyncOptions {
        bodies: false,
        ..SyncOptions::default()
    };
    engine.sync_account(&headers_only).await.unwrap();
    let placeholder = all(&store).await[0].clone();
    assert!(has(&placeholder, PARTIAL));
    engine
        .queue()
        .mark(&[placeholder.id], FlagDelta::add(["\\Flagged"]))
        .await
        .unwrap();

    // an IDLE-style folder pass fetches the body without draining
    let folders = engine.folders(&SyncOptions::default()).await.unwrap();
    engine
        .sync_folder(&folders[0], &SyncOptions::default())
        .await
        .unwrap();
    let full = all(&store).await;
    assert_eq!(full.len(), 1);
    assert!(!has(&full[0], PARTIAL));
    assert!(has(&full[0], "\\Flagged"));
    let pending = engine.queue().pending().await.unwrap();
    assert_eq!(pending[0].ids, vec![full[0].id]);

    engine.sync_account(&SyncOptions::default()).await.unwrap();

    assert!(engine.queue().pending().await.unwrap().is_empty());
    assert_eq!(server.flags_of("INBOX", 4), vec![Flag::Flagged]);
    assert!(has(&all(&store).await[0], "\\Flagged"));
}

#[tokio::test]
async fn queued_change_reaches_every_folder_copy() {
    let server = FakeServer::new(false);
    server.folder("INBOX", &[]);
    server.folder("Sent", &[MailboxAttribute::Sent]);
    server.add("INBOX", 1, message(1, None), &[]);
    server.add("Sent", 7, message(1, None), &[]);
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&server, &store, SyncConfig::default(), "queue-copies");
    engine.sync_account(&SyncOptions::default()).await.unwrap();
    let messages = all(&store).await;
    assert_eq!(messages.len(), 1);

    engine
        .queue()
        .mark(&[messages[0].id], FlagDelta::add(["\\Flagged"]))
        .await
        .unwrap();
    engine.sync_account(&SyncOptions::default()).await.unwrap();

    assert_eq!(server.flags_of("INBOX", 1), vec![Flag::Flagged]);
    assert_eq!(server.flags_of("Sent", 7), vec![Flag::Flagged]);
    assert_eq!(server.fetches("flags").len(), 2);
    assert!(has(&all(&store).await[0], "\\Flagged"));

    // nothing left on either copy to flip it back
    engine.sync_account(&SyncOptions::default()).await.unwrap();
    let kept = &all(&store).await[0];
    assert!(has(kept, "\\Flagged"));
    assert!(has(kept, INBOX));
    assert!(has(kept, SENT));
}

#[tokio::test]
async fn sync_notifies_updated_ids() {
    let server = FakeServer::new(false);
    server.folder("INBOX", &[]);
    server.add("INBOX", 1, message(1, None), &[]);
    server.add("INBOX", 2, message(2, Some(1)), &[]);
    let store = Arc::new(MemoryStore::new());
    let (notifier, mut updates) = ChannelNotifier::new();
    let lock_dir = std::env::temp_dir()
        .join("mailmirror-tests")
        .join(format!("notify-{}", std::process::id()));
    let engine = Arc::new(
        SyncEngine::new(
            Arc::clone(&store),
            FakeConnector(server.clone()),
            AccountConfig::new("imap.example.com", "bob"),
            SyncConfig::default(),
        )
        .lock_dir(lock_dir)
        .notifier(Arc::new(notifier)),
    );

    engine.sync_account(&SyncOptions::default()).await.unwrap();

    let update = updates.recv().await.unwrap();
    assert!(update.is_initial_sync);
    let stored: Vec<u64> = all(&store).await.iter().map(|m| m.id).collect();
    for id in stored {
        assert!(update.updated_ids.contains(&id));
    }
    let threads = engine.resolver().threads().await.unwrap();
    assert_eq!(threads.len(), 1);
}

#[tokio::test]
async fn cancelled_sync_stops_between_batches() {
    let server = FakeServer::new(false);
    server.folder("INBOX", &[]);
    for uid in 1..=20 {
        server.add("INBOX", uid, message(uid, None), &[]);
    }
    let store = Arc::new(MemoryStore::new());
    let (cancel, rx) = tokio::sync::watch::channel(true);
    let lock_dir = std::env::temp_dir()
        .join("mailmirror-tests")
        .join(format!("cancel-{}", std::process::id()));
    let engine = Arc::new(
        SyncEngine::new(
            Arc::clone(&store),
            FakeConnector(server.clone()),
            AccountConfig::new("imap.example.com", "bob"),
            SyncConfig::default().batch_size(5),
        )
        .lock_dir(lock_dir)
        .cancel_on(rx),
    );

    let result = engine.sync_account(&SyncOptions::default()).await;

    assert!(matches!(result, Err(mailmirror_core::Error::Cancelled)));
    assert!(server.fetches("header").is_empty());
    drop(cancel);
}
