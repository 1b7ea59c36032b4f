//! Conversation threads derived from stored headers.
//!
//! Threads are never stored. [`ThreadResolver::recompute`] scans the headers
//! of every message once, joins messages that share a Message-Id,
//! In-Reply-To, References, `X-Thread-ID` or bounce-embedded id with a
//! union-find, and writes back only two derived flags: `#latest` on the newest
//! member of each thread and `#dup` on messages whose Message-Id is taken.
//! Running it twice on an unchanged store changes nothing.
//!
//! Merging threads by hand is done with data: [`ThreadResolver::link_threads`]
//! appends a zero-body message referencing every member, and the next
//! recompute picks it up like any other reply.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mailmirror_mime::{
    NO_MESSAGE_ID, ParsedMessage, build_link_message, content_hash, dup_message_id,
};
use tokio::sync::Mutex;

use crate::flags::{DUP, LATEST, LINK, TRASH};
use crate::store::{FlagDelta, LocalId, MessageStore, Part, Query, StoredMessage};
use crate::{Error, Result};

/// Which threads a recompute rewrites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Every thread.
    All,
    /// Threads containing any of these messages.
    Ids(Vec<LocalId>),
}

/// Thread membership after a recompute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Threads {
    thread_of: BTreeMap<LocalId, LocalId>,
    members: BTreeMap<LocalId, Vec<LocalId>>,
    latest: BTreeMap<LocalId, LocalId>,
}

impl Threads {
    /// Thread id (smallest member id) of a message.
    #[must_use]
    pub fn thread_of(&self, id: LocalId) -> Option<LocalId> {
        self.thread_of.get(&id).copied()
    }

    /// Members of a thread, ascending.
    #[must_use]
    pub fn members(&self, thread: LocalId) -> &[LocalId] {
        self.members.get(&thread).map_or(&[], Vec::as_slice)
    }

    /// Member carrying `#latest`.
    #[must_use]
    pub fn latest(&self, thread: LocalId) -> Option<LocalId> {
        self.latest.get(&thread).copied()
    }

    /// Thread ids, ascending.
    pub fn ids(&self) -> impl Iterator<Item = LocalId> + '_ {
        self.members.keys().copied()
    }

    /// Number of threads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Outcome of [`ThreadResolver::recompute`].
#[derive(Debug, Clone, Default)]
pub struct Recompute {
    /// Every thread in the store.
    pub threads: Threads,
    /// Messages whose `#latest` or `#dup` flag changed.
    pub changed: Vec<LocalId>,
}

/// What a message's headers say about threading. Stored bytes never
/// change, so this is worked out once per message.
#[derive(Debug, Clone)]
struct HeaderFacts {
    message_id: String,
    links: Vec<String>,
    parent: Option<String>,
    remote: (u32, String),
    hash: String,
    bounce: bool,
}

impl HeaderFacts {
    fn parse(message: &StoredMessage) -> Option<Self> {
        let uid = u32::try_from(message.id).unwrap_or(u32::MAX);
        let parsed = match ParsedMessage::parse(&message.raw, uid, None, &HashMap::new()) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(id = message.id, error = %e, "skipping unreadable message");
                return None;
            }
        };
        let synthetic = &parsed.synthetic;
        let mut links: Vec<String> = parsed.thread_links().into_iter().map(String::from).collect();
        links.extend(synthetic.thread_id.clone());
        Some(Self {
            message_id: parsed.message_id.clone(),
            links,
            parent: parsed.parent_id.clone(),
            remote: (
                synthetic.remote_uid().unwrap_or(u32::MAX),
                synthetic.remote_folder.clone().unwrap_or_default(),
            ),
            hash: synthetic
                .sha256
                .clone()
                .unwrap_or_else(|| content_hash(&message.raw)),
            bounce: parsed
                .from
                .iter()
                .any(|a| a.addr.to_ascii_lowercase().starts_with("mailer-daemon@")),
        })
    }
}

struct Node {
    id: LocalId,
    arrived: DateTime<Utc>,
    flags: BTreeSet<String>,
    message_id: String,
    dup: bool,
    links: Vec<String>,
    parent: Option<String>,
    remote: (u32, String),
    hash: String,
}

impl Node {
    fn new(message: StoredMessage, facts: &HeaderFacts) -> Self {
        Self {
            id: message.id,
            arrived: message.arrived,
            flags: message.flags,
            message_id: facts.message_id.clone(),
            dup: false,
            links: facts.links.clone(),
            parent: facts.parent.clone(),
            remote: facts.remote.clone(),
            hash: facts.hash.clone(),
        }
    }

    /// The id other messages thread against; duplicates get a private one.
    fn effective_id(&self) -> String {
        if self.dup {
            dup_message_id(&self.hash, self.id)
        } else {
            self.message_id.clone()
        }
    }

    fn is_superseded(&self) -> bool {
        self.dup || self.flags.contains(LINK) || self.flags.contains("\\Draft") || self.flags.contains(TRASH)
    }
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        while self.parent[x] != root {
            let next = self.parent[x];
            self.parent[x] = root;
            x = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // lower index wins so roots are stable
            let (keep, drop) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[drop] = keep;
        }
    }
}

struct Graph {
    nodes: Vec<Node>,
    components: BTreeMap<usize, Vec<usize>>,
    root_of: Vec<usize>,
}

impl Graph {
    fn build(mut nodes: Vec<Node>, max_component: usize) -> Self {
        nodes.sort_by_key(|n| n.id);
        mark_duplicates(&mut nodes);

        let mut uf = UnionFind::new(nodes.len());
        let mut first_with_key: HashMap<String, usize> = HashMap::new();
        for (i, node) in nodes.iter().enumerate() {
            let own = node.effective_id();
            let keys = std::iter::once(own.as_str())
                .chain(node.links.iter().map(String::as_str))
                .filter(|k| *k != NO_MESSAGE_ID);
            for key in keys {
                match first_with_key.get(key) {
                    Some(&j) => uf.union(i, j),
                    None => {
                        first_with_key.insert(key.to_string(), i);
                    }
                }
            }
        }

        let root_of: Vec<usize> = (0..nodes.len()).map(|i| uf.find(i)).collect();
        let mut components: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (i, &root) in root_of.iter().enumerate() {
            components.entry(root).or_default().push(i);
        }

        let graph = Self {
            nodes,
            components,
            root_of,
        };
        graph.check(max_component);
        graph
    }

    /// Logs reply cycles and oversized threads. Both are still grouped.
    fn check(&self, max_component: usize) {
        let owner: HashMap<String, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.effective_id(), i))
            .collect();
        let parent: Vec<Option<usize>> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| owner.get(n.parent.as_deref()?).copied().filter(|&p| p != i))
            .collect();

        let mut cyclic = BTreeSet::new();
        let mut state = vec![0u8; self.nodes.len()];
        for start in 0..self.nodes.len() {
            let mut path = Vec::new();
            let mut at = Some(start);
            while let Some(i) = at {
                match state[i] {
                    0 => {
                        state[i] = 1;
                        path.push(i);
                        at = parent[i];
                    }
                    1 => {
                        cyclic.insert(self.root_of[i]);
                        break;
                    }
                    _ => break,
                }
            }
            for i in path {
                state[i] = 2;
            }
        }
        for root in cyclic {
            tracing::warn!(
                thread = self.nodes[root].id,
                "thread inconsistency: reply chain forms a cycle"
            );
        }
        for members in self.components.values() {
            if members.len() > max_component {
                tracing::warn!(
                    thread = self.nodes[members[0]].id,
                    size = members.len(),
                    max = max_component,
                    "thread inconsistency: thread exceeds size limit"
                );
            }
        }
    }

    fn thread_id(&self, index: usize) -> LocalId {
        self.components
            .get(&self.root_of[index])
            .and_then(|m| m.first())
            .map_or(self.nodes[index].id, |&i| self.nodes[i].id)
    }

    fn position(&self, id: LocalId) -> Option<usize> {
        self.nodes.binary_search_by_key(&id, |n| n.id).ok()
    }

    /// Newest member that is not superseded, else newest of all.
    fn latest(&self, members: &[usize]) -> Option<usize> {
        let newest = |candidates: &mut dyn Iterator<Item = usize>| {
            candidates.max_by_key(|&i| (self.nodes[i].arrived, self.nodes[i].id))
        };
        newest(&mut members.iter().copied().filter(|&i| !self.nodes[i].is_superseded()))
            .or_else(|| newest(&mut members.iter().copied()))
    }

    fn threads(&self) -> Threads {
        let mut threads = Threads::default();
        for members in self.components.values() {
            let thread = self.nodes[members[0]].id;
            let ids: Vec<LocalId> = members.iter().map(|&i| self.nodes[i].id).collect();
            for &id in &ids {
                threads.thread_of.insert(id, thread);
            }
            if let Some(latest) = self.latest(members) {
                threads.latest.insert(thread, self.nodes[latest].id);
            }
            threads.members.insert(thread, ids);
        }
        threads
    }
}

/// Among messages sharing a Message-Id, the smallest
/// `(remote uid, folder, local id)` keeps it; the rest are duplicates.
fn mark_duplicates(nodes: &mut [Node]) {
    let mut by_message_id: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, node) in nodes.iter().enumerate() {
        if node.message_id != NO_MESSAGE_ID {
            by_message_id.entry(node.message_id.as_str()).or_default().push(i);
        }
    }
    let mut dups = Vec::new();
    for group in by_message_id.values().filter(|g| g.len() > 1) {
        let canonical = group
            .iter()
            .copied()
            .min_by(|&a, &b| {
                let key = |i: usize| (nodes[i].remote.0, &nodes[i].remote.1, nodes[i].id);
                key(a).cmp(&key(b))
            });
        dups.extend(group.iter().copied().filter(|&i| Some(i) != canonical));
    }
    for i in dups {
        nodes[i].dup = true;
    }
}

/// Computes threads and keeps `#latest` / `#dup` in step with them.
#[derive(Debug)]
pub struct ThreadResolver<S> {
    store: Arc<S>,
    max_component: usize,
    // `None` marks a message whose headers could not be read
    facts: Mutex<HashMap<LocalId, Option<HeaderFacts>>>,
}

impl<S: MessageStore> ThreadResolver<S> {
    /// Resolver over `store`. Threads above `max_component` members are
    /// reported as inconsistent.
    #[must_use]
    pub fn new(store: Arc<S>, max_component: usize) -> Self {
        Self {
            store,
            max_component,
            facts: Mutex::new(HashMap::new()),
        }
    }

    /// Builds the thread graph. Headers are parsed only for messages not
    /// seen before; flags and arrival times are read fresh every time.
    async fn graph(&self) -> Result<Graph> {
        let ids = self.store.search(&Query::All).await?;
        let mut facts = self.facts.lock().await;
        let present: HashSet<LocalId> = ids.iter().copied().collect();
        facts.retain(|id, _| present.contains(id));

        let unseen: Vec<LocalId> = ids.iter().copied().filter(|id| !facts.contains_key(id)).collect();
        let mut bounces = Vec::new();
        for message in self.store.fetch(&unseen, Part::Header).await? {
            let parsed = HeaderFacts::parse(&message);
            if parsed.as_ref().is_some_and(|f| f.bounce) {
                bounces.push(message.id);
            }
            facts.insert(message.id, parsed);
        }

        // bounces are threaded by the Message-ID quoted in their body
        for message in self.store.fetch(&bounces, Part::Full).await? {
            let uid = u32::try_from(message.id).unwrap_or(u32::MAX);
            let Ok(parsed) = ParsedMessage::parse(&message.raw, uid, None, &HashMap::new()) else {
                continue;
            };
            if let (Some(embedded), Some(Some(known))) =
                (parsed.embedded_message_id, facts.get_mut(&message.id))
            {
                known.links.push(embedded);
            }
        }

        let nodes: Vec<Node> = self
            .store
            .fetch(&ids, Part::Flags)
            .await?
            .into_iter()
            .filter_map(|message| {
                let known = facts.get(&message.id)?.as_ref()?;
                Some(Node::new(message, known))
            })
            .collect();
        drop(facts);
        Ok(Graph::build(nodes, self.max_component))
    }

    /// Recomputes threads and rewrites `#latest` and `#dup` for the threads
    /// in `scope`. Idempotent.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn recompute(&self, scope: Scope) -> Result<Recompute> {
        let graph = self.graph().await?;
        let roots: BTreeSet<usize> = match &scope {
            Scope::All => graph.components.keys().copied().collect(),
            Scope::Ids(ids) => ids
                .iter()
                .filter_map(|&id| graph.position(id))
                .map(|i| graph.root_of[i])
                .collect(),
        };

        let mut add_latest = Vec::new();
        let mut drop_latest = Vec::new();
        let mut add_dup = Vec::new();
        let mut drop_dup = Vec::new();
        for root in roots {
            let Some(members) = graph.components.get(&root) else {
                continue;
            };
            let latest = graph.latest(members);
            for &i in members {
                let node = &graph.nodes[i];
                let want_latest = Some(i) == latest;
                match (want_latest, node.flags.contains(LATEST)) {
                    (true, false) => add_latest.push(node.id),
                    (false, true) => drop_latest.push(node.id),
                    _ => {}
                }
                match (node.dup, node.flags.contains(DUP)) {
                    (true, false) => add_dup.push(node.id),
                    (false, true) => drop_dup.push(node.id),
                    _ => {}
                }
            }
        }

        let changes = [
            (&add_latest, FlagDelta::add([LATEST])),
            (&drop_latest, FlagDelta::remove([LATEST])),
            (&add_dup, FlagDelta::add([DUP])),
            (&drop_dup, FlagDelta::remove([DUP])),
        ];
        for (ids, delta) in &changes {
            if !ids.is_empty() {
                self.store.store(ids, delta).await?;
            }
        }

        let mut changed: Vec<LocalId> = changes.iter().flat_map(|(ids, _)| ids.iter().copied()).collect();
        changed.sort_unstable();
        changed.dedup();
        tracing::debug!(
            threads = graph.components.len(),
            changed = changed.len(),
            ?scope,
            "threads recomputed"
        );
        Ok(Recompute {
            threads: graph.threads(),
            changed,
        })
    }

    /// Joins the threads of `ids` into one.
    ///
    /// Appends a link message (flagged `#link` and `\Seen`) referencing every
    /// member of the affected threads, removes the link messages those threads
    /// already had, and recomputes. Returns the new link message's id.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown id, otherwise store errors.
    pub async fn link_threads(&self, ids: &[LocalId]) -> Result<LocalId> {
        let graph = self.graph().await?;
        let mut roots = BTreeSet::new();
        for &id in ids {
            let i = graph
                .position(id)
                .ok_or_else(|| Error::NotFound(format!("message {id}")))?;
            roots.insert(graph.root_of[i]);
        }

        let mut references = Vec::new();
        let mut old_links = Vec::new();
        for root in &roots {
            for &i in graph.components.get(root).map_or(&[][..], Vec::as_slice) {
                let node = &graph.nodes[i];
                if node.flags.contains(LINK) {
                    old_links.push(node.id);
                } else if node.message_id == NO_MESSAGE_ID {
                    tracing::warn!(id = node.id, "message without Message-Id cannot be linked");
                } else {
                    references.push(node.effective_id());
                }
            }
        }
        references.dedup();

        let raw = build_link_message(&references);
        let flags: BTreeSet<String> = [LINK, "\\Seen"].iter().map(ToString::to_string).collect();
        let link = self.store.append(&flags, Utc::now(), &raw).await?;
        if !old_links.is_empty() {
            self.store.expunge(&old_links).await?;
        }
        tracing::info!(
            link,
            threads = roots.len(),
            replaced = old_links.len(),
            "threads linked"
        );

        let mut scope: Vec<LocalId> = ids.to_vec();
        scope.push(link);
        self.recompute(Scope::Ids(scope)).await?;
        Ok(link)
    }

    /// Thread id of every message, without touching flags.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn threads(&self) -> Result<Threads> {
        Ok(self.graph().await?.threads())
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
    use chrono::TimeZone;
    use proptest::prelude::*;

    use super::*;
    use crate::store::MemoryStore;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    async fn put(store: &MemoryStore, secs: i64, headers: &str, flags: &[&str]) -> LocalId {
        let raw = format!("{headers}\r\n\r\nbody\r\n");
        let flags = flags.iter().map(ToString::to_string).collect();
        store.append(&flags, at(secs), raw.as_bytes()).await.unwrap()
    }

    async fn flagged(store: &MemoryStore, flag: &str) -> Vec<LocalId> {
        store.search(&Query::flag(flag)).await.unwrap()
    }

    fn resolver(store: &Arc<MemoryStore>) -> ThreadResolver<MemoryStore> {
        ThreadResolver::new(Arc::clone(store), 1000)
    }

    #[tokio::test]
    async fn reply_joins_thread_and_becomes_latest() {
        let store = Arc::new(MemoryStore::new());
        let first = put(&store, 0, "Message-Id: <101@mlr>\r\nSubject: hi", &[]).await;
        let reply = put(
            &store,
            60,
            "Message-Id: <102@mlr>\r\nReferences: <101@mlr>\r\nSubject: Re: hi",
            &[],
        )
        .await;

        let result = resolver(&store).recompute(Scope::All).await.unwrap();
        let threads = &result.threads;
        assert_eq!(threads.thread_of(first), Some(first));
        assert_eq!(threads.thread_of(reply), Some(first));
        assert_eq!(threads.latest(first), Some(reply));
        assert_eq!(flagged(&store, LATEST).await, vec![reply]);
    }

    #[tokio::test]
    async fn recompute_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        put(&store, 0, "Message-Id: <a@x>", &[]).await;
        put(&store, 5, "Message-Id: <b@x>\r\nIn-Reply-To: <a@x>", &[]).await;
        put(&store, 9, "Message-Id: <c@x>", &[]).await;
        let r = resolver(&store);

        let first = r.recompute(Scope::All).await.unwrap();
        assert!(!first.changed.is_empty());
        let second = r.recompute(Scope::All).await.unwrap();
        assert!(second.changed.is_empty());
        assert_eq!(first.threads, second.threads);
    }

    #[tokio::test]
    async fn stale_latest_is_cleared() {
        let store = Arc::new(MemoryStore::new());
        let old = put(&store, 0, "Message-Id: <a@x>", &[LATEST]).await;
        let new = put(&store, 10, "Message-Id: <b@x>\r\nReferences: <a@x>", &[LATEST]).await;
        resolver(&store).recompute(Scope::All).await.unwrap();
        assert_eq!(flagged(&store, LATEST).await, vec![new]);
        assert!(old < new);
    }

    #[tokio::test]
    async fn equal_arrival_prefers_larger_id() {
        let store = Arc::new(MemoryStore::new());
        put(&store, 0, "Message-Id: <a@x>", &[]).await;
        let b = put(&store, 0, "Message-Id: <b@x>\r\nReferences: <a@x>", &[]).await;
        resolver(&store).recompute(Scope::All).await.unwrap();
        assert_eq!(flagged(&store, LATEST).await, vec![b]);
    }

    #[tokio::test]
    async fn superseded_members_are_not_latest_unless_alone() {
        let store = Arc::new(MemoryStore::new());
        let a = put(&store, 0, "Message-Id: <a@x>", &[]).await;
        put(&store, 10, "Message-Id: <b@x>\r\nReferences: <a@x>", &["\\Draft"]).await;
        put(&store, 20, "Message-Id: <c@x>\r\nReferences: <a@x>", &[TRASH]).await;
        let lone = put(&store, 30, "Message-Id: <d@x>", &["\\Draft"]).await;
        resolver(&store).recompute(Scope::All).await.unwrap();
        assert_eq!(flagged(&store, LATEST).await, vec![a, lone]);
    }

    #[tokio::test]
    async fn duplicate_message_id_lowest_remote_uid_wins() {
        let store = Arc::new(MemoryStore::new());
        let later = put(
            &store,
            0,
            "X-UID: <20>\r\nX-Remote-Folder: <INBOX>\r\nMessage-Id: <same@x>\r\nSubject: one",
            &[],
        )
        .await;
        let earlier = put(
            &store,
            5,
            "X-UID: <3>\r\nX-Remote-Folder: <INBOX>\r\nMessage-Id: <same@x>\r\nSubject: two",
            &[],
        )
        .await;
        let reply = put(&store, 9, "Message-Id: <r@x>\r\nReferences: <same@x>", &[]).await;

        let result = resolver(&store).recompute(Scope::All).await.unwrap();
        assert_eq!(flagged(&store, DUP).await, vec![later]);
        assert_eq!(result.threads.thread_of(reply), Some(earlier));
        assert_ne!(result.threads.thread_of(later), Some(earlier));
    }

    #[tokio::test]
    async fn thread_id_header_and_bounce_join_threads() {
        let store = Arc::new(MemoryStore::new());
        let a = put(&store, 0, "X-Thread-ID: <7@mailmirror.link>\r\nMessage-Id: <a@x>", &[]).await;
        let b = put(&store, 1, "X-Thread-ID: <7@mailmirror.link>\r\nMessage-Id: <b@x>", &[]).await;
        let raw = "From: MAILER-DAEMON@example.com\r\nMessage-Id: <bounce@x>\r\n\r\n\
                   Delivery failed.\r\n\r\nMessage-ID: <a@x>\r\nSubject: hi\r\n";
        let bounce = store
            .append(&BTreeSet::new(), at(2), raw.as_bytes())
            .await
            .unwrap();

        let threads = resolver(&store).threads().await.unwrap();
        assert_eq!(threads.thread_of(b), Some(a));
        assert_eq!(threads.thread_of(bounce), Some(a));
        assert_eq!(threads.len(), 1);
    }

    #[tokio::test]
    async fn link_threads_merges_and_replaces_old_links() {
        let store = Arc::new(MemoryStore::new());
        let a = put(&store, 0, "Message-Id: <a@x>", &[]).await;
        let b = put(&store, 50, "Message-Id: <b@x>", &[]).await;
        let c = put(&store, 20, "Message-Id: <c@x>", &[]).await;
        let r = resolver(&store);

        let first_link = r.link_threads(&[a, b]).await.unwrap();
        let threads = r.threads().await.unwrap();
        assert_eq!(threads.thread_of(b), Some(a));
        assert_eq!(threads.latest(a), Some(b));
        assert_eq!(flagged(&store, LINK).await, vec![first_link]);

        let second_link = r.link_threads(&[b, c]).await.unwrap();
        let threads = r.threads().await.unwrap();
        assert_eq!(flagged(&store, LINK).await, vec![second_link]);
        assert_eq!(threads.members(a), &[a, b, c, second_link]);
        assert_eq!(threads.latest(a), Some(b));
    }

    #[tokio::test]
    async fn link_unknown_id_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let err = resolver(&store).link_threads(&[42]).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn reference_cycle_is_tolerated() {
        let store = Arc::new(MemoryStore::new());
        let a = put(&store, 0, "Message-Id: <a@x>\r\nReferences: <b@x>", &[]).await;
        let b = put(&store, 1, "Message-Id: <b@x>\r\nReferences: <a@x>", &[]).await;
        let result = resolver(&store).recompute(Scope::All).await.unwrap();
        assert_eq!(result.threads.thread_of(b), Some(a));
        assert_eq!(flagged(&store, LATEST).await, vec![b]);
    }

    #[tokio::test]
    async fn scoped_recompute_leaves_other_threads_alone() {
        let store = Arc::new(MemoryStore::new());
        let a = put(&store, 0, "Message-Id: <a@x>", &[]).await;
        let b = put(&store, 0, "Message-Id: <b@x>", &[]).await;
        resolver(&store).recompute(Scope::Ids(vec![a])).await.unwrap();
        assert_eq!(flagged(&store, LATEST).await, vec![a]);
        assert!(b > a);
    }

    #[tokio::test]
    async fn parsed_headers_follow_appends_and_expunges() {
        let store = Arc::new(MemoryStore::new());
        let a = put(&store, 0, "Message-Id: <a@x>", &[]).await;
        let r = resolver(&store);
        assert_eq!(r.threads().await.unwrap().len(), 1);

        let b = put(&store, 5, "Message-Id: <b@x>\r\nIn-Reply-To: <a@x>", &[]).await;
        let result = r.recompute(Scope::Ids(vec![b])).await.unwrap();
        assert_eq!(result.threads.thread_of(b), Some(a));
        assert_eq!(flagged(&store, LATEST).await, vec![b]);
        assert_eq!(r.facts.lock().await.len(), 2);

        // flags are read fresh even for cached headers
        store.store(&[b], &FlagDelta::add(["\\Draft"])).await.unwrap();
        r.recompute(Scope::All).await.unwrap();
        assert_eq!(flagged(&store, LATEST).await, vec![a]);

        store.expunge(&[b]).await.unwrap();
        let threads = r.threads().await.unwrap();
        assert_eq!(threads.thread_of(b), None);
        assert_eq!(threads.members(a), &[a]);
        assert_eq!(r.facts.lock().await.len(), 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn recompute_twice_changes_nothing(
            messages in prop::collection::vec((0u8..12, prop::option::of(0u8..12), 0i64..5, any::<bool>()), 1..20)
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let store = Arc::new(MemoryStore::new());
                for (own, parent, secs, draft) in &messages {
                    let mut headers = format!("Message-Id: <{own}@p>");
                    if let Some(parent) = parent {
                        headers.push_str(&format!("\r\nReferences: <{parent}@p>"));
                    }
                    let flags: &[&str] = if *draft { &["\\Draft"] } else { &[] };
                    put(&store, *secs, &headers, flags).await;
                }
                let r = resolver(&store);
                let first = r.recompute(Scope::All).await.unwrap();
                let second = r.recompute(Scope::All).await.unwrap();
                prop_assert!(second.changed.is_empty());
                prop_assert_eq!(&first.threads, &second.threads);
                let latest = flagged(&store, LATEST).await;
                prop_assert_eq!(latest.len(), first.threads.len());
                Ok(())
            })?;
        }
    }
}
