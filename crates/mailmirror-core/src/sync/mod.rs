//! Incremental sync of one account into the local store.
//!
//! A folder pass runs in a fixed order:
//!
//! 1. SELECT and compare UIDVALIDITY with the checkpoint
//! 2. fetch headers of new UIDs, storing each as a `#partial` placeholder
//! 3. pull flag changes (CONDSTORE) and reconcile local flags
//! 4. recompute threads of what changed
//! 5. fetch bodies smallest first and replace the placeholders
//!
//! [`SyncEngine::sync_account`] runs that for every folder in parallel under
//! the account lock, after pushing queued local flag changes.

mod fetch;
mod idle;
mod labels;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use mailmirror_imap::{ListResponse, Mailbox, MailboxAttribute, SearchCriteria, Uid};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard, Semaphore, watch};
use tokio::task::JoinSet;

pub use idle::IdleWatcher;

use crate::config::{AccountConfig, SyncConfig};
use crate::flags::{INBOX, SENT, SPAM, TRASH, TagMap};
use crate::lock::{AccountLock, LockOptions};
use crate::notify::{Notifier, NullNotifier, Update};
use crate::queue::FlagQueue;
use crate::remote::{Connect, Remote};
use crate::store::{LocalId, MessageStore};
use crate::threads::{Scope, ThreadResolver};
use crate::uidmap::{Checkpoint, MailboxKey, UidMapper};
use crate::{Error, Result};

/// What a sync pass does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Fetch bodies after headers. Without it only placeholders are stored.
    pub bodies: bool,
    /// Restrict the pass to folders whose tag or name is listed. Empty means
    /// every folder.
    pub only_tags: Vec<String>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            bodies: true,
            only_tags: Vec::new(),
        }
    }
}

/// A remote folder to mirror and the tag its messages get.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderSpec {
    /// Remote mailbox.
    pub mailbox: Mailbox,
    /// Tag added to every message found here (`#spam`, `#inbox`, ...).
    pub tag: Option<String>,
}

impl FolderSpec {
    /// Folder with an optional tag.
    #[must_use]
    pub fn new(mailbox: impl Into<String>, tag: Option<&str>) -> Self {
        Self {
            mailbox: Mailbox::new(mailbox),
            tag: tag.map(ToString::to_string),
        }
    }

    /// Remote name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.mailbox.as_str()
    }

    fn selected_by(&self, only: &[String]) -> bool {
        only.is_empty()
            || only
                .iter()
                .any(|t| Some(t) == self.tag.as_ref() || t.as_str() == self.name())
    }
}

/// Folders worth mirroring.
///
/// Gmail: All Mail, Spam and Trash. Elsewhere: the `\All` folder if there is
/// one, otherwise INBOX and the `\Sent` folder.
#[must_use]
pub fn select_folders(list: &[ListResponse], gmail: bool) -> Vec<FolderSpec> {
    let selectable = || list.iter().filter(|l| l.is_selectable());
    let find = |attr: MailboxAttribute| selectable().find(|l| l.has(&attr));
    let spec = |l: &ListResponse, tag: Option<&str>| FolderSpec {
        mailbox: l.mailbox.clone(),
        tag: tag.map(ToString::to_string),
    };

    if gmail {
        return [
            (MailboxAttribute::All, None),
            (MailboxAttribute::Junk, Some(SPAM)),
            (MailboxAttribute::Trash, Some(TRASH)),
        ]
        .into_iter()
        .filter_map(|(attr, tag)| find(attr).map(|l| spec(l, tag)))
        .collect();
    }

    if let Some(all) = find(MailboxAttribute::All) {
        return vec![spec(all, None)];
    }
    let mut folders: Vec<FolderSpec> = selectable()
        .find(|l| l.mailbox.as_str().eq_ignore_ascii_case("INBOX"))
        .map(|l| spec(l, Some(INBOX)))
        .into_iter()
        .collect();
    if folders.is_empty() {
        folders.push(FolderSpec::new("INBOX", Some(INBOX)));
    }
    folders.extend(find(MailboxAttribute::Sent).map(|l| spec(l, Some(SENT))));
    folders
}

/// Outcome of one folder pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Remote folder.
    pub folder: String,
    /// Messages stored for the first time.
    pub new: usize,
    /// Remote copies folded into an existing local message.
    pub duplicates: usize,
    /// Batches given up on after retries.
    pub skipped_batches: usize,
    /// Local ids added or changed, ascending.
    pub updated_ids: Vec<LocalId>,
    /// The folder was scanned from UID 1.
    pub initial: bool,
}

impl SyncReport {
    fn new(folder: &str) -> Self {
        Self {
            folder: folder.to_string(),
            ..Self::default()
        }
    }

    fn touch(&mut self, ids: impl IntoIterator<Item = LocalId>) {
        self.updated_ids.extend(ids);
        self.updated_ids.sort_unstable();
        self.updated_ids.dedup();
    }
}

/// State shared by the stages of one folder pass.
struct Pass<'a> {
    spec: &'a FolderSpec,
    key: MailboxKey,
    uidvalidity: u32,
    gmail: bool,
}

/// Mirrors one account into a local store.
pub struct SyncEngine<S, C> {
    store: Arc<S>,
    connector: Arc<C>,
    account: AccountConfig,
    config: SyncConfig,
    mapper: UidMapper<S>,
    resolver: ThreadResolver<S>,
    queue: FlagQueue<S>,
    tags: Mutex<Option<TagMap>>,
    notifier: Arc<dyn Notifier>,
    lock_dir: PathBuf,
    cancel: Option<watch::Receiver<bool>>,
}

impl<S, C> std::fmt::Debug for SyncEngine<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("account", &self.account.key())
            .field("lock_dir", &self.lock_dir)
            .finish_non_exhaustive()
    }
}

impl<S: MessageStore, C: Connect> SyncEngine<S, C> {
    /// Engine for `account`, writing into `store`.
    #[must_use]
    pub fn new(store: Arc<S>, connector: C, account: AccountConfig, config: SyncConfig) -> Self {
        Self {
            mapper: UidMapper::new(Arc::clone(&store)),
            resolver: ThreadResolver::new(Arc::clone(&store), config.max_component),
            queue: FlagQueue::new(Arc::clone(&store)),
            store,
            connector: Arc::new(connector),
            account,
            config,
            tags: Mutex::new(None),
            notifier: Arc::new(NullNotifier),
            lock_dir: std::env::temp_dir().join("mailmirror"),
            cancel: None,
        }
    }

    /// Sets where account lock files live.
    #[must_use]
    pub fn lock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = dir.into();
        self
    }

    /// Sets the update sink.
    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Stops running passes between batches once `cancel` turns true.
    #[must_use]
    pub fn cancel_on(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// The local store.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// UID checkpoints and duplicate index.
    #[must_use]
    pub const fn mapper(&self) -> &UidMapper<S> {
        &self.mapper
    }

    /// Thread computation over the store.
    #[must_use]
    pub const fn resolver(&self) -> &ThreadResolver<S> {
        &self.resolver
    }

    /// Local flag changes waiting for the server.
    #[must_use]
    pub const fn queue(&self) -> &FlagQueue<S> {
        &self.queue
    }

    /// Sync settings.
    #[must_use]
    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn check_cancel(&self) -> Result<()> {
        match &self.cancel {
            Some(rx) if *rx.borrow() => Err(Error::Cancelled),
            _ => Ok(()),
        }
    }

    async fn lock(&self) -> Result<AccountLock> {
        AccountLock::acquire(
            &self.lock_dir,
            &self.account.key(),
            LockOptions::new(self.config.lock_timeout),
        )
        .await
    }

    /// Locks the label map, loading it on first use. Take it after the
    /// duplicate index when both are needed.
    async fn tags(&self) -> Result<MappedMutexGuard<'_, TagMap>> {
        let mut guard = self.tags.lock().await;
        if guard.is_none() {
            *guard = Some(TagMap::load(&*self.store).await?);
        }
        Ok(MutexGuard::map(guard, |t| t.get_or_insert_with(TagMap::default)))
    }

    async fn save_tags(&self) -> Result<()> {
        if let Some(tags) = self.tags.lock().await.as_mut() {
            tags.save(&*self.store).await?;
        }
        Ok(())
    }

    /// Folders this account mirrors, filtered like [`SyncOptions::only_tags`].
    ///
    /// # Errors
    ///
    /// Connection and auth errors.
    pub async fn folders(&self, options: &SyncOptions) -> Result<Vec<FolderSpec>> {
        let mut remote = self.connector.connect().await?;
        let list = remote.list().await?;
        Ok(select_folders(&list, remote.is_gmail())
            .into_iter()
            .filter(|f| f.selected_by(&options.only_tags))
            .collect())
    }

    /// Syncs every mirrored folder of the account, then recomputes all
    /// threads and notifies.
    ///
    /// # Errors
    ///
    /// [`Error::Locked`] if another sync holds the account,
    /// [`Error::Auth`] if the server rejects the login and
    /// [`Error::Cancelled`] on cancellation. Failures of single folders are
    /// logged and do not stop the others.
    pub async fn sync_account(self: &Arc<Self>, options: &SyncOptions) -> Result<Vec<SyncReport>> {
        let _lock = self.lock().await?;
        self.mapper.invalidate().await;
        *self.tags.lock().await = None;

        // Connect and find the folders
        let mut remote = self.connector.connect().await?;
        let gmail = remote.is_gmail();
        let list = remote.list().await?;
        let all_folders = select_folders(&list, gmail);
        let folders: Vec<FolderSpec> = all_folders
            .iter()
            .filter(|f| f.selected_by(&options.only_tags))
            .cloned()
            .collect();
        tracing::info!(
            account = %self.account.key(),
            gmail,
            folders = ?folders.iter().map(FolderSpec::name).collect::<Vec<_>>(),
            "account sync started"
        );

        // Push local changes before anything is read back
        let mut updated: BTreeSet<LocalId> = BTreeSet::new();
        let tags = self.tags().await?.clone();
        let affected = self.queue.drain(&self.mapper, &mut remote, &tags, gmail).await?;
        for (folder, uids) in affected {
            let spec = all_folders
                .iter()
                .find(|f| f.name() == folder)
                .cloned()
                .unwrap_or_else(|| FolderSpec::new(folder.as_str(), None));
            let uids: Vec<Uid> = uids.into_iter().collect();
            updated.extend(self.refresh_flags(&mut remote, &spec, &uids, gmail).await?);
        }
        drop(remote);

        // One task and connection per folder
        let permits = Arc::new(Semaphore::new(self.config.parallel_folders.max(1)));
        let mut tasks = JoinSet::new();
        for spec in folders {
            let engine = Arc::clone(self);
            let permits = Arc::clone(&permits);
            let options = options.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let result = async {
                    let mut remote = engine.connector.connect().await?;
                    engine.sync_folder_on(&mut remote, &spec, &options).await
                }
                .await;
                (spec, result)
            });
        }

        let mut reports = Vec::new();
        let mut initial = false;
        while let Some(joined) = tasks.join_next().await {
            let (spec, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    tracing::error!(error = %e, "folder task failed");
                    continue;
                }
            };
            match result {
                Ok(report) => {
                    initial |= report.initial;
                    updated.extend(report.updated_ids.iter().copied());
                    reports.push(report);
                }
                Err(e) if e.is_auth() || matches!(e, Error::Cancelled) => {
                    tasks.abort_all();
                    self.save_tags().await?;
                    return Err(e);
                }
                Err(e) => {
                    tracing::error!(folder = %spec.name(), error = %e, "folder sync failed");
                }
            }
        }
        self.save_tags().await?;

        // Threads across all folders
        let recompute = self.resolver.recompute(Scope::All).await?;
        updated.extend(recompute.changed);

        let updated_ids: Vec<LocalId> = updated.into_iter().collect();
        tracing::info!(
            account = %self.account.key(),
            folders = reports.len(),
            updated = updated_ids.len(),
            threads = recompute.threads.len(),
            "account sync finished"
        );
        self.notifier.notify(Update {
            updated_ids,
            is_initial_sync: initial,
        });
        Ok(reports)
    }

    /// Syncs one folder on a fresh connection and recomputes the threads it
    /// touched. Fails with [`Error::Locked`] at once while the account is
    /// being synced.
    ///
    /// # Errors
    ///
    /// Lock, connection, auth and store errors.
    pub async fn sync_folder(&self, spec: &FolderSpec, options: &SyncOptions) -> Result<SyncReport> {
        let _lock = self.lock().await?;
        let mut remote = self.connector.connect().await?;
        let mut report = self.sync_folder_on(&mut remote, spec, options).await?;
        self.save_tags().await?;

        if !report.updated_ids.is_empty() {
            let recompute = self
                .resolver
                .recompute(Scope::Ids(report.updated_ids.clone()))
                .await?;
            report.touch(recompute.changed);
        }
        self.notifier.notify(Update {
            updated_ids: report.updated_ids.clone(),
            is_initial_sync: report.initial,
        });
        Ok(report)
    }

    /// One folder pass on an open connection. Takes no lock.
    async fn sync_folder_on<R: Remote>(
        &self,
        remote: &mut R,
        spec: &FolderSpec,
        options: &SyncOptions,
    ) -> Result<SyncReport> {
        let key = MailboxKey::new(self.account.key(), spec.name());
        let mut report = SyncReport::new(spec.name());

        let status = remote.select(&spec.mailbox, true).await?;
        let uidvalidity = status.uid_validity.map_or(0, |v| v.get());
        let uid_next = status.uid_next_or_default();
        let resume = self.mapper.resume(&key, uidvalidity).await?;
        report.initial = resume.is_initial();
        let pass = Pass {
            spec,
            key: key.clone(),
            uidvalidity,
            gmail: remote.is_gmail(),
        };
        if resume.reset {
            // placeholders of the old epoch can never get their body
            self.discard_placeholders(&pass).await?;
            self.mapper.invalidate().await;
        }

        // New UIDs
        let uids: Vec<Uid> = if resume.start < uid_next || status.uid_next.is_none() {
            let start = Uid::new(resume.start.max(1)).ok_or_else(|| Error::Malformed("UID 0".into()))?;
            let mut found = remote.search(&SearchCriteria::UidFrom(start)).await?;
            // `n:*` always matches the highest UID, even below n
            found.retain(|u| u.get() >= resume.start);
            found.sort_unstable();
            found
        } else {
            Vec::new()
        };
        tracing::info!(
            mailbox = %key,
            start = resume.start,
            uid_next,
            new = uids.len(),
            "folder selected"
        );

        let last_seen = self.fetch_headers(remote, &pass, &uids, &mut report).await?;
        if report.skipped_batches == 0 {
            let uidnext = last_seen.map_or(uid_next, |u| uid_next.max(u.get().saturating_add(1)));
            self.mapper
                .advance(&key, Checkpoint { uidvalidity, uidnext })
                .await?;
        } else {
            tracing::warn!(
                mailbox = %key,
                skipped = report.skipped_batches,
                "checkpoint held back after skipped batches"
            );
        }

        // Labels
        if !resume.is_initial() {
            let changed = self.pull_flag_changes(remote, &pass, &status).await?;
            report.touch(changed);
        } else if let Some(modseq) = status.highest_mod_seq {
            self.mapper.set_modseq(&key, modseq).await?;
        }

        // Threads for what the header pass and labels touched
        if !report.updated_ids.is_empty() {
            let recompute = self
                .resolver
                .recompute(Scope::Ids(report.updated_ids.clone()))
                .await?;
            report.touch(recompute.changed);
        }

        if options.bodies {
            self.fetch_bodies(remote, &pass, &mut report).await?;
        }

        tracing::info!(
            mailbox = %key,
            new = report.new,
            duplicates = report.duplicates,
            skipped_batches = report.skipped_batches,
            updated = report.updated_ids.len(),
            "folder synced"
        );
        Ok(report)
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

    fn listed(name: &str, attrs: &[MailboxAttribute]) -> ListResponse {
        ListResponse {
            attributes: attrs.to_vec(),
            delimiter: Some('/'),
            mailbox: Mailbox::new(name),
        }
    }

    #[test]
    fn gmail_folders() {
        let list = vec![
            listed("INBOX", &[]),
            listed("[Gmail]/All Mail", &[MailboxAttribute::All]),
            listed("[Gmail]/Spam", &[MailboxAttribute::Junk]),
            listed("[Gmail]/Trash", &[MailboxAttribute::Trash]),
            listed("[Gmail]/Sent Mail", &[MailboxAttribute::Sent]),
        ];
        let folders = select_folders(&list, true);
        assert_eq!(
            folders,
            vec![
                FolderSpec::new("[Gmail]/All Mail", None),
                FolderSpec::new("[Gmail]/Spam", Some("#spam")),
                FolderSpec::new("[Gmail]/Trash", Some("#trash")),
            ]
        );
    }

    #[test]
    fn plain_server_folders() {
        let list = vec![
            listed("INBOX", &[]),
            listed("Sent", &[MailboxAttribute::Sent]),
            listed("Junk", &[MailboxAttribute::Junk]),
            listed("Archive", &[MailboxAttribute::NoSelect]),
        ];
        let folders = select_folders(&list, false);
        assert_eq!(
            folders,
            vec![
                FolderSpec::new("INBOX", Some("#inbox")),
                FolderSpec::new("Sent", Some("#sent")),
            ]
        );

        let with_all = vec![listed("INBOX", &[]), listed("All", &[MailboxAttribute::All])];
        assert_eq!(select_folders(&with_all, false), vec![FolderSpec::new("All", None)]);
    }

    #[test]
    fn only_tags_filter() {
        let spam = FolderSpec::new("[Gmail]/Spam", Some("#spam"));
        assert!(spam.selected_by(&[]));
        assert!(spam.selected_by(&["#spam".into()]));
        assert!(spam.selected_by(&["[Gmail]/Spam".into()]));
        assert!(!spam.selected_by(&["#inbox".into()]));
    }

    #[test]
    fn report_touch_keeps_ids_sorted_and_unique() {
        let mut report = SyncReport::new("INBOX");
        report.touch([5, 2]);
        report.touch([2, 9]);
        assert_eq!(report.updated_ids, vec![2, 5, 9]);
    }
}
