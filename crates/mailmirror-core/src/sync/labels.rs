//! Remote flags and labels onto local messages.

use std::collections::{BTreeSet, HashMap};

use mailmirror_imap::{Budget, FetchFields, FetchRow, MailboxStatus, Uid};

use super::{FolderSpec, Pass, SyncEngine};
use crate::flags::{FOLDER_TAGS, MANAGED, reconcile, remote_tags};
use crate::remote::{Connect, Remote};
use crate::store::{FlagDelta, LocalId, MessageStore, Part};
use crate::Result;

impl<S: MessageStore, C: Connect> SyncEngine<S, C> {
    /// Pulls flag changes since the stored MODSEQ and applies the managed
    /// subset. Servers without CONDSTORE are left alone.
    pub(super) async fn pull_flag_changes<R: Remote>(
        &self,
        remote: &mut R,
        pass: &Pass<'_>,
        status: &MailboxStatus,
    ) -> Result<Vec<LocalId>> {
        let Some(highest) = status.highest_mod_seq else {
            return Ok(Vec::new());
        };
        if !remote.supports_condstore() {
            return Ok(Vec::new());
        }
        let stored = self.mapper.modseq(&pass.key).await?;
        let mut changed = Vec::new();
        if stored > 0 && stored < highest {
            let rows = remote.changed_since(stored).await?;
            tracing::debug!(mailbox = %pass.key, since = stored, rows = rows.len(), "flag changes");
            changed = self
                .apply_remote_flags(&rows, pass.spec, pass.gmail, Some(&MANAGED[..]))
                .await?;
        }
        if stored != highest {
            self.mapper.set_modseq(&pass.key, highest).await?;
        }
        Ok(changed)
    }

    /// Re-reads flags of `uids` after a queue drain. The server's answer
    /// replaces local flags outright.
    pub(super) async fn refresh_flags<R: Remote>(
        &self,
        remote: &mut R,
        spec: &FolderSpec,
        uids: &[Uid],
        gmail: bool,
    ) -> Result<Vec<LocalId>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        remote.select(&spec.mailbox, true).await?;
        let fields = FetchFields::new().flags().gmail(gmail);
        let mut changed = Vec::new();
        for batch in Budget::count(self.config.batch_size).plan(uids) {
            let Some(rows) = self.fetch_with_retry(remote, &batch, &fields).await? else {
                continue;
            };
            changed.extend(self.apply_remote_flags(&rows, spec, gmail, None).await?);
        }
        Ok(changed)
    }

    /// Writes remote flags of `rows` onto the local messages they map to.
    async fn apply_remote_flags(
        &self,
        rows: &[FetchRow],
        spec: &FolderSpec,
        gmail: bool,
        managed: Option<&[&str]>,
    ) -> Result<Vec<LocalId>> {
        let uids: Vec<u32> = rows.iter().map(|r| r.uid.get()).collect();
        // held until the flags are written; header merges take it too
        let index = self.mapper.index().await?;
        let mapped = index.map_remote_to_local(spec.name(), &uids);
        if mapped.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<LocalId> = mapped.values().copied().collect();
        let current: HashMap<LocalId, BTreeSet<String>> = self
            .store
            .fetch(&ids, Part::Flags)
            .await?
            .into_iter()
            .map(|m| (m.id, m.flags))
            .collect();

        let mut tags = self.tags().await?;
        let mut changed = Vec::new();
        for row in rows {
            let Some(id) = mapped.get(&row.uid.get()) else {
                continue;
            };
            let Some(local) = current.get(id) else {
                continue;
            };
            let remote = remote_tags(&row.flags, &row.labels, spec.tag.as_deref(), &mut tags);
            let mut next = reconcile(local, &remote, managed);
            if !gmail {
                // a merged copy may belong to several folders
                next.extend(
                    local
                        .iter()
                        .filter(|f| FOLDER_TAGS.contains(&f.as_str()))
                        .cloned(),
                );
            }
            if &next != local {
                tracing::debug!(id, uid = row.uid.get(), "flags updated from remote");
                self.store.store(&[*id], &FlagDelta::replace(next)).await?;
                changed.push(*id);
            }
        }
        Ok(changed)
    }
}
