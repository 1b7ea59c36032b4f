//! Header and body passes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use mailmirror_imap::{Budget, FetchFields, FetchRow, Uid};
use mailmirror_mime::{ParsedMessage, SyntheticHeaders, content_hash, parse_internal_date};

use super::{Pass, SyncEngine, SyncReport};
use crate::flags::{self, ERR, PARTIAL, is_local_only, remote_tags};
use crate::remote::{Connect, Remote};
use crate::store::{FlagDelta, LocalId, MessageStore, Part, Query};
use crate::uidmap::{Checkpoint, DupKey, DuplicateIndex, DuplicateLink};
use crate::Result;

/// What happened to one fetched row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Import {
    /// Stored under a new local id.
    Stored(LocalId),
    /// Folded into an existing message.
    Duplicate(LocalId),
    /// Already stored by an earlier pass.
    Known,
    /// Not imported.
    Skipped,
}

fn arrived(row: &FetchRow) -> DateTime<Utc> {
    row.internal_date
        .as_deref()
        .and_then(parse_internal_date)
        .map_or_else(Utc::now, |d| d.with_timezone(&Utc))
}

/// A placeholder waiting for its body.
struct Placeholder {
    id: LocalId,
    synthetic: SyntheticHeaders,
}

impl<S: MessageStore, C: Connect> SyncEngine<S, C> {
    /// Fetches one batch, reconnecting and retrying transient failures with
    /// linear backoff. `None` means the batch was given up on.
    pub(super) async fn fetch_with_retry<R: Remote>(
        &self,
        remote: &mut R,
        uids: &[Uid],
        fields: &FetchFields,
    ) -> Result<Option<Vec<FetchRow>>> {
        if uids.is_empty() {
            return Ok(Some(Vec::new()));
        }
        let mut attempt = 0;
        loop {
            let error = match remote.fetch(uids, fields).await {
                Ok(rows) => return Ok(Some(rows)),
                Err(e) if e.is_auth() => return Err(e),
                Err(e) => e,
            };
            if !error.is_retryable() || attempt >= self.config.max_retries {
                tracing::warn!(
                    first = uids.first().map(|u| u.get()),
                    count = uids.len(),
                    attempts = attempt + 1,
                    error = %error,
                    "giving up on batch"
                );
                return Ok(None);
            }
            attempt += 1;
            tracing::warn!(attempt, error = %error, "batch failed, retrying");
            tokio::time::sleep(self.config.retry_backoff * attempt).await;
            if let Err(e) = remote.reconnect().await {
                if e.is_auth() {
                    return Err(e);
                }
                tracing::warn!(error = %e, "reconnect failed");
            }
        }
    }

    /// Header pass over `uids`. Returns the highest UID of the last batch
    /// that was committed before any batch got skipped.
    pub(super) async fn fetch_headers<R: Remote>(
        &self,
        remote: &mut R,
        pass: &Pass<'_>,
        uids: &[Uid],
        report: &mut SyncReport,
    ) -> Result<Option<Uid>> {
        let fields = FetchFields::headers().gmail(pass.gmail);
        let batches = Budget::count(self.config.batch_size).plan(uids);
        let total = batches.len();
        let mut committed = None;

        for (n, batch) in batches.iter().enumerate() {
            self.check_cancel()?;
            let Some(rows) = self.fetch_with_retry(remote, batch, &fields).await? else {
                report.skipped_batches += 1;
                continue;
            };

            let mut touched = Vec::new();
            {
                let mut index = self.mapper.index().await?;
                let mut tags = self.tags().await?;
                for row in &rows {
                    match self.import_header(&mut index, &mut tags, pass, row).await? {
                        Import::Stored(id) => {
                            report.new += 1;
                            touched.push(id);
                        }
                        Import::Duplicate(id) => {
                            report.duplicates += 1;
                            touched.push(id);
                        }
                        Import::Known | Import::Skipped => {}
                    }
                }
            }
            report.touch(touched);

            let last = batch.last().copied();
            if report.skipped_batches == 0 {
                committed = last;
                if let Some(uid) = last {
                    let checkpoint = Checkpoint {
                        uidvalidity: pass.uidvalidity,
                        uidnext: uid.get().saturating_add(1),
                    };
                    self.mapper.advance(&pass.key, checkpoint).await?;
                }
            }
            tracing::debug!(
                mailbox = %pass.key,
                batch = n + 1,
                of = total,
                rows = rows.len(),
                "header batch committed"
            );
        }
        Ok(committed)
    }

    fn synthetic_for(&self, pass: &Pass<'_>, row: &FetchRow) -> SyntheticHeaders {
        let uid = row.uid.get();
        let mut synthetic = SyntheticHeaders {
            gm_msgid: row.gm_msgid,
            gm_thrid: row.gm_thrid,
            remote_folder: Some(pass.spec.name().to_string()),
            thread_id: row.labels.iter().find_map(|l| flags::thread_label(l)),
            ..SyntheticHeaders::default()
        };
        if pass.gmail {
            synthetic.gm_uid = Some(uid);
            synthetic.gm_login = Some(self.account.username.clone());
        } else {
            synthetic.uid = Some(uid);
            synthetic.remote_host = Some(self.account.host.clone());
            synthetic.remote_login = Some(self.account.username.clone());
        }
        synthetic
    }

    /// Stores one header row as a placeholder unless it is already known.
    async fn import_header(
        &self,
        index: &mut DuplicateIndex,
        tags: &mut flags::TagMap,
        pass: &Pass<'_>,
        row: &FetchRow,
    ) -> Result<Import> {
        let uid = row.uid.get();
        let Some(header) = row.header.as_deref() else {
            tracing::warn!(uid, "skipping row without header");
            return Ok(Import::Skipped);
        };
        let remote = remote_tags(&row.flags, &row.labels, pass.spec.tag.as_deref(), tags);
        if pass.gmail && (row.flags.is_draft() || remote.contains("\\Draft")) {
            tracing::debug!(uid, "skipping draft");
            return Ok(Import::Skipped);
        }

        if index.find(DupKey::Remote(pass.spec.name(), uid)).is_some() {
            return Ok(Import::Known);
        }
        if let Some(kept) = row.gm_msgid.and_then(|m| index.find(DupKey::GmMsgid(m))) {
            let added: Vec<String> = remote.into_iter().filter(|f| !is_local_only(f)).collect();
            self.store.store(&[kept], &FlagDelta::add(added)).await?;
            let link = DuplicateLink {
                hash: None,
                msgid: row.gm_msgid,
                kept,
                folder: pass.spec.name().to_string(),
                remote_uid: uid,
            };
            self.mapper.record_duplicate(index, link).await?;
            return Ok(Import::Duplicate(kept));
        }

        let synthetic = self.synthetic_for(pass, row);
        let mut raw = synthetic.serialize(header);
        if !raw.ends_with(b"\r\n\r\n") {
            raw.extend_from_slice(b"\r\n");
        }
        let mut local = remote;
        local.insert(PARTIAL.to_string());
        let id = self.store.append(&local, arrived(row), &raw).await?;
        index.insert(id, &synthetic, true);
        tracing::debug!(uid, id, "header stored");
        Ok(Import::Stored(id))
    }

    /// Placeholders of this folder, keyed by remote UID.
    async fn placeholders(&self, pass: &Pass<'_>) -> Result<HashMap<Uid, Placeholder>> {
        let query = Query::And(vec![
            Query::flag(PARTIAL),
            Query::header(mailmirror_mime::synthetic::REMOTE_FOLDER, pass.spec.name()),
        ]);
        let ids = self.store.search(&query).await?;
        let mut found = HashMap::new();
        for message in self.store.fetch(&ids, Part::Header).await? {
            let Ok(synthetic) = SyntheticHeaders::parse(&message.headers()) else {
                continue;
            };
            if synthetic.remote_folder.as_deref() != Some(pass.spec.name()) {
                continue;
            }
            if let Some(uid) = synthetic.remote_uid().and_then(Uid::new) {
                found.insert(
                    uid,
                    Placeholder {
                        id: message.id,
                        synthetic,
                    },
                );
            }
        }
        Ok(found)
    }

    /// Expunges this folder's placeholders.
    pub(super) async fn discard_placeholders(&self, pass: &Pass<'_>) -> Result<()> {
        let ids: Vec<LocalId> = self.placeholders(pass).await?.values().map(|p| p.id).collect();
        if !ids.is_empty() {
            tracing::info!(mailbox = %pass.key, count = ids.len(), "discarding placeholders");
            self.store.expunge(&ids).await?;
        }
        Ok(())
    }

    /// Body pass: replaces this folder's placeholders with full messages,
    /// smallest first, within the byte budget per round-trip.
    pub(super) async fn fetch_bodies<R: Remote>(
        &self,
        remote: &mut R,
        pass: &Pass<'_>,
        report: &mut SyncReport,
    ) -> Result<()> {
        let mut waiting = self.placeholders(pass).await?;
        if waiting.is_empty() {
            return Ok(());
        }
        let mut uids: Vec<Uid> = waiting.keys().copied().collect();
        uids.sort_unstable();

        // Sizes decide the order and the grouping
        let mut sizes = HashMap::new();
        for batch in Budget::count(self.config.batch_size).plan(&uids) {
            self.check_cancel()?;
            if let Some(rows) = self
                .fetch_with_retry(remote, &batch, &FetchFields::new().size())
                .await?
            {
                sizes.extend(rows.iter().filter_map(|r| Some((r.uid, r.size?))));
            }
        }
        uids.sort_by_key(|u| (sizes.get(u).copied().unwrap_or(u32::MAX), *u));
        let budget = Budget::Bytes {
            max: self.config.body_budget,
            sizes,
        };

        let fields = FetchFields::bodies().gmail(pass.gmail);
        for batch in budget.plan(&uids) {
            self.check_cancel()?;
            let Some(rows) = self.fetch_with_retry(remote, &batch, &fields).await? else {
                report.skipped_batches += 1;
                continue;
            };
            let mut touched = Vec::new();
            let mut index = self.mapper.index().await?;
            for row in &rows {
                let Some(placeholder) = waiting.remove(&row.uid) else {
                    continue;
                };
                match self.import_body(&mut index, pass, row, placeholder).await? {
                    Import::Stored(id) => touched.push(id),
                    Import::Duplicate(id) => {
                        report.duplicates += 1;
                        touched.push(id);
                    }
                    Import::Known | Import::Skipped => {}
                }
            }
            drop(index);
            report.touch(touched);
            tracing::debug!(mailbox = %pass.key, rows = rows.len(), "body batch committed");
        }
        Ok(())
    }

    /// Replaces a placeholder with its full message, or folds it into an
    /// existing message with the same content. The new message is always
    /// appended before the placeholder is expunged.
    async fn import_body(
        &self,
        index: &mut DuplicateIndex,
        pass: &Pass<'_>,
        row: &FetchRow,
        placeholder: Placeholder,
    ) -> Result<Import> {
        let uid = row.uid.get();
        let Some(body) = row.body.as_deref() else {
            tracing::warn!(uid, "skipping row without body");
            return Ok(Import::Skipped);
        };
        // flags may have been merged in since the placeholder was listed
        let Some(current) = self
            .store
            .fetch(&[placeholder.id], Part::Flags)
            .await?
            .into_iter()
            .next()
        else {
            return Ok(Import::Skipped);
        };
        let hash = content_hash(body);

        if let Some(kept) = index.find(DupKey::Hash(&hash)).filter(|&k| k != placeholder.id) {
            let carried: Vec<String> = current
                .flags
                .iter()
                .filter(|f| !is_local_only(f))
                .cloned()
                .collect();
            self.store.store(&[kept], &FlagDelta::add(carried)).await?;
            self.store.expunge(&[placeholder.id]).await?;
            self.mapper.redirect(index, placeholder.id, kept).await?;
            self.queue.redirect(placeholder.id, kept).await?;
            let link = DuplicateLink {
                hash: Some(hash),
                msgid: placeholder.synthetic.gm_msgid,
                kept,
                folder: pass.spec.name().to_string(),
                remote_uid: uid,
            };
            self.mapper.record_duplicate(index, link).await?;
            return Ok(Import::Duplicate(kept));
        }

        let parsed = match ParsedMessage::parse(body, uid, row.internal_date.as_deref(), &HashMap::new()) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!(uid, error = %e, "body did not parse");
                None
            }
        };
        let mut local = current.flags;
        local.remove(PARTIAL);
        if parsed.as_ref().is_none_or(|p| !p.errors.is_empty()) {
            local.insert(ERR.to_string());
        }

        let mut synthetic = placeholder.synthetic;
        synthetic.sha256 = Some(hash);
        let raw = synthetic.serialize(body);
        let id = self.store.append(&local, arrived(row), &raw).await?;
        self.store.expunge(&[placeholder.id]).await?;
        self.mapper.redirect(index, placeholder.id, id).await?;
        self.queue.redirect(placeholder.id, id).await?;
        index.insert(id, &synthetic, false);
        tracing::debug!(uid, id, replaced = placeholder.id, "body stored");
        Ok(Import::Stored(id))
    }
}
