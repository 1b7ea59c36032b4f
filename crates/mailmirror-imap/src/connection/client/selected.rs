//! UID-addressed commands on the open mailbox.

use tokio::io::{AsyncRead, AsyncWrite};

use super::Client;
use super::states::{Authenticated, Selected};
use crate::command::{Command, FetchAttribute, SearchCriteria, StoreAction, StoreOp};
use crate::fetch::{FetchRow, rows_from_frames};
use crate::parser::UntaggedResponse;
use crate::types::{Flag, Mailbox, MailboxStatus, Uid, UidSet};
use crate::Result;

impl<S> Client<S, Selected>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// The open mailbox.
    #[must_use]
    pub const fn mailbox(&self) -> &Mailbox {
        self.state.mailbox()
    }

    /// Status reported when the mailbox was opened.
    #[must_use]
    pub const fn mailbox_status(&self) -> &MailboxStatus {
        self.state.status()
    }

    /// UID SEARCH. Results come back sorted ascending.
    ///
    /// # Errors
    ///
    /// Returns the protocol or I/O error.
    pub async fn search(&mut self, criteria: &SearchCriteria) -> Result<Vec<Uid>> {
        if let SearchCriteria::Uids(set) = criteria
            && set.is_empty()
        {
            return Ok(Vec::new());
        }
        let done = self
            .run(&Command::UidSearch {
                criteria: criteria.clone(),
            })
            .await?;
        let mut uids: Vec<Uid> = done
            .responses()
            .filter_map(|r| match r {
                UntaggedResponse::Search(ids) => Some(ids),
                _ => None,
            })
            .flatten()
            .filter_map(Uid::new)
            .collect();
        uids.sort_unstable();
        uids.dedup();
        Ok(uids)
    }

    /// One UID FETCH round-trip. Malformed rows are logged and skipped.
    ///
    /// An empty set returns at once without touching the connection.
    ///
    /// # Errors
    ///
    /// Returns the protocol or I/O error for the command as a whole.
    pub async fn uid_fetch(
        &mut self,
        uids: &UidSet,
        items: &[FetchAttribute],
        changed_since: Option<u64>,
    ) -> Result<Vec<FetchRow>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        let done = self
            .run(&Command::UidFetch {
                uids: uids.clone(),
                items: items.to_vec(),
                changed_since,
            })
            .await?;
        Ok(rows_from_frames(&done.untagged))
    }

    /// UID STORE of flags. Returns the UIDs the server echoed back.
    ///
    /// # Errors
    ///
    /// Returns the protocol or I/O error.
    pub async fn store(&mut self, uids: &UidSet, op: StoreOp, flags: &[Flag]) -> Result<Vec<Uid>> {
        self.store_action(uids, StoreAction::Flags(op, flags.to_vec()))
            .await
    }

    /// UID STORE of Gmail labels (X-GM-LABELS).
    ///
    /// # Errors
    ///
    /// Returns the protocol or I/O error.
    pub async fn store_labels(
        &mut self,
        uids: &UidSet,
        op: StoreOp,
        labels: &[String],
    ) -> Result<Vec<Uid>> {
        self.store_action(uids, StoreAction::Labels(op, labels.to_vec()))
            .await
    }

    async fn store_action(&mut self, uids: &UidSet, action: StoreAction) -> Result<Vec<Uid>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        let done = self
            .run(&Command::UidStore {
                uids: uids.clone(),
                action,
                silent: false,
            })
            .await?;
        Ok(rows_from_frames(&done.untagged)
            .into_iter()
            .map(|row| row.uid)
            .filter(|uid| uids.contains(*uid))
            .collect())
    }

    /// `UID FETCH 1:* (UID FLAGS [X-GM-LABELS]) (CHANGEDSINCE modseq)`.
    ///
    /// # Errors
    ///
    /// Returns the protocol or I/O error.
    pub async fn changed_since(&mut self, modseq: u64, labels: bool) -> Result<Vec<FetchRow>> {
        let mut items = vec![FetchAttribute::Uid, FetchAttribute::Flags];
        if labels {
            items.push(FetchAttribute::GmLabels);
        }
        items.push(FetchAttribute::ModSeq);
        self.uid_fetch(&UidSet::all(), &items, Some(modseq)).await
    }

    /// CLOSE, back to the authenticated state.
    ///
    /// # Errors
    ///
    /// Returns the protocol or I/O error.
    pub async fn close(mut self) -> Result<Client<S, Authenticated>> {
        self.run(&Command::Close).await?;
        Ok(self.transition(Authenticated))
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
    use tokio_test::io::{Builder, Mock};

    use super::*;

    fn open_script(builder: &mut Builder) -> &mut Builder {
        builder
            .read(b"* OK ready\r\n")
            .write(b"M0000 LOGIN u p\r\n")
            .read(b"M0000 OK [CAPABILITY IMAP4rev1 X-GM-EXT-1] done\r\n")
            .write(b"M0001 SELECT INBOX\r\n")
            .read(b"* 3 EXISTS\r\n")
            .read(b"* OK [UIDVALIDITY 1] ok\r\n")
            .read(b"M0001 OK [READ-WRITE] done\r\n")
    }

    async fn opened(mock: Mock) -> Client<Mock, Selected> {
        let client = Client::from_stream(mock).await.unwrap();
        let client = client.login("u", "p").await.unwrap();
        client.select(&Mailbox::inbox(), false).await.unwrap()
    }

    fn set(uids: &[u32]) -> UidSet {
        let v: Vec<Uid> = uids.iter().map(|n| Uid::new(*n).unwrap()).collect();
        UidSet::from_uids(&v)
    }

    #[tokio::test]
    async fn search_returns_sorted_uids() {
        let mock = open_script(&mut Builder::new())
            .write(b"M0002 UID SEARCH UID 10:*\r\n")
            .read(b"* SEARCH 12 10 11\r\n")
            .read(b"M0002 OK done\r\n")
            .build();
        let mut client = opened(mock).await;
        let uids = client
            .search(&SearchCriteria::UidFrom(Uid::new(10).unwrap()))
            .await
            .unwrap();
        let raw: Vec<u32> = uids.into_iter().map(Uid::get).collect();
        assert_eq!(raw, vec![10, 11, 12]);
    }

    #[tokio::test]
    async fn empty_fetch_and_store_skip_the_wire() {
        // Nothing scripted after SELECT: any write would fail the mock.
        let mock = open_script(&mut Builder::new()).build();
        let mut client = opened(mock).await;
        let empty = UidSet::from_uids(&[]);
        assert!(client.uid_fetch(&empty, &[FetchAttribute::Uid], None).await.unwrap().is_empty());
        assert!(client.store(&empty, StoreOp::Add, &[Flag::Seen]).await.unwrap().is_empty());
        assert!(client.search(&SearchCriteria::Uids(empty)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fetch_skips_bad_row() {
        let mock = open_script(&mut Builder::new())
            .write(b"M0002 UID FETCH 1:3 (UID FLAGS)\r\n")
            .read(b"* 1 FETCH (UID 1 FLAGS (\\Seen))\r\n")
            .read(b"* 2 FETCH (FLAGS (\\Seen))\r\n")
            .read(b"* 3 FETCH (UID 3 FLAGS ())\r\n")
            .read(b"M0002 OK done\r\n")
            .build();
        let mut client = opened(mock).await;
        let rows = client
            .uid_fetch(&set(&[1, 2, 3]), &[FetchAttribute::Uid, FetchAttribute::Flags], None)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].flags.is_seen());
        assert_eq!(rows[1].uid.get(), 3);
    }

    #[tokio::test]
    async fn store_labels_reports_echoed_uids() {
        let mock = open_script(&mut Builder::new())
            .write(b"M0002 UID STORE 7 +X-GM-LABELS (\\Inbox)\r\n")
            .read(b"* 2 FETCH (X-GM-LABELS (\\Inbox) UID 7)\r\n")
            .read(b"M0002 OK done\r\n")
            .build();
        let mut client = opened(mock).await;
        let uids = client
            .store_labels(&set(&[7]), StoreOp::Add, &["\\Inbox".to_string()])
            .await
            .unwrap();
        assert_eq!(uids, vec![Uid::new(7).unwrap()]);
    }

    #[tokio::test]
    async fn changed_since_uses_modifier() {
        let mock = open_script(&mut Builder::new())
            .write(b"M0002 UID FETCH 1:* (UID FLAGS X-GM-LABELS MODSEQ) (CHANGEDSINCE 900)\r\n")
            .read(b"* 1 FETCH (UID 4 FLAGS (\\Flagged) X-GM-LABELS () MODSEQ (912))\r\n")
            .read(b"M0002 OK done\r\n")
            .build();
        let mut client = opened(mock).await;
        let rows = client.changed_since(900, true).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].modseq, Some(912));
        assert!(rows[0].labels.is_empty());
    }

    #[tokio::test]
    async fn close_returns_to_authenticated() {
        let mock = open_script(&mut Builder::new())
            .write(b"M0002 CLOSE\r\n")
            .read(b"M0002 OK closed\r\n")
            .build();
        let client = opened(mock).await;
        assert_eq!(client.mailbox().as_str(), "INBOX");
        let _authenticated = client.close().await.unwrap();
    }
}
