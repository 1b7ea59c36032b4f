//! The server side of a sync, as the engine sees it.
//!
//! [`Remote`] is the subset of [`Session`] the engine needs. Tests drive the
//! engine with scripted implementations instead of a live server.

use std::future::Future;
use std::time::Duration;

use mailmirror_imap::{
    FetchFields, FetchRow, Flag, IdleEvent, ListResponse, Mailbox, MailboxStatus, SearchCriteria,
    Session, SessionConfig, StoreOp, Uid,
};

use crate::Result;
use crate::config::{AccountConfig, SyncConfig};

/// An authenticated IMAP connection.
pub trait Remote: Send {
    /// Server advertises `X-GM-EXT-1`.
    fn is_gmail(&self) -> bool;

    /// Server advertises CONDSTORE.
    fn supports_condstore(&self) -> bool;

    /// LIST with SPECIAL-USE attributes.
    fn list(&mut self) -> impl Future<Output = Result<Vec<ListResponse>>> + Send;

    /// SELECT or EXAMINE.
    fn select(
        &mut self,
        mailbox: &Mailbox,
        read_only: bool,
    ) -> impl Future<Output = Result<MailboxStatus>> + Send;

    /// UID SEARCH.
    fn search(&mut self, criteria: &SearchCriteria) -> impl Future<Output = Result<Vec<Uid>>> + Send;

    /// UID FETCH of one batch.
    fn fetch(
        &mut self,
        uids: &[Uid],
        fields: &FetchFields,
    ) -> impl Future<Output = Result<Vec<FetchRow>>> + Send;

    /// UID STORE of flags.
    fn store(
        &mut self,
        uids: &[Uid],
        op: StoreOp,
        flags: &[Flag],
    ) -> impl Future<Output = Result<Vec<Uid>>> + Send;

    /// UID STORE of Gmail labels.
    fn store_labels(
        &mut self,
        uids: &[Uid],
        op: StoreOp,
        labels: &[String],
    ) -> impl Future<Output = Result<Vec<Uid>>> + Send;

    /// Rows whose flags changed after `modseq`.
    fn changed_since(&mut self, modseq: u64) -> impl Future<Output = Result<Vec<FetchRow>>> + Send;

    /// One IDLE cycle.
    fn idle(&mut self, timeout: Duration) -> impl Future<Output = Result<IdleEvent>> + Send;

    /// Reopens the connection and reselects the mailbox.
    fn reconnect(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Opens [`Remote`]s. Each folder task gets its own connection.
pub trait Connect: Send + Sync + 'static {
    /// Connection type.
    type Remote: Remote + 'static;

    /// Opens and authenticates a connection.
    fn connect(&self) -> impl Future<Output = Result<Self::Remote>> + Send;
}

impl Remote for Session {
    fn is_gmail(&self) -> bool {
        Self::is_gmail(self)
    }

    fn supports_condstore(&self) -> bool {
        Self::supports_condstore(self)
    }

    async fn list(&mut self) -> Result<Vec<ListResponse>> {
        Ok(Self::list(self).await?)
    }

    async fn select(&mut self, mailbox: &Mailbox, read_only: bool) -> Result<MailboxStatus> {
        Ok(Self::select(self, mailbox, read_only).await?)
    }

    async fn search(&mut self, criteria: &SearchCriteria) -> Result<Vec<Uid>> {
        Ok(Self::search(self, criteria).await?)
    }

    async fn fetch(&mut self, uids: &[Uid], fields: &FetchFields) -> Result<Vec<FetchRow>> {
        Ok(Self::fetch(self, uids, fields).await?)
    }

    async fn store(&mut self, uids: &[Uid], op: StoreOp, flags: &[Flag]) -> Result<Vec<Uid>> {
        Ok(Self::store(self, uids, op, flags).await?)
    }

    async fn store_labels(
        &mut self,
        uids: &[Uid],
        op: StoreOp,
        labels: &[String],
    ) -> Result<Vec<Uid>> {
        Ok(Self::store_labels(self, uids, op, labels).await?)
    }

    async fn changed_since(&mut self, modseq: u64) -> Result<Vec<FetchRow>> {
        Ok(Self::changed_since(self, modseq).await?)
    }

    async fn idle(&mut self, timeout: Duration) -> Result<IdleEvent> {
        Ok(Self::idle(self, timeout).await?)
    }

    async fn reconnect(&mut self) -> Result<()> {
        Ok(Self::reconnect(self).await?)
    }
}

/// Connects to a real server.
#[derive(Debug, Clone)]
pub struct ImapConnector {
    config: SessionConfig,
}

impl ImapConnector {
    /// Connector for `account`.
    ///
    /// # Errors
    ///
    /// [`Error::Config`](crate::Error::Config) when the account has no usable
    /// credential.
    pub fn new(account: &AccountConfig, sync: &SyncConfig) -> Result<Self> {
        Ok(Self {
            config: account.session_config(sync)?,
        })
    }
}

impl Connect for ImapConnector {
    type Remote = Session;

    async fn connect(&self) -> Result<Session> {
        Ok(Session::connect(self.config.clone()).await?)
    }
}
