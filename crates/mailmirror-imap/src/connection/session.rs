//! Owned IMAP session with reconnect.
//!
//! [`Session`] wraps the type-state [`Client`] behind `&mut self` methods so a
//! caller can hold one value across folders and reconnects. It remembers the
//! open mailbox and reopens it after a reconnect. It does not retry commands
//! on its own; the caller decides when a retryable error warrants
//! [`Session::reconnect`] and a second attempt.

use std::collections::VecDeque;
use std::time::Duration;

use super::client::{Authenticated, Client, Selected};
use super::config::Config;
use super::framed::FramedStream;
use super::idle::IdleEvent;
use super::stream::ImapStream;
use crate::command::{SearchCriteria, StoreOp};
use crate::fetch::{Budget, FetchFields, FetchRow};
use crate::types::{Capability, Flag, ListResponse, Mailbox, MailboxStatus, Uid, UidSet};
use crate::{Error, Result};

/// How to log in.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// LOGIN
    Password {
        /// Login name.
        username: String,
        /// Password or app password.
        password: String,
    },
    /// AUTHENTICATE XOAUTH2
    OAuth2 {
        /// Account address.
        username: String,
        /// Bearer token.
        access_token: String,
    },
}

impl Credentials {
    /// Login name.
    #[must_use]
    pub fn username(&self) -> &str {
        match self {
            Self::Password { username, .. } | Self::OAuth2 { username, .. } => username,
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::Password { .. } => "Password",
            Self::OAuth2 { .. } => "OAuth2",
        };
        f.debug_struct(kind)
            .field("username", &self.username())
            .finish_non_exhaustive()
    }
}

/// Everything needed to open and reopen a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Endpoint.
    pub server: Config,
    /// Login.
    pub credentials: Credentials,
    /// Connect attempts made by [`Session::reconnect`].
    pub reconnect_attempts: u32,
    /// Base delay between reconnect attempts, multiplied by the attempt number.
    pub reconnect_backoff: Duration,
}

impl SessionConfig {
    /// Three reconnect attempts, 2 s linear backoff.
    #[must_use]
    pub const fn new(server: Config, credentials: Credentials) -> Self {
        Self {
            server,
            credentials,
            reconnect_attempts: 3,
            reconnect_backoff: Duration::from_secs(2),
        }
    }

    /// Sets the reconnect attempt count (at least one).
    #[must_use]
    pub fn reconnect_attempts(mut self, attempts: u32) -> Self {
        self.reconnect_attempts = attempts.max(1);
        self
    }

    /// Sets the reconnect backoff base.
    #[must_use]
    pub const fn reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }
}

enum State {
    Closed,
    Authenticated(Client<ImapStream, Authenticated>),
    Selected(Client<ImapStream, Selected>),
}

/// A logged-in connection owned by its caller.
pub struct Session {
    config: SessionConfig,
    state: State,
    capabilities: Vec<Capability>,
    open: Option<(Mailbox, bool)>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.config.server.host)
            .field("user", &self.config.credentials.username())
            .field("open", &self.open)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Connects and logs in.
    ///
    /// # Errors
    ///
    /// [`Error::Auth`] for rejected credentials (never retried), otherwise the
    /// connect or protocol error.
    pub async fn connect(config: SessionConfig) -> Result<Self> {
        let client = Self::login(&config).await?;
        tracing::info!(
            host = %config.server.host,
            user = config.credentials.username(),
            gmail = client.supports_gmail(),
            "IMAP session established"
        );
        Ok(Self {
            capabilities: client.capabilities().to_vec(),
            config,
            state: State::Authenticated(client),
            open: None,
        })
    }

    async fn login(config: &SessionConfig) -> Result<Client<ImapStream, Authenticated>> {
        let stream = ImapStream::connect(&config.server).await?;
        let framed = FramedStream::new(stream).with_timeout(config.server.io_timeout);
        let client = Client::from_framed(framed).await?;
        match &config.credentials {
            Credentials::Password { username, password } => client.login(username, password).await,
            Credentials::OAuth2 {
                username,
                access_token,
            } => client.authenticate_xoauth2(username, access_token).await,
        }
    }

    /// Capabilities advertised after login.
    #[must_use]
    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    /// True when the server speaks the Gmail extensions.
    #[must_use]
    pub fn is_gmail(&self) -> bool {
        self.capabilities.contains(&Capability::GmailExt)
    }

    /// True when CONDSTORE is available.
    #[must_use]
    pub fn supports_condstore(&self) -> bool {
        self.capabilities.contains(&Capability::CondStore)
    }

    /// The open mailbox, if any.
    #[must_use]
    pub fn selected(&self) -> Option<&Mailbox> {
        self.open.as_ref().map(|(m, _)| m)
    }

    /// Drops the connection and logs in again with linear backoff, reopening
    /// the previously open mailbox.
    ///
    /// # Errors
    ///
    /// Authentication failures end the attempt at once. Otherwise the last
    /// connect error after all attempts.
    pub async fn reconnect(&mut self) -> Result<()> {
        self.state = State::Closed;
        let attempts = self.config.reconnect_attempts.max(1);
        let mut last = Error::ConnectionLost("no reconnect attempt made".into());
        for attempt in 1..=attempts {
            match Self::login(&self.config).await {
                Ok(client) => {
                    self.capabilities = client.capabilities().to_vec();
                    self.state = State::Authenticated(client);
                    if let Some((mailbox, read_only)) = self.open.clone() {
                        self.select(&mailbox, read_only).await?;
                    }
                    tracing::info!(attempt, "IMAP session re-established");
                    return Ok(());
                }
                Err(e) if e.is_auth() => return Err(e),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "reconnect failed");
                    last = e;
                    if attempt < attempts {
                        tokio::time::sleep(self.config.reconnect_backoff * attempt).await;
                    }
                }
            }
        }
        Err(last)
    }

    /// LIST everything.
    ///
    /// # Errors
    ///
    /// Returns the protocol or I/O error.
    pub async fn list(&mut self) -> Result<Vec<ListResponse>> {
        match &mut self.state {
            State::Authenticated(c) => c.list("", "*").await,
            State::Selected(c) => c.list("", "*").await,
            State::Closed => Err(closed()),
        }
    }

    /// STATUS of a mailbox without opening it.
    ///
    /// # Errors
    ///
    /// Returns the protocol or I/O error.
    pub async fn status(&mut self, mailbox: &Mailbox) -> Result<MailboxStatus> {
        match &mut self.state {
            State::Authenticated(c) => c.status(mailbox).await,
            State::Selected(c) => c.status(mailbox).await,
            State::Closed => Err(closed()),
        }
    }

    /// Opens `mailbox` with SELECT, or EXAMINE when `read_only`.
    ///
    /// # Errors
    ///
    /// Returns the protocol or I/O error. On error the session is closed and
    /// needs [`reconnect`](Self::reconnect).
    pub async fn select(&mut self, mailbox: &Mailbox, read_only: bool) -> Result<MailboxStatus> {
        let selected = match std::mem::replace(&mut self.state, State::Closed) {
            State::Authenticated(c) => c.select(mailbox, read_only).await?,
            State::Selected(c) => c.select(mailbox, read_only).await?,
            State::Closed => return Err(closed()),
        };
        let status = selected.mailbox_status().clone();
        self.state = State::Selected(selected);
        self.open = Some((mailbox.clone(), read_only));
        Ok(status)
    }

    fn selected_client(&mut self) -> Result<&mut Client<ImapStream, Selected>> {
        match &mut self.state {
            State::Selected(c) => Ok(c),
            State::Authenticated(_) => Err(Error::InvalidState("no mailbox selected".into())),
            State::Closed => Err(closed()),
        }
    }

    /// UID SEARCH in the open mailbox.
    ///
    /// # Errors
    ///
    /// Returns the protocol or I/O error.
    pub async fn search(&mut self, criteria: &SearchCriteria) -> Result<Vec<Uid>> {
        self.selected_client()?.search(criteria).await
    }

    /// One UID FETCH round-trip for `uids`.
    ///
    /// # Errors
    ///
    /// Returns the protocol or I/O error.
    pub async fn fetch(&mut self, uids: &[Uid], fields: &FetchFields) -> Result<Vec<FetchRow>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        let set = UidSet::from_uids(uids);
        let attrs = fields.clone().gmail(self.is_gmail()).attributes();
        self.selected_client()?.uid_fetch(&set, &attrs, None).await
    }

    /// Plans `uids` under `budget` and returns a lazy sequence of round-trips.
    #[must_use]
    pub fn fetch_batch<'a>(
        &'a mut self,
        uids: &[Uid],
        fields: FetchFields,
        budget: &Budget,
    ) -> FetchBatches<'a> {
        FetchBatches {
            session: self,
            pending: budget.plan(uids).into(),
            fields,
        }
    }

    /// Flag STORE, returning the UIDs the server confirmed.
    ///
    /// # Errors
    ///
    /// Returns the protocol or I/O error.
    pub async fn store(&mut self, uids: &[Uid], op: StoreOp, flags: &[Flag]) -> Result<Vec<Uid>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        let set = UidSet::from_uids(uids);
        self.selected_client()?.store(&set, op, flags).await
    }

    /// X-GM-LABELS STORE.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] on servers without the Gmail extensions.
    pub async fn store_labels(
        &mut self,
        uids: &[Uid],
        op: StoreOp,
        labels: &[String],
    ) -> Result<Vec<Uid>> {
        if !self.is_gmail() {
            return Err(Error::InvalidState("X-GM-LABELS needs X-GM-EXT-1".into()));
        }
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        let set = UidSet::from_uids(uids);
        self.selected_client()?.store_labels(&set, op, labels).await
    }

    /// APPEND; the new UID when the server supports UIDPLUS.
    ///
    /// # Errors
    ///
    /// Returns the protocol or I/O error.
    pub async fn append(
        &mut self,
        mailbox: &Mailbox,
        flags: &[Flag],
        internal_date: Option<&str>,
        raw: &[u8],
    ) -> Result<Option<Uid>> {
        match &mut self.state {
            State::Authenticated(c) => c.append(mailbox, flags, internal_date, raw).await,
            State::Selected(c) => c.append(mailbox, flags, internal_date, raw).await,
            State::Closed => Err(closed()),
        }
    }

    /// One IDLE cycle on the open mailbox. Servers without IDLE get a plain
    /// sleep followed by NOOP, which reports as [`IdleEvent::Timeout`].
    ///
    /// # Errors
    ///
    /// Returns the protocol or I/O error.
    pub async fn idle(&mut self, timeout: Duration) -> Result<IdleEvent> {
        let client = self.selected_client()?;
        if client.supports_idle() {
            client.idle(timeout).await
        } else {
            tokio::time::sleep(timeout).await;
            client.noop().await?;
            Ok(IdleEvent::Timeout)
        }
    }

    /// Flag (and label) changes since `modseq`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] without CONDSTORE.
    pub async fn changed_since(&mut self, modseq: u64) -> Result<Vec<FetchRow>> {
        if !self.supports_condstore() {
            return Err(Error::InvalidState("CHANGEDSINCE needs CONDSTORE".into()));
        }
        let gmail = self.is_gmail();
        self.selected_client()?.changed_since(modseq, gmail).await
    }

    /// LOGOUT and close.
    pub async fn logout(mut self) {
        match std::mem::replace(&mut self.state, State::Closed) {
            State::Authenticated(c) => c.logout().await,
            State::Selected(c) => c.logout().await,
            State::Closed => {}
        }
    }
}

fn closed() -> Error {
    Error::ConnectionLost("session is closed".into())
}

/// Remaining round-trips of a [`Session::fetch_batch`].
///
/// A failed round-trip stays at the front of the queue, so after
/// [`reconnect`](Self::reconnect) the next call repeats exactly that group.
/// [`skip`](Self::skip) gives up on it.
pub struct FetchBatches<'a> {
    session: &'a mut Session,
    pending: VecDeque<Vec<Uid>>,
    fields: FetchFields,
}

impl FetchBatches<'_> {
    /// Number of round-trips left, the current one included.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    /// Runs the next round-trip; `None` when done.
    pub async fn next(&mut self) -> Option<Result<Vec<FetchRow>>> {
        let group = self.pending.front()?.clone();
        let result = self.session.fetch(&group, &self.fields).await;
        if result.is_ok() {
            self.pending.pop_front();
        }
        Some(result)
    }

    /// Drops the current round-trip, returning its UIDs.
    pub fn skip(&mut self) -> Option<Vec<Uid>> {
        self.pending.pop_front()
    }

    /// Reconnects the underlying session.
    ///
    /// # Errors
    ///
    /// See [`Session::reconnect`].
    pub async fn reconnect(&mut self) -> Result<()> {
        self.session.reconnect().await
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

    #[test]
    fn credentials_debug_hides_secrets() {
        let creds = Credentials::OAuth2 {
            username: "me@gmail.com".into(),
            access_token: "ya29.secret".into(),
        };
        let shown = format!("{creds:?}");
        assert!(shown.contains("me@gmail.com"));
        assert!(!shown.contains("ya29"));
    }

    #[test]
    fn reconnect_attempts_floor() {
        let config = SessionConfig::new(
            Config::new("imap.example.com"),
            Credentials::Password {
                username: "u".into(),
                password: "p".into(),
            },
        )
        .reconnect_attempts(0);
        assert_eq!(config.reconnect_attempts, 1);
    }
}
