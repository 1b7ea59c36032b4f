//! Type-state IMAP client.
//!
//! ```text
//! NotAuthenticated --login/authenticate--> Authenticated --select/examine--> Selected
//!                                               ^                               |
//!                                               +------------close--------------+
//! ```
//!
//! Each state only exposes the commands the protocol allows in it. Mailbox-level
//! commands valid in both logged-in states are implemented once over [`LoggedIn`].

mod authenticated;
mod not_authenticated;
mod selected;
mod states;

use tokio::io::{AsyncRead, AsyncWrite};

pub use self::not_authenticated::xoauth2_initial_response;
pub use self::states::{Authenticated, LoggedIn, NotAuthenticated, Selected};
use super::framed::FramedStream;
use crate::command::{Command, TagGenerator};
use crate::parser::{Response, ResponseParser, UntaggedResponse};
use crate::types::{Capability, ResponseCode, Status};
use crate::{Error, Result};

/// IMAP connection in state `State`.
pub struct Client<S, State> {
    pub(crate) stream: FramedStream<S>,
    pub(crate) tags: TagGenerator,
    pub(crate) capabilities: Vec<Capability>,
    pub(crate) state: State,
}

impl<S, State: std::fmt::Debug> std::fmt::Debug for Client<S, State> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

/// Untagged frames plus the tagged OK that closed a command.
#[derive(Debug, Default)]
pub(crate) struct Completion {
    pub(crate) untagged: Vec<Vec<u8>>,
    pub(crate) code: Option<ResponseCode>,
}

impl Completion {
    /// Parsed untagged responses. Frames the parser rejects are dropped here;
    /// FETCH frames go through [`crate::fetch::rows_from_frames`] instead.
    pub(crate) fn responses(&self) -> impl Iterator<Item = UntaggedResponse> + '_ {
        self.untagged.iter().filter_map(|frame| match ResponseParser::parse(frame) {
            Ok(Response::Untagged(u)) => Some(u),
            Ok(_) => None,
            Err(e) => {
                tracing::trace!(error = %e, "unparsed untagged response");
                None
            }
        })
    }
}

impl<S, State> Client<S, State>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Capabilities as last advertised.
    #[must_use]
    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    /// True if `cap` is advertised.
    #[must_use]
    pub fn has_capability(&self, cap: &Capability) -> bool {
        self.capabilities.contains(cap)
    }

    /// Gmail's X-GM-EXT-1.
    #[must_use]
    pub fn supports_gmail(&self) -> bool {
        self.has_capability(&Capability::GmailExt)
    }

    /// CONDSTORE, required for MODSEQ and CHANGEDSINCE.
    #[must_use]
    pub fn supports_condstore(&self) -> bool {
        self.has_capability(&Capability::CondStore)
    }

    /// IDLE
    #[must_use]
    pub fn supports_idle(&self) -> bool {
        self.has_capability(&Capability::Idle)
    }

    /// UIDPLUS, required for APPENDUID.
    #[must_use]
    pub fn supports_uidplus(&self) -> bool {
        self.has_capability(&Capability::UidPlus)
    }

    /// NOOP; also picks up pending untagged updates.
    ///
    /// # Errors
    ///
    /// Returns the protocol or I/O error.
    pub async fn noop(&mut self) -> Result<()> {
        self.run(&Command::Noop).await.map(drop)
    }

    /// Re-reads the capability list.
    ///
    /// # Errors
    ///
    /// Returns the protocol or I/O error.
    pub async fn refresh_capabilities(&mut self) -> Result<&[Capability]> {
        self.run(&Command::Capability).await?;
        Ok(&self.capabilities)
    }

    /// Sends LOGOUT and drops the connection. Errors during the goodbye are ignored.
    pub async fn logout(mut self) {
        let tag = self.tags.next();
        if self
            .stream
            .write_command(&Command::Logout.serialize(&tag))
            .await
            .is_ok()
        {
            // The server answers with BYE then the tagged OK; either is fine.
            let _ = self.stream.read_response().await;
        }
        let _ = self.stream.shutdown().await;
    }

    /// Sends `cmd` and collects everything up to its tagged completion.
    pub(crate) async fn run(&mut self, cmd: &Command) -> Result<Completion> {
        let tag = self.tags.next();
        tracing::debug!(tag, command = cmd.name(), "imap command");
        self.stream.write_command(&cmd.serialize(&tag)).await?;
        self.collect(&tag, false).await
    }

    /// Reads until the tagged response for `tag`.
    ///
    /// With `answer_challenges`, a `+` continuation is answered with an empty
    /// line, which is how a client aborts a failed SASL exchange.
    pub(crate) async fn collect(&mut self, tag: &str, answer_challenges: bool) -> Result<Completion> {
        let mut untagged = Vec::new();
        loop {
            let frame = self.stream.read_response().await?;
            if is_tagged(&frame, tag) {
                let Response::Tagged {
                    status, code, text, ..
                } = ResponseParser::parse(&frame)?
                else {
                    return Err(Error::Protocol("tagged line did not parse as tagged".into()));
                };
                self.absorb_capabilities(&untagged, code.as_ref());
                return match status {
                    Status::Ok | Status::PreAuth => Ok(Completion { untagged, code }),
                    Status::No => Err(Error::No(text)),
                    Status::Bad => Err(Error::Bad(text)),
                    Status::Bye => Err(Error::Bye(text)),
                };
            }
            if frame.starts_with(b"+") {
                if answer_challenges {
                    self.stream.write_command(b"\r\n").await?;
                    continue;
                }
                return Err(Error::Protocol("unexpected continuation request".into()));
            }
            if frame.get(..5).is_some_and(|p| p.eq_ignore_ascii_case(b"* BYE")) {
                let text = String::from_utf8_lossy(&frame[5..]).trim().to_string();
                return Err(Error::Bye(text));
            }
            untagged.push(frame);
        }
    }

    fn absorb_capabilities(&mut self, untagged: &[Vec<u8>], code: Option<&ResponseCode>) {
        if let Some(ResponseCode::Capability(caps)) = code {
            self.capabilities.clone_from(caps);
        }
        for frame in untagged {
            if !frame
                .get(..12)
                .is_some_and(|p| p.eq_ignore_ascii_case(b"* CAPABILITY"))
            {
                continue;
            }
            if let Ok(Response::Untagged(UntaggedResponse::Capability(caps))) =
                ResponseParser::parse(frame)
            {
                self.capabilities = caps;
            }
        }
    }

    pub(crate) fn transition<T>(self, state: T) -> Client<S, T> {
        Client {
            stream: self.stream,
            tags: self.tags,
            capabilities: self.capabilities,
            state,
        }
    }
}

fn is_tagged(frame: &[u8], tag: &str) -> bool {
    frame.strip_prefix(tag.as_bytes()).is_some_and(|rest| rest.first() == Some(&b' '))
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
    use tokio_test::io::Builder;

    use super::*;

    #[test]
    fn tag_matching() {
        assert!(is_tagged(b"M0001 OK done\r\n", "M0001"));
        assert!(!is_tagged(b"M00010 OK done\r\n", "M0001"));
        assert!(!is_tagged(b"* OK M0001\r\n", "M0001"));
    }

    #[tokio::test]
    async fn noop_collects_until_tag() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 IDLE] hi\r\n")
            .write(b"M0000 NOOP\r\n")
            .read(b"* 3 EXISTS\r\n")
            .read(b"M0000 OK NOOP done\r\n")
            .build();
        let mut client = Client::from_stream(mock).await.unwrap();
        assert!(client.supports_idle());
        client.noop().await.unwrap();
    }

    #[tokio::test]
    async fn untagged_bye_aborts_command() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"M0000 NOOP\r\n")
            .read(b"* BYE server shutting down\r\n")
            .build();
        let mut client = Client::from_stream(mock).await.unwrap();
        let err = client.noop().await.unwrap_err();
        assert!(matches!(err, Error::Bye(ref t) if t == "server shutting down"));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn capability_refresh_replaces_list() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"M0000 CAPABILITY\r\n")
            .read(b"* CAPABILITY IMAP4rev1 X-GM-EXT-1 CONDSTORE UIDPLUS\r\n")
            .read(b"M0000 OK done\r\n")
            .build();
        let mut client = Client::from_stream(mock).await.unwrap();
        assert!(!client.supports_gmail());
        client.refresh_capabilities().await.unwrap();
        assert!(client.supports_gmail());
        assert!(client.supports_condstore());
        assert!(client.supports_uidplus());
    }
}
