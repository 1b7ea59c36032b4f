//! Time-boxed IDLE (RFC 2177).
//!
//! One call is one IDLE cycle: enter, wait for the first change or the deadline,
//! then DONE. The caller loops, re-issuing IDLE well below the server's 30
//! minute inactivity limit.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;

use super::client::{Client, Selected};
use crate::command::Command;
use crate::parser::{FetchItem, Response, ResponseParser, UntaggedResponse};
use crate::types::{Flags, SeqNum, Status, Uid};
use crate::{Error, Result};

/// What ended an IDLE cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdleEvent {
    /// Message count changed; usually new mail.
    Exists(u32),
    /// A message went away.
    Expunge(SeqNum),
    /// Flags changed on a message.
    Fetch {
        /// Sequence number of the message.
        seq: SeqNum,
        /// UID, when the server included it.
        uid: Option<Uid>,
        /// New flags.
        flags: Flags,
    },
    /// Deadline reached with no change.
    Timeout,
}

impl<S> Client<S, Selected>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Runs one IDLE cycle of at most `wait`.
    ///
    /// # Errors
    ///
    /// [`Error::Bye`] if the server hangs up, [`Error::No`] if it refuses IDLE.
    pub async fn idle(&mut self, wait: Duration) -> Result<IdleEvent> {
        let tag = self.tags.next();
        tracing::debug!(tag, mailbox = %self.mailbox(), ?wait, "entering IDLE");
        self.stream.write_command(&Command::Idle.serialize(&tag)).await?;

        let accepted = self.stream.read_response().await?;
        if !accepted.starts_with(b"+") {
            return Err(match ResponseParser::parse(&accepted)? {
                Response::Tagged {
                    status: Status::Bad,
                    text,
                    ..
                } => Error::Bad(text),
                Response::Tagged { text, .. } => Error::No(text),
                _ => Error::Protocol("IDLE not accepted".into()),
            });
        }

        let deadline = Instant::now() + wait;
        let event = loop {
            let left = deadline.saturating_duration_since(Instant::now());
            let Some(frame) = self.stream.read_response_within(left).await? else {
                break IdleEvent::Timeout;
            };
            match ResponseParser::parse(&frame) {
                Ok(Response::Untagged(untagged)) => {
                    if let Some(event) = to_event(untagged)? {
                        break event;
                    }
                }
                Ok(Response::Tagged { text, .. }) => {
                    return Err(Error::Protocol(format!("IDLE ended by server: {text}")));
                }
                Ok(Response::Continuation { .. }) => {}
                Err(e) => tracing::trace!(error = %e, "ignoring unparsable frame during IDLE"),
            }
        };

        self.stream.write_command(&Command::Done.serialize("")).await?;
        self.collect(&tag, false).await?;
        tracing::debug!(?event, "IDLE finished");
        Ok(event)
    }
}

fn to_event(untagged: UntaggedResponse) -> Result<Option<IdleEvent>> {
    Ok(match untagged {
        UntaggedResponse::Exists(n) => Some(IdleEvent::Exists(n)),
        UntaggedResponse::Expunge(seq) => Some(IdleEvent::Expunge(seq)),
        UntaggedResponse::Fetch { seq, items } => {
            let mut uid = None;
            let mut flags = Flags::new();
            for item in items {
                match item {
                    FetchItem::Uid(u) => uid = Some(u),
                    FetchItem::Flags(f) => flags = f,
                    _ => {}
                }
            }
            Some(IdleEvent::Fetch { seq, uid, flags })
        }
        UntaggedResponse::Bye { text, .. } => return Err(Error::Bye(text)),
        // Keep-alives such as `* OK Still here` and `* n RECENT`.
        _ => None,
    })
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
    use crate::types::Mailbox;

    fn open_script(builder: &mut Builder) -> &mut Builder {
        builder
            .read(b"* OK [CAPABILITY IMAP4rev1 IDLE] ready\r\n")
            .write(b"M0000 LOGIN u p\r\n")
            .read(b"M0000 OK [CAPABILITY IMAP4rev1 IDLE UIDPLUS] done\r\n")
            .write(b"M0001 EXAMINE INBOX\r\n")
            .read(b"M0001 OK [READ-ONLY] done\r\n")
            .write(b"M0002 IDLE\r\n")
            .read(b"+ idling\r\n")
    }

    async fn opened(mock: Mock) -> Client<Mock, Selected> {
        let client = Client::from_stream(mock).await.unwrap();
        let client = client.login("u", "p").await.unwrap();
        client.select(&Mailbox::inbox(), true).await.unwrap()
    }

    #[tokio::test]
    async fn exists_ends_cycle() {
        let mock = open_script(&mut Builder::new())
            .read(b"* OK Still here\r\n")
            .read(b"* 23 EXISTS\r\n")
            .write(b"DONE\r\n")
            .read(b"M0002 OK IDLE terminated\r\n")
            .build();
        let mut client = opened(mock).await;
        let event = client.idle(Duration::from_secs(60)).await.unwrap();
        assert_eq!(event, IdleEvent::Exists(23));
    }

    #[tokio::test]
    async fn flag_change_carries_uid() {
        let mock = open_script(&mut Builder::new())
            .read(b"* 4 FETCH (FLAGS (\\Seen) UID 99)\r\n")
            .write(b"DONE\r\n")
            .read(b"M0002 OK done\r\n")
            .build();
        let mut client = opened(mock).await;
        let IdleEvent::Fetch { seq, uid, flags } =
            client.idle(Duration::from_secs(60)).await.unwrap()
        else {
            panic!("expected a FETCH event");
        };
        assert_eq!(seq.get(), 4);
        assert_eq!(uid.map(Uid::get), Some(99));
        assert!(flags.is_seen());
    }

    #[tokio::test]
    async fn bye_during_idle_is_retryable() {
        let mock = open_script(&mut Builder::new())
            .read(b"* BYE idle too long\r\n")
            .build();
        let mut client = opened(mock).await;
        let err = client.idle(Duration::from_secs(60)).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn recent_is_not_an_event() {
        assert_eq!(to_event(UntaggedResponse::Recent(1)).unwrap(), None);
    }
}
