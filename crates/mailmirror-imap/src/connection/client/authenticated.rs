//! Mailbox-level commands shared by the logged-in states.

use tokio::io::{AsyncRead, AsyncWrite};

use super::states::{LoggedIn, Selected};
use super::{Client, Completion};
use crate::command::Command;
use crate::parser::{Response, ResponseParser, StatusItem, UntaggedResponse};
use crate::types::{Flag, ListResponse, Mailbox, MailboxStatus, ResponseCode, Status, Uid};
use crate::{Error, Result};

impl<S, State> Client<S, State>
where
    S: AsyncRead + AsyncWrite + Unpin,
    State: LoggedIn,
{
    /// LIST with SPECIAL-USE attributes as the server reports them.
    ///
    /// # Errors
    ///
    /// Returns the protocol or I/O error.
    pub async fn list(&mut self, reference: &str, pattern: &str) -> Result<Vec<ListResponse>> {
        let done = self
            .run(&Command::List {
                reference: reference.to_string(),
                pattern: pattern.to_string(),
            })
            .await?;
        Ok(done
            .responses()
            .filter_map(|r| match r {
                UntaggedResponse::List(item) => Some(item),
                _ => None,
            })
            .collect())
    }

    /// STATUS (UIDNEXT UIDVALIDITY) without selecting the mailbox.
    ///
    /// # Errors
    ///
    /// Returns the protocol or I/O error.
    pub async fn status(&mut self, mailbox: &Mailbox) -> Result<MailboxStatus> {
        let done = self
            .run(&Command::Status {
                mailbox: mailbox.clone(),
            })
            .await?;
        let mut status = MailboxStatus::default();
        for response in done.responses() {
            let UntaggedResponse::Status { items, .. } = response else {
                continue;
            };
            for item in items {
                match item {
                    StatusItem::Messages(n) => status.exists = n,
                    StatusItem::UidNext(uid) => status.uid_next = Some(uid),
                    StatusItem::UidValidity(v) => status.uid_validity = Some(v),
                    StatusItem::HighestModSeq(m) => status.highest_mod_seq = Some(m),
                    StatusItem::Unseen(_) => {}
                }
            }
        }
        Ok(status)
    }

    /// ENABLE, returning what the server confirmed.
    ///
    /// # Errors
    ///
    /// Returns the protocol or I/O error.
    pub async fn enable(&mut self, capabilities: &[&str]) -> Result<Vec<String>> {
        let done = self
            .run(&Command::Enable {
                capabilities: capabilities.iter().map(ToString::to_string).collect(),
            })
            .await?;
        Ok(done
            .responses()
            .filter_map(|r| match r {
                UntaggedResponse::Enabled(caps) => Some(caps),
                _ => None,
            })
            .flatten()
            .map(|c| c.to_string())
            .collect())
    }

    /// APPEND `message`, returning its UID when the server reports APPENDUID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::No`] when the server rejects the message.
    pub async fn append(
        &mut self,
        mailbox: &Mailbox,
        flags: &[Flag],
        internal_date: Option<&str>,
        message: &[u8],
    ) -> Result<Option<Uid>> {
        let tag = self.tags.next();
        let cmd = Command::Append {
            mailbox: mailbox.clone(),
            flags: flags.to_vec(),
            internal_date: internal_date.map(str::to_string),
            size: message.len(),
        };
        tracing::debug!(tag, mailbox = %mailbox, bytes = message.len(), "imap command APPEND");
        self.stream.write_command(&cmd.serialize(&tag)).await?;

        loop {
            let frame = self.stream.read_response().await?;
            if frame.starts_with(b"+") {
                break;
            }
            if let Ok(Response::Tagged { status, text, .. }) = ResponseParser::parse(&frame) {
                return Err(match status {
                    Status::Bad => Error::Bad(text),
                    Status::Bye => Error::Bye(text),
                    _ => Error::No(text),
                });
            }
        }
        self.stream.write_literal(message).await?;
        let done = self.collect(&tag, false).await?;
        Ok(match done.code {
            Some(ResponseCode::AppendUid { uid, .. }) => Some(uid),
            _ => None,
        })
    }

    /// SELECT (read-write) or EXAMINE (read-only). CONDSTORE is requested when advertised.
    ///
    /// # Errors
    ///
    /// Returns [`Error::No`] for a missing mailbox; the connection is consumed.
    pub async fn select(mut self, mailbox: &Mailbox, read_only: bool) -> Result<Client<S, Selected>> {
        let condstore = self.supports_condstore();
        let cmd = if read_only {
            Command::Examine {
                mailbox: mailbox.clone(),
                condstore,
            }
        } else {
            Command::Select {
                mailbox: mailbox.clone(),
                condstore,
            }
        };
        let done = self.run(&cmd).await?;
        let status = mailbox_status(&done, read_only);
        tracing::debug!(
            mailbox = %mailbox,
            exists = status.exists,
            uidvalidity = ?status.uid_validity.map(|v| v.get()),
            uidnext = status.uid_next_or_default(),
            "mailbox opened"
        );
        Ok(self.transition(Selected {
            mailbox: mailbox.clone(),
            read_only: status.read_only,
            status,
        }))
    }
}

/// Folds SELECT/EXAMINE output into a [`MailboxStatus`].
pub(crate) fn mailbox_status(done: &Completion, read_only: bool) -> MailboxStatus {
    let mut status = MailboxStatus {
        read_only,
        ..MailboxStatus::default()
    };
    for response in done.responses() {
        match response {
            UntaggedResponse::Exists(n) => status.exists = n,
            UntaggedResponse::Recent(n) => status.recent = n,
            UntaggedResponse::Flags(flags) => status.flags = flags,
            UntaggedResponse::Ok { code: Some(code), .. } => apply_code(&code, &mut status),
            _ => {}
        }
    }
    if let Some(code) = &done.code {
        apply_code(code, &mut status);
    }
    status
}

fn apply_code(code: &ResponseCode, status: &mut MailboxStatus) {
    match code {
        ResponseCode::UidNext(uid) => status.uid_next = Some(*uid),
        ResponseCode::UidValidity(v) => status.uid_validity = Some(*v),
        ResponseCode::HighestModSeq(m) => status.highest_mod_seq = Some(*m),
        ResponseCode::NoModSeq => status.highest_mod_seq = None,
        ResponseCode::ReadOnly => status.read_only = true,
        ResponseCode::ReadWrite => status.read_only = false,
        _ => {}
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
    use tokio_test::io::Builder;

    use super::*;
    use crate::types::MailboxAttribute;

    const GREETING: &[u8] = b"* OK [CAPABILITY IMAP4rev1 UIDPLUS CONDSTORE] ready\r\n";

    async fn logged_in(mock: tokio_test::io::Mock) -> Client<tokio_test::io::Mock, super::super::Authenticated> {
        let client = Client::from_stream(mock).await.unwrap();
        client.login("u", "p").await.unwrap()
    }

    fn login_script(builder: &mut Builder) -> &mut Builder {
        builder
            .read(GREETING)
            .write(b"M0000 LOGIN u p\r\n")
            .read(b"M0000 OK [CAPABILITY IMAP4rev1 UIDPLUS CONDSTORE IDLE] done\r\n")
    }

    #[tokio::test]
    async fn list_reports_special_use() {
        let mock = login_script(&mut Builder::new())
            .write(b"M0001 LIST \"\" \"*\"\r\n")
            .read(b"* LIST (\\HasNoChildren) \"/\" \"INBOX\"\r\n")
            .read(b"* LIST (\\All \\HasNoChildren) \"/\" \"[Gmail]/All Mail\"\r\n")
            .read(b"M0001 OK done\r\n")
            .build();
        let mut client = logged_in(mock).await;
        let list = client.list("", "*").await.unwrap();
        assert_eq!(list.len(), 2);
        assert!(list[1].has(&MailboxAttribute::All));
        assert_eq!(list[1].mailbox.as_str(), "[Gmail]/All Mail");
    }

    #[tokio::test]
    async fn examine_with_condstore_reads_status() {
        let mock = login_script(&mut Builder::new())
            .write(b"M0001 EXAMINE INBOX (CONDSTORE)\r\n")
            .read(b"* FLAGS (\\Answered \\Flagged \\Deleted \\Seen \\Draft)\r\n")
            .read(b"* 172 EXISTS\r\n")
            .read(b"* OK [UIDVALIDITY 3857529045] UIDs valid\r\n")
            .read(b"* OK [UIDNEXT 4392] Predicted next UID\r\n")
            .read(b"* OK [HIGHESTMODSEQ 715194045007] Highest\r\n")
            .read(b"M0001 OK [READ-ONLY] EXAMINE completed\r\n")
            .build();
        let client = logged_in(mock).await;
        let selected = client.select(&Mailbox::inbox(), true).await.unwrap();
        let status = selected.state.status();
        assert_eq!(status.exists, 172);
        assert_eq!(status.uid_validity.unwrap().get(), 3857529045);
        assert_eq!(status.uid_next_or_default(), 4392);
        assert_eq!(status.highest_mod_seq, Some(715194045007));
        assert!(status.read_only);
        assert_eq!(status.flags.len(), 5);
    }

    #[tokio::test]
    async fn append_returns_appenduid() {
        let mock = login_script(&mut Builder::new())
            .write(b"M0001 APPEND INBOX (\\Seen) {5}\r\n")
            .read(b"+ Ready for literal data\r\n")
            .write(b"hello")
            .write(b"\r\n")
            .read(b"M0001 OK [APPENDUID 38505 3955] APPEND completed\r\n")
            .build();
        let mut client = logged_in(mock).await;
        let uid = client
            .append(&Mailbox::inbox(), &[Flag::Seen], None, b"hello")
            .await
            .unwrap();
        assert_eq!(uid.map(Uid::get), Some(3955));
    }

    #[tokio::test]
    async fn append_rejected_before_literal() {
        let mock = login_script(&mut Builder::new())
            .write(b"M0001 APPEND Nope {2}\r\n")
            .read(b"M0001 NO [TRYCREATE] no such mailbox\r\n")
            .build();
        let mut client = logged_in(mock).await;
        let err = client
            .append(&Mailbox::new("Nope"), &[], None, b"hi")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::No(_)));
    }

    #[tokio::test]
    async fn status_without_select() {
        let mock = login_script(&mut Builder::new())
            .write(b"M0001 STATUS INBOX (UIDNEXT UIDVALIDITY)\r\n")
            .read(b"* STATUS INBOX (UIDNEXT 44 UIDVALIDITY 9)\r\n")
            .read(b"M0001 OK done\r\n")
            .build();
        let mut client = logged_in(mock).await;
        let status = client.status(&Mailbox::inbox()).await.unwrap();
        assert_eq!(status.uid_next_or_default(), 44);
        assert_eq!(status.uid_validity.unwrap().get(), 9);
    }
}
