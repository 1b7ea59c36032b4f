//! Greeting and authentication.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::io::{AsyncRead, AsyncWrite};

use super::Client;
use super::states::{Authenticated, NotAuthenticated};
use crate::command::{Command, TagGenerator};
use crate::connection::framed::FramedStream;
use crate::parser::{Response, ResponseParser, UntaggedResponse};
use crate::types::{Capability, ResponseCode};
use crate::{Error, Result};

impl<S> Client<S, NotAuthenticated>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a fresh connection and reads the greeting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bye`] if the server refuses the connection.
    pub async fn from_stream(stream: S) -> Result<Self> {
        Self::from_framed(FramedStream::new(stream)).await
    }

    /// Like [`from_stream`](Self::from_stream) for an already framed stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bye`] if the server refuses the connection.
    pub async fn from_framed(mut stream: FramedStream<S>) -> Result<Self> {
        let greeting = stream.read_response().await?;
        let capabilities = match ResponseParser::parse(&greeting)? {
            Response::Untagged(UntaggedResponse::Bye { text, .. }) => {
                return Err(Error::Bye(text));
            }
            Response::Untagged(
                UntaggedResponse::Ok {
                    code: Some(ResponseCode::Capability(caps)),
                    ..
                }
                | UntaggedResponse::PreAuth {
                    code: Some(ResponseCode::Capability(caps)),
                    ..
                },
            ) => caps,
            _ => Vec::new(),
        };
        Ok(Self {
            stream,
            tags: TagGenerator::default(),
            capabilities,
            state: NotAuthenticated,
        })
    }

    /// LOGIN with a password.
    ///
    /// # Errors
    ///
    /// A rejected login is [`Error::Auth`]; the connection is consumed either way.
    pub async fn login(self, username: &str, password: &str) -> Result<Client<S, Authenticated>> {
        if self.has_capability(&Capability::LoginDisabled) {
            return Err(Error::Auth("server advertises LOGINDISABLED".into()));
        }
        let cmd = Command::Login {
            username: username.to_string(),
            password: password.to_string(),
        };
        self.finish_auth(&cmd, false).await
    }

    /// AUTHENTICATE XOAUTH2 with a bearer token, sent as a SASL initial response.
    ///
    /// # Errors
    ///
    /// A rejected token is [`Error::Auth`].
    pub async fn authenticate_xoauth2(
        self,
        username: &str,
        access_token: &str,
    ) -> Result<Client<S, Authenticated>> {
        let cmd = Command::Authenticate {
            mechanism: "XOAUTH2".to_string(),
            initial_response: Some(xoauth2_initial_response(username, access_token)),
        };
        self.finish_auth(&cmd, true).await
    }

    async fn finish_auth(mut self, cmd: &Command, sasl: bool) -> Result<Client<S, Authenticated>> {
        let before = self.capabilities.clone();
        let tag = self.tags.next();
        tracing::debug!(tag, command = cmd.name(), "imap command");
        self.stream.write_command(&cmd.serialize(&tag)).await?;
        match self.collect(&tag, sasl).await {
            Ok(_) => {}
            Err(Error::No(text) | Error::Bad(text)) => return Err(Error::Auth(text)),
            Err(e) => return Err(e),
        }
        let mut client = self.transition(Authenticated);
        // Servers often widen the list after login without saying so.
        if client.capabilities == before {
            client.refresh_capabilities().await?;
        }
        Ok(client)
    }
}

/// `base64("user=" user "\x01auth=Bearer " token "\x01\x01")`
#[must_use]
pub fn xoauth2_initial_response(username: &str, access_token: &str) -> String {
    STANDARD.encode(format!("user={username}\x01auth=Bearer {access_token}\x01\x01"))
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
    fn xoauth2_payload() {
        let encoded = xoauth2_initial_response("someuser@example.com", "ya29.vF9dft4qmTc2Nvb3RlckBhdHRhdmlzdGEuY29tCg");
        let decoded = STANDARD.decode(encoded).unwrap();
        assert_eq!(
            decoded,
            b"user=someuser@example.com\x01auth=Bearer ya29.vF9dft4qmTc2Nvb3RlckBhdHRhdmlzdGEuY29tCg\x01\x01"
        );
    }

    #[tokio::test]
    async fn greeting_bye_is_refused() {
        let mock = Builder::new().read(b"* BYE too many connections\r\n").build();
        let err = Client::from_stream(mock).await.unwrap_err();
        assert!(matches!(err, Error::Bye(_)));
    }

    #[tokio::test]
    async fn login_with_capability_code() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 AUTH=XOAUTH2] Gimap ready\r\n")
            .write(b"M0000 LOGIN me@example.com secret\r\n")
            .read(b"M0000 OK [CAPABILITY IMAP4rev1 IDLE X-GM-EXT-1 UIDPLUS] me authenticated\r\n")
            .build();
        let client = Client::from_stream(mock).await.unwrap();
        let client = client.login("me@example.com", "secret").await.unwrap();
        assert!(client.supports_gmail());
        assert!(client.supports_idle());
    }

    #[tokio::test]
    async fn login_refreshes_capabilities_when_silent() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1] ready\r\n")
            .write(b"M0000 LOGIN u p\r\n")
            .read(b"M0000 OK logged in\r\n")
            .write(b"M0001 CAPABILITY\r\n")
            .read(b"* CAPABILITY IMAP4rev1 CONDSTORE\r\n")
            .read(b"M0001 OK done\r\n")
            .build();
        let client = Client::from_stream(mock).await.unwrap();
        let client = client.login("u", "p").await.unwrap();
        assert!(client.supports_condstore());
    }

    #[tokio::test]
    async fn rejected_login_is_auth_error() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"M0000 LOGIN u wrong\r\n")
            .read(b"M0000 NO [AUTHENTICATIONFAILED] Invalid credentials\r\n")
            .build();
        let client = Client::from_stream(mock).await.unwrap();
        let err = client.login("u", "wrong").await.unwrap_err();
        assert!(err.is_auth());
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn xoauth2_failure_answers_challenge() {
        let initial = xoauth2_initial_response("u@example.com", "expired");
        let cmd = format!("M0000 AUTHENTICATE XOAUTH2 {initial}\r\n");
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(cmd.as_bytes())
            .read(b"+ eyJzdGF0dXMiOiI0MDEifQ==\r\n")
            .write(b"\r\n")
            .read(b"M0000 NO [AUTHENTICATIONFAILED] Invalid credentials (Failure)\r\n")
            .build();
        let client = Client::from_stream(mock).await.unwrap();
        let err = client
            .authenticate_xoauth2("u@example.com", "expired")
            .await
            .unwrap_err();
        assert!(err.is_auth());
    }
}
