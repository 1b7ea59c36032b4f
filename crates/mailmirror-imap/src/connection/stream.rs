//! TCP and TLS transports.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use super::config::{Config, Security};
use crate::{Error, Result};

/// Either a plain or a TLS socket.
pub enum ImapStream {
    /// Plain TCP.
    Plain(TcpStream),
    /// TLS over TCP, boxed to keep the enum small.
    Tls(Box<TlsStream<TcpStream>>),
}

impl ImapStream {
    /// Opens the transport described by `config` within its connect deadline.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] when the deadline passes, or the socket/TLS error.
    pub async fn connect(config: &Config) -> Result<Self> {
        tokio::time::timeout(config.connect_timeout, Self::open(config))
            .await
            .map_err(|_| Error::Timeout(config.connect_timeout))?
    }

    async fn open(config: &Config) -> Result<Self> {
        let tcp = TcpStream::connect(config.address()).await?;
        tcp.set_nodelay(true)?;
        match config.security {
            Security::Plain => Ok(Self::Plain(tcp)),
            Security::Implicit => {
                let name = ServerName::try_from(config.host.clone())?;
                let tls = tls_connector().connect(name, tcp).await?;
                tracing::debug!(host = %config.host, "TLS established");
                Ok(Self::Tls(Box::new(tls)))
            }
        }
    }

    /// Returns true for TLS transports.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }
}

/// Connector trusting the webpki root set.
#[must_use]
pub fn tls_connector() -> TlsConnector {
    let roots = rustls::RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

impl AsyncRead for ImapStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ImapStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_flush(cx),
            Self::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Self::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
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
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn plain_connect_to_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = Config::builder("127.0.0.1")
            .security(Security::Plain)
            .port(port)
            .connect_timeout(Duration::from_secs(5))
            .build();
        let (stream, accepted) = tokio::join!(ImapStream::connect(&config), listener.accept());
        assert!(!stream.unwrap().is_tls());
        assert!(accepted.is_ok());
    }
}
