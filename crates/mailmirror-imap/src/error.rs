//! Error types for the IMAP client.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the protocol client.
#[derive(Debug, Error)]
pub enum Error {
    /// Socket level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or record failure.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Host name not usable for TLS.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// Response did not match the grammar.
    #[error("Parse error at position {position}: {message}")]
    Parse {
        /// Byte offset into the response.
        position: usize,
        /// What was expected.
        message: String,
    },

    /// Credentials rejected. Never retried.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Tagged NO.
    #[error("Server returned NO: {0}")]
    No(String),

    /// Tagged BAD.
    #[error("Server returned BAD: {0}")]
    Bad(String),

    /// Server is closing the connection.
    #[error("Server sent BYE: {0}")]
    Bye(String),

    /// No response within the deadline.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Connection went away mid-command.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Operation not allowed in the current session state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Server broke the protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl Error {
    /// Returns true if reconnecting and repeating the command may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Timeout(_) | Self::ConnectionLost(_) | Self::Bye(_)
        )
    }

    /// Returns true for credential failures.
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    pub(crate) fn parse(position: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            position,
            message: message.into(),
        }
    }
}

/// Result alias for the client.
pub type Result<T> = std::result::Result<T, Error>;

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
    fn retryable_classification() {
        assert!(Error::ConnectionLost("reset".into()).is_retryable());
        assert!(Error::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(Error::Bye("shutting down".into()).is_retryable());
        assert!(!Error::Auth("bad password".into()).is_retryable());
        assert!(!Error::parse(3, "junk").is_retryable());
        assert!(Error::Auth("bad password".into()).is_auth());
    }
}
