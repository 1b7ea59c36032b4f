//! Error types for the core library.

use thiserror::Error;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Credentials rejected. Fatal for the account, never retried.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Network drop or timeout. Retried with backoff.
    #[error("Transient protocol error: {0}")]
    Transient(#[source] mailmirror_imap::Error),

    /// Server refused a command or broke the protocol.
    #[error("IMAP error: {0}")]
    Protocol(#[source] mailmirror_imap::Error),

    /// One response row or stored message could not be read.
    #[error("Malformed data: {0}")]
    Malformed(String),

    /// Message codec failure.
    #[error("Codec error: {0}")]
    Codec(#[from] mailmirror_mime::Error),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Store(#[from] sqlx::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Another sync holds the account lock.
    #[error("{target} is locked (held for {minutes} min)")]
    Locked {
        /// Account key.
        target: String,
        /// Age of the lock in minutes.
        minutes: u64,
    },

    /// The caller asked to stop.
    #[error("Sync cancelled")]
    Cancelled,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A flag update kept losing to concurrent writers.
    #[error("Concurrent update: {0}")]
    Conflict(String),

    /// A local message or folder does not exist.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Returns true if reconnecting and retrying may help.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Returns true for rejected credentials.
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

impl From<mailmirror_imap::Error> for Error {
    fn from(e: mailmirror_imap::Error) -> Self {
        if e.is_auth() {
            Self::Auth(e.to_string())
        } else if e.is_retryable() {
            Self::Transient(e)
        } else if let mailmirror_imap::Error::Parse { .. } = e {
            Self::Malformed(e.to_string())
        } else {
            Self::Protocol(e)
        }
    }
}

/// Result type alias using our Error type.
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
    use std::time::Duration;

    use super::*;

    #[test]
    fn imap_errors_are_classified() {
        let e: Error = mailmirror_imap::Error::Auth("bad password".into()).into();
        assert!(e.is_auth());
        let e: Error = mailmirror_imap::Error::Timeout(Duration::from_secs(5)).into();
        assert!(e.is_retryable());
        let e: Error = mailmirror_imap::Error::No("mailbox gone".into()).into();
        assert!(matches!(e, Error::Protocol(_)));
        assert!(!e.is_retryable());
    }
}
