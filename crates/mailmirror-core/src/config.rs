//! Sync and account configuration.

use std::time::Duration;

use mailmirror_imap::{Config, Credentials, SessionConfig};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Tuning knobs of the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// UIDs per header round-trip.
    pub batch_size: usize,
    /// Bytes per body round-trip.
    pub body_budget: u64,
    /// Attempts per batch before it is skipped.
    pub max_retries: u32,
    /// Base delay between attempts, multiplied by the attempt number.
    #[serde(with = "secs")]
    pub retry_backoff: Duration,
    /// Length of one IDLE cycle.
    #[serde(with = "secs")]
    pub idle_timeout: Duration,
    /// Age after which an account lock is considered stale.
    #[serde(with = "secs")]
    pub lock_timeout: Duration,
    /// Folders synced at the same time.
    pub parallel_folders: usize,
    /// Largest thread before a consistency warning.
    pub max_component: usize,
    /// Where to POST update notifications.
    pub notify_url: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: mailmirror_imap::fetch::DEFAULT_BATCH_SIZE,
            body_budget: mailmirror_imap::fetch::DEFAULT_BODY_BUDGET,
            max_retries: 3,
            retry_backoff: Duration::from_secs(2),
            idle_timeout: Duration::from_secs(10 * 60),
            lock_timeout: Duration::from_secs(180),
            parallel_folders: 4,
            max_component: 5000,
            notify_url: None,
        }
    }
}

impl SyncConfig {
    /// Sets the header batch size.
    #[must_use]
    pub const fn batch_size(mut self, n: usize) -> Self {
        self.batch_size = n;
        self
    }

    /// Sets the body byte budget.
    #[must_use]
    pub const fn body_budget(mut self, bytes: u64) -> Self {
        self.body_budget = bytes;
        self
    }

    /// Sets the retry count.
    #[must_use]
    pub const fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Sets the retry backoff base.
    #[must_use]
    pub const fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Sets the IDLE cycle length.
    #[must_use]
    pub const fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the stale lock age.
    #[must_use]
    pub const fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets the folder parallelism (at least one).
    #[must_use]
    pub fn parallel_folders(mut self, n: usize) -> Self {
        self.parallel_folders = n.max(1);
        self
    }

    /// Sets the notification endpoint.
    #[must_use]
    pub fn notify_url(mut self, url: impl Into<String>) -> Self {
        self.notify_url = Some(url.into());
        self
    }
}

/// Transport security of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Security {
    /// Implicit TLS.
    #[default]
    Tls,
    /// Plain TCP, local test servers only.
    Plain,
}

impl From<Security> for mailmirror_imap::Security {
    fn from(s: Security) -> Self {
        match s {
            Security::Tls => Self::Implicit,
            Security::Plain => Self::Plain,
        }
    }
}

/// How the account logs in.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Credential {
    /// LOGIN. A missing password is looked up by the caller, e.g. in a keyring.
    Password {
        /// Password or app password.
        #[serde(default)]
        password: Option<String>,
    },
    /// XOAUTH2 bearer token.
    #[serde(rename = "oauth2")]
    OAuth2 {
        /// Access token.
        access_token: String,
    },
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Password { password } => f
                .debug_struct("Password")
                .field("set", &password.is_some())
                .finish(),
            Self::OAuth2 { .. } => f.debug_struct("OAuth2").finish_non_exhaustive(),
        }
    }
}

/// One remote account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Server host.
    pub host: String,
    /// Server port; the security default when absent.
    #[serde(default)]
    pub port: Option<u16>,
    /// Login name.
    pub username: String,
    /// Login method.
    pub credential: Credential,
    /// Transport security.
    #[serde(default)]
    pub security: Security,
    /// Local tag distinguishing several mirrors of one login.
    #[serde(default = "default_tag")]
    pub tag: String,
}

fn default_tag() -> String {
    "mirror".to_string()
}

impl AccountConfig {
    /// Account with a password credential and default settings.
    #[must_use]
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            username: username.into(),
            credential: Credential::Password { password: None },
            security: Security::default(),
            tag: default_tag(),
        }
    }

    /// `host:user:tag`, the account part of every mailbox key.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}:{}:{}", self.host, self.username, self.tag)
    }

    /// Session settings for this account.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when a password credential has no password.
    pub fn session_config(&self, sync: &SyncConfig) -> Result<SessionConfig> {
        let credentials = match &self.credential {
            Credential::Password { password: Some(p) } => Credentials::Password {
                username: self.username.clone(),
                password: p.clone(),
            },
            Credential::Password { password: None } => {
                return Err(Error::Config(format!("no password for {}", self.key())));
            }
            Credential::OAuth2 { access_token } => Credentials::OAuth2 {
                username: self.username.clone(),
                access_token: access_token.clone(),
            },
        };
        let mut server = Config::builder(&self.host).security(self.security.into());
        if let Some(port) = self.port {
            server = server.port(port);
        }
        let server = server.build();
        Ok(SessionConfig::new(server, credentials)
            .reconnect_attempts(sync.max_retries)
            .reconnect_backoff(sync.retry_backoff))
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
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
    fn sync_config_defaults_fill_missing_fields() {
        let config: SyncConfig = serde_json::from_str(r#"{"batch_size": 10}"#).unwrap();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.body_budget, 50 * 1024 * 1024);
        assert_eq!(config.retry_backoff, Duration::from_secs(2));
        assert_eq!(config.lock_timeout, Duration::from_secs(180));
    }

    #[test]
    fn account_from_json() {
        let account: AccountConfig = serde_json::from_str(
            r#"{
                "host": "imap.gmail.com",
                "username": "me@gmail.com",
                "credential": {"kind": "oauth2", "access_token": "ya29"}
            }"#,
        )
        .unwrap();
        assert_eq!(account.key(), "imap.gmail.com:me@gmail.com:mirror");
        let session = account.session_config(&SyncConfig::default()).unwrap();
        assert_eq!(session.server.port, 993);
        assert!(matches!(session.credentials, Credentials::OAuth2 { .. }));
    }

    #[test]
    fn missing_password_is_a_config_error() {
        let account = AccountConfig::new("imap.example.com", "me");
        assert!(matches!(
            account.session_config(&SyncConfig::default()),
            Err(Error::Config(_))
        ));
    }
}
