//! Daemon configuration file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use mailmirror_core::{AccountConfig, SyncConfig, SyncOptions};
use serde::{Deserialize, Serialize};

/// Contents of `config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Accounts to mirror. Each gets its own database.
    pub accounts: Vec<AccountConfig>,
    /// Engine settings shared by all accounts.
    #[serde(default)]
    pub sync: SyncConfig,
    /// Seconds between full account syncs.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    /// Fetch bodies, not only headers.
    #[serde(default = "default_bodies")]
    pub bodies: bool,
    /// Watch folders with IDLE between full syncs.
    #[serde(default = "default_idle")]
    pub idle: bool,
}

const fn default_interval() -> u64 {
    300
}

const fn default_bodies() -> bool {
    true
}

const fn default_idle() -> bool {
    true
}

impl DaemonConfig {
    /// Time between full syncs.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Options for every sync pass.
    #[must_use]
    pub fn options(&self) -> SyncOptions {
        SyncOptions {
            bodies: self.bodies,
            ..SyncOptions::default()
        }
    }

    /// Reads and parses `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("parsing {}", path.display()))?;
        anyhow::ensure!(
            !config.accounts.is_empty(),
            "{} lists no accounts",
            path.display()
        );
        Ok(config)
    }
}

/// `<config dir>/mailmirror/config.json`, or `MAILMIRROR_CONFIG` when set.
#[must_use]
pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os("MAILMIRROR_CONFIG") {
        return PathBuf::from(path);
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailmirror")
        .join("config.json")
}

/// `<data dir>/mailmirror`, home of the databases and lock files.
#[must_use]
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailmirror")
}

/// Database file of `account`.
#[must_use]
pub fn database_path(dir: &Path, account: &AccountConfig) -> PathBuf {
    let name: String = account
        .key()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '_' })
        .collect();
    dir.join(format!("{name}.db"))
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

    const SAMPLE: &str = r#"{
        "accounts": [
            {
                "host": "imap.gmail.com",
                "username": "me@gmail.com",
                "credential": { "kind": "password" }
            }
        ],
        "sync": { "batch_size": 500 },
        "interval_secs": 60
    }"#;

    #[test]
    fn parses_with_defaults() {
        let config: DaemonConfig = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(config.accounts.len(), 1);
        assert_eq!(config.sync.batch_size, 500);
        assert_eq!(config.sync.max_retries, SyncConfig::default().max_retries);
        assert_eq!(config.interval(), Duration::from_secs(60));
        assert!(config.bodies);
        assert!(config.idle);
        assert!(config.options().bodies);
    }

    #[tokio::test]
    async fn load_rejects_empty_account_list() {
        let path = std::env::temp_dir().join(format!("mailmirror-empty-{}.json", std::process::id()));
        tokio::fs::write(&path, r#"{ "accounts": [] }"#).await.unwrap();
        let err = DaemonConfig::load(&path).await.unwrap_err();
        assert!(err.to_string().contains("no accounts"));
        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[test]
    fn database_names_are_file_safe() {
        let account = AccountConfig::new("imap.gmail.com", "me@gmail.com");
        let path = database_path(Path::new("/data"), &account);
        assert_eq!(path, Path::new("/data/imap.gmail.com_me_gmail.com_mirror.db"));
    }
}
