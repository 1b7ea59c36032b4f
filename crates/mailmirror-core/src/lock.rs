//! Per-account lock file.
//!
//! Only one sync may run against an account at a time. The lock is a file
//! under the data directory holding the owner's pid, process instance and
//! start time. It is stolen when the owner is gone or the lock is older than
//! the timeout. A lock held by this process is never stolen on age.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use crate::{Error, Result};

const POLL: Duration = Duration::from_millis(250);

/// Tells this process apart from an earlier one that had the same pid.
static INSTANCE: LazyLock<String> = LazyLock::new(|| uuid::Uuid::new_v4().to_string());

/// How [`AccountLock::acquire`] treats an existing lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Locks older than this are stolen.
    pub timeout: Duration,
    /// How long to wait for a live lock. Zero fails at once.
    pub wait: Duration,
    /// Steal any existing lock.
    pub force: bool,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(180),
            wait: Duration::ZERO,
            force: false,
        }
    }
}

impl LockOptions {
    /// Options with the given stale timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    /// Sets how long to wait for a live lock.
    #[must_use]
    pub const fn wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// Steals existing locks unconditionally.
    #[must_use]
    pub const fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Owner {
    pid: u32,
    #[serde(default)]
    instance: String,
    started: DateTime<Utc>,
}

impl Owner {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            instance: INSTANCE.clone(),
            started: Utc::now(),
        }
    }

    fn is_this_process(&self) -> bool {
        self.pid == std::process::id() && self.instance == *INSTANCE
    }

    fn age(&self) -> Duration {
        (Utc::now() - self.started).to_std().unwrap_or_default()
    }

    #[cfg(target_os = "linux")]
    fn is_alive(&self) -> bool {
        Path::new(&format!("/proc/{}", self.pid)).exists()
    }

    #[cfg(not(target_os = "linux"))]
    fn is_alive(&self) -> bool {
        true
    }
}

/// Held account lock. Dropping it removes the lock file unless someone
/// stole it in the meantime.
#[derive(Debug)]
pub struct AccountLock {
    path: PathBuf,
    target: String,
    owner: Owner,
}

impl AccountLock {
    /// Lock file for `target` inside `dir`.
    #[must_use]
    pub fn path_for(dir: &Path, target: &str) -> PathBuf {
        let digest = format!("{:x}", Sha256::digest(target.as_bytes()));
        dir.join(format!("{}.lock", &digest[..16]))
    }

    /// Takes the lock for `target`.
    ///
    /// # Errors
    ///
    /// [`Error::Locked`] if another live holder keeps it past `options.wait`,
    /// or at once if this process already holds it. I/O errors otherwise.
    pub async fn acquire(dir: &Path, target: &str, options: LockOptions) -> Result<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let path = Self::path_for(dir, target);
        let deadline = tokio::time::Instant::now() + options.wait;

        loop {
            let owner = Owner::current();
            match Self::create(&path, &owner).await {
                Ok(()) => {
                    tracing::debug!(account = target, path = %path.display(), "account lock taken");
                    return Ok(Self {
                        path,
                        target: target.to_string(),
                        owner,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }

            let Some(owner) = Self::read_owner(&path).await else {
                // vanished or half-written; try again
                tokio::time::sleep(POLL).await;
                continue;
            };
            let age = owner.age();
            let reentrant = owner.is_this_process();
            let stale = !reentrant && (!owner.is_alive() || age > options.timeout);
            if options.force || stale {
                tracing::warn!(
                    account = target,
                    pid = owner.pid,
                    age_secs = age.as_secs(),
                    force = options.force,
                    "stealing account lock"
                );
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                continue;
            }

            if reentrant || tokio::time::Instant::now() >= deadline {
                return Err(Error::Locked {
                    target: target.to_string(),
                    minutes: age.as_secs() / 60,
                });
            }
            tokio::time::sleep(POLL).await;
        }
    }

    async fn create(path: &Path, owner: &Owner) -> std::io::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await?;
        let owner = serde_json::to_vec(owner).map_err(std::io::Error::other)?;
        file.write_all(&owner).await?;
        file.flush().await
    }

    async fn read_owner(path: &Path) -> Option<Owner> {
        let bytes = tokio::fs::read(path).await.ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Account key this lock is for.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }
}

impl Drop for AccountLock {
    fn drop(&mut self) {
        let current = std::fs::read(&self.path)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<Owner>(&bytes).ok());
        if current.as_ref() != Some(&self.owner) {
            tracing::warn!(account = %self.target, "account lock was taken over, leaving it");
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(account = %self.target, error = %e, "failed to remove account lock");
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
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "mailmirror-lock-{name}-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[tokio::test]
    async fn reentrant_attempt_fails_at_once() {
        let dir = scratch("reentrant");
        let held = AccountLock::acquire(&dir, "imap.example.com:ann:mirror", LockOptions::default())
            .await
            .unwrap();
        let err = AccountLock::acquire(&dir, "imap.example.com:ann:mirror", LockOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Locked { minutes: 0, .. }));

        let other = AccountLock::acquire(&dir, "imap.example.com:bob:mirror", LockOptions::default())
            .await
            .unwrap();
        drop(other);
        drop(held);
        assert!(!AccountLock::path_for(&dir, "imap.example.com:ann:mirror").exists());
    }

    #[tokio::test]
    async fn dead_owner_is_stolen() {
        let dir = scratch("dead");
        std::fs::create_dir_all(&dir).unwrap();
        let path = AccountLock::path_for(&dir, "acct");
        let owner = Owner {
            pid: u32::MAX - 1,
            instance: String::new(),
            started: Utc::now(),
        };
        std::fs::write(&path, serde_json::to_vec(&owner).unwrap()).unwrap();

        let lock = AccountLock::acquire(&dir, "acct", LockOptions::default())
            .await
            .unwrap();
        assert_eq!(lock.target(), "acct");
    }

    #[tokio::test]
    async fn old_lock_times_out_and_force_steals() {
        let dir = scratch("old");
        std::fs::create_dir_all(&dir).unwrap();
        let path = AccountLock::path_for(&dir, "acct");
        // same pid, earlier process
        let owner = Owner {
            pid: std::process::id(),
            instance: String::new(),
            started: Utc::now() - chrono::Duration::minutes(10),
        };
        std::fs::write(&path, serde_json::to_vec(&owner).unwrap()).unwrap();
        let lock = AccountLock::acquire(&dir, "acct", LockOptions::new(Duration::from_secs(60)))
            .await
            .unwrap();

        let forced = AccountLock::acquire(&dir, "acct", LockOptions::default().force(true))
            .await
            .unwrap();
        drop(lock);
        assert!(path.exists());
        drop(forced);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn own_lock_is_not_stolen_on_age() {
        let dir = scratch("own-age");
        let options = LockOptions::new(Duration::from_millis(1));
        let held = AccountLock::acquire(&dir, "acct", options).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = AccountLock::acquire(&dir, "acct", options).await.unwrap_err();
        assert!(matches!(err, Error::Locked { .. }));
        assert!(AccountLock::path_for(&dir, "acct").exists());
        drop(held);
        assert!(!AccountLock::path_for(&dir, "acct").exists());
    }
}
