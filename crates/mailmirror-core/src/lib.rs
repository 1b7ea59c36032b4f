//! # mailmirror-core
//!
//! Mirrors IMAP accounts into a local message store.
//!
//! This crate provides:
//! - The local store ([`MessageStore`], `SQLite` and in-memory)
//! - UID checkpoints and cross-folder deduplication ([`UidMapper`])
//! - Thread resolution over the whole store ([`ThreadResolver`])
//! - Incremental header/body sync with flag reconciliation ([`SyncEngine`])
//! - Queued local flag changes pushed on the next sync ([`FlagQueue`])
//! - IDLE-driven folder syncs ([`IdleWatcher`])

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod config;
mod error;
pub mod flags;
pub mod lock;
pub mod notify;
pub mod queue;
pub mod remote;
pub mod store;
pub mod sync;
pub mod threads;
pub mod uidmap;

pub use config::{AccountConfig, Credential, Security, SyncConfig};
pub use error::{Error, Result};
pub use lock::{AccountLock, LockOptions};
pub use notify::{ChannelNotifier, HttpNotifier, Notifier, NullNotifier, Update};
pub use queue::{FlagQueue, PendingChange};
pub use remote::{Connect, ImapConnector, Remote};
pub use store::{FlagDelta, FlagOp, LocalId, MemoryStore, MessageStore, Query, SqliteStore};
pub use sync::{FolderSpec, IdleWatcher, SyncEngine, SyncOptions, SyncReport, select_folders};
pub use threads::{Scope, ThreadResolver, Threads};
pub use uidmap::{MailboxKey, UidMapper};
