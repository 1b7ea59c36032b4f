//! Folder watching with IMAP IDLE.

use std::sync::Arc;

use mailmirror_imap::IdleEvent;
use tokio::sync::watch;
use tokio::task::JoinSet;

use super::{FolderSpec, SyncEngine, SyncOptions};
use crate::remote::{Connect, Remote};
use crate::store::MessageStore;
use crate::{Error, Result};

/// One IDLE connection per folder. Any change the server announces runs a
/// folder sync.
#[derive(Debug)]
pub struct IdleWatcher {
    shutdown: watch::Sender<bool>,
    tasks: JoinSet<()>,
}

impl IdleWatcher {
    /// Starts watching `folders`.
    #[must_use]
    pub fn spawn<S, C>(
        engine: Arc<SyncEngine<S, C>>,
        folders: Vec<FolderSpec>,
        options: SyncOptions,
    ) -> Self
    where
        S: MessageStore,
        C: Connect,
    {
        let (shutdown, rx) = watch::channel(false);
        let mut tasks = JoinSet::new();
        for spec in folders {
            let engine = Arc::clone(&engine);
            let options = options.clone();
            let rx = rx.clone();
            tasks.spawn(async move { watch_folder(engine, spec, options, rx).await });
        }
        Self { shutdown, tasks }
    }

    /// Folders still watched.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// No folder is watched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Stops every watcher and waits for them.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                tracing::warn!(error = %e, "idle task failed");
            }
        }
    }
}

async fn watch_folder<S, C>(
    engine: Arc<SyncEngine<S, C>>,
    spec: FolderSpec,
    options: SyncOptions,
    mut shutdown: watch::Receiver<bool>,
) where
    S: MessageStore,
    C: Connect,
{
    let backoff = engine.config.retry_backoff;
    let mut attempt: u32 = 0;
    while !*shutdown.borrow() {
        // Connect and select
        let mut remote = match open(&engine, &spec).await {
            Ok(remote) => {
                attempt = 0;
                remote
            }
            Err(e) if e.is_auth() => {
                tracing::error!(folder = %spec.name(), error = %e, "idle login rejected");
                return;
            }
            Err(e) => {
                attempt = attempt.saturating_add(1);
                tracing::warn!(folder = %spec.name(), attempt, error = %e, "idle connect failed");
                tokio::select! {
                    () = tokio::time::sleep(backoff * attempt.min(10)) => continue,
                    _ = shutdown.changed() => return,
                }
            }
        };
        tracing::debug!(folder = %spec.name(), "idling");

        loop {
            let event = tokio::select! {
                event = remote.idle(engine.config.idle_timeout) => event,
                _ = shutdown.changed() => return,
            };
            match event {
                Ok(IdleEvent::Timeout) => {}
                Ok(event) => {
                    tracing::debug!(folder = %spec.name(), ?event, "server change");
                    match engine.sync_folder(&spec, &options).await {
                        Ok(_) => {}
                        Err(Error::Locked { .. }) => {
                            tracing::debug!(folder = %spec.name(), "account busy, skipping");
                        }
                        Err(e) if e.is_auth() => {
                            tracing::error!(folder = %spec.name(), error = %e, "sync login rejected");
                            return;
                        }
                        Err(e) => {
                            tracing::warn!(folder = %spec.name(), error = %e, "sync after idle failed");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(folder = %spec.name(), error = %e, "idle dropped, reconnecting");
                    break;
                }
            }
        }
    }
}

async fn open<S, C>(engine: &SyncEngine<S, C>, spec: &FolderSpec) -> Result<C::Remote>
where
    S: MessageStore,
    C: Connect,
{
    let mut remote = engine.connector.connect().await?;
    remote.select(&spec.mailbox, true).await?;
    Ok(remote)
}
