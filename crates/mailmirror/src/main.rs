//! `mailmirrord` - keeps local mirrors of IMAP accounts up to date.
//!
//! Runs a full sync of every configured account at start and then every
//! `interval_secs`, with IDLE watchers syncing single folders in between.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod config;
mod credentials;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use mailmirror_core::{
    AccountConfig, Error, HttpNotifier, IdleWatcher, ImapConnector, Notifier, NullNotifier,
    SqliteStore, SyncEngine, SyncOptions,
};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::DaemonConfig;

type Engine = SyncEngine<SqliteStore, ImapConnector>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "mailmirror=info,mailmirror_core=info,mailmirror_imap=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let path = config::config_path();
    let config = DaemonConfig::load(&path).await?;
    info!(config = %path.display(), accounts = config.accounts.len(), "Starting mailmirrord");

    let data_dir = config::data_dir();
    tokio::fs::create_dir_all(&data_dir)
        .await
        .with_context(|| format!("creating {}", data_dir.display()))?;

    let (shutdown, stop) = watch::channel(false);
    let mut accounts = JoinSet::new();
    for account in &config.accounts {
        let engine = open_engine(&config, account.clone(), &data_dir, stop.clone()).await?;
        accounts.spawn(run_account(engine, config.clone(), stop.clone()));
    }

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("waiting for Ctrl-C")?;
            info!("Shutting down");
        }
        () = wait_all(&mut accounts) => {
            warn!("All accounts stopped");
        }
    }
    let _ = shutdown.send(true);
    wait_all(&mut accounts).await;
    Ok(())
}

async fn wait_all(accounts: &mut JoinSet<()>) {
    while let Some(joined) = accounts.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "account task failed");
        }
    }
}

/// Builds the engine of one account on its own database.
async fn open_engine(
    config: &DaemonConfig,
    account: AccountConfig,
    data_dir: &Path,
    stop: watch::Receiver<bool>,
) -> anyhow::Result<Arc<Engine>> {
    let account = credentials::resolve(account)?;
    let db_path = config::database_path(data_dir, &account);
    let store = SqliteStore::new(&db_path.to_string_lossy())
        .await
        .with_context(|| format!("opening {}", db_path.display()))?;
    let connector = ImapConnector::new(&account, &config.sync)?;
    let notifier: Arc<dyn Notifier> = match &config.sync.notify_url {
        Some(url) => Arc::new(HttpNotifier::new(url.as_str())),
        None => Arc::new(NullNotifier),
    };
    info!(account = %account.key(), database = %db_path.display(), "Account ready");
    Ok(Arc::new(
        SyncEngine::new(Arc::new(store), connector, account, config.sync.clone())
            .lock_dir(data_dir.join("locks"))
            .notifier(notifier)
            .cancel_on(stop),
    ))
}

/// Initial sync, then periodic syncs plus IDLE until shutdown or a rejected
/// login.
async fn run_account(engine: Arc<Engine>, config: DaemonConfig, mut stop: watch::Receiver<bool>) {
    let options = config.options();
    if !sync_once(&engine, &options).await {
        return;
    }

    let watcher = if config.idle {
        match engine.folders(&options).await {
            Ok(folders) => Some(IdleWatcher::spawn(Arc::clone(&engine), folders, options.clone())),
            Err(e) => {
                warn!(error = %e, "Could not list folders, running without IDLE");
                None
            }
        }
    } else {
        None
    };

    let mut ticker = tokio::time::interval(config.interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !sync_once(&engine, &options).await {
                    break;
                }
            }
            _ = stop.changed() => break,
        }
    }

    if let Some(watcher) = watcher {
        watcher.shutdown().await;
    }
}

/// One account sync. Returns false when the account should stop.
async fn sync_once(engine: &Arc<Engine>, options: &SyncOptions) -> bool {
    match engine.sync_account(options).await {
        Ok(reports) => {
            let new: usize = reports.iter().map(|r| r.new).sum();
            info!(?engine, folders = reports.len(), new, "Sync complete");
            true
        }
        Err(Error::Locked { target, minutes }) => {
            warn!(account = %target, minutes, "Account busy, skipping this sync");
            true
        }
        Err(Error::Cancelled) => false,
        Err(e) if e.is_auth() => {
            error!(?engine, error = %e, "Login rejected, giving up on account");
            false
        }
        Err(e) => {
            error!(?engine, error = %e, "Sync failed");
            true
        }
    }
}
