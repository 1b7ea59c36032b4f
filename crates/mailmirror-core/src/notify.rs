//! Update notifications for whoever displays the mirror.
//!
//! Notifying is fire-and-forget: a failed POST is logged and sync goes on.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::store::LocalId;

/// Messages touched by a sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Update {
    /// Local ids that were added or whose flags changed.
    pub updated_ids: Vec<LocalId>,
    /// Set when the pass started from an empty checkpoint.
    pub is_initial_sync: bool,
}

/// Receives [`Update`]s. Must not block.
pub trait Notifier: Send + Sync + 'static {
    /// Delivers `update`.
    fn notify(&self, update: Update);
}

/// Discards updates.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _update: Update) {}
}

/// POSTs each update as JSON to a URL.
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    http_client: Client,
    url: String,
}

impl HttpNotifier {
    /// Notifier posting to `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            url: url.into(),
        }
    }
}

impl Notifier for HttpNotifier {
    fn notify(&self, update: Update) {
        if update.updated_ids.is_empty() && !update.is_initial_sync {
            return;
        }
        let request = self.http_client.post(&self.url).json(&update);
        let url = self.url.clone();
        tokio::spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!(%url, count = update.updated_ids.len(), "update posted");
                }
                Ok(response) => {
                    tracing::warn!(%url, status = %response.status(), "notification rejected");
                }
                Err(e) => tracing::warn!(%url, error = %e, "notification failed"),
            }
        });
    }
}

/// Forwards updates to a channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Update>,
}

impl ChannelNotifier {
    /// Notifier and the receiving end of its channel.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Update>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, update: Update) {
        // receiver gone means nobody is listening
        let _ = self.tx.send(update);
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
    fn update_wire_format() {
        let update = Update {
            updated_ids: vec![3, 7],
            is_initial_sync: true,
        };
        assert_eq!(
            serde_json::to_string(&update).unwrap(),
            r#"{"updatedIds":[3,7],"isInitialSync":true}"#
        );
    }

    #[tokio::test]
    async fn channel_notifier_forwards() {
        let (notifier, mut rx) = ChannelNotifier::new();
        notifier.notify(Update {
            updated_ids: vec![1],
            is_initial_sync: false,
        });
        assert_eq!(rx.recv().await.unwrap().updated_ids, vec![1]);
    }

    #[tokio::test]
    async fn http_notifier_survives_unreachable_url() {
        let notifier = HttpNotifier::new("http://127.0.0.1:9/updates");
        notifier.notify(Update {
            updated_ids: vec![1],
            is_initial_sync: false,
        });
        tokio::task::yield_now().await;
    }
}
