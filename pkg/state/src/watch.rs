use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::debug;

use crate::client::Subscription;

/// In-process pub/sub used by the memory and local backends.
///
/// Each channel is a broadcast sender created on first use. Subscribers get
/// an `mpsc` receiver fed by a forwarding task, so a slow subscriber only
/// loses its own backlog.
#[derive(Clone)]
pub struct ChannelHub {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<String>>>>,
    capacity: usize,
}

impl ChannelHub {
    /// Create a hub whose channels buffer up to `capacity` messages each.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    async fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        if let Some(tx) = self.channels.read().await.get(channel) {
            return tx.clone();
        }
        let mut channels = self.channels.write().await;
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Publish to every current subscriber. Returns how many received it.
    pub async fn publish(&self, channel: &str, payload: &str) -> usize {
        // No receivers is not an error for pub/sub.
        self.sender(channel)
            .await
            .send(payload.to_string())
            .unwrap_or(0)
    }

    /// Subscribe to a channel. Messages published before this call are not seen.
    pub async fn subscribe(&self, channel: &str) -> Subscription {
        let mut source = self.sender(channel).await.subscribe();
        let (tx, rx) = mpsc::channel(self.capacity.max(1));
        let channel = channel.to_string();
        tokio::spawn(async move {
            loop {
                let payload = tokio::select! {
                    _ = tx.closed() => return,
                    msg = source.recv() => msg,
                };
                match payload {
                    Ok(payload) => {
                        if tx.send(payload).await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Subscriber on {} lagged, skipped {} messages", channel, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });
        rx
    }
}

impl Default for ChannelHub {
    fn default() -> Self {
        Self::new(256)
    }
}
