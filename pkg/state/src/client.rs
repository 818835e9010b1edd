use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

use pkg_types::config::StoreUrl;

use crate::local::LocalStore;
use crate::memory::MemoryStore;
use crate::redis_store::RedisStore;

/// Messages received on a pub/sub channel. Dropping the receiver unsubscribes.
pub type Subscription = mpsc::Receiver<String>;

/// The shared key-value + pub/sub backend instances coordinate through.
///
/// Implementations MUST make `set_if_absent`, `expire_if_equals` and
/// `delete_if_equals` atomic: they are the only writes that establish,
/// extend or relinquish leadership.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Short backend label for logs and the health endpoint.
    fn backend_name(&self) -> &'static str;

    /// Retrieve the value for a key, or `None` if it does not exist or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store a value, replacing any previous one. `ttl = None` never expires.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;

    /// Create the key only if it is absent. Returns true if it was created.
    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool>;

    /// Reset the TTL of `key` only if its value equals `expected`.
    /// Returns false if the key is absent or holds something else.
    async fn expire_if_equals(&self, key: &str, expected: &[u8], ttl: Duration) -> Result<bool>;

    /// Delete a key. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Delete `key` only if its value equals `expected`. Returns true if deleted.
    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool>;

    /// List all live key-value pairs whose keys start with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Publish a message on a channel. Delivery is best-effort.
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    /// Subscribe to a channel.
    async fn subscribe(&self, channel: &str) -> Result<Subscription>;

    /// Release backend resources.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Open the backend described by `url`.
pub async fn open_store(url: &StoreUrl) -> Result<Arc<dyn CoordinationStore>> {
    info!("Opening coordination store {}", url);
    let store: Arc<dyn CoordinationStore> = match url {
        StoreUrl::Redis(url) => Arc::new(RedisStore::connect(url).await?),
        StoreUrl::Local(dir) => Arc::new(LocalStore::new(dir).await?),
        StoreUrl::Memory => Arc::new(MemoryStore::new()),
    };
    Ok(store)
}
