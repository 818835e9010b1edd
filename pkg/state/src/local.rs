use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use slatedb::Db;
use slatedb::object_store::local::LocalFileSystem;
use slatedb::object_store::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use pkg_constants::defaults::LOCAL_SWEEP_INTERVAL_MS;

use crate::client::{CoordinationStore, Subscription};
use crate::watch::ChannelHub;

/// Coordination store backed by SlateDB on the local filesystem.
///
/// Meant for single-host deployments: leadership only matters between tasks
/// of one process, but checkpoints survive a restart so a cold start resumes
/// playback. Pub/sub is in-process.
///
/// Values are stored as an 8-byte big-endian expiry (unix millis, 0 = never)
/// followed by the payload. Reads hide expired records and delete the ones
/// they meet; a background sweep removes the rest.
#[derive(Clone)]
pub struct LocalStore {
    db: Db,
    hub: ChannelHub,
    // Serializes read-modify-write operations so the compare variants are atomic.
    write_lock: Arc<Mutex<()>>,
    sweeper: Arc<OnceLock<AbortHandle>>,
}

const HEADER_LEN: usize = 8;

fn encode(value: &[u8], ttl: Option<Duration>) -> Vec<u8> {
    let expires_at = ttl
        .map(|ttl| Utc::now().timestamp_millis().max(0) as u64 + ttl.as_millis() as u64)
        .unwrap_or(0);
    let mut buf = Vec::with_capacity(HEADER_LEN + value.len());
    buf.extend_from_slice(&expires_at.to_be_bytes());
    buf.extend_from_slice(value);
    buf
}

/// Returns the payload if the record is well-formed and not expired.
fn decode(raw: &[u8]) -> Option<&[u8]> {
    if raw.len() < HEADER_LEN {
        return None;
    }
    let (header, value) = raw.split_at(HEADER_LEN);
    let mut expiry = [0u8; HEADER_LEN];
    expiry.copy_from_slice(header);
    let expires_at = u64::from_be_bytes(expiry);
    let now = Utc::now().timestamp_millis().max(0) as u64;
    (expires_at == 0 || now < expires_at).then_some(value)
}

impl LocalStore {
    /// Open (or create) a store rooted at `path` on the local filesystem.
    pub async fn new(path: &std::path::Path) -> Result<Self> {
        info!("Opening SlateDB coordination store at {}", path.display());

        // Ensure the data directory exists before opening the object store
        std::fs::create_dir_all(path)
            .map_err(|e| anyhow!("Failed to create data directory {}: {}", path.display(), e))?;

        let object_store = Arc::new(
            LocalFileSystem::new_with_prefix(path)
                .map_err(|e| anyhow!("Failed to create local object store: {}", e))?,
        );
        let db = Db::open(Path::from("/"), object_store)
            .await
            .map_err(|e| anyhow!("Failed to open SlateDB: {}", e))?;
        let store = Self {
            db,
            hub: ChannelHub::default(),
            write_lock: Arc::new(Mutex::new(())),
            sweeper: Arc::new(OnceLock::new()),
        };
        let sweeper = store.spawn_sweeper(Duration::from_millis(LOCAL_SWEEP_INTERVAL_MS));
        let _ = store.sweeper.set(sweeper);
        Ok(store)
    }

    fn spawn_sweeper(&self, period: Duration) -> AbortHandle {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match store.purge_expired().await {
                    Ok(0) => {}
                    Ok(removed) => debug!("Swept {} expired record(s)", removed),
                    Err(e) => warn!("Expired record sweep failed: {}", e),
                }
            }
        })
        .abort_handle()
    }

    /// Delete every expired record. Returns how many were removed.
    pub async fn purge_expired(&self) -> Result<usize> {
        let (_, expired) = self.scan_live("").await?;
        self.purge(&expired).await
    }

    async fn raw_get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.db.get(key.as_bytes()).await {
            Ok(Some(bytes)) => Ok(Some(bytes.to_vec())),
            Ok(None) => Ok(None),
            Err(e) => Err(anyhow!("SlateDB get failed: {}", e)),
        }
    }

    async fn raw_put(&self, key: &str, record: &[u8]) -> Result<()> {
        self.db
            .put(key.as_bytes(), record)
            .await
            .map(|_| ())
            .map_err(|e| anyhow!("SlateDB put failed: {}", e))
    }

    async fn raw_delete(&self, key: &str) -> Result<()> {
        self.db
            .delete(key.as_bytes())
            .await
            .map(|_| ())
            .map_err(|e| anyhow!("SlateDB delete failed: {}", e))
    }

    /// Live entries under `prefix`, plus the keys of expired records seen.
    async fn scan_live(&self, prefix: &str) -> Result<(Vec<(String, Vec<u8>)>, Vec<String>)> {
        let mut live = Vec::new();
        let mut expired = Vec::new();
        let mut iter = self
            .db
            .scan_prefix(prefix.as_bytes())
            .await
            .map_err(|e| anyhow!("SlateDB scan_prefix failed: {}", e))?;

        while let Some(kv) = iter
            .next()
            .await
            .map_err(|e| anyhow!("SlateDB scan failed: {}", e))?
        {
            let key = String::from_utf8_lossy(&kv.key).into_owned();
            match decode(&kv.value) {
                Some(value) => live.push((key, value.to_vec())),
                None => expired.push(key),
            }
        }
        Ok((live, expired))
    }

    /// Delete those of `keys` that are still expired under the write lock.
    async fn purge(&self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let _guard = self.write_lock.lock().await;
        let mut removed = 0;
        for key in keys {
            let Some(raw) = self.raw_get(key).await? else {
                continue;
            };
            if decode(&raw).is_none() {
                self.raw_delete(key).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Live payload for `key`; expired records are removed on the way.
    async fn live_value(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let Some(raw) = self.raw_get(key).await? else {
            return Ok(None);
        };
        match decode(&raw) {
            Some(value) => Ok(Some(value.to_vec())),
            None => {
                debug!("Dropping expired record {}", key);
                self.raw_delete(key).await?;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl CoordinationStore for LocalStore {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let Some(raw) = self.raw_get(key).await? else {
            return Ok(None);
        };
        if let Some(value) = decode(&raw) {
            return Ok(Some(value.to_vec()));
        }
        // Re-read under the lock; a writer may have replaced the record.
        let _guard = self.write_lock.lock().await;
        self.live_value(key).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.raw_put(key, &encode(value, ttl)).await
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        if self.live_value(key).await?.is_some() {
            return Ok(false);
        }
        self.raw_put(key, &encode(value, Some(ttl))).await?;
        Ok(true)
    }

    async fn expire_if_equals(&self, key: &str, expected: &[u8], ttl: Duration) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        if self.live_value(key).await?.as_deref() != Some(expected) {
            return Ok(false);
        }
        self.raw_put(key, &encode(expected, Some(ttl))).await?;
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.raw_delete(key).await
    }

    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        if self.live_value(key).await?.as_deref() != Some(expected) {
            return Ok(false);
        }
        self.raw_delete(key).await?;
        Ok(true)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let (live, expired) = self.scan_live(prefix).await?;
        let removed = self.purge(&expired).await?;
        if removed > 0 {
            debug!("Dropped {} expired record(s) under {}", removed, prefix);
        }
        Ok(live)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        self.hub.publish(channel, payload).await;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        Ok(self.hub.subscribe(channel).await)
    }

    /// Flush and close the database.
    async fn close(&self) -> Result<()> {
        info!("Closing SlateDB coordination store");
        if let Some(sweeper) = self.sweeper.get() {
            sweeper.abort();
        }
        self.db
            .close()
            .await
            .map_err(|e| anyhow!("SlateDB close failed: {}", e))
    }
}
