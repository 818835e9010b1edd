use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::client::{CoordinationStore, Subscription};
use crate::watch::ChannelHub;

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// Process-local coordination store.
///
/// TTLs run on the tokio clock, so tests using `start_paused` control expiry
/// exactly. [`MemoryStore::client`] hands out extra handles onto the same
/// data, each with its own reachability switch, which is how several
/// simulated instances share one store and get partitioned independently.
#[derive(Clone)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    hub: ChannelHub,
    offline: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            hub: ChannelHub::default(),
            offline: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Another connection to the same store with an independent
    /// reachability switch.
    pub fn client(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            hub: self.hub.clone(),
            offline: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make every operation through this handle fail, as if the network
    /// between this instance and the store went away.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            bail!("memory store unreachable");
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        // Nothing panics while holding the lock, so poisoning can be ignored.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn live_value(entries: &mut HashMap<String, Entry>, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_online()?;
        Ok(Self::live_value(&mut self.lock(), key))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        self.check_online()?;
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        self.check_online()?;
        let mut entries = self.lock();
        if Self::live_value(&mut entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn expire_if_equals(&self, key: &str, expected: &[u8], ttl: Duration) -> Result<bool> {
        self.check_online()?;
        let mut entries = self.lock();
        if Self::live_value(&mut entries, key).as_deref() != Some(expected) {
            return Ok(false);
        }
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_online()?;
        self.lock().remove(key);
        Ok(())
    }

    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool> {
        self.check_online()?;
        let mut entries = self.lock();
        if Self::live_value(&mut entries, key).as_deref() != Some(expected) {
            return Ok(false);
        }
        entries.remove(key);
        Ok(true)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        self.check_online()?;
        let now = Instant::now();
        let mut entries = self.lock();
        entries.retain(|_, entry| entry.is_live(now));
        let mut results: Vec<(String, Vec<u8>)> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect();
        results.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(results)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        self.check_online()?;
        self.hub.publish(channel, payload).await;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        self.check_online()?;
        Ok(self.hub.subscribe(channel).await)
    }
}
