use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use pkg_constants::state::{CHECKPOINT_KEY_PREFIX, checkpoint_key};
use pkg_metrics::HaMetrics;
use pkg_state::CoordinationStore;
use pkg_types::playback::{CurrentTrack, PlaybackCheckpoint};

use crate::host::PlaybackSession;

/// Snapshot a session's observable state.
pub fn capture(session: &dyn PlaybackSession) -> PlaybackCheckpoint {
    PlaybackCheckpoint {
        session_key: session.session_key().to_string(),
        voice_channel_id: session.voice_channel_id().to_string(),
        text_channel_id: session.text_channel_id().to_string(),
        current: session.current_track().map(|track| CurrentTrack {
            track,
            position_ms: session.position(),
        }),
        queue: session.queue(),
        volume: session.volume(),
        repeat_mode: session.repeat_mode(),
        paused: session.is_paused(),
        saved_at: Utc::now(),
    }
}

/// Playback checkpoints in the coordination store, one per session, each
/// with a bounded TTL so a session nobody refreshes eventually disappears.
///
/// Also owns the per-session auto-save timers. Cheap to clone.
#[derive(Clone)]
pub struct CheckpointStore {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn CoordinationStore>,
    ttl: Duration,
    interval: Duration,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
    metrics: Arc<HaMetrics>,
}

impl CheckpointStore {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        ttl: Duration,
        interval: Duration,
        metrics: Arc<HaMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                ttl,
                interval,
                timers: Mutex::new(HashMap::new()),
                metrics,
            }),
        }
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        self.inner.timers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Write the session's current state, replacing any previous checkpoint.
    pub async fn save(&self, session: &dyn PlaybackSession) -> anyhow::Result<()> {
        let checkpoint = capture(session);
        let data = serde_json::to_vec(&checkpoint)?;
        let result = self
            .inner
            .store
            .set(
                &checkpoint_key(&checkpoint.session_key),
                &data,
                Some(self.inner.ttl),
            )
            .await;
        match &result {
            Ok(()) => {
                self.inner.metrics.checkpoints_saved.inc();
                debug!(
                    "Saved checkpoint for {} (position {}ms, {} queued)",
                    checkpoint.session_key,
                    checkpoint.current.as_ref().map_or(0, |c| c.position_ms),
                    checkpoint.queue.len()
                );
            }
            Err(_) => self.inner.metrics.checkpoint_save_errors.inc(),
        }
        result
    }

    /// The checkpoint for one session. Undecodable data counts as absent.
    pub async fn get(&self, session_key: &str) -> anyhow::Result<Option<PlaybackCheckpoint>> {
        let key = checkpoint_key(session_key);
        Ok(self
            .inner
            .store
            .get(&key)
            .await?
            .and_then(|raw| decode(&key, &raw)))
    }

    /// Every checkpoint currently in the store. Undecodable entries are skipped.
    pub async fn get_all(&self) -> anyhow::Result<Vec<PlaybackCheckpoint>> {
        let entries = self.inner.store.scan_prefix(CHECKPOINT_KEY_PREFIX).await?;
        Ok(entries
            .iter()
            .filter_map(|(key, raw)| decode(key, raw))
            .collect())
    }

    /// Remove a checkpoint. Removing an absent one is fine.
    pub async fn delete(&self, session_key: &str) -> anyhow::Result<()> {
        self.inner.store.delete(&checkpoint_key(session_key)).await
    }

    /// Save `session` now and then every checkpoint interval, while it has a
    /// current track (playing or paused). Re-arming a session replaces its
    /// previous timer.
    pub fn start_auto_save(&self, session: Arc<dyn PlaybackSession>) {
        let key = session.session_key().to_string();
        let period = self.inner.interval;
        let store = self.clone();
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now(), period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if session.current_track().is_none() {
                    debug!("Session {} idle, skipping checkpoint", task_key);
                    continue;
                }
                if let Err(e) = store.save(session.as_ref()).await {
                    warn!("Checkpoint for {} failed, retrying next tick: {}", task_key, e);
                }
            }
        });

        let mut timers = self.timers();
        if let Some(previous) = timers.insert(key.clone(), handle) {
            previous.abort();
            debug!("Replaced auto-save timer for {}", key);
        } else {
            info!(
                "Auto-saving {} every {}ms",
                key,
                self.inner.interval.as_millis()
            );
        }
        self.inner.metrics.autosave_sessions.set(timers.len() as i64);
    }

    /// Cancel one session's timer. Returns whether one was armed.
    pub fn stop_auto_save(&self, session_key: &str) -> bool {
        let mut timers = self.timers();
        let stopped = timers.remove(session_key).map(|h| h.abort()).is_some();
        self.inner.metrics.autosave_sessions.set(timers.len() as i64);
        stopped
    }

    /// Cancel every timer. Returns how many were armed.
    pub fn stop_all(&self) -> usize {
        let mut timers = self.timers();
        let count = timers.len();
        for (_, handle) in timers.drain() {
            handle.abort();
        }
        self.inner.metrics.autosave_sessions.set(0);
        count
    }

    /// Keys of sessions with an armed timer.
    pub fn armed_sessions(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.timers().keys().cloned().collect();
        keys.sort();
        keys
    }
}

fn decode(key: &str, raw: &[u8]) -> Option<PlaybackCheckpoint> {
    match serde_json::from_slice(raw) {
        Ok(checkpoint) => Some(checkpoint),
        Err(e) => {
            warn!("Ignoring corrupt checkpoint at {}: {}", key, e);
            None
        }
    }
}
