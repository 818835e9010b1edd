use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use pkg_constants::defaults::{RESTORE_SEARCH_TIMEOUT_MS, RESTORE_SEEK_TIMEOUT_MS};
use pkg_metrics::HaMetrics;
use pkg_types::playback::{PlaybackCheckpoint, RepeatMode, TrackInfo};

use crate::checkpoint::CheckpointStore;
use crate::host::{PlaybackSession, SessionHost, SessionOptions};

const RESTORED_NOTICE: &str = "Music playback was restored after a failover.";

/// Outcome of restoring a single checkpoint.
#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Restored,
    /// Checkpoint can never be resumed here; it is deleted.
    Dropped(&'static str),
}

/// Tracks to re-enqueue, in play order, and whether playback picks up
/// mid-way through the first one.
struct Plan {
    tracks: Vec<TrackInfo>,
    resume_current: bool,
}

/// Decide what a restored session should play.
///
/// Paused sessions do not advance. A current track that would have finished
/// during the outage is skipped, unless it repeats; on whole-queue repeat it
/// goes to the back of the queue.
fn plan(checkpoint: &PlaybackCheckpoint, now: chrono::DateTime<Utc>) -> Plan {
    let mut tracks = Vec::with_capacity(checkpoint.queue.len() + 1);
    let mut resume_current = false;
    let mut wrapped = None;

    if let Some(current) = &checkpoint.current {
        let finished = current.track.is_seekable() && checkpoint.resume_position(now).is_none();
        match (finished, checkpoint.repeat_mode) {
            (false, _) => {
                tracks.push(current.track.clone());
                resume_current = true;
            }
            (true, RepeatMode::Track) => tracks.push(current.track.clone()),
            (true, RepeatMode::Queue) => wrapped = Some(current.track.clone()),
            (true, RepeatMode::Off) => {}
        }
    }
    tracks.extend(checkpoint.queue.iter().cloned());
    tracks.extend(wrapped);

    Plan {
        tracks,
        resume_current,
    }
}

/// Rebuilds playback sessions from surviving checkpoints after this instance
/// takes over leadership.
#[derive(Clone)]
pub struct RestorationOrchestrator {
    host: Arc<dyn SessionHost>,
    checkpoints: CheckpointStore,
    seek_delay: Duration,
    search_timeout: Duration,
    seek_timeout: Duration,
    metrics: Arc<HaMetrics>,
}

impl RestorationOrchestrator {
    pub fn new(
        host: Arc<dyn SessionHost>,
        checkpoints: CheckpointStore,
        seek_delay: Duration,
        metrics: Arc<HaMetrics>,
    ) -> Self {
        Self {
            host,
            checkpoints,
            seek_delay,
            search_timeout: Duration::from_millis(RESTORE_SEARCH_TIMEOUT_MS),
            seek_timeout: Duration::from_millis(RESTORE_SEEK_TIMEOUT_MS),
            metrics,
        }
    }

    /// Restore every checkpoint in the store. Sessions are restored
    /// concurrently and independently; one failing never affects another.
    /// Returns how many sessions are playing again.
    pub async fn restore_all(&self) -> usize {
        let checkpoints = match self.checkpoints.get_all().await {
            Ok(checkpoints) => checkpoints,
            Err(e) => {
                warn!("Could not list checkpoints, nothing restored: {}", e);
                return 0;
            }
        };
        if checkpoints.is_empty() {
            info!("No playback checkpoints to restore");
            return 0;
        }

        info!("Restoring {} playback session(s)", checkpoints.len());
        let outcomes = join_all(checkpoints.iter().map(|cp| self.restore_checkpoint(cp))).await;
        let restored = outcomes
            .iter()
            .filter(|o| **o == Outcome::Restored)
            .count();
        info!(
            "Restored {}/{} playback session(s)",
            restored,
            checkpoints.len()
        );
        restored
    }

    async fn restore_checkpoint(&self, checkpoint: &PlaybackCheckpoint) -> Outcome {
        let outcome = match self.restore_one(checkpoint).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Failed to restore session {}: {:#}", checkpoint.session_key, e);
                Outcome::Dropped("restoration failed")
            }
        };

        match outcome {
            Outcome::Restored => self.metrics.sessions_restored.inc(),
            Outcome::Dropped(reason) => {
                warn!(
                    "Dropping checkpoint for {}: {}",
                    checkpoint.session_key, reason
                );
                self.metrics.sessions_dropped.inc();
                if let Err(e) = self.checkpoints.delete(&checkpoint.session_key).await {
                    warn!(
                        "Failed to delete checkpoint for {}, it will expire: {}",
                        checkpoint.session_key, e
                    );
                }
            }
        }
        outcome
    }

    async fn restore_one(&self, checkpoint: &PlaybackCheckpoint) -> Result<Outcome> {
        let exists = self
            .host
            .voice_channel_exists(&checkpoint.voice_channel_id)
            .await
            .with_context(|| format!("failed to look up {}", checkpoint.voice_channel_id))?;
        if !exists {
            return Ok(Outcome::Dropped("voice channel is gone"));
        }

        let plan = plan(checkpoint, Utc::now());
        let resolved = join_all(plan.tracks.iter().map(|t| self.resolve(&t.locator))).await;
        let resume_current = plan.resume_current && resolved.first().is_some_and(Option::is_some);
        let tracks: Vec<TrackInfo> = resolved.into_iter().flatten().collect();
        if tracks.is_empty() {
            return Ok(Outcome::Dropped("no track could be resolved"));
        }

        let session = self
            .host
            .create_session(
                &checkpoint.voice_channel_id,
                &checkpoint.text_channel_id,
                SessionOptions::default(),
            )
            .await
            .context("failed to create session")?;
        session.set_volume(checkpoint.volume).await?;
        session.set_repeat_mode(checkpoint.repeat_mode).await?;
        for track in tracks {
            session.enqueue(track).await?;
        }
        session.play().await.context("failed to start playback")?;

        if resume_current {
            self.seek_to_resume_point(checkpoint, session.as_ref()).await;
        }
        if checkpoint.paused {
            if let Err(e) = session.set_paused(true).await {
                warn!("Failed to pause restored session {}: {}", checkpoint.session_key, e);
            }
        }

        self.rearm(checkpoint, session.clone()).await;

        if let Err(e) = self
            .host
            .send_notice(&checkpoint.text_channel_id, RESTORED_NOTICE)
            .await
        {
            debug!("Failed to post restore notice for {}: {}", checkpoint.session_key, e);
        }
        info!("Restored playback session {}", checkpoint.session_key);
        Ok(Outcome::Restored)
    }

    /// Look a track up again. Any failure just drops that track.
    async fn resolve(&self, locator: &str) -> Option<TrackInfo> {
        match timeout(self.search_timeout, self.host.search_track(locator)).await {
            Ok(Ok(Some(track))) => Some(track),
            Ok(Ok(None)) => {
                debug!("Track {} no longer resolves, skipping", locator);
                None
            }
            Ok(Err(e)) => {
                warn!("Search for {} failed, skipping: {}", locator, e);
                None
            }
            Err(_) => {
                warn!("Search for {} timed out, skipping", locator);
                None
            }
        }
    }

    /// Wait for the transport to settle, then jump to where the track would
    /// be had it kept playing through the outage.
    async fn seek_to_resume_point(
        &self,
        checkpoint: &PlaybackCheckpoint,
        session: &dyn PlaybackSession,
    ) {
        tokio::time::sleep(self.seek_delay).await;
        // Measured after the grace delay; it counts toward the outage too.
        let Some(target) = checkpoint.resume_position(Utc::now()) else {
            debug!("No resume point for {}, not seeking", checkpoint.session_key);
            return;
        };
        if target == 0 {
            return;
        }
        match timeout(self.seek_timeout, session.seek(target)).await {
            Ok(Ok(())) => debug!("Seeked {} to {}ms", checkpoint.session_key, target),
            Ok(Err(e)) => warn!("Seek failed for {}: {}", checkpoint.session_key, e),
            Err(_) => warn!("Seek timed out for {}", checkpoint.session_key),
        }
    }

    /// Replace the old checkpoint with the restored state and keep saving it.
    async fn rearm(&self, checkpoint: &PlaybackCheckpoint, session: Arc<dyn PlaybackSession>) {
        if session.session_key() != checkpoint.session_key {
            if let Err(e) = self.checkpoints.delete(&checkpoint.session_key).await {
                warn!(
                    "Failed to delete superseded checkpoint {}: {}",
                    checkpoint.session_key, e
                );
            }
        }
        if let Err(e) = self.checkpoints.save(session.as_ref()).await {
            warn!(
                "Failed to checkpoint restored session {}: {}",
                session.session_key(),
                e
            );
        }
        self.checkpoints.start_auto_save(session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeHost, make_track};
    use chrono::TimeDelta;
    use pkg_state::CoordinationStore;
    use pkg_state::memory::MemoryStore;
    use pkg_types::playback::CurrentTrack;

    const SEEK_DELAY: Duration = Duration::from_millis(1500);

    fn make_checkpoint(key: &str, position: u64, age_ms: i64) -> PlaybackCheckpoint {
        PlaybackCheckpoint {
            session_key: key.to_string(),
            voice_channel_id: format!("vc-{}", key),
            text_channel_id: format!("tc-{}", key),
            current: Some(CurrentTrack {
                track: make_track(&format!("yt:{}-current", key), 180_000),
                position_ms: position,
            }),
            queue: vec![
                make_track(&format!("yt:{}-next", key), 200_000),
                make_track(&format!("yt:{}-last", key), 150_000),
            ],
            volume: 40,
            repeat_mode: RepeatMode::Off,
            paused: false,
            saved_at: Utc::now() - TimeDelta::milliseconds(age_ms),
        }
    }

    fn stock_catalog(host: &FakeHost, checkpoint: &PlaybackCheckpoint) {
        for track in checkpoint.tracks() {
            host.add_track(track);
        }
    }

    async fn put(backend: &MemoryStore, checkpoint: &PlaybackCheckpoint) {
        backend
            .set(
                &format!("player:{}", checkpoint.session_key),
                &serde_json::to_vec(checkpoint).unwrap(),
                None,
            )
            .await
            .unwrap();
    }

    fn make_orchestrator(
        backend: &MemoryStore,
        host: Arc<FakeHost>,
    ) -> (RestorationOrchestrator, CheckpointStore, Arc<HaMetrics>) {
        let metrics = Arc::new(HaMetrics::new());
        let checkpoints = CheckpointStore::new(
            Arc::new(backend.clone()),
            Duration::from_secs(120),
            Duration::from_secs(5),
            metrics.clone(),
        );
        let orchestrator =
            RestorationOrchestrator::new(host, checkpoints.clone(), SEEK_DELAY, metrics.clone());
        (orchestrator, checkpoints, metrics)
    }

    #[test]
    fn test_plan_keeps_unfinished_current() {
        let cp = make_checkpoint("g", 30_000, 9_000);
        let plan = plan(&cp, Utc::now());
        assert!(plan.resume_current);
        assert_eq!(plan.tracks.len(), 3);
        assert_eq!(plan.tracks[0].locator, "yt:g-current");
    }

    #[test]
    fn test_plan_skips_finished_current() {
        let mut cp = make_checkpoint("g", 178_000, 9_000);
        let finished = plan(&cp, Utc::now());
        assert!(!finished.resume_current);
        assert_eq!(finished.tracks[0].locator, "yt:g-next");
        assert_eq!(finished.tracks.len(), 2);

        cp.repeat_mode = RepeatMode::Queue;
        let wrapped = plan(&cp, Utc::now());
        assert_eq!(wrapped.tracks.last().unwrap().locator, "yt:g-current");
        assert_eq!(wrapped.tracks.len(), 3);

        cp.repeat_mode = RepeatMode::Track;
        let repeated = plan(&cp, Utc::now());
        assert_eq!(repeated.tracks[0].locator, "yt:g-current");
        assert!(!repeated.resume_current);
    }

    #[test]
    fn test_plan_paused_does_not_advance() {
        let mut cp = make_checkpoint("g", 178_000, 60_000);
        cp.paused = true;
        let plan = plan(&cp, Utc::now());
        assert!(plan.resume_current);
        assert_eq!(plan.tracks[0].locator, "yt:g-current");
    }

    #[tokio::test(start_paused = true)]
    async fn test_best_effort_restoration() {
        let backend = MemoryStore::new();
        let host = FakeHost::with_channels(&["vc-g1", "vc-g2"]);
        let checkpoints: Vec<_> = ["g1", "g2", "g3"]
            .iter()
            .map(|k| make_checkpoint(k, 30_000, 9_000))
            .collect();
        for cp in &checkpoints {
            stock_catalog(&host, cp);
            put(&backend, cp).await;
        }
        let (orchestrator, store, metrics) = make_orchestrator(&backend, host.clone());

        assert_eq!(orchestrator.restore_all().await, 2);

        // The checkpoint for the vanished channel is gone; the others were rewritten.
        assert!(store.get("g3").await.unwrap().is_none());
        assert!(store.get("g1").await.unwrap().is_some());
        assert!(store.get("g2").await.unwrap().is_some());
        assert_eq!(metrics.sessions_restored.get(), 2);
        assert_eq!(metrics.sessions_dropped.get(), 1);
        assert_eq!(
            store.armed_sessions(),
            vec!["g1".to_string(), "g2".to_string()]
        );
        assert_eq!(host.notices.lock().unwrap().len(), 2);
        assert!(host.session_for("vc-g3").is_none());
        store.stop_all();
    }

    #[tokio::test(start_paused = true)]
    async fn test_restored_session_state() {
        let backend = MemoryStore::new();
        let host = FakeHost::with_channels(&["vc-guild123"]);
        let mut cp = make_checkpoint("guild123", 30_000, 9_000);
        cp.repeat_mode = RepeatMode::Queue;
        stock_catalog(&host, &cp);
        put(&backend, &cp).await;
        let (orchestrator, store, _) = make_orchestrator(&backend, host.clone());

        assert_eq!(orchestrator.restore_all().await, 1);

        let session = host.session_for("vc-guild123").unwrap();
        let state = session.state.lock().unwrap();
        assert_eq!(state.current.as_ref().unwrap().locator, "yt:guild123-current");
        assert_eq!(state.queue.len(), 2);
        assert_eq!(state.volume, 40);
        assert_eq!(state.repeat_mode, RepeatMode::Queue);
        assert!(!state.paused);

        // Position plus the time spent down, never past the end.
        assert_eq!(state.seeks.len(), 1);
        let target = state.seeks[0];
        assert!(target >= 39_000, "seeked to {}", target);
        assert!(target < 45_000, "seeked to {}", target);
        drop(state);

        let notices = host.notices.lock().unwrap();
        assert_eq!(notices[0].0, "tc-guild123");
        drop(notices);
        store.stop_all();
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_track_not_seeked() {
        let backend = MemoryStore::new();
        let host = FakeHost::with_channels(&["vc-g"]);
        let cp = make_checkpoint("g", 179_000, 9_000);
        stock_catalog(&host, &cp);
        put(&backend, &cp).await;
        let (orchestrator, store, _) = make_orchestrator(&backend, host.clone());

        assert_eq!(orchestrator.restore_all().await, 1);

        let session = host.session_for("vc-g").unwrap();
        let state = session.state.lock().unwrap();
        assert_eq!(state.current.as_ref().unwrap().locator, "yt:g-next");
        assert_eq!(state.queue.len(), 1);
        assert!(state.seeks.is_empty());
        drop(state);
        store.stop_all();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_not_seeked() {
        let backend = MemoryStore::new();
        let host = FakeHost::with_channels(&["vc-radio"]);
        let mut cp = make_checkpoint("radio", 600_000, 9_000);
        if let Some(current) = cp.current.as_mut() {
            current.track.is_stream = true;
            current.track.duration_ms = 0;
        }
        stock_catalog(&host, &cp);
        put(&backend, &cp).await;
        let (orchestrator, store, _) = make_orchestrator(&backend, host.clone());

        assert_eq!(orchestrator.restore_all().await, 1);
        let session = host.session_for("vc-radio").unwrap();
        assert!(session.state.lock().unwrap().seeks.is_empty());
        store.stop_all();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_searches_drop_tracks() {
        let backend = MemoryStore::new();
        let host = FakeHost::with_channels(&["vc-g"]);
        let cp = make_checkpoint("g", 30_000, 1_000);
        stock_catalog(&host, &cp);
        host.broken_locators
            .lock()
            .unwrap()
            .insert("yt:g-next".to_string());
        host.catalog.lock().unwrap().remove("yt:g-last");
        put(&backend, &cp).await;
        let (orchestrator, store, _) = make_orchestrator(&backend, host.clone());

        assert_eq!(orchestrator.restore_all().await, 1);
        let session = host.session_for("vc-g").unwrap();
        let state = session.state.lock().unwrap();
        assert_eq!(state.current.as_ref().unwrap().locator, "yt:g-current");
        assert!(state.queue.is_empty());
        drop(state);
        store.stop_all();
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_resolves_is_unrestorable() {
        let backend = MemoryStore::new();
        let host = FakeHost::with_channels(&["vc-g"]);
        let cp = make_checkpoint("g", 30_000, 1_000);
        put(&backend, &cp).await;
        let (orchestrator, store, metrics) = make_orchestrator(&backend, host.clone());

        assert_eq!(orchestrator.restore_all().await, 0);
        assert!(store.get("g").await.unwrap().is_none());
        assert!(host.session_for("vc-g").is_none());
        assert_eq!(metrics.sessions_dropped.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_session_stays_paused() {
        let backend = MemoryStore::new();
        let host = FakeHost::with_channels(&["vc-g"]);
        let mut cp = make_checkpoint("g", 30_000, 60_000);
        cp.paused = true;
        stock_catalog(&host, &cp);
        put(&backend, &cp).await;
        let (orchestrator, store, _) = make_orchestrator(&backend, host.clone());

        assert_eq!(orchestrator.restore_all().await, 1);
        let session = host.session_for("vc-g").unwrap();
        let state = session.state.lock().unwrap();
        assert!(state.paused);
        assert_eq!(state.seeks, vec![30_000]);
        drop(state);
        store.stop_all();
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_outage_restores_nothing() {
        let backend = MemoryStore::new();
        let host = FakeHost::with_channels(&["vc-g"]);
        put(&backend, &make_checkpoint("g", 30_000, 1_000)).await;
        backend.set_offline(true);
        let (orchestrator, _, _) = make_orchestrator(&backend, host.clone());

        assert_eq!(orchestrator.restore_all().await, 0);
        assert!(host.session_for("vc-g").is_none());
    }
}
