use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Tracks ---

/// A resolvable track. `locator` is whatever the session host's search
/// accepts to find the same track again (URI or source identifier).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub locator: String,
    pub title: String,
    pub author: String,
    /// Total length in milliseconds. Zero for live streams.
    pub duration_ms: u64,
    #[serde(default)]
    pub is_stream: bool,
}

impl TrackInfo {
    /// Whether the track can be seeked at all.
    pub fn is_seekable(&self) -> bool {
        !self.is_stream && self.duration_ms > 0
    }
}

/// The track that was playing when the checkpoint was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentTrack {
    #[serde(flatten)]
    pub track: TrackInfo,
    /// Elapsed position in milliseconds at `saved_at`.
    pub position_ms: u64,
}

// --- Repeat mode ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    #[default]
    Off,
    Track,
    Queue,
}

impl std::fmt::Display for RepeatMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepeatMode::Off => write!(f, "off"),
            RepeatMode::Track => write!(f, "track"),
            RepeatMode::Queue => write!(f, "queue"),
        }
    }
}

// --- Persisted checkpoint ---

/// Resumable snapshot of one playback session.
/// Stored at `player:<session_key>` with a bounded TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackCheckpoint {
    pub session_key: String,
    pub voice_channel_id: String,
    /// Channel that receives user-visible notices.
    pub text_channel_id: String,
    #[serde(default)]
    pub current: Option<CurrentTrack>,
    #[serde(default)]
    pub queue: Vec<TrackInfo>,
    pub volume: u16,
    #[serde(default)]
    pub repeat_mode: RepeatMode,
    #[serde(default)]
    pub paused: bool,
    pub saved_at: DateTime<Utc>,
}

impl PlaybackCheckpoint {
    /// Milliseconds between `saved_at` and `now`, never negative.
    pub fn age_ms(&self, now: DateTime<Utc>) -> u64 {
        now.signed_duration_since(self.saved_at)
            .num_milliseconds()
            .max(0) as u64
    }

    /// Where the current track would be at `now` had it kept playing.
    ///
    /// Returns `None` when there is nothing to seek to: no current track, a
    /// live stream, or a position that would land at or past the end of the
    /// media. A returned target is always `< duration_ms`.
    pub fn resume_position(&self, now: DateTime<Utc>) -> Option<u64> {
        let current = self.current.as_ref()?;
        if !current.track.is_seekable() {
            return None;
        }
        let elapsed = if self.paused { 0 } else { self.age_ms(now) };
        let target = current.position_ms.saturating_add(elapsed);
        (target < current.track.duration_ms).then_some(target)
    }

    /// Every track worth re-resolving, current track first.
    pub fn tracks(&self) -> impl Iterator<Item = &TrackInfo> {
        self.current
            .iter()
            .map(|c| &c.track)
            .chain(self.queue.iter())
    }
}

/// Summary row returned by the operator API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub session_key: String,
    pub voice_channel_id: String,
    pub current_title: Option<String>,
    pub position_ms: Option<u64>,
    pub queue_len: usize,
    pub paused: bool,
    pub saved_at: DateTime<Utc>,
}

impl From<&PlaybackCheckpoint> for CheckpointSummary {
    fn from(cp: &PlaybackCheckpoint) -> Self {
        Self {
            session_key: cp.session_key.clone(),
            voice_channel_id: cp.voice_channel_id.clone(),
            current_title: cp.current.as_ref().map(|c| c.track.title.clone()),
            position_ms: cp.current.as_ref().map(|c| c.position_ms),
            queue_len: cp.queue.len(),
            paused: cp.paused,
            saved_at: cp.saved_at,
        }
    }
}
