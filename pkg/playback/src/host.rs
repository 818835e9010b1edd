use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use pkg_types::playback::{RepeatMode, TrackInfo};

/// Options for a session created during restoration.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Join the voice channel deafened.
    pub self_deaf: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self { self_deaf: true }
    }
}

/// A live playback session owned by the bot's music layer.
///
/// Getters report the session's current observable state and must not block.
/// Transport calls may suspend on the voice backend.
#[async_trait]
pub trait PlaybackSession: Send + Sync {
    /// Stable key of the session (one per guild). Checkpoints are stored under it.
    fn session_key(&self) -> &str;

    fn voice_channel_id(&self) -> &str;

    /// Channel that receives user-visible notices.
    fn text_channel_id(&self) -> &str;

    fn current_track(&self) -> Option<TrackInfo>;

    /// Upcoming tracks, in play order. Excludes the current track.
    fn queue(&self) -> Vec<TrackInfo>;

    /// Elapsed position of the current track in milliseconds.
    fn position(&self) -> u64;

    fn volume(&self) -> u16;

    fn repeat_mode(&self) -> RepeatMode;

    fn is_paused(&self) -> bool;

    /// Append a track to the end of the queue.
    async fn enqueue(&self, track: TrackInfo) -> Result<()>;

    /// Start playing the queue if nothing is playing.
    async fn play(&self) -> Result<()>;

    async fn seek(&self, position_ms: u64) -> Result<()>;

    async fn set_volume(&self, volume: u16) -> Result<()>;

    async fn set_repeat_mode(&self, mode: RepeatMode) -> Result<()>;

    async fn set_paused(&self, paused: bool) -> Result<()>;
}

/// The bot subsystem that owns voice connections and players.
#[async_trait]
pub trait SessionHost: Send + Sync {
    /// Whether the voice channel still exists and this instance can join it.
    async fn voice_channel_exists(&self, voice_channel_id: &str) -> Result<bool>;

    /// Create a fresh session bound to the given channels.
    async fn create_session(
        &self,
        voice_channel_id: &str,
        text_channel_id: &str,
        options: SessionOptions,
    ) -> Result<Arc<dyn PlaybackSession>>;

    /// Resolve a track locator. `Ok(None)` means the source no longer has it.
    async fn search_track(&self, locator: &str) -> Result<Option<TrackInfo>>;

    /// Sessions currently live on this instance.
    async fn active_sessions(&self) -> Vec<Arc<dyn PlaybackSession>>;

    /// Post a message to a text channel.
    async fn send_notice(&self, text_channel_id: &str, message: &str) -> Result<()>;
}
