//! In-memory session host for tests.

use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use pkg_types::playback::{RepeatMode, TrackInfo};

use crate::host::{PlaybackSession, SessionHost, SessionOptions};

pub fn make_track(locator: &str, duration_ms: u64) -> TrackInfo {
    TrackInfo {
        locator: locator.to_string(),
        title: format!("Title of {}", locator),
        author: "Artist".to_string(),
        duration_ms,
        is_stream: false,
    }
}

#[derive(Default)]
pub struct SessionState {
    pub current: Option<TrackInfo>,
    pub queue: Vec<TrackInfo>,
    pub position: u64,
    pub volume: u16,
    pub repeat_mode: RepeatMode,
    pub paused: bool,
    pub seeks: Vec<u64>,
}

pub struct FakeSession {
    key: String,
    voice: String,
    text: String,
    pub state: Mutex<SessionState>,
}

impl FakeSession {
    pub fn new(key: &str, voice: &str, text: &str) -> Self {
        Self {
            key: key.to_string(),
            voice: voice.to_string(),
            text: text.to_string(),
            state: Mutex::new(SessionState {
                volume: 100,
                ..Default::default()
            }),
        }
    }

    /// A session already playing `current` at `position` with `queue` behind it.
    pub fn playing(key: &str, current: TrackInfo, position: u64, queue: Vec<TrackInfo>) -> Arc<Self> {
        let session = Self::new(key, &format!("vc-{}", key), &format!("tc-{}", key));
        {
            let mut state = session.state.lock().unwrap();
            state.current = Some(current);
            state.position = position;
            state.queue = queue;
        }
        Arc::new(session)
    }
}

#[async_trait]
impl PlaybackSession for FakeSession {
    fn session_key(&self) -> &str {
        &self.key
    }

    fn voice_channel_id(&self) -> &str {
        &self.voice
    }

    fn text_channel_id(&self) -> &str {
        &self.text
    }

    fn current_track(&self) -> Option<TrackInfo> {
        self.state.lock().unwrap().current.clone()
    }

    fn queue(&self) -> Vec<TrackInfo> {
        self.state.lock().unwrap().queue.clone()
    }

    fn position(&self) -> u64 {
        self.state.lock().unwrap().position
    }

    fn volume(&self) -> u16 {
        self.state.lock().unwrap().volume
    }

    fn repeat_mode(&self) -> RepeatMode {
        self.state.lock().unwrap().repeat_mode
    }

    fn is_paused(&self) -> bool {
        self.state.lock().unwrap().paused
    }

    async fn enqueue(&self, track: TrackInfo) -> Result<()> {
        self.state.lock().unwrap().queue.push(track);
        Ok(())
    }

    async fn play(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.current.is_none() && !state.queue.is_empty() {
            let next = state.queue.remove(0);
            state.current = Some(next);
            state.position = 0;
        }
        Ok(())
    }

    async fn seek(&self, position_ms: u64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.position = position_ms;
        state.seeks.push(position_ms);
        Ok(())
    }

    async fn set_volume(&self, volume: u16) -> Result<()> {
        self.state.lock().unwrap().volume = volume;
        Ok(())
    }

    async fn set_repeat_mode(&self, mode: RepeatMode) -> Result<()> {
        self.state.lock().unwrap().repeat_mode = mode;
        Ok(())
    }

    async fn set_paused(&self, paused: bool) -> Result<()> {
        self.state.lock().unwrap().paused = paused;
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeHost {
    pub channels: Mutex<HashSet<String>>,
    pub catalog: Mutex<HashMap<String, TrackInfo>>,
    /// Locators whose lookup errors out.
    pub broken_locators: Mutex<HashSet<String>>,
    pub sessions: Mutex<Vec<Arc<FakeSession>>>,
    pub notices: Mutex<Vec<(String, String)>>,
}

impl FakeHost {
    pub fn with_channels(channels: &[&str]) -> Arc<Self> {
        let host = Self::default();
        host.channels
            .lock()
            .unwrap()
            .extend(channels.iter().map(|c| c.to_string()));
        Arc::new(host)
    }

    pub fn add_track(&self, track: &TrackInfo) {
        self.catalog
            .lock()
            .unwrap()
            .insert(track.locator.clone(), track.clone());
    }

    pub fn add_session(&self, session: Arc<FakeSession>) {
        self.sessions.lock().unwrap().push(session);
    }

    pub fn session_for(&self, voice: &str) -> Option<Arc<FakeSession>> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.voice == voice)
            .cloned()
    }
}

#[async_trait]
impl SessionHost for FakeHost {
    async fn voice_channel_exists(&self, voice_channel_id: &str) -> Result<bool> {
        Ok(self.channels.lock().unwrap().contains(voice_channel_id))
    }

    async fn create_session(
        &self,
        voice_channel_id: &str,
        text_channel_id: &str,
        _options: SessionOptions,
    ) -> Result<Arc<dyn PlaybackSession>> {
        // Session keys follow the voice channel, like one player per guild.
        let key = voice_channel_id.trim_start_matches("vc-");
        let session = Arc::new(FakeSession::new(key, voice_channel_id, text_channel_id));
        self.add_session(session.clone());
        Ok(session)
    }

    async fn search_track(&self, locator: &str) -> Result<Option<TrackInfo>> {
        if self.broken_locators.lock().unwrap().contains(locator) {
            bail!("search backend unavailable");
        }
        Ok(self.catalog.lock().unwrap().get(locator).cloned())
    }

    async fn active_sessions(&self) -> Vec<Arc<dyn PlaybackSession>> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.clone() as Arc<dyn PlaybackSession>)
            .collect()
    }

    async fn send_notice(&self, text_channel_id: &str, message: &str) -> Result<()> {
        self.notices
            .lock()
            .unwrap()
            .push((text_channel_id.to_string(), message.to_string()));
        Ok(())
    }
}
