//! Health and operator HTTP API, plus the runtime that wires election,
//! checkpointing and restoration together for an embedding bot.

pub mod handlers;
pub mod request_id;
pub mod server;

use std::sync::Arc;

use pkg_metrics::HaMetrics;
use pkg_playback::CheckpointStore;
use pkg_state::{CoordinationStore, LeaderElection};

/// Shared application state injected into all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub election: LeaderElection,
    /// `None` when HA is disabled.
    pub store: Option<Arc<dyn CoordinationStore>>,
    pub checkpoints: Option<CheckpointStore>,
    pub metrics: Arc<HaMetrics>,
}

impl AppState {
    pub fn ha_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub fn store_backend(&self) -> &'static str {
        self.store.as_ref().map_or("none", |s| s.backend_name())
    }
}
