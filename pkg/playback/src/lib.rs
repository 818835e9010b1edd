//! Playback checkpointing and failover restoration.
//!
//! The bot's music layer implements [`host::SessionHost`]; this crate only
//! reads observable session state, writes checkpoints while this instance
//! leads, and rebuilds sessions from checkpoints after a failover.

pub mod checkpoint;
pub mod controller;
pub mod host;
pub mod restore;

#[cfg(test)]
mod fake;

pub use checkpoint::CheckpointStore;
pub use controller::FailoverController;
pub use host::{PlaybackSession, SessionHost, SessionOptions};
pub use restore::RestorationOrchestrator;
