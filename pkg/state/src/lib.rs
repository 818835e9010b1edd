//! Coordination store backends and the leader election service built on them.

pub mod client;
pub mod leader;
pub mod local;
pub mod memory;
pub mod redis_store;
pub mod watch;

pub use client::{CoordinationStore, Subscription, open_store};
pub use leader::{ElectionSettings, LeaderElection};
