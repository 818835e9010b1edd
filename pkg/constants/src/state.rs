//! Coordination store keys and channels.

/// Key holding the leader lease. Value is the holder's instance id.
pub const LEADER_LEASE_KEY: &str = "ha:leader";

/// Prefix for per-instance heartbeat records.
/// Full key = `HEARTBEAT_KEY_PREFIX + instance_id`.
pub const HEARTBEAT_KEY_PREFIX: &str = "ha:heartbeat:";

/// Pub/sub channel announcing leadership changes.
/// Payload is the new leader's id, or empty when the lease was released.
pub const LEADER_CHANGES_CHANNEL: &str = "ha:leader-changes";

/// Prefix for playback checkpoints.
/// Full key = `CHECKPOINT_KEY_PREFIX + session_key`.
pub const CHECKPOINT_KEY_PREFIX: &str = "player:";

/// Broadcast payload meaning "the lease was voluntarily released".
pub const RELEASED_PAYLOAD: &str = "";

/// Build the heartbeat record key for an instance.
pub fn heartbeat_key(instance_id: &str) -> String {
    format!("{}{}", HEARTBEAT_KEY_PREFIX, instance_id)
}

/// Build the checkpoint key for a playback session.
pub fn checkpoint_key(session_key: &str) -> String {
    format!("{}{}", CHECKPOINT_KEY_PREFIX, session_key)
}
