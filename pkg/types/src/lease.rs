use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle events emitted by the leader election service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "leader_id", rename_all = "snake_case")]
pub enum LeadershipEvent {
    /// This instance acquired the lease.
    BecameLeader,
    /// This instance no longer holds (or can no longer prove it holds) the lease.
    LostLeadership,
    /// Another instance announced that it acquired the lease.
    LeaderChanged(String),
}

impl std::fmt::Display for LeadershipEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LeadershipEvent::BecameLeader => write!(f, "became-leader"),
            LeadershipEvent::LostLeadership => write!(f, "lost-leadership"),
            LeadershipEvent::LeaderChanged(id) => write!(f, "leader-changed({})", id),
        }
    }
}

/// GET /api/v1/ha/leader response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderInfo {
    /// Current lease holder, if any.
    pub leader_id: Option<String>,
    /// The instance answering the request.
    pub instance_id: String,
    pub is_self: bool,
    /// Last heartbeat written by the leader, if its record is still alive.
    #[serde(default)]
    pub last_heartbeat: Option<DateTime<Utc>>,
}

/// GET /healthz response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub instance_id: String,
    pub is_leader: bool,
    pub ha_enabled: bool,
    /// Coordination store backend name ("redis", "local", "memory").
    pub store: String,
    pub checked_at: DateTime<Utc>,
}

/// Parse a heartbeat record value (unix millis) into a timestamp.
pub fn parse_heartbeat(raw: &[u8]) -> Option<DateTime<Utc>> {
    let millis: i64 = std::str::from_utf8(raw).ok()?.trim().parse().ok()?;
    DateTime::from_timestamp_millis(millis)
}
