//! Tunable defaults. Unless noted, every value can be overridden through the
//! environment or the YAML config file (see `pkg_types::config`).

// ─── Election ─────────────────────────────────────────────────────────────

/// How often the leader renews its lease and standbys poll for it.
pub const HEARTBEAT_INTERVAL_MS: u64 = 2_000;

/// Lease lifetime. Must be strictly greater than the heartbeat interval.
pub const LEASE_TTL_MS: u64 = 5_000;

// ─── Checkpoints ──────────────────────────────────────────────────────────

/// How long a checkpoint survives without being refreshed.
pub const CHECKPOINT_TTL_MS: u64 = 120_000;

/// Auto-save cadence for live sessions.
pub const CHECKPOINT_INTERVAL_MS: u64 = 5_000;

/// Delay between starting playback of a restored session and seeking it.
pub const RESTORE_SEEK_DELAY_MS: u64 = 1_500;

// ─── Local store ──────────────────────────────────────────────────────────

/// How often the SlateDB backend sweeps out expired records. Not configurable.
pub const LOCAL_SWEEP_INTERVAL_MS: u64 = 60_000;

// ─── Runtime ──────────────────────────────────────────────────────────────

/// Store URL used when none is configured.
pub const DEFAULT_STORE_URL: &str = "memory:";

/// Default config file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/encore/ha.yaml";

/// Default port for the health/operator API.
pub const DEFAULT_API_PORT: u16 = 8090;

/// Prefix for generated instance ids.
pub const INSTANCE_ID_PREFIX: &str = "encore";

/// Upper bound on one track lookup while restoring a session.
pub const RESTORE_SEARCH_TIMEOUT_MS: u64 = 10_000;

/// Upper bound on the post-restore seek.
pub const RESTORE_SEEK_TIMEOUT_MS: u64 = 5_000;
