use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use pkg_constants::defaults;

/// HA configuration file (YAML).
///
/// Example `ha.yaml`:
/// ```yaml
/// enabled: true
/// instance-id: bot-eu-1
/// store-url: redis://10.0.0.5:6379
/// heartbeat-interval-ms: 2000
/// lease-ttl-ms: 5000
/// checkpoint-ttl-ms: 120000
/// checkpoint-interval-ms: 5000
/// restore-seek-delay-ms: 1500
/// api-port: 8090
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HaConfigFile {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default, alias = "instance-id")]
    pub instance_id: Option<String>,
    #[serde(default, alias = "store-url")]
    pub store_url: Option<String>,
    #[serde(default, alias = "heartbeat-interval-ms")]
    pub heartbeat_interval_ms: Option<u64>,
    #[serde(default, alias = "lease-ttl-ms")]
    pub lease_ttl_ms: Option<u64>,
    #[serde(default, alias = "checkpoint-ttl-ms")]
    pub checkpoint_ttl_ms: Option<u64>,
    #[serde(default, alias = "checkpoint-interval-ms")]
    pub checkpoint_interval_ms: Option<u64>,
    #[serde(default, alias = "restore-seek-delay-ms")]
    pub restore_seek_delay_ms: Option<u64>,
    #[serde(default, alias = "api-port")]
    pub api_port: Option<u16>,
}

impl HaConfigFile {
    /// Overlay `HA_*` variables from `lookup` on top of the file values.
    /// `lookup` is normally `|k| std::env::var(k).ok()`.
    pub fn apply_env<F>(mut self, lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("HA_ENABLED") {
            self.enabled = Some(parse_bool(&v).context("HA_ENABLED")?);
        }
        if let Some(v) = lookup("HA_INSTANCE_ID") {
            self.instance_id = Some(v);
        }
        if let Some(v) = lookup("HA_STORE_URL") {
            self.store_url = Some(v);
        }
        let millis = |name: &str| -> anyhow::Result<Option<u64>> {
            lookup(name)
                .map(|v| v.trim().parse::<u64>().with_context(|| format!("{} must be milliseconds", name)))
                .transpose()
        };
        if let Some(v) = millis("HA_HEARTBEAT_INTERVAL_MS")? {
            self.heartbeat_interval_ms = Some(v);
        }
        if let Some(v) = millis("HA_LEASE_TTL_MS")? {
            self.lease_ttl_ms = Some(v);
        }
        if let Some(v) = millis("HA_CHECKPOINT_TTL_MS")? {
            self.checkpoint_ttl_ms = Some(v);
        }
        if let Some(v) = millis("HA_CHECKPOINT_INTERVAL_MS")? {
            self.checkpoint_interval_ms = Some(v);
        }
        if let Some(v) = millis("HA_RESTORE_SEEK_DELAY_MS")? {
            self.restore_seek_delay_ms = Some(v);
        }
        if let Some(v) = lookup("HA_API_PORT") {
            self.api_port = Some(v.trim().parse().context("HA_API_PORT must be a port number")?);
        }
        Ok(self)
    }

    /// Fill in defaults and validate.
    pub fn resolve(self) -> anyhow::Result<HaConfig> {
        let store = StoreUrl::parse(
            self.store_url
                .as_deref()
                .unwrap_or(defaults::DEFAULT_STORE_URL),
        )?;
        let config = HaConfig {
            enabled: self.enabled.unwrap_or(false),
            instance_id: self.instance_id.unwrap_or_else(generate_instance_id),
            store,
            heartbeat_interval: Duration::from_millis(
                self.heartbeat_interval_ms
                    .unwrap_or(defaults::HEARTBEAT_INTERVAL_MS),
            ),
            lease_ttl: Duration::from_millis(self.lease_ttl_ms.unwrap_or(defaults::LEASE_TTL_MS)),
            checkpoint_ttl: Duration::from_millis(
                self.checkpoint_ttl_ms.unwrap_or(defaults::CHECKPOINT_TTL_MS),
            ),
            checkpoint_interval: Duration::from_millis(
                self.checkpoint_interval_ms
                    .unwrap_or(defaults::CHECKPOINT_INTERVAL_MS),
            ),
            restore_seek_delay: Duration::from_millis(
                self.restore_seek_delay_ms
                    .unwrap_or(defaults::RESTORE_SEEK_DELAY_MS),
            ),
            api_port: self.api_port.unwrap_or(defaults::DEFAULT_API_PORT),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Where the coordination store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreUrl {
    /// Shared Redis instance (`redis://` or `rediss://`).
    Redis(String),
    /// SlateDB on the local filesystem (`local:<dir>`). Single host only.
    Local(PathBuf),
    /// Process-local, nothing survives a restart (`memory:`).
    Memory,
}

impl StoreUrl {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let raw = raw.trim();
        if raw.starts_with("redis://") || raw.starts_with("rediss://") {
            Ok(StoreUrl::Redis(raw.to_string()))
        } else if let Some(dir) = raw.strip_prefix("local:") {
            if dir.is_empty() {
                bail!("local store URL needs a directory, e.g. local:/var/lib/encore");
            }
            Ok(StoreUrl::Local(PathBuf::from(dir)))
        } else if raw == "memory:" || raw == "memory" {
            Ok(StoreUrl::Memory)
        } else {
            bail!(
                "unsupported store URL '{}' (expected redis://, local:<dir> or memory:)",
                raw
            )
        }
    }
}

impl std::fmt::Display for StoreUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // Strip credentials before this ends up in a log line.
            StoreUrl::Redis(url) => match url.rsplit_once('@') {
                Some((scheme_and_auth, host)) => {
                    let scheme = scheme_and_auth.split("://").next().unwrap_or("redis");
                    write!(f, "{}://***@{}", scheme, host)
                }
                None => write!(f, "{}", url),
            },
            StoreUrl::Local(dir) => write!(f, "local:{}", dir.display()),
            StoreUrl::Memory => write!(f, "memory:"),
        }
    }
}

/// Fully resolved HA settings.
#[derive(Debug, Clone)]
pub struct HaConfig {
    /// When false every instance runs standalone: no election, no checkpoints.
    pub enabled: bool,
    pub instance_id: String,
    pub store: StoreUrl,
    pub heartbeat_interval: Duration,
    pub lease_ttl: Duration,
    pub checkpoint_ttl: Duration,
    pub checkpoint_interval: Duration,
    pub restore_seek_delay: Duration,
    pub api_port: u16,
}

impl HaConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.instance_id.trim().is_empty() {
            bail!("instance id must not be empty");
        }
        for (name, value) in [
            ("heartbeat interval", self.heartbeat_interval),
            ("lease TTL", self.lease_ttl),
            ("checkpoint TTL", self.checkpoint_ttl),
            ("checkpoint interval", self.checkpoint_interval),
        ] {
            if value.is_zero() {
                bail!("{} must be greater than zero", name);
            }
        }
        if self.heartbeat_interval >= self.lease_ttl {
            bail!(
                "heartbeat interval ({}ms) must be shorter than the lease TTL ({}ms)",
                self.heartbeat_interval.as_millis(),
                self.lease_ttl.as_millis()
            );
        }
        if self.checkpoint_interval >= self.checkpoint_ttl {
            bail!(
                "checkpoint interval ({}ms) must be shorter than the checkpoint TTL ({}ms)",
                self.checkpoint_interval.as_millis(),
                self.checkpoint_ttl.as_millis()
            );
        }
        Ok(())
    }
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(path: &str) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: T = serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse config file {}", path))?;
    Ok(config)
}

/// Load `path`, overlay the process environment and resolve.
pub fn load_ha_config(path: &str) -> anyhow::Result<HaConfig> {
    load_config_file::<HaConfigFile>(path)?
        .apply_env(|key| std::env::var(key).ok())?
        .resolve()
}

fn generate_instance_id() -> String {
    format!("{}-{}", defaults::INSTANCE_ID_PREFIX, uuid::Uuid::new_v4())
}

fn parse_bool(raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => bail!("'{}' is not a boolean", other),
    }
}
