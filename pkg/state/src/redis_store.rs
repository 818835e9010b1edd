use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::client::{CoordinationStore, Subscription};

/// Extend the TTL only while the caller still owns the key.
const EXPIRE_IF_EQUALS: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

/// Delete only while the caller still owns the key.
const DELETE_IF_EQUALS: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

const SCAN_BATCH: usize = 200;
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// Coordination store shared by every instance through Redis.
///
/// Commands go through a [`ConnectionManager`], which reconnects on its own
/// after a dropped connection; callers only see the failed command.
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid Redis URL")?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .context("failed to connect to Redis")?;
        info!("Connected to Redis coordination store");
        Ok(Self { client, conn })
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

/// Escape glob metacharacters so `prefix` matches literally in `SCAN MATCH`.
fn match_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('*');
    pattern
}

#[async_trait]
impl CoordinationStore for RedisStore {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async::<Option<Vec<u8>>>(&mut conn)
            .await
            .with_context(|| format!("Redis GET {} failed", key))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        cmd.query_async::<()>(&mut conn)
            .await
            .with_context(|| format!("Redis SET {} failed", key))
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .with_context(|| format!("Redis SET NX {} failed", key))?;
        Ok(reply.is_some())
    }

    async fn expire_if_equals(&self, key: &str, expected: &[u8], ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let updated: i64 = redis::cmd("EVAL")
            .arg(EXPIRE_IF_EQUALS)
            .arg(1)
            .arg(key)
            .arg(expected)
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .with_context(|| format!("Redis compare-and-expire {} failed", key))?;
        Ok(updated == 1)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<i64>(&mut conn)
            .await
            .with_context(|| format!("Redis DEL {} failed", key))?;
        Ok(())
    }

    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = redis::cmd("EVAL")
            .arg(DELETE_IF_EQUALS)
            .arg(1)
            .arg(key)
            .arg(expected)
            .query_async(&mut conn)
            .await
            .with_context(|| format!("Redis compare-and-delete {} failed", key))?;
        Ok(deleted == 1)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let mut conn = self.conn.clone();
        let pattern = match_pattern(prefix);

        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern.as_str())
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .with_context(|| format!("Redis SCAN {} failed", pattern))?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN may report a key more than once.
        keys.sort();
        keys.dedup();

        let mut results = Vec::with_capacity(keys.len());
        for chunk in keys.chunks(SCAN_BATCH) {
            let values: Vec<Option<Vec<u8>>> = redis::cmd("MGET")
                .arg(chunk.to_vec())
                .query_async(&mut conn)
                .await
                .context("Redis MGET failed")?;
            // Keys that expired between SCAN and MGET come back as nil.
            for (key, value) in chunk.iter().zip(values) {
                if let Some(value) = value {
                    results.push((key.clone(), value));
                }
            }
        }
        Ok(results)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let receivers: i64 = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .with_context(|| format!("Redis PUBLISH {} failed", channel))?;
        debug!("Published on {} to {} subscribers", channel, receivers);
        Ok(())
    }

    /// Subscribe on a dedicated connection. A background task forwards
    /// messages and re-subscribes after connection loss until the returned
    /// receiver is dropped. Messages published while disconnected are lost.
    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .context("failed to open Redis pub/sub connection")?;
        pubsub
            .subscribe(channel)
            .await
            .with_context(|| format!("Redis SUBSCRIBE {} failed", channel))?;

        let (tx, rx) = mpsc::channel(64);
        let client = self.client.clone();
        let channel = channel.to_string();
        tokio::spawn(async move {
            let mut pubsub = Some(pubsub);
            loop {
                if let Some(connection) = pubsub.take() {
                    let mut messages = Box::pin(connection.into_on_message());
                    loop {
                        let msg = tokio::select! {
                            _ = tx.closed() => return,
                            msg = messages.next() => msg,
                        };
                        let Some(msg) = msg else { break };
                        let payload: String = msg.get_payload().unwrap_or_default();
                        if tx.send(payload).await.is_err() {
                            return;
                        }
                    }
                    warn!("Redis subscription to {} dropped, re-subscribing", channel);
                }

                tokio::select! {
                    _ = tx.closed() => return,
                    _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => {}
                }

                match client.get_async_pubsub().await {
                    Ok(mut connection) => match connection.subscribe(channel.as_str()).await {
                        Ok(()) => {
                            info!("Re-subscribed to {}", channel);
                            pubsub = Some(connection);
                        }
                        Err(e) => warn!("Redis SUBSCRIBE {} failed: {}", channel, e),
                    },
                    Err(e) => warn!("Redis pub/sub reconnect failed: {}", e),
                }
            }
        });
        Ok(rx)
    }
}
