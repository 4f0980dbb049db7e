//! Redis-backed counting store shared across service instances.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use tracing::{debug, info};

use super::{block_key, CountingStore};
use crate::error::{QuotaError, Result};

/// Value stored under a block flag key.
pub const BLOCKED_VALUE: &str = "BLOCKED";

/// Creates the counter with its expiry only when absent, then increments it.
///
/// Running both steps in one script keeps a counter from ever existing without
/// an expiry.
const INCREMENT_SCRIPT: &str = r#"
redis.call('SET', KEYS[1], 0, 'PX', ARGV[1], 'NX')
return redis.call('INCR', KEYS[1])
"#;

/// A counting store backed by a Redis server.
///
/// Counters are keyed by the raw identity; block flags by `blocked:<identity>`.
/// The connection manager reconnects on its own and is cheap to clone per call.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    increment_script: Script,
}

impl RedisStore {
    /// Connect to the server at `url` and verify it answers.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let mut connection = ConnectionManager::new(client).await?;

        let reply: String = redis::cmd("PING").query_async(&mut connection).await?;
        debug!(reply = %reply, "Redis answered ping");
        info!("Connected to redis counting store");

        Ok(Self::with_connection(connection))
    }

    /// Wrap an existing connection manager.
    pub fn with_connection(connection: ConnectionManager) -> Self {
        Self {
            connection,
            increment_script: Script::new(INCREMENT_SCRIPT),
        }
    }
}

/// Convert a TTL to whole milliseconds, never less than one.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl CountingStore for RedisStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64> {
        let mut connection = self.connection.clone();

        let count: u64 = self
            .increment_script
            .key(key)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut connection)
            .await
            .map_err(|e| QuotaError::Store(format!("failed to increment key '{}': {}", key, e)))?;

        Ok(count)
    }

    async fn block(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut connection = self.connection.clone();

        let _: () = redis::cmd("SET")
            .arg(block_key(key))
            .arg(BLOCKED_VALUE)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut connection)
            .await
            .map_err(|e| QuotaError::Store(format!("failed to set block for key '{}': {}", key, e)))?;

        Ok(())
    }

    async fn is_blocked(&self, key: &str) -> Result<bool> {
        let mut connection = self.connection.clone();
        let flag_key = block_key(key);

        let value: Option<String> = connection.get(&flag_key).await.map_err(|e| {
            QuotaError::Store(format!(
                "failed to get block status for key '{}': {}",
                flag_key, e
            ))
        })?;

        Ok(value.as_deref() == Some(BLOCKED_VALUE))
    }
}
