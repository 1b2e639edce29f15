use super::CounterStore;
use crate::algorithms::{ceil_seconds_from_millis, CounterSnapshot};
use crate::config_validator::ConfigValidator;
use crate::error::{ThrottlerError, ThrottlerResult};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use std::fmt;
use std::time::Duration;
use tracing::{debug, error};

/// Increment a fixed-window counter and report its remaining lifetime.
///
/// The key's TTL is the window: it is set by the hit that creates the key and
/// the key vanishes when the window closes, so the next INCR starts at 1.
/// A key that somehow lost its TTL gets one re-applied instead of living
/// forever.
const INCREMENT_SCRIPT: &str = r#"
local hits = redis.call('INCR', KEYS[1])
local ttl = redis.call('PTTL', KEYS[1])
if hits == 1 or ttl < 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
  ttl = tonumber(ARGV[1])
end
return {hits, ttl}
"#;

/// Counter store shared by every instance pointing at the same Redis.
#[derive(Clone)]
pub struct RedisCounterStore {
    connection: ConnectionManager,
    script: Script,
}

impl fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCounterStore").finish_non_exhaustive()
    }
}

impl RedisCounterStore {
    pub async fn connect(redis_url: &str) -> ThrottlerResult<Self> {
        ConfigValidator::validate_redis_url(redis_url)?;

        let client = Client::open(redis_url).map_err(|e| {
            ThrottlerError::Configuration(format!("Failed to create Redis client: {}", e))
        })?;

        let connection = ConnectionManager::new(client).await.map_err(|e| {
            ThrottlerError::StorageUnavailable(format!("Failed to connect to Redis: {}", e))
        })?;

        let store = Self {
            connection,
            script: Script::new(INCREMENT_SCRIPT),
        };
        store.ping().await?;

        debug!("Connected to Redis counter store");
        Ok(store)
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> ThrottlerResult<CounterSnapshot> {
        let mut conn = self.connection.clone();
        let window_ms = window.as_millis().max(1) as u64;

        let (hits, ttl_ms): (u64, i64) = self
            .script
            .key(key)
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                error!(key = %key, error = %e, "Redis increment failed");
                ThrottlerError::StorageUnavailable(format!("Script execution failed: {}", e))
            })?;

        let remaining_ms = u64::try_from(ttl_ms).unwrap_or(window_ms);
        Ok(CounterSnapshot::new(hits, ceil_seconds_from_millis(remaining_ms)))
    }

    async fn ping(&self) -> ThrottlerResult<()> {
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| ThrottlerError::StorageUnavailable(format!("Ping failed: {}", e)))?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
