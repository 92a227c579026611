//! Redis/Dragonfly-backed counter store.
//!
//! Each key is a sorted set whose members are events and whose scores are
//! event timestamps in milliseconds. The whole prune/count/record sequence
//! runs as one Lua script, which Redis executes without interleaving any
//! other command, so every service instance sharing the server sees a single
//! serial order per key.
//!
//! The key expires `window` after its newest event, so idle callers cost
//! nothing.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use redis::Client;
use redis::Script;
use redis::aio::ConnectionManager;
use tracing::debug;

use super::CounterStore;
use super::WindowOccupancy;
use crate::error::StoreError;

const RECORD_AND_CHECK: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
local member = ARGV[4]

redis.call('ZREMRANGEBYSCORE', key, '-inf', '(' .. (now - window))

local count = redis.call('ZCARD', key)
local admitted = 0
if count < limit then
    redis.call('ZADD', key, now, member)
    count = count + 1
    admitted = 1
end

local oldest = now
local first = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
if first[2] then
    oldest = tonumber(first[2])
end

if count > 0 then
    local newest = redis.call('ZRANGE', key, -1, -1, 'WITHSCORES')
    local expire_at = now + window
    if newest[2] then
        expire_at = tonumber(newest[2]) + window
    end
    redis.call('PEXPIREAT', key, expire_at)
end

return {admitted, count, oldest}
"#;

/// Distributed sliding-window log shared by every instance using the same
/// Redis (or Dragonfly) server.
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
    /// Connect and verify the server answers `PING`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the URL is invalid or the server cannot be
    /// reached.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;

        let mut conn = connection.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;

        debug!("connected to redis for rate limiting");

        Ok(Self {
            connection,
            script: Script::new(RECORD_AND_CHECK),
        })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn record_and_check(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<WindowOccupancy, StoreError> {
        let now_ms = now.timestamp_millis();
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
        // Members must be unique or two events in the same millisecond merge
        let member = format!("{}-{:016x}", now_ms, rand::random::<u64>());

        let mut conn = self.connection.clone();
        let (admitted, count, oldest): (i64, i64, i64) = self
            .script
            .key(key)
            .arg(now_ms)
            .arg(window_ms)
            .arg(limit)
            .arg(member)
            .invoke_async(&mut conn)
            .await?;

        let oldest_in_window_at = DateTime::from_timestamp_millis(oldest)
            .ok_or_else(|| StoreError::Protocol(format!("invalid event timestamp {}", oldest)))?;
        let count_in_window = u32::try_from(count)
            .map_err(|_| StoreError::Protocol(format!("invalid window count {}", count)))?;

        Ok(WindowOccupancy {
            admitted: admitted == 1,
            count_in_window,
            oldest_in_window_at,
        })
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
