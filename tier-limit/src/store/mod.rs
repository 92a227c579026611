//! Sliding-window counter stores.
//!
//! A store owns one time-ordered event log per key and exposes a single
//! atomic primitive, [`CounterStore::record_and_check`]: prune events older
//! than the window, count what is left, and record a new event only if the
//! count is below the limit. Pruning, counting and recording happen as one
//! step so that concurrent callers on the same key observe some serial order
//! and a cancelled caller can never leave behind an event that was recorded
//! but not decided.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use tracing::info;
use tracing::warn;

use crate::config::StoreBackend;
use crate::config::StoreConfig;
use crate::error::StoreError;

mod memory;
#[cfg(feature = "redis")]
mod redis_store;

pub use memory::InMemoryCounterStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisCounterStore;

/// Window state for one key after a `record_and_check` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowOccupancy {
    /// Whether an event was recorded for this call.
    pub admitted: bool,
    /// Events inside the window, including the one just recorded.
    pub count_in_window: u32,
    /// Timestamp of the oldest event still inside the window.
    pub oldest_in_window_at: DateTime<Utc>,
}

/// Shared store of per-key event logs.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically prune, count and (if below `limit`) record an event at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be reached or answers
    /// with something unexpected.
    async fn record_and_check(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<WindowOccupancy, StoreError>;

    /// Drop records whose events have all aged out.
    ///
    /// Stores with native expiry do nothing here.
    async fn cleanup(&self, _now: DateTime<Utc>) {}

    /// Backend name for logs and metrics.
    fn name(&self) -> &'static str;
}

/// Build the configured counter store.
///
/// A Redis backend that cannot be reached at startup is replaced by an
/// in-memory store and a warning is logged.
pub async fn connect(config: &StoreConfig) -> Arc<dyn CounterStore> {
    match config.backend {
        StoreBackend::Redis => connect_redis(config).await,
        StoreBackend::Memory => {
            info!("rate limiter using in-memory counter store");
            Arc::new(InMemoryCounterStore::new())
        }
    }
}

#[cfg(feature = "redis")]
async fn connect_redis(config: &StoreConfig) -> Arc<dyn CounterStore> {
    match RedisCounterStore::connect(&config.url).await {
        Ok(store) => {
            info!(url = %config.url, "rate limiter using redis counter store");
            Arc::new(store)
        }
        Err(error) => {
            warn!(
                url = %config.url,
                %error,
                "failed to connect to redis for rate limiting, falling back to in-memory"
            );
            Arc::new(InMemoryCounterStore::new())
        }
    }
}

#[cfg(not(feature = "redis"))]
async fn connect_redis(config: &StoreConfig) -> Arc<dyn CounterStore> {
    warn!(
        url = %config.url,
        "redis counter store requested without the `redis` feature, falling back to in-memory"
    );
    Arc::new(InMemoryCounterStore::new())
}
