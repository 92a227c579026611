use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use dashmap::DashMap;
use tracing::debug;

use super::CounterStore;
use super::WindowOccupancy;
use crate::error::StoreError;

/// Event log for one key, oldest first.
#[derive(Debug, Default)]
struct WindowLog {
    events: VecDeque<i64>,
    /// Millis after which every event in the log has left its window.
    expires_at: i64,
}

/// Exact sliding-window log held in process memory.
///
/// Each key's log sits behind its map shard lock for the duration of one
/// `record_and_check`, which serializes callers on the same key while keys
/// in other shards proceed in parallel. The critical section never awaits,
/// so it cannot be interrupted halfway by a cancelled caller.
///
/// State is local to the process: use it for tests, development and
/// single-instance deployments.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    windows: DashMap<String, WindowLog>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently holding a log.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    fn record(&self, key: &str, limit: u32, window: Duration, now: DateTime<Utc>) -> WindowOccupancy {
        let now_ms = now.timestamp_millis();
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
        let floor = now_ms.saturating_sub(window_ms);

        let mut log = self.windows.entry(key.to_string()).or_default();

        // 1. Prune everything that fell out of the window
        while log.events.front().is_some_and(|&at| at < floor) {
            log.events.pop_front();
        }

        // 2. Record only if there is room
        let admitted = log.events.len() < limit as usize;
        if admitted {
            // Keep the log ordered even if callers disagree slightly on `now`
            let at = log.events.partition_point(|&t| t <= now_ms);
            log.events.insert(at, now_ms);
            log.expires_at = log.expires_at.max(now_ms.saturating_add(window_ms));
        }

        WindowOccupancy {
            admitted,
            count_in_window: log.events.len() as u32,
            oldest_in_window_at: log
                .events
                .front()
                .and_then(|&at| DateTime::from_timestamp_millis(at))
                .unwrap_or(now),
        }
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn record_and_check(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<WindowOccupancy, StoreError> {
        Ok(self.record(key, limit, window, now))
    }

    async fn cleanup(&self, now: DateTime<Utc>) {
        let now_ms = now.timestamp_millis();
        let before = self.windows.len();
        self.windows.retain(|_, log| log.expires_at >= now_ms);
        debug!(
            removed = before.saturating_sub(self.windows.len()),
            "completed rate limit store cleanup"
        );
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
