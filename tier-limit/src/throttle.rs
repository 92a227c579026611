//! Cooperative client-side throttling.
//!
//! [`ClientThrottle`] mirrors the quota a server last reported so a client
//! can skip calls that are certain to be rejected and show a countdown. It is
//! advisory only. The mirror starts neutral, may be stale, and is never
//! consulted by the server.

use std::ops::ControlFlow;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;

/// Why the throttle declined a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    Exhausted { retry_after: Duration },
}

/// Quota state as reported by one server response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaSnapshot {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    /// When the client saw the response carrying this state.
    pub observed_at: DateTime<Utc>,
}

const NEVER: i64 = i64::MIN;
const DEFAULT_MAX_STALENESS: Duration = Duration::from_secs(600);

/// Lock-free mirror of the last observed [`QuotaSnapshot`].
///
/// Fields are updated independently, so a reader racing a writer may see a
/// mix of two snapshots. That is acceptable for an advisory guard.
#[derive(Debug)]
pub struct ClientThrottle {
    /// `limit << 32 | remaining`
    quota: AtomicU64,
    reset_at: AtomicI64,
    observed_at: AtomicI64,
    max_staleness: Duration,
}

impl Default for ClientThrottle {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientThrottle {
    pub fn new() -> Self {
        Self {
            quota: AtomicU64::new(0),
            reset_at: AtomicI64::new(NEVER),
            observed_at: AtomicI64::new(NEVER),
            max_staleness: DEFAULT_MAX_STALENESS,
        }
    }

    /// Snapshots older than `max_staleness` are ignored by [`check`](Self::check).
    pub fn with_max_staleness(mut self, max_staleness: Duration) -> Self {
        self.max_staleness = max_staleness;
        self
    }

    /// Record the quota carried by a response. Snapshots older than the one
    /// already held are dropped.
    pub fn observe(&self, snapshot: QuotaSnapshot) {
        let observed = snapshot.observed_at.timestamp_millis();
        if self.observed_at.load(Ordering::Acquire) > observed {
            return;
        }
        let packed = (u64::from(snapshot.limit) << 32) | u64::from(snapshot.remaining);
        self.quota.store(packed, Ordering::Release);
        self.reset_at
            .store(snapshot.reset_at.timestamp_millis(), Ordering::Release);
        self.observed_at.store(observed, Ordering::Release);
    }

    /// Forget everything and return to the neutral state.
    pub fn reset(&self) {
        self.observed_at.store(NEVER, Ordering::Release);
        self.reset_at.store(NEVER, Ordering::Release);
        self.quota.store(0, Ordering::Release);
    }

    pub fn snapshot(&self) -> Option<QuotaSnapshot> {
        let observed = self.observed_at.load(Ordering::Acquire);
        if observed == NEVER {
            return None;
        }
        let quota = self.quota.load(Ordering::Acquire);
        Some(QuotaSnapshot {
            limit: (quota >> 32) as u32,
            remaining: quota as u32,
            reset_at: millis(self.reset_at.load(Ordering::Acquire)),
            observed_at: millis(observed),
        })
    }

    /// Whether a call issued at `now` is worth sending.
    ///
    /// Breaks only when the last fresh snapshot says the quota is used up and
    /// its reset time is still ahead.
    pub fn check(&self, now: DateTime<Utc>) -> ControlFlow<Reason> {
        let Some(snapshot) = self.snapshot() else {
            return ControlFlow::Continue(());
        };

        let age = (now - snapshot.observed_at).to_std().unwrap_or(Duration::ZERO);
        if age > self.max_staleness {
            return ControlFlow::Continue(());
        }

        match (snapshot.reset_at - now).to_std() {
            Ok(retry_after) if snapshot.remaining == 0 && !retry_after.is_zero() => {
                ControlFlow::Break(Reason::Exhausted { retry_after })
            }
            _ => ControlFlow::Continue(()),
        }
    }

    /// Time left until the mirrored quota resets, for display.
    pub fn countdown(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.snapshot()
            .and_then(|snapshot| (snapshot.reset_at - now).to_std().ok())
            .filter(|left| !left.is_zero())
    }
}

fn millis(value: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(value).unwrap_or(DateTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn snapshot(remaining: u32, reset: i64, observed: i64) -> QuotaSnapshot {
        QuotaSnapshot {
            limit: 5,
            remaining,
            reset_at: at(reset),
            observed_at: at(observed),
        }
    }

    #[test]
    fn it_starts_neutral() {
        let throttle = ClientThrottle::new();
        assert!(throttle.check(at(0)).is_continue());
        assert!(throttle.snapshot().is_none());
        assert!(throttle.countdown(at(0)).is_none());
    }

    #[test]
    fn it_blocks_until_reset_when_exhausted() {
        let throttle = ClientThrottle::new();
        throttle.observe(snapshot(0, 60, 12));

        assert_eq!(
            throttle.check(at(12)),
            ControlFlow::Break(Reason::Exhausted {
                retry_after: Duration::from_secs(48)
            })
        );
        assert_eq!(throttle.countdown(at(50)), Some(Duration::from_secs(10)));

        assert!(throttle.check(at(60)).is_continue());
        assert!(throttle.countdown(at(60)).is_none());
    }

    #[test]
    fn test_remaining_quota_allows_calls() {
        let throttle = ClientThrottle::new();
        throttle.observe(snapshot(3, 60, 0));
        assert!(throttle.check(at(1)).is_continue());
        assert_eq!(throttle.snapshot().unwrap().limit, 5);
        assert_eq!(throttle.snapshot().unwrap().remaining, 3);
    }

    #[test]
    fn test_stale_snapshots_are_ignored() {
        let throttle = ClientThrottle::new().with_max_staleness(Duration::from_secs(30));
        throttle.observe(snapshot(0, 3600, 0));

        assert!(throttle.check(at(10)).is_break());
        assert!(throttle.check(at(31)).is_continue());
    }

    #[test]
    fn test_older_observations_do_not_overwrite_newer() {
        let throttle = ClientThrottle::new();
        throttle.observe(snapshot(4, 60, 10));
        throttle.observe(snapshot(0, 60, 5));

        assert_eq!(throttle.snapshot().unwrap().remaining, 4);
        assert!(throttle.check(at(11)).is_continue());
    }

    #[test]
    fn test_reset_returns_to_neutral() {
        let throttle = ClientThrottle::new();
        throttle.observe(snapshot(0, 60, 0));
        throttle.reset();
        assert!(throttle.check(at(1)).is_continue());
        assert!(throttle.snapshot().is_none());
    }
}
