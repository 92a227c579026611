//! Admission decisions.
//!
//! The engine combines a tier policy with one counter store round trip. It
//! holds no mutable state of its own: everything shared lives in the store.
//! When the store fails or exceeds its time budget the engine fails open and
//! flags the result as degraded.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use tracing::debug;
use tracing::warn;

use crate::clock::after;
use crate::config::AdmissionConfig;
use crate::error::ConfigError;
use crate::error::StoreError;
use crate::identity::CallerIdentity;
use crate::policy::PolicyRegistry;
use crate::policy::RateLimitPolicy;
use crate::store;
use crate::store::CounterStore;
use crate::tier::Tier;

const DEFAULT_SCOPE: &str = "api";
const DEFAULT_KEY_PREFIX: &str = "ratelimit";
const DEFAULT_TIMEOUT: Duration = Duration::from_millis(250);

/// Outcome of one admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionResult {
    /// Whether the request may proceed.
    pub success: bool,
    /// Requests allowed per window for the caller's tier.
    pub limit: u32,
    /// Requests left in the current window.
    pub remaining: u32,
    /// When the oldest counted request leaves the window.
    pub reset_at: DateTime<Utc>,
    /// The counter store was unavailable and the request was admitted blind.
    pub degraded: bool,
    /// Tier whose policy was applied.
    pub tier: Tier,
}

impl AdmissionResult {
    /// Time until `reset_at`, never negative.
    pub fn retry_after(&self, now: DateTime<Utc>) -> Duration {
        (self.reset_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// [`retry_after`](Self::retry_after) rounded up to whole seconds.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let wait = self.retry_after(now);
        wait.as_secs() + u64::from(wait.subsec_nanos() > 0)
    }
}

#[derive(Clone, Debug)]
struct AdmissionMetrics {
    decisions: Counter<u64>,
}

/// Decides whether a caller may issue one more request.
pub struct AdmissionEngine {
    registry: Arc<PolicyRegistry>,
    store: Arc<dyn CounterStore>,
    timeout: Duration,
    key_prefix: String,
    scope: String,
    instruments: AdmissionMetrics,
}

impl fmt::Debug for AdmissionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionEngine")
            .field("registry", &self.registry)
            .field("store", &self.store.name())
            .field("timeout", &self.timeout)
            .field("key_prefix", &self.key_prefix)
            .field("scope", &self.scope)
            .finish()
    }
}

impl AdmissionEngine {
    pub fn new(registry: Arc<PolicyRegistry>, store: Arc<dyn CounterStore>) -> Self {
        let meter = global::meter("tier_limit");
        let instruments = AdmissionMetrics {
            decisions: meter.u64_counter("admission_decisions").build(),
        };

        Self {
            registry,
            store,
            timeout: DEFAULT_TIMEOUT,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            scope: DEFAULT_SCOPE.to_string(),
            instruments,
        }
    }

    /// Build the registry and connect the store described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the tier policies are invalid. Store
    /// connection problems are not errors; see [`store::connect`].
    ///
    /// No sweep of expired windows is started. Callers that never return
    /// keep their in-memory log until [`start_cleanup`](Self::start_cleanup)
    /// is spawned with `config.store.cleanup_interval()`.
    pub async fn from_config(config: &AdmissionConfig) -> Result<Self, ConfigError> {
        let registry = Arc::new(config.registry()?);
        let store = store::connect(&config.store).await;

        Ok(Self::new(registry, store)
            .with_timeout(config.store.timeout())
            .with_key_prefix(config.store.key_prefix.clone()))
    }

    /// Upper bound for one store round trip.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_key_prefix(mut self, key_prefix: impl Into<String>) -> Self {
        self.key_prefix = key_prefix.into();
        self
    }

    /// Name of the protected surface. Engines with different scopes never
    /// share counters, even on the same store.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    /// Sweep expired windows out of this engine's store every `every`.
    /// See [`start_cleanup_task`].
    pub fn start_cleanup(
        &self,
        clock: Arc<dyn crate::clock::Clock>,
        every: Duration,
    ) -> tokio::task::JoinHandle<()> {
        start_cleanup_task(Arc::clone(&self.store), clock, every)
    }

    /// Admit or reject one request from `identity` at `now`.
    pub async fn decide(&self, identity: &CallerIdentity, now: DateTime<Utc>) -> AdmissionResult {
        let policy = self.registry.policy_for(identity.tier());
        let key = identity.key().storage_key(&self.key_prefix, &self.scope);

        let outcome = match tokio::time::timeout(
            self.timeout,
            self.store
                .record_and_check(&key, policy.limit(), policy.window(), now),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        };

        let result = match outcome {
            Ok(occupancy) => AdmissionResult {
                success: occupancy.admitted,
                limit: policy.limit(),
                remaining: policy.limit().saturating_sub(occupancy.count_in_window),
                reset_at: after(occupancy.oldest_in_window_at, policy.window()),
                degraded: false,
                tier: identity.tier(),
            },
            Err(error) => {
                warn!(
                    %error,
                    tier = %identity.tier(),
                    scope = %self.scope,
                    store = self.store.name(),
                    degraded = true,
                    "counter store unavailable, admitting request"
                );
                Self::fail_open(policy, identity.tier(), now)
            }
        };

        if !result.success {
            debug!(
                tier = %result.tier,
                scope = %self.scope,
                limit = result.limit,
                reset_at = %result.reset_at,
                "rate limit exceeded"
            );
        }
        self.record(&result);

        result
    }

    /// Result used when the store cannot answer. `remaining` is one below
    /// the limit so a degraded answer never looks like a fresh window.
    fn fail_open(policy: &RateLimitPolicy, tier: Tier, now: DateTime<Utc>) -> AdmissionResult {
        AdmissionResult {
            success: true,
            limit: policy.limit(),
            remaining: policy.limit().saturating_sub(1),
            reset_at: after(now, policy.window()),
            degraded: true,
            tier,
        }
    }

    fn record(&self, result: &AdmissionResult) {
        let outcome = match (result.success, result.degraded) {
            (_, true) => "degraded",
            (true, false) => "admitted",
            (false, false) => "rejected",
        };
        self.instruments.decisions.add(
            1,
            &[
                KeyValue::new("tier", result.tier.as_str()),
                KeyValue::new("scope", self.scope.clone()),
                KeyValue::new("outcome", outcome),
            ],
        );
    }
}

/// Periodically sweep expired records out of `store`.
///
/// Stores with native expiry treat the sweep as a no-op.
pub fn start_cleanup_task(
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn crate::clock::Clock>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            store.cleanup(clock.now()).await;
        }
    })
}
