//! Configuration for the admission stack.
//!
//! Loaded once at startup from built-in defaults, an optional
//! `config/tier-limit.{toml,yaml,json}` file and `TIER_LIMIT__*` environment
//! variables, in increasing order of precedence. For example
//! `TIER_LIMIT__TIERS__FREE__LIMIT=5` or `TIER_LIMIT__STORE__BACKEND=redis`.

use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::error::ConfigError;
use crate::policy::PolicyRegistry;
use crate::policy::RateLimitPolicy;
use crate::tier::Tier;

/// Root configuration object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Quota per tier id. `free` is mandatory.
    pub tiers: BTreeMap<String, PolicyConfig>,
    /// Counter store connection parameters
    pub store: StoreConfig,
    /// Caller identity extraction
    pub identity: IdentityConfig,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        let tiers = [
            (Tier::Free, PolicyConfig::new(100, 3600)),
            (Tier::Pro, PolicyConfig::new(1000, 3600)),
            (Tier::Enterprise, PolicyConfig::new(10000, 3600)),
        ]
        .into_iter()
        .map(|(tier, policy)| (tier.as_str().to_string(), policy))
        .collect();

        Self {
            tiers,
            store: StoreConfig::default(),
            identity: IdentityConfig::default(),
        }
    }
}

/// Quota for a single tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Requests admitted per window
    pub limit: u32,
    /// Length of the rolling window in seconds
    pub window_seconds: u64,
}

impl PolicyConfig {
    pub fn new(limit: u32, window_seconds: u64) -> Self {
        Self {
            limit,
            window_seconds,
        }
    }
}

/// Which counter store backs the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local store (development / single instance)
    #[default]
    Memory,
    /// Redis or Dragonfly, shared by every instance (requires the `redis` feature)
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Connection URL for the Redis backend
    pub url: String,
    /// Namespace prepended to every store key
    pub key_prefix: String,
    /// Round-trip budget for one store call, after which the engine fails open
    pub timeout_ms: u64,
    /// Sweep interval for expired in-memory records
    pub cleanup_interval_seconds: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            url: "redis://127.0.0.1:6379/".to_string(),
            key_prefix: "ratelimit".to_string(),
            timeout_ms: 250,
            cleanup_interval_seconds: 300,
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Cookie carrying a long-lived caller id
    pub caller_cookie: String,
    /// Header carrying a long-lived caller id
    pub caller_header: String,
    /// Headers holding the client address, checked in order. The first
    /// entry of a comma-separated chain is used.
    pub forwarded_headers: Vec<String>,
    /// Bucket for callers with no usable token or address
    pub fallback: String,
    /// Budget for the subscription tier lookup
    pub tier_lookup_timeout_ms: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            caller_cookie: "caller_id".to_string(),
            caller_header: "x-caller-id".to_string(),
            forwarded_headers: vec!["x-forwarded-for".to_string(), "x-real-ip".to_string()],
            fallback: "unknown".to_string(),
            tier_lookup_timeout_ms: 100,
        }
    }
}

impl IdentityConfig {
    pub fn tier_lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.tier_lookup_timeout_ms)
    }
}

impl AdmissionConfig {
    /// Load configuration from defaults, files and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a source cannot be parsed or the resulting
    /// policies are invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let config: AdmissionConfig = config::Config::builder()
            .add_source(config::Config::try_from(&AdmissionConfig::default())?)
            .add_source(config::File::with_name("config/tier-limit").required(false))
            .add_source(
                config::Environment::with_prefix("TIER_LIMIT")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("identity.forwarded_headers")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        // Fail at startup, not on the first request
        config.registry()?;

        Ok(config)
    }

    /// Build the policy registry described by `tiers`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for unknown tier ids, zero limits or windows,
    /// a tier configured under two spellings, or a missing `free` policy.
    pub fn registry(&self) -> Result<PolicyRegistry, ConfigError> {
        let policies = self
            .tiers
            .iter()
            .map(|(id, policy)| {
                let tier: Tier = id.parse()?;
                let limit = NonZeroU32::new(policy.limit).ok_or_else(|| ConfigError::InvalidPolicy {
                    tier: id.clone(),
                    reason: "limit must be greater than zero".to_string(),
                })?;
                RateLimitPolicy::new(tier, limit, Duration::from_secs(policy.window_seconds))
            })
            .collect::<Result<Vec<_>, _>>()?;

        PolicyRegistry::new(policies)
    }
}
