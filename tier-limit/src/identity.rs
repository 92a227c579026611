//! Caller identity and tier resolution.
//!
//! Resolution never fails. A caller without a token or address lands in a
//! shared anonymous bucket, and a caller whose tier cannot be determined is
//! treated as [`Tier::DEFAULT`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use tracing::warn;

use crate::BoxError;
use crate::config::IdentityConfig;
use crate::tier::RateLimitKey;
use crate::tier::Tier;

/// Identity-bearing metadata pulled from a request by the transport layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHints {
    /// Long-lived caller id from a cookie or header.
    pub caller_token: Option<String>,
    /// Client address, already reduced to the first hop of any forwarding chain.
    pub client_ip: Option<String>,
}

impl RequestHints {
    pub fn with_caller_token(mut self, token: impl Into<String>) -> Self {
        self.caller_token = Some(token.into());
        self
    }

    pub fn with_client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = Some(ip.into());
        self
    }
}

/// Who is asking, and under which tier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallerIdentity {
    raw_key: String,
    tier: Tier,
}

impl CallerIdentity {
    pub fn new(raw_key: impl Into<String>, tier: Tier) -> Self {
        Self {
            raw_key: raw_key.into(),
            tier,
        }
    }

    pub fn raw_key(&self) -> &str {
        &self.raw_key
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn key(&self) -> RateLimitKey {
        RateLimitKey::new(self.tier, self.raw_key.clone())
    }
}

/// Subscription lookup supplying a tier id for a caller.
///
/// `Ok(None)` means "no subscription on record". Errors and unknown ids are
/// both resolved to the default tier.
#[async_trait]
pub trait TierSource: Send + Sync {
    async fn tier_for(&self, hints: &RequestHints) -> Result<Option<String>, BoxError>;
}

#[async_trait]
impl<F> TierSource for F
where
    F: Fn(&RequestHints) -> Option<String> + Send + Sync,
{
    async fn tier_for(&self, hints: &RequestHints) -> Result<Option<String>, BoxError> {
        Ok(self(hints))
    }
}

/// Every caller gets the same tier.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticTierSource(pub Tier);

#[async_trait]
impl TierSource for StaticTierSource {
    async fn tier_for(&self, _hints: &RequestHints) -> Result<Option<String>, BoxError> {
        Ok(Some(self.0.as_str().to_string()))
    }
}

/// Fixed caller-token to tier table.
#[derive(Debug, Clone, Default)]
pub struct TokenTierSource {
    tiers: HashMap<String, Tier>,
}

impl TokenTierSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, tier: Tier) -> Self {
        self.tiers.insert(token.into(), tier);
        self
    }
}

#[async_trait]
impl TierSource for TokenTierSource {
    async fn tier_for(&self, hints: &RequestHints) -> Result<Option<String>, BoxError> {
        Ok(hints
            .caller_token
            .as_ref()
            .and_then(|token| self.tiers.get(token))
            .map(|tier| tier.as_str().to_string()))
    }
}

/// Turns request hints into a [`CallerIdentity`].
#[derive(Clone)]
pub struct IdentityResolver {
    tier_source: Arc<dyn TierSource>,
    fallback: String,
    lookup_timeout: Duration,
}

impl fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityResolver")
            .field("fallback", &self.fallback)
            .field("lookup_timeout", &self.lookup_timeout)
            .finish_non_exhaustive()
    }
}

impl IdentityResolver {
    pub fn new(tier_source: Arc<dyn TierSource>) -> Self {
        Self::from_config(&IdentityConfig::default(), tier_source)
    }

    pub fn from_config(config: &IdentityConfig, tier_source: Arc<dyn TierSource>) -> Self {
        Self {
            tier_source,
            fallback: config.fallback.clone(),
            lookup_timeout: config.tier_lookup_timeout(),
        }
    }

    /// Bucket name used when a request carries neither token nor address.
    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = fallback.into();
        self
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Stable per-caller key: token, then client address, then the fallback.
    pub fn raw_key(&self, hints: &RequestHints) -> String {
        let present = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        if let Some(token) = present(&hints.caller_token) {
            format!("caller:{}", token)
        } else if let Some(ip) = present(&hints.client_ip) {
            format!("ip:{}", ip)
        } else {
            format!("anon:{}", self.fallback)
        }
    }

    pub async fn resolve(&self, hints: &RequestHints) -> CallerIdentity {
        CallerIdentity::new(self.raw_key(hints), self.tier(hints).await)
    }

    async fn tier(&self, hints: &RequestHints) -> Tier {
        let lookup = tokio::time::timeout(self.lookup_timeout, self.tier_source.tier_for(hints));
        match lookup.await {
            Ok(Ok(Some(id))) => id.parse().unwrap_or_else(|error| {
                debug!(%error, "unrecognised tier from lookup, using default tier");
                Tier::DEFAULT
            }),
            Ok(Ok(None)) => Tier::DEFAULT,
            Ok(Err(error)) => {
                warn!(%error, "tier lookup failed, using default tier");
                Tier::DEFAULT
            }
            Err(_) => {
                warn!(timeout = ?self.lookup_timeout, "tier lookup timed out, using default tier");
                Tier::DEFAULT
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingTierSource;

    #[async_trait]
    impl TierSource for FailingTierSource {
        async fn tier_for(&self, _hints: &RequestHints) -> Result<Option<String>, BoxError> {
            Err("billing unavailable".into())
        }
    }

    struct SlowTierSource;

    #[async_trait]
    impl TierSource for SlowTierSource {
        async fn tier_for(&self, _hints: &RequestHints) -> Result<Option<String>, BoxError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Some("enterprise".to_string()))
        }
    }

    fn resolver(source: impl TierSource + 'static) -> IdentityResolver {
        IdentityResolver::new(Arc::new(source))
    }

    #[test]
    fn test_raw_key_precedence() {
        let resolver = resolver(StaticTierSource(Tier::Free));

        let both = RequestHints::default()
            .with_caller_token("abc")
            .with_client_ip("10.0.0.1");
        assert_eq!(resolver.raw_key(&both), "caller:abc");

        let ip_only = RequestHints::default().with_client_ip("10.0.0.1");
        assert_eq!(resolver.raw_key(&ip_only), "ip:10.0.0.1");

        let blank_token = RequestHints::default()
            .with_caller_token("  ")
            .with_client_ip("10.0.0.1");
        assert_eq!(resolver.raw_key(&blank_token), "ip:10.0.0.1");

        assert_eq!(resolver.raw_key(&RequestHints::default()), "anon:unknown");
        assert_eq!(
            resolver
                .with_fallback("edge-7")
                .raw_key(&RequestHints::default()),
            "anon:edge-7"
        );
    }

    #[tokio::test]
    async fn it_resolves_tiers_from_the_source() {
        let source = TokenTierSource::new()
            .with_token("gold", Tier::Enterprise)
            .with_token("silver", Tier::Pro);
        let resolver = resolver(source);

        let identity = resolver
            .resolve(&RequestHints::default().with_caller_token("gold"))
            .await;
        assert_eq!(identity.tier(), Tier::Enterprise);
        assert_eq!(identity.key().to_string(), "enterprise:caller:gold");

        let identity = resolver
            .resolve(&RequestHints::default().with_caller_token("nobody"))
            .await;
        assert_eq!(identity.tier(), Tier::Free);
    }

    #[tokio::test]
    async fn it_defaults_unknown_tier_ids() {
        let resolver = resolver(|_: &RequestHints| Some("platinum".to_string()));
        let identity = resolver.resolve(&RequestHints::default()).await;
        assert_eq!(identity.tier(), Tier::Free);
        assert_eq!(identity.raw_key(), "anon:unknown");
    }

    #[tokio::test]
    async fn it_defaults_on_lookup_failure() {
        let resolver = resolver(FailingTierSource);
        let identity = resolver
            .resolve(&RequestHints::default().with_client_ip("10.0.0.9"))
            .await;
        assert_eq!(identity, CallerIdentity::new("ip:10.0.0.9", Tier::Free));
    }

    #[tokio::test(start_paused = true)]
    async fn it_defaults_on_lookup_timeout() {
        let resolver = resolver(SlowTierSource).with_lookup_timeout(Duration::from_millis(50));
        let identity = resolver.resolve(&RequestHints::default()).await;
        assert_eq!(identity.tier(), Tier::Free);
    }
}
