use std::collections::HashMap;
use std::num::NonZeroU32;
use std::time::Duration;

use crate::error::ConfigError;
use crate::tier::Tier;

/// Quota applied to every caller of one tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    tier: Tier,
    limit: NonZeroU32,
    window: Duration,
}

impl RateLimitPolicy {
    /// Creates a policy admitting `limit` requests per rolling `window`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPolicy`] for windows shorter than one
    /// millisecond, the resolution of the counter stores.
    pub fn new(tier: Tier, limit: NonZeroU32, window: Duration) -> Result<Self, ConfigError> {
        if window.as_millis() == 0 {
            return Err(ConfigError::InvalidPolicy {
                tier: tier.to_string(),
                reason: "window must be at least one millisecond".to_string(),
            });
        }
        Ok(Self {
            tier,
            limit,
            window,
        })
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn limit(&self) -> u32 {
        self.limit.get()
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

/// Read-only mapping from tier to policy, built once at startup.
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    policies: HashMap<Tier, RateLimitPolicy>,
}

impl PolicyRegistry {
    /// Builds the registry.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicatePolicy`] when two policies name the
    /// same tier, and [`ConfigError::MissingDefaultPolicy`] when no policy
    /// covers [`Tier::DEFAULT`].
    pub fn new(policies: impl IntoIterator<Item = RateLimitPolicy>) -> Result<Self, ConfigError> {
        let mut registered = HashMap::new();
        for policy in policies {
            let tier = policy.tier;
            if registered.insert(tier, policy).is_some() {
                return Err(ConfigError::DuplicatePolicy { tier });
            }
        }
        let policies = registered;

        if !policies.contains_key(&Tier::DEFAULT) {
            return Err(ConfigError::MissingDefaultPolicy);
        }

        Ok(Self { policies })
    }

    /// Policy for `tier`, or the default tier's policy when `tier` has none.
    pub fn policy_for(&self, tier: Tier) -> &RateLimitPolicy {
        self.policies
            .get(&tier)
            .unwrap_or_else(|| self.default_policy())
    }

    pub fn default_policy(&self) -> &RateLimitPolicy {
        // Presence is checked in `new` and the map is never mutated.
        &self.policies[&Tier::DEFAULT]
    }

    pub fn policies(&self) -> impl Iterator<Item = &RateLimitPolicy> {
        self.policies.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(tier: Tier, limit: u32, secs: u64) -> RateLimitPolicy {
        RateLimitPolicy::new(
            tier,
            NonZeroU32::new(limit).unwrap(),
            Duration::from_secs(secs),
        )
        .unwrap()
    }

    #[test]
    fn it_requires_a_default_policy() {
        let err = PolicyRegistry::new([policy(Tier::Pro, 10, 60)]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingDefaultPolicy));
    }

    #[test]
    fn it_rejects_a_tier_configured_twice() {
        let err = PolicyRegistry::new([
            policy(Tier::Free, 1, 60),
            policy(Tier::Pro, 10, 60),
            policy(Tier::Free, 100, 60),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicatePolicy { tier: Tier::Free }));
    }

    #[test]
    fn it_rejects_zero_windows() {
        let err = RateLimitPolicy::new(Tier::Free, NonZeroU32::new(1).unwrap(), Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPolicy { .. }));
    }

    #[test]
    fn test_unconfigured_tier_falls_back_to_default() {
        let registry = PolicyRegistry::new([policy(Tier::Free, 5, 60)]).unwrap();
        let resolved = registry.policy_for(Tier::Enterprise);
        assert_eq!(resolved.tier(), Tier::Free);
        assert_eq!(resolved.limit(), 5);
    }

    #[test]
    fn test_each_tier_gets_its_own_policy() {
        let registry = PolicyRegistry::new([
            policy(Tier::Free, 5, 60),
            policy(Tier::Pro, 50, 60),
            policy(Tier::Enterprise, 500, 3600),
        ])
        .unwrap();

        assert_eq!(registry.policy_for(Tier::Free).limit(), 5);
        assert_eq!(registry.policy_for(Tier::Pro).limit(), 50);
        assert_eq!(
            registry.policy_for(Tier::Enterprise).window(),
            Duration::from_secs(3600)
        );
        assert_eq!(registry.policies().count(), 3);
    }
}
