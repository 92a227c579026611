use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::error::UnknownTier;

/// Subscription tier used to select a quota policy.
///
/// The set is closed: tier ids coming from configuration or from a tier
/// lookup are validated here, and anything else is rejected at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Default tier. Every registry must carry a policy for it.
    Free,
    Pro,
    Enterprise,
}

impl Tier {
    pub const DEFAULT: Tier = Tier::Free;

    pub const ALL: [Tier; 3] = [Tier::Free, Tier::Pro, Tier::Enterprise];

    /// Stable id used in store keys, logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
            Tier::Enterprise => "enterprise",
        }
    }
}

impl Default for Tier {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = UnknownTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s.trim();
        Tier::ALL
            .into_iter()
            .find(|tier| tier.as_str().eq_ignore_ascii_case(id))
            .ok_or_else(|| UnknownTier(id.to_string()))
    }
}

/// Composite `tier:raw_key` address of a counter in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    tier: Tier,
    raw_key: String,
}

impl RateLimitKey {
    pub fn new(tier: Tier, raw_key: impl Into<String>) -> Self {
        Self {
            tier,
            raw_key: raw_key.into(),
        }
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn raw_key(&self) -> &str {
        &self.raw_key
    }

    /// Namespaced key as written to the counter store.
    pub fn storage_key(&self, prefix: &str, scope: &str) -> String {
        format!("{}:{}:{}", prefix, scope, self)
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tier, self.raw_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_parses_tier_ids_case_insensitively() {
        assert_eq!("free".parse::<Tier>().unwrap(), Tier::Free);
        assert_eq!(" Pro ".parse::<Tier>().unwrap(), Tier::Pro);
        assert_eq!("ENTERPRISE".parse::<Tier>().unwrap(), Tier::Enterprise);
    }

    #[test]
    fn it_rejects_unknown_tier_ids() {
        let err = "platinum".parse::<Tier>().unwrap_err();
        assert_eq!(err, UnknownTier("platinum".to_string()));
    }

    #[test]
    fn test_key_format() {
        let key = RateLimitKey::new(Tier::Pro, "ip:10.0.0.1");
        assert_eq!(key.to_string(), "pro:ip:10.0.0.1");
        assert_eq!(
            key.storage_key("ratelimit", "api"),
            "ratelimit:api:pro:ip:10.0.0.1"
        );
    }

    #[test]
    fn test_same_identity_different_tier_never_collides() {
        let free = RateLimitKey::new(Tier::Free, "caller:abc");
        let pro = RateLimitKey::new(Tier::Pro, "caller:abc");
        assert_ne!(free.to_string(), pro.to_string());
    }
}
