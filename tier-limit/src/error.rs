use std::time::Duration;

use crate::tier::Tier;

/// A tier id that is not part of the closed [`Tier`] set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown tier id `{0}`")]
pub struct UnknownTier(pub String);

/// Failures of the shared counter store.
///
/// None of these reach a caller: the admission engine treats every variant
/// as a degraded store and admits the request.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The store did not answer within the configured round-trip budget.
    #[error("counter store timed out after {0:?}")]
    Timeout(Duration),

    /// The store could not be reached.
    #[error("counter store unavailable: {0}")]
    Unavailable(String),

    /// The store answered with something we could not interpret.
    #[error("counter store protocol error: {0}")]
    Protocol(String),
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error() {
            StoreError::Unavailable(err.to_string())
        } else if err.is_timeout() {
            StoreError::Unavailable(format!("redis timeout: {}", err))
        } else {
            StoreError::Protocol(err.to_string())
        }
    }
}

/// Invalid policy configuration. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The default tier has no policy.
    #[error("no rate limit policy configured for the default tier `{}`", Tier::DEFAULT)]
    MissingDefaultPolicy,

    /// More than one policy was configured for the same tier.
    #[error("more than one rate limit policy configured for tier `{tier}`")]
    DuplicatePolicy { tier: Tier },

    /// A policy was configured with a zero limit or window.
    #[error("invalid rate limit policy for tier `{tier}`: {reason}")]
    InvalidPolicy { tier: String, reason: String },

    /// A policy was configured for a tier id outside the known set.
    #[error(transparent)]
    UnknownTier(#[from] UnknownTier),

    /// The configuration sources could not be read or deserialized.
    #[error("configuration error: {0}")]
    Load(#[from] config::ConfigError),
}
