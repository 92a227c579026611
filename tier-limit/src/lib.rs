//! # tier-limit
//!
//! `tier-limit` answers one question for a multi-tenant API: may this caller
//! issue one more request right now? Quotas depend on the caller's
//! subscription [`Tier`] and are enforced over a rolling window against a
//! shared [`CounterStore`].
//!
//! ## Core Philosophy
//!
//! The engine is stateless. All shared state lives in the counter store,
//! which offers a single atomic prune-count-record primitive, so any number
//! of service instances can enforce one quota. If the store is unreachable
//! the engine fails open: availability of the protected API wins over strict
//! enforcement, and the result is marked `degraded`.
//!
//! ## Key Concepts
//!
//! * **Sliding-Window Log**: exact per-key event logs, in memory or in Redis.
//! * **Closed Tiers**: tier ids are validated at the boundary; anything
//!   unknown is treated as the default tier.
//! * **Fail-Open**: store failures and timeouts admit the request.
//! * **Advisory Clients**: [`ClientThrottle`] mirrors server quota state on
//!   the client side without ever enforcing it.
//!
//! ## Example
//!
//! ```rust
//! use std::num::NonZeroU32;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use tier_limit::AdmissionEngine;
//! use tier_limit::CallerIdentity;
//! use tier_limit::InMemoryCounterStore;
//! use tier_limit::PolicyRegistry;
//! use tier_limit::RateLimitPolicy;
//! use tier_limit::Tier;
//!
//! # tokio_test_block_on(async {
//! let free = RateLimitPolicy::new(Tier::Free, NonZeroU32::new(5).unwrap(), Duration::from_secs(60)).unwrap();
//! let registry = Arc::new(PolicyRegistry::new([free]).unwrap());
//! let engine = AdmissionEngine::new(registry, Arc::new(InMemoryCounterStore::new()));
//!
//! let caller = CallerIdentity::new("caller:A", Tier::Free);
//! let result = engine.decide(&caller, chrono::Utc::now()).await;
//! assert!(result.success);
//! assert_eq!(result.remaining, 4);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

mod clock;
mod config;
mod engine;
mod error;
mod identity;
mod policy;
mod store;
mod throttle;
mod tier;

pub use clock::Clock;
pub use clock::ManualClock;
pub use clock::SystemClock;
pub use config::AdmissionConfig;
pub use config::IdentityConfig;
pub use config::PolicyConfig;
pub use config::StoreBackend;
pub use config::StoreConfig;
pub use engine::AdmissionEngine;
pub use engine::AdmissionResult;
pub use engine::start_cleanup_task;
pub use error::ConfigError;
pub use error::StoreError;
pub use error::UnknownTier;
pub use identity::CallerIdentity;
pub use identity::IdentityResolver;
pub use identity::RequestHints;
pub use identity::StaticTierSource;
pub use identity::TierSource;
pub use identity::TokenTierSource;
pub use policy::PolicyRegistry;
pub use policy::RateLimitPolicy;
pub use store::CounterStore;
pub use store::InMemoryCounterStore;
#[cfg(feature = "redis")]
pub use store::RedisCounterStore;
pub use store::WindowOccupancy;
pub use store::connect as connect_store;
pub use throttle::ClientThrottle;
pub use throttle::QuotaSnapshot;
pub use throttle::Reason;
pub use tier::RateLimitKey;
pub use tier::Tier;

/// Type-erased error returned by injected collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
