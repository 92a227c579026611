//! # Tower Tier
//!
//! `tower-tier` puts the [`tier_limit`] admission engine in front of any
//! HTTP service built on [Tower](https://github.com/tower-rs/tower).
//!
//! ## Server Side
//! [`AdmissionLayer`] resolves the caller from request headers, asks the
//! engine for a decision, and then:
//!
//! 1. **Rejects** with `429 Too Many Requests`, a `Retry-After` header and a
//!    JSON body, without invoking the wrapped service, when the quota is
//!    exhausted.
//! 2. **Forwards** otherwise, adding `X-RateLimit-Limit`,
//!    `X-RateLimit-Remaining` and `X-RateLimit-Reset` to the response.
//!
//! Layers stack; the narrowest quota is the one reported.
//!
//! ## Client Side
//! [`ClientThrottleLayer`] keeps a [`tier_limit::ClientThrottle`] in step
//! with the headers above and refuses calls locally with
//! [`ThrottleError::Throttled`] while the server says the quota is used up.
//!
//! ## Feature Flags
//!
//! - `axum`: Enables `IntoResponse` for [`ThrottleError`] and reads the peer
//!   address from axum's `ConnectInfo`.
//! - `redis`: Enables the Redis counter store in `tier-limit`.

mod client;
mod error;
mod headers;
mod identity;
mod layer;
mod service;
mod utils;


pub use client::ClientThrottleLayer;
pub use client::ClientThrottleService;
pub use error::ThrottleError;
pub use headers::X_RATELIMIT_LIMIT;
pub use headers::X_RATELIMIT_REMAINING;
pub use headers::X_RATELIMIT_RESET;
pub use headers::apply_quota_headers;
pub use headers::quota_from_headers;
pub use headers::reject;
pub use identity::HeaderIdentity;
pub use identity::IdentitySource;
pub use layer::AdmissionLayer;
pub use service::AdmissionService;
pub use utils::ServiceBuilderExt;
