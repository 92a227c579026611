use std::fmt;
use std::sync::Arc;

use tier_limit::AdmissionConfig;
use tier_limit::AdmissionEngine;
use tier_limit::Clock;
use tier_limit::ConfigError;
use tier_limit::IdentityResolver;
use tier_limit::SystemClock;
use tier_limit::TierSource;
use tower::Layer;

use crate::identity::HeaderIdentity;
use crate::identity::IdentitySource;
use crate::service::AdmissionService;

/// Applies tiered admission control to HTTP requests.
///
/// Layers stack. Each layer consults its own engine, so a request must pass
/// every wrapped policy, and the narrowest quota is reported on success.
pub struct AdmissionLayer<I = HeaderIdentity> {
    engine: Arc<AdmissionEngine>,
    resolver: Arc<IdentityResolver>,
    identity: Arc<I>,
    clock: Arc<dyn Clock>,
}

impl<I> Clone for AdmissionLayer<I> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            resolver: Arc::clone(&self.resolver),
            identity: Arc::clone(&self.identity),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<I> fmt::Debug for AdmissionLayer<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionLayer")
            .field("engine", &self.engine)
            .field("resolver", &self.resolver)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl AdmissionLayer {
    /// Create an AdmissionLayer that reads identity with the default [`HeaderIdentity`].
    pub fn new(engine: Arc<AdmissionEngine>, resolver: IdentityResolver) -> Self {
        Self {
            engine,
            resolver: Arc::new(resolver),
            identity: Arc::new(HeaderIdentity::default()),
            clock: Arc::new(SystemClock),
        }
    }

    /// Build the engine, resolver and header extraction described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the tier policies are invalid.
    pub async fn from_config(
        config: &AdmissionConfig,
        tier_source: Arc<dyn TierSource>,
    ) -> Result<Self, ConfigError> {
        let engine = AdmissionEngine::from_config(config).await?;
        let resolver = IdentityResolver::from_config(&config.identity, tier_source);

        Ok(Self::new(Arc::new(engine), resolver)
            .with_identity_source(HeaderIdentity::from_config(&config.identity)))
    }
}

impl<I> AdmissionLayer<I> {
    /// Replace the way identity hints are read from requests.
    pub fn with_identity_source<J>(self, identity: J) -> AdmissionLayer<J>
    where
        J: IdentitySource,
    {
        AdmissionLayer {
            engine: self.engine,
            resolver: self.resolver,
            identity: Arc::new(identity),
            clock: self.clock,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn engine(&self) -> &Arc<AdmissionEngine> {
        &self.engine
    }
}

impl<S, I> Layer<S> for AdmissionLayer<I> {
    type Service = AdmissionService<S, I>;

    fn layer(&self, service: S) -> Self::Service {
        AdmissionService::new(
            service,
            Arc::clone(&self.engine),
            Arc::clone(&self.resolver),
            Arc::clone(&self.identity),
            Arc::clone(&self.clock),
        )
    }
}
