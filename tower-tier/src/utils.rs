use std::sync::Arc;

use tier_limit::AdmissionEngine;
use tier_limit::ClientThrottle;
use tier_limit::IdentityResolver;
use tower::ServiceBuilder;
use tower::layer::util::Stack;

use crate::AdmissionLayer;
use crate::ClientThrottleLayer;

/// Service Builder Extension with additional useful functions for tower::ServiceBuilder.
pub trait ServiceBuilderExt<L> {
    /// Add an admission control layer reading identity from request headers
    fn admission(
        self,
        engine: Arc<AdmissionEngine>,
        resolver: IdentityResolver,
    ) -> ServiceBuilder<Stack<AdmissionLayer, L>>;

    /// Add an advisory throttle in front of an outbound client
    fn client_throttle(
        self,
        throttle: Arc<ClientThrottle>,
    ) -> ServiceBuilder<Stack<ClientThrottleLayer, L>>;
}

impl<L> ServiceBuilderExt<L> for ServiceBuilder<L> {
    fn admission(
        self,
        engine: Arc<AdmissionEngine>,
        resolver: IdentityResolver,
    ) -> ServiceBuilder<Stack<AdmissionLayer, L>> {
        self.layer(AdmissionLayer::new(engine, resolver))
    }

    fn client_throttle(
        self,
        throttle: Arc<ClientThrottle>,
    ) -> ServiceBuilder<Stack<ClientThrottleLayer, L>> {
        self.layer(ClientThrottleLayer::new(throttle))
    }
}
