use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use http::Request;
use http::Response;
use tier_limit::AdmissionEngine;
use tier_limit::Clock;
use tier_limit::IdentityResolver;
use tower::Service;
use tracing::debug;

use crate::headers;
use crate::identity::IdentitySource;

/// Future returned by [`AdmissionService`].
pub type ResponseFuture<T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'static>>;

/// Resolves the caller, asks the engine for a decision, then either answers
/// `429` without touching the inner service or forwards and decorates.
pub struct AdmissionService<S, I> {
    inner: S,
    engine: Arc<AdmissionEngine>,
    resolver: Arc<IdentityResolver>,
    identity: Arc<I>,
    clock: Arc<dyn Clock>,
}

impl<S, I> Clone for AdmissionService<S, I>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            engine: Arc::clone(&self.engine),
            resolver: Arc::clone(&self.resolver),
            identity: Arc::clone(&self.identity),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<S, I> fmt::Debug for AdmissionService<S, I>
where
    S: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionService")
            .field("inner", &self.inner)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl<S, I> AdmissionService<S, I> {
    pub fn new(
        inner: S,
        engine: Arc<AdmissionEngine>,
        resolver: Arc<IdentityResolver>,
        identity: Arc<I>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner,
            engine,
            resolver,
            identity,
            clock,
        }
    }
}

impl<S, I, ReqBody, ResBody> Service<Request<ReqBody>> for AdmissionService<S, I>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    I: IdentitySource,
    ReqBody: Send + 'static,
    ResBody: From<String> + Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = ResponseFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        // The readied service handles this request; the clone waits for the next one
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let hints = self.identity.hints(req.headers(), req.extensions());
        let engine = Arc::clone(&self.engine);
        let resolver = Arc::clone(&self.resolver);
        let clock = Arc::clone(&self.clock);

        Box::pin(async move {
            let identity = resolver.resolve(&hints).await;
            let now = clock.now();
            let result = engine.decide(&identity, now).await;

            if !result.success {
                // The raw key carries the caller's credential and stays out of logs
                debug!(
                    tier = %identity.tier(),
                    scope = engine.scope(),
                    remaining = result.remaining,
                    "request rejected"
                );
                return Ok(headers::reject(&result, now));
            }

            let mut response = inner.call(req).await?;
            headers::apply_quota_headers(response.headers_mut(), &result);
            Ok(response)
        })
    }
}
