use std::fmt;
use std::future::Future;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;
use std::task::ready;

use http::Request;
use http::Response;
use pin_project_lite::pin_project;
use tier_limit::ClientThrottle;
use tier_limit::Clock;
use tier_limit::Reason;
use tier_limit::SystemClock;
use tower::BoxError;
use tower::Layer;
use tower::Service;

use crate::error::ThrottleError;
use crate::headers::quota_from_headers;

/// Guards an outbound HTTP client with a [`ClientThrottle`].
///
/// Calls are refused locally while the server's last reported quota is
/// exhausted, and every response refreshes the mirror. The server remains the
/// only enforcement point.
#[derive(Clone)]
pub struct ClientThrottleLayer {
    throttle: Arc<ClientThrottle>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for ClientThrottleLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientThrottleLayer")
            .field("throttle", &self.throttle)
            .finish_non_exhaustive()
    }
}

impl ClientThrottleLayer {
    pub fn new(throttle: Arc<ClientThrottle>) -> Self {
        Self {
            throttle,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl<S> Layer<S> for ClientThrottleLayer {
    type Service = ClientThrottleService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ClientThrottleService {
            inner,
            throttle: Arc::clone(&self.throttle),
            clock: Arc::clone(&self.clock),
        }
    }
}

#[derive(Clone)]
pub struct ClientThrottleService<S> {
    inner: S,
    throttle: Arc<ClientThrottle>,
    clock: Arc<dyn Clock>,
}

impl<S> fmt::Debug for ClientThrottleService<S>
where
    S: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientThrottleService")
            .field("inner", &self.inner)
            .field("throttle", &self.throttle)
            .finish_non_exhaustive()
    }
}

pin_project! {
    /// Either an immediate local refusal or the inner call.
    #[project = ResponseFutureProj]
    pub enum ResponseFuture<F> {
        Throttled {
            error: ThrottleError,
        },
        Called {
            #[pin]
            future: F,
            throttle: Arc<ClientThrottle>,
            clock: Arc<dyn Clock>,
        },
    }
}

impl<F, B, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<Response<B>, E>>,
    E: Into<BoxError>,
{
    type Output = Result<Response<B>, BoxError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project() {
            ResponseFutureProj::Throttled { error } => Poll::Ready(Err(Box::new(error.clone()))),
            ResponseFutureProj::Called {
                future,
                throttle,
                clock,
            } => {
                let response = ready!(future.poll(cx)).map_err(Into::into)?;
                if let Some(snapshot) = quota_from_headers(response.headers(), clock.now()) {
                    throttle.observe(snapshot);
                }
                Poll::Ready(Ok(response))
            }
        }
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for ClientThrottleService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Error: Into<BoxError>,
{
    type Response = Response<ResBody>;
    type Error = BoxError;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        match self.throttle.check(self.clock.now()) {
            ControlFlow::Break(Reason::Exhausted { retry_after }) => ResponseFuture::Throttled {
                error: ThrottleError::Throttled { retry_after },
            },
            ControlFlow::Continue(()) => ResponseFuture::Called {
                future: self.inner.call(req),
                throttle: Arc::clone(&self.throttle),
                clock: Arc::clone(&self.clock),
            },
        }
    }
}
