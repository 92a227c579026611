/// Errors produced by the tower-tier client middleware.
///
/// Server-side rejections are ordinary `429` responses, not errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ThrottleError {
    /// The last response from the server said the quota is used up, so the
    /// call was not sent.
    ///
    /// When the `axum` feature is enabled, this converts to `429 Too Many Requests`
    /// with a `Retry-After` header.
    #[error("Quota exhausted; retry after {retry_after:?}")]
    Throttled {
        /// Time until the mirrored quota resets.
        retry_after: std::time::Duration,
    },
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for ThrottleError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let Self::Throttled { retry_after } = self;
        let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
        let mut response = (StatusCode::TOO_MANY_REQUESTS, self.to_string()).into_response();
        response.headers_mut().insert(
            axum::http::header::RETRY_AFTER,
            axum::http::HeaderValue::from(secs.max(1)),
        );
        response
    }
}
