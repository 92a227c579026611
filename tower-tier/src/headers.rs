//! Translating admission results to and from HTTP.

use chrono::DateTime;
use chrono::SecondsFormat;
use chrono::Utc;
use http::HeaderMap;
use http::HeaderValue;
use http::Response;
use http::StatusCode;
use http::header::CONTENT_TYPE;
use http::header::HeaderName;
use http::header::RETRY_AFTER;
use serde_json::json;
use tier_limit::AdmissionResult;
use tier_limit::QuotaSnapshot;

/// Requests allowed per window.
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
/// Requests left in the current window.
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
/// ISO-8601 instant at which the oldest counted request leaves the window.
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

const REJECTION_MESSAGE: &str = "Too many requests";

/// Format `at` as an ISO-8601 UTC instant, rounding up to whole seconds so a
/// client waiting until the reported instant is never early.
pub(crate) fn format_reset(at: DateTime<Utc>) -> String {
    let secs = at.timestamp() + i64::from(at.timestamp_subsec_nanos() > 0);
    DateTime::from_timestamp(secs, 0)
        .unwrap_or(at)
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Attach the quota headers for `result`.
///
/// If an inner admission layer already reported a quota with fewer requests
/// remaining, its headers are kept.
pub fn apply_quota_headers(headers: &mut HeaderMap, result: &AdmissionResult) {
    let existing = headers
        .get(&X_RATELIMIT_REMAINING)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u32>().ok());
    if existing.is_some_and(|remaining| remaining <= result.remaining) {
        return;
    }

    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(result.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(result.remaining));
    if let Ok(reset) = HeaderValue::try_from(format_reset(result.reset_at)) {
        headers.insert(X_RATELIMIT_RESET, reset);
    }
}

/// Build the `429 Too Many Requests` response for a rejected request.
pub fn reject<B>(result: &AdmissionResult, now: DateTime<Utc>) -> Response<B>
where
    B: From<String>,
{
    let body = json!({
        "error": REJECTION_MESSAGE,
        "retryAfter": format_reset(result.reset_at),
        "limit": result.limit,
        "remaining": result.remaining,
    });

    let mut response = Response::new(B::from(body.to_string()));
    *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;

    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(RETRY_AFTER, HeaderValue::from(result.retry_after_secs(now)));
    apply_quota_headers(headers, result);
    response
}

/// Read the quota headers of a response back into a [`QuotaSnapshot`].
///
/// Returns `None` unless all three headers are present and well formed.
pub fn quota_from_headers(headers: &HeaderMap, observed_at: DateTime<Utc>) -> Option<QuotaSnapshot> {
    let text = |name: &HeaderName| headers.get(name).and_then(|value| value.to_str().ok());

    let limit = text(&X_RATELIMIT_LIMIT)?.trim().parse().ok()?;
    let remaining = text(&X_RATELIMIT_REMAINING)?.trim().parse().ok()?;
    let reset_at = DateTime::parse_from_rfc3339(text(&X_RATELIMIT_RESET)?.trim())
        .ok()?
        .with_timezone(&Utc);

    Some(QuotaSnapshot {
        limit,
        remaining,
        reset_at,
        observed_at,
    })
}
