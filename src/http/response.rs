//! Rate-limit response contract: 429 body and `RateLimit-*` headers.

use axum::http::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::time::Duration;

use crate::ratelimit::{Admission, Quota, RateLimitExceeded};

pub const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
pub const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
pub const RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

/// Whole seconds, rounded up.
pub fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

/// Write the standard `RateLimit-*` headers for `quota`.
pub fn insert_quota_headers(headers: &mut HeaderMap, quota: &Quota) {
    headers.insert(RATELIMIT_LIMIT, HeaderValue::from(quota.limit));
    headers.insert(RATELIMIT_REMAINING, HeaderValue::from(quota.remaining));
    headers.insert(RATELIMIT_RESET, HeaderValue::from(ceil_secs(quota.reset_after)));
}

/// Decorate an admitted response with the admission's headers, if any.
///
/// Headers already set by an inner limiter are left untouched.
pub fn decorate(mut response: Response, admission: &Admission) -> Response {
    if response.headers().contains_key(RATELIMIT_LIMIT) {
        return response;
    }
    if let Some(quota) = admission.quota() {
        insert_quota_headers(response.headers_mut(), &quota);
    }
    response
}

impl IntoResponse for RateLimitExceeded {
    fn into_response(self) -> Response {
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(&self.payload)).into_response();
        let headers = response.headers_mut();
        headers.insert(RETRY_AFTER, HeaderValue::from(ceil_secs(self.retry_after)));
        if let Some(quota) = self.quota() {
            insert_quota_headers(headers, &quota);
        }
        response
    }
}
