use axum::http::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Quota metadata attached to an admitted, throttled response.
///
/// `reset` is the policy's nominal window length, not the live countdown;
/// only rejections surface the live remaining time (as `Retry-After`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaStatus {
    pub limit: u64,
    pub remaining: u64,
    pub reset: u64,
}

impl QuotaStatus {
    pub fn new(limit: u64, remaining: u64, reset: u64) -> Self {
        Self {
            limit,
            remaining,
            reset,
        }
    }

    pub fn apply(&self, headers: &mut HeaderMap) {
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(self.remaining));
        headers.insert(X_RATELIMIT_RESET, HeaderValue::from(self.reset));
    }

    /// Read quota headers back from a response, if all three are present.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let read = |name: &HeaderName| -> Option<u64> { headers.get(name)?.to_str().ok()?.parse().ok() };

        Some(Self {
            limit: read(&X_RATELIMIT_LIMIT)?,
            remaining: read(&X_RATELIMIT_REMAINING)?,
            reset: read(&X_RATELIMIT_RESET)?,
        })
    }
}
