//! Rate-limit header parsing
//!
//! Upstream responses may carry `X-RateLimit-Remaining` (request count) and
//! `X-RateLimit-Reset` (epoch milliseconds). Both are advisory: they feed the
//! pool's status snapshot and never gate credential selection.

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use tracing::debug;

const REMAINING_HEADER: &str = "x-ratelimit-remaining";
const RESET_HEADER: &str = "x-ratelimit-reset";

/// Quota metadata observed on one response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuotaHeaders {
    pub requests_remaining: Option<u64>,
    pub reset_at: Option<DateTime<Utc>>,
}

impl QuotaHeaders {
    /// Parse quota headers, ignoring absent or malformed values.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let requests_remaining = header_str(headers, REMAINING_HEADER).and_then(|v| {
            v.trim()
                .parse::<u64>()
                .inspect_err(|e| debug!(value = v, error = %e, "ignoring malformed remaining header"))
                .ok()
        });

        let reset_at = header_str(headers, RESET_HEADER)
            .and_then(|v| {
                v.trim()
                    .parse::<i64>()
                    .inspect_err(|e| debug!(value = v, error = %e, "ignoring malformed reset header"))
                    .ok()
            })
            .and_then(DateTime::from_timestamp_millis);

        Self {
            requests_remaining,
            reset_at,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.requests_remaining.is_none() && self.reset_at.is_none()
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
