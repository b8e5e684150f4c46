//! Throttling hints advertised by the server.
//!
//! A `429` response often tells the client how long to stay away. These hints
//! are attached to [`Error::RateLimited`](crate::Error::RateLimited) and, when
//! [`ThrottleConfig::respect_retry_after`](crate::ThrottleConfig) is enabled,
//! used as a floor for the escalated inter-request delay.

use http::HeaderMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Information extracted from rate limit headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// When the rate limit resets (from X-RateLimit-Reset or RateLimit-Reset).
    pub reset_at: Option<SystemTime>,

    /// How long to wait before the next request (from Retry-After).
    pub retry_after: Option<Duration>,

    /// Number of requests remaining in the current server window.
    pub remaining: Option<u64>,
}

impl RateLimitInfo {
    /// Extracts throttling hints from response headers.
    ///
    /// Returns `None` when none of the recognised headers is present, so a
    /// bare `429` carries no info at all rather than an empty struct.
    ///
    /// Recognised headers:
    /// - `Retry-After` (delay-seconds or HTTP date)
    /// - `X-RateLimit-Reset` and `RateLimit-Reset` (Unix timestamp)
    /// - `X-RateLimit-Remaining`
    ///
    /// # Examples
    ///
    /// ```
    /// use patience::rate_limit::RateLimitInfo;
    /// use http::HeaderMap;
    /// use std::time::Duration;
    ///
    /// let mut headers = HeaderMap::new();
    /// headers.insert("retry-after", "3".parse().unwrap());
    ///
    /// let info = RateLimitInfo::from_headers(&headers).unwrap();
    /// assert_eq!(info.retry_after, Some(Duration::from_secs(3)));
    /// assert!(RateLimitInfo::from_headers(&HeaderMap::new()).is_none());
    /// ```
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let info = Self {
            reset_at: parse_rate_limit_reset(headers),
            retry_after: parse_retry_after(headers),
            remaining: parse_rate_limit_remaining(headers),
        };

        if info.reset_at.is_none() && info.retry_after.is_none() && info.remaining.is_none() {
            None
        } else {
            Some(info)
        }
    }

    /// Returns the advertised wait, capped by `max_wait`.
    ///
    /// `retry_after` wins over `reset_at`. A reset time in the past yields
    /// `None`.
    pub fn delay(&self, max_wait: Duration) -> Option<Duration> {
        if let Some(retry_after) = self.retry_after {
            return Some(retry_after.min(max_wait));
        }

        let until_reset = self.reset_at?.duration_since(SystemTime::now()).ok()?;
        Some(until_reset.min(max_wait))
    }
}

/// Parses the Retry-After header.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let header = headers.get("retry-after")?.to_str().ok()?;

    if let Ok(seconds) = header.trim().parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    // RFC 7231 HTTP-date
    let date_time = httpdate::parse_http_date(header).ok()?;
    date_time.duration_since(SystemTime::now()).ok()
}

/// Parses X-RateLimit-Reset, falling back to the draft RateLimit-Reset.
fn parse_rate_limit_reset(headers: &HeaderMap) -> Option<SystemTime> {
    ["x-ratelimit-reset", "ratelimit-reset"]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        .find_map(|value| value.trim().parse::<u64>().ok())
        .map(|timestamp| UNIX_EPOCH + Duration::from_secs(timestamp))
}

fn parse_rate_limit_remaining(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("x-ratelimit-remaining")?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}
