//! Successful responses, live or served from a cache.
//!
//! [`Response`] wraps the decoded payload together with what the HTTP
//! transaction looked like. [`Fetched`] is what
//! [`Client::request_with_fallback`](crate::Client::request_with_fallback)
//! hands back: either a live response or a persisted snapshot shown in
//! degraded mode.

use http::{HeaderMap, StatusCode};
use std::time::{Duration, SystemTime};

/// Where a response body came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// A network call, possibly shared with other deduplicated callers.
    Network,
    /// The in-memory response cache; no request was queued.
    Cache,
}

/// Undecoded response shared between the scheduler, the cache and waiters.
#[derive(Debug, Clone)]
pub(crate) struct RawResponse {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: String,
    pub(crate) source: Source,
}

/// A successful response.
///
/// # Examples
///
/// ```no_run
/// use patience::{Client, RequestDescriptor, Source};
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Event {
///     id: u64,
///     title: String,
/// }
///
/// # async fn example() -> Result<(), patience::Error> {
/// let client = Client::builder()
///     .base_url("https://api.example.com")?
///     .build()?;
///
/// let response = client
///     .request::<Vec<Event>>(RequestDescriptor::get("/events"))
///     .await?;
///
/// println!("{} events in {:?}", response.data.len(), response.latency);
/// if response.source == Source::Cache {
///     println!("served from cache");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Response<T> {
    /// The deserialized response data.
    pub data: T,

    /// The raw response body.
    pub raw_body: String,

    /// The HTTP status code of the response.
    pub status: StatusCode,

    /// The response headers.
    pub headers: HeaderMap,

    /// Time from submission to resolution, queueing delay included.
    pub latency: Duration,

    /// Where the body came from.
    pub source: Source,
}

impl<T> Response<T> {
    /// Maps the response data to a different type, keeping the metadata.
    ///
    /// # Examples
    ///
    /// ```
    /// # use patience::{Response, Source};
    /// # use http::{HeaderMap, StatusCode};
    /// # use std::time::Duration;
    /// let response = Response {
    ///     data: 42,
    ///     raw_body: "42".to_string(),
    ///     status: StatusCode::OK,
    ///     headers: HeaderMap::new(),
    ///     latency: Duration::from_millis(10),
    ///     source: Source::Network,
    /// };
    ///
    /// assert_eq!(response.map(|n| n.to_string()).data, "42");
    /// ```
    pub fn map<U, F>(self, f: F) -> Response<U>
    where
        F: FnOnce(T) -> U,
    {
        Response {
            data: f(self.data),
            raw_body: self.raw_body,
            status: self.status,
            headers: self.headers,
            latency: self.latency,
            source: self.source,
        }
    }

    /// Returns `true` if no network call was made for this response.
    pub fn from_cache(&self) -> bool {
        self.source == Source::Cache
    }

    /// Returns a header value by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }
}

impl<T> AsRef<T> for Response<T> {
    fn as_ref(&self) -> &T {
        &self.data
    }
}

impl<T> std::ops::Deref for Response<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

/// A persisted snapshot decoded into the caller's type.
#[derive(Debug, Clone)]
pub struct Fallback<T> {
    /// The decoded payload.
    pub data: T,
    /// When the snapshot was written.
    pub saved_at: SystemTime,
    /// How old the snapshot is.
    pub age: Duration,
}

/// Result of a request that may fall back to persisted data.
#[derive(Debug, Clone)]
pub enum Fetched<T> {
    /// Fresh data from the network or the response cache.
    Live(Response<T>),
    /// The server throttled the request and a recent enough snapshot was
    /// found. Callers should flag the data as cached.
    Cached(Fallback<T>),
}

impl<T> Fetched<T> {
    /// The payload, whichever way it was obtained.
    pub fn data(&self) -> &T {
        match self {
            Fetched::Live(response) => &response.data,
            Fetched::Cached(fallback) => &fallback.data,
        }
    }

    /// Consumes `self` and returns the payload.
    pub fn into_data(self) -> T {
        match self {
            Fetched::Live(response) => response.data,
            Fetched::Cached(fallback) => fallback.data,
        }
    }

    /// Returns `true` when degraded-mode data is being served.
    pub fn is_cached(&self) -> bool {
        matches!(self, Fetched::Cached(_))
    }
}
