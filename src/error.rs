//! Error types for throttled API calls.
//!
//! Only throttling is absorbed into the client's adaptive state. Every other
//! failure is returned verbatim so calling code keeps the full context: the
//! raw body, the status code and the response headers when there were any.

use http::{HeaderMap, StatusCode};
use std::sync::Arc;

use crate::rate_limit::RateLimitInfo;

/// Coarse classification of a failed request.
///
/// Domain services usually only need to know which of these three buckets a
/// failure falls into to pick a user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The server signaled throttling with `429 Too Many Requests`.
    RateLimited,
    /// The request never produced an HTTP response.
    NetworkError,
    /// The server answered with a non-429 error status, or with a body that
    /// could not be decoded.
    ServerError,
}

/// The main error type for requests routed through the client.
///
/// `Error` is `Clone` because deduplicated callers share the result of a
/// single network call.
///
/// # Examples
///
/// ```no_run
/// use patience::{Client, Error, RequestDescriptor};
///
/// # async fn example() -> Result<(), Error> {
/// let client = Client::builder()
///     .base_url("https://api.example.com")?
///     .build()?;
///
/// match client.request::<serde_json::Value>(RequestDescriptor::get("/events")).await {
///     Ok(response) => println!("Success: {:?}", response.data),
///     Err(Error::RateLimited { rate_limit_info, .. }) => {
///         eprintln!("Throttled, server hint: {:?}", rate_limit_info);
///     }
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    /// A network-level error occurred (connection refused, DNS failure, ...).
    #[error("Network error: {0}")]
    Network(#[source] Arc<reqwest::Error>),

    /// The request timed out.
    #[error("Request timed out")]
    Timeout,

    /// The server rejected the request with `429 Too Many Requests`.
    ///
    /// By the time a caller sees this, the client has already recorded the
    /// hit and escalated its inter-request delay. The request is not retried.
    #[error("Rate limited by server: {raw_response}")]
    RateLimited {
        /// The raw response body
        raw_response: String,
        /// The response headers
        headers: HeaderMap,
        /// Rate limit hints parsed from the headers, if the server sent any
        rate_limit_info: Option<RateLimitInfo>,
    },

    /// The server returned a non-2xx status other than 429.
    #[error("HTTP error {status}: {raw_response}")]
    HttpError {
        /// The HTTP status code
        status: StatusCode,
        /// The raw response body
        raw_response: String,
        /// The response headers
        headers: HeaderMap,
    },

    /// Failed to deserialize the response body into the expected type.
    #[error("Failed to deserialize response (status {status}): {serde_error}")]
    DeserializationFailed {
        /// The raw response body that failed to deserialize
        raw_response: String,
        /// The serde error message
        serde_error: String,
        /// The HTTP status code
        status: StatusCode,
    },

    /// Failed to serialize the request parameters.
    #[error("Failed to serialize request: {0}")]
    SerializationFailed(String),

    /// Invalid configuration was provided.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// An invalid URL was provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The request was removed from the queue before it was dispatched, or
    /// the client shut down while it was waiting.
    #[error("Request cancelled before dispatch")]
    Cancelled,

    /// The fallback storage backend failed.
    ///
    /// Only returned from explicit fallback reads. Writes are best-effort and
    /// never surface this to a request.
    #[error("Fallback storage error: {0}")]
    Storage(String),
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Error::Timeout
        } else {
            Error::Network(Arc::new(error))
        }
    }
}

impl Error {
    /// Classifies this error for caller-side handling.
    ///
    /// Returns `None` for errors that are neither a throttling signal, a
    /// transport failure nor a server answer (configuration mistakes,
    /// cancellation, storage problems).
    ///
    /// # Examples
    ///
    /// ```
    /// use patience::{Error, ErrorKind};
    /// use http::{HeaderMap, StatusCode};
    ///
    /// let err = Error::HttpError {
    ///     status: StatusCode::SERVICE_UNAVAILABLE,
    ///     raw_response: "down".to_string(),
    ///     headers: HeaderMap::new(),
    /// };
    /// assert_eq!(err.kind(), Some(ErrorKind::ServerError));
    /// assert_eq!(Error::Timeout.kind(), Some(ErrorKind::NetworkError));
    /// ```
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::RateLimited { .. } => Some(ErrorKind::RateLimited),
            Error::Network(_) | Error::Timeout => Some(ErrorKind::NetworkError),
            Error::HttpError { .. } | Error::DeserializationFailed { .. } => {
                Some(ErrorKind::ServerError)
            }
            Error::SerializationFailed(_)
            | Error::ConfigurationError(_)
            | Error::InvalidUrl(_)
            | Error::Cancelled
            | Error::Storage(_) => None,
        }
    }

    /// Returns `true` if the server throttled this request.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::RateLimited { .. })
    }

    /// Returns the HTTP status code if this error has one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::RateLimited { .. } => Some(StatusCode::TOO_MANY_REQUESTS),
            Error::HttpError { status, .. } => Some(*status),
            Error::DeserializationFailed { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the raw response body if this error has one.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Error::RateLimited { raw_response, .. } => Some(raw_response),
            Error::HttpError { raw_response, .. } => Some(raw_response),
            Error::DeserializationFailed { raw_response, .. } => Some(raw_response),
            _ => None,
        }
    }

    /// Returns rate limit information if the server advertised any.
    pub fn rate_limit_info(&self) -> Option<&RateLimitInfo> {
        match self {
            Error::RateLimited {
                rate_limit_info, ..
            } => rate_limit_info.as_ref(),
            _ => None,
        }
    }
}

/// A specialized `Result` type for requests routed through the client.
pub type Result<T> = std::result::Result<T, Error>;
