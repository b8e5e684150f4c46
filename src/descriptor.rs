//! Request descriptors and their fingerprints.
//!
//! A [`RequestDescriptor`] is everything the client needs to issue one call.
//! Its [`Fingerprint`] is the cache, deduplication and fallback key.

use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Deterministic identifier for a request's endpoint and parameters.
///
/// Two descriptors with the same method, path and parameters produce the same
/// fingerprint no matter in which order parameter keys (or the keys of nested
/// JSON objects) were inserted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Returns the fingerprint as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Describes a single outbound request.
///
/// Parameters are sent as the query string for `GET`, `HEAD` and `DELETE`
/// and as a JSON object body for every other method.
///
/// Only `GET` requests are cached, deduplicated and persisted for fallback by
/// default; the `cacheable`, `dedupe` and `persist` builders override that.
///
/// # Examples
///
/// ```
/// use patience::RequestDescriptor;
///
/// let a = RequestDescriptor::get("/events")
///     .param("wilaya", "16")
///     .param("page", 2);
/// let b = RequestDescriptor::get("/events")
///     .param("page", 2)
///     .param("wilaya", "16");
///
/// assert_eq!(a.fingerprint(), b.fingerprint());
/// ```
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    /// The HTTP method.
    pub method: Method,

    /// The request path, relative to the client's base URL.
    pub path: String,

    /// Request parameters.
    pub params: BTreeMap<String, Value>,

    /// Additional headers. Headers never contribute to the fingerprint.
    pub headers: HeaderMap,

    /// Replaces the derived fingerprint when set.
    pub cache_key: Option<String>,

    /// Whether successful responses are kept in the response cache.
    pub cacheable: bool,

    /// Whether concurrent identical requests share one network call.
    pub dedupe: bool,

    /// Whether successful responses are snapshotted to the fallback store.
    pub persist: bool,

    /// Overrides the client's default cache TTL for this request.
    pub cache_ttl: Option<Duration>,
}

impl RequestDescriptor {
    /// Creates a descriptor with the given method and path.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let idempotent_read = method == Method::GET;
        Self {
            method,
            path: path.into(),
            params: BTreeMap::new(),
            headers: HeaderMap::new(),
            cache_key: None,
            cacheable: idempotent_read,
            dedupe: idempotent_read,
            persist: idempotent_read,
            cache_ttl: None,
        }
    }

    /// Shorthand for a `GET` descriptor.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// Shorthand for a `POST` descriptor.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Adds a parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Adds multiple parameters.
    pub fn params<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Adds a header.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn header(
        mut self,
        name: impl AsRef<str>,
        value: impl AsRef<str>,
    ) -> Result<Self, crate::Error> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| crate::Error::ConfigurationError(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| crate::Error::ConfigurationError(format!("Invalid header value: {}", e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Uses `key` instead of the derived fingerprint.
    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    /// Sets whether successful responses are cached.
    pub fn cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    /// Sets whether concurrent identical requests share one network call.
    pub fn dedupe(mut self, dedupe: bool) -> Self {
        self.dedupe = dedupe;
        self
    }

    /// Sets whether successful responses are persisted for fallback.
    pub fn persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    /// Overrides the cache TTL for this request.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Whether parameters travel in the query string.
    pub(crate) fn params_in_query(&self) -> bool {
        matches!(self.method, Method::GET | Method::HEAD | Method::DELETE)
    }

    /// Derives the fingerprint for this descriptor.
    pub fn fingerprint(&self) -> Fingerprint {
        if let Some(key) = &self.cache_key {
            return Fingerprint(key.clone());
        }

        let mut key = format!("{} {}", self.method, self.path);
        if !self.params.is_empty() {
            let params: serde_json::Map<String, Value> = self
                .params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            key.push(' ');
            key.push_str(&write_sorted(&Value::Object(params)));
        }
        Fingerprint(key)
    }
}

impl Default for RequestDescriptor {
    fn default() -> Self {
        Self::new(Method::GET, "")
    }
}

/// Serializes with object keys in sorted order even when serde_json keeps
/// insertion order.
fn write_sorted(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", Value::String(k.clone()), write_sorted(&map[k])))
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(write_sorted).collect();
            format!("[{}]", items.join(","))
        }
        other => other.to_string(),
    }
}
