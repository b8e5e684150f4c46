//! Rate-limited HTTP client.
//!
//! The [`Client`] type is the main entry point. Requests go through a
//! response cache, a deduplicating FIFO queue and an adaptive delay before
//! they reach the network. Use [`ClientBuilder`] to configure and create
//! clients.

use crate::{
    cache::{ResponseCache, DEFAULT_CACHE_TTL},
    descriptor::RequestDescriptor,
    fallback::{FallbackBackend, FallbackStore, FileBackend},
    queue::{self, QueuedRequest, RequestQueue, Ticket},
    rate_limit::RateLimitInfo,
    response::{Fallback, Fetched, RawResponse, Source},
    stats::{epoch_millis, RateStats, StatsStore},
    throttle::{DelayController, Mode, ThrottleConfig},
    Error, Response, Result,
};
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use url::Url;

/// An HTTP client that paces its own requests.
///
/// The client is designed to be shared. Cloning is cheap and every clone
/// feeds the same queue, cache and delay controller.
///
/// # Examples
///
/// ```no_run
/// use patience::{Client, RequestDescriptor};
/// use serde::Deserialize;
/// use std::time::Duration;
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
///     .timeout(Duration::from_secs(30))
///     .build()?;
///
/// // Served from the cache if fetched within the last minute
/// let events = client.get::<Vec<Event>>("/events").await?;
/// println!("{} events", events.data.len());
///
/// let filtered = client
///     .request::<Vec<Event>>(RequestDescriptor::get("/events").param("wilaya", "16"))
///     .await?;
/// println!("{} events in Algiers", filtered.len());
///
/// let stats = client.queue_stats();
/// println!("current delay: {} ms", stats.current_delay_ms);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    http_client: reqwest::Client,
    base_url: Url,
    default_headers: HeaderMap,
    timeout: Option<Duration>,
    dedupe: bool,
    fallback: FallbackStore,
    state: Mutex<CoreState>,
    notify: Arc<Notify>,
}

/// Everything the scheduler mutates, behind one lock so snapshots agree.
pub(crate) struct CoreState {
    pub(crate) queue: RequestQueue,
    pub(crate) cache: ResponseCache<RawResponse>,
    pub(crate) controller: DelayController,
    pub(crate) stats: StatsStore,
}

impl ClientInner {
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, CoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs one dequeued request and settles it. `_permit` holds the
    /// concurrency slot until this returns.
    pub(crate) async fn dispatch(self: Arc<Self>, request: QueuedRequest, _permit: OwnedSemaphorePermit) {
        let result = self.execute(&request.descriptor).await;

        let mut snapshot = None;
        let mut throttled_at = None;
        {
            let mut state = self.lock_state();
            match &result {
                Ok(raw) => {
                    state.controller.record_success();
                    if request.descriptor.cacheable {
                        state.cache.put(
                            request.fingerprint.clone(),
                            raw.clone(),
                            request.descriptor.cache_ttl,
                        );
                    }
                    if request.descriptor.persist {
                        snapshot = Some(raw.body.clone());
                    }
                }
                Err(Error::RateLimited {
                    rate_limit_info, ..
                }) => {
                    let ceiling = state.controller.config().ceiling(state.controller.mode());
                    let hint = rate_limit_info
                        .as_ref()
                        .and_then(|info: &RateLimitInfo| info.delay(ceiling));
                    let delay = state.controller.record_rate_limit_hit(hint);
                    let now = SystemTime::now();
                    state.stats.record_rate_limit_hit(now);
                    throttled_at = Some(now);

                    tracing::warn!(
                        fingerprint = %request.fingerprint,
                        delay_ms = delay.as_millis() as u64,
                        retry_after_ms = hint.map(|d| d.as_millis() as u64),
                        mode = ?state.controller.mode(),
                        hits = state.stats.rate_limit_hit_count(),
                        "Rate limited - escalating delay"
                    );
                }
                Err(_) => {}
            }

            let delivered = state.queue.settle(&request, result);
            tracing::debug!(id = request.id, delivered, "Request settled");
        }

        if let Some(body) = snapshot {
            self.persist_snapshot(request.fingerprint.to_string(), body);
        }
        if let Some(at) = throttled_at {
            let store = self.fallback.clone();
            tokio::task::spawn_blocking(move || store.mark_rate_limited(at));
        }
    }

    /// Writes a last-known-good snapshot off the async runtime.
    fn persist_snapshot(&self, key: String, body: String) {
        let payload = match serde_json::from_str::<Value>(&body) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::debug!(key = %key, error = %e, "Response is not JSON, skipping snapshot");
                return;
            }
        };
        let store = self.fallback.clone();
        tokio::task::spawn_blocking(move || store.save(&key, payload));
    }

    /// Executes a single network call.
    async fn execute(&self, descriptor: &RequestDescriptor) -> Result<RawResponse> {
        let mut url = self.base_url.clone();
        let path = format!(
            "{}/{}",
            self.base_url.path().trim_end_matches('/'),
            descriptor.path.trim_start_matches('/')
        );
        url.set_path(&path);

        if descriptor.params_in_query() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &descriptor.params {
                match value {
                    Value::Null => {}
                    Value::String(s) => {
                        pairs.append_pair(key, s);
                    }
                    other => {
                        pairs.append_pair(key, &other.to_string());
                    }
                }
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }

        tracing::debug!(
            method = %descriptor.method,
            url = %url,
            "Executing HTTP request"
        );

        let mut request = self.http_client.request(descriptor.method.clone(), url);

        for (name, value) in &self.default_headers {
            request = request.header(name, value);
        }

        for (name, value) in &descriptor.headers {
            request = request.header(name, value);
        }

        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        if !descriptor.params_in_query() && !descriptor.params.is_empty() {
            request = request.json(&descriptor.params);
        }

        let response = request.send().await?;
        let status = response.status();
        let headers = response.headers().clone();

        tracing::info!(status = status.as_u16(), "Received HTTP response");

        if status == http::StatusCode::TOO_MANY_REQUESTS {
            let raw_response = response.text().await.unwrap_or_default();
            let rate_limit_info = RateLimitInfo::from_headers(&headers);
            return Err(Error::RateLimited {
                raw_response,
                headers,
                rate_limit_info,
            });
        }

        if !status.is_success() {
            let raw_response = response.text().await.unwrap_or_default();

            if status.is_client_error() {
                tracing::error!(
                    status = status.as_u16(),
                    response = %raw_response,
                    "Client error (4xx)"
                );
            } else if status.is_server_error() {
                tracing::warn!(
                    status = status.as_u16(),
                    response = %raw_response,
                    "Server error (5xx)"
                );
            }

            return Err(Error::HttpError {
                status,
                raw_response,
                headers,
            });
        }

        let body = response.text().await?;
        Ok(RawResponse {
            status,
            headers,
            body,
            source: Source::Network,
        })
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.notify.notify_one();
    }
}

impl Client {
    /// Creates a new `ClientBuilder` for configuring a client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Submits a request and returns a handle to its eventual result.
    ///
    /// A cacheable request with a fresh cache entry resolves immediately
    /// without being queued. A deduplicating request that matches one
    /// already queued or in flight shares its network call.
    pub fn submit(&self, descriptor: RequestDescriptor) -> Ticket {
        let fingerprint = descriptor.fingerprint();
        let dedupe = self.inner.dedupe && descriptor.dedupe;

        let mut state = self.inner.lock_state();
        if descriptor.cacheable {
            if let Some(hit) = state.cache.get(&fingerprint).cloned() {
                let id = state.queue.allocate_id();
                tracing::debug!(id, fingerprint = %fingerprint, "Cache hit");
                return Ticket::resolved(
                    id,
                    RawResponse {
                        source: Source::Cache,
                        ..hit
                    },
                );
            }
        }

        let enqueued = state.queue.enqueue(descriptor, fingerprint, dedupe);
        let queue_depth = state.queue.depth();
        drop(state);

        tracing::trace!(queue_depth, "Request submitted");
        self.inner.notify.notify_one();
        Ticket::queued(Arc::clone(&self.inner), enqueued)
    }

    /// Submits a request and waits for its typed result.
    ///
    /// # Errors
    ///
    /// - [`Error::RateLimited`] if the server answered `429`. The delay has
    ///   already been escalated; the request is not retried.
    /// - [`Error::HttpError`] for any other non-2xx status.
    /// - [`Error::DeserializationFailed`] if the body does not decode as `T`.
    /// - [`Error::Network`] or [`Error::Timeout`] for transport failures.
    pub async fn request<T>(&self, descriptor: RequestDescriptor) -> Result<Response<T>>
    where
        T: DeserializeOwned,
    {
        self.submit(descriptor).wait().await
    }

    /// Makes a GET request to the specified path.
    pub async fn get<T>(&self, path: impl Into<String>) -> Result<Response<T>>
    where
        T: DeserializeOwned,
    {
        self.request(RequestDescriptor::get(path)).await
    }

    /// Makes a POST request with `body`'s fields as JSON parameters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SerializationFailed`] if `body` does not serialize
    /// to a JSON object.
    pub async fn post<Req, T>(&self, path: impl Into<String>, body: &Req) -> Result<Response<T>>
    where
        Req: Serialize,
        T: DeserializeOwned,
    {
        let params = match serde_json::to_value(body)
            .map_err(|e| Error::SerializationFailed(e.to_string()))?
        {
            Value::Object(map) => map,
            other => {
                return Err(Error::SerializationFailed(format!(
                    "request body must be a JSON object, got {}",
                    other
                )))
            }
        };
        self.request(RequestDescriptor::post(path).params(params))
            .await
    }

    /// A consistent snapshot of the throttling state.
    pub fn queue_stats(&self) -> RateStats {
        let mut state = self.inner.lock_state();
        RateStats {
            requests_in_window: state.stats.requests_in_window(),
            rate_limit_hit_count: state.stats.rate_limit_hit_count(),
            current_delay_ms: state.controller.current_delay().as_millis() as u64,
            queue_depth: state.queue.depth(),
            in_flight: state.queue.in_flight(),
            cache_size: state.cache.len(),
            mode: state.controller.mode(),
            last_rate_limited_at_ms: state.stats.last_rate_limited_at().map(epoch_millis),
            fallback_write_failures: self.inner.fallback.write_failures(),
        }
    }

    /// Switches to the conservative baseline and ceiling.
    ///
    /// The delay is measured from the previous dispatch or settle, so the
    /// very first request of a fresh client still goes out immediately;
    /// every later dispatch waits at least the conservative baseline.
    pub fn use_conservative_mode(&self) {
        self.set_mode(Mode::Conservative);
    }

    /// Switches back to the normal baseline and ceiling.
    pub fn use_normal_mode(&self) {
        self.set_mode(Mode::Normal);
    }

    fn set_mode(&self, mode: Mode) {
        let changed = self.inner.lock_state().controller.set_mode(mode);
        if changed {
            tracing::info!(mode = ?mode, "Throttling mode changed");
        }
    }

    /// The current throttling mode.
    pub fn mode(&self) -> Mode {
        self.inner.lock_state().controller.mode()
    }

    /// Empties the response cache. The next request for any key goes to the
    /// network.
    pub fn clear_cache(&self) {
        self.inner.lock_state().cache.clear();
        tracing::debug!("Response cache cleared");
    }

    /// The store holding last-known-good snapshots.
    pub fn fallback_store(&self) -> &FallbackStore {
        &self.inner.fallback
    }

    /// Loads the persisted snapshot for `descriptor`, whatever its age.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the store cannot be read or the
    /// snapshot does not decode as `T`.
    pub async fn load_fallback<T>(&self, descriptor: &RequestDescriptor) -> Result<Option<Fallback<T>>>
    where
        T: DeserializeOwned,
    {
        let key = descriptor.fingerprint().to_string();
        let store = self.inner.fallback.clone();
        let snapshot = tokio::task::spawn_blocking(move || store.load(&key))
            .await
            .map_err(|e| Error::Storage(format!("fallback read task failed: {}", e)))??;

        let Some(snapshot) = snapshot else {
            return Ok(None);
        };
        let data = serde_json::from_value::<T>(snapshot.payload)
            .map_err(|e| Error::Storage(format!("snapshot does not match expected type: {}", e)))?;

        Ok(Some(Fallback {
            data,
            saved_at: snapshot.saved_at,
            age: snapshot.age,
        }))
    }

    /// Like [`request`](Self::request), but answers a `429` with the
    /// persisted snapshot when it is at most `max_age` old.
    ///
    /// Any other failure, or a throttled request without a usable snapshot,
    /// returns the original error.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use patience::{Client, Fetched, RequestDescriptor, DEFAULT_FALLBACK_MAX_AGE};
    ///
    /// # async fn example(client: Client) -> Result<(), patience::Error> {
    /// let fetched = client
    ///     .request_with_fallback::<Vec<String>>(
    ///         RequestDescriptor::get("/wilayas"),
    ///         DEFAULT_FALLBACK_MAX_AGE,
    ///     )
    ///     .await?;
    ///
    /// if let Fetched::Cached(fallback) = &fetched {
    ///     println!("showing data from {:?} ago", fallback.age);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn request_with_fallback<T>(
        &self,
        descriptor: RequestDescriptor,
        max_age: Duration,
    ) -> Result<Fetched<T>>
    where
        T: DeserializeOwned,
    {
        let lookup = descriptor.clone();
        let error = match self.request::<T>(descriptor).await {
            Ok(response) => return Ok(Fetched::Live(response)),
            Err(error) if error.is_rate_limited() => error,
            Err(error) => return Err(error),
        };

        match self.load_fallback::<T>(&lookup).await {
            Ok(Some(fallback)) if fallback.age <= max_age => {
                tracing::info!(
                    path = %lookup.path,
                    age_secs = fallback.age.as_secs(),
                    "Rate limited - serving fallback snapshot"
                );
                Ok(Fetched::Cached(fallback))
            }
            Ok(Some(fallback)) => {
                tracing::debug!(
                    path = %lookup.path,
                    age_secs = fallback.age.as_secs(),
                    "Fallback snapshot too old"
                );
                Err(error)
            }
            Ok(None) => Err(error),
            Err(e) => {
                tracing::warn!(path = %lookup.path, error = %e, "Failed to load fallback snapshot");
                Err(error)
            }
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.inner.base_url.as_str())
            .finish_non_exhaustive()
    }
}

/// Builder for configuring and creating a [`Client`].
///
/// # Examples
///
/// ```no_run
/// use patience::{ClientBuilder, ThrottleConfig};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), patience::Error> {
/// let client = ClientBuilder::new()
///     .base_url("https://api.example.com")?
///     .timeout(Duration::from_secs(30))
///     .throttle_config(
///         ThrottleConfig::builder()
///             .normal_baseline(Duration::from_millis(200))
///             .build(),
///     )
///     .fallback_dir("/var/cache/my-app")
///     .default_header("User-Agent", "my-app/1.0")?
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    base_url: Option<Url>,
    default_headers: HeaderMap,
    timeout: Option<Duration>,
    throttle: ThrottleConfig,
    cache_ttl: Duration,
    dedupe: bool,
    fallback: Option<FallbackStore>,
}

impl ClientBuilder {
    /// Creates a new `ClientBuilder` with default settings.
    pub fn new() -> Self {
        Self {
            base_url: None,
            default_headers: HeaderMap::new(),
            timeout: None,
            throttle: ThrottleConfig::default(),
            cache_ttl: DEFAULT_CACHE_TTL,
            dedupe: true,
            fallback: None,
        }
    }

    /// Sets the base URL for all requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn base_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.base_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Adds a default header that will be included in all requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header value: {}", e)))?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    /// Sets the per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the throttling configuration. It is validated by
    /// [`build`](Self::build).
    pub fn throttle_config(mut self, config: ThrottleConfig) -> Self {
        self.throttle = config;
        self
    }

    /// Sets the default lifetime of cached responses.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Enables or disables request deduplication for the whole client.
    ///
    /// When disabled, a descriptor's own `dedupe` flag is ignored.
    pub fn dedupe(mut self, dedupe: bool) -> Self {
        self.dedupe = dedupe;
        self
    }

    /// Persists fallback snapshots as files in `dir`.
    pub fn fallback_dir(self, dir: impl Into<PathBuf>) -> Self {
        self.fallback_backend(Arc::new(FileBackend::new(dir)))
    }

    /// Persists fallback snapshots through a custom backend.
    ///
    /// Defaults to an in-memory backend.
    pub fn fallback_backend(mut self, backend: Arc<dyn FallbackBackend>) -> Self {
        self.fallback = Some(FallbackStore::new(backend));
        self
    }

    /// Uses an existing store, for example one shared with another client.
    pub fn fallback_store(mut self, store: FallbackStore) -> Self {
        self.fallback = Some(store);
        self
    }

    /// Builds the configured `Client` and starts its dispatcher.
    ///
    /// If the fallback store remembers a `429` within the conservative
    /// window, the client starts in [`Mode::Conservative`].
    ///
    /// # Errors
    ///
    /// Returns an error if no base URL was provided, the throttle
    /// configuration is invalid, or no Tokio runtime is running.
    pub fn build(self) -> Result<Client> {
        let base_url = self
            .base_url
            .ok_or_else(|| Error::ConfigurationError("Base URL is required".to_string()))?;

        self.throttle.validate()?;

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            Error::ConfigurationError(format!("Client must be built inside a Tokio runtime: {}", e))
        })?;

        let http_client = reqwest::Client::builder().build().map_err(|e| {
            Error::ConfigurationError(format!("Failed to build HTTP client: {}", e))
        })?;

        let fallback = self.fallback.unwrap_or_else(FallbackStore::in_memory);
        let mut controller = DelayController::new(self.throttle.clone());
        let mut stats = StatsStore::new(self.throttle.stats_window);

        if let Some(at) = fallback.last_rate_limited_at() {
            stats.restore_last_rate_limited_at(at);
            let age = SystemTime::now().duration_since(at).unwrap_or_default();
            if age < self.throttle.conservative_window {
                controller.set_mode(Mode::Conservative);
                tracing::info!(
                    age_secs = age.as_secs(),
                    "Recently rate limited - starting in conservative mode"
                );
            }
        }

        let notify = Arc::new(Notify::new());
        let slots = Arc::new(Semaphore::new(self.throttle.max_concurrency));

        let inner = Arc::new(ClientInner {
            http_client,
            base_url,
            default_headers: self.default_headers,
            timeout: self.timeout,
            dedupe: self.dedupe,
            fallback,
            state: Mutex::new(CoreState {
                queue: RequestQueue::default(),
                cache: ResponseCache::new(self.cache_ttl),
                controller,
                stats,
            }),
            notify: Arc::clone(&notify),
        });

        runtime.spawn(queue::run_dispatcher(Arc::downgrade(&inner), notify, slots));

        Ok(Client { inner })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
