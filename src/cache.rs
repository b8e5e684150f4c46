//! In-memory response cache keyed by [`Fingerprint`].
//!
//! Every entry carries its own TTL. Expiry is checked lazily: a read at an
//! age of at least the TTL treats the entry as absent and evicts it. Writes
//! sweep out expired entries once the map has doubled since the last sweep,
//! so keys that are never read again do not pile up.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::descriptor::Fingerprint;

/// Default time-to-live for cached responses.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

/// Map size below which writes never sweep.
const MIN_SWEEP_AT: usize = 64;

/// A cached payload and its lifetime.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// Key the entry was stored under.
    pub fingerprint: Fingerprint,
    /// The cached value.
    pub payload: V,
    /// When the entry was written.
    pub stored_at: Instant,
    /// How long the entry stays readable.
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    /// Whether the entry is still readable at `now`.
    pub fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) < self.ttl
    }
}

/// TTL cache for response payloads.
///
/// # Example
///
/// ```
/// use patience::{RequestDescriptor, ResponseCache};
///
/// let mut cache = ResponseCache::default();
/// let key = RequestDescriptor::get("/wilayas").fingerprint();
///
/// cache.put(key.clone(), "[]".to_string(), None);
/// assert_eq!(cache.get(&key).map(String::as_str), Some("[]"));
///
/// cache.clear();
/// assert!(cache.get(&key).is_none());
/// ```
#[derive(Debug)]
pub struct ResponseCache<V> {
    entries: HashMap<Fingerprint, CacheEntry<V>>,
    default_ttl: Duration,
    sweep_at: usize,
}

impl<V> ResponseCache<V> {
    /// Creates an empty cache whose entries live `default_ttl` unless `put`
    /// says otherwise.
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            default_ttl,
            sweep_at: MIN_SWEEP_AT,
        }
    }

    /// Returns the payload for `fingerprint` if it has not expired.
    ///
    /// An expired entry is removed.
    pub fn get(&mut self, fingerprint: &Fingerprint) -> Option<&V> {
        let now = Instant::now();
        let fresh = self.entries.get(fingerprint)?.is_fresh(now);
        if !fresh {
            tracing::trace!(fingerprint = %fingerprint, "Evicting expired cache entry");
            self.entries.remove(fingerprint);
            return None;
        }
        self.entries.get(fingerprint).map(|entry| &entry.payload)
    }

    /// Stores `payload`, replacing any previous entry for the fingerprint.
    pub fn put(&mut self, fingerprint: Fingerprint, payload: V, ttl: Option<Duration>) {
        let entry = CacheEntry {
            fingerprint: fingerprint.clone(),
            payload,
            stored_at: Instant::now(),
            ttl: ttl.unwrap_or(self.default_ttl),
        };
        self.entries.insert(fingerprint, entry);

        if self.entries.len() >= self.sweep_at {
            self.cleanup();
            self.sweep_at = (self.entries.len() * 2).max(MIN_SWEEP_AT);
        }
    }

    /// Removes every expired entry.
    pub fn cleanup(&mut self) {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_fresh(now));
        tracing::trace!(
            evicted = before - self.entries.len(),
            remaining = self.entries.len(),
            "Swept expired cache entries"
        );
    }

    /// Removes a single entry.
    pub fn remove(&mut self, fingerprint: &Fingerprint) -> Option<V> {
        self.entries.remove(fingerprint).map(|entry| entry.payload)
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.sweep_at = MIN_SWEEP_AT;
    }

    /// Number of entries that have not expired yet.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .values()
            .filter(|entry| entry.is_fresh(now))
            .count()
    }

    /// Whether no live entry remains.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// TTL used when `put` is not given one.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }
}

impl<V> Default for ResponseCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}
