//! Durable last-known-good snapshots.
//!
//! Successful responses of persistable requests are written here so that a
//! caller hit by throttling can still show something. The store is never
//! read on the happy path and never filters by age: [`FallbackStore::load`]
//! reports how old a snapshot is and the caller decides whether that is
//! acceptable ([`DEFAULT_FALLBACK_MAX_AGE`] is the usual policy).
//!
//! Writes are best-effort. A failing backend is logged at `warn` and counted
//! in [`FallbackStore::write_failures`]; it never fails a request.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::stats::epoch_millis;
use crate::{Error, Result};

/// Age beyond which callers usually stop trusting a snapshot.
pub const DEFAULT_FALLBACK_MAX_AGE: Duration = Duration::from_secs(30 * 60);

/// Key under which the time of the latest `429` is persisted.
pub const RATE_LIMITED_MARKER_KEY: &str = "patience:last-rate-limited";

/// Key/value persistence that survives process restarts.
///
/// Implementations are called from blocking threads and may do blocking IO.
pub trait FallbackBackend: Send + Sync + 'static {
    /// Returns the stored value, or `None` when the key is absent.
    fn read(&self, key: &str) -> io::Result<Option<String>>;

    /// Stores `value`, replacing any previous value.
    fn write(&self, key: &str, value: &str) -> io::Result<()>;

    /// Deletes the key. Deleting an absent key is not an error.
    fn remove(&self, key: &str) -> io::Result<()>;
}

/// Backend that keeps everything in process memory.
///
/// Useful for tests and for platforms without a writable disk.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

impl FallbackBackend for MemoryBackend {
    fn read(&self, key: &str) -> io::Result<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> io::Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

/// Backend storing one JSON file per key inside a directory.
///
/// File names are derived from the key, so the same key always maps to the
/// same file across restarts. Writes go through a temporary file and a
/// rename, so a crash never leaves a half-written snapshot behind.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Stores files under `dir`, which is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory holding the snapshots.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(key)))
    }
}

impl FallbackBackend for FileBackend {
    fn read(&self, key: &str) -> io::Result<Option<String>> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&self, key: &str, value: &str) -> io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        match std::fs::remove_file(self.path_for(key)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// Hex-encoded SHA-256 of the key. Every key maps to a fixed-length name
/// that is safe on any filesystem.
fn file_stem(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// A persisted snapshot as it is written to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackRecord {
    /// Key the snapshot belongs to.
    pub key: String,
    /// The decoded response body.
    pub payload: Value,
    /// Wall-clock write time, in Unix milliseconds.
    pub saved_at_epoch_ms: u64,
}

impl FallbackRecord {
    /// Creates a record stamped with the current wall-clock time.
    pub fn new(key: impl Into<String>, payload: Value) -> Self {
        Self::saved_at(key, payload, SystemTime::now())
    }

    /// Creates a record stamped with `at`.
    pub fn saved_at(key: impl Into<String>, payload: Value, at: SystemTime) -> Self {
        Self {
            key: key.into(),
            payload,
            saved_at_epoch_ms: epoch_millis(at),
        }
    }

    /// Wall-clock write time.
    pub fn saved_at_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.saved_at_epoch_ms)
    }

    /// Age relative to the current wall clock. Zero if the record claims to
    /// come from the future.
    pub fn age(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.saved_at_time())
            .unwrap_or_default()
    }
}

/// A snapshot returned by [`FallbackStore::load`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSnapshot {
    /// The persisted payload.
    pub payload: Value,
    /// When it was persisted.
    pub saved_at: SystemTime,
    /// How old it is now.
    pub age: Duration,
}

#[derive(Debug, Serialize, Deserialize)]
struct RateLimitedMarker {
    at_epoch_ms: u64,
}

/// Best-effort snapshot store on top of a [`FallbackBackend`].
#[derive(Clone)]
pub struct FallbackStore {
    backend: Arc<dyn FallbackBackend>,
    write_failures: Arc<AtomicU64>,
}

impl FallbackStore {
    /// Wraps `backend`.
    pub fn new(backend: Arc<dyn FallbackBackend>) -> Self {
        Self {
            backend,
            write_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A store that forgets everything when the process exits.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Persists `payload` under `key`, stamped with the current time.
    ///
    /// Returns `false` if the backend refused the write; the failure has
    /// already been logged and counted.
    pub fn save(&self, key: &str, payload: Value) -> bool {
        self.save_record(&FallbackRecord::new(key, payload))
    }

    /// Persists a prepared record.
    pub fn save_record(&self, record: &FallbackRecord) -> bool {
        let result = serde_json::to_string(record)
            .map_err(io::Error::from)
            .and_then(|json| self.backend.write(&record.key, &json));

        match result {
            Ok(()) => {
                tracing::trace!(key = %record.key, "Saved fallback snapshot");
                true
            }
            Err(e) => {
                self.write_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    key = %record.key,
                    error = %e,
                    "Failed to persist fallback snapshot"
                );
                false
            }
        }
    }

    /// Loads the snapshot for `key`, whatever its age.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the backend cannot be read. A record
    /// that does not parse, or that belongs to a different key, is treated
    /// as absent.
    pub fn load(&self, key: &str) -> Result<Option<StoredSnapshot>> {
        let Some(raw) = self
            .backend
            .read(key)
            .map_err(|e| Error::Storage(format!("failed to read '{}': {}", key, e)))?
        else {
            return Ok(None);
        };

        match serde_json::from_str::<FallbackRecord>(&raw) {
            Ok(record) if record.key == key => Ok(Some(StoredSnapshot {
                saved_at: record.saved_at_time(),
                age: record.age(),
                payload: record.payload,
            })),
            Ok(record) => {
                tracing::warn!(key, stored_key = %record.key, "Fallback key collision, ignoring snapshot");
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "Unreadable fallback snapshot, ignoring it");
                Ok(None)
            }
        }
    }

    /// Deletes the snapshot for `key`.
    pub fn remove(&self, key: &str) -> Result<()> {
        self.backend
            .remove(key)
            .map_err(|e| Error::Storage(format!("failed to remove '{}': {}", key, e)))
    }

    /// Persists the time of the latest `429`.
    pub fn mark_rate_limited(&self, at: SystemTime) {
        let marker = RateLimitedMarker {
            at_epoch_ms: epoch_millis(at),
        };
        let result = serde_json::to_string(&marker)
            .map_err(io::Error::from)
            .and_then(|json| self.backend.write(RATE_LIMITED_MARKER_KEY, &json));

        if let Err(e) = result {
            self.write_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %e, "Failed to persist rate limit marker");
        }
    }

    /// Time of the latest persisted `429`, if any.
    pub fn last_rate_limited_at(&self) -> Option<SystemTime> {
        let raw = match self.backend.read(RATE_LIMITED_MARKER_KEY) {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read rate limit marker");
                return None;
            }
        };
        let marker: RateLimitedMarker = serde_json::from_str(&raw).ok()?;
        Some(UNIX_EPOCH + Duration::from_millis(marker.at_epoch_ms))
    }

    /// Number of writes the backend refused so far.
    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for FallbackStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackStore")
            .field("write_failures", &self.write_failures())
            .finish_non_exhaustive()
    }
}
