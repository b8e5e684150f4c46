//! # Patience - an HTTP client that backs off before it is told to
//!
//! Patience is a `reqwest`-based client for APIs that enforce undocumented
//! rate limits. Every request goes through the same pipeline:
//!
//! 1. a TTL response cache, so repeated reads never reach the network,
//! 2. a FIFO queue that folds identical concurrent requests into one call,
//! 3. an adaptive delay between dispatches that escalates on `429 Too Many
//!    Requests` and decays back once the server is quiet,
//! 4. a persistent last-known-good snapshot store for degraded mode.
//!
//! ## Quick Start
//!
//! ```no_run
//! use patience::{Client, RequestDescriptor};
//! use serde::Deserialize;
//! use std::time::Duration;
//!
//! #[derive(Deserialize)]
//! struct Event {
//!     id: u64,
//!     title: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), patience::Error> {
//!     let client = Client::builder()
//!         .base_url("https://api.example.com")?
//!         .timeout(Duration::from_secs(30))
//!         .fallback_dir("./.patience")
//!         .build()?;
//!
//!     let events = client
//!         .request::<Vec<Event>>(RequestDescriptor::get("/events").param("page", 1))
//!         .await?;
//!     println!("{} events in {:?}", events.data.len(), events.latency);
//!
//!     let stats = client.queue_stats();
//!     println!(
//!         "delay {} ms, {} queued, {} hits",
//!         stats.current_delay_ms, stats.queue_depth, stats.rate_limit_hit_count
//!     );
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! A `429` is never retried. The client records it, raises its delay and
//! hands the error back:
//!
//! ```no_run
//! use patience::{Client, Error};
//!
//! # async fn example() -> Result<(), Error> {
//! # let client = Client::builder().base_url("https://api.example.com")?.build()?;
//! match client.get::<serde_json::Value>("/endpoint").await {
//!     Ok(response) => {
//!         println!("Success: {:?}", response.data);
//!     }
//!     Err(Error::RateLimited { rate_limit_info, .. }) => {
//!         eprintln!("Throttled, server hint: {:?}", rate_limit_info);
//!     }
//!     Err(Error::HttpError { status, raw_response, .. }) => {
//!         eprintln!("HTTP error {}: {}", status, raw_response);
//!     }
//!     Err(e) => {
//!         eprintln!("Other error: {}", e);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Degraded Mode
//!
//! Successful GET responses are snapshotted. When the server throttles a
//! request, [`Client::request_with_fallback`] serves the snapshot instead,
//! as long as it is recent enough:
//!
//! ```no_run
//! use patience::{Client, Fetched, RequestDescriptor, DEFAULT_FALLBACK_MAX_AGE};
//!
//! # async fn example(client: Client) -> Result<(), patience::Error> {
//! match client
//!     .request_with_fallback::<Vec<String>>(RequestDescriptor::get("/wilayas"), DEFAULT_FALLBACK_MAX_AGE)
//!     .await?
//! {
//!     Fetched::Live(response) => println!("{} live", response.data.len()),
//!     Fetched::Cached(fallback) => println!("{} cached, {:?} old", fallback.data.len(), fallback.age),
//! }
//! # Ok(())
//! # }
//! ```

mod cache;
mod client;
pub mod descriptor;
mod error;
pub mod fallback;
mod queue;
pub mod rate_limit;
mod response;
mod stats;
pub mod throttle;

pub use cache::{CacheEntry, ResponseCache, DEFAULT_CACHE_TTL};
pub use client::{Client, ClientBuilder};
pub use descriptor::{Fingerprint, RequestDescriptor};
pub use error::{Error, ErrorKind, Result};
pub use fallback::{
    FallbackBackend, FallbackRecord, FallbackStore, FileBackend, MemoryBackend, StoredSnapshot,
    DEFAULT_FALLBACK_MAX_AGE,
};
pub use queue::Ticket;
pub use response::{Fallback, Fetched, Response, Source};
pub use stats::{RateStats, StatsStore};
pub use throttle::{DelayController, Mode, ThrottleConfig, ThrottleConfigBuilder};
