//! Polls an API through the rate-limited client and prints throttling stats.
//!
//! This example shows how to:
//! - Configure the throttle and a fallback directory
//! - Fire concurrent requests that share one network call
//! - Fall back to the last snapshot when the server throttles
//! - Watch the scheduler through `queue_stats`
//!
//! Run with: `cargo run --example dashboard -- https://api.example.com /events`

use patience::{Client, Fetched, RequestDescriptor, ThrottleConfig, DEFAULT_FALLBACK_MAX_AGE};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("patience=debug")
        .init();

    let mut args = std::env::args().skip(1);
    let base_url = args
        .next()
        .unwrap_or_else(|| "https://jsonplaceholder.typicode.com".to_string());
    let path = args.next().unwrap_or_else(|| "/posts".to_string());

    let client = Client::builder()
        .base_url(&base_url)?
        .timeout(Duration::from_secs(10))
        .throttle_config(
            ThrottleConfig::builder()
                .normal_baseline(Duration::from_millis(250))
                .quiet_period(Duration::from_secs(30))
                .build(),
        )
        .fallback_dir(std::env::temp_dir().join("patience-dashboard"))
        .build()?;

    println!("=== Startup ===");
    println!("Mode: {:?}\n", client.mode());

    println!("=== Concurrent identical requests ===");
    let (a, b, c) = tokio::join!(
        client.get::<serde_json::Value>(path.clone()),
        client.get::<serde_json::Value>(path.clone()),
        client.get::<serde_json::Value>(path.clone()),
    );
    for (name, result) in [("a", a), ("b", b), ("c", c)] {
        match result {
            Ok(response) => println!("{}: {} ({:?})", name, response.status, response.source),
            Err(e) => println!("{}: {}", name, e),
        }
    }
    print_stats(&client);

    println!("=== Paged requests with fallback ===");
    for page in 1..=5 {
        let descriptor = RequestDescriptor::get(path.clone()).param("_page", page);
        match client
            .request_with_fallback::<serde_json::Value>(descriptor, DEFAULT_FALLBACK_MAX_AGE)
            .await
        {
            Ok(Fetched::Live(response)) => {
                println!("page {}: live in {:?}", page, response.latency)
            }
            Ok(Fetched::Cached(fallback)) => {
                println!("page {}: cached snapshot, {:?} old", page, fallback.age)
            }
            Err(e) => println!("page {}: {}", page, e),
        }
    }
    print_stats(&client);

    println!("=== Cache cleared ===");
    client.clear_cache();
    print_stats(&client);

    Ok(())
}

fn print_stats(client: &Client) {
    let stats = client.queue_stats();
    match serde_json::to_string_pretty(&stats) {
        Ok(json) => println!("{}\n", json),
        Err(e) => println!("Failed to render stats: {}\n", e),
    }
}
