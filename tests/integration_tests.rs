//! Integration tests using wiremock to simulate HTTP servers.

use patience::{
    Client, Error, FallbackBackend, FallbackRecord, FallbackStore, Fetched, FileBackend, Mode,
    RequestDescriptor, Source, ThrottleConfig, DEFAULT_FALLBACK_MAX_AGE,
};
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
struct TestData {
    id: u32,
    name: String,
}

fn test_data() -> TestData {
    TestData {
        id: 1,
        name: "Test".to_string(),
    }
}

/// No idle delay, quick escalation.
fn fast_config() -> ThrottleConfig {
    ThrottleConfig::builder()
        .normal_baseline(Duration::ZERO)
        .normal_ceiling(Duration::from_millis(500))
        .min_backoff(Duration::from_millis(100))
        .build()
}

fn client_for(server: &MockServer, config: ThrottleConfig) -> Client {
    Client::builder()
        .base_url(server.uri())
        .unwrap()
        .throttle_config(config)
        .build()
        .unwrap()
}

/// Records the arrival time of every request and answers with `body`.
fn recording(
    arrivals: Arc<Mutex<Vec<Instant>>>,
    body: TestData,
) -> impl Fn(&wiremock::Request) -> ResponseTemplate + Send + Sync + 'static {
    move |_req: &wiremock::Request| {
        arrivals.lock().unwrap().push(Instant::now());
        ResponseTemplate::new(200).set_body_json(&body)
    }
}

fn assert_spaced(arrivals: &[Instant], min_gap: Duration) {
    for pair in arrivals.windows(2) {
        let gap = pair[1].duration_since(pair[0]);
        assert!(
            gap >= min_gap,
            "dispatch gap {:?} is shorter than {:?}",
            gap,
            min_gap
        );
    }
}

#[tokio::test]
async fn test_successful_get_request() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(test_data()))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, fast_config());

    let response = client.get::<TestData>("/test").await.unwrap();

    assert_eq!(response.data, test_data());
    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(response.source, Source::Network);
    assert!(!response.from_cache());
}

#[tokio::test]
async fn test_post_sends_params_as_json() {
    let mock_server = MockServer::start().await;

    let request_data = TestData {
        id: 0,
        name: "New".to_string(),
    };

    Mock::given(method("POST"))
        .and(path("/test"))
        .and(body_json(&request_data))
        .respond_with(ResponseTemplate::new(201).set_body_json(test_data()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, fast_config());

    let response = client
        .post::<TestData, TestData>("/test", &request_data)
        .await
        .unwrap();

    assert_eq!(response.data, test_data());
    assert_eq!(response.status.as_u16(), 201);
}

#[tokio::test]
async fn test_query_parameters_and_headers() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/events"))
        .and(query_param("page", "2"))
        .and(query_param("wilaya", "16"))
        .and(header("x-api-key", "secret"))
        .and(header("accept-language", "fr"))
        .respond_with(ResponseTemplate::new(200).set_body_json(test_data()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .default_header("x-api-key", "secret")
        .unwrap()
        .throttle_config(fast_config())
        .build()
        .unwrap();

    let descriptor = RequestDescriptor::get("/events")
        .param("page", 2)
        .param("wilaya", "16")
        .header("accept-language", "fr")
        .unwrap();

    let response = client.request::<TestData>(descriptor).await.unwrap();
    assert_eq!(response.data, test_data());
}

#[tokio::test]
async fn test_cache_hit_skips_network() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(test_data()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, fast_config());

    let first = client.get::<TestData>("/events").await.unwrap();
    let second = client.get::<TestData>("/events").await.unwrap();

    assert_eq!(first.source, Source::Network);
    assert_eq!(second.source, Source::Cache);
    assert_eq!(second.data, first.data);

    let stats = client.queue_stats();
    assert_eq!(stats.cache_size, 1);
    assert_eq!(stats.requests_in_window, 1);
}

#[tokio::test]
async fn test_clear_cache_forces_refetch() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(test_data()))
        .expect(2)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, fast_config());

    client.get::<TestData>("/events").await.unwrap();
    client.clear_cache();
    assert_eq!(client.queue_stats().cache_size, 0);

    let refetched = client.get::<TestData>("/events").await.unwrap();
    assert_eq!(refetched.source, Source::Network);
}

#[tokio::test]
async fn test_non_cacheable_request_always_hits_network() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/live"))
        .respond_with(ResponseTemplate::new(200).set_body_json(test_data()))
        .expect(2)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, fast_config());
    let descriptor = RequestDescriptor::get("/live").cacheable(false);

    client.request::<TestData>(descriptor.clone()).await.unwrap();
    client.request::<TestData>(descriptor).await.unwrap();

    assert_eq!(client.queue_stats().cache_size, 0);
}

#[tokio::test]
async fn test_concurrent_identical_requests_share_one_call() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(test_data())
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, fast_config());

    let (a, b) = tokio::join!(
        client.get::<TestData>("/events"),
        client.get::<TestData>("/events")
    );

    assert_eq!(a.unwrap().data, test_data());
    assert_eq!(b.unwrap().data, test_data());
    assert_eq!(client.queue_stats().requests_in_window, 1);
}

#[tokio::test]
async fn test_dedupe_disabled_sends_every_request() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(test_data()))
        .expect(2)
        .mount(&mock_server)
        .await;

    let client = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .throttle_config(fast_config())
        .dedupe(false)
        .build()
        .unwrap();

    let (a, b) = tokio::join!(
        client.get::<TestData>("/events"),
        client.get::<TestData>("/events")
    );

    assert!(a.is_ok());
    assert!(b.is_ok());
}

#[tokio::test]
async fn test_dispatches_are_spaced_by_baseline() {
    let mock_server = MockServer::start().await;
    let arrivals = Arc::new(Mutex::new(Vec::new()));

    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(recording(Arc::clone(&arrivals), test_data()))
        .expect(3)
        .mount(&mock_server)
        .await;

    let config = ThrottleConfig::builder()
        .normal_baseline(Duration::from_millis(100))
        .build();
    let client = client_for(&mock_server, config);

    let page = |n: u32| RequestDescriptor::get("/items").param("page", n);
    let (a, b, c) = tokio::join!(
        client.request::<TestData>(page(1)),
        client.request::<TestData>(page(2)),
        client.request::<TestData>(page(3))
    );
    assert!(a.is_ok() && b.is_ok() && c.is_ok());

    let arrivals = arrivals.lock().unwrap().clone();
    assert_eq!(arrivals.len(), 3);
    assert_spaced(&arrivals, Duration::from_millis(100));
}

#[tokio::test]
async fn test_conservative_mode_uses_longer_spacing() {
    let mock_server = MockServer::start().await;
    let arrivals = Arc::new(Mutex::new(Vec::new()));

    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(recording(Arc::clone(&arrivals), test_data()))
        .mount(&mock_server)
        .await;

    let config = ThrottleConfig::builder()
        .normal_baseline(Duration::from_millis(10))
        .conservative_baseline(Duration::from_millis(300))
        .conservative_ceiling(Duration::from_secs(1))
        .build();
    let client = client_for(&mock_server, config);

    client.use_conservative_mode();
    assert_eq!(client.mode(), Mode::Conservative);
    assert_eq!(client.queue_stats().current_delay_ms, 300);

    let page = |n: u32| RequestDescriptor::get("/items").param("page", n);
    let (a, b) = tokio::join!(
        client.request::<TestData>(page(1)),
        client.request::<TestData>(page(2))
    );
    assert!(a.is_ok() && b.is_ok());

    let arrivals = arrivals.lock().unwrap().clone();
    assert_spaced(&arrivals, Duration::from_millis(300));

    client.use_normal_mode();
    assert_eq!(client.queue_stats().current_delay_ms, 10);
}

#[tokio::test]
async fn test_rate_limit_escalates_delay() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = ThrottleConfig::builder()
        .normal_baseline(Duration::from_millis(100))
        .build();
    let client = client_for(&mock_server, config);

    let before = client.queue_stats();
    assert_eq!(before.rate_limit_hit_count, 0);
    assert_eq!(before.current_delay_ms, 100);
    assert_eq!(before.last_rate_limited_at_ms, None);

    let err = client.get::<TestData>("/events").await.unwrap_err();
    assert!(err.is_rate_limited());
    assert_eq!(err.status().map(|s| s.as_u16()), Some(429));
    assert_eq!(err.raw_response(), Some("slow down"));

    let after = client.queue_stats();
    assert_eq!(after.rate_limit_hit_count, 1);
    assert!(
        after.current_delay_ms >= 2 * before.current_delay_ms,
        "delay {} ms did not escalate",
        after.current_delay_ms
    );
    assert!(after.last_rate_limited_at_ms.is_some());
    assert_eq!(after.cache_size, 0);
}

#[tokio::test]
async fn test_retry_after_raises_delay() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .mount(&mock_server)
        .await;

    let client = client_for(
        &mock_server,
        ThrottleConfig::builder()
            .normal_ceiling(Duration::from_secs(2))
            .build(),
    );

    let err = client.get::<TestData>("/events").await.unwrap_err();
    let info = err.rate_limit_info().unwrap();
    assert_eq!(info.retry_after, Some(Duration::from_secs(1)));

    let delay = client.queue_stats().current_delay_ms;
    assert!(delay >= 900 && delay <= 1000, "delay was {} ms", delay);
}

#[tokio::test]
async fn test_repeated_rate_limits_switch_to_conservative() {
    let mock_server = MockServer::start().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = Arc::clone(&calls);

    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(move |_req: &wiremock::Request| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            ResponseTemplate::new(429)
        })
        .mount(&mock_server)
        .await;

    let config = ThrottleConfig::builder()
        .normal_baseline(Duration::ZERO)
        .normal_ceiling(Duration::from_millis(200))
        .min_backoff(Duration::from_millis(50))
        .conservative_after_hits(Some(2))
        .build();
    let client = client_for(&mock_server, config);

    assert!(client.get::<TestData>("/events").await.unwrap_err().is_rate_limited());
    assert_eq!(client.mode(), Mode::Normal);

    assert!(client.get::<TestData>("/events").await.unwrap_err().is_rate_limited());
    assert_eq!(client.mode(), Mode::Conservative);

    let stats = client.queue_stats();
    assert_eq!(stats.rate_limit_hit_count, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(stats.current_delay_ms >= 1000);
}

#[tokio::test]
async fn test_http_errors_pass_through_without_escalation() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Not found"))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&mock_server)
        .await;

    let config = ThrottleConfig::builder()
        .normal_baseline(Duration::from_millis(20))
        .build();
    let client = client_for(&mock_server, config);

    match client.get::<TestData>("/missing").await {
        Err(Error::HttpError {
            status,
            raw_response,
            ..
        }) => {
            assert_eq!(status.as_u16(), 404);
            assert_eq!(raw_response, "Not found");
        }
        other => panic!("Expected HttpError, got {:?}", other),
    }

    let err = client.get::<TestData>("/broken").await.unwrap_err();
    assert_eq!(err.status().map(|s| s.as_u16()), Some(500));

    let stats = client.queue_stats();
    assert_eq!(stats.rate_limit_hit_count, 0);
    assert_eq!(stats.current_delay_ms, 20);
    assert_eq!(stats.mode, Mode::Normal);
    assert_eq!(stats.cache_size, 0);
}

#[tokio::test]
async fn test_deserialization_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/test"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, fast_config());

    match client.get::<TestData>("/test").await {
        Err(Error::DeserializationFailed {
            raw_response,
            status,
            ..
        }) => {
            assert_eq!(raw_response, "not json");
            assert_eq!(status.as_u16(), 200);
        }
        other => panic!("Expected DeserializationFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_fallback_served_when_rate_limited() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/wilayas"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&mock_server)
        .await;

    let descriptor = RequestDescriptor::get("/wilayas");
    let seed = FallbackStore::new(Arc::new(FileBackend::new(dir.path())));
    assert!(seed.save_record(&FallbackRecord::saved_at(
        descriptor.fingerprint().to_string(),
        serde_json::to_value(test_data()).unwrap(),
        SystemTime::now() - Duration::from_secs(10 * 60),
    )));

    let client = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .throttle_config(fast_config())
        .fallback_dir(dir.path())
        .build()
        .unwrap();

    let fetched = client
        .request_with_fallback::<TestData>(descriptor.clone(), DEFAULT_FALLBACK_MAX_AGE)
        .await
        .unwrap();

    assert!(fetched.is_cached());
    match &fetched {
        Fetched::Cached(fallback) => {
            assert!(fallback.age >= Duration::from_secs(10 * 60));
            assert_eq!(fallback.data, test_data());
        }
        Fetched::Live(_) => panic!("Expected cached data"),
    }

    let err = client
        .request_with_fallback::<TestData>(descriptor, Duration::from_secs(5 * 60))
        .await
        .unwrap_err();
    assert!(err.is_rate_limited());
}

#[tokio::test]
async fn test_successful_response_is_persisted() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/wilayas"))
        .respond_with(ResponseTemplate::new(200).set_body_json(test_data()))
        .mount(&mock_server)
        .await;

    let client = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .throttle_config(fast_config())
        .fallback_dir(dir.path())
        .build()
        .unwrap();

    let descriptor = RequestDescriptor::get("/wilayas");
    let fetched = client
        .request_with_fallback::<TestData>(descriptor.clone(), DEFAULT_FALLBACK_MAX_AGE)
        .await
        .unwrap();
    assert!(!fetched.is_cached());

    let mut snapshot = None;
    for _ in 0..50 {
        snapshot = client.load_fallback::<TestData>(&descriptor).await.unwrap();
        if snapshot.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let snapshot = snapshot.expect("snapshot was never written");
    assert_eq!(snapshot.data, test_data());
    assert!(snapshot.age < Duration::from_secs(60));
}

/// Backend that accepts reads and refuses every write.
struct ReadOnlyBackend;

impl FallbackBackend for ReadOnlyBackend {
    fn read(&self, _key: &str) -> io::Result<Option<String>> {
        Ok(None)
    }

    fn write(&self, _key: &str, _value: &str) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Other, "read-only filesystem"))
    }

    fn remove(&self, _key: &str) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_failed_snapshot_write_does_not_fail_request() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/wilayas"))
        .respond_with(ResponseTemplate::new(200).set_body_json(test_data()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .throttle_config(fast_config())
        .fallback_backend(Arc::new(ReadOnlyBackend))
        .build()
        .unwrap();

    let response = client.get::<TestData>("/wilayas").await.unwrap();
    assert_eq!(response.data, test_data());

    for _ in 0..50 {
        if client.queue_stats().fallback_write_failures > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(client.queue_stats().fallback_write_failures, 1);

    let cached = client.get::<TestData>("/wilayas").await.unwrap();
    assert_eq!(cached.source, Source::Cache);
}

#[tokio::test]
async fn test_recent_rate_limit_restores_conservative_mode() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&mock_server)
        .await;

    let first = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .throttle_config(fast_config())
        .fallback_dir(dir.path())
        .build()
        .unwrap();
    assert_eq!(first.mode(), Mode::Normal);
    assert!(first.get::<TestData>("/events").await.is_err());

    let marker = FallbackStore::new(Arc::new(FileBackend::new(dir.path())));
    for _ in 0..50 {
        if marker.last_rate_limited_at().is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(marker.last_rate_limited_at().is_some());

    let second = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .throttle_config(fast_config())
        .fallback_dir(dir.path())
        .build()
        .unwrap();

    assert_eq!(second.mode(), Mode::Conservative);
    assert!(second.queue_stats().last_rate_limited_at_ms.is_some());
    assert_eq!(second.queue_stats().rate_limit_hit_count, 0);
}

#[tokio::test]
async fn test_cancel_before_dispatch() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/first"))
        .respond_with(ResponseTemplate::new(200).set_body_json(test_data()))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/second"))
        .respond_with(ResponseTemplate::new(200).set_body_json(test_data()))
        .expect(0)
        .mount(&mock_server)
        .await;

    let config = ThrottleConfig::builder()
        .normal_baseline(Duration::from_millis(300))
        .build();
    let client = client_for(&mock_server, config);

    let first = client.submit(RequestDescriptor::get("/first"));
    let second = client.submit(RequestDescriptor::get("/second"));
    assert_ne!(first.id(), second.id());

    assert!(second.cancel());
    assert_eq!(client.queue_stats().queue_depth + client.queue_stats().in_flight, 1);

    let response = first.wait::<TestData>().await.unwrap();
    assert_eq!(response.data, test_data());

    tokio::time::sleep(Duration::from_millis(400)).await;
    let stats = client.queue_stats();
    assert_eq!(stats.queue_depth, 0);
    assert_eq!(stats.requests_in_window, 1);
}

#[tokio::test]
async fn test_caller_timeout_does_not_strand_slot() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(test_data())
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/fast"))
        .respond_with(ResponseTemplate::new(200).set_body_json(test_data()))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, fast_config());

    let timed_out =
        tokio::time::timeout(Duration::from_millis(50), client.get::<TestData>("/slow")).await;
    assert!(timed_out.is_err());

    let response = tokio::time::timeout(Duration::from_secs(5), client.get::<TestData>("/fast"))
        .await
        .expect("slot was never released")
        .unwrap();
    assert_eq!(response.data, test_data());

    let stats = client.queue_stats();
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.queue_depth, 0);
}

#[tokio::test]
async fn test_transport_timeout_is_reported() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&mock_server)
        .await;

    let client = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .timeout(Duration::from_millis(50))
        .throttle_config(fast_config())
        .build()
        .unwrap();

    let err = client.get::<TestData>("/slow").await.unwrap_err();
    assert!(matches!(err, Error::Timeout));
    assert_eq!(client.queue_stats().rate_limit_hit_count, 0);
}

#[tokio::test]
async fn test_stats_snapshot() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(test_data()))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, fast_config());

    client.get::<TestData>("/a").await.unwrap();
    client.get::<TestData>("/b").await.unwrap();
    client.get::<TestData>("/a").await.unwrap();

    let stats = client.queue_stats();
    assert_eq!(stats.requests_in_window, 2);
    assert_eq!(stats.queue_depth, 0);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.cache_size, 2);
    assert_eq!(stats.mode, Mode::Normal);
    assert_eq!(stats.rate_limit_hit_count, 0);
    assert_eq!(stats.fallback_write_failures, 0);

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["mode"], "normal");
    assert_eq!(json["current_delay_ms"], 0);
}
