//! Retry, backoff and rate limiting against a live HTTP mock

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::time::{Duration, Instant};
use tariff_ingest::http::HttpFetcher;
use tariff_ingest::rate_limit::RateLimiter;
use tariff_ingest::retry::RetryExecutor;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn executor(max_retries: u32) -> RetryExecutor {
    RetryExecutor::new(
        RateLimiter::new(100, Duration::ZERO),
        max_retries,
        Duration::from_millis(1),
    )
}

#[tokio::test]
async fn test_transient_errors_are_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .expect(1)
        .mount(&server)
        .await;

    let executor = executor(3);
    let fetcher = HttpFetcher::new(&common::fast_source_config());
    let body = fetcher
        .get(&executor, &format!("{}/flaky", server.uri()))
        .await
        .unwrap();

    assert_eq!(body.status, 200);
    let metrics = executor.metrics();
    assert_eq!(metrics.requests_made, 3);
    assert_eq!(metrics.requests_failed, 2);
    assert_eq!(metrics.retries_attempted, 2);
    assert_eq!(executor.attempts().len(), 3);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let executor = executor(3);
    let fetcher = HttpFetcher::new(&common::fast_source_config());
    let err = fetcher
        .get(&executor, &format!("{}/missing", server.uri()))
        .await
        .unwrap_err();

    assert!(!err.is_transient());
    assert_eq!(err.status(), Some(404));
    assert_eq!(executor.metrics().requests_made, 1);
    assert_eq!(executor.metrics().retries_attempted, 0);
}

#[tokio::test]
async fn test_too_many_requests_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .mount(&server)
        .await;

    let executor = executor(1);
    let fetcher = HttpFetcher::new(&common::fast_source_config());
    let body = fetcher.get(&executor, &format!("{}/busy", server.uri())).await.unwrap();

    assert!(body.is_json());
    assert_eq!(executor.metrics().requests_made, 2);
}

#[tokio::test]
async fn test_exhaustion_returns_last_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let executor = executor(2);
    let fetcher = HttpFetcher::new(&common::fast_source_config());
    let err = fetcher
        .get(&executor, &format!("{}/down", server.uri()))
        .await
        .unwrap_err();

    assert!(err.is_transient());
    assert_eq!(err.status(), Some(500));
    let metrics = executor.metrics();
    assert_eq!(metrics.requests_made, 3);
    assert_eq!(metrics.requests_failed, 3);
    assert_eq!(metrics.retries_attempted, 2);
}

#[tokio::test]
async fn test_request_timeout_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let config = tariff_common::types::SourceConfig {
        request_timeout_seconds: 0.05,
        ..common::fast_source_config()
    };
    let executor = executor(1);
    let fetcher = HttpFetcher::new(&config);
    let err = fetcher
        .get(&executor, &format!("{}/slow", server.uri()))
        .await
        .unwrap_err();

    assert!(err.is_transient());
    assert_eq!(executor.metrics().requests_made, 2);
}

#[tokio::test]
async fn test_rate_limiter_spaces_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/limited"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .expect(3)
        .mount(&server)
        .await;

    // Two calls per 200ms: the third request waits for the window to slide
    let executor = RetryExecutor::new(
        RateLimiter::new(2, Duration::from_millis(200)),
        0,
        Duration::from_millis(1),
    );
    let fetcher = HttpFetcher::new(&common::fast_source_config());
    let url = format!("{}/limited", server.uri());

    let started = Instant::now();
    for _ in 0..3 {
        fetcher.get(&executor, &url).await.unwrap();
    }

    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(executor.metrics().rate_limits_hit, 1);
}
