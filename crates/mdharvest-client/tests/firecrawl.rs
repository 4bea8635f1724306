//! HTTP-level tests for the Firecrawl client.
//!
//! These tests use wiremock to stand in for the content service.

use std::time::Duration;

use mdharvest_client::FirecrawlService;
use mdharvest_core::circuit_breaker::CircuitBreakerConfig;
use mdharvest_core::client::ResilientClient;
use mdharvest_core::error::AppError;
use mdharvest_core::job::JobStatus;
use mdharvest_core::models::{CrawlRequest, Format};
use mdharvest_core::retry::RetryPolicy;
use mdharvest_core::traits::ContentService;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const START: &str = "https://dict.example/VBA/start.html";

async fn service(server: &MockServer) -> FirecrawlService {
    FirecrawlService::with_base_url(Some("test-key"), &server.uri()).expect("client builds")
}

#[tokio::test]
async fn test_submit_crawl_sends_v2_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/crawl"))
        .and(header("Authorization", "Bearer test-key"))
        .and(body_json(json!({
            "url": START,
            "limit": 25,
            "scrapeOptions": { "formats": ["markdown"] }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "id": "job-42",
            "url": format!("{}/v2/crawl/job-42", server.uri())
        })))
        .expect(1)
        .mount(&server)
        .await;

    let receipt = service(&server)
        .await
        .submit_crawl(&CrawlRequest {
            url: START.to_string(),
            limit: 25,
            formats: vec![Format::Markdown],
        })
        .await
        .unwrap();

    assert_eq!(receipt.job_id, "job-42");
    assert!(receipt.status_url.unwrap().ends_with("/v2/crawl/job-42"));
}

#[tokio::test]
async fn test_status_follows_pagination() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/crawl/job-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "scraping",
            "total": 3,
            "completed": 2,
            "data": [
                { "markdown": "# Start", "metadata": { "title": "Start Now", "sourceURL": START } }
            ],
            "next": format!("{}/v2/crawl/job-1/next", server.uri())
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/crawl/job-1/next"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "scraping",
            "total": 3,
            "completed": 2,
            "data": [
                { "markdown": "Other", "metadata": { "sourceURL": "https://dict.example/VBA/other.html" } }
            ]
        })))
        .mount(&server)
        .await;

    let snapshot = service(&server).await.crawl_status("job-1").await.unwrap();

    assert_eq!(snapshot.status, JobStatus::InProgress);
    assert_eq!(snapshot.total, 3);
    assert_eq!(snapshot.pages.len(), 2);
    assert_eq!(snapshot.pages[0].title.as_deref(), Some("Start Now"));
    assert_eq!(snapshot.pages[1].source_url, "https://dict.example/VBA/other.html");
}

#[tokio::test]
async fn test_unknown_status_is_a_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/crawl/job-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "exploded" })))
        .mount(&server)
        .await;

    let err = service(&server).await.crawl_status("job-1").await.unwrap_err();
    assert!(matches!(err, AppError::SerializationError(_)));
}

#[tokio::test]
async fn test_status_code_mapping() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/scrape"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/scrape"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/scrape"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({ "success": false, "error": "Unauthorized" })),
        )
        .mount(&server)
        .await;

    let service = service(&server).await;
    let formats = [Format::Markdown];

    let first = service.scrape(START, &formats).await.unwrap_err();
    assert!(matches!(first, AppError::RateLimitExceeded));

    let second = service.scrape(START, &formats).await.unwrap_err();
    assert!(second.is_retryable());
    assert!(second.to_string().contains("overloaded"));

    let third = service.scrape(START, &formats).await.unwrap_err();
    assert!(!third.is_retryable());
    assert!(matches!(
        third,
        AppError::ServiceError { status_code: 401, ref message } if message == "Unauthorized"
    ));
}

#[tokio::test]
async fn test_map_sends_url_and_limit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/map"))
        .and(header("Authorization", "Bearer test-key"))
        .and(body_json(json!({ "url": START, "limit": 50 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "links": [
                { "url": START, "title": "Start Now" },
                { "url": "https://dict.example/VBA/other.html" }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let links = service(&server).await.map(START, 50).await.unwrap();

    assert_eq!(links, vec![START, "https://dict.example/VBA/other.html"]);
}

#[tokio::test]
async fn test_map_failures() {
    let rejecting = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/map"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": false, "error": "map disabled" })))
        .mount(&rejecting)
        .await;
    let missing = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/map"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&missing)
        .await;

    let err = service(&rejecting).await.map(START, 10).await.unwrap_err();
    assert!(matches!(err, AppError::ServiceRejected(ref m) if m == "map disabled"));

    let err = service(&missing).await.map(START, 10).await.unwrap_err();
    assert!(matches!(err, AppError::ServiceError { status_code: 404, .. }));
}

#[tokio::test]
async fn test_scrape_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/scrape"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "success": false, "error": "URL is blocked" })),
        )
        .mount(&server)
        .await;

    let err = service(&server)
        .await
        .scrape(START, &[Format::Markdown])
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ServiceRejected(ref m) if m == "URL is blocked"));
}

#[tokio::test]
async fn test_resilient_client_retries_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/scrape"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/scrape"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": { "markdown": "# Start", "metadata": { "title": "Start Now", "sourceURL": START } }
        })))
        .mount(&server)
        .await;

    let retry = RetryPolicy {
        max_retries: 3,
        base_delay: Duration::from_millis(1),
        ..Default::default()
    };
    let client = ResilientClient::new(service(&server).await, retry, CircuitBreakerConfig::default());

    let page = client.fetch(START, &[Format::Markdown]).await.unwrap();

    assert!(page.is_success());
    assert_eq!(page.title.as_deref(), Some("Start Now"));
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_open_breaker_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/crawl/job-1"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let retry = RetryPolicy {
        max_retries: 0,
        base_delay: Duration::from_millis(1),
        ..Default::default()
    };
    let breaker = CircuitBreakerConfig {
        failure_threshold: 2,
        cool_down: Duration::from_secs(60),
    };
    let client = ResilientClient::new(service(&server).await, retry, breaker);

    for _ in 0..2 {
        assert!(client.poll("job-1").await.is_err());
    }
    let err = client.poll("job-1").await.unwrap_err();

    assert!(matches!(err, AppError::ServiceUnavailable { .. }));
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}
