//! Tests de integración del servicio
//! tests/integration_test.rs
//!
//! Ejercitan el router completo en proceso (`tower::ServiceExt::oneshot`)
//! con un adaptador de extracción falso, sin navegador ni red.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use maps_review_scraper::config::Config;
use maps_review_scraper::extraction::fake::{sample_reviews, FakeAdapter};
use maps_review_scraper::extraction::{ExtractionError, ReviewRecord};
use maps_review_scraper::server::Server;

const PLACE_URL: &str = "https://www.google.com/maps/place/Test+Cafe";

struct TestApp {
    server: Server,
    router: Router,
    adapter: Arc<FakeAdapter>,
    _dir: tempfile::TempDir,
}

impl TestApp {
    fn new(adapter: FakeAdapter) -> Self {
        Self::with_config(adapter, |_| {})
    }

    fn with_config(adapter: FakeAdapter, customize: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config {
            output_dir: dir.path().join("output").to_string_lossy().into_owned(),
            ..Config::default()
        };
        customize(&mut config);

        let adapter = Arc::new(adapter);
        let server = Server::with_adapter(config, adapter.clone());
        let router = server.router();

        Self {
            server,
            router,
            adapter,
            _dir: dir,
        }
    }

    fn start(&self) {
        self.server.scheduler().start();
    }

    async fn request(
        &self,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, HeaderMap, Vec<u8>) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, bytes.to_vec())
    }

    async fn json(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let (status, _, bytes) = self.request(method, uri, body).await;
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn submit(&self, location: &str) -> String {
        let (status, body) = self
            .json("POST", "/scrape", Some(json!({ "location_reference": location })))
            .await;
        assert_eq!(status, StatusCode::ACCEPTED, "unexpected body: {}", body);
        body["job_id"].as_str().unwrap().to_string()
    }

    /// Hace polling de `/job/{id}` hasta un estado terminal
    async fn wait_terminal(&self, job_id: &str) -> Value {
        for _ in 0..250 {
            let (status, body) = self.json("GET", &format!("/job/{}", job_id), None).await;
            assert_eq!(status, StatusCode::OK);
            if body["state"] == "SUCCEEDED" || body["state"] == "FAILED" {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job {} did not reach a terminal state", job_id);
    }
}

// ==================== Health ====================

#[tokio::test]
async fn test_health_reports_adapter_status() {
    let app = TestApp::new(FakeAdapter::returning(sample_reviews(1)));

    let (status, headers, bytes) = app.request("GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers.contains_key("x-request-id"));

    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["adapter_reachable"], true);
    assert!(body["timestamp"].is_string());

    app.adapter.set_reachable(false);
    let (status, body) = app.json("GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["adapter_reachable"], false);
}

#[tokio::test]
async fn test_cors_allows_any_origin() {
    let app = TestApp::new(FakeAdapter::returning(sample_reviews(1)));

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header(header::ORIGIN, "http://dashboard.example")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");

    let preflight = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/scrape")
                .header(header::ORIGIN, "http://dashboard.example")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(preflight.status().is_success());
    assert_eq!(preflight.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    assert!(preflight.headers()[header::ACCESS_CONTROL_ALLOW_METHODS]
        .to_str()
        .unwrap()
        .contains("POST"));
}

// ==================== Lifecycle ====================

#[tokio::test]
async fn test_async_job_succeeds_and_downloads_reviews() {
    let app = TestApp::new(FakeAdapter::returning(sample_reviews(3)));
    let job_id = app.submit(PLACE_URL).await;

    // Sin workers el job queda PENDING
    let (status, body) = app.json("GET", &format!("/job/{}", job_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "PENDING");
    assert_eq!(body["location_reference"], PLACE_URL);

    let (status, _) = app.json("GET", &format!("/download/{}", job_id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    app.start();
    let job = app.wait_terminal(&job_id).await;
    assert_eq!(job["state"], "SUCCEEDED");
    assert_eq!(job["result_ref"]["record_count"], 3);
    assert!(job.get("error").is_none());

    let (status, headers, bytes) = app.request("GET", &format!("/download/{}", job_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/json");
    assert!(headers[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .contains(&format!("{}.json", job_id)));
    assert_eq!(
        headers[header::ETAG].to_str().unwrap(),
        format!("\"{}\"", job["result_ref"]["sha256"].as_str().unwrap())
    );

    let records: Vec<ReviewRecord> = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(records, sample_reviews(3));
}

#[tokio::test]
async fn test_driver_unavailable_fails_job() {
    let app = TestApp::new(FakeAdapter::failing(ExtractionError::DriverUnavailable(
        "chromedriver not running".to_string(),
    )));
    app.start();

    let job_id = app.submit(PLACE_URL).await;
    let job = app.wait_terminal(&job_id).await;

    assert_eq!(job["state"], "FAILED");
    assert_eq!(job["error"]["kind"], "DriverUnavailable");
    assert!(job.get("result_ref").is_none());

    let (status, _) = app.json("GET", &format!("/download/{}", job_id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_no_reviews_is_extraction_failure() {
    let app = TestApp::new(FakeAdapter::failing(ExtractionError::NotFound(
        "no reviews were extracted from this location".to_string(),
    )));
    app.start();

    let job_id = app.submit(PLACE_URL).await;
    let job = app.wait_terminal(&job_id).await;

    assert_eq!(job["state"], "FAILED");
    assert_eq!(job["error"]["kind"], "ExtractionFailed");
}

#[tokio::test]
async fn test_timeout_fails_job() {
    let app = TestApp::with_config(
        FakeAdapter::returning(sample_reviews(1)).with_delay(Duration::from_secs(30)),
        |config| config.timeout_ms = 50,
    );
    app.start();

    let job_id = app.submit(PLACE_URL).await;
    let job = app.wait_terminal(&job_id).await;

    assert_eq!(job["state"], "FAILED");
    assert_eq!(job["error"]["kind"], "Timeout");
    assert_eq!(job["error"]["retryable"], true);
    assert_eq!(app.adapter.in_flight(), 0);
}

#[tokio::test]
async fn test_sync_mode_returns_terminal_job() {
    let app = TestApp::new(FakeAdapter::returning(sample_reviews(2)));
    app.start();

    let (status, body) = app
        .json(
            "POST",
            "/scrape",
            Some(json!({ "maps_url": PLACE_URL, "async_mode": false })),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "SUCCEEDED");
    assert_eq!(body["result_ref"]["record_count"], 2);
}

// ==================== Errors ====================

#[tokio::test]
async fn test_unknown_job_is_404() {
    let app = TestApp::new(FakeAdapter::returning(sample_reviews(1)));

    let (status, body) = app.json("GET", "/job/does-not-exist", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");

    let (status, _) = app.json("GET", "/download/does-not-exist", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.json("POST", "/job/does-not-exist/cancel", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_location_is_400_and_creates_nothing() {
    let app = TestApp::new(FakeAdapter::returning(sample_reviews(1)));

    for location in ["", "not a url", "ftp://maps.example.com/place"] {
        let (status, body) = app
            .json("POST", "/scrape", Some(json!({ "location_reference": location })))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "location {:?}", location);
        assert_eq!(body["code"], "bad_request");
    }

    assert!(app.server.scheduler().store().is_empty());
}

#[tokio::test]
async fn test_malformed_body_is_400_with_error_body() {
    let app = TestApp::new(FakeAdapter::returning(sample_reviews(1)));

    let (status, body) = app
        .json("POST", "/scrape", Some(json!({ "async_mode": true })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");
    assert!(body["message"].as_str().unwrap().contains("location_reference"));

    let (status, body) = app
        .json(
            "POST",
            "/scrape",
            Some(json!({ "location_reference": PLACE_URL, "async_mode": "yes" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");

    assert!(app.server.scheduler().store().is_empty());
}

#[tokio::test]
async fn test_queue_full_is_503_with_retry_after() {
    let app = TestApp::with_config(FakeAdapter::returning(sample_reviews(1)), |config| {
        config.queue_capacity = 1;
        config.retry_after_secs = 7;
    });

    app.submit(PLACE_URL).await;

    let (status, headers, _) = app
        .request("POST", "/scrape", Some(json!({ "location_reference": PLACE_URL })))
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(headers[header::RETRY_AFTER], "7");
    assert_eq!(app.server.scheduler().store().len(), 1);
}

// ==================== Cancellation ====================

#[tokio::test]
async fn test_cancel_pending_job_never_calls_adapter() {
    let app = TestApp::new(FakeAdapter::returning(sample_reviews(1)));
    let job_id = app.submit(PLACE_URL).await;

    let (status, body) = app
        .json("POST", &format!("/job/{}/cancel", job_id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "FAILED");
    assert_eq!(body["error"]["kind"], "Cancelled");

    app.start();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(app.adapter.calls(), 0);

    let (_, body) = app.json("GET", &format!("/job/{}", job_id), None).await;
    assert_eq!(body["state"], "FAILED");

    let (status, _) = app
        .json("POST", &format!("/job/{}/cancel", job_id), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

// ==================== Concurrency ====================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_get_distinct_ids() {
    let app = Arc::new(TestApp::new(FakeAdapter::returning(sample_reviews(1))));

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let app = Arc::clone(&app);
            tokio::spawn(async move { app.submit(PLACE_URL).await })
        })
        .collect();

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap());
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 20);

    app.start();
    for id in &ids {
        assert_eq!(app.wait_terminal(id).await["state"], "SUCCEEDED");
    }
    assert_eq!(app.adapter.calls(), 20);
}

// ==================== Metrics ====================

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = TestApp::new(FakeAdapter::returning(sample_reviews(1)));
    app.start();

    let job_id = app.submit(PLACE_URL).await;
    app.wait_terminal(&job_id).await;

    let (status, body) = app.json("GET", "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["requests"]["total"].as_u64().unwrap() >= 2);
    assert_eq!(body["jobs"]["succeeded"], 1);
    assert_eq!(body["queue"]["workers"], 2);
    assert_eq!(body["queue"]["jobs_by_state"]["SUCCEEDED"], 1);
    assert!(body["requests"]["top_paths"]
        .as_array()
        .unwrap()
        .iter()
        .any(|p| p["path"] == "/job/:id"));
}
