use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use statusshot::{
    router, AppState, CaptureEngine, CaptureError, CaptureRequest, Config, KeyAuthenticator,
    RenderedPage, ScreenshotService, Store,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

/// Renders every URL except those mentioning `unreachable`
#[derive(Default)]
struct StubEngine {
    calls: AtomicUsize,
}

#[async_trait]
impl CaptureEngine for StubEngine {
    async fn render(&self, request: &CaptureRequest) -> Result<RenderedPage, CaptureError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if request.url.contains("unreachable") {
            return Err(CaptureError::Navigation(
                "net::ERR_NAME_NOT_RESOLVED".to_string(),
            ));
        }
        Ok(RenderedPage {
            image: b"\x89PNG\r\n\x1a\nstub".to_vec(),
            http_status: Some(200),
            load_time: Duration::from_millis(42),
        })
    }

    async fn is_ready(&self) -> bool {
        true
    }
}

struct TestApp {
    app: Router,
    engine: Arc<StubEngine>,
    _dir: TempDir,
}

async fn test_app(require_api_key: bool) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.storage.screenshots_dir = dir.path().to_path_buf();
    config.auth.bcrypt_cost = 4;
    config.auth.require_api_key = require_api_key;
    let config = Arc::new(config);

    let store = Store::in_memory().await.unwrap();
    store.migrate().await.unwrap();

    let engine = Arc::new(StubEngine::default());
    let state = AppState {
        service: Arc::new(ScreenshotService::new(
            engine.clone(),
            store.clone(),
            config.clone(),
        )),
        keys: Arc::new(KeyAuthenticator::new(store, config.auth.clone())),
        config,
        metrics: None,
    };

    TestApp {
        app: router(state),
        engine,
        _dir: dir,
    }
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    async fn get(&self, uri: &str, key: Option<&str>) -> (StatusCode, Value) {
        self.send(build(Method::GET, uri, key, None)).await
    }

    async fn post(&self, uri: &str, key: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.send(build(Method::POST, uri, key, Some(body))).await
    }

    async fn delete(&self, uri: &str, key: Option<&str>) -> (StatusCode, Value) {
        self.send(build(Method::DELETE, uri, key, None)).await
    }

    async fn create_key(&self, name: &str) -> (i64, String) {
        let (status, body) = self
            .post("/api/v1/api-keys", None, json!({ "name": name }))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        (
            body["api_key"]["id"].as_i64().unwrap(),
            body["key"].as_str().unwrap().to_string(),
        )
    }
}

fn build(method: Method, uri: &str, key: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(key) = key {
        builder = builder.header("X-API-Key", key);
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

#[tokio::test]
async fn health_and_roots_respond() {
    let app = test_app(false).await;

    let (status, body) = app.get("/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], true);

    let (status, body) = app.get("/api/v1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["endpoints"]["capture_single"].is_string());

    let (status, body) = app.get("/nowhere", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], 404);
}

#[tokio::test]
async fn capture_records_success_and_failure() {
    let app = test_app(false).await;

    let (status, ok) = app
        .post(
            "/api/v1/screenshot",
            None,
            json!({ "url": "example.com", "options": { "full_page": true, "wait_strategy": "load" } }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ok["success"], true);
    assert_eq!(ok["url"], "https://example.com");
    assert_eq!(ok["http_status_code"], 200);
    assert_eq!(ok["full_page"], true);
    assert_eq!(ok["wait_strategy"], "load");
    assert!(ok["base64_data"].is_string());

    let (status, failed) = app
        .post(
            "/api/v1/screenshot",
            None,
            json!({ "url": "https://unreachable.invalid" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(failed["success"], false);
    assert!(failed["file_path"].is_null());
    assert!(failed["error_message"]
        .as_str()
        .unwrap()
        .starts_with("name-resolution"));

    let (status, stats) = app.get("/api/v1/statistics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total_screenshots"], 2);
    assert_eq!(stats["successful_screenshots"], 1);
    assert_eq!(stats["success_rate"], 50.0);
}

#[tokio::test]
async fn invalid_capture_input_is_rejected() {
    let app = test_app(false).await;

    let (status, body) = app
        .post("/api/v1/screenshot", None, json!({ "url": "ftp://example.com" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], 400);

    let (status, _) = app
        .post(
            "/api/v1/screenshot",
            None,
            json!({ "url": "example.com", "options": { "wait_strategy": "selector" } }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.engine.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn oversized_batch_never_reaches_the_engine() {
    let app = test_app(false).await;
    let urls: Vec<String> = (0..101).map(|i| format!("https://example.com/{i}")).collect();

    let (status, _) = app
        .post("/api/v1/screenshot/batch", None, json!({ "urls": urls }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.engine.calls.load(Ordering::SeqCst), 0);

    let (_, body) = app.get("/api/v1/screenshots", None).await;
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn batch_results_keep_request_order() {
    let app = test_app(false).await;
    let urls = vec!["example.com/a", "unreachable.invalid", "example.com/b"];

    let (status, body) = app
        .post("/api/v1/screenshot/batch", None, json!({ "urls": urls }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
    assert_eq!(body["successful"], 2);
    assert_eq!(body["failed"], 1);

    let results = body["results"].as_array().unwrap();
    assert_eq!(results[0]["url"], "https://example.com/a");
    assert_eq!(results[1]["success"], false);
    assert_eq!(results[2]["url"], "https://example.com/b");
}

#[tokio::test]
async fn listing_filters_and_lookups() {
    let app = test_app(false).await;
    for url in ["example.com", "example.com", "unreachable.invalid", "example.org"] {
        app.post("/api/v1/screenshot", None, json!({ "url": url })).await;
    }

    let (status, body) = app.get("/api/v1/screenshots?success=false", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);

    let (_, body) = app.get("/api/v1/screenshots?url=example&limit=2", None).await;
    assert_eq!(body["total"], 3);
    assert_eq!(body["screenshots"].as_array().unwrap().len(), 2);
    assert_eq!(body["limit"], 2);

    let (status, _) = app.get("/api/v1/screenshots?limit=0", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = app.get("/api/v1/screenshots?limit=1001", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app.get("/api/v1/screenshots/url/example.com", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["screenshots"].as_array().unwrap().len(), 2);

    let (_, body) = app.get("/api/v1/screenshots?limit=1", None).await;
    let id = body["screenshots"][0]["id"].as_i64().unwrap();

    let (status, record) = app.get(&format!("/api/v1/screenshots/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["id"], id);

    let (status, body) = app.delete(&format!("/api/v1/screenshots/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Screenshot deleted successfully");

    let (status, body) = app.get(&format!("/api/v1/screenshots/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Screenshot not found");

    let (status, _) = app.delete(&format!("/api/v1/screenshots/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn api_keys_never_expose_plaintext_after_creation() {
    let app = test_app(false).await;
    let (id, key) = app.create_key("ci").await;
    assert!(key.starts_with("sk_live_"));

    let (status, body) = app.get("/api/v1/api-keys", Some(&key)).await;
    assert_eq!(status, StatusCode::OK);
    let listing = body.to_string();
    assert!(!listing.contains(&key));
    assert!(!listing.contains("key_hash"));
    assert_eq!(body["keys"].as_array().unwrap().len(), 1);

    let (status, body) = app.get(&format!("/api/v1/api-keys/{id}"), Some(&key)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "ci");
    assert!(body["request_count"].as_i64().unwrap() >= 2);

    let (status, _) = app.get("/api/v1/api-keys/9999", Some(&key)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn revoked_keys_are_rejected_until_reactivated() {
    let app = test_app(false).await;
    let (_, admin) = app.create_key("admin").await;
    let (id, key) = app.create_key("worker").await;

    let (status, body) = app.delete(&format!("/api/v1/api-keys/{id}"), Some(&admin)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "API key revoked successfully");

    let (status, _) = app.get("/api/v1/statistics", Some(&key)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, body) = app.get("/api/v1/api-keys", Some(&admin)).await;
    assert_eq!(body["keys"].as_array().unwrap().len(), 1);
    let (_, body) = app
        .get("/api/v1/api-keys?include_inactive=true", Some(&admin))
        .await;
    assert_eq!(body["keys"].as_array().unwrap().len(), 2);

    let (status, body) = app
        .post(&format!("/api/v1/api-keys/{id}/reactivate"), Some(&admin), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "API key reactivated successfully");

    let (status, _) = app.get("/api/v1/statistics", Some(&key)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn key_management_requires_a_key() {
    let app = test_app(false).await;

    let (status, body) = app.get("/api/v1/api-keys", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], 401);

    let (status, _) = app
        .get("/api/v1/statistics", Some("sk_live_notarealkeyatall"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn required_keys_gate_every_api_route() {
    let app = test_app(true).await;

    let (status, _) = app
        .post("/api/v1/screenshot", None, json!({ "url": "example.com" }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.engine.calls.load(Ordering::SeqCst), 0);

    let (status, _) = app
        .post("/api/v1/api-keys", None, json!({ "name": "bootstrap" }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.get("/health", None).await;
    assert_eq!(status, StatusCode::OK);
}
