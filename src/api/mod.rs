//! HTTP API
//!
//! Screenshot, statistics and key-management routes are nested under
//! `/api/v1`; `/`, `/health` and the optional `/metrics` sit at the root.

use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::{
    auth::KeyAuthenticator, config::Config, health::check_health,
    screenshot_service::ScreenshotService,
};

pub mod api_keys;
pub mod auth;
pub mod screenshots;

pub use auth::{OptionalApiKey, RequiredApiKey};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ScreenshotService>,
    pub keys: Arc<KeyAuthenticator>,
    pub config: Arc<Config>,
    pub metrics: Option<PrometheusHandle>,
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/", get(api_root))
        .route("/screenshot", post(screenshots::capture_screenshot))
        .route("/screenshot/batch", post(screenshots::capture_batch))
        .route("/screenshots", get(screenshots::list_screenshots))
        .route(
            "/screenshots/:id",
            get(screenshots::get_screenshot).delete(screenshots::delete_screenshot),
        )
        .route("/screenshots/url/*url", get(screenshots::screenshots_for_url))
        .route("/statistics", get(screenshots::statistics))
        .route(
            "/api-keys",
            post(api_keys::create_api_key).get(api_keys::list_api_keys),
        )
        .route(
            "/api-keys/:id",
            get(api_keys::get_api_key).delete(api_keys::revoke_api_key),
        )
        .route("/api-keys/:id/reactivate", post(api_keys::reactivate_api_key));

    let mut app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .nest("/api/v1", api);

    if state.metrics.is_some() {
        app = app.route("/metrics", get(render_metrics));
    }

    app.fallback(not_found)
        .layer(cors_layer(&state.config.server.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "message": "Screenshot Validation API",
        "version": env!("CARGO_PKG_VERSION"),
        "api": "/api/v1"
    }))
}

async fn api_root() -> Json<serde_json::Value> {
    Json(json!({
        "message": "Screenshot Validation API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "capture_single": "POST /api/v1/screenshot",
            "capture_batch": "POST /api/v1/screenshot/batch",
            "list_screenshots": "GET /api/v1/screenshots",
            "get_screenshot": "GET /api/v1/screenshots/{id}",
            "screenshots_for_url": "GET /api/v1/screenshots/url/{url}",
            "get_statistics": "GET /api/v1/statistics",
            "delete_screenshot": "DELETE /api/v1/screenshots/{id}",
            "api_keys": "GET|POST /api/v1/api-keys",
        }
    }))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = check_health(&state.service).await;
    let status = if report.database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

async fn render_metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, String::new()),
    }
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "Resource not found", "status": 404 })),
    )
}

/// `{"message": ...}` body used by the delete, revoke and reactivate routes
pub(crate) fn message(text: &str) -> Json<serde_json::Value> {
    Json(json!({ "message": text }))
}
