//! # Statusshot
//!
//! A web screenshot validation service. Each capture loads a URL in headless
//! Chrome inside an isolated browser context, waits for the requested readiness
//! signal, saves a PNG and records the attempt (success or classified failure)
//! in SQLite. Records are served over an HTTP API guarded by hashed API keys.
//!
//! ## Benchmarks
//!
//! ```bash
//! # Unit benchmarks only (no Chrome required)
//! cargo bench
//!
//! # Including a real capture against Chrome
//! cargo bench --features integration_benchmarks
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use statusshot::{BrowserSession, CaptureOptions, ChromeEngine, Config, ScreenshotService, Store};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(Config::default());
//!     let store = Store::connect(&config.database_url).await?;
//!     store.migrate().await?;
//!
//!     let session = Arc::new(BrowserSession::new((*config).clone()));
//!     session.start().await?;
//!     let engine = Arc::new(ChromeEngine::new(session.clone(), Duration::from_millis(500)));
//!
//!     let service = ScreenshotService::new(engine, store, config);
//!     let record = service.capture("https://example.com", &CaptureOptions::default()).await?;
//!     println!("Captured {} with status {:?}", record.url, record.http_status_code);
//!
//!     session.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ### Serve the API
//! ```bash
//! statusshot serve --port 8000 --metrics
//! ```
//!
//! ### Single Capture
//! ```bash
//! statusshot capture https://example.com --full-page --wait selector --selector '#main'
//! ```
//!
//! ### API Keys
//! ```bash
//! statusshot keys create ci-runner --expires-in-days 90
//! ```

/// HTTP routes, extractors and application state
pub mod api;

/// API key generation and validation
pub mod auth;

/// Lifecycle of the shared Chrome process and per-capture browser contexts
pub mod browser_session;

/// Command-line interface implementation
pub mod cli;

/// Configuration, capture options and their validation
pub mod config;

/// Capture engine seam and the Chrome implementation
pub mod engine;

/// Error types and failure classification
pub mod error;

/// Service and dependency health reporting
pub mod health;

/// Prometheus counters and histograms
pub mod metrics;

/// Persisted records and their construction
pub mod models;

/// Capture pipeline over the engine and the store
pub mod screenshot_service;

/// SQLite persistence for screenshot records and API keys
pub mod store;

/// Utility functions and helpers
pub mod utils;


pub use api::{router, AppState};
pub use auth::{Credential, KeyAuthenticator};
pub use browser_session::{BrowserSession, BrowsingContext};
pub use cli::{setup_logging, Cli, CliRunner, Commands};
pub use config::{
    BasicAuth, CaptureOptions, CaptureRequest, Config, RenderMode, Viewport, WaitPolicy,
};
pub use engine::{CaptureEngine, ChromeEngine, RenderedPage};
pub use error::{AppError, CaptureError, FailureKind, Result};
pub use health::{check_health, HealthLevel, HealthReport};
pub use models::{ApiKey, CaptureResult, ScreenshotFilter, Statistics};
pub use screenshot_service::{BatchOutcome, ScreenshotService};
pub use store::Store;
