//! Main screenshot service orchestrating the capture pipeline
//!
//! Validates requests, hands them to the capture engine under a timeout,
//! stores the image and persists one record per attempt. Capture failures
//! are recorded, not raised; only invalid input and storage faults reach
//! the caller as errors.

use crate::config::{CaptureOptions, CaptureRequest, Config};
use crate::engine::CaptureEngine;
use crate::error::{AppError, CaptureError, Result};
use crate::models::{CaptureResult, NewCapture, StoredImage};
use crate::store::Store;
use crate::utils::{format_bytes, format_duration, screenshot_filename};
use base64::Engine as _;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Aggregate of one batch, results in the order the URLs were given
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub results: Vec<CaptureResult>,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

/// Screenshot service over a capture engine and the record store
///
/// # Examples
///
/// ```rust,no_run
/// use statusshot::{BrowserSession, CaptureOptions, ChromeEngine, Config, ScreenshotService, Store};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Arc::new(Config::default());
///     let store = Store::connect(&config.database_url).await?;
///     store.migrate().await?;
///
///     let session = Arc::new(BrowserSession::new((*config).clone()));
///     session.start().await?;
///     let engine = Arc::new(ChromeEngine::new(session.clone(), Duration::from_millis(500)));
///
///     let service = ScreenshotService::new(engine, store, config);
///     let record = service.capture("example.com", &CaptureOptions::default()).await?;
///     println!("Captured {} (success: {})", record.url, record.success);
///
///     session.stop().await;
///     Ok(())
/// }
/// ```
pub struct ScreenshotService {
    engine: Arc<dyn CaptureEngine>,
    store: Store,
    config: Arc<Config>,
}

impl ScreenshotService {
    pub fn new(engine: Arc<dyn CaptureEngine>, store: Store, config: Arc<Config>) -> Self {
        Self {
            engine,
            store,
            config,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub async fn engine_ready(&self) -> bool {
        self.engine.is_ready().await
    }

    /// Capture one URL and persist the attempt
    pub async fn capture(&self, url: &str, options: &CaptureOptions) -> Result<CaptureResult> {
        let request = options.resolve(url, &self.config)?;
        let outcome = self.execute(&request).await?;
        self.store.save_screenshot(&outcome).await
    }

    /// Capture every URL with bounded parallelism
    ///
    /// The whole batch is rejected before any capture starts when it is
    /// empty, too large or contains an invalid URL.
    pub async fn capture_batch(&self, urls: &[String], options: &CaptureOptions) -> Result<BatchOutcome> {
        let max = self.config.capture.max_batch_size;
        if urls.is_empty() || urls.len() > max {
            return Err(AppError::Validation(format!(
                "a batch must contain between 1 and {max} URLs (got {})",
                urls.len()
            )));
        }

        let requests = urls
            .iter()
            .map(|url| options.resolve(url, &self.config))
            .collect::<Result<Vec<_>>>()?;

        info!("Capturing batch of {} URLs", requests.len());
        let limiter = Semaphore::new(self.config.capture.batch_concurrency);

        let results = try_join_all(requests.iter().map(|request| {
            let limiter = &limiter;
            async move {
                let _permit = limiter
                    .acquire()
                    .await
                    .map_err(|e| AppError::Internal(e.to_string()))?;
                let outcome = self.execute(request).await?;
                self.store.save_screenshot(&outcome).await
            }
        }))
        .await?;

        let successful = results.iter().filter(|r| r.success).count();
        Ok(BatchOutcome {
            total: results.len(),
            successful,
            failed: results.len() - successful,
            results,
        })
    }

    /// Run one validated request through the engine
    ///
    /// Errors here are storage faults; capture failures come back as a failed record.
    async fn execute(&self, request: &CaptureRequest) -> Result<NewCapture> {
        let taken_at = Utc::now();
        let started = Instant::now();

        let rendered = match timeout(self.render_budget(request), self.engine.render(request)).await {
            Ok(result) => result,
            Err(_) => Err(CaptureError::Timeout(request.timeout)),
        };
        let elapsed = started.elapsed();

        match rendered {
            Ok(page) => {
                crate::metrics::record_capture(elapsed, None);
                let image = self.store_image(&request.url, taken_at, &page.image).await?;
                info!("Captured {} in {}", request.url, format_duration(page.load_time));
                Ok(NewCapture::succeeded(
                    request,
                    taken_at,
                    image,
                    page.http_status,
                    page.load_time,
                ))
            }
            Err(err) => {
                crate::metrics::record_capture(elapsed, Some(err.kind()));
                warn!("Capture of {} failed: {}", request.url, err.record_message());
                Ok(NewCapture::failed(request, taken_at, &err, elapsed))
            }
        }
    }

    /// Upper bound on one engine call: the navigation timeout, the settle
    /// delay and the context grace
    fn render_budget(&self, request: &CaptureRequest) -> Duration {
        request.timeout
            + request.delay
            + Duration::from_millis(self.config.capture.context_grace_ms)
    }

    async fn store_image(&self, url: &str, taken_at: DateTime<Utc>, png: &[u8]) -> Result<StoredImage> {
        let storage = &self.config.storage;
        tokio::fs::create_dir_all(&storage.screenshots_dir).await?;

        let path = storage
            .screenshots_dir
            .join(screenshot_filename(url, taken_at));
        tokio::fs::write(&path, png).await?;
        debug!("Wrote {} to {}", format_bytes(png.len()), path.display());

        let base64_data = storage
            .inline_images
            .then(|| base64::engine::general_purpose::STANDARD.encode(png));

        Ok(StoredImage {
            file_path: Some(path.to_string_lossy().into_owned()),
            base64_data,
        })
    }

    /// Delete a record and the image file behind it
    pub async fn delete(&self, id: i64) -> Result<()> {
        let deleted = self
            .store
            .delete_screenshot(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Screenshot".to_string()))?;

        if let Some(path) = deleted.file_path {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!("Removed {}", path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove image {}: {}", path, e),
            }
        }

        info!("Deleted screenshot {}", id);
        Ok(())
    }
}
