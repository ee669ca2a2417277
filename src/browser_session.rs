//! Lifecycle of the shared headless Chrome process
//!
//! One browser process serves every capture. Each capture gets its own
//! browser context (separate cookies, cache and storage) which is disposed
//! when the capture ends, whether it succeeded, failed or was cancelled.

use crate::config::{create_browser_config, Config};
use crate::error::{AppError, CaptureError};
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// How long `stop` waits for the Chrome process to exit after asking it to close
const EXIT_GRACE: Duration = Duration::from_secs(5);

struct BrowserInstance {
    browser: Arc<RwLock<Browser>>,
    /// Background task handling Chrome DevTools Protocol communication
    handler: tokio::task::JoinHandle<()>,
    started_at: Instant,
}

pub struct BrowserSession {
    config: Config,
    instance: RwLock<Option<BrowserInstance>>,
    is_shutting_down: AtomicBool,
}

impl BrowserSession {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            instance: RwLock::new(None),
            is_shutting_down: AtomicBool::new(false),
        }
    }

    /// Launch Chrome; calling it on a running session does nothing
    pub async fn start(&self) -> Result<(), AppError> {
        if self.is_shutting_down() {
            return Err(AppError::Browser("browser session has been stopped".to_string()));
        }

        let mut slot = self.instance.write().await;
        if slot.is_some() {
            debug!("Browser session already running");
            return Ok(());
        }

        let browser_config = create_browser_config(&self.config)?;
        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| AppError::Browser(format!("failed to launch Chrome: {e}")))?;

        // The handler implements Stream and must be polled for the browser to make progress
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                match event {
                    Ok(()) => continue,
                    Err(CdpError::Ws(e)) => {
                        error!("DevTools connection lost: {}", e);
                        break;
                    }
                    Err(e) => debug!("Handler error: {}", e),
                }
            }
            info!("Handler stream ended");
        });

        *slot = Some(BrowserInstance {
            browser: Arc::new(RwLock::new(browser)),
            handler: handler_task,
            started_at: Instant::now(),
        });
        info!("Browser session started");
        Ok(())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::Relaxed)
    }

    /// True while Chrome is up and its protocol handler is alive
    pub async fn is_running(&self) -> bool {
        match self.instance.read().await.as_ref() {
            Some(instance) => !instance.handler.is_finished() && !self.is_shutting_down(),
            None => false,
        }
    }

    pub async fn uptime(&self) -> Option<Duration> {
        self.instance
            .read()
            .await
            .as_ref()
            .map(|instance| instance.started_at.elapsed())
    }

    /// Open a fresh isolated context with a blank page in it
    pub async fn new_context(&self) -> Result<BrowsingContext, CaptureError> {
        if self.is_shutting_down() {
            return Err(CaptureError::BrowserUnavailable(
                "browser is shutting down".to_string(),
            ));
        }

        let browser = {
            let slot = self.instance.read().await;
            let instance = slot.as_ref().ok_or_else(|| {
                CaptureError::BrowserUnavailable("browser has not been started".to_string())
            })?;
            if instance.handler.is_finished() {
                return Err(CaptureError::BrowserUnavailable(
                    "browser process is no longer connected".to_string(),
                ));
            }
            Arc::clone(&instance.browser)
        };

        let unavailable = |e: CdpError| CaptureError::BrowserUnavailable(e.to_string());

        let guard = browser.read().await;
        let created = guard
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(unavailable)?;
        let context_id = created.result.browser_context_id;

        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id.clone())
            .build()
            .map_err(CaptureError::BrowserUnavailable)?;

        let page = match guard.new_page(target).await {
            Ok(page) => page,
            Err(e) => {
                if let Err(dispose_err) = guard
                    .execute(DisposeBrowserContextParams::new(context_id))
                    .await
                {
                    warn!("Failed to dispose context after page error: {}", dispose_err);
                }
                return Err(unavailable(e));
            }
        };
        drop(guard);

        Ok(BrowsingContext {
            id: Some(context_id),
            page,
            browser,
        })
    }

    /// Close Chrome; later `new_context` calls fail with browser-unavailable
    pub async fn stop(&self) {
        self.is_shutting_down.store(true, Ordering::Relaxed);

        let Some(instance) = self.instance.write().await.take() else {
            return;
        };

        {
            let mut browser = instance.browser.write().await;
            if let Err(e) = browser.close().await {
                warn!("Failed to close browser cleanly: {}", e);
            }
            if tokio::time::timeout(EXIT_GRACE, browser.wait()).await.is_err() {
                warn!("Browser did not exit within {:?}, killing it", EXIT_GRACE);
                if let Some(Err(e)) = browser.kill().await {
                    warn!("Failed to kill browser process: {}", e);
                }
            }
        }
        instance.handler.abort();
        info!("Browser session stopped");
    }
}

/// An isolated browser context owning a single page
///
/// Call [`BrowsingContext::close`] when done. Dropping an unclosed context
/// schedules the disposal on the runtime instead.
pub struct BrowsingContext {
    id: Option<BrowserContextId>,
    page: Page,
    browser: Arc<RwLock<Browser>>,
}

impl BrowsingContext {
    pub fn page(&self) -> &Page {
        &self.page
    }

    pub async fn close(mut self) {
        if let Some(id) = self.id.take() {
            dispose(self.page.clone(), Arc::clone(&self.browser), id).await;
        }
    }
}

impl Drop for BrowsingContext {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        let page = self.page.clone();
        let browser = Arc::clone(&self.browser);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(dispose(page, browser, id));
            }
            Err(_) => warn!("Browser context dropped outside a runtime; it stays open"),
        }
    }
}

async fn dispose(page: Page, browser: Arc<RwLock<Browser>>, id: BrowserContextId) {
    if let Err(e) = page.close().await {
        debug!("Failed to close page: {}", e);
    }
    let browser = browser.read().await;
    if let Err(e) = browser.execute(DisposeBrowserContextParams::new(id)).await {
        debug!("Failed to dispose browser context: {}", e);
    }
}
