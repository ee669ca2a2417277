//! Rendering a single capture request into a PNG
//!
//! [`CaptureEngine`] is the seam between the capture pipeline and the
//! browser. [`ChromeEngine`] drives headless Chrome through a
//! [`BrowserSession`]; tests substitute their own implementation.

use crate::browser_session::BrowserSession;
use crate::config::{CaptureRequest, RenderMode, WaitPolicy};
use crate::error::CaptureError;
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams as NetworkEnableParams, EventLoadingFailed, EventLoadingFinished,
    EventRequestWillBeSent, Headers, SetExtraHttpHeadersParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, EventFrameNavigated, EventLifecycleEvent, NavigateParams,
    SetLifecycleEventsEnabledParams,
};
use chromiumoxide::cdp::browser_protocol::security::SetIgnoreCertificateErrorsParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, sleep, timeout_at, Instant, MissedTickBehavior};
use tracing::debug;

/// How often the selector condition is re-checked
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Errors a check raises while the page is between documents
const CONTEXT_CHURN: &[&str] = &[
    "Cannot find context with specified id",
    "Execution context was destroyed",
    "Inspected target navigated or closed",
];

/// Image and page facts from a successful render
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPage {
    pub image: Vec<u8>,
    /// Status of the main document response, when the browser exposed one
    pub http_status: Option<u16>,
    /// From navigation start until the page was ready (including the settle delay)
    pub load_time: Duration,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CaptureEngine: Send + Sync {
    /// Navigate, wait for readiness and capture; every failure comes back classified
    async fn render(&self, request: &CaptureRequest) -> Result<RenderedPage, CaptureError>;

    /// Whether the engine can take work right now
    async fn is_ready(&self) -> bool;
}

/// What has been observed of one navigation, fed from page events
///
/// The main frame commits a loader; lifecycle events are kept per loader so
/// ones delivered ahead of the commit still count.
#[derive(Debug)]
struct Readiness {
    policy: WaitPolicy,
    idle_window: Duration,
    committed: Option<String>,
    lifecycle: HashSet<(String, String)>,
    in_flight: HashSet<String>,
    quiet_since: Option<Instant>,
    selector_found: bool,
}

impl Readiness {
    fn new(policy: WaitPolicy, idle_window: Duration, now: Instant) -> Self {
        Self {
            policy,
            idle_window,
            committed: None,
            lifecycle: HashSet::new(),
            in_flight: HashSet::new(),
            quiet_since: Some(now),
            selector_found: false,
        }
    }

    fn commit(&mut self, loader_id: &str) {
        if self.committed.is_none() {
            self.committed = Some(loader_id.to_string());
        }
    }

    fn is_committed(&self) -> bool {
        self.committed.is_some()
    }

    fn lifecycle_event(&mut self, loader_id: &str, name: &str) {
        self.lifecycle.insert((loader_id.to_string(), name.to_string()));
    }

    fn request_started(&mut self, request_id: &str) {
        self.in_flight.insert(request_id.to_string());
        self.quiet_since = None;
    }

    fn request_done(&mut self, request_id: &str, now: Instant) {
        if self.in_flight.remove(request_id) && self.in_flight.is_empty() {
            self.quiet_since = Some(now);
        }
    }

    /// Selector still to look for, once there is a committed document to look in
    fn pending_selector(&self) -> Option<&str> {
        match &self.policy {
            WaitPolicy::Selector(selector) if self.is_committed() && !self.selector_found => {
                Some(selector)
            }
            _ => None,
        }
    }

    fn selector_found(&mut self) {
        self.selector_found = true;
    }

    fn saw(&self, name: &str) -> bool {
        self.committed
            .as_ref()
            .map_or(false, |loader| self.lifecycle.contains(&(loader.clone(), name.to_string())))
    }

    fn is_ready(&self, now: Instant) -> bool {
        if !self.is_committed() {
            return false;
        }
        match &self.policy {
            WaitPolicy::Commit => true,
            WaitPolicy::DomContentLoaded => self.saw("DOMContentLoaded") || self.saw("load"),
            WaitPolicy::Load => self.saw("load"),
            WaitPolicy::NetworkIdle => {
                self.saw("networkIdle")
                    || (self.saw("load")
                        && self.in_flight.is_empty()
                        && self.quiet_since.map_or(false, |since| {
                            now.saturating_duration_since(since) >= self.idle_window
                        }))
            }
            WaitPolicy::Selector(_) => self.selector_found,
        }
    }
}

pub struct ChromeEngine {
    session: Arc<BrowserSession>,
    network_idle_window: Duration,
}

impl ChromeEngine {
    pub fn new(session: Arc<BrowserSession>, network_idle_window: Duration) -> Self {
        Self {
            session,
            network_idle_window,
        }
    }

    async fn drive(&self, page: &Page, request: &CaptureRequest) -> Result<RenderedPage, CaptureError> {
        let deadline = Instant::now() + request.timeout;
        let cdp = |e| CaptureError::from_cdp(e, request.timeout);

        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(request.viewport.width)
            .height(request.viewport.height)
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(CaptureError::Render)?;
        page.execute(metrics).await.map_err(cdp)?;
        page.execute(SetIgnoreCertificateErrorsParams::new(true))
            .await
            .map_err(cdp)?;
        page.execute(NetworkEnableParams::default()).await.map_err(cdp)?;
        page.execute(SetLifecycleEventsEnabledParams::new(true))
            .await
            .map_err(cdp)?;

        let headers = request.request_headers();
        if !headers.is_empty() {
            let headers = serde_json::to_value(&headers)
                .map_err(|e| CaptureError::Render(e.to_string()))?;
            page.execute(SetExtraHttpHeadersParams::new(Headers::new(headers)))
                .await
                .map_err(cdp)?;
        }

        let started = Instant::now();
        let mut readiness = Readiness::new(request.wait_policy.clone(), self.network_idle_window, started);
        let waited = timeout_at(deadline, self.navigate(page, request, &mut readiness)).await;
        match waited {
            Ok(result) => result?,
            Err(_) => {
                return Err(match &request.wait_policy {
                    WaitPolicy::Selector(selector) if readiness.is_committed() => {
                        CaptureError::SelectorNotFound(selector.clone())
                    }
                    _ => CaptureError::Timeout(request.timeout),
                })
            }
        }

        if !request.delay.is_zero() {
            sleep(request.delay).await;
        }
        let load_time = started.elapsed();

        let http_status = main_response_status(page).await;

        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(request.render_mode == RenderMode::FullPage)
            .build();
        let image = page.screenshot(params).await.map_err(cdp)?;

        debug!(
            "Rendered {} ({} bytes, status {:?}) in {:?}",
            request.url,
            image.len(),
            http_status,
            load_time
        );

        Ok(RenderedPage {
            image,
            http_status,
            load_time,
        })
    }

    /// Start the navigation and follow its events until the wait policy is met
    ///
    /// The navigate command itself is not awaited for readiness: it only
    /// reports failures, while commit and load come from frame and lifecycle
    /// events.
    async fn navigate(
        &self,
        page: &Page,
        request: &CaptureRequest,
        readiness: &mut Readiness,
    ) -> Result<(), CaptureError> {
        let cdp = |e| CaptureError::from_cdp(e, request.timeout);

        let mut frames = page.event_listener::<EventFrameNavigated>().await.map_err(cdp)?;
        let mut lifecycle = page.event_listener::<EventLifecycleEvent>().await.map_err(cdp)?;
        let mut requests = page.event_listener::<EventRequestWillBeSent>().await.map_err(cdp)?;
        let mut finished = page.event_listener::<EventLoadingFinished>().await.map_err(cdp)?;
        let mut failed = page.event_listener::<EventLoadingFailed>().await.map_err(cdp)?;

        let navigation = page.execute(NavigateParams::new(request.url.clone()));
        tokio::pin!(navigation);
        let mut navigating = true;
        let mut unreachable = false;

        let mut ticks = interval(POLL_INTERVAL);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                response = &mut navigation, if navigating => {
                    navigating = false;
                    match response {
                        Ok(response) => {
                            if let Some(error_text) = response.result.error_text.clone() {
                                return Err(CaptureError::Navigation(error_text));
                            }
                            if unreachable {
                                return Err(CaptureError::Navigation(format!(
                                    "net::ERR_FAILED loading {}",
                                    request.url
                                )));
                            }
                            if let Some(loader_id) = &response.result.loader_id {
                                readiness.commit(loader_id.inner());
                            }
                        }
                        Err(e) if readiness.is_committed() => {
                            debug!("Navigate command for {} ended after commit: {}", request.url, e);
                        }
                        Err(e) => return Err(cdp(e)),
                    }
                }
                Some(event) = frames.next() => {
                    if event.frame.parent_id.is_none() {
                        if event.frame.unreachable_url.is_some() {
                            if !navigating {
                                return Err(CaptureError::Navigation(format!(
                                    "net::ERR_FAILED loading {}",
                                    request.url
                                )));
                            }
                            unreachable = true;
                        } else {
                            readiness.commit(event.frame.loader_id.inner());
                        }
                    }
                }
                Some(event) = lifecycle.next() => {
                    readiness.lifecycle_event(event.loader_id.inner(), &event.name);
                }
                Some(event) = requests.next() => {
                    readiness.request_started(event.request_id.inner());
                }
                Some(event) = finished.next() => {
                    readiness.request_done(event.request_id.inner(), Instant::now());
                }
                Some(event) = failed.next() => {
                    readiness.request_done(event.request_id.inner(), Instant::now());
                }
                _ = ticks.tick() => {
                    if let Some(selector) = readiness.pending_selector().map(str::to_string) {
                        match selector_present(page, &selector).await {
                            Ok(true) => readiness.selector_found(),
                            Ok(false) => {}
                            Err(e) => {
                                if let Some(err) = classify_check_error(e, request.timeout) {
                                    return Err(err);
                                }
                            }
                        }
                    }
                }
            }

            if !unreachable && readiness.is_ready(Instant::now()) {
                return Ok(());
            }
        }
    }
}

#[async_trait]
impl CaptureEngine for ChromeEngine {
    async fn render(&self, request: &CaptureRequest) -> Result<RenderedPage, CaptureError> {
        let context = self.session.new_context().await?;

        let result = self.drive(context.page(), request).await;
        context.close().await;

        result.map_err(|e| {
            if self.session.is_shutting_down() {
                CaptureError::BrowserUnavailable(format!("browser shut down during capture ({e})"))
            } else {
                e
            }
        })
    }

    async fn is_ready(&self) -> bool {
        self.session.is_running().await
    }
}

async fn selector_present(page: &Page, selector: &str) -> Result<bool, CdpError> {
    let selector = serde_json::to_string(selector)?;
    page.evaluate(format!("document.querySelector({selector}) !== null").as_str())
        .await?
        .into_value()
        .map_err(CdpError::from)
}

/// Sort a failed readiness check: `None` when the page was only between
/// documents and the check should run again on the next tick
fn classify_check_error(err: CdpError, timeout: Duration) -> Option<CaptureError> {
    if let CdpError::JavascriptException(details) = &err {
        let detail = details
            .exception
            .as_ref()
            .and_then(|exception| exception.description.clone())
            .unwrap_or_else(|| details.text.clone());
        return Some(CaptureError::Render(format!("selector check failed: {detail}")));
    }

    let text = err.to_string();
    if CONTEXT_CHURN.iter().any(|marker| text.contains(marker)) {
        return None;
    }
    Some(CaptureError::from_cdp(err, timeout))
}

/// Status of the main document, read from the Navigation Timing entry
async fn main_response_status(page: &Page) -> Option<u16> {
    let status: u16 = page
        .evaluate(
            "(() => { const nav = performance.getEntriesByType('navigation')[0]; \
             return nav && nav.responseStatus ? nav.responseStatus : 0; })()",
        )
        .await
        .ok()
        .and_then(|result| result.into_value().ok())?;

    (status != 0).then_some(status)
}
