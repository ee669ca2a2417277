//! Configuration management with serde serialization/deserialization
//!
//! This module holds the service configuration (server, storage, browser,
//! capture limits and API key settings) together with the capture request
//! types that the configuration bounds.

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Main configuration structure for the screenshot service
///
/// Every section falls back to its defaults, so a config file only needs
/// to name the values it changes.
///
/// # Examples
///
/// ```rust
/// use statusshot::Config;
///
/// let config = Config::default();
/// assert_eq!(config.capture.max_batch_size, 100);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// HTTP listener settings
    pub server: ServerConfig,

    /// SQLx connection string for the record store
    ///
    /// `?mode=rwc` lets SQLite create the file on first start.
    pub database_url: String,

    /// Where captured images are written
    pub storage: StorageConfig,

    /// Headless Chrome settings
    pub browser: BrowserSettings,

    /// Bounds applied to every capture request
    pub capture: CaptureLimits,

    /// API key issuance and validation settings
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// Origins allowed by the CORS layer (empty allows any origin)
    pub cors_origins: Vec<String>,

    /// Expose a Prometheus `/metrics` endpoint (default: false)
    pub metrics: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
            metrics: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory that receives one PNG file per successful capture
    pub screenshots_dir: PathBuf,

    /// Also keep a base64 copy of the image on the record (default: true)
    ///
    /// Lets API clients render a capture without a second fetch.
    pub inline_images: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            screenshots_dir: PathBuf::from("screenshots"),
            inline_images: true,
        }
    }
}

/// Headless Chrome launch settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrowserSettings {
    /// Path to Chrome/Chromium executable (default: auto-detect)
    pub chrome_path: Option<String>,

    /// Run without a visible window (default: true)
    pub headless: bool,

    /// Navigation timeout used when a request does not carry its own (default: 30s)
    pub navigation_timeout_ms: u64,

    /// Custom User-Agent string for requests (default: Chrome default)
    pub user_agent: Option<String>,

    /// Viewport used when a request does not carry its own
    pub default_viewport: Viewport,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            chrome_path: None,
            headless: true,
            navigation_timeout_ms: 30_000,
            user_agent: None,
            default_viewport: Viewport::default(),
        }
    }
}

/// Limits every capture request is checked against before it reaches the browser
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CaptureLimits {
    /// Largest accepted batch (default: 100)
    pub max_batch_size: usize,

    /// Captures of one batch that may run at the same time (default: CPU count)
    pub batch_concurrency: usize,

    /// Quiet period after which the network counts as idle (default: 500ms)
    pub network_idle_window_ms: u64,

    /// Headroom beyond timeout and delay for opening and disposing a browser context (default: 5s)
    pub context_grace_ms: u64,

    pub max_delay_ms: u64,
    pub min_timeout_ms: u64,
    pub max_timeout_ms: u64,
    pub max_viewport_width: u32,
    pub max_viewport_height: u32,
}

impl Default for CaptureLimits {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            batch_concurrency: num_cpus::get().clamp(1, 8),
            network_idle_window_ms: 500,
            context_grace_ms: 5_000,
            max_delay_ms: 60_000,
            min_timeout_ms: 1_000,
            max_timeout_ms: 300_000,
            max_viewport_width: 7680,
            max_viewport_height: 4320,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Request header that carries the API key
    pub header_name: String,

    /// Fixed prefix of every issued key
    pub key_prefix: String,

    /// bcrypt work factor (4..=31)
    pub bcrypt_cost: u32,

    /// Reject unauthenticated calls instead of treating them as anonymous
    pub require_api_key: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            header_name: "X-API-Key".to_string(),
            key_prefix: "sk_live_".to_string(),
            bcrypt_cost: 12,
            require_api_key: false,
        }
    }
}

impl AuthConfig {
    /// Length of the displayable key prefix: the fixed prefix plus eight characters
    pub fn display_prefix_len(&self) -> usize {
        self.key_prefix.len() + 8
    }
}

impl Config {
    /// Load configuration from a JSON file, or defaults when no path is given,
    /// then apply environment overrides
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config: Self = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                serde_json::from_str(&content)?
            }
            None => Self::default(),
        };
        config.apply_env_from(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Override settings from environment-style variables
    ///
    /// Recognized: `DATABASE_URL`, `SCREENSHOTS_DIR`, `API_HOST`, `API_PORT`,
    /// `CORS_ORIGINS` (comma separated), `CHROME_PATH`, `BROWSER_HEADLESS`,
    /// `NAVIGATION_TIMEOUT_MS`, `API_KEY_REQUIRED`, `API_KEY_HEADER_NAME` and
    /// `API_KEY_PREFIX`.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(url) = var("DATABASE_URL") {
            self.database_url = url;
        }
        if let Some(dir) = var("SCREENSHOTS_DIR") {
            self.storage.screenshots_dir = PathBuf::from(dir);
        }
        if let Some(host) = var("API_HOST") {
            self.server.host = host;
        }
        if let Some(port) = var("API_PORT") {
            self.server.port = parse_env("API_PORT", &port)?;
        }
        if let Some(origins) = var("CORS_ORIGINS") {
            self.server.cors_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(path) = var("CHROME_PATH") {
            self.browser.chrome_path = Some(path);
        }
        if let Some(headless) = var("BROWSER_HEADLESS") {
            self.browser.headless = parse_env_flag("BROWSER_HEADLESS", &headless)?;
        }
        if let Some(timeout) = var("NAVIGATION_TIMEOUT_MS") {
            self.browser.navigation_timeout_ms = parse_env("NAVIGATION_TIMEOUT_MS", &timeout)?;
        }
        if let Some(required) = var("API_KEY_REQUIRED") {
            self.auth.require_api_key = parse_env_flag("API_KEY_REQUIRED", &required)?;
        }
        if let Some(header) = var("API_KEY_HEADER_NAME") {
            self.auth.header_name = header;
        }
        if let Some(prefix) = var("API_KEY_PREFIX") {
            self.auth.key_prefix = prefix;
        }

        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database_url.is_empty() {
            anyhow::bail!("database_url must not be empty");
        }

        let capture = &self.capture;
        if capture.max_batch_size == 0 {
            anyhow::bail!("capture.max_batch_size must be greater than 0");
        }
        if capture.batch_concurrency == 0 {
            anyhow::bail!("capture.batch_concurrency must be greater than 0");
        }
        if capture.min_timeout_ms == 0 || capture.min_timeout_ms > capture.max_timeout_ms {
            anyhow::bail!("capture.min_timeout_ms must be in 1..=max_timeout_ms");
        }
        if capture.max_viewport_width == 0 || capture.max_viewport_height == 0 {
            anyhow::bail!("capture viewport bounds must be greater than 0");
        }

        let browser = &self.browser;
        if browser.navigation_timeout_ms < capture.min_timeout_ms
            || browser.navigation_timeout_ms > capture.max_timeout_ms
        {
            anyhow::bail!(
                "browser.navigation_timeout_ms must be within {}..={}",
                capture.min_timeout_ms,
                capture.max_timeout_ms
            );
        }
        if browser.default_viewport.width == 0
            || browser.default_viewport.width > capture.max_viewport_width
            || browser.default_viewport.height == 0
            || browser.default_viewport.height > capture.max_viewport_height
        {
            anyhow::bail!("browser.default_viewport is outside the capture bounds");
        }

        if !(4..=31).contains(&self.auth.bcrypt_cost) {
            anyhow::bail!("auth.bcrypt_cost must be within 4..=31");
        }
        if self.auth.header_name.trim().is_empty() {
            anyhow::bail!("auth.header_name must not be empty");
        }
        if self.auth.key_prefix.is_empty() || !self.auth.key_prefix.is_ascii() {
            anyhow::bail!("auth.key_prefix must be a non-empty ASCII string");
        }

        Ok(())
    }
}

fn parse_env<T>(name: &str, value: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("{name}={value:?} is invalid: {e}"))
}

fn parse_env_flag(name: &str, value: &str) -> anyhow::Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => anyhow::bail!("{name}={value:?} is not a boolean"),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database_url: "sqlite://screenshots.db?mode=rwc".to_string(),
            storage: StorageConfig::default(),
            browser: BrowserSettings::default(),
            capture: CaptureLimits::default(),
            auth: AuthConfig::default(),
        }
    }
}

/// Browser viewport in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Viewport {
    /// Viewport width in pixels (default: 1920)
    pub width: u32,

    /// Viewport height in pixels (default: 1080)
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

/// Whether the capture covers the visible viewport or the whole scrollable page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    #[default]
    Viewport,
    FullPage,
}

/// Readiness condition awaited after navigation and before the capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitPolicy {
    /// No network activity for the idle window
    NetworkIdle,
    /// The DOM has been parsed
    DomContentLoaded,
    /// The load event has fired
    Load,
    /// The navigation was committed
    Commit,
    /// An element matching the selector exists
    Selector(String),
}

impl WaitPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitPolicy::NetworkIdle => "networkidle",
            WaitPolicy::DomContentLoaded => "domcontentloaded",
            WaitPolicy::Load => "load",
            WaitPolicy::Commit => "commit",
            WaitPolicy::Selector(_) => "selector",
        }
    }

    /// Build a policy from its wire name and the optional selector
    ///
    /// A selector must be present exactly when the policy is `selector`.
    pub fn parse(name: &str, selector: Option<&str>) -> Result<Self> {
        let selector = selector.map(str::trim).filter(|s| !s.is_empty());
        let policy = match (name.to_ascii_lowercase().as_str(), selector) {
            ("selector", Some(sel)) => WaitPolicy::Selector(sel.to_string()),
            ("selector", None) => {
                return Err(AppError::Validation(
                    "wait_selector is required when wait_strategy is 'selector'".to_string(),
                ))
            }
            (_, Some(_)) => {
                return Err(AppError::Validation(
                    "wait_selector is only allowed when wait_strategy is 'selector'".to_string(),
                ))
            }
            ("networkidle", None) => WaitPolicy::NetworkIdle,
            ("domcontentloaded", None) => WaitPolicy::DomContentLoaded,
            ("load", None) => WaitPolicy::Load,
            ("commit", None) => WaitPolicy::Commit,
            (other, None) => {
                return Err(AppError::Validation(format!(
                    "unknown wait_strategy '{other}' (expected networkidle, domcontentloaded, load, commit or selector)"
                )))
            }
        };
        Ok(policy)
    }
}

impl FromStr for WaitPolicy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        WaitPolicy::parse(s, None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// A fully validated capture request, ready for the engine
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    /// Normalized absolute URL
    pub url: String,
    pub render_mode: RenderMode,
    pub viewport: Viewport,
    pub wait_policy: WaitPolicy,
    /// Settle time after the readiness condition
    pub delay: Duration,
    /// Bound on navigation and the readiness wait; the delay runs after it
    pub timeout: Duration,
    pub extra_headers: HashMap<String, String>,
    pub basic_auth: Option<BasicAuth>,
}

impl CaptureRequest {
    /// Headers to attach to every request the page makes
    ///
    /// Basic credentials become an `Authorization` header unless the caller
    /// supplied one explicitly.
    pub fn request_headers(&self) -> HashMap<String, String> {
        use base64::Engine as _;

        let mut headers = self.extra_headers.clone();
        if let Some(auth) = &self.basic_auth {
            let has_authorization = headers
                .keys()
                .any(|k| k.eq_ignore_ascii_case("authorization"));
            if !has_authorization {
                let token = base64::engine::general_purpose::STANDARD
                    .encode(format!("{}:{}", auth.username, auth.password));
                headers.insert("Authorization".to_string(), format!("Basic {token}"));
            }
        }
        headers
    }
}

/// Caller-supplied capture options, as received by the API and the CLI
///
/// Unset fields fall back to the configured defaults in [`CaptureOptions::resolve`].
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CaptureOptions {
    pub full_page: bool,
    pub viewport_width: Option<u32>,
    pub viewport_height: Option<u32>,
    pub wait_strategy: Option<String>,
    pub wait_selector: Option<String>,
    pub delay_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub auth_headers: Option<HashMap<String, String>>,
    pub basic_auth: Option<BasicAuth>,
}

impl CaptureOptions {
    /// Check the options against the configured bounds and bind them to a URL
    pub fn resolve(&self, url: &str, config: &Config) -> Result<CaptureRequest> {
        let limits = &config.capture;
        let url = crate::utils::normalize_url(url)?;

        let width = self
            .viewport_width
            .unwrap_or(config.browser.default_viewport.width);
        let height = self
            .viewport_height
            .unwrap_or(config.browser.default_viewport.height);
        if !(1..=limits.max_viewport_width).contains(&width) {
            return Err(AppError::Validation(format!(
                "viewport_width must be within 1..={}",
                limits.max_viewport_width
            )));
        }
        if !(1..=limits.max_viewport_height).contains(&height) {
            return Err(AppError::Validation(format!(
                "viewport_height must be within 1..={}",
                limits.max_viewport_height
            )));
        }

        let delay_ms = self.delay_ms.unwrap_or(0);
        if delay_ms > limits.max_delay_ms {
            return Err(AppError::Validation(format!(
                "delay_ms must be within 0..={}",
                limits.max_delay_ms
            )));
        }

        let timeout_ms = self
            .timeout_ms
            .unwrap_or(config.browser.navigation_timeout_ms);
        if !(limits.min_timeout_ms..=limits.max_timeout_ms).contains(&timeout_ms) {
            return Err(AppError::Validation(format!(
                "timeout_ms must be within {}..={}",
                limits.min_timeout_ms, limits.max_timeout_ms
            )));
        }

        let wait_policy = WaitPolicy::parse(
            self.wait_strategy.as_deref().unwrap_or("networkidle"),
            self.wait_selector.as_deref(),
        )?;

        let extra_headers = self.auth_headers.clone().unwrap_or_default();
        if let Some(name) = extra_headers.keys().find(|k| k.trim().is_empty()) {
            return Err(AppError::Validation(format!("invalid header name '{name}'")));
        }

        Ok(CaptureRequest {
            url,
            render_mode: if self.full_page {
                RenderMode::FullPage
            } else {
                RenderMode::Viewport
            },
            viewport: Viewport { width, height },
            wait_policy,
            delay: Duration::from_millis(delay_ms),
            timeout: Duration::from_millis(timeout_ms),
            extra_headers,
            basic_auth: self.basic_auth.clone(),
        })
    }
}

/// Generate Chrome command-line arguments based on configuration
///
/// The user data directory is unique per process so that several services
/// on one host never share a Chrome profile.
pub fn get_chrome_args(config: &Config) -> Vec<String> {
    let viewport = config.browser.default_viewport;

    let mut args = vec![
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        "--disable-background-timer-throttling".to_string(),
        "--disable-backgrounding-occluded-windows".to_string(),
        "--disable-renderer-backgrounding".to_string(),
        "--disable-features=TranslateUI".to_string(),
        "--disable-extensions".to_string(),
        "--disable-default-apps".to_string(),
        "--disable-sync".to_string(),
        "--no-first-run".to_string(),
        "--hide-scrollbars".to_string(),
        "--ignore-certificate-errors".to_string(),
        format!("--window-size={},{}", viewport.width, viewport.height),
    ];

    if let Some(user_agent) = &config.browser.user_agent {
        args.push(format!("--user-agent={user_agent}"));
    }

    args
}

pub fn create_browser_config(config: &Config) -> Result<chromiumoxide::browser::BrowserConfig> {
    use chromiumoxide::browser::BrowserConfig;

    let viewport = config.browser.default_viewport;
    let user_data_dir =
        std::env::temp_dir().join(format!("statusshot-chrome-{}", std::process::id()));

    let mut builder = BrowserConfig::builder()
        .window_size(viewport.width, viewport.height)
        .request_timeout(Duration::from_millis(config.capture.max_timeout_ms))
        .user_data_dir(user_data_dir)
        .args(get_chrome_args(config));

    if !config.browser.headless {
        builder = builder.with_head();
    }

    if let Some(chrome_path) = &config.browser.chrome_path {
        builder = builder.chrome_executable(chrome_path);
    }

    builder.build().map_err(AppError::Browser)
}
