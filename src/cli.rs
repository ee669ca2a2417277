use crate::{
    api::{router, AppState},
    auth::KeyAuthenticator,
    browser_session::BrowserSession,
    config::{CaptureOptions, Config},
    engine::{CaptureEngine, ChromeEngine},
    models::CaptureResult,
    screenshot_service::ScreenshotService,
    store::Store,
};
use anyhow::Context;
use chrono::{Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "statusshot")]
#[command(about = "Web screenshot validation service")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, help = "Configuration file path (JSON)")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(long, global = true, help = "SQLite database URL")]
    pub database_url: Option<String>,

    #[arg(long, global = true, help = "Chrome executable path")]
    pub chrome_path: Option<String>,

    #[arg(long, global = true, help = "Default navigation timeout in seconds")]
    pub timeout: Option<u64>,
}

impl Cli {
    /// Apply the global flags on top of a loaded configuration
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(database_url) = &self.database_url {
            config.database_url = database_url.clone();
        }
        if let Some(chrome_path) = &self.chrome_path {
            config.browser.chrome_path = Some(chrome_path.clone());
        }
        if let Some(timeout) = self.timeout {
            config.browser.navigation_timeout_ms = timeout.saturating_mul(1000);
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API server
    Serve {
        #[arg(long, help = "Bind address")]
        host: Option<String>,

        #[arg(short, long, help = "Port to listen on")]
        port: Option<u16>,

        #[arg(long, help = "Expose Prometheus metrics on /metrics")]
        metrics: bool,
    },

    /// Capture a single URL and record the attempt
    Capture {
        #[arg(short, long, help = "URL to capture")]
        url: String,

        #[command(flatten)]
        options: CaptureArgs,
    },

    /// Capture every URL listed in a file (one per line)
    Batch {
        #[arg(short, long, help = "Input file containing URLs (one per line)")]
        input: PathBuf,

        #[command(flatten)]
        options: CaptureArgs,
    },

    /// Print aggregate capture statistics
    Stats,

    /// Manage API keys
    Keys {
        #[command(subcommand)]
        command: KeyCommands,
    },

    /// Validate a configuration file (defaults to the one given with --config)
    Validate {
        #[arg(help = "Configuration file to validate")]
        file: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum KeyCommands {
    /// Create a key; the plaintext is printed once
    Create {
        name: String,

        #[arg(long)]
        description: Option<String>,

        #[arg(long, help = "Expire the key after this many days")]
        expires_in_days: Option<i64>,
    },

    /// List keys, newest first
    List {
        #[arg(long, help = "Include revoked keys")]
        include_inactive: bool,
    },

    /// Revoke a key
    Revoke { id: i64 },

    /// Reactivate a revoked key
    Reactivate { id: i64 },
}

#[derive(Debug, Clone, Default, clap::Args)]
pub struct CaptureArgs {
    #[arg(long, help = "Capture the full scrollable page")]
    pub full_page: bool,

    #[arg(long, help = "Viewport width")]
    pub width: Option<u32>,

    #[arg(long, help = "Viewport height")]
    pub height: Option<u32>,

    #[arg(long, help = "Readiness condition (networkidle, domcontentloaded, load, commit, selector)")]
    pub wait: Option<String>,

    #[arg(long, help = "CSS selector for --wait selector")]
    pub selector: Option<String>,

    #[arg(long, help = "Extra delay after readiness, in milliseconds")]
    pub delay: Option<u64>,

    #[arg(long, help = "Capture timeout in milliseconds")]
    pub timeout_ms: Option<u64>,
}

impl CaptureArgs {
    pub fn to_options(&self) -> CaptureOptions {
        CaptureOptions {
            full_page: self.full_page,
            viewport_width: self.width,
            viewport_height: self.height,
            wait_strategy: self.wait.clone(),
            wait_selector: self.selector.clone(),
            delay_ms: self.delay,
            timeout_ms: self.timeout_ms,
            ..Default::default()
        }
    }
}

pub struct CliRunner {
    pub config: Arc<Config>,
}

impl CliRunner {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub async fn run(&self, command: Commands) -> anyhow::Result<()> {
        match command {
            Commands::Serve {
                host,
                port,
                metrics,
            } => self.run_server(host, port, metrics).await,
            Commands::Capture { url, options } => self.run_capture(&url, &options.to_options()).await,
            Commands::Batch { input, options } => self.run_batch(&input, &options.to_options()).await,
            Commands::Stats => self.show_statistics().await,
            Commands::Keys { command } => self.run_keys(command).await,
            Commands::Validate { file: Some(file) } => validate_config_file(&file),
            Commands::Validate { file: None } => {
                self.config.validate()?;
                println!("Configuration is valid");
                Ok(())
            }
        }
    }

    async fn open_store(&self) -> anyhow::Result<Store> {
        let store = Store::connect(&self.config.database_url)
            .await
            .with_context(|| format!("opening database {}", self.config.database_url))?;
        store.migrate().await.context("applying migrations")?;
        Ok(store)
    }

    async fn start_browser(&self) -> anyhow::Result<(Arc<BrowserSession>, Arc<dyn CaptureEngine>)> {
        let session = Arc::new(BrowserSession::new((*self.config).clone()));
        session.start().await.context("starting Chrome")?;
        let engine: Arc<dyn CaptureEngine> = Arc::new(ChromeEngine::new(
            session.clone(),
            Duration::from_millis(self.config.capture.network_idle_window_ms),
        ));
        Ok((session, engine))
    }

    pub async fn run_server(
        &self,
        host: Option<String>,
        port: Option<u16>,
        metrics: bool,
    ) -> anyhow::Result<()> {
        let mut config = (*self.config).clone();
        if let Some(host) = host {
            config.server.host = host;
        }
        if let Some(port) = port {
            config.server.port = port;
        }
        config.server.metrics |= metrics;
        let config = Arc::new(config);

        let store = self.open_store().await?;
        tokio::fs::create_dir_all(&config.storage.screenshots_dir)
            .await
            .with_context(|| {
                format!(
                    "creating screenshot directory {}",
                    config.storage.screenshots_dir.display()
                )
            })?;

        let (session, engine) = self.start_browser().await?;

        let metrics = if config.server.metrics {
            Some(crate::metrics::install_recorder()?)
        } else {
            None
        };

        let state = AppState {
            service: Arc::new(ScreenshotService::new(engine, store.clone(), config.clone())),
            keys: Arc::new(KeyAuthenticator::new(store.clone(), config.auth.clone())),
            config: config.clone(),
            metrics,
        };
        let app = router(state);

        let addr = format!("{}:{}", config.server.host, config.server.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("binding {addr}"))?;
        info!("Listening on http://{}", addr);

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        info!("Shutting down...");
        session.stop().await;
        store.close().await;

        served.context("serving HTTP")
    }

    pub async fn run_capture(&self, url: &str, options: &CaptureOptions) -> anyhow::Result<()> {
        let store = self.open_store().await?;
        let (session, engine) = self.start_browser().await?;
        let service = ScreenshotService::new(engine, store.clone(), self.config.clone());

        let result = service.capture(url, options).await;
        session.stop().await;
        store.close().await;

        print_result(&result?);
        Ok(())
    }

    pub async fn run_batch(&self, input: &Path, options: &CaptureOptions) -> anyhow::Result<()> {
        let urls = read_urls_from_file(input).await?;
        if urls.is_empty() {
            anyhow::bail!("{} contains no URLs", input.display());
        }
        info!("Loaded {} URLs from {}", urls.len(), input.display());

        let store = self.open_store().await?;
        let (session, engine) = self.start_browser().await?;
        let service = ScreenshotService::new(engine, store.clone(), self.config.clone());

        let mut successful = 0;
        let mut failed = 0;
        let mut outcome = Ok(());
        for chunk in urls.chunks(self.config.capture.max_batch_size) {
            match service.capture_batch(chunk, options).await {
                Ok(batch) => {
                    batch.results.iter().for_each(print_result);
                    successful += batch.successful;
                    failed += batch.failed;
                }
                Err(e) => {
                    error!("Batch aborted: {}", e);
                    outcome = Err(e.into());
                    break;
                }
            }
        }

        session.stop().await;
        store.close().await;

        info!(
            "Batch processing completed. Success: {}, Failed: {}",
            successful, failed
        );
        outcome
    }

    pub async fn show_statistics(&self) -> anyhow::Result<()> {
        let store = self.open_store().await?;
        let stats = store.statistics().await?;
        store.close().await;

        println!("{}", serde_json::to_string_pretty(&stats)?);
        Ok(())
    }

    pub async fn run_keys(&self, command: KeyCommands) -> anyhow::Result<()> {
        let store = self.open_store().await?;
        let keys = KeyAuthenticator::new(store.clone(), self.config.auth.clone());

        let result = match command {
            KeyCommands::Create {
                name,
                description,
                expires_in_days,
            } => {
                let expires_at = match expires_in_days {
                    Some(days) if days <= 0 => {
                        anyhow::bail!("--expires-in-days must be positive")
                    }
                    Some(days) => Some(Utc::now() + ChronoDuration::days(days)),
                    None => None,
                };
                let (api_key, key) = keys
                    .generate(&name, description.as_deref(), expires_at)
                    .await?;
                println!("Created API key {} ({})", api_key.id, api_key.name);
                println!("Key: {}", key);
                println!("Store it now; it cannot be shown again.");
                Ok(())
            }
            KeyCommands::List { include_inactive } => {
                for key in keys.list(include_inactive).await? {
                    println!(
                        "{:>5}  {:<24} {:<18} active={} uses={} last_used={}",
                        key.id,
                        key.name,
                        key.key_prefix,
                        key.is_active,
                        key.request_count,
                        key.last_used_at
                            .map(|at| at.to_rfc3339())
                            .unwrap_or_else(|| "never".to_string())
                    );
                }
                Ok(())
            }
            KeyCommands::Revoke { id } => keys.revoke(id).await.map(|key| {
                println!("Revoked API key {} ({})", key.id, key.name);
            }),
            KeyCommands::Reactivate { id } => keys.reactivate(id).await.map(|key| {
                if key.is_expired(Utc::now()) {
                    warn!("API key {} is reactivated but has expired", key.id);
                }
                println!("Reactivated API key {} ({})", key.id, key.name);
            }),
        };

        store.close().await;
        result.map_err(Into::into)
    }
}

fn validate_config_file(path: &Path) -> anyhow::Result<()> {
    let config = Config::load(Some(path))?;
    config.validate()?;
    println!("Configuration {} is valid", path.display());
    Ok(())
}

/// Read URLs one per line, skipping blanks and `#` comments
pub async fn read_urls_from_file(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(parse_url_list(&content))
}

fn parse_url_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

fn print_result(result: &CaptureResult) {
    if result.success {
        println!(
            "[ok]   {} status={} load={:.0}ms file={}",
            result.url,
            result
                .http_status_code
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string()),
            result.page_load_time_ms.unwrap_or_default(),
            result.file_path.as_deref().unwrap_or("-")
        );
    } else {
        println!(
            "[fail] {} {}",
            result.url,
            result.error_message.as_deref().unwrap_or("unknown error")
        );
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

pub fn setup_logging(verbose: bool) -> anyhow::Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "statusshot={default_level},tower_http={default_level},sqlx=warn,chromiumoxide=warn"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_capture_flags() {
        let cli = Cli::parse_from([
            "statusshot",
            "--database-url",
            "sqlite::memory:",
            "capture",
            "--url",
            "example.com",
            "--full-page",
            "--wait",
            "selector",
            "--selector",
            "#main",
            "--delay",
            "250",
        ]);

        let Commands::Capture { url, options } = &cli.command else {
            panic!("expected capture command");
        };
        assert_eq!(url, "example.com");

        let options = options.to_options();
        assert!(options.full_page);
        assert_eq!(options.wait_strategy.as_deref(), Some("selector"));
        assert_eq!(options.wait_selector.as_deref(), Some("#main"));
        assert_eq!(options.delay_ms, Some(250));

        let mut config = Config::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.database_url, "sqlite::memory:");
    }

    #[test]
    fn test_timeout_override_is_seconds() {
        let cli = Cli::parse_from(["statusshot", "--timeout", "45", "stats"]);
        let mut config = Config::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.browser.navigation_timeout_ms, 45_000);
    }

    #[test]
    fn test_keys_subcommands() {
        let cli = Cli::parse_from(["statusshot", "keys", "create", "ci", "--expires-in-days", "30"]);
        match cli.command {
            Commands::Keys {
                command:
                    KeyCommands::Create {
                        name,
                        expires_in_days,
                        ..
                    },
            } => {
                assert_eq!(name, "ci");
                assert_eq!(expires_in_days, Some(30));
            }
            _ => panic!("expected keys create"),
        }
    }

    #[test]
    fn test_parse_url_list_skips_blanks_and_comments() {
        let urls = parse_url_list("https://a.example\n\n# skipped\n  b.example  \n");
        assert_eq!(urls, vec!["https://a.example", "b.example"]);
    }

    #[tokio::test]
    async fn test_read_urls_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.txt");
        tokio::fs::write(&path, "example.com\nexample.org\n").await.unwrap();

        let urls = read_urls_from_file(&path).await.unwrap();
        assert_eq!(urls.len(), 2);
    }

    #[test]
    fn test_validate_accepts_positional_file() {
        let cli = Cli::parse_from(["statusshot", "validate", "custom.json"]);
        assert!(matches!(
            cli.command,
            Commands::Validate { file: Some(ref file) } if file == Path::new("custom.json")
        ));
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_validate_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.json");
        std::fs::write(&good, r#"{"server": {"port": 9000}}"#).unwrap();
        assert!(validate_config_file(&good).is_ok());

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, r#"{"capture": {"max_batch_size": 0}}"#).unwrap();
        assert!(validate_config_file(&bad).is_err());
    }
}
