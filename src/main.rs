use clap::Parser;
use statusshot::{setup_logging, Cli, CliRunner, Config};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Cli::parse();

    setup_logging(args.verbose)?;

    info!("Starting statusshot v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args)?;
    let runner = CliRunner::new(config);

    if let Err(e) = runner.run(args.command).await {
        error!("Application error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

fn load_config(args: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::load(args.config.as_deref())?;
    args.apply_overrides(&mut config);
    config.validate()?;

    info!("Configuration loaded successfully");
    info!("Database: {}", config.database_url);
    info!(
        "Navigation timeout: {}ms, batch concurrency: {}",
        config.browser.navigation_timeout_ms, config.capture.batch_concurrency
    );

    Ok(config)
}
