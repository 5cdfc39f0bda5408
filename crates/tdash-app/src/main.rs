//! tdash - Entry Point
//!
//! Mounts the price and position feeds, logs status on an interval and
//! reads operator commands from stdin.

use anyhow::Result;
use clap::Parser;
use tdash_app::{AppConfig, Application, Session};
use tdash_core::TimeRange;
use tokio::io::BufReader;
use tracing::{info, warn};

/// Headless trading dashboard feeds
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via TDASH_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Trading pair to chart (e.g. SOL/USD)
    #[arg(short, long)]
    symbol: Option<String>,

    /// Chart window: 1H, 24H, 7D or 30D
    #[arg(short = 'r', long)]
    time_range: Option<TimeRange>,

    /// Backend base URL (ws:// or wss://); mock feeds when unset
    #[arg(short, long)]
    backend: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Determine config path: CLI arg > TDASH_CONFIG env var > default
    let config_path = AppConfig::resolve_path(args.config);
    let mut config = AppConfig::load(&config_path)?;

    if let Some(symbol) = args.symbol {
        config.feed.symbol = symbol;
    }
    if let Some(time_range) = args.time_range {
        config.feed.time_range = time_range;
    }
    if let Some(backend) = args.backend {
        config.feed.backend_url = Some(backend);
    }
    config.validate()?;

    // Initialize logging
    tdash_telemetry::init_logging(config.telemetry.log_level.as_deref())?;

    info!("Starting tdash v{}", env!("CARGO_PKG_VERSION"));
    info!(
        config_path = %config_path,
        symbol = %config.feed.symbol,
        time_range = %config.feed.time_range,
        backend = config.feed.backend_url.as_deref().unwrap_or("mock"),
        "Configuration loaded"
    );

    let session = Session::from_env(&config.session.token_env);
    if config.feed.backend_url.is_some() && !session.is_authenticated() {
        warn!(env = %config.session.token_env, "Backend configured without a session token");
    }

    let app = Application::new(config, &session);

    let shutdown = app.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.cancel();
        }
    });

    app.run(BufReader::new(tokio::io::stdin())).await?;

    Ok(())
}
