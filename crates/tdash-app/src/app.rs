//! Main application loop.
//!
//! Mounts the dashboard, logs a status line on a fixed interval, counts
//! feed updates and errors as they are published, and applies line
//! commands read from an input stream (stdin for the binary).

use crate::config::AppConfig;
use crate::dashboard::{Dashboard, Feed, RetryAffordance};
use crate::error::{AppError, AppResult};
use crate::session::Session;
use std::str::FromStr;
use std::time::Duration;
use tdash_core::{ConnectionState, TimeRange};
use tdash_telemetry::Metrics;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Retry,
    Reset,
    Range(TimeRange),
    Symbol(String),
    Status,
    Metrics,
    Quit,
}

impl FromStr for Command {
    type Err = AppError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let verb = parts
            .next()
            .ok_or_else(|| AppError::Command("empty command".to_string()))?;
        let arg = parts.next();

        let command = match (verb.to_ascii_lowercase().as_str(), arg) {
            ("retry", None) => Self::Retry,
            ("reset", None) => Self::Reset,
            ("status", None) => Self::Status,
            ("metrics", None) => Self::Metrics,
            ("quit" | "exit", None) => Self::Quit,
            ("range", Some(range)) => Self::Range(range.parse::<TimeRange>()?),
            ("symbol", Some(symbol)) => Self::Symbol(symbol.to_string()),
            (other, _) => {
                return Err(AppError::Command(format!(
                    "unknown command or wrong arguments: {other}"
                )))
            }
        };

        if parts.next().is_some() {
            return Err(AppError::Command(format!("too many arguments: {line}")));
        }
        Ok(command)
    }
}

/// Main application.
pub struct Application {
    config: AppConfig,
    dashboard: Dashboard,
    shutdown: CancellationToken,
}

impl Application {
    /// Mount the dashboard. Must be called inside a tokio runtime.
    pub fn new(config: AppConfig, session: &Session) -> Self {
        let dashboard = Dashboard::from_config(&config, session);
        Self::with_dashboard(config, dashboard)
    }

    pub fn with_dashboard(config: AppConfig, dashboard: Dashboard) -> Self {
        Self {
            config,
            dashboard,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn dashboard(&self) -> &Dashboard {
        &self.dashboard
    }

    /// Token that stops [`run`](Self::run) when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Apply one command. Returns false when the application should stop.
    pub fn execute(&mut self, command: Command) -> AppResult<bool> {
        match command {
            Command::Retry => match self.dashboard.retry() {
                Ok(()) => info!("Retry requested"),
                Err(denied) => warn!(%denied, "Retry not available"),
            },
            Command::Reset => {
                if let Err(denied) = self.dashboard.reset_connection() {
                    warn!(%denied, "Reset did not restart every feed");
                }
            }
            Command::Range(range) => self.dashboard.set_time_range(range),
            Command::Symbol(symbol) => self.dashboard.set_symbol(&symbol)?,
            Command::Status => self.log_status(),
            Command::Metrics => {
                self.dashboard.record_metrics();
                println!("{}", Metrics::render()?);
            }
            Command::Quit => return Ok(false),
        }
        Ok(true)
    }

    /// One status line plus the alert and retry affordance when relevant.
    pub fn log_status(&self) {
        let status = self.dashboard.status();
        let summary = self.dashboard.summary();
        info!(status = %status, summary = %summary, "Dashboard status");

        if let Some(alert) = self.dashboard.alert() {
            warn!(%alert, "Feed alert");
        }
        match self.dashboard.retry_affordance() {
            RetryAffordance::Hidden => {}
            RetryAffordance::Available => info!("Type `retry` to reconnect"),
            RetryAffordance::CoolingDown { remaining_secs } => {
                info!(remaining_secs, "Retry cooling down; type `reset` to override")
            }
        }
    }

    /// Run until `quit`, end of input, or the shutdown token fires; then
    /// unmount the dashboard.
    pub async fn run<R>(mut self, input: R) -> AppResult<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let interval = Duration::from_millis(self.config.telemetry.status_interval_ms);
        let mut status_tick = tokio::time::interval(interval);
        let mut lines = input.lines();
        let mut input_open = true;
        let mut prices_rx = self.dashboard.subscribe(Feed::Prices);
        let mut positions_rx = self.dashboard.subscribe(Feed::Positions);
        let shutdown = self.shutdown.clone();

        info!(
            interval_ms = self.config.telemetry.status_interval_ms,
            "Entering main loop"
        );

        loop {
            tokio::select! {
                biased;

                () = shutdown.cancelled() => {
                    info!("Shutdown signal received");
                    break;
                }

                changed = prices_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    record_change(Feed::Prices, &mut prices_rx);
                }

                changed = positions_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    record_change(Feed::Positions, &mut positions_rx);
                }

                _ = status_tick.tick() => {
                    self.dashboard.record_metrics();
                    self.log_status();
                }

                line = lines.next_line(), if input_open => {
                    match line {
                        Ok(Some(line)) if line.trim().is_empty() => {}
                        Ok(Some(line)) => match line.parse::<Command>() {
                            Ok(command) => match self.execute(command) {
                                Ok(true) => {}
                                Ok(false) => break,
                                Err(e) => warn!(error = %e, "Command failed"),
                            },
                            Err(e) => warn!(error = %e, "Invalid command"),
                        },
                        Ok(None) => {
                            info!("Input closed");
                            input_open = false;
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to read input");
                            input_open = false;
                        }
                    }
                }
            }
        }

        self.dashboard.unmount().await;
        info!("Application stopped");
        Ok(())
    }
}

fn record_change(feed: Feed, rx: &mut watch::Receiver<ConnectionState>) {
    let state = rx.borrow_and_update();
    if let Some(error) = &state.error {
        Metrics::feed_error(feed.as_str(), error.kind().as_str());
    } else if state.data.is_some() {
        Metrics::feed_update(feed.as_str());
    }
}
