//! Headless trading dashboard.
//!
//! Owns the price feed (for the selected symbol and time range) and the
//! position feed, derives the connectivity status shown in the header, and
//! exposes the retry controls of the connection indicator.

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::session::Session;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tdash_core::{
    classify, feed_tooltip, Clock, ConnectionState, ConnectivityStatus, FeedError, Stream,
    SystemClock, TimeRange,
};
use tdash_telemetry::Metrics;
use tdash_ws::{spawn_feed, ConnectionConfig, FeedHandle, RetryDenied, TransportFactory};
use tokio::sync::watch;
use tracing::{info, warn};

/// One of the two dashboard feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feed {
    Prices,
    Positions,
}

impl Feed {
    pub const ALL: [Feed; 2] = [Feed::Prices, Feed::Positions];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prices => "prices",
            Self::Positions => "positions",
        }
    }
}

impl fmt::Display for Feed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the connection indicator offers the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "retry", rename_all = "snake_case")]
pub enum RetryAffordance {
    /// Loading or connected; no button.
    Hidden,
    /// "Retry Connection" is enabled.
    Available,
    /// Retries exhausted; the button shows the countdown and
    /// "Reset Connection" is offered.
    CoolingDown { remaining_secs: u64 },
}

/// Summary line derived from the latest payloads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioSummary {
    pub symbol: String,
    pub time_range: TimeRange,
    pub last_price: Option<f64>,
    /// Change over the displayed window, in percent.
    pub change_pct: Option<f64>,
    pub position_count: usize,
    pub total_pnl: f64,
}

impl fmt::Display for PortfolioSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.symbol, self.time_range)?;
        match self.last_price {
            Some(price) => write!(f, " {price:.4}")?,
            None => f.write_str(" --")?,
        }
        if let Some(change) = self.change_pct {
            write!(f, " ({change:+.2}%)")?;
        }
        write!(
            f,
            " | {} position(s), pnl {:+.2}",
            self.position_count, self.total_pnl
        )
    }
}

/// The mounted dashboard. Dropping it stops both feeds.
pub struct Dashboard {
    symbol: String,
    time_range: TimeRange,
    prices: FeedHandle,
    positions: FeedHandle,
    /// Automatic reconnects already exported, per feed in `Feed::ALL` order.
    reported_reconnects: [AtomicU64; 2],
}

impl Dashboard {
    /// Mount with the configured backend, the session's credentials and the
    /// system clock. Must be called inside a tokio runtime.
    pub fn from_config(config: &AppConfig, session: &Session) -> Self {
        Self::mount(
            config.connection_config(),
            config.feed.symbol.clone(),
            config.feed.time_range,
            Arc::new(SystemClock),
            Arc::new(session.transport_factory()),
        )
    }

    /// Spawn both feeds and subscribe them. Must be called inside a tokio
    /// runtime.
    pub fn mount(
        connection: ConnectionConfig,
        symbol: String,
        time_range: TimeRange,
        clock: Arc<dyn Clock>,
        transports: Arc<dyn TransportFactory>,
    ) -> Self {
        let prices = spawn_feed(connection.clone(), clock.clone(), transports.clone());
        let positions = spawn_feed(connection, clock, transports);

        prices.open(Stream::prices(symbol.clone(), time_range));
        positions.open(Stream::positions());
        info!(%symbol, %time_range, "Dashboard mounted");

        Self {
            symbol,
            time_range,
            prices,
            positions,
            reported_reconnects: [AtomicU64::new(0), AtomicU64::new(0)],
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn time_range(&self) -> TimeRange {
        self.time_range
    }

    pub fn feed(&self, feed: Feed) -> &FeedHandle {
        match feed {
            Feed::Prices => &self.prices,
            Feed::Positions => &self.positions,
        }
    }

    pub fn state(&self, feed: Feed) -> ConnectionState {
        self.feed(feed).state()
    }

    pub fn subscribe(&self, feed: Feed) -> watch::Receiver<ConnectionState> {
        self.feed(feed).subscribe()
    }

    /// Switch the price chart to another trading pair.
    pub fn set_symbol(&mut self, symbol: &str) -> AppResult<()> {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Err(AppError::Command("symbol must not be empty".to_string()));
        }
        if symbol == self.symbol {
            return Ok(());
        }
        self.symbol = symbol.to_string();
        info!(symbol = %self.symbol, "Symbol changed");
        self.reopen_prices();
        Ok(())
    }

    /// Switch the price chart window.
    pub fn set_time_range(&mut self, time_range: TimeRange) {
        if time_range == self.time_range {
            return;
        }
        self.time_range = time_range;
        info!(%time_range, "Time range changed");
        self.reopen_prices();
    }

    fn reopen_prices(&self) {
        self.prices
            .open(Stream::prices(self.symbol.clone(), self.time_range));
    }

    pub fn status(&self) -> ConnectivityStatus {
        classify(self.prices.connectivity(), self.positions.connectivity())
    }

    pub fn tooltip(&self) -> String {
        feed_tooltip(self.prices.connectivity(), self.positions.connectivity())
    }

    /// "Retry Connection": retry every feed that is not connected.
    ///
    /// Both feeds are attempted; the first denial is returned.
    pub fn retry(&self) -> Result<(), RetryDenied> {
        let mut denied = None;
        for feed in Feed::ALL {
            let handle = self.feed(feed);
            if handle.connectivity() == Some(true) {
                continue;
            }
            match handle.retry() {
                Ok(()) => Metrics::reconnect(feed.as_str(), "manual"),
                Err(e) => {
                    warn!(%feed, reason = %e, "Retry denied");
                    denied.get_or_insert(e);
                }
            }
        }
        denied.map_or(Ok(()), Err)
    }

    /// "Reset Connection": clear both retry policies, then retry.
    pub fn reset_connection(&self) -> Result<(), RetryDenied> {
        info!("Resetting connection");
        for feed in Feed::ALL {
            self.feed(feed).reset_retry();
            Metrics::reconnect(feed.as_str(), "reset");
        }
        self.retry()
    }

    pub fn retry_affordance(&self) -> RetryAffordance {
        if !self.status().needs_retry() {
            return RetryAffordance::Hidden;
        }
        let cooldown = Feed::ALL
            .iter()
            .map(|feed| self.feed(*feed).retry_state())
            .filter(|state| state.exhausted)
            .map(|state| state.cooldown_remaining)
            .max();
        match cooldown {
            Some(remaining_secs) => RetryAffordance::CoolingDown { remaining_secs },
            None => RetryAffordance::Available,
        }
    }

    /// Alert line under the status indicator.
    pub fn alert(&self) -> Option<FeedError> {
        let exhausted = Feed::ALL
            .iter()
            .map(|feed| self.feed(*feed).retry_state())
            .find(|state| state.exhausted);
        if let Some(state) = exhausted {
            return Some(FeedError::MaxRetriesExceeded {
                attempts: state.attempts,
            });
        }
        self.prices.state().error.or(self.positions.state().error)
    }

    pub fn summary(&self) -> PortfolioSummary {
        let prices = self.prices.state();
        let positions = self.positions.state();

        let series = prices
            .data
            .as_ref()
            .and_then(|d| d.as_prices())
            .unwrap_or_default();
        let last_price = series.last().map(|p| p.price);
        let change_pct = match (series.first(), series.last()) {
            (Some(first), Some(last)) if series.len() > 1 && first.price != 0.0 => {
                Some((last.price - first.price) / first.price * 100.0)
            }
            _ => None,
        };

        let held = positions
            .data
            .as_ref()
            .and_then(|d| d.as_positions())
            .unwrap_or_default();

        PortfolioSummary {
            symbol: self.symbol.clone(),
            time_range: self.time_range,
            last_price,
            change_pct,
            position_count: held.len(),
            total_pnl: held.iter().map(|p| p.pnl).sum(),
        }
    }

    /// Publish gauges for both feeds and the derived status, and count the
    /// automatic reconnects scheduled since the last call.
    pub fn record_metrics(&self) {
        for (feed, reported) in Feed::ALL.into_iter().zip(&self.reported_reconnects) {
            let handle = self.feed(feed);
            let total = handle.auto_reconnects();
            let previous = reported.swap(total, Ordering::Relaxed);
            if total > previous {
                Metrics::reconnects(feed.as_str(), "auto", total - previous);
            }
            Metrics::feed_connected(feed.as_str(), handle.connectivity() == Some(true));
            Metrics::feed_phase_set(feed.as_str(), handle.phase().as_str());
            Metrics::retry_cooldown(feed.as_str(), handle.retry_state().cooldown_remaining);
        }
        Metrics::dashboard_status_set(self.status().as_str());
    }

    /// Stop both feeds and wait for them to release their connections.
    pub async fn unmount(self) {
        info!("Unmounting dashboard");
        self.prices.shutdown().await;
        self.positions.shutdown().await;
    }
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        self.prices.stop();
        self.positions.stop();
    }
}

impl fmt::Debug for Dashboard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dashboard")
            .field("symbol", &self.symbol)
            .field("time_range", &self.time_range)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_display() {
        let summary = PortfolioSummary {
            symbol: "SOL/USD".to_string(),
            time_range: TimeRange::OneDay,
            last_price: Some(101.25),
            change_pct: Some(1.25),
            position_count: 1,
            total_pnl: 25.0,
        };
        assert_eq!(
            summary.to_string(),
            "SOL/USD [24H] 101.2500 (+1.25%) | 1 position(s), pnl +25.00"
        );
    }

    #[test]
    fn test_affordance_serialization() {
        let affordance = RetryAffordance::CoolingDown { remaining_secs: 12 };
        let json = serde_json::to_value(affordance).unwrap();
        assert_eq!(json["retry"], "cooling_down");
        assert_eq!(json["remaining_secs"], 12);
    }
}
