//! Mock market data for local development.
//!
//! Stands in for the dashboard backend when no backend URL is configured.
//! The generator is pure: it produces payloads and tick updates on request.
//! Scheduling (initial delay, tick intervals, cancellation) belongs to the
//! connection manager, so mock timers die with the connection that owns them.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tdash_core::{FeedData, Position, PricePoint, Stream, TimeRange};
use tracing::debug;

/// Mock feed configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockConfig {
    /// Delay before the first payload (ms).
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Price tick interval (ms).
    #[serde(default = "default_price_tick_ms")]
    pub price_tick_ms: u64,
    /// Position tick interval (ms).
    #[serde(default = "default_position_tick_ms")]
    pub position_tick_ms: u64,
    /// Number of intervals in the initial series (the series has one more point).
    #[serde(default = "default_points")]
    pub points: u32,
    /// Centre of the initial price jitter.
    #[serde(default = "default_base_price")]
    pub base_price: f64,
    /// Width of the initial price jitter (prices fall in base ± spread/2).
    #[serde(default = "default_price_spread")]
    pub price_spread: f64,
    /// Maximum relative price move per price tick (0.002 = ±0.1%).
    #[serde(default = "default_price_step")]
    pub price_step: f64,
    /// Maximum relative price move per position tick (0.001 = ±0.05%).
    #[serde(default = "default_position_step")]
    pub position_step: f64,
    /// Fixed RNG seed. Random when unset.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_price_tick_ms() -> u64 {
    2_000
}

fn default_position_tick_ms() -> u64 {
    3_000
}

fn default_points() -> u32 {
    50
}

fn default_base_price() -> f64 {
    100.0
}

fn default_price_spread() -> f64 {
    10.0
}

fn default_price_step() -> f64 {
    0.002
}

fn default_position_step() -> f64 {
    0.001
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            price_tick_ms: default_price_tick_ms(),
            position_tick_ms: default_position_tick_ms(),
            points: default_points(),
            base_price: default_base_price(),
            price_spread: default_price_spread(),
            price_step: default_price_step(),
            position_step: default_position_step(),
            seed: None,
        }
    }
}

impl MockConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }
}

/// Synthetic price and position generator.
#[derive(Debug)]
pub struct MockFeedGenerator {
    config: MockConfig,
    rng: StdRng,
}

impl MockFeedGenerator {
    /// Create a generator, seeded from `config.seed` when set.
    pub fn new(config: MockConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { config, rng }
    }

    pub fn config(&self) -> &MockConfig {
        &self.config
    }

    /// Tick interval for a stream, `None` for streams the mock cannot serve.
    pub fn tick_interval(&self, stream: &Stream) -> Option<Duration> {
        match stream {
            Stream::Prices { .. } => Some(Duration::from_millis(self.config.price_tick_ms)),
            Stream::Positions { .. } => Some(Duration::from_millis(self.config.position_tick_ms)),
            Stream::Generic { .. } => None,
        }
    }

    /// First payload for a stream.
    pub fn initial_payload(&mut self, stream: &Stream, now: DateTime<Utc>) -> Option<FeedData> {
        match stream {
            Stream::Prices { time_range, .. } => {
                Some(FeedData::Prices(self.initial_prices(*time_range, now)))
            }
            Stream::Positions { .. } => Some(FeedData::Positions(self.initial_positions())),
            Stream::Generic { .. } => None,
        }
    }

    /// Apply one periodic update to an existing payload.
    pub fn tick(&mut self, data: &mut FeedData, now: DateTime<Utc>) {
        match data {
            FeedData::Prices(series) => self.next_price(series, now),
            FeedData::Positions(positions) => self.tick_positions(positions),
            FeedData::Raw(_) => {}
        }
    }

    /// Evenly spaced series ending at `now` and spanning the whole range.
    pub fn initial_prices(&mut self, range: TimeRange, now: DateTime<Utc>) -> Vec<PricePoint> {
        let now_ms = now.timestamp_millis();
        let points = i64::from(self.config.points.max(1));
        let interval = range.duration_ms() / points;

        let series: Vec<PricePoint> = (0..=points)
            .rev()
            .map(|i| PricePoint {
                timestamp: now_ms - i * interval,
                price: self.config.base_price + self.jitter() * self.config.price_spread,
            })
            .collect();

        debug!(
            %range,
            points = series.len(),
            interval_ms = interval,
            "Generated mock price history"
        );
        series
    }

    /// Append one point stamped `now`, dropping the oldest.
    pub fn next_price(&mut self, series: &mut Vec<PricePoint>, now: DateTime<Utc>) {
        let Some(last) = series.last() else {
            return;
        };
        let price = last.price * (1.0 + self.jitter() * self.config.price_step);
        series.remove(0);
        series.push(PricePoint {
            timestamp: now.timestamp_millis(),
            price,
        });
    }

    /// The fixed development position list.
    pub fn initial_positions(&self) -> Vec<Position> {
        vec![Position {
            symbol: "SOL/USD".to_string(),
            size: 10.0,
            entry_price: 100.0,
            current_price: 102.5,
            pnl: 25.0,
        }]
    }

    /// Walk every position's price and recompute pnl from the same new price.
    pub fn tick_positions(&mut self, positions: &mut [Position]) {
        for position in positions.iter_mut() {
            let price = position.current_price * (1.0 + self.jitter() * self.config.position_step);
            position.mark_to(price);
        }
    }

    /// Uniform sample in [-0.5, 0.5).
    fn jitter(&mut self) -> f64 {
        self.rng.gen::<f64>() - 0.5
    }
}
