//! Feed payload types.
//!
//! These mirror the JSON the dashboard backend sends: price messages are
//! arrays of `{timestamp, price}`, position messages arrays of positions
//! with camelCase field names.

use serde::{Deserialize, Serialize};

/// One point of a price series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Unix milliseconds.
    pub timestamp: i64,
    pub price: f64,
}

/// An open position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub symbol: String,
    pub size: f64,
    pub entry_price: f64,
    pub current_price: f64,
    pub pnl: f64,
}

impl Position {
    /// Move the mark price and recompute `pnl = size * (current - entry)`.
    pub fn mark_to(&mut self, current_price: f64) {
        self.current_price = current_price;
        self.pnl = self.size * (current_price - self.entry_price);
    }
}

/// Latest payload of a feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FeedData {
    Prices(Vec<PricePoint>),
    Positions(Vec<Position>),
    /// Payload of a generic stream, kept as parsed JSON.
    Raw(serde_json::Value),
}

impl FeedData {
    pub fn as_prices(&self) -> Option<&[PricePoint]> {
        match self {
            Self::Prices(points) => Some(points),
            _ => None,
        }
    }

    pub fn as_positions(&self) -> Option<&[Position]> {
        match self {
            Self::Positions(positions) => Some(positions),
            _ => None,
        }
    }

    pub fn as_raw(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Raw(value) => Some(value),
            _ => None,
        }
    }

    /// Number of entries (points, positions, or 1 for raw JSON).
    pub fn len(&self) -> usize {
        match self {
            Self::Prices(points) => points.len(),
            Self::Positions(positions) => positions.len(),
            Self::Raw(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
