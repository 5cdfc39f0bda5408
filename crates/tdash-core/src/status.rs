//! Connectivity status classification for the price and position feeds.

use serde::Serialize;
use std::fmt;

/// Which feed is down in a partial connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DownFeed {
    Prices,
    Positions,
}

impl DownFeed {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Prices => "Price feed disconnected",
            Self::Positions => "Position tracking disconnected",
        }
    }
}

/// Derived display status of the dashboard feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "down", rename_all = "snake_case")]
pub enum ConnectivityStatus {
    Loading,
    Connected,
    Partial(DownFeed),
    Disconnected,
}

impl ConnectivityStatus {
    /// Machine-readable name, matching the serialized tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Connected => "connected",
            Self::Partial(_) => "partial",
            Self::Disconnected => "disconnected",
        }
    }

    /// Short label shown next to the indicator.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Loading => "Connecting",
            Self::Connected => "Connected",
            Self::Partial(_) => "Partial Connection",
            Self::Disconnected => "Disconnected",
        }
    }

    /// Detail line for a partial connection.
    pub fn detail(&self) -> Option<&'static str> {
        match self {
            Self::Partial(down) => Some(down.message()),
            _ => None,
        }
    }

    /// Disconnected and partial states render a retry affordance.
    pub fn needs_retry(&self) -> bool {
        matches!(self, Self::Partial(_) | Self::Disconnected)
    }
}

impl fmt::Display for ConnectivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.detail() {
            Some(detail) => write!(f, "{} ({detail})", self.label()),
            None => f.write_str(self.label()),
        }
    }
}

/// Classify two optional connectivity flags.
///
/// `None` means the feed has not reported yet. Rules, in order: any `None`
/// is loading, both up is connected, exactly one up is partial, otherwise
/// disconnected.
pub fn classify(price: Option<bool>, positions: Option<bool>) -> ConnectivityStatus {
    match (price, positions) {
        (None, _) | (_, None) => ConnectivityStatus::Loading,
        (Some(true), Some(true)) => ConnectivityStatus::Connected,
        (Some(true), Some(false)) => ConnectivityStatus::Partial(DownFeed::Positions),
        (Some(false), Some(true)) => ConnectivityStatus::Partial(DownFeed::Prices),
        (Some(false), Some(false)) => ConnectivityStatus::Disconnected,
    }
}

/// Per-feed tooltip, e.g. `Price feed: Connected\nPosition tracking: Disconnected`.
pub fn feed_tooltip(price: Option<bool>, positions: Option<bool>) -> String {
    let word = |flag: Option<bool>| {
        if flag == Some(true) {
            "Connected"
        } else {
            "Disconnected"
        }
    };
    format!(
        "Price feed: {}\nPosition tracking: {}",
        word(price),
        word(positions)
    )
}
