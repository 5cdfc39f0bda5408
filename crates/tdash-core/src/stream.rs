//! Stream identity and the transport URL contract.
//!
//! A [`Stream`] is the logical identity of a subscription. Two streams that
//! compare equal share a connection; any parameter change (symbol, time
//! range, retry counter, URL) is a different stream and forces a reconnect.
//!
//! URL format:
//! - `{base}/ws/prices?symbol=SOL%2FUSD&timeRange=24H&retry=0`
//! - `{base}/ws/positions?retry=0`
//! - anything else is a generic stream and is used verbatim.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const PRICES_PATH: &str = "/ws/prices";
const POSITIONS_PATH: &str = "/ws/positions";

/// Chart time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeRange {
    #[serde(rename = "1H")]
    OneHour,
    #[default]
    #[serde(rename = "24H")]
    OneDay,
    #[serde(rename = "7D")]
    SevenDays,
    #[serde(rename = "30D")]
    ThirtyDays,
}

impl TimeRange {
    pub const ALL: [TimeRange; 4] = [
        TimeRange::OneHour,
        TimeRange::OneDay,
        TimeRange::SevenDays,
        TimeRange::ThirtyDays,
    ];

    /// Wire representation (`1H`, `24H`, `7D`, `30D`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneHour => "1H",
            Self::OneDay => "24H",
            Self::SevenDays => "7D",
            Self::ThirtyDays => "30D",
        }
    }

    /// Window covered by the range, in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        match self {
            Self::OneHour => 3_600_000,
            Self::OneDay => 86_400_000,
            Self::SevenDays => 604_800_000,
            Self::ThirtyDays => 2_592_000_000,
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeRange {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "1H" => Ok(Self::OneHour),
            "24H" => Ok(Self::OneDay),
            "7D" => Ok(Self::SevenDays),
            "30D" => Ok(Self::ThirtyDays),
            other => Err(CoreError::InvalidTimeRange(other.to_string())),
        }
    }
}

/// Stream kind, selected by the URL path segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Prices,
    Positions,
    Generic,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prices => "prices",
            Self::Positions => "positions",
            Self::Generic => "generic",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical identity of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Stream {
    /// Price series for a trading pair over a time range.
    Prices {
        symbol: String,
        time_range: TimeRange,
        /// Re-subscription counter; only used to force a new identity.
        retry: u32,
    },
    /// Open positions of the session.
    Positions { retry: u32 },
    /// Arbitrary socket URL, used verbatim.
    Generic { url: String },
}

impl Stream {
    pub fn prices(symbol: impl Into<String>, time_range: TimeRange) -> Self {
        Self::Prices {
            symbol: symbol.into(),
            time_range,
            retry: 0,
        }
    }

    pub fn positions() -> Self {
        Self::Positions { retry: 0 }
    }

    pub fn generic(url: impl Into<String>) -> Self {
        Self::Generic { url: url.into() }
    }

    pub fn kind(&self) -> StreamKind {
        match self {
            Self::Prices { .. } => StreamKind::Prices,
            Self::Positions { .. } => StreamKind::Positions,
            Self::Generic { .. } => StreamKind::Generic,
        }
    }

    /// Current re-subscription counter (always 0 for generic streams).
    pub fn retry(&self) -> u32 {
        match self {
            Self::Prices { retry, .. } | Self::Positions { retry } => *retry,
            Self::Generic { .. } => 0,
        }
    }

    /// Same stream with the given re-subscription counter.
    ///
    /// Generic streams carry no counter and are returned unchanged.
    pub fn with_retry(&self, retry: u32) -> Self {
        match self {
            Self::Prices {
                symbol, time_range, ..
            } => Self::Prices {
                symbol: symbol.clone(),
                time_range: *time_range,
                retry,
            },
            Self::Positions { .. } => Self::Positions { retry },
            Self::Generic { url } => Self::Generic { url: url.clone() },
        }
    }

    /// Whether this stream can be served by the mock generator.
    pub fn is_mockable(&self) -> bool {
        !matches!(self, Self::Generic { .. })
    }

    /// Build the transport URL against `base` (e.g. `ws://localhost:8080`).
    pub fn url(&self, base: &str) -> String {
        let base = base.trim_end_matches('/');
        match self {
            Self::Prices {
                symbol,
                time_range,
                retry,
            } => format!(
                "{base}{PRICES_PATH}?symbol={}&timeRange={}&retry={retry}",
                urlencoding::encode(symbol),
                time_range.as_str()
            ),
            Self::Positions { retry } => format!("{base}{POSITIONS_PATH}?retry={retry}"),
            Self::Generic { url } => url.clone(),
        }
    }

    /// Parse a transport URL back into a stream.
    ///
    /// `timeRange` defaults to `24H` and `retry` to 0 when absent; a price
    /// stream without `symbol` is rejected.
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        if url.is_empty() {
            return Err(CoreError::InvalidStreamUrl("empty URL".to_string()));
        }

        let (path, query) = match url.split_once('?') {
            Some((path, query)) => (path, query),
            None => (url, ""),
        };
        let path = path.trim_end_matches('/');

        let kind = if path.ends_with(PRICES_PATH) {
            StreamKind::Prices
        } else if path.ends_with(POSITIONS_PATH) {
            StreamKind::Positions
        } else {
            return Ok(Self::generic(url));
        };

        let params = parse_query(query)?;
        let param = |name: &str| {
            params
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str())
        };

        let retry = match param("retry") {
            Some(raw) => raw
                .parse::<u32>()
                .map_err(|_| CoreError::InvalidStreamUrl(format!("bad retry counter: {raw}")))?,
            None => 0,
        };

        match kind {
            StreamKind::Prices => {
                let symbol = param("symbol").ok_or_else(|| CoreError::MissingParam {
                    param: "symbol",
                    url: url.to_string(),
                })?;
                let time_range = match param("timeRange") {
                    Some(raw) => raw.parse()?,
                    None => TimeRange::default(),
                };
                Ok(Self::Prices {
                    symbol: symbol.to_string(),
                    time_range,
                    retry,
                })
            }
            StreamKind::Positions => Ok(Self::Positions { retry }),
            StreamKind::Generic => Ok(Self::generic(url)),
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prices {
                symbol, time_range, ..
            } => write!(f, "prices:{symbol}:{time_range}"),
            Self::Positions { .. } => write!(f, "positions"),
            Self::Generic { url } => write!(f, "generic:{url}"),
        }
    }
}

fn parse_query(query: &str) -> Result<Vec<(String, String)>> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let value = urlencoding::decode(value)
                .map_err(|e| CoreError::InvalidStreamUrl(format!("bad encoding in {key}: {e}")))?;
            Ok((key.to_string(), value.into_owned()))
        })
        .collect()
}
