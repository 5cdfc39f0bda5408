//! Connection state exposed by a feed.

use crate::types::FeedData;
use serde::Serialize;
use thiserror::Error;

/// Error surfaced through [`ConnectionState::error`].
///
/// These are values, not failures of the public API: the connection manager
/// converts transport problems into state instead of returning them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error("Failed to parse feed message: {0}")]
    Parse(String),

    #[error("Feed connection error: {0}")]
    Transport(String),

    #[error("Maximum reconnection attempts reached ({attempts})")]
    MaxRetriesExceeded { attempts: u32 },
}

/// Discriminant of [`FeedError`], used for metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedErrorKind {
    Parse,
    Transport,
    MaxRetriesExceeded,
}

impl FeedErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parse => "parse",
            Self::Transport => "transport",
            Self::MaxRetriesExceeded => "max_retries",
        }
    }
}

impl FeedError {
    pub fn kind(&self) -> FeedErrorKind {
        match self {
            Self::Parse(_) => FeedErrorKind::Parse,
            Self::Transport(_) => FeedErrorKind::Transport,
            Self::MaxRetriesExceeded { .. } => FeedErrorKind::MaxRetriesExceeded,
        }
    }
}

impl Serialize for FeedError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// Latest payload, error and connectivity of one feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionState {
    pub data: Option<FeedData>,
    pub error: Option<FeedError>,
    pub is_connected: bool,
}

impl ConnectionState {
    /// `error` set implies not connected.
    pub fn is_consistent(&self) -> bool {
        self.error.is_none() || !self.is_connected
    }

    /// True for the freshly-reset state `{None, None, false}`.
    pub fn is_reset(&self) -> bool {
        self.data.is_none() && self.error.is_none() && !self.is_connected
    }
}
