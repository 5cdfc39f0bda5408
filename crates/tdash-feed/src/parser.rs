//! Message parsing for feed payloads.
//!
//! Price and position streams are parsed into typed payloads; generic
//! streams keep the parsed JSON value. Anything that is not valid JSON for
//! the stream kind is a parse error, which the connection manager treats as
//! fatal for the current connection.

use serde::de::DeserializeOwned;
use tdash_core::{FeedData, FeedError, Position, PricePoint, StreamKind};
use tracing::trace;

/// Parse one text message for a stream of the given kind.
pub fn parse_payload(kind: StreamKind, text: &str) -> Result<FeedData, FeedError> {
    let data = match kind {
        StreamKind::Prices => FeedData::Prices(decode::<Vec<PricePoint>>(kind, text)?),
        StreamKind::Positions => FeedData::Positions(decode::<Vec<Position>>(kind, text)?),
        StreamKind::Generic => FeedData::Raw(decode::<serde_json::Value>(kind, text)?),
    };
    trace!(%kind, entries = data.len(), "Parsed feed payload");
    Ok(data)
}

fn decode<T: DeserializeOwned>(kind: StreamKind, text: &str) -> Result<T, FeedError> {
    serde_json::from_str(text).map_err(|e| FeedError::Parse(format!("{kind} payload: {e}")))
}
