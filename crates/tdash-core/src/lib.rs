//! Core domain types for the tdash trading dashboard feeds.
//!
//! This crate provides the fundamental types shared by the feed stack:
//! - `Clock`: injectable time source (`SystemClock`, `ManualClock`)
//! - `Stream`, `TimeRange`: subscription identity and the URL contract
//! - `PricePoint`, `Position`, `FeedData`: feed payloads
//! - `ConnectionState`, `FeedError`: what a feed exposes to consumers
//! - `classify`: connectivity status classification for two feeds

pub mod clock;
pub mod error;
pub mod state;
pub mod status;
pub mod stream;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoreError, Result};
pub use state::{ConnectionState, FeedError, FeedErrorKind};
pub use status::{classify, feed_tooltip, ConnectivityStatus, DownFeed};
pub use stream::{Stream, StreamKind, TimeRange};
pub use types::{FeedData, Position, PricePoint};
