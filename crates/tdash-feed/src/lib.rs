//! Feed payload parsing and mock market data for tdash.
//!
//! - `parse_payload`: turns transport text into typed [`tdash_core::FeedData`]
//! - `MockFeedGenerator`: synthetic prices and positions for development

pub mod mock;
pub mod parser;

pub use mock::{MockConfig, MockFeedGenerator};
pub use parser::parse_payload;
