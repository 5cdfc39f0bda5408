//! tdash: headless trading dashboard feeds.
//!
//! Main application that wires the components together:
//! - Price and position feeds with reconnect and retry controls
//! - Connectivity status classification
//! - Portfolio summary and status logging
//! - Operator commands

pub mod app;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod session;

pub use app::{Application, Command};
pub use config::AppConfig;
pub use dashboard::{Dashboard, Feed, PortfolioSummary, RetryAffordance};
pub use error::{AppError, AppResult};
pub use session::Session;
