//! Prometheus metrics and structured logging for tdash.
//!
//! - Prometheus metrics for feed connectivity, errors, reconnects and status
//! - Structured JSON logging with tracing

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
