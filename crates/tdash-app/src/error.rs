//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid command: {0}")]
    Command(String),

    #[error("Core error: {0}")]
    Core(#[from] tdash_core::CoreError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] tdash_telemetry::TelemetryError),
}

pub type AppResult<T> = Result<T, AppError>;
