//! Application configuration.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tdash_core::TimeRange;
use tdash_feed::MockConfig;
use tdash_ws::{ConnectionConfig, RetryConfig};

/// Default config file location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Environment variable overriding the config path.
pub const CONFIG_ENV: &str = "TDASH_CONFIG";

/// Longest accepted retry cooldown (one day).
pub const MAX_COOLDOWN_SECS: u64 = 86_400;

/// Longest accepted backoff ceiling or timer interval (one hour).
pub const MAX_INTERVAL_MS: u64 = 3_600_000;

/// Feed subscription settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Backend base URL (`ws://` or `wss://`). Unset means mock feeds.
    #[serde(default)]
    pub backend_url: Option<String>,
    /// Trading pair shown on startup.
    #[serde(default = "default_symbol")]
    pub symbol: String,
    /// Chart window shown on startup.
    #[serde(default)]
    pub time_range: TimeRange,
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,
}

fn default_symbol() -> String {
    "SOL/USD".to_string()
}

fn default_auto_reconnect() -> bool {
    true
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            backend_url: None,
            symbol: default_symbol(),
            time_range: TimeRange::default(),
            auto_reconnect: default_auto_reconnect(),
        }
    }
}

/// Session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Environment variable holding the bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

fn default_token_env() -> String {
    "TDASH_TOKEN".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            token_env: default_token_env(),
        }
    }
}

/// Logging and status output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Interval between status lines (ms).
    #[serde(default = "default_status_interval_ms")]
    pub status_interval_ms: u64,
    /// Log filter used when `RUST_LOG` is unset.
    #[serde(default)]
    pub log_level: Option<String>,
}

fn default_status_interval_ms() -> u64 {
    5_000
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            status_interval_ms: default_status_interval_ms(),
            log_level: None,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub mock: MockConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Resolve the config path: explicit path > `TDASH_CONFIG` > default.
    pub fn resolve_path(explicit: Option<String>) -> String {
        explicit
            .or_else(|| std::env::var(CONFIG_ENV).ok())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
    }

    /// Load from `path`, falling back to defaults when the default file is
    /// missing. An explicitly named file must exist.
    pub fn load(path: &str) -> AppResult<Self> {
        if Path::new(path).exists() {
            Self::from_file(path)
        } else if path == DEFAULT_CONFIG_PATH {
            tracing::warn!(path = %path, "Config file not found, using defaults");
            Ok(Self::default())
        } else {
            Err(AppError::Config(format!("Config file not found: {path}")))
        }
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    /// Parse and validate TOML.
    pub fn from_toml(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.retry.max_attempts == 0 {
            return Err(AppError::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(AppError::Config(
                "retry.max_delay_ms must not be below retry.base_delay_ms".into(),
            ));
        }
        if self.mock.price_tick_ms == 0 || self.mock.position_tick_ms == 0 {
            return Err(AppError::Config("mock tick intervals must be non-zero".into()));
        }
        if self.retry.cooldown_secs > MAX_COOLDOWN_SECS {
            return Err(AppError::Config(format!(
                "retry.cooldown_secs must not exceed {MAX_COOLDOWN_SECS}"
            )));
        }
        let intervals = [
            ("retry.max_delay_ms", self.retry.max_delay_ms),
            ("mock.initial_delay_ms", self.mock.initial_delay_ms),
            ("mock.price_tick_ms", self.mock.price_tick_ms),
            ("mock.position_tick_ms", self.mock.position_tick_ms),
            ("telemetry.status_interval_ms", self.telemetry.status_interval_ms),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, ms)| *ms > MAX_INTERVAL_MS) {
            return Err(AppError::Config(format!(
                "{name} must not exceed {MAX_INTERVAL_MS} ms"
            )));
        }
        if self.telemetry.status_interval_ms == 0 {
            return Err(AppError::Config(
                "telemetry.status_interval_ms must be non-zero".into(),
            ));
        }
        if let Some(url) = &self.feed.backend_url {
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                return Err(AppError::Config(format!(
                    "feed.backend_url must be a ws:// or wss:// URL: {url}"
                )));
            }
        }
        if self.feed.symbol.trim().is_empty() {
            return Err(AppError::Config("feed.symbol must not be empty".into()));
        }
        Ok(())
    }

    /// Connection settings shared by both dashboard feeds.
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            backend_url: self.feed.backend_url.clone(),
            auto_reconnect: self.feed.auto_reconnect,
            retry: self.retry.clone(),
            mock: self.mock.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert!(config.feed.backend_url.is_none());
        assert_eq!(config.feed.symbol, "SOL/USD");
        assert_eq!(config.feed.time_range, TimeRange::OneDay);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.session.token_env, "TDASH_TOKEN");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_shipped_default_file() {
        let config = AppConfig::from_toml(include_str!("../../../config/default.toml")).unwrap();
        assert!(config.feed.backend_url.is_none());
        assert_eq!(config.retry.cooldown_secs, 30);
        assert_eq!(config.mock.points, 50);
        assert!(config.mock.seed.is_none());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [feed]
            symbol = "ETH/USD"
            time_range = "7D"

            [retry]
            cooldown_secs = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.feed.symbol, "ETH/USD");
        assert_eq!(config.feed.time_range, TimeRange::SevenDays);
        assert_eq!(config.retry.cooldown_secs, 10);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.mock.price_tick_ms, 2_000);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let zero_attempts = "[retry]\nmax_attempts = 0\n";
        assert!(matches!(
            AppConfig::from_toml(zero_attempts),
            Err(AppError::Config(_))
        ));

        let inverted = "[retry]\nbase_delay_ms = 5000\nmax_delay_ms = 1000\n";
        assert!(AppConfig::from_toml(inverted).is_err());

        let zero_tick = "[mock]\nprice_tick_ms = 0\n";
        assert!(AppConfig::from_toml(zero_tick).is_err());

        let http = "[feed]\nbackend_url = \"http://example.com\"\n";
        assert!(AppConfig::from_toml(http).is_err());

        let bad_range = "[feed]\ntime_range = \"2W\"\n";
        assert!(AppConfig::from_toml(bad_range).is_err());
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        let huge_cooldown = "[retry]\ncooldown_secs = 10000000000000000\n";
        assert!(matches!(
            AppConfig::from_toml(huge_cooldown),
            Err(AppError::Config(_))
        ));

        let huge_delay = "[retry]\nmax_delay_ms = 18446744073709551615\n";
        assert!(AppConfig::from_toml(huge_delay).is_err());

        let huge_tick = "[mock]\nposition_tick_ms = 3600001\n";
        assert!(AppConfig::from_toml(huge_tick).is_err());

        let day = "[retry]\ncooldown_secs = 86400\n";
        assert!(AppConfig::from_toml(day).is_ok());
    }

    #[test]
    fn test_connection_config() {
        let mut config = AppConfig::default();
        config.feed.backend_url = Some("wss://dash.example.com".to_string());
        config.feed.auto_reconnect = false;

        let conn = config.connection_config();
        assert_eq!(conn.backend_url.as_deref(), Some("wss://dash.example.com"));
        assert!(!conn.auto_reconnect);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        assert!(AppConfig::load("does/not/exist.toml").is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("symbol"));
        assert!(toml_str.contains("max_attempts"));
        let back = AppConfig::from_toml(&toml_str).unwrap();
        assert_eq!(back.feed.symbol, config.feed.symbol);
    }
}
