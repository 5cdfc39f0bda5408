//! Retry policy for feed reconnection.
//!
//! One policy instance per connection manager counts both automatic and
//! manual reconnect attempts. After `max_attempts` attempts the policy is
//! exhausted and a cooldown must elapse (or `reset()` be called) before the
//! next attempt is permitted.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Retry policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts allowed before the cooldown kicks in.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Cooldown after exhaustion (seconds).
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Base delay for exponential backoff (ms).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Backoff ceiling (ms).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_cooldown_secs() -> u64 {
    30
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            cooldown_secs: default_cooldown_secs(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Why an attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RetryDenied {
    #[error("a reconnect attempt is already in progress")]
    InFlight,

    #[error("retries exhausted, cooling down for {remaining_secs}s")]
    CoolingDown { remaining_secs: u64 },
}

/// Observable retry state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryState {
    pub attempts: u32,
    pub max_attempts: u32,
    /// Whole seconds left on the cooldown, rounded up.
    pub cooldown_remaining: u64,
    pub exhausted: bool,
}

/// Retry counter with max-attempt cutoff and cooldown.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    attempts: u32,
    exhausted: bool,
    cooldown_until: Option<DateTime<Utc>>,
    in_flight: bool,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            attempts: 0,
            exhausted: false,
            cooldown_until: None,
            in_flight: false,
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Register a reconnect attempt.
    ///
    /// Returns the 1-based attempt number. The attempt that reaches
    /// `max_attempts` is still permitted; it starts the cooldown.
    pub fn record_attempt(&mut self, now: DateTime<Utc>) -> Result<u32, RetryDenied> {
        if self.in_flight {
            return Err(RetryDenied::InFlight);
        }

        if self.exhausted {
            let remaining_secs = self.cooldown_remaining(now);
            if remaining_secs > 0 {
                return Err(RetryDenied::CoolingDown { remaining_secs });
            }
            info!("Retry cooldown elapsed, attempts restarted");
            self.clear();
        }

        self.attempts += 1;
        self.in_flight = true;

        if self.attempts >= self.config.max_attempts {
            self.exhausted = true;
            self.cooldown_until = Some(cooldown_deadline(now, self.config.cooldown_secs));
            warn!(
                attempts = self.attempts,
                cooldown_secs = self.config.cooldown_secs,
                "Retry attempts exhausted, cooldown started"
            );
        } else {
            debug!(attempt = self.attempts, "Reconnect attempt recorded");
        }

        Ok(self.attempts)
    }

    /// Hand the pending attempt over to another caller.
    ///
    /// Returns its attempt number without counting a new one, or `None`
    /// when no attempt is pending.
    pub fn take_over(&self) -> Option<u32> {
        self.in_flight.then_some(self.attempts)
    }

    /// The in-flight attempt ended without a connection.
    pub fn record_failure(&mut self) {
        self.in_flight = false;
    }

    /// A connection was established.
    pub fn record_success(&mut self) {
        if self.attempts > 0 {
            debug!(attempts = self.attempts, "Connection recovered, retry state cleared");
        }
        self.clear();
    }

    /// Manual override: permit a new attempt immediately.
    pub fn reset(&mut self) {
        info!(attempts = self.attempts, "Retry policy reset");
        self.clear();
    }

    pub fn can_attempt(&self, now: DateTime<Utc>) -> bool {
        !(self.exhausted && self.cooldown_remaining(now) > 0)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Exhausted and still cooling down.
    pub fn is_exhausted(&self, now: DateTime<Utc>) -> bool {
        !self.can_attempt(now)
    }

    /// Whole seconds left on the cooldown, rounded up; 0 when not cooling down.
    pub fn cooldown_remaining(&self, now: DateTime<Utc>) -> u64 {
        match self.cooldown_until {
            Some(until) if self.exhausted && until > now => {
                let ms = (until - now).num_milliseconds().max(0) as u64;
                ms.div_ceil(1000)
            }
            _ => 0,
        }
    }

    pub fn state(&self, now: DateTime<Utc>) -> RetryState {
        RetryState {
            attempts: self.attempts,
            max_attempts: self.config.max_attempts,
            cooldown_remaining: self.cooldown_remaining(now),
            exhausted: self.is_exhausted(now),
        }
    }

    /// Exponential backoff: `base * 2^(attempt-1)`, capped at the ceiling.
    ///
    /// attempt=1 -> base, attempt=2 -> 2*base, attempt=3 -> 4*base
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let delay = self.config.base_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.config.max_delay_ms))
    }

    fn clear(&mut self) {
        self.attempts = 0;
        self.exhausted = false;
        self.cooldown_until = None;
        self.in_flight = false;
    }
}

/// End of the cooldown, saturating at the latest representable instant.
fn cooldown_deadline(now: DateTime<Utc>, cooldown_secs: u64) -> DateTime<Utc> {
    i64::try_from(cooldown_secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|cooldown| now.checked_add_signed(cooldown))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
