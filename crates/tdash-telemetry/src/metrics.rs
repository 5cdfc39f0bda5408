//! Prometheus metrics for tdash feeds.
//!
//! Covers:
//! - Feed connectivity and lifecycle phase
//! - Feed errors and payload updates
//! - Reconnects (automatic and manual) and retry cooldown
//! - Dashboard connectivity status
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration failure
//! means a duplicate metric name, which must crash at startup. These panics
//! only occur during static initialization, never at runtime.

use crate::error::{TelemetryError, TelemetryResult};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_int_gauge_vec, CounterVec, Encoder,
    GaugeVec, IntGaugeVec, TextEncoder,
};

const PHASES: &[&str] = &["idle", "connecting", "open", "reconnecting", "failed"];
const STATUSES: &[&str] = &["loading", "connected", "partial", "disconnected"];

/// Feed connection state (1 = connected, 0 = disconnected).
/// Labels: feed (prices/positions)
pub static FEED_CONNECTED: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "tdash_feed_connected",
        "Feed connection state (1=connected)",
        &["feed"]
    )
    .unwrap()
});

/// Feed lifecycle phase.
/// Labels: feed, phase (idle/connecting/open/reconnecting/failed)
pub static FEED_PHASE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "tdash_feed_phase",
        "Feed lifecycle phase (1=active, 0=inactive)",
        &["feed", "phase"]
    )
    .unwrap()
});

/// Feed errors surfaced to consumers.
/// Labels: feed, kind (parse/transport/max_retries)
pub static FEED_ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tdash_feed_errors_total",
        "Total feed errors surfaced",
        &["feed", "kind"]
    )
    .unwrap()
});

/// Payload updates observed.
pub static FEED_UPDATES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tdash_feed_updates_total",
        "Total feed payload updates observed",
        &["feed"]
    )
    .unwrap()
});

/// Reconnects by trigger.
/// Labels: feed, trigger (auto/manual/reset)
pub static RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tdash_reconnect_total",
        "Total reconnect attempts by trigger",
        &["feed", "trigger"]
    )
    .unwrap()
});

/// Seconds left on the retry cooldown (0 when retries are available).
pub static RETRY_COOLDOWN_SECONDS: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "tdash_retry_cooldown_seconds",
        "Seconds left on the retry cooldown",
        &["feed"]
    )
    .unwrap()
});

/// Dashboard connectivity status.
/// Labels: status (loading/connected/partial/disconnected)
pub static DASHBOARD_STATUS: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "tdash_dashboard_status",
        "Dashboard connectivity status (1=active, 0=inactive)",
        &["status"]
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Record feed connectivity.
    pub fn feed_connected(feed: &str, connected: bool) {
        FEED_CONNECTED
            .with_label_values(&[feed])
            .set(if connected { 1.0 } else { 0.0 });
    }

    /// Set the active phase of a feed; all other phases go to 0.
    pub fn feed_phase_set(feed: &str, phase: &str) {
        for p in PHASES {
            FEED_PHASE.with_label_values(&[feed, p]).set(0.0);
        }
        FEED_PHASE.with_label_values(&[feed, phase]).set(1.0);
    }

    pub fn feed_error(feed: &str, kind: &str) {
        FEED_ERRORS_TOTAL.with_label_values(&[feed, kind]).inc();
    }

    pub fn feed_update(feed: &str) {
        FEED_UPDATES_TOTAL.with_label_values(&[feed]).inc();
    }

    /// Record a reconnect attempt.
    pub fn reconnect(feed: &str, trigger: &str) {
        RECONNECT_TOTAL.with_label_values(&[feed, trigger]).inc();
    }

    /// Record `count` reconnect attempts at once.
    pub fn reconnects(feed: &str, trigger: &str, count: u64) {
        RECONNECT_TOTAL
            .with_label_values(&[feed, trigger])
            .inc_by(count as f64);
    }

    pub fn retry_cooldown(feed: &str, remaining_secs: u64) {
        RETRY_COOLDOWN_SECONDS
            .with_label_values(&[feed])
            .set(i64::try_from(remaining_secs).unwrap_or(i64::MAX));
    }

    /// Set the active dashboard status; all others go to 0.
    pub fn dashboard_status_set(status: &str) {
        for s in STATUSES {
            DASHBOARD_STATUS.with_label_values(&[s]).set(0.0);
        }
        DASHBOARD_STATUS.with_label_values(&[status]).set(1.0);
    }

    /// Encode the default registry in the Prometheus text format.
    pub fn render() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&prometheus::gather(), &mut buffer)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}
