//! Connection manager scenarios on virtual time.
//!
//! Drives a `ConnectionManager` with a `ManualClock` and the in-memory
//! transport factory so every timer fires at an exact instant.

use std::sync::Arc;
use std::time::Duration;
use tdash_core::{Clock, FeedError, ManualClock, Stream, TimeRange};
use tdash_ws::testkit::{advance, pump, FakeTransportFactory};
use tdash_ws::{
    event_channel, ConnectionConfig, ConnectionManager, EventReceiver, LinkPhase, RetryDenied,
};
use tokio_test::{assert_err, assert_ok};

const T0_MS: i64 = 1_700_000_000_000;

struct Harness {
    manager: ConnectionManager,
    events: EventReceiver,
    clock: Arc<ManualClock>,
    factory: Arc<FakeTransportFactory>,
}

impl Harness {
    fn new(config: ConnectionConfig) -> Self {
        let clock = Arc::new(ManualClock::at_epoch_ms(T0_MS));
        let factory = FakeTransportFactory::new();
        let (tx, events) = event_channel();
        let manager = ConnectionManager::new(config, clock.clone(), factory.clone(), tx);
        Self {
            manager,
            events,
            clock,
            factory,
        }
    }

    fn mock() -> Self {
        let mut config = ConnectionConfig::default();
        config.mock.seed = Some(42);
        Self::new(config)
    }

    fn backend() -> Self {
        Self::new(ConnectionConfig {
            backend_url: Some("ws://backend:9000".to_string()),
            ..Default::default()
        })
    }

    fn advance_ms(&mut self, ms: u64) {
        advance(&mut self.manager, &self.clock, Duration::from_millis(ms));
    }

    fn pump(&mut self) {
        pump(&mut self.manager, &mut self.events);
    }

    fn prices(&self) -> Vec<tdash_core::PricePoint> {
        self.manager
            .state()
            .data
            .as_ref()
            .and_then(|d| d.as_prices())
            .map(<[_]>::to_vec)
            .unwrap_or_default()
    }
}

#[test]
fn test_mock_price_history_after_initial_delay() {
    let mut h = Harness::mock();
    h.manager.open(Stream::prices("SOL/USD", TimeRange::OneDay));

    assert!(h.manager.state().is_connected);
    assert!(h.manager.state().data.is_none());

    h.advance_ms(99);
    assert!(h.manager.state().data.is_none());

    h.advance_ms(1);
    let prices = h.prices();
    assert_eq!(prices.len(), 51);

    let span = prices[50].timestamp - prices[0].timestamp;
    assert!(span <= 86_400_000 && span > 86_000_000, "span {span}");
    assert_eq!(prices[50].timestamp, h.clock.now_ms());
    assert!(prices.iter().all(|p| (95.0..=105.0).contains(&p.price)));
}

#[test]
fn test_mock_tick_keeps_series_length() {
    let mut h = Harness::mock();
    h.manager.open(Stream::prices("SOL/USD", TimeRange::OneDay));
    h.advance_ms(100);
    let before = h.prices();

    h.advance_ms(2_000);
    let after = h.prices();

    assert_eq!(after.len(), 51);
    assert_eq!(after[0], before[1]);
    assert_eq!(after[50].timestamp, T0_MS + 2_100);
    let step = (after[50].price - before[50].price).abs() / before[50].price;
    assert!(step <= 0.001 + f64::EPSILON);
}

#[test]
fn test_range_switch_replaces_stream() {
    let mut h = Harness::mock();
    h.manager.open(Stream::prices("SOL/USD", TimeRange::OneDay));
    h.advance_ms(100);
    assert_eq!(h.prices().len(), 51);

    h.manager.open(Stream::prices("SOL/USD", TimeRange::OneHour));
    assert!(h.manager.state().data.is_none());
    assert!(h
        .manager
        .current_url()
        .unwrap()
        .contains("timeRange=1H"));

    // Old tick schedule is gone; only the new initial delay is pending
    assert_eq!(
        h.manager.next_deadline().unwrap().timestamp_millis(),
        h.clock.now_ms() + 100
    );

    h.advance_ms(100);
    let prices = h.prices();
    assert_eq!(prices.len(), 51);
    let span = prices[50].timestamp - prices[0].timestamp;
    assert!(span <= 3_600_000 && span > 3_500_000, "span {span}");
}

#[test]
fn test_reopen_same_stream_is_noop() {
    let mut h = Harness::backend();
    h.manager.open(Stream::positions());
    h.manager.open(Stream::positions());
    assert_eq!(h.factory.open_count(), 1);
    assert_eq!(h.factory.live(), 1);
}

#[test]
fn test_disconnect_twice_resets_state() {
    let mut h = Harness::mock();
    h.manager.open(Stream::positions());
    h.advance_ms(100);
    assert!(h.manager.state().data.is_some());

    h.manager.disconnect();
    h.manager.disconnect();

    assert!(h.manager.state().is_reset());
    assert_eq!(h.manager.phase(), LinkPhase::Idle);
    assert!(h.manager.next_deadline().is_none());

    // Nothing resurrects the stream afterwards
    h.advance_ms(10_000);
    assert!(h.manager.state().is_reset());
}

#[test]
fn test_connectivity_unknown_until_reported() {
    let mut h = Harness::backend();
    assert_eq!(h.manager.connectivity(), None);

    h.manager.open(Stream::positions());
    assert_eq!(h.manager.connectivity(), None);

    h.factory.last().unwrap().sink.opened();
    h.pump();
    assert_eq!(h.manager.connectivity(), Some(true));
}

#[test]
fn test_transport_error_same_step() {
    let mut h = Harness::backend();
    h.manager.open(Stream::positions());
    let conn = h.factory.last().unwrap();
    conn.sink.opened();
    h.pump();

    conn.sink.error("connection reset");
    h.pump();

    let state = h.manager.state();
    assert!(!state.is_connected);
    assert_eq!(
        state.error,
        Some(FeedError::Transport("connection reset".to_string()))
    );
    assert!(conn.is_closed());
}

#[test]
fn test_reconnect_backoff_then_failed() {
    let mut h = Harness::backend();
    h.manager.open(Stream::positions());
    h.factory.set_fail_opens(true);

    h.factory.last().unwrap().sink.closed(1006, "dropped");
    h.pump();
    assert_eq!(h.manager.phase(), LinkPhase::Reconnecting { attempt: 1 });

    // 1s backoff, then the attempt fails and 2s backoff follows
    h.advance_ms(999);
    assert_eq!(h.manager.phase(), LinkPhase::Reconnecting { attempt: 1 });
    h.advance_ms(1);
    assert_eq!(h.manager.phase(), LinkPhase::Reconnecting { attempt: 2 });

    h.advance_ms(2_000);
    assert_eq!(h.manager.phase(), LinkPhase::Reconnecting { attempt: 3 });

    h.advance_ms(4_000);
    assert_eq!(h.manager.phase(), LinkPhase::Failed);
    assert!(h.manager.next_deadline().is_none());

    let retry = h.manager.retry_state();
    assert!(retry.exhausted);
    assert_eq!(retry.attempts, 3);
}

#[test]
fn test_reconnect_success_clears_attempts() {
    let mut h = Harness::backend();
    h.manager.open(Stream::positions());
    h.factory.last().unwrap().sink.closed(1001, "going away");
    h.pump();

    h.advance_ms(1_000);
    assert_eq!(h.factory.open_count(), 2);
    h.factory.last().unwrap().sink.opened();
    h.pump();

    assert_eq!(h.manager.phase(), LinkPhase::Open);
    assert_eq!(h.manager.retry_state().attempts, 0);
    assert!(h.manager.state().error.is_none());
}

#[test]
fn test_manual_retries_exhaust_then_cooldown() {
    let mut h = Harness::new(ConnectionConfig {
        backend_url: Some("ws://backend:9000".to_string()),
        auto_reconnect: false,
        ..Default::default()
    });
    h.factory.set_fail_opens(true);
    h.manager.open(Stream::positions());
    assert_eq!(h.manager.phase(), LinkPhase::Failed);

    for _ in 0..3 {
        assert_ok!(h.manager.retry());
    }
    assert_eq!(
        h.manager.retry(),
        Err(RetryDenied::CoolingDown { remaining_secs: 30 })
    );

    h.advance_ms(12_000);
    assert_eq!(h.manager.retry_state().cooldown_remaining, 18);

    h.advance_ms(18_000);
    assert_eq!(h.manager.retry(), Ok(()));
    assert_eq!(h.manager.retry_state().attempts, 1);
}

#[test]
fn test_reset_connection_permits_retry() {
    let mut h = Harness::new(ConnectionConfig {
        backend_url: Some("ws://backend:9000".to_string()),
        auto_reconnect: false,
        ..Default::default()
    });
    h.factory.set_fail_opens(true);
    h.manager.open(Stream::positions());
    for _ in 0..3 {
        assert_ok!(h.manager.retry());
    }
    assert_err!(h.manager.retry());

    h.manager.reset_retry();
    h.factory.set_fail_opens(false);

    assert_eq!(h.manager.retry(), Ok(()));
    let conn = h.factory.last().unwrap();
    assert_eq!(conn.url, "ws://backend:9000/ws/positions?retry=4");
}

#[test]
fn test_retry_bumps_counter_and_drops_old_transport() {
    let mut h = Harness::backend();
    h.manager.open(Stream::prices("ETH/USD", TimeRange::SevenDays));
    let first = h.factory.last().unwrap();
    first.sink.error("refused");
    h.pump();
    assert!(matches!(h.manager.phase(), LinkPhase::Reconnecting { .. }));

    h.manager.retry().unwrap();

    assert!(first.is_closed());
    let second = h.factory.last().unwrap();
    assert!(second.url.ends_with("retry=1"));
    assert!(second.url.contains("symbol=ETH%2FUSD"));

    // The superseded reconnect timer does not open a third transport
    h.advance_ms(5_000);
    assert_eq!(h.factory.open_count(), 2);

    // Late events from the first transport are ignored
    first.sink.opened();
    h.pump();
    assert_eq!(h.manager.phase(), LinkPhase::Connecting);
}

#[test]
fn test_retry_while_connecting_is_rejected() {
    let mut h = Harness::backend();
    h.manager.open(Stream::positions());
    h.factory.last().unwrap().sink.closed(1006, "dropped");
    h.pump();
    h.advance_ms(1_000);
    assert_eq!(h.manager.phase(), LinkPhase::Connecting);

    assert_eq!(h.manager.retry(), Err(RetryDenied::InFlight));
    assert_eq!(h.factory.open_count(), 2);
}

#[test]
fn test_parse_error_closes_and_reconnects() {
    let mut h = Harness::backend();
    h.manager.open(Stream::positions());
    let conn = h.factory.last().unwrap();
    conn.sink.opened();
    conn.sink.message(r#"{"not":"a list"}"#);
    h.pump();

    assert!(matches!(h.manager.state().error, Some(FeedError::Parse(_))));
    assert!(!h.manager.state().is_connected);
    assert!(conn.is_closed());
    assert_eq!(h.manager.phase(), LinkPhase::Reconnecting { attempt: 1 });
}

#[test]
fn test_send_dropped_when_disconnected() {
    let mut h = Harness::backend();
    h.manager.open(Stream::positions());
    let conn = h.factory.last().unwrap();

    assert!(!h.manager.send(&serde_json::json!({"op": "x"})));
    conn.sink.opened();
    h.pump();
    assert!(h.manager.send(&serde_json::json!({"op": "x"})));
    assert_eq!(conn.sent().len(), 1);
}

#[test]
fn test_generic_stream_without_backend_uses_transport() {
    let mut h = Harness::mock();
    h.manager.open(Stream::generic("ws://other/feed"));
    assert!(!h.manager.is_mock());
    assert_eq!(h.factory.last().unwrap().url, "ws://other/feed");

    h.factory.last().unwrap().sink.opened();
    h.factory.last().unwrap().sink.message(r#"{"hello":1}"#);
    h.pump();
    let raw = h.manager.state().data.as_ref().and_then(|d| d.as_raw()).cloned();
    assert_eq!(raw, Some(serde_json::json!({"hello": 1})));
}

#[test]
fn test_manual_retry_during_backoff_makes_scheduled_attempt() {
    let mut h = Harness::backend();
    h.manager.open(Stream::positions());
    h.factory.set_fail_opens(true);
    h.factory.last().unwrap().sink.closed(1006, "dropped");
    h.pump();
    assert_eq!(h.manager.phase(), LinkPhase::Reconnecting { attempt: 1 });
    let opened_before = h.factory.attempt_count();

    // The retry makes attempt 1 now instead of counting a second one
    assert_ok!(h.manager.retry());
    assert_eq!(h.manager.retry_state().attempts, 2);
    assert_eq!(h.manager.phase(), LinkPhase::Reconnecting { attempt: 2 });

    h.advance_ms(10_000);

    assert_eq!(h.manager.phase(), LinkPhase::Failed);
    assert_eq!(h.factory.attempt_count() - opened_before, 3);
    assert_eq!(h.manager.retry_state().attempts, 3);
}

#[test]
fn test_manual_retry_during_backoff_counts_once() {
    let mut h = Harness::backend();
    h.manager.open(Stream::positions());
    h.factory.last().unwrap().sink.closed(1006, "dropped");
    h.pump();

    assert_ok!(h.manager.retry());
    assert_eq!(h.manager.retry_state().attempts, 1);
    assert_eq!(h.manager.phase(), LinkPhase::Connecting);
}

#[test]
fn test_auto_reconnects_counted() {
    let mut h = Harness::backend();
    h.manager.open(Stream::positions());
    assert_eq!(h.manager.auto_reconnects(), 0);

    h.factory.set_fail_opens(true);
    h.factory.last().unwrap().sink.closed(1006, "dropped");
    h.pump();
    assert_eq!(h.manager.auto_reconnects(), 1);

    h.advance_ms(10_000);
    assert_eq!(h.manager.phase(), LinkPhase::Failed);
    assert_eq!(h.manager.auto_reconnects(), 3);

    // Manual retries are not automatic reconnects
    assert_err!(h.manager.retry());
    assert_eq!(h.manager.auto_reconnects(), 3);
}

#[test]
fn test_open_url_selects_handling_by_path() {
    let mut h = Harness::mock();

    assert_ok!(h.manager.open_url("ws://anywhere/ws/prices?symbol=ETH%2FUSD&timeRange=1H"));
    assert!(h.manager.is_mock());
    assert_eq!(
        h.manager.stream(),
        Some(&Stream::prices("ETH/USD", TimeRange::OneHour))
    );
    assert_eq!(h.factory.attempt_count(), 0);

    assert_ok!(h.manager.open_url("ws://other/feed"));
    assert!(!h.manager.is_mock());
    assert_eq!(h.factory.last().unwrap().url, "ws://other/feed");

    assert_err!(h.manager.open_url("ws://anywhere/ws/prices?timeRange=1H"));
}
