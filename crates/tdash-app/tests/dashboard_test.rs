//! Dashboard integration tests.
//!
//! Mounts the dashboard on the in-memory transport factory (backend mode)
//! or the mock generator and checks status, retry controls and summary.

use std::sync::Arc;
use std::time::Duration;
use tdash_app::{AppConfig, Application, Dashboard, Feed, RetryAffordance};
use tdash_core::{
    ConnectionState, ConnectivityStatus, DownFeed, FeedError, SystemClock, TimeRange,
};
use tdash_telemetry::metrics::RECONNECT_TOTAL;
use tdash_ws::testkit::FakeTransportFactory;
use tdash_ws::{ConnectionConfig, LinkPhase, RetryDenied};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_test::{assert_err, assert_ok};

fn backend_config(auto_reconnect: bool) -> ConnectionConfig {
    ConnectionConfig {
        backend_url: Some("ws://backend:9000".to_string()),
        auto_reconnect,
        ..Default::default()
    }
}

fn mount_backend(auto_reconnect: bool) -> (Dashboard, Arc<FakeTransportFactory>) {
    let factory = FakeTransportFactory::new();
    let dashboard = Dashboard::mount(
        backend_config(auto_reconnect),
        "SOL/USD".to_string(),
        TimeRange::OneDay,
        Arc::new(SystemClock),
        factory.clone(),
    );
    (dashboard, factory)
}

async fn wait_for(
    rx: &mut watch::Receiver<ConnectionState>,
    what: &str,
    f: impl FnMut(&ConnectionState) -> bool,
) {
    timeout(Duration::from_secs(2), rx.wait_for(f))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
        .unwrap();
}

/// Both feeds connect, then positions drop: connected, then partial.
#[tokio::test]
async fn test_status_transitions() {
    let (dashboard, factory) = mount_backend(true);
    let mut prices_rx = dashboard.subscribe(Feed::Prices);
    let mut positions_rx = dashboard.subscribe(Feed::Positions);

    assert_eq!(dashboard.status(), ConnectivityStatus::Loading);
    assert_eq!(dashboard.retry_affordance(), RetryAffordance::Hidden);

    let connections = factory.connections();
    assert_eq!(connections.len(), 2);
    assert!(connections[0].url.contains("/ws/prices?symbol=SOL%2FUSD&timeRange=24H"));
    assert!(connections[1].url.ends_with("/ws/positions?retry=0"));

    connections[0].sink.opened();
    wait_for(&mut prices_rx, "prices connected", |s| s.is_connected).await;
    assert_eq!(dashboard.status(), ConnectivityStatus::Loading);

    connections[1].sink.opened();
    wait_for(&mut positions_rx, "positions connected", |s| s.is_connected).await;
    assert_eq!(dashboard.status(), ConnectivityStatus::Connected);
    assert_eq!(
        dashboard.tooltip(),
        "Price feed: Connected\nPosition tracking: Connected"
    );

    connections[1].sink.error("reset by peer");
    wait_for(&mut positions_rx, "positions error", |s| s.error.is_some()).await;

    assert_eq!(
        dashboard.status(),
        ConnectivityStatus::Partial(DownFeed::Positions)
    );
    assert_eq!(dashboard.retry_affordance(), RetryAffordance::Available);
    assert_eq!(
        dashboard.alert(),
        Some(FeedError::Transport("reset by peer".to_string()))
    );

    // The scheduled reconnect is exported under the `auto` trigger
    assert_eq!(dashboard.feed(Feed::Positions).auto_reconnects(), 1);
    let auto = || {
        RECONNECT_TOTAL
            .with_label_values(&["positions", "auto"])
            .get()
    };
    let before = auto();
    dashboard.record_metrics();
    assert!(auto() - before >= 1.0);

    dashboard.unmount().await;
}

/// Three failed manual retries exhaust the policy; reset re-enables it.
#[tokio::test]
async fn test_retry_exhaustion_and_reset() {
    let (dashboard, factory) = mount_backend(false);
    let mut positions_rx = dashboard.subscribe(Feed::Positions);
    let mut prices_rx = dashboard.subscribe(Feed::Prices);

    let connections = factory.connections();
    connections[0].sink.opened();
    wait_for(&mut prices_rx, "prices connected", |s| s.is_connected).await;
    factory.set_fail_opens(true);
    connections[1].sink.closed(1006, "dropped");
    wait_for(&mut positions_rx, "positions down", |s| !s.is_connected).await;
    timeout(Duration::from_secs(2), async {
        while dashboard.feed(Feed::Positions).phase() != LinkPhase::Failed {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("positions feed failed");

    for _ in 0..3 {
        assert_ok!(dashboard.retry());
    }
    let denied = assert_err!(dashboard.retry());
    assert!(matches!(denied, RetryDenied::CoolingDown { .. }));

    match dashboard.retry_affordance() {
        RetryAffordance::CoolingDown { remaining_secs } => {
            assert!(remaining_secs > 0 && remaining_secs <= 30)
        }
        other => panic!("expected cooldown, got {other:?}"),
    }
    assert_eq!(
        dashboard.alert(),
        Some(FeedError::MaxRetriesExceeded { attempts: 3 })
    );

    // The connected price feed was never retried
    assert_eq!(factory.connections()[0].url, connections[0].url);
    assert_eq!(dashboard.feed(Feed::Prices).retry_state().attempts, 0);

    factory.set_fail_opens(false);
    assert_ok!(dashboard.reset_connection());
    assert_eq!(dashboard.retry_affordance(), RetryAffordance::Available);
    assert!(factory
        .last()
        .unwrap()
        .url
        .ends_with("/ws/positions?retry=4"));

    dashboard.unmount().await;
}

#[tokio::test]
async fn test_time_range_change_reopens_prices() {
    let (mut dashboard, factory) = mount_backend(true);

    dashboard.set_time_range(TimeRange::OneHour);
    dashboard.set_time_range(TimeRange::OneHour);

    let connections = factory.connections();
    assert_eq!(connections.len(), 3);
    assert!(connections[0].is_closed());
    assert!(connections[2].url.contains("timeRange=1H"));
    assert!(!connections[1].is_closed(), "positions feed untouched");

    dashboard.set_symbol("ETH/USD").unwrap();
    assert!(factory.last().unwrap().url.contains("symbol=ETH%2FUSD&timeRange=1H"));
    assert!(dashboard.set_symbol("  ").is_err());

    dashboard.unmount().await;
    assert_eq!(factory.live(), 0);
}

/// With no backend both feeds come from the mock generator.
#[tokio::test]
async fn test_mock_dashboard_summary() {
    let mut connection = ConnectionConfig::default();
    connection.mock.initial_delay_ms = 10;
    connection.mock.seed = Some(3);

    let dashboard = Dashboard::mount(
        connection,
        "SOL/USD".to_string(),
        TimeRange::SevenDays,
        Arc::new(SystemClock),
        FakeTransportFactory::new(),
    );
    let mut prices_rx = dashboard.subscribe(Feed::Prices);
    let mut positions_rx = dashboard.subscribe(Feed::Positions);

    assert_eq!(dashboard.status(), ConnectivityStatus::Connected);

    wait_for(&mut prices_rx, "mock prices", |s| s.data.is_some()).await;
    wait_for(&mut positions_rx, "mock positions", |s| s.data.is_some()).await;

    let summary = dashboard.summary();
    assert_eq!(summary.symbol, "SOL/USD");
    assert_eq!(summary.time_range, TimeRange::SevenDays);
    assert!(summary.last_price.is_some());
    assert!(summary.change_pct.is_some());
    assert_eq!(summary.position_count, 1);
    assert_eq!(summary.total_pnl, 25.0);

    dashboard.unmount().await;
}

/// The application stops on `quit` and unmounts the dashboard.
#[tokio::test]
async fn test_application_runs_commands_until_quit() {
    let (dashboard, factory) = mount_backend(true);
    let mut config = AppConfig::default();
    config.telemetry.status_interval_ms = 10;

    let app = Application::with_dashboard(config, dashboard);
    let input: &[u8] = b"status\nrange 7D\nbogus\nsymbol BTC/USD\nquit\n";

    timeout(Duration::from_secs(2), app.run(input))
        .await
        .expect("application stopped")
        .unwrap();

    let urls: Vec<String> = factory.connections().iter().map(|c| c.url.clone()).collect();
    assert!(urls.iter().any(|u| u.contains("timeRange=7D")));
    assert!(urls.iter().any(|u| u.contains("symbol=BTC%2FUSD")));
    assert_eq!(factory.live(), 0);
}

#[tokio::test]
async fn test_application_stops_on_shutdown_token() {
    let (dashboard, factory) = mount_backend(true);
    let app = Application::with_dashboard(AppConfig::default(), dashboard);
    let shutdown = app.shutdown_token();

    let run = tokio::spawn(app.run(&b""[..]));
    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown.cancel();

    timeout(Duration::from_secs(2), run)
        .await
        .expect("application stopped")
        .unwrap()
        .unwrap();
    assert_eq!(factory.live(), 0);
}
