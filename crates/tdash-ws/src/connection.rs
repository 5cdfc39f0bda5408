//! Feed connection manager.
//!
//! Owns one logical subscription and its transport, and drives it through
//! an explicit state machine:
//!
//! ```text
//!   Idle ──open──▶ Connecting ──Opened──▶ Open
//!                     ▲   │                 │
//!             Reconnect   │ Closed/Error    │ Closed/Error/parse failure
//!               timer     ▼                 ▼
//!                Reconnecting(n) ◀──────────┤ (policy permits)
//!                                           ▼
//!                                         Failed (policy exhausted or
//!                                                 auto-reconnect off)
//! ```
//!
//! The manager does no I/O and never blocks. Transports come from a
//! [`TransportFactory`] and report through the event channel; deferred work
//! (reconnect backoff, mock ticks) is kept as timers read against the
//! injected [`Clock`]. Every timer carries the teardown epoch and every
//! event carries the transport generation, so work belonging to a torn-down
//! connection is dropped instead of resurrecting it.

use crate::error::WsResult;
use crate::retry::{RetryConfig, RetryDenied, RetryPolicy, RetryState};
use crate::transport::{
    EventSender, EventSink, Transport, TransportEvent, TransportEventKind, TransportFactory,
};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tdash_core::{Clock, ConnectionState, FeedError, Stream};
use tdash_feed::{parse_payload, MockConfig, MockFeedGenerator};
use tracing::{debug, error, info, trace, warn};

/// Base URL used to render stream URLs when no backend is configured.
pub const MOCK_BASE_URL: &str = "ws://localhost:8080";

/// Connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Backend base URL (e.g. `wss://dash.example.com`). When unset, price
    /// and position streams are served by the mock generator.
    #[serde(default)]
    pub backend_url: Option<String>,
    /// Reconnect automatically after a close or error.
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub mock: MockConfig,
}

fn default_auto_reconnect() -> bool {
    true
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            backend_url: None,
            auto_reconnect: default_auto_reconnect(),
            retry: RetryConfig::default(),
            mock: MockConfig::default(),
        }
    }
}

/// Lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum LinkPhase {
    Idle,
    Connecting,
    Open,
    Reconnecting { attempt: u32 },
    Failed,
}

impl LinkPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Reconnecting { .. } => "reconnecting",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for LinkPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reconnecting { attempt } => write!(f, "reconnecting({attempt})"),
            other => f.write_str(other.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    MockInitial,
    MockTick,
    Reconnect,
}

#[derive(Debug, Clone)]
struct Timer {
    deadline: DateTime<Utc>,
    kind: TimerKind,
    epoch: u64,
}

/// Connection manager for a single stream.
pub struct ConnectionManager {
    config: ConnectionConfig,
    clock: Arc<dyn Clock>,
    transports: Arc<dyn TransportFactory>,
    events_tx: EventSender,
    mock: MockFeedGenerator,
    retry: RetryPolicy,
    stream: Option<Stream>,
    state: ConnectionState,
    phase: LinkPhase,
    transport: Option<Box<dyn Transport>>,
    /// Generation of the current transport; bumped per connection attempt.
    generation: u64,
    /// Bumped on every teardown; timers from older epochs are dead.
    epoch: u64,
    timers: Vec<Timer>,
    /// Whether connectivity has been observed since the stream was opened.
    observed: bool,
    /// Reconnects scheduled after a close or error.
    auto_reconnects: u64,
}

impl ConnectionManager {
    /// Create an idle manager. Events from transports arrive on the
    /// receiver paired with `events_tx` and must be fed to
    /// [`handle_event`](Self::handle_event).
    pub fn new(
        config: ConnectionConfig,
        clock: Arc<dyn Clock>,
        transports: Arc<dyn TransportFactory>,
        events_tx: EventSender,
    ) -> Self {
        let mock = MockFeedGenerator::new(config.mock.clone());
        let retry = RetryPolicy::new(config.retry.clone());
        Self {
            config,
            clock,
            transports,
            events_tx,
            mock,
            retry,
            stream: None,
            state: ConnectionState::default(),
            phase: LinkPhase::Idle,
            transport: None,
            generation: 0,
            epoch: 0,
            timers: Vec::new(),
            observed: false,
            auto_reconnects: 0,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn phase(&self) -> LinkPhase {
        self.phase
    }

    pub fn stream(&self) -> Option<&Stream> {
        self.stream.as_ref()
    }

    /// Connectivity flag, `None` until the opened stream reported anything.
    pub fn connectivity(&self) -> Option<bool> {
        self.observed.then_some(self.state.is_connected)
    }

    pub fn retry_state(&self) -> RetryState {
        self.retry.state(self.clock.now())
    }

    /// Whether the current stream is served by the mock generator.
    pub fn is_mock(&self) -> bool {
        self.stream
            .as_ref()
            .is_some_and(|stream| self.serves_mock(stream))
    }

    /// URL of the current stream.
    pub fn current_url(&self) -> Option<String> {
        self.stream.as_ref().map(|stream| stream.url(self.base_url()))
    }

    /// Number of automatic reconnects scheduled over the manager's lifetime.
    pub fn auto_reconnects(&self) -> u64 {
        self.auto_reconnects
    }

    /// Earliest pending timer deadline.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.timers.iter().map(|timer| timer.deadline).min()
    }

    /// Subscribe to `stream`, replacing any current subscription.
    ///
    /// The previous transport and timers are released before the new stream
    /// starts. Re-opening the stream that is already live is a no-op.
    pub fn open(&mut self, stream: Stream) {
        if self.stream.as_ref() == Some(&stream)
            && !matches!(self.phase, LinkPhase::Idle | LinkPhase::Failed)
        {
            debug!(%stream, phase = %self.phase, "Stream already active");
            return;
        }

        self.teardown();
        info!(%stream, url = %stream.url(self.base_url()), "Opening feed stream");
        self.stream = Some(stream);
        self.state = ConnectionState::default();
        self.observed = false;
        self.start();
    }

    /// Subscribe to the stream a transport URL names.
    ///
    /// `/ws/prices` and `/ws/positions` URLs resolve to their streams, so
    /// they are served by the mock generator when no backend is configured;
    /// any other URL opens a generic socket.
    pub fn open_url(&mut self, url: &str) -> WsResult<()> {
        let stream = Stream::parse(url)?;
        self.open(stream);
        Ok(())
    }

    /// Release the transport, drop pending work and reset state.
    ///
    /// Idempotent.
    pub fn disconnect(&mut self) {
        if self.phase != LinkPhase::Idle || self.stream.is_some() {
            info!(stream = ?self.stream.as_ref().map(|s| s.to_string()), "Disconnecting feed");
        }
        self.teardown();
        self.stream = None;
        self.state = ConnectionState::default();
        self.phase = LinkPhase::Idle;
        self.observed = true;
    }

    /// Manual retry.
    ///
    /// Gated by the retry policy. During backoff the scheduled reconnect is
    /// made immediately. Otherwise a new attempt is counted. In both cases
    /// the stream's retry counter is bumped to force a fresh subscription.
    pub fn retry(&mut self) -> Result<(), RetryDenied> {
        let Some(stream) = self.stream.clone() else {
            debug!("Retry requested without an open stream");
            return Ok(());
        };
        if self.phase == LinkPhase::Open {
            debug!(%stream, "Retry requested while connected");
            return Ok(());
        }

        // A scheduled reconnect was already counted; the manual retry makes
        // that attempt now instead of counting another one.
        let scheduled = match self.phase {
            LinkPhase::Reconnecting { .. } => self.retry.take_over(),
            _ => None,
        };
        let attempt = match scheduled {
            Some(attempt) => attempt,
            None => self.retry.record_attempt(self.clock.now())?,
        };
        let next = stream.with_retry(stream.retry().wrapping_add(1));
        info!(%next, attempt, "Manual retry");

        self.teardown();
        self.stream = Some(next);
        self.start();
        Ok(())
    }

    /// Manual override of the retry policy ("Reset Connection").
    pub fn reset_retry(&mut self) {
        self.retry.reset();
    }

    /// Send a JSON message. Dropped (returns false) unless connected.
    pub fn send<M: Serialize + ?Sized>(&mut self, message: &M) -> bool {
        if !self.state.is_connected {
            debug!("Not connected, dropping outbound message");
            return false;
        }
        let Some(transport) = self.transport.as_mut() else {
            debug!("Mock stream has no outbound channel, dropping message");
            return false;
        };

        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Failed to serialize outbound message");
                return false;
            }
        };

        match transport.send(text) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Failed to send outbound message");
                false
            }
        }
    }

    /// Apply a transport event.
    pub fn handle_event(&mut self, event: TransportEvent) {
        if event.generation != self.generation || self.transport.is_none() {
            trace!(
                generation = event.generation,
                current = self.generation,
                "Dropping event from superseded transport"
            );
            return;
        }

        match event.kind {
            TransportEventKind::Opened => self.on_open(),
            TransportEventKind::Message(text) => self.on_message(&text),
            TransportEventKind::Closed { code, reason } => {
                info!(code, %reason, "Feed transport closed");
                self.transport = None;
                self.on_closed();
            }
            TransportEventKind::Error(message) => self.on_error(FeedError::Transport(message)),
        }
    }

    /// Run every timer whose deadline has passed, earliest first.
    pub fn fire_due_timers(&mut self) {
        let now = self.clock.now();
        let (mut due, pending): (Vec<Timer>, Vec<Timer>) = std::mem::take(&mut self.timers)
            .into_iter()
            .partition(|timer| timer.deadline <= now);
        self.timers = pending;
        due.sort_by_key(|timer| timer.deadline);

        for timer in due {
            if timer.epoch != self.epoch {
                trace!(kind = ?timer.kind, "Dropping timer from torn-down connection");
                continue;
            }
            match timer.kind {
                TimerKind::MockInitial => self.on_mock_initial(),
                TimerKind::MockTick => self.on_mock_tick(),
                TimerKind::Reconnect => self.on_reconnect_due(),
            }
        }
    }

    fn base_url(&self) -> &str {
        self.config.backend_url.as_deref().unwrap_or(MOCK_BASE_URL)
    }

    fn serves_mock(&self, stream: &Stream) -> bool {
        self.config.backend_url.is_none() && stream.is_mockable()
    }

    fn start(&mut self) {
        let Some(stream) = self.stream.clone() else {
            return;
        };

        if self.serves_mock(&stream) {
            self.start_mock();
        } else {
            self.connect_transport(&stream);
        }
    }

    fn start_mock(&mut self) {
        self.phase = LinkPhase::Open;
        self.state.is_connected = true;
        self.state.error = None;
        self.observed = true;
        self.retry.record_success();
        let delay = self.mock.config().initial_delay();
        self.schedule(TimerKind::MockInitial, delay);
        debug!(delay_ms = delay.as_millis() as u64, "Mock feed started");
    }

    fn connect_transport(&mut self, stream: &Stream) {
        self.phase = LinkPhase::Connecting;
        self.generation += 1;
        let url = stream.url(self.base_url());
        let sink = EventSink::new(self.generation, self.events_tx.clone());

        match self.transports.open(&url, sink) {
            Ok(transport) => {
                debug!(%url, generation = self.generation, "Transport connecting");
                self.transport = Some(transport);
            }
            Err(e) => {
                error!(%url, error = %e, "Failed to start transport");
                self.state.error = Some(FeedError::Transport(e.to_string()));
                self.state.is_connected = false;
                self.on_closed();
            }
        }
    }

    fn on_open(&mut self) {
        self.phase = LinkPhase::Open;
        self.state.is_connected = true;
        self.state.error = None;
        self.observed = true;
        self.retry.record_success();
        info!(generation = self.generation, "Feed connected");
    }

    fn on_message(&mut self, text: &str) {
        let Some(kind) = self.stream.as_ref().map(|stream| stream.kind()) else {
            return;
        };

        match parse_payload(kind, text) {
            Ok(data) => {
                self.state.data = Some(data);
                self.state.error = None;
            }
            Err(e) => {
                warn!(error = %e, "Malformed feed message, closing connection");
                self.on_error(e);
            }
        }
    }

    /// Errors always end the current attempt.
    fn on_error(&mut self, error: FeedError) {
        warn!(%error, "Feed error");
        self.state.error = Some(error);
        self.state.is_connected = false;
        self.close_transport();
        self.on_closed();
    }

    fn on_closed(&mut self) {
        self.state.is_connected = false;
        self.observed = true;
        self.retry.record_failure();

        if !self.config.auto_reconnect {
            self.phase = LinkPhase::Failed;
            return;
        }

        match self.retry.record_attempt(self.clock.now()) {
            Ok(attempt) => {
                let delay = self.retry.backoff_delay(attempt);
                warn!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");
                self.phase = LinkPhase::Reconnecting { attempt };
                self.auto_reconnects += 1;
                self.schedule(TimerKind::Reconnect, delay);
            }
            Err(denied) => {
                error!(%denied, "Not reconnecting");
                self.phase = LinkPhase::Failed;
            }
        }
    }

    fn on_reconnect_due(&mut self) {
        let Some(stream) = self.stream.clone() else {
            return;
        };
        debug!(%stream, "Reconnect timer fired");
        if self.serves_mock(&stream) {
            self.start_mock();
        } else {
            self.connect_transport(&stream);
        }
    }

    fn on_mock_initial(&mut self) {
        let Some(stream) = self.stream.clone() else {
            return;
        };
        let now = self.clock.now();
        self.state.data = self.mock.initial_payload(&stream, now);
        if let Some(interval) = self.mock.tick_interval(&stream) {
            self.schedule(TimerKind::MockTick, interval);
        }
    }

    fn on_mock_tick(&mut self) {
        let Some(stream) = self.stream.clone() else {
            return;
        };
        let now = self.clock.now();
        if let Some(data) = self.state.data.as_mut() {
            self.mock.tick(data, now);
        }
        if let Some(interval) = self.mock.tick_interval(&stream) {
            self.schedule(TimerKind::MockTick, interval);
        }
    }

    fn schedule(&mut self, kind: TimerKind, delay: Duration) {
        let now = self.clock.now();
        let deadline = i64::try_from(delay.as_millis())
            .ok()
            .and_then(TimeDelta::try_milliseconds)
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.timers.push(Timer {
            deadline,
            kind,
            epoch: self.epoch,
        });
    }

    fn close_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
    }

    /// Invalidate all deferred work and release the transport.
    fn teardown(&mut self) {
        self.epoch += 1;
        self.timers.clear();
        self.close_transport();
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("stream", &self.stream)
            .field("phase", &self.phase)
            .field("generation", &self.generation)
            .field("epoch", &self.epoch)
            .field("timers", &self.timers.len())
            .finish()
    }
}
