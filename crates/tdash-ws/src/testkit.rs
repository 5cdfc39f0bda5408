//! In-memory transports and virtual-time helpers for driving a
//! [`ConnectionManager`] deterministically.

use crate::connection::ConnectionManager;
use crate::error::{WsError, WsResult};
use crate::transport::{EventReceiver, EventSink, Transport, TransportFactory};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tdash_core::ManualClock;

/// One connection opened through a [`FakeTransportFactory`].
#[derive(Debug)]
pub struct FakeConnection {
    pub url: String,
    pub sink: EventSink,
    sent: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl FakeConnection {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct FakeTransport {
    connection: Arc<FakeConnection>,
}

impl Transport for FakeTransport {
    fn send(&mut self, text: String) -> WsResult<()> {
        if self.connection.is_closed() {
            return Err(WsError::SendFailed("closed".to_string()));
        }
        self.connection.sent.lock().push(text);
        Ok(())
    }

    fn close(&mut self) {
        self.connection.closed.store(true, Ordering::SeqCst);
    }
}

/// Records every connection it opens; can be told to refuse opens.
#[derive(Debug, Default)]
pub struct FakeTransportFactory {
    connections: Mutex<Vec<Arc<FakeConnection>>>,
    fail_opens: AtomicBool,
    attempts: AtomicUsize,
}

impl FakeTransportFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_fail_opens(&self, fail: bool) {
        self.fail_opens.store(fail, Ordering::SeqCst);
    }

    pub fn connections(&self) -> Vec<Arc<FakeConnection>> {
        self.connections.lock().clone()
    }

    pub fn open_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Every open call, refused ones included.
    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn last(&self) -> Option<Arc<FakeConnection>> {
        self.connections.lock().last().cloned()
    }

    /// Connections not yet closed.
    pub fn live(&self) -> usize {
        self.connections
            .lock()
            .iter()
            .filter(|c| !c.is_closed())
            .count()
    }
}

impl TransportFactory for FakeTransportFactory {
    fn open(&self, url: &str, sink: EventSink) -> WsResult<Box<dyn Transport>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_opens.load(Ordering::SeqCst) {
            return Err(WsError::ConnectionFailed(format!("refused: {url}")));
        }
        let connection = Arc::new(FakeConnection {
            url: url.to_string(),
            sink,
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        self.connections.lock().push(connection.clone());
        Ok(Box::new(FakeTransport { connection }))
    }
}

/// Apply every queued transport event.
pub fn pump(manager: &mut ConnectionManager, events: &mut EventReceiver) {
    while let Ok(event) = events.try_recv() {
        manager.handle_event(event);
    }
}

/// Move virtual time forward by `by`, firing timers at their deadlines.
pub fn advance(manager: &mut ConnectionManager, clock: &ManualClock, by: Duration) {
    let by = chrono::Duration::milliseconds(by.as_millis() as i64);
    let target = tdash_core::Clock::now(clock) + by;
    loop {
        match manager.next_deadline() {
            Some(deadline) if deadline <= target => {
                clock.set(deadline);
                manager.fire_due_timers();
            }
            _ => break,
        }
    }
    clock.set(target);
    manager.fire_due_timers();
}
