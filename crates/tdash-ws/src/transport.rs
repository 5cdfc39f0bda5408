//! Transport abstraction.
//!
//! A transport is one bidirectional connection attempt. Transports report
//! back through an [`EventSink`] that stamps every event with the
//! generation of the connection it belongs to; the connection manager
//! discards events from generations it has already torn down.

use crate::error::WsResult;
use tokio::sync::mpsc;
use tracing::trace;

/// What happened on a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEventKind {
    /// Handshake completed.
    Opened,
    /// Text frame received.
    Message(String),
    /// Connection closed (by peer or end of stream).
    Closed { code: u16, reason: String },
    /// Connection failed. No further events follow for this generation.
    Error(String),
}

/// A transport event tagged with its connection generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    pub generation: u64,
    pub kind: TransportEventKind,
}

/// Sending half of the manager's event channel.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Receiving half of the manager's event channel.
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Create the event channel shared by a manager and its transports.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Handle a transport uses to report events for one generation.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: EventSender,
}

impl EventSink {
    pub fn new(generation: u64, tx: EventSender) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Emit an event. Returns false once the manager is gone.
    pub fn emit(&self, kind: TransportEventKind) -> bool {
        let delivered = self
            .tx
            .send(TransportEvent {
                generation: self.generation,
                kind,
            })
            .is_ok();
        if !delivered {
            trace!(generation = self.generation, "Event receiver dropped");
        }
        delivered
    }

    pub fn opened(&self) -> bool {
        self.emit(TransportEventKind::Opened)
    }

    pub fn message(&self, text: impl Into<String>) -> bool {
        self.emit(TransportEventKind::Message(text.into()))
    }

    pub fn closed(&self, code: u16, reason: impl Into<String>) -> bool {
        self.emit(TransportEventKind::Closed {
            code,
            reason: reason.into(),
        })
    }

    pub fn error(&self, message: impl Into<String>) -> bool {
        self.emit(TransportEventKind::Error(message.into()))
    }
}

/// One live connection attempt.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send {
    /// Queue a text frame.
    fn send(&mut self, text: String) -> WsResult<()>;

    /// Close the connection. Must be idempotent; no events are required
    /// after close.
    fn close(&mut self);
}

/// Produces transports for stream URLs.
pub trait TransportFactory: Send + Sync {
    /// Start connecting to `url`. Connection progress is reported through
    /// `sink`; a returned error means the attempt could not even start.
    fn open(&self, url: &str, sink: EventSink) -> WsResult<Box<dyn Transport>>;
}
