//! Feed connection management for tdash.
//!
//! Provides resilient feed subscriptions with:
//! - A synchronous connection state machine with generation-tagged events
//! - Automatic reconnection with exponential backoff
//! - A shared retry policy (max attempts, cooldown, manual reset)
//! - Mock price and position streams when no backend is configured
//! - A tokio driver publishing state over a watch channel

pub mod connection;
pub mod error;
pub mod handle;
pub mod retry;
pub mod socket;
#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
pub mod transport;

pub use connection::{ConnectionConfig, ConnectionManager, LinkPhase, MOCK_BASE_URL};
pub use error::{WsError, WsResult};
pub use handle::{spawn_feed, FeedHandle};
pub use retry::{RetryConfig, RetryDenied, RetryPolicy, RetryState};
pub use socket::{WsTransport, WsTransportFactory};
pub use transport::{
    event_channel, EventReceiver, EventSender, EventSink, Transport, TransportEvent,
    TransportEventKind, TransportFactory,
};
