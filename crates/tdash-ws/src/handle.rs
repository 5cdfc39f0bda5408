//! Async driver for a [`ConnectionManager`].
//!
//! [`spawn_feed`] moves a manager into a tokio task that applies transport
//! events and fires timers as they fall due. The returned [`FeedHandle`] is
//! cheap to clone; every change to the connection state is published on a
//! watch channel. Dropping the last clone stops the driver.

use crate::connection::{ConnectionConfig, ConnectionManager, LinkPhase};
use crate::error::WsResult;
use crate::retry::{RetryDenied, RetryState};
use crate::transport::{event_channel, EventReceiver, TransportFactory};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tdash_core::{Clock, ConnectionState, Stream};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info};

struct FeedShared {
    manager: Mutex<ConnectionManager>,
    /// Wakes the driver after a call that may have changed timers.
    wake: Notify,
    state_tx: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
}

impl FeedShared {
    fn publish(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    fn with_manager<R>(&self, f: impl FnOnce(&mut ConnectionManager) -> R) -> R {
        let (result, state) = {
            let mut manager = self.manager.lock();
            let result = f(&mut manager);
            (result, manager.state().clone())
        };
        self.publish(state);
        self.wake.notify_one();
        result
    }
}

/// Handle to a running feed.
#[derive(Clone)]
pub struct FeedHandle {
    shared: Arc<FeedShared>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
    /// Cancels `shutdown` once every clone is gone.
    _stop_on_drop: Arc<DropGuard>,
}

/// Spawn a feed driver on the current tokio runtime.
pub fn spawn_feed(
    config: ConnectionConfig,
    clock: Arc<dyn Clock>,
    transports: Arc<dyn TransportFactory>,
) -> FeedHandle {
    let (events_tx, events_rx) = event_channel();
    let manager = ConnectionManager::new(config, clock.clone(), transports, events_tx);
    let (state_tx, _) = watch::channel(ConnectionState::default());

    let shared = Arc::new(FeedShared {
        manager: Mutex::new(manager),
        wake: Notify::new(),
        state_tx,
        shutdown: CancellationToken::new(),
    });

    let stop_on_drop = shared.shutdown.clone().drop_guard();
    let task = tokio::spawn(drive(shared.clone(), events_rx, clock));
    FeedHandle {
        shared,
        task: Arc::new(Mutex::new(Some(task))),
        _stop_on_drop: Arc::new(stop_on_drop),
    }
}

async fn drive(shared: Arc<FeedShared>, mut events: EventReceiver, clock: Arc<dyn Clock>) {
    debug!("Feed driver started");
    loop {
        let deadline = shared.manager.lock().next_deadline();
        let sleep = async {
            match deadline {
                Some(deadline) => {
                    let wait = (deadline - clock.now()).to_std().unwrap_or_default();
                    tokio::time::sleep(wait).await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;

            () = shared.shutdown.cancelled() => break,

            event = events.recv() => {
                // The manager holds a sender, so the channel never closes
                // while the driver is running.
                let Some(event) = event else { break };
                let state = {
                    let mut manager = shared.manager.lock();
                    manager.handle_event(event);
                    manager.state().clone()
                };
                shared.publish(state);
            }

            () = sleep => {
                let state = {
                    let mut manager = shared.manager.lock();
                    manager.fire_due_timers();
                    manager.state().clone()
                };
                shared.publish(state);
            }

            () = shared.wake.notified() => {}
        }
    }

    let state = {
        let mut manager = shared.manager.lock();
        manager.disconnect();
        manager.state().clone()
    };
    shared.publish(state);
    debug!("Feed driver stopped");
}

impl FeedHandle {
    /// Subscribe to `stream`, replacing the current subscription.
    pub fn open(&self, stream: Stream) {
        self.shared.with_manager(|m| m.open(stream));
    }

    /// Subscribe to the stream a transport URL names.
    pub fn open_url(&self, url: &str) -> WsResult<()> {
        self.shared.with_manager(|m| m.open_url(url))
    }

    pub fn disconnect(&self) {
        self.shared.with_manager(ConnectionManager::disconnect);
    }

    pub fn retry(&self) -> Result<(), RetryDenied> {
        self.shared.with_manager(ConnectionManager::retry)
    }

    pub fn reset_retry(&self) {
        self.shared.with_manager(ConnectionManager::reset_retry);
    }

    /// Send a JSON message; false when not connected.
    pub fn send<M: Serialize + ?Sized>(&self, message: &M) -> bool {
        self.shared.manager.lock().send(message)
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.manager.lock().state().clone()
    }

    pub fn connectivity(&self) -> Option<bool> {
        self.shared.manager.lock().connectivity()
    }

    pub fn retry_state(&self) -> RetryState {
        self.shared.manager.lock().retry_state()
    }

    /// Automatic reconnects scheduled since the feed was spawned.
    pub fn auto_reconnects(&self) -> u64 {
        self.shared.manager.lock().auto_reconnects()
    }

    pub fn phase(&self) -> LinkPhase {
        self.shared.manager.lock().phase()
    }

    pub fn stream(&self) -> Option<Stream> {
        self.shared.manager.lock().stream().cloned()
    }

    pub fn current_url(&self) -> Option<String> {
        self.shared.manager.lock().current_url()
    }

    /// Watch connection state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        !self.shared.shutdown.is_cancelled()
    }

    /// Stop the driver and release the connection. Idempotent.
    pub async fn shutdown(&self) {
        if !self.shared.shutdown.is_cancelled() {
            info!("Shutting down feed");
            self.shared.shutdown.cancel();
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Signal the driver to stop without waiting for it.
    pub fn stop(&self) {
        self.shared.shutdown.cancel();
    }
}

impl std::fmt::Debug for FeedHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedHandle")
            .field("running", &self.is_running())
            .finish()
    }
}
