//! WebSocket transport backed by tokio-tungstenite.
//!
//! Each [`WsTransport`] owns one spawned socket task. The task reports the
//! handshake, inbound text frames, closes and errors through its
//! [`EventSink`]; outbound frames travel over an unbounded channel. Closing
//! the transport cancels the task, which sends a Close frame on its way out.

use crate::error::{WsError, WsResult};
use crate::transport::{EventSink, Transport, TransportFactory};
use futures_util::{SinkExt, StreamExt};
use std::fmt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async_tls_with_config, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Abnormal closure, used when the stream ends without a Close frame.
const CLOSE_ABNORMAL: u16 = 1006;

/// Opens real WebSocket connections on the current tokio runtime.
#[derive(Clone, Default)]
pub struct WsTransportFactory {
    bearer_token: Option<String>,
}

impl WsTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send `Authorization: Bearer <token>` with every handshake.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    fn build_request(&self, url: &str) -> WsResult<Request> {
        let mut request = url.into_client_request()?;
        if let Some(token) = &self.bearer_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| WsError::InvalidRequest(format!("authorization header: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        Ok(request)
    }
}

impl fmt::Debug for WsTransportFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsTransportFactory")
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl TransportFactory for WsTransportFactory {
    fn open(&self, url: &str, sink: EventSink) -> WsResult<Box<dyn Transport>> {
        let request = self.build_request(url)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| WsError::ConnectionFailed(format!("no tokio runtime: {e}")))?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        runtime.spawn(run_socket(request, sink, outbound_rx, cancel.clone()));

        Ok(Box::new(WsTransport { outbound_tx, cancel }))
    }
}

/// Handle to one spawned socket task.
#[derive(Debug)]
pub struct WsTransport {
    outbound_tx: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

impl Transport for WsTransport {
    fn send(&mut self, text: String) -> WsResult<()> {
        if self.cancel.is_cancelled() {
            return Err(WsError::SendFailed("transport closed".to_string()));
        }
        self.outbound_tx
            .send(text)
            .map_err(|_| WsError::SendFailed("socket task ended".to_string()))
    }

    fn close(&mut self) {
        self.cancel.cancel();
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_socket(
    request: Request,
    sink: EventSink,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) {
    let uri = request.uri().to_string();
    info!(url = %uri, generation = sink.generation(), "Connecting to WebSocket");

    // TCP_NODELAY on
    let connect = connect_async_tls_with_config(request, None, true, None);
    let ws_stream = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            debug!(url = %uri, "Connect cancelled");
            return;
        }
        result = connect => match result {
            Ok((ws_stream, _response)) => ws_stream,
            Err(e) => {
                error!(url = %uri, ?e, "WebSocket connect failed");
                sink.error(e.to_string());
                return;
            }
        }
    };

    let (mut write, mut read) = ws_stream.split();
    info!(url = %uri, "WebSocket connected");
    if !sink.opened() {
        return;
    }

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(url = %uri, "Closing WebSocket");
                if let Err(e) = write.send(Message::Close(None)).await {
                    warn!(?e, "Failed to send Close frame");
                }
                return;
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if !sink.message(text) {
                            return;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        if !sink.message(String::from_utf8_lossy(&data).into_owned()) {
                            return;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        debug!("Received ping, sending pong");
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            sink.error(e.to_string());
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.to_string()))
                            .unwrap_or((1000, "Normal close".to_string()));
                        warn!(code, %reason, "WebSocket closed by server");
                        sink.closed(code, reason);
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(?e, "WebSocket read error");
                        sink.error(e.to_string());
                        return;
                    }
                    None => {
                        warn!("WebSocket stream ended");
                        sink.closed(CLOSE_ABNORMAL, "stream ended");
                        return;
                    }
                }
            }

            outbound = outbound_rx.recv() => {
                let Some(text) = outbound else {
                    return;
                };
                if let Err(e) = write.send(Message::Text(text)).await {
                    error!(?e, "WebSocket write error");
                    sink.error(e.to_string());
                    return;
                }
            }
        }
    }
}
