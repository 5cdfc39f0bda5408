//! Mock WebSocket server for integration tests.
//!
//! Provides a simple WebSocket server that can:
//! - Accept connections and record their request path and auth header
//! - Push a greeting payload to every new connection
//! - Record received messages
//! - Close every open connection on demand

use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message};

/// Handshake details of one accepted connection.
#[derive(Debug, Clone)]
pub struct Accepted {
    pub path: String,
    pub authorization: Option<String>,
}

#[derive(Clone)]
struct ServerState {
    greeting: Option<String>,
    messages: Arc<Mutex<VecDeque<String>>>,
    accepted: Arc<Mutex<Vec<Accepted>>>,
    kick_tx: broadcast::Sender<()>,
}

/// A mock WebSocket server for testing.
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    state: ServerState,
}

impl MockWsServer {
    /// Start a server on an available port.
    pub async fn start() -> Self {
        Self::start_with_greeting(None).await
    }

    /// Start a server that sends `greeting` to each client after the handshake.
    pub async fn start_with_greeting(greeting: Option<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (kick_tx, _) = broadcast::channel(4);

        let state = ServerState {
            greeting,
            messages: Arc::new(Mutex::new(VecDeque::new())),
            accepted: Arc::new(Mutex::new(Vec::new())),
            kick_tx,
        };

        let server_state = state.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        tokio::spawn(handle_connection(stream, server_state.clone()));
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            state,
        }
    }

    /// Base URL of the server.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Number of completed handshakes.
    pub async fn connection_count(&self) -> usize {
        self.state.accepted.lock().await.len()
    }

    pub async fn accepted(&self) -> Vec<Accepted> {
        self.state.accepted.lock().await.clone()
    }

    /// Get all received messages.
    pub async fn received_messages(&self) -> Vec<String> {
        self.state.messages.lock().await.iter().cloned().collect()
    }

    /// Close every open connection with a normal Close frame.
    pub fn kick_all(&self) {
        let _ = self.state.kick_tx.send(());
    }

    /// Shutdown the server.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(stream: TcpStream, state: ServerState) {
    let seen = Arc::new(std::sync::Mutex::new(None::<Accepted>));
    let seen_cb = seen.clone();
    let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let accepted = Accepted {
            path: request
                .uri()
                .path_and_query()
                .map(|pq| pq.to_string())
                .unwrap_or_default(),
            authorization: request
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        };
        *seen_cb.lock().unwrap() = Some(accepted);
        Ok(response)
    };

    let ws_stream = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    let accepted = seen.lock().unwrap().take();
    if let Some(accepted) = accepted {
        state.accepted.lock().await.push(accepted);
    }

    let mut kick_rx = state.kick_tx.subscribe();
    let (mut write, mut read) = ws_stream.split();

    if let Some(greeting) = &state.greeting {
        let _ = write.send(Message::Text(greeting.clone())).await;
    }

    loop {
        tokio::select! {
            _ = kick_rx.recv() => {
                let frame = CloseFrame {
                    code: CloseCode::Away,
                    reason: "server restart".into(),
                };
                let _ = write.send(Message::Close(Some(frame))).await;
                break;
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    state.messages.lock().await.push_back(text);
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                _ => {}
            }
        }
    }
}
