//! Shared test helpers: an in-process broadcast server speaking the wire
//! protocol, plus small await utilities.
//!
//! The mock server accepts WebSocket connections, records every text frame
//! a client sends, and can push events to or drop live connections on
//! demand.  Tests drive failure scenarios (reconnect, exhaustion) by
//! killing connections or shutting the listener down entirely.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::Value as JsonValue;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::{accept_async, tungstenite::protocol::Message, WebSocketStream};

use pulse_link::{ConnectionState, PulseLinkClient};

static UNIQUE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Process-unique name, used to isolate fan-out buses between tests.
pub fn unique_bus(prefix: &str) -> String {
    let counter = UNIQUE_COUNTER.fetch_add(1, Ordering::Relaxed);
    let micros = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_micros();
    format!("{}_{}_{}", prefix, micros, counter)
}

/// An address nothing listens on; connection attempts fail immediately.
pub fn dead_url() -> String {
    "ws://127.0.0.1:1".to_string()
}

/// Poll until the client reaches `state` or `deadline` passes.
pub async fn wait_for_state(
    client: &PulseLinkClient,
    state: ConnectionState,
    deadline: Duration,
) -> bool {
    let end = tokio::time::Instant::now() + deadline;
    while tokio::time::Instant::now() < end {
        if client.state() == state {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    client.state() == state
}

enum ConnCtl {
    Send(String),
    Kill,
}

/// In-process broadcast server for driving the client under test.
pub struct MockServer {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    frames_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<JsonValue>>,
    conns: Arc<Mutex<Vec<mpsc::UnboundedSender<ConnCtl>>>>,
    accept_task: JoinHandle<()>,
}

impl MockServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let conns: Arc<Mutex<Vec<mpsc::UnboundedSender<ConnCtl>>>> =
            Arc::new(Mutex::new(Vec::new()));

        let accept_connections = Arc::clone(&connections);
        let accept_conns = Arc::clone(&conns);
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let Ok(ws) = accept_async(stream).await else {
                    continue;
                };
                accept_connections.fetch_add(1, Ordering::SeqCst);
                let (ctl_tx, ctl_rx) = mpsc::unbounded_channel();
                accept_conns.lock().unwrap().push(ctl_tx);
                tokio::spawn(serve_connection(ws, ctl_rx, frames_tx.clone()));
            }
        });

        Self {
            addr,
            connections,
            frames_rx: tokio::sync::Mutex::new(frames_rx),
            conns,
            accept_task,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Total connections accepted since start
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Next text frame sent by any client, or `None` if `deadline` passes.
    pub async fn next_frame(&self, deadline: Duration) -> Option<JsonValue> {
        tokio::time::timeout(deadline, async {
            self.frames_rx.lock().await.recv().await
        })
        .await
        .ok()
        .flatten()
    }

    /// Push a JSON event to every live connection.
    pub fn push(&self, event: JsonValue) {
        self.push_raw(&event.to_string());
    }

    /// Push a raw text frame (possibly malformed) to every live connection.
    pub fn push_raw(&self, text: &str) {
        self.conns
            .lock()
            .unwrap()
            .retain(|tx| tx.send(ConnCtl::Send(text.to_string())).is_ok());
    }

    /// Drop every live connection; the listener keeps accepting new ones.
    pub fn kill_connections(&self) {
        let mut conns = self.conns.lock().unwrap();
        for tx in conns.iter() {
            let _ = tx.send(ConnCtl::Kill);
        }
        conns.clear();
    }

    /// Stop accepting and drop every live connection.  Subsequent connect
    /// attempts against the server's address are refused.
    pub fn shutdown(&self) {
        self.accept_task.abort();
        self.kill_connections();
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve_connection(
    mut ws: WebSocketStream<TcpStream>,
    mut ctl_rx: mpsc::UnboundedReceiver<ConnCtl>,
    frames_tx: mpsc::UnboundedSender<JsonValue>,
) {
    loop {
        tokio::select! {
            ctl = ctl_rx.recv() => {
                match ctl {
                    Some(ConnCtl::Send(text)) => {
                        if ws.send(Message::Text(text.into())).await.is_err() {
                            return;
                        }
                    }
                    Some(ConnCtl::Kill) | None => {
                        let _ = ws.close(None).await;
                        return;
                    }
                }
            }
            frame = ws.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(value) = serde_json::from_str(&text) {
                            let _ = frames_tx.send(value);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => return,
                }
            }
        }
    }
}
