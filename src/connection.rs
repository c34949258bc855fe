//! Background task owning the WebSocket connection.
//!
//! A single task owns the socket, the subscription registry, and the
//! reconnect timer.  Handles:
//!
//! - One socket per client instance (repeated `connect()` calls never open a second)
//! - Inbound event decode and dispatch to channel handlers
//! - Automatic reconnection with uncapped exponential backoff
//! - Re-announcing all subscribed channels in one frame after every (re)connect
//! - Cross-instance fan-out: peer frames from the in-process bus are dispatched
//!   as if they had arrived on the socket
//!
//! Socket errors are not handled separately from socket closes; an error
//! forces a close and both funnel into the same reconnect path.

use crate::{
    crosstab::TabFrame,
    error::{PulseLinkError, Result},
    models::{BroadcastEvent, ClientOptions, ControlFrame},
    notifier::{ConnectionState, StateCell, StateNotifier},
    registry::{Handler, SubscriptionRegistry, UnsubRequest},
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant as TokioInstant;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream};
use url::Url;

pub(crate) type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<TcpStream>>;

// ── Commands ────────────────────────────────────────────────────────────────

/// Commands sent from the public API to the background connection task.
pub(crate) enum ConnCmd {
    /// Open the socket if there is none and no reconnect attempt is pending.
    ///
    /// Idempotent: a no-op while the socket is open, while an attempt is in
    /// flight, or while a reconnect timer is armed.
    Connect,
    /// Cancel any pending reconnect timer, then close the socket.
    Disconnect {
        ack: oneshot::Sender<()>,
    },
    /// Register a handler under a channel.
    Subscribe {
        channel: String,
        id: u64,
        handler: Handler,
        ack: oneshot::Sender<()>,
    },
    /// Disconnect and stop the task.
    Shutdown {
        ack: Option<oneshot::Sender<()>>,
    },
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Delay before the Nth reconnect attempt (0-indexed): `base * 2^N`, uncapped.
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    Duration::from_millis(base_ms.saturating_mul(2u64.saturating_pow(attempt)))
}

/// Deadline for the next reconnect attempt, or `None` once the attempt
/// budget is spent.
fn next_backoff_deadline(options: &ClientOptions, attempts: u32) -> Option<TokioInstant> {
    if attempts >= options.max_reconnect_attempts {
        None
    } else {
        Some(TokioInstant::now() + backoff_delay(options.reconnect_delay_ms, attempts))
    }
}

/// Store the new state and notify observers, only on an actual change.
fn set_state(state: &StateCell, notifier: &StateNotifier, new_state: ConnectionState) {
    if state.swap(new_state) != new_state {
        log::debug!("[pulse-link] Connection state -> {}", new_state);
        notifier.notify(new_state);
    }
}

/// Open a WebSocket connection, bounded by the connection timeout.
async fn establish_ws(url: &Url, timeout: Duration) -> Result<WsStream> {
    log::debug!("[pulse-link] Connecting to {}", url);
    match tokio::time::timeout(timeout, connect_async(url.as_str())).await {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(e)) => Err(PulseLinkError::WebSocketError(format!(
            "Connection failed: {}",
            e
        ))),
        Err(_) => Err(PulseLinkError::TimeoutError(format!(
            "Connection attempt exceeded {:?}",
            timeout
        ))),
    }
}

/// Serialize and send one control frame over the socket.
async fn send_frame(ws: &mut WsStream, frame: &ControlFrame) -> Result<()> {
    let payload = serde_json::to_string(frame).map_err(|e| {
        PulseLinkError::WebSocketError(format!("Failed to serialize control frame: {}", e))
    })?;
    ws.send(Message::Text(payload.into()))
        .await
        .map_err(|e| PulseLinkError::WebSocketError(format!("Failed to send control frame: {}", e)))
}

/// Announce every currently subscribed channel in a single subscribe frame.
///
/// Sent after each successful (re)connect; the server has no memory of a
/// client's interest across connections.  With no subscribed channels no
/// frame is sent.
async fn send_resubscribe(ws: &mut WsStream, registry: &SubscriptionRegistry) {
    let channels = registry.channels();
    if channels.is_empty() {
        return;
    }
    log::info!("[pulse-link] Announcing {} channel(s)", channels.len());
    if let Err(e) = send_frame(ws, &ControlFrame::subscribe(channels)).await {
        log::warn!("[pulse-link] Failed to send subscribe frame: {}", e);
    }
}

/// Decode one inbound text frame.
///
/// Undecodable frames are discarded here with no state change; they never
/// reach dispatch.
fn decode_event(text: &str) -> Option<BroadcastEvent> {
    match serde_json::from_str(text) {
        Ok(event) => Some(event),
        Err(e) => {
            log::debug!("[pulse-link] Discarding undecodable frame: {}", e);
            None
        }
    }
}

// ── Background connection task ──────────────────────────────────────────────

/// The background task owning the socket, registry, and reconnect timer.
///
/// Lifecycle:
/// 1. Start disconnected; wait for a `Connect` command
/// 2. While connected: read socket frames + process commands + bus frames
/// 3. On socket loss: schedule a reconnect attempt with exponential backoff
/// 4. On reconnect: re-announce all subscribed channels in one frame
///
/// The attempt counter increments when a reconnect timer fires and the
/// attempt begins; it resets to zero only on a successful open.  Once the
/// budget is spent the state goes terminally `disconnected` and no further
/// timers are armed until an explicit `Connect`.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn connection_task(
    mut cmd_rx: mpsc::Receiver<ConnCmd>,
    mut unsub_rx: mpsc::UnboundedReceiver<UnsubRequest>,
    url: Url,
    options: ClientOptions,
    state: Arc<StateCell>,
    notifier: Arc<StateNotifier>,
    mut tab_rx: broadcast::Receiver<TabFrame>,
    tab_origin: u64,
) {
    let mut registry = SubscriptionRegistry::new();
    let mut ws_stream: Option<WsStream> = None;
    let mut backoff_deadline: Option<TokioInstant> = None;
    let mut attempts: u32 = 0;
    let mut shutdown_requested = false;
    let mut shutdown_ack: Option<oneshot::Sender<()>> = None;

    let connect_timeout = Duration::from_millis(options.connection_timeout_ms);

    loop {
        if shutdown_requested {
            if let Some(ref mut ws) = ws_stream {
                let _ = ws.close(None).await;
            }
            set_state(&state, &notifier, ConnectionState::Disconnected);
            if let Some(ack) = shutdown_ack.take() {
                let _ = ack.send(());
            }
            log::debug!("[pulse-link] Connection task stopped");
            return;
        }

        if let Some(ref mut ws) = ws_stream {
            // ── Connected: multiplex socket frames, commands, and the bus ──
            tokio::select! {
                biased;

                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(ConnCmd::Connect) => {
                            // Already open; a second socket is never created
                            log::debug!("[pulse-link] connect() ignored, already connected");
                        },
                        Some(ConnCmd::Disconnect { ack }) => {
                            backoff_deadline = None;
                            let _ = ws.close(None).await;
                            ws_stream = None;
                            set_state(&state, &notifier, ConnectionState::Disconnected);
                            let _ = ack.send(());
                        },
                        Some(ConnCmd::Subscribe { channel, id, handler, ack }) => {
                            if registry.add(&channel, id, handler) {
                                if let Err(e) =
                                    send_frame(ws, &ControlFrame::subscribe(vec![channel])).await
                                {
                                    log::warn!("[pulse-link] Failed to send subscribe frame: {}", e);
                                }
                            }
                            let _ = ack.send(());
                        },
                        Some(ConnCmd::Shutdown { ack }) => {
                            shutdown_requested = true;
                            shutdown_ack = ack;
                        },
                        None => {
                            shutdown_requested = true;
                        },
                    }
                }

                unsub = unsub_rx.recv() => {
                    if let Some((channel, id)) = unsub {
                        if registry.remove(&channel, id) {
                            if let Err(e) =
                                send_frame(ws, &ControlFrame::unsubscribe(vec![channel])).await
                            {
                                log::warn!("[pulse-link] Failed to send unsubscribe frame: {}", e);
                            }
                        }
                    }
                }

                frame = tab_rx.recv() => {
                    handle_tab_frame(frame, tab_origin, &registry);
                }

                frame = ws.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(event) = decode_event(&text) {
                                registry.dispatch(&event);
                            }
                        },
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = ws.send(Message::Pong(payload)).await;
                        },
                        Some(Ok(Message::Pong(_))) => {},
                        Some(Ok(Message::Binary(_))) => {
                            log::debug!("[pulse-link] Discarding binary frame");
                        },
                        Some(Ok(Message::Frame(_))) => {},
                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("[pulse-link] Connection closed");
                            ws_stream = None;
                            match next_backoff_deadline(&options, attempts) {
                                Some(deadline) => {
                                    backoff_deadline = Some(deadline);
                                    set_state(&state, &notifier, ConnectionState::Reconnecting);
                                },
                                None => {
                                    set_state(&state, &notifier, ConnectionState::Disconnected);
                                },
                            }
                        },
                        Some(Err(e)) => {
                            // An error forces a close; one recovery path
                            log::warn!("[pulse-link] WebSocket error: {}", e);
                            ws_stream = None;
                            match next_backoff_deadline(&options, attempts) {
                                Some(deadline) => {
                                    backoff_deadline = Some(deadline);
                                    set_state(&state, &notifier, ConnectionState::Reconnecting);
                                },
                                None => {
                                    set_state(&state, &notifier, ConnectionState::Disconnected);
                                },
                            }
                        },
                    }
                }
            }
        } else if let Some(deadline) = backoff_deadline {
            // ── Reconnect timer armed: wait for it, stay responsive ──
            let sleep = tokio::time::sleep_until(deadline);
            tokio::pin!(sleep);

            tokio::select! {
                biased;

                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(ConnCmd::Connect) => {
                            // The scheduled attempt stands
                            log::debug!("[pulse-link] connect() ignored, reconnect pending");
                        },
                        Some(ConnCmd::Disconnect { ack }) => {
                            // Timer cancelled before any socket work; a stale
                            // timer firing later must never spawn a connection
                            backoff_deadline = None;
                            set_state(&state, &notifier, ConnectionState::Disconnected);
                            let _ = ack.send(());
                        },
                        Some(ConnCmd::Subscribe { channel, id, handler, ack }) => {
                            // Interest is recorded now and flushed in the
                            // resubscribe frame on the next open
                            registry.add(&channel, id, handler);
                            let _ = ack.send(());
                        },
                        Some(ConnCmd::Shutdown { ack }) => {
                            shutdown_requested = true;
                            shutdown_ack = ack;
                        },
                        None => {
                            shutdown_requested = true;
                        },
                    }
                }

                unsub = unsub_rx.recv() => {
                    if let Some((channel, id)) = unsub {
                        registry.remove(&channel, id);
                    }
                }

                frame = tab_rx.recv() => {
                    handle_tab_frame(frame, tab_origin, &registry);
                }

                _ = &mut sleep => {
                    backoff_deadline = None;
                    attempts += 1;
                    log::info!("[pulse-link] Reconnect attempt {}", attempts);
                    set_state(&state, &notifier, ConnectionState::Connecting);
                    match establish_ws(&url, connect_timeout).await {
                        Ok(mut stream) => {
                            attempts = 0;
                            send_resubscribe(&mut stream, &registry).await;
                            ws_stream = Some(stream);
                            set_state(&state, &notifier, ConnectionState::Connected);
                        },
                        Err(e) => {
                            log::warn!("[pulse-link] Reconnect attempt failed: {}", e);
                            match next_backoff_deadline(&options, attempts) {
                                Some(deadline) => {
                                    backoff_deadline = Some(deadline);
                                    set_state(&state, &notifier, ConnectionState::Reconnecting);
                                },
                                None => {
                                    log::warn!(
                                        "[pulse-link] Reconnect attempts exhausted ({})",
                                        options.max_reconnect_attempts
                                    );
                                    set_state(&state, &notifier, ConnectionState::Disconnected);
                                },
                            }
                        },
                    }
                }
            }
        } else {
            // ── Disconnected, no timer: wait for commands or bus frames ──
            tokio::select! {
                biased;

                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(ConnCmd::Connect) => {
                            set_state(&state, &notifier, ConnectionState::Connecting);
                            match establish_ws(&url, connect_timeout).await {
                                Ok(mut stream) => {
                                    attempts = 0;
                                    send_resubscribe(&mut stream, &registry).await;
                                    ws_stream = Some(stream);
                                    set_state(&state, &notifier, ConnectionState::Connected);
                                },
                                Err(e) => {
                                    log::warn!("[pulse-link] Connection failed: {}", e);
                                    match next_backoff_deadline(&options, attempts) {
                                        Some(deadline) => {
                                            backoff_deadline = Some(deadline);
                                            set_state(&state, &notifier, ConnectionState::Reconnecting);
                                        },
                                        None => {
                                            set_state(&state, &notifier, ConnectionState::Disconnected);
                                        },
                                    }
                                },
                            }
                        },
                        Some(ConnCmd::Disconnect { ack }) => {
                            set_state(&state, &notifier, ConnectionState::Disconnected);
                            let _ = ack.send(());
                        },
                        Some(ConnCmd::Subscribe { channel, id, handler, ack }) => {
                            registry.add(&channel, id, handler);
                            let _ = ack.send(());
                        },
                        Some(ConnCmd::Shutdown { ack }) => {
                            shutdown_requested = true;
                            shutdown_ack = ack;
                        },
                        None => {
                            shutdown_requested = true;
                        },
                    }
                }

                unsub = unsub_rx.recv() => {
                    if let Some((channel, id)) = unsub {
                        registry.remove(&channel, id);
                    }
                }

                frame = tab_rx.recv() => {
                    handle_tab_frame(frame, tab_origin, &registry);
                }
            }
        }
    }
}

/// Dispatch a frame from the in-process bus, skipping this instance's own
/// emits.  Lagged listeners lose the oldest frames and keep going.
fn handle_tab_frame(
    frame: std::result::Result<TabFrame, broadcast::error::RecvError>,
    tab_origin: u64,
    registry: &SubscriptionRegistry,
) {
    match frame {
        Ok(frame) if frame.origin != tab_origin => registry.dispatch(&frame.event),
        Ok(_) => {},
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
            log::warn!(
                "[pulse-link] Cross-instance listener lagged, {} frame(s) dropped",
                skipped
            );
        },
        Err(broadcast::error::RecvError::Closed) => {},
    }
}
