//! Broadcast client with builder pattern.
//!
//! Provides the primary interface for connecting to a broadcast server,
//! subscribing to channels, and emitting events to peer instances.

use crate::{
    connection::{connection_task, ConnCmd},
    crosstab::CrossTabChannel,
    error::{PulseLinkError, Result},
    models::{BroadcastEvent, ClientOptions},
    notifier::{ConnectionState, StateCell, StateListenerGuard, StateNotifier},
    registry::{Handler, Subscription, UnsubRequest},
};
use serde_json::{Map, Value as JsonValue};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use url::Url;

/// Capacity of the command channel to the connection task
const CMD_CHANNEL_CAPACITY: usize = 256;

/// Broadcast client.
///
/// Use [`PulseLinkClient::builder`] to construct instances.  The client is
/// a cheap handle; clones share the same connection.
///
/// # Examples
///
/// ```rust,no_run
/// use pulse_link::PulseLinkClient;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = PulseLinkClient::builder()
///     .url("ws://localhost:3000/broadcast")
///     .build()?;
/// client.connect().await;
///
/// let sub = client
///     .subscribe("orders", |event| {
///         println!("order event: {}", event.event);
///     })
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PulseLinkClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    /// Channel to the background connection task
    cmd_tx: mpsc::Sender<ConnCmd>,
    /// Sender that [`Subscription`] guards use to unsubscribe from within
    /// `close()` / `Drop` (fire-and-forget, no async needed)
    unsub_tx: mpsc::UnboundedSender<UnsubRequest>,
    /// Current connection state, readable without the task
    state: Arc<StateCell>,
    notifier: Arc<StateNotifier>,
    crosstab: CrossTabChannel,
    next_handler_id: AtomicU64,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        // Best-effort shutdown signal.
        self.crosstab.close();
        let _ = self.cmd_tx.try_send(ConnCmd::Shutdown { ack: None });
    }
}

impl PulseLinkClient {
    /// Create a new builder for configuring the client
    pub fn builder() -> PulseLinkClientBuilder {
        PulseLinkClientBuilder::new()
    }

    /// Open the connection.
    ///
    /// Idempotent: while the socket is open, an attempt is in flight, or a
    /// reconnect timer is armed, this is a no-op and never creates a second
    /// socket.  Connection failures are not surfaced here; they drive the
    /// reconnect policy and are observable via [`Self::on_state_change`].
    pub async fn connect(&self) {
        let _ = self.inner.cmd_tx.send(ConnCmd::Connect).await;
    }

    /// Close the connection and stop reconnecting.
    ///
    /// Cancels any pending reconnect timer before closing the socket, then
    /// waits for the connection task to confirm.  Subscriptions stay
    /// registered; a later [`Self::connect`] re-announces them.
    pub async fn disconnect(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self
            .inner
            .cmd_tx
            .send(ConnCmd::Disconnect { ack: ack_tx })
            .await
            .is_ok()
        {
            let _ = ack_rx.await;
        }
    }

    /// Permanently shut the client down.
    ///
    /// Disconnects, stops the connection task, and detaches from the
    /// in-process fan-out bus.  Waits for the task to confirm so that no
    /// socket or timer outlives this call.
    pub async fn close(&self) {
        self.inner.crosstab.close();
        let (ack_tx, ack_rx) = oneshot::channel();
        if self
            .inner
            .cmd_tx
            .send(ConnCmd::Shutdown { ack: Some(ack_tx) })
            .await
            .is_ok()
        {
            let _ = ack_rx.await;
        }
    }

    /// Register `handler` for events on `channel`.
    ///
    /// The first handler on a channel sends a subscribe frame if the socket
    /// is open; subscribing while disconnected records the interest and
    /// flushes it on the next successful open.  Dropping (or closing) the
    /// returned [`Subscription`] removes exactly this handler.
    pub async fn subscribe<F>(&self, channel: impl Into<String>, handler: F) -> Result<Subscription>
    where
        F: Fn(&BroadcastEvent) + Send + Sync + 'static,
    {
        let channel = channel.into();
        let id = self.inner.next_handler_id.fetch_add(1, Ordering::SeqCst);
        let (ack_tx, ack_rx) = oneshot::channel();

        self.inner
            .cmd_tx
            .send(ConnCmd::Subscribe {
                channel: channel.clone(),
                id,
                handler: Arc::new(handler) as Handler,
                ack: ack_tx,
            })
            .await
            .map_err(|_| {
                PulseLinkError::WebSocketError("Connection task is not running".to_string())
            })?;

        ack_rx.await.map_err(|_| {
            PulseLinkError::WebSocketError(
                "Connection task died before confirming subscribe".to_string(),
            )
        })?;

        Ok(Subscription::new(channel, id, self.inner.unsub_tx.clone()))
    }

    /// Emit an event to peer instances on the fan-out bus.
    ///
    /// The event's `event` field is copied from `payload.type`.  Handlers
    /// registered on *this* instance are never invoked: the emitter is
    /// assumed to have already applied the change locally, so `emit` is
    /// peer-notification, not self-notification.
    pub fn emit(&self, channel: impl Into<String>, payload: Map<String, JsonValue>) {
        let event = BroadcastEvent::from_emit(channel, payload);
        self.inner.crosstab.emit(event);
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    /// Register an observer for connection state transitions.
    ///
    /// Observers run synchronously in registration order on every
    /// transition.  Dropping (or closing) the returned guard removes the
    /// observer.
    pub fn on_state_change<F>(&self, callback: F) -> StateListenerGuard
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.inner.notifier.register(Arc::new(callback))
    }
}

/// Normalize an endpoint URL to a WebSocket scheme.
///
/// `http`/`https` URLs are rewritten to `ws`/`wss`; anything other than
/// those four schemes is a configuration error.
fn normalize_ws_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw)
        .map_err(|e| PulseLinkError::ConfigurationError(format!("Invalid URL '{}': {}", raw, e)))?;
    let target = match url.scheme() {
        "ws" | "wss" => return Ok(url),
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(PulseLinkError::ConfigurationError(format!(
                "Unsupported URL scheme '{}'",
                other
            )))
        }
    };
    url.set_scheme(target).map_err(|()| {
        PulseLinkError::ConfigurationError(format!("Cannot rewrite '{}' to {}", raw, target))
    })?;
    Ok(url)
}

/// Builder for configuring [`PulseLinkClient`] instances.
pub struct PulseLinkClientBuilder {
    url: Option<String>,
    options: ClientOptions,
}

impl PulseLinkClientBuilder {
    fn new() -> Self {
        Self {
            url: None,
            options: ClientOptions::default(),
        }
    }

    /// Set the broadcast server URL (`ws://`, `wss://`, `http://`, or `https://`)
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set reconnection and connection options
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Build the client and spawn its connection task.
    ///
    /// The client starts disconnected; call [`PulseLinkClient::connect`] to
    /// open the socket.  Must be called from within a Tokio runtime.
    pub fn build(self) -> Result<PulseLinkClient> {
        let raw = self
            .url
            .ok_or_else(|| PulseLinkError::ConfigurationError("url is required".into()))?;
        let url = normalize_ws_url(&raw)?;

        let (cmd_tx, cmd_rx) = mpsc::channel::<ConnCmd>(CMD_CHANNEL_CAPACITY);
        let (unsub_tx, unsub_rx) = mpsc::unbounded_channel::<UnsubRequest>();
        let state = Arc::new(StateCell::new(ConnectionState::Disconnected));
        let notifier = Arc::new(StateNotifier::new());

        let crosstab = CrossTabChannel::open(&self.options.cross_tab_bus);
        let tab_rx = crosstab.listen();
        let tab_origin = crosstab.origin();

        tokio::spawn(connection_task(
            cmd_rx,
            unsub_rx,
            url,
            self.options,
            Arc::clone(&state),
            Arc::clone(&notifier),
            tab_rx,
            tab_origin,
        ));

        Ok(PulseLinkClient {
            inner: Arc::new(ClientInner {
                cmd_tx,
                unsub_tx,
                state,
                notifier,
                crosstab,
                next_handler_id: AtomicU64::new(1),
            }),
        })
    }
}
