//! Channel subscription bookkeeping and event dispatch.
//!
//! The registry maps channel names to the handlers registered on them and
//! ref-counts interest: the first handler on a channel and the last handler
//! leaving it are the only transitions that matter to the server, because
//! they are the points where a subscribe or unsubscribe control frame must
//! go out. The registry itself never talks to the socket; it reports the
//! transition to its caller (the connection task) and the caller sends the
//! frame.
//!
//! The registry outlives individual socket connections. After a reconnect
//! its channel keys are re-announced in one resubscribe frame.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::models::BroadcastEvent;

/// Callback invoked with every event delivered on its channel
pub type Handler = Arc<dyn Fn(&BroadcastEvent) + Send + Sync>;

/// Channel name plus handler id, sent over the unsubscribe bridge when a
/// [`Subscription`] guard closes.
pub(crate) type UnsubRequest = (String, u64);

/// Channel → handler table with ref-counted interest.
#[derive(Default)]
pub struct SubscriptionRegistry {
    subs: HashMap<String, Vec<(u64, Handler)>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `channel`.
    ///
    /// Returns `true` when this is the channel's first handler (a 0→1
    /// interest transition, the caller should announce the channel to the
    /// server if the socket is open).
    pub fn add(&mut self, channel: &str, id: u64, handler: Handler) -> bool {
        let entry = self.subs.entry(channel.to_string());
        let is_new = matches!(entry, std::collections::hash_map::Entry::Vacant(_));
        entry.or_default().push((id, handler));
        is_new
    }

    /// Remove the handler registered under (`channel`, `id`).
    ///
    /// Returns `true` when removal emptied the channel (a 1→0 interest
    /// transition, the caller should withdraw the channel from the server
    /// if the socket is open). Unknown ids are ignored.
    pub fn remove(&mut self, channel: &str, id: u64) -> bool {
        let Some(handlers) = self.subs.get_mut(channel) else {
            return false;
        };
        handlers.retain(|(handler_id, _)| *handler_id != id);
        if handlers.is_empty() {
            self.subs.remove(channel);
            true
        } else {
            false
        }
    }

    /// Distinct channel keys with at least one registered handler.
    pub fn channels(&self) -> Vec<String> {
        self.subs.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }

    /// Invoke every handler registered on `event.channel`.
    ///
    /// Channels with no handlers are silently ignored. A panicking handler
    /// is contained and logged; the rest of the channel's handlers still
    /// run.
    pub fn dispatch(&self, event: &BroadcastEvent) {
        let Some(handlers) = self.subs.get(&event.channel) else {
            return;
        };
        for (id, handler) in handlers {
            let result = catch_unwind(AssertUnwindSafe(|| handler(event)));
            if result.is_err() {
                log::warn!(
                    "Handler {} panicked on channel '{}' event '{}'",
                    id,
                    event.channel,
                    event.event
                );
            }
        }
    }
}

/// Handle to one registered handler.
///
/// Closing (or dropping) the guard removes exactly this handler from the
/// registry. The removal travels over the unsubscribe bridge to the
/// connection task, which also emits the `{"unsubscribe":[...]}` frame when
/// the channel's last handler leaves.
pub struct Subscription {
    channel: String,
    id: u64,
    unsub_tx: mpsc::UnboundedSender<UnsubRequest>,
    closed: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(
        channel: String,
        id: u64,
        unsub_tx: mpsc::UnboundedSender<UnsubRequest>,
    ) -> Self {
        Self {
            channel,
            id,
            unsub_tx,
            closed: AtomicBool::new(false),
        }
    }

    /// Channel this subscription listens on
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Remove the handler now instead of waiting for drop.
    ///
    /// Idempotent. If the connection task is already gone the removal is
    /// moot and the send error is ignored.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.unsub_tx.send((self.channel.clone(), self.id));
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}
