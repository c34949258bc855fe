//! Connection state tracking and observer dispatch.
//!
//! [`ConnectionState`] is the four-state lifecycle of the underlying
//! socket. [`StateCell`] makes the current state readable from any thread
//! without going through the connection task. [`StateNotifier`] holds the
//! observer list and invokes it synchronously, in registration order, on
//! every transition.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

/// Lifecycle state of the broadcast connection.
///
/// Exactly one state is active at any instant. `Disconnected` is both the
/// initial state and the terminal state after reconnect exhaustion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// No socket and no pending reconnect timer
    Disconnected = 0,
    /// A connection attempt is in flight
    Connecting = 1,
    /// The socket is open
    Connected = 2,
    /// The socket was lost and a reconnect timer is pending
    Reconnecting = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Reconnecting,
            _ => Self::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        };
        write!(f, "{}", name)
    }
}

/// Lock-free cell holding the current [`ConnectionState`].
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Store `state` and return the previous value.
    pub fn swap(&self, state: ConnectionState) -> ConnectionState {
        ConnectionState::from_u8(self.0.swap(state as u8, Ordering::SeqCst))
    }
}

/// Callback invoked with the new state on every transition
pub type StateCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Ordered observer list for connection state transitions.
///
/// Observers are invoked synchronously in registration order. A panicking
/// observer is contained and logged; the remaining observers still run.
#[derive(Default)]
pub struct StateNotifier {
    observers: Mutex<Vec<(u64, StateCallback)>>,
    next_id: AtomicU64,
}

impl StateNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer; the guard removes it on close or drop.
    pub fn register(self: &Arc<Self>, callback: StateCallback) -> StateListenerGuard {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((id, callback));
        StateListenerGuard {
            notifier: Arc::clone(self),
            id,
            closed: AtomicBool::new(false),
        }
    }

    /// Invoke every registered observer with `state`, in registration order.
    pub fn notify(&self, state: ConnectionState) {
        // Clone out of the lock so an observer can register or remove
        // listeners without deadlocking.
        let observers: Vec<(u64, StateCallback)> = self
            .observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        for (id, callback) in observers {
            let result = catch_unwind(AssertUnwindSafe(|| callback(state)));
            if result.is_err() {
                log::warn!("State observer {} panicked on transition to {}", id, state);
            }
        }
    }

    fn remove(&self, id: u64) {
        self.observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retain(|(observer_id, _)| *observer_id != id);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

/// Removes its observer from the [`StateNotifier`] on close or drop.
pub struct StateListenerGuard {
    notifier: Arc<StateNotifier>,
    id: u64,
    closed: AtomicBool,
}

impl StateListenerGuard {
    /// Remove the observer now instead of waiting for drop.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.notifier.remove(self.id);
        }
    }
}

impl Drop for StateListenerGuard {
    fn drop(&mut self) {
        self.close();
    }
}
