//! Same-process fan-out between client instances.
//!
//! Every client opens a named bus; all instances on the same bus name share
//! one broadcast channel. A locally emitted event is posted to the bus and
//! picked up by every peer instance's listener, which drops frames carrying
//! its own origin id. The emitting instance therefore never dispatches its
//! own emit locally; `emit` is peer-notification only.
//!
//! Buses live in a process-wide registry and are created on first open.
//! Delivery is best-effort: with no peers the post goes nowhere, and a
//! listener that falls behind the channel capacity loses the oldest frames.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

use tokio::sync::broadcast;

use crate::models::BroadcastEvent;

/// Frames kept per bus before the oldest is dropped for lagging listeners
const BUS_CAPACITY: usize = 256;

/// One event on the fan-out bus, tagged with the emitting instance.
#[derive(Debug, Clone)]
pub(crate) struct TabFrame {
    /// Origin id of the emitting [`CrossTabChannel`]
    pub origin: u64,
    /// The emitted event
    pub event: BroadcastEvent,
}

static BUSES: OnceLock<Mutex<HashMap<String, broadcast::Sender<TabFrame>>>> = OnceLock::new();
static NEXT_ORIGIN: AtomicU64 = AtomicU64::new(1);

fn bus_sender(name: &str) -> broadcast::Sender<TabFrame> {
    let buses = BUSES.get_or_init(|| Mutex::new(HashMap::new()));
    let mut buses = buses.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    buses
        .entry(name.to_string())
        .or_insert_with(|| broadcast::channel(BUS_CAPACITY).0)
        .clone()
}

/// Handle to a named fan-out bus, scoped to one client instance.
pub(crate) struct CrossTabChannel {
    origin: u64,
    tx: broadcast::Sender<TabFrame>,
    closed: AtomicBool,
}

impl CrossTabChannel {
    /// Open the named bus, creating it on first use.
    ///
    /// Each open gets a process-unique origin id so listeners can tell
    /// their own frames apart from peer frames.
    pub fn open(bus: &str) -> Self {
        Self {
            origin: NEXT_ORIGIN.fetch_add(1, Ordering::SeqCst),
            tx: bus_sender(bus),
            closed: AtomicBool::new(false),
        }
    }

    /// Origin id of this instance, used by its listener to skip its own frames
    pub fn origin(&self) -> u64 {
        self.origin
    }

    /// New listener on the bus, delivered every frame posted after this call
    pub fn listen(&self) -> broadcast::Receiver<TabFrame> {
        self.tx.subscribe()
    }

    /// Post `event` to peer instances on the bus.
    ///
    /// With no listeners the frame goes nowhere; that is not an error.
    pub fn emit(&self, event: BroadcastEvent) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.tx.send(TabFrame {
            origin: self.origin,
            event,
        });
    }

    /// Stop emitting from this instance. Idempotent.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
