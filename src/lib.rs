//! # pulse-link: Real-Time Broadcast Client
//!
//! A channel-scoped publish/subscribe client for pushing change
//! notifications over a WebSocket and fanning them out across client
//! instances in the same process.
//!
//! ## Features
//!
//! - **Channel Subscriptions**: Register handlers per channel; interest is
//!   ref-counted so the server sees one subscribe/unsubscribe per channel
//! - **Resilient Connection**: Automatic reconnection with uncapped
//!   exponential backoff and a bounded attempt budget
//! - **Resubscription**: All subscribed channels are re-announced in a
//!   single frame after every successful (re)connect
//! - **Cross-Instance Fan-Out**: Locally emitted events reach peer
//!   instances on a shared in-process bus without a server round trip
//! - **State Observers**: Connection state transitions are pushed
//!   synchronously to registered observers, in registration order
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pulse_link::{ClientOptions, PulseLinkClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = PulseLinkClient::builder()
//!         .url("ws://localhost:3000/broadcast")
//!         .options(ClientOptions::new().with_max_reconnect_attempts(10))
//!         .build()?;
//!     client.connect().await;
//!
//!     // React to events on a channel
//!     let _sub = client
//!         .subscribe("orders", |event| {
//!             println!("{} on {}: {:?}", event.event, event.channel, event.entity_id());
//!         })
//!         .await?;
//!
//!     // Tell peer instances about a local mutation
//!     let payload = serde_json::json!({"type": "created", "entity_id": "42"});
//!     client.emit("orders", payload.as_object().unwrap().clone());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Process-Wide Client
//!
//! ```rust,no_run
//! use pulse_link::{slot, ClientOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Initialize once; a second init fully closes the replaced instance
//! slot::global()
//!     .init("ws://localhost:3000/broadcast", ClientOptions::default())
//!     .await?;
//!
//! let client = slot::global().get().await?;
//! println!("state: {}", client.state());
//! # Ok(())
//! # }
//! ```

pub mod client;
mod connection;
mod crosstab;
pub mod error;
pub mod models;
pub mod notifier;
pub mod registry;
pub mod slot;

// Re-export main types for convenience
pub use client::{PulseLinkClient, PulseLinkClientBuilder};
pub use error::{PulseLinkError, Result};
pub use models::{BroadcastEvent, ClientOptions, ControlFrame};
pub use notifier::{ConnectionState, StateListenerGuard};
pub use registry::Subscription;
pub use slot::ClientSlot;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
