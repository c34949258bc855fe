//! Data models for the pulse-link client library.
//!
//! Defines the wire frames exchanged with the broadcast server and the
//! client configuration options.

pub mod broadcast_event;
pub mod client_options;
pub mod control_frame;


pub use broadcast_event::BroadcastEvent;
pub use client_options::ClientOptions;
pub use control_frame::ControlFrame;
