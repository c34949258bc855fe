//! Error types for pulse-link.

use thiserror::Error;

/// Errors that can occur in broadcast client operations.
#[derive(Error, Debug)]
pub enum PulseLinkError {
    /// Invalid configuration (bad URL, missing builder fields).
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// WebSocket transport failure surfaced to a direct API call.
    ///
    /// Transport failures on the live connection itself are never surfaced
    /// here; they feed the reconnect path instead.
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// A connection attempt exceeded the configured timeout.
    #[error("Timeout: {0}")]
    TimeoutError(String),

    /// `get()` was called on a client slot that was never initialized.
    #[error("Client not initialized: call init() first")]
    NotInitialized,
}

/// Result type for broadcast client operations.
pub type Result<T> = std::result::Result<T, PulseLinkError>;
