use serde::{Deserialize, Serialize};

/// Client-level options for the broadcast connection.
///
/// These options control reconnection policy and connection timing.
///
/// # Example
///
/// ```rust
/// use pulse_link::ClientOptions;
///
/// let options = ClientOptions::default()
///     .with_max_reconnect_attempts(5)
///     .with_reconnect_delay_ms(500);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientOptions {
    /// Maximum number of reconnection attempts before giving up
    /// Default: 10
    /// Set to 0 to disable automatic reconnection entirely
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Base delay in milliseconds between reconnection attempts
    /// Default: 1000ms (1 second)
    /// The Nth attempt (0-indexed) waits `reconnect_delay_ms * 2^N`, uncapped
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Timeout in milliseconds for a single connection attempt
    /// Default: 10000ms (10 seconds)
    /// An attempt that exceeds this is treated as an ordinary failure
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// Name of the in-process fan-out bus shared by peer client instances
    /// Default: "pulse-link"
    /// Instances only exchange locally emitted events on the same bus name
    #[serde(default = "default_cross_tab_bus")]
    pub cross_tab_bus: String,
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_connection_timeout_ms() -> u64 {
    10_000
}

fn default_cross_tab_bus() -> String {
    "pulse-link".to_string()
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 10,
            reconnect_delay_ms: 1000,
            connection_timeout_ms: 10_000,
            cross_tab_bus: default_cross_tab_bus(),
        }
    }
}

impl ClientOptions {
    /// Create new client options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of reconnection attempts
    /// Pass 0 to disable automatic reconnection
    pub fn with_max_reconnect_attempts(mut self, max_attempts: u32) -> Self {
        self.max_reconnect_attempts = max_attempts;
        self
    }

    /// Set the base delay between reconnection attempts (in milliseconds)
    pub fn with_reconnect_delay_ms(mut self, delay_ms: u64) -> Self {
        self.reconnect_delay_ms = delay_ms;
        self
    }

    /// Set the timeout for a single connection attempt (in milliseconds)
    pub fn with_connection_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.connection_timeout_ms = timeout_ms;
        self
    }

    /// Set the name of the in-process fan-out bus
    ///
    /// Clients sharing a bus name receive each other's locally emitted
    /// events; tests use distinct names for isolation.
    pub fn with_cross_tab_bus(mut self, bus: impl Into<String>) -> Self {
        self.cross_tab_bus = bus.into();
        self
    }
}
