use serde::{Deserialize, Serialize};

/// Client-to-server control frames.
///
/// The protocol carries no type tag; the frame kind is identified by its
/// single key:
///
/// ```json
/// {"subscribe": ["orders", "users"]}
/// {"unsubscribe": ["orders"]}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlFrame {
    /// Announce interest in one or more channels
    Subscribe {
        /// Channels to subscribe to
        subscribe: Vec<String>,
    },

    /// Withdraw interest in one or more channels
    Unsubscribe {
        /// Channels to unsubscribe from
        unsubscribe: Vec<String>,
    },
}

impl ControlFrame {
    /// Frame announcing interest in `channels`
    pub fn subscribe(channels: Vec<String>) -> Self {
        Self::Subscribe {
            subscribe: channels,
        }
    }

    /// Frame withdrawing interest in `channels`
    pub fn unsubscribe(channels: Vec<String>) -> Self {
        Self::Unsubscribe {
            unsubscribe: channels,
        }
    }
}
