//! Process-wide client lifecycle management.
//!
//! A [`ClientSlot`] owns at most one live client.  Re-initializing the slot
//! fully closes the replaced instance before the new one starts connecting,
//! so two sockets never run concurrently for the same logical client.
//! [`global`] exposes one process-wide default slot for applications that
//! want a single shared client.

use std::sync::OnceLock;

use tokio::sync::Mutex;

use crate::client::PulseLinkClient;
use crate::error::{PulseLinkError, Result};
use crate::models::ClientOptions;

/// Owning container for one client instance.
#[derive(Default)]
pub struct ClientSlot {
    current: Mutex<Option<PulseLinkClient>>,
}

impl ClientSlot {
    /// Create an empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the slot's client with a freshly built, connecting one.
    ///
    /// Any previously held instance is closed first and the close is
    /// awaited: its reconnect timer is cancelled, its socket shut, and its
    /// bus listener gone before the new instance begins connecting.
    /// Returns the new client (also retrievable via [`Self::get`]).
    pub async fn init(
        &self,
        url: impl Into<String>,
        options: ClientOptions,
    ) -> Result<PulseLinkClient> {
        let mut current = self.current.lock().await;
        if let Some(old) = current.take() {
            log::info!("[pulse-link] Replacing client instance");
            old.close().await;
        }

        let client = PulseLinkClient::builder()
            .url(url)
            .options(options)
            .build()?;
        client.connect().await;
        *current = Some(client.clone());
        Ok(client)
    }

    /// Return the held client.
    ///
    /// Fails fast with [`PulseLinkError::NotInitialized`] when the slot was
    /// never initialized (or was closed).
    pub async fn get(&self) -> Result<PulseLinkClient> {
        self.current
            .lock()
            .await
            .clone()
            .ok_or(PulseLinkError::NotInitialized)
    }

    /// Close and drop the held client, leaving the slot empty. Idempotent.
    pub async fn close(&self) {
        if let Some(old) = self.current.lock().await.take() {
            old.close().await;
        }
    }
}

static GLOBAL_SLOT: OnceLock<ClientSlot> = OnceLock::new();

/// The process-wide default slot.
pub fn global() -> &'static ClientSlot {
    GLOBAL_SLOT.get_or_init(ClientSlot::new)
}
