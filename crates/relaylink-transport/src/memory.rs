//! In-process relay transport.
//!
//! `MemoryRelay` stands in for a real relay pool: it records every sync and
//! every published message, and lets the owner inject inbound events through
//! [`MemoryRelay::deliver`]. Outbound messages are also streamed on a channel
//! so a test (or the CLI loopback) can play the remote side.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Result, TransportError};
use crate::traits::{BeaconListener, RelayEventHandler, RelayTransport};
use crate::types::{BeaconUpdate, KeyPair, RelayEvent, RelaySettings};

/// A message published through a [`MemoryRelay`].
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    /// Relays the message was multicast to.
    pub relays: Vec<String>,
    /// Recipient public key.
    pub destination: String,
    /// Sender public key.
    pub from: String,
    /// Serialized message body.
    pub message: String,
    /// True when published through `send_special_offer`.
    pub special_offer: bool,
}

/// In-memory [`RelayTransport`].
pub struct MemoryRelay {
    handler: Mutex<Option<Arc<dyn RelayEventHandler>>>,
    synced: Mutex<Vec<RelaySettings>>,
    sent: Mutex<Vec<OutboundMessage>>,
    beacon_listeners: Mutex<Vec<BeaconListener>>,
    outbound_tx: mpsc::UnboundedSender<OutboundMessage>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<OutboundMessage>>>,
    fail_next_sync: Mutex<Option<String>>,
    sync_delay: Option<Duration>,
}

impl MemoryRelay {
    /// Create an in-memory relay that connects instantly.
    pub fn new() -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            handler: Mutex::new(None),
            synced: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            beacon_listeners: Mutex::new(Vec::new()),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            fail_next_sync: Mutex::new(None),
            sync_delay: None,
        }
    }

    /// Delay every relay sync by `delay` before reporting connected.
    pub fn with_sync_delay(mut self, delay: Duration) -> Self {
        self.sync_delay = Some(delay);
        self
    }

    /// Take the outbound message stream. Returns `None` after the first call.
    pub fn take_outbound(&self) -> Option<mpsc::UnboundedReceiver<OutboundMessage>> {
        self.outbound_rx.lock().take()
    }

    /// Make the next `sync_relays` call fail with `message`.
    pub fn fail_next_sync(&self, message: impl Into<String>) {
        *self.fail_next_sync.lock() = Some(message.into());
    }

    /// Every relay sync seen so far, in call order.
    pub fn synced(&self) -> Vec<RelaySettings> {
        self.synced.lock().clone()
    }

    /// Every message published so far, in call order.
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().clone()
    }

    /// Feed an inbound event to the installed handler.
    ///
    /// Returns false when no sync has installed a handler yet.
    pub fn deliver(&self, event: RelayEvent) -> bool {
        let handler = self.handler.lock().clone();
        match handler {
            Some(handler) => {
                handler.on_event(event);
                true
            }
            None => {
                warn!(event_id = %event.id, "no handler installed, dropping event");
                false
            }
        }
    }

    /// Report a relay disconnect to the installed handler.
    pub fn disconnect_relay(&self, relay: &str) {
        let handler = self.handler.lock().clone();
        if let Some(handler) = handler {
            handler.on_disconnect(relay);
        }
    }

    /// Broadcast a beacon update to every registered listener.
    pub fn publish_beacon(&self, update: BeaconUpdate) {
        for listener in self.beacon_listeners.lock().iter() {
            listener(update.clone());
        }
    }

    fn record(&self, message: OutboundMessage) {
        self.sent.lock().push(message.clone());
        // Receiver may be gone; the record above is enough then.
        let _ = self.outbound_tx.send(message);
    }
}

impl Default for MemoryRelay {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelayTransport for MemoryRelay {
    async fn sync_relays(
        &self,
        settings: RelaySettings,
        handler: Arc<dyn RelayEventHandler>,
    ) -> Result<()> {
        if settings.relays.is_empty() {
            return Err(TransportError::NoRelays);
        }
        if let Some(message) = self.fail_next_sync.lock().take() {
            return Err(TransportError::Connect {
                relays: settings.relays,
                message,
            });
        }

        debug!(relays = ?settings.relays, local = %settings.keys.public_key, "syncing relays");
        self.synced.lock().push(settings);
        *self.handler.lock() = Some(handler);

        match self.sync_delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }
        Ok(())
    }

    fn send(&self, relays: &[String], destination: &str, message: String, keys: &KeyPair) {
        self.record(OutboundMessage {
            relays: relays.to_vec(),
            destination: destination.to_string(),
            from: keys.public_key.clone(),
            message,
            special_offer: false,
        });
    }

    fn add_beacon_listener(&self, listener: BeaconListener) {
        self.beacon_listeners.lock().push(listener);
    }

    fn send_special_offer(&self, relays: &[String], pubkey: &str, payload: Value, keys: &KeyPair) {
        self.record(OutboundMessage {
            relays: relays.to_vec(),
            destination: pubkey.to_string(),
            from: keys.public_key.clone(),
            message: payload.to_string(),
            special_offer: true,
        });
    }
}
