use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::types::{BeaconUpdate, KeyPair, RelayEvent, RelaySettings};

/// Inbound side of a relay sync.
///
/// One handler is installed per [`RelayTransport::sync_relays`] call. Both
/// callbacks run on the transport's delivery path and must not block.
pub trait RelayEventHandler: Send + Sync {
    /// A decrypted event addressed to one of the synced identities arrived.
    fn on_event(&self, event: RelayEvent);

    /// A relay dropped its connection.
    fn on_disconnect(&self, relay: &str);
}

/// Process-lifetime listener for beacon updates.
pub type BeaconListener = Box<dyn Fn(BeaconUpdate) + Send + Sync>;

/// The pub/sub transport relaylink drives.
///
/// Implementations own connection pooling, resubscription, signing and
/// encryption. relaylink only calls these primitives and never touches the
/// transport's connection state directly.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Make sure `settings.keys` is subscribed on every relay in
    /// `settings.relays`, installing `handler` for inbound traffic.
    ///
    /// Resolves once the relays are connected.
    async fn sync_relays(
        &self,
        settings: RelaySettings,
        handler: Arc<dyn RelayEventHandler>,
    ) -> Result<()>;

    /// Publish `message` to `destination` on every relay in `relays`.
    ///
    /// Fire and forget: delivery failures are not reported.
    fn send(&self, relays: &[String], destination: &str, message: String, keys: &KeyPair);

    /// Register a listener for beacon updates.
    fn add_beacon_listener(&self, listener: BeaconListener);

    /// Publish a special offer payload to `pubkey`.
    fn send_special_offer(&self, relays: &[String], pubkey: &str, payload: Value, keys: &KeyPair);
}
