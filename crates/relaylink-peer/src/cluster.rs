//! Client registry.
//!
//! A `ClientCluster` owns every [`DestinationClient`] built on one transport.
//! It serializes client bring-up, installs itself as the transport's inbound
//! handler, reassembles sharded content and routes each completed payload to
//! the first client that claims it.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use relaylink_shard::{Reassembly, ShardReassembler};
use relaylink_transport::{
    BeaconListener, KeyPair, RelayEvent, RelayEventHandler, RelaySettings, RelayTransport,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::beacon::{BeaconSource, NoBeacons};
use crate::client::{ClientKey, ClientParts, DestinationClient, SendFn};
use crate::config::ClusterConfig;
use crate::error::{PeerError, Result};
use crate::queue::BringUpQueue;
use crate::reference::{dedupe_relays, DestinationRef};
use crate::stub::{GenericStubFactory, StubFactory};

const REPLACED_REASON: &str = "client replaced";

struct ClientEntry {
    client: Arc<DestinationClient>,
    ephemeral: bool,
}

struct ClusterInner {
    transport: Arc<dyn RelayTransport>,
    stubs: Arc<dyn StubFactory>,
    beacons: Arc<dyn BeaconSource>,
    reassembler: ShardReassembler,
    clients: Mutex<Vec<ClientEntry>>,
    queue: BringUpQueue,
    config: ClusterConfig,
}

/// Builder for [`ClientCluster`].
pub struct ClusterBuilder {
    transport: Arc<dyn RelayTransport>,
    stubs: Arc<dyn StubFactory>,
    beacons: Arc<dyn BeaconSource>,
    config: ClusterConfig,
}

impl ClusterBuilder {
    /// Stub factory used for every new client. Defaults to [`GenericStubFactory`].
    pub fn with_stub_factory(mut self, stubs: Arc<dyn StubFactory>) -> Self {
        self.stubs = stubs;
        self
    }

    /// Beacon lookup used by health checks. Defaults to [`NoBeacons`].
    pub fn with_beacon_source(mut self, beacons: Arc<dyn BeaconSource>) -> Self {
        self.beacons = beacons;
        self
    }

    pub fn with_config(mut self, config: ClusterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> ClientCluster {
        ClientCluster {
            inner: Arc::new(ClusterInner {
                transport: self.transport,
                stubs: self.stubs,
                beacons: self.beacons,
                reassembler: ShardReassembler::with_config(self.config.shard),
                clients: Mutex::new(Vec::new()),
                queue: BringUpQueue::new(),
                config: self.config,
            }),
        }
    }
}

/// Registry of destination clients sharing one relay transport.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct ClientCluster {
    inner: Arc<ClusterInner>,
}

impl ClientCluster {
    /// Cluster with the generic stub factory and no beacon source.
    pub fn new(transport: Arc<dyn RelayTransport>) -> Self {
        Self::builder(transport).build()
    }

    pub fn builder(transport: Arc<dyn RelayTransport>) -> ClusterBuilder {
        ClusterBuilder {
            transport,
            stubs: Arc::new(GenericStubFactory),
            beacons: Arc::new(NoBeacons),
            config: ClusterConfig::default(),
        }
    }

    /// Return the client for (`reference`, `keys`), building it if needed.
    ///
    /// The relay set is synced on every call, cache hit or not. With
    /// `ephemeral` a fresh temporary client is always built; temporary clients
    /// receive routed events but are not listed.
    pub async fn get_or_create_client(
        &self,
        reference: impl Into<DestinationRef>,
        keys: KeyPair,
        ephemeral: bool,
    ) -> Result<Arc<DestinationClient>> {
        let destination = reference.into().resolve()?;
        let relays = dedupe_relays(&destination.relays);
        if relays.is_empty() {
            return Err(PeerError::NoRelays(destination.pubkey));
        }

        let inner = self.inner.clone();
        self.inner
            .queue
            .run(inner.bring_up(destination.pubkey, relays, keys, ephemeral))
            .await
    }

    /// Persistent clients in insertion order.
    pub fn list_clients(&self) -> Vec<Arc<DestinationClient>> {
        self.inner
            .clients
            .lock()
            .iter()
            .filter(|entry| !entry.ephemeral)
            .map(|entry| entry.client.clone())
            .collect()
    }

    /// Number of registered clients, temporary ones included.
    pub fn client_count(&self) -> usize {
        self.inner.clients.lock().len()
    }

    /// Reassemble and route one inbound event.
    ///
    /// Returns true when a client claimed the completed payload. Incomplete
    /// shard sets, undecodable content and unclaimed payloads return false.
    pub fn route_inbound_event(&self, event: &RelayEvent) -> bool {
        self.inner.route(event)
    }

    /// Forward beacon updates from the transport to `listener`.
    pub fn add_beacon_listener(&self, listener: BeaconListener) {
        self.inner.transport.add_beacon_listener(listener);
    }

    /// Publish the special offer payload to `pubkey`.
    pub fn send_special_offer(&self, relays: &[String], pubkey: &str, payload: Value, keys: &KeyPair) {
        self.inner
            .transport
            .send_special_offer(relays, pubkey, payload, keys);
    }

    /// Drop `client` from the registry. Returns false if it was not registered.
    ///
    /// The client is left as is; disconnect it first to fail its pending calls.
    pub fn remove_client(&self, client: &Arc<DestinationClient>) -> bool {
        let mut clients = self.inner.clients.lock();
        let before = clients.len();
        clients.retain(|entry| !Arc::ptr_eq(&entry.client, client));
        before != clients.len()
    }

    /// Disconnect and drop every client.
    pub fn shutdown(&self, reason: Option<&str>) {
        let drained: Vec<ClientEntry> = self.inner.clients.lock().drain(..).collect();
        info!(count = drained.len(), "shutting down client cluster");
        for entry in drained {
            entry.client.disconnect(reason);
        }
    }

    /// Shard sets still waiting for fragments.
    pub fn open_shard_sets(&self) -> usize {
        self.inner.reassembler.open_sets()
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for ClientCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCluster")
            .field("clients", &self.client_count())
            .field("open_shard_sets", &self.open_shard_sets())
            .field("queue", &self.inner.queue)
            .finish()
    }
}

impl ClusterInner {
    async fn bring_up(
        self: Arc<Self>,
        destination: String,
        relays: Vec<String>,
        keys: KeyPair,
        ephemeral: bool,
    ) -> Result<Arc<DestinationClient>> {
        let handler: Arc<dyn RelayEventHandler> = Arc::new(ClusterEvents {
            cluster: Arc::downgrade(&self),
        });
        self.transport
            .sync_relays(
                RelaySettings {
                    relays: relays.clone(),
                    keys: keys.clone(),
                },
                handler,
            )
            .await?;

        let key = ClientKey::new(&destination, &keys.public_key);
        if !ephemeral {
            if let Some(existing) = self.live_client(&key) {
                debug!(client_id = %existing.id(), key = %key, "reusing client");
                return Ok(existing);
            }
        }

        let client = DestinationClient::new(
            ClientParts {
                destination,
                relays,
                keys,
                send: self.send_fn(),
                beacons: self.beacons.clone(),
                config: self.config.client.clone(),
            },
            self.stubs.as_ref(),
        );

        let replaced = self.register(client.clone(), ephemeral);
        for old in replaced {
            old.disconnect(Some(REPLACED_REASON));
        }
        info!(client_id = %client.id(), key = %key, ephemeral, "client created");
        Ok(client)
    }

    fn live_client(&self, key: &ClientKey) -> Option<Arc<DestinationClient>> {
        self.clients
            .lock()
            .iter()
            .find(|entry| !entry.ephemeral && entry.client.key() == key && !entry.client.is_disconnected())
            .map(|entry| entry.client.clone())
    }

    /// Store `client`, evicting entries it supersedes: a temporary client with
    /// the same key, or a disconnected persistent one.
    fn register(&self, client: Arc<DestinationClient>, ephemeral: bool) -> Vec<Arc<DestinationClient>> {
        let mut clients = self.clients.lock();
        let mut replaced = Vec::new();
        clients.retain(|entry| {
            let superseded = entry.ephemeral == ephemeral && entry.client.key() == client.key();
            if superseded {
                replaced.push(entry.client.clone());
            }
            !superseded
        });
        clients.push(ClientEntry { client, ephemeral });
        replaced
    }

    fn send_fn(&self) -> SendFn {
        let transport = self.transport.clone();
        Arc::new(
            move |relays: &[String], destination: &str, message: String, keys: &KeyPair| {
                transport.send(relays, destination, message, keys)
            },
        )
    }

    fn route(&self, event: &RelayEvent) -> bool {
        let payload = match self.reassembler.push(&event.content) {
            Ok(Reassembly::Complete(payload)) => payload,
            Ok(Reassembly::Incomplete {
                shards_id,
                received,
                total,
            }) => {
                debug!(event_id = %event.id, shards_id = %shards_id, received, total, "waiting for more shards");
                return false;
            }
            Err(err) => {
                warn!(event_id = %event.id, error = %err, "dropping undecodable event");
                return false;
            }
        };

        // Persistent first, then temporary, each in insertion order.
        let candidates: Vec<Arc<DestinationClient>> = {
            let clients = self.clients.lock();
            let persistent = clients.iter().filter(|entry| !entry.ephemeral);
            let temporary = clients.iter().filter(|entry| entry.ephemeral);
            persistent
                .chain(temporary)
                .map(|entry| entry.client.clone())
                .collect()
        };

        if candidates.iter().any(|client| client.on_event(event, &payload)) {
            return true;
        }
        warn!(
            request_id = %payload.request_id,
            author = %event.author,
            "no client claimed inbound event"
        );
        false
    }
}

/// Inbound handler installed on every relay sync.
struct ClusterEvents {
    cluster: Weak<ClusterInner>,
}

impl RelayEventHandler for ClusterEvents {
    fn on_event(&self, event: RelayEvent) {
        match self.cluster.upgrade() {
            Some(cluster) => {
                cluster.route(&event);
            }
            None => debug!(event_id = %event.id, "cluster dropped, ignoring event"),
        }
    }

    fn on_disconnect(&self, relay: &str) {
        warn!(relay, "relay disconnected");
    }
}

#[cfg(test)]
mod tests {
    use relaylink_transport::MemoryRelay;

    use super::*;
    use crate::reference::Destination;

    fn keys(public: &str) -> KeyPair {
        KeyPair::new(public, format!("{public}-secret"))
    }

    fn cluster() -> (ClientCluster, Arc<MemoryRelay>) {
        let relay = Arc::new(MemoryRelay::new());
        (ClientCluster::new(relay.clone()), relay)
    }

    #[tokio::test]
    async fn relays_are_deduplicated_before_sync() {
        let (cluster, relay) = cluster();
        let client = cluster
            .get_or_create_client(
                Destination::new("bob", ["wss://b", "wss://a", "wss://b"]),
                keys("alice"),
                false,
            )
            .await
            .expect("client should be created");

        assert_eq!(client.relays(), ["wss://b".to_string(), "wss://a".to_string()]);
        assert_eq!(relay.synced()[0].relays, client.relays());
    }

    #[tokio::test]
    async fn disconnected_client_is_replaced() {
        let (cluster, _relay) = cluster();
        let destination = Destination::new("bob", ["wss://a"]);
        let first = cluster
            .get_or_create_client(destination.clone(), keys("alice"), false)
            .await
            .unwrap();
        first.disconnect(None);

        let second = cluster
            .get_or_create_client(destination, keys("alice"), false)
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(cluster.list_clients().len(), 1);
        assert!(Arc::ptr_eq(&cluster.list_clients()[0], &second));
    }

    #[tokio::test]
    async fn newer_temporary_client_supersedes_older_one() {
        let (cluster, _relay) = cluster();
        let destination = Destination::new("bob", ["wss://a"]);
        let first = cluster
            .get_or_create_client(destination.clone(), keys("alice"), true)
            .await
            .unwrap();
        let second = cluster
            .get_or_create_client(destination, keys("alice"), true)
            .await
            .unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert!(first.is_disconnected());
        assert_eq!(cluster.client_count(), 1);
        assert!(cluster.list_clients().is_empty());
    }

    #[tokio::test]
    async fn remove_and_shutdown() {
        let (cluster, _relay) = cluster();
        let a = cluster
            .get_or_create_client(Destination::new("bob", ["wss://a"]), keys("alice"), false)
            .await
            .unwrap();
        let b = cluster
            .get_or_create_client(Destination::new("carol", ["wss://a"]), keys("alice"), false)
            .await
            .unwrap();

        assert!(cluster.remove_client(&a));
        assert!(!cluster.remove_client(&a));
        assert!(!a.is_disconnected());

        cluster.shutdown(Some("bye"));
        assert!(b.is_disconnected());
        assert_eq!(cluster.client_count(), 0);
    }

    #[tokio::test]
    async fn undecodable_content_is_not_routed() {
        let (cluster, _relay) = cluster();
        let event = RelayEvent {
            id: "e1".to_string(),
            author: "bob".to_string(),
            to: "alice".to_string(),
            kind: 21000,
            content: "not json".to_string(),
        };
        assert!(!cluster.route_inbound_event(&event));
    }

    #[test]
    fn cluster_events_ignore_dropped_cluster() {
        let handler = ClusterEvents {
            cluster: Weak::new(),
        };
        handler.on_event(RelayEvent {
            id: "e1".to_string(),
            author: "bob".to_string(),
            to: "alice".to_string(),
            kind: 21000,
            content: "{}".to_string(),
        });
        handler.on_disconnect("wss://a");
    }
}
