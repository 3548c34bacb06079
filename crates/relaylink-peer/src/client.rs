//! Per-destination RPC client.
//!
//! One `DestinationClient` exists per (destination, local identity) pair. It
//! owns the correlation table for that pair: outbound calls register a pending
//! entry and go out through the shared transport; inbound payloads routed by
//! the cluster resolve the entry with the matching `requestId`.
//!
//! ```text
//!   send/subscribe ──► calls[requestId] = PendingCall ──► transport.send
//!   on_event(event, payload) ──► calls[payload.requestId] ──► resolver
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, MutexGuard};
use rand::distributions::Alphanumeric;
use rand::Rng;
use relaylink_shard::CorrelatedPayload;
use relaylink_transport::{KeyPair, RelayEvent};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::beacon::{Beacon, BeaconSource};
use crate::config::ClientConfig;
use crate::error::{PeerError, Result};
use crate::message::{ErrorResponse, RpcRequest};
use crate::stub::{RpcStub, StubAuth, StubFactory, StubHooks, HEALTH_RPC};

/// Multicast publish primitive a client sends through:
/// `(relays, destination, serialized message, local keys)`.
pub type SendFn = Arc<dyn Fn(&[String], &str, String, &KeyPair) + Send + Sync>;

/// Callback invoked for every delivery on a stream.
pub type StreamHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Uniqueness key of a client: destination pubkey plus local pubkey.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey {
    pub destination: String,
    pub local: String,
}

impl ClientKey {
    pub fn new(destination: &str, local: &str) -> Self {
        Self {
            destination: destination.to_string(),
            local: local.to_string(),
        }
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.destination, self.local)
    }
}

/// Whether a pending entry resolves once or keeps receiving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    Single,
    Stream,
}

enum Resolver {
    Single(oneshot::Sender<Value>),
    Stream(StreamHandler),
}

impl Resolver {
    fn mode(&self) -> CallMode {
        match self {
            Resolver::Single(_) => CallMode::Single,
            Resolver::Stream(_) => CallMode::Stream,
        }
    }

    fn resolve(self, value: Value) {
        match self {
            // The caller may have dropped its future; nothing to do then.
            Resolver::Single(tx) => {
                let _ = tx.send(value);
            }
            Resolver::Stream(handler) => handler(value),
        }
    }
}

type CallTable = HashMap<String, PendingCall>;

struct PendingCall {
    started_at_millis: u64,
    message: RpcRequest,
    target: String,
    resolver: Resolver,
}

/// Read-only view of a pending entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCallInfo {
    pub request_id: String,
    pub rpc_name: Option<String>,
    pub target: String,
    pub mode: CallMode,
    pub started_at_millis: u64,
}

/// Health timestamps of a client, unix milliseconds, zero when unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientState {
    pub latest_response_at_millis: u64,
    pub latest_health_request_at_millis: u64,
}

/// Future returned by [`DestinationClient::send`].
///
/// Resolves with the reply payload, or with a synthetic
/// `{"status":"ERROR"}` value when the client disconnects first. Fails only
/// if the pending entry vanished without being resolved.
#[must_use = "a pending response does nothing unless awaited"]
pub struct PendingResponse {
    request_id: String,
    rx: oneshot::Receiver<Value>,
}

impl PendingResponse {
    /// Correlation id the response is waiting for.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

impl Future for PendingResponse {
    type Output = Result<Value>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.rx).poll(cx).map(|res| {
            res.map_err(|_| {
                PeerError::Disconnected(format!("request {} was dropped", this.request_id))
            })
        })
    }
}

impl fmt::Debug for PendingResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingResponse")
            .field("request_id", &self.request_id)
            .finish()
    }
}

/// Everything a client needs besides its stub.
pub struct ClientParts {
    pub destination: String,
    pub relays: Vec<String>,
    pub keys: KeyPair,
    pub send: SendFn,
    pub beacons: Arc<dyn BeaconSource>,
    pub config: ClientConfig,
}

/// RPC client for one (destination, local identity) pair.
pub struct DestinationClient {
    id: String,
    key: ClientKey,
    relays: Vec<String>,
    keys: KeyPair,
    send: SendFn,
    beacons: Arc<dyn BeaconSource>,
    stub: Arc<dyn RpcStub>,
    calls: Mutex<CallTable>,
    latest_response_at_millis: AtomicU64,
    latest_health_request_at_millis: AtomicU64,
    disconnected: AtomicBool,
    config: ClientConfig,
}

impl DestinationClient {
    /// Build a client and its stub.
    pub fn new(parts: ClientParts, stubs: &dyn StubFactory) -> Arc<Self> {
        let ClientParts {
            destination,
            relays,
            keys,
            send,
            beacons,
            config,
        } = parts;

        Arc::new_cyclic(|weak| {
            let auth = StubAuth::new(&destination, &keys.public_key);
            let stub = stubs.build(auth, StubHooks::new(weak.clone()));
            Self {
                id: make_id(config.request_id_len),
                key: ClientKey::new(&destination, &keys.public_key),
                relays,
                keys,
                send,
                beacons,
                stub,
                calls: Mutex::new(HashMap::new()),
                latest_response_at_millis: AtomicU64::new(0),
                latest_health_request_at_millis: AtomicU64::new(0),
                disconnected: AtomicBool::new(false),
                config,
            }
        })
    }

    /// Send a single request to `target` and wait for its reply.
    ///
    /// A missing or empty `requestId` is generated. Reusing an id that is
    /// still pending fails with [`PeerError::DuplicateRequest`] before anything
    /// is sent.
    pub fn send(&self, target: &str, mut message: RpcRequest) -> Result<PendingResponse> {
        let request_id = match non_empty(message.request_id.take()) {
            Some(id) => id,
            None => make_id(self.config.request_id_len),
        };
        message.request_id = Some(request_id.clone());
        let payload = serde_json::to_string(&message)?;
        let rpc_name = message.rpc_name.clone();

        let (tx, rx) = oneshot::channel();
        {
            let mut calls = self.lock_active()?;
            if calls.contains_key(&request_id) {
                return Err(PeerError::DuplicateRequest(request_id));
            }
            calls.insert(
                request_id.clone(),
                PendingCall {
                    started_at_millis: now_millis(),
                    message,
                    target: target.to_string(),
                    resolver: Resolver::Single(tx),
                },
            );
        }

        info!(
            request_id = %request_id,
            rpc_name = rpc_name.as_deref().unwrap_or(""),
            destination = %target,
            "sending single request"
        );
        (self.send)(&self.relays, target, payload, &self.keys);
        Ok(PendingResponse { request_id, rx })
    }

    /// Subscribe to pushes for `message` on `target`.
    ///
    /// The correlation id defaults to the RPC name when missing or empty.
    /// Subscribing again with the same id replaces the handler; the subscribe
    /// message is sent every time.
    pub fn subscribe<F>(&self, target: &str, mut message: RpcRequest, on_event: F) -> Result<()>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let request_id = non_empty(message.request_id.take())
            .or_else(|| non_empty(message.rpc_name.clone()))
            .ok_or(PeerError::InvalidSubscription)?;
        message.request_id = Some(request_id.clone());
        let payload = serde_json::to_string(&message)?;

        let replaced = self.lock_active()?.insert(
            request_id.clone(),
            PendingCall {
                started_at_millis: now_millis(),
                message,
                target: target.to_string(),
                resolver: Resolver::Stream(Arc::new(on_event)),
            },
        );
        if let Some(previous) = replaced {
            warn!(
                request_id = %request_id,
                previous_mode = ?previous.resolver.mode(),
                "subscription already registered, replacing handler"
            );
        } else {
            info!(request_id = %request_id, destination = %target, "subscribing to stream");
        }

        (self.send)(&self.relays, target, payload, &self.keys);
        Ok(())
    }

    /// Offer an inbound event to this client.
    ///
    /// Returns true when the event was addressed to this client and matched a
    /// pending entry. `payload` is the event's content, already reassembled.
    pub fn on_event(&self, event: &RelayEvent, payload: &CorrelatedPayload) -> bool {
        if event.author != self.key.destination || event.to != self.keys.public_key {
            return false;
        }

        let resolver = {
            let Ok(mut calls) = self.lock_active() else {
                return false;
            };
            let mode = match calls.get(&payload.request_id) {
                Some(call) => call.resolver.mode(),
                None => return false,
            };
            let resolver = match mode {
                CallMode::Single => match calls.remove(&payload.request_id) {
                    Some(call) => call.resolver,
                    None => return false,
                },
                CallMode::Stream => match calls.get(&payload.request_id) {
                    Some(PendingCall {
                        resolver: Resolver::Stream(handler),
                        ..
                    }) => Resolver::Stream(handler.clone()),
                    _ => return false,
                },
            };
            // Under the lock, ordered against disconnect's reset.
            self.latest_response_at_millis
                .fetch_max(now_millis(), Ordering::SeqCst);
            resolver
        };

        let mode = resolver.mode();
        resolver.resolve(payload.body.clone());

        if mode == CallMode::Single {
            debug!(
                request_id = %payload.request_id,
                single_left = self.pending_single_calls().len(),
                "single request resolved"
            );
        }
        true
    }

    /// Resolve every pending entry with an error response and retire the client.
    ///
    /// Later calls fail with [`PeerError::Disconnected`]; a fresh client has to
    /// be obtained from the cluster.
    pub fn disconnect(&self, reason: Option<&str>) {
        let reason = reason.unwrap_or(&self.config.disconnect_reason);
        let response = ErrorResponse::new(Some(reason)).to_value();

        // Flag, drain and reset share one critical section with every insert.
        let drained: Vec<PendingCall> = {
            let mut calls = self.calls.lock();
            self.disconnected.store(true, Ordering::SeqCst);
            self.latest_response_at_millis.store(0, Ordering::SeqCst);
            self.latest_health_request_at_millis
                .store(0, Ordering::SeqCst);
            calls.drain().map(|(_, call)| call).collect()
        };
        let count = drained.len();
        for call in drained {
            call.resolver.resolve(response.clone());
        }

        info!(client_id = %self.id, destination = %self.key.destination, reason, count, "client disconnected");
    }

    /// Stamp the health request time and fire the stub's health probe.
    ///
    /// An unanswered earlier probe is dropped first, so repeated probing keeps
    /// at most one health entry in the table.
    pub fn send_health_request(&self) -> Result<()> {
        {
            let mut calls = self.lock_active()?;
            if matches!(
                calls.get(HEALTH_RPC),
                Some(PendingCall {
                    resolver: Resolver::Single(_),
                    ..
                })
            ) {
                calls.remove(HEALTH_RPC);
                debug!(client_id = %self.id, "replacing unanswered health probe");
            }
            self.latest_health_request_at_millis
                .fetch_max(now_millis(), Ordering::SeqCst);
        }
        self.stub.request_health()
    }

    /// Look up the destination's latest beacon within `max_age` (default from
    /// config) and fold its timestamp into the response health.
    pub async fn check_beacon_health(&self, max_age: Option<Duration>) -> Result<Option<Beacon>> {
        let max_age = max_age.unwrap_or(self.config.beacon_max_age);
        let beacon = self
            .beacons
            .fetch_beacon(&self.key.destination, &self.relays, max_age)
            .await?;
        if let Some(beacon) = &beacon {
            if let Ok(_calls) = self.lock_active() {
                self.latest_response_at_millis
                    .fetch_max(beacon.created_at_millis, Ordering::SeqCst);
            }
        }
        Ok(beacon)
    }

    /// Random identifier of this client instance.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn key(&self) -> &ClientKey {
        &self.key
    }

    pub fn destination(&self) -> &str {
        &self.key.destination
    }

    pub fn local_pubkey(&self) -> &str {
        &self.keys.public_key
    }

    pub fn relays(&self) -> &[String] {
        &self.relays
    }

    /// The RPC method surface wrapping this client.
    pub fn stub(&self) -> &Arc<dyn RpcStub> {
        &self.stub
    }

    pub fn client_state(&self) -> ClientState {
        ClientState {
            latest_response_at_millis: self.latest_response_at_millis.load(Ordering::SeqCst),
            latest_health_request_at_millis: self
                .latest_health_request_at_millis
                .load(Ordering::SeqCst),
        }
    }

    /// Every pending entry, single and stream.
    pub fn pending_calls(&self) -> Vec<PendingCallInfo> {
        self.calls
            .lock()
            .iter()
            .map(|(request_id, call)| PendingCallInfo {
                request_id: request_id.clone(),
                rpc_name: call.message.rpc_name.clone(),
                target: call.target.clone(),
                mode: call.resolver.mode(),
                started_at_millis: call.started_at_millis,
            })
            .collect()
    }

    /// Outstanding single requests, for callers layering timeouts.
    pub fn pending_single_calls(&self) -> Vec<PendingCallInfo> {
        let mut calls: Vec<_> = self
            .pending_calls()
            .into_iter()
            .filter(|call| call.mode == CallMode::Single)
            .collect();
        calls.sort_by_key(|call| call.started_at_millis);
        calls
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// Lock the call table, failing once the client is disconnected.
    fn lock_active(&self) -> Result<MutexGuard<'_, CallTable>> {
        let calls = self.calls.lock();
        if self.is_disconnected() {
            return Err(PeerError::Disconnected(format!(
                "client {} for {}",
                self.id, self.key.destination
            )));
        }
        Ok(calls)
    }
}

impl fmt::Debug for DestinationClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestinationClient")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("relays", &self.relays)
            .field("pending", &self.calls.lock().len())
            .field("disconnected", &self.is_disconnected())
            .finish()
    }
}

fn non_empty(id: Option<String>) -> Option<String> {
    id.filter(|id| !id.is_empty())
}

/// Random alphanumeric identifier.
pub(crate) fn make_id(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
