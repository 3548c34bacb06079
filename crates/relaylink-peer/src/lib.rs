//! RPC clients over relay pub/sub.
//!
//! This is the "just works" layer. Ask a [`ClientCluster`] for the client of a
//! destination, call methods through its stub, and replies find their way back
//! by correlation id, reassembled from shards when needed.
//!
//! ```text
//!   ClientCluster ──get_or_create──► BringUpQueue ──► sync relays ──► DestinationClient
//!        ▲                                                                 │ send
//!        └── route_inbound_event ◄── ShardReassembler ◄── RelayTransport ◄─┘
//! ```

pub mod beacon;
pub mod client;
pub mod cluster;
pub mod config;
pub mod error;
pub mod keys;
pub mod message;
pub mod queue;
pub mod reference;
pub mod stub;

pub use beacon::{Beacon, BeaconSource, NoBeacons};
pub use client::{
    CallMode, ClientKey, ClientParts, ClientState, DestinationClient, PendingCallInfo,
    PendingResponse, SendFn, StreamHandler,
};
pub use cluster::{ClientCluster, ClusterBuilder};
pub use config::{ClientConfig, ClusterConfig, DEFAULT_BEACON_MAX_AGE, DEFAULT_ID_LEN};
pub use error::{PeerError, Result};
pub use keys::{
    generate_private_key, private_key, private_key_or_generate, set_private_key,
    validate_private_key, FileKeyStore, KeyStore, MemoryKeyStore,
};
pub use message::{
    is_error_response, ErrorResponse, RpcRequest, DEFAULT_DISCONNECT_REASON, STATUS_ERROR,
    STATUS_OK,
};
pub use queue::BringUpQueue;
pub use reference::{decode_nprofile, dedupe_relays, Destination, DestinationRef};
pub use stub::{
    GenericStub, GenericStubFactory, RpcStub, StubAuth, StubFactory, StubHooks, HEALTH_RPC,
};
