//! Request/response and streaming RPC over relay pub/sub.
//!
//! relaylink turns a broadcast, unordered relay network into per-destination
//! RPC clients: requests are correlated by id, large replies are reassembled
//! from shards, and client bring-up is serialized so each destination gets
//! exactly one client.
//!
//! # Crate Structure
//!
//! - [`transport`]: Relay transport seam and an in-memory implementation
//! - [`shard`]: Correlation envelopes, shard reassembly and splitting
//! - [`peer`]: Destination clients and the client registry (behind `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use relaylink_transport::*;
}

/// Re-export shard types.
pub mod shard {
    pub use relaylink_shard::*;
}

/// Re-export client types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use relaylink_peer::*;
}
