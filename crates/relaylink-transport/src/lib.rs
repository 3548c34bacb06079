//! Relay transport boundary.
//!
//! Relays broadcast signed, encrypted events to every subscriber. This crate
//! does not speak the relay wire protocol; it defines the seam the rest of
//! relaylink talks to:
//! - [`RelayTransport`]: relay sync, multicast publish and beacon listeners
//! - [`RelayEventHandler`]: the single inbound callback installed per sync
//! - [`MemoryRelay`]: an in-process transport for tests and demos
//!
//! Everything else builds on the types re-exported here.

pub mod error;
pub mod memory;
pub mod traits;
pub mod types;

pub use error::{Result, TransportError};
pub use memory::{MemoryRelay, OutboundMessage};
pub use traits::{BeaconListener, RelayEventHandler, RelayTransport};
pub use types::{BeaconUpdate, KeyPair, RelayEvent, RelaySettings};
