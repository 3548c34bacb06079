//! Correlation envelopes and shard reassembly.
//!
//! Relays cap event size, so a large reply arrives as several fragments:
//! ```text
//! {"shardsId":"s1","index":1,"totalShards":3,"shard":"...chunk 1..."}
//! ```
//! Fragments may arrive in any order. Once every index of a set is present the
//! chunks are joined in index order and parsed as the full payload. Anything
//! that is not a fragment must be a complete payload carrying a `requestId`.

pub mod envelope;
pub mod error;
pub mod reassembler;
pub mod splitter;

pub use envelope::{decode_envelope, decode_payload, CorrelatedPayload, Envelope, ShardFragment};
pub use error::{Result, ShardError};
pub use reassembler::{
    Reassembly, ShardConfig, ShardReassembler, DEFAULT_MAX_OPEN_SETS, DEFAULT_MAX_TOTAL_SHARDS,
};
pub use splitter::split_into_shards;
