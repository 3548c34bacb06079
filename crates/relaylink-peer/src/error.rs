/// Errors that can occur in client and cluster operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Relay transport error.
    #[error("transport error: {0}")]
    Transport(#[from] relaylink_transport::TransportError),

    /// Envelope or shard decoding error.
    #[error("shard error: {0}")]
    Shard(#[from] relaylink_shard::ShardError),

    /// A destination reference could not be decoded into a pubkey/relay pair.
    #[error("invalid destination reference: {0}")]
    InvalidReference(String),

    /// Relay resolution produced an empty set.
    #[error("cannot create client for {0}: no relays provided")]
    NoRelays(String),

    /// A single-mode call reused a correlation id that is still pending.
    #[error("request {0} was already sent and is still pending")]
    DuplicateRequest(String),

    /// A subscribe call could not determine a correlation id.
    #[error("invalid subscription: no requestId or rpcName")]
    InvalidSubscription,

    /// The client was disconnected and no longer accepts calls.
    #[error("client disconnected: {0}")]
    Disconnected(String),

    /// A bring-up task failed or was dropped before completing.
    #[error("client bring-up failed: {0}")]
    BringUp(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Key store I/O error.
    #[error("key store error: {0}")]
    KeyStore(#[from] std::io::Error),

    /// Supplied key material is malformed.
    #[error("invalid key: {0}")]
    InvalidKey(String),
}

pub type Result<T> = std::result::Result<T, PeerError>;
