/// Errors that can occur while decoding envelopes or reassembling shards.
#[derive(Debug, thiserror::Error)]
pub enum ShardError {
    /// The content is not valid JSON.
    #[error("content is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The content looks like a shard fragment but is malformed.
    #[error("invalid shard fragment: {0}")]
    InvalidFragment(String),

    /// The fragment index does not fit the announced shard count.
    #[error("shard index {index} out of range ({total} shards)")]
    IndexOutOfRange { index: usize, total: usize },

    /// The fragment disagrees with the shard count its set announced first.
    #[error("shard set {shards_id} announced {expected} shards, fragment claims {got}")]
    TotalMismatch {
        shards_id: String,
        expected: usize,
        got: usize,
    },

    /// A complete payload did not carry a string `requestId`.
    #[error("payload carries no requestId")]
    MissingCorrelation,

    /// Shard chunk size must be non-zero.
    #[error("shard chunk size must be greater than zero")]
    InvalidChunkSize,
}

pub type Result<T> = std::result::Result<T, ShardError>;
