use std::time::Duration;

use relaylink_shard::ShardConfig;

use crate::message::DEFAULT_DISCONNECT_REASON;

/// Length of generated correlation and client ids.
pub const DEFAULT_ID_LEN: usize = 16;

/// Default maximum age of a beacon accepted by health checks.
pub const DEFAULT_BEACON_MAX_AGE: Duration = Duration::from_secs(2 * 60);

/// Per-destination client behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Length of generated request ids.
    pub request_id_len: usize,
    /// Reason reported to pending calls when `disconnect` gets none.
    pub disconnect_reason: String,
    /// Beacon age bound used when a health check passes none.
    pub beacon_max_age: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_id_len: DEFAULT_ID_LEN,
            disconnect_reason: DEFAULT_DISCONNECT_REASON.to_string(),
            beacon_max_age: DEFAULT_BEACON_MAX_AGE,
        }
    }
}

/// Cluster-wide behavior.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterConfig {
    /// Applied to every client the cluster constructs.
    pub client: ClientConfig,
    /// Shard reassembly limits.
    pub shard: ShardConfig,
}
