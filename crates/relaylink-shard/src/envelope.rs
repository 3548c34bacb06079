use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, ShardError};

/// Field whose presence marks content as a shard fragment. A `null`, `false`,
/// zero or empty-string value counts as absent.
pub const SHARDS_ID_FIELD: &str = "shardsId";

/// Field carrying the correlation id of a complete payload.
pub const REQUEST_ID_FIELD: &str = "requestId";

/// One fragment of a payload split across several events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardFragment {
    /// Identifier shared by every fragment of one payload.
    pub shards_id: String,
    /// Zero-based position of this fragment.
    pub index: usize,
    /// Number of fragments in the set.
    pub total_shards: usize,
    /// This fragment's chunk of the serialized payload.
    pub shard: String,
}

/// A complete payload together with its correlation id.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelatedPayload {
    /// The `requestId` the payload answers.
    pub request_id: String,
    /// The full decoded document, `requestId` included.
    pub body: Value,
}

/// Decoded event content.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// One fragment of a larger payload.
    Shard(ShardFragment),
    /// A complete, correlated payload.
    Payload(CorrelatedPayload),
}

/// Decode raw event content into an [`Envelope`].
///
/// Content carrying `shardsId` must decode as a [`ShardFragment`]; anything
/// else must be an object with a string `requestId`.
pub fn decode_envelope(content: &str) -> Result<Envelope> {
    let value: Value = serde_json::from_str(content)?;
    if value.get(SHARDS_ID_FIELD).is_some_and(is_set) {
        let fragment: ShardFragment = serde_json::from_value(value)
            .map_err(|err| ShardError::InvalidFragment(err.to_string()))?;
        return Ok(Envelope::Shard(fragment));
    }
    correlate(value).map(Envelope::Payload)
}

/// Decode content that must be a complete payload.
pub fn decode_payload(content: &str) -> Result<CorrelatedPayload> {
    correlate(serde_json::from_str(content)?)
}

fn is_set(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => false,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        _ => true,
    }
}

fn correlate(body: Value) -> Result<CorrelatedPayload> {
    let request_id = body
        .get(REQUEST_ID_FIELD)
        .and_then(Value::as_str)
        .ok_or(ShardError::MissingCorrelation)?
        .to_string();
    Ok(CorrelatedPayload { request_id, body })
}
