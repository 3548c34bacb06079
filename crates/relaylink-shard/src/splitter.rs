use crate::envelope::ShardFragment;
use crate::error::{Result, ShardError};

/// Split a serialized payload into fragment envelopes of at most
/// `max_chunk_len` payload bytes each.
///
/// Chunks never cut a UTF-8 sequence; a single character wider than
/// `max_chunk_len` gets a chunk of its own. An empty payload yields one empty
/// fragment.
pub fn split_into_shards(payload: &str, max_chunk_len: usize, shards_id: &str) -> Result<Vec<String>> {
    if max_chunk_len == 0 {
        return Err(ShardError::InvalidChunkSize);
    }

    let chunks = chunk_on_char_boundaries(payload, max_chunk_len);
    let total_shards = chunks.len();
    chunks
        .into_iter()
        .enumerate()
        .map(|(index, chunk)| {
            let fragment = ShardFragment {
                shards_id: shards_id.to_string(),
                index,
                total_shards,
                shard: chunk.to_string(),
            };
            serde_json::to_string(&fragment).map_err(ShardError::from)
        })
        .collect()
}

fn chunk_on_char_boundaries(payload: &str, max_chunk_len: usize) -> Vec<&str> {
    if payload.is_empty() {
        return vec![payload];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    for (offset, ch) in payload.char_indices() {
        let end = offset + ch.len_utf8();
        if end - start > max_chunk_len && offset > start {
            chunks.push(&payload[start..offset]);
            start = offset;
        }
    }
    chunks.push(&payload[start..]);
    chunks
}
