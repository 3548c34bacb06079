use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::envelope::{decode_envelope, decode_payload, CorrelatedPayload, Envelope, ShardFragment};
use crate::error::{Result, ShardError};

/// Default upper bound on `totalShards` accepted from a fragment.
pub const DEFAULT_MAX_TOTAL_SHARDS: usize = 1024;

/// Default number of shard sets that may be open at once.
pub const DEFAULT_MAX_OPEN_SETS: usize = 256;

/// Configuration for shard reassembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardConfig {
    /// Largest `totalShards` a fragment may announce.
    pub max_total_shards: usize,
    /// Open sets kept before the oldest one is evicted.
    pub max_open_sets: usize,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            max_total_shards: DEFAULT_MAX_TOTAL_SHARDS,
            max_open_sets: DEFAULT_MAX_OPEN_SETS,
        }
    }
}

/// Outcome of feeding one event's content to the reassembler.
#[derive(Debug, Clone, PartialEq)]
pub enum Reassembly {
    /// A full payload is ready to route.
    Complete(CorrelatedPayload),
    /// A fragment was stored; its set is still missing parts.
    Incomplete {
        shards_id: String,
        received: usize,
        total: usize,
    },
}

#[derive(Debug)]
struct ShardSet {
    parts: Vec<Option<String>>,
    opened_at: Instant,
}

impl ShardSet {
    fn received(&self) -> usize {
        self.parts.iter().filter(|part| part.is_some()).count()
    }
}

/// Accumulates shard fragments into complete payloads.
///
/// Sets are keyed by `shardsId`, created on the first fragment seen and
/// dropped the moment every slot is filled.
#[derive(Debug, Default)]
pub struct ShardReassembler {
    sets: Mutex<HashMap<String, ShardSet>>,
    config: ShardConfig,
}

impl ShardReassembler {
    /// Create a reassembler with default limits.
    pub fn new() -> Self {
        Self::with_config(ShardConfig::default())
    }

    /// Create a reassembler with explicit limits.
    pub fn with_config(config: ShardConfig) -> Self {
        Self {
            sets: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Decode `content` and, for fragments, fold it into its set.
    pub fn push(&self, content: &str) -> Result<Reassembly> {
        match decode_envelope(content)? {
            Envelope::Payload(payload) => Ok(Reassembly::Complete(payload)),
            Envelope::Shard(fragment) => self.push_fragment(fragment),
        }
    }

    /// Fold an already-decoded fragment into its set.
    pub fn push_fragment(&self, fragment: ShardFragment) -> Result<Reassembly> {
        let ShardFragment {
            shards_id,
            index,
            total_shards,
            shard,
        } = fragment;

        if total_shards == 0 || total_shards > self.config.max_total_shards {
            return Err(ShardError::InvalidFragment(format!(
                "totalShards {total_shards} outside 1..={}",
                self.config.max_total_shards
            )));
        }
        if index >= total_shards {
            return Err(ShardError::IndexOutOfRange {
                index,
                total: total_shards,
            });
        }

        let joined = {
            let mut sets = self.sets.lock();
            if !sets.contains_key(&shards_id) {
                self.evict_if_full(&mut sets);
            }
            let set = sets.entry(shards_id.clone()).or_insert_with(|| ShardSet {
                parts: vec![None; total_shards],
                opened_at: Instant::now(),
            });

            if set.parts.len() != total_shards {
                return Err(ShardError::TotalMismatch {
                    shards_id,
                    expected: set.parts.len(),
                    got: total_shards,
                });
            }

            // Last write wins on a repeated index.
            set.parts[index] = Some(shard);

            let received = set.received();
            if received < total_shards {
                debug!(shards_id = %shards_id, received, total = total_shards, "stored shard");
                return Ok(Reassembly::Incomplete {
                    shards_id,
                    received,
                    total: total_shards,
                });
            }

            let set = sets.remove(&shards_id).map(|set| set.parts).unwrap_or_default();
            set.into_iter().flatten().collect::<String>()
        };

        debug!(shards_id = %shards_id, total = total_shards, bytes = joined.len(), "shard set complete");
        decode_payload(&joined).map(Reassembly::Complete)
    }

    /// Number of sets still waiting for fragments.
    pub fn open_sets(&self) -> usize {
        self.sets.lock().len()
    }

    /// Whether a set for `shards_id` is still open.
    pub fn contains(&self, shards_id: &str) -> bool {
        self.sets.lock().contains_key(shards_id)
    }

    /// Reassembly limits in effect.
    pub fn config(&self) -> &ShardConfig {
        &self.config
    }

    fn evict_if_full(&self, sets: &mut HashMap<String, ShardSet>) {
        while sets.len() >= self.config.max_open_sets {
            let oldest = sets
                .iter()
                .min_by_key(|(_, set)| set.opened_at)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    if let Some(set) = sets.remove(&id) {
                        warn!(
                            shards_id = %id,
                            received = set.received(),
                            total = set.parts.len(),
                            "evicting incomplete shard set"
                        );
                    }
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::splitter::split_into_shards;

    fn fragment(id: &str, index: usize, total: usize, shard: &str) -> String {
        json!({
            "shardsId": id,
            "index": index,
            "totalShards": total,
            "shard": shard,
        })
        .to_string()
    }

    fn permutations(items: &[usize]) -> Vec<Vec<usize>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut out = Vec::new();
        for (i, &head) in items.iter().enumerate() {
            let mut rest = items.to_vec();
            rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, head);
                out.push(tail);
            }
        }
        out
    }

    #[test]
    fn complete_payload_passes_through() {
        let reassembler = ShardReassembler::new();
        let result = reassembler.push(r#"{"requestId":"r1","ok":true}"#).unwrap();
        match result {
            Reassembly::Complete(payload) => assert_eq!(payload.request_id, "r1"),
            other => panic!("expected complete payload, got {other:?}"),
        }
        assert_eq!(reassembler.open_sets(), 0);
    }

    #[test]
    fn every_arrival_order_reassembles_identically() {
        let full = r#"{"requestId":"big","items":[1,2,3,4,5,6,7,8,9]}"#;
        let chunks = ["{\"requestId\":\"big\",", "\"items\":[1,2,3,", "4,5,6,7,8,9]}"];
        assert_eq!(chunks.concat(), full);

        for order in permutations(&[0, 1, 2]) {
            let reassembler = ShardReassembler::new();
            let mut completed = None;
            for (step, &index) in order.iter().enumerate() {
                let result = reassembler
                    .push(&fragment("set-a", index, 3, chunks[index]))
                    .unwrap();
                if step < 2 {
                    assert!(matches!(result, Reassembly::Incomplete { .. }));
                    assert!(reassembler.contains("set-a"));
                } else {
                    completed = Some(result);
                }
            }

            match completed {
                Some(Reassembly::Complete(payload)) => {
                    assert_eq!(payload.request_id, "big");
                    assert_eq!(payload.body, serde_json::from_str::<serde_json::Value>(full).unwrap());
                }
                other => panic!("order {order:?} did not complete: {other:?}"),
            }
            assert!(!reassembler.contains("set-a"));
            assert_eq!(reassembler.open_sets(), 0);
        }
    }

    #[test]
    fn duplicate_index_overwrites_previous_chunk() {
        let reassembler = ShardReassembler::new();
        reassembler.push(&fragment("dup", 0, 2, "garbage")).unwrap();
        let again = reassembler
            .push(&fragment("dup", 0, 2, "{\"requestId\":"))
            .unwrap();
        assert_eq!(
            again,
            Reassembly::Incomplete {
                shards_id: "dup".to_string(),
                received: 1,
                total: 2,
            }
        );

        let done = reassembler.push(&fragment("dup", 1, 2, "\"r9\"}")).unwrap();
        assert!(matches!(done, Reassembly::Complete(ref p) if p.request_id == "r9"));
    }

    #[test]
    fn independent_sets_do_not_mix() {
        let reassembler = ShardReassembler::new();
        reassembler.push(&fragment("a", 0, 2, "{\"requestId\":")).unwrap();
        reassembler.push(&fragment("b", 1, 2, "\"b\"}")).unwrap();
        assert_eq!(reassembler.open_sets(), 2);

        let a = reassembler.push(&fragment("a", 1, 2, "\"a\"}")).unwrap();
        assert!(matches!(a, Reassembly::Complete(ref p) if p.request_id == "a"));
        assert_eq!(reassembler.open_sets(), 1);
        assert!(reassembler.contains("b"));
    }

    #[test]
    fn rejects_out_of_range_index() {
        let reassembler = ShardReassembler::new();
        let err = reassembler.push(&fragment("x", 3, 3, "")).unwrap_err();
        assert!(matches!(err, ShardError::IndexOutOfRange { index: 3, total: 3 }));
        assert_eq!(reassembler.open_sets(), 0);
    }

    #[test]
    fn rejects_zero_and_oversized_totals() {
        let reassembler = ShardReassembler::with_config(ShardConfig {
            max_total_shards: 4,
            ..ShardConfig::default()
        });
        assert!(matches!(
            reassembler.push(&fragment("x", 0, 0, "")),
            Err(ShardError::InvalidFragment(_))
        ));
        assert!(matches!(
            reassembler.push(&fragment("x", 0, 5, "")),
            Err(ShardError::InvalidFragment(_))
        ));
    }

    #[test]
    fn rejects_total_mismatch_without_touching_set() {
        let reassembler = ShardReassembler::new();
        reassembler.push(&fragment("m", 0, 2, "{\"requestId\":")).unwrap();
        let err = reassembler.push(&fragment("m", 1, 3, "x")).unwrap_err();
        assert!(matches!(
            err,
            ShardError::TotalMismatch { expected: 2, got: 3, .. }
        ));

        let done = reassembler.push(&fragment("m", 1, 2, "\"m\"}")).unwrap();
        assert!(matches!(done, Reassembly::Complete(_)));
    }

    #[test]
    fn completed_set_must_carry_request_id() {
        let reassembler = ShardReassembler::new();
        reassembler.push(&fragment("n", 0, 2, "{\"status\":")).unwrap();
        let err = reassembler.push(&fragment("n", 1, 2, "\"OK\"}")).unwrap_err();
        assert!(matches!(err, ShardError::MissingCorrelation));
        assert!(!reassembler.contains("n"));
    }

    #[test]
    fn evicts_oldest_set_when_full() {
        let reassembler = ShardReassembler::with_config(ShardConfig {
            max_open_sets: 2,
            ..ShardConfig::default()
        });
        reassembler.push(&fragment("first", 0, 2, "a")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        reassembler.push(&fragment("second", 0, 2, "b")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        reassembler.push(&fragment("third", 0, 2, "c")).unwrap();

        assert_eq!(reassembler.open_sets(), 2);
        assert!(!reassembler.contains("first"));
        assert!(reassembler.contains("second"));
        assert!(reassembler.contains("third"));
    }

    #[test]
    fn reassembles_output_of_splitter() {
        let payload = json!({ "requestId": "split", "text": "ünïcödé ".repeat(40) }).to_string();
        let fragments = split_into_shards(&payload, 17, "split-set").unwrap();
        assert!(fragments.len() > 1);

        let reassembler = ShardReassembler::new();
        let mut last = None;
        for content in fragments.iter().rev() {
            last = Some(reassembler.push(content).unwrap());
        }
        match last {
            Some(Reassembly::Complete(p)) => assert_eq!(p.body.to_string(), payload),
            other => panic!("expected completion, got {other:?}"),
        }
    }
}
