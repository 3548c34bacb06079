use std::fmt;

use serde::{Deserialize, Serialize};

/// Local identity used to address outbound messages and recognize replies.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPair {
    /// Hex-encoded public key.
    pub public_key: String,
    /// Hex-encoded private key.
    /// Opaque credential material, redacted in debug output.
    pub private_key: String,
}

impl KeyPair {
    pub fn new(public_key: impl Into<String>, private_key: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
            private_key: private_key.into(),
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .field(
                "private_key",
                &format_args!("<redacted:{} bytes>", self.private_key.len()),
            )
            .finish()
    }
}

/// A relay set together with the identity that subscribes on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySettings {
    /// Relay URLs, deduplicated by the caller.
    pub relays: Vec<String>,
    /// Identity whose inbox is subscribed on these relays.
    pub keys: KeyPair,
}

/// A decrypted event delivered by a relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEvent {
    /// Event id assigned by the author.
    pub id: String,
    /// Author public key.
    #[serde(rename = "pub")]
    pub author: String,
    /// Recipient public key.
    pub to: String,
    /// Event kind.
    pub kind: u32,
    /// Decrypted content (a JSON document or one shard of one).
    pub content: String,
}

/// Beacon update broadcast by the transport when a destination announces liveness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeaconUpdate {
    /// Public key that published the beacon.
    pub pubkey: String,
    /// Human-readable name announced in the beacon.
    pub name: String,
    /// Beacon creation time in unix milliseconds.
    pub created_at_millis: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_redacts_private_key() {
        let keys = KeyPair::new("ab".repeat(32), "super-secret");
        let debug = format!("{keys:?}");
        assert!(debug.contains("<redacted:12 bytes>"));
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains(&"ab".repeat(32)));
    }

    #[test]
    fn relay_event_uses_pub_field_name() {
        let event: RelayEvent = serde_json::from_str(
            r#"{"id":"e1","pub":"alice","to":"bob","kind":21000,"content":"{}"}"#,
        )
        .expect("event should decode");
        assert_eq!(event.author, "alice");
        assert_eq!(event.to, "bob");

        let encoded = serde_json::to_value(&event).expect("event should encode");
        assert_eq!(encoded["pub"], "alice");
    }
}
