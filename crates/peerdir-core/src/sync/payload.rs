//! Gossip wire payload
//!
//! ```text
//! { "nodes": [ { "hash": "...", "ip": "1.2.3.4", "port": 8888,
//!                "publicKey": "...", "lastSeen": 1700000000000 }, ... ] }
//! ```
//!
//! Entries are decoded one at a time so a single bad entry does not poison
//! the batch. Contact hints and the `synced` flag never leave the node.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DirectoryError, DirectoryResult};
use crate::types::{NodeRecord, Timestamp, DEFAULT_PORT, UNKNOWN_ADDRESS};

fn default_ip() -> String {
    UNKNOWN_ADDRESS.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// One record as it appears on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireNode {
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default = "default_ip")]
    pub ip: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub public_key: String,
    #[serde(default)]
    pub last_seen: Timestamp,
}

impl From<&NodeRecord> for WireNode {
    fn from(record: &NodeRecord) -> Self {
        Self {
            hash: Some(record.identity_hash.clone()),
            ip: record.address.clone(),
            port: record.port,
            public_key: record.public_key.clone(),
            last_seen: record.last_seen,
        }
    }
}

impl WireNode {
    /// Convert to a record, `None` if the hash or public key is missing
    pub fn into_record(self) -> Option<NodeRecord> {
        let hash = self.hash.filter(|h| !h.trim().is_empty())?;
        if self.public_key.trim().is_empty() {
            return None;
        }
        Some(NodeRecord {
            identity_hash: hash,
            address: self.ip,
            port: self.port,
            public_key: self.public_key,
            contact_hint: None,
            last_seen: self.last_seen,
            synced: false,
        })
    }
}

#[derive(Serialize)]
struct GossipPayload<'a> {
    nodes: &'a [WireNode],
}

/// A decoded payload: usable records plus the number of entries dropped
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedPayload {
    pub nodes: Vec<NodeRecord>,
    pub dropped: usize,
}

/// Serialize records into a gossip payload
pub fn encode_payload(records: &[NodeRecord]) -> DirectoryResult<String> {
    let nodes: Vec<WireNode> = records.iter().map(WireNode::from).collect();
    serde_json::to_string(&GossipPayload { nodes: &nodes })
        .map_err(|e| DirectoryError::Serialization(format!("Failed to encode payload: {}", e)))
}

/// Parse a gossip payload
///
/// Fails only when the payload is not a JSON object with a `nodes` array.
/// Individual entries that cannot be decoded are counted in `dropped`.
pub fn decode_payload(raw: &str) -> DirectoryResult<DecodedPayload> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| DirectoryError::MalformedPayload(format!("Invalid JSON: {}", e)))?;

    let entries = value
        .as_object()
        .ok_or_else(|| DirectoryError::MalformedPayload("Payload is not an object".to_string()))?
        .get("nodes")
        .and_then(Value::as_array)
        .ok_or_else(|| DirectoryError::MalformedPayload("Missing nodes array".to_string()))?;

    let mut decoded = DecodedPayload::default();
    for entry in entries {
        match serde_json::from_value::<WireNode>(entry.clone())
            .ok()
            .and_then(WireNode::into_record)
        {
            Some(record) => decoded.nodes.push(record),
            None => decoded.dropped += 1,
        }
    }
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_uses_wire_names_and_hides_hint() {
        let record = NodeRecord::new("A", "pk1")
            .with_address("1.2.3.4", 9000)
            .with_last_seen(200)
            .with_contact_hint("15551234567")
            .with_synced(true);

        let json = encode_payload(&[record]).unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        let node = &value["nodes"][0];
        assert_eq!(node["hash"], "A");
        assert_eq!(node["ip"], "1.2.3.4");
        assert_eq!(node["port"], 9000);
        assert_eq!(node["publicKey"], "pk1");
        assert_eq!(node["lastSeen"], 200);
        assert!(!json.contains("15551234567"));
        assert!(node.get("synced").is_none());
    }

    #[test]
    fn test_decode_applies_defaults() {
        let decoded = decode_payload(r#"{"nodes":[{"hash":"A","publicKey":"pk1"}]}"#).unwrap();
        assert_eq!(decoded.dropped, 0);
        let node = &decoded.nodes[0];
        assert_eq!(node.address, "0.0.0.0");
        assert_eq!(node.port, 8888);
        assert_eq!(node.last_seen, 0);
        assert!(node.contact_hint.is_none());
    }

    #[test]
    fn test_decode_drops_bad_entries_individually() {
        let raw = r#"{"nodes":[
            {"ip":"1.1.1.1","publicKey":"pk"},
            {"hash":"B","publicKey":""},
            {"hash":"C","publicKey":"pk","port":"not a number"},
            {"hash":"D","publicKey":"pk","port":70000},
            42,
            {"hash":"E","publicKey":"pk","lastSeen":5}
        ]}"#;
        let decoded = decode_payload(raw).unwrap();
        assert_eq!(decoded.dropped, 5);
        assert_eq!(decoded.nodes.len(), 1);
        assert_eq!(decoded.nodes[0].identity_hash, "E");
    }

    #[test]
    fn test_decode_rejects_malformed_payloads() {
        for raw in ["not json", "[]", r#"{"peers":[]}"#, r#"{"nodes":{}}"#] {
            assert!(
                matches!(decode_payload(raw), Err(DirectoryError::MalformedPayload(_))),
                "accepted {raw}"
            );
        }
    }

    #[test]
    fn test_empty_nodes_array_is_valid() {
        assert_eq!(decode_payload(r#"{"nodes":[]}"#).unwrap(), DecodedPayload::default());
    }
}
