//! Signed datagram envelopes
//!
//! Every datagram a node puts on the wire is wrapped in a [`SignedDatagram`]
//! so the receiver can attribute it to an identity before anything reaches
//! the rate limiter or the store.
//!
//! ## Wire Format
//!
//! JSON object:
//!
//! ```text
//! { "type": "PEER_SYNC", "from": "<identity hash>", "pubkey": "<base64>",
//!   "timestamp": <ms>, "data": "<payload>", "signature": "<base64>" }
//! ```
//!
//! The signature covers every field except itself, each length-prefixed.
//! `open` rejects an envelope when:
//! - it does not parse
//! - its timestamp is more than 60 s away from the receiver's clock
//! - `from` is not the hash of `pubkey`
//! - the signature does not verify

use serde::{Deserialize, Serialize};

use crate::error::{DirectoryError, DirectoryResult};
use crate::identity::{public_key_hash, NodeKeypair};
use crate::types::{now_millis, Timestamp};

/// Largest accepted difference between sender and receiver clocks
pub const MAX_CLOCK_DRIFT_MS: u64 = 60_000;

/// An authenticated datagram
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedDatagram {
    /// Message type (`PEER_SYNC`, `PING`, `PONG`)
    #[serde(rename = "type")]
    pub message_type: String,
    /// Sender identity hash
    pub from: String,
    /// Sender public key (base64)
    pub pubkey: String,
    /// Sender clock at sealing time (ms)
    pub timestamp: Timestamp,
    /// Message body
    pub data: String,
    /// Signature over the other fields (base64)
    pub signature: String,
}

impl SignedDatagram {
    /// Sign `data` as the local node, stamped with the current time
    pub fn seal(keypair: &NodeKeypair, message_type: &str, data: &str) -> Self {
        Self::seal_at(keypair, message_type, data, now_millis())
    }

    /// Sign with an explicit timestamp
    pub fn seal_at(
        keypair: &NodeKeypair,
        message_type: &str,
        data: &str,
        timestamp: Timestamp,
    ) -> Self {
        let mut datagram = Self {
            message_type: message_type.to_string(),
            from: keypair.identity_hash(),
            pubkey: keypair.public_key_string(),
            timestamp,
            data: data.to_string(),
            signature: String::new(),
        };
        datagram.signature = keypair.sign(&datagram.signed_data());
        datagram
    }

    /// Parse and authenticate a received datagram
    pub fn open(bytes: &[u8], now: Timestamp) -> DirectoryResult<Self> {
        let datagram = Self::from_bytes(bytes)?;
        datagram.verify(now)?;
        Ok(datagram)
    }

    /// Check drift, sender binding and signature
    pub fn verify(&self, now: Timestamp) -> DirectoryResult<()> {
        let drift = now.abs_diff(self.timestamp);
        if drift > MAX_CLOCK_DRIFT_MS {
            return Err(DirectoryError::ClockDrift(drift));
        }

        if self.from != public_key_hash(&self.pubkey) {
            return Err(DirectoryError::SignatureInvalid(format!(
                "Sender {} does not match its public key",
                self.from
            )));
        }

        NodeKeypair::verify(&self.pubkey, &self.signed_data(), &self.signature)
    }

    /// Bytes covered by the signature: each field length-prefixed
    fn signed_data(&self) -> Vec<u8> {
        let mut data = Vec::new();
        for field in [&self.message_type, &self.from, &self.pubkey] {
            data.extend_from_slice(&(field.len() as u32).to_le_bytes());
            data.extend_from_slice(field.as_bytes());
        }
        data.extend_from_slice(&self.timestamp.to_le_bytes());
        data.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        data.extend_from_slice(self.data.as_bytes());
        data
    }

    /// Encode for transmission
    pub fn to_bytes(&self) -> DirectoryResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| DirectoryError::Serialization(format!("Failed to encode envelope: {}", e)))
    }

    /// Decode without verifying
    pub fn from_bytes(bytes: &[u8]) -> DirectoryResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| DirectoryError::MalformedPayload(format!("Failed to decode envelope: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::PEER_SYNC;

    const NOW: Timestamp = 1_700_000_000_000;

    fn keypair() -> NodeKeypair {
        NodeKeypair::from_seed(&[42u8; 32])
    }

    #[test]
    fn test_seal_then_open() {
        let sealed = SignedDatagram::seal_at(&keypair(), PEER_SYNC, r#"{"nodes":[]}"#, NOW);
        let bytes = sealed.to_bytes().unwrap();

        let opened = SignedDatagram::open(&bytes, NOW + 1_000).unwrap();
        assert_eq!(opened, sealed);
        assert_eq!(opened.from, keypair().identity_hash());
    }

    #[test]
    fn test_wire_uses_type_field() {
        let sealed = SignedDatagram::seal_at(&keypair(), PEER_SYNC, "x", NOW);
        let value: serde_json::Value = serde_json::from_slice(&sealed.to_bytes().unwrap()).unwrap();
        assert_eq!(value["type"], PEER_SYNC);
    }

    #[test]
    fn test_tampered_data_rejected() {
        let mut sealed = SignedDatagram::seal_at(&keypair(), PEER_SYNC, "genuine", NOW);
        sealed.data = "forged".to_string();
        assert!(matches!(
            sealed.verify(NOW),
            Err(DirectoryError::SignatureInvalid(_))
        ));
    }

    #[test]
    fn test_tampered_type_rejected() {
        let mut sealed = SignedDatagram::seal_at(&keypair(), PEER_SYNC, "data", NOW);
        sealed.message_type = "PING".to_string();
        assert!(sealed.verify(NOW).is_err());
    }

    #[test]
    fn test_clock_drift_rejected_both_ways() {
        let sealed = SignedDatagram::seal_at(&keypair(), PEER_SYNC, "data", NOW);
        assert!(sealed.verify(NOW + MAX_CLOCK_DRIFT_MS).is_ok());
        assert!(matches!(
            sealed.verify(NOW + MAX_CLOCK_DRIFT_MS + 1),
            Err(DirectoryError::ClockDrift(_))
        ));
        assert!(matches!(
            sealed.verify(NOW - MAX_CLOCK_DRIFT_MS - 1),
            Err(DirectoryError::ClockDrift(_))
        ));
    }

    #[test]
    fn test_sender_must_match_key() {
        let mut sealed = SignedDatagram::seal_at(&keypair(), PEER_SYNC, "data", NOW);
        sealed.from = NodeKeypair::from_seed(&[1u8; 32]).identity_hash();
        assert!(matches!(
            sealed.verify(NOW),
            Err(DirectoryError::SignatureInvalid(_))
        ));
    }

    #[test]
    fn test_key_swap_rejected() {
        let other = NodeKeypair::from_seed(&[9u8; 32]);
        let mut sealed = SignedDatagram::seal_at(&keypair(), PEER_SYNC, "data", NOW);
        sealed.pubkey = other.public_key_string();
        sealed.from = other.identity_hash();
        assert!(sealed.verify(NOW).is_err());
    }

    #[test]
    fn test_garbage_bytes_rejected() {
        assert!(matches!(
            SignedDatagram::open(b"\x00\x01garbage", NOW),
            Err(DirectoryError::MalformedPayload(_))
        ));
    }
}
