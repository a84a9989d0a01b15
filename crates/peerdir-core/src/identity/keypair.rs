//! Ed25519 keypair identifying the local node
//!
//! The public key is published in the node's record and pinned by every peer
//! that stores it. Its hash doubles as the node's identity hash when the
//! node is not addressed by phone number.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use super::public_key_hash;
use crate::error::{DirectoryError, DirectoryResult};

/// Signing identity of the local node
pub struct NodeKeypair {
    signing: SigningKey,
}

impl std::fmt::Debug for NodeKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeKeypair")
            .field("public_key", &self.public_key_string())
            .finish_non_exhaustive()
    }
}

impl NodeKeypair {
    /// Generate a new random keypair
    pub fn generate() -> DirectoryResult<Self> {
        // getrandom directly avoids the rand_core version split with ed25519-dalek
        let mut seed = [0u8; 32];
        getrandom::getrandom(&mut seed)
            .map_err(|e| DirectoryError::Identity(format!("No entropy available: {}", e)))?;
        Ok(Self::from_seed(&seed))
    }

    /// Deterministic keypair from a 32-byte seed
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(seed),
        }
    }

    /// Serialize the secret seed
    pub fn to_bytes(&self) -> [u8; 32] {
        self.signing.to_bytes()
    }

    /// Restore a keypair from its serialized seed
    pub fn from_bytes(bytes: &[u8]) -> DirectoryResult<Self> {
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| DirectoryError::Identity(format!("Seed must be 32 bytes, got {}", bytes.len())))?;
        Ok(Self::from_seed(&seed))
    }

    /// Base64 verifying key, the form stored in records
    pub fn public_key_string(&self) -> String {
        STANDARD.encode(self.signing.verifying_key().as_bytes())
    }

    /// Identity hash derived from the public key
    pub fn identity_hash(&self) -> String {
        public_key_hash(&self.public_key_string())
    }

    /// Sign a message, returning a base64 signature
    pub fn sign(&self, message: &[u8]) -> String {
        STANDARD.encode(self.signing.sign(message).to_bytes())
    }

    /// Verify a base64 signature against a base64 public key
    pub fn verify(public_key: &str, message: &[u8], signature: &str) -> DirectoryResult<()> {
        let key_bytes: [u8; 32] = STANDARD
            .decode(public_key)
            .map_err(|e| DirectoryError::SignatureInvalid(format!("Bad public key encoding: {}", e)))?
            .try_into()
            .map_err(|_| DirectoryError::SignatureInvalid("Public key must be 32 bytes".to_string()))?;
        let verifying = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| DirectoryError::SignatureInvalid(format!("Bad public key: {}", e)))?;

        let sig_bytes: [u8; 64] = STANDARD
            .decode(signature)
            .map_err(|e| DirectoryError::SignatureInvalid(format!("Bad signature encoding: {}", e)))?
            .try_into()
            .map_err(|_| DirectoryError::SignatureInvalid("Signature must be 64 bytes".to_string()))?;
        let signature = Signature::from_bytes(&sig_bytes);

        verifying
            .verify(message, &signature)
            .map_err(|e| DirectoryError::SignatureInvalid(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let keypair = NodeKeypair::generate().unwrap();
        let signature = keypair.sign(b"hello");
        assert!(NodeKeypair::verify(&keypair.public_key_string(), b"hello", &signature).is_ok());
        assert!(NodeKeypair::verify(&keypair.public_key_string(), b"hellp", &signature).is_err());
    }

    #[test]
    fn test_bytes_roundtrip_keeps_identity() {
        let keypair = NodeKeypair::generate().unwrap();
        let restored = NodeKeypair::from_bytes(&keypair.to_bytes()).unwrap();
        assert_eq!(keypair.identity_hash(), restored.identity_hash());
    }

    #[test]
    fn test_from_bytes_rejects_wrong_length() {
        assert!(NodeKeypair::from_bytes(&[1u8; 16]).is_err());
    }

    #[test]
    fn test_identity_hash_matches_public_key_hash() {
        let keypair = NodeKeypair::from_seed(&[7u8; 32]);
        assert_eq!(
            keypair.identity_hash(),
            public_key_hash(&keypair.public_key_string())
        );
    }

    #[test]
    fn test_verify_rejects_garbage_key() {
        let keypair = NodeKeypair::from_seed(&[1u8; 32]);
        let signature = keypair.sign(b"msg");
        assert!(NodeKeypair::verify("not base64!", b"msg", &signature).is_err());
        assert!(NodeKeypair::verify(&STANDARD.encode([0u8; 5]), b"msg", &signature).is_err());
    }
}
