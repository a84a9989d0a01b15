//! Identity hashing and the local node keypair
//!
//! Lookups and gossip never carry raw phone numbers. A number is reduced to
//! its digits and run through a salted double SHA-256:
//!
//! ```text
//! normalized = digits(phone)            "+1 (555) 123-4567" -> "15551234567"
//! h1         = SHA256(normalized)
//! h2         = SHA256(h1 || salt)
//! key        = base64(h2)
//! ```
//!
//! Two installations sharing a salt derive the same key for the same
//! number, so contacts can be matched without revealing the number itself.
//! The salt is a static constant unless a deployment configures its own.

mod keypair;

pub use keypair::NodeKeypair;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};

/// Salt compiled into every installation
pub const DEFAULT_SALT: &str = "D_CHAT_V1_STATIC_SALT_CHANGE_THIS_IN_PROD";

/// Number of trailing digits compared when matching phone-book entries
const MATCH_DIGITS: usize = 10;

/// Derives privacy-preserving lookup keys from phone numbers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityHasher {
    salt: String,
}

impl Default for IdentityHasher {
    fn default() -> Self {
        Self::new(DEFAULT_SALT)
    }
}

impl IdentityHasher {
    /// Create a hasher with a deployment-specific salt
    pub fn new(salt: impl Into<String>) -> Self {
        Self { salt: salt.into() }
    }

    /// Hash a phone number into its identity key
    ///
    /// Input that contains no digits hashes the empty string; callers that
    /// need to reject such input use [`normalize_phone`] first.
    pub fn hash(&self, phone_number: &str) -> String {
        let normalized = normalize_phone(phone_number).unwrap_or_default();
        let first = Sha256::digest(normalized.as_bytes());

        let mut hasher = Sha256::new();
        hasher.update(first);
        hasher.update(self.salt.as_bytes());
        STANDARD.encode(hasher.finalize())
    }
}

/// Hash a phone number with the default salt
pub fn hash_phone(phone_number: &str) -> String {
    IdentityHasher::default().hash(phone_number)
}

/// Identity hash for a serialized public key
pub fn public_key_hash(public_key: &str) -> String {
    STANDARD.encode(Sha256::digest(public_key.as_bytes()))
}

/// Reduce a phone number to its digits
///
/// A leading `+` only marks international format and is dropped along with
/// spaces, dashes and parentheses. Returns `None` when no digit remains.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}

/// Key used to match a stored contact hint against a phone-book entry
///
/// Compares the trailing ten digits so national and international spellings
/// of the same subscriber number match.
pub fn contact_match_key(raw: &str) -> Option<String> {
    let digits = normalize_phone(raw)?;
    let start = digits.len().saturating_sub(MATCH_DIGITS);
    Some(digits[start..].to_string())
}
