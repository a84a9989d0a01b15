//! Node records and the merge policy
//!
//! A [`NodeRecord`] is a peer's published reachability entry, keyed by its
//! identity hash. Every path that folds second-hand information into the
//! store goes through [`resolve_merge`], which applies two rules:
//!
//! 1. **Public-key pinning** - once a non-empty public key is stored for a
//!    hash, an update carrying a different non-empty key is rejected.
//! 2. **Last-write-wins** - an update is applied only when its `last_seen`
//!    is strictly greater than the stored one. Ties keep the stored record.
//!
//! Key mismatch is checked first, so a hijack attempt is reported as such
//! even when it also carries a stale timestamp.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use super::{now_millis, Timestamp, DEFAULT_PORT, UNKNOWN_ADDRESS};

/// A peer's published reachability/identity entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Primary key - phone hash or public-key hash
    pub identity_hash: String,
    /// Last known network address (`0.0.0.0` when unknown)
    pub address: String,
    /// Last known port
    pub port: u16,
    /// Opaque serialized public key (pinned once stored)
    pub public_key: String,
    /// Plaintext phone number for local contact matching only
    #[serde(default)]
    pub contact_hint: Option<String>,
    /// Milliseconds since the Unix epoch
    pub last_seen: Timestamp,
    /// Whether the authoritative directory has acknowledged this record
    #[serde(default)]
    pub synced: bool,
}

impl NodeRecord {
    /// Create a record seen now, with an unknown address
    pub fn new(identity_hash: impl Into<String>, public_key: impl Into<String>) -> Self {
        Self {
            identity_hash: identity_hash.into(),
            address: UNKNOWN_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            public_key: public_key.into(),
            contact_hint: None,
            last_seen: now_millis(),
            synced: false,
        }
    }

    /// Set the network address and port
    pub fn with_address(mut self, address: impl Into<String>, port: u16) -> Self {
        self.address = address.into();
        self.port = port;
        self
    }

    /// Set the last-seen timestamp (milliseconds)
    pub fn with_last_seen(mut self, last_seen: Timestamp) -> Self {
        self.last_seen = last_seen;
        self
    }

    /// Attach a local-only phone number hint
    pub fn with_contact_hint(mut self, phone: impl Into<String>) -> Self {
        self.contact_hint = Some(phone.into());
        self
    }

    /// Mark whether the directory acknowledged this record
    pub fn with_synced(mut self, synced: bool) -> Self {
        self.synced = synced;
        self
    }

    /// Whether the address is usable for sending (not empty, not the sentinel)
    pub fn has_known_address(&self) -> bool {
        is_routable(&self.address)
    }

    /// Transport address including the port, `None` when the address is unknown
    ///
    /// IPv6 literals are bracketed; an address that already carries a port is
    /// returned unchanged.
    pub fn endpoint(&self) -> Option<String> {
        if !self.has_known_address() {
            return None;
        }
        let address = self.address.trim();
        if address.parse::<SocketAddr>().is_ok() {
            return Some(address.to_string());
        }
        match address.parse::<IpAddr>() {
            Ok(IpAddr::V6(ip)) => Some(format!("[{}]:{}", ip, self.port)),
            _ => Some(format!("{}:{}", address, self.port)),
        }
    }

    /// Whether the record carries the fields gossip requires
    pub fn is_well_formed(&self) -> bool {
        !self.identity_hash.is_empty() && !self.public_key.is_empty()
    }

    /// Whether this record points at a different endpoint than `other`
    pub fn endpoint_differs(&self, other: &NodeRecord) -> bool {
        self.address != other.address || self.port != other.port
    }
}

/// Whether an address can be sent to
pub fn is_routable(address: &str) -> bool {
    let address = address.trim();
    !address.is_empty() && address != UNKNOWN_ADDRESS
}

/// Which branch of the merge policy was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeOutcome {
    /// The update was stored (new hash, or strictly newer)
    Applied,
    /// The update was not newer than the stored record
    RejectedStale,
    /// The update tried to replace a pinned public key
    RejectedKeyMismatch,
}

impl fmt::Display for MergeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeOutcome::Applied => write!(f, "applied"),
            MergeOutcome::RejectedStale => write!(f, "rejected-stale"),
            MergeOutcome::RejectedKeyMismatch => write!(f, "rejected-key-mismatch"),
        }
    }
}

/// Result of `merge_incoming`, with the record stored before the merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    /// Branch taken
    pub outcome: MergeOutcome,
    /// Record stored before the merge, `None` on first encounter
    pub previous: Option<NodeRecord>,
}

impl MergeReport {
    /// The hash was unknown and has now been stored
    pub fn is_first_encounter(&self) -> bool {
        self.outcome == MergeOutcome::Applied && self.previous.is_none()
    }

    /// The update was applied over an existing record and moved its endpoint
    pub fn moved_endpoint(&self, incoming: &NodeRecord) -> bool {
        match (&self.outcome, &self.previous) {
            (MergeOutcome::Applied, Some(previous)) => previous.endpoint_differs(incoming),
            _ => false,
        }
    }
}

/// What a store must do with an incoming record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Unknown hash - store the incoming record as-is
    Insert(NodeRecord),
    /// Known hash - replace with the merged record
    Replace(NodeRecord),
    /// Leave the stored record untouched
    Reject(MergeOutcome),
}

impl Resolution {
    /// The outcome this resolution reports
    pub fn outcome(&self) -> MergeOutcome {
        match self {
            Resolution::Insert(_) | Resolution::Replace(_) => MergeOutcome::Applied,
            Resolution::Reject(outcome) => *outcome,
        }
    }
}

/// Decide how `incoming` folds into `existing`
///
/// On an applied update the stored primary key and any pinned key are kept;
/// endpoint, timestamp and sync flag come from the update. A contact hint is
/// never dropped by an update that doesn't carry one.
pub fn resolve_merge(existing: Option<&NodeRecord>, incoming: &NodeRecord) -> Resolution {
    let Some(existing) = existing else {
        return Resolution::Insert(incoming.clone());
    };

    if !existing.public_key.is_empty()
        && !incoming.public_key.is_empty()
        && existing.public_key != incoming.public_key
    {
        return Resolution::Reject(MergeOutcome::RejectedKeyMismatch);
    }

    if incoming.last_seen <= existing.last_seen {
        return Resolution::Reject(MergeOutcome::RejectedStale);
    }

    let public_key = if existing.public_key.is_empty() {
        incoming.public_key.clone()
    } else {
        existing.public_key.clone()
    };

    Resolution::Replace(NodeRecord {
        identity_hash: existing.identity_hash.clone(),
        address: incoming.address.clone(),
        port: incoming.port,
        public_key,
        contact_hint: incoming
            .contact_hint
            .clone()
            .or_else(|| existing.contact_hint.clone()),
        last_seen: incoming.last_seen,
        synced: incoming.synced,
    })
}
