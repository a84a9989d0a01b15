//! Gossip event types
//!
//! The synchronizer publishes a [`GossipEvent`] on a broadcast channel for
//! every notable branch it takes. Nothing in the core depends on anyone
//! listening; the channel exists for monitoring, the CLI and tests.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Outbound                                                       │
//! │  ├── RoundCompleted: payload sent to N targets                  │
//! │  └── RoundSkipped: no candidates, or nothing to send            │
//! │                                                                 │
//! │  Inbound                                                        │
//! │  ├── Throttled: source inside its rate-limit window             │
//! │  ├── MalformedPayload: payload dropped before merging           │
//! │  ├── PeerDiscovered: first encounter, probe scheduled           │
//! │  ├── EndpointChanged: newer record moved address, probe sent    │
//! │  ├── KeyMismatch: pinned key contradicted (security alert)      │
//! │  └── BatchMerged: per-payload summary                           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

/// Why a gossip round did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No active peers and no stored records to target
    NoCandidates,
    /// The store is empty
    NothingToSend,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoCandidates => write!(f, "no candidates"),
            SkipReason::NothingToSend => write!(f, "nothing to send"),
        }
    }
}

/// Events emitted by the gossip synchronizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GossipEvent {
    /// A round finished
    RoundCompleted {
        /// Targets the payload was handed to the transport for
        targets: usize,
        /// Records in the payload
        records: usize,
    },
    /// A round was skipped
    RoundSkipped { reason: SkipReason },
    /// An inbound payload was dropped by the rate limiter
    Throttled { source: String },
    /// An inbound payload could not be parsed
    MalformedPayload { source: String, message: String },
    /// A previously unknown peer was stored
    PeerDiscovered { hash: String, address: String },
    /// A known peer's newer record carries a different endpoint
    EndpointChanged { hash: String, address: String },
    /// An update tried to replace a pinned public key
    KeyMismatch { hash: String, source: String },
    /// An inbound payload was merged
    BatchMerged {
        source: String,
        applied: usize,
        stale: usize,
        rejected: usize,
    },
}

impl GossipEvent {
    /// Whether this event reports a possible attack
    pub fn is_security_alert(&self) -> bool {
        matches!(self, GossipEvent::KeyMismatch { .. })
    }
}
