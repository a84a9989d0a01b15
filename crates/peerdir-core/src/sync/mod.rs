//! Gossip-based record synchronization
//!
//! ## Overview
//!
//! Nodes keep each other's directories fresh by periodically handing a
//! random sample of known records to a random pair of peers. There is no
//! server of record; convergence comes from repetition.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  GossipSynchronizer                                             │
//! │  ├── tick(): pick fan-out targets, sample store, send PEER_SYNC │
//! │  ├── handle_incoming(): rate limit, parse, merge, probe, trim   │
//! │  └── start(): periodic task, stopped through GossipTask         │
//! │                                                                 │
//! │  RateLimiter (per-source fixed window)                          │
//! │  SignedDatagram (authenticated wire envelope)                   │
//! │  GossipEvent (broadcast telemetry)                              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod envelope;
pub mod events;
pub mod gossip;
pub mod payload;
pub mod rate_limiter;

pub use envelope::{SignedDatagram, MAX_CLOCK_DRIFT_MS};
pub use events::{GossipEvent, SkipReason};
pub use gossip::{
    ActivePeer, ActivePeers, BatchSummary, GossipSynchronizer, GossipTask, InboundOutcome,
};
pub use payload::{decode_payload, encode_payload, DecodedPayload, WireNode};
pub use rate_limiter::RateLimiter;
