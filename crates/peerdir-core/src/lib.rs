//! Peer Directory Core Library
//!
//! Serverless contact discovery with gossip-based record synchronization.
//!
//! ## Overview
//!
//! Each device keeps a bounded cache of peer records keyed by a
//! privacy-preserving identity hash (a salted double SHA-256 of a phone
//! number, or the hash of a public key). Devices find which phone-book
//! contacts are on the network through a pluggable directory, and keep
//! their caches fresh by periodically gossiping random samples of records
//! to a random pair of peers.
//!
//! ## Core Principles
//!
//! - **No server of record**: the directory is advisory, gossip converges
//! - **Public-key pinning**: a stored key is never replaced by gossip
//! - **Last-write-wins**: only strictly newer records are merged
//! - **Bounded**: the store trims to capacity, least recently seen first
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use peerdir_core::{ChannelTransport, GossipOnlyDirectory, PeerDirectory, PeerDirectoryConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (transport, mut outbound) = ChannelTransport::new();
//!     let config = PeerDirectoryConfig::with_data_dir("~/.peerdir");
//!     let directory = PeerDirectory::open(config, GossipOnlyDirectory, Arc::new(transport))?;
//!
//!     let gossip = directory.start_gossip();
//!     while let Some(datagram) = outbound.recv().await {
//!         // hand to a socket
//!     }
//!     gossip.stop();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod directory;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod identity;
pub mod storage;
pub mod sync;
pub mod transport;
pub mod types;

// Re-exports
pub use config::{GossipConfig, PeerDirectoryConfig};
pub use directory::{
    DirectoryBackend, DirectoryService, GossipOnlyDirectory, MemoryDirectory, StoreDirectory,
};
pub use discovery::{ContactDiscovery, ContactStatus, DiscoveredContact, PhoneBookEntry};
pub use engine::{MaintenanceTask, NodeInfo, PeerDirectory};
pub use error::{DirectoryError, DirectoryResult};
pub use identity::{hash_phone, public_key_hash, IdentityHasher, NodeKeypair};
pub use storage::{MemoryRecordStore, RecordStore, Storage};
pub use sync::{
    BatchSummary, GossipEvent, GossipSynchronizer, GossipTask, InboundOutcome, RateLimiter,
    SignedDatagram,
};
pub use transport::{ChannelTransport, OutboundDatagram, Transport};
pub use types::*;
