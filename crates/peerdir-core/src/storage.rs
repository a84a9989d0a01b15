//! Persistent storage using redb.
//!
//! This module provides ACID-compliant storage for:
//! - Node records (the bounded peer cache), see [`RecordStore`]
//! - The local node keypair
//!
//! Every record mutation runs inside a single write transaction, so a
//! concurrent reader sees either the old record or the new one, never a
//! half-written entry. redb serializes write transactions, which makes the
//! read-resolve-write sequence of `merge_incoming` atomic.

use crate::error::DirectoryError;
use crate::identity::NodeKeypair;
use crate::types::{MergeReport, NodeRecord, Timestamp};
use parking_lot::RwLock;
use redb::{Database, TableDefinition};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

// Submodules
mod memory;
mod records;

pub use memory::MemoryRecordStore;
use records::{LAST_SEEN_INDEX, RECORDS_TABLE};

/// Maximum number of records kept after a trim
pub const DEFAULT_CAPACITY: usize = 2500;

const IDENTITY_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("identity");

/// Bounded cache of peer records keyed by identity hash
///
/// Ordering everywhere is by `last_seen`, ties broken by hash. `recent` and
/// `all` return most recent first; `trim` evicts from the other end.
pub trait RecordStore: Send + Sync {
    /// Point lookup
    fn get(&self, hash: &str) -> Result<Option<NodeRecord>, DirectoryError>;

    /// Unconditional overwrite for first-hand observations
    fn upsert_direct(&self, record: &NodeRecord) -> Result<(), DirectoryError>;

    /// Fold second-hand information in under pinning and last-write-wins
    fn merge_incoming(&self, record: &NodeRecord) -> Result<MergeReport, DirectoryError>;

    /// Up to `n` records, most recently seen first
    fn recent(&self, n: usize) -> Result<Vec<NodeRecord>, DirectoryError>;

    /// Every record up to capacity, most recently seen first
    fn all(&self) -> Result<Vec<NodeRecord>, DirectoryError> {
        self.recent(self.capacity())
    }

    /// Keep only the `capacity` most recently seen records; returns evictions
    fn trim(&self) -> Result<usize, DirectoryError>;

    /// Delete records last seen before `older_than`; returns removals
    fn sweep_stale(&self, older_than: Timestamp) -> Result<usize, DirectoryError>;

    /// Delete one record; returns whether it existed
    fn remove(&self, hash: &str) -> Result<bool, DirectoryError>;

    /// Number of stored records
    fn len(&self) -> Result<usize, DirectoryError>;

    /// Whether the store holds no records
    fn is_empty(&self) -> Result<bool, DirectoryError> {
        Ok(self.len()? == 0)
    }

    /// Capacity ceiling enforced by `trim`
    fn capacity(&self) -> usize;
}

/// Storage layer using redb for ACID-compliant persistence
#[derive(Clone)]
pub struct Storage {
    db: Arc<RwLock<Database>>,
    capacity: usize,
}

impl Storage {
    /// Create a new storage instance at the given path.
    ///
    /// This will:
    /// - Create the database directory if it doesn't exist
    /// - Initialize the database file
    /// - Create all required tables
    pub fn new(path: impl AsRef<Path>) -> Result<Self, DirectoryError> {
        Self::with_capacity(path, DEFAULT_CAPACITY)
    }

    /// Create a storage instance with a custom record capacity
    pub fn with_capacity(path: impl AsRef<Path>, capacity: usize) -> Result<Self, DirectoryError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(RECORDS_TABLE)?;
            let _ = write_txn.open_table(LAST_SEEN_INDEX)?;
            let _ = write_txn.open_table(IDENTITY_TABLE)?;
        }
        write_txn.commit()?;

        info!(path = %path.display(), capacity, "Record store opened");

        Ok(Self {
            db: Arc::new(RwLock::new(db)),
            capacity,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Identity Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Identity storage key (there's only one keypair per node)
    const IDENTITY_KEY: &'static str = "node_keypair";

    /// Save the node's keypair
    pub fn save_keypair(&self, keypair: &NodeKeypair) -> Result<(), DirectoryError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(IDENTITY_TABLE)?;
            let data = keypair.to_bytes();
            table.insert(Self::IDENTITY_KEY, data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load the node's keypair, `None` if none has been created yet
    pub fn load_keypair(&self) -> Result<Option<NodeKeypair>, DirectoryError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(IDENTITY_TABLE)?;

        match table.get(Self::IDENTITY_KEY)? {
            Some(v) => Ok(Some(NodeKeypair::from_bytes(v.value())?)),
            None => Ok(None),
        }
    }

    /// Load the node's keypair, generating and persisting one on first run
    pub fn load_or_create_keypair(&self) -> Result<NodeKeypair, DirectoryError> {
        if let Some(keypair) = self.load_keypair()? {
            return Ok(keypair);
        }
        let keypair = NodeKeypair::generate()?;
        self.save_keypair(&keypair)?;
        info!(identity = %keypair.identity_hash(), "Generated node keypair");
        Ok(keypair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_storage_can_be_created() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.redb");
        let storage = Storage::new(&db_path);
        assert!(storage.is_ok());
        assert_eq!(storage.unwrap().capacity(), DEFAULT_CAPACITY);
    }

    #[test]
    fn test_storage_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested/path/to/test.redb");
        let storage = Storage::new(&db_path);
        assert!(storage.is_ok());
        assert!(db_path.exists());
    }

    #[test]
    fn test_keypair_persists_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.redb");

        let identity = {
            let storage = Storage::new(&db_path).unwrap();
            assert!(storage.load_keypair().unwrap().is_none());
            storage.load_or_create_keypair().unwrap().identity_hash()
        };

        {
            let storage = Storage::new(&db_path).unwrap();
            let loaded = storage.load_or_create_keypair().unwrap();
            assert_eq!(loaded.identity_hash(), identity);
        }
    }
}
