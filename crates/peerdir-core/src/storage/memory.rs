//! In-memory record store
//!
//! Same semantics as the redb-backed [`Storage`](super::Storage), without
//! durability. Used for ephemeral nodes and as a test double.

use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;
use tracing::warn;

use super::{RecordStore, DEFAULT_CAPACITY};
use crate::error::DirectoryError;
use crate::types::{resolve_merge, MergeOutcome, MergeReport, NodeRecord, Resolution, Timestamp};

#[derive(Default)]
struct Inner {
    records: HashMap<String, NodeRecord>,
    by_last_seen: BTreeSet<(Timestamp, String)>,
}

impl Inner {
    fn write(&mut self, record: NodeRecord) {
        if let Some(previous) = self.records.get(&record.identity_hash) {
            self.by_last_seen
                .remove(&(previous.last_seen, previous.identity_hash.clone()));
        }
        self.by_last_seen
            .insert((record.last_seen, record.identity_hash.clone()));
        self.records.insert(record.identity_hash.clone(), record);
    }

    fn delete(&mut self, key: &(Timestamp, String)) {
        self.by_last_seen.remove(key);
        self.records.remove(&key.1);
    }
}

/// Record store held entirely in memory
pub struct MemoryRecordStore {
    inner: RwLock<Inner>,
    capacity: usize,
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl MemoryRecordStore {
    /// Create an empty store with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            capacity,
        }
    }
}

fn require_hash(record: &NodeRecord) -> Result<(), DirectoryError> {
    if record.identity_hash.is_empty() {
        return Err(DirectoryError::Storage(
            "Record has an empty identity hash".to_string(),
        ));
    }
    Ok(())
}

impl RecordStore for MemoryRecordStore {
    fn get(&self, hash: &str) -> Result<Option<NodeRecord>, DirectoryError> {
        Ok(self.inner.read().records.get(hash).cloned())
    }

    fn upsert_direct(&self, record: &NodeRecord) -> Result<(), DirectoryError> {
        require_hash(record)?;
        self.inner.write().write(record.clone());
        Ok(())
    }

    fn merge_incoming(&self, record: &NodeRecord) -> Result<MergeReport, DirectoryError> {
        require_hash(record)?;
        let mut inner = self.inner.write();
        let previous = inner.records.get(&record.identity_hash).cloned();

        let resolution = resolve_merge(previous.as_ref(), record);
        let outcome = resolution.outcome();
        match resolution {
            Resolution::Insert(merged) | Resolution::Replace(merged) => inner.write(merged),
            Resolution::Reject(MergeOutcome::RejectedKeyMismatch) => {
                warn!(hash = %record.identity_hash, "Rejected update with mismatched public key");
            }
            Resolution::Reject(_) => {}
        }
        Ok(MergeReport { outcome, previous })
    }

    fn recent(&self, n: usize) -> Result<Vec<NodeRecord>, DirectoryError> {
        let inner = self.inner.read();
        Ok(inner
            .by_last_seen
            .iter()
            .rev()
            .take(n)
            .filter_map(|(_, hash)| inner.records.get(hash).cloned())
            .collect())
    }

    fn trim(&self) -> Result<usize, DirectoryError> {
        let mut inner = self.inner.write();
        let excess = inner.records.len().saturating_sub(self.capacity);
        let victims: Vec<_> = inner.by_last_seen.iter().take(excess).cloned().collect();
        for key in &victims {
            inner.delete(key);
        }
        Ok(victims.len())
    }

    fn sweep_stale(&self, older_than: Timestamp) -> Result<usize, DirectoryError> {
        let mut inner = self.inner.write();
        let victims: Vec<_> = inner
            .by_last_seen
            .iter()
            .take_while(|(last_seen, _)| *last_seen < older_than)
            .cloned()
            .collect();
        for key in &victims {
            inner.delete(key);
        }
        Ok(victims.len())
    }

    fn remove(&self, hash: &str) -> Result<bool, DirectoryError> {
        let mut inner = self.inner.write();
        match inner.records.get(hash).map(|r| (r.last_seen, r.identity_hash.clone())) {
            Some(key) => {
                inner.delete(&key);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn len(&self) -> Result<usize, DirectoryError> {
        Ok(self.inner.read().records.len())
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}
