//! Node record storage
//!
//! ## Storage Design
//!
//! - **Primary table**: `node_records` - identity hash → postcard `NodeRecord`
//! - **Ordered index**: `node_records_by_last_seen` - `(last_seen, hash)` → `()`
//!
//! The index is rewritten in the same transaction as the record, so it is
//! always exactly the set of `(last_seen, hash)` pairs in the primary table.
//! Eviction and staleness sweeps walk it from the oldest end; `recent` walks
//! it backwards.

use redb::{ReadableTable, ReadableTableMetadata, Table, TableDefinition};
use tracing::{debug, warn};

use super::{RecordStore, Storage};
use crate::error::DirectoryError;
use crate::types::{resolve_merge, MergeOutcome, MergeReport, NodeRecord, Resolution, Timestamp};

/// Table for node records (key: identity hash, value: serialized NodeRecord)
pub(crate) const RECORDS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("node_records");

/// Index ordering records by last-seen time
pub(crate) const LAST_SEEN_INDEX: TableDefinition<(u64, &str), ()> =
    TableDefinition::new("node_records_by_last_seen");

type RecordsTable<'txn> = Table<'txn, &'static str, &'static [u8]>;
type IndexTable<'txn> = Table<'txn, (u64, &'static str), ()>;

fn decode(bytes: &[u8]) -> Result<NodeRecord, DirectoryError> {
    postcard::from_bytes(bytes).map_err(|e| DirectoryError::Serialization(e.to_string()))
}

fn load<T>(table: &T, hash: &str) -> Result<Option<NodeRecord>, DirectoryError>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(hash)? {
        Some(v) => Ok(Some(decode(v.value())?)),
        None => Ok(None),
    }
}

/// Write `record`, replacing the index entry of `previous` if there was one
fn write_record(
    records: &mut RecordsTable<'_>,
    index: &mut IndexTable<'_>,
    previous: Option<&NodeRecord>,
    record: &NodeRecord,
) -> Result<(), DirectoryError> {
    if let Some(previous) = previous {
        index.remove((previous.last_seen, previous.identity_hash.as_str()))?;
    }
    let data =
        postcard::to_allocvec(record).map_err(|e| DirectoryError::Serialization(e.to_string()))?;
    records.insert(record.identity_hash.as_str(), data.as_slice())?;
    index.insert((record.last_seen, record.identity_hash.as_str()), ())?;
    Ok(())
}

/// Delete the given `(last_seen, hash)` entries from both tables
fn delete_entries(
    records: &mut RecordsTable<'_>,
    index: &mut IndexTable<'_>,
    victims: &[(u64, String)],
) -> Result<(), DirectoryError> {
    for (last_seen, hash) in victims {
        index.remove((*last_seen, hash.as_str()))?;
        records.remove(hash.as_str())?;
    }
    Ok(())
}

fn require_hash(record: &NodeRecord) -> Result<(), DirectoryError> {
    if record.identity_hash.is_empty() {
        return Err(DirectoryError::Storage(
            "Record has an empty identity hash".to_string(),
        ));
    }
    Ok(())
}

impl RecordStore for Storage {
    fn get(&self, hash: &str) -> Result<Option<NodeRecord>, DirectoryError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(RECORDS_TABLE)?;
        load(&table, hash)
    }

    fn upsert_direct(&self, record: &NodeRecord) -> Result<(), DirectoryError> {
        require_hash(record)?;
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut records = write_txn.open_table(RECORDS_TABLE)?;
            let mut index = write_txn.open_table(LAST_SEEN_INDEX)?;
            let previous = load(&records, &record.identity_hash)?;
            write_record(&mut records, &mut index, previous.as_ref(), record)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn merge_incoming(&self, record: &NodeRecord) -> Result<MergeReport, DirectoryError> {
        require_hash(record)?;
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        let report = {
            let mut records = write_txn.open_table(RECORDS_TABLE)?;
            let mut index = write_txn.open_table(LAST_SEEN_INDEX)?;
            let previous = load(&records, &record.identity_hash)?;

            let resolution = resolve_merge(previous.as_ref(), record);
            let outcome = resolution.outcome();
            match resolution {
                Resolution::Insert(merged) | Resolution::Replace(merged) => {
                    write_record(&mut records, &mut index, previous.as_ref(), &merged)?;
                }
                Resolution::Reject(MergeOutcome::RejectedKeyMismatch) => {
                    warn!(hash = %record.identity_hash, "Rejected update with mismatched public key");
                }
                Resolution::Reject(_) => {
                    debug!(hash = %record.identity_hash, last_seen = record.last_seen, "Ignored stale update");
                }
            }
            MergeReport { outcome, previous }
        };
        write_txn.commit()?;
        Ok(report)
    }

    fn recent(&self, n: usize) -> Result<Vec<NodeRecord>, DirectoryError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let records = read_txn.open_table(RECORDS_TABLE)?;
        let index = read_txn.open_table(LAST_SEEN_INDEX)?;

        let mut result = Vec::new();
        for entry in index.iter()?.rev().take(n) {
            let (key, _) = entry?;
            let (_, hash) = key.value();
            if let Some(record) = load(&records, hash)? {
                result.push(record);
            }
        }
        Ok(result)
    }

    fn trim(&self) -> Result<usize, DirectoryError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        let evicted = {
            let mut records = write_txn.open_table(RECORDS_TABLE)?;
            let mut index = write_txn.open_table(LAST_SEEN_INDEX)?;

            let len = records.len()? as usize;
            if len <= self.capacity {
                0
            } else {
                let excess = len - self.capacity;
                let mut victims = Vec::with_capacity(excess);
                for entry in index.iter()?.take(excess) {
                    let (key, _) = entry?;
                    let (last_seen, hash) = key.value();
                    victims.push((last_seen, hash.to_string()));
                }
                delete_entries(&mut records, &mut index, &victims)?;
                victims.len()
            }
        };
        write_txn.commit()?;

        if evicted > 0 {
            debug!(evicted, capacity = self.capacity, "Trimmed record store");
        }
        Ok(evicted)
    }

    fn sweep_stale(&self, older_than: Timestamp) -> Result<usize, DirectoryError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        let removed = {
            let mut records = write_txn.open_table(RECORDS_TABLE)?;
            let mut index = write_txn.open_table(LAST_SEEN_INDEX)?;

            let mut victims = Vec::new();
            for entry in index.iter()? {
                let (key, _) = entry?;
                let (last_seen, hash) = key.value();
                if last_seen >= older_than {
                    break;
                }
                victims.push((last_seen, hash.to_string()));
            }
            delete_entries(&mut records, &mut index, &victims)?;
            victims.len()
        };
        write_txn.commit()?;
        Ok(removed)
    }

    fn remove(&self, hash: &str) -> Result<bool, DirectoryError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        let existed = {
            let mut records = write_txn.open_table(RECORDS_TABLE)?;
            let mut index = write_txn.open_table(LAST_SEEN_INDEX)?;
            match load(&records, hash)? {
                Some(previous) => {
                    delete_entries(
                        &mut records,
                        &mut index,
                        &[(previous.last_seen, previous.identity_hash)],
                    )?;
                    true
                }
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(existed)
    }

    fn len(&self) -> Result<usize, DirectoryError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(RECORDS_TABLE)?;
        Ok(table.len()? as usize)
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    fn create_test_storage(capacity: usize) -> (Storage, TempDir) {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("test.redb");
        let storage = Storage::with_capacity(&db_path, capacity).unwrap();
        (storage, temp_dir)
    }

    fn record(hash: &str, key: &str, last_seen: u64) -> NodeRecord {
        NodeRecord::new(hash, key).with_last_seen(last_seen)
    }

    #[test]
    fn test_upsert_and_get() {
        let (storage, _temp) = create_test_storage(10);
        let rec = record("a", "pk1", 100).with_address("10.0.0.1", 9000);

        storage.upsert_direct(&rec).unwrap();

        assert_eq!(storage.get("a").unwrap(), Some(rec));
        assert!(storage.get("missing").unwrap().is_none());
        assert_eq!(storage.len().unwrap(), 1);
    }

    #[test]
    fn test_upsert_direct_overwrites_pinned_key() {
        let (storage, _temp) = create_test_storage(10);
        storage.upsert_direct(&record("a", "pk1", 100)).unwrap();
        storage.upsert_direct(&record("a", "pk2", 50)).unwrap();

        let stored = storage.get("a").unwrap().unwrap();
        assert_eq!(stored.public_key, "pk2");
        assert_eq!(stored.last_seen, 50);
        // Index must not keep the old (100, "a") entry around
        assert_eq!(storage.recent(10).unwrap().len(), 1);
    }

    #[test]
    fn test_upsert_rejects_empty_hash() {
        let (storage, _temp) = create_test_storage(10);
        assert!(storage.upsert_direct(&record("", "pk", 1)).is_err());
        assert!(storage.merge_incoming(&record("", "pk", 1)).is_err());
    }

    #[test]
    fn test_merge_unknown_hash_inserts() {
        let (storage, _temp) = create_test_storage(10);
        let report = storage.merge_incoming(&record("a", "pk1", 100)).unwrap();
        assert_eq!(report.outcome, MergeOutcome::Applied);
        assert!(report.is_first_encounter());
        assert_eq!(storage.get("a").unwrap().unwrap().last_seen, 100);
    }

    #[test]
    fn test_merge_rules() {
        let (storage, _temp) = create_test_storage(10);
        storage.merge_incoming(&record("a", "pk1", 100)).unwrap();

        let applied = storage
            .merge_incoming(&record("a", "pk1", 200).with_address("1.2.3.4", 9000))
            .unwrap();
        assert_eq!(applied.outcome, MergeOutcome::Applied);
        assert_eq!(applied.previous.unwrap().last_seen, 100);

        let stale = storage.merge_incoming(&record("a", "pk1", 200)).unwrap();
        assert_eq!(stale.outcome, MergeOutcome::RejectedStale);

        let hijack = storage.merge_incoming(&record("a", "pk2", 300)).unwrap();
        assert_eq!(hijack.outcome, MergeOutcome::RejectedKeyMismatch);

        let stored = storage.get("a").unwrap().unwrap();
        assert_eq!(stored.public_key, "pk1");
        assert_eq!(stored.last_seen, 200);
        assert_eq!(stored.address, "1.2.3.4");
    }

    #[test]
    fn test_recent_orders_by_last_seen() {
        let (storage, _temp) = create_test_storage(10);
        storage.upsert_direct(&record("old", "k", 10)).unwrap();
        storage.upsert_direct(&record("new", "k", 30)).unwrap();
        storage.upsert_direct(&record("mid", "k", 20)).unwrap();

        let hashes: Vec<_> = storage
            .recent(2)
            .unwrap()
            .into_iter()
            .map(|r| r.identity_hash)
            .collect();
        assert_eq!(hashes, vec!["new", "mid"]);

        // Re-querying reflects the current state
        storage.merge_incoming(&record("old", "k", 40)).unwrap();
        assert_eq!(storage.recent(1).unwrap()[0].identity_hash, "old");
    }

    #[test]
    fn test_trim_evicts_least_recently_seen() {
        let (storage, _temp) = create_test_storage(3);
        for i in 0..5u64 {
            storage
                .upsert_direct(&record(&format!("h{}", i), "k", 100 + i))
                .unwrap();
        }
        assert_eq!(storage.len().unwrap(), 5);

        assert_eq!(storage.trim().unwrap(), 2);
        assert_eq!(storage.len().unwrap(), 3);
        assert!(storage.get("h0").unwrap().is_none());
        assert!(storage.get("h1").unwrap().is_none());
        assert!(storage.get("h4").unwrap().is_some());

        assert_eq!(storage.trim().unwrap(), 0);
    }

    #[test]
    fn test_sweep_stale() {
        let (storage, _temp) = create_test_storage(10);
        storage.upsert_direct(&record("a", "k", 100)).unwrap();
        storage.upsert_direct(&record("b", "k", 200)).unwrap();
        storage.upsert_direct(&record("c", "k", 300)).unwrap();

        assert_eq!(storage.sweep_stale(200).unwrap(), 1);
        assert!(storage.get("a").unwrap().is_none());
        assert!(storage.get("b").unwrap().is_some());
        assert_eq!(storage.len().unwrap(), 2);
    }

    #[test]
    fn test_remove() {
        let (storage, _temp) = create_test_storage(10);
        storage.upsert_direct(&record("a", "k", 100)).unwrap();
        assert!(storage.remove("a").unwrap());
        assert!(!storage.remove("a").unwrap());
        assert!(storage.recent(10).unwrap().is_empty());
    }

    #[test]
    fn test_records_persist_across_instances() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("test.redb");

        {
            let storage = Storage::new(&db_path).unwrap();
            storage
                .upsert_direct(&record("a", "pk1", 100).with_contact_hint("15551234567"))
                .unwrap();
        }

        {
            let storage = Storage::new(&db_path).unwrap();
            let loaded = storage.get("a").unwrap().unwrap();
            assert_eq!(loaded.public_key, "pk1");
            assert_eq!(loaded.contact_hint.as_deref(), Some("15551234567"));
            assert_eq!(storage.recent(5).unwrap().len(), 1);
        }
    }
}
