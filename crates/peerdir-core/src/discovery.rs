//! Phone-book contact discovery
//!
//! Finds which phone-book entries belong to nodes on the network:
//!
//! 1. Normalize each number, skipping entries without digits
//! 2. Hash it with the deployment salt
//! 3. If the hash is already stored, report it as known (no network call)
//! 4. Otherwise ask the directory; a hit is stored with the number as a
//!    local-only contact hint

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::directory::{DirectoryBackend, DirectoryService};
use crate::error::DirectoryResult;
use crate::identity::{contact_match_key, normalize_phone, IdentityHasher};
use crate::storage::RecordStore;
use crate::types::NodeRecord;

/// One phone-book line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneBookEntry {
    pub name: String,
    pub phone: String,
}

impl PhoneBookEntry {
    pub fn new(name: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phone: phone.into(),
        }
    }
}

/// How a phone-book entry was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactStatus {
    /// Already in the local store
    Known,
    /// Resolved through the directory and stored
    Found,
    /// Not on the network (or the directory was unavailable)
    NotFound,
}

/// Result for one distinct phone number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredContact {
    pub name: String,
    /// Normalized number
    pub phone: String,
    pub identity_hash: String,
    pub status: ContactStatus,
    pub record: Option<NodeRecord>,
}

impl DiscoveredContact {
    /// Whether the contact is on the network
    pub fn is_matched(&self) -> bool {
        matches!(self.status, ContactStatus::Known | ContactStatus::Found)
    }
}

/// Matches a phone book against the store and the directory
pub struct ContactDiscovery<B> {
    store: Arc<dyn RecordStore>,
    directory: Arc<DirectoryService<B>>,
    hasher: IdentityHasher,
}

impl<B: DirectoryBackend> ContactDiscovery<B> {
    pub fn new(
        store: Arc<dyn RecordStore>,
        directory: Arc<DirectoryService<B>>,
        hasher: IdentityHasher,
    ) -> Self {
        Self {
            store,
            directory,
            hasher,
        }
    }

    /// Resolve every distinct number in `phone_book`
    ///
    /// Matched contacts come first, each group sorted by name.
    pub async fn discover(
        &self,
        phone_book: &[PhoneBookEntry],
    ) -> DirectoryResult<Vec<DiscoveredContact>> {
        let mut seen = HashSet::new();
        let mut results = Vec::new();

        for entry in phone_book {
            let Some(phone) = normalize_phone(&entry.phone) else {
                debug!(name = %entry.name, "Skipping contact without a usable number");
                continue;
            };
            if !seen.insert(phone.clone()) {
                continue;
            }

            let hash = self.hasher.hash(&phone);
            results.push(self.resolve(entry, phone, hash).await?);
        }

        results.sort_by(|a, b| {
            b.is_matched()
                .cmp(&a.is_matched())
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        });

        let matched = results.iter().filter(|c| c.is_matched()).count();
        info!(contacts = results.len(), matched, "Contact discovery complete");
        Ok(results)
    }

    async fn resolve(
        &self,
        entry: &PhoneBookEntry,
        phone: String,
        hash: String,
    ) -> DirectoryResult<DiscoveredContact> {
        if let Some(mut existing) = self.store.get(&hash)? {
            if existing.contact_hint.is_none() {
                existing.contact_hint = Some(phone.clone());
                self.store.upsert_direct(&existing)?;
            }
            return Ok(DiscoveredContact {
                name: entry.name.clone(),
                phone,
                identity_hash: hash,
                status: ContactStatus::Known,
                record: Some(existing),
            });
        }

        let Some(found) = self.directory.lookup(&hash).await else {
            return Ok(DiscoveredContact {
                name: entry.name.clone(),
                phone,
                identity_hash: hash,
                status: ContactStatus::NotFound,
                record: None,
            });
        };

        let record = found.with_contact_hint(phone.clone()).with_synced(true);
        self.store.upsert_direct(&record)?;
        self.store.trim()?;
        info!(name = %entry.name, hash = %hash, "Contact found on the network");

        Ok(DiscoveredContact {
            name: entry.name.clone(),
            phone,
            identity_hash: hash,
            status: ContactStatus::Found,
            record: Some(record),
        })
    }

    /// Stored records whose contact hint matches any of `phones`
    pub fn match_contacts(&self, phones: &[String]) -> DirectoryResult<Vec<NodeRecord>> {
        let wanted: HashSet<String> = phones.iter().filter_map(|p| contact_match_key(p)).collect();
        if wanted.is_empty() {
            return Ok(Vec::new());
        }

        Ok(self
            .store
            .all()?
            .into_iter()
            .filter(|record| {
                record
                    .contact_hint
                    .as_deref()
                    .and_then(contact_match_key)
                    .is_some_and(|key| wanted.contains(&key))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{GossipOnlyDirectory, MemoryDirectory};
    use crate::storage::MemoryRecordStore;

    fn discovery(
        directory: MemoryDirectory,
    ) -> (ContactDiscovery<MemoryDirectory>, Arc<MemoryRecordStore>) {
        let store = Arc::new(MemoryRecordStore::default());
        let discovery = ContactDiscovery::new(
            store.clone(),
            Arc::new(DirectoryService::new(directory)),
            IdentityHasher::default(),
        );
        (discovery, store)
    }

    #[tokio::test]
    async fn test_directory_hit_is_stored_with_hint() {
        let directory = MemoryDirectory::new();
        let hash = IdentityHasher::default().hash("15551234567");
        directory
            .publish(&hash, &NodeRecord::new(hash.clone(), "pk-alice"))
            .await
            .unwrap();

        let (discovery, store) = discovery(directory);
        let results = discovery
            .discover(&[
                PhoneBookEntry::new("zed", "+44 20 7946 0000"),
                PhoneBookEntry::new("Alice", "+1 (555) 123-4567"),
            ])
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].name, "Alice");
        assert_eq!(results[0].status, ContactStatus::Found);
        assert_eq!(results[1].status, ContactStatus::NotFound);

        let stored = store.get(&hash).unwrap().unwrap();
        assert_eq!(stored.contact_hint.as_deref(), Some("15551234567"));
        assert!(stored.synced);
    }

    #[tokio::test]
    async fn test_known_hash_skips_directory() {
        let (discovery, store) = discovery(MemoryDirectory::new());
        let hash = IdentityHasher::default().hash("15551234567");
        store.upsert_direct(&NodeRecord::new(hash.clone(), "pk")).unwrap();

        let results = discovery
            .discover(&[PhoneBookEntry::new("Alice", "15551234567")])
            .await
            .unwrap();
        assert_eq!(results[0].status, ContactStatus::Known);
        assert_eq!(
            store.get(&hash).unwrap().unwrap().contact_hint.as_deref(),
            Some("15551234567")
        );
    }

    #[tokio::test]
    async fn test_duplicates_and_invalid_numbers_skipped() {
        let (discovery, _store) = discovery(MemoryDirectory::new());
        let results = discovery
            .discover(&[
                PhoneBookEntry::new("Alice", "+1 555 123 4567"),
                PhoneBookEntry::new("Alice (work)", "15551234567"),
                PhoneBookEntry::new("Nobody", "n/a"),
            ])
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "Alice");
    }

    #[tokio::test]
    async fn test_gossip_only_finds_nothing() {
        let store = Arc::new(MemoryRecordStore::default());
        let discovery = ContactDiscovery::new(
            store.clone(),
            Arc::new(DirectoryService::new(GossipOnlyDirectory)),
            IdentityHasher::default(),
        );
        let results = discovery
            .discover(&[PhoneBookEntry::new("Alice", "15551234567")])
            .await
            .unwrap();
        assert!(!results[0].is_matched());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_match_contacts_by_trailing_digits() {
        let (discovery, store) = discovery(MemoryDirectory::new());
        store
            .upsert_direct(&NodeRecord::new("A", "pk").with_contact_hint("79990001122"))
            .unwrap();
        store.upsert_direct(&NodeRecord::new("B", "pk")).unwrap();

        let matched = discovery
            .match_contacts(&["8 (999) 000-11-22".to_string()])
            .unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].identity_hash, "A");
        assert!(discovery.match_contacts(&["none".to_string()]).unwrap().is_empty());
    }
}
