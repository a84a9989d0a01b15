//! PeerDirectory - the primary entry point
//!
//! Owns the configuration, the record store, the node keypair, the directory
//! service and the gossip synchronizer, all as explicit instances. Nothing
//! is global: two directories in one process are fully independent.
//!
//! # Example
//!
//! ```ignore
//! use peerdir_core::{ChannelTransport, MemoryDirectory, PeerDirectory, PeerDirectoryConfig};
//!
//! let (transport, outbound) = ChannelTransport::new();
//! let config = PeerDirectoryConfig::with_data_dir("~/.peerdir");
//! let directory = PeerDirectory::open(config, MemoryDirectory::new(), Arc::new(transport))?;
//!
//! directory.publish_self(Some("+1 555 123 4567"), "203.0.113.7", 8888).await?;
//! let gossip = directory.start_gossip();
//! let maintenance = directory.spawn_maintenance();
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::PeerDirectoryConfig;
use crate::directory::{DirectoryBackend, DirectoryService};
use crate::discovery::{ContactDiscovery, DiscoveredContact, PhoneBookEntry};
use crate::error::DirectoryResult;
use crate::identity::{IdentityHasher, NodeKeypair};
use crate::storage::{RecordStore, Storage};
use crate::sync::{GossipSynchronizer, GossipTask, InboundOutcome};
use crate::transport::Transport;
use crate::types::{duration_millis, now_millis, NodeRecord};

/// Summary of the local node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    /// Directory where data is stored
    pub data_dir: PathBuf,
    /// Identity hash derived from the node keypair
    pub identity_hash: String,
    /// Base64 public key
    pub public_key: String,
    /// Records currently stored
    pub record_count: usize,
    /// Capacity enforced by trimming
    pub capacity: usize,
}

/// A node's peer directory
pub struct PeerDirectory<B> {
    config: PeerDirectoryConfig,
    storage: Storage,
    store: Arc<dyn RecordStore>,
    keypair: NodeKeypair,
    hasher: IdentityHasher,
    directory: Arc<DirectoryService<B>>,
    discovery: ContactDiscovery<B>,
    gossip: Arc<GossipSynchronizer>,
}

impl<B: DirectoryBackend + 'static> PeerDirectory<B> {
    /// Open (or create) the directory under `config.data_dir`
    pub fn open(
        config: PeerDirectoryConfig,
        backend: B,
        transport: Arc<dyn Transport>,
    ) -> DirectoryResult<Self> {
        config.validate()?;

        let storage = Storage::with_capacity(config.database_path(), config.capacity)?;
        let keypair = storage.load_or_create_keypair()?;
        let store: Arc<dyn RecordStore> = Arc::new(storage.clone());
        let hasher = config.hasher();

        let directory = Arc::new(DirectoryService::with_timeout(
            backend,
            config.directory_timeout(),
        ));
        let discovery = ContactDiscovery::new(store.clone(), directory.clone(), hasher.clone());
        let gossip = Arc::new(GossipSynchronizer::new(
            store.clone(),
            transport,
            keypair.identity_hash(),
            config.gossip.clone(),
        ));

        info!(
            identity = %keypair.identity_hash(),
            data_dir = %config.data_dir.display(),
            "Peer directory opened"
        );

        Ok(Self {
            config,
            storage,
            store,
            keypair,
            hasher,
            directory,
            discovery,
            gossip,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════

    pub fn config(&self) -> &PeerDirectoryConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn RecordStore> {
        self.store.clone()
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn keypair(&self) -> &NodeKeypair {
        &self.keypair
    }

    pub fn hasher(&self) -> &IdentityHasher {
        &self.hasher
    }

    pub fn directory(&self) -> &DirectoryService<B> {
        &self.directory
    }

    pub fn gossip(&self) -> Arc<GossipSynchronizer> {
        self.gossip.clone()
    }

    /// Identity hash of this node
    pub fn local_identity(&self) -> String {
        self.keypair.identity_hash()
    }

    pub fn node_info(&self) -> DirectoryResult<NodeInfo> {
        Ok(NodeInfo {
            data_dir: self.config.data_dir.clone(),
            identity_hash: self.local_identity(),
            public_key: self.keypair.public_key_string(),
            record_count: self.store.len()?,
            capacity: self.store.capacity(),
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Directory
    // ═══════════════════════════════════════════════════════════════════════

    /// Advertise this node at `address:port`
    ///
    /// The record is stored locally under the key-derived identity (so gossip
    /// carries it) and published to the directory under that identity and,
    /// when given, under the phone-number hash. Returns whether every
    /// publication was accepted.
    pub async fn publish_self(
        &self,
        phone: Option<&str>,
        address: &str,
        port: u16,
    ) -> DirectoryResult<bool> {
        let own_hash = self.local_identity();
        let record = NodeRecord::new(own_hash.clone(), self.keypair.public_key_string())
            .with_address(address, port);
        self.store.upsert_direct(&record)?;

        let mut accepted = self.directory.publish(&own_hash, &record).await;

        if let Some(phone) = phone {
            let phone_hash = self.hasher.hash(phone);
            let mut by_phone = record.clone();
            by_phone.identity_hash = phone_hash.clone();
            accepted &= self.directory.publish(&phone_hash, &by_phone).await;
        }

        info!(hash = %own_hash, address = %address, port, accepted, "Published own record");
        Ok(accepted)
    }

    /// Resolve a hash: local store first, then the directory
    ///
    /// A directory hit is stored before being returned.
    pub async fn resolve(&self, hash: &str) -> DirectoryResult<Option<NodeRecord>> {
        if let Some(record) = self.store.get(hash)? {
            return Ok(Some(record));
        }

        match self.directory.lookup(hash).await {
            Some(record) => {
                self.store.upsert_direct(&record)?;
                self.store.trim()?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Store a first-hand observation of a peer, overwriting what was known
    pub fn record_direct_contact(&self, record: &NodeRecord) -> DirectoryResult<()> {
        self.store.upsert_direct(record)?;
        let evicted = self.store.trim()?;
        if evicted > 0 {
            debug!(evicted, "Trimmed store after direct contact");
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Contacts
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn discover_contacts(
        &self,
        phone_book: &[PhoneBookEntry],
    ) -> DirectoryResult<Vec<DiscoveredContact>> {
        self.discovery.discover(phone_book).await
    }

    pub fn match_contacts(&self, phones: &[String]) -> DirectoryResult<Vec<NodeRecord>> {
        self.discovery.match_contacts(phones)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Gossip & maintenance
    // ═══════════════════════════════════════════════════════════════════════

    /// Merge a gossip payload received from `source`
    pub fn handle_incoming(&self, payload: &str, source: &str) -> InboundOutcome {
        self.gossip.handle_incoming(payload, source)
    }

    /// Spawn the periodic gossip loop
    pub fn start_gossip(&self) -> GossipTask {
        self.gossip.clone().start()
    }

    /// Remove records not seen within `stale_after`; returns removals
    pub fn sweep_stale(&self) -> DirectoryResult<usize> {
        let cutoff = now_millis().saturating_sub(duration_millis(self.config.stale_after()));
        let removed = self.store.sweep_stale(cutoff)?;
        if removed > 0 {
            info!(removed, "Swept stale records");
        }
        Ok(removed)
    }

    /// Spawn the periodic stale sweep
    pub fn spawn_maintenance(&self) -> MaintenanceTask {
        let token = CancellationToken::new();
        let cancel = token.clone();
        let store = self.store.clone();
        let stale_after = self.config.stale_after();
        let period = self.config.sweep_interval();

        let handle = tokio::spawn(async move {
            info!(interval_secs = period.as_secs(), "Maintenance task started");
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let cutoff = now_millis().saturating_sub(duration_millis(stale_after));
                        match store.sweep_stale(cutoff) {
                            Ok(0) => {}
                            Ok(removed) => info!(removed, "Swept stale records"),
                            Err(e) => error!(error = %e, "Stale sweep failed"),
                        }
                    }
                }
            }

            info!("Maintenance task stopped");
        });

        MaintenanceTask { token, handle }
    }
}

/// Handle to the running maintenance sweep
pub struct MaintenanceTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl MaintenanceTask {
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryDirectory;
    use crate::transport::{ChannelTransport, OutboundDatagram};
    use tempfile::TempDir;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn open_test_directory(
        temp_dir: &TempDir,
        backend: MemoryDirectory,
    ) -> (PeerDirectory<MemoryDirectory>, UnboundedReceiver<OutboundDatagram>) {
        let (transport, rx) = ChannelTransport::new();
        let config = PeerDirectoryConfig::with_data_dir(temp_dir.path());
        let directory = PeerDirectory::open(config, backend, Arc::new(transport)).unwrap();
        (directory, rx)
    }

    #[tokio::test]
    async fn test_identity_is_stable_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let first = {
            let (directory, _rx) = open_test_directory(&temp_dir, MemoryDirectory::new());
            directory.local_identity()
        };
        let (directory, _rx) = open_test_directory(&temp_dir, MemoryDirectory::new());
        assert_eq!(directory.local_identity(), first);
    }

    #[tokio::test]
    async fn test_publish_self_is_resolvable_by_phone() {
        let shared = MemoryDirectory::new();
        let alice_dir = TempDir::new().unwrap();
        let bob_dir = TempDir::new().unwrap();
        let (alice, _a) = open_test_directory(&alice_dir, shared.clone());
        let (bob, _b) = open_test_directory(&bob_dir, shared.clone());

        assert!(alice
            .publish_self(Some("+1 555 123 4567"), "203.0.113.7", 9000)
            .await
            .unwrap());

        let found = bob
            .discover_contacts(&[PhoneBookEntry::new("Alice", "15551234567")])
            .await
            .unwrap();
        assert!(found[0].is_matched());

        let record = found[0].record.as_ref().unwrap();
        assert_eq!(record.public_key, alice.keypair().public_key_string());
        assert_eq!(record.address, "203.0.113.7");
        assert_eq!(bob.match_contacts(&["555-123-4567".to_string()]).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_caches_directory_hits() {
        let shared = MemoryDirectory::new();
        let alice_dir = TempDir::new().unwrap();
        let bob_dir = TempDir::new().unwrap();
        let (alice, _a) = open_test_directory(&alice_dir, shared.clone());
        let (bob, _b) = open_test_directory(&bob_dir, shared.clone());
        alice.publish_self(None, "203.0.113.7", 8888).await.unwrap();

        let hash = alice.local_identity();
        assert!(bob.store().get(&hash).unwrap().is_none());
        let resolved = bob.resolve(&hash).await.unwrap().unwrap();
        assert!(resolved.synced);
        assert!(bob.store().get(&hash).unwrap().is_some());
        assert!(bob.resolve("unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sweep_stale_uses_configured_age() {
        let temp_dir = TempDir::new().unwrap();
        let (directory, _rx) = open_test_directory(&temp_dir, MemoryDirectory::new());
        let week_and_a_day = duration_millis(directory.config().stale_after()) + 86_400_000;

        directory
            .record_direct_contact(
                &NodeRecord::new("old", "pk").with_last_seen(now_millis() - week_and_a_day),
            )
            .unwrap();
        directory
            .record_direct_contact(&NodeRecord::new("fresh", "pk"))
            .unwrap();

        assert_eq!(directory.sweep_stale().unwrap(), 1);
        assert!(directory.store().get("fresh").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_node_info() {
        let temp_dir = TempDir::new().unwrap();
        let (directory, _rx) = open_test_directory(&temp_dir, MemoryDirectory::new());
        directory.publish_self(None, "10.0.0.1", 8888).await.unwrap();

        let info = directory.node_info().unwrap();
        assert_eq!(info.identity_hash, directory.local_identity());
        assert_eq!(info.record_count, 1);
        assert_eq!(info.capacity, 2500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_task_sweeps_and_stops() {
        let temp_dir = TempDir::new().unwrap();
        let (directory, _rx) = open_test_directory(&temp_dir, MemoryDirectory::new());
        directory
            .record_direct_contact(&NodeRecord::new("old", "pk").with_last_seen(1))
            .unwrap();

        let task = directory.spawn_maintenance();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(directory.store().get("old").unwrap().is_none());
        task.shutdown().await;
    }
}
