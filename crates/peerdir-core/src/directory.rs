//! Directory service
//!
//! Publishes the local node's record under its own identity hash and
//! resolves other hashes to records through a pluggable backend (a DHT, a
//! LAN registry, the local store...).
//!
//! The service never propagates backend failures. A backend error or a
//! request that exceeds the timeout is logged and reported as "information
//! unavailable": `false` from [`DirectoryService::publish`], `None` from
//! [`DirectoryService::lookup`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::{DirectoryError, DirectoryResult};
use crate::storage::RecordStore;
use crate::types::NodeRecord;

/// Default upper bound on a single backend call
pub const DEFAULT_DIRECTORY_TIMEOUT: Duration = Duration::from_secs(10);

/// Where records are published to and looked up from
pub trait DirectoryBackend: Send + Sync {
    /// Advertise `record` under `own_hash`
    fn publish(
        &self,
        own_hash: &str,
        record: &NodeRecord,
    ) -> impl Future<Output = DirectoryResult<()>> + Send;

    /// Find the record published under `hash`
    fn lookup(&self, hash: &str) -> impl Future<Output = DirectoryResult<Option<NodeRecord>>> + Send;
}

/// Backend-agnostic front with timeouts and soft failure
pub struct DirectoryService<B> {
    backend: B,
    timeout: Duration,
}

impl<B: DirectoryBackend> DirectoryService<B> {
    pub fn new(backend: B) -> Self {
        Self::with_timeout(backend, DEFAULT_DIRECTORY_TIMEOUT)
    }

    pub fn with_timeout(backend: B, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Publish the caller's own record; returns whether the backend accepted it
    pub async fn publish(&self, own_hash: &str, record: &NodeRecord) -> bool {
        if record.identity_hash != own_hash {
            warn!(
                own_hash = %own_hash,
                record_hash = %record.identity_hash,
                "Refusing to publish a record under a different hash"
            );
            return false;
        }

        match self.bounded(self.backend.publish(own_hash, record)).await {
            Ok(()) => {
                debug!(hash = %own_hash, "Published own record");
                true
            }
            Err(e) => {
                warn!(hash = %own_hash, error = %e, "Directory publish failed");
                false
            }
        }
    }

    /// Resolve `hash`; `None` when unknown or unavailable
    ///
    /// Returned records are marked `synced`.
    pub async fn lookup(&self, hash: &str) -> Option<NodeRecord> {
        match self.bounded(self.backend.lookup(hash)).await {
            Ok(Some(mut record)) => {
                if record.identity_hash.is_empty() {
                    record.identity_hash = hash.to_string();
                }
                if record.identity_hash != hash {
                    warn!(
                        hash = %hash,
                        returned = %record.identity_hash,
                        "Directory answered with a record for another hash"
                    );
                    return None;
                }
                debug!(hash = %hash, "Directory lookup hit");
                Some(record.with_synced(true))
            }
            Ok(None) => {
                debug!(hash = %hash, "Directory lookup miss");
                None
            }
            Err(e) => {
                warn!(hash = %hash, error = %e, "Directory lookup failed");
                None
            }
        }
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = DirectoryResult<T>>,
    ) -> DirectoryResult<T> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| DirectoryError::Timeout(self.timeout))?
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Backends
// ═══════════════════════════════════════════════════════════════════════════

/// No directory: discovery relies on gossip alone
#[derive(Debug, Clone, Copy, Default)]
pub struct GossipOnlyDirectory;

impl DirectoryBackend for GossipOnlyDirectory {
    async fn publish(&self, _own_hash: &str, _record: &NodeRecord) -> DirectoryResult<()> {
        Ok(())
    }

    async fn lookup(&self, _hash: &str) -> DirectoryResult<Option<NodeRecord>> {
        Ok(None)
    }
}

/// In-process shared directory
///
/// Clones share the same map, so several nodes in one process (or a test)
/// can see each other's publications.
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    entries: Arc<RwLock<HashMap<String, NodeRecord>>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl DirectoryBackend for MemoryDirectory {
    async fn publish(&self, own_hash: &str, record: &NodeRecord) -> DirectoryResult<()> {
        let mut published = record.clone();
        published.contact_hint = None;
        self.entries.write().insert(own_hash.to_string(), published);
        Ok(())
    }

    async fn lookup(&self, hash: &str) -> DirectoryResult<Option<NodeRecord>> {
        Ok(self.entries.read().get(hash).cloned())
    }
}

/// Resolves hashes from a local record store; publishing is a no-op
#[derive(Clone)]
pub struct StoreDirectory {
    store: Arc<dyn RecordStore>,
}

impl StoreDirectory {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

impl DirectoryBackend for StoreDirectory {
    async fn publish(&self, _own_hash: &str, _record: &NodeRecord) -> DirectoryResult<()> {
        Ok(())
    }

    async fn lookup(&self, hash: &str) -> DirectoryResult<Option<NodeRecord>> {
        self.store.get(hash)
    }
}
