//! Epidemic record propagation
//!
//! Every round the synchronizer picks a small random fan-out of peers and
//! hands each one a random sample of the local store. Inbound payloads go
//! through the rate limiter, are parsed entry by entry and folded into the
//! store with `merge_incoming`. Newly learned or relocated peers get a
//! liveness probe.
//!
//! Rounds are synchronous and only touch the store and the transport, so
//! they can be driven by the periodic task from [`GossipSynchronizer::start`]
//! or called directly.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use rand::seq::IndexedRandom;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::events::{GossipEvent, SkipReason};
use super::payload::{decode_payload, encode_payload};
use super::rate_limiter::RateLimiter;
use crate::config::GossipConfig;
use crate::error::DirectoryResult;
use crate::storage::RecordStore;
use crate::transport::{Transport, PEER_SYNC, PING, PROBE_PAYLOAD};
use crate::types::{is_routable, MergeOutcome, NodeRecord};

/// Peers with a live connection, keyed by identity hash
///
/// Written by the transport layer, read at the start of every round.
/// Entries not refreshed within `active_peer_timeout` are expired before the
/// round picks its targets.
pub type ActivePeers = Arc<RwLock<HashMap<String, ActivePeer>>>;

/// Where a live peer was last heard from, and when
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivePeer {
    pub address: String,
    pub last_heard: Instant,
}

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// What happened to one inbound payload's entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Entries that decoded into records
    pub received: usize,
    /// Entries dropped while decoding
    pub dropped: usize,
    /// Entries describing the local node
    pub skipped_self: usize,
    /// Stored (new or newer)
    pub applied: usize,
    /// Of `applied`, hashes seen for the first time
    pub discovered: usize,
    /// Not newer than the stored record
    pub stale: usize,
    /// Contradicted a pinned public key
    pub key_mismatches: usize,
    /// Liveness probes handed to the transport
    pub probes_sent: usize,
    /// Entries the store failed to merge
    pub failed: usize,
    /// Records evicted by the trim after the batch
    pub evicted: usize,
}

/// Result of [`GossipSynchronizer::handle_incoming`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Dropped by the rate limiter before parsing
    Throttled,
    /// Not a valid gossip payload
    Malformed,
    /// Parsed and merged
    Processed(BatchSummary),
}

/// Periodic gossip driver and inbound merge handler
pub struct GossipSynchronizer {
    store: Arc<dyn RecordStore>,
    transport: Arc<dyn Transport>,
    active_peers: ActivePeers,
    local_hash: String,
    config: GossipConfig,
    limiter: RateLimiter,
    event_tx: broadcast::Sender<GossipEvent>,
}

impl GossipSynchronizer {
    pub fn new(
        store: Arc<dyn RecordStore>,
        transport: Arc<dyn Transport>,
        local_hash: impl Into<String>,
        config: GossipConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let limiter = RateLimiter::new(config.min_sync_interval_from_peer());
        Self {
            store,
            transport,
            active_peers: ActivePeers::default(),
            local_hash: local_hash.into(),
            config,
            limiter,
            event_tx,
        }
    }

    /// Share an existing active-peer map with the transport layer
    pub fn with_active_peers(mut self, active_peers: ActivePeers) -> Self {
        self.active_peers = active_peers;
        self
    }

    pub fn local_hash(&self) -> &str {
        &self.local_hash
    }

    pub fn config(&self) -> &GossipConfig {
        &self.config
    }

    /// Handle to the active-peer map
    pub fn active_peers(&self) -> ActivePeers {
        self.active_peers.clone()
    }

    /// Record a live connection to `hash` at `address`, heard from just now
    pub fn mark_active(&self, hash: impl Into<String>, address: impl Into<String>) {
        let peer = ActivePeer {
            address: address.into(),
            last_heard: Instant::now(),
        };
        self.active_peers.write().insert(hash.into(), peer);
    }

    /// Forget a live connection
    pub fn mark_inactive(&self, hash: &str) {
        self.active_peers.write().remove(hash);
    }

    /// Drop active peers not heard from within the configured timeout
    ///
    /// Returns the number of peers expired.
    pub fn expire_inactive(&self) -> usize {
        let timeout = self.config.active_peer_timeout();
        let mut peers = self.active_peers.write();
        let before = peers.len();
        peers.retain(|hash, peer| {
            let alive = peer.last_heard.elapsed() < timeout;
            if !alive {
                debug!(peer = %hash, address = %peer.address, "Active peer expired");
            }
            alive
        });
        before - peers.len()
    }

    /// Subscribe to gossip events
    pub fn subscribe(&self) -> broadcast::Receiver<GossipEvent> {
        self.event_tx.subscribe()
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    fn emit(&self, event: GossipEvent) {
        let _ = self.event_tx.send(event);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Outbound
    // ═══════════════════════════════════════════════════════════════════════

    /// Run one gossip round; returns the number of targets sent to
    pub fn tick(&self) -> DirectoryResult<usize> {
        self.expire_inactive();
        let candidates = self.candidates()?;
        if candidates.is_empty() {
            debug!("Gossip round skipped: no candidates");
            self.emit(GossipEvent::RoundSkipped {
                reason: SkipReason::NoCandidates,
            });
            return Ok(0);
        }

        let (targets, sample) = {
            let mut rng = rand::rng();
            let targets: Vec<String> = candidates
                .choose_multiple(&mut rng, self.config.fanout)
                .cloned()
                .collect();
            let all = self.store.all()?;
            let sample: Vec<NodeRecord> = all
                .choose_multiple(&mut rng, self.config.max_nodes_per_packet)
                .cloned()
                .collect();
            (targets, sample)
        };

        if sample.is_empty() {
            debug!("Gossip round skipped: store is empty");
            self.emit(GossipEvent::RoundSkipped {
                reason: SkipReason::NothingToSend,
            });
            return Ok(0);
        }

        let payload = encode_payload(&sample)?;
        let mut sent = 0;
        for target in &targets {
            let Some(address) = self.resolve_address(target)? else {
                debug!(target = %target, "No routable address, skipping");
                continue;
            };
            match self.transport.send_datagram(&address, PEER_SYNC, &payload) {
                Ok(()) => sent += 1,
                Err(e) => warn!(target = %target, error = %e, "Failed to queue gossip payload"),
            }
        }

        debug!(targets = sent, records = sample.len(), "Gossip round complete");
        self.emit(GossipEvent::RoundCompleted {
            targets: sent,
            records: sample.len(),
        });
        Ok(sent)
    }

    /// Active peers, or recently seen stored peers when none are active
    fn candidates(&self) -> DirectoryResult<Vec<String>> {
        let mut candidates: BTreeSet<String> = self
            .active_peers
            .read()
            .keys()
            .filter(|hash| **hash != self.local_hash)
            .cloned()
            .collect();

        if candidates.is_empty() {
            candidates = self
                .store
                .recent(self.config.bootstrap_sample)?
                .into_iter()
                .map(|record| record.identity_hash)
                .filter(|hash| *hash != self.local_hash)
                .collect();
        }

        Ok(candidates.into_iter().collect())
    }

    /// Live address first, then the stored one
    fn resolve_address(&self, target: &str) -> DirectoryResult<Option<String>> {
        if target == self.local_hash {
            return Ok(None);
        }

        let live = self
            .active_peers
            .read()
            .get(target)
            .map(|peer| peer.address.clone());
        if let Some(address) = live.filter(|a| is_routable(a)) {
            return Ok(Some(address));
        }

        Ok(self.store.get(target)?.and_then(|record| record.endpoint()))
    }

    fn probe(&self, record: &NodeRecord) -> bool {
        let hash = &record.identity_hash;
        let Some(address) = record.endpoint() else {
            return false;
        };
        match self.transport.send_datagram(&address, PING, PROBE_PAYLOAD) {
            Ok(()) => {
                debug!(hash = %hash, address = %address, "Probe queued");
                true
            }
            Err(e) => {
                warn!(hash = %hash, address = %address, error = %e, "Failed to queue probe");
                false
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Inbound
    // ═══════════════════════════════════════════════════════════════════════

    /// Merge a gossip payload received from `source`
    ///
    /// Never fails: throttled and malformed payloads are dropped and logged,
    /// store failures are logged per entry.
    pub fn handle_incoming(&self, payload: &str, source: &str) -> InboundOutcome {
        if !self.limiter.should_process(source) {
            debug!(source = %source, "Gossip payload throttled");
            self.emit(GossipEvent::Throttled {
                source: source.to_string(),
            });
            return InboundOutcome::Throttled;
        }

        let decoded = match decode_payload(payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(source = %source, error = %e, "Dropping malformed gossip payload");
                self.emit(GossipEvent::MalformedPayload {
                    source: source.to_string(),
                    message: e.to_string(),
                });
                return InboundOutcome::Malformed;
            }
        };

        let mut summary = BatchSummary {
            received: decoded.nodes.len(),
            dropped: decoded.dropped,
            ..BatchSummary::default()
        };

        for record in &decoded.nodes {
            if record.identity_hash == self.local_hash {
                summary.skipped_self += 1;
                continue;
            }
            self.merge_one(record, source, &mut summary);
        }

        match self.store.trim() {
            Ok(evicted) => {
                if evicted > 0 {
                    debug!(evicted, "Trimmed store after gossip batch");
                }
                summary.evicted = evicted;
            }
            Err(e) => error!(error = %e, "Failed to trim store"),
        }

        debug!(
            source = %source,
            applied = summary.applied,
            stale = summary.stale,
            key_mismatches = summary.key_mismatches,
            "Gossip batch merged"
        );
        self.emit(GossipEvent::BatchMerged {
            source: source.to_string(),
            applied: summary.applied,
            stale: summary.stale,
            rejected: summary.key_mismatches,
        });

        InboundOutcome::Processed(summary)
    }

    fn merge_one(&self, record: &NodeRecord, source: &str, summary: &mut BatchSummary) {
        let hash = &record.identity_hash;
        let report = match self.store.merge_incoming(record) {
            Ok(report) => report,
            Err(e) => {
                error!(hash = %hash, error = %e, "Failed to merge gossip record");
                summary.failed += 1;
                return;
            }
        };

        match report.outcome {
            MergeOutcome::Applied => {
                summary.applied += 1;
                if report.is_first_encounter() {
                    summary.discovered += 1;
                    debug!(hash = %hash, address = %record.address, "Discovered peer through gossip");
                    if self.probe(record) {
                        summary.probes_sent += 1;
                    }
                    self.emit(GossipEvent::PeerDiscovered {
                        hash: hash.clone(),
                        address: record.address.clone(),
                    });
                } else if report.moved_endpoint(record) {
                    debug!(hash = %hash, address = %record.address, "Peer moved");
                    if self.probe(record) {
                        summary.probes_sent += 1;
                    }
                    self.emit(GossipEvent::EndpointChanged {
                        hash: hash.clone(),
                        address: record.address.clone(),
                    });
                }
            }
            MergeOutcome::RejectedStale => summary.stale += 1,
            MergeOutcome::RejectedKeyMismatch => {
                summary.key_mismatches += 1;
                warn!(
                    hash = %hash,
                    source = %source,
                    "SECURITY ALERT: gossip record contradicts pinned public key"
                );
                self.emit(GossipEvent::KeyMismatch {
                    hash: hash.clone(),
                    source: source.to_string(),
                });
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Background task
    // ═══════════════════════════════════════════════════════════════════════

    /// Spawn the periodic gossip loop
    ///
    /// The first round runs after the configured startup delay, then every
    /// sync interval until the returned handle is stopped.
    pub fn start(self: Arc<Self>) -> GossipTask {
        let token = CancellationToken::new();
        let cancel = token.clone();

        let handle = tokio::spawn(async move {
            info!(
                local = %self.local_hash,
                interval_secs = self.config.sync_interval_secs,
                "Gossip task started"
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Gossip task stopped before first round");
                    return;
                }
                _ = tokio::time::sleep(self.config.startup_delay()) => {}
            }

            let mut interval = tokio::time::interval(self.config.sync_interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = self.tick() {
                            warn!(error = %e, "Gossip round failed");
                        }
                    }
                }
            }

            info!("Gossip task stopped");
        });

        GossipTask { token, handle }
    }
}

/// Handle to a running gossip loop
pub struct GossipTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl GossipTask {
    /// Stop issuing rounds; a round already in progress finishes
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Stop and wait for the loop to exit
    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.handle.await;
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}
