//! Runtime configuration
//!
//! Stored as pretty-printed JSON (`config.json`) in the data directory.
//! Every field has a default, so a partial or missing file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DirectoryError, DirectoryResult};
use crate::identity::{IdentityHasher, DEFAULT_SALT};
use crate::storage::DEFAULT_CAPACITY;

/// File name of the configuration inside the data directory
pub const CONFIG_FILE_NAME: &str = "config.json";

/// File name of the record database inside the data directory
pub const DATABASE_FILE_NAME: &str = "peerdir.redb";

/// Top-level configuration for a peer directory node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerDirectoryConfig {
    /// Directory holding the database and this file
    pub data_dir: PathBuf,
    /// Maximum number of records kept after a trim
    pub capacity: usize,
    /// Salt mixed into phone-number hashes
    pub identity_salt: String,
    /// Records not seen for this long are removed by the maintenance sweep
    pub stale_after_secs: u64,
    /// Period of the maintenance sweep
    pub sweep_interval_secs: u64,
    /// Upper bound on a single directory publish or lookup
    pub directory_timeout_secs: u64,
    /// Gossip tuning
    pub gossip: GossipConfig,
}

impl Default for PeerDirectoryConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            capacity: DEFAULT_CAPACITY,
            identity_salt: DEFAULT_SALT.to_string(),
            stale_after_secs: 7 * 24 * 60 * 60,
            sweep_interval_secs: 60 * 60,
            directory_timeout_secs: 10,
            gossip: GossipConfig::default(),
        }
    }
}

impl PeerDirectoryConfig {
    /// Defaults rooted at `data_dir`
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Read the config at `path`, or return defaults if the file is absent
    pub fn load_or_default(path: impl AsRef<Path>) -> DirectoryResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            DirectoryError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config to `path` as pretty JSON, creating parent directories
    pub fn save(&self, path: impl AsRef<Path>) -> DirectoryResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| DirectoryError::Config(format!("Failed to encode config: {}", e)))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Reject values that would stall or disable the node
    pub fn validate(&self) -> DirectoryResult<()> {
        if self.capacity == 0 {
            return Err(DirectoryError::Config("capacity must be > 0".to_string()));
        }
        if self.directory_timeout_secs == 0 {
            return Err(DirectoryError::Config(
                "directory_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(DirectoryError::Config(
                "sweep_interval_secs must be > 0".to_string(),
            ));
        }
        self.gossip.validate()
    }

    /// Path of the config file inside `data_dir`
    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join(CONFIG_FILE_NAME)
    }

    /// Path of the record database inside `data_dir`
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE_NAME)
    }

    /// Hasher using the configured salt
    pub fn hasher(&self) -> IdentityHasher {
        IdentityHasher::new(self.identity_salt.clone())
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn directory_timeout(&self) -> Duration {
        Duration::from_secs(self.directory_timeout_secs)
    }
}

/// Tuning for the gossip synchronizer and its rate limiter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GossipConfig {
    /// Period between gossip rounds
    pub sync_interval_secs: u64,
    /// Delay before the first round
    pub startup_delay_secs: u64,
    /// Peers contacted per round
    pub fanout: usize,
    /// Records sampled into one payload
    pub max_nodes_per_packet: usize,
    /// Stored records considered as targets when no peer is active
    pub bootstrap_sample: usize,
    /// Minimum spacing between accepted payloads from one source
    pub min_sync_interval_from_peer_secs: u64,
    /// Silence after which an active peer stops being a gossip target
    pub active_peer_timeout_secs: u64,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: 60,
            startup_delay_secs: 5,
            fanout: 2,
            max_nodes_per_packet: 8,
            bootstrap_sample: 10,
            min_sync_interval_from_peer_secs: 30,
            active_peer_timeout_secs: 180,
        }
    }
}

impl GossipConfig {
    pub fn validate(&self) -> DirectoryResult<()> {
        if self.sync_interval_secs == 0 {
            return Err(DirectoryError::Config(
                "gossip.sync_interval_secs must be > 0".to_string(),
            ));
        }
        if self.active_peer_timeout_secs == 0 {
            return Err(DirectoryError::Config(
                "gossip.active_peer_timeout_secs must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }

    pub fn min_sync_interval_from_peer(&self) -> Duration {
        Duration::from_secs(self.min_sync_interval_from_peer_secs)
    }

    pub fn active_peer_timeout(&self) -> Duration {
        Duration::from_secs(self.active_peer_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = PeerDirectoryConfig::default();
        assert_eq!(config.capacity, 2500);
        assert_eq!(config.identity_salt, DEFAULT_SALT);
        assert_eq!(config.directory_timeout(), Duration::from_secs(10));
        assert_eq!(config.gossip.fanout, 2);
        assert_eq!(config.gossip.max_nodes_per_packet, 8);
        assert_eq!(config.gossip.min_sync_interval_from_peer(), Duration::from_secs(30));
        assert_eq!(config.gossip.active_peer_timeout(), Duration::from_secs(180));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = PeerDirectoryConfig::load_or_default(temp_dir.path().join("none.json")).unwrap();
        assert_eq!(config, PeerDirectoryConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = PeerDirectoryConfig::with_data_dir(temp_dir.path());
        config.capacity = 42;
        config.gossip.fanout = 3;

        let path = config.config_path();
        config.save(&path).unwrap();
        let loaded = PeerDirectoryConfig::load_or_default(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, r#"{ "capacity": 10, "gossip": { "fanout": 4 } }"#).unwrap();

        let config = PeerDirectoryConfig::load_or_default(&path).unwrap();
        assert_eq!(config.capacity, 10);
        assert_eq!(config.gossip.fanout, 4);
        assert_eq!(config.gossip.sync_interval_secs, 60);
        assert_eq!(config.stale_after_secs, 604_800);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, r#"{ "capacity": 0 }"#).unwrap();
        assert!(matches!(
            PeerDirectoryConfig::load_or_default(&path),
            Err(DirectoryError::Config(_))
        ));

        std::fs::write(&path, "not json").unwrap();
        assert!(PeerDirectoryConfig::load_or_default(&path).is_err());
    }
}
