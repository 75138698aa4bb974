//! Configuration for the caja ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Caja ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// RocksDB configuration
    #[serde(default)]
    pub rocksdb: RocksDBConfig,

    /// Writer actor configuration
    #[serde(default)]
    pub actors: ActorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/caja"),
            service_name: "caja-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            rocksdb: RocksDBConfig::default(),
            actors: ActorConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 16,
            max_write_buffer_number: 2,
            max_background_jobs: 2,
            enable_statistics: false,
        }
    }
}

/// Writer actor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorConfig {
    /// Number of single-writer shards; a patient always maps to the same shard
    pub shards: usize,

    /// Bounded mailbox size per shard
    pub mailbox_capacity: usize,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            shards: 4,
            mailbox_capacity: 1000,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("CAJA_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(shards) = std::env::var("CAJA_SHARDS") {
            config.actors.shards = shards
                .parse()
                .map_err(|e| crate::Error::Config(format!("Invalid CAJA_SHARDS: {}", e)))?;
        }

        if let Ok(capacity) = std::env::var("CAJA_MAILBOX_CAPACITY") {
            config.actors.mailbox_capacity = capacity.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid CAJA_MAILBOX_CAPACITY: {}", e))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the ledger cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.actors.shards == 0 {
            return Err(crate::Error::Config("actors.shards must be at least 1".to_string()));
        }
        if self.actors.mailbox_capacity == 0 {
            return Err(crate::Error::Config(
                "actors.mailbox_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
