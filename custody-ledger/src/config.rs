//! Configuration for the custody ledger

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::types::Chain;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Account lock acquisition timeout (milliseconds)
    pub lock_timeout_ms: u64,

    /// Number of recorder stripes serializing idempotency checks
    pub recorder_stripes: usize,

    /// Confirmations required before a deposit credits, unless overridden
    pub default_min_confirmations: u32,

    /// Per-chain confirmation overrides, keyed by chain id
    pub min_confirmations: HashMap<String, u32>,

    /// Age after which an in-flight reservation is treated as abandoned
    /// (seconds)
    pub reservation_ttl_secs: u64,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/custody"),
            service_name: "custody-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            lock_timeout_ms: 5_000,
            recorder_stripes: 64,
            default_min_confirmations: 1,
            min_confirmations: HashMap::new(),
            reservation_ttl_secs: 3_600,
            rocksdb: RocksDBConfig::default(),
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

    /// Target file size (MB)
    pub target_file_size_mb: u64,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Level 0 file num compaction trigger
    pub level0_file_num_compaction_trigger: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 128,
            max_write_buffer_number: 4,
            target_file_size_mb: 128,
            max_background_jobs: 4,
            level0_file_num_compaction_trigger: 4,
            enable_statistics: false,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("CUSTODY_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(timeout) = std::env::var("CUSTODY_LOCK_TIMEOUT_MS") {
            config.lock_timeout_ms = timeout
                .parse()
                .map_err(|e| crate::Error::Config(format!("Invalid lock timeout: {}", e)))?;
        }

        if let Ok(ttl) = std::env::var("CUSTODY_RESERVATION_TTL_SECS") {
            config.reservation_ttl_secs = ttl
                .parse()
                .map_err(|e| crate::Error::Config(format!("Invalid reservation TTL: {}", e)))?;
        }

        Ok(config)
    }

    /// Confirmation threshold for a chain
    pub fn min_confirmations_for(&self, chain: &Chain) -> u32 {
        self.min_confirmations
            .get(chain.as_str())
            .copied()
            .unwrap_or(self.default_min_confirmations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "custody-ledger");
        assert_eq!(config.lock_timeout_ms, 5_000);
        assert_eq!(config.default_min_confirmations, 1);
    }

    #[test]
    fn test_min_confirmations_override() {
        let mut config = Config::default();
        config.min_confirmations.insert("BTC".to_string(), 2);

        assert_eq!(config.min_confirmations_for(&Chain::new("BTC")), 2);
        assert_eq!(config.min_confirmations_for(&Chain::new("SOL")), 1);
    }
}
