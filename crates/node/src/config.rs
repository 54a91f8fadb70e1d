//! TOML configuration for the node agent.
//!
//! Loading is two-phased: `Config::load` parses the file, `validate`
//! checks invariants and normalizes the pulling strategy. Validation
//! failures are fatal at startup; no task is spawned on a bad config.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::strategy::{StrategyConfig, StrategyError, StrategyWeights};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("invalid config: {0}")]
    Strategy(#[from] StrategyError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// Chain gateway endpoint, e.g. "http://127.0.0.1:19933".
    pub endpoint: String,
    /// This node's chain account. Also the entropy seed material for the
    /// admission throttle.
    pub account: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Storage engine endpoint, e.g. "http://127.0.0.1:12222".
    pub endpoint: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SealCoordinatorConfig {
    pub endpoint: String,
    /// Stable identifier this node presents to the coordinator;
    /// "auto" generates a fresh UUID at startup.
    pub node_uuid: String,
    #[serde(default)]
    pub auth_token: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub strategy: StrategyConfig,
    /// Minimum fraction of disk the storage engine should keep pledged
    /// as SRD, in percent.
    pub min_srd_ratio: u8,
    pub max_pending_tasks: u32,
    /// File size bounds in MB; 0 means unbounded.
    pub min_file_size: u64,
    pub max_file_size: u64,
    /// Replica floor applied to db-scanned candidates; 0 disables it.
    pub min_replicas: u32,
    /// Replica ceiling applied to every candidate; 0 disables it.
    pub max_replicas: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            strategy: StrategyConfig::default(),
            min_srd_ratio: 70,
            max_pending_tasks: 32,
            min_file_size: 0,
            max_file_size: 0,
            min_replicas: 40,
            max_replicas: 100,
        }
    }
}

/// Raw configuration as parsed from disk.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    pub chain: ChainConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    pub seal_coordinator: Option<SealCoordinatorConfig>,
}

fn default_data_dir() -> String {
    "data".to_string()
}

/// Configuration after validation, with the strategy resolved to a
/// normalized weight triple.
#[derive(Debug, Clone)]
pub struct NormalizedConfig {
    pub data_dir: PathBuf,
    pub chain: ChainConfig,
    pub storage: StorageConfig,
    pub scheduler: SchedulerConfig,
    pub strategy_weights: StrategyWeights,
    pub seal_coordinator: Option<SealCoordinatorConfig>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    pub fn validate(self) -> Result<NormalizedConfig, ConfigError> {
        if self.chain.endpoint.is_empty() {
            return Err(ConfigError::Invalid("chain.endpoint is empty".into()));
        }
        if self.chain.account.is_empty() {
            return Err(ConfigError::Invalid("chain.account is empty".into()));
        }
        if self.storage.endpoint.is_empty() {
            return Err(ConfigError::Invalid("storage.endpoint is empty".into()));
        }
        if self.scheduler.min_srd_ratio > 100 {
            return Err(ConfigError::Invalid(
                "scheduler.min_srd_ratio must be within 0..=100".into(),
            ));
        }
        if self.scheduler.max_pending_tasks == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.max_pending_tasks must be at least 1".into(),
            ));
        }
        if let Some(sc) = &self.seal_coordinator {
            if sc.endpoint.is_empty() {
                return Err(ConfigError::Invalid(
                    "seal_coordinator.endpoint is empty".into(),
                ));
            }
            if sc.node_uuid.is_empty() {
                return Err(ConfigError::Invalid(
                    "seal_coordinator.node_uuid is empty".into(),
                ));
            }
        }

        let strategy_weights = self.scheduler.strategy.normalized()?;

        Ok(NormalizedConfig {
            data_dir: PathBuf::from(self.data_dir),
            chain: self.chain,
            storage: self.storage,
            scheduler: self.scheduler,
            strategy_weights,
            seal_coordinator: self.seal_coordinator,
        })
    }
}
