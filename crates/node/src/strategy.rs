//! Pulling strategy: named presets or explicit weight triples, normalized
//! to integer percentages at config-load time.

use serde::Deserialize;
use thiserror::Error;

/// Which discovery queue a candidate file was drawn from. The admission
/// pipeline applies slightly different rules per bucket (replica cap,
/// minimum-replica floor).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullBucket {
    /// Chain-indexed files that already existed before this node started.
    ExistedFiles,
    /// Files found by scanning the local database backlog.
    DbFiles,
    /// Freshly chain-indexed files.
    NewFiles,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StrategyError {
    #[error("strategy weights must not all be zero")]
    ZeroWeights,
}

/// Named strategy presets. Serialized forms match the config surface:
/// `"default"`, `"srdFirst"`, `"newFileFirst"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum StrategyPreset {
    #[serde(rename = "default")]
    Default,
    #[serde(rename = "srdFirst")]
    SrdFirst,
    #[serde(rename = "newFileFirst")]
    NewFileFirst,
}

impl StrategyPreset {
    /// Fixed weight table for the named presets. Every row sums to 100.
    pub fn weights(self) -> StrategyWeights {
        match self {
            StrategyPreset::Default => StrategyWeights {
                existed_files_weight: 30,
                db_files_weight: 20,
                new_files_weight: 50,
            },
            StrategyPreset::SrdFirst => StrategyWeights {
                existed_files_weight: 20,
                db_files_weight: 10,
                new_files_weight: 70,
            },
            StrategyPreset::NewFileFirst => StrategyWeights {
                existed_files_weight: 10,
                db_files_weight: 5,
                new_files_weight: 85,
            },
        }
    }
}

/// Relative weights of the three pulling queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StrategyWeights {
    pub existed_files_weight: u32,
    pub db_files_weight: u32,
    pub new_files_weight: u32,
}

impl Default for StrategyWeights {
    fn default() -> Self {
        StrategyWeights {
            existed_files_weight: 0,
            db_files_weight: 0,
            new_files_weight: 100,
        }
    }
}

/// Strategy as written in the config file: a preset name or an explicit
/// weight table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum StrategyConfig {
    Preset(StrategyPreset),
    Weights(StrategyWeights),
}

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig::Preset(StrategyPreset::Default)
    }
}

impl StrategyConfig {
    /// Resolve to a normalized weight triple summing to exactly 100.
    pub fn normalized(&self) -> Result<StrategyWeights, StrategyError> {
        match self {
            StrategyConfig::Preset(p) => p.weights().normalize(),
            StrategyConfig::Weights(w) => w.normalize(),
        }
    }
}

impl StrategyWeights {
    fn as_array(&self) -> [u64; 3] {
        [
            u64::from(self.existed_files_weight),
            u64::from(self.db_files_weight),
            u64::from(self.new_files_weight),
        ]
    }

    /// Rescale the triple so the weights sum to exactly 100, using the
    /// largest-remainder method: floor every scaled weight, then hand the
    /// leftover units out in order of descending fractional remainder.
    /// Remainder ties go to the larger raw weight, then declaration order.
    /// An all-zero triple is invalid configuration, not normalized.
    ///
    /// Normalizing an already-normalized triple is a no-op.
    pub fn normalize(&self) -> Result<StrategyWeights, StrategyError> {
        let raw = self.as_array();
        let sum: u64 = raw.iter().sum();
        if sum == 0 {
            return Err(StrategyError::ZeroWeights);
        }

        let mut floors = [0u64; 3];
        let mut remainders = [0u64; 3];
        for i in 0..3 {
            let scaled = raw[i] * 100;
            floors[i] = scaled / sum;
            remainders[i] = scaled % sum;
        }

        let assigned: u64 = floors.iter().sum();
        let mut leftover = 100 - assigned;

        let mut order = [0usize, 1, 2];
        order.sort_by(|&a, &b| {
            remainders[b]
                .cmp(&remainders[a])
                .then(raw[b].cmp(&raw[a]))
                .then(a.cmp(&b))
        });
        for &i in &order {
            if leftover == 0 {
                break;
            }
            floors[i] += 1;
            leftover -= 1;
        }

        Ok(StrategyWeights {
            existed_files_weight: floors[0] as u32,
            db_files_weight: floors[1] as u32,
            new_files_weight: floors[2] as u32,
        })
    }

    /// Sum of the raw weights.
    pub fn total(&self) -> u64 {
        self.as_array().iter().sum()
    }
}
