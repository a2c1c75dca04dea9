use crate::core::{SignatureScheme, MAX_DIFFICULTY};
use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const DIFFICULTY_KEY: &str = "LEDGER_DIFFICULTY";
const DATA_DIR_KEY: &str = "LEDGER_DATA_DIR";
const MIN_FEE_KEY: &str = "LEDGER_MIN_FEE";

static DEFAULT_DATA_DIR: &str = "data";

/// Node configuration, read from TOML with every field defaulted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Leading zero hex characters every block hash must carry
    pub difficulty: usize,
    pub signature_scheme: SignatureScheme,
    pub mempool: MempoolConfig,
    pub mining: MiningConfig,
    pub genesis: GenesisConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MempoolConfig {
    pub capacity: usize,
    pub min_fee: u64,
    /// Pending transactions older than this are expired
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MiningConfig {
    pub max_block_transactions: usize,
    /// Attempts after losing a race to another block
    pub max_retries: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenesisConfig {
    pub allocations: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            difficulty: 2,
            signature_scheme: SignatureScheme::default(),
            mempool: MempoolConfig::default(),
            mining: MiningConfig::default(),
            genesis: GenesisConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Default for MempoolConfig {
    fn default() -> Self {
        MempoolConfig {
            capacity: 1000,
            min_fee: 1,
            ttl_secs: 3600,
        }
    }
}

impl Default for MiningConfig {
    fn default() -> Self {
        MiningConfig {
            max_block_transactions: 100,
            max_retries: 3,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
        }
    }
}

impl LedgerConfig {
    pub fn from_toml_str(raw: &str) -> Result<LedgerConfig> {
        let config: LedgerConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file, then apply environment overrides
    pub fn load(path: &Path) -> Result<LedgerConfig> {
        let raw = fs::read_to_string(path)?;
        let mut config: LedgerConfig = toml::from_str(&raw)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a file
    pub fn from_env() -> Result<LedgerConfig> {
        let mut config = LedgerConfig::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| env::var(key).ok())
    }

    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(difficulty) = lookup(DIFFICULTY_KEY) {
            self.difficulty = parse_override(DIFFICULTY_KEY, &difficulty)?;
        }
        if let Some(data_dir) = lookup(DATA_DIR_KEY) {
            self.storage.data_dir = PathBuf::from(data_dir);
        }
        if let Some(min_fee) = lookup(MIN_FEE_KEY) {
            self.mempool.min_fee = parse_override(MIN_FEE_KEY, &min_fee)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.difficulty > MAX_DIFFICULTY {
            return Err(LedgerError::Config(format!(
                "difficulty {} exceeds the maximum of {MAX_DIFFICULTY}",
                self.difficulty
            )));
        }
        if self.mempool.capacity == 0 {
            return Err(LedgerError::Config(
                "mempool.capacity must be positive".to_string(),
            ));
        }
        if self.mining.max_block_transactions == 0 {
            return Err(LedgerError::Config(
                "mining.max_block_transactions must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| LedgerError::Config(format!("Invalid value for {key}: {e}")))
}
