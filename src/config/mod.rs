//! Configuration management
//!
//! Node settings come from a TOML file with defaults for every field,
//! followed by `LEDGER_*` environment overrides.

pub mod settings;

pub use settings::{GenesisConfig, LedgerConfig, MempoolConfig, MiningConfig, StorageConfig};
