//! # Ledger Core - My Single-Node Blockchain Ledger
//!
//! This is the ledger core I built in Rust: transaction admission, block
//! construction, proof-of-work, chain extension and fork resolution.
//! When I come back to this code, here's what I need to remember:
//!
//! ## What I Built
//! - **Account Ledger**: balances plus a replay nonce per sender, fees burned
//! - **Merkle Engine**: odd levels duplicate their last hash, with proofs
//! - **Proof-of-Work**: leading hex zeros, cancellable nonce search
//! - **Chain**: serialized appends, longest-valid-chain fork resolution
//! - **Mempool**: fee-per-byte priority, capacity and TTL limits
//! - **Persistence**: sled store with a state snapshot for fast restarts
//!
//! ## How I Organized My Code
//! - `core/`: transactions, signatures, Merkle, blocks, PoW, state, chain, miner, fees
//! - `storage/`: the mempool and the sled ledger store
//! - `network/`: the `Node` boundary, wire messages and tip events
//! - `config/`: TOML configuration with environment overrides
//! - `utils/`: hashing, ECDSA helpers and bincode encoding
//! - `cli/`: command-line interface
//!
//! ## Rules I Never Break
//! - A rejected block or chain changes nothing
//! - The account state always equals a replay of the blocks from genesis
//! - Lock order is chain first, then mempool

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod storage;
pub mod utils;

#[cfg(test)]
pub mod testnet;

// Re-export commonly used types for convenience
pub use cli::{Command, Opt};
pub use config::{LedgerConfig, MempoolConfig, MiningConfig};
pub use core::{
    Block, Blockchain, CancelToken, ChainStatus, FeePolicy, ForkChange, KeyRegistry, MerkleProof,
    MerkleTree, Miner, PowOutcome, ProofOfWork, SignatureScheme, SignatureVerifier, StateManager,
    StateSnapshot, Transaction,
};
pub use error::{ErrorKind, LedgerError, Result};
pub use network::{ChainEvent, Message, Node, Response, TransactionLocation};
pub use storage::{LedgerStore, Mempool};
pub use utils::{current_timestamp, new_key_pair, public_key_from_pkcs8, sha256_hex};
