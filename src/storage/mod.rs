//! Data storage and persistence
//!
//! The mempool of pending transactions and the sled-backed store that keeps
//! the chain and its state snapshot across restarts.

pub mod ledger_store;
pub mod memory_pool;

pub use ledger_store::LedgerStore;
pub use memory_pool::{Mempool, MempoolEntry};
