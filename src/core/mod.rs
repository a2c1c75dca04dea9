//! Core ledger functionality
//!
//! This module contains the fundamental ledger components: transactions and
//! their signatures, the Merkle engine, blocks and proof-of-work, the account
//! state, the chain with fork resolution, and the mining loop.

pub mod block;
pub mod blockchain;
pub mod fees;
pub mod merkle;
pub mod miner;
pub mod proof_of_work;
pub mod signature;
pub mod state;
pub mod transaction;
pub mod validation;

pub use block::{Block, EMPTY_MERKLE_ROOT, GENESIS_PREVIOUS_HASH, GENESIS_TIMESTAMP};
pub use blockchain::{Blockchain, ChainStatus, ForkChange};
pub use fees::{FeeMode, FeePolicy};
pub use merkle::{MerkleProof, MerkleTree};
pub use miner::Miner;
pub use proof_of_work::{
    meets_difficulty, CancelToken, PowOutcome, ProofOfWork, CANCEL_CHECK_INTERVAL, MAX_DIFFICULTY,
};
pub use signature::{
    verifier_for, EcdsaVerifier, KeyRegistry, SealVerifier, SignatureScheme, SignatureVerifier,
};
pub use state::{AccountState, StateManager, StateSnapshot};
pub use transaction::Transaction;
