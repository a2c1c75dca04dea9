//! Stateless block and chain checks
//!
//! Everything here can be decided from the blocks alone. Balance, nonce and
//! signature checks need account state and live in [`crate::core::state`].

use crate::core::{Block, ProofOfWork};
use crate::error::{LedgerError, Result};
use crate::utils::is_hex_digest;

/// Formats, transaction structure and Merkle root
pub fn validate_structure(block: &Block) -> Result<()> {
    if !is_hex_digest(block.get_previous_hash()) {
        return Err(LedgerError::Validation(format!(
            "Block {} has a malformed previous hash",
            block.get_index()
        )));
    }
    for tx in block.get_transactions() {
        tx.verify_structure()?;
    }
    block.verify_merkle_root()
}

/// Checks `block` as the direct successor of `previous`.
///
/// Order: index, linkage, timestamp, structure, then proof-of-work.
pub fn validate_successor(previous: &Block, block: &Block, difficulty: usize) -> Result<()> {
    let expected = previous.get_index() + 1;
    if block.get_index() != expected {
        return Err(LedgerError::UnexpectedIndex {
            expected,
            found: block.get_index(),
        });
    }
    if block.get_previous_hash() != previous.get_hash() {
        return Err(LedgerError::PreviousHashMismatch {
            expected: previous.get_hash().to_string(),
            found: block.get_previous_hash().to_string(),
        });
    }
    if block.get_timestamp() < previous.get_timestamp() {
        return Err(LedgerError::Validation(format!(
            "Block {} is older than its predecessor ({} < {})",
            block.get_index(),
            block.get_timestamp(),
            previous.get_timestamp()
        )));
    }
    validate_structure(block)?;
    ProofOfWork::validate(block, difficulty)
}

/// Genesis check plus every adjacent pair
pub fn validate_chain(blocks: &[Block], difficulty: usize) -> Result<()> {
    let genesis = blocks
        .first()
        .ok_or_else(|| LedgerError::Validation("Chain is empty".to_string()))?;
    if *genesis != Block::genesis() {
        return Err(LedgerError::Validation(format!(
            "Chain starts from a foreign genesis block {}",
            genesis.get_hash()
        )));
    }
    for pair in blocks.windows(2) {
        validate_successor(&pair[0], &pair[1], difficulty)?;
    }
    Ok(())
}
