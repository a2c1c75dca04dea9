//! Test utilities for ledger testing

use crate::config::LedgerConfig;
use crate::core::{Block, Blockchain, SealVerifier, StateManager, Transaction};
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;

/// Easy difficulty so tests mine in a few dozen attempts
pub const TEST_DIFFICULTY: usize = 1;

/// Fixed creation time, keeping transaction ids stable across runs
pub const TEST_TX_TIMESTAMP: u64 = 1_700_000_000;

pub fn allocations(accounts: &[(&str, u64)]) -> BTreeMap<String, u64> {
    accounts
        .iter()
        .map(|(address, balance)| (address.to_string(), *balance))
        .collect()
}

/// Genesis-only chain with the given accounts funded, checking seals
pub fn funded_chain(accounts: &[(&str, u64)]) -> Blockchain {
    Blockchain::new(allocations(accounts), Arc::new(SealVerifier))
}

pub fn funded_state(accounts: &[(&str, u64)]) -> StateManager {
    StateManager::from_allocations(&allocations(accounts), Arc::new(SealVerifier))
}

/// Sealed transaction with a fixed timestamp
pub fn sealed_tx(sender: &str, receiver: &str, amount: u64, fee: u64, nonce: u64) -> Transaction {
    let mut tx =
        Transaction::new_with_timestamp(sender, receiver, amount, fee, nonce, TEST_TX_TIMESTAMP)
            .unwrap();
    tx.seal();
    tx
}

/// Mine the block after `prev`, one second later
pub fn mine_next(prev: &Block, transactions: Vec<Transaction>) -> Block {
    mine_next_at(prev, transactions, prev.get_timestamp() + 1)
}

pub fn mine_next_at(prev: &Block, transactions: Vec<Transaction>, timestamp: u64) -> Block {
    let mut block = Block::new_with_timestamp(
        prev.get_index() + 1,
        timestamp,
        prev.get_hash(),
        transactions,
    );
    block.mine(TEST_DIFFICULTY);
    block
}

/// Sealed transactions between random accounts, for Merkle tests
pub fn random_transactions(count: usize) -> Vec<Transaction> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|i| {
            let sender = format!("acct{}", rng.gen_range(0..1000));
            let receiver = format!("acct{}", rng.gen_range(0..1000));
            let amount = rng.gen_range(1..10_000);
            let fee = rng.gen_range(0..100);
            sealed_tx(&sender, &receiver, amount, fee, i as u64 + 1)
        })
        .collect()
}

/// Config with fast mining and its storage inside a fresh temp directory
pub fn test_config(accounts: &[(&str, u64)]) -> (LedgerConfig, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = LedgerConfig::default();
    config.difficulty = TEST_DIFFICULTY;
    config.mempool.min_fee = 0;
    config.genesis.allocations = allocations(accounts);
    config.storage.data_dir = dir.path().join("ledger");
    (config, dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mine_next_links_to_prev() {
        let genesis = Block::genesis();
        let block = mine_next(&genesis, vec![sealed_tx("Alice", "Bob", 1, 0, 1)]);
        assert_eq!(block.get_index(), 1);
        assert_eq!(block.get_previous_hash(), genesis.get_hash());
        assert!(block.is_valid(TEST_DIFFICULTY));
    }

    #[test]
    fn test_random_transactions_are_well_formed() {
        let txs = random_transactions(20);
        assert_eq!(txs.len(), 20);
        assert!(txs.iter().all(|tx| tx.verify_structure().is_ok()));
    }
}
