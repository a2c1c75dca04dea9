use crate::core::merkle::{self, MerkleProof, MerkleTree};
use crate::core::proof_of_work::{PowOutcome, ProofOfWork, MAX_DIFFICULTY};
use crate::core::Transaction;
use crate::error::{LedgerError, Result};
use crate::utils::{current_timestamp, deserialize, serialize, sha256_hex};
use log::{error, info};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Previous-hash placeholder of the genesis block
pub const GENESIS_PREVIOUS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Merkle root carried by blocks without transactions
pub const EMPTY_MERKLE_ROOT: &str = GENESIS_PREVIOUS_HASH;

/// 2023-01-01T00:00:00Z, so every node derives the same genesis hash
pub const GENESIS_TIMESTAMP: u64 = 1_672_531_200;

static GENESIS_BLOCK: Lazy<Block> = Lazy::new(|| {
    let mut genesis = Block::new_with_timestamp(0, GENESIS_TIMESTAMP, GENESIS_PREVIOUS_HASH, vec![]);
    genesis.hash = genesis.compute_hash();
    genesis
});

// Field order here is the wire order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Block {
    index: u64,
    timestamp: u64,
    previous_hash: String,
    transactions: Vec<Transaction>,
    nonce: u64,
    hash: String,
    merkle_root: String,
}

impl Block {
    /// Unsealed block stamped with the current time; call [`Block::mine`] to seal it
    pub fn new(index: u64, previous_hash: &str, transactions: Vec<Transaction>) -> Result<Block> {
        Ok(Self::new_with_timestamp(
            index,
            current_timestamp()?,
            previous_hash,
            transactions,
        ))
    }

    pub fn new_with_timestamp(
        index: u64,
        timestamp: u64,
        previous_hash: &str,
        transactions: Vec<Transaction>,
    ) -> Block {
        let merkle_root = Self::calculate_merkle_root(&transactions);
        Block {
            index,
            timestamp,
            previous_hash: previous_hash.to_string(),
            transactions,
            nonce: 0,
            hash: String::new(),
            merkle_root,
        }
    }

    /// The fixed, deterministic first block
    pub fn genesis() -> Block {
        GENESIS_BLOCK.clone()
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0 && self.hash == GENESIS_BLOCK.hash
    }

    pub fn calculate_merkle_root(transactions: &[Transaction]) -> String {
        if transactions.is_empty() {
            return EMPTY_MERKLE_ROOT.to_string();
        }
        // build only fails on an empty list
        merkle::build(transactions).unwrap_or_else(|_| EMPTY_MERKLE_ROOT.to_string())
    }

    pub fn compute_hash(&self) -> String {
        self.hash_with_nonce(self.nonce)
    }

    pub(crate) fn hash_with_nonce(&self, nonce: u64) -> String {
        let preimage = format!(
            "{}{}{}{}{}",
            self.index, self.timestamp, self.previous_hash, self.merkle_root, nonce
        );
        sha256_hex(preimage.as_bytes())
    }

    /// Search for a nonce until the hash meets `difficulty`
    pub fn mine(&mut self, difficulty: usize) {
        if difficulty > MAX_DIFFICULTY {
            error!("Difficulty {difficulty} can never be met, not mining block {}", self.index);
            return;
        }
        while !self.mine_with_cancel(difficulty, || false).is_found() {
            // nonce space exhausted for this timestamp
            self.timestamp += 1;
            self.nonce = 0;
        }
    }

    /// Like [`Block::mine`], but gives up when `should_stop` returns true.
    ///
    /// The block is only modified when a nonce is found.
    pub fn mine_with_cancel<F>(&mut self, difficulty: usize, should_stop: F) -> PowOutcome
    where
        F: FnMut() -> bool,
    {
        let outcome = ProofOfWork::new(difficulty).run(self, should_stop);
        if let PowOutcome::Found {
            nonce,
            hash,
            attempts,
        } = &outcome
        {
            self.nonce = *nonce;
            self.hash = hash.clone();
            info!(
                "Proof-of-work completed for block {}: {hash} ({attempts} attempts)",
                self.index
            );
        }
        outcome
    }

    pub fn verify_merkle_root(&self) -> Result<()> {
        let calculated = Self::calculate_merkle_root(&self.transactions);
        if calculated != self.merkle_root {
            return Err(LedgerError::Validation(format!(
                "Merkle root mismatch in block {}: stored {}, calculated {calculated}",
                self.index, self.merkle_root
            )));
        }
        Ok(())
    }

    /// Merkle root, hash recomputation and difficulty
    pub fn validate(&self, difficulty: usize) -> Result<()> {
        self.verify_merkle_root()?;
        ProofOfWork::validate(self, difficulty)
    }

    pub fn is_valid(&self, difficulty: usize) -> bool {
        self.validate(difficulty).is_ok()
    }

    /// Generate a Merkle proof for a transaction in this block
    pub fn generate_merkle_proof(&self, transaction_index: usize) -> Result<MerkleProof> {
        MerkleTree::new(&self.transactions)?.proof(transaction_index)
    }

    pub fn verify_merkle_proof(&self, proof: &MerkleProof) -> bool {
        proof.merkle_root == self.merkle_root && proof.verify()
    }

    pub fn find_transaction(&self, id: &str) -> Option<&Transaction> {
        self.transactions.iter().find(|tx| tx.get_id() == id)
    }

    pub fn transaction_ids(&self) -> Vec<String> {
        self.transactions
            .iter()
            .map(|tx| tx.get_id().to_string())
            .collect()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        deserialize::<Block>(bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Block> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn get_index(&self) -> u64 {
        self.index
    }

    pub fn get_timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn get_previous_hash(&self) -> &str {
        self.previous_hash.as_str()
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn get_nonce(&self) -> u64 {
        self.nonce
    }

    pub fn get_hash(&self) -> &str {
        self.hash.as_str()
    }

    pub fn get_merkle_root(&self) -> &str {
        self.merkle_root.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sealed_tx(amount: u64, nonce: u64) -> Transaction {
        let mut tx =
            Transaction::new_with_timestamp("Alice", "Bob", amount, 1, nonce, 1_700_000_000)
                .unwrap();
        tx.seal();
        tx
    }

    fn mined_block() -> Block {
        let genesis = Block::genesis();
        let mut block = Block::new_with_timestamp(
            1,
            1_700_000_100,
            genesis.get_hash(),
            vec![sealed_tx(10, 1), sealed_tx(5, 2)],
        );
        block.mine(2);
        block
    }

    #[test]
    fn test_genesis_is_deterministic() {
        let a = Block::genesis();
        let b = Block::genesis();
        assert_eq!(a, b);
        assert_eq!(a.get_index(), 0);
        assert_eq!(a.get_previous_hash(), GENESIS_PREVIOUS_HASH);
        assert_eq!(a.get_merkle_root(), EMPTY_MERKLE_ROOT);
        assert_eq!(a.get_nonce(), 0);
        assert_eq!(a.get_hash(), a.compute_hash());
        assert!(a.is_genesis());
    }

    #[test]
    fn test_hash_preimage_format() {
        let block = Block::new_with_timestamp(3, 42, "prev", vec![]);
        let expected = sha256_hex(format!("342prev{EMPTY_MERKLE_ROOT}0").as_bytes());
        assert_eq!(block.compute_hash(), expected);
    }

    #[test]
    fn test_mined_block_is_valid() {
        let block = mined_block();
        assert!(block.get_hash().starts_with("00"));
        assert!(block.is_valid(2));
    }

    #[test]
    fn test_single_field_tampering_invalidates() {
        let block = mined_block();

        let mut tampered = block.clone();
        tampered.nonce += 1;
        assert!(matches!(
            tampered.validate(2),
            Err(LedgerError::HashMismatch { .. })
        ));

        let mut tampered = block.clone();
        tampered.timestamp += 1;
        assert!(!tampered.is_valid(2));

        let mut tampered = block.clone();
        tampered.previous_hash = "f".repeat(64);
        assert!(!tampered.is_valid(2));

        let mut tampered = block.clone();
        tampered.transactions[0] = sealed_tx(11, 1);
        assert!(matches!(
            tampered.validate(2),
            Err(LedgerError::Validation(_))
        ));

        let mut tampered = block;
        tampered.merkle_root = "e".repeat(64);
        assert!(!tampered.is_valid(2));
    }

    #[test]
    fn test_cancelled_mining_leaves_block_untouched() {
        let mut block = Block::new_with_timestamp(1, 1_700_000_100, "prev", vec![]);
        let before = block.clone();
        let outcome = block.mine_with_cancel(64, || true);
        assert!(matches!(outcome, PowOutcome::Cancelled { .. }));
        assert_eq!(block, before);
    }

    #[test]
    fn test_merkle_proof_against_block() {
        let block = mined_block();
        let proof = block.generate_merkle_proof(1).unwrap();
        assert!(block.verify_merkle_proof(&proof));
        assert!(!Block::genesis().verify_merkle_proof(&proof));
    }

    #[test]
    fn test_json_field_names() {
        let block = mined_block();
        let value: serde_json::Value = serde_json::from_str(&block.to_json().unwrap()).unwrap();
        for field in [
            "index",
            "timestamp",
            "previous_hash",
            "transactions",
            "nonce",
            "hash",
            "merkle_root",
        ] {
            assert!(value.get(field).is_some(), "missing field {field}");
        }
        assert_eq!(Block::deserialize(&block.serialize().unwrap()).unwrap(), block);
    }
}
