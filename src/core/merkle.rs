use crate::core::Transaction;
use crate::error::{LedgerError, Result};
use crate::utils::sha256_hex;
use serde::{Deserialize, Serialize};

/// Merkle tree over transaction content hashes
///
/// Leaves are recomputed content hashes, never the stored ids, so a tampered
/// transaction changes the root. Parents hash the concatenation of the two
/// child hex digests; an odd level duplicates its last hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleTree {
    // levels[0] holds the leaves, the last level holds the root
    levels: Vec<Vec<String>>,
}

/// Merkle proof for transaction verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Content hash being proven
    pub transaction_hash: String,
    pub merkle_root: String,
    /// Sibling hashes bottom-up
    pub proof_path: Vec<String>,
    /// Position of the transaction in the block
    pub transaction_index: usize,
}

impl MerkleTree {
    /// Create a new Merkle tree from a list of transactions
    pub fn new(transactions: &[Transaction]) -> Result<Self> {
        let leaves: Vec<String> = transactions.iter().map(Transaction::compute_id).collect();
        Self::from_hashes(&leaves)
    }

    pub fn from_hashes(hashes: &[String]) -> Result<Self> {
        if hashes.is_empty() {
            return Err(LedgerError::Validation(
                "Cannot create Merkle tree from empty transaction list".to_string(),
            ));
        }

        let mut levels = vec![hashes.to_vec()];
        while let Some(level) = levels.last().filter(|level| level.len() > 1) {
            let parents = level
                .chunks(2)
                .map(|pair| {
                    let left = &pair[0];
                    hash_pair(left, pair.get(1).unwrap_or(left))
                })
                .collect();
            levels.push(parents);
        }

        Ok(MerkleTree { levels })
    }

    pub fn root(&self) -> &str {
        self.levels
            .last()
            .and_then(|level| level.first())
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn levels(&self) -> &[Vec<String>] {
        &self.levels
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map(Vec::len).unwrap_or(0)
    }

    /// Sibling hashes from the leaf at `index` up to (excluding) the root
    pub fn proof(&self, index: usize) -> Result<MerkleProof> {
        let leaf_count = self.leaf_count();
        if index >= leaf_count {
            return Err(LedgerError::NotFound(format!(
                "Transaction index {index} out of bounds ({leaf_count} leaves)"
            )));
        }

        let mut proof_path = Vec::with_capacity(self.levels.len().saturating_sub(1));
        let mut position = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = if position % 2 == 0 {
                // the last node of an odd level pairs with itself
                level.get(position + 1).unwrap_or(&level[position])
            } else {
                &level[position - 1]
            };
            proof_path.push(sibling.clone());
            position /= 2;
        }

        Ok(MerkleProof {
            transaction_hash: self.levels[0][index].clone(),
            merkle_root: self.root().to_string(),
            proof_path,
            transaction_index: index,
        })
    }
}

impl MerkleProof {
    pub fn verify(&self) -> bool {
        verify_hash(
            &self.merkle_root,
            &self.transaction_hash,
            &self.proof_path,
            self.transaction_index,
        )
    }
}

/// Merkle root of the transactions
pub fn build(transactions: &[Transaction]) -> Result<String> {
    Ok(MerkleTree::new(transactions)?.root().to_string())
}

/// Proof path and index for the first occurrence of `target`
pub fn prove(transactions: &[Transaction], target: &Transaction) -> Result<(Vec<String>, usize)> {
    let index = transactions
        .iter()
        .position(|tx| tx == target)
        .ok_or_else(|| {
            LedgerError::NotFound(format!("Transaction {} is not in the set", target.get_id()))
        })?;
    let proof = MerkleTree::new(transactions)?.proof(index)?;
    Ok((proof.proof_path, index))
}

pub fn verify(root: &str, target: &Transaction, path: &[String], index: usize) -> bool {
    verify_hash(root, &target.compute_id(), path, index)
}

pub fn verify_hash(root: &str, leaf_hash: &str, path: &[String], index: usize) -> bool {
    let mut current = leaf_hash.to_string();
    let mut position = index;
    for sibling in path {
        current = if position % 2 == 0 {
            hash_pair(&current, sibling)
        } else {
            hash_pair(sibling, &current)
        };
        position /= 2;
    }
    current == root
}

fn hash_pair(left: &str, right: &str) -> String {
    sha256_hex(format!("{left}{right}").as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testnet::test_utils::random_transactions;

    fn transactions(count: u64) -> Vec<Transaction> {
        (1..=count)
            .map(|i| {
                let mut tx =
                    Transaction::new_with_timestamp("Alice", "Bob", i, 1, i, 1_700_000_000)
                        .unwrap();
                tx.seal();
                tx
            })
            .collect()
    }

    #[test]
    fn test_empty_input_is_rejected() {
        assert!(matches!(build(&[]), Err(LedgerError::Validation(_))));
    }

    #[test]
    fn test_single_leaf_is_root() {
        let txs = transactions(1);
        assert_eq!(build(&txs).unwrap(), txs[0].compute_id());

        let (path, index) = prove(&txs, &txs[0]).unwrap();
        assert!(path.is_empty());
        assert!(verify(&build(&txs).unwrap(), &txs[0], &path, index));
    }

    #[test]
    fn test_odd_level_duplicates_last() {
        let txs = transactions(3);
        let h: Vec<String> = txs.iter().map(Transaction::compute_id).collect();
        let left = hash_pair(&h[0], &h[1]);
        let right = hash_pair(&h[2], &h[2]);
        assert_eq!(build(&txs).unwrap(), hash_pair(&left, &right));
    }

    #[test]
    fn test_prove_and_verify_every_leaf() {
        for count in 1..=9 {
            let txs = transactions(count);
            let root = build(&txs).unwrap();
            for tx in &txs {
                let (path, index) = prove(&txs, tx).unwrap();
                assert!(verify(&root, tx, &path, index), "count {count}");
            }
        }
    }

    #[test]
    fn test_random_transaction_sets() {
        for count in [1, 2, 7, 16, 33] {
            let txs = random_transactions(count);
            let tree = MerkleTree::new(&txs).unwrap();
            assert_eq!(tree.root(), build(&txs).unwrap());
            for (position, tx) in txs.iter().enumerate() {
                assert!(tree.proof(position).unwrap().verify());
                let (path, index) = prove(&txs, tx).unwrap();
                assert_eq!(index, position);
                assert!(verify(tree.root(), tx, &path, index));
            }
        }
    }

    #[test]
    fn test_wrong_index_or_root_fails() {
        let txs = transactions(4);
        let root = build(&txs).unwrap();
        let (path, index) = prove(&txs, &txs[1]).unwrap();
        assert!(!verify(&root, &txs[1], &path, index + 1));
        assert!(!verify(&"0".repeat(64), &txs[1], &path, index));
        assert!(!verify(&root, &txs[2], &path, index));
    }

    #[test]
    fn test_absent_target_not_found() {
        let txs = transactions(3);
        let outsider = transactions(5).pop().unwrap();
        assert!(matches!(
            prove(&txs, &outsider),
            Err(LedgerError::NotFound(_))
        ));
    }

    #[test]
    fn test_tree_levels_and_proof_struct() {
        let txs = transactions(5);
        let tree = MerkleTree::new(&txs).unwrap();
        assert_eq!(tree.leaf_count(), 5);
        assert_eq!(
            tree.levels().iter().map(Vec::len).collect::<Vec<_>>(),
            vec![5, 3, 2, 1]
        );

        let proof = tree.proof(4).unwrap();
        assert_eq!(proof.proof_path.len(), 3);
        assert!(proof.verify());
        assert!(tree.proof(5).is_err());
    }
}
