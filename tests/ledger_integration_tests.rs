//! Ledger integration tests
//!
//! Drives the ledger through its public surface: the node boundary, the
//! chain, the state manager and the sled store.

use ledger_core::config::LedgerConfig;
use ledger_core::core::validation::validate_chain;
use ledger_core::core::{merkle, ProofOfWork};
use ledger_core::{
    Block, ErrorKind, LedgerError, Message, Node, PowOutcome, StateManager, Transaction,
    TransactionLocation,
};
use rand::Rng;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

const TX_TIMESTAMP: u64 = 1_700_000_000;

fn config(difficulty: usize, accounts: &[(&str, u64)]) -> LedgerConfig {
    let mut config = LedgerConfig::default();
    config.difficulty = difficulty;
    config.mempool.min_fee = 0;
    config.genesis.allocations = accounts
        .iter()
        .map(|(address, balance)| (address.to_string(), *balance))
        .collect::<BTreeMap<_, _>>();
    config
}

fn sealed(sender: &str, receiver: &str, amount: u64, fee: u64, nonce: u64) -> Transaction {
    let mut tx =
        Transaction::new_with_timestamp(sender, receiver, amount, fee, nonce, TX_TIMESTAMP)
            .unwrap();
    tx.seal();
    tx
}

fn mined_after(prev: &Block, transactions: Vec<Transaction>, difficulty: usize) -> Block {
    let mut block = Block::new_with_timestamp(
        prev.get_index() + 1,
        prev.get_timestamp() + 1,
        prev.get_hash(),
        transactions,
    );
    block.mine(difficulty);
    block
}

fn stored_config(dir: &Path, accounts: &[(&str, u64)]) -> LedgerConfig {
    let mut config = config(1, accounts);
    config.storage.data_dir = dir.join("ledger");
    config
}

#[test]
fn test_transfer_end_to_end() {
    let node = Node::new(config(2, &[("Alice", 100)])).unwrap();
    let events = node.subscribe();

    let id = node.submit_transaction(sealed("Alice", "Bob", 10, 1, 1)).unwrap();
    let block = node.mine_once().unwrap().unwrap();

    assert!(block.get_hash().starts_with("00"));
    assert_eq!(block.get_index(), 1);
    assert_eq!(node.get_balance("Alice"), 89);
    assert_eq!(node.get_balance("Bob"), 10);
    assert_eq!(node.get_nonce("Alice"), 1);
    assert!(node.get_pending_transactions(10).is_empty());
    assert!(matches!(
        node.get_transaction_by_hash(&id).unwrap(),
        TransactionLocation::Confirmed { block_index: 1, .. }
    ));
    assert_eq!(events.try_recv().unwrap().tip(), &block);
    node.chain().audit(2).unwrap();
}

#[test]
fn test_longer_competing_chain_replaces_ours() {
    let node_a = Node::new(config(1, &[("Alice", 100)])).unwrap();
    let node_b = Node::new(config(1, &[("Alice", 100)])).unwrap();

    let to_bob = sealed("Alice", "Bob", 10, 1, 1);
    node_a.submit_transaction(to_bob.clone()).unwrap();
    node_a.mine_once().unwrap().unwrap();

    node_b.submit_transaction(sealed("Alice", "Carol", 20, 0, 1)).unwrap();
    node_b.mine_once().unwrap().unwrap();
    node_b.mine_once().unwrap().unwrap();
    let theirs = node_b.chain().blocks();
    assert_eq!(theirs.len(), 3);

    assert!(node_a.submit_chain(theirs.clone()).unwrap());
    assert_eq!(node_a.chain().blocks(), theirs);
    assert_eq!(node_a.get_balance("Alice"), 80);
    assert_eq!(node_a.get_balance("Bob"), 0);
    assert_eq!(node_a.get_balance("Carol"), 20);
    // Alice's nonce 1 is taken on the adopted branch
    assert!(!node_a.mempool().contains(to_bob.get_id()));
    node_a.chain().audit(1).unwrap();

    // Same length again is ignored; the first chain seen stays
    assert!(!node_a.submit_chain(theirs[..2].to_vec()).unwrap());
    assert_eq!(node_a.chain().len(), 3);
}

#[test]
fn test_double_spend_never_confirms_twice() {
    let node = Node::new(config(1, &[("Alice", 15)])).unwrap();
    let to_bob = sealed("Alice", "Bob", 10, 2, 1);
    let to_carol = sealed("Alice", "Carol", 10, 1, 1);
    node.submit_transaction(to_bob.clone()).unwrap();
    node.submit_transaction(to_carol.clone()).unwrap();

    let block = node.mine_once().unwrap().unwrap();
    assert_eq!(block.get_transactions(), &[to_bob.clone()]);
    assert_eq!(node.get_balance("Alice"), 3);
    assert_eq!(node.get_balance("Bob"), 10);
    assert_eq!(node.get_balance("Carol"), 0);
    assert!(node.get_pending_transactions(10).is_empty());

    // A block carrying both spends is rejected whole
    let fresh = Node::new(config(1, &[("Alice", 15)])).unwrap();
    let genesis = fresh.chain().get_latest();
    let both = mined_after(&genesis, vec![to_bob, to_carol], 1);
    let err = fresh.submit_block(both).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);
    assert_eq!(fresh.chain().len(), 1);
    assert_eq!(fresh.get_balance("Alice"), 15);
}

#[test]
fn test_confirmed_spend_blocks_readmission_of_the_other() {
    let node = Node::new(config(1, &[("Alice", 50)])).unwrap();
    let to_bob = sealed("Alice", "Bob", 50, 0, 1);
    let to_carol = sealed("Alice", "Carol", 50, 0, 1);
    node.submit_transaction(to_bob.clone()).unwrap();
    node.submit_transaction(to_carol.clone()).unwrap();

    let block = node.mine_once().unwrap().unwrap();
    assert_eq!(block.get_transactions(), &[to_bob]);
    assert_eq!(node.get_balance("Alice"), 0);
    assert_eq!(node.get_balance("Bob"), 50);

    let err = node.submit_transaction(to_carol.clone()).unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientBalance {
            required: 50,
            available: 0,
            ..
        }
    ));

    // The same spend inside a block is refused too
    let smuggled = mined_after(&block, vec![to_carol], 1);
    let err = node.submit_block(smuggled).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);
    assert_eq!(node.get_balance("Carol"), 0);
}

#[test]
fn test_competing_appends_commit_exactly_one() {
    let node = Node::new(config(1, &[("Alice", 100)])).unwrap();
    let genesis = node.chain().get_latest();
    let candidates: Vec<Block> = (0..8)
        .map(|i| {
            let mut block = Block::new_with_timestamp(
                1,
                genesis.get_timestamp() + 1 + i,
                genesis.get_hash(),
                vec![],
            );
            block.mine(1);
            block
        })
        .collect();

    let chain = node.chain();
    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = candidates
            .iter()
            .cloned()
            .map(|block| {
                let chain = chain.clone();
                scope.spawn(move || chain.try_append(block, 1))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| e.kind() == ErrorKind::Consensus));
    assert_eq!(chain.len(), 2);
    assert!(candidates.contains(&chain.get_latest()));
    chain.audit(1).unwrap();
}

#[test]
fn test_miner_moves_to_a_tip_that_lands_first() {
    let node = Node::new(config(3, &[("Alice", 100)])).unwrap();
    let external = mined_after(&node.chain().get_latest(), vec![], 3);

    let (mined, submitted) = thread::scope(|scope| {
        let miner = scope.spawn(|| node.mine_once());
        let submitted = node.submit_block(external.clone());
        (miner.join().unwrap(), submitted)
    });
    let mined = mined.unwrap().unwrap();

    match submitted {
        Ok(()) => {
            assert_eq!(mined.get_index(), 2);
            assert_eq!(mined.get_previous_hash(), external.get_hash());
        }
        Err(e) => {
            assert_eq!(e.kind(), ErrorKind::Consensus);
            assert_eq!(mined.get_index(), 1);
        }
    }
    assert_eq!(node.chain().get_latest(), mined);
    node.chain().audit(3).unwrap();
}

#[test]
fn test_merkle_proofs_for_random_blocks() {
    let mut rng = rand::thread_rng();
    for _ in 0..10 {
        let count = rng.gen_range(1..20);
        let transactions: Vec<Transaction> = (0..count)
            .map(|i| {
                let sender = format!("acct{}", rng.gen_range(0..50));
                sealed(&sender, "sink", rng.gen_range(1..1_000), 1, i + 1)
            })
            .collect();
        let block = Block::new_with_timestamp(1, TX_TIMESTAMP, &"0".repeat(64), transactions);

        for (index, tx) in block.get_transactions().iter().enumerate() {
            let proof = block.generate_merkle_proof(index).unwrap();
            assert!(block.verify_merkle_proof(&proof));

            let (path, found) = merkle::prove(block.get_transactions(), tx).unwrap();
            assert_eq!(path, proof.proof_path);
            assert!(merkle::verify(block.get_merkle_root(), tx, &path, found));
        }

        let mut forged = block.generate_merkle_proof(0).unwrap();
        forged.transaction_hash = "f".repeat(64);
        assert!(!block.verify_merkle_proof(&forged));
    }
    assert!(merkle::build(&[]).is_err());
}

#[test]
fn test_tampered_transaction_breaks_chain() {
    let node = Node::new(config(1, &[("Alice", 100)])).unwrap();
    node.submit_transaction(sealed("Alice", "Bob", 10, 1, 1)).unwrap();
    node.mine_once().unwrap().unwrap();
    node.mine_once().unwrap().unwrap();
    let mut blocks = node.chain().blocks();
    validate_chain(&blocks, 1).unwrap();

    let mut raw: serde_json::Value = serde_json::from_str(&blocks[1].to_json().unwrap()).unwrap();
    raw["transactions"][0]["amount"] = serde_json::json!(90);
    blocks[1] = Block::from_json(&raw.to_string()).unwrap();
    assert!(validate_chain(&blocks, 1).is_err());

    let mut raw: serde_json::Value = serde_json::from_str(&blocks[2].to_json().unwrap()).unwrap();
    raw["previous_hash"] = serde_json::json!("a".repeat(64));
    let relinked = Block::from_json(&raw.to_string()).unwrap();
    assert!(relinked.validate(1).is_err());
}

#[test]
fn test_rollback_restores_previous_state() {
    let allocations: BTreeMap<String, u64> = [("Alice".to_string(), 50)].into_iter().collect();
    let node = Node::new(config(1, &[("Alice", 50)])).unwrap();
    let mut state = StateManager::from_allocations(&allocations, node.chain().verifier());
    let before = state.accounts().clone();

    let block = mined_after(
        &Block::genesis(),
        vec![
            sealed("Alice", "Bob", 20, 2, 1),
            sealed("Bob", "Carol", 5, 1, 1),
            sealed("Alice", "Alice", 3, 1, 2),
        ],
        1,
    );
    state.apply_block(&block).unwrap();
    assert_eq!(state.get_balance("Alice"), 27);
    assert_eq!(state.get_balance("Bob"), 14);
    assert_eq!(state.get_balance("Carol"), 5);

    state.rollback_block(&block).unwrap();
    assert_eq!(state.accounts(), &before);
}

#[test]
fn test_mempool_admission_rules() {
    let mut cfg = config(1, &[("Alice", 100)]);
    cfg.mempool.capacity = 2;
    cfg.mempool.min_fee = 1;
    let node = Node::new(cfg).unwrap();

    let first = sealed("Alice", "Bob", 10, 1, 1);
    node.submit_transaction(first.clone()).unwrap();
    assert_eq!(
        node.submit_transaction(first).unwrap_err().kind(),
        ErrorKind::Duplicate
    );
    assert_eq!(
        node.submit_transaction(sealed("Alice", "Bob", 10, 0, 2))
            .unwrap_err()
            .kind(),
        ErrorKind::Validation
    );
    assert!(matches!(
        node.submit_transaction(sealed("Alice", "Bob", 100, 1, 2)),
        Err(LedgerError::InsufficientBalance { required: 101, .. })
    ));

    let mut forged =
        Transaction::new_with_timestamp("Alice", "Bob", 5, 1, 2, TX_TIMESTAMP).unwrap();
    forged.sign(&ledger_core::new_key_pair().unwrap()).unwrap();
    assert_eq!(
        node.submit_transaction(forged).unwrap_err().kind(),
        ErrorKind::Validation
    );

    node.submit_transaction(sealed("Alice", "Carol", 5, 3, 2)).unwrap();
    assert_eq!(
        node.submit_transaction(sealed("Alice", "Dave", 5, 9, 3))
            .unwrap_err()
            .kind(),
        ErrorKind::Capacity
    );
    let pending = node.get_pending_transactions(10);
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].get_receiver(), "Carol");
}

#[test]
fn test_concurrent_admission_of_one_id() {
    let node = Arc::new(Node::new(config(1, &[("Alice", 100)])).unwrap());
    let tx = sealed("Alice", "Bob", 10, 1, 1);

    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let node = node.clone();
                let tx = tx.clone();
                scope.spawn(move || node.submit_transaction(tx))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| e.kind() == ErrorKind::Duplicate));
}

#[test]
fn test_restart_restores_chain_and_state() {
    let dir = tempdir().unwrap();
    let tip = {
        let node = Node::open(stored_config(dir.path(), &[("Alice", 100)])).unwrap();
        node.submit_transaction(sealed("Alice", "Bob", 10, 1, 1)).unwrap();
        node.mine_once().unwrap().unwrap();
        node.submit_transaction(sealed("Bob", "Carol", 4, 1, 1)).unwrap();
        node.mine_once().unwrap().unwrap()
    };

    let node = Node::open(stored_config(dir.path(), &[("Alice", 100)])).unwrap();
    assert_eq!(node.chain().get_latest(), tip);
    assert_eq!(node.get_balance("Alice"), 89);
    assert_eq!(node.get_balance("Bob"), 5);
    assert_eq!(node.get_balance("Carol"), 4);
    assert_eq!(node.get_nonce("Bob"), 1);
    node.chain().audit(1).unwrap();
}

#[test]
fn test_message_round_trip_through_node() {
    let node = Node::new(config(1, &[("Alice", 100)])).unwrap();
    let raw = Message::Transaction(sealed("Alice", "Bob", 10, 1, 1))
        .to_json()
        .unwrap();
    assert!(node.handle_message(&raw).is_success());

    let next = mined_after(&node.chain().get_latest(), vec![], 1);
    let raw = Message::Block(next).to_json().unwrap();
    let response = node.handle_message(&raw);
    assert!(response.is_success(), "{}", response.message);
    assert_eq!(node.chain().height(), 1);

    let response = node.handle_message(r#"{"type":"chain_request"}"#);
    let blocks: Vec<Block> = serde_json::from_value(response.data.unwrap()).unwrap();
    assert_eq!(blocks, node.chain().blocks());
    assert_eq!(node.request_chain_snapshot().unwrap().len(), 2);

    let response = node.handle_message(r#"{"type":"gossip","data":null}"#);
    assert_eq!(response.code.as_deref(), Some("validation_error"));
}

#[test]
fn test_mining_can_be_cancelled() {
    let mut block = Block::new_with_timestamp(1, TX_TIMESTAMP, &"0".repeat(64), vec![]);
    let mut polls = 0;
    let outcome = ProofOfWork::new(64).run(&block, || {
        polls += 1;
        polls > 2
    });
    assert!(matches!(outcome, PowOutcome::Cancelled { .. }));
    assert!(!block.mine_with_cancel(64, || true).is_found());

    let node = Node::new(config(64, &[])).unwrap();
    let token = node.cancel_token();
    let mined = thread::scope(|scope| {
        let handle = scope.spawn(|| node.mine_once());
        thread::sleep(Duration::from_millis(50));
        token.cancel();
        handle.join().unwrap()
    });
    assert_eq!(mined.unwrap(), None);
    assert_eq!(node.chain().height(), 0);
}
