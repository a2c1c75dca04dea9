// This is the core chain implementation - the heart of my ledger
// The chain is an ordered list of blocks from genesis; every append and every
// chain replacement goes through one write lock that also guards the account
// state, so the state always matches the blocks it was derived from

use crate::core::validation::{validate_chain, validate_successor};
use crate::core::{Block, SignatureVerifier, StateManager, StateSnapshot, Transaction};
use crate::error::{LedgerError, Result};
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Lifecycle of the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStatus {
    /// Only the genesis block
    GenesisOnly,
    Extending,
    /// A longer candidate chain is being validated
    ForkPending,
}

/// Blocks past the common prefix on both sides of a chain replacement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForkChange {
    /// Number of leading blocks both chains share
    pub common_prefix: usize,
    pub abandoned: Vec<Block>,
    pub adopted: Vec<Block>,
}

impl ForkChange {
    /// Transactions that only the abandoned branch confirmed
    pub fn orphaned_transactions(&self) -> Vec<Transaction> {
        let adopted: HashSet<&str> = self
            .adopted
            .iter()
            .flat_map(|block| block.get_transactions())
            .map(Transaction::get_id)
            .collect();
        self.abandoned
            .iter()
            .flat_map(|block| block.get_transactions())
            .filter(|tx| !adopted.contains(tx.get_id()))
            .cloned()
            .collect()
    }

    pub fn adopted_transaction_ids(&self) -> Vec<String> {
        self.adopted
            .iter()
            .flat_map(|block| block.transaction_ids())
            .collect()
    }
}

struct ChainInner {
    blocks: Vec<Block>,
    state: StateManager,
    // transaction id -> index of the confirming block
    confirmed: HashMap<String, u64>,
    status: ChainStatus,
}

impl ChainInner {
    fn tip(&self) -> Result<&Block> {
        self.blocks
            .last()
            .ok_or_else(|| LedgerError::Internal("Chain has no genesis block".to_string()))
    }
}

// This is my main chain structure; it is shared between threads behind an Arc
pub struct Blockchain {
    inner: RwLock<ChainInner>,
    // Serializes appends and replacements, so a fork can be validated
    // without blocking readers
    writer: Mutex<()>,
    generation: AtomicU64,
    allocations: BTreeMap<String, u64>,
    verifier: Arc<dyn SignatureVerifier>,
}

impl Blockchain {
    /// Fresh chain holding only the genesis block
    pub fn new(
        allocations: BTreeMap<String, u64>,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Blockchain {
        let state = StateManager::from_allocations(&allocations, verifier.clone());
        info!(
            "Created chain from genesis with {} allocated accounts",
            allocations.len()
        );
        Blockchain {
            inner: RwLock::new(ChainInner {
                blocks: vec![Block::genesis()],
                state,
                confirmed: HashMap::new(),
                status: ChainStatus::GenesisOnly,
            }),
            writer: Mutex::new(()),
            generation: AtomicU64::new(0),
            allocations,
            verifier,
        }
    }

    /// Rehydrate stored blocks, resuming from `snapshot` when it matches them
    pub fn restore(
        blocks: Vec<Block>,
        snapshot: Option<&StateSnapshot>,
        allocations: BTreeMap<String, u64>,
        verifier: Arc<dyn SignatureVerifier>,
        difficulty: usize,
    ) -> Result<Blockchain> {
        validate_chain(&blocks, difficulty)?;

        let resumed = match snapshot {
            Some(snapshot) => match Self::resume_from_snapshot(&blocks, snapshot, verifier.clone())
            {
                Ok(state) => Some(state),
                Err(e) => {
                    warn!("Stored state snapshot is unusable ({e}), replaying from genesis");
                    None
                }
            },
            None => None,
        };
        let state = match resumed {
            Some(state) => state,
            None => StateManager::rebuild(&blocks, &allocations, verifier.clone())?,
        };

        info!("Restored chain with {} blocks", blocks.len());
        Ok(Blockchain {
            inner: RwLock::new(ChainInner {
                confirmed: index_transactions(&blocks),
                status: status_for(blocks.len()),
                blocks,
                state,
            }),
            writer: Mutex::new(()),
            generation: AtomicU64::new(0),
            allocations,
            verifier,
        })
    }

    fn resume_from_snapshot(
        blocks: &[Block],
        snapshot: &StateSnapshot,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Result<StateManager> {
        let tip_index = usize::try_from(snapshot.chain_tip_index)
            .map_err(|e| LedgerError::Validation(e.to_string()))?;
        let anchor = blocks.get(tip_index).ok_or_else(|| {
            LedgerError::Validation(format!(
                "Snapshot tip {} is beyond the stored chain",
                snapshot.chain_tip_index
            ))
        })?;
        if anchor.get_hash() != snapshot.tip_hash {
            return Err(LedgerError::Validation(format!(
                "Snapshot tip hash {} does not match block {}",
                snapshot.tip_hash, snapshot.chain_tip_index
            )));
        }

        let mut state = StateManager::from_snapshot(snapshot, verifier);
        for block in &blocks[tip_index + 1..] {
            state.apply_block(block)?;
        }
        debug!(
            "Resumed state from snapshot at {} and replayed {} blocks",
            tip_index,
            blocks.len() - tip_index - 1
        );
        Ok(state)
    }

    // Readers never fail: every mutation is applied in full or not at all,
    // so the data behind a poisoned lock is still consistent
    fn read_inner(&self) -> RwLockReadGuard<'_, ChainInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_inner(&self) -> Result<RwLockWriteGuard<'_, ChainInner>> {
        self.inner
            .write()
            .map_err(|e| LedgerError::Internal(format!("Chain lock poisoned: {e}")))
    }

    fn lock_writer(&self) -> Result<MutexGuard<'_, ()>> {
        self.writer
            .lock()
            .map_err(|e| LedgerError::Internal(format!("Chain writer lock poisoned: {e}")))
    }

    pub fn try_append(&self, block: Block, difficulty: usize) -> Result<()> {
        self.try_append_with(block, difficulty, |_, _| {})
    }

    /// Validate and append `block`, then run `on_commit` before the chain
    /// lock is released. A rejected block changes nothing.
    pub fn try_append_with<F>(&self, block: Block, difficulty: usize, on_commit: F) -> Result<()>
    where
        F: FnOnce(&Block, &StateManager),
    {
        let _writer = self.lock_writer()?;
        let mut inner = self.write_inner()?;

        let checked = validate_successor(inner.tip()?, &block, difficulty).and_then(|_| {
            match block
                .get_transactions()
                .iter()
                .find(|tx| inner.confirmed.contains_key(tx.get_id()))
            {
                Some(tx) => Err(LedgerError::DoubleSpend(format!(
                    "transaction {} is already confirmed",
                    tx.get_id()
                ))),
                None => Ok(()),
            }
        });
        if let Err(e) = checked.and_then(|_| inner.state.apply_block(&block)) {
            warn!("Rejected block {}: {e}", block.get_index());
            return Err(e);
        }

        for tx in block.get_transactions() {
            inner
                .confirmed
                .insert(tx.get_id().to_string(), block.get_index());
        }
        inner.status = ChainStatus::Extending;
        self.generation.fetch_add(1, Ordering::SeqCst);
        info!(
            "Appended block {} ({}) with {} transactions",
            block.get_index(),
            block.get_hash(),
            block.get_transactions().len()
        );
        on_commit(&block, &inner.state);
        inner.blocks.push(block);
        Ok(())
    }

    /// Longest valid chain wins; equal length keeps the chain seen first.
    ///
    /// Returns `Ok(true)` if the candidate replaced the current chain.
    pub fn resolve_fork(&self, candidate: &[Block], difficulty: usize) -> Result<bool> {
        self.resolve_fork_with(candidate.to_vec(), difficulty, |_, _| {})
            .map(|change| change.is_some())
    }

    /// Like [`Blockchain::resolve_fork`], running `on_commit` under the chain
    /// lock after a replacement
    pub fn resolve_fork_with<F>(
        &self,
        candidate: Vec<Block>,
        difficulty: usize,
        on_commit: F,
    ) -> Result<Option<ForkChange>>
    where
        F: FnOnce(&ForkChange, &StateManager),
    {
        let _writer = self.lock_writer()?;

        let current_len = self.len();
        if candidate.len() <= current_len {
            info!(
                "Keeping current chain: candidate has {} blocks, we have {current_len}",
                candidate.len()
            );
            return Ok(None);
        }

        self.write_inner()?.status = ChainStatus::ForkPending;
        let rebuilt = validate_chain(&candidate, difficulty).and_then(|_| {
            StateManager::rebuild(&candidate, &self.allocations, self.verifier.clone())
        });

        let mut inner = self.write_inner()?;
        let state = match rebuilt {
            Ok(state) => state,
            Err(e) => {
                inner.status = status_for(inner.blocks.len());
                warn!("Rejected candidate chain of {} blocks: {e}", candidate.len());
                return Err(e);
            }
        };

        let common_prefix = inner
            .blocks
            .iter()
            .zip(candidate.iter())
            .take_while(|(ours, theirs)| ours.get_hash() == theirs.get_hash())
            .count();
        let change = ForkChange {
            common_prefix,
            abandoned: inner.blocks[common_prefix..].to_vec(),
            adopted: candidate[common_prefix..].to_vec(),
        };

        inner.confirmed = index_transactions(&candidate);
        inner.status = status_for(candidate.len());
        inner.blocks = candidate;
        inner.state = state;
        self.generation.fetch_add(1, Ordering::SeqCst);
        info!(
            "Replaced chain: {} blocks abandoned, {} adopted, new height {}",
            change.abandoned.len(),
            change.adopted.len(),
            inner.blocks.len() - 1
        );
        on_commit(&change, &inner.state);
        Ok(Some(change))
    }

    pub fn is_chain_valid(&self, difficulty: usize) -> bool {
        validate_chain(&self.read_inner().blocks, difficulty).is_ok()
    }

    /// Full audit: linkage and proof-of-work of every block, plus a replay
    /// from genesis that must reproduce the live account state
    pub fn audit(&self, difficulty: usize) -> Result<()> {
        let inner = self.read_inner();
        validate_chain(&inner.blocks, difficulty)?;
        let replayed =
            StateManager::rebuild(&inner.blocks, &self.allocations, self.verifier.clone())?;
        if replayed.accounts() != inner.state.accounts() {
            return Err(LedgerError::Internal(
                "Replayed state diverges from the live state".to_string(),
            ));
        }
        Ok(())
    }

    pub fn get_latest(&self) -> Block {
        let inner = self.read_inner();
        // the genesis block is never removed
        inner.blocks.last().cloned().unwrap_or_else(Block::genesis)
    }

    /// Index of the tip block
    pub fn height(&self) -> u64 {
        self.get_latest().get_index()
    }

    pub fn len(&self) -> usize {
        self.read_inner().blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn status(&self) -> ChainStatus {
        self.read_inner().status
    }

    /// Bumped on every append or replacement
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn blocks(&self) -> Vec<Block> {
        self.read_inner().blocks.clone()
    }

    pub fn get_block_by_index(&self, index: u64) -> Option<Block> {
        let position = usize::try_from(index).ok()?;
        self.read_inner().blocks.get(position).cloned()
    }

    pub fn get_block_by_hash(&self, hash: &str) -> Option<Block> {
        self.read_inner()
            .blocks
            .iter()
            .find(|block| block.get_hash() == hash)
            .cloned()
    }

    /// Confirmed transaction and the index of the block holding it
    pub fn find_transaction(&self, id: &str) -> Option<(Transaction, u64)> {
        let inner = self.read_inner();
        let index = *inner.confirmed.get(id)?;
        let block = inner.blocks.get(usize::try_from(index).ok()?)?;
        block.find_transaction(id).map(|tx| (tx.clone(), index))
    }

    pub fn get_balance(&self, address: &str) -> u64 {
        self.read_inner().state.get_balance(address)
    }

    pub fn get_nonce(&self, address: &str) -> u64 {
        self.read_inner().state.get_nonce(address)
    }

    /// Copy of the account state
    pub fn state(&self) -> StateManager {
        self.read_inner().state.clone()
    }

    /// Tip and account state read under one lock
    pub fn tip_and_state(&self) -> (Block, StateManager) {
        let inner = self.read_inner();
        let tip = inner.blocks.last().cloned().unwrap_or_else(Block::genesis);
        (tip, inner.state.clone())
    }

    pub fn with_state<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&StateManager) -> R,
    {
        f(&self.read_inner().state)
    }

    /// Blocks and matching state snapshot read under one lock
    pub fn export(&self) -> (Vec<Block>, StateSnapshot) {
        let inner = self.read_inner();
        let tip = inner.blocks.last().cloned().unwrap_or_else(Block::genesis);
        let snapshot = inner.state.snapshot(tip.get_index(), tip.get_hash());
        (inner.blocks.clone(), snapshot)
    }

    pub fn get_allocations(&self) -> &BTreeMap<String, u64> {
        &self.allocations
    }

    pub fn verifier(&self) -> Arc<dyn SignatureVerifier> {
        self.verifier.clone()
    }
}

fn status_for(len: usize) -> ChainStatus {
    if len <= 1 {
        ChainStatus::GenesisOnly
    } else {
        ChainStatus::Extending
    }
}

fn index_transactions(blocks: &[Block]) -> HashMap<String, u64> {
    blocks
        .iter()
        .flat_map(|block| {
            block
                .get_transactions()
                .iter()
                .map(move |tx| (tx.get_id().to_string(), block.get_index()))
        })
        .collect()
}
