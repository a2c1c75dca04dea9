use crate::config::MempoolConfig;
use crate::core::{SignatureVerifier, StateManager, Transaction};
use crate::error::{LedgerError, Result};
use crate::utils::current_timestamp;
use log::{debug, info, warn};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A pending transaction with its admission metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MempoolEntry {
    transaction: Transaction,
    admitted_at: u64,
    sequence: u64,
    size: usize,
}

impl MempoolEntry {
    pub fn get_transaction(&self) -> &Transaction {
        &self.transaction
    }

    pub fn get_admitted_at(&self) -> u64 {
        self.admitted_at
    }

    pub fn get_sequence(&self) -> u64 {
        self.sequence
    }

    pub fn get_size(&self) -> usize {
        self.size
    }

    /// Fee per byte, for display only; ordering never uses floats
    pub fn priority(&self) -> f64 {
        self.transaction.get_fee() as f64 / self.size.max(1) as f64
    }

    /// Higher fee per byte first, then earlier admission.
    ///
    /// Compares `fee_a / size_a` with `fee_b / size_b` by cross-multiplying.
    pub fn cmp_priority(&self, other: &MempoolEntry) -> Ordering {
        let ours = u128::from(self.transaction.get_fee()) * other.size.max(1) as u128;
        let theirs = u128::from(other.transaction.get_fee()) * self.size.max(1) as u128;
        theirs
            .cmp(&ours)
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}

#[derive(Default)]
struct PoolInner {
    entries: HashMap<String, MempoolEntry>,
    next_sequence: u64,
}

/// Capacity-bounded pool of pending transactions keyed by id
pub struct Mempool {
    inner: RwLock<PoolInner>,
    capacity: usize,
    min_fee: u64,
    verifier: Arc<dyn SignatureVerifier>,
}

impl Mempool {
    pub fn new(config: &MempoolConfig, verifier: Arc<dyn SignatureVerifier>) -> Mempool {
        Mempool {
            inner: RwLock::new(PoolInner::default()),
            capacity: config.capacity,
            min_fee: config.min_fee,
            verifier,
        }
    }

    pub fn add(&self, tx: Transaction, sender_balance: u64) -> Result<String> {
        self.add_at(tx, sender_balance, current_timestamp()?)
    }

    /// Admit `tx` given the sender's confirmed balance.
    ///
    /// Rejections in order: duplicate id, capacity, structure, fee below the
    /// minimum, signature, balance. Checks and insert share one write lock.
    pub fn add_at(&self, tx: Transaction, sender_balance: u64, now: u64) -> Result<String> {
        let mut pool = self
            .inner
            .write()
            .map_err(|e| LedgerError::Internal(format!("Mempool lock poisoned: {e}")))?;

        let admitted = self.check_admission(&pool, &tx, sender_balance);
        if let Err(e) = admitted {
            warn!("Rejected transaction {}: {e}", tx.get_id());
            return Err(e);
        }

        let id = tx.get_id().to_string();
        let sequence = pool.next_sequence;
        pool.next_sequence += 1;
        let entry = MempoolEntry {
            size: tx.serialized_size(),
            transaction: tx,
            admitted_at: now,
            sequence,
        };
        debug!(
            "Admitted transaction {id} (fee {}, {} bytes)",
            entry.transaction.get_fee(),
            entry.size
        );
        pool.entries.insert(id.clone(), entry);
        Ok(id)
    }

    fn check_admission(&self, pool: &PoolInner, tx: &Transaction, sender_balance: u64) -> Result<()> {
        if pool.entries.contains_key(tx.get_id()) {
            return Err(LedgerError::Duplicate(format!(
                "transaction {} is already pending",
                tx.get_id()
            )));
        }
        if pool.entries.len() >= self.capacity {
            return Err(LedgerError::MempoolFull {
                capacity: self.capacity,
            });
        }
        tx.verify_structure()?;
        if tx.get_fee() < self.min_fee {
            return Err(LedgerError::Validation(format!(
                "Fee {} is below the minimum of {}",
                tx.get_fee(),
                self.min_fee
            )));
        }
        if !self.verifier.verify(tx) {
            return Err(LedgerError::Validation(format!(
                "Invalid signature on transaction {}",
                tx.get_id()
            )));
        }
        let required = tx.total_cost()?;
        if sender_balance < required {
            return Err(LedgerError::InsufficientBalance {
                address: tx.get_sender().to_string(),
                required,
                available: sender_balance,
            });
        }
        Ok(())
    }

    /// Up to `max_count` transactions in priority order
    pub fn get_pending(&self, max_count: usize) -> Vec<Transaction> {
        self.sorted_entries()
            .into_iter()
            .take(max_count)
            .map(|entry| entry.transaction)
            .collect()
    }

    pub fn sorted_entries(&self) -> Vec<MempoolEntry> {
        match self.inner.read() {
            Ok(pool) => {
                let mut entries: Vec<MempoolEntry> = pool.entries.values().cloned().collect();
                entries.sort_by(MempoolEntry::cmp_priority);
                entries
            }
            Err(_) => {
                log::error!("Failed to acquire read lock on mempool");
                vec![]
            }
        }
    }

    /// Drop transactions confirmed in a block; returns how many were pending
    pub fn evict_confirmed<S: AsRef<str>>(&self, ids: &[S]) -> usize {
        match self.inner.write() {
            Ok(mut pool) => {
                let mut removed = 0;
                for id in ids {
                    let id: &str = id.as_ref();
                    if pool.entries.remove(id).is_some() {
                        removed += 1;
                    }
                }
                removed
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on mempool");
                0
            }
        }
    }

    /// Drop entries admitted more than `ttl` seconds before `now`
    pub fn expire(&self, now: u64, ttl: u64) -> usize {
        self.remove_where(|entry| now.saturating_sub(entry.admitted_at) > ttl, "expired")
    }

    /// Drop entries the confirmed state makes impossible: replayed nonces
    /// and senders who can no longer cover amount plus fee
    pub fn prune_invalid(&self, state: &StateManager) -> usize {
        self.remove_where(
            |entry| {
                let tx = &entry.transaction;
                let stale = tx.get_nonce() <= state.get_nonce(tx.get_sender());
                let unaffordable = tx
                    .total_cost()
                    .map(|cost| cost > state.get_balance(tx.get_sender()))
                    .unwrap_or(true);
                stale || unaffordable
            },
            "invalidated",
        )
    }

    fn remove_where<F>(&self, predicate: F, reason: &str) -> usize
    where
        F: Fn(&MempoolEntry) -> bool,
    {
        match self.inner.write() {
            Ok(mut pool) => {
                let before = pool.entries.len();
                pool.entries.retain(|_, entry| !predicate(entry));
                let removed = before - pool.entries.len();
                if removed > 0 {
                    info!("Removed {removed} {reason} transactions from the mempool");
                }
                removed
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on mempool");
                0
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Transaction> {
        match self.inner.read() {
            Ok(pool) => pool.entries.get(id).map(|entry| entry.transaction.clone()),
            Err(_) => {
                log::error!("Failed to acquire read lock on mempool");
                None
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        match self.inner.read() {
            Ok(pool) => pool.entries.contains_key(id),
            Err(_) => {
                log::error!("Failed to acquire read lock on mempool");
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        match self.inner.read() {
            Ok(pool) => pool.entries.len(),
            Err(_) => {
                log::error!("Failed to acquire read lock on mempool");
                0
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn min_fee(&self) -> u64 {
        self.min_fee
    }

    pub fn total_fees(&self) -> u128 {
        match self.inner.read() {
            Ok(pool) => pool
                .entries
                .values()
                .map(|entry| u128::from(entry.transaction.get_fee()))
                .sum(),
            Err(_) => {
                log::error!("Failed to acquire read lock on mempool");
                0
            }
        }
    }

    pub fn clear(&self) {
        match self.inner.write() {
            Ok(mut pool) => pool.entries.clear(),
            Err(_) => {
                log::error!("Failed to acquire write lock on mempool");
            }
        }
    }
}
