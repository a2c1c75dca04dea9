// This file holds the account state my ledger derives from the chain
// Balances and replay nonces per address, applied block by block and
// rolled back exactly in reverse

use crate::core::{Block, SignatureVerifier, Transaction};
use crate::error::{LedgerError, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Balances and nonces keyed by address.
///
/// Zero entries are never stored, so two states holding the same
/// accounts compare equal no matter how they got there.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct AccountState {
    balances: BTreeMap<String, u64>,
    nonces: BTreeMap<String, u64>,
}

impl AccountState {
    pub fn balance(&self, address: &str) -> u64 {
        self.balances.get(address).copied().unwrap_or(0)
    }

    pub fn nonce(&self, address: &str) -> u64 {
        self.nonces.get(address).copied().unwrap_or(0)
    }

    fn set_balance(&mut self, address: &str, balance: u64) {
        if balance == 0 {
            self.balances.remove(address);
        } else {
            self.balances.insert(address.to_string(), balance);
        }
    }

    fn set_nonce(&mut self, address: &str, nonce: u64) {
        if nonce == 0 {
            self.nonces.remove(address);
        } else {
            self.nonces.insert(address.to_string(), nonce);
        }
    }

    pub fn balances(&self) -> &BTreeMap<String, u64> {
        &self.balances
    }

    pub fn nonces(&self) -> &BTreeMap<String, u64> {
        &self.nonces
    }

    pub fn total_supply(&self) -> u128 {
        self.balances.values().map(|b| u128::from(*b)).sum()
    }

    // Callers run the full dry run first
    fn transfer(&mut self, tx: &Transaction) -> Result<()> {
        let required = tx.total_cost()?;
        let sender_after = self
            .balance(tx.get_sender())
            .checked_sub(required)
            .ok_or_else(|| {
                LedgerError::Internal(format!("Unchecked transfer {} overdraws", tx.get_id()))
            })?;
        let receiver_after = if tx.get_sender() == tx.get_receiver() {
            sender_after + tx.get_amount()
        } else {
            self.balance(tx.get_receiver())
                .checked_add(tx.get_amount())
                .ok_or_else(|| {
                    LedgerError::Validation(format!(
                        "Balance of {} would overflow",
                        tx.get_receiver()
                    ))
                })?
        };

        self.set_balance(tx.get_sender(), sender_after);
        self.set_balance(tx.get_receiver(), receiver_after);
        self.set_nonce(tx.get_sender(), tx.get_nonce());
        Ok(())
    }

    // Exact inverse of transfer; only valid for the most recently applied transaction
    fn revert(&mut self, tx: &Transaction) -> Result<()> {
        let required = tx.total_cost()?;
        if self.nonce(tx.get_sender()) != tx.get_nonce() {
            return Err(LedgerError::Internal(format!(
                "Cannot revert {}: sender nonce is {}, transaction nonce is {}",
                tx.get_id(),
                self.nonce(tx.get_sender()),
                tx.get_nonce()
            )));
        }
        let previous_nonce = tx.get_nonce().checked_sub(1).ok_or_else(|| {
            LedgerError::Internal(format!(
                "Cannot revert {}: nonce 0 was never applied",
                tx.get_id()
            ))
        })?;
        let receiver_balance = self.balance(tx.get_receiver());
        if receiver_balance < tx.get_amount() {
            return Err(LedgerError::Internal(format!(
                "Cannot revert {}: receiver {} holds {receiver_balance}, needs {}",
                tx.get_id(),
                tx.get_receiver(),
                tx.get_amount()
            )));
        }

        self.set_balance(tx.get_receiver(), receiver_balance - tx.get_amount());
        let sender_after = self
            .balance(tx.get_sender())
            .checked_add(required)
            .ok_or_else(|| {
                LedgerError::Internal(format!("Cannot revert {}: balance overflow", tx.get_id()))
            })?;
        self.set_balance(tx.get_sender(), sender_after);
        self.set_nonce(tx.get_sender(), previous_nonce);
        Ok(())
    }
}

/// Persistable copy of the account state at a given tip
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct StateSnapshot {
    pub balances: BTreeMap<String, u64>,
    pub nonces: BTreeMap<String, u64>,
    pub chain_tip_index: u64,
    pub tip_hash: String,
}

/// Applies transactions to the account state.
///
/// Validation order for every transaction: structure, signature, balance
/// (amount + fee), then the replay nonce, which must be the sender's
/// current nonce plus one. Fees are burned.
#[derive(Clone)]
pub struct StateManager {
    accounts: AccountState,
    verifier: Arc<dyn SignatureVerifier>,
}

impl fmt::Debug for StateManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateManager")
            .field("accounts", &self.accounts)
            .field("scheme", &self.verifier.scheme())
            .finish()
    }
}

impl StateManager {
    pub fn new(verifier: Arc<dyn SignatureVerifier>) -> StateManager {
        StateManager {
            accounts: AccountState::default(),
            verifier,
        }
    }

    /// State seeded with genesis allocations
    pub fn from_allocations(
        allocations: &BTreeMap<String, u64>,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> StateManager {
        let mut state = StateManager::new(verifier);
        for (address, amount) in allocations {
            state.accounts.set_balance(address, *amount);
        }
        state
    }

    /// Replay `blocks` on top of the genesis allocations
    pub fn rebuild(
        blocks: &[Block],
        allocations: &BTreeMap<String, u64>,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Result<StateManager> {
        let mut state = StateManager::from_allocations(allocations, verifier);
        for block in blocks {
            state.apply_block(block)?;
        }
        Ok(state)
    }

    pub fn from_snapshot(
        snapshot: &StateSnapshot,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> StateManager {
        let mut state = StateManager::new(verifier);
        for (address, balance) in &snapshot.balances {
            state.accounts.set_balance(address, *balance);
        }
        for (address, nonce) in &snapshot.nonces {
            state.accounts.set_nonce(address, *nonce);
        }
        state
    }

    pub fn snapshot(&self, chain_tip_index: u64, tip_hash: &str) -> StateSnapshot {
        StateSnapshot {
            balances: self.accounts.balances.clone(),
            nonces: self.accounts.nonces.clone(),
            chain_tip_index,
            tip_hash: tip_hash.to_string(),
        }
    }

    pub fn get_balance(&self, address: &str) -> u64 {
        self.accounts.balance(address)
    }

    pub fn get_nonce(&self, address: &str) -> u64 {
        self.accounts.nonce(address)
    }

    pub fn accounts(&self) -> &AccountState {
        &self.accounts
    }

    pub fn total_supply(&self) -> u128 {
        self.accounts.total_supply()
    }

    pub fn verifier(&self) -> Arc<dyn SignatureVerifier> {
        self.verifier.clone()
    }

    /// Every check `apply_transaction` performs, without touching state
    pub fn dry_run(&self, tx: &Transaction) -> Result<()> {
        tx.verify_structure()?;

        if !self.verifier.verify(tx) {
            return Err(LedgerError::Validation(format!(
                "Invalid signature on transaction {}",
                tx.get_id()
            )));
        }

        let required = tx.total_cost()?;
        let available = self.get_balance(tx.get_sender());
        if available < required {
            return Err(LedgerError::InsufficientBalance {
                address: tx.get_sender().to_string(),
                required,
                available,
            });
        }

        let expected = self.get_nonce(tx.get_sender()) + 1;
        if tx.get_nonce() != expected {
            return Err(LedgerError::StaleNonce {
                address: tx.get_sender().to_string(),
                expected,
                found: tx.get_nonce(),
            });
        }
        Ok(())
    }

    pub fn apply_transaction(&mut self, tx: &Transaction) -> Result<()> {
        self.dry_run(tx)?;
        self.accounts.transfer(tx)
    }

    /// Apply every transaction of the block or none of them
    pub fn apply_block(&mut self, block: &Block) -> Result<()> {
        let mut seen = HashSet::new();
        for tx in block.get_transactions() {
            if !seen.insert(tx.get_id()) {
                return Err(LedgerError::DoubleSpend(format!(
                    "transaction {} appears twice in block {}",
                    tx.get_id(),
                    block.get_index()
                )));
            }
        }

        for (applied, tx) in block.get_transactions().iter().enumerate() {
            if let Err(e) = self.apply_transaction(tx) {
                warn!(
                    "Rejecting block {}: transaction {} failed: {e}",
                    block.get_index(),
                    tx.get_id()
                );
                for done in block.get_transactions()[..applied].iter().rev() {
                    self.accounts.revert(done)?;
                }
                return Err(e);
            }
        }
        debug!(
            "Applied block {} ({} transactions)",
            block.get_index(),
            block.get_transactions().len()
        );
        Ok(())
    }

    /// Undo a block that was the last one applied
    pub fn rollback_block(&mut self, block: &Block) -> Result<()> {
        let mut accounts = self.accounts.clone();
        for tx in block.get_transactions().iter().rev() {
            accounts.revert(tx)?;
        }
        self.accounts = accounts;
        debug!("Rolled back block {}", block.get_index());
        Ok(())
    }
}
