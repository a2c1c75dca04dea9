// This is the boundary of my ledger: the one object the network layer talks
// to. It wires the chain, mempool, miner and event bus together at startup
// and turns inbound messages into calls on them

use crate::config::LedgerConfig;
use crate::core::fees::usage_percent;
use crate::core::{
    verifier_for, Block, Blockchain, CancelToken, FeePolicy, KeyRegistry, Miner, Transaction,
};
use crate::error::{LedgerError, Result};
use crate::network::{ChainEvent, EventBus, Message, Response};
use crate::storage::{LedgerStore, Mempool};
use crate::utils::current_timestamp;
use crossbeam_channel::Receiver;
use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

/// Where a transaction was found
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransactionLocation {
    Confirmed {
        transaction: Transaction,
        block_index: u64,
    },
    Pending { transaction: Transaction },
}

impl TransactionLocation {
    pub fn transaction(&self) -> &Transaction {
        match self {
            TransactionLocation::Confirmed { transaction, .. }
            | TransactionLocation::Pending { transaction } => transaction,
        }
    }
}

pub struct Node {
    config: LedgerConfig,
    chain: Arc<Blockchain>,
    mempool: Arc<Mempool>,
    miner: Miner,
    registry: Arc<KeyRegistry>,
    events: EventBus,
    fee_policy: FeePolicy,
    store: Option<LedgerStore>,
}

impl Node {
    /// In-memory node starting from genesis
    pub fn new(config: LedgerConfig) -> Result<Node> {
        Self::with_registry(config, Arc::new(KeyRegistry::new()))
    }

    /// In-memory node checking signatures against `registry`
    pub fn with_registry(config: LedgerConfig, registry: Arc<KeyRegistry>) -> Result<Node> {
        config.validate()?;
        let verifier = verifier_for(config.signature_scheme, registry.clone());
        let chain = Blockchain::new(config.genesis.allocations.clone(), verifier);
        Self::assemble(config, registry, chain, None)
    }

    /// Node backed by the sled store under `storage.data_dir`, restoring
    /// whatever chain was persisted there
    pub fn open(config: LedgerConfig) -> Result<Node> {
        Self::open_with_registry(config, Arc::new(KeyRegistry::new()))
    }

    pub fn open_with_registry(config: LedgerConfig, registry: Arc<KeyRegistry>) -> Result<Node> {
        config.validate()?;
        let store = LedgerStore::open(&config.storage.data_dir)?;
        let verifier = verifier_for(config.signature_scheme, registry.clone());
        let allocations = config.genesis.allocations.clone();

        let blocks = store.load_blocks()?;
        let fresh = blocks.is_empty();
        let chain = if fresh {
            Blockchain::new(allocations, verifier)
        } else {
            let snapshot = store.load_snapshot()?;
            Blockchain::restore(
                blocks,
                snapshot.as_ref(),
                allocations,
                verifier,
                config.difficulty,
            )?
        };

        let node = Self::assemble(config, registry, chain, Some(store))?;
        if fresh {
            node.persist()?;
        }
        Ok(node)
    }

    fn assemble(
        config: LedgerConfig,
        registry: Arc<KeyRegistry>,
        chain: Blockchain,
        store: Option<LedgerStore>,
    ) -> Result<Node> {
        let fee_policy = FeePolicy::with_min_fee(config.mempool.min_fee);
        fee_policy.validate()?;

        let chain = Arc::new(chain);
        let mempool = Arc::new(Mempool::new(&config.mempool, chain.verifier()));
        let miner = Miner::new(chain.clone(), mempool.clone(), config.mining.clone());
        info!(
            "Node ready at height {} (difficulty {}, {:?} signatures)",
            chain.height(),
            config.difficulty,
            config.signature_scheme
        );
        Ok(Node {
            config,
            chain,
            mempool,
            miner,
            registry,
            events: EventBus::new(),
            fee_policy,
            store,
        })
    }

    /// Admit a transaction to the mempool, returning its id.
    ///
    /// Balance is checked before the replay nonce, so a second spend of an
    /// already confirmed nonce reports the missing funds. The chain read lock
    /// is held until the mempool insert finishes, so no block can commit in
    /// between and leave a confirmed transaction pending.
    pub fn submit_transaction(&self, tx: Transaction) -> Result<String> {
        self.chain.with_state(|state| {
            let sender = tx.get_sender();
            let balance = state.get_balance(sender);
            let required = tx.total_cost()?;
            let committed = state.get_nonce(sender);
            let rejection = if balance < required {
                Some(LedgerError::InsufficientBalance {
                    address: sender.to_string(),
                    required,
                    available: balance,
                })
            } else if tx.get_nonce() <= committed {
                Some(LedgerError::StaleNonce {
                    address: sender.to_string(),
                    expected: committed + 1,
                    found: tx.get_nonce(),
                })
            } else {
                None
            };
            if let Some(err) = rejection {
                warn!("Rejected transaction {}: {err}", tx.get_id());
                return Err(err);
            }
            self.mempool.add(tx, balance)
        })
    }

    /// Append a block received from a peer on top of our tip
    pub fn submit_block(&self, block: Block) -> Result<()> {
        let confirmed = block.transaction_ids();
        let appended =
            self.chain
                .try_append_with(block.clone(), self.config.difficulty, |_, state| {
                    self.mempool.evict_confirmed(&confirmed);
                    self.mempool.prune_invalid(state);
                });
        if let Err(e) = appended {
            if e.is_ahead() {
                info!(
                    "Block {} is ahead of our tip, the chain needs syncing",
                    block.get_index()
                );
            }
            return Err(e);
        }

        self.events.publish(ChainEvent::BlockAppended { tip: block });
        self.persist_after_commit();
        Ok(())
    }

    /// Offer a competing chain. Returns `Ok(true)` if it replaced ours.
    ///
    /// Transactions only the abandoned branch confirmed go back through
    /// admission against the new state.
    pub fn submit_chain(&self, blocks: Vec<Block>) -> Result<bool> {
        let change = self
            .chain
            .resolve_fork_with(blocks, self.config.difficulty, |change, state| {
                self.mempool
                    .evict_confirmed(&change.adopted_transaction_ids());
                self.mempool.prune_invalid(state);
            })?;
        let change = match change {
            Some(change) => change,
            None => return Ok(false),
        };

        let orphaned = change.orphaned_transactions();
        let mut readmitted = 0;
        for tx in orphaned.iter().cloned() {
            let id = tx.get_id().to_string();
            match self.submit_transaction(tx) {
                Ok(_) => readmitted += 1,
                Err(e) => debug!("Dropped orphaned transaction {id}: {e}"),
            }
        }
        info!(
            "Re-admitted {readmitted} of {} orphaned transactions",
            orphaned.len()
        );

        self.events.publish(ChainEvent::ChainReplaced {
            tip: self.chain.get_latest(),
            length: self.chain.len(),
        });
        self.persist_after_commit();
        Ok(true)
    }

    /// Every block, genesis first, as JSON
    pub fn request_chain_snapshot(&self) -> Result<Vec<String>> {
        self.chain.blocks().iter().map(Block::to_json).collect()
    }

    pub fn subscribe(&self) -> Receiver<ChainEvent> {
        self.events.subscribe()
    }

    /// Mine one block from the mempool and announce it. Pending entries past
    /// their TTL are dropped first so they never reach a candidate.
    pub fn mine_once(&self) -> Result<Option<Block>> {
        self.expire_pending()?;
        let mined = self.miner.mine_once(self.config.difficulty)?;
        if let Some(block) = &mined {
            self.events
                .publish(ChainEvent::BlockAppended { tip: block.clone() });
            self.persist_after_commit();
        }
        Ok(mined)
    }

    /// Stops the miner; call `reset` on the token to mine again
    pub fn cancel_token(&self) -> CancelToken {
        self.miner.cancel_token()
    }

    /// Drop pending transactions older than the configured TTL
    pub fn expire_pending(&self) -> Result<usize> {
        let removed = self
            .mempool
            .expire(current_timestamp()?, self.config.mempool.ttl_secs);
        if removed > 0 {
            info!("Expired {removed} pending transactions");
        }
        Ok(removed)
    }

    /// Fee to offer for a transaction of `size` bytes at the current load
    pub fn suggest_fee(&self, size: usize) -> u64 {
        let usage = usage_percent(self.mempool.len(), self.mempool.capacity());
        self.fee_policy.estimate(size, usage)
    }

    pub fn get_block_by_index(&self, index: u64) -> Result<Block> {
        self.chain
            .get_block_by_index(index)
            .ok_or_else(|| LedgerError::NotFound(format!("block at index {index}")))
    }

    pub fn get_block_by_hash(&self, hash: &str) -> Result<Block> {
        self.chain
            .get_block_by_hash(hash)
            .ok_or_else(|| LedgerError::NotFound(format!("block {hash}")))
    }

    /// Look in the chain first, then the mempool
    pub fn get_transaction_by_hash(&self, id: &str) -> Result<TransactionLocation> {
        if let Some((transaction, block_index)) = self.chain.find_transaction(id) {
            return Ok(TransactionLocation::Confirmed {
                transaction,
                block_index,
            });
        }
        self.mempool
            .get(id)
            .map(|transaction| TransactionLocation::Pending { transaction })
            .ok_or_else(|| LedgerError::NotFound(format!("transaction {id}")))
    }

    pub fn get_balance(&self, address: &str) -> u64 {
        self.chain.get_balance(address)
    }

    pub fn get_nonce(&self, address: &str) -> u64 {
        self.chain.get_nonce(address)
    }

    /// Highest-priority pending transactions first
    pub fn get_pending_transactions(&self, limit: usize) -> Vec<Transaction> {
        self.mempool.get_pending(limit)
    }

    /// Write the chain and a matching state snapshot to the store, if any
    pub fn persist(&self) -> Result<()> {
        match &self.store {
            Some(store) => {
                let (blocks, snapshot) = self.chain.export();
                store.persist(&blocks, &snapshot)?;
                debug!("Persisted {} blocks", blocks.len());
                Ok(())
            }
            None => Ok(()),
        }
    }

    // The commit already happened; a failed write is retried by the next persist
    fn persist_after_commit(&self) {
        if let Err(e) = self.persist() {
            error!("Failed to persist chain: {e}");
        }
    }

    /// Parse and dispatch one inbound message
    pub fn handle_message(&self, raw: &str) -> Response {
        let message = match Message::parse(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!("{e}");
                return Response::error(&e);
            }
        };
        let kind = message.kind();
        match self.dispatch(message) {
            Ok(response) => response,
            Err(e) => {
                warn!("Failed to handle {kind} message: {e}");
                Response::error(&e)
            }
        }
    }

    fn dispatch(&self, message: Message) -> Result<Response> {
        match message {
            Message::Transaction(tx) => {
                let id = self.submit_transaction(tx)?;
                Ok(Response::success("Transaction accepted").with_data(json!({ "id": id })))
            }
            Message::Block(block) => {
                let hash = block.get_hash().to_string();
                self.submit_block(block)?;
                Ok(Response::success("Block accepted").with_data(json!({ "hash": hash })))
            }
            Message::Chain(blocks) => {
                let replaced = self.submit_chain(blocks)?;
                let message = if replaced {
                    "Chain adopted"
                } else {
                    "Chain ignored, ours is at least as long"
                };
                Ok(Response::success(message).with_data(json!({ "replaced": replaced })))
            }
            Message::ChainRequest => {
                let blocks = serde_json::to_value(self.chain.blocks())?;
                Ok(Response::success("Chain snapshot").with_data(blocks))
            }
        }
    }

    pub fn get_config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn get_difficulty(&self) -> usize {
        self.config.difficulty
    }

    pub fn chain(&self) -> Arc<Blockchain> {
        self.chain.clone()
    }

    pub fn mempool(&self) -> Arc<Mempool> {
        self.mempool.clone()
    }

    pub fn registry(&self) -> Arc<KeyRegistry> {
        self.registry.clone()
    }
}
