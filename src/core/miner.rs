// This file drives block production: pick pending transactions, build a
// candidate on the current tip, search for a nonce and append the result

use crate::config::MiningConfig;
use crate::core::{Block, Blockchain, CancelToken, PowOutcome};
use crate::error::{ErrorKind, LedgerError, Result};
use crate::storage::Mempool;
use crate::utils::current_timestamp;
use log::{debug, info, warn};
use std::sync::Arc;

pub struct Miner {
    chain: Arc<Blockchain>,
    mempool: Arc<Mempool>,
    config: MiningConfig,
    cancel: CancelToken,
}

impl Miner {
    pub fn new(chain: Arc<Blockchain>, mempool: Arc<Mempool>, config: MiningConfig) -> Miner {
        Miner {
            chain,
            mempool,
            config,
            cancel: CancelToken::new(),
        }
    }

    /// Token that stops the current and any later search until reset
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Candidate on the current tip.
    ///
    /// Pending transactions are simulated in priority order on a scratch copy
    /// of the state. Anything that fails there (a second spend of the same
    /// funds, a nonce gap) is skipped and stays pending.
    pub fn assemble_candidate(&self) -> Result<Block> {
        let (tip, mut scratch) = self.chain.tip_and_state();
        let mut selected = Vec::new();
        for tx in self.mempool.get_pending(self.mempool.len()) {
            if selected.len() >= self.config.max_block_transactions {
                break;
            }
            match scratch.apply_transaction(&tx) {
                Ok(()) => selected.push(tx),
                Err(e) => debug!("Leaving {} pending: {e}", tx.get_id()),
            }
        }

        let timestamp = current_timestamp()?.max(tip.get_timestamp());
        Ok(Block::new_with_timestamp(
            tip.get_index() + 1,
            timestamp,
            tip.get_hash(),
            selected,
        ))
    }

    /// Mine and append one block.
    ///
    /// Returns `Ok(None)` if cancelled. When another block lands first the
    /// candidate is abandoned and rebuilt on the new tip, up to
    /// `max_retries` times.
    pub fn mine_once(&self, difficulty: usize) -> Result<Option<Block>> {
        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            if self.cancel.is_cancelled() {
                info!("Mining cancelled");
                return Ok(None);
            }

            let generation = self.chain.generation();
            let mut candidate = self.assemble_candidate()?;
            debug!(
                "Attempt {attempt}: mining block {} with {} transactions",
                candidate.get_index(),
                candidate.get_transactions().len()
            );

            let outcome = candidate.mine_with_cancel(difficulty, || {
                self.cancel.is_cancelled() || self.chain.generation() != generation
            });
            match outcome {
                PowOutcome::Found { .. } => {}
                PowOutcome::Cancelled { .. } if self.cancel.is_cancelled() => {
                    info!("Mining cancelled");
                    return Ok(None);
                }
                PowOutcome::Cancelled { .. } | PowOutcome::Exhausted => {
                    debug!("Tip moved or nonces ran out, rebuilding the candidate");
                    continue;
                }
            }

            let confirmed = candidate.transaction_ids();
            let appended = self.chain.try_append_with(
                candidate.clone(),
                difficulty,
                |_, state| {
                    self.mempool.evict_confirmed(&confirmed);
                    self.mempool.prune_invalid(state);
                },
            );
            match appended {
                Ok(()) => {
                    info!(
                        "Mined block {} ({}) with {} transactions",
                        candidate.get_index(),
                        candidate.get_hash(),
                        confirmed.len()
                    );
                    return Ok(Some(candidate));
                }
                Err(e) if e.kind() == ErrorKind::Consensus => {
                    warn!("Lost the race for block {}: {e}", candidate.get_index());
                    last_error = Some(e);
                }
                Err(e) if matches!(e.kind(), ErrorKind::State | ErrorKind::Validation) => {
                    return Err(LedgerError::Internal(format!(
                        "Miner built an invalid candidate {}: {e}",
                        candidate.get_index()
                    )));
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            LedgerError::Internal(format!(
                "No block mined after {} attempts",
                self.config.max_retries + 1
            ))
        }))
    }
}
