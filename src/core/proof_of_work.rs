use crate::core::Block;
use crate::error::{LedgerError, Result};
use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A SHA-256 hex digest has 64 characters, so no target can ask for more zeros
pub const MAX_DIFFICULTY: usize = 64;

/// How many nonces are tried between two polls of the stop predicate
pub const CANCEL_CHECK_INTERVAL: u64 = 1024;

const MAX_NONCE: u64 = u64::MAX;

/// Result of a nonce search
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PowOutcome {
    Found {
        nonce: u64,
        hash: String,
        attempts: u64,
    },
    Cancelled {
        attempts: u64,
    },
    /// Every nonce was tried for this timestamp
    Exhausted,
}

impl PowOutcome {
    pub fn is_found(&self) -> bool {
        matches!(self, PowOutcome::Found { .. })
    }
}

/// Shared cancellation flag for a running nonce search
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Leading-zero hex target for one difficulty
pub struct ProofOfWork {
    difficulty: usize,
    target: String,
}

impl ProofOfWork {
    pub fn new(difficulty: usize) -> ProofOfWork {
        ProofOfWork {
            difficulty,
            target: "0".repeat(difficulty.min(MAX_DIFFICULTY)),
        }
    }

    pub fn get_difficulty(&self) -> usize {
        self.difficulty
    }

    pub fn meets_target(&self, hash: &str) -> bool {
        self.difficulty <= MAX_DIFFICULTY && hash.starts_with(self.target.as_str())
    }

    /// Search nonces upward from the block's current nonce.
    ///
    /// `should_stop` is polled every [`CANCEL_CHECK_INTERVAL`] attempts,
    /// including before the first one.
    pub fn run<F>(&self, block: &Block, mut should_stop: F) -> PowOutcome
    where
        F: FnMut() -> bool,
    {
        let mut nonce = block.get_nonce();
        let mut attempts: u64 = 0;
        debug!(
            "Mining block {} with difficulty {}",
            block.get_index(),
            self.difficulty
        );
        loop {
            if attempts % CANCEL_CHECK_INTERVAL == 0 && should_stop() {
                info!(
                    "Proof-of-work for block {} cancelled after {attempts} attempts",
                    block.get_index()
                );
                return PowOutcome::Cancelled { attempts };
            }

            let hash = block.hash_with_nonce(nonce);
            attempts += 1;
            if self.meets_target(&hash) {
                return PowOutcome::Found {
                    nonce,
                    hash,
                    attempts,
                };
            }
            if nonce == MAX_NONCE {
                return PowOutcome::Exhausted;
            }
            nonce += 1;
        }
    }

    /// Hash recomputation and target check for a sealed block
    pub fn validate(block: &Block, difficulty: usize) -> Result<()> {
        if difficulty > MAX_DIFFICULTY {
            return Err(LedgerError::Validation(format!(
                "Difficulty {difficulty} exceeds the digest length"
            )));
        }
        let recomputed = block.compute_hash();
        if recomputed != block.get_hash() {
            return Err(LedgerError::HashMismatch {
                expected: recomputed,
                found: block.get_hash().to_string(),
            });
        }
        if !ProofOfWork::new(difficulty).meets_target(block.get_hash()) {
            return Err(LedgerError::DifficultyNotMet {
                hash: block.get_hash().to_string(),
                difficulty,
            });
        }
        Ok(())
    }
}

/// True if the hex hash starts with `difficulty` zero characters
pub fn meets_difficulty(hash: &str, difficulty: usize) -> bool {
    ProofOfWork::new(difficulty).meets_target(hash)
}
