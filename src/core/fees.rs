//! Fee estimation
//!
//! Suggests a fee for a transaction of a given size. Below the congestion
//! threshold the static per-kilobyte rate applies; above it the rate scales
//! linearly up to the maximum as mempool usage approaches 100%.

use crate::error::{LedgerError, Result};
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeMode {
    Static,
    CongestionBased,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeePolicy {
    pub mode: FeeMode,
    /// Base units per 1000 bytes under normal load
    pub base_rate: u64,
    /// Base units per 1000 bytes at full mempool
    pub max_rate: u64,
    /// Mempool usage percentage where congestion pricing starts
    pub congestion_threshold: u8,
    /// Floor applied to every estimate
    pub min_fee: u64,
}

impl Default for FeePolicy {
    fn default() -> Self {
        FeePolicy {
            mode: FeeMode::CongestionBased,
            base_rate: 10,
            max_rate: 100,
            congestion_threshold: 80,
            min_fee: 1,
        }
    }
}

impl FeePolicy {
    pub fn with_min_fee(min_fee: u64) -> Self {
        FeePolicy {
            min_fee,
            ..FeePolicy::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_rate < self.base_rate {
            return Err(LedgerError::Config(
                "max_rate must not be below base_rate".to_string(),
            ));
        }
        if self.congestion_threshold > 100 {
            return Err(LedgerError::Config(
                "congestion_threshold is a percentage".to_string(),
            ));
        }
        Ok(())
    }

    /// Per-kilobyte rate at the given mempool usage (0-100)
    pub fn rate(&self, usage_percent: u8) -> u64 {
        let usage = u64::from(usage_percent.min(100));
        let threshold = u64::from(self.congestion_threshold.min(100));
        if self.mode == FeeMode::Static || usage < threshold || threshold == 100 {
            return self.base_rate;
        }
        let span = 100 - threshold;
        let excess = (usage - threshold).min(span);
        let spread = self.max_rate.saturating_sub(self.base_rate);
        let scaled = u128::from(spread) * u128::from(excess) / u128::from(span);
        self.base_rate
            .saturating_add(u64::try_from(scaled).unwrap_or(u64::MAX))
    }

    /// Suggested fee for `size` bytes, rounded up and floored at `min_fee`
    pub fn estimate(&self, size: usize, usage_percent: u8) -> u64 {
        let rate = self.rate(usage_percent);
        let size = u128::try_from(size).unwrap_or(u128::MAX);
        let fee = (u128::from(rate) * size).div_ceil(1000);
        let fee = u64::try_from(fee).unwrap_or(u64::MAX).max(self.min_fee);
        debug!("Estimated fee {fee} for {size} bytes at {usage_percent}% mempool usage (rate {rate})");
        fee
    }
}

/// Mempool usage as a percentage of capacity
pub fn usage_percent(len: usize, capacity: usize) -> u8 {
    if capacity == 0 {
        return 100;
    }
    let percent = len.saturating_mul(100) / capacity;
    u8::try_from(percent.min(100)).unwrap_or(100)
}
