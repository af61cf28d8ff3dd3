//! Consensus configuration.

use crate::{Error, Result};
use palisade_config::{
    MAX_BLOCK_SIZE, MAX_BLOCK_SYSTEM_FEE, MAX_TRANSACTIONS_PER_BLOCK, MILLISECONDS_PER_BLOCK,
};
use serde::{Deserialize, Serialize};

/// Tunables of the consensus core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Base round duration in milliseconds.
    pub milliseconds_per_block: u64,
    /// Delay factor applied to the fallback primary's proposal timer. Must be
    /// at least 1; values above 1 give the priority primary first chance.
    pub fallback_timer_multiplier: u32,
    /// Maximum number of transactions one proposal may reference.
    pub max_tx_per_block: usize,
    /// Maximum serialized size of a proposed block.
    pub max_block_size: usize,
    /// Maximum cumulative system fee of the transactions in one proposal.
    pub max_block_system_fee: i64,
    /// When true, the recovery log is never read back on startup.
    pub ignore_recovery_logs: bool,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            milliseconds_per_block: MILLISECONDS_PER_BLOCK,
            fallback_timer_multiplier: 2,
            max_tx_per_block: MAX_TRANSACTIONS_PER_BLOCK,
            max_block_size: MAX_BLOCK_SIZE,
            max_block_system_fee: MAX_BLOCK_SYSTEM_FEE,
            ignore_recovery_logs: false,
        }
    }
}

impl ConsensusConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.milliseconds_per_block == 0 {
            return Err(Error::InvalidConfig(
                "milliseconds_per_block must be greater than zero".into(),
            ));
        }
        if self.fallback_timer_multiplier < 1 {
            return Err(Error::InvalidConfig(
                "fallback_timer_multiplier must be at least 1".into(),
            ));
        }
        if self.max_tx_per_block == 0 || self.max_tx_per_block > MAX_TRANSACTIONS_PER_BLOCK {
            return Err(Error::InvalidConfig(format!(
                "max_tx_per_block must be in 1..={MAX_TRANSACTIONS_PER_BLOCK}"
            )));
        }
        if self.max_block_size == 0 {
            return Err(Error::InvalidConfig(
                "max_block_size must be greater than zero".into(),
            ));
        }
        if self.max_block_system_fee <= 0 {
            return Err(Error::InvalidConfig(
                "max_block_system_fee must be positive".into(),
            ));
        }
        Ok(())
    }
}
