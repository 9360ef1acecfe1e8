//! Indexer configuration and state types.

use std::time::Duration;

use alloy_primitives::{address, Address};
use serde::{Deserialize, Serialize};

use crate::backoff::BackoffPolicy;
use crate::error::IndexerError;
use crate::types::BlockRange;

/// USDT on Ethereum mainnet.
pub const DEFAULT_CONTRACT: Address = address!("dAC17F958D2ee523a2206206994597C13D831ec7");

/// Configuration for an indexer instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Token contract whose `Transfer` events are indexed.
    pub contract: Address,
    /// First block to index when no checkpoint exists. Must be non-zero.
    pub starting_block: u64,
    /// Process historical blocks up to the head before tailing.
    /// When `false` the indexer jumps straight to the head.
    pub backfill: bool,
    /// Optional end block (bounded backfill). `None` = run forever.
    pub to_block: Option<u64>,
    /// Blocks per backfill batch (one commit per batch).
    pub batch_size: u64,
    /// Retry policy for backfill batches and height queries.
    pub retry: BackoffPolicy,
    /// Wait before re-entering backfill after the subscription drops.
    pub reconnect: BackoffPolicy,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            contract: DEFAULT_CONTRACT,
            starting_block: 1,
            backfill: true,
            to_block: None,
            batch_size: 10,
            retry: BackoffPolicy::default(),
            reconnect: BackoffPolicy::fixed(Duration::from_secs(15)),
        }
    }
}

impl IndexerConfig {
    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.starting_block == 0 {
            return Err(IndexerError::Config("starting block must be non-zero".into()));
        }
        if self.batch_size == 0 {
            return Err(IndexerError::Config("batch size must be non-zero".into()));
        }
        if let Some(to) = self.to_block {
            if to < self.starting_block {
                return Err(IndexerError::Config(format!(
                    "to_block {to} is below starting block {}",
                    self.starting_block
                )));
            }
        }
        Ok(())
    }
}

/// Controller phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexerMode {
    /// Computing the start block.
    Init,
    /// Syncing historical blocks up to the observed head.
    Backfill,
    /// Following the chain tip through a subscription.
    Live,
    /// Waiting before catching up after a subscription loss.
    Reconnecting,
    /// Terminated (cancelled, finished a bounded run, or failed).
    Stopped,
}

impl std::fmt::Display for IndexerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Backfill => write!(f, "backfill"),
            Self::Live => write!(f, "live"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// In-memory runtime state, published on every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexerState {
    pub mode: IndexerMode,
    /// Range the current backfill is working towards.
    pub target: Option<BlockRange>,
    /// Last checkpoint this process committed or loaded.
    pub checkpoint: u64,
    /// Consecutive failures of the current operation.
    pub retries: u32,
    /// Subscription losses since start.
    pub reconnects: u32,
}

impl Default for IndexerState {
    fn default() -> Self {
        Self {
            mode: IndexerMode::Init,
            target: None,
            checkpoint: 0,
            retries: 0,
            reconnects: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = IndexerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.reconnect.next_delay(1), Some(Duration::from_secs(15)));
    }

    #[test]
    fn zero_starting_block_rejected() {
        let config = IndexerConfig {
            starting_block: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(IndexerError::Config(_))));
    }

    #[test]
    fn to_block_below_start_rejected() {
        let config = IndexerConfig {
            starting_block: 100,
            to_block: Some(99),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn mode_display() {
        assert_eq!(IndexerMode::Reconnecting.to_string(), "reconnecting");
        assert_eq!(IndexerState::default().mode, IndexerMode::Init);
    }
}
