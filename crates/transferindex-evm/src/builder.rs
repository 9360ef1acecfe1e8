//! Fluent builder API for creating transfer indexers.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use transferindex_evm::{EvmChainSource, EvmSourceConfig, IndexerBuilder};
//! use transferindex_storage::InMemoryStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let source = EvmChainSource::new(EvmSourceConfig {
//!     rpc_url: "https://eth.llamarpc.com".into(),
//!     ..Default::default()
//! })?;
//!
//! let indexer = IndexerBuilder::new()
//!     .starting_block(19_000_000)
//!     .batch_size(50)
//!     .build(Arc::new(source), Arc::new(InMemoryStorage::new()))?;
//! indexer.run().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use tokio_util::sync::CancellationToken;

use transferindex_core::backoff::BackoffPolicy;
use transferindex_core::error::IndexerError;
use transferindex_core::indexer::IndexerConfig;
use transferindex_core::source::ChainSource;
use transferindex_core::store::TransferStore;

use crate::index_loop::IndexLoop;

/// Fluent builder for [`IndexerConfig`] and [`IndexLoop`].
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
    cancel: Option<CancellationToken>,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn from_config(config: IndexerConfig) -> Self {
        Self {
            config,
            cancel: None,
        }
    }

    /// Set the token contract to index.
    pub fn contract(mut self, contract: Address) -> Self {
        self.config.contract = contract;
        self
    }

    /// Set the first block to index when no checkpoint exists.
    pub fn starting_block(mut self, block: u64) -> Self {
        self.config.starting_block = block;
        self
    }

    /// Enable or disable historical backfill.
    pub fn backfill(mut self, enabled: bool) -> Self {
        self.config.backfill = enabled;
        self
    }

    /// Set the end block (for bounded backfill).
    pub fn to_block(mut self, block: u64) -> Self {
        self.config.to_block = Some(block);
        self
    }

    /// Set the number of blocks per backfill batch.
    pub fn batch_size(mut self, size: u64) -> Self {
        self.config.batch_size = size;
        self
    }

    pub fn retry(mut self, policy: BackoffPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    /// Fixed wait before catching up after a lost subscription.
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect = BackoffPolicy::fixed(delay);
        self
    }

    pub fn reconnect(mut self, policy: BackoffPolicy) -> Self {
        self.config.reconnect = policy;
        self
    }

    /// Use an externally owned shutdown token.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Build the `IndexerConfig`.
    pub fn build_config(self) -> IndexerConfig {
        self.config
    }

    /// Validate the configuration and assemble the loop.
    pub fn build(
        self,
        source: Arc<dyn ChainSource>,
        store: Arc<dyn TransferStore>,
    ) -> Result<IndexLoop, IndexerError> {
        self.config.validate()?;
        Ok(IndexLoop::new(
            self.config,
            source,
            store,
            self.cancel.unwrap_or_default(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transferindex_core::indexer::DEFAULT_CONTRACT;

    #[test]
    fn builder_defaults() {
        let cfg = IndexerBuilder::new().build_config();
        assert_eq!(cfg.contract, DEFAULT_CONTRACT);
        assert_eq!(cfg.batch_size, 10);
        assert!(cfg.backfill);
        assert_eq!(cfg.reconnect, BackoffPolicy::fixed(Duration::from_secs(15)));
    }

    #[test]
    fn builder_custom() {
        let cfg = IndexerBuilder::new()
            .contract(Address::repeat_byte(0xaa))
            .starting_block(50_000_000)
            .to_block(50_001_000)
            .batch_size(500)
            .backfill(false)
            .reconnect_delay(Duration::from_secs(3))
            .build_config();

        assert_eq!(cfg.contract, Address::repeat_byte(0xaa));
        assert_eq!(cfg.starting_block, 50_000_000);
        assert_eq!(cfg.to_block, Some(50_001_000));
        assert_eq!(cfg.batch_size, 500);
        assert!(!cfg.backfill);
        assert_eq!(cfg.reconnect.next_delay(4), Some(Duration::from_secs(3)));
    }
}
