//! The chain source abstraction.
//!
//! The controller only talks to the chain through [`ChainSource`], so tests
//! can substitute a scripted chain for a live provider.

use alloy_primitives::Address;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use crate::error::IndexerError;
use crate::types::ChainLog;

/// A live, non-restartable push sequence of logs.
///
/// An `Err` item or the end of the stream means the subscription is gone;
/// dropping the stream releases the upstream subscription.
pub type LogSubscription = BoxStream<'static, Result<ChainLog, IndexerError>>;

/// Upstream chain capabilities consumed by the indexer.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Current chain height.
    async fn height(&self) -> Result<u64, IndexerError>;

    /// All logs emitted by `contract` in `[from, to]`, ordered by
    /// (block number, log index).
    async fn logs_in_range(
        &self,
        from: u64,
        to: u64,
        contract: Address,
    ) -> Result<Vec<ChainLog>, IndexerError>;

    /// Subscribe to new logs from `contract`. Logs below `from_block` are
    /// never yielded.
    async fn subscribe_logs(
        &self,
        from_block: u64,
        contract: Address,
    ) -> Result<LogSubscription, IndexerError>;

    /// Timestamp of block `number`.
    async fn block_time(&self, number: u64) -> Result<DateTime<Utc>, IndexerError>;
}
