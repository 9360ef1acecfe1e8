//! The transfer store contract.
//!
//! Implementations live in `transferindex-storage` (memory, SQLite, Postgres).

use alloy_primitives::Address;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::checkpoint::CheckpointStore;
use crate::error::IndexerError;
use crate::types::TransferEvent;

/// Largest page [`TransferQuery`] accepts.
pub const MAX_PAGE_SIZE: u32 = 100;

/// A persisted transfer with its surrogate row id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTransfer {
    pub id: i64,
    #[serde(flatten)]
    pub event: TransferEvent,
}

/// Result of one [`TransferStore::commit`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    /// Rows actually written.
    pub inserted: usize,
    /// Events already present under the same `(transaction_hash, log_index)`.
    pub duplicates: usize,
    /// Checkpoint value after the commit.
    pub checkpoint: u64,
}

/// Page through stored transfers in (block_number, log_index) order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferQuery {
    /// Match transfers where this address is the sender or the recipient.
    pub address: Option<Address>,
    /// Only transfers at or after this block.
    pub from_block: Option<u64>,
    pub limit: u32,
    pub offset: u64,
}

impl Default for TransferQuery {
    fn default() -> Self {
        Self {
            address: None,
            from_block: None,
            limit: 20,
            offset: 0,
        }
    }
}

impl TransferQuery {
    pub fn address(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    pub fn from_block(mut self, block: u64) -> Self {
        self.from_block = Some(block);
        self
    }

    pub fn page(mut self, limit: u32, offset: u64) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.limit == 0 || self.limit > MAX_PAGE_SIZE {
            return Err(IndexerError::Config(format!(
                "limit must be between 1 and {MAX_PAGE_SIZE}, got {}",
                self.limit
            )));
        }
        Ok(())
    }

    /// Returns `true` if `event` passes the address and block filters.
    pub fn matches(&self, event: &TransferEvent) -> bool {
        let address_ok = self
            .address
            .map_or(true, |a| event.from == a || event.to == a);
        let block_ok = self.from_block.map_or(true, |b| event.block_number >= b);
        address_ok && block_ok
    }
}

/// Durable, idempotent sink for decoded transfers.
///
/// Inserting an event whose `(transaction_hash, log_index)` is already stored
/// is a silent no-op. Readers may query concurrently with the writer.
#[async_trait]
pub trait TransferStore: CheckpointStore {
    /// Persist `transfers` and set the checkpoint to `checkpoint` as one
    /// atomic unit: either every new row and the checkpoint land, or nothing does.
    async fn commit(
        &self,
        transfers: &[TransferEvent],
        checkpoint: u64,
    ) -> Result<CommitSummary, IndexerError>;

    /// Fetch one transfer by row id.
    async fn transfer(&self, id: i64) -> Result<Option<StoredTransfer>, IndexerError>;

    /// List transfers matching `query`.
    async fn list_transfers(
        &self,
        query: &TransferQuery,
    ) -> Result<Vec<StoredTransfer>, IndexerError>;

    /// Total number of stored transfers.
    async fn transfer_count(&self) -> Result<u64, IndexerError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;
    use chrono::TimeZone;

    fn event(from: u8, to: u8, block: u64) -> TransferEvent {
        TransferEvent {
            from: Address::repeat_byte(from),
            to: Address::repeat_byte(to),
            amount: "1".into(),
            transaction_hash: B256::repeat_byte(block as u8),
            block_number: block,
            log_index: 0,
            timestamp: chrono::Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn query_matches_either_side() {
        let q = TransferQuery::default().address(Address::repeat_byte(0x22));
        assert!(q.matches(&event(0x11, 0x22, 1)));
        assert!(q.matches(&event(0x22, 0x33, 1)));
        assert!(!q.matches(&event(0x11, 0x33, 1)));
    }

    #[test]
    fn query_block_filter() {
        let q = TransferQuery::default().from_block(100);
        assert!(q.matches(&event(1, 2, 100)));
        assert!(!q.matches(&event(1, 2, 99)));
    }

    #[test]
    fn query_page_bounds() {
        assert!(TransferQuery::default().validate().is_ok());
        assert!(TransferQuery::default().page(0, 0).validate().is_err());
        assert!(TransferQuery::default().page(101, 0).validate().is_err());
        assert!(TransferQuery::default().page(100, 5).validate().is_ok());
    }
}
