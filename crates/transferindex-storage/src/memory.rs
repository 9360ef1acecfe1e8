//! In-memory storage backend.
//!
//! Stores transfers and the checkpoint in RAM. Useful for testing and
//! short-lived indexers that don't need persistence.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use alloy_primitives::B256;
use async_trait::async_trait;

use transferindex_core::checkpoint::CheckpointStore;
use transferindex_core::error::IndexerError;
use transferindex_core::store::{CommitSummary, StoredTransfer, TransferQuery, TransferStore};
use transferindex_core::types::TransferEvent;

#[derive(Default)]
struct Inner {
    transfers: Vec<StoredTransfer>,
    keys: HashSet<(B256, u64)>,
    checkpoint: u64,
}

/// In-memory transfer store.
///
/// All data is lost when the process exits. A single lock guards rows and
/// checkpoint, so every commit is atomic.
#[derive(Default)]
pub struct InMemoryStorage {
    inner: Mutex<Inner>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, IndexerError> {
        self.inner
            .lock()
            .map_err(|_| IndexerError::Storage("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl CheckpointStore for InMemoryStorage {
    async fn load_checkpoint(&self) -> Result<u64, IndexerError> {
        Ok(self.lock()?.checkpoint)
    }

    async fn reset_checkpoint(&self, block_number: u64) -> Result<(), IndexerError> {
        self.lock()?.checkpoint = block_number;
        Ok(())
    }
}

#[async_trait]
impl TransferStore for InMemoryStorage {
    async fn commit(
        &self,
        transfers: &[TransferEvent],
        checkpoint: u64,
    ) -> Result<CommitSummary, IndexerError> {
        let mut inner = self.lock()?;
        let mut inserted = 0;
        for event in transfers {
            if !inner.keys.insert(event.key()) {
                continue;
            }
            let id = inner.transfers.len() as i64 + 1;
            inner.transfers.push(StoredTransfer {
                id,
                event: event.clone(),
            });
            inserted += 1;
        }
        inner.checkpoint = checkpoint;
        Ok(CommitSummary {
            inserted,
            duplicates: transfers.len() - inserted,
            checkpoint,
        })
    }

    async fn transfer(&self, id: i64) -> Result<Option<StoredTransfer>, IndexerError> {
        Ok(self.lock()?.transfers.iter().find(|t| t.id == id).cloned())
    }

    async fn list_transfers(
        &self,
        query: &TransferQuery,
    ) -> Result<Vec<StoredTransfer>, IndexerError> {
        query.validate()?;
        let inner = self.lock()?;
        let mut matching: Vec<_> = inner
            .transfers
            .iter()
            .filter(|t| query.matches(&t.event))
            .cloned()
            .collect();
        matching.sort_by_key(|t| t.event.position());
        Ok(matching
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .collect())
    }

    async fn transfer_count(&self) -> Result<u64, IndexerError> {
        Ok(self.lock()?.transfers.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address;
    use chrono::{TimeZone, Utc};

    fn ev(block: u64, log_index: u64) -> TransferEvent {
        TransferEvent {
            from: Address::repeat_byte(0x11),
            to: Address::repeat_byte(0x22),
            amount: "1000000".into(),
            transaction_hash: B256::repeat_byte(block as u8),
            block_number: block,
            log_index,
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn duplicate_insert_is_a_no_op() {
        let store = InMemoryStorage::new();
        let first = store.commit(&[ev(100, 0), ev(100, 1)], 100).await.unwrap();
        assert_eq!(first.inserted, 2);

        let second = store.commit(&[ev(100, 1), ev(101, 0)], 101).await.unwrap();
        assert_eq!(second.inserted, 1);
        assert_eq!(second.duplicates, 1);
        assert_eq!(store.transfer_count().await.unwrap(), 3);
        assert_eq!(store.load_checkpoint().await.unwrap(), 101);
    }

    #[tokio::test]
    async fn checkpoint_defaults_to_unset() {
        let store = InMemoryStorage::new();
        assert_eq!(store.load_checkpoint().await.unwrap(), 0);
        store.reset_checkpoint(500).await.unwrap();
        store.reset_checkpoint(200).await.unwrap();
        assert_eq!(store.load_checkpoint().await.unwrap(), 200);
    }

    #[tokio::test]
    async fn list_is_ordered_and_paged() {
        let store = InMemoryStorage::new();
        store.commit(&[ev(103, 0), ev(101, 2), ev(101, 1)], 103).await.unwrap();

        let all = store.list_transfers(&TransferQuery::default()).await.unwrap();
        let positions: Vec<_> = all.iter().map(|t| t.event.position()).collect();
        assert_eq!(positions, vec![(101, 1), (101, 2), (103, 0)]);

        let page = store
            .list_transfers(&TransferQuery::default().page(1, 1))
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].event.position(), (101, 2));

        let found = store.transfer(page[0].id).await.unwrap().unwrap();
        assert_eq!(found, page[0]);
        assert!(store.transfer(999).await.unwrap().is_none());
    }
}
