//! SQLite storage backend for TransferIndex.
//!
//! Persists transfers and the checkpoint to a single SQLite file.
//! Uses `sqlx` with WAL mode so readers proceed while the indexer writes.
//!
//! # Usage
//! ```rust,no_run
//! use transferindex_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./transfers.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use transferindex_core::checkpoint::CheckpointStore;
use transferindex_core::error::IndexerError;
use transferindex_core::store::{CommitSummary, StoredTransfer, TransferQuery, TransferStore};
use transferindex_core::types::{address_to_string, hash_to_string, TransferEvent};

use crate::sql::{db_err, TransferRow};

/// SQLite-backed transfer store.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./transfers.db"`) or a full
    /// SQLite URL (`"sqlite:./transfers.db"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}")
        };
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(db_err)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(db_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// All data is lost when the pool is dropped. Ideal for tests.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        // every connection to :memory: is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(db_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Create tables and indexes.
    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS transfers (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                from_address     TEXT    NOT NULL,
                to_address       TEXT    NOT NULL,
                amount           TEXT    NOT NULL,
                transaction_hash TEXT    NOT NULL,
                block_number     INTEGER NOT NULL,
                log_index        INTEGER NOT NULL,
                timestamp        TEXT    NOT NULL,
                UNIQUE (transaction_hash, log_index)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS last_processed_block (
                id           INTEGER PRIMARY KEY CHECK (id = 1),
                block_number INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        for ddl in [
            "CREATE INDEX IF NOT EXISTS idx_transfers_block ON transfers (block_number, log_index);",
            "CREATE INDEX IF NOT EXISTS idx_transfers_from ON transfers (from_address);",
            "CREATE INDEX IF NOT EXISTS idx_transfers_to ON transfers (to_address);",
        ] {
            sqlx::query(ddl).execute(&self.pool).await.map_err(db_err)?;
        }

        Ok(())
    }

    fn row_to_transfer(row: &sqlx::sqlite::SqliteRow) -> Result<StoredTransfer, IndexerError> {
        TransferRow {
            id: row.try_get("id").map_err(db_err)?,
            from_address: row.try_get("from_address").map_err(db_err)?,
            to_address: row.try_get("to_address").map_err(db_err)?,
            amount: row.try_get("amount").map_err(db_err)?,
            transaction_hash: row.try_get("transaction_hash").map_err(db_err)?,
            block_number: row.try_get("block_number").map_err(db_err)?,
            log_index: row.try_get("log_index").map_err(db_err)?,
            timestamp: row.try_get("timestamp").map_err(db_err)?,
        }
        .try_into()
    }
}

#[async_trait]
impl CheckpointStore for SqliteStorage {
    async fn load_checkpoint(&self) -> Result<u64, IndexerError> {
        let row = sqlx::query("SELECT block_number FROM last_processed_block WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        match row {
            Some(row) => Ok(row.try_get::<i64, _>("block_number").map_err(db_err)? as u64),
            None => Ok(0),
        }
    }

    async fn reset_checkpoint(&self, block_number: u64) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT INTO last_processed_block (id, block_number) VALUES (1, ?)
             ON CONFLICT (id) DO UPDATE SET block_number = excluded.block_number",
        )
        .bind(block_number as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl TransferStore for SqliteStorage {
    async fn commit(
        &self,
        transfers: &[TransferEvent],
        checkpoint: u64,
    ) -> Result<CommitSummary, IndexerError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let mut inserted = 0usize;
        for event in transfers {
            let result = sqlx::query(
                "INSERT INTO transfers
                    (from_address, to_address, amount, transaction_hash, block_number, log_index, timestamp)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (transaction_hash, log_index) DO NOTHING",
            )
            .bind(address_to_string(&event.from))
            .bind(address_to_string(&event.to))
            .bind(&event.amount)
            .bind(hash_to_string(&event.transaction_hash))
            .bind(event.block_number as i64)
            .bind(event.log_index as i64)
            .bind(event.timestamp)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            inserted += result.rows_affected() as usize;
        }

        sqlx::query(
            "INSERT INTO last_processed_block (id, block_number) VALUES (1, ?)
             ON CONFLICT (id) DO UPDATE SET block_number = excluded.block_number",
        )
        .bind(checkpoint as i64)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        debug!(inserted, checkpoint, "transfers committed");
        Ok(CommitSummary {
            inserted,
            duplicates: transfers.len() - inserted,
            checkpoint,
        })
    }

    async fn transfer(&self, id: i64) -> Result<Option<StoredTransfer>, IndexerError> {
        let row = sqlx::query("SELECT * FROM transfers WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(Self::row_to_transfer).transpose()
    }

    async fn list_transfers(
        &self,
        query: &TransferQuery,
    ) -> Result<Vec<StoredTransfer>, IndexerError> {
        query.validate()?;
        let rows = sqlx::query(
            "SELECT * FROM transfers
             WHERE (?1 IS NULL OR from_address = ?1 OR to_address = ?1)
               AND (?2 IS NULL OR block_number >= ?2)
             ORDER BY block_number, log_index
             LIMIT ?3 OFFSET ?4",
        )
        .bind(query.address.as_ref().map(address_to_string))
        .bind(query.from_block.map(|b| b as i64))
        .bind(query.limit as i64)
        .bind(query.offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(Self::row_to_transfer).collect()
    }

    async fn transfer_count(&self) -> Result<u64, IndexerError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM transfers")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        let cnt: i64 = row.try_get("cnt").map_err(db_err)?;
        Ok(cnt as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, B256};
    use chrono::{TimeZone, Utc};

    fn ev(tx: u8, block: u64, log_index: u64, from: u8, to: u8) -> TransferEvent {
        TransferEvent {
            from: Address::repeat_byte(from),
            to: Address::repeat_byte(to),
            amount: "340282366920938463463374607431768211456".into(),
            transaction_hash: B256::repeat_byte(tx),
            block_number: block,
            log_index,
            timestamp: Utc.timestamp_opt(1_700_000_000 + block as i64, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn checkpoint_unset_then_upsert() {
        let store = SqliteStorage::in_memory().await.unwrap();
        assert_eq!(store.load_checkpoint().await.unwrap(), 0);

        store.reset_checkpoint(1_000).await.unwrap();
        store.reset_checkpoint(900).await.unwrap();
        assert_eq!(store.load_checkpoint().await.unwrap(), 900);
    }

    #[tokio::test]
    async fn commit_is_idempotent() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let batch = vec![ev(1, 100, 0, 0x11, 0x22), ev(1, 100, 1, 0x22, 0x33)];

        let first = store.commit(&batch, 100).await.unwrap();
        assert_eq!(first.inserted, 2);

        let again = store.commit(&batch, 101).await.unwrap();
        assert_eq!(again.inserted, 0);
        assert_eq!(again.duplicates, 2);
        assert_eq!(store.transfer_count().await.unwrap(), 2);
        assert_eq!(store.load_checkpoint().await.unwrap(), 101);
    }

    #[tokio::test]
    async fn failed_insert_rolls_back_whole_batch() {
        let store = SqliteStorage::in_memory().await.unwrap();
        store.commit(&[ev(1, 100, 0, 0x11, 0x22)], 100).await.unwrap();

        sqlx::query(
            "CREATE TRIGGER reject_block_202 BEFORE INSERT ON transfers
             WHEN NEW.block_number = 202
             BEGIN SELECT RAISE(ABORT, 'rejected'); END",
        )
        .execute(&store.pool)
        .await
        .unwrap();

        let result = store
            .commit(
                &[
                    ev(2, 201, 0, 0x11, 0x22),
                    ev(3, 202, 0, 0x22, 0x33),
                    ev(4, 203, 0, 0x33, 0x44),
                ],
                203,
            )
            .await;

        assert!(matches!(result, Err(IndexerError::Storage(_))));
        assert_eq!(store.transfer_count().await.unwrap(), 1);
        assert_eq!(store.load_checkpoint().await.unwrap(), 100);
    }

    #[tokio::test]
    async fn stored_row_round_trips() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let event = ev(7, 18_000_000, 42, 0x11, 0x22);
        store.commit(std::slice::from_ref(&event), 18_000_000).await.unwrap();

        let listed = store.list_transfers(&TransferQuery::default()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].event, event);

        let fetched = store.transfer(listed[0].id).await.unwrap().unwrap();
        assert_eq!(fetched, listed[0]);
        assert!(store.transfer(listed[0].id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_filters_and_pages() {
        let store = SqliteStorage::in_memory().await.unwrap();
        store
            .commit(
                &[
                    ev(3, 103, 0, 0x11, 0x22),
                    ev(1, 101, 0, 0x33, 0x44),
                    ev(2, 102, 5, 0x22, 0x55),
                    ev(2, 102, 1, 0x66, 0x77),
                ],
                103,
            )
            .await
            .unwrap();

        let all = store.list_transfers(&TransferQuery::default()).await.unwrap();
        let positions: Vec<_> = all.iter().map(|t| t.event.position()).collect();
        assert_eq!(positions, vec![(101, 0), (102, 1), (102, 5), (103, 0)]);

        let by_address = store
            .list_transfers(&TransferQuery::default().address(Address::repeat_byte(0x22)))
            .await
            .unwrap();
        assert_eq!(by_address.len(), 2);

        let page = store
            .list_transfers(&TransferQuery::default().from_block(102).page(2, 1))
            .await
            .unwrap();
        let positions: Vec<_> = page.iter().map(|t| t.event.position()).collect();
        assert_eq!(positions, vec![(102, 5), (103, 0)]);

        assert!(store
            .list_transfers(&TransferQuery::default().page(0, 0))
            .await
            .is_err());
    }
}
