//! Row mapping shared by the SQL backends.

use alloy_primitives::{Address, B256};
use chrono::{DateTime, Utc};

use transferindex_core::error::IndexerError;
use transferindex_core::store::StoredTransfer;
use transferindex_core::types::TransferEvent;

pub(crate) fn db_err(e: sqlx::Error) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

/// Column values of one `transfers` row.
pub(crate) struct TransferRow {
    pub id: i64,
    pub from_address: String,
    pub to_address: String,
    pub amount: String,
    pub transaction_hash: String,
    pub block_number: i64,
    pub log_index: i64,
    pub timestamp: DateTime<Utc>,
}

impl TryFrom<TransferRow> for StoredTransfer {
    type Error = IndexerError;

    fn try_from(row: TransferRow) -> Result<Self, Self::Error> {
        let corrupt = |column: &str, value: &str| {
            IndexerError::Storage(format!("row {}: invalid {column} {value:?}", row.id))
        };
        Ok(StoredTransfer {
            id: row.id,
            event: TransferEvent {
                from: row
                    .from_address
                    .parse::<Address>()
                    .map_err(|_| corrupt("from_address", &row.from_address))?,
                to: row
                    .to_address
                    .parse::<Address>()
                    .map_err(|_| corrupt("to_address", &row.to_address))?,
                transaction_hash: row
                    .transaction_hash
                    .parse::<B256>()
                    .map_err(|_| corrupt("transaction_hash", &row.transaction_hash))?,
                amount: row.amount.clone(),
                block_number: row.block_number as u64,
                log_index: row.log_index as u64,
                timestamp: row.timestamp,
            },
        })
    }
}
