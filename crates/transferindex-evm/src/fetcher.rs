//! Raw JSON-RPC log and block shapes.
//!
//! `eth_getLogs` results and `eth_subscription` payloads share the same log
//! object; both are parsed here into [`ChainLog`].

use alloy_primitives::{Address, Bytes, B256};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use transferindex_core::error::IndexerError;
use transferindex_core::types::ChainLog;

use crate::rpc::parse_quantity;

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    #[serde(rename = "blockNumber")]
    pub block_number: Option<String>,
    #[serde(rename = "blockHash")]
    pub block_hash: Option<B256>,
    #[serde(rename = "transactionHash")]
    pub tx_hash: Option<B256>,
    #[serde(rename = "logIndex")]
    pub log_index: Option<String>,
    #[serde(default)]
    pub removed: bool,
}

impl TryFrom<RawLog> for ChainLog {
    type Error = IndexerError;

    /// Fails for pending logs, which carry no block position.
    fn try_from(raw: RawLog) -> Result<Self, Self::Error> {
        let missing = |field: &str| IndexerError::Rpc(format!("log without {field}"));
        Ok(ChainLog {
            address: raw.address,
            topics: raw.topics,
            data: raw.data.to_vec(),
            block_number: parse_quantity(raw.block_number.as_deref().ok_or_else(|| missing("blockNumber"))?)?,
            block_hash: raw.block_hash,
            log_index: parse_quantity(raw.log_index.as_deref().ok_or_else(|| missing("logIndex"))?)?,
            transaction_hash: raw.tx_hash.ok_or_else(|| missing("transactionHash"))?,
            removed: raw.removed,
        })
    }
}

/// The subset of `eth_getBlockByNumber` the indexer reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawBlock {
    pub number: String,
    pub timestamp: String,
}

impl RawBlock {
    pub fn timestamp(&self) -> Result<DateTime<Utc>, IndexerError> {
        let secs = parse_quantity(&self.timestamp)?;
        let secs = i64::try_from(secs)
            .map_err(|_| IndexerError::Rpc(format!("block timestamp {secs} out of range")))?;
        Utc.timestamp_opt(secs, 0)
            .single()
            .ok_or_else(|| IndexerError::Rpc(format!("block timestamp {secs} out of range")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG_JSON: &str = r#"{
        "address": "0xdac17f958d2ee523a2206206994597c13d831ec7",
        "topics": [
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef",
            "0x00000000000000000000000028c6c06298d514db089934071355e5743bf21d60",
            "0x000000000000000000000000a9d1e08c7793af67e9d92fe308d5697fb81d3e43"
        ],
        "data": "0x00000000000000000000000000000000000000000000000000000000000f4240",
        "blockNumber": "0x112a880",
        "blockHash": "0x1111111111111111111111111111111111111111111111111111111111111111",
        "transactionHash": "0x2222222222222222222222222222222222222222222222222222222222222222",
        "transactionIndex": "0x3",
        "logIndex": "0x1f",
        "removed": false
    }"#;

    #[test]
    fn raw_log_to_chain_log() {
        let raw: RawLog = serde_json::from_str(LOG_JSON).unwrap();
        let log = ChainLog::try_from(raw).unwrap();
        assert_eq!(log.block_number, 18_000_000);
        assert_eq!(log.log_index, 31);
        assert_eq!(log.topics.len(), 3);
        assert_eq!(log.data.len(), 32);
        assert_eq!(log.transaction_hash, B256::repeat_byte(0x22));
        assert!(!log.removed);
    }

    #[test]
    fn pending_log_rejected() {
        let mut value: serde_json::Value = serde_json::from_str(LOG_JSON).unwrap();
        value["blockNumber"] = serde_json::Value::Null;
        let raw: RawLog = serde_json::from_value(value).unwrap();
        assert!(ChainLog::try_from(raw).is_err());
    }

    #[test]
    fn block_timestamp() {
        let block = RawBlock {
            number: "0x112a880".into(),
            timestamp: "0x6553f100".into(),
        };
        assert_eq!(block.timestamp().unwrap().timestamp(), 1_700_000_000);
    }
}
