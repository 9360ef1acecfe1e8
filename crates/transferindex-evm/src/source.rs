//! [`ChainSource`] over a JSON-RPC provider: HTTP for queries, WebSocket for
//! the live subscription.

use std::time::Duration;

use alloy_primitives::Address;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use transferindex_core::error::IndexerError;
use transferindex_core::source::{ChainSource, LogSubscription};
use transferindex_core::types::{address_to_string, BlockRange, ChainLog};

use crate::fetcher::{RawBlock, RawLog};
use crate::rpc::{parse_quantity, to_quantity, HttpRpcClient};
use crate::subscription;

/// Connection settings for [`EvmChainSource`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvmSourceConfig {
    /// HTTP JSON-RPC endpoint.
    pub rpc_url: String,
    /// WebSocket endpoint. Derived from `rpc_url` when `None`.
    pub ws_url: Option<String>,
    /// Largest block span requested in one `eth_getLogs` call.
    pub max_log_range: u64,
    /// Timeout for each HTTP request and for the subscription handshake.
    pub request_timeout_secs: u64,
}

impl Default for EvmSourceConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".into(),
            ws_url: None,
            max_log_range: 2_000,
            request_timeout_secs: 30,
        }
    }
}

/// Derive a WebSocket endpoint from an HTTP one by swapping the scheme.
pub fn derive_ws_url(rpc_url: &str) -> Result<String, IndexerError> {
    if let Some(rest) = rpc_url.strip_prefix("https://") {
        Ok(format!("wss://{rest}"))
    } else if let Some(rest) = rpc_url.strip_prefix("http://") {
        Ok(format!("ws://{rest}"))
    } else if rpc_url.starts_with("ws://") || rpc_url.starts_with("wss://") {
        Ok(rpc_url.to_string())
    } else {
        Err(IndexerError::Config(format!(
            "cannot derive a WebSocket URL from {rpc_url:?}"
        )))
    }
}

/// EVM JSON-RPC chain source.
pub struct EvmChainSource {
    http: HttpRpcClient,
    ws_url: String,
    max_log_range: u64,
    timeout: Duration,
}

impl EvmChainSource {
    pub fn new(config: EvmSourceConfig) -> Result<Self, IndexerError> {
        if config.max_log_range == 0 {
            return Err(IndexerError::Config("max_log_range must be non-zero".into()));
        }
        let ws_url = match config.ws_url {
            Some(url) => url,
            None => derive_ws_url(&config.rpc_url)?,
        };
        let timeout = Duration::from_secs(config.request_timeout_secs);
        Ok(Self {
            http: HttpRpcClient::new(config.rpc_url, timeout)?,
            ws_url,
            max_log_range: config.max_log_range,
            timeout,
        })
    }

    pub fn rpc_url(&self) -> &str {
        self.http.url()
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }
}

#[async_trait]
impl ChainSource for EvmChainSource {
    async fn height(&self) -> Result<u64, IndexerError> {
        let hex: String = self.http.call("eth_blockNumber", vec![]).await?;
        parse_quantity(&hex)
    }

    async fn logs_in_range(
        &self,
        from: u64,
        to: u64,
        contract: Address,
    ) -> Result<Vec<ChainLog>, IndexerError> {
        let mut logs = Vec::new();
        for chunk in BlockRange::new(from, to).chunks(self.max_log_range) {
            let filter = json!({
                "address": address_to_string(&contract),
                "fromBlock": to_quantity(chunk.from),
                "toBlock": to_quantity(chunk.to),
            });
            let raw: Vec<RawLog> = self.http.call("eth_getLogs", vec![filter]).await?;
            tracing::debug!(range = %chunk, count = raw.len(), "fetched logs");
            for log in raw {
                logs.push(ChainLog::try_from(log)?);
            }
        }
        logs.sort_by_key(ChainLog::position);
        Ok(logs)
    }

    async fn subscribe_logs(
        &self,
        from_block: u64,
        contract: Address,
    ) -> Result<LogSubscription, IndexerError> {
        subscription::subscribe_logs(&self.ws_url, from_block, contract, self.timeout).await
    }

    async fn block_time(&self, number: u64) -> Result<DateTime<Utc>, IndexerError> {
        let block: Option<RawBlock> = self
            .http
            .call("eth_getBlockByNumber", vec![json!(to_quantity(number)), json!(false)])
            .await?;
        // a lagging node may not have the block yet
        block
            .ok_or_else(|| IndexerError::Rpc(format!("block {number} not found")))?
            .timestamp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_from_http() {
        assert_eq!(
            derive_ws_url("https://mainnet.infura.io/v3/key").unwrap(),
            "wss://mainnet.infura.io/v3/key"
        );
        assert_eq!(derive_ws_url("http://localhost:8545").unwrap(), "ws://localhost:8545");
        assert_eq!(derive_ws_url("ws://node:8546").unwrap(), "ws://node:8546");
        assert!(derive_ws_url("localhost:8545").is_err());
    }

    #[test]
    fn explicit_ws_url_wins() {
        let source = EvmChainSource::new(EvmSourceConfig {
            rpc_url: "https://rpc.example".into(),
            ws_url: Some("wss://ws.example".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(source.ws_url(), "wss://ws.example");
        assert_eq!(source.rpc_url(), "https://rpc.example");
    }

    #[test]
    fn zero_log_range_rejected() {
        let result = EvmChainSource::new(EvmSourceConfig {
            max_log_range: 0,
            ..Default::default()
        });
        assert!(matches!(result, Err(IndexerError::Config(_))));
    }
}
