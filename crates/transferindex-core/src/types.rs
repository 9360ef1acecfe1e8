//! Shared types for the indexing pipeline.

use alloy_primitives::{Address, B256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── ChainLog ─────────────────────────────────────────────────────────────────

/// A raw log as delivered by a ranged fetch or a subscription push.
///
/// Ephemeral: produced per fetch, consumed immediately by the decoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainLog {
    /// Contract that emitted the log.
    pub address: Address,
    /// Indexed topics; `topics[0]` is the event signature hash.
    pub topics: Vec<B256>,
    /// Non-indexed ABI-encoded payload.
    pub data: Vec<u8>,
    pub block_number: u64,
    /// `None` for pending logs; always set for mined ones.
    pub block_hash: Option<B256>,
    /// Position of the log within its block.
    pub log_index: u64,
    pub transaction_hash: B256,
    /// Set by the provider when a reorg dropped the log.
    #[serde(default)]
    pub removed: bool,
}

impl ChainLog {
    /// Canonical ordering key: (block number, log index).
    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}

// ─── TransferEvent ────────────────────────────────────────────────────────────

/// A decoded ERC-20 `Transfer`, immutable once created.
///
/// `(transaction_hash, log_index)` identifies the event; the store relies on
/// that pair for deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEvent {
    pub from: Address,
    pub to: Address,
    /// Raw token amount as an exact base-10 integer. No decimals applied.
    pub amount: String,
    pub transaction_hash: B256,
    pub block_number: u64,
    pub log_index: u64,
    /// Timestamp of the containing block.
    pub timestamp: DateTime<Utc>,
}

impl TransferEvent {
    /// Deduplication key.
    pub fn key(&self) -> (B256, u64) {
        (self.transaction_hash, self.log_index)
    }

    /// Canonical ordering key: (block number, log index).
    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}

/// Render an address the way it is stored: EIP-55 checksummed.
pub fn address_to_string(address: &Address) -> String {
    address.to_checksum(None)
}

/// Render a 32-byte hash the way it is stored: `0x` + 64 lowercase hex digits.
pub fn hash_to_string(hash: &B256) -> String {
    alloy_primitives::hex::encode_prefixed(hash)
}

// ─── BlockRange ───────────────────────────────────────────────────────────────

/// An inclusive block range `[from, to]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    pub fn new(from: u64, to: u64) -> Self {
        Self { from, to }
    }

    /// Number of blocks in the range (0 if `to < from`).
    pub fn len(&self) -> u64 {
        if self.to < self.from {
            0
        } else {
            self.to - self.from + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Split into consecutive sub-ranges of at most `size` blocks.
    pub fn chunks(&self, size: u64) -> impl Iterator<Item = BlockRange> {
        let size = size.max(1);
        let end = self.to;
        let mut next = if self.is_empty() { None } else { Some(self.from) };
        std::iter::from_fn(move || {
            let start = next?;
            let stop = start.saturating_add(size - 1).min(end);
            next = if stop >= end { None } else { Some(stop + 1) };
            Some(BlockRange::new(start, stop))
        })
    }
}

impl std::fmt::Display for BlockRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..={}", self.from, self.to)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
