//! Error types for the transfer indexing pipeline.

use thiserror::Error;

/// Errors that can occur during indexing.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Transient provider failure (timeout, connection loss, node-side error).
    #[error("RPC error: {0}")]
    Rpc(String),

    /// A log that cannot be decoded into a transfer.
    #[error("Malformed log: {0}")]
    Decode(#[from] DecodeError),

    /// The store is unavailable or rejected a write.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The live subscription ended or reported an error.
    #[error("Subscription terminated: {0}")]
    SubscriptionTerminated(String),

    /// Invalid configuration or a failed startup precondition.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// The shutdown signal fired while the indexer was suspended.
    #[error("Indexer cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Returns `true` if retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Rpc(_) | Self::Storage(_) | Self::SubscriptionTerminated(_)
        )
    }

    /// Returns `true` if this is the shutdown signal rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Reasons a raw log is not a well-formed ERC-20 `Transfer`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("expected 3 topics, got {actual}")]
    TopicCount { actual: usize },

    #[error("topic0 {topic0} is not the Transfer signature")]
    NotTransfer { topic0: String },

    #[error("expected a 32-byte amount, got {actual} bytes")]
    DataLength { actual: usize },
}
