//! transferindex-core: foundation for the checkpointed ERC-20 transfer indexer.
//!
//! # Architecture
//!
//! ```text
//! IndexerBuilder → IndexLoop
//!                      ├── ChainSource      (height, ranged logs, subscription, block time)
//!                      ├── decode_transfer  (raw log → TransferEvent)
//!                      ├── BackoffPolicy    (batch retries, reconnect waits)
//!                      └── TransferStore    (idempotent rows + checkpoint, one transaction)
//! ```

pub mod backoff;
pub mod checkpoint;
pub mod error;
pub mod indexer;
pub mod source;
pub mod store;
pub mod types;

pub use backoff::BackoffPolicy;
pub use checkpoint::{resume_block, CheckpointStore, UNSET_CHECKPOINT};
pub use error::{DecodeError, IndexerError};
pub use indexer::{IndexerConfig, IndexerMode, IndexerState, DEFAULT_CONTRACT};
pub use source::{ChainSource, LogSubscription};
pub use store::{CommitSummary, StoredTransfer, TransferQuery, TransferStore};
pub use types::{address_to_string, hash_to_string, BlockRange, ChainLog, TransferEvent};
