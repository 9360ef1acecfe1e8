//! Checkpoint: the durable "last fully processed block" marker.
//!
//! A checkpoint of `K` means every transfer in blocks `..=K` is durably
//! stored. On restart the indexer resumes from `K + 1` rather than
//! re-indexing from scratch. `0` is the "never written" sentinel.

use async_trait::async_trait;

use crate::error::IndexerError;

/// The value returned by [`CheckpointStore::load_checkpoint`] before any write.
pub const UNSET_CHECKPOINT: u64 = 0;

/// Single-row, last-write-wins storage for the checkpoint.
///
/// Forward progress is written together with transfers via
/// [`TransferStore::commit`](crate::store::TransferStore::commit); this trait
/// only covers reads and operator resets.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the checkpoint, or [`UNSET_CHECKPOINT`] if none was ever saved.
    async fn load_checkpoint(&self) -> Result<u64, IndexerError>;

    /// Overwrite the checkpoint unconditionally.
    ///
    /// Operator action: unlike a commit this may move the checkpoint backward.
    async fn reset_checkpoint(&self, block_number: u64) -> Result<(), IndexerError>;
}

/// Compute where processing starts given the persisted checkpoint, the
/// configured first block, and the current chain height.
///
/// Never returns a block beyond `height + 1`.
pub fn resume_block(checkpoint: u64, starting_block: u64, height: u64) -> u64 {
    let start = if checkpoint == UNSET_CHECKPOINT {
        starting_block
    } else {
        starting_block.max(checkpoint.saturating_add(1))
    };
    start.min(height.saturating_add(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_after_checkpoint() {
        // checkpoint=100, configured start 50 → continue at 101
        assert_eq!(resume_block(100, 50, 105), 101);
    }

    #[test]
    fn configured_start_wins_when_ahead() {
        assert_eq!(resume_block(10, 50, 105), 50);
    }

    #[test]
    fn unset_checkpoint_uses_configured_start() {
        assert_eq!(resume_block(UNSET_CHECKPOINT, 42, 1_000), 42);
    }

    #[test]
    fn clamped_to_chain_head() {
        assert_eq!(resume_block(0, 5_000, 1_000), 1_001);
        assert_eq!(resume_block(1_000, 0, 1_000), 1_001);
    }

    #[test]
    fn max_checkpoint_does_not_overflow() {
        assert_eq!(resume_block(u64::MAX, 1, u64::MAX), u64::MAX);
        assert_eq!(resume_block(u64::MAX, 1, 1_000), 1_001);
    }
}
