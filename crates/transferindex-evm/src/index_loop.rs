//! The main index loop: orchestrates backfill, live tail and reconnects.
//!
//! # INIT
//! Load the checkpoint, query the head, compute the start block
//! (`max(starting_block, checkpoint + 1)`, clamped to `head + 1`).
//!
//! # BACKFILL
//! Walk `[start, head]` in batches of `batch_size` blocks. For each batch:
//! fetch logs → decode → timestamp → commit rows and checkpoint together.
//! A failing batch is retried under the retry policy, never skipped. When the
//! batch end reaches a freshly queried head, switch to LIVE.
//!
//! # LIVE
//! Subscribe from `checkpoint + 1`, close the gap that opened while
//! subscribing, then commit every delivered log with checkpoint
//! `max(checkpoint, block - 1)`.
//!
//! # RECONNECTING
//! Any subscription failure waits the reconnect delay, reloads the checkpoint
//! and re-enters BACKFILL from it. Already-stored events are deduplicated by
//! the store, so re-fetching a partially delivered block is safe.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use transferindex_core::checkpoint::resume_block;
use transferindex_core::error::IndexerError;
use transferindex_core::indexer::{IndexerConfig, IndexerMode, IndexerState};
use transferindex_core::source::ChainSource;
use transferindex_core::store::{CommitSummary, TransferStore};
use transferindex_core::types::{hash_to_string, BlockRange, ChainLog, TransferEvent};

use crate::decoder::{decode_transfer, DecodedTransfer};

/// Why a live session ended without a fatal error.
struct Disconnect {
    reason: String,
    /// At least one live log was committed in this session.
    progressed: bool,
}

/// The transfer index loop.
pub struct IndexLoop {
    config: IndexerConfig,
    source: Arc<dyn ChainSource>,
    store: Arc<dyn TransferStore>,
    cancel: CancellationToken,
    state: watch::Sender<IndexerState>,
}

impl IndexLoop {
    pub fn new(
        config: IndexerConfig,
        source: Arc<dyn ChainSource>,
        store: Arc<dyn TransferStore>,
        cancel: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(IndexerState::default());
        Self {
            config,
            source,
            store,
            cancel,
            state,
        }
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Subscribe to state transitions.
    pub fn status(&self) -> watch::Receiver<IndexerState> {
        self.state.subscribe()
    }

    /// The token that stops this loop.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until cancelled, until `to_block` is reached, or until a fatal error.
    ///
    /// Cancellation is not an error: it returns `Ok(())`.
    pub async fn run(&self) -> Result<(), IndexerError> {
        let result = self.run_inner().await;
        self.state.send_modify(|s| s.mode = IndexerMode::Stopped);
        match result {
            Err(IndexerError::Cancelled) => {
                tracing::info!(checkpoint = self.checkpoint(), "Indexer cancelled");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, checkpoint = self.checkpoint(), "Indexer stopped");
                Err(e)
            }
            Ok(()) => {
                tracing::info!(checkpoint = self.checkpoint(), "Indexer finished");
                Ok(())
            }
        }
    }

    async fn run_inner(&self) -> Result<(), IndexerError> {
        self.config.validate()?;
        let mut next = self.init().await?;

        if let Some(end) = self.config.to_block {
            // bounded run: catch up to `end`, waiting for the chain if needed
            loop {
                next = self.catch_up(next).await?;
                if next > end {
                    return Ok(());
                }
                self.sleep(self.config.retry.initial).await?;
            }
        }

        if self.config.backfill {
            next = self.catch_up(next).await?;
        }

        let mut attempt = 0u32;
        loop {
            let disconnect = self.live(next).await?;
            if disconnect.progressed {
                attempt = 0;
            }
            attempt += 1;

            self.state.send_modify(|s| {
                s.mode = IndexerMode::Reconnecting;
                s.reconnects += 1;
            });
            let delay = self.config.reconnect.next_delay(attempt).ok_or_else(|| {
                IndexerError::RetriesExhausted {
                    attempts: attempt,
                    last_error: disconnect.reason.clone(),
                }
            })?;
            tracing::warn!(
                reason = %disconnect.reason,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Subscription lost, reconnecting"
            );
            self.sleep(delay).await?;

            let checkpoint = self
                .with_retry("load checkpoint", || self.store.load_checkpoint())
                .await?;
            self.state.send_modify(|s| s.checkpoint = checkpoint);
            next = resume_block(checkpoint, self.config.starting_block, u64::MAX);
            next = self.catch_up(next).await?;
        }
    }

    // ─── INIT ───────────────────────────────────────────────────────────────────

    /// Returns the first block to process. Every failure here is fatal.
    async fn init(&self) -> Result<u64, IndexerError> {
        self.set_mode(IndexerMode::Init);

        let mut checkpoint = self
            .store
            .load_checkpoint()
            .await
            .map_err(|e| IndexerError::Config(format!("cannot read checkpoint: {e}")))?;
        let height = self.cancellable(self.source.height()).await.map_err(|e| match e {
            IndexerError::Cancelled => e,
            e => IndexerError::Config(format!("provider unreachable: {e}")),
        })?;

        if !self.config.backfill && self.config.to_block.is_none() && height > checkpoint {
            self.store
                .commit(&[], height)
                .await
                .map_err(|e| IndexerError::Config(format!("cannot write checkpoint: {e}")))?;
            tracing::info!(skipped_to = height, "Historical backfill disabled");
            checkpoint = height;
        }
        self.state.send_modify(|s| s.checkpoint = checkpoint);

        let start = resume_block(checkpoint, self.config.starting_block, height);
        if start < resume_block(checkpoint, self.config.starting_block, u64::MAX) {
            tracing::warn!(
                starting_block = self.config.starting_block,
                height,
                "Starting block is beyond the chain head, clamping"
            );
        }
        tracing::info!(
            contract = %self.config.contract,
            checkpoint,
            height,
            start,
            "Indexer starting"
        );
        Ok(start)
    }

    // ─── BACKFILL ───────────────────────────────────────────────────────────────

    /// Process every block from `next` up to the head (or `to_block`), then
    /// return the first unprocessed block.
    async fn catch_up(&self, mut next: u64) -> Result<u64, IndexerError> {
        loop {
            let height = self.with_retry("height", || self.source.height()).await?;
            let end = self.config.to_block.map_or(height, |t| t.min(height));
            if next > end {
                return Ok(next);
            }

            let target = BlockRange::new(next, end);
            self.state.send_modify(|s| {
                s.mode = IndexerMode::Backfill;
                s.target = Some(target);
            });
            tracing::info!(%target, blocks = target.len(), "Starting backfill");

            for batch in target.chunks(self.config.batch_size) {
                let summary = self
                    .with_retry("backfill batch", || self.process_batch(batch))
                    .await?;
                self.state.send_modify(|s| s.checkpoint = summary.checkpoint);
                tracing::info!(
                    from = batch.from,
                    to = batch.to,
                    target = end,
                    inserted = summary.inserted,
                    duplicates = summary.duplicates,
                    "Backfill batch complete"
                );
                next = batch.to + 1;
            }

            tracing::info!(at = end, "Backfill complete");
            self.state.send_modify(|s| s.target = None);
        }
    }

    async fn process_batch(&self, batch: BlockRange) -> Result<CommitSummary, IndexerError> {
        let logs = self
            .cancellable(self.source.logs_in_range(batch.from, batch.to, self.config.contract))
            .await?;
        let decoded: Vec<_> = logs.iter().filter_map(|log| self.decode(log)).collect();
        let events = self.stamp(decoded).await?;
        self.store.commit(&events, batch.to).await
    }

    /// Attach block timestamps, one lookup per distinct block, and order the
    /// result canonically.
    async fn stamp(&self, decoded: Vec<DecodedTransfer>) -> Result<Vec<TransferEvent>, IndexerError> {
        let mut times: BTreeMap<u64, DateTime<Utc>> = BTreeMap::new();
        let mut events = Vec::with_capacity(decoded.len());
        for transfer in decoded {
            let ts = match times.get(&transfer.block_number).copied() {
                Some(ts) => ts,
                None => {
                    let ts = self
                        .cancellable(self.source.block_time(transfer.block_number))
                        .await?;
                    times.insert(transfer.block_number, ts);
                    ts
                }
            };
            events.push(transfer.at(ts));
        }
        events.sort_by_key(TransferEvent::position);
        Ok(events)
    }

    /// Decode one log, logging and dropping anything that is not a transfer
    /// of the indexed contract.
    fn decode(&self, log: &ChainLog) -> Option<DecodedTransfer> {
        if log.removed {
            tracing::warn!(
                block = log.block_number,
                log_index = log.log_index,
                tx = %hash_to_string(&log.transaction_hash),
                "Skipping log removed by reorg"
            );
            return None;
        }
        if log.address != self.config.contract {
            tracing::debug!(address = %log.address, "Skipping log from another contract");
            return None;
        }
        match decode_transfer(log) {
            Ok(transfer) => Some(transfer),
            Err(e) => {
                tracing::warn!(
                    block = log.block_number,
                    log_index = log.log_index,
                    tx = %hash_to_string(&log.transaction_hash),
                    error = %e,
                    "Skipping malformed log"
                );
                None
            }
        }
    }

    // ─── LIVE ───────────────────────────────────────────────────────────────────

    async fn live(&self, mut next: u64) -> Result<Disconnect, IndexerError> {
        let disconnect = |reason: String, progressed: bool| Disconnect { reason, progressed };

        let mut subscription = match self
            .cancellable(self.source.subscribe_logs(next, self.config.contract))
            .await
        {
            Ok(sub) => sub,
            Err(IndexerError::Cancelled) => return Err(IndexerError::Cancelled),
            Err(e) => return Ok(disconnect(e.to_string(), false)),
        };

        // blocks mined between the last head query and the subscription
        next = self.catch_up(next).await?;
        self.state.send_modify(|s| {
            s.mode = IndexerMode::Live;
            s.target = None;
            s.retries = 0;
        });
        tracing::info!(from_block = next, "Following chain tip");

        let mut progressed = false;
        let mut block_time = None;
        loop {
            let item = self
                .cancellable(async { Ok(subscription.next().await) })
                .await?;
            let log = match item {
                None => return Ok(disconnect("subscription stream ended".into(), progressed)),
                Some(Err(e)) => return Ok(disconnect(e.to_string(), progressed)),
                Some(Ok(log)) => log,
            };
            if log.block_number < next {
                tracing::trace!(block = log.block_number, "Log already covered by checkpoint");
                continue;
            }

            match self.persist_live(&log, &mut block_time).await {
                Ok(summary) => {
                    progressed = true;
                    next = log.block_number;
                    tracing::debug!(
                        block = log.block_number,
                        log_index = log.log_index,
                        inserted = summary.inserted,
                        checkpoint = summary.checkpoint,
                        "Live log committed"
                    );
                }
                Err(IndexerError::Cancelled) => return Err(IndexerError::Cancelled),
                Err(e) => {
                    // the log is re-fetched by the reconnect backfill
                    return Ok(disconnect(format!("live persist failed: {e}"), progressed));
                }
            }
        }
    }

    /// Commit one live log. Block `log.block_number` may still have
    /// undelivered logs, so the checkpoint only covers the blocks before it.
    ///
    /// `block_time` caches the timestamp of the last block seen in this
    /// session; it is looked up again only when the block changes.
    async fn persist_live(
        &self,
        log: &ChainLog,
        block_time: &mut Option<(u64, DateTime<Utc>)>,
    ) -> Result<CommitSummary, IndexerError> {
        let checkpoint = self.checkpoint().max(log.block_number.saturating_sub(1));
        let events = match self.decode(log) {
            Some(transfer) => {
                let ts = match *block_time {
                    Some((block, ts)) if block == log.block_number => ts,
                    _ => {
                        let ts = self.cancellable(self.source.block_time(log.block_number)).await?;
                        *block_time = Some((log.block_number, ts));
                        ts
                    }
                };
                vec![transfer.at(ts)]
            }
            None => Vec::new(),
        };
        let summary = self.store.commit(&events, checkpoint).await?;
        self.state.send_modify(|s| s.checkpoint = summary.checkpoint);
        Ok(summary)
    }

    // ─── Helpers ────────────────────────────────────────────────────────────────

    fn checkpoint(&self) -> u64 {
        self.state.borrow().checkpoint
    }

    fn set_mode(&self, mode: IndexerMode) {
        self.state.send_modify(|s| s.mode = mode);
    }

    /// Retry `op` under the retry policy until it succeeds, the policy gives
    /// up, or the loop is cancelled.
    async fn with_retry<T, F, Fut>(&self, what: &'static str, mut op: F) -> Result<T, IndexerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, IndexerError>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        self.state.send_modify(|s| s.retries = 0);
                    }
                    return Ok(value);
                }
                Err(IndexerError::Cancelled) => return Err(IndexerError::Cancelled),
                Err(e) => {
                    attempt += 1;
                    self.state.send_modify(|s| s.retries = attempt);
                    let Some(delay) = self.config.retry.next_delay(attempt) else {
                        tracing::error!(what, attempt, error = %e, "Max retries exceeded");
                        return Err(IndexerError::RetriesExhausted {
                            attempts: attempt,
                            last_error: e.to_string(),
                        });
                    };
                    tracing::warn!(
                        what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying"
                    );
                    self.sleep(delay).await?;
                }
            }
        }
    }

    /// Race `fut` against the cancellation token.
    async fn cancellable<T>(
        &self,
        fut: impl Future<Output = Result<T, IndexerError>>,
    ) -> Result<T, IndexerError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(IndexerError::Cancelled),
            result = fut => result,
        }
    }

    async fn sleep(&self, delay: Duration) -> Result<(), IndexerError> {
        self.cancellable(async {
            tokio::time::sleep(delay).await;
            Ok(())
        })
        .await
    }
}
