//! The top-level sync loop.
//!
//! One controller drives the whole pipeline: probe the node tip, run the
//! reorg check, rewind if needed, then pull windows of blocks through the
//! WorkPool and commit them through the Projector in height order. Errors
//! are classified here — transient ones throttle and retry, structural ones
//! halt — and the shutdown signal is honored between commits, never inside
//! one.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;

use ergindex_core::error::{IndexError, NodeError, StoreError};
use ergindex_core::metrics::Metrics;
use ergindex_core::types::ParsedBlock;
use ergindex_core::IndexerConfig;
use ergindex_node::NodeApi;
use ergindex_storage::Store;

use crate::projector::Projector;
use crate::reorg::{ReorgDetector, ReorgOutcome};
use crate::workpool::WorkPool;

/// Observable phase of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Probing,
    ReorgCheck,
    Rewinding,
    Ingesting,
    Halted,
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Probing => write!(f, "probing"),
            Self::ReorgCheck => write!(f, "reorg-check"),
            Self::Rewinding => write!(f, "rewinding"),
            Self::Ingesting => write!(f, "ingesting"),
            Self::Halted => write!(f, "halted"),
        }
    }
}

enum Tick {
    CaughtUp { target: u64 },
    Progressed,
}

/// Drives ingestion until shutdown or a fatal error.
pub struct SyncController<S, N> {
    store: Arc<S>,
    node: Arc<N>,
    config: IndexerConfig,
    metrics: Arc<Metrics>,
    projector: Projector<S>,
    pool: WorkPool<N>,
    detector: ReorgDetector,
    shutdown: watch::Receiver<bool>,
    state: ControllerState,
    /// Current fetch concurrency; halved on node trouble, recovered on
    /// successful windows, never above `config.max_workers`.
    workers: usize,
    /// Consecutive failures for a single height, for poison detection.
    strikes: Option<(u64, u32)>,
    store_failures: u32,
}

impl<S, N> SyncController<S, N>
where
    S: Store + 'static,
    N: NodeApi + 'static,
{
    pub fn new(
        store: Arc<S>,
        node: Arc<N>,
        config: IndexerConfig,
        metrics: Arc<Metrics>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            projector: Projector::new(Arc::clone(&store), Arc::clone(&metrics)),
            pool: WorkPool::new(Arc::clone(&node), config.network_prefix),
            detector: ReorgDetector::new(config.max_reorg_depth),
            workers: config.max_workers,
            store,
            node,
            metrics,
            shutdown,
            state: ControllerState::Idle,
            strikes: None,
            store_failures: 0,
            config,
        }
    }

    /// Run until shutdown (returns `Ok`) or a fatal error (returns `Err`).
    pub async fn run(mut self) -> Result<(), IndexError> {
        tracing::info!(
            node = %self.config.node_url,
            batch_size = self.config.batch_size,
            max_workers = self.config.max_workers,
            "sync controller starting"
        );

        let poll = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            if self.shutting_down() {
                break;
            }
            self.set_state(ControllerState::Probing);

            match self.tick().await {
                Ok(Tick::CaughtUp { target }) => {
                    self.set_state(ControllerState::Idle);
                    let _ = self.store.set_target(target, false).await;
                    tracing::debug!(target, "caught up with node tip");
                    self.sleep(poll).await;
                }
                Ok(Tick::Progressed) => {
                    self.store_failures = 0;
                }
                Err(IndexError::Cancelled) => break,
                Err(err) if err.is_fatal() => {
                    self.set_state(ControllerState::Halted);
                    tracing::error!(error = %err, snapshot = ?self.metrics.snapshot(), "pipeline halted");
                    return Err(err);
                }
                Err(IndexError::Node(err)) if err.is_unavailable() => {
                    tracing::warn!(error = %err, "node unavailable, backing off");
                    self.sleep(poll * 4).await;
                }
                Err(IndexError::Node(err)) if err.is_not_found() => {
                    // Tip race: the node advertised a height it no longer
                    // serves. Re-probe on the next tick.
                    tracing::debug!(error = %err, "tip race, re-planning");
                    self.sleep(poll).await;
                }
                Err(IndexError::Node(err)) => {
                    tracing::warn!(error = %err, "unexpected node error, backing off");
                    self.sleep(poll * 4).await;
                }
                Err(IndexError::Store(err)) => {
                    self.store_failures += 1;
                    if self.store_failures > self.config.max_block_retries {
                        self.set_state(ControllerState::Halted);
                        tracing::error!(error = %err, "store persistently failing");
                        return Err(IndexError::Store(err));
                    }
                    tracing::warn!(
                        error = %err,
                        failures = self.store_failures,
                        "store error, retrying"
                    );
                    self.sleep(retry_backoff(self.store_failures)).await;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "unexpected error, backing off");
                    self.sleep(poll).await;
                }
            }
        }

        // Graceful exit: commits are awaited inline, so nothing is in flight
        // by the time we get here.
        if let Ok(status) = self.store.sync_status().await {
            let _ = self.store.set_target(status.target_height, false).await;
        }
        tracing::info!(snapshot = ?self.metrics.snapshot(), "sync controller stopped cleanly");
        Ok(())
    }

    async fn tick(&mut self) -> Result<Tick, IndexError> {
        let info = self.node.info().await?;
        let target = info
            .full_height
            .ok_or_else(|| NodeError::InvalidResponse("info has no fullHeight".into()))?;
        Metrics::set(&self.metrics.target_height, target);

        let tip = self.store.tip().await?;
        let caught_up = match &tip {
            Some(tip) => tip.height >= target,
            // Fresh store: nothing to do until the node reaches the
            // configured starting height.
            None => self.config.initial_height > target,
        };
        if caught_up {
            return Ok(Tick::CaughtUp { target });
        }
        self.store.set_target(target, true).await?;

        let mut next = match &tip {
            Some(tip) => {
                self.set_state(ControllerState::ReorgCheck);
                match self
                    .detector
                    .check(self.node.as_ref(), self.store.as_ref(), tip)
                    .await?
                {
                    ReorgOutcome::NoReorg => tip.height + 1,
                    ReorgOutcome::Reorg {
                        fork_height,
                        depth,
                        node_id_at_tip,
                    } => {
                        self.set_state(ControllerState::Rewinding);
                        tracing::warn!(
                            fork_height,
                            depth,
                            node_tip = %node_id_at_tip,
                            "chain reorganization detected"
                        );
                        let report = self.store.rewind_to_height(fork_height).await?;
                        Metrics::incr(&self.metrics.chain_reorg_events_total);
                        tracing::info!(
                            blocks = report.blocks_orphaned,
                            outputs_unspent = report.outputs_unspent,
                            deltas_reversed = report.deltas_reversed,
                            "rewind complete"
                        );
                        fork_height + 1
                    }
                }
            }
            None => self.config.initial_height,
        };

        self.set_state(ControllerState::Ingesting);
        while next <= target {
            if self.shutting_down() {
                return Ok(Tick::Progressed);
            }
            let hi = (next + self.config.batch_size - 1).min(target);
            match self.ingest_window(next, hi).await {
                Ok(()) => {
                    next = hi + 1;
                    self.workers = (self.workers + 1).min(self.config.max_workers);
                }
                Err(err) => {
                    self.absorb_window_error(err).await?;
                    return Ok(Tick::Progressed);
                }
            }
        }
        Ok(Tick::Progressed)
    }

    /// Commit `[lo, hi]` in height order. Dropping the stream on error or
    /// shutdown cancels the in-flight sibling fetches.
    async fn ingest_window(&mut self, lo: u64, hi: u64) -> Result<(), IndexError> {
        tracing::debug!(lo, hi, workers = self.workers, "ingesting window");
        let mut stream = self.pool.fetch_ordered(lo, hi, self.workers);

        loop {
            if self.shutting_down() {
                return Err(IndexError::Cancelled);
            }
            let item = tokio::select! {
                biased;
                _ = self.shutdown.changed() => return Err(IndexError::Cancelled),
                item = stream.next() => item,
            };
            let Some((height, result)) = item else { break };
            let parsed = result?;

            self.project_with_retry(&parsed).await?;
            Metrics::incr(&self.metrics.indexed_blocks);
            if matches!(self.strikes, Some((h, _)) if h == height) {
                self.strikes = None;
            }
            tracing::debug!(height, id = %parsed.id(), txs = parsed.transactions.len(), "committed");
        }
        Ok(())
    }

    async fn project_with_retry(&mut self, parsed: &ParsedBlock) -> Result<(), IndexError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.projector.project(parsed).await {
                Ok(_) => return Ok(()),
                Err(IndexError::Store(err))
                    if err.is_retryable() && attempt < self.config.max_block_retries =>
                {
                    tracing::warn!(
                        height = parsed.height(),
                        attempt,
                        error = %err,
                        "projection failed, retrying"
                    );
                    self.sleep(retry_backoff(attempt)).await;
                }
                Err(IndexError::Store(StoreError::Constraint(reason))) => {
                    // The batch itself is impossible — referential or balance
                    // integrity cannot hold. Treated like a bad block.
                    return Err(IndexError::BadBlock {
                        height: parsed.height(),
                        reason,
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Decide whether a window failure is survivable. `Ok(())` means
    /// re-plan on the next tick; `Err` halts or cancels.
    async fn absorb_window_error(&mut self, err: IndexError) -> Result<(), IndexError> {
        match err {
            IndexError::Cancelled => Err(IndexError::Cancelled),
            IndexError::BadBlock { height, reason } => {
                let strikes = match self.strikes {
                    Some((h, n)) if h == height => n + 1,
                    _ => 1,
                };
                self.strikes = Some((height, strikes));
                if strikes >= self.config.max_block_retries {
                    tracing::error!(height, %reason, strikes, "block is poison, halting");
                    self.store.mark_poison(height, "", &reason).await?;
                    return Err(IndexError::BadBlock { height, reason });
                }
                tracing::warn!(height, %reason, strikes, "bad block, will refetch");
                self.sleep(retry_backoff(strikes)).await;
                Ok(())
            }
            IndexError::Node(err) if err.is_unavailable() => {
                self.workers = (self.workers / 2).max(1);
                tracing::warn!(
                    error = %err,
                    workers = self.workers,
                    "node trouble mid-window, throttling fetch concurrency"
                );
                self.sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
                Ok(())
            }
            IndexError::Node(err) if err.is_not_found() => {
                tracing::debug!(error = %err, "height vanished mid-window, re-probing tip");
                self.sleep(Duration::from_millis(self.config.poll_interval_ms / 2))
                    .await;
                Ok(())
            }
            other => Err(other),
        }
    }

    async fn sleep(&mut self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.shutdown.changed() => {}
        }
    }

    fn shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn set_state(&mut self, next: ControllerState) {
        if self.state != next {
            tracing::debug!(from = %self.state, to = %next, "state change");
            self.state = next;
        }
    }
}

fn retry_backoff(attempt: u32) -> Duration {
    let ms = 200u64.saturating_mul(1 << attempt.min(5));
    Duration::from_millis(ms.min(5000))
}
