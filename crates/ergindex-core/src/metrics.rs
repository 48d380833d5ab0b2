//! In-process pipeline counters.
//!
//! Exporters are out of scope; the controller logs snapshots and the
//! `sync_status` row carries progress for external consumers.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters and gauges shared across pipeline components. Cheap to share via
/// `Arc`; all updates are relaxed — the numbers are observational.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Blocks committed since startup.
    pub indexed_blocks: AtomicU64,
    /// Reorg events repaired since startup.
    pub chain_reorg_events_total: AtomicU64,
    /// Last target height reported by the node.
    pub target_height: AtomicU64,
    /// Node HTTP requests issued (including retries).
    pub node_requests_total: AtomicU64,
    /// Node HTTP requests that failed after all retries.
    pub node_request_failures_total: AtomicU64,
    /// Inputs whose referenced output was not found (genesis-state boxes).
    pub dangling_inputs_total: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub indexed_blocks: u64,
    pub chain_reorg_events_total: u64,
    pub target_height: u64,
    pub node_requests_total: u64,
    pub node_request_failures_total: u64,
    pub dangling_inputs_total: u64,
}

impl Metrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set(gauge: &AtomicU64, value: u64) {
        gauge.store(value, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            indexed_blocks: self.indexed_blocks.load(Ordering::Relaxed),
            chain_reorg_events_total: self.chain_reorg_events_total.load(Ordering::Relaxed),
            target_height: self.target_height.load(Ordering::Relaxed),
            node_requests_total: self.node_requests_total.load(Ordering::Relaxed),
            node_request_failures_total: self
                .node_request_failures_total
                .load(Ordering::Relaxed),
            dangling_inputs_total: self.dangling_inputs_total.load(Ordering::Relaxed),
        }
    }
}
