//! Reorg detection: compares the node's tip lineage against the stored
//! lineage to find the fork point before new blocks are ingested.
//!
//! The cheap path is a single header fetch: if the node's main-chain header
//! at the stored tip height matches the stored id, the chain simply extended.
//! On a mismatch the detector walks the node's lineage down via parent ids,
//! comparing against stored ids height by height, until the common ancestor.
//!
//! Two outcomes are fatal and halt the pipeline: a fork deeper than
//! `max_reorg_depth`, and a walkback that exhausts stored history (the
//! stored prefix does not belong to the node's chain at all).

use ergindex_core::error::IndexError;
use ergindex_core::types::ChainTip;
use ergindex_node::NodeApi;
use ergindex_storage::Store;

/// Result of a reorg check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReorgOutcome {
    /// The stored tip is on the node's main chain.
    NoReorg,
    /// The chains diverge; rewind to `fork_height` and re-ingest above it.
    Reorg {
        /// Height of the common ancestor (still valid on both chains).
        fork_height: u64,
        /// Blocks the store must drop (`stored tip height − fork_height`).
        depth: u64,
        /// The node's main-chain id at the old stored tip height.
        node_id_at_tip: String,
    },
}

/// Detects and locates chain reorganizations.
pub struct ReorgDetector {
    max_reorg_depth: u64,
}

impl ReorgDetector {
    pub fn new(max_reorg_depth: u64) -> Self {
        Self { max_reorg_depth }
    }

    /// Compare the node's lineage with the stored one at `stored_tip`.
    pub async fn check<N, S>(
        &self,
        node: &N,
        store: &S,
        stored_tip: &ChainTip,
    ) -> Result<ReorgOutcome, IndexError>
    where
        N: NodeApi + ?Sized,
        S: Store + ?Sized,
    {
        let node_header = node.header_at(stored_tip.height).await?;
        if node_header.id == stored_tip.block_id {
            return Ok(ReorgOutcome::NoReorg);
        }

        tracing::warn!(
            height = stored_tip.height,
            stored = %stored_tip.block_id,
            node = %node_header.id,
            "tip mismatch, walking back to find fork point"
        );

        let node_id_at_tip = node_header.id.clone();
        let mut height = stored_tip.height;
        let mut parent_id = node_header.parent_id;

        loop {
            let depth = stored_tip.height - height + 1;
            if depth > self.max_reorg_depth {
                return Err(IndexError::ReorgTooDeep {
                    tip_height: stored_tip.height,
                    max_depth: self.max_reorg_depth,
                });
            }
            if height == 0 {
                return Err(IndexError::LineageExhausted { height: 0 });
            }
            height -= 1;

            let stored_id = store
                .block_id_at(height)
                .await?
                .ok_or(IndexError::LineageExhausted { height })?;

            if stored_id == parent_id {
                return Ok(ReorgOutcome::Reorg {
                    fork_height: height,
                    depth: stored_tip.height - height,
                    node_id_at_tip,
                });
            }

            // One step further down the node's lineage.
            parent_id = node.header(&parent_id).await?.parent_id;
        }
    }
}
