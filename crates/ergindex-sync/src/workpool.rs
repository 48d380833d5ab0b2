//! Bounded parallel fetch+parse over a contiguous height window.
//!
//! Up to `workers` heights are in flight at once; results are emitted in
//! strictly ascending height order — a late low height blocks the emission
//! of higher heights that finished earlier. Dropping the stream cancels all
//! in-flight fetches, which is how the controller aborts a window on error
//! or shutdown.

use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};

use ergindex_core::error::{IndexError, NodeError};
use ergindex_core::parser::parse_block;
use ergindex_core::types::ParsedBlock;
use ergindex_node::NodeApi;

/// Ordered parallel fetcher. Cheap to construct per window.
pub struct WorkPool<N> {
    node: Arc<N>,
    network_prefix: u8,
}

impl<N: NodeApi + 'static> WorkPool<N> {
    pub fn new(node: Arc<N>, network_prefix: u8) -> Self {
        Self {
            node,
            network_prefix,
        }
    }

    /// Stream `(height, parsed-or-error)` for `[lo, hi]`, in height order,
    /// with at most `workers` fetches in flight.
    pub fn fetch_ordered(
        &self,
        lo: u64,
        hi: u64,
        workers: usize,
    ) -> BoxStream<'static, (u64, Result<ParsedBlock, IndexError>)> {
        let node = Arc::clone(&self.node);
        let network_prefix = self.network_prefix;

        stream::iter(lo..=hi)
            .map(move |height| {
                let node = Arc::clone(&node);
                async move { (height, fetch_one(node, height, network_prefix).await) }
            })
            .buffered(workers.max(1))
            .boxed()
    }
}

/// `header ids at h → full block → parse`. Runs inside a worker slot.
async fn fetch_one<N: NodeApi>(
    node: Arc<N>,
    height: u64,
    network_prefix: u8,
) -> Result<ParsedBlock, IndexError> {
    let ids = node.block_ids_at(height).await?;
    let block_id = ids
        .first()
        .ok_or_else(|| NodeError::NotFound(format!("no headers at height {height}")))?;
    let full_block = node.block(block_id).await?;
    parse_block(height, &full_block, network_prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ergindex_core::wire::{NodeInfo, WireFullBlock, WireHeader, WireTransaction};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn hex_id(seed: u64) -> String {
        format!("{seed:02x}").chars().cycle().take(64).collect()
    }

    /// Serves a linear chain; later heights respond faster to prove the
    /// stream re-orders completions back into height order.
    struct SkewedNode {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl SkewedNode {
        fn new() -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl NodeApi for SkewedNode {
        async fn info(&self) -> Result<NodeInfo, NodeError> {
            unimplemented!()
        }

        async fn block_ids_at(&self, height: u64) -> Result<Vec<String>, NodeError> {
            Ok(vec![hex_id(height)])
        }

        async fn header(&self, _block_id: &str) -> Result<WireHeader, NodeError> {
            unimplemented!()
        }

        async fn block(&self, block_id: &str) -> Result<WireFullBlock, NodeError> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);

            // Higher heights finish first.
            let height = u64::from_str_radix(&block_id[..2], 16).unwrap();
            tokio::time::sleep(Duration::from_millis(40u64.saturating_sub(height * 3))).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            Ok(serde_json::from_value(json!({
                "header": {
                    "id": block_id,
                    "parentId": hex_id(height - 1),
                    "height": height,
                    "timestamp": height * 1000,
                    "difficulty": "1"
                },
                "blockTransactions": {"transactions": [{
                    "id": hex_id(height + 100),
                    "inputs": [],
                    "outputs": [{
                        "boxId": hex_id(height + 200),
                        "value": 1000,
                        "ergoTree": "0008cd0327e65711a59378c59359c3e1d0f7abe906479eccb76094e50fe79d743ccc15e6"
                    }]
                }]}
            }))
            .unwrap())
        }

        async fn unconfirmed_transactions(
            &self,
            _offset: u32,
            _limit: u32,
        ) -> Result<Vec<WireTransaction>, NodeError> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn emits_in_ascending_height_order() {
        let node = Arc::new(SkewedNode::new());
        let pool = WorkPool::new(Arc::clone(&node), 0x00);

        let heights: Vec<u64> = pool
            .fetch_ordered(2, 9, 5)
            .map(|(height, result)| {
                result.unwrap();
                height
            })
            .collect()
            .await;

        assert_eq!(heights, (2..=9).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn concurrency_is_bounded_by_workers() {
        let node = Arc::new(SkewedNode::new());
        let pool = WorkPool::new(Arc::clone(&node), 0x00);

        let _results: Vec<_> = pool.fetch_ordered(2, 11, 3).collect().await;
        assert!(node.max_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn missing_height_surfaces_not_found() {
        struct EmptyNode;

        #[async_trait]
        impl NodeApi for EmptyNode {
            async fn info(&self) -> Result<NodeInfo, NodeError> {
                unimplemented!()
            }
            async fn block_ids_at(&self, _height: u64) -> Result<Vec<String>, NodeError> {
                Ok(vec![])
            }
            async fn header(&self, _block_id: &str) -> Result<WireHeader, NodeError> {
                unimplemented!()
            }
            async fn block(&self, _block_id: &str) -> Result<WireFullBlock, NodeError> {
                unimplemented!()
            }
            async fn unconfirmed_transactions(
                &self,
                _offset: u32,
                _limit: u32,
            ) -> Result<Vec<WireTransaction>, NodeError> {
                Ok(vec![])
            }
        }

        let pool = WorkPool::new(Arc::new(EmptyNode), 0x00);
        let mut stream = pool.fetch_ordered(7, 7, 2);
        let (height, result) = stream.next().await.unwrap();
        assert_eq!(height, 7);
        let err = result.unwrap_err();
        assert!(matches!(err, IndexError::Node(NodeError::NotFound(_))));
    }
}
