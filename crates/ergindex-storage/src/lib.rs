//! ergindex-storage — transactional persistence for the canonical data model.
//!
//! The [`Store`] trait is the contract the pipeline writes through. Two
//! backends implement it: [`PgStore`] (PostgreSQL via `sqlx`) for production
//! and [`MemStore`] for tests. Both guarantee:
//!
//! - per-block ingestion is all-or-nothing ([`Store::commit_block`]);
//! - committing the same block id twice is a no-op (`AlreadyApplied`);
//! - rewind of a height range is all-or-nothing and reverses the balance
//!   deltas the rewound blocks applied;
//! - no negative balance is ever visible at a commit boundary.

pub mod batch;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use ergindex_core::error::StoreError;
use ergindex_core::types::{ChainTip, SyncStatus};

pub use batch::{
    AddressActivity, BlockBatch, CommitOutcome, MiningRewardRecord, RewindReport, SpendLink,
    SpendableOutput,
};
pub use memory::MemStore;
pub use postgres::PgStore;

/// The contract the Projector and SyncController consume.
#[async_trait]
pub trait Store: Send + Sync {
    /// Highest main-chain block, or `None` on a fresh store.
    async fn tip(&self) -> Result<Option<ChainTip>, StoreError>;

    /// Main-chain block id at a height.
    async fn block_id_at(&self, height: u64) -> Result<Option<String>, StoreError>;

    /// The singleton sync progress row.
    async fn sync_status(&self) -> Result<SyncStatus, StoreError>;

    /// Record the node-reported target height and the syncing flag.
    async fn set_target(&self, target_height: u64, is_syncing: bool)
        -> Result<(), StoreError>;

    /// Fetch value/address/assets for outputs about to be spent. Missing ids
    /// are simply absent from the result.
    async fn outputs_for_spend(
        &self,
        box_ids: &[String],
    ) -> Result<Vec<SpendableOutput>, StoreError>;

    /// Apply a prepared block in one transaction. Idempotent by block id.
    async fn commit_block(&self, batch: BlockBatch) -> Result<CommitOutcome, StoreError>;

    /// Rewind the main chain to `height`: orphan later blocks, delete their
    /// children, un-spend surviving outputs, reverse balance deltas.
    async fn rewind_to_height(&self, height: u64) -> Result<RewindReport, StoreError>;

    /// Flag a block that cannot be projected; the pipeline halts after this.
    async fn mark_poison(
        &self,
        height: u64,
        block_id: &str,
        reason: &str,
    ) -> Result<(), StoreError>;
}
