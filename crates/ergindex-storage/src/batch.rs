//! The prepared unit of work a store applies atomically.

use serde::{Deserialize, Serialize};

use ergindex_core::types::{
    AssetRecord, BalanceDelta, BlockRecord, InputRecord, OutputRecord, TokenRecord, TxRecord,
};

/// Marks an existing output as spent by a transaction of this block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendLink {
    pub box_id: String,
    pub tx_id: String,
}

/// Coinbase reward extracted from the block's first transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiningRewardRecord {
    pub block_id: String,
    pub reward_amount: i64,
    pub fees_amount: i64,
    pub miner_address: Option<String>,
}

/// Address activity observed in a block, folded into `address_stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressActivity {
    pub address: String,
    /// Block timestamp (Unix ms) — widens the address's active window.
    pub timestamp: i64,
    pub address_type: String,
    pub script_complexity: i32,
}

/// An existing output fetched for spend processing: enough to link the spend
/// and emit the negative balance deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpendableOutput {
    pub box_id: String,
    pub value: i64,
    pub address: Option<String>,
    /// `(token_id, amount)` pairs carried by the box.
    pub assets: Vec<(String, i64)>,
}

/// Everything one block commits, in one transaction.
///
/// Built by the Projector; `balance_deltas` are pre-aggregated per
/// `(token_id, address)` and journaled so a rewind can apply their inverse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockBatch {
    pub block: BlockRecord,
    pub transactions: Vec<TxRecord>,
    pub outputs: Vec<OutputRecord>,
    pub inputs: Vec<InputRecord>,
    pub assets: Vec<AssetRecord>,
    pub spends: Vec<SpendLink>,
    pub new_tokens: Vec<TokenRecord>,
    pub balance_deltas: Vec<BalanceDelta>,
    pub mining_reward: Option<MiningRewardRecord>,
    pub address_stats: Vec<AddressActivity>,
}

/// Result of [`crate::Store::commit_block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The block was written.
    Applied,
    /// The block id was already on the main chain — nothing was changed.
    AlreadyApplied,
}

/// What a rewind actually touched, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewindReport {
    pub blocks_orphaned: u64,
    pub outputs_unspent: u64,
    pub deltas_reversed: u64,
}
