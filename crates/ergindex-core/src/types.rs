//! Entity records shared across the pipeline.
//!
//! These are the rows the Projector writes to the store. In-memory instances
//! are ephemeral working copies; the store holds the canonical state.

use serde::{Deserialize, Serialize};

/// Well-known placeholder box id used by emission/reward inputs.
/// Inputs referencing it are recorded but never linked to an output.
pub const COINBASE_SENTINEL: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Synthetic token id under which plain ERG value is tracked in
/// `token_balances`, alongside real token ids.
pub const ERG_TOKEN_ID: &str = "ERG";

// ─── ChainTip ─────────────────────────────────────────────────────────────────

/// The highest main-chain block the store knows about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTip {
    pub height: u64,
    pub block_id: String,
}

// ─── Block ────────────────────────────────────────────────────────────────────

/// A block row. Created by the Projector; only `main_chain` is ever mutated
/// afterwards (flipped to `false` on reorg rewind).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRecord {
    /// 32-byte hex id, shared by the block and its header.
    pub id: String,
    pub header_id: String,
    pub parent_id: String,
    pub height: u64,
    /// Unix milliseconds, as supplied by the node.
    pub timestamp: i64,
    pub difficulty: i64,
    pub block_size: i64,
    /// Sum of output values across the block's transactions.
    pub block_coins: i64,
    pub tx_count: u32,
    pub txs_size: i64,
    pub miner_address: Option<String>,
    pub main_chain: bool,
    pub version: i16,
    /// Opaque PoW solutions blob, kept as the node sent it.
    pub pow_solutions: serde_json::Value,
}

impl BlockRecord {
    /// Returns `true` if `self` is the direct child of `parent`.
    pub fn extends(&self, parent_height: u64, parent_id: &str) -> bool {
        self.height == parent_height + 1 && self.parent_id == parent_id
    }
}

// ─── Transaction ──────────────────────────────────────────────────────────────

/// A transaction row. Immutable once its block is committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxRecord {
    pub id: String,
    pub block_id: String,
    pub header_id: String,
    pub inclusion_height: u64,
    /// Block timestamp — transactions carry no time of their own.
    pub timestamp: i64,
    pub index_in_block: u32,
    pub main_chain: bool,
    pub size: i64,
    /// `max(0, Σ input values − Σ output values)`; filled by the Projector.
    pub fee: i64,
}

// ─── Output (box) ─────────────────────────────────────────────────────────────

/// A box created by a transaction. `spent_by_tx_id` is written later, when an
/// input consumes the box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub box_id: String,
    pub tx_id: String,
    pub index_in_tx: u32,
    pub value: i64,
    pub creation_height: u32,
    /// Derived from `ergo_tree`; `None` when the tree cannot be decoded.
    pub address: Option<String>,
    pub ergo_tree: String,
    /// Register map (`R4`..`R9` → serialized value hex), kept opaque.
    pub additional_registers: serde_json::Value,
}

// ─── Input ────────────────────────────────────────────────────────────────────

/// An input row, keyed by `(box_id, tx_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputRecord {
    pub box_id: String,
    pub tx_id: String,
    pub index_in_tx: u32,
    pub proof_bytes: Option<String>,
    pub extension: serde_json::Value,
}

impl InputRecord {
    /// Emission/reward inputs carry the all-zero sentinel box id.
    pub fn is_coinbase(&self) -> bool {
        self.box_id == COINBASE_SENTINEL
    }
}

// ─── Asset ────────────────────────────────────────────────────────────────────

/// A token amount carried by an output, keyed by `(box_id, index_in_outputs)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub box_id: String,
    pub index_in_outputs: u32,
    pub token_id: String,
    pub amount: i64,
}

// ─── Token ────────────────────────────────────────────────────────────────────

/// Token metadata, extracted best-effort from the minting output's registers.
/// Decode failures yield `None` fields, never an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub token_id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub decimals: Option<i32>,
    /// Amount minted in the transaction that created the token.
    pub total_supply: Option<i64>,
    pub first_seen_height: u64,
}

// ─── Balance delta ────────────────────────────────────────────────────────────

/// A signed adjustment to `token_balances`, keyed by `(token_id, address)`.
/// Plain ERG value moves under [`ERG_TOKEN_ID`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceDelta {
    pub token_id: String,
    pub address: String,
    pub delta: i64,
}

// ─── SyncStatus ───────────────────────────────────────────────────────────────

/// Singleton sync progress row, visible to external consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub current_height: u64,
    pub target_height: u64,
    pub is_syncing: bool,
    /// Timestamp of the last committed block (Unix ms).
    pub last_block_time: Option<i64>,
    /// Wall-clock time of the last status write (Unix seconds).
    pub updated_at: i64,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            current_height: 0,
            target_height: 0,
            is_syncing: false,
            last_block_time: None,
            updated_at: 0,
        }
    }
}

// ─── ParsedBlock ──────────────────────────────────────────────────────────────

/// A fully parsed block, ready for projection. Produced by
/// [`crate::parser::parse_block`]; the Projector fills in fees and spend
/// links, which need store lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedBlock {
    pub block: BlockRecord,
    pub transactions: Vec<TxRecord>,
    pub outputs: Vec<OutputRecord>,
    pub inputs: Vec<InputRecord>,
    pub assets: Vec<AssetRecord>,
}

impl ParsedBlock {
    pub fn height(&self) -> u64 {
        self.block.height
    }

    pub fn id(&self) -> &str {
        &self.block.id
    }
}
