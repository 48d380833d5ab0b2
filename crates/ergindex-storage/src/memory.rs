//! In-memory store for tests and ephemeral runs.
//!
//! Mirrors the Postgres backend's semantics exactly: one mutex-guarded state,
//! commit validation before mutation (so a failed commit leaves no partial
//! state), the same idempotency rule, and journal-based delta reversal on
//! rewind. The inspection helpers at the bottom exist for tests only.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use ergindex_core::error::StoreError;
use ergindex_core::types::{
    AssetRecord, BalanceDelta, BlockRecord, ChainTip, InputRecord, OutputRecord, SyncStatus,
    TokenRecord, TxRecord,
};

use crate::batch::{
    BlockBatch, CommitOutcome, MiningRewardRecord, RewindReport, SpendableOutput,
};
use crate::Store;

#[derive(Debug, Clone)]
struct AddressStatsRow {
    first_active_time: i64,
    last_active_time: i64,
    address_type: String,
    script_complexity: i32,
}

#[derive(Debug, Clone)]
struct PoisonRow {
    height: u64,
    block_id: String,
    reason: String,
}

#[derive(Default)]
struct MemState {
    blocks: HashMap<String, BlockRecord>,
    /// Main-chain height → block id.
    by_height: BTreeMap<u64, String>,
    transactions: HashMap<String, TxRecord>,
    txs_by_block: HashMap<String, Vec<String>>,
    outputs: HashMap<String, OutputRecord>,
    /// box_id → spending tx id.
    spent_by: HashMap<String, String>,
    inputs: Vec<InputRecord>,
    /// box_id → assets.
    assets: HashMap<String, Vec<AssetRecord>>,
    tokens: HashMap<String, TokenRecord>,
    balances: HashMap<(String, String), i64>,
    /// block_id → journaled deltas, for reorg reversal.
    journal: HashMap<String, Vec<BalanceDelta>>,
    mining_rewards: HashMap<String, MiningRewardRecord>,
    address_stats: HashMap<String, AddressStatsRow>,
    sync: SyncStatus,
    poison: Vec<PoisonRow>,
}

/// In-memory [`Store`] implementation.
#[derive(Default)]
pub struct MemStore {
    state: Mutex<MemState>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn tip(&self) -> Result<Option<ChainTip>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .by_height
            .iter()
            .next_back()
            .map(|(height, id)| ChainTip {
                height: *height,
                block_id: id.clone(),
            }))
    }

    async fn block_id_at(&self, height: u64) -> Result<Option<String>, StoreError> {
        Ok(self.state.lock().unwrap().by_height.get(&height).cloned())
    }

    async fn sync_status(&self) -> Result<SyncStatus, StoreError> {
        Ok(self.state.lock().unwrap().sync.clone())
    }

    async fn set_target(
        &self,
        target_height: u64,
        is_syncing: bool,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.sync.target_height = target_height;
        state.sync.is_syncing = is_syncing;
        state.sync.updated_at = Utc::now().timestamp();
        Ok(())
    }

    async fn outputs_for_spend(
        &self,
        box_ids: &[String],
    ) -> Result<Vec<SpendableOutput>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(box_ids
            .iter()
            .filter_map(|box_id| {
                state.outputs.get(box_id).map(|output| SpendableOutput {
                    box_id: box_id.clone(),
                    value: output.value,
                    address: output.address.clone(),
                    assets: state
                        .assets
                        .get(box_id)
                        .map(|assets| {
                            assets
                                .iter()
                                .map(|a| (a.token_id.clone(), a.amount))
                                .collect()
                        })
                        .unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn commit_block(&self, batch: BlockBatch) -> Result<CommitOutcome, StoreError> {
        let mut state = self.state.lock().unwrap();

        if let Some(existing) = state.blocks.get(batch.block.id.as_str()) {
            if existing.main_chain {
                return Ok(CommitOutcome::AlreadyApplied);
            }
            // An orphan being re-adopted: its children were removed on
            // rewind, so the batch re-creates everything below.
        }

        // Validate the deltas before touching anything, so a rejected batch
        // leaves no partial state behind.
        for delta in &batch.balance_deltas {
            let key = (delta.token_id.clone(), delta.address.clone());
            let current = state.balances.get(&key).copied().unwrap_or(0);
            let next = current + delta.delta;
            if next < 0 {
                return Err(StoreError::Constraint(format!(
                    "balance for ({}, {}) would become {next}",
                    delta.token_id, delta.address
                )));
            }
        }

        let block_id = batch.block.id.clone();
        let height = batch.block.height;
        let timestamp = batch.block.timestamp;

        state.by_height.insert(height, block_id.clone());
        state.blocks.insert(block_id.clone(), batch.block);

        let mut tx_ids = Vec::with_capacity(batch.transactions.len());
        for tx in batch.transactions {
            tx_ids.push(tx.id.clone());
            state.transactions.insert(tx.id.clone(), tx);
        }
        state.txs_by_block.insert(block_id.clone(), tx_ids);

        for output in batch.outputs {
            state.outputs.insert(output.box_id.clone(), output);
        }
        for asset in batch.assets {
            state
                .assets
                .entry(asset.box_id.clone())
                .or_default()
                .push(asset);
        }
        state.inputs.extend(batch.inputs);

        for spend in batch.spends {
            state.spent_by.insert(spend.box_id, spend.tx_id);
        }

        for token in batch.new_tokens {
            state.tokens.entry(token.token_id.clone()).or_insert(token);
        }

        for delta in &batch.balance_deltas {
            let key = (delta.token_id.clone(), delta.address.clone());
            *state.balances.entry(key).or_insert(0) += delta.delta;
        }
        state.journal.insert(block_id.clone(), batch.balance_deltas);

        if let Some(reward) = batch.mining_reward {
            state.mining_rewards.insert(block_id.clone(), reward);
        }

        for activity in batch.address_stats {
            state
                .address_stats
                .entry(activity.address.clone())
                .and_modify(|row| {
                    row.first_active_time = row.first_active_time.min(activity.timestamp);
                    row.last_active_time = row.last_active_time.max(activity.timestamp);
                })
                .or_insert(AddressStatsRow {
                    first_active_time: activity.timestamp,
                    last_active_time: activity.timestamp,
                    address_type: activity.address_type,
                    script_complexity: activity.script_complexity,
                });
        }

        state.sync.current_height = height;
        state.sync.last_block_time = Some(timestamp);
        state.sync.is_syncing = true;
        state.sync.updated_at = Utc::now().timestamp();

        Ok(CommitOutcome::Applied)
    }

    async fn rewind_to_height(&self, height: u64) -> Result<RewindReport, StoreError> {
        let mut state = self.state.lock().unwrap();
        let mut report = RewindReport::default();

        let rewound_ids: Vec<String> = state
            .by_height
            .range(height + 1..)
            .map(|(_, id)| id.clone())
            .collect();
        if rewound_ids.is_empty() {
            return Ok(report);
        }

        // Reverse journaled deltas, newest block first.
        for block_id in rewound_ids.iter().rev() {
            if let Some(deltas) = state.journal.remove(block_id) {
                for delta in deltas {
                    let key = (delta.token_id, delta.address);
                    *state.balances.entry(key).or_insert(0) -= delta.delta;
                    report.deltas_reversed += 1;
                }
            }
        }

        let rewound_txs: Vec<String> = rewound_ids
            .iter()
            .flat_map(|id| state.txs_by_block.get(id).cloned().unwrap_or_default())
            .collect();
        let rewound_tx_set: std::collections::HashSet<&String> = rewound_txs.iter().collect();

        // Un-spend outputs consumed by rewound transactions.
        let unspent_boxes: Vec<String> = state
            .spent_by
            .iter()
            .filter(|(_, tx_id)| rewound_tx_set.contains(tx_id))
            .map(|(box_id, _)| box_id.clone())
            .collect();
        for box_id in &unspent_boxes {
            state.spent_by.remove(box_id);
            // Only surviving outputs count; rewound-created ones disappear.
            if let Some(output) = state.outputs.get(box_id) {
                if !rewound_tx_set.contains(&output.tx_id) {
                    report.outputs_unspent += 1;
                }
            }
        }

        // Drop the rewound blocks' children.
        for tx_id in &rewound_txs {
            state.transactions.remove(tx_id);
        }
        let removed_boxes: Vec<String> = state
            .outputs
            .iter()
            .filter(|(_, o)| rewound_tx_set.contains(&o.tx_id))
            .map(|(box_id, _)| box_id.clone())
            .collect();
        for box_id in removed_boxes {
            state.outputs.remove(&box_id);
            state.assets.remove(&box_id);
        }
        state.inputs.retain(|i| !rewound_tx_set.contains(&i.tx_id));

        for block_id in &rewound_ids {
            state.txs_by_block.remove(block_id);
            state.mining_rewards.remove(block_id);
            if let Some(block) = state.blocks.get_mut(block_id) {
                block.main_chain = false;
            }
            report.blocks_orphaned += 1;
        }
        state.by_height.retain(|h, _| *h <= height);
        state.tokens.retain(|_, t| t.first_seen_height <= height);

        state.sync.current_height = height;
        state.sync.updated_at = Utc::now().timestamp();

        Ok(report)
    }

    async fn mark_poison(
        &self,
        height: u64,
        block_id: &str,
        reason: &str,
    ) -> Result<(), StoreError> {
        self.state.lock().unwrap().poison.push(PoisonRow {
            height,
            block_id: block_id.to_string(),
            reason: reason.to_string(),
        });
        Ok(())
    }
}

// ─── Inspection helpers (tests only) ──────────────────────────────────────────

impl MemStore {
    pub fn balance(&self, token_id: &str, address: &str) -> i64 {
        self.state
            .lock()
            .unwrap()
            .balances
            .get(&(token_id.to_string(), address.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Sum of `amount` over unspent assets of a token — the live supply the
    /// balance table must agree with.
    pub fn live_supply(&self, token_id: &str) -> i64 {
        let state = self.state.lock().unwrap();
        state
            .assets
            .iter()
            .filter(|(box_id, _)| !state.spent_by.contains_key(*box_id))
            .flat_map(|(_, assets)| assets)
            .filter(|a| a.token_id == token_id)
            .map(|a| a.amount)
            .sum()
    }

    /// Sum of `value` over unspent outputs — what the synthetic ERG token's
    /// balances must agree with.
    pub fn live_erg_supply(&self) -> i64 {
        let state = self.state.lock().unwrap();
        state
            .outputs
            .values()
            .filter(|o| !state.spent_by.contains_key(&o.box_id))
            .map(|o| o.value)
            .sum()
    }

    /// Sum of all balances for a token across addresses.
    pub fn total_balance(&self, token_id: &str) -> i64 {
        let state = self.state.lock().unwrap();
        state
            .balances
            .iter()
            .filter(|((token, _), _)| token == token_id)
            .map(|(_, balance)| *balance)
            .sum()
    }

    /// Every token id with a balance or journal entry.
    pub fn known_token_ids(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut ids: Vec<String> = state
            .balances
            .keys()
            .map(|(token, _)| token.clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn spent_by(&self, box_id: &str) -> Option<String> {
        self.state.lock().unwrap().spent_by.get(box_id).cloned()
    }

    pub fn output(&self, box_id: &str) -> Option<OutputRecord> {
        self.state.lock().unwrap().outputs.get(box_id).cloned()
    }

    pub fn block(&self, block_id: &str) -> Option<BlockRecord> {
        self.state.lock().unwrap().blocks.get(block_id).cloned()
    }

    pub fn transaction(&self, tx_id: &str) -> Option<TxRecord> {
        self.state.lock().unwrap().transactions.get(tx_id).cloned()
    }

    pub fn transaction_count(&self) -> usize {
        self.state.lock().unwrap().transactions.len()
    }

    pub fn token(&self, token_id: &str) -> Option<TokenRecord> {
        self.state.lock().unwrap().tokens.get(token_id).cloned()
    }

    pub fn mining_reward(&self, block_id: &str) -> Option<MiningRewardRecord> {
        self.state.lock().unwrap().mining_rewards.get(block_id).cloned()
    }

    pub fn poison_count(&self) -> usize {
        self.state.lock().unwrap().poison.len()
    }

    pub fn poison_rows(&self) -> Vec<(u64, String, String)> {
        self.state
            .lock()
            .unwrap()
            .poison
            .iter()
            .map(|row| (row.height, row.block_id.clone(), row.reason.clone()))
            .collect()
    }

    /// `(first_active, last_active, address_type, script_complexity)`.
    pub fn address_stats_row(&self, address: &str) -> Option<(i64, i64, String, i32)> {
        self.state.lock().unwrap().address_stats.get(address).map(|row| {
            (
                row.first_active_time,
                row.last_active_time,
                row.address_type.clone(),
                row.script_complexity,
            )
        })
    }

    pub fn main_chain_heights(&self) -> Vec<u64> {
        self.state.lock().unwrap().by_height.keys().copied().collect()
    }

    pub fn input_count(&self) -> usize {
        self.state.lock().unwrap().inputs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn block_record(height: u64, id: &str, parent: &str) -> BlockRecord {
        BlockRecord {
            id: id.to_string(),
            header_id: id.to_string(),
            parent_id: parent.to_string(),
            height,
            timestamp: 1_600_000_000_000 + height as i64 * 120_000,
            difficulty: 1000,
            block_size: 100,
            block_coins: 0,
            tx_count: 0,
            txs_size: 0,
            miner_address: None,
            main_chain: true,
            version: 3,
            pow_solutions: Value::Null,
        }
    }

    fn empty_batch(height: u64, id: &str, parent: &str) -> BlockBatch {
        BlockBatch {
            block: block_record(height, id, parent),
            transactions: vec![],
            outputs: vec![],
            inputs: vec![],
            assets: vec![],
            spends: vec![],
            new_tokens: vec![],
            balance_deltas: vec![],
            mining_reward: None,
            address_stats: vec![],
        }
    }

    #[tokio::test]
    async fn commit_advances_tip_and_status() {
        let store = MemStore::new();
        store.commit_block(empty_batch(1, "b1", "b0")).await.unwrap();
        store.commit_block(empty_batch(2, "b2", "b1")).await.unwrap();

        let tip = store.tip().await.unwrap().unwrap();
        assert_eq!(tip.height, 2);
        assert_eq!(tip.block_id, "b2");

        let status = store.sync_status().await.unwrap();
        assert_eq!(status.current_height, 2);
        assert!(status.is_syncing);
        assert!(status.last_block_time.is_some());
    }

    #[tokio::test]
    async fn recommit_is_noop() {
        let store = MemStore::new();
        let mut batch = empty_batch(1, "b1", "b0");
        batch.balance_deltas = vec![BalanceDelta {
            token_id: "ERG".into(),
            address: "addr".into(),
            delta: 500,
        }];

        assert_eq!(
            store.commit_block(batch.clone()).await.unwrap(),
            CommitOutcome::Applied
        );
        assert_eq!(
            store.commit_block(batch).await.unwrap(),
            CommitOutcome::AlreadyApplied
        );
        assert_eq!(store.balance("ERG", "addr"), 500);
    }

    #[tokio::test]
    async fn negative_balance_rejected_without_partial_state() {
        let store = MemStore::new();
        let mut batch = empty_batch(1, "b1", "b0");
        batch.balance_deltas = vec![
            BalanceDelta {
                token_id: "ERG".into(),
                address: "a".into(),
                delta: 100,
            },
            BalanceDelta {
                token_id: "ERG".into(),
                address: "b".into(),
                delta: -1,
            },
        ];

        let err = store.commit_block(batch).await.unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
        // Nothing from the rejected batch is visible.
        assert_eq!(store.balance("ERG", "a"), 0);
        assert!(store.tip().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rewind_reverses_deltas_and_orphans_blocks() {
        let store = MemStore::new();
        let mut b1 = empty_batch(1, "b1", "b0");
        b1.balance_deltas = vec![BalanceDelta {
            token_id: "ERG".into(),
            address: "a".into(),
            delta: 1000,
        }];
        let mut b2 = empty_batch(2, "b2", "b1");
        b2.balance_deltas = vec![BalanceDelta {
            token_id: "ERG".into(),
            address: "a".into(),
            delta: -400,
        }];
        store.commit_block(b1).await.unwrap();
        store.commit_block(b2).await.unwrap();
        assert_eq!(store.balance("ERG", "a"), 600);

        let report = store.rewind_to_height(1).await.unwrap();
        assert_eq!(report.blocks_orphaned, 1);
        assert_eq!(report.deltas_reversed, 1);
        assert_eq!(store.balance("ERG", "a"), 1000);
        assert_eq!(store.tip().await.unwrap().unwrap().height, 1);
        // The orphan is retained for audit, off the main chain.
        assert!(!store.block("b2").unwrap().main_chain);
    }

    #[tokio::test]
    async fn rewind_below_everything_empties_the_chain() {
        let store = MemStore::new();
        store.commit_block(empty_batch(1, "b1", "b0")).await.unwrap();
        store.commit_block(empty_batch(2, "b2", "b1")).await.unwrap();

        store.rewind_to_height(0).await.unwrap();
        assert!(store.tip().await.unwrap().is_none());
        assert_eq!(store.sync_status().await.unwrap().current_height, 0);
    }

    #[tokio::test]
    async fn orphan_readoption_applies_again() {
        let store = MemStore::new();
        store.commit_block(empty_batch(1, "b1", "b0")).await.unwrap();
        store.commit_block(empty_batch(2, "b2", "b1")).await.unwrap();
        store.rewind_to_height(1).await.unwrap();

        // The same id returns to the main chain after a reorg back.
        assert_eq!(
            store.commit_block(empty_batch(2, "b2", "b1")).await.unwrap(),
            CommitOutcome::Applied
        );
        assert!(store.block("b2").unwrap().main_chain);
        assert_eq!(store.tip().await.unwrap().unwrap().height, 2);
    }
}
