//! Projection of a parsed block into the store.
//!
//! The Projector is the sole writer during ingestion. For each block it
//! prepares one [`BlockBatch`] — spend links, pre-aggregated balance deltas,
//! token metadata, fees, the mining reward, address stats — and hands it to
//! the store, which applies it in a single transaction.
//!
//! Spend resolution order matters: outputs created earlier in the same block
//! are visible to later inputs (forward references), the coinbase sentinel is
//! skipped, and anything else is looked up in the store. An input whose
//! referenced output exists nowhere is recorded but produces no spend link
//! and no delta — genesis-state boxes (the emission contract) are spent
//! without ever having been created by an indexed transaction.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;

use ergindex_core::address::is_p2pk_tree_hex;
use ergindex_core::error::IndexError;
use ergindex_core::metrics::Metrics;
use ergindex_core::registers;
use ergindex_core::types::{BalanceDelta, ParsedBlock, TokenRecord, ERG_TOKEN_ID};
use ergindex_storage::{
    AddressActivity, BlockBatch, CommitOutcome, MiningRewardRecord, SpendLink, SpendableOutput,
    Store,
};

pub struct Projector<S> {
    store: Arc<S>,
    metrics: Arc<Metrics>,
}

impl<S: Store> Projector<S> {
    pub fn new(store: Arc<S>, metrics: Arc<Metrics>) -> Self {
        Self { store, metrics }
    }

    /// Project one parsed block: prepare the batch and commit it atomically.
    pub async fn project(&self, parsed: &ParsedBlock) -> Result<CommitOutcome, IndexError> {
        let batch = self.prepare(parsed).await?;
        let outcome = self.store.commit_block(batch).await?;
        if outcome == CommitOutcome::AlreadyApplied {
            tracing::debug!(height = parsed.height(), id = %parsed.id(), "block already applied");
        }
        Ok(outcome)
    }

    async fn prepare(&self, parsed: &ParsedBlock) -> Result<BlockBatch, IndexError> {
        // Assets per box, for delta computation and mint detection.
        let mut assets_by_box: HashMap<&str, Vec<(&str, i64)>> = HashMap::new();
        for asset in &parsed.assets {
            assets_by_box
                .entry(asset.box_id.as_str())
                .or_default()
                .push((asset.token_id.as_str(), asset.amount));
        }

        // Outputs created in this block, visible to later inputs.
        let local: HashMap<&str, SpendableOutput> = parsed
            .outputs
            .iter()
            .map(|output| {
                (
                    output.box_id.as_str(),
                    SpendableOutput {
                        box_id: output.box_id.clone(),
                        value: output.value,
                        address: output.address.clone(),
                        assets: assets_by_box
                            .get(output.box_id.as_str())
                            .map(|assets| {
                                assets
                                    .iter()
                                    .map(|(token, amount)| (token.to_string(), *amount))
                                    .collect()
                            })
                            .unwrap_or_default(),
                    },
                )
            })
            .collect();

        // Everything else must already be in the store.
        let external_ids: Vec<String> = parsed
            .inputs
            .iter()
            .filter(|input| !input.is_coinbase() && !local.contains_key(input.box_id.as_str()))
            .map(|input| input.box_id.clone())
            .collect();
        let stored: HashMap<String, SpendableOutput> = self
            .store
            .outputs_for_spend(&external_ids)
            .await?
            .into_iter()
            .map(|output| (output.box_id.clone(), output))
            .collect();

        let mut deltas: BTreeMap<(String, String), i64> = BTreeMap::new();
        let mut spends = Vec::new();
        let mut input_value_by_tx: HashMap<&str, i64> = HashMap::new();

        for input in &parsed.inputs {
            if input.is_coinbase() {
                continue;
            }
            let spent = local
                .get(input.box_id.as_str())
                .or_else(|| stored.get(input.box_id.as_str()));
            let Some(spent) = spent else {
                Metrics::incr(&self.metrics.dangling_inputs_total);
                tracing::warn!(
                    box_id = %input.box_id,
                    tx = %input.tx_id,
                    height = parsed.height(),
                    "input references an unindexed output, skipping spend link"
                );
                continue;
            };

            spends.push(SpendLink {
                box_id: input.box_id.clone(),
                tx_id: input.tx_id.clone(),
            });
            *input_value_by_tx.entry(input.tx_id.as_str()).or_insert(0) += spent.value;

            if let Some(address) = &spent.address {
                *deltas
                    .entry((ERG_TOKEN_ID.to_string(), address.clone()))
                    .or_insert(0) -= spent.value;
                for (token_id, amount) in &spent.assets {
                    *deltas.entry((token_id.clone(), address.clone())).or_insert(0) -= amount;
                }
            }
        }

        for output in &parsed.outputs {
            if let Some(address) = &output.address {
                *deltas
                    .entry((ERG_TOKEN_ID.to_string(), address.clone()))
                    .or_insert(0) += output.value;
                if let Some(assets) = assets_by_box.get(output.box_id.as_str()) {
                    for (token_id, amount) in assets {
                        *deltas
                            .entry((token_id.to_string(), address.clone()))
                            .or_insert(0) += amount;
                    }
                }
            }
        }

        // Fees, now that input values are known.
        let mut transactions = parsed.transactions.clone();
        for tx in &mut transactions {
            let inputs_sum = input_value_by_tx.get(tx.id.as_str()).copied().unwrap_or(0);
            let outputs_sum: i64 = parsed
                .outputs
                .iter()
                .filter(|o| o.tx_id == tx.id)
                .map(|o| o.value)
                .sum();
            tx.fee = (inputs_sum - outputs_sum).max(0);
        }

        let new_tokens = extract_minted_tokens(parsed, &assets_by_box);
        let mining_reward = extract_mining_reward(parsed);
        let address_stats = collect_address_stats(parsed);

        let balance_deltas: Vec<BalanceDelta> = deltas
            .into_iter()
            .filter(|(_, delta)| *delta != 0)
            .map(|((token_id, address), delta)| BalanceDelta {
                token_id,
                address,
                delta,
            })
            .collect();

        Ok(BlockBatch {
            block: parsed.block.clone(),
            transactions,
            outputs: parsed.outputs.clone(),
            inputs: parsed.inputs.clone(),
            assets: parsed.assets.clone(),
            spends,
            new_tokens,
            balance_deltas,
            mining_reward,
            address_stats,
        })
    }
}

/// A token is minted when its id equals the first input's box id of the
/// transaction; name/description/decimals ride in the minting output's
/// R4/R5/R6 registers, best-effort.
fn extract_minted_tokens(
    parsed: &ParsedBlock,
    assets_by_box: &HashMap<&str, Vec<(&str, i64)>>,
) -> Vec<TokenRecord> {
    let mut tokens = Vec::new();

    for tx in &parsed.transactions {
        let Some(first_input) = parsed
            .inputs
            .iter()
            .find(|i| i.tx_id == tx.id && i.index_in_tx == 0)
        else {
            continue;
        };
        if first_input.is_coinbase() {
            continue;
        }
        let candidate = first_input.box_id.as_str();

        let minted_amount: i64 = parsed
            .outputs
            .iter()
            .filter(|o| o.tx_id == tx.id)
            .filter_map(|o| assets_by_box.get(o.box_id.as_str()))
            .flatten()
            .filter(|(token_id, _)| *token_id == candidate)
            .map(|(_, amount)| *amount)
            .sum();
        if minted_amount == 0 {
            continue;
        }

        // First output carrying the token is the minting output.
        let minting_output = parsed.outputs.iter().find(|o| {
            o.tx_id == tx.id
                && assets_by_box
                    .get(o.box_id.as_str())
                    .is_some_and(|assets| assets.iter().any(|(token, _)| *token == candidate))
        });

        let (name, description, decimals) = minting_output
            .map(|output| {
                (
                    register_hex(&output.additional_registers, "R4")
                        .and_then(|hex| registers::utf8_text(&hex)),
                    register_hex(&output.additional_registers, "R5")
                        .and_then(|hex| registers::utf8_text(&hex)),
                    register_hex(&output.additional_registers, "R6")
                        .and_then(|hex| registers::decimals(&hex)),
                )
            })
            .unwrap_or((None, None, None));

        tokens.push(TokenRecord {
            token_id: candidate.to_string(),
            name,
            description,
            decimals,
            total_supply: Some(minted_amount),
            first_seen_height: parsed.height(),
        });
    }

    tokens
}

/// Registers arrive either as bare hex strings or as objects with a
/// `serializedValue` field, depending on node version.
fn register_hex(registers: &Value, key: &str) -> Option<String> {
    let entry = registers.as_object()?.get(key)?;
    match entry {
        Value::String(hex) => Some(hex.clone()),
        Value::Object(map) => map
            .get("serializedValue")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

/// The first transaction is the coinbase; its first output pays the miner.
fn extract_mining_reward(parsed: &ParsedBlock) -> Option<MiningRewardRecord> {
    let tx0 = parsed.transactions.first()?;
    let reward_output = parsed
        .outputs
        .iter()
        .find(|o| o.tx_id == tx0.id && o.index_in_tx == 0)?;

    Some(MiningRewardRecord {
        block_id: parsed.block.id.clone(),
        reward_amount: reward_output.value,
        fees_amount: (parsed.block.block_coins - reward_output.value).max(0),
        miner_address: reward_output.address.clone(),
    })
}

fn collect_address_stats(parsed: &ParsedBlock) -> Vec<AddressActivity> {
    let mut by_address: BTreeMap<&str, AddressActivity> = BTreeMap::new();
    for output in &parsed.outputs {
        let Some(address) = output.address.as_deref() else {
            continue;
        };
        by_address.entry(address).or_insert_with(|| AddressActivity {
            address: address.to_string(),
            timestamp: parsed.block.timestamp,
            address_type: if is_p2pk_tree_hex(&output.ergo_tree) {
                "p2pk".to_string()
            } else {
                "smart_contract".to_string()
            },
            script_complexity: (output.ergo_tree.len() / 100) as i32,
        });
    }
    by_address.into_values().collect()
}
