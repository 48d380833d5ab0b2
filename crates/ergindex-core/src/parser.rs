//! Pure transformation from node JSON into entity records.
//!
//! No I/O: `parse_block` is deterministic over its inputs and safe to run on
//! many blocks in parallel. Validation failures are `BadBlock` with a reason;
//! fee and spend links need store lookups and are left to the Projector.

use serde_json::Value;

use crate::address::derive_address;
use crate::error::IndexError;
use crate::types::{
    AssetRecord, BlockRecord, InputRecord, OutputRecord, ParsedBlock, TxRecord,
};
use crate::wire::{WireFullBlock, WireInput, WireOutput};

/// Parse a full block fetched for `expected_height` into entity records.
pub fn parse_block(
    expected_height: u64,
    block: &WireFullBlock,
    network_prefix: u8,
) -> Result<ParsedBlock, IndexError> {
    let header = &block.header;
    let height = header.height;
    let bad = |reason: String| IndexError::BadBlock {
        height: expected_height,
        reason,
    };

    if height != expected_height {
        return Err(bad(format!(
            "header height {height} does not match requested height"
        )));
    }
    if !is_hex64(&header.id) {
        return Err(bad(format!("block id is not 64-char hex: {:?}", header.id)));
    }
    if !is_hex64(&header.parent_id) {
        return Err(bad(format!(
            "parent id is not 64-char hex: {:?}",
            header.parent_id
        )));
    }

    let wire_txs = &block.block_transactions.transactions;
    // Empty blocks only occur at the chain bottom; anywhere else they mean
    // the node served a truncated response.
    if wire_txs.is_empty() && height > 1 {
        return Err(bad("no transactions in non-genesis block".into()));
    }

    let mut transactions = Vec::with_capacity(wire_txs.len());
    let mut outputs = Vec::new();
    let mut inputs = Vec::new();
    let mut assets = Vec::new();
    let mut block_coins: i64 = 0;
    let mut txs_size: i64 = 0;

    for (tx_index, wire_tx) in wire_txs.iter().enumerate() {
        let tx_id = wire_tx
            .id
            .as_deref()
            .filter(|id| is_hex64(id))
            .ok_or_else(|| bad(format!("transaction {tx_index} has no valid id")))?
            .to_string();

        for (input_index, wire_input) in wire_tx.inputs.iter().enumerate() {
            inputs.push(parse_input(wire_input, &tx_id, input_index as u32).map_err(&bad)?);
        }

        for (output_index, wire_output) in wire_tx.outputs.iter().enumerate() {
            let (output, output_assets) = parse_output(
                wire_output,
                &tx_id,
                output_index as u32,
                network_prefix,
            )
            .map_err(&bad)?;
            block_coins += output.value;
            assets.extend(output_assets);
            outputs.push(output);
        }

        let size = wire_tx.size.unwrap_or(0);
        txs_size += size;
        transactions.push(TxRecord {
            id: tx_id,
            block_id: header.id.clone(),
            header_id: header.id.clone(),
            inclusion_height: height,
            timestamp: header.timestamp,
            index_in_block: tx_index as u32,
            main_chain: true,
            size,
            fee: 0, // filled by the Projector once input values are known
        });
    }

    // The first transaction is the coinbase; its first output pays the miner.
    let miner_address = transactions
        .first()
        .and_then(|tx0| outputs.iter().find(|o| o.tx_id == tx0.id && o.index_in_tx == 0))
        .and_then(|o| o.address.clone());

    let block_record = BlockRecord {
        id: header.id.clone(),
        header_id: header.id.clone(),
        parent_id: header.parent_id.clone(),
        height,
        timestamp: header.timestamp,
        difficulty: header.difficulty_i64().unwrap_or(0),
        block_size: block.size.or(block.block_transactions.size).unwrap_or(0),
        block_coins,
        tx_count: transactions.len() as u32,
        txs_size,
        miner_address,
        main_chain: true,
        version: header.version.unwrap_or(1),
        pow_solutions: header.pow_solutions.clone().unwrap_or(Value::Null),
    };

    Ok(ParsedBlock {
        block: block_record,
        transactions,
        outputs,
        inputs,
        assets,
    })
}

fn parse_input(
    wire: &WireInput,
    tx_id: &str,
    index_in_tx: u32,
) -> Result<InputRecord, String> {
    let box_id = wire
        .box_id
        .as_deref()
        .filter(|id| is_hex64(id))
        .ok_or_else(|| format!("input {index_in_tx} of tx {tx_id} has no valid boxId"))?;

    let proof_bytes = wire
        .spending_proof
        .as_ref()
        .and_then(|p| p.proof_bytes.clone());
    let extension = wire
        .extension
        .clone()
        .or_else(|| wire.spending_proof.as_ref().and_then(|p| p.extension.clone()))
        .unwrap_or(Value::Null);

    Ok(InputRecord {
        box_id: box_id.to_string(),
        tx_id: tx_id.to_string(),
        index_in_tx,
        proof_bytes,
        extension,
    })
}

fn parse_output(
    wire: &WireOutput,
    tx_id: &str,
    index_in_tx: u32,
    network_prefix: u8,
) -> Result<(OutputRecord, Vec<AssetRecord>), String> {
    let box_id = wire
        .box_id
        .as_deref()
        .filter(|id| is_hex64(id))
        .ok_or_else(|| format!("output {index_in_tx} of tx {tx_id} has no valid boxId"))?;

    let value = wire
        .value
        .ok_or_else(|| format!("output {box_id} has no value"))?;
    if value < 0 {
        return Err(format!("output {box_id} has negative value {value}"));
    }

    let ergo_tree = wire
        .ergo_tree
        .as_deref()
        .filter(|t| is_hex(t))
        .ok_or_else(|| format!("output {box_id} has no valid ergoTree"))?;

    let mut assets = Vec::with_capacity(wire.assets.len());
    for (asset_index, wire_asset) in wire.assets.iter().enumerate() {
        let token_id = wire_asset
            .token_id
            .as_deref()
            .filter(|id| is_hex64(id))
            .ok_or_else(|| format!("asset {asset_index} of box {box_id} has no valid tokenId"))?;
        let amount = wire_asset
            .amount
            .ok_or_else(|| format!("asset {token_id} in box {box_id} has no amount"))?;
        if amount < 0 {
            return Err(format!(
                "asset {token_id} in box {box_id} has negative amount {amount}"
            ));
        }
        assets.push(AssetRecord {
            box_id: box_id.to_string(),
            index_in_outputs: asset_index as u32,
            token_id: token_id.to_string(),
            amount,
        });
    }

    let output = OutputRecord {
        box_id: box_id.to_string(),
        tx_id: tx_id.to_string(),
        index_in_tx,
        value,
        creation_height: wire.creation_height.unwrap_or(0),
        address: derive_address(ergo_tree, network_prefix),
        ergo_tree: ergo_tree.to_string(),
        additional_registers: wire.additional_registers.clone().unwrap_or(Value::Null),
    };

    Ok((output, assets))
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.len() % 2 == 0 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

fn is_hex64(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::MAINNET_PREFIX;
    use serde_json::json;

    fn hex_id(seed: u8) -> String {
        format!("{seed:02x}").repeat(32)
    }

    const P2PK_TREE: &str =
        "0008cd0327e65711a59378c59359c3e1d0f7abe906479eccb76094e50fe79d743ccc15e6";

    fn wire_block(height: u64, txs: Vec<serde_json::Value>) -> WireFullBlock {
        serde_json::from_value(json!({
            "header": {
                "id": hex_id(height as u8),
                "parentId": hex_id(height.saturating_sub(1) as u8),
                "height": height,
                "timestamp": 1_600_000_000_000u64 + height * 120_000,
                "difficulty": "1000000",
                "version": 3,
                "powSolutions": {"pk": "02aa", "n": "0011"}
            },
            "blockTransactions": {"transactions": txs, "size": 500}
        }))
        .unwrap()
    }

    fn simple_tx(tx_seed: u8, input_box: &str, out_box: &str, value: i64) -> serde_json::Value {
        json!({
            "id": hex_id(tx_seed),
            "size": 250,
            "inputs": [{"boxId": input_box, "spendingProof": {"proofBytes": "aabb"}}],
            "outputs": [{
                "boxId": out_box,
                "value": value,
                "ergoTree": P2PK_TREE,
                "creationHeight": 1,
                "assets": [],
                "additionalRegisters": {}
            }]
        })
    }

    #[test]
    fn parses_simple_block() {
        let block = wire_block(2, vec![simple_tx(0xa0, &hex_id(0xb0), &hex_id(0xc0), 1000)]);
        let parsed = parse_block(2, &block, MAINNET_PREFIX).unwrap();

        assert_eq!(parsed.block.height, 2);
        assert_eq!(parsed.block.tx_count, 1);
        assert_eq!(parsed.block.block_coins, 1000);
        assert_eq!(parsed.block.difficulty, 1_000_000);
        assert_eq!(parsed.transactions.len(), 1);
        assert_eq!(parsed.transactions[0].index_in_block, 0);
        assert_eq!(parsed.transactions[0].timestamp, parsed.block.timestamp);
        assert_eq!(parsed.outputs.len(), 1);
        assert_eq!(parsed.outputs[0].index_in_tx, 0);
        assert!(parsed.outputs[0].address.as_deref().unwrap().starts_with('9'));
        assert_eq!(parsed.inputs.len(), 1);
        assert_eq!(parsed.inputs[0].proof_bytes.as_deref(), Some("aabb"));
        // The coinbase's first output pays the miner.
        assert_eq!(parsed.block.miner_address, parsed.outputs[0].address);
    }

    #[test]
    fn indices_are_positional() {
        let txs = vec![
            simple_tx(0xa1, &hex_id(0xb1), &hex_id(0xc1), 10),
            simple_tx(0xa2, &hex_id(0xb2), &hex_id(0xc2), 20),
            simple_tx(0xa3, &hex_id(0xb3), &hex_id(0xc3), 30),
        ];
        let parsed = parse_block(5, &wire_block(5, txs), MAINNET_PREFIX).unwrap();
        let indices: Vec<u32> = parsed.transactions.iter().map(|t| t.index_in_block).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(parsed.block.block_coins, 60);
    }

    #[test]
    fn rejects_height_mismatch() {
        let block = wire_block(7, vec![simple_tx(0xa0, &hex_id(0xb0), &hex_id(0xc0), 1)]);
        let err = parse_block(8, &block, MAINNET_PREFIX).unwrap_err();
        assert!(matches!(err, IndexError::BadBlock { height: 8, .. }));
    }

    #[test]
    fn rejects_missing_box_id() {
        let tx = json!({
            "id": hex_id(0xa0),
            "inputs": [],
            "outputs": [{"value": 5, "ergoTree": P2PK_TREE}]
        });
        let err = parse_block(3, &wire_block(3, vec![tx]), MAINNET_PREFIX).unwrap_err();
        let IndexError::BadBlock { reason, .. } = err else {
            panic!("expected BadBlock")
        };
        assert!(reason.contains("boxId"), "reason was: {reason}");
    }

    #[test]
    fn rejects_negative_value() {
        let tx = json!({
            "id": hex_id(0xa0),
            "inputs": [],
            "outputs": [{"boxId": hex_id(0xc0), "value": -5, "ergoTree": P2PK_TREE}]
        });
        let err = parse_block(3, &wire_block(3, vec![tx]), MAINNET_PREFIX).unwrap_err();
        let IndexError::BadBlock { reason, .. } = err else {
            panic!("expected BadBlock")
        };
        assert!(reason.contains("negative"), "reason was: {reason}");
    }

    #[test]
    fn rejects_non_hex_token_id() {
        let tx = json!({
            "id": hex_id(0xa0),
            "inputs": [],
            "outputs": [{
                "boxId": hex_id(0xc0),
                "value": 5,
                "ergoTree": P2PK_TREE,
                "assets": [{"tokenId": "not-hex", "amount": 1}]
            }]
        });
        assert!(parse_block(3, &wire_block(3, vec![tx]), MAINNET_PREFIX).is_err());
    }

    #[test]
    fn empty_block_rejected_above_genesis() {
        let err = parse_block(10, &wire_block(10, vec![]), MAINNET_PREFIX).unwrap_err();
        assert!(matches!(err, IndexError::BadBlock { .. }));
    }

    #[test]
    fn empty_genesis_block_allowed() {
        let parsed = parse_block(1, &wire_block(1, vec![]), MAINNET_PREFIX).unwrap();
        assert_eq!(parsed.block.tx_count, 0);
        assert_eq!(parsed.block.miner_address, None);
    }

    #[test]
    fn parse_is_deterministic() {
        let block = wire_block(4, vec![simple_tx(0xa0, &hex_id(0xb0), &hex_id(0xc0), 77)]);
        let a = parse_block(4, &block, MAINNET_PREFIX).unwrap();
        let b = parse_block(4, &block, MAINNET_PREFIX).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn assets_keep_positional_index() {
        let tx = json!({
            "id": hex_id(0xa0),
            "inputs": [],
            "outputs": [{
                "boxId": hex_id(0xc0),
                "value": 5,
                "ergoTree": P2PK_TREE,
                "assets": [
                    {"tokenId": hex_id(0xd1), "amount": 100},
                    {"tokenId": hex_id(0xd2), "amount": 200}
                ]
            }]
        });
        let parsed = parse_block(3, &wire_block(3, vec![tx]), MAINNET_PREFIX).unwrap();
        assert_eq!(parsed.assets.len(), 2);
        assert_eq!(parsed.assets[0].index_in_outputs, 0);
        assert_eq!(parsed.assets[1].index_in_outputs, 1);
        assert_eq!(parsed.assets[1].amount, 200);
    }
}
