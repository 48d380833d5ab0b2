//! Typed models for the node HTTP API.
//!
//! Deserialization is deliberately tolerant: fields the parser must validate
//! are `Option`s so that a missing `boxId` becomes a `BadBlock` with a reason
//! instead of an opaque serde error, unknown top-level keys are ignored, and
//! opaque blobs (`powSolutions`, registers, extensions) stay `Value`s.

use serde::Deserialize;
use serde_json::Value;

/// Subset of `/info` the pipeline consumes.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    #[serde(default)]
    pub full_height: Option<u64>,
    #[serde(default)]
    pub headers_height: Option<u64>,
    #[serde(default)]
    pub best_header_id: Option<String>,
    #[serde(default)]
    pub app_version: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// `/blocks/{id}/header` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireHeader {
    pub id: String,
    pub parent_id: String,
    pub height: u64,
    pub timestamp: i64,
    /// The node serializes difficulty as a decimal string; older versions
    /// used a bare number. Kept raw and coerced in the parser.
    #[serde(default)]
    pub difficulty: Option<Value>,
    #[serde(default)]
    pub version: Option<i16>,
    #[serde(default)]
    pub pow_solutions: Option<Value>,
}

impl WireHeader {
    /// Difficulty as an integer regardless of the wire representation.
    pub fn difficulty_i64(&self) -> Option<i64> {
        match &self.difficulty {
            Some(Value::String(s)) => s.parse().ok(),
            Some(Value::Number(n)) => n.as_i64(),
            _ => None,
        }
    }
}

/// `/blocks/{id}` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireFullBlock {
    pub header: WireHeader,
    pub block_transactions: WireBlockTransactions,
    #[serde(default)]
    pub size: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireBlockTransactions {
    #[serde(default)]
    pub header_id: Option<String>,
    #[serde(default)]
    pub transactions: Vec<WireTransaction>,
    #[serde(default)]
    pub size: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireTransaction {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub inputs: Vec<WireInput>,
    #[serde(default)]
    pub outputs: Vec<WireOutput>,
    #[serde(default)]
    pub size: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireInput {
    #[serde(default)]
    pub box_id: Option<String>,
    #[serde(default)]
    pub spending_proof: Option<WireSpendingProof>,
    /// Some node versions put the extension at the input level.
    #[serde(default)]
    pub extension: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireSpendingProof {
    #[serde(default)]
    pub proof_bytes: Option<String>,
    #[serde(default)]
    pub extension: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireOutput {
    #[serde(default)]
    pub box_id: Option<String>,
    #[serde(default)]
    pub value: Option<i64>,
    #[serde(default)]
    pub ergo_tree: Option<String>,
    #[serde(default)]
    pub creation_height: Option<u32>,
    #[serde(default)]
    pub assets: Vec<WireAsset>,
    #[serde(default)]
    pub additional_registers: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireAsset {
    #[serde(default)]
    pub token_id: Option<String>,
    #[serde(default)]
    pub amount: Option<i64>,
}
