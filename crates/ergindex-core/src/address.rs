//! Address derivation from serialized ergoTree scripts.
//!
//! Encoding scheme:
//! - the standard pay-to-public-key tree (`0008cd` + 33-byte compressed EC
//!   point) encodes as a P2PK address whose body is the key itself;
//! - every other tree encodes as a pay-to-script address whose body is the
//!   serialized tree;
//! - address = base58(head ‖ body ‖ checksum), head = network prefix + type
//!   tag, checksum = first 4 bytes of Blake2b-256(head ‖ body).
//!
//! An undecodable tree yields `None` — the output's address column is
//! nullable and derivation failure is never a block error.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

type Blake2b256 = Blake2b<U32>;

/// Mainnet network prefix.
pub const MAINNET_PREFIX: u8 = 0x00;
/// Testnet network prefix.
pub const TESTNET_PREFIX: u8 = 0x10;

const TYPE_P2PK: u8 = 0x01;
const TYPE_P2S: u8 = 0x03;
const CHECKSUM_LEN: usize = 4;

/// Serialized prefix of the standard P2PK tree: no segregated constants,
/// tree version 0, `SigmaPropConstant(ProveDlog(...))`.
const P2PK_TREE_PREFIX: [u8; 3] = [0x00, 0x08, 0xcd];
const P2PK_TREE_LEN: usize = 36;

/// Derive the canonical address for an ergoTree, or `None` if the tree hex
/// is not decodable.
pub fn derive_address(ergo_tree_hex: &str, network_prefix: u8) -> Option<String> {
    let tree = hex::decode(ergo_tree_hex).ok()?;
    if tree.is_empty() {
        return None;
    }

    let (type_tag, body): (u8, &[u8]) = if is_p2pk_tree(&tree) {
        (TYPE_P2PK, &tree[P2PK_TREE_PREFIX.len()..])
    } else {
        (TYPE_P2S, &tree[..])
    };

    let mut payload = Vec::with_capacity(1 + body.len() + CHECKSUM_LEN);
    payload.push(network_prefix + type_tag);
    payload.extend_from_slice(body);

    let digest = Blake2b256::digest(&payload);
    payload.extend_from_slice(&digest[..CHECKSUM_LEN]);

    Some(bs58::encode(payload).into_string())
}

/// Returns `true` for the standard pay-to-public-key tree shape.
pub fn is_p2pk_tree(tree: &[u8]) -> bool {
    tree.len() == P2PK_TREE_LEN && tree.starts_with(&P2PK_TREE_PREFIX)
}

/// Hex-string variant of [`is_p2pk_tree`], for callers holding the raw column.
pub fn is_p2pk_tree_hex(tree_hex: &str) -> bool {
    tree_hex.len() == P2PK_TREE_LEN * 2 && tree_hex.to_ascii_lowercase().starts_with("0008cd")
}

/// Validate an address string: base58-decodable, expected network prefix,
/// checksum intact. Used by tests; the pipeline never decodes addresses.
pub fn validate_address(address: &str, network_prefix: u8) -> bool {
    let bytes = match bs58::decode(address).into_vec() {
        Ok(b) => b,
        Err(_) => return false,
    };
    if bytes.len() <= 1 + CHECKSUM_LEN {
        return false;
    }
    if bytes[0] & 0xf0 != network_prefix {
        return false;
    }
    let (payload, checksum) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
    let digest = Blake2b256::digest(payload);
    digest[..CHECKSUM_LEN] == *checksum
}

#[cfg(test)]
mod tests {
    use super::*;

    // 0008cd + 33-byte compressed point
    const P2PK_TREE: &str =
        "0008cd0327e65711a59378c59359c3e1d0f7abe906479eccb76094e50fe79d743ccc15e6";

    #[test]
    fn p2pk_tree_detected() {
        let tree = hex::decode(P2PK_TREE).unwrap();
        assert!(is_p2pk_tree(&tree));
        assert!(is_p2pk_tree_hex(P2PK_TREE));
        assert!(!is_p2pk_tree_hex("00d1968302010100ff"));
    }

    #[test]
    fn mainnet_p2pk_starts_with_9() {
        let addr = derive_address(P2PK_TREE, MAINNET_PREFIX).unwrap();
        assert!(addr.starts_with('9'), "mainnet P2PK address was {addr}");
        assert!(validate_address(&addr, MAINNET_PREFIX));
    }

    #[test]
    fn testnet_p2pk_starts_with_3() {
        let addr = derive_address(P2PK_TREE, TESTNET_PREFIX).unwrap();
        assert!(addr.starts_with('3'), "testnet P2PK address was {addr}");
        assert!(validate_address(&addr, TESTNET_PREFIX));
    }

    #[test]
    fn p2s_tree_gets_script_address() {
        // Not the P2PK shape — falls through to pay-to-script.
        let addr = derive_address("00d1968302010100ff", MAINNET_PREFIX).unwrap();
        assert!(validate_address(&addr, MAINNET_PREFIX));
        // P2PK and P2S trees must never collide on the same address.
        let p2pk = derive_address(P2PK_TREE, MAINNET_PREFIX).unwrap();
        assert_ne!(addr, p2pk);
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = derive_address(P2PK_TREE, MAINNET_PREFIX).unwrap();
        let b = derive_address(P2PK_TREE, MAINNET_PREFIX).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn invalid_hex_yields_none() {
        assert_eq!(derive_address("zz-not-hex", MAINNET_PREFIX), None);
        assert_eq!(derive_address("", MAINNET_PREFIX), None);
    }

    #[test]
    fn corrupted_checksum_rejected() {
        let addr = derive_address(P2PK_TREE, MAINNET_PREFIX).unwrap();
        let mut corrupted = addr.clone();
        corrupted.pop();
        corrupted.push('1');
        assert!(!validate_address(&corrupted, MAINNET_PREFIX) || corrupted == addr);
    }
}
