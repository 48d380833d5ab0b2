//! Best-effort decoding of serialized register values.
//!
//! Token metadata lives in the minting output's registers by convention:
//! R4 = name, R5 = description (both `Coll[Byte]`), R6 = decimals (an `Int`,
//! or a `Coll[Byte]` of ASCII digits in older tooling). Only those two value
//! shapes are decoded here; anything else yields `None`. A decode failure is
//! never an error — the token row simply gets NULL metadata fields.

const TYPE_INT: u8 = 0x04;
const TYPE_COLL_BYTE: u8 = 0x0e;

/// Decode a serialized `Coll[Byte]` register into its raw bytes.
pub fn coll_byte(hex_value: &str) -> Option<Vec<u8>> {
    let bytes = hex::decode(hex_value).ok()?;
    let (&tag, rest) = bytes.split_first()?;
    if tag != TYPE_COLL_BYTE {
        return None;
    }
    let mut pos = 0;
    let len = read_vlq(rest, &mut pos)? as usize;
    let data = rest.get(pos..pos + len)?;
    // Trailing garbage means this is not the shape we think it is.
    if pos + len != rest.len() {
        return None;
    }
    Some(data.to_vec())
}

/// Decode a `Coll[Byte]` register as UTF-8 text.
pub fn utf8_text(hex_value: &str) -> Option<String> {
    String::from_utf8(coll_byte(hex_value)?).ok()
}

/// Decode a serialized `Int` register (zig-zag VLQ).
pub fn int_value(hex_value: &str) -> Option<i64> {
    let bytes = hex::decode(hex_value).ok()?;
    let (&tag, rest) = bytes.split_first()?;
    if tag != TYPE_INT {
        return None;
    }
    let mut pos = 0;
    let raw = read_vlq(rest, &mut pos)?;
    if pos != rest.len() {
        return None;
    }
    Some(zigzag_decode(raw))
}

/// Decimals may be an `Int` or, from older minting tools, ASCII digits in a
/// `Coll[Byte]`.
pub fn decimals(hex_value: &str) -> Option<i32> {
    if let Some(n) = int_value(hex_value) {
        return i32::try_from(n).ok().filter(|d| *d >= 0);
    }
    utf8_text(hex_value)?.parse().ok()
}

fn read_vlq(bytes: &[u8], pos: &mut usize) -> Option<u64> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    loop {
        let byte = *bytes.get(*pos)?;
        *pos += 1;
        result |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Some(result);
        }
        shift += 7;
        if shift > 63 {
            return None;
        }
    }
}

fn zigzag_decode(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}
