use ethers::types::{Address, Bytes, H256, U256};

use crate::error::{Error, Result};

pub fn fmt_address(addr: Address) -> String {
    format!("0x{}", hex::encode(addr.as_bytes()))
}

pub fn fmt_h256(h: H256) -> String {
    format!("0x{}", hex::encode(h.as_bytes()))
}

/// JSON-RPC "quantity" encoding: minimal-width, `0x`-prefixed lowercase hex.
pub fn fmt_u256(v: U256) -> String {
    if v.is_zero() {
        "0x0".to_string()
    } else {
        format!("0x{v:x}")
    }
}

pub fn fmt_bytes(b: &Bytes) -> String {
    format!("0x{}", hex::encode(b.as_ref()))
}

pub fn parse_u256_quantity(field: &'static str, s: &str) -> Result<U256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Ok(U256::zero());
    }
    U256::from_str_radix(s, 16)
        .map_err(|e| Error::MalformedField { field, reason: e.to_string() })
}

pub fn parse_h256(field: &'static str, s: &str) -> Result<H256> {
    let bytes = parse_bytes(field, s)?;
    if bytes.len() != 32 {
        return Err(Error::MalformedField {
            field,
            reason: format!("expected 32-byte hex, got {} bytes", bytes.len()),
        });
    }
    Ok(H256::from_slice(&bytes))
}

pub fn parse_address(field: &'static str, s: &str) -> Result<Address> {
    let bytes = parse_bytes(field, s)?;
    if bytes.len() != 20 {
        return Err(Error::MalformedField {
            field,
            reason: format!("expected 20-byte hex, got {} bytes", bytes.len()),
        });
    }
    Ok(Address::from_slice(&bytes))
}

pub fn parse_bytes(field: &'static str, s: &str) -> Result<Bytes> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(s)
        .map(Bytes::from)
        .map_err(|e| Error::MalformedField { field, reason: e.to_string() })
}

/// Big-endian 16-byte rendering of a value that must fit in 128 bits, used by
/// the v0.7 packed gas words and the `paymasterAndData` gas halves.
pub fn u256_to_u128_be(field: &'static str, v: U256) -> Result<[u8; 16]> {
    if v > U256::from(u128::MAX) {
        return Err(Error::UnsupportedField(format!(
            "{field} exceeds 128 bits and cannot be packed: {v}"
        )));
    }
    let mut word = [0u8; 32];
    v.to_big_endian(&mut word);
    let mut half = [0u8; 16];
    half.copy_from_slice(&word[16..]);
    Ok(half)
}

/// `hi ‖ lo` as one 32-byte word (`accountGasLimits`, `gasFees`).
pub fn concat_u128(hi: [u8; 16], lo: [u8; 16]) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[..16].copy_from_slice(&hi);
    word[16..].copy_from_slice(&lo);
    word
}
