//! Modular arithmetic for nonce recovery

use anyhow::{anyhow, bail, Result};
use num_bigint::BigUint;
use num_traits::{Num, Zero};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArithmeticError {
    #[error("modulus must be non-zero")]
    ZeroModulus,
    #[error("{value} is not invertible modulo n")]
    NotInvertible { value: BigUint },
}

/// How a message digest becomes the challenge `h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DigestTruncation {
    /// Use the whole digest as an unsigned big-endian integer, even when it
    /// is longer than the order. Several providers sign this way.
    #[default]
    None,
    /// Keep only the leftmost `bits(n)` bits of the digest.
    LeftmostBits,
}

/// Interprets `digest` as a non-negative big-endian integer.
///
/// The result is not reduced modulo the order.
pub fn challenge_from_digest(digest: &[u8], policy: DigestTruncation, order_bits: u64) -> BigUint {
    let h = BigUint::from_bytes_be(digest);
    match policy {
        DigestTruncation::None => h,
        DigestTruncation::LeftmostBits => {
            let digest_bits = digest.len() as u64 * 8;
            if digest_bits > order_bits {
                h >> (digest_bits - order_bits)
            } else {
                h
            }
        }
    }
}

pub fn mod_inverse(a: &BigUint, n: &BigUint) -> Option<BigUint> {
    if n.is_zero() {
        return None;
    }
    a.modinv(n)
}

/// Recovers the ephemeral scalar of an ECDSA signature.
///
/// Computes `k = (x*r + h) * s^-1 mod n`, the inverse of the signing
/// equation `s = k^-1 * (h + x*r) mod n`. This needs the private scalar `x`,
/// so it only belongs in analysis of a key the caller controls.
pub fn recover_nonce(
    r: &BigUint,
    s: &BigUint,
    h: &BigUint,
    x: &BigUint,
    n: &BigUint,
) -> Result<BigUint, ArithmeticError> {
    if n.is_zero() {
        return Err(ArithmeticError::ZeroModulus);
    }
    let s_inv = mod_inverse(s, n).ok_or_else(|| ArithmeticError::NotInvertible { value: s.clone() })?;
    Ok(((x * r + h) * s_inv) % n)
}

/// Computes `s = k^-1 * (h + x*r) mod n` for a chosen nonce.
///
/// Used to build synthetic signatures with a known nonce distribution.
pub fn signing_equation(
    k: &BigUint,
    h: &BigUint,
    x: &BigUint,
    r: &BigUint,
    n: &BigUint,
) -> Result<BigUint, ArithmeticError> {
    if n.is_zero() {
        return Err(ArithmeticError::ZeroModulus);
    }
    let k_inv = mod_inverse(k, n).ok_or_else(|| ArithmeticError::NotInvertible { value: k.clone() })?;
    Ok(((h + x * r) * k_inv) % n)
}

/// Parses a scalar written in hex, with or without a `0x` prefix.
pub fn parse_hex_scalar(s: &str) -> Result<BigUint> {
    let trimmed = s.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.is_empty() {
        bail!("Empty hex string");
    }
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!("Invalid hex string: only 0-9, a-f allowed");
    }
    BigUint::from_str_radix(digits, 16).map_err(|e| anyhow!("Failed to parse hex: {}", e))
}

/// Fixed-width lowercase hex, left padded to `byte_len` bytes.
pub fn scalar_to_hex_string(value: &BigUint, byte_len: usize) -> String {
    let bytes = value.to_bytes_be();
    let mut padded = vec![0u8; byte_len.saturating_sub(bytes.len())];
    padded.extend_from_slice(&bytes);
    hex::encode(padded)
}
