//! DER codec for the two-integer ECDSA signature encoding
//!
//! Signatures are laid out as `SEQUENCE { INTEGER r, INTEGER s }`. The
//! content octets of each INTEGER are read as an unsigned big-endian
//! magnitude. Some signers skip the zero pad, so a set high bit is accepted
//! and read the same way.

use crate::signature::Signature;
use num_bigint::BigUint;
use thiserror::Error;

const TAG_SEQUENCE: u8 = 0x30;
const TAG_INTEGER: u8 = 0x02;

/// Smallest well-formed signature: `30 06 02 01 xx 02 01 xx`.
const MIN_SIGNATURE_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("signature too short: {0} bytes")]
    TooShort(usize),
    #[error("unexpected tag 0x{found:02x} at offset {offset}, expected 0x{expected:02x}")]
    UnexpectedTag { offset: usize, expected: u8, found: u8 },
    #[error("length field at offset {0} is malformed")]
    InvalidLength(usize),
    #[error("length {len} at offset {offset} runs past the end of its container")]
    Overrun { offset: usize, len: usize },
    #[error("INTEGER at offset {0} is empty")]
    EmptyInteger(usize),
    #[error("{0} trailing bytes after signature")]
    TrailingData(usize),
}

/// Reads a definite length starting at `offset`.
///
/// Returns the decoded length and the offset of the first content byte.
fn read_length(bytes: &[u8], offset: usize) -> Result<(usize, usize), DecodeError> {
    let first = *bytes.get(offset).ok_or(DecodeError::TooShort(bytes.len()))?;
    if first & 0x80 == 0 {
        return Ok((first as usize, offset + 1));
    }

    let count = (first & 0x7f) as usize;
    if count == 0 || count > std::mem::size_of::<u32>() {
        return Err(DecodeError::InvalidLength(offset));
    }
    let end = offset + 1 + count;
    let octets = bytes
        .get(offset + 1..end)
        .ok_or(DecodeError::Overrun { offset, len: count })?;
    let len = octets.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize);
    Ok((len, end))
}

fn expect_tag(bytes: &[u8], offset: usize, expected: u8) -> Result<(), DecodeError> {
    let found = *bytes.get(offset).ok_or(DecodeError::TooShort(bytes.len()))?;
    if found != expected {
        return Err(DecodeError::UnexpectedTag {
            offset,
            expected,
            found,
        });
    }
    Ok(())
}

/// Decodes the INTEGER at `offset`, which must end at or before `limit`.
///
/// Returns the value and the offset just past its content.
fn read_integer(bytes: &[u8], offset: usize, limit: usize) -> Result<(BigUint, usize), DecodeError> {
    expect_tag(bytes, offset, TAG_INTEGER)?;
    let (len, start) = read_length(bytes, offset + 1)?;
    if len == 0 {
        return Err(DecodeError::EmptyInteger(offset));
    }
    let end = start
        .checked_add(len)
        .filter(|&end| end <= limit)
        .ok_or(DecodeError::Overrun { offset, len })?;

    let content = &bytes[start..end];
    if content[0] & 0x80 != 0 {
        tracing::warn!(offset, "INTEGER without zero pad, reading as unsigned");
    }
    Ok((BigUint::from_bytes_be(content), end))
}

/// Extracts `r` and `s` from a DER encoded ECDSA signature.
pub fn decode_signature(bytes: &[u8]) -> Result<Signature, DecodeError> {
    if bytes.len() < MIN_SIGNATURE_LEN {
        return Err(DecodeError::TooShort(bytes.len()));
    }
    expect_tag(bytes, 0, TAG_SEQUENCE)?;

    // Long form lengths push the first INTEGER back by the extra octets.
    let (seq_len, start_r) = read_length(bytes, 1)?;
    let seq_end = start_r
        .checked_add(seq_len)
        .filter(|&end| end <= bytes.len())
        .ok_or(DecodeError::Overrun {
            offset: 1,
            len: seq_len,
        })?;
    if seq_end < bytes.len() {
        return Err(DecodeError::TrailingData(bytes.len() - seq_end));
    }

    let (r, start_s) = read_integer(bytes, start_r, seq_end)?;
    let (s, end) = read_integer(bytes, start_s, seq_end)?;
    if end != seq_end {
        return Err(DecodeError::TrailingData(seq_end - end));
    }

    Ok(Signature { r, s })
}

/// Extracts only `r`.
pub fn extract_r(bytes: &[u8]) -> Result<BigUint, DecodeError> {
    decode_signature(bytes).map(|sig| sig.r)
}

/// Extracts only `s`.
pub fn extract_s(bytes: &[u8]) -> Result<BigUint, DecodeError> {
    decode_signature(bytes).map(|sig| sig.s)
}

fn push_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }
    let octets: Vec<u8> = len
        .to_be_bytes()
        .into_iter()
        .skip_while(|&b| b == 0)
        .collect();
    out.push(0x80 | octets.len() as u8);
    out.extend_from_slice(&octets);
}

fn push_integer(out: &mut Vec<u8>, value: &BigUint) {
    // to_bytes_be() yields [0] for zero, which is already minimal.
    let magnitude = value.to_bytes_be();
    let pad = magnitude[0] & 0x80 != 0;
    out.push(TAG_INTEGER);
    push_length(out, magnitude.len() + pad as usize);
    if pad {
        out.push(0);
    }
    out.extend_from_slice(&magnitude);
}

/// Encodes `r` and `s` as a minimal DER SEQUENCE.
pub fn encode_signature(sig: &Signature) -> Vec<u8> {
    let mut body = Vec::new();
    push_integer(&mut body, &sig.r);
    push_integer(&mut body, &sig.s);

    let mut out = Vec::with_capacity(body.len() + 4);
    out.push(TAG_SEQUENCE);
    push_length(&mut out, body.len());
    out.extend_from_slice(&body);
    out
}
