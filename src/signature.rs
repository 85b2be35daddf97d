//! Signature, curve and sample data types

use crate::math::parse_hex_scalar;
use anyhow::{bail, Context, Result};
use num_bigint::BigUint;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// The two integers of an ECDSA signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub r: BigUint,
    pub s: BigUint,
}

const SECP224R1_ORDER: [u8; 28] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0x16, 0xa2, 0xe0, 0xb8, 0xf0, 0x3e, 0x13, 0xdd, 0x29, 0x45,
    0x5c, 0x5c, 0x2a, 0x3d,
];

const SECP256R1_ORDER: [u8; 32] = [
    0xff, 0xff, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xbc, 0xe6, 0xfa, 0xad, 0xa7, 0x17, 0x9e, 0x84,
    0xf3, 0xb9, 0xca, 0xc2, 0xfc, 0x63, 0x25, 0x51,
];

const SECP256K1_ORDER: [u8; 32] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xfe, 0xba, 0xae, 0xdc, 0xe6, 0xaf, 0x48, 0xa0, 0x3b,
    0xbf, 0xd2, 0x5e, 0x8c, 0xd0, 0x36, 0x41, 0x41,
];

const SECP384R1_ORDER: [u8; 48] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xc7, 0x63, 0x4d, 0x81, 0xf4, 0x37, 0x2d, 0xdf, 0x58, 0x1a, 0x0d, 0xb2,
    0x48, 0xb0, 0xa7, 0x7a, 0xec, 0xec, 0x19, 0x6a, 0xcc, 0xc5, 0x29, 0x73,
];

const SECP521R1_ORDER: [u8; 66] = [
    0x01, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xfa, 0x51, 0x86,
    0x87, 0x83, 0xbf, 0x2f, 0x96, 0x6b, 0x7f, 0xcc, 0x01, 0x48, 0xf7, 0x09,
    0xa5, 0xd0, 0x3b, 0xb5, 0xc9, 0xb8, 0x89, 0x9c, 0x47, 0xae, 0xbb, 0x6f,
    0xb7, 0x1e, 0x91, 0x38, 0x64, 0x09,
];

const BRAINPOOLP256R1_ORDER: [u8; 32] = [
    0xa9, 0xfb, 0x57, 0xdb, 0xa1, 0xee, 0xa9, 0xbc, 0x3e, 0x66, 0x0a, 0x90,
    0x9d, 0x83, 0x8d, 0x71, 0x8c, 0x39, 0x7a, 0xa3, 0xb5, 0x61, 0xa6, 0xf7,
    0x90, 0x1e, 0x0e, 0x82, 0x97, 0x48, 0x56, 0xa7,
];

/// Named curves with well known group orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedCurve {
    Secp224r1,
    Secp256r1,
    Secp256k1,
    Secp384r1,
    Secp521r1,
    BrainpoolP256r1,
}

impl NamedCurve {
    pub const ALL: [NamedCurve; 6] = [
        NamedCurve::Secp224r1,
        NamedCurve::Secp256r1,
        NamedCurve::Secp256k1,
        NamedCurve::Secp384r1,
        NamedCurve::Secp521r1,
        NamedCurve::BrainpoolP256r1,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            NamedCurve::Secp224r1 => "secp224r1",
            NamedCurve::Secp256r1 => "secp256r1",
            NamedCurve::Secp256k1 => "secp256k1",
            NamedCurve::Secp384r1 => "secp384r1",
            NamedCurve::Secp521r1 => "secp521r1",
            NamedCurve::BrainpoolP256r1 => "brainpoolP256r1",
        }
    }

    /// Group order as big-endian bytes.
    pub fn order_bytes(&self) -> &'static [u8] {
        match self {
            NamedCurve::Secp224r1 => &SECP224R1_ORDER,
            NamedCurve::Secp256r1 => &SECP256R1_ORDER,
            NamedCurve::Secp256k1 => &SECP256K1_ORDER,
            NamedCurve::Secp384r1 => &SECP384R1_ORDER,
            NamedCurve::Secp521r1 => &SECP521R1_ORDER,
            NamedCurve::BrainpoolP256r1 => &BRAINPOOLP256R1_ORDER,
        }
    }
}

impl FromStr for NamedCurve {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        let alias = match wanted.as_str() {
            "p-224" | "p224" => "secp224r1",
            "p-256" | "p256" | "prime256v1" => "secp256r1",
            "p-384" | "p384" => "secp384r1",
            "p-521" | "p521" => "secp521r1",
            other => other,
        };
        NamedCurve::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(alias))
            .ok_or_else(|| anyhow::anyhow!("Unknown curve: {}", s))
    }
}

impl fmt::Display for NamedCurve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Order and size of the group a signer works in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurveParameters {
    pub name: Option<String>,
    pub order: BigUint,
    pub bits: u64,
}

impl CurveParameters {
    pub fn new(order: BigUint) -> Result<Self> {
        if order <= BigUint::from(1u32) {
            bail!("Curve order must be greater than one");
        }
        let bits = order.bits();
        Ok(Self {
            name: None,
            order,
            bits,
        })
    }

    pub fn named(curve: NamedCurve) -> Self {
        let order = BigUint::from_bytes_be(curve.order_bytes());
        let bits = order.bits();
        Self {
            name: Some(curve.name().to_string()),
            order,
            bits,
        }
    }

    /// `floor(n / 2)`, the boundary used for the MSB indicator.
    pub fn half_order(&self) -> BigUint {
        &self.order >> 1u32
    }

    pub fn byte_len(&self) -> usize {
        self.bits.div_ceil(8) as usize
    }
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.filter(|s| !s.trim().is_empty()))
}

/// One record of pre-collected signing artifacts, as found in input files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleInput {
    pub signature: String,
    pub digest: String,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub elapsed_ns: Option<u64>,
}

/// Artifacts of one signing operation, before any analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSample {
    pub message: Vec<u8>,
    pub signature: Vec<u8>,
    pub digest: Vec<u8>,
    pub elapsed_ns: Option<u64>,
}

impl TryFrom<SampleInput> for RawSample {
    type Error = anyhow::Error;

    fn try_from(input: SampleInput) -> Result<Self> {
        let signature = decode_hex(&input.signature).context("Invalid signature hex")?;
        let digest = decode_hex(&input.digest).context("Invalid digest hex")?;
        let message = match input.message {
            Some(m) => decode_hex(&m).context("Invalid message hex")?,
            None => Vec::new(),
        };
        if signature.is_empty() {
            bail!("Signature must not be empty");
        }

        Ok(RawSample {
            message,
            signature,
            digest,
            elapsed_ns: input.elapsed_ns,
        })
    }
}

fn decode_hex(s: &str) -> Result<Vec<u8>> {
    let trimmed = s.trim();
    let without_prefix = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    Ok(hex::decode(without_prefix)?)
}

/// A signing operation with its recovered nonce.
#[derive(Debug, Clone)]
pub struct Sample {
    pub index: usize,
    pub message: Vec<u8>,
    pub signature: Vec<u8>,
    pub r: BigUint,
    pub challenge: BigUint,
    pub nonce: BigUint,
    pub elapsed_ns: Option<u64>,
}

/// All samples of one analysis run, in signing order.
#[derive(Debug, Clone)]
pub struct SampleSet {
    pub curve: CurveParameters,
    pub samples: Vec<Sample>,
}

impl SampleSet {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn nonces(&self) -> Vec<BigUint> {
        self.samples.iter().map(|s| s.nonce.clone()).collect()
    }

    /// Elapsed time of each sample, in sample order.
    pub fn timings(&self) -> Vec<Option<u64>> {
        self.samples.iter().map(|s| s.elapsed_ns).collect()
    }
}

/// Samples sharing one `r` value.
#[derive(Debug, Clone)]
pub struct SampleGroup {
    pub r: BigUint,
    pub indices: Vec<usize>,
}

/// Groups samples by `r`, keeping groups in order of first appearance.
pub fn group_by_r(samples: &[Sample]) -> Vec<SampleGroup> {
    let mut position: HashMap<&BigUint, usize> = HashMap::new();
    let mut groups: Vec<SampleGroup> = Vec::new();

    for sample in samples {
        match position.get(&sample.r) {
            Some(&at) => groups[at].indices.push(sample.index),
            None => {
                position.insert(&sample.r, groups.len());
                groups.push(SampleGroup {
                    r: sample.r.clone(),
                    indices: vec![sample.index],
                });
            }
        }
    }
    groups
}

/// Parses a private scalar given as hex and checks it against the order.
pub fn parse_private_scalar(hex_str: &str, curve: &CurveParameters) -> Result<BigUint> {
    let x = parse_hex_scalar(hex_str)?;
    if x == BigUint::from(0u32) || x >= curve.order {
        bail!("Private key must be in [1, n)");
    }
    Ok(x)
}
