//! Detector thresholds and tunable constants
//!
//! The defaults are the calibrated values: a Fourier bias threshold of 5
//! (compound false positive rate below 2^-32 across all multipliers), a bit
//! count bound of 410 out of 1024 and a timing threshold of 7 standard
//! deviations (false positive rate below 10^-10).

use crate::math::DigestTruncation;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// A multiplier `m` for the Fourier bias statistic.
///
/// Each one targets a different bias shape in `k * m mod n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Multiplier {
    /// Global skew, e.g. `k` or `n - k` small.
    One,
    /// Same as `One` shifted by a bit; parity skew.
    Two,
    /// `floor(n / 2)`, which is `-1/2 mod n` for odd `n`; catches nonces
    /// that are twice a small value.
    HalfOrder,
    /// `2^b - 1`; correlation between the top and bottom `b` bit words.
    Mask(u32),
}

impl Multiplier {
    pub fn value(&self, order: &BigUint) -> BigUint {
        match self {
            Multiplier::One => BigUint::from(1u32),
            Multiplier::Two => BigUint::from(2u32),
            Multiplier::HalfOrder => order >> 1u32,
            Multiplier::Mask(bits) => (BigUint::from(1u32) << *bits) - 1u32,
        }
    }
}

impl fmt::Display for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Multiplier::One => f.write_str("1"),
            Multiplier::Two => f.write_str("2"),
            Multiplier::HalfOrder => f.write_str("n/2"),
            Multiplier::Mask(bits) => write!(f, "2^{}-1", bits),
        }
    }
}

pub const DEFAULT_MULTIPLIERS: [Multiplier; 7] = [
    Multiplier::One,
    Multiplier::Two,
    Multiplier::HalfOrder,
    Multiplier::Mask(8),
    Multiplier::Mask(16),
    Multiplier::Mask(32),
    Multiplier::Mask(64),
];

/// Normal quantile giving a two sided tail below 2^-32; `floor(512 - z * 16)`
/// lands on 410 for 1024 samples.
pub const DEFAULT_BIT_Z: f64 = 6.375;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub bias_threshold: f64,
    pub multipliers: Vec<Multiplier>,
    /// Fixed lower bound for LSB/MSB counts; derived from `bit_z` when unset.
    pub bit_min_count: Option<usize>,
    pub bit_z: f64,
    pub timing_threshold: f64,
    /// The cutoff schedule stops once the partition index drops to this.
    pub timing_min_partition: usize,
    /// Each cutoff keeps `1 / timing_divisor` of the previous partition.
    pub timing_divisor: usize,
    pub digest_truncation: DigestTruncation,
    pub max_clock_resolution_ns: f64,
    pub min_distinct_timings: usize,
    /// The signer draws fresh randomness per signature, so two identical
    /// signatures are a finding.
    pub expect_randomized: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            bias_threshold: 5.0,
            multipliers: DEFAULT_MULTIPLIERS.to_vec(),
            bit_min_count: None,
            bit_z: DEFAULT_BIT_Z,
            timing_threshold: 7.0,
            timing_min_partition: 10,
            timing_divisor: 2,
            digest_truncation: DigestTruncation::None,
            max_clock_resolution_ns: 1000.0,
            min_distinct_timings: 16,
            expect_randomized: false,
        }
    }
}

impl AnalysisConfig {
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: AnalysisConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.bias_threshold > 0.0) {
            return Err(ConfigError::Invalid("bias_threshold must be positive".into()));
        }
        if !(self.timing_threshold > 0.0) {
            return Err(ConfigError::Invalid("timing_threshold must be positive".into()));
        }
        if !(self.bit_z > 0.0) {
            return Err(ConfigError::Invalid("bit_z must be positive".into()));
        }
        if self.timing_divisor < 2 {
            return Err(ConfigError::Invalid("timing_divisor must be at least 2".into()));
        }
        if self.multipliers.is_empty() {
            return Err(ConfigError::Invalid("at least one multiplier is required".into()));
        }
        if let Some(Multiplier::Mask(bits)) = self
            .multipliers
            .iter()
            .find(|m| matches!(m, Multiplier::Mask(b) if *b == 0 || *b > 4096))
        {
            return Err(ConfigError::Invalid(format!(
                "mask width {} out of range 1..=4096",
                bits
            )));
        }
        Ok(())
    }

    /// Lower bound on the LSB/MSB counts for `total` samples.
    ///
    /// Uses the normal approximation to the binomial: a fair count deviates
    /// from `N/2` with standard deviation `sqrt(N)/2`.
    pub fn bit_min_count(&self, total: usize) -> usize {
        if let Some(fixed) = self.bit_min_count {
            return fixed;
        }
        let n = total as f64;
        let bound = n / 2.0 - self.bit_z * n.sqrt() / 2.0;
        if bound <= 0.0 {
            0
        } else {
            bound.floor() as usize
        }
    }
}
