//! Statistical detectors over recovered nonces

use crate::clock::CapabilityUnavailable;
use crate::config::Multiplier;
use crate::signature::SampleSet;
use num_bigint::BigUint;
use std::fmt;
use thiserror::Error;

pub mod bits;
pub mod fourier;
pub mod repeat;
pub mod timing;

pub use bits::{BitCounts, BitDistributionDetector};
pub use fourier::{BiasResult, FourierBiasDetector};
pub use repeat::{RepeatedNonceDetector, RepeatedSignatureDetector};
pub use timing::{TimingAnalysis, TimingCorrelator, TimingPartition};

pub trait Detector: Send + Sync {
    fn name(&self) -> &'static str;
    fn min_samples(&self) -> usize;
    fn detect(&self, samples: &SampleSet) -> Result<Outcome, SkipReason>;
}

/// Why a detector produced no verdict.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SkipReason {
    #[error(transparent)]
    Capability(#[from] CapabilityUnavailable),
    #[error("need at least {needed} samples, have {have}")]
    TooFewSamples { needed: usize, have: usize },
}

/// Returns `TooFewSamples` unless `samples` satisfies `detector`'s minimum.
pub fn require_samples(detector: &dyn Detector, samples: &SampleSet) -> Result<(), SkipReason> {
    let needed = detector.min_samples();
    if samples.len() < needed {
        return Err(SkipReason::TooFewSamples {
            needed,
            have: samples.len(),
        });
    }
    Ok(())
}

/// The statistics a detector computed, whether or not they crossed a threshold.
#[derive(Debug, Clone)]
pub enum Statistics {
    Bits(BitCounts),
    Fourier(Vec<BiasResult>),
    Timing(TimingAnalysis),
    Repeats { groups: Vec<Vec<usize>> },
}

#[derive(Debug, Clone)]
pub struct Outcome {
    pub statistics: Statistics,
    pub findings: Vec<Finding>,
}

/// A detected anomaly and the numbers that triggered it.
#[derive(Debug, Clone)]
pub struct Finding {
    pub detector: &'static str,
    pub evidence: Evidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitPosition {
    Lsb,
    Msb,
}

#[derive(Debug, Clone)]
pub enum Evidence {
    BitCount {
        bit: BitPosition,
        count: usize,
        total: usize,
        min_count: usize,
    },
    FourierBias {
        multiplier: Multiplier,
        score: f64,
        threshold: f64,
    },
    TimingBias {
        max_z: f64,
        threshold: f64,
        partition: TimingPartition,
    },
    RepeatedNonce {
        r: BigUint,
        indices: Vec<usize>,
    },
    RepeatedSignature {
        indices: Vec<usize>,
    },
}

impl fmt::Display for Evidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Evidence::BitCount {
                bit,
                count,
                total,
                min_count,
            } => {
                let which = match bit {
                    BitPosition::Lsb => "least",
                    BitPosition::Msb => "most",
                };
                write!(
                    f,
                    "bias in the {} significant bit of k: {} of {} (allowed {}..={})",
                    which,
                    count,
                    total,
                    min_count,
                    total.saturating_sub(*min_count)
                )
            }
            Evidence::FourierBias {
                multiplier,
                score,
                threshold,
            } => write!(
                f,
                "bias for k detected with multiplier {}: score {:.3} > {}",
                multiplier, score, threshold
            ),
            Evidence::TimingBias {
                max_z,
                threshold,
                partition,
            } => write!(
                f,
                "signatures with short timing have a biased k: {:.2} sigmas >= {} \
                 ({} samples at or below {} ns, relative average {:.4})",
                max_z,
                threshold,
                partition.count,
                partition.cutoff_ns,
                partition.relative_average * 2.0
            ),
            Evidence::RepeatedNonce { r, indices } => write!(
                f,
                "same r computed for different messages at samples {:?} (r = {})",
                indices, r
            ),
            Evidence::RepeatedSignature { indices } => {
                write!(f, "same signature computed at samples {:?}", indices)
            }
        }
    }
}
