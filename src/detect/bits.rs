//! Least and most significant bit balance of the nonces
//!
//! For a fair coin thrown 1024 times, fewer than 410 heads (or tails) happens
//! with probability below 2^-32. This is blind to `min(s, n - s)` folding,
//! which is why the Fourier test runs alongside it.

use super::*;
use crate::config::AnalysisConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitCounts {
    pub total: usize,
    /// Nonces with bit 0 set.
    pub lsb_set: usize,
    /// Nonces greater than `floor(n / 2)`.
    pub msb_set: usize,
    pub min_count: usize,
}

impl BitCounts {
    fn within_bounds(&self, count: usize) -> bool {
        count >= self.min_count && count <= self.total.saturating_sub(self.min_count)
    }

    pub fn lsb_biased(&self) -> bool {
        !self.within_bounds(self.lsb_set)
    }

    pub fn msb_biased(&self) -> bool {
        !self.within_bounds(self.msb_set)
    }
}

pub fn count_bits(nonces: &[BigUint], half_order: &BigUint, min_count: usize) -> BitCounts {
    let mut lsb_set = 0;
    let mut msb_set = 0;
    for k in nonces {
        if k.bit(0) {
            lsb_set += 1;
        }
        if k > half_order {
            msb_set += 1;
        }
    }
    BitCounts {
        total: nonces.len(),
        lsb_set,
        msb_set,
        min_count,
    }
}

pub struct BitDistributionDetector {
    config: AnalysisConfig,
}

impl BitDistributionDetector {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }
}

impl Detector for BitDistributionDetector {
    fn name(&self) -> &'static str {
        "bit-distribution"
    }

    fn min_samples(&self) -> usize {
        64
    }

    fn detect(&self, samples: &SampleSet) -> Result<Outcome, SkipReason> {
        require_samples(self, samples)?;

        let min_count = self.config.bit_min_count(samples.len());
        let counts = count_bits(&samples.nonces(), &samples.curve.half_order(), min_count);
        tracing::debug!(
            total = counts.total,
            lsb = counts.lsb_set,
            msb = counts.msb_set,
            min_count,
            "bit counts"
        );

        let mut findings = Vec::new();
        for (bit, count, biased) in [
            (BitPosition::Lsb, counts.lsb_set, counts.lsb_biased()),
            (BitPosition::Msb, counts.msb_set, counts.msb_biased()),
        ] {
            if biased {
                findings.push(Finding {
                    detector: self.name(),
                    evidence: Evidence::BitCount {
                        bit,
                        count,
                        total: counts.total,
                        min_count,
                    },
                });
            }
        }

        Ok(Outcome {
            statistics: Statistics::Bits(counts),
            findings,
        })
    }
}
