//! Correlation between signing time and nonce size
//!
//! A point multiplication whose running time depends on `k` (double and add,
//! comb tables containing the point at infinity, ...) makes the fastest
//! signatures use smaller nonces. The samples are partitioned at a series of
//! elapsed time cutoffs, each keeping the fastest half of the previous
//! partition, and the mean nonce of each partition is compared against `n/2`.
//!
//! The mean of `c` uniform values in `[0, n)` has standard deviation
//! `n / sqrt(12 c)`, so the z-score is `|mean - n/2| * sqrt(12 c) / n`.

use super::*;
use crate::clock::check_timings;
use crate::config::AnalysisConfig;
use num_traits::ToPrimitive;

/// Fixed point bits used for `mean / n`.
const RATIO_BITS: u32 = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct TimingPartition {
    pub cutoff_ns: u64,
    pub count: usize,
    pub average_nonce: BigUint,
    /// `average_nonce / n`; 0.5 for a uniform distribution.
    pub relative_average: f64,
    pub z_score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimingAnalysis {
    pub partitions: Vec<TimingPartition>,
    pub max_z: f64,
}

impl TimingAnalysis {
    pub fn worst(&self) -> Option<&TimingPartition> {
        self.partitions
            .iter()
            .max_by(|a, b| a.z_score.total_cmp(&b.z_score))
    }
}

/// Mean nonce and z-score of the samples timed at or below `cutoff_ns`.
fn partition(observations: &[(u64, BigUint)], order: &BigUint, cutoff_ns: u64) -> TimingPartition {
    let mut count = 0usize;
    let mut total = BigUint::from(0u32);
    for (t, k) in observations {
        if *t <= cutoff_ns {
            total += k;
            count += 1;
        }
    }

    // total < count * n, so the ratio fits in RATIO_BITS bits.
    let denominator = order * count;
    let fixed = ((&total << RATIO_BITS) / &denominator)
        .to_f64()
        .unwrap_or(0.0);
    let relative_average = fixed / 2f64.powi(RATIO_BITS as i32);
    let z_score = (relative_average - 0.5).abs() * ((12 * count) as f64).sqrt();

    TimingPartition {
        cutoff_ns,
        count,
        average_nonce: total / count,
        relative_average,
        z_score,
    }
}

/// Runs the cutoff schedule over `(elapsed_ns, nonce)` observations.
///
/// Starting at the slowest sample, each step divides the index of the
/// cutoff by `divisor` until it reaches `min_partition`.
pub fn correlate(
    observations: &[(u64, BigUint)],
    order: &BigUint,
    min_partition: usize,
    divisor: usize,
) -> TimingAnalysis {
    let mut sorted: Vec<u64> = observations.iter().map(|(t, _)| *t).collect();
    sorted.sort_unstable();

    let mut partitions = Vec::new();
    let mut max_z = 0.0f64;
    let mut idx = sorted.len().saturating_sub(1);
    while idx > min_partition {
        let p = partition(observations, order, sorted[idx]);
        tracing::debug!(
            count = p.count,
            cutoff = p.cutoff_ns,
            relative_average = p.relative_average * 2.0,
            sigmas = p.z_score,
            "timing partition"
        );
        max_z = max_z.max(p.z_score);
        partitions.push(p);
        idx /= divisor.max(2);
    }

    TimingAnalysis { partitions, max_z }
}

pub struct TimingCorrelator {
    threshold: f64,
    min_partition: usize,
    divisor: usize,
    min_distinct_timings: usize,
}

impl TimingCorrelator {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            threshold: config.timing_threshold,
            min_partition: config.timing_min_partition,
            divisor: config.timing_divisor,
            min_distinct_timings: config.min_distinct_timings,
        }
    }
}

impl Detector for TimingCorrelator {
    fn name(&self) -> &'static str {
        "timing-correlation"
    }

    fn min_samples(&self) -> usize {
        self.min_partition + 2
    }

    fn detect(&self, samples: &SampleSet) -> Result<Outcome, SkipReason> {
        require_samples(self, samples)?;

        let timings = check_timings(&samples.timings(), self.min_distinct_timings)?;
        let observations: Vec<(u64, BigUint)> = timings.into_iter().zip(samples.nonces()).collect();
        let analysis = correlate(
            &observations,
            &samples.curve.order,
            self.min_partition,
            self.divisor,
        );

        let findings = match analysis.worst() {
            Some(worst) if analysis.max_z >= self.threshold => vec![Finding {
                detector: self.name(),
                evidence: Evidence::TimingBias {
                    max_z: analysis.max_z,
                    threshold: self.threshold,
                    partition: worst.clone(),
                },
            }],
            _ => Vec::new(),
        };

        Ok(Outcome {
            statistics: Statistics::Timing(analysis),
            findings,
        })
    }
}
