//! Fourier-domain uniformity test
//!
//! For samples `k_i` and a multiplier `m` the statistic is
//!
//! ```text
//! | sum_i exp(2 pi i * (k_i * m mod n) / n) | / sqrt(N)
//! ```
//!
//! If the `k_i` are uniform in `[0, n)` and N is much larger than `L^2`, the
//! sum approximates a standard complex normal variable `Z`, so
//! `P(score > L)` is about `exp(-L^2)`. A threshold of 5 over seven
//! multipliers keeps false positives below 2^-32.
//!
//! Unlike LSB/MSB counting this also catches signers that replace `s` by
//! `min(s, n - s)`, which moves `k` to `n - k` without changing its low bits
//! in any predictable way (Breitner & Heninger, "Biased Nonce Sense").

use super::*;
use crate::config::Multiplier;
use num_traits::ToPrimitive;
use std::f64::consts::TAU;

/// Bits of fixed point precision for the angle `r / n`.
const ANGLE_BITS: u32 = 52;

#[derive(Debug, Clone)]
pub struct BiasResult {
    pub multiplier: Multiplier,
    pub score: f64,
}

/// Magnitude of the empirical characteristic function of `samples * m mod n`
/// at frequency 1, normalised by `sqrt(N)`.
pub fn bias(samples: &[BigUint], modulus: &BigUint, m: &BigUint) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }

    // 2 pi / 2^52
    let scale = TAU / (1u64 << ANGLE_BITS) as f64;
    let mut sum_real = 0.0f64;
    let mut sum_imag = 0.0f64;
    for s in samples {
        let r = (s * m) % modulus;
        // floor(r * 2^52 / n) < 2^52, so it is exact as a u64.
        let fixed = ((r << ANGLE_BITS) / modulus).to_u64().unwrap_or(0);
        let angle = fixed as f64 * scale;
        sum_real += angle.cos();
        sum_imag += angle.sin();
    }
    ((sum_real * sum_real + sum_imag * sum_imag) / samples.len() as f64).sqrt()
}

pub struct FourierBiasDetector {
    multipliers: Vec<Multiplier>,
    threshold: f64,
}

impl FourierBiasDetector {
    pub fn new(multipliers: Vec<Multiplier>, threshold: f64) -> Self {
        Self {
            multipliers,
            threshold,
        }
    }

    pub fn scores(&self, nonces: &[BigUint], order: &BigUint) -> Vec<BiasResult> {
        self.multipliers
            .iter()
            .map(|multiplier| {
                let score = bias(nonces, order, &multiplier.value(order));
                tracing::debug!(%multiplier, score, "fourier bias");
                BiasResult {
                    multiplier: *multiplier,
                    score,
                }
            })
            .collect()
    }
}

impl Detector for FourierBiasDetector {
    fn name(&self) -> &'static str {
        "fourier-bias"
    }

    /// Below `L^2` samples the score cannot exceed `L` at all.
    fn min_samples(&self) -> usize {
        let l = self.threshold.ceil() as usize;
        (l * l).max(1)
    }

    fn detect(&self, samples: &SampleSet) -> Result<Outcome, SkipReason> {
        require_samples(self, samples)?;

        let results = self.scores(&samples.nonces(), &samples.curve.order);
        let findings = results
            .iter()
            .filter(|r| r.score > self.threshold)
            .map(|r| Finding {
                detector: self.name(),
                evidence: Evidence::FourierBias {
                    multiplier: r.multiplier,
                    score: r.score,
                    threshold: self.threshold,
                },
            })
            .collect();

        Ok(Outcome {
            statistics: Statistics::Fourier(results),
            findings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MULTIPLIERS;
    use crate::signature::{CurveParameters, NamedCurve, Sample};
    use num_bigint::RandBigInt;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn order() -> BigUint {
        CurveParameters::named(NamedCurve::Secp256r1).order
    }

    fn sample_set(nonces: Vec<BigUint>) -> SampleSet {
        let samples = nonces
            .into_iter()
            .enumerate()
            .map(|(index, nonce)| Sample {
                index,
                message: Vec::new(),
                signature: Vec::new(),
                r: BigUint::from(index),
                challenge: BigUint::from(0u32),
                nonce,
                elapsed_ns: None,
            })
            .collect();
        SampleSet {
            curve: CurveParameters::named(NamedCurve::Secp256r1),
            samples,
        }
    }

    #[test]
    fn test_bias_of_empty_input_is_zero() {
        assert_eq!(bias(&[], &order(), &BigUint::from(1u32)), 0.0);
    }

    #[test]
    fn test_constant_samples_score_sqrt_n() {
        let samples = vec![BigUint::from(0u32); 100];
        let score = bias(&samples, &order(), &BigUint::from(1u32));
        assert!((score - 10.0).abs() < 1e-9, "score = {}", score);
    }

    #[test]
    fn test_evenly_spaced_samples_cancel() {
        let n = BigUint::from(1_000_000u32);
        let samples: Vec<BigUint> = (0..1000u32).map(|i| BigUint::from(i * 1000)).collect();
        let score = bias(&samples, &n, &BigUint::from(1u32));
        assert!(score < 1e-9, "score = {}", score);
    }

    #[test]
    fn test_angle_precision_for_1024_bit_order() {
        // n does not fit in an f64, so the angle has to come from integers.
        let n = (BigUint::from(1u32) << 1024u32) - 1u32;
        let quarter = &n >> 2u32;
        let samples: Vec<BigUint> = (0..50)
            .flat_map(|_| {
                [
                    BigUint::from(0u32),
                    quarter.clone(),
                    &quarter * 2u32,
                    &quarter * 3u32,
                ]
            })
            .collect();
        let score = bias(&samples, &n, &BigUint::from(1u32));
        assert!(score < 1e-6, "score = {}", score);
    }

    #[test]
    fn test_uniform_samples_stay_below_threshold() {
        let n = order();
        let mut rng = StdRng::seed_from_u64(7);
        let samples: Vec<BigUint> = (0..100_000)
            .map(|_| rng.gen_biguint_below(&n))
            .collect();
        let score = bias(&samples, &n, &BigUint::from(1u32));
        assert!(score < 5.0, "score = {}", score);
    }

    #[test]
    fn test_small_samples_score_far_above_threshold() {
        let n = order();
        let bound = &n / 1000u32;
        let mut rng = StdRng::seed_from_u64(11);
        let samples: Vec<BigUint> = (0..10_000)
            .map(|_| rng.gen_biguint_below(&bound))
            .collect();
        let score = bias(&samples, &n, &BigUint::from(1u32));
        assert!(score > 90.0, "score = {}", score);
    }

    #[test]
    fn test_folded_nonces_are_caught_by_unit_multiplier() {
        // k replaced by min(k, n - k): every nonce lands below n / 2.
        let n = order();
        let half = &n >> 1u32;
        let mut rng = StdRng::seed_from_u64(3);
        let samples: Vec<BigUint> = (0..2048)
            .map(|_| {
                let k = rng.gen_biguint_below(&n);
                if k > half {
                    &n - k
                } else {
                    k
                }
            })
            .collect();
        let score = bias(&samples, &n, &Multiplier::One.value(&n));
        assert!(score > 5.0, "score = {}", score);
    }

    #[test]
    fn test_half_order_multiplier_catches_doubled_nonces() {
        // k = 2j with j small; floor(n / 2) is -1/2 mod n, so k maps to -j.
        let n = order();
        let bound = &n / 1000u32;
        let multiplier = Multiplier::HalfOrder.value(&n);
        let mut rng = StdRng::seed_from_u64(13);
        let samples: Vec<BigUint> = (0..2048)
            .map(|_| rng.gen_biguint_below(&bound) * 2u32)
            .collect();

        let j = &samples[0] >> 1u32;
        assert_eq!((&samples[0] * &multiplier + &j) % &n, BigUint::from(0u32));

        let score = bias(&samples, &n, &multiplier);
        assert!(score > 40.0, "score = {}", score);
    }

    #[test]
    fn test_mask_multiplier_catches_repeated_words() {
        // k is one random 64-bit word repeated four times. Multiplying by
        // 2^64 - 1 collapses it to w * (2^256 - 1), which is small modulo the
        // secp256k1 order because that order sits just below 2^256.
        let n = CurveParameters::named(NamedCurve::Secp256k1).order;
        let repeat = ((BigUint::from(1u32) << 256u32) - 1u32) / u64::MAX;
        let mut rng = StdRng::seed_from_u64(5);
        let samples: Vec<BigUint> = (0..2048)
            .map(|_| rng.gen_biguint(64) * &repeat)
            .filter(|k| k < &n)
            .collect();
        let plain = bias(&samples, &n, &BigUint::from(1u32));
        let masked = bias(&samples, &n, &Multiplier::Mask(64).value(&n));
        assert!(plain < 5.0, "score = {}", plain);
        assert!(masked > 40.0, "score = {}", masked);
    }

    #[test]
    fn test_detector_reports_every_multiplier() {
        let n = order();
        let mut rng = StdRng::seed_from_u64(19);
        let set = sample_set((0..1024).map(|_| rng.gen_biguint_below(&n)).collect());
        let detector = FourierBiasDetector::new(DEFAULT_MULTIPLIERS.to_vec(), 5.0);
        let outcome = detector.detect(&set).unwrap();
        match outcome.statistics {
            Statistics::Fourier(results) => assert_eq!(results.len(), 7),
            other => panic!("unexpected statistics {:?}", other),
        }
        assert!(outcome.findings.is_empty());
    }

    #[test]
    fn test_detector_flags_small_nonces() {
        let set = sample_set((1..=1024u32).map(BigUint::from).collect());
        let detector = FourierBiasDetector::new(vec![Multiplier::One], 5.0);
        let outcome = detector.detect(&set).unwrap();
        assert_eq!(outcome.findings.len(), 1);
        assert!(outcome.findings[0].evidence.to_string().contains("multiplier 1"));
    }

    #[test]
    fn test_detector_needs_enough_samples() {
        let set = sample_set(vec![BigUint::from(1u32); 10]);
        let detector = FourierBiasDetector::new(vec![Multiplier::One], 5.0);
        assert_eq!(
            detector.detect(&set).unwrap_err(),
            SkipReason::TooFewSamples {
                needed: 25,
                have: 10
            }
        );
    }
}
