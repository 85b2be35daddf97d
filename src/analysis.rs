//! Nonce recovery over a batch of samples and the detector pipeline

use crate::config::AnalysisConfig;
use crate::der::decode_signature;
use crate::detect::{
    BitDistributionDetector, Detector, Finding, FourierBiasDetector, Outcome,
    RepeatedNonceDetector, RepeatedSignatureDetector, SkipReason, TimingCorrelator,
};
use crate::error::Error;
use crate::math::{challenge_from_digest, recover_nonce, DigestTruncation};
use crate::signature::{CurveParameters, RawSample, Sample, SampleSet};
use num_bigint::BigUint;

/// Decodes every signature and recovers its nonce with the private scalar `x`.
///
/// Fails on the first sample that cannot be decoded or whose `s` has no
/// inverse; the error carries that sample's index.
pub fn recover_samples(
    curve: &CurveParameters,
    x: &BigUint,
    raw: &[RawSample],
    truncation: DigestTruncation,
) -> Result<SampleSet, Error> {
    let mut samples = Vec::with_capacity(raw.len());
    for (index, item) in raw.iter().enumerate() {
        let signature =
            decode_signature(&item.signature).map_err(|source| Error::Decode { index, source })?;
        let challenge = challenge_from_digest(&item.digest, truncation, curve.bits);
        let nonce = recover_nonce(&signature.r, &signature.s, &challenge, x, &curve.order)
            .map_err(|source| Error::Arithmetic { index, source })?;
        samples.push(Sample {
            index,
            message: item.message.clone(),
            signature: item.signature.clone(),
            r: signature.r,
            challenge,
            nonce,
            elapsed_ns: item.elapsed_ns,
        });
    }
    tracing::debug!(count = samples.len(), "nonces recovered");

    Ok(SampleSet {
        curve: curve.clone(),
        samples,
    })
}

/// The standard detector set for `config`.
///
/// The timing correlator is left out when `timing` is false.
pub fn default_detectors(config: &AnalysisConfig, timing: bool) -> Vec<Box<dyn Detector>> {
    let mut detectors: Vec<Box<dyn Detector>> = vec![
        Box::new(FourierBiasDetector::new(
            config.multipliers.clone(),
            config.bias_threshold,
        )),
        Box::new(BitDistributionDetector::new(config.clone())),
        Box::new(RepeatedNonceDetector),
    ];
    if config.expect_randomized {
        detectors.push(Box::new(RepeatedSignatureDetector));
    }
    if timing {
        detectors.push(Box::new(TimingCorrelator::new(config)));
    }
    detectors
}

#[derive(Debug)]
pub struct DetectorReport {
    pub name: &'static str,
    pub result: Result<Outcome, SkipReason>,
}

#[derive(Debug)]
pub struct Report {
    pub curve: CurveParameters,
    pub total_samples: usize,
    pub detectors: Vec<DetectorReport>,
}

impl Report {
    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.detectors
            .iter()
            .filter_map(|d| d.result.as_ref().ok())
            .flat_map(|o| o.findings.iter())
    }

    pub fn is_biased(&self) -> bool {
        self.findings().next().is_some()
    }

    pub fn skipped(&self) -> impl Iterator<Item = (&'static str, &SkipReason)> {
        self.detectors
            .iter()
            .filter_map(|d| d.result.as_ref().err().map(|e| (d.name, e)))
    }

    /// Records a detector that could not run before analysis started.
    pub fn push_skipped(&mut self, name: &'static str, reason: SkipReason) {
        tracing::warn!(detector = name, %reason, "check skipped");
        self.detectors.push(DetectorReport {
            name,
            result: Err(reason),
        });
    }
}

/// Runs each detector over `samples` in order.
///
/// A detector that cannot run is recorded as skipped; the others still run.
pub fn analyze(samples: &SampleSet, detectors: &[Box<dyn Detector>]) -> Report {
    let mut reports = Vec::with_capacity(detectors.len());
    for detector in detectors {
        let result = detector.detect(samples);
        match &result {
            Ok(outcome) => {
                for finding in &outcome.findings {
                    tracing::info!(detector = detector.name(), "{}", finding.evidence);
                }
            }
            Err(reason) => tracing::warn!(detector = detector.name(), %reason, "check skipped"),
        }
        reports.push(DetectorReport {
            name: detector.name(),
            result,
        });
    }

    let report = Report {
        curve: samples.curve.clone(),
        total_samples: samples.len(),
        detectors: reports,
    };
    tracing::info!(
        samples = report.total_samples,
        findings = report.findings().count(),
        "analysis complete"
    );
    report
}
