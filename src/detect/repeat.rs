//! Repeated nonces and repeated signatures

use super::*;
use crate::signature::group_by_r;
use std::collections::{HashMap, HashSet};

/// Flags an `r` value shared by signatures over different digests.
///
/// Deterministic signers legitimately repeat `r` when the same message is
/// signed twice, so only groups whose challenges differ are reported.
pub struct RepeatedNonceDetector;

impl Detector for RepeatedNonceDetector {
    fn name(&self) -> &'static str {
        "repeated-nonce"
    }

    fn min_samples(&self) -> usize {
        2
    }

    fn detect(&self, samples: &SampleSet) -> Result<Outcome, SkipReason> {
        require_samples(self, samples)?;

        let challenge_of: HashMap<usize, &BigUint> = samples
            .samples
            .iter()
            .map(|s| (s.index, &s.challenge))
            .collect();

        let mut groups = Vec::new();
        let mut findings = Vec::new();
        for group in group_by_r(&samples.samples)
            .into_iter()
            .filter(|g| g.indices.len() >= 2)
        {
            let distinct: HashSet<&BigUint> = group
                .indices
                .iter()
                .filter_map(|i| challenge_of.get(i).copied())
                .collect();
            if distinct.len() < 2 {
                continue;
            }
            tracing::debug!(r = %group.r, count = group.indices.len(), "repeated r");
            groups.push(group.indices.clone());
            findings.push(Finding {
                detector: self.name(),
                evidence: Evidence::RepeatedNonce {
                    r: group.r,
                    indices: group.indices,
                },
            });
        }

        Ok(Outcome {
            statistics: Statistics::Repeats { groups },
            findings,
        })
    }
}

/// Flags byte-identical signatures from a signer that should be randomized.
pub struct RepeatedSignatureDetector;

impl Detector for RepeatedSignatureDetector {
    fn name(&self) -> &'static str {
        "repeated-signature"
    }

    fn min_samples(&self) -> usize {
        2
    }

    fn detect(&self, samples: &SampleSet) -> Result<Outcome, SkipReason> {
        require_samples(self, samples)?;

        let mut position: HashMap<&[u8], usize> = HashMap::new();
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for sample in &samples.samples {
            match position.get(sample.signature.as_slice()) {
                Some(&at) => groups[at].push(sample.index),
                None => {
                    position.insert(sample.signature.as_slice(), groups.len());
                    groups.push(vec![sample.index]);
                }
            }
        }
        groups.retain(|g| g.len() >= 2);

        let findings = groups
            .iter()
            .map(|indices| Finding {
                detector: self.name(),
                evidence: Evidence::RepeatedSignature {
                    indices: indices.clone(),
                },
            })
            .collect();

        Ok(Outcome {
            statistics: Statistics::Repeats { groups },
            findings,
        })
    }
}
