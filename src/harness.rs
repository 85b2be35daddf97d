//! Signing oracles and sample collection
//!
//! An oracle wraps a signer whose private key is known to the caller. The
//! collector feeds it messages, optionally timing each call, and records the
//! artifacts needed to recover every nonce afterwards.

use crate::clock::Clock;
use crate::signature::{CurveParameters, NamedCurve, RawSample};
use anyhow::{anyhow, Context, Result};
use k256::ecdsa::signature::{RandomizedSigner, Signer};
use k256::ecdsa::{Signature as K256Signature, SigningKey};
use num_bigint::BigUint;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

/// A signer under test.
pub trait SigningOracle {
    fn curve(&self) -> CurveParameters;

    /// The private scalar `x`; needed to recover nonces.
    fn private_scalar(&self) -> BigUint;

    /// DER encoded signature over `message`.
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;

    /// The digest the signer uses as its challenge for `message`.
    fn digest(&self, message: &[u8]) -> Vec<u8>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// RFC 6979 nonces.
    Deterministic,
    /// RFC 6979 with fresh randomness mixed in.
    Randomized,
}

/// ECDSA over secp256k1 with SHA-256.
pub struct K256Oracle {
    key: SigningKey,
    scheme: Scheme,
}

impl K256Oracle {
    pub fn random(scheme: Scheme) -> Self {
        Self {
            key: SigningKey::random(&mut OsRng),
            scheme,
        }
    }

    pub fn from_slice(secret: &[u8], scheme: Scheme) -> Result<Self> {
        let key = SigningKey::from_slice(secret)
            .map_err(|e| anyhow!("Invalid secp256k1 private key: {}", e))?;
        Ok(Self { key, scheme })
    }
}

impl SigningOracle for K256Oracle {
    fn curve(&self) -> CurveParameters {
        CurveParameters::named(NamedCurve::Secp256k1)
    }

    fn private_scalar(&self) -> BigUint {
        BigUint::from_bytes_be(&self.key.to_bytes())
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let signed: Result<K256Signature, _> = match self.scheme {
            Scheme::Deterministic => self.key.try_sign(message),
            Scheme::Randomized => self.key.try_sign_with_rng(&mut OsRng, message),
        };
        let signature = signed.map_err(|e| anyhow!("secp256k1 signing failed: {}", e))?;
        Ok(signature.to_der().as_bytes().to_vec())
    }

    fn digest(&self, message: &[u8]) -> Vec<u8> {
        Sha256::digest(message).to_vec()
    }
}

/// Signs the same one-byte message twice and compares the signatures.
pub fn is_deterministic(oracle: &dyn SigningOracle) -> Result<bool> {
    let message = [0u8; 1];
    let first = oracle.sign(&message)?;
    let second = oracle.sign(&message)?;
    Ok(first == second)
}

/// Messages for a collection run of `count` signatures.
///
/// A deterministic signer gets distinct 4-byte big-endian counters, since
/// repeating a message would repeat the nonce. A randomized signer gets the
/// same all-zero message every time, which makes a bias easier to see.
pub fn messages_to_sign(count: usize, deterministic: bool) -> Vec<Vec<u8>> {
    if deterministic {
        (0..count).map(|i| (i as u32).to_be_bytes().to_vec()).collect()
    } else {
        vec![vec![0u8; 4]; count]
    }
}

/// Signs each message in order.
///
/// With a clock, each call is timed individually and the elapsed time
/// recorded alongside the signature.
pub fn collect(
    oracle: &dyn SigningOracle,
    messages: &[Vec<u8>],
    clock: Option<&dyn Clock>,
) -> Result<Vec<RawSample>> {
    let mut samples = Vec::with_capacity(messages.len());
    for (i, message) in messages.iter().enumerate() {
        let (signature, elapsed_ns) = match clock {
            Some(clock) => {
                let start = clock.now_ns();
                let signature = oracle.sign(message);
                let end = clock.now_ns();
                (signature, Some(end.saturating_sub(start)))
            }
            None => (oracle.sign(message), None),
        };
        let signature = signature.with_context(|| format!("signing message {} failed", i))?;
        samples.push(RawSample {
            message: message.clone(),
            signature,
            digest: oracle.digest(message),
            elapsed_ns,
        });
    }
    tracing::debug!(count = samples.len(), timed = clock.is_some(), "samples collected");
    Ok(samples)
}
