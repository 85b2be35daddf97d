//! ECDSA nonce bias and timing side-channel detection library
//!
//! Given signatures from a signer whose private key is known, this library
//! recovers every ephemeral nonce and runs statistical tests over them:
//! a Fourier-domain uniformity score, least/most significant bit counts,
//! repeated `r` detection and a correlation between signing time and nonce
//! size.

pub mod analysis;
pub mod clock;
pub mod config;
pub mod der;
pub mod detect;
pub mod error;
#[cfg(feature = "harness")]
pub mod harness;
pub mod math;
pub mod provider;
pub mod signature;

pub use analysis::{analyze, default_detectors, recover_samples, Report};
pub use config::AnalysisConfig;
pub use detect::Detector;
pub use error::Error;
pub use signature::{CurveParameters, NamedCurve, RawSample, Signature};
