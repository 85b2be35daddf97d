//! Integration tests for noncescope CLI

use assert_cmd::Command;
use noncescope::der::encode_signature;
use noncescope::harness::{collect, messages_to_sign, K256Oracle, Scheme};
use noncescope::math::signing_equation;
use noncescope::signature::{CurveParameters, NamedCurve, SampleInput, Signature};
use noncescope::RawSample;
use num_bigint::{BigUint, RandBigInt};
use predicates::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

const PRIVATE_KEY: &str = "c9afa9d845ba75166b5c215767b1d6934e50c3db36e89b127b8a622b120f6721";

fn to_json(samples: &[RawSample]) -> String {
    let inputs: Vec<SampleInput> = samples
        .iter()
        .map(|s| SampleInput {
            signature: hex::encode(&s.signature),
            digest: hex::encode(&s.digest),
            message: Some(hex::encode(&s.message)),
            elapsed_ns: s.elapsed_ns,
        })
        .collect();
    serde_json::to_string(&inputs).unwrap()
}

fn private_key() -> BigUint {
    BigUint::parse_bytes(PRIVATE_KEY.as_bytes(), 16).unwrap()
}

/// Real RFC 6979 signatures from k256.
fn clean_input(count: usize) -> String {
    let secret = hex::decode(PRIVATE_KEY).unwrap();
    let oracle = K256Oracle::from_slice(&secret, Scheme::Deterministic).unwrap();
    to_json(&collect(&oracle, &messages_to_sign(count, true), None).unwrap())
}

/// Signatures whose nonces have their top `256 - bits` bits cleared.
fn short_nonce_input(count: usize, bits: u64) -> String {
    let n = CurveParameters::named(NamedCurve::Secp256k1).order;
    let x = private_key();
    let mut rng = StdRng::seed_from_u64(99);
    let samples: Vec<RawSample> = (0..count)
        .map(|_| {
            let k = rng.gen_biguint(bits);
            let r = rng.gen_biguint_below(&n);
            let digest = rng.gen_biguint(256).to_bytes_be();
            let h = BigUint::from_bytes_be(&digest);
            let s = signing_equation(&k, &h, &x, &r, &n).unwrap();
            RawSample {
                message: Vec::new(),
                signature: encode_signature(&Signature { r, s }),
                digest,
                elapsed_ns: None,
            }
        })
        .collect();
    to_json(&samples)
}

fn analyze_cmd() -> Command {
    let mut cmd = Command::cargo_bin("noncescope").unwrap();
    cmd.arg("analyze")
        .arg("-")
        .arg("--curve")
        .arg("secp256k1")
        .arg("--private-key")
        .arg(PRIVATE_KEY);
    cmd
}

#[test]
fn test_clean_signer_exits_zero() {
    analyze_cmd()
        .write_stdin(clean_input(512))
        .assert()
        .code(0)
        .stdout(predicate::str::contains("Analyzed 512 samples on secp256k1"))
        .stdout(predicate::str::contains("No bias found."))
        .stdout(predicate::str::contains("timing-correlation: skipped"));
}

#[test]
fn test_short_nonces_are_flagged() {
    analyze_cmd()
        .write_stdin(short_nonce_input(512, 240))
        .assert()
        .code(1)
        .stdout(predicate::str::contains("fourier-bias"))
        .stdout(predicate::str::contains("most significant bit"));
}

#[test]
fn test_json_output_schema() {
    let output = analyze_cmd()
        .arg("--json")
        .write_stdin(short_nonce_input(256, 200))
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));

    let json: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("Output should be valid JSON");

    assert_eq!(json["curve"]["name"].as_str(), Some("secp256k1"));
    assert_eq!(json["curve"]["bits"].as_u64(), Some(256));
    assert_eq!(json["curve"]["order_hex"].as_str().unwrap().len(), 64);
    assert!(json["findings"].is_array());
    assert!(json["summary"]["biased"].as_bool().unwrap());
    assert_eq!(json["summary"]["total_samples"].as_u64(), Some(256));

    let checks = json["checks"].as_array().unwrap();
    let fourier = checks
        .iter()
        .find(|c| c["detector"] == "fourier-bias")
        .unwrap();
    assert_eq!(fourier["status"].as_str(), Some("flagged"));
    assert_eq!(fourier["statistics"].as_array().unwrap().len(), 7);
    assert!(fourier["statistics"][0]["score"].is_f64());

    let timing = checks
        .iter()
        .find(|c| c["detector"] == "timing-correlation")
        .unwrap();
    assert_eq!(timing["status"].as_str(), Some("skipped"));
    assert!(timing["reason"].as_str().unwrap().contains("no elapsed time"));
}

#[test]
fn test_skip_timing_removes_check() {
    analyze_cmd()
        .arg("--skip-timing")
        .write_stdin(clean_input(64))
        .assert()
        .code(0)
        .stdout(predicate::str::contains("timing-correlation").not());
}

#[test]
fn test_custom_order() {
    let order = CurveParameters::named(NamedCurve::Secp256k1).order.to_str_radix(16);
    Command::cargo_bin("noncescope")
        .unwrap()
        .arg("analyze")
        .arg("--order")
        .arg(order)
        .arg("--private-key")
        .arg(PRIVATE_KEY)
        .write_stdin(short_nonce_input(128, 128))
        .assert()
        .code(1)
        .stdout(predicate::str::contains("custom curve"));
}

#[test]
fn test_config_file_raises_threshold() {
    let path = std::env::temp_dir().join(format!("noncescope-config-{}.json", std::process::id()));
    std::fs::write(
        &path,
        r#"{"bias_threshold": 1000.0, "bit_min_count": 0, "multipliers": ["one"]}"#,
    )
    .unwrap();

    analyze_cmd()
        .arg("--config")
        .arg(&path)
        .write_stdin(short_nonce_input(128, 240))
        .assert()
        .code(0);

    std::fs::remove_file(&path).ok();
}

#[test]
fn test_missing_config_is_an_error() {
    analyze_cmd()
        .arg("--config")
        .arg("/nonexistent/noncescope.json")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Failed to load config"));
}

#[test]
fn test_invalid_input_error_exit() {
    analyze_cmd()
        .write_stdin("not valid json")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Unable to detect input format"));
}

#[test]
fn test_malformed_signature_names_sample() {
    let input = r#"[{"signature": "3006020101020102", "digest": "01"},
                    {"signature": "3106020101020102", "digest": "02"}]"#;
    analyze_cmd()
        .write_stdin(input)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("sample 1"));
}

#[test]
fn test_private_key_out_of_range() {
    Command::cargo_bin("noncescope")
        .unwrap()
        .arg("analyze")
        .arg("--curve")
        .arg("p-256")
        .arg("--private-key")
        .arg("0")
        .write_stdin("[]")
        .assert()
        .code(2);
}

#[test]
fn test_probe_deterministic_signer() {
    Command::cargo_bin("noncescope")
        .unwrap()
        .arg("probe")
        .arg("--samples")
        .arg("256")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("Signer: deterministic"))
        .stdout(predicate::str::contains("No bias found."));
}

#[test]
fn test_probe_randomized_signer_json() {
    let output = Command::cargo_bin("noncescope")
        .unwrap()
        .arg("--json")
        .arg("probe")
        .arg("--samples")
        .arg("128")
        .arg("--scheme")
        .arg("randomized")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["deterministic"].as_bool(), Some(false));
    let detectors: Vec<&str> = json["checks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["detector"].as_str().unwrap())
        .collect();
    assert!(detectors.contains(&"repeated-signature"));
}

#[test]
fn test_probe_with_timing_reports_timing_check() {
    let output = Command::cargo_bin("noncescope")
        .unwrap()
        .arg("--json")
        .arg("probe")
        .arg("--samples")
        .arg("256")
        .arg("--timing")
        .output()
        .unwrap();
    assert_ne!(output.status.code(), Some(2));

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let timing = json["checks"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["detector"] == "timing-correlation")
        .expect("timing check should be reported, run or skipped");
    assert!(timing["status"].is_string());
}

#[test]
fn test_probe_with_wall_clock() {
    let output = Command::cargo_bin("noncescope")
        .unwrap()
        .arg("--json")
        .arg("probe")
        .arg("--samples")
        .arg("128")
        .arg("--timing")
        .arg("--clock")
        .arg("monotonic")
        .output()
        .unwrap();
    assert_ne!(output.status.code(), Some(2));

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let detectors: Vec<&str> = json["checks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["detector"].as_str().unwrap())
        .collect();
    assert!(detectors.contains(&"timing-correlation"));
}
