//! CLI for ECDSA nonce bias and timing side-channel detection

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
#[cfg(feature = "harness")]
use clap::ValueEnum;
use noncescope::analysis::{analyze, default_detectors, recover_samples, Report};
use noncescope::config::AnalysisConfig;
use noncescope::detect::Statistics;
use noncescope::math::{parse_hex_scalar, scalar_to_hex_string};
use noncescope::provider::load_samples;
use noncescope::signature::{parse_private_scalar, CurveParameters, NamedCurve};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "noncescope")]
#[command(about = "ECDSA nonce bias and timing side-channel detection")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true, help = "JSON file overriding detector thresholds")]
    config: Option<PathBuf>,

    #[arg(short, long, global = true, action = ArgAction::Count, help = "Increase log verbosity")]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze pre-collected signatures made with a known private key
    Analyze {
        #[arg(default_value = "-")]
        input: String,

        #[arg(
            long,
            conflicts_with = "order",
            required_unless_present = "order",
            help = "Named curve: secp224r1, secp256r1, secp256k1, secp384r1, secp521r1, brainpoolP256r1"
        )]
        curve: Option<NamedCurve>,

        #[arg(long, help = "Group order in hex, for curves without a name")]
        order: Option<String>,

        #[arg(long, help = "Private scalar in hex")]
        private_key: String,

        #[arg(long, help = "Do not run the timing correlation check")]
        skip_timing: bool,
    },
    /// Sign with a fresh secp256k1 key and analyze the resulting nonces
    #[cfg(feature = "harness")]
    Probe {
        #[arg(long, default_value = "1024")]
        samples: usize,

        #[arg(long, value_enum, default_value = "deterministic")]
        scheme: SchemeArg,

        #[arg(long, help = "Time each signing call and run the timing correlation check")]
        timing: bool,

        #[arg(long, value_enum, default_value = "thread-cpu", help = "Clock used with --timing")]
        clock: ClockArg,
    },
}

#[cfg(feature = "harness")]
#[derive(Clone, Copy, ValueEnum)]
enum SchemeArg {
    Deterministic,
    Randomized,
}

#[cfg(feature = "harness")]
#[derive(Clone, Copy, ValueEnum)]
enum ClockArg {
    /// CPU time of the signing thread
    ThreadCpu,
    /// Wall clock time
    Monotonic,
}

#[cfg(feature = "harness")]
impl From<SchemeArg> for noncescope::harness::Scheme {
    fn from(arg: SchemeArg) -> Self {
        match arg {
            SchemeArg::Deterministic => Self::Deterministic,
            SchemeArg::Randomized => Self::Randomized,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli) {
        Ok(biased) => {
            if biased {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<AnalysisConfig> {
    match path {
        Some(path) => AnalysisConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(AnalysisConfig::default()),
    }
}

fn run(cli: Cli) -> Result<bool> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Analyze {
            input,
            curve,
            order,
            private_key,
            skip_timing,
        } => {
            let curve = match (curve, order) {
                (Some(named), _) => CurveParameters::named(named),
                (None, Some(order)) => CurveParameters::new(parse_hex_scalar(&order)?)?,
                (None, None) => anyhow::bail!("Either --curve or --order is required"),
            };
            let x = parse_private_scalar(&private_key, &curve)?;
            let raw = load_samples(&input)?;
            let samples = recover_samples(&curve, &x, &raw, config.digest_truncation)?;
            let report = analyze(&samples, &default_detectors(&config, !skip_timing));

            println!("{}", format_output(&report, None, cli.json)?);
            Ok(report.is_biased())
        }
        #[cfg(feature = "harness")]
        Command::Probe {
            samples,
            scheme,
            timing,
            clock,
        } => probe(config, samples, scheme.into(), timing.then_some(clock), cli.json),
    }
}

#[cfg(feature = "harness")]
fn probe(
    config: AnalysisConfig,
    count: usize,
    scheme: noncescope::harness::Scheme,
    timing: Option<ClockArg>,
    json: bool,
) -> Result<bool> {
    use noncescope::clock::{
        ensure_resolution, CapabilityUnavailable, Clock, MonotonicClock, ThreadCpuClock,
    };
    use noncescope::detect::{Detector, TimingCorrelator};
    use noncescope::harness::{collect, is_deterministic, messages_to_sign, K256Oracle, SigningOracle};

    let oracle = K256Oracle::random(scheme);
    let deterministic = is_deterministic(&oracle)?;
    tracing::info!(deterministic, count, "probing secp256k1 signer");
    let config = AnalysisConfig {
        expect_randomized: !deterministic,
        ..config
    };

    let timing_clock = |arg: ClockArg| -> Result<Box<dyn Clock>, CapabilityUnavailable> {
        let clock: Box<dyn Clock> = match arg {
            ClockArg::ThreadCpu => Box::new(ThreadCpuClock::new()?),
            ClockArg::Monotonic => Box::new(MonotonicClock::new()),
        };
        ensure_resolution(clock.as_ref(), config.max_clock_resolution_ns)?;
        Ok(clock)
    };
    let (clock, unavailable) = match timing.map(timing_clock) {
        Some(Ok(clock)) => (Some(clock), None),
        Some(Err(reason)) => (None, Some(reason)),
        None => (None, None),
    };
    let timed = clock.is_some();

    let messages = messages_to_sign(count, deterministic);
    let raw = collect(&oracle, &messages, clock.as_deref())?;
    let samples = recover_samples(
        &oracle.curve(),
        &oracle.private_scalar(),
        &raw,
        config.digest_truncation,
    )?;

    let mut report = analyze(&samples, &default_detectors(&config, timed));
    if let Some(reason) = unavailable {
        report.push_skipped(TimingCorrelator::new(&config).name(), reason.into());
    }

    println!("{}", format_output(&report, Some(deterministic), json)?);
    Ok(report.is_biased())
}

#[derive(Serialize)]
struct OutputReport {
    curve: CurveOutput,
    #[serde(skip_serializing_if = "Option::is_none")]
    deterministic: Option<bool>,
    checks: Vec<CheckOutput>,
    findings: Vec<FindingOutput>,
    summary: SummaryOutput,
}

#[derive(Serialize)]
struct CurveOutput {
    name: Option<String>,
    order_hex: String,
    bits: u64,
}

#[derive(Serialize)]
struct CheckOutput {
    detector: String,
    status: String,
    reason: Option<String>,
    statistics: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct FindingOutput {
    detector: String,
    message: String,
}

#[derive(Serialize)]
struct SummaryOutput {
    total_samples: usize,
    findings: usize,
    checks_skipped: usize,
    biased: bool,
}

fn statistics_json(statistics: &Statistics) -> serde_json::Value {
    match statistics {
        Statistics::Bits(counts) => json!({
            "total": counts.total,
            "lsb_set": counts.lsb_set,
            "msb_set": counts.msb_set,
            "min_count": counts.min_count,
        }),
        Statistics::Fourier(results) => json!(results
            .iter()
            .map(|r| json!({ "multiplier": r.multiplier.to_string(), "score": r.score }))
            .collect::<Vec<_>>()),
        Statistics::Timing(analysis) => json!({
            "max_z": analysis.max_z,
            "partitions": analysis
                .partitions
                .iter()
                .map(|p| json!({
                    "cutoff_ns": p.cutoff_ns,
                    "count": p.count,
                    "relative_average": p.relative_average,
                    "z_score": p.z_score,
                }))
                .collect::<Vec<_>>(),
        }),
        Statistics::Repeats { groups } => json!({ "groups": groups }),
    }
}

fn statistics_summary(statistics: &Statistics) -> String {
    match statistics {
        Statistics::Bits(c) => format!(
            "lsb {}/{}, msb {}/{} (min {})",
            c.lsb_set, c.total, c.msb_set, c.total, c.min_count
        ),
        Statistics::Fourier(results) => {
            let max = results.iter().map(|r| r.score).fold(0.0f64, f64::max);
            format!("max score {:.3} over {} multipliers", max, results.len())
        }
        Statistics::Timing(analysis) => format!(
            "max {:.2} sigmas over {} partitions",
            analysis.max_z,
            analysis.partitions.len()
        ),
        Statistics::Repeats { groups } => format!("{} repeated groups", groups.len()),
    }
}

fn format_output(report: &Report, deterministic: Option<bool>, json: bool) -> Result<String> {
    let checks: Vec<CheckOutput> = report
        .detectors
        .iter()
        .map(|d| match &d.result {
            Ok(outcome) => CheckOutput {
                detector: d.name.to_string(),
                status: if outcome.findings.is_empty() {
                    "passed".to_string()
                } else {
                    "flagged".to_string()
                },
                reason: None,
                statistics: Some(statistics_json(&outcome.statistics)),
            },
            Err(reason) => CheckOutput {
                detector: d.name.to_string(),
                status: "skipped".to_string(),
                reason: Some(reason.to_string()),
                statistics: None,
            },
        })
        .collect();

    let findings: Vec<FindingOutput> = report
        .findings()
        .map(|f| FindingOutput {
            detector: f.detector.to_string(),
            message: f.evidence.to_string(),
        })
        .collect();

    let output = OutputReport {
        curve: CurveOutput {
            name: report.curve.name.clone(),
            order_hex: scalar_to_hex_string(&report.curve.order, report.curve.byte_len()),
            bits: report.curve.bits,
        },
        deterministic,
        summary: SummaryOutput {
            total_samples: report.total_samples,
            findings: findings.len(),
            checks_skipped: report.skipped().count(),
            biased: report.is_biased(),
        },
        checks,
        findings,
    };

    if json {
        return Ok(serde_json::to_string_pretty(&output)?);
    }

    let mut text = String::new();
    let curve_name = output.curve.name.as_deref().unwrap_or("custom curve");
    text.push_str(&format!(
        "Analyzed {} samples on {} ({} bits)\n",
        output.summary.total_samples, curve_name, output.curve.bits
    ));
    if let Some(deterministic) = deterministic {
        let kind = if deterministic { "deterministic" } else { "randomized" };
        text.push_str(&format!("Signer: {}\n", kind));
    }

    text.push_str("\nChecks:\n");
    for (check, detector) in output.checks.iter().zip(&report.detectors) {
        match (&detector.result, &check.reason) {
            (Ok(outcome), _) => text.push_str(&format!(
                "  {}: {} ({})\n",
                check.detector,
                check.status,
                statistics_summary(&outcome.statistics)
            )),
            (Err(_), Some(reason)) => {
                text.push_str(&format!("  {}: skipped ({})\n", check.detector, reason))
            }
            (Err(_), None) => text.push_str(&format!("  {}: skipped\n", check.detector)),
        }
    }
    text.push('\n');

    if output.findings.is_empty() {
        text.push_str("No bias found.\n");
    } else {
        text.push_str(&format!("Found {} findings:\n\n", output.findings.len()));
        for (i, finding) in output.findings.iter().enumerate() {
            text.push_str(&format!("Finding #{}\n", i + 1));
            text.push_str(&format!("  Detector: {}\n", finding.detector));
            text.push_str(&format!("  Detail: {}\n", finding.message));
            text.push('\n');
        }
    }

    Ok(text)
}
