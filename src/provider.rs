//! Input providers for loading pre-collected signing samples from files

use crate::signature::{RawSample, SampleInput};
use anyhow::{bail, Context, Result};
use std::io::{self, Read};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Format {
    Json,
    Csv,
}

pub fn load_samples(input: &str) -> Result<Vec<RawSample>> {
    let content = if input == "-" {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(input).with_context(|| format!("Failed to read {}", input))?
    };

    parse_samples(&content)
}

pub fn parse_samples(content: &str) -> Result<Vec<RawSample>> {
    let content = content.strip_prefix(BOM).unwrap_or(content);
    let format = detect_format(content)?;
    let inputs = match format {
        Format::Json => parse_json(content)?,
        Format::Csv => parse_csv(content)?,
    };
    tracing::debug!(?format, records = inputs.len(), "input parsed");

    inputs
        .into_iter()
        .enumerate()
        .map(|(i, input)| RawSample::try_from(input).with_context(|| format!("Record {}", i)))
        .collect()
}

const BOM: &str = "\u{FEFF}";

pub fn detect_format(content: &str) -> Result<Format> {
    let trimmed = content.strip_prefix(BOM).unwrap_or(content).trim_start();

    if trimmed.starts_with('[') {
        return Ok(Format::Json);
    }

    if let Some(first_line) = trimmed.lines().next() {
        let columns: Vec<String> = first_line
            .split(',')
            .map(|c| c.trim().to_lowercase())
            .collect();
        let has_signature = columns.iter().any(|c| c == "signature");
        let has_digest = columns.iter().any(|c| c == "digest");
        if has_signature && has_digest {
            return Ok(Format::Csv);
        }
    }

    bail!("Unable to detect input format. Use JSON array or CSV with signature,digest header.")
}

fn parse_json(content: &str) -> Result<Vec<SampleInput>> {
    Ok(serde_json::from_str(content)?)
}

fn parse_csv(content: &str) -> Result<Vec<SampleInput>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());
    let mut inputs = Vec::new();
    for result in reader.deserialize() {
        inputs.push(result?);
    }
    Ok(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIG: &str = "3006020101020102";

    #[test]
    fn test_parse_json_samples() {
        let json = format!(
            r#"[{{"signature": "{}", "digest": "ab", "elapsed_ns": 1200}}]"#,
            SIG
        );
        let samples = parse_samples(&json).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].digest, vec![0xab]);
        assert_eq!(samples[0].elapsed_ns, Some(1200));
    }

    #[test]
    fn test_parse_csv_samples() {
        let csv = format!(
            "signature,digest,message,elapsed_ns\n{},ab,,\n{},cd,00ff,17",
            SIG, SIG
        );
        let samples = parse_samples(&csv).unwrap();
        assert_eq!(samples.len(), 2);
        assert!(samples[0].message.is_empty());
        assert_eq!(samples[0].elapsed_ns, None);
        assert_eq!(samples[1].message, vec![0x00, 0xff]);
        assert_eq!(samples[1].elapsed_ns, Some(17));
    }

    #[test]
    fn test_bom_is_tolerated() {
        let json = format!("\u{FEFF}[{{\"signature\": \"{}\", \"digest\": \"00\"}}]", SIG);
        assert_eq!(parse_samples(&json).unwrap().len(), 1);
    }

    #[test]
    fn test_auto_detect_json() {
        let json = r#"  [{"signature": "30", "digest": "00"}]"#;
        assert_eq!(detect_format(json).unwrap(), Format::Json);
    }

    #[test]
    fn test_auto_detect_csv() {
        let csv = "Signature, Digest\n3006020101020102,00";
        assert_eq!(detect_format(csv).unwrap(), Format::Csv);
    }

    #[test]
    fn test_unknown_format_error() {
        let err = detect_format("r,s,z\n1,2,3").unwrap_err();
        assert!(err.to_string().contains("signature,digest"));
    }

    #[test]
    fn test_bad_record_names_its_index() {
        let json = format!(
            r#"[{{"signature": "{}", "digest": "00"}}, {{"signature": "xyz", "digest": "00"}}]"#,
            SIG
        );
        let err = parse_samples(&json).unwrap_err();
        assert_eq!(err.to_string(), "Record 1");
    }

    #[test]
    fn test_invalid_json_error() {
        assert!(parse_samples("[not json").is_err());
    }
}
