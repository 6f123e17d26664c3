use std::{
    fmt::Write,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::payload::ScanType;
use crate::scanner::{ScanResult, ScanSummary};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const REPORT_PREVIEW_CHARS: usize = 100;

/// Format styles supported by [`render_report`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
}

/// Produce a report string for a finished scan.
pub fn render_report(
    results: &[ScanResult],
    scan_type: ScanType,
    format: OutputFormat,
) -> Result<String> {
    let generated = timestamp();
    match format {
        OutputFormat::Human => render_human(results, &generated),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&ResultsFile::new(
            results, scan_type, generated,
        ))?),
    }
}

fn render_human(results: &[ScanResult], generated: &str) -> Result<String> {
    let summary = ScanSummary::from_results(results);
    let mut out = String::new();
    writeln!(out, "RFI/LFI Scan Report")?;
    writeln!(out, "===================")?;
    writeln!(out, "Generated: {generated}")?;
    writeln!(out)?;
    writeln!(out, "Summary:")?;
    writeln!(out, "- Total URLs scanned: {}", summary.total)?;
    writeln!(out, "- Vulnerable URLs found: {}", summary.vulnerable)?;
    writeln!(out, "- Failed requests: {}", summary.errors)?;
    writeln!(out, "- Success rate: {:.2}%", summary.success_rate)?;
    writeln!(out)?;

    let vulnerable: Vec<_> = results.iter().filter(|r| r.vulnerable).collect();
    if vulnerable.is_empty() {
        writeln!(out, "No vulnerable targets found.")?;
        return Ok(out);
    }

    writeln!(out, "Vulnerable Targets:")?;
    for (idx, result) in vulnerable.iter().enumerate() {
        writeln!(out)?;
        writeln!(out, "{}. URL: {}", idx + 1, result.url)?;
        writeln!(out, "   Payload: {}", result.payload_used)?;
        writeln!(out, "   Response Code: {}", result.response_code)?;
        writeln!(out, "   Response Size: {} bytes", result.response_size)?;
        writeln!(out, "   Scan Time: {:.2}s", result.scan_time)?;
        if !result.matched_indicators.is_empty() {
            writeln!(out, "   Indicators: {}", result.matched_indicators.join(", "))?;
        }
        writeln!(
            out,
            "   Response Preview: {}...",
            sanitize_preview(&result.response_preview)
        )?;
    }
    Ok(out)
}

fn sanitize_preview(input: &str) -> String {
    input
        .chars()
        .take(REPORT_PREVIEW_CHARS)
        .map(|c| match c {
            '\n' | '\r' => ' ',
            _ => c,
        })
        .collect()
}

fn timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// On-disk layout of the results file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsFile {
    pub scan_summary: ResultsSummary,
    pub vulnerable_targets: Vec<VulnerableTarget>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsSummary {
    pub total_scanned: usize,
    pub vulnerable_found: usize,
    pub scan_type: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VulnerableTarget {
    pub url: String,
    pub payload: String,
    pub response_code: u16,
    pub response_preview: String,
    pub scan_time: f64,
}

impl ResultsFile {
    pub fn new(results: &[ScanResult], scan_type: ScanType, timestamp: String) -> Self {
        let vulnerable_targets: Vec<_> = results
            .iter()
            .filter(|r| r.vulnerable)
            .map(|r| VulnerableTarget {
                url: r.url.clone(),
                payload: r.payload_used.clone(),
                response_code: r.response_code,
                response_preview: r.response_preview.clone(),
                scan_time: r.scan_time,
            })
            .collect();
        Self {
            scan_summary: ResultsSummary {
                total_scanned: results.len(),
                vulnerable_found: vulnerable_targets.len(),
                scan_type: scan_type.as_str().to_ascii_uppercase(),
                timestamp,
            },
            vulnerable_targets,
        }
    }
}

/// Write the JSON results file.
pub fn save_results(path: &Path, results: &[ScanResult], scan_type: ScanType) -> Result<()> {
    let file = ResultsFile::new(results, scan_type, timestamp());
    let json = serde_json::to_string_pretty(&file)?;
    fs::write(path, json)
        .with_context(|| format!("failed to write results to {}", path.display()))?;
    info!(path = %path.display(), "results saved");
    Ok(())
}

/// `scan_results.json` -> `scan_results_ai_analysis.txt`, next to the results file.
pub fn ai_analysis_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "scan_results".to_string());
    output.with_file_name(format!("{stem}_ai_analysis.txt"))
}

/// Write the AI analysis next to the results file.
pub fn save_ai_analysis(path: &Path, model: &str, analysis: &str) -> Result<()> {
    let mut out = String::new();
    writeln!(out, "AI Analysis Report")?;
    writeln!(out, "Generated at: {}", timestamp())?;
    writeln!(out, "Model used: {model}")?;
    writeln!(out, "{}", "=".repeat(60))?;
    writeln!(out)?;
    out.push_str(analysis);
    fs::write(path, out)
        .with_context(|| format!("failed to write AI analysis to {}", path.display()))?;
    info!(path = %path.display(), "AI analysis saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(url: &str, vulnerable: bool, preview: &str) -> ScanResult {
        ScanResult {
            url: url.into(),
            vulnerable,
            response_code: 200,
            response_size: preview.len(),
            payload_used: "/../../etc/passwd".into(),
            response_preview: preview.into(),
            scan_time: 1.234,
            matched_indicators: if vulnerable {
                vec!["root:x:".into()]
            } else {
                Vec::new()
            },
        }
    }

    fn sample() -> Vec<ScanResult> {
        vec![
            result("http://a.test/?f=/../../etc/passwd", true, "root:x:0:0:root\n/bin/bash"),
            result("http://b.test/?f=/../../etc/passwd", false, "<html></html>"),
        ]
    }

    #[test]
    fn human_report_lists_vulnerable_targets_only() {
        let output = render_human(&sample(), "2026-01-01 00:00:00").unwrap();
        assert!(output.contains("Generated: 2026-01-01 00:00:00"));
        assert!(output.contains("- Total URLs scanned: 2"));
        assert!(output.contains("- Vulnerable URLs found: 1"));
        assert!(output.contains("- Success rate: 50.00%"));
        assert!(output.contains("1. URL: http://a.test/?f=/../../etc/passwd"));
        assert!(output.contains("   Scan Time: 1.23s"));
        assert!(output.contains("   Indicators: root:x:"));
        assert!(output.contains("Response Preview: root:x:0:0:root /bin/bash..."));
        assert!(!output.contains("http://b.test"));
    }

    #[test]
    fn human_report_without_findings() {
        let output = render_human(&[], "now").unwrap();
        assert!(output.contains("- Success rate: 0.00%"));
        assert!(output.contains("No vulnerable targets found."));
    }

    #[test]
    fn json_report_serializes_results_file() {
        let output = render_report(&sample(), ScanType::Lfi, OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["scan_summary"]["total_scanned"], 2);
        assert_eq!(value["scan_summary"]["vulnerable_found"], 1);
        assert_eq!(value["scan_summary"]["scan_type"], "LFI");
        assert_eq!(value["vulnerable_targets"][0]["payload"], "/../../etc/passwd");
        assert_eq!(value["vulnerable_targets"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn save_results_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        save_results(&path, &sample(), ScanType::Rfi).unwrap();
        let file: ResultsFile =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(file.scan_summary.scan_type, "RFI");
        assert_eq!(file.vulnerable_targets.len(), 1);
        assert_eq!(file.vulnerable_targets[0].url, "http://a.test/?f=/../../etc/passwd");
    }

    #[test]
    fn ai_analysis_path_sits_next_to_output() {
        assert_eq!(
            ai_analysis_path(Path::new("reports/scan_results.json")),
            PathBuf::from("reports/scan_results_ai_analysis.txt")
        );
        assert_eq!(
            ai_analysis_path(Path::new("results")),
            PathBuf::from("results_ai_analysis.txt")
        );
    }

    #[test]
    fn ai_analysis_file_has_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        save_ai_analysis(&path, "llama2", "Looks bad.").unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("AI Analysis Report\n"));
        assert!(text.contains("Model used: llama2"));
        assert!(text.ends_with("Looks bad."));
    }
}
