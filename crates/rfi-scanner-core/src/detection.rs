use aho_corasick::AhoCorasick;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Substrings whose presence in a response is treated as evidence of inclusion.
pub const DEFAULT_INDICATORS: &[&str] = &[
    "root:x:",
    "SafeModeOFF",
    "SafeOFF",
    "<?php",
    "eval(",
    "system(",
    "shell_exec",
    "passthru",
    "exec(",
];

pub const DEFAULT_SIZE_THRESHOLD: usize = 1000;
pub const DEFAULT_SIZE_STATUS: u16 = 200;

/// Tunable inputs for response classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Case-insensitive substrings; any match marks the response vulnerable.
    pub indicators: Vec<String>,
    /// Body length (in characters) that must be exceeded for the size heuristic.
    pub size_threshold: usize,
    /// Status code the size heuristic applies to.
    pub size_status: u16,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            indicators: DEFAULT_INDICATORS.iter().map(|s| s.to_string()).collect(),
            size_threshold: DEFAULT_SIZE_THRESHOLD,
            size_status: DEFAULT_SIZE_STATUS,
        }
    }
}

/// Outcome of classifying a single response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub vulnerable: bool,
    pub matched_indicators: Vec<String>,
    pub size_heuristic: bool,
}

/// Compiled indicator matcher plus the size heuristic.
#[derive(Debug, Clone)]
pub struct Detector {
    automaton: Option<AhoCorasick>,
    config: DetectionConfig,
}

impl Detector {
    pub fn new(config: DetectionConfig) -> Result<Self> {
        if let Some(idx) = config.indicators.iter().position(|i| i.is_empty()) {
            bail!("indicator #{} must not be empty", idx + 1);
        }
        let automaton = if config.indicators.is_empty() {
            None
        } else {
            Some(
                AhoCorasick::builder()
                    .ascii_case_insensitive(true)
                    .build(&config.indicators)
                    .context("failed to build indicator automaton")?,
            )
        };
        Ok(Self { automaton, config })
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Classify a response body and status code.
    pub fn classify(&self, body: &str, status: u16) -> Classification {
        let mut hits = vec![false; self.config.indicators.len()];
        if let Some(automaton) = &self.automaton {
            for mat in automaton.find_overlapping_iter(body) {
                hits[mat.pattern().as_usize()] = true;
            }
        }
        let matched_indicators: Vec<String> = self
            .config
            .indicators
            .iter()
            .zip(hits)
            .filter_map(|(indicator, hit)| hit.then(|| indicator.clone()))
            .collect();

        let size_heuristic =
            status == self.config.size_status && body.chars().count() > self.config.size_threshold;
        trace!(
            matched = matched_indicators.len(),
            size_heuristic,
            status,
            "classified response"
        );

        Classification {
            vulnerable: !matched_indicators.is_empty() || size_heuristic,
            matched_indicators,
            size_heuristic,
        }
    }
}

impl Default for Detector {
    fn default() -> Self {
        let config = DetectionConfig::default();
        let automaton = AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(&config.indicators)
            .ok();
        Self { automaton, config }
    }
}
