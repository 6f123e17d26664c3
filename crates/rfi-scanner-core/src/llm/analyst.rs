use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use super::{GenerateRequest, OllamaClient, ScanAnalyst};
use crate::scanner::{ScanResult, ScanSummary};

pub const EMPTY_RESULTS_MESSAGE: &str = "No scan results to analyze.";

const MAX_RESULTS_IN_PROMPT: usize = 50;
const ANALYSIS_TEMPERATURE: f32 = 0.3;
const EXPLAIN_TEMPERATURE: f32 = 0.4;

const ANALYSIS_SYSTEM_PROMPT: &str = "You are a cybersecurity expert analyzing security scan results from an authorized assessment. Provide clear, actionable insights and professional recommendations.";
const EXPLAIN_SYSTEM_PROMPT: &str = "You are a cybersecurity educator explaining security vulnerabilities in a clear, educational manner for authorized security testing purposes.";

/// Summarizes scan results through an Ollama model.
#[derive(Debug, Clone)]
pub struct OllamaAnalyst {
    client: OllamaClient,
}

impl OllamaAnalyst {
    pub fn new(client: OllamaClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &OllamaClient {
        &self.client
    }

    pub fn analysis_request(results: &[ScanResult]) -> Result<GenerateRequest> {
        let summary = ScanSummary::from_results(results);
        let shown = &results[..results.len().min(MAX_RESULTS_IN_PROMPT)];
        let details =
            serde_json::to_string_pretty(shown).context("failed to serialize scan results")?;
        let omitted = results.len() - shown.len();
        let omitted_note = if omitted > 0 {
            format!("\n({omitted} further result(s) omitted)\n")
        } else {
            String::new()
        };

        let prompt = format!(
            "Analyze the following security scan results and provide a comprehensive report:\n\n\
             SCAN SUMMARY:\n\
             - Total targets scanned: {total}\n\
             - Vulnerable targets found: {vulnerable}\n\
             - Vulnerability rate: {rate:.2}%\n\n\
             DETAILED RESULTS:\n{details}\n{omitted_note}\n\
             Please provide:\n\
             1. Executive summary of findings\n\
             2. Risk assessment and severity levels\n\
             3. Recommendations for remediation\n\
             4. Technical details of vulnerabilities found\n\
             5. Best practices for prevention\n\n\
             Format the response as a professional security report.",
            total = summary.total,
            vulnerable = summary.vulnerable,
            rate = summary.success_rate,
        );

        Ok(GenerateRequest::new(prompt)
            .system(ANALYSIS_SYSTEM_PROMPT)
            .temperature(ANALYSIS_TEMPERATURE))
    }

    pub fn explain_request(result: &ScanResult) -> Result<GenerateRequest> {
        let details =
            serde_json::to_string_pretty(result).context("failed to serialize scan result")?;
        let prompt = format!(
            "Explain the following security vulnerability in detail:\n\n\
             VULNERABILITY DATA:\n{details}\n\n\
             Please provide:\n\
             1. What this vulnerability is\n\
             2. Potential impact and risks\n\
             3. How to fix it\n\
             4. Prevention measures\n\n\
             Make the explanation suitable for both technical and non-technical audiences."
        );
        Ok(GenerateRequest::new(prompt)
            .system(EXPLAIN_SYSTEM_PROMPT)
            .temperature(EXPLAIN_TEMPERATURE))
    }

    /// Explain a single finding.
    pub async fn explain(&self, result: &ScanResult) -> Result<String> {
        let request = Self::explain_request(result)?;
        Ok(self.client.generate(&request).await?.content)
    }

    /// Like [`ScanAnalyst::analyze`] but forwards text fragments as they stream in.
    pub async fn analyze_streaming<F>(&self, results: &[ScanResult], on_chunk: F) -> Result<String>
    where
        F: FnMut(&str) + Send,
    {
        if results.is_empty() {
            return Ok(EMPTY_RESULTS_MESSAGE.to_string());
        }
        let request = Self::analysis_request(results)?;
        Ok(self.client.generate_stream(&request, on_chunk).await?.content)
    }
}

#[async_trait]
impl ScanAnalyst for OllamaAnalyst {
    async fn analyze(&self, results: &[ScanResult]) -> Result<String> {
        if results.is_empty() {
            return Ok(EMPTY_RESULTS_MESSAGE.to_string());
        }
        let request = Self::analysis_request(results)?;
        let generation = self.client.generate(&request).await?;
        debug!(
            model = %generation.model,
            tokens = ?generation.tokens_used,
            elapsed_ms = generation.response_time.as_millis() as u64,
            "analysis generated"
        );
        Ok(generation.content)
    }
}
