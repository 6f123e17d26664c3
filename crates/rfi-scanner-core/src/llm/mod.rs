mod analyst;
mod ollama;
mod settings;

use anyhow::Result;
use async_trait::async_trait;

use crate::scanner::ScanResult;

pub use analyst::{OllamaAnalyst, EMPTY_RESULTS_MESSAGE};
pub use ollama::{
    ChatMessage, GenerateRequest, Generation, GenerationOptions, ModelInfo, OllamaClient,
};
pub use settings::OllamaSettings;

/// Turns a batch of scan results into a prose assessment.
#[async_trait]
pub trait ScanAnalyst: Send + Sync {
    async fn analyze(&self, results: &[ScanResult]) -> Result<String>;
}

/// Used when no generation server is configured.
#[derive(Debug, Default, Clone)]
pub struct NoopAnalyst;

#[async_trait]
impl ScanAnalyst for NoopAnalyst {
    async fn analyze(&self, _results: &[ScanResult]) -> Result<String> {
        Ok("AI analysis unavailable: no generation server configured.".into())
    }
}
