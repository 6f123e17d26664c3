pub mod config;
pub mod detection;
pub mod llm;
pub mod payload;
pub mod report;
pub mod scanner;

pub use config::{ConfigError, ScannerConfig};
pub use detection::{Classification, DetectionConfig, Detector};
pub use llm::{NoopAnalyst, OllamaAnalyst, OllamaClient, OllamaSettings, ScanAnalyst};
pub use payload::{
    file_repository::FilePayloadRepository, BuiltinPayloads, Payload, PayloadRepository,
    PayloadValidationError, ScanType,
};
pub use report::{render_report, OutputFormat};
pub use scanner::{
    http_scanner::HttpScanner, load_targets, ScanOptions, ScanResult, ScanSummary, Scanner,
};
