use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detection::DetectionConfig;
use crate::llm::OllamaSettings;
use crate::scanner::ScanOptions;

/// Settings file layout: `[scan]`, `[detection]`, `[ollama]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub scan: ScanOptions,
    pub detection: DetectionConfig,
    pub ollama: OllamaSettings,
}

impl ScannerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scan.validate()?;
        self.ollama.validate()?;
        if self.detection.indicators.iter().any(|i| i.is_empty()) {
            return Err(ConfigError::BlankIndicator);
        }
        Ok(())
    }
}

/// Errors raised while validating scanner configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("scan.max_concurrent must be at least 1")]
    ZeroConcurrency,
    #[error("{field} must be greater than zero")]
    ZeroTimeout { field: &'static str },
    #[error("scan.user_agent must not be blank")]
    BlankUserAgent,
    #[error("detection.indicators must not contain blank entries")]
    BlankIndicator,
    #[error("ollama.host `{host}` must start with http:// or https://")]
    InvalidHost { host: String },
    #[error("ollama.model must not be blank")]
    BlankModel,
}

/// Serde adapter accepting either whole seconds (`10`) or humantime strings (`"1m 30s"`).
pub mod duration_serde {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Secs(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => parse(&text).map_err(de::Error::custom),
        }
    }

    /// Parse `"30"` as seconds, anything else through humantime.
    pub fn parse(text: &str) -> Result<Duration, String> {
        let trimmed = text.trim();
        if let Ok(secs) = trimmed.parse::<u64>() {
            return Ok(Duration::from_secs(secs));
        }
        humantime::parse_duration(trimmed)
            .map_err(|err| format!("invalid duration `{trimmed}`: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn defaults_validate() {
        let config = ScannerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scan.max_concurrent, 10);
        assert_eq!(config.scan.timeout, Duration::from_secs(10));
        assert_eq!(config.detection.size_threshold, 1000);
        assert_eq!(config.ollama.model, "llama2");
    }

    #[test]
    fn deserializes_partial_json_with_durations() {
        let config: ScannerConfig = serde_json::from_value(serde_json::json!({
            "scan": { "max_concurrent": 4, "timeout": "1m 30s" },
            "ollama": { "model": "mistral", "timeout": 45 }
        }))
        .unwrap();
        assert_eq!(config.scan.max_concurrent, 4);
        assert_eq!(config.scan.timeout, Duration::from_secs(90));
        assert_eq!(config.ollama.model, "mistral");
        assert_eq!(config.ollama.timeout, Duration::from_secs(45));
        assert_eq!(config.detection, DetectionConfig::default());
    }

    #[test]
    fn rejects_unparseable_duration() {
        let err = serde_json::from_value::<ScannerConfig>(serde_json::json!({
            "scan": { "timeout": "soon" }
        }))
        .unwrap_err();
        assert!(err.to_string().contains("invalid duration `soon`"));
    }

    #[test]
    fn parse_accepts_bare_seconds() {
        assert_eq!(duration_serde::parse(" 12 "), Ok(Duration::from_secs(12)));
        assert_eq!(duration_serde::parse("250ms"), Ok(Duration::from_millis(250)));
    }

    #[test]
    fn validation_catches_blank_indicator() {
        let mut config = ScannerConfig::default();
        config.detection.indicators.push(String::new());
        assert_eq!(config.validate(), Err(ConfigError::BlankIndicator));
    }
}
