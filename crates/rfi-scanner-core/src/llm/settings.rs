use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};

use crate::config::{duration_serde, ConfigError};

pub const DEFAULT_HOST: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama2";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Connection settings for the local generation server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaSettings {
    pub host: String,
    pub model: String,
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
    /// Total attempts made by non-streaming generation before giving up.
    pub max_retries: u32,
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl OllamaSettings {
    const HOST_ENV: &'static str = "OLLAMA_HOST";
    const MODEL_ENV: &'static str = "OLLAMA_MODEL";
    const TIMEOUT_ENV: &'static str = "OLLAMA_TIMEOUT_SECS";
    const RETRIES_ENV: &'static str = "OLLAMA_MAX_RETRIES";

    /// Load settings from environment variables, falling back to defaults.
    ///
    /// * `OLLAMA_HOST`: base URL (default: `http://localhost:11434`).
    /// * `OLLAMA_MODEL`: model name (default: `llama2`).
    /// * `OLLAMA_TIMEOUT_SECS` / `OLLAMA_MAX_RETRIES`: request tuning.
    pub fn from_env() -> Self {
        Self::from_map(std::env::vars().collect())
    }

    fn from_map(vars: HashMap<String, String>) -> Self {
        let non_blank = |key: &str| {
            vars.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();
        Self {
            host: non_blank(Self::HOST_ENV).unwrap_or(defaults.host),
            model: non_blank(Self::MODEL_ENV).unwrap_or(defaults.model),
            timeout: non_blank(Self::TIMEOUT_ENV)
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            max_retries: non_blank(Self::RETRIES_ENV)
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(defaults.max_retries),
        }
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.host.trim_end_matches('/')
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.host.starts_with("http://") || self.host.starts_with("https://")) {
            return Err(ConfigError::InvalidHost {
                host: self.host.clone(),
            });
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::BlankModel);
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout {
                field: "ollama.timeout",
            });
        }
        Ok(())
    }
}
