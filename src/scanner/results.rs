use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cli::ScanType;

/// Pipeline stage a failure was raised in
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Setup,
    Reconnaissance,
    VulnerabilityScan,
    Reporting,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Setup => write!(f, "setup"),
            Stage::Reconnaissance => write!(f, "reconnaissance"),
            Stage::VulnerabilityScan => write!(f, "vulnerability scan"),
            Stage::Reporting => write!(f, "reporting"),
        }
    }
}

/// A collaborator failure captured into the result instead of being raised.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanFailure {
    pub stage: Stage,
    pub message: String,
}

impl ScanFailure {
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }

    pub fn from_error(stage: Stage, error: &anyhow::Error) -> Self {
        // alternate form keeps the context chain on one line
        Self::new(stage, format!("{:#}", error))
    }
}

impl std::fmt::Display for ScanFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.message)
    }
}

/// Aggregated outcome of one scan invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub target: String,
    pub scan_type: ScanType,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub vulnerabilities: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnaissance: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_report: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_report: Option<String>,
    #[serde(rename = "error", default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ScanFailure>,
}

impl ScanResult {
    pub fn new(target: impl Into<String>, scan_type: ScanType) -> Self {
        Self {
            target: target.into(),
            scan_type,
            timestamp: Utc::now(),
            vulnerabilities: Vec::new(),
            reconnaissance: None,
            html_report: None,
            json_report: None,
            failure: None,
        }
    }

    pub fn vulnerability_count(&self) -> usize {
        self.vulnerabilities.len()
    }

    pub fn has_findings(&self) -> bool {
        !self.vulnerabilities.is_empty()
    }
}
