use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::config::ScanConfig;
use crate::scanner::ScanResult;

pub mod builtin;

/// Performs the reconnaissance and vulnerability-scan phases against one target.
#[async_trait]
pub trait Exploiter: Send + Sync {
    /// Collect information about the target. The payload is opaque to the orchestrator.
    async fn perform_reconnaissance(&self) -> Result<Value>;

    /// Run the vulnerability checks, returning one record per finding in discovery order
    async fn execute_scan(&self) -> Result<Vec<Value>>;
}

/// Builds an exploiter for a target
pub trait ExploiterFactory: Send + Sync {
    fn create(&self, target: &str, config: &ScanConfig) -> Result<Box<dyn Exploiter>>;
}

/// Renders the aggregated result into report artifacts.
pub trait ReportGenerator: Send + Sync {
    fn generate_json_report(&self) -> Result<String>;

    fn generate_html_report(&self) -> Result<String>;
}

/// Builds a report generator from the in-progress result
pub trait ReportGeneratorFactory: Send + Sync {
    fn create(&self, result: &ScanResult) -> Result<Box<dyn ReportGenerator>>;
}

/// Errors raised by the built-in exploiter
#[derive(Debug, thiserror::Error)]
pub enum ExploitError {
    #[error("invalid target URL {url}")]
    InvalidTarget {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("unsupported scheme {0:?}, expected http or https")]
    UnsupportedScheme(String),

    #[error("HTTP client setup failed")]
    Client(#[source] reqwest::Error),

    #[error("request to {url} failed")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}
