use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::header::{HeaderMap, SERVER, SET_COOKIE};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, trace};
use url::Url;

use super::{ExploitError, Exploiter, ExploiterFactory, ReportGenerator, ReportGeneratorFactory};
use crate::config::ScanConfig;
use crate::scanner::ScanResult;

lazy_static! {
    static ref VERSION_RE: Regex = Regex::new(r"\d+(\.\d+)+").unwrap();
    static ref TITLE_RE: Regex = Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap();
    static ref ENV_LINE_RE: Regex = Regex::new(r"(?m)^[A-Z][A-Z0-9_]*=").unwrap();
}

/// Well-known paths probed during reconnaissance
const PROBE_PATHS: &[&str] = &[
    "/robots.txt",
    "/sitemap.xml",
    "/.well-known/security.txt",
    "/admin",
    "/login",
    "/server-status",
    "/.git/HEAD",
    "/.env",
];

/// Header values are truncated to this many chars in evidence
const MAX_EVIDENCE_LEN: usize = 200;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
}

/// One vulnerability record as emitted by the built-in exploiter
#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub id: &'static str,
    pub title: String,
    pub severity: Severity,
    pub description: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

impl Finding {
    fn new(id: &'static str, severity: Severity, url: &Url, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            severity,
            description: description.into(),
            url: url.to_string(),
            evidence: None,
        }
    }

    fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        let evidence: String = evidence.into();
        self.evidence = Some(evidence.chars().take(MAX_EVIDENCE_LEN).collect());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
struct PathProbe {
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

struct Page {
    url: Url,
    status: u16,
    headers: HeaderMap,
    body: String,
    elapsed: Duration,
}

/// HTTP exploiter doing passive reconnaissance and header/exposure checks
pub struct HttpExploiter {
    target: Url,
    client: reqwest::Client,
    max_threads: usize,
    rate_limit: Duration,
}

impl HttpExploiter {
    pub fn new(target: &str, config: &ScanConfig) -> Result<Self, ExploitError> {
        let url = Url::parse(target).map_err(|source| ExploitError::InvalidTarget {
            url: target.to_string(),
            source,
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ExploitError::UnsupportedScheme(url.scheme().to_string()));
        }

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout_duration())
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(ExploitError::Client)?;

        Ok(Self {
            target: url,
            client,
            max_threads: config.max_threads.max(1),
            rate_limit: config.rate_limit_duration(),
        })
    }

    async fn fetch(&self, url: Url) -> Result<Page, ExploitError> {
        let start = Instant::now();
        let request_error = |source| ExploitError::Request {
            url: url.to_string(),
            source,
        };

        let response = self.client.get(url.clone()).send().await.map_err(request_error)?;
        let final_url = response.url().clone();
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(request_error)?;
        let elapsed = start.elapsed();

        trace!(url = %final_url, status, "fetched");

        if !self.rate_limit.is_zero() {
            sleep(self.rate_limit).await;
        }

        Ok(Page {
            url: final_url,
            status,
            headers,
            body,
            elapsed,
        })
    }

    async fn fetch_path(&self, path: &str) -> Result<Page, ExploitError> {
        let url = self.target.join(path).map_err(|source| ExploitError::InvalidTarget {
            url: path.to_string(),
            source,
        })?;
        self.fetch(url).await
    }

    async fn probe_paths(&self) -> Vec<PathProbe> {
        let semaphore = Semaphore::new(self.max_threads);

        let tasks = PROBE_PATHS.iter().map(|path| {
            let semaphore = &semaphore;
            async move {
                let _permit = semaphore.acquire().await;
                match self.fetch_path(path).await {
                    Ok(page) => PathProbe {
                        path: path.to_string(),
                        status: Some(page.status),
                        length: Some(page.body.len()),
                        error: None,
                    },
                    Err(e) => PathProbe {
                        path: path.to_string(),
                        status: None,
                        length: None,
                        error: Some(format!("{:#}", anyhow::Error::new(e))),
                    },
                }
            }
        });

        join_all(tasks).await
    }

    async fn check_exposed_files(&self) -> Vec<Finding> {
        let mut findings = Vec::new();

        match self.fetch_path("/.git/HEAD").await {
            Ok(page) if page.status == 200 && page.body.trim_start().starts_with("ref:") => {
                findings.push(
                    Finding::new(
                        "exposed-git-repository",
                        Severity::High,
                        &page.url,
                        "Git repository exposed",
                        "The .git directory is served, allowing the source history to be downloaded.",
                    )
                    .with_evidence(page.body.trim()),
                );
            }
            Ok(_) => {}
            Err(e) => debug!("git exposure check skipped: {}", e),
        }

        match self.fetch_path("/.env").await {
            Ok(page) if page.status == 200 && ENV_LINE_RE.is_match(&page.body) => {
                findings.push(Finding::new(
                    "exposed-env-file",
                    Severity::High,
                    &page.url,
                    "Environment file exposed",
                    "A .env file with variable assignments is publicly readable and may contain secrets.",
                ));
            }
            Ok(_) => {}
            Err(e) => debug!("env exposure check skipped: {}", e),
        }

        findings
    }
}

#[async_trait]
impl Exploiter for HttpExploiter {
    async fn perform_reconnaissance(&self) -> Result<Value> {
        let page = self
            .fetch(self.target.clone())
            .await
            .context("reconnaissance request")?;

        let header = |name: &str| {
            page.headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let server = header("server");
        let powered_by = header("x-powered-by");
        let technologies: Vec<String> = server.iter().chain(powered_by.iter()).cloned().collect();

        let headers: BTreeMap<String, String> = page
            .headers
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.to_string(), v.to_string())))
            .collect();

        let title = TITLE_RE
            .captures(&page.body)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string());

        let paths = self.probe_paths().await;

        Ok(json!({
            "url": self.target.to_string(),
            "final_url": page.url.to_string(),
            "status": page.status,
            "server": server,
            "powered_by": powered_by,
            "technologies": technologies,
            "title": title,
            "response_time_ms": page.elapsed.as_millis() as u64,
            "headers": headers,
            "paths": paths,
        }))
    }

    async fn execute_scan(&self) -> Result<Vec<Value>> {
        let page = self
            .fetch(self.target.clone())
            .await
            .context("vulnerability scan request")?;

        let mut findings = assess_headers(&page.url, &page.headers);
        findings.extend(self.check_exposed_files().await);

        findings
            .into_iter()
            .map(|f| serde_json::to_value(f).context("encoding finding"))
            .collect()
    }
}

/// Constructs [`HttpExploiter`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpExploiterFactory;

impl ExploiterFactory for HttpExploiterFactory {
    fn create(&self, target: &str, config: &ScanConfig) -> Result<Box<dyn Exploiter>> {
        Ok(Box::new(HttpExploiter::new(target, config)?))
    }
}

/// Passive checks over the response headers of `url`
pub fn assess_headers(url: &Url, headers: &HeaderMap) -> Vec<Finding> {
    let mut findings = Vec::new();
    let is_https = url.scheme() == "https";
    let get = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    if is_https && get("strict-transport-security").is_none() {
        findings.push(Finding::new(
            "missing-hsts",
            Severity::Medium,
            url,
            "Missing Strict-Transport-Security header",
            "HTTPS responses do not instruct browsers to refuse plain-HTTP connections.",
        ));
    }

    let csp = get("content-security-policy");
    if csp.is_none() {
        findings.push(Finding::new(
            "missing-csp",
            Severity::Medium,
            url,
            "Missing Content-Security-Policy header",
            "No content security policy restricts script and resource origins.",
        ));
    }

    let frame_ancestors = csp.map(|v| v.to_ascii_lowercase().contains("frame-ancestors")).unwrap_or(false);
    if get("x-frame-options").is_none() && !frame_ancestors {
        findings.push(Finding::new(
            "clickjacking",
            Severity::Medium,
            url,
            "Page can be framed by other origins",
            "Neither X-Frame-Options nor a CSP frame-ancestors directive is set.",
        ));
    }

    if !get("x-content-type-options").map(|v| v.eq_ignore_ascii_case("nosniff")).unwrap_or(false) {
        findings.push(Finding::new(
            "missing-nosniff",
            Severity::Low,
            url,
            "Missing X-Content-Type-Options: nosniff",
            "Browsers may MIME-sniff responses into executable content types.",
        ));
    }

    if let Some(server) = headers.get(SERVER).and_then(|v| v.to_str().ok()) {
        if VERSION_RE.is_match(server) {
            findings.push(
                Finding::new(
                    "server-version-disclosure",
                    Severity::Low,
                    url,
                    "Server version disclosed",
                    "The Server header reveals the exact software version.",
                )
                .with_evidence(server),
            );
        }
    }

    if let Some(powered_by) = get("x-powered-by") {
        findings.push(
            Finding::new(
                "x-powered-by-disclosure",
                Severity::Info,
                url,
                "Technology disclosed via X-Powered-By",
                "The X-Powered-By header reveals the application stack.",
            )
            .with_evidence(powered_by),
        );
    }

    for cookie in headers.get_all(SET_COOKIE).iter().filter_map(|v| v.to_str().ok()) {
        let name = cookie.split('=').next().unwrap_or_default().trim();
        let attributes: Vec<String> = cookie
            .split(';')
            .skip(1)
            .map(|a| a.trim().to_ascii_lowercase())
            .collect();
        let has = |flag: &str| attributes.iter().any(|a| a == flag);

        if !has("httponly") {
            findings.push(
                Finding::new(
                    "cookie-without-httponly",
                    Severity::Low,
                    url,
                    format!("Cookie {} lacks HttpOnly", name),
                    "The cookie is readable from JavaScript.",
                )
                .with_evidence(cookie),
            );
        }
        if is_https && !has("secure") {
            findings.push(
                Finding::new(
                    "cookie-without-secure",
                    Severity::Low,
                    url,
                    format!("Cookie {} lacks Secure", name),
                    "The cookie may be sent over unencrypted connections.",
                )
                .with_evidence(cookie),
            );
        }
    }

    findings
}

/// Report generator over a snapshot of the in-progress result
pub struct StandardReportGenerator {
    snapshot: ScanResult,
}

impl StandardReportGenerator {
    pub fn new(result: &ScanResult) -> Self {
        Self {
            snapshot: result.clone(),
        }
    }

    fn severity_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for vuln in &self.snapshot.vulnerabilities {
            let severity = vuln
                .get("severity")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            *counts.entry(severity).or_insert(0) += 1;
        }
        counts
    }
}

impl ReportGenerator for StandardReportGenerator {
    fn generate_json_report(&self) -> Result<String> {
        let result = &self.snapshot;
        let report = json!({
            "generator": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
            "summary": {
                "target": result.target,
                "scan_type": result.scan_type,
                "timestamp": result.timestamp,
                "total_vulnerabilities": result.vulnerability_count(),
                "by_severity": self.severity_counts(),
                "error": result.failure,
            },
            "vulnerabilities": result.vulnerabilities,
            "reconnaissance": result.reconnaissance,
        });
        Ok(serde_json::to_string_pretty(&report)?)
    }

    fn generate_html_report(&self) -> Result<String> {
        let result = &self.snapshot;
        let mut html = String::new();

        html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
        html.push_str("  <meta charset=\"utf-8\">\n");
        html.push_str(&format!(
            "  <title>Security scan report: {}</title>\n",
            escape_html(&result.target)
        ));
        html.push_str("  <style>body{font-family:sans-serif;margin:2em}table{border-collapse:collapse}td,th{border:1px solid #ccc;padding:4px 8px;text-align:left}.high{color:#b00}.medium{color:#c60}.low{color:#870}</style>\n");
        html.push_str("</head>\n<body>\n");

        html.push_str(&format!("  <h1>Scan report for {}</h1>\n", escape_html(&result.target)));
        html.push_str("  <ul>\n");
        html.push_str(&format!("    <li>Scan type: {}</li>\n", result.scan_type));
        html.push_str(&format!("    <li>Started: {}</li>\n", result.timestamp.to_rfc3339()));
        html.push_str(&format!(
            "    <li>Vulnerabilities: {}</li>\n",
            result.vulnerability_count()
        ));
        for (severity, count) in self.severity_counts() {
            html.push_str(&format!("    <li>{}: {}</li>\n", escape_html(&severity), count));
        }
        html.push_str("  </ul>\n");

        if let Some(failure) = &result.failure {
            html.push_str(&format!(
                "  <p class=\"high\">Scan incomplete: {}</p>\n",
                escape_html(&failure.to_string())
            ));
        }

        html.push_str("  <h2>Findings</h2>\n");
        if result.vulnerabilities.is_empty() {
            html.push_str("  <p>No vulnerabilities found.</p>\n");
        } else {
            html.push_str("  <table>\n    <tr><th>Severity</th><th>Title</th><th>URL</th><th>Details</th></tr>\n");
            for vuln in &result.vulnerabilities {
                let field = |key: &str| vuln.get(key).and_then(Value::as_str).unwrap_or("");
                let details = match vuln.get("description").and_then(Value::as_str) {
                    Some(description) => description.to_string(),
                    None => vuln.to_string(),
                };
                let severity = field("severity");
                html.push_str(&format!(
                    "    <tr class=\"{}\"><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                    escape_html(severity),
                    escape_html(severity),
                    escape_html(field("title")),
                    escape_html(field("url")),
                    escape_html(&details)
                ));
            }
            html.push_str("  </table>\n");
        }

        if let Some(recon) = &result.reconnaissance {
            html.push_str("  <h2>Reconnaissance</h2>\n");
            html.push_str(&format!(
                "  <pre>{}</pre>\n",
                escape_html(&serde_json::to_string_pretty(recon)?)
            ));
        }

        html.push_str("</body>\n</html>\n");
        Ok(html)
    }
}

/// Constructs [`StandardReportGenerator`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardReportFactory;

impl ReportGeneratorFactory for StandardReportFactory {
    fn create(&self, result: &ScanResult) -> Result<Box<dyn ReportGenerator>> {
        Ok(Box::new(StandardReportGenerator::new(result)))
    }
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
