mod dispatch;
mod results;

use std::any::Any;
use std::ops::Deref;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info, warn};

use crate::cli::ScanType;
use crate::config::ScanConfig;
use crate::plugins::{ExploiterFactory, ReportGeneratorFactory};
pub use dispatch::{phases_for, Phase};
pub use results::{ScanFailure, ScanResult, Stage};

/// Drives one end-to-end scan against the injected collaborators.
///
/// Collaborator errors and panics never escape [`ScanOrchestrator::run_scan`];
/// they are recorded in [`ScanResult::failure`] and the partial result is returned.
pub struct ScanOrchestrator {
    config: Arc<ScanConfig>,
    exploiters: Arc<dyn ExploiterFactory>,
    reports: Arc<dyn ReportGeneratorFactory>,
    show_progress: bool,
}

impl ScanOrchestrator {
    pub fn new(
        config: Arc<ScanConfig>,
        exploiters: Arc<dyn ExploiterFactory>,
        reports: Arc<dyn ReportGeneratorFactory>,
    ) -> Self {
        Self {
            config,
            exploiters,
            reports,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub async fn run_scan(&self, target: &str, scan_type: ScanType) -> ScanResult {
        info!("Starting {} scan on {}", scan_type, target);

        let mut result = ScanResult::new(target, scan_type);
        let mut stage = Stage::Setup;

        let outcome = AssertUnwindSafe(self.execute(&mut result, &mut stage))
            .catch_unwind()
            .await;

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(ScanFailure::from_error(stage, &e)),
            Err(panic) => Some(ScanFailure::new(stage, panic_message(panic.as_ref()))),
        };

        if let Some(failure) = failure {
            error!("Scan failed: {}", failure);
            result.failure = Some(failure);
        } else {
            info!(
                vulnerabilities = result.vulnerability_count(),
                "Scan of {} finished", target
            );
        }

        result
    }

    async fn execute(&self, result: &mut ScanResult, stage: &mut Stage) -> anyhow::Result<()> {
        let phases = phases_for(result.scan_type);
        let pb = ProgressGuard(self.progress_bar(phases.len() as u64 + 1));

        *stage = Stage::Setup;
        let exploiter = self.exploiters.create(&result.target, &self.config)?;

        for phase in phases {
            pb.set_message(phase.to_string());
            match phase {
                Phase::Reconnaissance => {
                    *stage = Stage::Reconnaissance;
                    let payload = exploiter.perform_reconnaissance().await?;
                    info!("Reconnaissance of {} complete", result.target);
                    result.reconnaissance = Some(payload);
                }
                Phase::VulnerabilityScan => {
                    *stage = Stage::VulnerabilityScan;
                    let vulnerabilities = exploiter.execute_scan().await?;
                    if !vulnerabilities.is_empty() {
                        warn!("Vulnerability scan reported {} findings", vulnerabilities.len());
                    }
                    result.vulnerabilities = vulnerabilities;
                }
            }
            pb.inc(1);
        }

        *stage = Stage::Reporting;
        pb.set_message("reports");
        let reports = self.reports.create(result)?;
        let html_report = reports.generate_html_report()?;
        let json_report = reports.generate_json_report()?;
        result.html_report = Some(html_report);
        result.json_report = Some(json_report);
        pb.inc(1);

        Ok(())
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new(len);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.magenta} [{elapsed_precise}] {bar:30.green/black} {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏ "));
        }
        pb
    }
}

/// Clears the progress bar when a scan ends, including early returns and unwinds
struct ProgressGuard(ProgressBar);

impl Deref for ProgressGuard {
    type Target = ProgressBar;

    fn deref(&self) -> &ProgressBar {
        &self.0
    }
}

impl Drop for ProgressGuard {
    fn drop(&mut self) {
        self.0.finish_and_clear();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("collaborator panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("collaborator panicked: {}", s)
    } else {
        "collaborator panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit::{exit_code, EXIT_CLEAN, EXIT_FINDINGS};
    use crate::plugins::{Exploiter, ReportGenerator};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Clone, Copy, PartialEq)]
    enum Fail {
        Never,
        Create,
        Recon,
        Scan,
        Report,
        PanicScan,
    }

    #[derive(Default)]
    struct Calls {
        recon: AtomicUsize,
        scan: AtomicUsize,
        order: Mutex<Vec<&'static str>>,
    }

    struct StubExploiter {
        calls: Arc<Calls>,
        findings: usize,
        fail: Fail,
    }

    #[async_trait]
    impl Exploiter for StubExploiter {
        async fn perform_reconnaissance(&self) -> Result<Value> {
            self.calls.recon.fetch_add(1, Ordering::SeqCst);
            self.calls.order.lock().unwrap().push("recon");
            if self.fail == Fail::Recon {
                return Err(anyhow!("dns lookup failed"));
            }
            Ok(json!({"status": 200, "server": "nginx"}))
        }

        async fn execute_scan(&self) -> Result<Vec<Value>> {
            self.calls.scan.fetch_add(1, Ordering::SeqCst);
            self.calls.order.lock().unwrap().push("scan");
            match self.fail {
                Fail::Scan => Err(anyhow!("connection reset")),
                Fail::PanicScan => panic!("worker thread crashed"),
                _ => Ok((0..self.findings).map(|i| json!({"id": i})).collect()),
            }
        }
    }

    struct StubExploiters {
        calls: Arc<Calls>,
        findings: usize,
        fail: Fail,
        seen_config: Mutex<Option<ScanConfig>>,
    }

    impl ExploiterFactory for StubExploiters {
        fn create(&self, _target: &str, config: &ScanConfig) -> Result<Box<dyn Exploiter>> {
            *self.seen_config.lock().unwrap() = Some(config.clone());
            if self.fail == Fail::Create {
                return Err(anyhow!("unsupported target"));
            }
            Ok(Box::new(StubExploiter {
                calls: self.calls.clone(),
                findings: self.findings,
                fail: self.fail,
            }))
        }
    }

    struct StubReport {
        count: usize,
        fail: bool,
    }

    impl ReportGenerator for StubReport {
        fn generate_json_report(&self) -> Result<String> {
            Ok(format!("{{\"count\": {}}}", self.count))
        }

        fn generate_html_report(&self) -> Result<String> {
            if self.fail {
                return Err(anyhow!("template missing"));
            }
            Ok(format!("<p>{}</p>", self.count))
        }
    }

    struct StubReports {
        fail: bool,
    }

    impl ReportGeneratorFactory for StubReports {
        fn create(&self, result: &ScanResult) -> Result<Box<dyn ReportGenerator>> {
            Ok(Box::new(StubReport {
                count: result.vulnerability_count(),
                fail: self.fail,
            }))
        }
    }

    fn orchestrator(findings: usize, fail: Fail) -> (ScanOrchestrator, Arc<Calls>, Arc<StubExploiters>) {
        let calls = Arc::new(Calls::default());
        let exploiters = Arc::new(StubExploiters {
            calls: calls.clone(),
            findings,
            fail,
            seen_config: Mutex::new(None),
        });
        let orchestrator = ScanOrchestrator::new(
            Arc::new(ScanConfig::default()),
            exploiters.clone(),
            Arc::new(StubReports {
                fail: fail == Fail::Report,
            }),
        );
        (orchestrator, calls, exploiters)
    }

    #[tokio::test]
    async fn test_recon_scenario() {
        let (orchestrator, calls, _) = orchestrator(5, Fail::Never);
        let result = orchestrator.run_scan("https://example.com", ScanType::Recon).await;

        assert_eq!(result.target, "https://example.com");
        assert_eq!(result.scan_type, ScanType::Recon);
        assert!(result.reconnaissance.is_some());
        assert!(result.vulnerabilities.is_empty());
        assert!(result.html_report.is_some());
        assert!(result.json_report.is_some());
        assert!(result.failure.is_none());
        assert_eq!(calls.scan.load(Ordering::SeqCst), 0);
        assert_eq!(exit_code(Some(&result), None), EXIT_CLEAN);
    }

    #[tokio::test]
    async fn test_full_scenario_with_findings() {
        let (orchestrator, calls, _) = orchestrator(3, Fail::Never);
        let result = orchestrator.run_scan("https://example.com", ScanType::Full).await;

        assert_eq!(result.vulnerability_count(), 3);
        assert!(result.reconnaissance.is_some());
        assert_eq!(*calls.order.lock().unwrap(), vec!["recon", "scan"]);
        assert_eq!(exit_code(Some(&result), None), EXIT_FINDINGS);
    }

    #[tokio::test]
    async fn test_scan_only_skips_recon() {
        let (orchestrator, calls, _) = orchestrator(1, Fail::Never);
        let result = orchestrator.run_scan("https://example.com", ScanType::Scan).await;

        assert!(result.reconnaissance.is_none());
        assert_eq!(calls.recon.load(Ordering::SeqCst), 0);
        assert_eq!(calls.scan.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_report_sees_aggregated_vulnerabilities() {
        let (orchestrator, _, _) = orchestrator(2, Fail::Never);
        let result = orchestrator.run_scan("https://example.com", ScanType::Full).await;

        assert_eq!(result.json_report.as_deref(), Some("{\"count\": 2}"));
        assert_eq!(result.html_report.as_deref(), Some("<p>2</p>"));
    }

    #[tokio::test]
    async fn test_exploiter_receives_resolved_config() {
        let (orchestrator, _, exploiters) = orchestrator(0, Fail::Never);
        orchestrator.run_scan("https://example.com", ScanType::Recon).await;

        assert_eq!(
            exploiters.seen_config.lock().unwrap().as_ref(),
            Some(orchestrator.config())
        );
    }

    #[tokio::test]
    async fn test_construction_failure_is_captured() {
        let (orchestrator, calls, _) = orchestrator(0, Fail::Create);
        let result = orchestrator.run_scan("gopher://example.com", ScanType::Full).await;

        let failure = result.failure.expect("failure recorded");
        assert_eq!(failure.stage, Stage::Setup);
        assert_eq!(failure.message, "unsupported target");
        assert_eq!(calls.recon.load(Ordering::SeqCst), 0);
        assert!(result.json_report.is_none());
    }

    #[tokio::test]
    async fn test_recon_failure_stops_later_phases() {
        let (orchestrator, calls, _) = orchestrator(2, Fail::Recon);
        let result = orchestrator.run_scan("https://example.com", ScanType::Full).await;

        let failure = result.failure.as_ref().expect("failure recorded");
        assert_eq!(failure.stage, Stage::Reconnaissance);
        assert!(!failure.message.is_empty());
        assert_eq!(calls.scan.load(Ordering::SeqCst), 0);
        assert!(result.reconnaissance.is_none());
        assert!(result.html_report.is_none());
        assert_eq!(exit_code(Some(&result), None), EXIT_CLEAN);
    }

    #[tokio::test]
    async fn test_scan_failure_keeps_recon_payload() {
        let (orchestrator, _, _) = orchestrator(2, Fail::Scan);
        let result = orchestrator.run_scan("https://example.com", ScanType::Full).await;

        assert_eq!(result.failure.as_ref().map(|f| f.stage), Some(Stage::VulnerabilityScan));
        assert!(result.reconnaissance.is_some());
        assert!(result.vulnerabilities.is_empty());
    }

    #[tokio::test]
    async fn test_report_failure_keeps_findings() {
        let (orchestrator, _, _) = orchestrator(4, Fail::Report);
        let result = orchestrator.run_scan("https://example.com", ScanType::Scan).await;

        assert_eq!(result.failure.as_ref().map(|f| f.stage), Some(Stage::Reporting));
        assert_eq!(result.vulnerability_count(), 4);
        assert!(result.json_report.is_none());
        assert_eq!(exit_code(Some(&result), None), EXIT_FINDINGS);
    }

    #[tokio::test]
    async fn test_panicking_collaborator_is_captured() {
        let (orchestrator, _, _) = orchestrator(0, Fail::PanicScan);
        let result = orchestrator.run_scan("https://example.com", ScanType::Full).await;

        let failure = result.failure.expect("failure recorded");
        assert_eq!(failure.stage, Stage::VulnerabilityScan);
        assert!(failure.message.contains("worker thread crashed"));
    }

    #[test]
    fn test_progress_cleared_on_early_exit() {
        let pb = ProgressBar::hidden();
        let watcher = pb.clone();
        let run = || -> anyhow::Result<()> {
            let guard = ProgressGuard(pb);
            guard.inc(1);
            Err(anyhow!("recon failed"))
        };

        assert!(run().is_err());
        assert!(watcher.is_finished());
    }

    #[tokio::test]
    async fn test_failed_scan_with_progress_still_returns() {
        let (orchestrator, _, _) = orchestrator(0, Fail::Recon);
        let result = orchestrator
            .with_progress(true)
            .run_scan("https://example.com", ScanType::Full)
            .await;
        assert_eq!(result.failure.map(|f| f.stage), Some(Stage::Reconnaissance));
    }

    #[test]
    fn test_panic_message_variants() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let other: Box<dyn Any + Send> = Box::new(7_u32);
        assert_eq!(panic_message(owned.as_ref()), "collaborator panicked: owned");
        assert_eq!(panic_message(other.as_ref()), "collaborator panicked");
    }
}
