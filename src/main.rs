mod cli;
mod config;
mod exit;
mod logging;
mod output;
mod plugins;
mod scanner;

use std::future::Future;
use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use colored::*;
use tracing::{debug, error, info, warn};

use crate::cli::Cli;
use crate::config::ConfigResolver;
use crate::exit::{exit_code, Termination};
use crate::logging::LogSettings;
use crate::output::OutputWriter;
use crate::plugins::builtin::{HttpExploiterFactory, StandardReportFactory};
use crate::scanner::{ScanOrchestrator, ScanResult};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let log_settings = LogSettings {
        verbose: cli.verbose,
        file: Some(cli.log_file.clone()),
        ansi: !cli.no_color,
    };
    if let Err(e) = logging::init(&log_settings) {
        eprintln!("Warning: {:#}", e);
    }

    let resolver = ConfigResolver::from_override(cli.config.clone());
    let orchestrator = ScanOrchestrator::new(
        Arc::new(resolver.resolve()),
        Arc::new(HttpExploiterFactory),
        Arc::new(StandardReportFactory),
    )
    .with_progress(cli.progress);
    debug!(config = ?orchestrator.config(), path = %resolver.path().display(), "resolved scan settings");

    let (result, termination) = drive(&cli, &orchestrator, tokio::signal::ctrl_c()).await;

    let code = exit_code(result.as_ref(), termination.as_ref());
    report(result.as_ref(), termination.as_ref());
    ExitCode::from(code)
}

/// Race the run against `interrupt`, returning whatever result was produced
/// and how the run terminated outside the scan's fail-soft boundary.
async fn drive<F>(
    cli: &Cli,
    orchestrator: &ScanOrchestrator,
    interrupt: F,
) -> (Option<ScanResult>, Option<Termination>)
where
    F: Future<Output = io::Result<()>>,
{
    let mut result: Option<ScanResult> = None;
    let termination = tokio::select! {
        outcome = run(cli, orchestrator, &mut result) => outcome.err().map(Termination::Fatal),
        Ok(()) = interrupt => Some(Termination::Interrupted),
    };
    (result, termination)
}

/// Scan, then emit. Only output errors escape; the scan itself is fail-soft.
async fn run(cli: &Cli, orchestrator: &ScanOrchestrator, slot: &mut Option<ScanResult>) -> Result<()> {
    let result = slot.insert(orchestrator.run_scan(&cli.target, cli.scan_type).await);

    let writer = OutputWriter::new(cli.format, cli.output.clone());
    let written = writer.write(result)?;
    if let Some(base) = &cli.output {
        info!("Results saved to {}", base.display());
        for path in &written {
            debug!("wrote {}", path.display());
        }
    }

    Ok(())
}

/// Human-facing verdict printed after a completed run
#[derive(Debug, PartialEq, Eq)]
enum Summary {
    Clean,
    Findings(usize),
    /// A collaborator failed; the count covers what was gathered before it
    Incomplete(usize),
}

fn summarize(result: &ScanResult) -> Summary {
    let found = result.vulnerability_count();
    if result.failure.is_some() {
        Summary::Incomplete(found)
    } else if found > 0 {
        Summary::Findings(found)
    } else {
        Summary::Clean
    }
}

fn report(result: Option<&ScanResult>, termination: Option<&Termination>) {
    match termination {
        Some(Termination::Interrupted) => {
            info!("Scan interrupted by user");
            eprintln!("{}", "Scan interrupted".yellow().bold());
            return;
        }
        Some(Termination::Fatal(e)) => {
            error!("Fatal error: {:#}", e);
            eprintln!("{} {:#}", "Fatal error:".red().bold(), e);
            return;
        }
        None => {}
    }

    let Some(result) = result else {
        return;
    };

    match summarize(result) {
        Summary::Clean => {
            info!("No vulnerabilities found");
            eprintln!("{} {}", "CLEAN".green().bold(), result.target);
        }
        Summary::Findings(found) => {
            warn!("Found {} vulnerabilities", found);
            eprintln!(
                "{} {} vulnerabilities on {}",
                "FINDINGS".red().bold(),
                found.to_string().bold(),
                result.target
            );
        }
        Summary::Incomplete(found) => {
            let failure = result
                .failure
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();
            warn!("Scan incomplete, {}; {} vulnerabilities recorded", failure, found);
            eprintln!(
                "{} {} ({}), {} vulnerabilities recorded",
                "INCOMPLETE".yellow().bold(),
                result.target,
                failure,
                found
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit::{EXIT_CLEAN, EXIT_FATAL, EXIT_FINDINGS, EXIT_INTERRUPTED};
    use crate::plugins::{Exploiter, ExploiterFactory};
    use crate::scanner::{ScanFailure, Stage};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct FixedExploiter {
        findings: usize,
        hang: bool,
    }

    #[async_trait]
    impl Exploiter for FixedExploiter {
        async fn perform_reconnaissance(&self) -> Result<Value> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            Ok(json!({"status": 200}))
        }

        async fn execute_scan(&self) -> Result<Vec<Value>> {
            Ok((0..self.findings).map(|i| json!({ "id": i })).collect())
        }
    }

    struct FixedExploiters {
        findings: usize,
        hang: bool,
    }

    impl ExploiterFactory for FixedExploiters {
        fn create(&self, _target: &str, _config: &config::ScanConfig) -> Result<Box<dyn Exploiter>> {
            Ok(Box::new(FixedExploiter {
                findings: self.findings,
                hang: self.hang,
            }))
        }
    }

    fn orchestrator(findings: usize, hang: bool) -> ScanOrchestrator {
        ScanOrchestrator::new(
            Arc::new(config::ScanConfig::default()),
            Arc::new(FixedExploiters { findings, hang }),
            Arc::new(StandardReportFactory),
        )
    }

    fn cli_with_output(output: &std::path::Path) -> Cli {
        Cli::try_parse_from([
            "webscan",
            "https://example.com",
            "--format",
            "both",
            "-o",
            output.to_str().unwrap(),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_output_write_error_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let cli = cli_with_output(&dir.path().join("missing-dir").join("results"));

        let (result, termination) =
            drive(&cli, &orchestrator(0, false), std::future::pending()).await;

        assert!(matches!(termination, Some(Termination::Fatal(_))));
        assert!(result.is_some());
        assert_eq!(exit_code(result.as_ref(), termination.as_ref()), EXIT_FATAL);
    }

    #[tokio::test]
    async fn test_completed_run_exit_follows_findings() {
        let dir = tempfile::tempdir().unwrap();
        let cli = cli_with_output(&dir.path().join("results"));

        let (result, termination) =
            drive(&cli, &orchestrator(2, false), std::future::pending()).await;
        assert!(termination.is_none());
        assert_eq!(exit_code(result.as_ref(), None), EXIT_FINDINGS);
        assert!(dir.path().join("results.json").exists());
        assert!(dir.path().join("results.html").exists());

        let (result, termination) =
            drive(&cli, &orchestrator(0, false), std::future::pending()).await;
        assert_eq!(exit_code(result.as_ref(), termination.as_ref()), EXIT_CLEAN);
    }

    #[tokio::test]
    async fn test_interrupt_during_scan() {
        let dir = tempfile::tempdir().unwrap();
        let cli = cli_with_output(&dir.path().join("results"));

        let (result, termination) = drive(
            &cli,
            &orchestrator(3, true),
            futures::future::ready(Ok(())),
        )
        .await;

        assert!(matches!(termination, Some(Termination::Interrupted)));
        assert!(result.is_none());
        assert_eq!(exit_code(result.as_ref(), termination.as_ref()), EXIT_INTERRUPTED);
        assert!(!dir.path().join("results.json").exists());
    }

    #[test]
    fn test_summary_flags_incomplete_scans() {
        let mut result = ScanResult::new("gopher://example.com", cli::ScanType::Full);
        assert_eq!(summarize(&result), Summary::Clean);

        result.failure = Some(ScanFailure::new(Stage::Setup, "unsupported scheme"));
        assert_eq!(summarize(&result), Summary::Incomplete(0));
        assert_eq!(exit_code(Some(&result), None), EXIT_CLEAN);

        result.vulnerabilities = vec![json!({"id": 1})];
        assert_eq!(summarize(&result), Summary::Incomplete(1));

        result.failure = None;
        assert_eq!(summarize(&result), Summary::Findings(1));
    }
}
