use crate::scanner::ScanResult;

pub const EXIT_CLEAN: u8 = 0;
pub const EXIT_FINDINGS: u8 = 1;
/// Shares its value with [`EXIT_FINDINGS`]; CI consumers see both as failure.
pub const EXIT_FATAL: u8 = 1;
pub const EXIT_INTERRUPTED: u8 = 130;

/// How the invocation ended outside the scan's own fail-soft boundary
#[derive(Debug)]
pub enum Termination {
    /// Ctrl-C or SIGINT before the run completed
    Interrupted,
    /// Error raised around the pipeline, e.g. while writing output
    Fatal(anyhow::Error),
}

/// Map the scan result and any outer termination to a process exit code.
///
/// Interruption wins over everything; a fatal error wins over the findings count.
pub fn exit_code(result: Option<&ScanResult>, termination: Option<&Termination>) -> u8 {
    match termination {
        Some(Termination::Interrupted) => EXIT_INTERRUPTED,
        Some(Termination::Fatal(_)) => EXIT_FATAL,
        None => match result {
            Some(result) if result.has_findings() => EXIT_FINDINGS,
            _ => EXIT_CLEAN,
        },
    }
}
