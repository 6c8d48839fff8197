use crate::cli::ScanType;

/// One discrete stage of a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Reconnaissance,
    VulnerabilityScan,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Reconnaissance => write!(f, "reconnaissance"),
            Phase::VulnerabilityScan => write!(f, "vulnerability scan"),
        }
    }
}

/// Phases to run for a scan type, in execution order.
///
/// Reconnaissance always precedes the vulnerability scan.
pub fn phases_for(scan_type: ScanType) -> &'static [Phase] {
    match scan_type {
        ScanType::Recon => &[Phase::Reconnaissance],
        ScanType::Scan => &[Phase::VulnerabilityScan],
        ScanType::Full => &[Phase::Reconnaissance, Phase::VulnerabilityScan],
    }
}
