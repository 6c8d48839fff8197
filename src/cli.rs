use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "webscan")]
#[command(author = "webscan contributors")]
#[command(version)]
#[command(about = "Web security scan orchestrator with CI-friendly exit codes", long_about = None)]
#[command(after_help = "Examples:
  webscan https://example.com --scan-type recon
  webscan https://example.com --scan-type full
  webscan https://example.com --output results --format both

Exit codes: 0 no findings, 1 findings present or fatal error, 130 interrupted")]
pub struct Cli {
    #[arg(help = "Target URL to scan")]
    pub target: String,

    #[arg(long, value_enum, default_value = "full", help = "Type of scan to perform")]
    pub scan_type: ScanType,

    #[arg(short, long, help = "Output file path, without extension (.json/.html are appended)")]
    pub output: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "json", help = "Output format")]
    pub format: OutputFormat,

    #[arg(short, long, help = "Settings file (defaults to <config dir>/webscan/settings.json)")]
    pub config: Option<PathBuf>,

    #[arg(long, default_value = "webscan_scan.log", help = "Append-only log file")]
    pub log_file: PathBuf,

    #[arg(long, help = "Show phase progress on stderr")]
    pub progress: bool,

    #[arg(long, help = "Disable colored output")]
    pub no_color: bool,

    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    #[value(name = "recon", help = "Reconnaissance only")]
    Recon,
    #[value(name = "scan", help = "Vulnerability scan only")]
    Scan,
    #[value(name = "full", help = "Reconnaissance followed by vulnerability scan")]
    Full,
}

impl std::fmt::Display for ScanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanType::Recon => write!(f, "recon"),
            ScanType::Scan => write!(f, "scan"),
            ScanType::Full => write!(f, "full"),
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    #[value(name = "json", help = "JSON output")]
    Json,
    #[value(name = "html", help = "HTML report")]
    Html,
    #[value(name = "both", help = "JSON and HTML")]
    Both,
}

impl OutputFormat {
    pub fn includes_json(self) -> bool {
        matches!(self, OutputFormat::Json | OutputFormat::Both)
    }

    pub fn includes_html(self) -> bool {
        matches!(self, OutputFormat::Html | OutputFormat::Both)
    }
}
