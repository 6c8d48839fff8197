use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Logging setup for one process invocation
#[derive(Debug, Clone)]
pub struct LogSettings {
    pub verbose: bool,
    pub file: Option<PathBuf>,
    pub ansi: bool,
}

impl LogSettings {
    /// Default directive when `RUST_LOG` is unset
    pub fn default_directive(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "info"
        }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.default_directive()))
    }
}

/// Install the global subscriber: console on stderr plus an append-only log file.
///
/// Stdout stays reserved for scan output. A log file that cannot be opened is
/// reported and skipped.
pub fn init(settings: &LogSettings) -> Result<()> {
    let (log_file, open_error) = match &settings.file {
        Some(path) => match open_log_file(path) {
            Ok(file) => (Some(file), None),
            Err(e) => (None, Some(e)),
        },
        None => (None, None),
    };

    let file_layer = log_file.map(|file| {
        fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_writer(Mutex::new(file))
    });

    tracing_subscriber::registry()
        .with(settings.filter())
        .with(
            fmt::layer()
                .with_ansi(settings.ansi)
                .with_writer(io::stderr),
        )
        .with(file_layer)
        .try_init()
        .context("installing tracing subscriber")?;

    if let Some(e) = open_error {
        warn!("file logging disabled: {:#}", e);
    }

    Ok(())
}

fn open_log_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening log file {}", path.display()))
}
