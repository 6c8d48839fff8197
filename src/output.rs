use std::ffi::OsString;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::cli::OutputFormat;
use crate::scanner::ScanResult;

pub struct OutputWriter {
    format: OutputFormat,
    file: Option<PathBuf>,
}

impl OutputWriter {
    pub fn new(format: OutputFormat, file: Option<PathBuf>) -> Self {
        Self { format, file }
    }

    /// Write the result, returning the files created (empty when printing to stdout).
    pub fn write(&self, result: &ScanResult) -> Result<Vec<PathBuf>> {
        match &self.file {
            Some(base) => self.write_files(base, result),
            None => {
                let stdout = io::stdout();
                let mut handle = stdout.lock();
                self.write_to(&mut handle, result)?;
                Ok(Vec::new())
            }
        }
    }

    /// Print the JSON form of the full result, whatever the requested format.
    pub fn write_to<W: Write>(&self, out: &mut W, result: &ScanResult) -> Result<()> {
        let json = format_json(result)?;
        out.write_all(json.as_bytes())?;
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(())
    }

    fn write_files(&self, base: &Path, result: &ScanResult) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();

        if self.format.includes_json() {
            let path = with_suffix(base, "json");
            write_file(&path, &format_json(result)?)?;
            written.push(path);
        }

        if self.format.includes_html() {
            let path = with_suffix(base, "html");
            write_file(&path, result.html_report.as_deref().unwrap_or_default())?;
            written.push(path);
        }

        Ok(written)
    }
}

fn format_json(result: &ScanResult) -> Result<String> {
    Ok(serde_json::to_string_pretty(result)?)
}

/// `results` -> `results.json`; an existing extension is kept (`out.v1` -> `out.v1.json`)
fn with_suffix(base: &Path, extension: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(content.as_bytes())
        .with_context(|| format!("writing {}", path.display()))?;
    writer.flush()?;
    Ok(())
}
