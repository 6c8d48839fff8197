use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_MAX_THREADS: usize = 10;
pub const DEFAULT_TIMEOUT_SECS: f64 = 30.0;
pub const DEFAULT_USER_AGENT: &str = "webscan Security Scanner";
pub const DEFAULT_RATE_LIMIT_DELAY_SECS: f64 = 0.5;
/// Largest `max_threads` a semaphore can hand out permits for
pub const MAX_THREADS_LIMIT: usize = tokio::sync::Semaphore::MAX_PERMITS;

/// Scan settings handed to the collaborators.
///
/// Every field is always populated; keys missing from the settings file take
/// their default value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub max_threads: usize,
    /// Seconds
    pub timeout: f64,
    pub user_agent: String,
    /// Seconds to wait after each request
    pub rate_limit_delay: f64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_threads: DEFAULT_MAX_THREADS,
            timeout: DEFAULT_TIMEOUT_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            rate_limit_delay: DEFAULT_RATE_LIMIT_DELAY_SECS,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed settings in {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid setting: {0}")]
    Invalid(String),
}

impl ScanConfig {
    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_threads == 0 || self.max_threads > MAX_THREADS_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "max_threads must be between 1 and {}",
                MAX_THREADS_LIMIT
            )));
        }

        if self.timeout <= 0.0 || Duration::try_from_secs_f64(self.timeout).is_err() {
            return Err(ConfigError::Invalid(
                "timeout must be a positive number of seconds within Duration range".into(),
            ));
        }

        if Duration::try_from_secs_f64(self.rate_limit_delay).is_err() {
            return Err(ConfigError::Invalid(
                "rate_limit_delay must be a non-negative number of seconds within Duration range".into(),
            ));
        }

        Ok(())
    }

    /// Timeout as a `Duration`; out-of-range values fall back to the default
    pub fn timeout_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout)
            .unwrap_or_else(|_| Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS))
    }

    pub fn rate_limit_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.rate_limit_delay)
            .unwrap_or_else(|_| Duration::from_secs_f64(DEFAULT_RATE_LIMIT_DELAY_SECS))
    }
}

/// Locates and loads the settings file.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    path: PathBuf,
}

impl ConfigResolver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Resolver for an explicit path, or the standard location when none is given
    pub fn from_override(path: Option<PathBuf>) -> Self {
        Self::new(path.unwrap_or_else(Self::default_path))
    }

    /// Get the path to the standard settings file
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("webscan");
        path.push("settings.json");
        path
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the settings file, falling back to the defaults on any failure.
    pub fn resolve(&self) -> ScanConfig {
        match self.load() {
            Ok(config) => {
                debug!(path = %self.path.display(), "loaded scan settings");
                config
            }
            Err(e) => {
                debug!("using default scan settings: {:#}", anyhow::Error::from(e));
                ScanConfig::default()
            }
        }
    }

    fn load(&self) -> Result<ScanConfig, ConfigError> {
        let content = fs::read_to_string(&self.path).map_err(|source| ConfigError::Read {
            path: self.path.clone(),
            source,
        })?;
        let config: ScanConfig =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: self.path.clone(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }
}
