//! Process-level configuration.
//!
//! # Responsibility
//! - Describe store and logging settings in one explicit value.
//! - Load and validate that value once at process start.
//!
//! # Invariants
//! - Components receive configuration by reference; there is no ambient
//!   global configuration.
//! - A validated config never carries a zero busy timeout or idle cap.

use crate::tx::IsolationLevel;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MAX_IDLE_CONNECTIONS: usize = 4;
const DEFAULT_LOG_FILE_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_LOG_FILES_KEPT: usize = 5;

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid config json: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// Root configuration object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoreConfig {
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

/// Backing store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Database file. `None` opens a private ephemeral database that is
    /// discarded when the pool closes.
    pub path: Option<PathBuf>,
    /// Upper bound on lock waits; elapsed waits surface as `unavailable`.
    pub busy_timeout_ms: u64,
    pub max_idle_connections: usize,
    /// Isolation used when a unit of work does not request one.
    pub default_isolation: IsolationLevel,
    pub foreign_keys: bool,
    /// Use WAL journaling for file databases. Ephemeral databases always do.
    pub wal: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            max_idle_connections: DEFAULT_MAX_IDLE_CONNECTIONS,
            default_isolation: IsolationLevel::Serializable,
            foreign_keys: true,
            wal: true,
        }
    }
}

/// Severity threshold for file logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    #[serde(alias = "warning")]
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn filter(self) -> log::LevelFilter {
        match self {
            Self::Trace => log::LevelFilter::Trace,
            Self::Debug => log::LevelFilter::Debug,
            Self::Info => log::LevelFilter::Info,
            Self::Warn => log::LevelFilter::Warn,
            Self::Error => log::LevelFilter::Error,
        }
    }
}

/// `debug` in debug builds, `info` in release builds.
impl Default for LogLevel {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Debug
        } else {
            Self::Info
        }
    }
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logging bootstrap settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: LogLevel,
    /// Absolute log directory. File logging stays off when unset.
    pub log_dir: Option<PathBuf>,
    /// Size at which the active file rotates.
    pub max_file_bytes: u64,
    /// Rotated files kept besides the active one.
    pub keep_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            log_dir: None,
            max_file_bytes: DEFAULT_LOG_FILE_BYTES,
            keep_files: DEFAULT_LOG_FILES_KEPT,
        }
    }
}

impl CoreConfig {
    /// Parses and validates a JSON config document.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.store.validate()?;
        self.logging.validate()
    }
}

impl StoreConfig {
    /// Ephemeral store with defaults.
    pub fn ephemeral() -> Self {
        Self::default()
    }

    /// File-backed store with defaults.
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.busy_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "store.busy_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_idle_connections == 0 {
            return Err(ConfigError::Invalid(
                "store.max_idle_connections must be greater than zero".to_string(),
            ));
        }
        if !crate::tx::sqlite_supports(self.default_isolation) {
            return Err(ConfigError::Invalid(format!(
                "store.default_isolation `{}` is not supported by sqlite",
                self.default_isolation
            )));
        }
        if self
            .path
            .as_ref()
            .is_some_and(|path| path.as_os_str().is_empty())
        {
            return Err(ConfigError::Invalid(
                "store.path cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl LoggingConfig {
    /// File logging into `log_dir` with default level and rotation.
    pub fn to_dir(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: Some(log_dir.into()),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(dir) = self.log_dir.as_deref() {
            if dir.as_os_str().is_empty() || !dir.is_absolute() {
                return Err(ConfigError::Invalid(format!(
                    "logging.log_dir must be an absolute path, got `{}`",
                    dir.display()
                )));
            }
        }
        if self.max_file_bytes == 0 {
            return Err(ConfigError::Invalid(
                "logging.max_file_bytes must be greater than zero".to_string(),
            ));
        }
        if self.keep_files == 0 {
            return Err(ConfigError::Invalid(
                "logging.keep_files must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
