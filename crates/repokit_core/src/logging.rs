//! File logging driven by [`LoggingConfig`].
//!
//! # Responsibility
//! - Start one rotating file logger per process from validated config.
//! - Capture panics as metadata-only events.
//!
//! # Invariants
//! - Starting twice with an equal config is a no-op; any other config is
//!   rejected while a logger is active.
//! - Starting never panics.
//! - Events carry metadata only (`event=... module=... status=...`), never
//!   entity payloads.

use crate::config::{ConfigError, LogLevel, LoggingConfig};
use flexi_logger::{
    Cleanup, Criterion, FileSpec, FlexiLoggerError, Logger, LoggerHandle, Naming, WriteMode,
};
use log::{error, info};
use once_cell::sync::OnceCell;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

const LOG_FILE_BASENAME: &str = "repokit";
const PANIC_PAYLOAD_LIMIT: usize = 160;

static ACTIVE: OnceCell<ActiveLogger> = OnceCell::new();
static PANIC_HOOK: OnceCell<()> = OnceCell::new();

struct ActiveLogger {
    config: LoggingConfig,
    _handle: LoggerHandle,
}

#[derive(Debug)]
pub enum LoggingError {
    Config(ConfigError),
    CreateDir { dir: PathBuf, source: std::io::Error },
    Backend(FlexiLoggerError),
    /// A logger with different settings is already running.
    AlreadyActive { active: LoggingConfig },
}

impl Display for LoggingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "{err}"),
            Self::CreateDir { dir, source } => {
                write!(f, "cannot create log directory `{}`: {source}", dir.display())
            }
            Self::Backend(err) => write!(f, "cannot start file logger: {err}"),
            Self::AlreadyActive { active } => write!(
                f,
                "logging already active at level `{}` in `{}`",
                active.level,
                active
                    .log_dir
                    .as_deref()
                    .map_or_else(|| "-".into(), Path::to_string_lossy)
            ),
        }
    }
}

impl Error for LoggingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::CreateDir { source, .. } => Some(source),
            Self::Backend(err) => Some(err),
            Self::AlreadyActive { .. } => None,
        }
    }
}

/// Starts file logging as `config` describes.
///
/// Returns `Ok(false)` without touching the logger when `log_dir` is unset,
/// `Ok(true)` once a logger matching `config` is running.
pub fn init_logging(config: &LoggingConfig) -> Result<bool, LoggingError> {
    config.validate().map_err(LoggingError::Config)?;
    let Some(dir) = config.log_dir.as_deref() else {
        return Ok(false);
    };

    let active = ACTIVE.get_or_try_init(|| start(config, dir))?;
    if active.config != *config {
        return Err(LoggingError::AlreadyActive {
            active: active.config.clone(),
        });
    }
    Ok(true)
}

/// Level and directory of the running logger, if any.
pub fn active_logging() -> Option<(LogLevel, PathBuf)> {
    let active = ACTIVE.get()?;
    let dir = active.config.log_dir.clone()?;
    Some((active.config.level, dir))
}

fn start(config: &LoggingConfig, dir: &Path) -> Result<ActiveLogger, LoggingError> {
    std::fs::create_dir_all(dir).map_err(|source| LoggingError::CreateDir {
        dir: dir.to_path_buf(),
        source,
    })?;

    let handle = Logger::with(config.level.filter())
        .log_to_file(FileSpec::default().directory(dir).basename(LOG_FILE_BASENAME))
        .rotate(
            Criterion::Size(config.max_file_bytes),
            Naming::Numbers,
            Cleanup::KeepLogFiles(config.keep_files),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        .format_for_files(flexi_logger::detailed_format)
        .start()
        .map_err(LoggingError::Backend)?;

    install_panic_hook();
    info!(
        "event=logging_start module=logging status=ok level={} log_dir={} max_file_bytes={} keep_files={} version={}",
        config.level,
        dir.display(),
        config.max_file_bytes,
        config.keep_files,
        env!("CARGO_PKG_VERSION")
    );

    Ok(ActiveLogger {
        config: config.clone(),
        _handle: handle,
    })
}

fn install_panic_hook() {
    if PANIC_HOOK.set(()).is_err() {
        return;
    }

    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map_or_else(|| "unknown".to_string(), |loc| format!("{}:{}", loc.file(), loc.line()));
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| info.payload().downcast_ref::<String>().map(String::as_str))
            .unwrap_or("non-string panic payload");
        error!(
            "event=panic_captured module=logging status=error location={} payload={}",
            location,
            single_line(payload, PANIC_PAYLOAD_LIMIT)
        );
        previous(info);
    }));
}

/// Flattens `value` onto one line of at most `limit` chars, marking cuts
/// with `...`.
fn single_line(value: &str, limit: usize) -> String {
    let flat = value.replace(['\n', '\r'], " ");
    if flat.chars().count() <= limit {
        return flat;
    }
    let mut cut: String = flat.chars().take(limit).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::{active_logging, init_logging, single_line, LoggingError};
    use crate::config::{LogLevel, LoggingConfig};
    use uuid::Uuid;

    #[test]
    fn unset_directory_leaves_logging_off() {
        assert!(!init_logging(&LoggingConfig::default()).unwrap());
    }

    #[test]
    fn invalid_config_is_rejected_before_start() {
        let config = LoggingConfig {
            keep_files: 0,
            ..LoggingConfig::to_dir("/unused")
        };
        assert!(matches!(
            init_logging(&config),
            Err(LoggingError::Config(_))
        ));
    }

    #[test]
    fn single_line_flattens_and_truncates() {
        assert_eq!(single_line("a\nb", 10), "a b");
        let cut = single_line("line1\nline2\rline3", 8);
        assert_eq!(cut, "line1 li...");
    }

    #[test]
    fn equal_config_is_idempotent_and_other_configs_conflict() {
        let root =
            std::env::temp_dir().join(format!("repokit-logging-{}", Uuid::new_v4().simple()));
        let config = LoggingConfig {
            level: LogLevel::Info,
            ..LoggingConfig::to_dir(root.join("logs"))
        };

        assert!(init_logging(&config).unwrap());
        assert!(init_logging(&config).unwrap());

        let louder = LoggingConfig {
            level: LogLevel::Debug,
            ..config.clone()
        };
        let err = init_logging(&louder).unwrap_err();
        assert!(matches!(err, LoggingError::AlreadyActive { .. }));
        assert!(err.to_string().contains("level `info`"));

        let elsewhere = LoggingConfig::to_dir(root.join("other"));
        assert!(init_logging(&elsewhere).is_err());

        let (level, active_dir) = active_logging().unwrap();
        assert_eq!(level, LogLevel::Info);
        assert_eq!(active_dir, root.join("logs"));
        assert!(active_dir.exists());
    }
}
