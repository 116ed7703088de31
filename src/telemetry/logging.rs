//! Tracing subscriber installation.
//!
//! Supports JSON and pretty-printed output to stderr or a file. Reports go out
//! on the `metrics` target, so a filter such as `warn,metrics=info` keeps the
//! periodic summaries while silencing everything else.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event.
    #[default]
    Json,
    /// Human-readable multi-line output.
    Pretty,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Filter directive, e.g. `info` or `warn,metrics=info`.
    pub level: String,
    /// Log file. `None` writes to stderr.
    pub output_path: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            level: "info".to_string(),
            output_path: None,
        }
    }
}

/// Errors that can occur while installing the subscriber.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),
    #[error("Failed to open log file {path}: {reason}")]
    FileOpen { path: PathBuf, reason: String },
    #[error("Subscriber already initialized")]
    AlreadyInitialized,
}

/// Install the global subscriber. Call once at startup.
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    let filter = build_filter(&config.level)?;
    let file = config.output_path.as_deref().map(open_log_file).transpose()?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match (config.format, file) {
        (LogFormat::Json, Some(file)) => registry
            .with(fmt::layer().json().with_writer(Mutex::new(file)))
            .try_init(),
        (LogFormat::Json, None) => registry.with(fmt::layer().json()).try_init(),
        (LogFormat::Pretty, Some(file)) => registry
            .with(fmt::layer().pretty().with_ansi(false).with_writer(Mutex::new(file)))
            .try_init(),
        (LogFormat::Pretty, None) => registry.with(fmt::layer().pretty()).try_init(),
    };
    installed.map_err(|_| LogError::AlreadyInitialized)
}

fn build_filter(level: &str) -> Result<EnvFilter, LogError> {
    EnvFilter::try_new(level).map_err(|e| LogError::InvalidFilter(e.to_string()))
}

// Append, so a failed re-initialization never truncates the live log.
fn open_log_file(path: &Path) -> Result<File, LogError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| LogError::FileOpen {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_accepts_target_directives() {
        assert!(build_filter("warn,metrics=info").is_ok());
        assert!(build_filter("info").is_ok());
    }

    #[test]
    fn test_filter_rejects_garbage() {
        let err = build_filter("metrics=loud").unwrap_err();
        assert!(matches!(err, LogError::InvalidFilter(_)));
    }

    #[test]
    fn test_open_log_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no/such/dir/telemetry.log");
        match open_log_file(&missing) {
            Err(LogError::FileOpen { path, .. }) => assert_eq!(path, missing),
            other => panic!("expected FileOpen, got {other:?}"),
        }
    }

    #[test]
    fn test_open_log_file_keeps_existing_contents() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.log");
        std::fs::write(&path, "earlier\n").unwrap();

        let mut file = open_log_file(&path).unwrap();
        file.write_all(b"later\n").unwrap();
        drop(file);

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "earlier\nlater\n");
    }
}
