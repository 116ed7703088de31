//! Telemetry configuration loading from environment variables.
//!
//! Missing or invalid values fall back to defaults without failing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `TELEMETRY_REPORT_INTERVAL_MS` | 60000 | Minimum gap between reports (ms) |
//! | `TELEMETRY_RESET_AFTER_REPORT` | false | Reset cumulative metrics after each report |
//! | `TELEMETRY_REPORT_HEADER` | `Metrics report:\n` | Prefix of each report line |
//! | `TELEMETRY_LOG_LEVEL` | info | Tracing filter directive |
//! | `TELEMETRY_LOG_FORMAT` | json | `json` or `pretty` |

use std::time::Duration;

use crate::telemetry::{LogConfig, LogFormat};

pub const DEFAULT_REPORT_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_REPORT_HEADER: &str = "Metrics report:\n";

/// Settings passed to each `ReportingGate::try_report` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportConfig {
    pub header: String,
    pub min_interval: Duration,
    pub reset_after_report: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            header: DEFAULT_REPORT_HEADER.to_string(),
            min_interval: Duration::from_millis(DEFAULT_REPORT_INTERVAL_MS),
            reset_after_report: false,
        }
    }
}

/// All telemetry configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub report: ReportConfig,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl TelemetryConfig {
    /// Logging setup derived from this configuration, writing to stderr.
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            format: self.log_format,
            level: self.log_level.clone(),
            output_path: None,
        }
    }
}

fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_bool(key: &str, default: bool) -> bool {
    let Ok(val) = std::env::var(key) else {
        return default;
    };
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => true,
        "0" | "false" | "no" => false,
        _ => default,
    }
}

fn parse_format(key: &str) -> LogFormat {
    match std::env::var(key) {
        Ok(val) if val.trim().eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
        _ => LogFormat::Json,
    }
}

/// Load all configuration from environment variables.
pub fn load() -> TelemetryConfig {
    let min_interval_ms = parse_u64("TELEMETRY_REPORT_INTERVAL_MS", DEFAULT_REPORT_INTERVAL_MS);
    let header = std::env::var("TELEMETRY_REPORT_HEADER")
        .unwrap_or_else(|_| DEFAULT_REPORT_HEADER.to_string());
    let log_level = std::env::var("TELEMETRY_LOG_LEVEL")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| "info".to_string());

    TelemetryConfig {
        report: ReportConfig {
            header,
            min_interval: Duration::from_millis(min_interval_ms),
            reset_after_report: parse_bool("TELEMETRY_RESET_AFTER_REPORT", false),
        },
        log_level,
        log_format: parse_format("TELEMETRY_LOG_FORMAT"),
    }
}
