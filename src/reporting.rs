//! Rate-limited reporting of cumulative metrics.
//!
//! A [`ReportingGate`] is built once per process and shared by reference.
//! Hot paths call [`ReportingGate::try_report`] as often as they like; at most
//! one caller at a time composes a report, and reports are spaced by at least
//! the requested interval. A busy gate never blocks the caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;

use crate::clock::{Clock, SystemClock};
use crate::config::ReportConfig;

/// Destination for composed report lines.
pub trait ReportSink: Send + Sync {
    fn emit(&self, line: &str);
}

impl<F> ReportSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn emit(&self, line: &str) {
        self(line)
    }
}

/// Sink that writes each report as one `info` event on the `metrics` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn emit(&self, line: &str) {
        tracing::info!(target: "metrics", "{}", line);
    }
}

/// Aggregate metric state that can be rendered and cleared.
pub trait CumulativeMetrics: Send + Sync {
    /// Human-readable state of the metrics selected by `(namespace, name)`.
    fn cumulative_string(&self, namespace: &str, name: &str) -> String;

    /// Clear all aggregate state.
    fn reset(&self);
}

impl<M: CumulativeMetrics + ?Sized> CumulativeMetrics for Arc<M> {
    fn cumulative_string(&self, namespace: &str, name: &str) -> String {
        (**self).cumulative_string(namespace, name)
    }

    fn reset(&self) {
        (**self).reset()
    }
}

/// What a call to [`ReportingGate::try_report`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// A line was emitted.
    Reported,
    /// Another caller held the gate.
    Contended,
    /// The interval since the last report has not elapsed.
    Throttled,
}

/// Process-wide throttle for cumulative metric reports.
pub struct ReportingGate<C = SystemClock> {
    lock: Mutex<()>,
    // Written only while `lock` is held.
    last_reported_ms: AtomicU64,
    clock: C,
    sink: Arc<dyn ReportSink>,
}

impl ReportingGate<SystemClock> {
    /// Gate on the wall clock that logs through `tracing`.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(TracingSink), SystemClock)
    }
}

impl Default for ReportingGate<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> ReportingGate<C> {
    /// The cooldown starts at construction time.
    pub fn with_clock(sink: Arc<dyn ReportSink>, clock: C) -> Self {
        let now = clock.now_millis();
        Self {
            lock: Mutex::new(()),
            last_reported_ms: AtomicU64::new(now),
            clock,
            sink,
        }
    }

    /// Clock reading of the last emitted report, or of construction.
    pub fn last_reported_millis(&self) -> u64 {
        self.last_reported_ms.load(Ordering::Acquire)
    }

    /// Report the cumulative state of `(namespace, name)` from `metrics` if
    /// the gate is free and more than `min_interval` has passed since the last
    /// report.
    ///
    /// The line is `header`, then the cumulative string, then (when
    /// `reset_after_report` is set) a trailer with the previous report time.
    /// Metrics are reset before the trailer is appended. The gate is released
    /// on every exit, including a panic from `metrics` or the sink.
    pub fn try_report<M>(
        &self,
        metrics: &M,
        header: &str,
        namespace: &str,
        name: &str,
        min_interval: Duration,
        reset_after_report: bool,
    ) -> ReportOutcome
    where
        M: CumulativeMetrics + ?Sized,
    {
        let Some(_guard) = self.lock.try_lock() else {
            tracing::trace!("metrics report skipped, gate busy");
            return ReportOutcome::Contended;
        };

        let now = self.clock.now_millis();
        let last = self.last_reported_ms.load(Ordering::Acquire);
        if u128::from(now.saturating_sub(last)) <= min_interval.as_millis() {
            return ReportOutcome::Throttled;
        }

        let mut line = String::from(header);
        line.push_str(&metrics.cumulative_string(namespace, name));
        if reset_after_report {
            metrics.reset();
            line.push_str(&format!("(last reported at {})\n", format_millis(last)));
        }
        self.sink.emit(&line);
        self.last_reported_ms.fetch_max(now, Ordering::AcqRel);
        ReportOutcome::Reported
    }

    /// [`try_report`](Self::try_report) with header, interval and reset
    /// policy taken from `config`.
    pub fn try_report_with<M>(
        &self,
        metrics: &M,
        config: &ReportConfig,
        namespace: &str,
        name: &str,
    ) -> ReportOutcome
    where
        M: CumulativeMetrics + ?Sized,
    {
        self.try_report(
            metrics,
            &config.header,
            namespace,
            name,
            config.min_interval,
            config.reset_after_report,
        )
    }
}

fn format_millis(ms: u64) -> String {
    i64::try_from(ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| format!("{ms}ms"))
}
