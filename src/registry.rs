//! Labeled metric names and an in-process metrics container.
//!
//! `MetricsContainer` hands out shared histogram and counter cells keyed by
//! [`MetricName`], renders their cumulative state for the reporting gate and
//! resets them in place.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;

use crate::histogram::{BucketType, Histogram, HistogramSummary};
use crate::reporting::CumulativeMetrics;

/// Errors returned by a metric registry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("Histogram {name} already registered with {existing:?}, requested {requested:?}")]
    BucketTypeMismatch {
        name: String,
        existing: BucketType,
        requested: BucketType,
    },
}

/// URN-style metric identity plus an ordered label set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricName {
    urn: String,
    labels: BTreeMap<String, String>,
}

impl MetricName {
    /// Unlabeled name.
    pub fn new(urn: impl Into<String>) -> Self {
        Self {
            urn: urn.into(),
            labels: BTreeMap::new(),
        }
    }

    /// Name with a full label set.
    pub fn named<I, K, V>(urn: impl Into<String>, labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            urn: urn.into(),
            labels: labels
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn urn(&self) -> &str {
        &self.urn
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// Whether this name is selected by a `(namespace, name)` query.
    ///
    /// URNs are compared by whole `:`-separated segments. `namespace` must
    /// appear as a run of consecutive segments, so `io` and `metric:io` both
    /// select `beam:metric:io:x` but `io` does not select `user:ratio`.
    /// `name` must equal one segment or one label value. Empty query parts
    /// match everything.
    pub fn matches(&self, namespace: &str, name: &str) -> bool {
        let segments: Vec<&str> = self.urn.split(':').collect();
        if !namespace.is_empty() {
            let wanted: Vec<&str> = namespace.split(':').collect();
            if !segments.windows(wanted.len()).any(|run| run == wanted.as_slice()) {
                return false;
            }
        }
        name.is_empty()
            || segments.iter().any(|s| *s == name)
            || self.labels.values().any(|v| v == name)
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.urn)?;
        if self.labels.is_empty() {
            return Ok(());
        }
        f.write_str("{")?;
        for (i, (k, v)) in self.labels.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{k}={v}")?;
        }
        f.write_str("}")
    }
}

/// Produces shared histogram handles for a metric identity.
pub trait MetricRegistry: Send + Sync {
    /// Return the histogram for `name`, creating it with `bucket_type` on
    /// first use.
    fn histogram(
        &self,
        name: &MetricName,
        bucket_type: BucketType,
    ) -> Result<Arc<Histogram>, RegistryError>;
}

impl<R: MetricRegistry + ?Sized> MetricRegistry for Arc<R> {
    fn histogram(
        &self,
        name: &MetricName,
        bucket_type: BucketType,
    ) -> Result<Arc<Histogram>, RegistryError> {
        (**self).histogram(name, bucket_type)
    }
}

/// Snapshot of all metrics in a container.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub histograms: BTreeMap<String, HistogramSummary>,
}

/// Concurrent store of counters and histograms.
pub struct MetricsContainer {
    counters: DashMap<MetricName, Arc<AtomicU64>>,
    histograms: DashMap<MetricName, Arc<Histogram>>,
    histogram_unit: String,
}

impl MetricsContainer {
    /// Create an empty container whose histograms are reported in milliseconds.
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
            histograms: DashMap::new(),
            histogram_unit: "ms".to_string(),
        }
    }

    /// Unit appended to histogram percentiles in cumulative strings.
    pub fn with_histogram_unit(mut self, unit: impl Into<String>) -> Self {
        self.histogram_unit = unit.into();
        self
    }

    /// Counter handle for `name`, usable through the `metrics` facade.
    pub fn counter(&self, name: &MetricName) -> metrics::Counter {
        metrics::Counter::from_arc(self.counter_cell(name))
    }

    /// Current value of the counter for `name`, if it exists.
    pub fn counter_value(&self, name: &MetricName) -> Option<u64> {
        self.counters
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
    }

    /// Histogram handle for `name`, usable through the `metrics` facade.
    pub fn facade_histogram(
        &self,
        name: &MetricName,
        bucket_type: BucketType,
    ) -> Result<metrics::Histogram, RegistryError> {
        self.histogram(name, bucket_type)
            .map(metrics::Histogram::from_arc)
    }

    /// Point-in-time copy of every counter and histogram summary.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self
                .counters
                .iter()
                .map(|e| (e.key().to_string(), e.value().load(Ordering::Relaxed)))
                .collect(),
            histograms: self
                .histograms
                .iter()
                .map(|e| (e.key().to_string(), e.value().summary()))
                .collect(),
        }
    }

    fn counter_cell(&self, name: &MetricName) -> Arc<AtomicU64> {
        if let Some(cell) = self.counters.get(name) {
            return Arc::clone(cell.value());
        }
        Arc::clone(
            self.counters
                .entry(name.clone())
                .or_insert_with(|| Arc::new(AtomicU64::new(0)))
                .value(),
        )
    }
}

impl Default for MetricsContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MetricsContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsContainer")
            .field("counters", &self.counters.len())
            .field("histograms", &self.histograms.len())
            .finish()
    }
}

impl MetricRegistry for MetricsContainer {
    fn histogram(
        &self,
        name: &MetricName,
        bucket_type: BucketType,
    ) -> Result<Arc<Histogram>, RegistryError> {
        let histogram = match self.histograms.get(name) {
            Some(existing) => Arc::clone(existing.value()),
            None => Arc::clone(
                self.histograms
                    .entry(name.clone())
                    .or_insert_with(|| Arc::new(Histogram::new(bucket_type)))
                    .value(),
            ),
        };

        if *histogram.bucket_type() != bucket_type {
            tracing::warn!(metric = %name, "histogram requested with a different bucket scheme");
            return Err(RegistryError::BucketTypeMismatch {
                name: name.to_string(),
                existing: *histogram.bucket_type(),
                requested: bucket_type,
            });
        }
        Ok(histogram)
    }
}

impl CumulativeMetrics for MetricsContainer {
    /// One `<name> = <value>` line per matching metric, counters first.
    fn cumulative_string(&self, namespace: &str, name: &str) -> String {
        let mut counters: Vec<(String, u64)> = self
            .counters
            .iter()
            .filter(|e| e.key().matches(namespace, name))
            .map(|e| (e.key().to_string(), e.value().load(Ordering::Relaxed)))
            .collect();
        counters.sort();

        let mut histograms: Vec<(String, String)> = self
            .histograms
            .iter()
            .filter(|e| e.key().matches(namespace, name))
            .map(|e| {
                (
                    e.key().to_string(),
                    e.value().percentile_string(&self.histogram_unit),
                )
            })
            .collect();
        histograms.sort();

        let mut out = String::new();
        for (key, value) in counters {
            out.push_str(&format!("{key} = {value}\n"));
        }
        for (key, value) in histograms {
            out.push_str(&format!("{key} = {value}\n"));
        }
        out
    }

    fn reset(&self) {
        for counter in self.counters.iter() {
            counter.value().store(0, Ordering::Relaxed);
        }
        for histogram in self.histograms.iter() {
            histogram.value().clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buckets() -> BucketType {
        BucketType::linear(0.0, 20.0, 3000).unwrap()
    }

    #[test]
    fn test_metric_name_display() {
        assert_eq!(MetricName::new("io:latency").to_string(), "io:latency");
        let name = MetricName::named("io:latency", [("service", "storage"), ("method", "get")]);
        assert_eq!(name.to_string(), "io:latency{method=get,service=storage}");
    }

    #[test]
    fn test_metric_name_matching() {
        let name = MetricName::new("io:latency").with_label("method", "get");
        assert!(name.matches("", ""));
        assert!(name.matches("io", ""));
        assert!(name.matches("io", "get"));
        assert!(name.matches("io", "latency"));
        assert!(!name.matches("user", ""));
        assert!(!name.matches("io", "put"));
    }

    #[test]
    fn test_matching_uses_whole_segments() {
        let ratio = MetricName::new("user:ratio");
        assert!(!ratio.matches("io", ""));
        assert!(!ratio.matches("user", "rat"));
        assert!(!MetricName::new("superuser:x").matches("user", ""));

        let latency = MetricName::new("beam:metric:io:api_request_latencies:v1");
        assert!(latency.matches("io", ""));
        assert!(latency.matches("metric:io", "api_request_latencies"));
        assert!(!latency.matches("io:metric", ""));
        assert!(!latency.matches("io", "api_request"));
    }

    #[test]
    fn test_cumulative_string_skips_partial_segment_matches() {
        let container = MetricsContainer::new();
        container.counter(&MetricName::new("user:ratio")).increment(1);
        container.counter(&MetricName::new("io:reads")).increment(2);
        assert_eq!(container.cumulative_string("io", ""), "io:reads = 2\n");
    }

    #[test]
    fn test_histogram_same_name_returns_same_cell() {
        let container = MetricsContainer::new();
        let name = MetricName::new("io:latency");
        let a = container.histogram(&name, buckets()).unwrap();
        let b = container.histogram(&name, buckets()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_histogram_bucket_mismatch_is_error() {
        let container = MetricsContainer::new();
        let name = MetricName::new("io:latency");
        container.histogram(&name, buckets()).unwrap();
        let other = BucketType::linear(0.0, 10.0, 10).unwrap();
        let err = container.histogram(&name, other).unwrap_err();
        assert!(matches!(err, RegistryError::BucketTypeMismatch { .. }));
        assert!(err.to_string().contains("io:latency"));
    }

    #[test]
    fn test_counter_through_facade() {
        let container = MetricsContainer::new();
        let name = MetricName::new("user:elements").with_label("step", "parse");
        let counter = container.counter(&name);
        counter.increment(3);
        container.counter(&name).increment(2);
        assert_eq!(container.counter_value(&name), Some(5));
        assert_eq!(container.counter_value(&MetricName::new("missing")), None);
    }

    #[test]
    fn test_facade_histogram_records_into_cell() {
        let container = MetricsContainer::new();
        let name = MetricName::new("io:latency");
        container
            .facade_histogram(&name, buckets())
            .unwrap()
            .record(45.0);
        assert_eq!(container.histogram(&name, buckets()).unwrap().bucket_count(2), 1);
    }

    #[test]
    fn test_cumulative_string_filters_and_orders() {
        let container = MetricsContainer::new();
        container
            .counter(&MetricName::new("user:b").with_label("name", "rows"))
            .increment(7);
        container.counter(&MetricName::new("user:a")).increment(1);
        container.counter(&MetricName::new("system:c")).increment(9);
        container
            .histogram(&MetricName::new("user:latency"), buckets())
            .unwrap()
            .update(37.0);

        let all_user = container.cumulative_string("user", "");
        assert_eq!(
            all_user,
            "user:a = 1\n\
             user:b{name=rows} = 7\n\
             user:latency = Total number of samples: 1, P99: 40 ms, P90: 40 ms, P50: 40 ms\n"
        );
        assert_eq!(container.cumulative_string("user", "rows"), "user:b{name=rows} = 7\n");
        assert_eq!(container.cumulative_string("nothing", ""), "");
    }

    #[test]
    fn test_reset_keeps_handles_working() {
        let container = MetricsContainer::new();
        let name = MetricName::new("user:a");
        let counter = container.counter(&name);
        let histogram = container
            .histogram(&MetricName::new("io:latency"), buckets())
            .unwrap();
        counter.increment(4);
        histogram.update(10.0);

        container.reset();
        assert_eq!(container.counter_value(&name), Some(0));
        assert_eq!(histogram.total_count(), 0);

        counter.increment(1);
        histogram.update(10.0);
        assert_eq!(container.counter_value(&name), Some(1));
        assert_eq!(histogram.total_count(), 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let container = MetricsContainer::new().with_histogram_unit("us");
        container.counter(&MetricName::new("user:a")).increment(2);
        container
            .histogram(&MetricName::new("io:latency"), buckets())
            .unwrap()
            .update(5.0);
        let snapshot = container.snapshot();
        assert_eq!(snapshot.counters.get("user:a"), Some(&2));
        assert_eq!(snapshot.histograms["io:latency"].count, 1);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["counters"]["user:a"], 2);
        assert_eq!(json["histograms"]["io:latency"]["max"], 5.0);
        assert!(container.cumulative_string("io", "").contains("P50: 20 us"));
    }
}
