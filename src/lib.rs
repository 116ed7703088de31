//! Throttled telemetry primitives for data-processing workers.
//!
//! Two pieces that cooperate only through shared metric state:
//!
//! - [`ReportingGate`]: a process-wide, non-blocking throttle for logging
//!   cumulative metric summaries from hot paths.
//! - [`LatencyRecorder`] / [`LatencyInterceptor`]: per-call hooks that time
//!   outbound requests into a shared, lock-free [`Histogram`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use throttled_telemetry::{LatencyRecorder, MetricsContainer, ReportingGate};
//!
//! let metrics = Arc::new(MetricsContainer::new());
//! let recorder = LatencyRecorder::with_labels(&*metrics, [("service", "storage")]).unwrap();
//!
//! let response: Result<&str, ()> = recorder.time(|| Ok("200 OK"));
//! assert!(response.is_ok());
//!
//! let gate = ReportingGate::new();
//! gate.try_report(&*metrics, "Metrics:\n", "", "", Duration::from_secs(60), true);
//! ```

pub mod clock;
pub mod config;
pub mod histogram;
pub mod latency;
pub mod registry;
pub mod reporting;
pub mod telemetry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use histogram::{BucketError, BucketType, Histogram, HistogramSummary, LinearBuckets};
pub use latency::{
    LatencyInterceptor, LatencyRecorder, API_REQUEST_LATENCIES_URN, REQUEST_LATENCY_BUCKETS,
};
pub use registry::{MetricName, MetricRegistry, MetricsContainer, MetricsSnapshot, RegistryError};
pub use reporting::{CumulativeMetrics, ReportOutcome, ReportSink, ReportingGate, TracingSink};
