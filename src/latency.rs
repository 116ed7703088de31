//! Request-to-response latency sampling for outbound calls.
//!
//! A [`LatencyRecorder`] is attached to a client once. For every call it hands
//! out a fresh [`LatencyInterceptor`], which is told when the request is sent
//! and when the response arrives, and records the elapsed milliseconds into
//! the shared histogram. Calls that never produce a response record nothing.

use std::future::Future;
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::histogram::{BucketType, Histogram, LinearBuckets};
use crate::registry::{MetricName, MetricRegistry, RegistryError};

/// Metric identity for API request latencies.
pub const API_REQUEST_LATENCIES_URN: &str = "beam:metric:io:api_request_latencies:v1";

/// Latencies up to 60 seconds at 20ms resolution, with overflow in the last
/// bucket. Readers of exported histograms depend on this exact scheme.
pub const REQUEST_LATENCY_BUCKETS: BucketType =
    BucketType::Linear(LinearBuckets::new_unchecked(0.0, 20.0, 3000));

/// Per-client factory of latency interceptors.
#[derive(Debug, Clone)]
pub struct LatencyRecorder<C = SystemClock> {
    histogram: Arc<Histogram>,
    clock: C,
}

impl LatencyRecorder<SystemClock> {
    /// Record into `histogram` using the wall clock.
    pub fn new(histogram: Arc<Histogram>) -> Self {
        Self {
            histogram,
            clock: SystemClock,
        }
    }

    /// Record into the API request latency histogram for `labels`.
    pub fn with_labels<R, I, K, V>(registry: &R, labels: I) -> Result<Self, RegistryError>
    where
        R: MetricRegistry + ?Sized,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let name = MetricName::named(API_REQUEST_LATENCIES_URN, labels);
        let histogram = registry.histogram(&name, REQUEST_LATENCY_BUCKETS)?;
        Ok(Self::new(histogram))
    }
}

impl<C: Clock + Clone> LatencyRecorder<C> {
    /// Swap the time source.
    pub fn with_clock<C2: Clock + Clone>(self, clock: C2) -> LatencyRecorder<C2> {
        LatencyRecorder {
            histogram: self.histogram,
            clock,
        }
    }

    /// The histogram every interceptor from this recorder writes to.
    pub fn histogram(&self) -> &Arc<Histogram> {
        &self.histogram
    }

    /// A fresh interceptor for exactly one call.
    pub fn interceptor(&self) -> LatencyInterceptor<C> {
        LatencyInterceptor {
            histogram: Arc::clone(&self.histogram),
            clock: self.clock.clone(),
            start_ms: None,
        }
    }

    /// Run `call`, recording its latency only if it returns `Ok`.
    pub fn time<T, E, F>(&self, call: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let mut interceptor = self.interceptor();
        interceptor.on_send();
        let result = call();
        if result.is_ok() {
            interceptor.on_receive();
        }
        result
    }

    /// Await `call`, recording its latency only if it resolves to `Ok`.
    ///
    /// Dropping the returned future before it completes records nothing.
    pub async fn time_async<T, E, Fut>(&self, call: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let mut interceptor = self.interceptor();
        interceptor.on_send();
        let result = call.await;
        if result.is_ok() {
            interceptor.on_receive();
        }
        result
    }
}

/// Send/receive hooks for a single in-flight call.
///
/// One instance per call. The hooks take `&mut self`, so an interceptor
/// cannot be driven from two calls at once without external locking, which
/// is a misuse.
#[derive(Debug)]
pub struct LatencyInterceptor<C = SystemClock> {
    histogram: Arc<Histogram>,
    clock: C,
    start_ms: Option<u64>,
}

impl<C: Clock> LatencyInterceptor<C> {
    /// Idle interceptor writing into `histogram`.
    pub fn new(histogram: Arc<Histogram>, clock: C) -> Self {
        Self {
            histogram,
            clock,
            start_ms: None,
        }
    }

    /// Mark the request as dispatched. Calling again restarts timing.
    pub fn on_send(&mut self) {
        self.start_ms = Some(self.clock.now_millis());
    }

    /// Mark the response as received and record the elapsed milliseconds.
    ///
    /// Returns the recorded sample. Without a preceding `on_send` (or after
    /// the sample was already taken) this records nothing and returns `None`.
    pub fn on_receive(&mut self) -> Option<i64> {
        let Some(start) = self.start_ms.take() else {
            tracing::warn!("latency response without a matching send, no sample recorded");
            return None;
        };
        let elapsed = elapsed_millis(start, self.clock.now_millis());
        self.histogram.update(elapsed as f64);
        Some(elapsed)
    }

    /// Whether `on_send` ran and no sample has been taken since.
    pub fn is_in_flight(&self) -> bool {
        self.start_ms.is_some()
    }
}

/// Signed `now - start`, saturating at the `i64` range.
fn elapsed_millis(start: u64, now: u64) -> i64 {
    let diff = i128::from(now) - i128::from(start);
    i64::try_from(diff).unwrap_or(if diff < 0 { i64::MIN } else { i64::MAX })
}
