//! Lock-free bucketed histogram.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use super::buckets::{BucketType, Placement};

/// Summary statistics for a histogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    /// Samples below the range, counted in the first bucket.
    pub underflow: u64,
    /// Samples at or above the top edge, counted in the last bucket.
    pub overflow: u64,
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
}

/// Bucketed sample counts, safe for any number of concurrent writers.
///
/// Every sample is accepted: out-of-range values are clamped into the first
/// or last bucket and also tallied as underflow/overflow.
pub struct Histogram {
    bucket_type: BucketType,
    buckets: Box<[AtomicU64]>,
    count: AtomicU64,
    underflow: AtomicU64,
    overflow: AtomicU64,
    sum: AtomicU64, // f64 bits stored as u64
    min: AtomicU64, // f64 bits stored as u64
    max: AtomicU64, // f64 bits stored as u64
}

impl Histogram {
    pub fn new(bucket_type: BucketType) -> Self {
        let buckets = (0..bucket_type.num_buckets())
            .map(|_| AtomicU64::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            bucket_type,
            buckets,
            count: AtomicU64::new(0),
            underflow: AtomicU64::new(0),
            overflow: AtomicU64::new(0),
            sum: AtomicU64::new(f64::to_bits(0.0)),
            min: AtomicU64::new(f64::to_bits(f64::MAX)),
            max: AtomicU64::new(f64::to_bits(f64::MIN)),
        }
    }

    pub fn bucket_type(&self) -> &BucketType {
        &self.bucket_type
    }

    /// Record one sample.
    pub fn update(&self, value: f64) {
        self.update_many(value, 1);
    }

    /// Record `times` samples of the same value.
    pub fn update_many(&self, value: f64, times: u64) {
        if times == 0 {
            return;
        }
        let index = match self.bucket_type.place(value) {
            Placement::Underflow => {
                self.underflow.fetch_add(times, Ordering::Relaxed);
                0
            }
            Placement::InRange(index) => index,
            Placement::Overflow => {
                self.overflow.fetch_add(times, Ordering::Relaxed);
                self.buckets.len() - 1
            }
        };
        self.buckets[index].fetch_add(times, Ordering::Relaxed);
        self.count.fetch_add(times, Ordering::Relaxed);

        // NaN would poison sum/min/max; it is still counted in bucket 0.
        if !value.is_nan() {
            atomic_add_f64(&self.sum, value * times as f64);
            atomic_min_f64(&self.min, value);
            atomic_max_f64(&self.max, value);
        }
    }

    /// Zero every counter in place.
    ///
    /// Not atomic as a whole: samples recorded while clearing may survive
    /// in some fields and not others.
    pub fn clear(&self) {
        for bucket in self.buckets.iter() {
            bucket.store(0, Ordering::Relaxed);
        }
        self.count.store(0, Ordering::Relaxed);
        self.underflow.store(0, Ordering::Relaxed);
        self.overflow.store(0, Ordering::Relaxed);
        self.sum.store(f64::to_bits(0.0), Ordering::Relaxed);
        self.min.store(f64::to_bits(f64::MAX), Ordering::Relaxed);
        self.max.store(f64::to_bits(f64::MIN), Ordering::Relaxed);
    }

    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Count in bucket `index`, or 0 if the index is out of range.
    pub fn bucket_count(&self, index: usize) -> u64 {
        self.buckets
            .get(index)
            .map(|b| b.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn bucket_counts(&self) -> Vec<u64> {
        self.buckets
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect()
    }

    pub fn total_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn underflow_count(&self) -> u64 {
        self.underflow.load(Ordering::Relaxed)
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }

    /// Estimate the value at quantile `q` (0.0..=1.0).
    ///
    /// Interpolates linearly inside the bucket holding the target rank.
    /// Returns NaN for an empty histogram.
    pub fn percentile(&self, q: f64) -> f64 {
        percentile_of(&self.bucket_type, &self.bucket_counts(), q)
    }

    pub fn p50(&self) -> f64 {
        self.percentile(0.50)
    }

    pub fn p90(&self) -> f64 {
        self.percentile(0.90)
    }

    pub fn p99(&self) -> f64 {
        self.percentile(0.99)
    }

    pub fn summary(&self) -> HistogramSummary {
        let counts = self.bucket_counts();
        let count = self.count.load(Ordering::Relaxed);
        let min = f64::from_bits(self.min.load(Ordering::Relaxed));
        let max = f64::from_bits(self.max.load(Ordering::Relaxed));
        let has_values = min <= max;

        HistogramSummary {
            count,
            sum: f64::from_bits(self.sum.load(Ordering::Relaxed)),
            min: if has_values { min } else { 0.0 },
            max: if has_values { max } else { 0.0 },
            underflow: self.underflow.load(Ordering::Relaxed),
            overflow: self.overflow.load(Ordering::Relaxed),
            p50: percentile_of(&self.bucket_type, &counts, 0.50),
            p90: percentile_of(&self.bucket_type, &counts, 0.90),
            p99: percentile_of(&self.bucket_type, &counts, 0.99),
        }
    }

    /// `Total number of samples: N, P99: x <unit>, P90: y <unit>, P50: z <unit>`.
    pub fn percentile_string(&self, unit: &str) -> String {
        let counts = self.bucket_counts();
        let total: u64 = counts.iter().sum();
        format!(
            "Total number of samples: {}, P99: {:.0} {unit}, P90: {:.0} {unit}, P50: {:.0} {unit}",
            total,
            percentile_of(&self.bucket_type, &counts, 0.99),
            percentile_of(&self.bucket_type, &counts, 0.90),
            percentile_of(&self.bucket_type, &counts, 0.50),
        )
    }
}

impl fmt::Debug for Histogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Histogram")
            .field("bucket_type", &self.bucket_type)
            .field("count", &self.total_count())
            .field("underflow", &self.underflow_count())
            .field("overflow", &self.overflow_count())
            .finish()
    }
}

impl metrics::HistogramFn for Histogram {
    fn record(&self, value: f64) {
        self.update(value);
    }
}

fn percentile_of(bucket_type: &BucketType, counts: &[u64], q: f64) -> f64 {
    let total: u64 = counts.iter().sum();
    if total == 0 {
        return f64::NAN;
    }
    let q = if q.is_nan() { 0.0 } else { q.clamp(0.0, 1.0) };
    let target = ((total as f64 * q).ceil() as u64).max(1);

    let mut seen = 0u64;
    for (index, &count) in counts.iter().enumerate() {
        if count == 0 {
            continue;
        }
        if seen + count >= target {
            let lower = bucket_type.range_from(index);
            let width = bucket_type.range_to(index) - lower;
            let fraction = (target - seen) as f64 / count as f64;
            return lower + width * fraction;
        }
        seen += count;
    }
    // Counts moved under us; report the top edge.
    bucket_type.range_to(counts.len().saturating_sub(1))
}

fn atomic_add_f64(atomic: &AtomicU64, value: f64) {
    loop {
        let current = atomic.load(Ordering::Relaxed);
        let new = f64::from_bits(current) + value;
        if atomic
            .compare_exchange_weak(current, f64::to_bits(new), Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            break;
        }
    }
}

fn atomic_min_f64(atomic: &AtomicU64, value: f64) {
    loop {
        let current = atomic.load(Ordering::Relaxed);
        if value >= f64::from_bits(current) {
            break;
        }
        if atomic
            .compare_exchange_weak(current, f64::to_bits(value), Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            break;
        }
    }
}

fn atomic_max_f64(atomic: &AtomicU64, value: f64) {
    loop {
        let current = atomic.load(Ordering::Relaxed);
        if value <= f64::from_bits(current) {
            break;
        }
        if atomic
            .compare_exchange_weak(current, f64::to_bits(value), Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn latency_histogram() -> Histogram {
        Histogram::new(BucketType::linear(0.0, 20.0, 3000).unwrap())
    }

    #[test]
    fn test_update_increments_mapped_bucket() {
        let h = latency_histogram();
        h.update(0.0);
        h.update(19.0);
        h.update(20.0);
        h.update(100_000.0);

        assert_eq!(h.bucket_count(0), 2);
        assert_eq!(h.bucket_count(1), 1);
        assert_eq!(h.bucket_count(2999), 1);
        assert_eq!(h.total_count(), 4);
        assert_eq!(h.overflow_count(), 1);
        assert_eq!(h.underflow_count(), 0);
    }

    #[test]
    fn test_negative_and_nan_are_accepted() {
        let h = latency_histogram();
        h.update(-5.0);
        h.update(f64::NAN);
        assert_eq!(h.bucket_count(0), 2);
        assert_eq!(h.underflow_count(), 2);
        let summary = h.summary();
        assert_eq!(summary.count, 2);
        assert_eq!(summary.min, -5.0);
        assert_eq!(summary.sum, -5.0);
    }

    #[test]
    fn test_update_many() {
        let h = latency_histogram();
        h.update_many(45.0, 10);
        h.update_many(45.0, 0);
        assert_eq!(h.bucket_count(2), 10);
        assert_eq!(h.summary().sum, 450.0);
    }

    #[test]
    fn test_out_of_range_bucket_count_is_zero() {
        assert_eq!(latency_histogram().bucket_count(3000), 0);
    }

    #[test]
    fn test_empty_summary() {
        let summary = latency_histogram().summary();
        assert_eq!(summary.count, 0);
        assert_eq!(summary.min, 0.0);
        assert_eq!(summary.max, 0.0);
        assert!(summary.p50.is_nan());
    }

    #[test]
    fn test_percentiles_interpolate_within_bucket() {
        let h = Histogram::new(BucketType::linear(0.0, 10.0, 10).unwrap());
        // 100 samples spread one per unit over 0..100
        for v in 0..100 {
            h.update(v as f64);
        }
        assert_eq!(h.p50(), 50.0);
        assert_eq!(h.p90(), 90.0);
        assert_eq!(h.p99(), 99.0);
        assert_eq!(h.percentile(0.0), 1.0);
    }

    #[test]
    fn test_percentile_string() {
        let h = latency_histogram();
        assert_eq!(
            h.percentile_string("ms"),
            "Total number of samples: 0, P99: NaN ms, P90: NaN ms, P50: NaN ms"
        );
        h.update(37.0);
        assert_eq!(
            h.percentile_string("ms"),
            "Total number of samples: 1, P99: 40 ms, P90: 40 ms, P50: 40 ms"
        );
    }

    #[test]
    fn test_clear_resets_everything() {
        let h = latency_histogram();
        h.update(10.0);
        h.update(-10.0);
        h.update(70_000.0);
        h.clear();
        assert_eq!(h.total_count(), 0);
        assert!(h.bucket_counts().iter().all(|&c| c == 0));
        let summary = h.summary();
        assert_eq!(summary.count, 0);
        assert_eq!(summary.underflow, 0);
        assert_eq!(summary.overflow, 0);
        assert_eq!(summary.sum, 0.0);
        assert_eq!(summary.max, 0.0);
        assert!(summary.p99.is_nan());
    }

    #[test]
    fn test_concurrent_updates_lose_no_counts() {
        let h = Arc::new(latency_histogram());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let h = Arc::clone(&h);
                thread::spawn(move || {
                    for i in 0..10_000u64 {
                        h.update(((i + t) % 200) as f64);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(h.total_count(), 80_000);
        assert_eq!(h.bucket_counts().iter().sum::<u64>(), 80_000);
    }

    #[test]
    fn test_histogram_fn_records() {
        use metrics::HistogramFn;
        let h = latency_histogram();
        h.record(25.0);
        assert_eq!(h.bucket_count(1), 1);
    }
}
