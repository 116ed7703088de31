//! Histogram bucket math and the shared, atomically updated histogram cell.

mod buckets;
mod cell;

pub use buckets::{BucketError, BucketType, LinearBuckets, Placement};
pub use cell::{Histogram, HistogramSummary};
