//! Bucket schemes for histograms.
//!
//! Only linear schemes exist today. A sample never falls outside a scheme:
//! values below the offset land in bucket 0 and values at or past the top
//! edge land in the last bucket.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from constructing a bucket scheme.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BucketError {
    #[error("Bucket width must be finite and positive, got {0}")]
    InvalidWidth(f64),

    #[error("Bucket count must be at least 1")]
    ZeroBuckets,

    #[error("Bucket offset must be finite, got {0}")]
    InvalidOffset(f64),
}

/// Where a sample landed relative to the measurable range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Below `offset`, clamped into bucket 0.
    Underflow,
    /// Inside `[offset, offset + width * count)`.
    InRange(usize),
    /// At or above the top edge, clamped into the last bucket.
    Overflow,
}

/// Fixed-width, evenly spaced buckets starting at `offset`.
///
/// Deserialization goes through [`LinearBuckets::new`], so a persisted
/// descriptor is validated the same way as one built in code.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawLinearBuckets")]
pub struct LinearBuckets {
    offset: f64,
    width: f64,
    count: usize,
}

#[derive(Deserialize)]
struct RawLinearBuckets {
    offset: f64,
    width: f64,
    count: usize,
}

impl TryFrom<RawLinearBuckets> for LinearBuckets {
    type Error = BucketError;

    fn try_from(raw: RawLinearBuckets) -> Result<Self, Self::Error> {
        Self::new(raw.offset, raw.width, raw.count)
    }
}

impl LinearBuckets {
    /// Validated scheme of `count` buckets of `width`, starting at `offset`.
    pub fn new(offset: f64, width: f64, count: usize) -> Result<Self, BucketError> {
        if !offset.is_finite() {
            return Err(BucketError::InvalidOffset(offset));
        }
        if !width.is_finite() || width <= 0.0 {
            return Err(BucketError::InvalidWidth(width));
        }
        if count == 0 {
            return Err(BucketError::ZeroBuckets);
        }
        Ok(Self {
            offset,
            width,
            count,
        })
    }

    /// Const constructor for schemes known to be valid at compile time.
    ///
    /// The caller guarantees a finite offset, a positive finite width and a
    /// non-zero count.
    pub(crate) const fn new_unchecked(offset: f64, width: f64, count: usize) -> Self {
        Self {
            offset,
            width,
            count,
        }
    }

    /// Lower edge of bucket 0.
    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Width of every bucket.
    pub fn width(&self) -> f64 {
        self.width
    }

    /// Number of buckets, always at least 1.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Lower edge of bucket `index`.
    pub fn range_from(&self, index: usize) -> f64 {
        self.offset + self.width * index as f64
    }

    /// Upper (exclusive) edge of bucket `index`.
    pub fn range_to(&self, index: usize) -> f64 {
        self.offset + self.width * (index + 1) as f64
    }

    /// Top edge of the measurable range.
    pub fn upper_bound(&self) -> f64 {
        self.range_to(self.count - 1)
    }

    /// `clamp(floor((value - offset) / width), 0, count - 1)`.
    ///
    /// NaN maps to bucket 0.
    pub fn bucket_index(&self, value: f64) -> usize {
        match self.place(value) {
            Placement::Underflow => 0,
            Placement::InRange(index) => index,
            Placement::Overflow => self.count - 1,
        }
    }

    /// Classify a sample against the measurable range.
    pub fn place(&self, value: f64) -> Placement {
        if value.is_nan() || value < self.offset {
            return Placement::Underflow;
        }
        let raw = ((value - self.offset) / self.width).floor();
        // `as` saturates, so +inf and huge values end up >= count.
        let index = raw as usize;
        if index >= self.count {
            Placement::Overflow
        } else {
            Placement::InRange(index)
        }
    }
}

/// Bucket scheme descriptor handed to a metric registry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BucketType {
    Linear(LinearBuckets),
}

impl BucketType {
    pub fn linear(offset: f64, width: f64, count: usize) -> Result<Self, BucketError> {
        LinearBuckets::new(offset, width, count).map(Self::Linear)
    }

    pub fn num_buckets(&self) -> usize {
        match self {
            Self::Linear(linear) => linear.count(),
        }
    }

    pub fn bucket_index(&self, value: f64) -> usize {
        match self {
            Self::Linear(linear) => linear.bucket_index(value),
        }
    }

    pub fn place(&self, value: f64) -> Placement {
        match self {
            Self::Linear(linear) => linear.place(value),
        }
    }

    pub fn range_from(&self, index: usize) -> f64 {
        match self {
            Self::Linear(linear) => linear.range_from(index),
        }
    }

    pub fn range_to(&self, index: usize) -> f64 {
        match self {
            Self::Linear(linear) => linear.range_to(index),
        }
    }
}

impl From<LinearBuckets> for BucketType {
    fn from(linear: LinearBuckets) -> Self {
        Self::Linear(linear)
    }
}
