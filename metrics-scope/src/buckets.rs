//! Histogram bucket construction and bucket assignment.
//!
//! A bucket set is an ordered list of `N` strictly increasing upper bounds, which partitions the
//! value (or duration) axis into `N + 1` buckets: `(-inf, b0]`, `(b0, b1]`, ..., `(b(N-1), +inf)`.
//! A sample belongs to the bucket of the smallest upper bound that is greater than or equal to
//! it, so a sample exactly equal to a bound lands in that bound's bucket.
use std::{fmt, time::Duration};

use thiserror::Error;

/// Errors that could occur while constructing a set of buckets.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BucketError {
    /// The width of linear buckets was zero, negative, or not a number.
    #[error("bucket width must be greater than zero")]
    NonPositiveWidth,

    /// The requested number of linear buckets was zero.
    #[error("bucket count must be greater than zero")]
    ZeroCount,

    /// An explicit list of bucket bounds was empty.
    #[error("bucket bounds must not be empty")]
    Empty,

    /// The bucket bounds were not strictly increasing.
    #[error("bucket bound at index {index} is not greater than the previous bound")]
    NotIncreasing {
        /// Index of the first offending bound.
        index: usize,
    },

    /// Generating the bucket bounds overflowed the representable range.
    #[error("bucket bounds overflow the representable range")]
    Overflow,

    /// A bucket bound reached the upper bound reserved for the terminal, unbounded bucket.
    #[error("bucket bound at index {index} is not below the terminal bucket bound")]
    Unbounded {
        /// Index of the offending bound.
        index: usize,
    },
}

/// Upper bound used for the terminal, unbounded bucket of a value histogram.
pub const VALUE_BUCKET_INFINITY: f64 = f64::MAX;

/// Lower bound used for the first bucket of a value histogram.
pub const VALUE_BUCKET_NEGATIVE_INFINITY: f64 = f64::MIN;

/// Upper bound used for the terminal, unbounded bucket of a duration histogram.
pub const DURATION_BUCKET_INFINITY: Duration = Duration::MAX;

/// Ordered upper bounds for a histogram of numeric samples.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueBuckets {
    bounds: Vec<f64>,
}

impl ValueBuckets {
    /// Creates `ValueBuckets` from an explicit list of upper bounds.
    ///
    /// # Errors
    ///
    /// If `bounds` is empty, is not strictly increasing, or reaches [`VALUE_BUCKET_INFINITY`], an
    /// error is returned.
    pub fn new(bounds: Vec<f64>) -> Result<Self, BucketError> {
        if bounds.is_empty() {
            return Err(BucketError::Empty);
        }
        // A NaN bound is not ordered against anything, including a lone NaN.
        if let Some(index) = bounds.iter().position(|b| b.is_nan()) {
            return Err(BucketError::NotIncreasing { index });
        }
        check_increasing(&bounds, |a, b| a < b)?;
        check_below_terminal(&bounds, &VALUE_BUCKET_INFINITY)?;

        Ok(Self { bounds })
    }

    /// Creates `count` buckets starting at `start`, each `width` apart.
    ///
    /// # Errors
    ///
    /// If `width` is not positive, or `count` is zero, an error is returned.
    pub fn linear(start: f64, width: f64, count: usize) -> Result<Self, BucketError> {
        // Written so that NaN is rejected as well.
        if !(width > 0.0) {
            return Err(BucketError::NonPositiveWidth);
        }
        if count == 0 {
            return Err(BucketError::ZeroCount);
        }

        let bounds = (0..count).map(|i| start + (i as f64) * width).collect::<Vec<_>>();
        if bounds.iter().any(|b| !b.is_finite()) {
            return Err(BucketError::Overflow);
        }

        // Precision loss at large magnitudes can collapse neighbouring bounds.
        Self::new(bounds)
    }

    /// Upper bounds of the buckets, excluding the terminal unbounded bucket.
    pub fn bounds(&self) -> &[f64] {
        &self.bounds
    }

    /// Number of bounded buckets.
    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    /// Returns `true` if there are no bounded buckets.
    ///
    /// Bucket sets are never empty once constructed, so this always returns `false`.
    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    /// Index of the bucket `value` belongs to.
    ///
    /// Returns `self.len()` for samples above the last bound.
    pub fn bucket_index(&self, value: f64) -> usize {
        self.bounds.partition_point(|bound| *bound < value)
    }

    /// Lower and upper bound of every bucket, including the unbounded terminal bucket.
    pub fn pairs(&self) -> Vec<(f64, f64)> {
        bound_pairs(&self.bounds, VALUE_BUCKET_NEGATIVE_INFINITY, VALUE_BUCKET_INFINITY)
    }
}

/// Ordered upper bounds for a histogram of duration samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurationBuckets {
    bounds: Vec<Duration>,
}

impl DurationBuckets {
    /// Creates `DurationBuckets` from an explicit list of upper bounds.
    ///
    /// # Errors
    ///
    /// If `bounds` is empty, is not strictly increasing, or reaches [`DURATION_BUCKET_INFINITY`],
    /// an error is returned.
    pub fn new(bounds: Vec<Duration>) -> Result<Self, BucketError> {
        if bounds.is_empty() {
            return Err(BucketError::Empty);
        }
        check_increasing(&bounds, |a, b| a < b)?;
        check_below_terminal(&bounds, &DURATION_BUCKET_INFINITY)?;

        Ok(Self { bounds })
    }

    /// Creates `count` buckets starting at `start`, each `width` apart.
    ///
    /// # Errors
    ///
    /// If `width` is zero, `count` is zero, or the last bound does not fit in a `Duration`, an
    /// error is returned.
    pub fn linear(start: Duration, width: Duration, count: usize) -> Result<Self, BucketError> {
        if width.is_zero() {
            return Err(BucketError::NonPositiveWidth);
        }
        if count == 0 {
            return Err(BucketError::ZeroCount);
        }

        let mut bounds = Vec::with_capacity(count);
        let mut current = start;
        for i in 0..count {
            if i > 0 {
                current = current.checked_add(width).ok_or(BucketError::Overflow)?;
            }
            bounds.push(current);
        }

        Self::new(bounds)
    }

    /// Upper bounds of the buckets, excluding the terminal unbounded bucket.
    pub fn bounds(&self) -> &[Duration] {
        &self.bounds
    }

    /// Number of bounded buckets.
    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    /// Returns `true` if there are no bounded buckets.
    ///
    /// Bucket sets are never empty once constructed, so this always returns `false`.
    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    /// Index of the bucket `value` belongs to.
    ///
    /// Returns `self.len()` for samples above the last bound.
    pub fn bucket_index(&self, value: Duration) -> usize {
        self.bounds.partition_point(|bound| *bound < value)
    }

    /// Lower and upper bound of every bucket, including the unbounded terminal bucket.
    pub fn pairs(&self) -> Vec<(Duration, Duration)> {
        bound_pairs(&self.bounds, Duration::ZERO, DURATION_BUCKET_INFINITY)
    }
}

/// A set of histogram buckets.
///
/// The variant decides whether a histogram created with it tracks numeric values or durations.
#[derive(Debug, Clone, PartialEq)]
pub enum Buckets {
    /// Buckets for numeric samples.
    Values(ValueBuckets),

    /// Buckets for duration samples.
    Durations(DurationBuckets),
}

impl Buckets {
    /// Number of bounded buckets.
    pub fn len(&self) -> usize {
        match self {
            Buckets::Values(buckets) => buckets.len(),
            Buckets::Durations(buckets) => buckets.len(),
        }
    }

    /// Returns `true` if there are no bounded buckets.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<ValueBuckets> for Buckets {
    fn from(buckets: ValueBuckets) -> Self {
        Buckets::Values(buckets)
    }
}

impl From<DurationBuckets> for Buckets {
    fn from(buckets: DurationBuckets) -> Self {
        Buckets::Durations(buckets)
    }
}

impl fmt::Display for Buckets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Buckets::Values(buckets) => write!(f, "{:?}", buckets.bounds),
            Buckets::Durations(buckets) => write!(f, "{:?}", buckets.bounds),
        }
    }
}

/// Default buckets for histograms created without explicit buckets.
pub fn default_buckets() -> Buckets {
    let bounds = [0, 10, 25, 50, 75, 100, 200, 300, 400, 500, 600, 800, 1_000, 2_000, 5_000]
        .iter()
        .map(|ms| Duration::from_millis(*ms))
        .collect();

    Buckets::Durations(DurationBuckets { bounds })
}

fn check_increasing<T, F>(bounds: &[T], is_less: F) -> Result<(), BucketError>
where
    F: Fn(&T, &T) -> bool,
{
    for (index, window) in bounds.windows(2).enumerate() {
        if !is_less(&window[0], &window[1]) {
            return Err(BucketError::NotIncreasing { index: index + 1 });
        }
    }

    Ok(())
}

// Bounds are increasing by now, so only the last one can collide with the terminal bucket.
fn check_below_terminal<T: PartialOrd>(bounds: &[T], terminal: &T) -> Result<(), BucketError> {
    match bounds.last() {
        Some(last) if last >= terminal => Err(BucketError::Unbounded { index: bounds.len() - 1 }),
        _ => Ok(()),
    }
}

fn bound_pairs<T: Copy>(bounds: &[T], lowest: T, highest: T) -> Vec<(T, T)> {
    let mut pairs = Vec::with_capacity(bounds.len() + 1);
    let mut lower = lowest;
    for upper in bounds {
        pairs.push((lower, *upper));
        lower = *upper;
    }
    pairs.push((lower, highest));
    pairs
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn linear_value_buckets() {
        let buckets = ValueBuckets::linear(0.0, 10.0, 10).expect("valid buckets");
        assert_eq!(
            buckets.bounds(),
            &[0.0, 10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0]
        );
    }

    #[test]
    fn linear_duration_buckets() {
        let buckets =
            DurationBuckets::linear(Duration::ZERO, Duration::from_millis(10), 3).expect("valid");
        assert_eq!(
            buckets.bounds(),
            &[Duration::ZERO, Duration::from_millis(10), Duration::from_millis(20)]
        );
    }

    #[test]
    fn invalid_linear_buckets() {
        assert_eq!(ValueBuckets::linear(0.0, 0.0, 3), Err(BucketError::NonPositiveWidth));
        assert_eq!(ValueBuckets::linear(0.0, -1.0, 3), Err(BucketError::NonPositiveWidth));
        assert_eq!(ValueBuckets::linear(0.0, f64::NAN, 3), Err(BucketError::NonPositiveWidth));
        assert_eq!(ValueBuckets::linear(0.0, 1.0, 0), Err(BucketError::ZeroCount));
        assert_eq!(ValueBuckets::linear(f64::MAX, f64::MAX, 2), Err(BucketError::Overflow));

        assert_eq!(
            DurationBuckets::linear(Duration::ZERO, Duration::ZERO, 3),
            Err(BucketError::NonPositiveWidth)
        );
        assert_eq!(
            DurationBuckets::linear(Duration::ZERO, Duration::from_secs(1), 0),
            Err(BucketError::ZeroCount)
        );
        assert_eq!(
            DurationBuckets::linear(Duration::MAX, Duration::from_secs(1), 2),
            Err(BucketError::Overflow)
        );
    }

    #[test]
    fn invalid_explicit_buckets() {
        assert_eq!(ValueBuckets::new(vec![]), Err(BucketError::Empty));
        assert_eq!(
            ValueBuckets::new(vec![1.0, 2.0, 2.0]),
            Err(BucketError::NotIncreasing { index: 2 })
        );
        assert_eq!(
            ValueBuckets::new(vec![3.0, 1.0]),
            Err(BucketError::NotIncreasing { index: 1 })
        );
        assert_eq!(
            ValueBuckets::new(vec![1.0, f64::NAN]),
            Err(BucketError::NotIncreasing { index: 1 })
        );
        assert_eq!(
            DurationBuckets::new(vec![Duration::from_secs(2), Duration::from_secs(1)]),
            Err(BucketError::NotIncreasing { index: 1 })
        );
    }

    #[test]
    fn bounds_must_stay_below_terminal_bucket() {
        assert_eq!(
            ValueBuckets::new(vec![1.0, f64::MAX]),
            Err(BucketError::Unbounded { index: 1 })
        );
        assert_eq!(
            ValueBuckets::new(vec![f64::INFINITY]),
            Err(BucketError::Unbounded { index: 0 })
        );
        assert_eq!(
            DurationBuckets::new(vec![Duration::from_secs(1), Duration::MAX]),
            Err(BucketError::Unbounded { index: 1 })
        );
        let second = Duration::from_secs(1);
        assert_eq!(
            DurationBuckets::linear(Duration::MAX - second, second, 2),
            Err(BucketError::Unbounded { index: 1 })
        );

        // Every bucket keeps a distinct upper bound, so none of them can shadow another.
        let buckets = ValueBuckets::new(vec![1.0, f64::MAX / 2.0]).expect("valid buckets");
        let pairs = buckets.pairs();
        assert!(pairs.windows(2).all(|w| w[0].1 < w[1].1));
    }

    #[test]
    fn bucket_boundaries_are_inclusive() {
        let buckets = ValueBuckets::linear(0.0, 10.0, 10).expect("valid buckets");

        assert_eq!(buckets.bounds()[buckets.bucket_index(42.42)], 50.0);
        assert_eq!(buckets.bounds()[buckets.bucket_index(10.0)], 10.0);
        assert_eq!(buckets.bounds()[buckets.bucket_index(-5.0)], 0.0);
        assert_eq!(buckets.bucket_index(90.1), buckets.len());

        let buckets =
            DurationBuckets::linear(Duration::ZERO, Duration::from_millis(30), 5).expect("valid");
        let upper = |millis| buckets.bounds()[buckets.bucket_index(Duration::from_millis(millis))];
        assert_eq!(upper(42), Duration::from_millis(60));
        assert_eq!(upper(90), Duration::from_millis(90));
        assert_eq!(buckets.bucket_index(Duration::from_millis(121)), buckets.len());
    }

    #[test]
    fn pairs_cover_the_whole_axis() {
        let buckets = ValueBuckets::new(vec![0.0, 2.0, 4.0]).expect("valid buckets");
        assert_eq!(
            buckets.pairs(),
            vec![(f64::MIN, 0.0), (0.0, 2.0), (2.0, 4.0), (4.0, f64::MAX)]
        );

        let buckets = DurationBuckets::new(vec![Duration::from_secs(2), Duration::from_secs(4)])
            .expect("valid");
        assert_eq!(
            buckets.pairs(),
            vec![
                (Duration::ZERO, Duration::from_secs(2)),
                (Duration::from_secs(2), Duration::from_secs(4)),
                (Duration::from_secs(4), Duration::MAX),
            ]
        );
    }

    proptest! {
        #[test]
        fn assigned_bucket_is_smallest_bound_at_or_above(
            start in -1_000.0f64..1_000.0,
            width in 0.001f64..100.0,
            count in 1usize..64,
            sample in -10_000.0f64..10_000.0,
        ) {
            let buckets = ValueBuckets::linear(start, width, count).expect("valid buckets");
            let index = buckets.bucket_index(sample);
            let bounds = buckets.bounds();

            if index < bounds.len() {
                prop_assert!(sample <= bounds[index]);
            }
            if index > 0 {
                prop_assert!(sample > bounds[index - 1]);
            }
        }
    }
}
