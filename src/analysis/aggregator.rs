//! Interval aggregator - fixed-width time buckets for trend display
//!
//! Irregularly spaced readings are grouped by
//! `floor(captured_at / width) * width` and each group is reduced to its
//! arithmetic mean. Every point lands in exactly one bucket, and buckets are
//! emitted in ascending start order regardless of input order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::TelemetryError;

const MS_PER_MINUTE: i64 = 60_000;

/// One aggregated bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeBucket {
    /// Inclusive start of the bucket, epoch milliseconds
    pub bucket_start_ms: i64,
    pub mean_value: f64,
    pub sample_count: usize,
}

/// Groups `(time, value)` points into fixed-width buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalAggregator {
    width_ms: i64,
}

impl IntervalAggregator {
    /// Create an aggregator with the given bucket width in minutes.
    ///
    /// # Errors
    /// `InvalidBucketWidth` when `width_minutes` is zero.
    pub fn new(width_minutes: u32) -> Result<Self, TelemetryError> {
        if width_minutes == 0 {
            return Err(TelemetryError::InvalidBucketWidth {
                minutes: width_minutes,
            });
        }
        Ok(Self {
            width_ms: i64::from(width_minutes) * MS_PER_MINUTE,
        })
    }

    pub fn width_ms(&self) -> i64 {
        self.width_ms
    }

    /// Bucket key for a timestamp. Uses Euclidean division so pre-epoch
    /// times still floor toward negative infinity.
    pub fn bucket_start(&self, captured_at: i64) -> i64 {
        captured_at.div_euclid(self.width_ms) * self.width_ms
    }

    /// Aggregate points into ascending buckets. Non-finite values are skipped.
    pub fn aggregate<I>(&self, points: I) -> Vec<TimeBucket>
    where
        I: IntoIterator<Item = (i64, f64)>,
    {
        let mut sums: BTreeMap<i64, (f64, usize)> = BTreeMap::new();
        for (captured_at, value) in points {
            if !value.is_finite() {
                continue;
            }
            let entry = sums.entry(self.bucket_start(captured_at)).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }

        sums.into_iter()
            .map(|(bucket_start_ms, (sum, count))| TimeBucket {
                bucket_start_ms,
                mean_value: sum / count as f64,
                sample_count: count,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: i64 = 60_000;

    #[test]
    fn test_zero_width_rejected() {
        assert_eq!(
            IntervalAggregator::new(0),
            Err(TelemetryError::InvalidBucketWidth { minutes: 0 })
        );
    }

    #[test]
    fn test_empty_input_yields_no_buckets() {
        let agg = IntervalAggregator::new(5).unwrap();
        assert!(agg.aggregate(Vec::new()).is_empty());
    }

    #[test]
    fn test_single_sample_bucket() {
        let agg = IntervalAggregator::new(1).unwrap();
        let buckets = agg.aggregate(vec![(90_000, 21.5)]);
        assert_eq!(
            buckets,
            vec![TimeBucket {
                bucket_start_ms: MIN,
                mean_value: 21.5,
                sample_count: 1
            }]
        );
    }

    #[test]
    fn test_unordered_points_are_bucketed_and_sorted() {
        let agg = IntervalAggregator::new(5).unwrap();
        let points = vec![
            (11 * MIN, 30.0),
            (MIN, 10.0),
            (4 * MIN + 59_999, 20.0),
            (5 * MIN, 40.0),
            (12 * MIN, 50.0),
        ];
        let buckets = agg.aggregate(points);

        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[0].bucket_start_ms, 0);
        assert_eq!(buckets[0].sample_count, 2);
        assert!((buckets[0].mean_value - 15.0).abs() < 1e-9);

        assert_eq!(buckets[1].bucket_start_ms, 5 * MIN);
        assert_eq!(buckets[1].sample_count, 1);
        assert!((buckets[1].mean_value - 40.0).abs() < 1e-9);

        assert_eq!(buckets[2].bucket_start_ms, 10 * MIN);
        assert!((buckets[2].mean_value - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_buckets_partition_input() {
        let agg = IntervalAggregator::new(3).unwrap();
        let width = agg.width_ms();
        let points: Vec<(i64, f64)> = (0..200)
            .map(|i| (1_700_000_000_000 + i * 7_919 % 2_000_000, (i % 13) as f64))
            .collect();
        let buckets = agg.aggregate(points.clone());

        let total: usize = buckets.iter().map(|b| b.sample_count).sum();
        assert_eq!(total, points.len());

        for bucket in &buckets {
            let members: Vec<f64> = points
                .iter()
                .filter(|(t, _)| *t >= bucket.bucket_start_ms && *t < bucket.bucket_start_ms + width)
                .map(|(_, v)| *v)
                .collect();
            assert_eq!(members.len(), bucket.sample_count);
            let mean = members.iter().sum::<f64>() / members.len() as f64;
            assert!((mean - bucket.mean_value).abs() < 1e-9);
        }

        for pair in buckets.windows(2) {
            assert!(pair[0].bucket_start_ms < pair[1].bucket_start_ms);
        }
    }

    #[test]
    fn test_pre_epoch_times_floor_downward() {
        let agg = IntervalAggregator::new(1).unwrap();
        assert_eq!(agg.bucket_start(-1), -MIN);
        assert_eq!(agg.bucket_start(-MIN), -MIN);
    }

    #[test]
    fn test_non_finite_values_skipped() {
        let agg = IntervalAggregator::new(1).unwrap();
        let buckets = agg.aggregate(vec![(0, f64::NAN), (1, 4.0), (2, f64::INFINITY)]);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].sample_count, 1);
        assert_eq!(buckets[0].mean_value, 4.0);
    }
}
