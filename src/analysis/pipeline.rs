//! Batch pipeline - raw store records to normalized readings and display series
//!
//! Order of operations for a fetched batch:
//! 1. drop records with no temperature and no humidity
//! 2. drop records with a missing timestamp
//! 3. align timestamps over the remaining batch (legacy counters included)
//! 4. drop records whose timestamp could not be parsed
//! 5. keep readings inside the inclusive `[start, end]` window
//! 6. stable sort by capture time

use serde::{Deserialize, Serialize};

use crate::analysis::aggregator::{IntervalAggregator, TimeBucket};
use crate::analysis::range::{display_range, DisplayRange};
use crate::analysis::timestamp::{RawTimestamp, TimestampNormalizer};
use crate::error::TelemetryError;
use crate::reading::{RawTelemetryRecord, TelemetryReading};

/// Inclusive time window; open ends are unbounded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start_ms: Option<i64>,
    pub end_ms: Option<i64>,
}

impl TimeWindow {
    pub const UNBOUNDED: TimeWindow = TimeWindow {
        start_ms: None,
        end_ms: None,
    };

    /// Bounded window.
    ///
    /// # Errors
    /// `InvalidRange` when `start_ms > end_ms`.
    pub fn between(start_ms: i64, end_ms: i64) -> Result<Self, TelemetryError> {
        if start_ms > end_ms {
            return Err(TelemetryError::InvalidRange { start_ms, end_ms });
        }
        Ok(Self {
            start_ms: Some(start_ms),
            end_ms: Some(end_ms),
        })
    }

    /// Window covering `lookback_ms` up to and including `now_ms`
    pub fn trailing(lookback_ms: i64, now_ms: i64) -> Self {
        Self {
            start_ms: Some(now_ms.saturating_sub(lookback_ms)),
            end_ms: Some(now_ms),
        }
    }

    pub fn contains(&self, at_ms: i64) -> bool {
        self.start_ms.map_or(true, |start| at_ms >= start)
            && self.end_ms.map_or(true, |end| at_ms <= end)
    }
}

/// A record removed from a batch and why
#[derive(Debug, Clone, PartialEq)]
pub struct DroppedRecord {
    /// Position in the input batch
    pub index: usize,
    pub reason: TelemetryError,
}

/// Result of normalizing one fetched batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedBatch {
    /// Readings inside the window, sorted by `captured_at`
    pub readings: Vec<TelemetryReading>,
    /// Input position of each entry in `readings`
    pub source_indices: Vec<usize>,
    pub dropped: Vec<DroppedRecord>,
}

/// Normalize a batch of raw records for one device.
pub fn normalize_batch(
    records: &[RawTelemetryRecord],
    device_id: &str,
    window: TimeWindow,
    now_ms: i64,
) -> NormalizedBatch {
    let mut dropped = Vec::new();
    let mut candidates: Vec<(usize, &RawTelemetryRecord, RawTimestamp)> = Vec::new();

    for (index, record) in records.iter().enumerate() {
        if !record.has_reading() {
            dropped.push(DroppedRecord {
                index,
                reason: TelemetryError::MissingReading,
            });
            continue;
        }
        match &record.timestamp {
            Some(value) => candidates.push((index, record, value.classify())),
            None => dropped.push(DroppedRecord {
                index,
                reason: TelemetryError::MissingTimestamp,
            }),
        }
    }

    let raws: Vec<RawTimestamp> = candidates.iter().map(|(_, _, raw)| raw.clone()).collect();
    let resolved = TimestampNormalizer::normalize_batch(&raws, now_ms);

    let mut kept = Vec::with_capacity(candidates.len());
    for ((index, record, _), timestamp) in candidates.into_iter().zip(resolved) {
        let reading = timestamp.and_then(|captured_at| record.to_reading(device_id, captured_at));
        match reading {
            Ok(reading) if window.contains(reading.captured_at) => kept.push((index, reading)),
            Ok(_) => {}
            Err(reason) => dropped.push(DroppedRecord { index, reason }),
        }
    }

    // Vec::sort_by_key is stable
    kept.sort_by_key(|(_, reading)| reading.captured_at);
    dropped.sort_by_key(|entry| entry.index);
    let (source_indices, readings) = kept.into_iter().unzip();

    NormalizedBatch {
        readings,
        source_indices,
        dropped,
    }
}

/// Aggregated series plus its padded display range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesView {
    pub buckets: Vec<TimeBucket>,
    pub range: DisplayRange,
}

impl Default for SeriesView {
    fn default() -> Self {
        Self {
            buckets: Vec::new(),
            range: DisplayRange::DEFAULT,
        }
    }
}

/// Bucket one metric of the readings and compute its display range.
///
/// Readings where `select` yields `None` are skipped, never treated as zero.
pub fn build_series<F>(
    readings: &[TelemetryReading],
    aggregator: &IntervalAggregator,
    select: F,
    clamp: Option<(f64, f64)>,
) -> SeriesView
where
    F: Fn(&TelemetryReading) -> Option<f64>,
{
    let buckets = aggregator.aggregate(
        readings
            .iter()
            .filter_map(|reading| select(reading).map(|value| (reading.captured_at, value))),
    );
    let means: Vec<f64> = buckets.iter().map(|bucket| bucket.mean_value).collect();
    let range = display_range(&means, clamp);
    SeriesView { buckets, range }
}

/// Temperature series (unclamped)
pub fn temperature_series(
    readings: &[TelemetryReading],
    aggregator: &IntervalAggregator,
) -> SeriesView {
    build_series(readings, aggregator, |r| r.temperature_c, None)
}

/// Humidity series, range clamped to 0..=100
pub fn humidity_series(readings: &[TelemetryReading], aggregator: &IntervalAggregator) -> SeriesView {
    build_series(
        readings,
        aggregator,
        |r| r.humidity_pct,
        Some(DisplayRange::PERCENT),
    )
}

/// Merge a pushed reading into a sorted cache, keeping only `window`.
///
/// A reading with the same `captured_at` as a cached one replaces it.
pub fn merge_reading(cache: &mut Vec<TelemetryReading>, reading: TelemetryReading, window: TimeWindow) {
    cache.retain(|cached| window.contains(cached.captured_at));
    if !window.contains(reading.captured_at) {
        return;
    }
    match cache.binary_search_by_key(&reading.captured_at, |cached| cached.captured_at) {
        Ok(position) => cache[position] = reading,
        Err(position) => cache.insert(position, reading),
    }
}
