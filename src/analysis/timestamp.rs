//! Timestamp normalizer - reconciles mixed timestamp encodings
//!
//! Devices have written three encodings into the store over time:
//! - ISO-8601 strings
//! - absolute epoch milliseconds
//! - legacy `millis()` uptime counters with no epoch reference
//!
//! Legacy counters can only be placed on the wall clock relative to the
//! rest of their batch: the newest legacy sample is assumed contemporaneous
//! with the newest absolute sample in the same batch, or with "now" when the
//! batch has none. The same offset is applied to every legacy sample so their
//! relative ordering is preserved.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::error::TelemetryError;

/// 2000-01-01T00:00:00Z in epoch milliseconds. Numeric timestamps at or
/// above this are absolute; anything below is a device uptime counter.
pub const EPOCH_THRESHOLD_MS: i64 = 946_684_800_000;

/// Classified raw timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawTimestamp {
    Iso(String),
    AbsoluteMillis(i64),
    LegacyCounterMillis(i64),
}

impl RawTimestamp {
    /// Classify a numeric timestamp against [`EPOCH_THRESHOLD_MS`].
    pub fn from_number(value: f64) -> Self {
        let millis = value.floor() as i64;
        if millis >= EPOCH_THRESHOLD_MS {
            RawTimestamp::AbsoluteMillis(millis)
        } else {
            RawTimestamp::LegacyCounterMillis(millis)
        }
    }
}

/// First-pass resolution of a single timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedTimestamp {
    /// Already on the wall clock
    Absolute(i64),
    /// Uptime counter awaiting batch alignment
    Legacy(i64),
}

/// Stateless timestamp normalizer
pub struct TimestampNormalizer;

impl TimestampNormalizer {
    /// Parse an ISO-8601 string into epoch milliseconds.
    ///
    /// Accepts RFC 3339 (with offset), a date-time without offset (read as
    /// UTC), and a bare `YYYY-MM-DD` date (UTC midnight).
    pub fn parse_iso(text: &str) -> Result<i64, TelemetryError> {
        let trimmed = text.trim();
        if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(parsed.timestamp_millis());
        }
        for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
                return Ok(naive.and_utc().timestamp_millis());
            }
        }
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
            if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
                return Ok(midnight.and_utc().timestamp_millis());
            }
        }
        Err(TelemetryError::MalformedTimestamp {
            raw: text.to_string(),
        })
    }

    /// Resolve everything that can be resolved without the batch.
    pub fn resolve(raw: &RawTimestamp) -> Result<ResolvedTimestamp, TelemetryError> {
        match raw {
            RawTimestamp::Iso(text) => Self::parse_iso(text).map(ResolvedTimestamp::Absolute),
            RawTimestamp::AbsoluteMillis(ms) => Ok(ResolvedTimestamp::Absolute(*ms)),
            RawTimestamp::LegacyCounterMillis(ms) => Ok(ResolvedTimestamp::Legacy(*ms)),
        }
    }

    /// Offset that maps the newest legacy counter onto the anchor.
    ///
    /// The anchor is the newest absolute timestamp in the batch, or `now_ms`
    /// when the batch has no absolute timestamps.
    pub fn legacy_offset(anchor: Option<i64>, max_legacy: i64, now_ms: i64) -> i64 {
        anchor.unwrap_or(now_ms).saturating_sub(max_legacy)
    }

    /// Normalize a single timestamp given a precomputed legacy offset.
    ///
    /// Returns `Ok(None)` for a legacy counter when no offset is known;
    /// callers normally go through [`Self::normalize_batch`].
    pub fn normalize(
        raw: &RawTimestamp,
        legacy_offset: Option<i64>,
    ) -> Result<Option<i64>, TelemetryError> {
        match Self::resolve(raw)? {
            ResolvedTimestamp::Absolute(ms) => Ok(Some(ms)),
            ResolvedTimestamp::Legacy(ms) => Ok(legacy_offset.map(|offset| ms + offset)),
        }
    }

    /// Normalize a whole batch onto the wall clock.
    ///
    /// Output is index-aligned with the input; unparsable entries yield an
    /// error without affecting the rest of the batch.
    pub fn normalize_batch(raws: &[RawTimestamp], now_ms: i64) -> Vec<Result<i64, TelemetryError>> {
        let resolved: Vec<Result<ResolvedTimestamp, TelemetryError>> =
            raws.iter().map(Self::resolve).collect();

        let mut anchor: Option<i64> = None;
        let mut max_legacy: Option<i64> = None;
        for entry in resolved.iter().flatten() {
            match *entry {
                ResolvedTimestamp::Absolute(ms) => {
                    anchor = Some(anchor.map_or(ms, |current| current.max(ms)));
                }
                ResolvedTimestamp::Legacy(ms) => {
                    max_legacy = Some(max_legacy.map_or(ms, |current| current.max(ms)));
                }
            }
        }

        let offset = max_legacy.map(|max| Self::legacy_offset(anchor, max, now_ms));

        resolved
            .into_iter()
            .map(|entry| {
                entry.map(|resolved| match resolved {
                    ResolvedTimestamp::Absolute(ms) => ms,
                    // offset is always Some when a legacy entry exists
                    ResolvedTimestamp::Legacy(ms) => ms + offset.unwrap_or(0),
                })
            })
            .collect()
    }
}
