//! Fleet health scorer - share of devices reporting within a staleness window

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::analysis::timestamp::{RawTimestamp, TimestampNormalizer};
use crate::reading::RawDeviceRecord;

/// Latest report time of one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceHealthSample {
    pub device_id: String,
    /// Absolute epoch millis of the last report, `None` when the device has
    /// never reported a wall-clock timestamp
    pub last_seen_ms: Option<i64>,
}

impl DeviceHealthSample {
    /// Build a sample from a fleet feed entry.
    ///
    /// Legacy uptime counters cannot be placed on the wall clock without a
    /// batch anchor, so they count as "never seen".
    pub fn from_record(record: &RawDeviceRecord) -> Self {
        let last_seen_ms = record
            .timestamp
            .as_ref()
            .map(|ts| ts.classify())
            .and_then(|raw| match raw {
                RawTimestamp::LegacyCounterMillis(_) => None,
                other => TimestampNormalizer::normalize(&other, None).ok().flatten(),
            });
        Self {
            device_id: record.device_id.clone(),
            last_seen_ms,
        }
    }
}

/// Result of one fleet evaluation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetHealth {
    pub reporting: usize,
    pub total: usize,
    /// `round(100 * reporting / total)`, 0 for an empty fleet
    pub score_pct: u8,
}

/// Evaluate fleet health at `now_ms`.
///
/// A device is reporting iff `now_ms - last_seen_ms < window_ms`.
pub fn fleet_health(
    devices: &HashMap<String, DeviceHealthSample>,
    window_ms: i64,
    now_ms: i64,
) -> FleetHealth {
    let total = devices.len();
    let reporting = devices
        .values()
        .filter(|sample| {
            sample
                .last_seen_ms
                .is_some_and(|seen| now_ms.saturating_sub(seen) < window_ms)
        })
        .count();

    let score_pct = if total == 0 {
        0
    } else {
        (100.0 * reporting as f64 / total as f64).round() as u8
    };

    FleetHealth {
        reporting,
        total,
        score_pct,
    }
}
