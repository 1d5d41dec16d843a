//! Alert frequency aggregator - alert counts by type
//!
//! The tally is rebuilt from the full visible alert set on every call; no
//! delta state is kept between evaluations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::analysis::timestamp::TimestampNormalizer;
use crate::reading::RawAlertRecord;

/// Type assigned to alerts that arrive without one
pub const UNKNOWN_ALERT_TYPE: &str = "Unknown";

/// One alert from the alert feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub occurred_at: Option<i64>,
}

impl AlertEvent {
    pub fn from_record(record: &RawAlertRecord) -> Self {
        let kind = record
            .kind
            .as_deref()
            .filter(|kind| !kind.is_empty())
            .unwrap_or(UNKNOWN_ALERT_TYPE)
            .to_string();
        let occurred_at = record
            .timestamp
            .as_ref()
            .and_then(|ts| TimestampNormalizer::normalize(&ts.classify(), None).ok().flatten());
        Self { kind, occurred_at }
    }
}

/// Count alerts per type, ordered by type name.
pub fn alert_frequency(alerts: &[AlertEvent]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for alert in alerts {
        *counts.entry(alert.kind.clone()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(kind: &str) -> AlertEvent {
        AlertEvent {
            kind: kind.to_string(),
            occurred_at: None,
        }
    }

    #[test]
    fn test_counts_by_type() {
        let alerts = vec![
            alert("Temperature"),
            alert("Power"),
            alert("Temperature"),
            alert("Battery"),
            alert("Temperature"),
        ];
        let counts = alert_frequency(&alerts);
        assert_eq!(counts.get("Temperature"), Some(&3));
        assert_eq!(counts.get("Power"), Some(&1));
        assert_eq!(counts.get("Battery"), Some(&1));
        assert_eq!(counts.len(), 3);
    }

    #[test]
    fn test_empty_set() {
        assert!(alert_frequency(&[]).is_empty());
    }

    #[test]
    fn test_recomputed_from_scratch() {
        let first = alert_frequency(&[alert("Power"), alert("Power")]);
        let second = alert_frequency(&[alert("Power")]);
        assert_eq!(first.get("Power"), Some(&2));
        assert_eq!(second.get("Power"), Some(&1));
    }

    #[test]
    fn test_missing_or_empty_type_is_unknown() {
        let missing = AlertEvent::from_record(&RawAlertRecord::default());
        assert_eq!(missing.kind, UNKNOWN_ALERT_TYPE);

        let empty = AlertEvent::from_record(&RawAlertRecord {
            kind: Some(String::new()),
            timestamp: None,
        });
        assert_eq!(empty.kind, UNKNOWN_ALERT_TYPE);
    }
}
