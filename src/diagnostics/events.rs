//! Diagnostics event types exposed to the CLI and any log consumer.

use serde::{Deserialize, Serialize};

use crate::analysis::classifier::SafetyLabel;

/// What started a fetch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FetchTrigger {
    /// First fetch after entering live mode
    LiveEntry,
    /// Periodic live refresh
    Refresh,
    /// Filtered-mode fetch (entry or explicit apply)
    Filter,
}

/// Store feeds the orchestrator subscribes to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Feed {
    Live,
    Fleet,
    Alerts,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionPhase {
    Opened,
    Disposed,
    Closed,
    Failed,
}

/// Diagnostic error codes surfaced via metrics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticError {
    StoreRead,
    StoreWrite,
    Subscription,
    Unknown,
}

/// Metric events covering fetches, record quality, classification and feeds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum MetricEvent {
    FetchCompleted {
        generation: u64,
        trigger: FetchTrigger,
        readings: usize,
        elapsed_ms: u64,
    },
    FetchFailed {
        generation: u64,
        trigger: FetchTrigger,
        code: i32,
        reason: String,
    },
    FetchSuperseded {
        generation: u64,
        latest: u64,
    },
    FetchLatency {
        avg_ms: f64,
        max_ms: f64,
        sample_count: usize,
    },
    RecordsDropped {
        code: i32,
        count: usize,
    },
    Classification {
        device_id: String,
        captured_at: i64,
        label: SafetyLabel,
        confidence_pct: Option<u8>,
    },
    FleetHealth {
        reporting: usize,
        total: usize,
        score_pct: u8,
    },
    SubscriptionLifecycle {
        feed: Feed,
        phase: SubscriptionPhase,
        timestamp_ms: i64,
    },
    Error {
        code: DiagnosticError,
        context: String,
    },
}
