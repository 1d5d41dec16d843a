//! Diagnostics collector and helpers.
//!
//! The collector multiplexes fetch outcomes, dropped-record counts,
//! classifications and feed lifecycle events into a bounded history plus an
//! async broadcast stream.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use tokio::sync::{broadcast, mpsc};

use crate::analysis::classifier::ClassificationResult;
use crate::analysis::fleet::FleetHealth;
use crate::analysis::pipeline::DroppedRecord;
use crate::error::ErrorCode;
use crate::ports::AuditSink;

pub mod events;

pub use events::{DiagnosticError, Feed, FetchTrigger, MetricEvent, SubscriptionPhase};

/// Global diagnostics hub shared across the crate.
static HUB: Lazy<DiagnosticsHub> = Lazy::new(DiagnosticsHub::default);

/// Access the global diagnostics hub.
pub fn hub() -> &'static DiagnosticsHub {
    &HUB
}

/// Snapshot of collector state for CLI reporting.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DiagnosticsSnapshot {
    pub recent: Vec<MetricEvent>,
    pub total_events: u64,
    pub dropped_events: u64,
}

/// Broadcast-based collector retaining a bounded history of metrics.
pub struct DiagnosticsCollector {
    tx: broadcast::Sender<MetricEvent>,
    history: Mutex<VecDeque<MetricEvent>>,
    history_capacity: usize,
    total_events: AtomicU64,
    dropped_history: AtomicU64,
}

impl DiagnosticsCollector {
    pub fn new(buffer: usize, history_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer);
        Self {
            tx,
            history: Mutex::new(VecDeque::with_capacity(history_capacity)),
            history_capacity,
            total_events: AtomicU64::new(0),
            dropped_history: AtomicU64::new(0),
        }
    }

    pub fn publish(&self, event: MetricEvent) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        {
            let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
            if history.len() == self.history_capacity {
                history.pop_front();
                self.dropped_history.fetch_add(1, Ordering::Relaxed);
            }
            history.push_back(event.clone());
        }

        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MetricEvent> {
        self.tx.subscribe()
    }

    /// Forward the broadcast into an unbounded channel. Requires a runtime.
    pub fn subscribe_unbounded(&self) -> mpsc::UnboundedReceiver<MetricEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut broadcast_rx = self.tx.subscribe();

        tokio::spawn(async move {
            while let Ok(event) = broadcast_rx.recv().await {
                if tx.send(event).is_err() {
                    break;
                }
            }
        });

        rx
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        DiagnosticsSnapshot {
            recent: history.iter().cloned().collect(),
            total_events: self.total_events.load(Ordering::Relaxed),
            dropped_events: self.dropped_history.load(Ordering::Relaxed),
        }
    }
}

impl Default for DiagnosticsCollector {
    fn default() -> Self {
        Self::new(256, 64)
    }
}

/// Rolling window of fetch durations for avg/max latency.
struct LatencyTracker {
    samples: VecDeque<f64>,
    max_samples: usize,
}

impl LatencyTracker {
    fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples,
        }
    }

    fn observe(&mut self, value: f64) -> (f64, f64, usize) {
        if self.samples.len() == self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(value.abs());

        let count = self.samples.len();
        let sum: f64 = self.samples.iter().copied().sum();
        let max = self
            .samples
            .iter()
            .copied()
            .fold(0.0_f64, |acc, next| acc.max(next));
        let avg = if count == 0 { 0.0 } else { sum / count as f64 };
        (avg, max, count)
    }
}

/// Top-level hub wrapping collector state plus derived gauges.
pub struct DiagnosticsHub {
    collector: DiagnosticsCollector,
    latency: Mutex<LatencyTracker>,
    last_fleet_score: Mutex<Option<u8>>,
}

impl DiagnosticsHub {
    pub fn new(channel_capacity: usize, history_capacity: usize, latency_window: usize) -> Self {
        Self {
            collector: DiagnosticsCollector::new(channel_capacity, history_capacity),
            latency: Mutex::new(LatencyTracker::new(latency_window)),
            last_fleet_score: Mutex::new(None),
        }
    }

    pub fn collector(&self) -> &DiagnosticsCollector {
        &self.collector
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        self.collector.snapshot()
    }

    pub fn record_fetch_completed(
        &self,
        generation: u64,
        trigger: FetchTrigger,
        readings: usize,
        elapsed_ms: u64,
    ) {
        self.collector.publish(MetricEvent::FetchCompleted {
            generation,
            trigger,
            readings,
            elapsed_ms,
        });

        let (avg, max, count) = {
            let mut tracker = self.latency.lock().unwrap_or_else(PoisonError::into_inner);
            tracker.observe(elapsed_ms as f64)
        };

        self.collector.publish(MetricEvent::FetchLatency {
            avg_ms: avg,
            max_ms: max,
            sample_count: count,
        });
    }

    pub fn record_fetch_failed<E: ErrorCode>(&self, generation: u64, trigger: FetchTrigger, err: &E) {
        self.collector.publish(MetricEvent::FetchFailed {
            generation,
            trigger,
            code: err.code(),
            reason: err.message(),
        });
    }

    pub fn record_fetch_superseded(&self, generation: u64, latest: u64) {
        self.collector
            .publish(MetricEvent::FetchSuperseded { generation, latest });
    }

    /// One event per drop reason present in the batch
    pub fn record_dropped(&self, dropped: &[DroppedRecord]) {
        let mut by_code: BTreeMap<i32, usize> = BTreeMap::new();
        for entry in dropped {
            *by_code.entry(entry.reason.code()).or_default() += 1;
        }
        for (code, count) in by_code {
            self.collector
                .publish(MetricEvent::RecordsDropped { code, count });
        }
    }

    pub fn record_classification(&self, result: &ClassificationResult) {
        self.collector.publish(MetricEvent::Classification {
            device_id: result.device_id.clone(),
            captured_at: result.captured_at,
            label: result.label,
            confidence_pct: result.confidence_pct,
        });
    }

    /// Emits only when the score changes
    pub fn record_fleet_health(&self, health: &FleetHealth) {
        let mut last = self
            .last_fleet_score
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *last == Some(health.score_pct) {
            return;
        }
        *last = Some(health.score_pct);
        self.collector.publish(MetricEvent::FleetHealth {
            reporting: health.reporting,
            total: health.total,
            score_pct: health.score_pct,
        });
    }

    pub fn record_subscription(&self, feed: Feed, phase: SubscriptionPhase) {
        self.collector.publish(MetricEvent::SubscriptionLifecycle {
            feed,
            phase,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        });
    }

    pub fn record_error(&self, code: DiagnosticError, context: impl Into<String>) {
        self.collector.publish(MetricEvent::Error {
            code,
            context: context.into(),
        });
    }
}

impl Default for DiagnosticsHub {
    fn default() -> Self {
        Self::new(256, 64, 32)
    }
}

#[async_trait]
impl AuditSink for DiagnosticsHub {
    async fn record(&self, result: &ClassificationResult) -> anyhow::Result<()> {
        self.record_classification(result);
        Ok(())
    }
}

/// Audit sink that writes into the global [`hub`].
#[derive(Debug, Default, Clone, Copy)]
pub struct HubAudit;

#[async_trait]
impl AuditSink for HubAudit {
    async fn record(&self, result: &ClassificationResult) -> anyhow::Result<()> {
        hub().record(result).await
    }
}
