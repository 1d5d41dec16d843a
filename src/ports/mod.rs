//! Collaborator ports
//!
//! The orchestrator and classifier only talk to the outside world through
//! these traits so tests and the CLI can substitute in-memory versions:
//! - [`TelemetryStore`]: remote key-value store (history, live feed, control)
//! - [`ClassifierModel`]: optional probabilistic safety model
//! - [`AuditSink`]: fire-and-forget record of every classification
//! - [`Clock`]: wall-clock time

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::analysis::classifier::ClassificationResult;
use crate::error::{ModelError, StoreError};
use crate::reading::{ControlCommand, RawAlertRecord, RawDeviceRecord, RawTelemetryRecord};

pub mod memory;

pub use memory::InMemoryStore;

/// Cancels a subscription. Runs its teardown exactly once, either through
/// [`Disposer::dispose`] or when dropped.
pub struct Disposer {
    teardown: Option<Box<dyn FnOnce() + Send>>,
}

impl Disposer {
    pub fn new<F>(teardown: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            teardown: Some(Box::new(teardown)),
        }
    }

    /// Disposer with nothing to tear down
    pub fn noop() -> Self {
        Self { teardown: None }
    }

    pub fn dispose(mut self) {
        self.run();
    }

    fn run(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

impl Drop for Disposer {
    fn drop(&mut self) {
        self.run();
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposer")
            .field("pending", &self.teardown.is_some())
            .finish()
    }
}

/// Stream of store updates plus the handle that cancels it
#[derive(Debug)]
pub struct Subscription<T> {
    receiver: mpsc::UnboundedReceiver<T>,
    disposer: Disposer,
}

impl<T> Subscription<T> {
    pub fn new(receiver: mpsc::UnboundedReceiver<T>, disposer: Disposer) -> Self {
        Self { receiver, disposer }
    }

    /// Next update, or `None` once the store side closes
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    pub fn into_parts(self) -> (mpsc::UnboundedReceiver<T>, Disposer) {
        (self.receiver, self.disposer)
    }

    pub fn dispose(self) {
        self.disposer.dispose();
    }
}

/// Remote telemetry store
///
/// `fetch_range` bounds are a hint: implementations may return records
/// outside them (legacy counters cannot be filtered before alignment), and
/// callers re-filter after normalization.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    async fn fetch_range(
        &self,
        device_id: &str,
        start_ms: Option<i64>,
        end_ms: Option<i64>,
    ) -> Result<Vec<RawTelemetryRecord>, StoreError>;

    /// Live record feed of one device
    async fn subscribe(
        &self,
        device_id: &str,
    ) -> Result<Subscription<RawTelemetryRecord>, StoreError>;

    /// Full fleet snapshot on every change
    async fn subscribe_fleet(&self) -> Result<Subscription<Vec<RawDeviceRecord>>, StoreError>;

    /// Full alert set on every change
    async fn subscribe_alerts(&self) -> Result<Subscription<Vec<RawAlertRecord>>, StoreError>;

    async fn write_control(&self, device_id: &str, command: ControlCommand)
        -> Result<(), StoreError>;
}

/// Probabilistic safety model over `[temperature_c, humidity_pct]`.
///
/// Returns one probability per [`crate::analysis::SafetyLabel`] in
/// ascending severity order.
#[async_trait]
pub trait ClassifierModel: Send + Sync {
    async fn predict(&self, features: [f64; 2]) -> Result<Vec<f64>, ModelError>;
}

/// Receives every classification result. Failures are ignored by callers.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, result: &ClassificationResult) -> anyhow::Result<()>;
}

/// Wall-clock source in epoch milliseconds
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Clock backed by the system time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Settable clock for deterministic runs
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_disposer_runs_once_on_dispose() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let disposer = Disposer::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        disposer.dispose();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disposer_runs_on_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        {
            let _disposer = Disposer::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_subscription_delivers_then_closes() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscription = Subscription::new(rx, Disposer::noop());
        tx.send(7).unwrap();
        drop(tx);
        assert_eq!(subscription.recv().await, Some(7));
        assert_eq!(subscription.recv().await, None);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1_000);
        clock.advance(500);
        assert_eq!(clock.now_ms(), 1_500);
        clock.set(42);
        assert_eq!(clock.now_ms(), 42);
    }

    #[test]
    fn test_system_clock_is_past_2020() {
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }
}
