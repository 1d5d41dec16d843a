use std::time::Duration;

use futures::Stream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{DisplaySnapshot, OrchestratorEvent, StreamOrchestrator};
use crate::analysis::ClassificationResult;

/// Forward a store subscription into the orchestrator's event channel.
///
/// Sends `closed` once if the store side ends the feed. Stops silently when
/// the orchestrator is gone.
pub(super) fn forward_feed<T, F>(
    mut receiver: mpsc::UnboundedReceiver<T>,
    events_tx: mpsc::UnboundedSender<OrchestratorEvent>,
    wrap: F,
    closed: OrchestratorEvent,
) -> JoinHandle<()>
where
    T: Send + 'static,
    F: Fn(T) -> OrchestratorEvent + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(item) = receiver.recv().await {
            if events_tx.send(wrap(item)).is_err() {
                return;
            }
        }
        let _ = events_tx.send(closed);
    })
}

/// Tick every `period` for one live session. The first tick fires one
/// period after start; the entry fetch covers time zero.
pub(super) fn spawn_refresh_timer(
    period: Duration,
    events_tx: mpsc::UnboundedSender<OrchestratorEvent>,
    session: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval_at(time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if events_tx.send(OrchestratorEvent::Tick { session }).is_err() {
                break;
            }
        }
    })
}

/// Copy a broadcast receiver into an unbounded channel, skipping over lag.
fn forward_broadcast<T>(mut broadcast_rx: broadcast::Receiver<T>) -> mpsc::UnboundedReceiver<T>
where
    T: Clone + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            match broadcast_rx.recv().await {
                Ok(item) => {
                    if tx.send(item).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("[Orchestrator] Subscriber lagged, skipped {} updates", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    rx
}

/// Like [`forward_broadcast`]; a missing channel yields an already closed receiver.
fn forward_optional<T>(broadcast_rx: Option<broadcast::Receiver<T>>) -> mpsc::UnboundedReceiver<T>
where
    T: Clone + Send + 'static,
{
    match broadcast_rx {
        Some(broadcast_rx) => forward_broadcast(broadcast_rx),
        None => mpsc::unbounded_channel().1,
    }
}

impl StreamOrchestrator {
    // ========================================================================
    // STREAM SUBSCRIPTIONS
    // ========================================================================

    /// Returns None only if the snapshot channel was never initialized.
    pub fn subscribe_snapshots(&self) -> Option<broadcast::Receiver<DisplaySnapshot>> {
        self.broadcasts.subscribe_snapshots()
    }

    pub fn subscribe_classification(&self) -> Option<broadcast::Receiver<ClassificationResult>> {
        self.broadcasts.subscribe_classification()
    }

    pub fn subscribe_snapshots_unbounded(&self) -> mpsc::UnboundedReceiver<DisplaySnapshot> {
        forward_optional(self.broadcasts.subscribe_snapshots())
    }

    pub fn subscribe_classification_unbounded(
        &self,
    ) -> mpsc::UnboundedReceiver<ClassificationResult> {
        forward_optional(self.broadcasts.subscribe_classification())
    }

    // ========================================================================
    // ASYNC STREAM ADAPTERS
    // ========================================================================

    pub fn snapshot_stream(&self) -> impl Stream<Item = DisplaySnapshot> + Unpin {
        UnboundedReceiverStream::new(self.subscribe_snapshots_unbounded())
    }

    pub fn classification_stream(&self) -> impl Stream<Item = ClassificationResult> + Unpin {
        UnboundedReceiverStream::new(self.subscribe_classification_unbounded())
    }
}
