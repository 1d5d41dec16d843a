// BroadcastChannelManager: Centralized tokio broadcast channel management
// Single Responsibility: Broadcast channel lifecycle and subscription

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;

use crate::analysis::ClassificationResult;
use crate::engine::DisplaySnapshot;

/// Manages the orchestrator's outbound broadcast channels
///
/// Single Responsibility: Broadcast channel lifecycle and subscription
///
/// # Channel Types
/// - Snapshot: full display snapshot after every applied change
/// - Classification: each classification of a live reading
pub struct BroadcastChannelManager {
    snapshots: Arc<Mutex<Option<broadcast::Sender<DisplaySnapshot>>>>,
    classification: Arc<Mutex<Option<broadcast::Sender<ClassificationResult>>>>,
}

impl BroadcastChannelManager {
    /// Create a new BroadcastChannelManager with all channels uninitialized
    ///
    /// Channels must be explicitly initialized via init_* methods before use.
    pub fn new() -> Self {
        Self {
            snapshots: Arc::new(Mutex::new(None)),
            classification: Arc::new(Mutex::new(None)),
        }
    }

    // ========================================================================
    // SNAPSHOT CHANNEL
    // ========================================================================

    /// Initialize the display snapshot channel
    ///
    /// # Notes
    /// - Buffer size: 32 snapshots; slow consumers lag and skip ahead, which
    ///   is harmless because every snapshot is complete
    pub fn init_snapshots(&self) -> broadcast::Sender<DisplaySnapshot> {
        let (tx, _) = broadcast::channel(32);
        *self
            .snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(tx.clone());
        tx
    }

    /// Subscribe to display snapshots
    ///
    /// Returns None if init_snapshots() has not been called yet.
    pub fn subscribe_snapshots(&self) -> Option<broadcast::Receiver<DisplaySnapshot>> {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|tx| tx.subscribe())
    }

    // ========================================================================
    // CLASSIFICATION CHANNEL
    // ========================================================================

    /// Initialize classification broadcast channel
    ///
    /// Buffer size: 100 messages to absorb bursts of pushed readings.
    pub fn init_classification(&self) -> broadcast::Sender<ClassificationResult> {
        let (tx, _) = broadcast::channel(100);
        *self
            .classification
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(tx.clone());
        tx
    }

    /// Subscribe to classification results
    ///
    /// Returns None if init_classification() has not been called yet.
    pub fn subscribe_classification(&self) -> Option<broadcast::Receiver<ClassificationResult>> {
        self.classification
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|tx| tx.subscribe())
    }
}

impl Default for BroadcastChannelManager {
    fn default() -> Self {
        Self::new()
    }
}
