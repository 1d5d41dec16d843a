// Managers Module
//
// Focused managers owned by the orchestrator:
// - BroadcastChannelManager: Tokio broadcast channels for snapshots and
//   classification results

pub mod broadcast_manager;

pub use broadcast_manager::BroadcastChannelManager;
