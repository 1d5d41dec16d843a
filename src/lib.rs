// Cabin Telemetry Core - vehicle cabin safety monitoring
// Timestamp normalization, trend aggregation, safety classification and
// live/filtered stream orchestration over a remote telemetry store

// Module declarations
pub mod analysis;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod managers;
pub mod ports;
pub mod reading;

// Re-exports for convenience
pub use analysis::{ClassificationResult, SafetyClassifier, SafetyLabel};
pub use config::AppConfig;
pub use engine::{DisplaySnapshot, FetchStatus, RetrievalMode, StreamOrchestrator};
pub use error::{ErrorCode, ModelError, OrchestratorError, StoreError, TelemetryError};
pub use reading::{ControlCommand, RawTelemetryRecord, TelemetryReading};
