// Error types for the cabin telemetry core
//
// This module defines custom error types for store access, telemetry
// normalization and model inference, providing structured error handling
// with stable numeric codes suitable for logs and diagnostics events.

mod model;
mod store;
mod telemetry;

pub use model::{ModelError, ModelErrorCodes};
pub use store::{log_store_error, StoreError, StoreErrorCodes};
pub use telemetry::{log_telemetry_error, TelemetryError, TelemetryErrorCodes};

use std::fmt;

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling across
/// the orchestrator, diagnostics hub and CLI.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}

/// Errors returned by orchestrator mode changes
///
/// Wraps the precondition failures of the two families a mode change can
/// hit: a missing device id and an invalid filter range.
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorError {
    Store(StoreError),
    Telemetry(TelemetryError),
}

impl From<StoreError> for OrchestratorError {
    fn from(err: StoreError) -> Self {
        OrchestratorError::Store(err)
    }
}

impl From<TelemetryError> for OrchestratorError {
    fn from(err: TelemetryError) -> Self {
        OrchestratorError::Telemetry(err)
    }
}

impl ErrorCode for OrchestratorError {
    fn code(&self) -> i32 {
        match self {
            OrchestratorError::Store(err) => err.code(),
            OrchestratorError::Telemetry(err) => err.code(),
        }
    }

    fn message(&self) -> String {
        match self {
            OrchestratorError::Store(err) => err.message(),
            OrchestratorError::Telemetry(err) => err.message(),
        }
    }
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorError::Store(err) => err.fmt(f),
            OrchestratorError::Telemetry(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for OrchestratorError {}
