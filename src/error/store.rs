// Store error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Store error code constants
///
/// Error code range: 1001-1005
pub struct StoreErrorCodes {}

impl StoreErrorCodes {
    /// Device id was empty on fetch/subscribe/write
    pub const MISSING_DEVICE_ID: i32 = 1001;

    /// Historical read failed (network, permission)
    pub const READ_FAILED: i32 = 1002;

    /// Control command delivery failed
    pub const WRITE_FAILED: i32 = 1003;

    /// Subscription could not be opened or closed unexpectedly
    pub const SUBSCRIPTION_FAILED: i32 = 1004;

    /// LED command issued while remote override is disabled
    pub const OVERRIDE_REQUIRED: i32 = 1005;
}

/// Log a store error with structured context
///
/// The logging is non-blocking and will not panic on failure.
pub fn log_store_error(err: &StoreError, context: &str) {
    error!(
        "Store error in {}: code={}, component=TelemetryStore, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Errors raised by the telemetry store collaborator
///
/// Read failures are turned into observable orchestrator state; write
/// failures are surfaced to the caller and never retried.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Precondition violation: no device id configured
    MissingDeviceId,

    /// Historical fetch failed
    ReadFailed { reason: String },

    /// Control write failed
    WriteFailed { reason: String },

    /// Subscription failed to open or its transport closed
    SubscriptionFailed { reason: String },

    /// LED command rejected because manual override is off
    OverrideRequired,
}

impl ErrorCode for StoreError {
    fn code(&self) -> i32 {
        match self {
            StoreError::MissingDeviceId => StoreErrorCodes::MISSING_DEVICE_ID,
            StoreError::ReadFailed { .. } => StoreErrorCodes::READ_FAILED,
            StoreError::WriteFailed { .. } => StoreErrorCodes::WRITE_FAILED,
            StoreError::SubscriptionFailed { .. } => StoreErrorCodes::SUBSCRIPTION_FAILED,
            StoreError::OverrideRequired => StoreErrorCodes::OVERRIDE_REQUIRED,
        }
    }

    fn message(&self) -> String {
        match self {
            StoreError::MissingDeviceId => "Missing deviceId".to_string(),
            StoreError::ReadFailed { reason } => format!("Store read failed: {}", reason),
            StoreError::WriteFailed { reason } => format!("Store write failed: {}", reason),
            StoreError::SubscriptionFailed { reason } => {
                format!("Subscription failed: {}", reason)
            }
            StoreError::OverrideRequired => {
                "Enable manual override before sending LED commands".to_string()
            }
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StoreError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for StoreError {}
