// Telemetry normalization error types and constants

use crate::error::ErrorCode;
use log::warn;
use std::fmt;

/// Telemetry error code constants
///
/// Error code range: 2001-2006
pub struct TelemetryErrorCodes {}

impl TelemetryErrorCodes {
    /// ISO timestamp could not be parsed
    pub const MALFORMED_TIMESTAMP: i32 = 2001;

    /// Record carried no timestamp at all
    pub const MISSING_TIMESTAMP: i32 = 2002;

    /// Record carried neither temperature nor humidity
    pub const MISSING_READING: i32 = 2003;

    /// Bucket width must be greater than zero minutes
    pub const INVALID_BUCKET_WIDTH: i32 = 2004;

    /// Filter range start is after its end
    pub const INVALID_RANGE: i32 = 2005;

    /// Live refresh period must be greater than zero milliseconds
    pub const INVALID_REFRESH_PERIOD: i32 = 2006;
}

/// Log a telemetry error with structured context
///
/// Per-record errors are expected during normal operation, so this logs at
/// warn level rather than error.
pub fn log_telemetry_error(err: &TelemetryError, context: &str) {
    warn!(
        "Telemetry error in {}: code={}, component=Normalizer, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Telemetry normalization and aggregation errors
///
/// Per-record variants never abort a batch: the record is dropped and the
/// error is reported alongside the batch result.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryError {
    /// Unparsable ISO timestamp
    MalformedTimestamp { raw: String },

    /// No timestamp field on the record
    MissingTimestamp,

    /// Neither temperature nor humidity present
    MissingReading,

    /// Bucket width of zero minutes
    InvalidBucketWidth { minutes: u32 },

    /// Filter range with start after end
    InvalidRange { start_ms: i64, end_ms: i64 },

    /// Live refresh period of zero milliseconds
    InvalidRefreshPeriod { period_ms: u64 },
}

impl ErrorCode for TelemetryError {
    fn code(&self) -> i32 {
        match self {
            TelemetryError::MalformedTimestamp { .. } => TelemetryErrorCodes::MALFORMED_TIMESTAMP,
            TelemetryError::MissingTimestamp => TelemetryErrorCodes::MISSING_TIMESTAMP,
            TelemetryError::MissingReading => TelemetryErrorCodes::MISSING_READING,
            TelemetryError::InvalidBucketWidth { .. } => TelemetryErrorCodes::INVALID_BUCKET_WIDTH,
            TelemetryError::InvalidRange { .. } => TelemetryErrorCodes::INVALID_RANGE,
            TelemetryError::InvalidRefreshPeriod { .. } => {
                TelemetryErrorCodes::INVALID_REFRESH_PERIOD
            }
        }
    }

    fn message(&self) -> String {
        match self {
            TelemetryError::MalformedTimestamp { raw } => {
                format!("Malformed timestamp: {:?}", raw)
            }
            TelemetryError::MissingTimestamp => "Record has no timestamp".to_string(),
            TelemetryError::MissingReading => {
                "Record has neither temperature nor humidity".to_string()
            }
            TelemetryError::InvalidBucketWidth { minutes } => {
                format!("Bucket width must be greater than 0 minutes (got {})", minutes)
            }
            TelemetryError::InvalidRange { start_ms, end_ms } => {
                format!("Range start {} is after end {}", start_ms, end_ms)
            }
            TelemetryError::InvalidRefreshPeriod { period_ms } => {
                format!("Refresh period must be greater than 0 ms (got {})", period_ms)
            }
        }
    }
}

impl fmt::Display for TelemetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TelemetryError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for TelemetryError {}
