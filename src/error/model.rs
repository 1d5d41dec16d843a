// Classifier model error types and constants

use crate::error::ErrorCode;
use std::fmt;

/// Model error code constants
///
/// Error code range: 3001-3002
pub struct ModelErrorCodes {}

impl ModelErrorCodes {
    /// No model loaded
    pub const UNAVAILABLE: i32 = 3001;

    /// Model returned a vector that is not a probability distribution
    pub const INVALID_OUTPUT: i32 = 3002;
}

/// Errors from the classifier model collaborator
///
/// Neither variant is surfaced to classifier callers: both degrade the
/// classification to rule-only output.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelError {
    /// No model loaded
    Unavailable,

    /// Output vector rejected
    InvalidOutput { reason: String },
}

impl ErrorCode for ModelError {
    fn code(&self) -> i32 {
        match self {
            ModelError::Unavailable => ModelErrorCodes::UNAVAILABLE,
            ModelError::InvalidOutput { .. } => ModelErrorCodes::INVALID_OUTPUT,
        }
    }

    fn message(&self) -> String {
        match self {
            ModelError::Unavailable => "Classifier model not loaded".to_string(),
            ModelError::InvalidOutput { reason } => {
                format!("Invalid model output: {}", reason)
            }
        }
    }
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ModelError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for ModelError {}
