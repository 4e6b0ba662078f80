//! Error types for rust_diffex

use thiserror::Error;

/// Main error type for differential expression operations
#[derive(Error, Debug)]
pub enum DiffexError {
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("Design inconsistency: {reason}")]
    DesignInconsistency { reason: String },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: String, got: String },

    #[error("Fitting engine failure: {reason}")]
    EngineFailure { reason: String },

    #[error("Model fit timed out after {seconds:.1}s")]
    FitTimedOut { seconds: f64 },

    #[error("Invariant violated: {reason}")]
    InvariantViolation { reason: String },

    #[error("Empty data: {reason}")]
    EmptyData { reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl DiffexError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        DiffexError::InvalidInput { reason: reason.into() }
    }

    pub(crate) fn inconsistent(reason: impl Into<String>) -> Self {
        DiffexError::DesignInconsistency { reason: reason.into() }
    }
}

/// Result type alias for differential expression operations
pub type Result<T> = std::result::Result<T, DiffexError>;
