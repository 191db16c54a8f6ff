//! Error types for Crucible
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur in Crucible
#[derive(Debug, Error)]
pub enum CrucibleError {
    /// Malformed loop request or rule
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Generator collaborator failure (not retried here)
    #[error("Generation error: {0}")]
    Generation(String),

    /// Validator collaborator failure (not retried here)
    #[error("Validation call error: {0}")]
    ValidationCall(String),

    /// Disagreement resolution or escalation failure
    #[error("Disagreement error: {0}")]
    Disagreement(String),

    /// Learning event or retraining failure
    #[error("Learning error: {0}")]
    Learning(String),

    /// Quality control monitoring failure
    #[error("Quality control error: {0}")]
    QualityControl(String),

    /// Loop not found in the store
    #[error("Loop not found: {0}")]
    LoopNotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for Crucible operations
pub type Result<T> = std::result::Result<T, CrucibleError>;
