//! Error types for Planloop
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can surface out of the loop
#[derive(Debug, Error)]
pub enum PlanloopError {
    /// Plan generation exhausted its repair attempts
    #[error("Plan generation failed after {attempts} attempt(s): {detail}")]
    FatalPlan { attempts: u32, detail: String },

    /// Checkpoint or run metadata could not be persisted
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Language model call failed
    #[error("LLM error: {0}")]
    Llm(String),

    /// Capability registry or capability setup error
    #[error("Capability error: {0}")]
    Capability(String),

    /// Configuration is invalid
    #[error("Config error: {0}")]
    Config(String),

    /// Invalid state transition or operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// No run recorded under the given identifier
    #[error("Run not found: {0}")]
    RunNotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl PlanloopError {
    /// Errors that must end the run with `FINISHED_ERROR` rather than propagate as a crash
    pub fn is_cycle_failure(&self) -> bool {
        matches!(
            self,
            PlanloopError::FatalPlan { .. } | PlanloopError::Persistence(_) | PlanloopError::Llm(_)
        )
    }
}

/// Result type alias for Planloop operations
pub type Result<T> = std::result::Result<T, PlanloopError>;
