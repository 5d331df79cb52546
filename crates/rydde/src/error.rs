use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RyddeError {
    #[error("Catalog error: {0}")]
    Catalog(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Catalog schema version mismatch at {path}: found {found}, expected {expected}")]
    SchemaVersionMismatch {
        path: PathBuf,
        found: i32,
        expected: i32,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Probe error for {path}: {message}")]
    Probe { path: PathBuf, message: String },

    #[error("AI classifier unavailable: {0}")]
    AiUnavailable(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Plan conflict: unresolved target collision at {0}")]
    PlanConflict(String),

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },
}

impl RyddeError {
    /// Process exit code for the CLI surface.
    ///
    /// 1 = configuration, 2 = invariant violation, 3 = AI unreachable
    /// in a mode that requires it.
    pub fn exit_code(&self) -> i32 {
        match self {
            RyddeError::InvariantViolation(_) | RyddeError::PlanConflict(_) => 2,
            RyddeError::AiUnavailable(_) => 3,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, RyddeError>;
