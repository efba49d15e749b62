use thiserror::Error;

use crate::model::Violation;

/// Engine-wide error type.
///
/// `NotFound`, `Exists`, and `Invalid` are recoverable: the handle stays
/// usable. `LayoutMismatch` and `Storage` are systemic: the database is
/// either bound to the other layout or the underlying store failed, and the
/// current handle should be discarded.
#[derive(Error, Debug)]
pub enum LoreError {
    #[error("node not found: {0}")]
    NotFound(String),

    #[error("node already exists: {0}")]
    Exists(String),

    #[error("validation failed with {} violation(s)", .0.len())]
    Invalid(Vec<Violation>),

    #[error("schema conflict: {0}")]
    SchemaConflict(String),

    #[error("layout mismatch: database is '{found}', opened as '{expected}'")]
    LayoutMismatch { expected: String, found: String },

    #[error("changelog is disabled: delta push unavailable")]
    ChangelogDisabled,

    #[error("replication halted after seq {last_applied}: {reason}")]
    Replication { last_applied: i64, reason: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type LoreResult<T> = Result<T, LoreError>;
