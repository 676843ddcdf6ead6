//! Error types for the datastore.

use thiserror::Error;

use crate::types::Revision;

/// Result type alias for datastore operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during datastore operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The write carried a revision older than the stored one.
    #[error("update conflict on {name}: supplied revision {supplied}, current {current}")]
    Conflict {
        name: String,
        supplied: Revision,
        current: Revision,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl StateError {
    /// Whether a retry with a freshly read record could succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StateError::Conflict { .. })
    }
}
