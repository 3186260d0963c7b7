//! Error types for the WARDEN system.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WardenError {
    /// A node was inserted into a snapshot before its parent. This is a
    /// load-order bug in the caller, not a recoverable runtime condition.
    #[error("Parent node not found for key {key}")]
    ParentNotFound { key: String },

    /// The named lock could not be acquired within the bounded wait.
    /// Retryable with backoff.
    #[error("Lock not acquired within wait bound: {name}")]
    LockUnavailable { name: String },

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Entity already exists: {entity}")]
    AlreadyExists { entity: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WardenError {
    /// Whether the caller may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WardenError::LockUnavailable { .. })
    }
}

pub type WardenResult<T> = Result<T, WardenError>;
