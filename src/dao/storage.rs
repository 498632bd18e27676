use std::error::Error;
use thiserror::Error;
use uuid::Uuid;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The referenced record does not exist.
    #[error("{entity} `{id}` not found")]
    NotFound {
        /// Kind of record that was looked up (e.g. "group").
        entity: &'static str,
        /// Identifier (or lookup key) that did not match.
        id: String,
    },
    /// The write would violate a uniqueness constraint.
    #[error("storage conflict: {message}")]
    Conflict {
        /// Description of the violated constraint.
        message: String,
    },
    /// The backend could not be reached or failed unexpectedly.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// Context describing the failed operation.
        message: String,
        /// Underlying backend error.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Construct a not-found error for a record keyed by a UUID.
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        StorageError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Construct a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        StorageError::Conflict {
            message: message.into(),
        }
    }
}
