//! Error types for Arbor.

use thiserror::Error;

/// Coarse classification of an [`ArborError`], stable across message changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    InvalidInput,
    Conflict,
    QuotaExceeded,
    ObjectStoreFailure,
    Internal,
}

/// Common error type for Arbor.
#[derive(Error, Debug)]
pub enum ArborError {
    /// Database error.
    ///
    /// Wraps any fault raised by the metadata store. Errors from sqlx are
    /// converted automatically.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The permission resolver denied the operation.
    #[error("permission denied: {0}")]
    Forbidden(String),

    /// Malformed name, empty selection, or a node of the wrong kind.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// A sibling with the same name already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The root has no room left for the requested bytes.
    #[error("quota exceeded on root {root_id}: requested {requested} bytes, {remaining} remaining")]
    QuotaExceeded {
        root_id: i64,
        requested: i64,
        remaining: i64,
    },

    /// A single object-store call failed.
    #[error("object store error on {key}: {message}")]
    ObjectStore { key: String, message: String },

    /// A stored value violates an invariant of the tree.
    #[error("internal error: {0}")]
    Internal(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ArborError {
    /// Build an object-store error for the given key.
    pub fn object_store(key: impl ToString, message: impl ToString) -> Self {
        ArborError::ObjectStore {
            key: key.to_string(),
            message: message.to_string(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ArborError::NotFound(_) => ErrorKind::NotFound,
            ArborError::Forbidden(_) => ErrorKind::Forbidden,
            ArborError::InvalidInput(_) => ErrorKind::InvalidInput,
            ArborError::Conflict(_) => ErrorKind::Conflict,
            ArborError::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            ArborError::ObjectStore { .. } => ErrorKind::ObjectStoreFailure,
            ArborError::Database(_)
            | ArborError::Io(_)
            | ArborError::Internal(_)
            | ArborError::Config(_) => ErrorKind::Internal,
        }
    }
}

// Conversion from sqlx errors
impl From<sqlx::Error> for ArborError {
    fn from(e: sqlx::Error) -> Self {
        ArborError::Database(e.to_string())
    }
}

/// Result type alias for Arbor operations.
pub type Result<T> = std::result::Result<T, ArborError>;
