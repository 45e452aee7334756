//! Error types for the replica core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur while maintaining a replica.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// The sort key of a replicated document was changed or removed.
    #[error("integrity violation for document '{id}' in collection '{collection}': {message}")]
    IntegrityViolation {
        /// Collection the document belongs to.
        collection: String,
        /// Document ID.
        id: String,
        /// Description of the violation.
        message: String,
    },

    /// A path walked into a value that cannot hold the next segment.
    #[error("path conflict at '{path}': {message}")]
    PathConflict {
        /// The dotted path being applied.
        path: String,
        /// Description of the conflict.
        message: String,
    },

    /// A dotted path is malformed.
    #[error("invalid path '{path}': {reason}")]
    InvalidPath {
        /// The offending path.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A document body lacks its id field.
    #[error("document is missing id field '{field}'")]
    MissingId {
        /// Name of the id field.
        field: String,
    },

    /// A document body is not usable.
    #[error("invalid document: {message}")]
    InvalidDocument {
        /// Description of the problem.
        message: String,
    },

    /// A document was inserted twice.
    #[error("duplicate document id '{id}'")]
    DuplicateId {
        /// Document ID.
        id: String,
    },

    /// The replica's ordering or index no longer holds.
    #[error("replica corrupted: {message}")]
    Corrupted {
        /// Description of the broken invariant.
        message: String,
    },

    /// A change-stream document could not be decoded.
    #[error("decode error: {message}")]
    Decode {
        /// Description of the problem.
        message: String,
    },
}

impl CoreError {
    /// Creates an integrity violation error.
    pub fn integrity(
        collection: impl Into<String>,
        id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::IntegrityViolation {
            collection: collection.into(),
            id: id.into(),
            message: message.into(),
        }
    }

    /// Creates a path conflict error.
    pub fn path_conflict(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PathConflict {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Returns true if the replica can no longer be trusted after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::IntegrityViolation { .. }
                | CoreError::PathConflict { .. }
                | CoreError::InvalidPath { .. }
                | CoreError::DuplicateId { .. }
                | CoreError::Corrupted { .. }
        )
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::decode(err.to_string())
    }
}
