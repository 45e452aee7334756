//! Error types for sync sessions.

use livereplica_core::CoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while running a sync session.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// Error raised while applying a change to the replica.
    #[error("replica error: {0}")]
    Core(#[from] CoreError),

    /// The change feed reported a transport-level failure.
    #[error("feed error: {message}")]
    Feed {
        /// Error message.
        message: String,
    },

    /// The snapshot query failed.
    #[error("snapshot error: {message}")]
    Snapshot {
        /// Error message.
        message: String,
    },

    /// The source collection could not be ensured.
    #[error("collection '{collection}' unavailable: {message}")]
    Collection {
        /// Collection name.
        collection: String,
        /// Error message.
        message: String,
    },

    /// The feed was invalidated; a new session is needed.
    #[error("change feed for collection '{collection}' was invalidated")]
    Invalidated {
        /// Collection name.
        collection: String,
    },

    /// The session was stopped.
    #[error("session stopped")]
    Stopped,

    /// The session configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A coordinator step was called out of order.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// The session task could not run.
    #[error("session task error: {0}")]
    Task(String),
}

impl SyncError {
    /// Creates a feed error.
    pub fn feed(message: impl Into<String>) -> Self {
        Self::Feed {
            message: message.into(),
        }
    }

    /// Creates a snapshot error.
    pub fn snapshot(message: impl Into<String>) -> Self {
        Self::Snapshot {
            message: message.into(),
        }
    }

    /// Creates a collection error.
    pub fn collection(collection: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Collection {
            collection: collection.into(),
            message: message.into(),
        }
    }

    /// Returns true if the session cannot continue after this error.
    pub fn is_fatal(&self) -> bool {
        match self {
            SyncError::Core(err) => err.is_fatal(),
            SyncError::Feed { .. } => false,
            _ => true,
        }
    }

    /// Returns true if the error comes from a broken replica invariant.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(self, SyncError::Core(CoreError::IntegrityViolation { .. }))
    }
}
