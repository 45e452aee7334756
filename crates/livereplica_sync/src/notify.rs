//! Replica change notifications for presentation layers.

use crate::state::SessionState;
use livereplica_core::{ApplyOutcome, DocumentId};
use parking_lot::RwLock;
use tokio::sync::mpsc;

/// A notification about the replica or its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicaNotification {
    /// The snapshot was loaded.
    SnapshotLoaded {
        /// Number of documents loaded.
        count: usize,
    },
    /// A document was inserted.
    Inserted {
        /// Document ID.
        id: DocumentId,
        /// New position.
        position: usize,
    },
    /// A document was removed.
    Removed {
        /// Document ID.
        id: DocumentId,
        /// Former position.
        position: usize,
    },
    /// A document was replaced.
    Replaced {
        /// Document ID.
        id: DocumentId,
        /// Position.
        position: usize,
    },
    /// Fields of a document changed.
    Updated {
        /// Document ID.
        id: DocumentId,
        /// Position.
        position: usize,
    },
    /// The session changed state.
    StateChanged(SessionState),
    /// The feed reported an error.
    FeedError {
        /// Error message.
        message: String,
    },
    /// The feed ended.
    FeedEnded,
    /// The feed was invalidated.
    Invalidated,
    /// The session failed.
    Failed {
        /// Error message.
        message: String,
    },
}

impl ReplicaNotification {
    /// Converts an apply outcome. Skips produce no notification.
    pub fn from_outcome(outcome: &ApplyOutcome) -> Option<Self> {
        let notification = match outcome {
            ApplyOutcome::Inserted { id, position } => Self::Inserted {
                id: id.clone(),
                position: *position,
            },
            ApplyOutcome::Removed { id, position } => Self::Removed {
                id: id.clone(),
                position: *position,
            },
            ApplyOutcome::Replaced { id, position } => Self::Replaced {
                id: id.clone(),
                position: *position,
            },
            ApplyOutcome::Updated { id, position } => Self::Updated {
                id: id.clone(),
                position: *position,
            },
            ApplyOutcome::Invalidated => Self::Invalidated,
            ApplyOutcome::Skipped { .. } => return None,
        };
        Some(notification)
    }
}

/// Fan-out of notifications to any number of receivers.
#[derive(Debug, Default)]
pub(crate) struct Notifier {
    subscribers: RwLock<Vec<mpsc::UnboundedSender<ReplicaNotification>>>,
}

impl Notifier {
    pub(crate) fn subscribe(&self) -> mpsc::UnboundedReceiver<ReplicaNotification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Sends to every receiver, dropping the ones that hung up.
    pub(crate) fn publish(&self, notification: ReplicaNotification) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(notification.clone()).is_ok());
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}
