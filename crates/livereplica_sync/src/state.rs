//! Session state and statistics.

use std::fmt;
use std::time::Instant;

/// The current state of a sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Snapshot loading; feed events are buffered.
    Initializing,
    /// Snapshot loaded; buffered events are being applied.
    Draining,
    /// Feed events are applied as they arrive.
    Live,
    /// The feed ended on its own. The replica is kept but no longer updated.
    Disconnected,
    /// The feed was invalidated. A new session is needed.
    Invalidated,
    /// The session hit a fatal error.
    Failed,
    /// The session was stopped by its owner.
    Stopped,
}

impl SessionState {
    /// Returns true while the snapshot protocol has not finished.
    pub fn is_initializing(&self) -> bool {
        matches!(self, SessionState::Initializing | SessionState::Draining)
    }

    /// Returns true if feed events are being applied.
    pub fn is_live(&self) -> bool {
        matches!(self, SessionState::Live)
    }

    /// Returns true if the session will never apply another event.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Disconnected
                | SessionState::Invalidated
                | SessionState::Failed
                | SessionState::Stopped
        )
    }

    /// Returns a lowercase name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Initializing => "initializing",
            SessionState::Draining => "draining",
            SessionState::Live => "live",
            SessionState::Disconnected => "disconnected",
            SessionState::Invalidated => "invalidated",
            SessionState::Failed => "failed",
            SessionState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statistics about a sync session.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Documents loaded from the snapshot.
    pub snapshot_documents: u64,
    /// Change events received from the feed.
    pub events_received: u64,
    /// Events buffered while the snapshot was loading.
    pub events_buffered: u64,
    /// Events that changed the replica.
    pub events_applied: u64,
    /// Events skipped as known races.
    pub events_skipped: u64,
    /// Feed errors reported.
    pub feed_errors: u64,
    /// Last error message.
    pub last_error: Option<String>,
    /// When the session went live.
    pub live_since: Option<Instant>,
}
