//! Configuration for sync sessions.

use crate::error::{SyncError, SyncResult};
use std::fmt;

/// Default sort key field.
pub const DEFAULT_SORT_KEY: &str = "createdAt";

/// Default number of documents loaded by the snapshot.
pub const DEFAULT_LIMIT: usize = 100;

/// Configuration for one sync session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Collection to replicate.
    pub collection: String,
    /// Field that orders the replica, newest first.
    pub sort_key: String,
    /// Maximum number of documents loaded by the snapshot.
    ///
    /// Documents inserted later through the feed are not capped.
    pub limit: usize,
}

impl SessionConfig {
    /// Creates a configuration for `collection` with default ordering.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            sort_key: DEFAULT_SORT_KEY.to_string(),
            limit: DEFAULT_LIMIT,
        }
    }

    /// Sets the sort key field.
    pub fn with_sort_key(mut self, sort_key: impl Into<String>) -> Self {
        self.sort_key = sort_key.into();
        self
    }

    /// Sets the snapshot limit.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Returns the sort requested from the snapshot source.
    pub fn sort_spec(&self) -> SortSpec {
        SortSpec::descending(self.sort_key.clone())
    }

    /// Checks that the configuration can be used.
    pub fn validate(&self) -> SyncResult<()> {
        if self.collection.is_empty() {
            return Err(SyncError::InvalidConfig("collection name is empty".into()));
        }
        if self.sort_key.is_empty() || self.sort_key.contains('.') {
            return Err(SyncError::InvalidConfig(format!(
                "sort key '{}' must be a top-level field name",
                self.sort_key
            )));
        }
        if self.limit == 0 {
            return Err(SyncError::InvalidConfig("snapshot limit must be positive".into()));
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new("")
    }
}

/// Sort direction of a snapshot query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Smallest first.
    Ascending,
    /// Largest first.
    Descending,
}

/// Sort requested from a snapshot source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    /// Field to sort by.
    pub field: String,
    /// Direction.
    pub direction: SortDirection,
}

impl SortSpec {
    /// Sorts by `field`, largest first.
    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Descending,
        }
    }

    /// Sorts by `field`, smallest first.
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Ascending,
        }
    }
}

impl fmt::Display for SortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = match self.direction {
            SortDirection::Ascending => 1,
            SortDirection::Descending => -1,
        };
        write!(f, "{{{}: {}}}", self.field, sign)
    }
}
