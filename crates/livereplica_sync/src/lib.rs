//! # livereplica sync
//!
//! Keeps a `ReplicaStore` current from a snapshot query plus a change feed.
//!
//! This crate provides:
//! - Collaborator traits for the snapshot query, the change feed and
//!   collection creation
//! - `InitializationCoordinator`, which buffers feed events until the
//!   snapshot is loaded and then drains them in order
//! - `SyncSession`, a tokio task owning one replica, with start/stop,
//!   read access, state, statistics and notifications
//! - `MemoryUpstream`, an in-process upstream for tests and replays
//!
//! ## Architecture
//!
//! The feed is opened **before** the snapshot query is issued:
//! 1. Ensure the collection exists
//! 2. Subscribe to the change feed
//! 3. Query the snapshot while buffering feed events
//! 4. Load the snapshot, apply the buffer in arrival order
//! 5. Apply every later feed event as it arrives
//!
//! ## Key Invariants
//!
//! - Every change made after subscription is applied exactly once, in feed order
//! - One task writes the replica; readers never see a half-applied event
//! - No event is applied after `stop()` returns
//! - A changed sort key fails the session instead of reordering the replica
//! - No reconnect: a feed that ends or is invalidated needs a new session

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod coordinator;
mod error;
mod memory;
mod notify;
mod session;
mod source;
mod state;

pub use config::{SessionConfig, SortDirection, SortSpec, DEFAULT_LIMIT, DEFAULT_SORT_KEY};
pub use coordinator::{
    CoordinatorState, Disposition, DrainReport, InitializationCoordinator, SnapshotLoad,
};
pub use error::{SyncError, SyncResult};
pub use memory::{MemoryUpstream, UpstreamCall};
pub use notify::ReplicaNotification;
pub use session::SyncSession;
pub use source::{
    ChannelFeed, CollectionEnsurer, FeedHandle, FeedMessage, FeedSource, SnapshotSource, Sources,
};
pub use state::{SessionState, SessionStats};
