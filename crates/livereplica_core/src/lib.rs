//! # livereplica core
//!
//! Local, ordered mirror of a remote document collection.
//!
//! This crate provides:
//! - `Document` and `DocumentId` with a total `SortKey` order
//! - `FieldPath` and the dotted-path mutator used by partial updates
//! - `ReplicaStore`, a sorted document sequence with an id → position index
//! - `ChangeEvent` and `ChangeApplier`, the per-event state transition
//! - `RawChange`, a decoder for change-stream documents
//!
//! ## Key Invariants
//!
//! - Every indexed id points at the document carrying that id
//! - The sequence is non-increasing by sort key, ties in arrival order
//! - No id appears twice
//! - The sort key of a replicated document never changes
//!
//! This is a pure crate with no I/O; the session that feeds it lives in
//! `livereplica_sync`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod applier;
mod change;
mod document;
mod error;
pub mod path;
mod store;
mod wire;

pub use applier::{ApplyOutcome, ChangeApplier, SkipReason};
pub use change::{ChangeEvent, ChangeKind, TruncatedArray, UpdateDescription};
pub use document::{Document, DocumentId, SortKey};
pub use error::{CoreError, CoreResult};
pub use path::FieldPath;
pub use store::ReplicaStore;
pub use wire::RawChange;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
