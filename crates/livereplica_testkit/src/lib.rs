//! # livereplica testkit
//!
//! Test utilities for livereplica.
//!
//! This crate provides:
//! - Document, event and replica fixtures
//! - Property-based generators for realistic upstream histories
//! - A naive reference replica used as an oracle
//! - Invariant assertions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use livereplica_testkit::prelude::*;
//!
//! proptest! {
//!     #[test]
//!     fn replica_matches_reference(history in history_strategy(40)) {
//!         // ...
//!     }
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod invariants;
pub mod model;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::invariants::*;
    pub use crate::model::*;
    pub use proptest::prelude::*;
}

pub use fixtures::*;
pub use generators::*;
pub use invariants::*;
pub use model::*;
