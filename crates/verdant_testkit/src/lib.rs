//! # Verdant Testkit
//!
//! Test utilities for the verdant local store.
//!
//! This crate provides:
//! - Store fixtures over a shared in-memory journal, so a test can
//!   "restart" a store over whatever bytes survived
//! - A storage backend that simulates power loss mid-write
//! - Proptest strategies for local write workloads
//!
//! ## Usage
//!
//! ```rust,ignore
//! use verdant_testkit::prelude::*;
//!
//! let store = TestStore::new();
//! store.db.write(|txn| txn.create_with_id("plants", "p1", plant("Fern")).map(|_| ()))?;
//! let reopened = store.reopen();
//! assert_eq!(StoreSnapshot::capture(&reopened).records.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
