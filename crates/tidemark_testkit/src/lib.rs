//! # tidemark testkit
//!
//! Test utilities for tidemark.
//!
//! This crate provides:
//! - Temporary record stores on both storage adapters
//! - Sample documents and records
//! - Property-based test generators using proptest
//! - Tracing initialisation for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tidemark_testkit::prelude::*;
//!
//! #[test]
//! fn creates_a_note() {
//!     with_temp_store(|store| {
//!         store.create(note("hello"), Default::default()).unwrap();
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
mod logging;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::init_tracing;
}

pub use fixtures::*;
pub use generators::*;
pub use logging::init_tracing;
