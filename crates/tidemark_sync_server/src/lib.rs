//! # tidemark sync server
//!
//! In-process reference remote for tidemark.
//!
//! This crate provides:
//! - Per-collection record storage with monotonically increasing integer
//!   timestamps and tombstones
//! - Paginated change listings (`since`, `before`, `limit`, cursor)
//! - Conditional batches (create-if-absent, modify-if-match)
//! - Collection metadata and server info
//! - `flush` to simulate a remote reset
//!
//! # Protocol
//!
//! ```text
//! changes(since, before, cursor) → records with since < ts ≤ before, oldest first
//! batch([PUT|DELETE + precondition]) → one status per operation
//!     IfNoneMatch on a live record       → 412 with the existing record
//!     IfMatch(ts) on another version     → 412 with the existing record
//!     DELETE of a missing record         → 404
//! ```
//!
//! Every write bumps the collection timestamp by one and stamps the written
//! record (or tombstone) with it.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod collection;
mod config;
mod error;
mod server;

pub use collection::Collection;
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::SyncServer;
