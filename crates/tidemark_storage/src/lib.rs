//! # tidemark storage
//!
//! Storage adapter trait and implementations for tidemark.
//!
//! This crate is the lowest layer of the client: a document store keyed by
//! `(collection, record id)` with a separate metadata keyspace keyed by
//! collection name. Adapters do not interpret documents beyond keeping them.
//!
//! ## Design Principles
//!
//! - One writer at a time: [`StorageAdapter::transaction`] holds the
//!   adapter's write lock for the duration of the closure
//! - Writes are buffered in a [`Transaction`] and applied all-or-nothing
//! - Readers only ever see committed state
//! - Adapters must be `Send + Sync`
//!
//! ## Available Adapters
//!
//! - [`InMemoryAdapter`] - For testing and ephemeral stores
//! - [`FileAdapter`] - Snapshot-persisted store guarded by an advisory lock
//!
//! ## Example
//!
//! ```rust
//! use tidemark_storage::{Document, InMemoryAdapter, StorageAdapter, StorageError};
//!
//! let adapter = InMemoryAdapter::new();
//! adapter
//!     .transaction("tasks", |txn| {
//!         let mut doc = Document::new();
//!         doc.insert("title".into(), "write docs".into());
//!         txn.put("t1", doc);
//!         Ok::<_, StorageError>(())
//!     })
//!     .unwrap();
//! assert!(adapter.get("tasks", "t1").unwrap().is_some());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod error;
mod file;
mod memory;

pub use adapter::{Changeset, Document, PendingWrite, StorageAdapter, Transaction};
pub use error::{StorageError, StorageResult};
pub use file::FileAdapter;
pub use memory::{CollectionData, InMemoryAdapter};
