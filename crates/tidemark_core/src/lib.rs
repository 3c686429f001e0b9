//! # tidemark core
//!
//! Local record model and transactional record store for tidemark.
//!
//! This crate provides:
//! - [`Record`] with the reserved `id`, `_status` and `last_modified` fields
//! - Pluggable identifier policies ([`IdSchema`])
//! - Equality/range filters and multi-key sorting ([`Query`])
//! - The [`RecordStore`]: CRUD over one named collection, sync status
//!   tracking and the collection watermark
//! - The [`Conflict`] model shared by the sync layers
//!
//! ## Status transitions
//!
//! ```text
//! created ──push──▶ synced ◀──push── updated
//!    │                 │                ▲
//!    │ delete          └──local edit────┘
//!    ▼                 │
//! (removed)            └──delete──▶ deleted ──push/tombstone──▶ (removed)
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod conflict;
mod error;
mod id;
mod query;
mod record;
mod store;

pub use config::StoreConfig;
pub use conflict::{Conflict, ConflictType};
pub use error::{CoreError, CoreResult};
pub use id::{AnyIdSchema, ContentHashIdSchema, IdSchema, UuidIdSchema};
pub use query::{compare_values, Condition, Direction, Query, SortKey};
pub use record::{
    Record, RecordStatus, ID_FIELD, LAST_MODIFIED_FIELD, RESERVED_FIELDS, STATUS_FIELD,
};
pub use store::{
    CollectionMetadata, CreateOptions, DeleteOptions, GetOptions, ListOptions, RecordStore,
    RecordTransaction, UpdateOptions, UpdateOutcome,
};

/// Re-exported so callers can build documents without naming the storage crate.
pub use tidemark_storage::Document;
