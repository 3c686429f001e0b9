//! Test fixtures and store helpers.
//!
//! Provides temporary record stores on both storage adapters and a handful
//! of sample documents shared by the crate test suites.

use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tidemark_core::{Document, Record, RecordStore, StoreConfig};
use tidemark_storage::{FileAdapter, InMemoryAdapter};

/// Collection name used by the fixtures.
pub const NOTES: &str = "notes";

/// Local-only field declared by [`notes_config`].
pub const SEEN_FIELD: &str = "seen";

/// Fixed, valid v4 ids for tests that need stable identifiers.
pub const SAMPLE_IDS: [&str; 4] = [
    "0b5c4b6e-1d7a-4c4e-9f5e-2b1a3c4d5e6f",
    "1c6d5c7f-2e8b-4d5f-8a6f-3c2b4d5e6f70",
    "2d7e6d80-3f9c-4e60-9b70-4d3c5e6f7081",
    "3e8f7e91-4a0d-4f71-8c81-5e4d6f708192",
];

/// Converts a JSON object literal into a [`Document`].
///
/// # Panics
///
/// Panics if `value` is not an object.
pub fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// A note document with a title.
pub fn note(title: &str) -> Document {
    doc(json!({ "title": title, "done": false }))
}

/// A note document carrying a fixed id.
pub fn note_with_id(id: &str, title: &str) -> Document {
    let mut note = note(title);
    note.insert("id".into(), Value::String(id.into()));
    note
}

/// A synced record as a remote would have accepted it.
pub fn synced_note(id: &str, last_modified: i64, title: &str) -> Record {
    Record::synced(id, last_modified, note(title))
}

/// Store configuration used by the fixtures: the `notes` collection with
/// [`SEEN_FIELD`] kept local.
pub fn notes_config() -> StoreConfig {
    StoreConfig::new(NOTES).with_local_fields([SEEN_FIELD])
}

/// A record store over a temporary backend with automatic cleanup.
pub struct TestStore<S> {
    /// The record store.
    pub store: RecordStore<S>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestStore<InMemoryAdapter> {
    /// Creates a store on a fresh in-memory adapter.
    pub fn memory() -> Self {
        Self::memory_with(notes_config())
    }

    /// Creates an in-memory store with a custom configuration.
    pub fn memory_with(config: StoreConfig) -> Self {
        let store = RecordStore::new(Arc::new(InMemoryAdapter::new()), config)
            .expect("Failed to open in-memory store");
        Self {
            store,
            _temp_dir: None,
        }
    }
}

impl TestStore<FileAdapter> {
    /// Creates a store on a file adapter in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let adapter =
            FileAdapter::open(&temp_dir.path().join("db")).expect("Failed to open file adapter");
        let store = RecordStore::new(Arc::new(adapter), notes_config())
            .expect("Failed to open file store");
        Self {
            store,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the store directory.
    pub fn path(&self) -> &Path {
        self.store.storage().path()
    }
}

impl<S> std::ops::Deref for TestStore<S> {
    type Target = RecordStore<S>;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Runs a test with a temporary in-memory notes store.
///
/// # Example
///
/// ```rust,ignore
/// use tidemark_testkit::{note, with_temp_store};
///
/// #[test]
/// fn my_test() {
///     with_temp_store(|store| {
///         store.create(note("x"), Default::default()).unwrap();
///     });
/// }
/// ```
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&RecordStore<InMemoryAdapter>) -> R,
{
    let test_store = TestStore::memory();
    f(&test_store.store)
}

/// Runs a test with a temporary file-backed notes store.
pub fn with_file_store<F, R>(f: F) -> R
where
    F: FnOnce(&RecordStore<FileAdapter>, &Path) -> R,
{
    let test_store = TestStore::file();
    f(&test_store.store, test_store.path())
}

/// Store scenario helpers.
pub mod scenarios {
    use super::*;
    use tidemark_core::CreateOptions;

    /// An in-memory store holding `count` synced notes with timestamps
    /// `1..=count`, watermark set to `count`.
    pub fn synced_store(count: usize) -> TestStore<InMemoryAdapter> {
        let test_store = TestStore::memory();
        let records = (1..=count)
            .map(|i| {
                let id = uuid::Uuid::new_v4().to_string();
                synced_note(&id, i as i64, &format!("note {i}"))
            })
            .collect();
        test_store
            .store
            .import_synced(records)
            .expect("Failed to import notes");
        test_store
    }

    /// An in-memory store holding `count` locally created notes.
    pub fn pending_store(count: usize) -> TestStore<InMemoryAdapter> {
        let test_store = TestStore::memory();
        for i in 0..count {
            test_store
                .store
                .create(note(&format!("draft {i}")), CreateOptions::default())
                .expect("Failed to create note");
        }
        test_store
    }
}
