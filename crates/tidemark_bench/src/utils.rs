//! Benchmark utilities.

use rand::Rng;
use serde_json::{json, Value};
use std::sync::Arc;
use tidemark_core::{Document, Record, RecordStore, StoreConfig};
use tidemark_storage::InMemoryAdapter;
use tidemark_sync_protocol::RemoteRecord;

/// Collection used by every benchmark.
pub const COLLECTION: &str = "bench";

/// Generate a document with a random body of `body_len` characters.
pub fn random_document(body_len: usize) -> Document {
    let mut rng = rand::thread_rng();
    let body: String = (0..body_len)
        .map(|_| rng.gen_range(b'a'..=b'z') as char)
        .collect();
    let doc = json!({
        "title": format!("note {}", rng.gen::<u32>()),
        "priority": rng.gen_range(0..10),
        "done": rng.gen_bool(0.5),
        "body": body,
    });
    match doc {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

/// Generate a batch of record ids.
pub fn generate_ids(count: usize) -> Vec<String> {
    (0..count).map(|_| uuid::Uuid::new_v4().to_string()).collect()
}

/// Generate remote records with timestamps `first..first + count`.
pub fn remote_records(count: usize, first: i64, body_len: usize) -> Vec<RemoteRecord> {
    generate_ids(count)
        .into_iter()
        .zip(first..)
        .map(|(id, ts)| RemoteRecord::new(id, Some(ts), random_document(body_len)))
        .collect()
}

/// An in-memory store preloaded with `count` synced records, `priority`
/// declared queryable.
pub fn populated_store(count: usize) -> RecordStore<InMemoryAdapter> {
    let config = StoreConfig::new(COLLECTION).with_queryable_fields(["priority", "done"]);
    let store = RecordStore::new(Arc::new(InMemoryAdapter::new()), config)
        .expect("Failed to open store");
    let records = remote_records(count, 1, 64)
        .iter()
        .filter_map(RemoteRecord::to_record)
        .collect::<Vec<Record>>();
    store.import_synced(records).expect("Failed to import records");
    store
}
