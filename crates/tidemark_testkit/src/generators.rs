//! Property-based test generators using proptest.
//!
//! Provides strategies for generating ids, documents and remote records
//! that respect the record model's invariants.

use proptest::prelude::*;
use serde_json::Value;
use tidemark_core::{Document, RESERVED_FIELDS};
use tidemark_sync_protocol::RemoteRecord;

/// Strategy for generating valid v4 UUID ids.
pub fn uuid_id_strategy() -> impl Strategy<Value = String> {
    prop::array::uniform16(any::<u8>())
        .prop_map(|bytes| uuid::Builder::from_random_bytes(bytes).into_uuid().to_string())
}

/// Strategy for generating user field names.
///
/// Never yields a reserved field name.
pub fn field_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}")
        .expect("Invalid regex")
        .prop_filter("Field name must not be reserved", |s| {
            !RESERVED_FIELDS.contains(&s.as_str())
        })
}

/// Strategy for generating JSON field values, nested up to three levels.
pub fn field_value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        "[ -~]{0,24}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,8}", inner, 0..4)
                .prop_map(|map| Value::Object(map.into_iter().collect())),
        ]
    })
}

/// Strategy for generating documents of user fields.
pub fn document_strategy() -> impl Strategy<Value = Document> {
    prop::collection::btree_map(field_name_strategy(), field_value_strategy(), 0..8)
        .prop_map(|fields| fields.into_iter().collect())
}

/// Strategy for generating remote timestamps.
pub fn timestamp_strategy() -> impl Strategy<Value = i64> {
    1i64..1_000_000_000
}

/// Strategy for generating live remote records.
pub fn live_record_strategy() -> impl Strategy<Value = RemoteRecord> {
    (uuid_id_strategy(), timestamp_strategy(), document_strategy())
        .prop_map(|(id, ts, fields)| RemoteRecord::new(id, Some(ts), fields))
}

/// Strategy for generating remote records, one in four a tombstone.
pub fn remote_record_strategy() -> impl Strategy<Value = RemoteRecord> {
    prop_oneof![
        3 => live_record_strategy(),
        1 => (uuid_id_strategy(), timestamp_strategy())
            .prop_map(|(id, ts)| RemoteRecord::tombstone(id, Some(ts))),
    ]
}

/// Strategy for generating a change feed: distinct ids with strictly
/// increasing timestamps, oldest first.
pub fn change_feed_strategy(max_len: usize) -> impl Strategy<Value = Vec<RemoteRecord>> {
    prop::collection::vec((remote_record_strategy(), 1i64..10), 0..=max_len).prop_map(|items| {
        let mut ts = 0;
        items
            .into_iter()
            .map(|(mut record, step)| {
                ts += step;
                record.last_modified = Some(ts);
                record
            })
            .collect()
    })
}
