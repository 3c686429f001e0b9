//! Record identifier policies.

use crate::record::RESERVED_FIELDS;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use tidemark_storage::Document;
use uuid::{Uuid, Variant};

/// Generates and validates record ids for one collection.
///
/// `generate` receives the candidate record (reserved fields removed) so an
/// implementation can derive a deterministic id from its content.
pub trait IdSchema: Send + Sync + fmt::Debug {
    /// Produces an id for a record that was created without one.
    fn generate(&self, record: &Document) -> String;

    /// Returns true if `id` is acceptable for this collection.
    fn validate(&self, id: &str) -> bool;
}

/// Random version-4 UUIDs. The default schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIdSchema;

impl IdSchema for UuidIdSchema {
    fn generate(&self, _record: &Document) -> String {
        Uuid::new_v4().to_string()
    }

    fn validate(&self, id: &str) -> bool {
        // parse_str also accepts simple, braced and urn forms
        let hyphenated = id.len() == 36
            && [8, 13, 18, 23]
                .iter()
                .all(|&i| id.as_bytes().get(i) == Some(&b'-'));
        hyphenated
            && Uuid::parse_str(id)
                .map(|uuid| uuid.get_version_num() == 4 && uuid.get_variant() == Variant::RFC4122)
                .unwrap_or(false)
    }
}

/// SHA-256 of the canonical JSON of selected fields, hex encoded.
///
/// Two records with the same selected content get the same id, which suits
/// key-value style collections.
#[derive(Debug, Clone, Default)]
pub struct ContentHashIdSchema {
    fields: Vec<String>,
}

impl ContentHashIdSchema {
    /// Hashes every user field.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hashes only the named fields.
    pub fn with_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

impl IdSchema for ContentHashIdSchema {
    fn generate(&self, record: &Document) -> String {
        let selected: Document = record
            .iter()
            .filter(|(k, _)| {
                !RESERVED_FIELDS.contains(&k.as_str())
                    && (self.fields.is_empty() || self.fields.contains(k))
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        // serde_json maps iterate in key order, so the rendering is canonical
        let canonical = Value::Object(selected).to_string();
        let digest = Sha256::digest(canonical.as_bytes());
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    fn validate(&self, id: &str) -> bool {
        id.len() == 64 && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }
}

type Generator = dyn Fn(&Document) -> String + Send + Sync;

/// Accepts any printable id; generation is delegated to a closure.
///
/// Used when ids are assigned by the remote side or another system.
#[derive(Clone)]
pub struct AnyIdSchema {
    generator: Arc<Generator>,
}

impl AnyIdSchema {
    /// Creates a schema generating ids with `generator`.
    pub fn new<F>(generator: F) -> Self
    where
        F: Fn(&Document) -> String + Send + Sync + 'static,
    {
        Self {
            generator: Arc::new(generator),
        }
    }
}

impl fmt::Debug for AnyIdSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyIdSchema").finish_non_exhaustive()
    }
}

impl IdSchema for AnyIdSchema {
    fn generate(&self, record: &Document) -> String {
        (self.generator)(record)
    }

    fn validate(&self, id: &str) -> bool {
        !id.is_empty() && !id.chars().any(char::is_control)
    }
}
