//! Record transformers applied at the sync boundary.
//!
//! Outgoing records are encoded by every transformer in registration
//! order; incoming records are decoded in reverse order, so a pipeline
//! `[a, b]` stores `b(a(record))` remotely and reads it back as
//! `a⁻¹(b⁻¹(remote))`.

mod encrypted;

use crate::error::{EngineResult, SyncError};
use std::fmt;
use std::sync::Arc;
use tidemark_sync_protocol::RemoteRecord;

pub use encrypted::{EncryptionKey, EncryptionTransformer};

/// A reversible record transformation.
///
/// `decode(encode(r))` must equal `r` for every record the transformer
/// accepts. Tombstones pass through every transformer with their id
/// transformed only.
pub trait Transformer: Send + Sync {
    /// Transforms a local record into its remote form.
    fn encode(&self, record: RemoteRecord) -> EngineResult<RemoteRecord>;

    /// Transforms a remote record back into its local form.
    fn decode(&self, record: RemoteRecord) -> EngineResult<RemoteRecord>;
}

/// An ordered list of transformers.
#[derive(Clone, Default)]
pub struct TransformPipeline {
    steps: Vec<Arc<dyn Transformer>>,
}

impl TransformPipeline {
    /// Creates an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a transformer.
    #[must_use]
    pub fn with(mut self, transformer: impl Transformer + 'static) -> Self {
        self.steps.push(Arc::new(transformer));
        self
    }

    /// Number of transformers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if no transformer is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs every transformer's `encode`, first to last.
    pub fn encode(&self, record: RemoteRecord) -> EngineResult<RemoteRecord> {
        self.steps.iter().try_fold(record, |r, step| step.encode(r))
    }

    /// Runs every transformer's `decode`, last to first.
    pub fn decode(&self, record: RemoteRecord) -> EngineResult<RemoteRecord> {
        self.steps
            .iter()
            .rev()
            .try_fold(record, |r, step| step.decode(r))
    }
}

impl fmt::Debug for TransformPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformPipeline")
            .field("steps", &self.steps.len())
            .finish()
    }
}

/// Prefixes record ids remotely.
#[derive(Debug, Clone)]
pub struct IdPrefixTransformer {
    prefix: String,
}

impl IdPrefixTransformer {
    /// Creates a transformer adding `prefix` to every id.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Transformer for IdPrefixTransformer {
    fn encode(&self, mut record: RemoteRecord) -> EngineResult<RemoteRecord> {
        record.id = format!("{}{}", self.prefix, record.id);
        Ok(record)
    }

    fn decode(&self, mut record: RemoteRecord) -> EngineResult<RemoteRecord> {
        match record.id.strip_prefix(&self.prefix) {
            Some(stripped) => {
                record.id = stripped.to_string();
                Ok(record)
            }
            None => Err(SyncError::transform(format!(
                "id {} lacks prefix {}",
                record.id, self.prefix
            ))),
        }
    }
}
