//! Record store configuration.

use crate::error::{CoreError, CoreResult};
use crate::id::{IdSchema, UuidIdSchema};
use crate::record::RESERVED_FIELDS;
use std::sync::Arc;

/// Configuration for one [`crate::RecordStore`].
///
/// # Example
///
/// ```rust
/// use tidemark_core::{ContentHashIdSchema, StoreConfig};
///
/// let config = StoreConfig::new("bookmarks")
///     .with_local_fields(["opened"])
///     .with_queryable_fields(["url", "title", "last_modified"])
///     .with_id_schema(ContentHashIdSchema::with_fields(["url"]));
/// assert_eq!(config.name, "bookmarks");
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Collection name. Also the storage keyspace.
    pub name: String,

    /// Fields kept only locally: never sent to the remote and ignored when
    /// comparing local and remote content.
    pub local_fields: Vec<String>,

    /// Fields that queries may filter and sort on. `None` allows any field.
    pub queryable_fields: Option<Vec<String>>,

    /// Id generation and validation policy.
    pub id_schema: Arc<dyn IdSchema>,
}

impl StoreConfig {
    /// Creates a configuration with UUID ids and no local fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            local_fields: Vec::new(),
            queryable_fields: None,
            id_schema: Arc::new(UuidIdSchema),
        }
    }

    /// Sets the local-only fields.
    #[must_use]
    pub fn with_local_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.local_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Restricts queries to the given fields. `id` is always queryable.
    #[must_use]
    pub fn with_queryable_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.queryable_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the id schema.
    #[must_use]
    pub fn with_id_schema(mut self, schema: impl IdSchema + 'static) -> Self {
        self.id_schema = Arc::new(schema);
        self
    }

    /// Returns true if queries may read `field`.
    #[must_use]
    pub fn is_queryable(&self, field: &str) -> bool {
        field == "id"
            || self
                .queryable_fields
                .as_ref()
                .map_or(true, |fields| fields.iter().any(|f| f == field))
    }

    /// Returns true for local-only fields.
    #[must_use]
    pub fn is_local_field(&self, field: &str) -> bool {
        self.local_fields.iter().any(|f| f == field)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for an empty name or a reserved local field.
    pub fn validate(&self) -> CoreResult<()> {
        if self.name.is_empty() {
            return Err(CoreError::InvalidConfig("collection name is empty".into()));
        }
        if let Some(field) = self
            .local_fields
            .iter()
            .find(|f| RESERVED_FIELDS.contains(&f.as_str()))
        {
            return Err(CoreError::InvalidConfig(format!(
                "reserved field {field:?} cannot be local-only"
            )));
        }
        Ok(())
    }
}
