//! Server-side state of one collection.

use crate::error::{ServerError, ServerResult};
use std::collections::BTreeMap;
use tidemark_core::Document;
use tidemark_sync_protocol::{
    status, BatchOperation, BatchResponse, ChangesPage, ChangesRequest, Method, Precondition,
    RemoteRecord,
};

/// Records and tombstones of one collection.
///
/// The collection timestamp is the timestamp of the latest write; every
/// stored record carries the timestamp of the write that produced it.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    records: BTreeMap<String, RemoteRecord>,
    timestamp: i64,
}

impl Collection {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current collection timestamp.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Stored record or tombstone.
    pub fn get(&self, id: &str) -> Option<&RemoteRecord> {
        self.records.get(id)
    }

    /// Stored record, unless deleted.
    pub fn live(&self, id: &str) -> Option<&RemoteRecord> {
        self.records.get(id).filter(|r| !r.deleted)
    }

    /// Number of live records.
    pub fn live_count(&self) -> usize {
        self.records.values().filter(|r| !r.deleted).count()
    }

    fn next_timestamp(&mut self) -> i64 {
        self.timestamp += 1;
        self.timestamp
    }

    /// Creates or replaces a record.
    pub fn put(&mut self, id: impl Into<String>, fields: Document) -> RemoteRecord {
        let id = id.into();
        let record = RemoteRecord::new(id.clone(), Some(self.next_timestamp()), fields);
        self.records.insert(id, record.clone());
        record
    }

    /// Replaces a live record with a tombstone. Returns `None` if there was
    /// no live record.
    pub fn delete(&mut self, id: &str) -> Option<RemoteRecord> {
        self.live(id)?;
        let tombstone = RemoteRecord::tombstone(id, Some(self.next_timestamp()));
        self.records.insert(id.to_string(), tombstone.clone());
        Some(tombstone)
    }

    /// Lists changes, oldest first.
    ///
    /// A request without `since` lists live records only. `before` pins the
    /// listing to an anchor and fails if the collection moved past it.
    pub fn changes(&self, request: &ChangesRequest, max_page: usize) -> ServerResult<ChangesPage> {
        if let Some(anchor) = request.before {
            if anchor != self.timestamp {
                return Err(ServerError::AnchorMismatch {
                    anchor,
                    current: self.timestamp,
                });
            }
        }
        let after = match &request.cursor {
            Some(cursor) => Some(
                cursor
                    .parse::<i64>()
                    .map_err(|_| ServerError::InvalidRequest(format!("bad cursor {cursor}")))?,
            ),
            None => None,
        };
        let lower = after.max(request.since);

        let mut matching: Vec<&RemoteRecord> = self
            .records
            .values()
            .filter(|r| request.since.is_some() || !r.deleted)
            .filter(|r| {
                let ts = r.last_modified.unwrap_or_default();
                lower.map_or(true, |l| ts > l) && request.before.map_or(true, |b| ts <= b)
            })
            .collect();
        matching.sort_by_key(|r| r.last_modified);

        let limit = request.limit.unwrap_or(max_page).clamp(1, max_page.max(1));
        let next = if matching.len() > limit {
            matching[limit - 1].last_modified.map(|ts| ts.to_string())
        } else {
            None
        };
        Ok(ChangesPage {
            data: matching.into_iter().take(limit).cloned().collect(),
            next,
            timestamp: self.timestamp,
        })
    }

    /// Applies one batch operation after checking its precondition.
    pub fn apply(&mut self, operation: BatchOperation) -> BatchResponse {
        let id = operation.record.id.clone();
        let live = self.live(&id).cloned();

        let holds = match operation.precondition {
            Precondition::None => true,
            Precondition::IfNoneMatch => live.is_none(),
            Precondition::IfMatch(ts) => live.as_ref().and_then(|r| r.last_modified) == Some(ts),
        };
        if !holds {
            return BatchResponse::precondition_failed(live);
        }

        match operation.method {
            Method::Put if operation.record.deleted => {
                BatchResponse::error(status::BAD_REQUEST, "cannot PUT a tombstone")
            }
            Method::Put => {
                let code = if live.is_some() {
                    status::OK
                } else {
                    status::CREATED
                };
                BatchResponse::success(code, self.put(id, operation.record.fields))
            }
            Method::Delete => match self.delete(&id) {
                Some(tombstone) => BatchResponse::success(status::OK, tombstone),
                None => BatchResponse::error(status::NOT_FOUND, format!("record {id} not found")),
            },
        }
    }
}
