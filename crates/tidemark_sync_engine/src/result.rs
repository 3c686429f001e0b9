//! Outcome of one sync call.

use crate::error::SyncError;
use crate::state::SyncState;
use tidemark_core::{Conflict, Record, UpdateOutcome};

/// Side of the sync a record error happened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordErrorKind {
    /// While decoding or applying a pulled record.
    Incoming,
    /// While encoding or pushing a local record.
    Outgoing,
}

/// A failure confined to one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordError {
    /// Side of the sync.
    pub kind: RecordErrorKind,
    /// Record id.
    pub id: String,
    /// Error message.
    pub message: String,
    /// Remote status for outgoing errors reported by the batch.
    pub status: Option<u16>,
}

impl RecordError {
    pub(crate) fn incoming(id: impl Into<String>, error: &SyncError) -> Self {
        Self {
            kind: RecordErrorKind::Incoming,
            id: id.into(),
            message: error.to_string(),
            status: None,
        }
    }

    pub(crate) fn outgoing(id: impl Into<String>, message: impl Into<String>, status: Option<u16>) -> Self {
        Self {
            kind: RecordErrorKind::Outgoing,
            id: id.into(),
            message: message.into(),
            status,
        }
    }
}

/// The error that aborted a run, and the phase it aborted.
#[derive(Debug)]
pub struct SyncFailure {
    /// Phase in which the run stopped.
    pub phase: SyncState,
    /// Cause.
    pub error: SyncError,
}

/// Everything one sync call did.
///
/// Each call owns its own accumulator. Lists only grow during a run, and
/// only with outcomes whose storage transaction committed.
#[derive(Debug, Default)]
pub struct SyncResult {
    /// True if the run completed with no conflict and no error.
    pub ok: bool,
    /// Collection watermark at the end of the run.
    pub last_modified: Option<i64>,
    /// Per-record failures.
    pub errors: Vec<RecordError>,
    /// Records created from remote changes.
    pub created: Vec<Record>,
    /// Records overwritten by remote changes.
    pub updated: Vec<UpdateOutcome>,
    /// Records removed by remote deletions or acknowledged local deletions.
    pub deleted: Vec<Record>,
    /// Local changes accepted by the remote, as they were sent and stamped
    /// with the remote timestamp. Marked synced only when the local record
    /// was not edited while the push was in flight.
    pub published: Vec<Record>,
    /// Unresolved conflicts.
    pub conflicts: Vec<Conflict>,
    /// Remote changes that were already applied locally.
    pub skipped: Vec<Record>,
    /// Conflicts resolved by the strategy.
    pub resolved: Vec<Record>,
    /// Set when the run was aborted.
    pub failure: Option<SyncFailure>,
}

impl SyncResult {
    /// Creates an empty result.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if no record was touched and nothing was reported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
            && self.created.is_empty()
            && self.updated.is_empty()
            && self.deleted.is_empty()
            && self.published.is_empty()
            && self.conflicts.is_empty()
            && self.skipped.is_empty()
            && self.resolved.is_empty()
    }

    /// Appends everything `other` collected.
    pub(crate) fn merge(&mut self, other: SyncResult) {
        self.errors.extend(other.errors);
        self.created.extend(other.created);
        self.updated.extend(other.updated);
        self.deleted.extend(other.deleted);
        self.published.extend(other.published);
        self.conflicts.extend(other.conflicts);
        self.skipped.extend(other.skipped);
        self.resolved.extend(other.resolved);
    }

    pub(crate) fn fail(&mut self, phase: SyncState, error: SyncError) {
        self.failure = Some(SyncFailure { phase, error });
    }

    pub(crate) fn finish(&mut self, last_modified: Option<i64>) {
        self.last_modified = last_modified;
        self.ok = self.failure.is_none() && self.errors.is_empty() && self.conflicts.is_empty();
    }

    /// Converts an aborted run into its error.
    ///
    /// Record errors and conflicts do not make this fail; inspect
    /// [`ok`](Self::ok) for those.
    pub fn into_result(self) -> Result<Self, SyncError> {
        match self.failure {
            Some(failure) => Err(failure.error),
            None => Ok(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemark_core::Document;

    #[test]
    fn empty_result_is_ok_once_finished() {
        let mut result = SyncResult::new();
        assert!(!result.ok);
        result.finish(Some(3));
        assert!(result.ok);
        assert!(result.is_empty());
        assert_eq!(result.last_modified, Some(3));
    }

    #[test]
    fn conflicts_and_errors_clear_ok() {
        let mut result = SyncResult::new();
        result.conflicts.push(Conflict::incoming(None, None));
        result.finish(None);
        assert!(!result.ok);

        let mut result = SyncResult::new();
        result
            .errors
            .push(RecordError::outgoing("a", "server error", Some(500)));
        result.finish(None);
        assert!(!result.ok);
        assert!(result.into_result().is_ok());
    }

    #[test]
    fn failure_surfaces_through_into_result() {
        let mut result = SyncResult::new();
        result.fail(SyncState::Pull, SyncError::Timeout);
        result.finish(None);
        assert!(!result.ok);
        assert!(matches!(result.into_result(), Err(SyncError::Timeout)));
    }

    #[test]
    fn merge_appends() {
        let mut total = SyncResult::new();
        let mut page = SyncResult::new();
        page.created.push(Record::synced("a", 1, Document::new()));
        total.merge(page);
        let mut page = SyncResult::new();
        page.created.push(Record::synced("b", 2, Document::new()));
        total.merge(page);
        assert_eq!(total.created.len(), 2);
    }
}
