//! Store-side work of the apply and reconcile phases.
//!
//! Everything here runs inside one storage transaction: a pulled page, or
//! the responses of one pushed batch. Outcomes are collected into a fresh
//! [`SyncResult`] that the engine merges only after the commit.

use crate::error::{EngineResult, SyncError};
use crate::result::{RecordError, SyncResult};
use crate::transform::TransformPipeline;
use tidemark_core::{Conflict, CoreError, Record, RecordStatus, RecordTransaction, UpdateOutcome};
use tidemark_storage::StorageAdapter;
use tidemark_sync_protocol::{
    classify, resolve, Action, BatchOperation, BatchResponse, Classification, Method,
    Precondition, RemoteRecord, Strategy,
};
use tracing::warn;

/// What applying one page did.
#[derive(Debug, Default)]
pub(crate) struct PageOutcome {
    pub result: SyncResult,
    /// Oldest timestamp the watermark must not pass.
    pub blocked: Option<i64>,
    /// Watermark stored with the page, if it moved.
    pub watermark: Option<i64>,
}

/// A local record and the operation pushing it.
#[derive(Debug, Clone)]
pub(crate) struct Outgoing {
    pub local: Record,
    pub operation: BatchOperation,
}

/// What reconciling one batch did.
#[derive(Debug, Default)]
pub(crate) struct PushOutcome {
    pub result: SyncResult,
    /// Newest timestamp the remote assigned to one of our writes.
    pub latest: Option<i64>,
    /// Operations to send once more with refreshed preconditions.
    pub resend: Vec<Outgoing>,
}

fn earliest(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn keep_local_fields(mut remote: Record, local: Option<&Record>, local_fields: &[String]) -> Record {
    if let Some(local) = local {
        for name in local_fields {
            if let Some(value) = local.fields.get(name) {
                remote.fields.insert(name.clone(), value.clone());
            }
        }
    }
    remote
}

/// Applies decoded remote changes and advances the watermark past the ones
/// that were applied.
///
/// `blocked` carries the oldest timestamp of a record that failed on an
/// earlier page; the watermark stays below it.
pub(crate) fn apply_changes<S: StorageAdapter>(
    txn: &mut RecordTransaction<'_, '_, S>,
    changes: Vec<RemoteRecord>,
    strategy: Strategy,
    blocked: Option<i64>,
) -> EngineResult<PageOutcome> {
    let local_fields = txn.config().local_fields.clone();
    let mut outcome = PageOutcome {
        blocked,
        ..PageOutcome::default()
    };
    let mut applied = Vec::with_capacity(changes.len());

    for change in changes {
        let ts = change.last_modified;
        if !change.deleted && ts.is_none() {
            let error = SyncError::InvalidResponse("record without last_modified".into());
            warn!(id = %change.id, "rejecting incoming record without timestamp");
            outcome.result.errors.push(RecordError::incoming(&change.id, &error));
            continue;
        }
        match apply_change(txn, &change, strategy, &local_fields, &mut outcome.result) {
            Ok(true) => applied.extend(ts),
            Ok(false) => {}
            Err(e) if e.is_record_level() => {
                warn!(id = %change.id, error = %e, "failed to apply incoming record");
                outcome.result.errors.push(RecordError::incoming(&change.id, &e));
                outcome.blocked = earliest(outcome.blocked, ts);
            }
            Err(e) => return Err(e),
        }
    }

    let limit = outcome.blocked;
    outcome.watermark = applied
        .into_iter()
        .filter(|ts| limit.map_or(true, |b| *ts < b))
        .max();
    if let Some(ts) = outcome.watermark {
        outcome.watermark = Some(txn.advance_last_modified(ts)?);
    }
    Ok(outcome)
}

/// Applies one change. Returns false if it was withheld as a conflict.
fn apply_change<S: StorageAdapter>(
    txn: &mut RecordTransaction<'_, '_, S>,
    change: &RemoteRecord,
    strategy: Strategy,
    local_fields: &[String],
    result: &mut SyncResult,
) -> EngineResult<bool> {
    if !change.deleted && !txn.config().id_schema.validate(&change.id) {
        return Err(CoreError::invalid_record(Some(&change.id), "id rejected by id schema").into());
    }
    let local = txn.get(&change.id)?;
    match classify(local, change, local_fields) {
        Classification::Create(record) => {
            txn.put(&record)?;
            result.created.push(record);
        }
        Classification::Update { old, new } | Classification::Align { old, new } => {
            txn.put(&new)?;
            result.updated.push(UpdateOutcome { old: Some(old), new });
        }
        Classification::Delete(record) | Classification::DropTombstone(record) => {
            txn.remove(&record.id);
            result.deleted.push(record);
        }
        Classification::Skip(record) => result.skipped.push(record),
        Classification::Ignore | Classification::KeepLocal => {}
        Classification::Conflict(conflict) => {
            return resolve_incoming(txn, conflict, strategy, local_fields, result)
        }
    }
    Ok(true)
}

fn resolve_incoming<S: StorageAdapter>(
    txn: &mut RecordTransaction<'_, '_, S>,
    conflict: Conflict,
    strategy: Strategy,
    local_fields: &[String],
    result: &mut SyncResult,
) -> EngineResult<bool> {
    match resolve(&conflict, strategy) {
        Action::Report => {
            result.conflicts.push(conflict);
            return Ok(false);
        }
        Action::KeepLocal => {
            let record = match &conflict.local {
                // rebase the tombstone so the delete is pushed against the remote version
                Some(local) if local.is_deleted() => {
                    let rebased = local
                        .clone()
                        .with_last_modified(conflict.remote.as_ref().and_then(|r| r.last_modified));
                    txn.put(&rebased)?;
                    rebased
                }
                Some(local) => txn.resolve(&conflict, local.fields.clone())?,
                None => return Ok(false),
            };
            result.resolved.push(record);
        }
        Action::AcceptRemote => accept_remote(txn, conflict, local_fields, result)?,
    }
    Ok(true)
}

fn accept_remote<S: StorageAdapter>(
    txn: &mut RecordTransaction<'_, '_, S>,
    conflict: Conflict,
    local_fields: &[String],
    result: &mut SyncResult,
) -> EngineResult<()> {
    match conflict.remote {
        Some(remote) => {
            let new = keep_local_fields(remote, conflict.local.as_ref(), local_fields);
            txn.put(&new)?;
            result.resolved.push(new.clone());
            result.updated.push(UpdateOutcome {
                old: conflict.local,
                new,
            });
        }
        None => {
            if let Some(local) = conflict.local {
                txn.remove(&local.id);
                result.resolved.push(local.clone());
                result.deleted.push(local);
            }
        }
    }
    Ok(())
}

/// Reconciles the responses of one batch with the local records.
pub(crate) fn reconcile<S: StorageAdapter>(
    txn: &mut RecordTransaction<'_, '_, S>,
    pipeline: &TransformPipeline,
    responses: Vec<(Outgoing, BatchResponse)>,
    strategy: Strategy,
) -> EngineResult<PushOutcome> {
    let local_fields = txn.config().local_fields.clone();
    let mut outcome = PushOutcome::default();

    for (sent, response) in responses {
        let id = sent.local.id.clone();
        match reconcile_one(txn, pipeline, sent, response, strategy, &local_fields, &mut outcome) {
            Ok(()) => {}
            Err(e) if e.is_record_level() => {
                warn!(id = %id, error = %e, "failed to reconcile pushed record");
                outcome
                    .result
                    .errors
                    .push(RecordError::outgoing(id, e.to_string(), None));
            }
            Err(e) => return Err(e),
        }
    }
    Ok(outcome)
}

fn reconcile_one<S: StorageAdapter>(
    txn: &mut RecordTransaction<'_, '_, S>,
    pipeline: &TransformPipeline,
    sent: Outgoing,
    response: BatchResponse,
    strategy: Strategy,
    local_fields: &[String],
    outcome: &mut PushOutcome,
) -> EngineResult<()> {
    let method = sent.operation.method;
    if response.is_success() || (method == Method::Delete && response.is_not_found()) {
        let written = response.body.data.as_ref().and_then(|d| d.last_modified);
        outcome.latest = outcome.latest.max(written);
        return acknowledge(txn, sent.local, method, written, &mut outcome.result);
    }

    if response.is_precondition_failed() {
        let existing = match response.body.existing {
            Some(remote) => pipeline.decode(remote)?.to_record(),
            None => None,
        };
        return outgoing_conflict(txn, sent, existing, strategy, local_fields, outcome);
    }

    let message = response
        .body
        .message
        .unwrap_or_else(|| format!("remote answered {}", response.status));
    warn!(id = %sent.local.id, status = response.status, "push rejected");
    outcome.result.errors.push(RecordError::outgoing(
        sent.local.id,
        message,
        Some(response.status),
    ));
    Ok(())
}

/// Records that the remote holds what was pushed.
///
/// The local record is only marked synced if it is still the one that was
/// gathered; a record edited meanwhile just gets the new baseline and stays
/// pending.
fn acknowledge<S: StorageAdapter>(
    txn: &mut RecordTransaction<'_, '_, S>,
    gathered: Record,
    method: Method,
    written: Option<i64>,
    result: &mut SyncResult,
) -> EngineResult<()> {
    let current = txn.get(&gathered.id)?;
    match method {
        Method::Put => {
            let ts = written.ok_or_else(|| {
                SyncError::InvalidResponse(format!("write of {} without last_modified", gathered.id))
            })?;
            let published = match current {
                Some(current) if current == gathered => {
                    let synced = gathered
                        .with_status(RecordStatus::Synced)
                        .with_last_modified(Some(ts));
                    txn.put(&synced)?;
                    synced
                }
                Some(current) => {
                    let status = match current.status {
                        RecordStatus::Created => RecordStatus::Updated,
                        other => other,
                    };
                    txn.put(&current.with_status(status).with_last_modified(Some(ts)))?;
                    gathered.with_last_modified(Some(ts))
                }
                // removed while in flight: delete it remotely on the next push
                None => {
                    txn.put(
                        &gathered
                            .clone()
                            .with_status(RecordStatus::Deleted)
                            .with_last_modified(Some(ts)),
                    )?;
                    gathered.with_last_modified(Some(ts))
                }
            };
            result.published.push(published);
        }
        Method::Delete => {
            match current {
                Some(current) if current == gathered => txn.remove(&gathered.id),
                // recreated while in flight: no remote version left to match
                Some(current) => txn.put(
                    &current
                        .with_status(RecordStatus::Created)
                        .with_last_modified(None),
                )?,
                None => {}
            }
            result.published.push(gathered);
        }
    }
    Ok(())
}

fn outgoing_conflict<S: StorageAdapter>(
    txn: &mut RecordTransaction<'_, '_, S>,
    sent: Outgoing,
    remote: Option<Record>,
    strategy: Strategy,
    local_fields: &[String],
    outcome: &mut PushOutcome,
) -> EngineResult<()> {
    match (&remote, sent.operation.method) {
        // already gone remotely
        (None, Method::Delete) => {
            return acknowledge(txn, sent.local, Method::Delete, None, &mut outcome.result)
        }
        // the remote already holds this content, e.g. after a lost response
        (Some(existing), Method::Put) if existing.content_eq(&sent.local, local_fields) => {
            let ts = existing.last_modified;
            return acknowledge(txn, sent.local, Method::Put, ts, &mut outcome.result);
        }
        _ => {}
    }

    let conflict = Conflict::outgoing(Some(sent.local.clone()), remote);
    match resolve(&conflict, strategy) {
        Action::Report => outcome.result.conflicts.push(conflict),
        Action::AcceptRemote => accept_remote(txn, conflict, local_fields, &mut outcome.result)?,
        Action::KeepLocal => {
            let precondition = match conflict.remote.as_ref().and_then(|r| r.last_modified) {
                Some(ts) => Precondition::IfMatch(ts),
                None => Precondition::IfNoneMatch,
            };
            outcome.resend.push(Outgoing {
                operation: sent.operation.with_precondition(precondition),
                local: sent.local,
            });
        }
    }
    Ok(())
}
