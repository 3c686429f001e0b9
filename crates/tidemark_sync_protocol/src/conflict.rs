//! Conflict detection and resolution.
//!
//! [`classify`] is the decision table run once per incoming change against
//! the matching local record:
//!
//! | Local status        | Remote change | Outcome                          |
//! |---------------------|---------------|----------------------------------|
//! | none                | upsert        | [`Classification::Create`]       |
//! | none                | tombstone     | [`Classification::Ignore`]       |
//! | `synced`            | upsert        | `Update`, or `Skip` if identical |
//! | `synced`            | tombstone     | [`Classification::Delete`]       |
//! | `created`/`updated` | upsert        | incoming conflict                |
//! | `created`/`updated` | tombstone     | incoming conflict, no remote     |
//! | `deleted`           | tombstone     | [`Classification::DropTombstone`]|
//! | `deleted`           | upsert        | incoming conflict                |
//!
//! Two rows short-circuit the conflicts for pending records: a remote upsert
//! whose content already equals the local edit is [`Classification::Align`],
//! and a remote upsert that is exactly the local baseline is
//! [`Classification::KeepLocal`].

use crate::record::RemoteRecord;
use serde::{Deserialize, Serialize};
use tidemark_core::{Conflict, Record, RecordStatus};

/// Conflict resolution strategy, chosen per sync call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Report conflicts and apply neither side.
    #[default]
    Manual,
    /// Keep the local version and push it over the remote one.
    ClientWins,
    /// Apply the remote version and discard the local edit.
    ServerWins,
}

/// What an incoming change does to local state.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// No local record: store the remote one.
    Create(Record),
    /// Local copy was synced: overwrite it.
    Update {
        /// Local record before.
        old: Record,
        /// Remote record to store.
        new: Record,
    },
    /// Local copy was synced and the remote deleted it: remove it.
    Delete(Record),
    /// Local copy already equals the remote version.
    Skip(Record),
    /// Remote tombstone for a record never seen locally.
    Ignore,
    /// Local pending edit equals the remote content: mark it synced.
    Align {
        /// Local record before.
        old: Record,
        /// Record to store, synced at the remote timestamp.
        new: Record,
    },
    /// Remote sent the version the local edit is based on: keep the edit.
    KeepLocal,
    /// Both sides deleted: drop the local tombstone.
    DropTombstone(Record),
    /// Divergence the caller has to resolve.
    Conflict(Conflict),
}

/// Classifies an incoming change against the local record.
///
/// `remote` must already be decoded. `local_fields` are ignored when
/// comparing contents. A live remote record without a timestamp is treated
/// as a tombstone; callers reject those before classifying.
#[must_use]
pub fn classify(
    local: Option<Record>,
    remote: &RemoteRecord,
    local_fields: &[String],
) -> Classification {
    let remote_record = remote.to_record();

    let Some(local) = local else {
        return match remote_record {
            Some(record) => Classification::Create(record),
            None => Classification::Ignore,
        };
    };

    match (local.status, remote_record) {
        (RecordStatus::Synced, None) => Classification::Delete(local),
        (RecordStatus::Synced, Some(new)) => {
            if local.last_modified == new.last_modified && local.content_eq(&new, local_fields) {
                Classification::Skip(local)
            } else {
                Classification::Update {
                    new: keep_local_fields(new, &local, local_fields),
                    old: local,
                }
            }
        }
        (RecordStatus::Deleted, None) => Classification::DropTombstone(local),
        (_, Some(new)) if local.last_modified.is_some() && local.last_modified == new.last_modified => {
            Classification::KeepLocal
        }
        (RecordStatus::Created | RecordStatus::Updated, Some(new))
            if local.content_eq(&new, local_fields) =>
        {
            Classification::Align {
                new: keep_local_fields(new, &local, local_fields),
                old: local,
            }
        }
        (_, remote_side) => Classification::Conflict(Conflict::incoming(Some(local), remote_side)),
    }
}

fn keep_local_fields(mut new: Record, local: &Record, local_fields: &[String]) -> Record {
    for name in local_fields {
        if let Some(value) = local.fields.get(name) {
            new.fields.insert(name.clone(), value.clone());
        }
    }
    new
}

/// What to do with a conflict under a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Report the conflict and leave both sides untouched.
    Report,
    /// Keep the local version. For incoming conflicts it is rebased on the
    /// remote version and pushed later in the same run; for outgoing
    /// conflicts it is re-sent once with the remote version marker.
    KeepLocal,
    /// Make the local record equal to the remote side (or remove it when
    /// the remote side is a deletion).
    AcceptRemote,
}

/// Decides what a strategy does to a conflict.
///
/// A conflict with neither side cannot be acted upon and is always
/// reported.
#[must_use]
pub fn resolve(conflict: &Conflict, strategy: Strategy) -> Action {
    if conflict.local.is_none() && conflict.remote.is_none() {
        return Action::Report;
    }
    match strategy {
        Strategy::Manual => Action::Report,
        // nothing local to keep
        Strategy::ClientWins if conflict.local.is_none() => Action::AcceptRemote,
        Strategy::ClientWins => Action::KeepLocal,
        Strategy::ServerWins => Action::AcceptRemote,
    }
}
