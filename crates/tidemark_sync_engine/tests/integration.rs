//! End-to-end sync against the reference server.

mod common;

use common::{client, client_with, paged_server, server, Client, InMemoryRemote};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tidemark_core::{
    ConflictType, CreateOptions, DeleteOptions, GetOptions, RecordStatus, RecordStore,
    UpdateOptions,
};
use tidemark_storage::FileAdapter;
use tidemark_sync_engine::{
    EncryptionKey, EncryptionTransformer, IdPrefixTransformer, Strategy, SyncConfig, SyncEngine,
    SyncError, SyncOptions, SyncState, TransformPipeline,
};
use tidemark_sync_server::{ServerConfig, SyncServer};
use tidemark_testkit::{doc, note, note_with_id, notes_config, NOTES, SAMPLE_IDS};

const MORE_IDS: [&str; 2] = [
    "4f9a8fa2-5b1e-4a82-9d92-6f5e7a8192a3",
    "5a0b9ab3-6c2f-4b93-8ea3-7a6f8b92a3b4",
];

fn title(client: &Client, id: &str) -> serde_json::Value {
    client.store().get(id, GetOptions::default()).unwrap().fields["title"].clone()
}

/// Brings a client in sync with one remote record and returns its id.
async fn synced_note(server: &Arc<SyncServer>, client: &Client, text: &str) -> &'static str {
    let id = SAMPLE_IDS[0];
    server.put_record(NOTES, id, note(text));
    let result = client.sync(SyncOptions::new()).await;
    assert!(result.ok);
    id
}

fn edit(client: &Client, id: &str, text: &str) {
    client
        .store()
        .update(
            doc(json!({"id": id, "title": text})),
            UpdateOptions::patch(),
        )
        .unwrap();
}

#[tokio::test]
async fn pulls_remote_records_into_empty_store() {
    let server = server();
    for (i, id) in SAMPLE_IDS.iter().take(3).enumerate() {
        server.put_record(NOTES, id, note(&format!("remote {i}")));
    }
    let client = client(&server);

    let result = client.sync(SyncOptions::new()).await;

    assert!(result.ok);
    assert_eq!(result.created.len(), 3);
    assert!(result.conflicts.is_empty());
    assert_eq!(result.last_modified, Some(3));
    assert_eq!(title(&client, SAMPLE_IDS[1]), json!("remote 1"));
}

#[tokio::test]
async fn second_sync_without_writes_is_empty() {
    let server = server();
    server.put_record(NOTES, SAMPLE_IDS[0], note("remote"));
    let client = client(&server);
    client
        .store()
        .create(note("local"), CreateOptions::default())
        .unwrap();

    let first = client.sync(SyncOptions::new()).await;
    assert!(first.ok);
    assert_eq!(first.created.len(), 1);
    assert_eq!(first.published.len(), 1);
    assert_eq!(first.last_modified, Some(2));

    let second = client.sync(SyncOptions::new()).await;
    assert!(second.ok);
    assert!(second.is_empty());
    assert_eq!(second.last_modified, first.last_modified);
}

#[tokio::test]
async fn pending_edit_against_newer_remote_is_reported() {
    let server = server();
    let client = client(&server);
    let id = synced_note(&server, &client, "a0").await;
    edit(&client, id, "a");
    server.put_record(NOTES, id, note("b"));

    let result = client.sync(SyncOptions::new()).await;

    assert!(!result.ok);
    assert!(result.failure.is_none());
    assert_eq!(result.conflicts.len(), 1);
    let conflict = &result.conflicts[0];
    assert_eq!(conflict.conflict_type, ConflictType::Incoming);
    assert_eq!(conflict.local.as_ref().unwrap().fields["title"], json!("a"));
    assert_eq!(conflict.remote.as_ref().unwrap().fields["title"], json!("b"));

    // the local edit is untouched and not pushed over the remote one
    let local = client.store().get(id, GetOptions::default()).unwrap();
    assert_eq!(local.status, RecordStatus::Updated);
    assert_eq!(local.fields["title"], json!("a"));
    assert_eq!(result.last_modified, Some(1));
    assert_eq!(server.get_record(NOTES, id).unwrap().fields["title"], json!("b"));
}

#[tokio::test]
async fn server_wins_takes_the_remote_version() {
    let server = server();
    let client = client(&server);
    let id = synced_note(&server, &client, "a0").await;
    edit(&client, id, "a");
    server.put_record(NOTES, id, note("b"));

    let result = client
        .sync(SyncOptions::new().with_strategy(Strategy::ServerWins))
        .await;

    assert!(result.ok);
    assert!(result.conflicts.is_empty());
    assert_eq!(result.updated.len(), 1);
    let outcome = &result.updated[0];
    assert_eq!(outcome.old.as_ref().unwrap().fields["title"], json!("a"));
    assert_eq!(outcome.new.fields["title"], json!("b"));

    let local = client.store().get(id, GetOptions::default()).unwrap();
    assert_eq!(local.status, RecordStatus::Synced);
    assert_eq!(local.last_modified, Some(2));
    assert_eq!(local.fields["title"], json!("b"));
    assert_eq!(result.last_modified, Some(2));
}

#[tokio::test]
async fn client_wins_pushes_the_local_version() {
    let server = server();
    let client = client(&server);
    let id = synced_note(&server, &client, "a0").await;
    edit(&client, id, "mine");
    server.put_record(NOTES, id, note("theirs"));

    let result = client
        .sync(SyncOptions::new().with_strategy(Strategy::ClientWins))
        .await;

    assert!(result.ok);
    assert_eq!(result.resolved.len(), 1);
    assert_eq!(result.published.len(), 1);
    assert_eq!(server.get_record(NOTES, id).unwrap().fields["title"], json!("mine"));
    let local = client.store().get(id, GetOptions::default()).unwrap();
    assert_eq!(local.status, RecordStatus::Synced);
    assert_eq!(local.last_modified, Some(3));
    assert_eq!(result.last_modified, Some(3));
}

#[tokio::test]
async fn delete_of_a_record_gone_remotely_succeeds() {
    let server = server();
    let client = client(&server);
    let id = SAMPLE_IDS[1];
    // known remotely once, since removed there
    client
        .store()
        .create(
            doc(json!({"id": id, "title": "old", "last_modified": 5})),
            CreateOptions { synced: true },
        )
        .unwrap();
    client.store().delete(id, DeleteOptions::default()).unwrap();

    let result = client.sync(SyncOptions::new()).await;

    assert!(result.ok);
    assert!(result.errors.is_empty());
    assert_eq!(result.published.len(), 1);
    assert!(client.store().get_any(id).unwrap().is_none());
}

#[tokio::test]
async fn remote_deletion_removes_synced_record() {
    let server = server();
    let client = client(&server);
    let id = synced_note(&server, &client, "doomed").await;
    server.delete_record(NOTES, id);

    let result = client.sync(SyncOptions::new()).await;

    assert!(result.ok);
    assert_eq!(result.deleted.len(), 1);
    assert!(client.store().get_any(id).unwrap().is_none());
    assert_eq!(result.last_modified, Some(2));
}

#[tokio::test]
async fn every_pending_record_in_a_page_is_accounted_for() {
    let server = server();
    let client = client(&server);
    for (i, id) in SAMPLE_IDS.iter().enumerate() {
        server.put_record(NOTES, id, note(&format!("v{i}")));
    }
    assert!(client.sync(SyncOptions::new()).await.ok);

    let [a, b, c, d] = SAMPLE_IDS;
    let [e, f] = MORE_IDS;
    edit(&client, b, "local b");
    client.store().delete(c, DeleteOptions::default()).unwrap();
    edit(&client, d, "local d");
    let store = client.store();
    store
        .create(note_with_id(e, "local e"), CreateOptions::default())
        .unwrap();
    store
        .create(note_with_id(f, "same"), CreateOptions::default())
        .unwrap();

    server.put_record(NOTES, b, note("remote b"));
    server.put_record(NOTES, c, note("remote c"));
    server.delete_record(NOTES, d);
    server.put_record(NOTES, e, note("remote e"));
    server.put_record(NOTES, f, note("same"));

    let result = client.sync(SyncOptions::new()).await;
    assert!(result.failure.is_none());

    let conflicted: Vec<&str> = result.conflicts.iter().map(|c| c.id()).collect();
    let applied: Vec<&str> = result
        .created
        .iter()
        .chain(result.updated.iter().map(|u| &u.new))
        .chain(result.deleted.iter())
        .chain(result.skipped.iter())
        .map(|r| r.id.as_str())
        .collect();
    for id in [b, c, d, e, f] {
        let seen = conflicted.iter().chain(applied.iter()).filter(|x| **x == id).count();
        assert_eq!(seen, 1, "{id} reported {seen} times");
    }
    assert!(!conflicted.contains(&a) && !applied.contains(&a));
    assert_eq!(conflicted.len(), 4);
    assert_eq!(
        client.store().get(f, GetOptions::default()).unwrap().status,
        RecordStatus::Synced
    );
    // conflicts wait for a resolution: nothing was pushed
    assert!(result.published.is_empty());
    assert_eq!(server.get_record(NOTES, b).unwrap().fields["title"], json!("remote b"));

    // keep the local side of two of them and sync again
    for conflict in result.conflicts.iter().filter(|found| [b, e].contains(&found.id())) {
        let local = conflict.local.clone().unwrap();
        client.store().resolve(conflict, local.fields).unwrap();
    }
    let result = client.sync(SyncOptions::new()).await;

    let published: HashSet<&str> = result.published.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(published, HashSet::from([b, e]));
    let conflicted: HashSet<&str> = result.conflicts.iter().map(|c| c.id()).collect();
    assert_eq!(conflicted, HashSet::from([c, d]));
    assert!(result
        .conflicts
        .iter()
        .all(|c| c.conflict_type == ConflictType::Outgoing));
    assert_eq!(server.get_record(NOTES, b).unwrap().fields["title"], json!("local b"));
    assert_eq!(server.get_record(NOTES, e).unwrap().fields["title"], json!("local e"));
}

#[tokio::test]
async fn watermark_never_moves_back() {
    let server = server();
    let client = client(&server);
    let mut previous = None;
    let mut check = |last_modified: Option<i64>| {
        assert!(last_modified >= previous, "{last_modified:?} < {previous:?}");
        previous = last_modified;
    };

    server.put_record(NOTES, SAMPLE_IDS[0], note("one"));
    server.put_record(NOTES, SAMPLE_IDS[1], note("two"));
    check(client.sync(SyncOptions::new()).await.last_modified);

    server.set_backoff(Some(Duration::from_secs(60)));
    let result = client.sync(SyncOptions::new()).await;
    assert!(matches!(
        result.failure.as_ref().unwrap().error,
        SyncError::Backoff { seconds: 60 }
    ));
    check(result.last_modified);
    server.set_backoff(None);

    server.put_record(NOTES, SAMPLE_IDS[2], note("three"));
    check(client.sync(SyncOptions::new()).await.last_modified);

    server.flush();
    let result = client.sync(SyncOptions::new()).await;
    assert!(result.failure.is_some());
    check(result.last_modified);
    assert_eq!(previous, Some(3));
}

#[tokio::test]
async fn flushed_server_is_repopulated_after_reset() {
    let server = server();
    server.put_record(NOTES, SAMPLE_IDS[0], note("one"));
    server.put_record(NOTES, SAMPLE_IDS[1], note("two"));
    let client = client(&server);
    assert!(client.sync(SyncOptions::new()).await.ok);

    server.flush();
    let result = client.sync(SyncOptions::new()).await;
    let failure = result.failure.as_ref().unwrap();
    assert_eq!(failure.phase, SyncState::Pull);
    assert!(matches!(
        failure.error,
        SyncError::ServerFlushed { local: 2, remote: 0 }
    ));
    assert_eq!(result.last_modified, Some(2));

    assert_eq!(client.store().reset_sync_status().unwrap(), 2);
    let result = client.sync(SyncOptions::new()).await;

    assert!(result.ok);
    assert_eq!(result.published.len(), 2);
    assert_eq!(server.live_count(NOTES), 2);
    assert_eq!(result.last_modified, Some(2));
    assert!(client.store().pending().unwrap().is_empty());
}

#[tokio::test]
async fn remote_write_during_pagination_aborts_the_pull() {
    let server = paged_server(2);
    for id in &SAMPLE_IDS[..3] {
        server.put_record(NOTES, id, note("early"));
    }
    let client = client(&server);
    client.remote().after_first_page(|s| {
        s.put_record(NOTES, SAMPLE_IDS[3], note("late"));
    });

    let result = client.sync(SyncOptions::new()).await;

    assert!(!result.ok);
    let failure = result.failure.as_ref().unwrap();
    assert!(matches!(failure.error, SyncError::PaginationAborted { anchor: 3 }));
    assert!(failure.error.is_retryable());
    // the first page stays committed
    assert_eq!(result.created.len(), 2);
    assert_eq!(result.last_modified, Some(2));

    let result = client.sync(SyncOptions::new()).await;
    assert!(result.ok);
    assert_eq!(result.created.len(), 2);
    assert_eq!(result.last_modified, Some(4));
    assert_eq!(title(&client, SAMPLE_IDS[3]), json!("late"));
}

#[tokio::test]
async fn outgoing_conflict_with_client_wins_is_resent() {
    let server = server();
    let client = client(&server);
    let id = synced_note(&server, &client, "base").await;
    edit(&client, id, "mine");
    client.remote().before_batch(move |s| {
        s.put_record(NOTES, id, note("theirs"));
    });

    let result = client
        .sync(SyncOptions::new().with_strategy(Strategy::ClientWins))
        .await;

    assert!(result.ok);
    assert_eq!(result.published.len(), 1);
    assert_eq!(server.get_record(NOTES, id).unwrap().fields["title"], json!("mine"));
    // another client wrote meanwhile, so the next pull settles the watermark
    assert_eq!(result.last_modified, Some(1));

    let result = client.sync(SyncOptions::new()).await;
    assert!(result.ok);
    assert_eq!(result.skipped.len(), 1);
    assert_eq!(result.last_modified, Some(3));
}

#[tokio::test]
async fn outgoing_conflict_with_server_wins_takes_remote() {
    let server = server();
    let client = client(&server);
    let id = synced_note(&server, &client, "base").await;
    edit(&client, id, "mine");
    client.remote().before_batch(move |s| {
        s.put_record(NOTES, id, note("theirs"));
    });

    let result = client
        .sync(SyncOptions::new().with_strategy(Strategy::ServerWins))
        .await;

    assert!(result.ok);
    assert!(result.published.is_empty());
    assert_eq!(result.resolved.len(), 1);
    let local = client.store().get(id, GetOptions::default()).unwrap();
    assert_eq!(local.fields["title"], json!("theirs"));
    assert_eq!(local.status, RecordStatus::Synced);
    assert_eq!(local.last_modified, Some(2));
}

#[tokio::test]
async fn outgoing_conflict_is_reported_by_default() {
    let server = server();
    let client = client(&server);
    let id = synced_note(&server, &client, "base").await;
    edit(&client, id, "mine");
    client.remote().before_batch(move |s| {
        s.put_record(NOTES, id, note("theirs"));
    });

    let result = client.sync(SyncOptions::new()).await;

    assert!(!result.ok);
    assert_eq!(result.conflicts.len(), 1);
    let conflict = &result.conflicts[0];
    assert_eq!(conflict.conflict_type, ConflictType::Outgoing);
    assert_eq!(conflict.remote.as_ref().unwrap().fields["title"], json!("theirs"));
    assert_eq!(title(&client, id), json!("mine"));
}

#[tokio::test]
async fn encrypted_records_round_trip_between_clients() {
    let server = server();
    let pipeline = || {
        let key = EncryptionKey::derive_from_password(b"correct horse", b"tidemark-tests").unwrap();
        TransformPipeline::new()
            .with(EncryptionTransformer::new(key))
            .with(IdPrefixTransformer::new("tm-"))
    };
    let alice = client(&server).with_pipeline(pipeline());
    let bob = client(&server).with_pipeline(pipeline());

    let created = alice
        .store()
        .create(note("secret"), CreateOptions::default())
        .unwrap();
    let result = alice.sync(SyncOptions::new()).await;
    assert!(result.ok);
    assert_eq!(result.published.len(), 1);

    let stored = server.get_record(NOTES, &format!("tm-{}", created.id)).unwrap();
    assert!(stored.fields.contains_key("ciphertext"));
    assert!(!stored.fields.contains_key("title"));

    let result = bob.sync(SyncOptions::new()).await;
    assert!(result.ok);
    assert_eq!(result.created.len(), 1);
    assert_eq!(title(&bob, &created.id), json!("secret"));
}

#[tokio::test]
async fn undecryptable_records_are_reported_and_hold_the_watermark() {
    let server = server();
    let key = EncryptionKey::derive_from_password(b"one", b"salt").unwrap();
    let writer = client(&server)
        .with_pipeline(TransformPipeline::new().with(EncryptionTransformer::new(key)));
    writer
        .store()
        .create(note("hidden"), CreateOptions::default())
        .unwrap();
    assert!(writer.sync(SyncOptions::new()).await.ok);

    let wrong = EncryptionKey::derive_from_password(b"two", b"salt").unwrap();
    let reader = client(&server)
        .with_pipeline(TransformPipeline::new().with(EncryptionTransformer::new(wrong)));
    let result = reader.sync(SyncOptions::new()).await;

    assert!(!result.ok);
    assert!(result.failure.is_none());
    assert_eq!(result.errors.len(), 1);
    assert!(result.created.is_empty());
    assert_eq!(result.last_modified, None);
}

#[tokio::test]
async fn two_clients_converge_through_the_server() {
    let server = server();
    let alice = client(&server);
    let bob = client(&server).with_server_info_cache(Arc::clone(alice.server_info_cache()));

    let created = alice
        .store()
        .create(note("shared"), CreateOptions::default())
        .unwrap();
    assert!(alice.sync(SyncOptions::new()).await.ok);

    let result = bob.sync(SyncOptions::new()).await;
    assert_eq!(result.created.len(), 1);
    edit(&bob, &created.id, "edited by bob");
    let result = bob.sync(SyncOptions::new()).await;
    assert!(result.ok);
    assert_eq!(result.published.len(), 1);
    assert_eq!(result.last_modified, Some(2));

    let result = alice.sync(SyncOptions::new()).await;
    assert!(result.ok);
    assert_eq!(result.updated.len(), 1);
    assert_eq!(title(&alice, &created.id), json!("edited by bob"));
    assert_eq!(result.last_modified, Some(2));

    // one capability fetch for both engines
    assert_eq!(alice.remote().server_info_calls(), 1);
    assert_eq!(bob.remote().server_info_calls(), 0);
}

#[tokio::test]
async fn protocol_mismatch_moves_no_data() {
    tidemark_testkit::init_tracing();
    let server = Arc::new(SyncServer::new(
        ServerConfig::default().with_protocol_version(2),
    ));
    server.put_record(NOTES, SAMPLE_IDS[0], note("unreachable"));
    let client = client(&server);
    client
        .store()
        .create(note("local"), CreateOptions::default())
        .unwrap();

    let result = client.sync(SyncOptions::new()).await;

    let failure = result.failure.as_ref().unwrap();
    assert_eq!(failure.phase, SyncState::CheckMetadata);
    assert!(matches!(
        failure.error,
        SyncError::ProtocolMismatch { local: 1, remote: 2 }
    ));
    assert!(result.is_empty());
    assert_eq!(server.live_count(NOTES), 1);
    assert_eq!(client.store().pending().unwrap().len(), 1);
}

#[tokio::test]
async fn local_only_fields_stay_local() {
    let server = server();
    let client = client_with(&server, notes_config());
    let created = client
        .store()
        .create(
            doc(json!({"title": "t", "seen": true})),
            CreateOptions::default(),
        )
        .unwrap();
    assert!(client.sync(SyncOptions::new()).await.ok);

    let stored = server.get_record(NOTES, &created.id).unwrap();
    assert!(!stored.fields.contains_key("seen"));
    let local = client.store().get(&created.id, GetOptions::default()).unwrap();
    assert_eq!(local.fields["seen"], json!(true));
    assert_eq!(local.status, RecordStatus::Synced);
}

#[tokio::test]
async fn file_backed_client_keeps_its_state() {
    let server = server();
    server.put_record(NOTES, SAMPLE_IDS[0], note("remote"));
    let temp = tempfile::TempDir::new().unwrap();
    let path = temp.path().join("db");

    {
        let store =
            RecordStore::new(Arc::new(FileAdapter::open(&path).unwrap()), notes_config()).unwrap();
        let remote = InMemoryRemote::new(Arc::clone(&server), NOTES);
        let engine = SyncEngine::new(store, Arc::new(remote), SyncConfig::default());
        engine
            .store()
            .create(note("local"), CreateOptions::default())
            .unwrap();
        let result = engine.sync(SyncOptions::new()).await;
        assert!(result.ok);
        assert_eq!(result.last_modified, Some(2));
    }

    let store =
        RecordStore::new(Arc::new(FileAdapter::open(&path).unwrap()), notes_config()).unwrap();
    assert_eq!(store.last_modified().unwrap(), Some(2));
    assert!(store.pending().unwrap().is_empty());
    assert_eq!(
        store.get(SAMPLE_IDS[0], GetOptions::default()).unwrap().fields["title"],
        json!("remote")
    );
}
