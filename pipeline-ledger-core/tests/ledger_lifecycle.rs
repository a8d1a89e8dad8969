use chrono::{DateTime, TimeZone, Utc};
use pipeline_ledger_core::contract::{ContentStore, MockContentStore, StoreError};
use pipeline_ledger_core::error::LedgerError;
use pipeline_ledger_core::ledger::Ledger;
use pipeline_ledger_core::memory::MemoryStore;

const LEDGER: &str = "study/dependency/file_map.json";

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
}

#[test]
fn test_should_process_uses_strictly_newer_comparison() {
    let mut ledger = Ledger::empty(LEDGER);
    assert!(
        ledger.should_process("raw/a.zip", ts(100)),
        "Unknown paths must always be processed"
    );

    ledger.begin_attempt("raw/a.zip", ts(100));
    ledger.confirm("raw/a.zip", vec!["out/a".into()], ts(100));

    assert!(!ledger.should_process("raw/a.zip", ts(100)), "Equal mtime must skip");
    assert!(!ledger.should_process("raw/a.zip", ts(99)), "Older mtime must skip");
    assert!(ledger.should_process("raw/a.zip", ts(101)), "Newer mtime must process");
}

#[test]
fn test_begin_attempt_clears_errors_without_marking_seen() {
    let mut ledger = Ledger::empty(LEDGER);
    ledger.begin_attempt("raw/a.zip", ts(100));
    ledger.append_error("raw/a.zip", "first failure");
    assert!(ledger.needs_retry("raw/a.zip"));

    ledger.begin_attempt("raw/a.zip", ts(200));
    let entry = ledger.get("raw/a.zip").expect("entry exists");
    assert!(entry.errors.is_empty(), "A new attempt starts without errors");
    assert_eq!(entry.last_processed_mtime, ts(200));
    assert!(!entry.seen, "begin_attempt must not mark the entry seen");
    assert!(!ledger.needs_retry("raw/a.zip"));
}

#[test]
fn test_append_error_for_unknown_path_is_a_no_op() {
    let mut ledger = Ledger::empty(LEDGER);
    ledger.append_error("raw/unknown.zip", "ignored");
    assert!(ledger.is_empty(), "append_error must not create entries");
}

#[test]
fn test_confirm_replaces_outputs_and_marks_seen() {
    let mut ledger = Ledger::empty(LEDGER);
    ledger.begin_attempt("raw/a.zip", ts(100));
    ledger.confirm("raw/a.zip", vec!["out/1".into(), "out/2".into()], ts(100));
    ledger.confirm("raw/a.zip", vec!["out/3".into()], ts(150));

    let entry = ledger.get("raw/a.zip").expect("entry exists");
    assert_eq!(entry.output_paths, vec!["out/3".to_string()]);
    assert_eq!(entry.last_processed_mtime, ts(150));
    assert!(entry.seen);

    ledger.reset_seen_flags();
    assert!(!ledger.get("raw/a.zip").unwrap().seen);
}

#[tokio::test]
async fn test_load_missing_ledger_returns_empty() {
    let store = MemoryStore::new();
    let ledger = Ledger::load(&store, LEDGER)
        .await
        .expect("A missing ledger is not an error");
    assert!(ledger.is_empty());
    assert_eq!(ledger.location(), LEDGER);
}

#[tokio::test]
async fn test_load_malformed_ledger_is_corrupt() {
    let store = MemoryStore::new();
    store.insert(LEDGER, "{ this is not json", ts(1));

    let result = Ledger::load(&store, LEDGER).await;
    assert!(
        matches!(result, Err(LedgerError::Corrupt { .. })),
        "Expected Corrupt, got: {:?}",
        result
    );
}

#[tokio::test]
async fn test_load_unreadable_ledger_is_fatal() {
    let mut store = MockContentStore::new();
    store
        .expect_read()
        .returning(|_| Err(StoreError::Backend("connection reset".into())));

    let result = Ledger::load(&store, LEDGER).await;
    assert!(
        matches!(result, Err(LedgerError::Unreadable { .. })),
        "Expected Unreadable, got: {:?}",
        result
    );
}

#[tokio::test]
async fn test_persist_round_trips_exactly() {
    let store = MemoryStore::new();
    let mut ledger = Ledger::empty(LEDGER);
    ledger.begin_attempt("raw/a.zip", ts(100));
    ledger.confirm("raw/a.zip", vec!["out/a/2".into(), "out/a/1".into()], ts(100));
    ledger.begin_attempt("raw/b.zip", ts(200));
    ledger.append_error("raw/b.zip", "convert failed");
    ledger.append_error("raw/b.zip", "upload failed");
    ledger.reset_seen_flags();

    ledger.persist(&store).await.expect("persist should succeed");

    assert_eq!(
        store.paths(),
        vec![LEDGER.to_string()],
        "Only the ledger document should remain after persisting"
    );

    let reloaded = Ledger::load(&store, LEDGER).await.expect("reload");
    assert_eq!(reloaded, ledger, "Ledger must round-trip exactly");
    let b = reloaded.get("raw/b.zip").unwrap();
    assert_eq!(b.errors, vec!["convert failed", "upload failed"]);
    assert_eq!(
        reloaded.get("raw/a.zip").unwrap().output_paths,
        vec!["out/a/2", "out/a/1"],
        "Output order is preserved"
    );
}

#[tokio::test]
async fn test_persisted_document_omits_transient_fields() {
    let store = MemoryStore::new();
    let mut ledger = Ledger::empty(LEDGER);
    ledger.begin_attempt("raw/a.zip", ts(100));
    ledger.confirm("raw/a.zip", vec!["out/a".into()], ts(100));
    ledger.persist(&store).await.unwrap();

    let document: serde_json::Value =
        serde_json::from_slice(&store.get(LEDGER).unwrap()).expect("valid json");
    let entry = &document["raw/a.zip"];
    assert!(entry.get("seen").is_none(), "seen must never be persisted");
    assert!(entry.get("path").is_none(), "path is the key, not a field");
    assert_eq!(entry["output_paths"][0], "out/a");
    assert!(entry["last_processed_mtime"].is_string());
}

#[tokio::test]
async fn test_persist_replaces_ledger_with_a_single_overwriting_write() {
    let mut store = MockContentStore::new();
    store
        .expect_write()
        .withf(|path, content, overwrite| {
            path == LEDGER
                && *overwrite
                && serde_json::from_slice::<serde_json::Value>(content).is_ok()
        })
        .times(1)
        .returning(|_, _, _| Ok(()));
    // Any other write or delete would be an unexpected call and panic the mock.

    let mut ledger = Ledger::empty(LEDGER);
    ledger.begin_attempt("raw/a.zip", ts(100));
    ledger.persist(&store).await.expect("persist should succeed");
}

#[tokio::test]
async fn test_persist_failure_is_reported_with_ledger_location() {
    let mut store = MockContentStore::new();
    store
        .expect_write()
        .withf(|path, _, _| path == LEDGER)
        .times(1)
        .returning(|_, _, _| Err(StoreError::Backend("quota exceeded".into())));

    let mut ledger = Ledger::empty(LEDGER);
    ledger.begin_attempt("raw/a.zip", ts(100));

    match ledger.persist(&store).await {
        Err(LedgerError::Persist { location, .. }) => assert_eq!(location, LEDGER),
        other => panic!("Expected Persist error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_second_persist_replaces_previous_document() {
    let store = MemoryStore::new();
    let mut ledger = Ledger::empty(LEDGER);
    ledger.begin_attempt("raw/a.zip", ts(100));
    ledger.persist(&store).await.unwrap();

    ledger.begin_attempt("raw/b.zip", ts(200));
    ledger.persist(&store).await.unwrap();

    let reloaded = Ledger::load(&store, LEDGER).await.unwrap();
    assert_eq!(reloaded.len(), 2);
    assert_eq!(store.paths(), vec![LEDGER.to_string()]);
}

#[tokio::test]
async fn test_delete_stale_outputs_before_retry_removes_recorded_outputs() {
    let store = MemoryStore::new();
    store.insert("out/a/1", "one", ts(1));
    store.insert("out/a/2", "two", ts(1));
    store.insert("out/b/1", "other input", ts(1));

    let mut ledger = Ledger::empty(LEDGER);
    ledger.begin_attempt("raw/a.zip", ts(100));
    ledger.confirm(
        "raw/a.zip",
        vec!["out/a/1".into(), "out/a/2".into(), "out/a/already-gone".into()],
        ts(100),
    );

    let cleanup = ledger
        .delete_stale_outputs_before_retry(&store, "raw/a.zip")
        .await;

    assert!(cleanup.is_complete(), "Missing outputs count as deleted");
    assert_eq!(cleanup.deleted.len(), 3);
    assert!(!store.contains("out/a/1"));
    assert!(!store.contains("out/a/2"));
    assert!(store.contains("out/b/1"), "Other inputs' outputs are untouched");
    assert!(ledger.get("raw/a.zip").unwrap().output_paths.is_empty());
}

#[tokio::test]
async fn test_delete_stale_outputs_keeps_undeletable_outputs_recorded() {
    let mut store = MockContentStore::new();
    store
        .expect_delete()
        .withf(|path| path == "out/a/locked")
        .returning(|_| Err(StoreError::Backend("lease held".into())));
    store
        .expect_delete()
        .withf(|path| path == "out/a/free")
        .returning(|_| Ok(()));

    let mut ledger = Ledger::empty(LEDGER);
    ledger.begin_attempt("raw/a.zip", ts(100));
    ledger.confirm(
        "raw/a.zip",
        vec!["out/a/free".into(), "out/a/locked".into()],
        ts(100),
    );

    let cleanup = ledger
        .delete_stale_outputs_before_retry(&store, "raw/a.zip")
        .await;

    assert!(!cleanup.is_complete());
    assert_eq!(cleanup.retained, vec!["out/a/locked".to_string()]);
    let entry = ledger.get("raw/a.zip").unwrap();
    assert_eq!(entry.output_paths, vec!["out/a/locked".to_string()]);
    assert_eq!(entry.errors.len(), 1, "The failed deletion is recorded as an error");
}

#[tokio::test]
async fn test_reconcile_removes_unseen_entries_and_their_outputs() {
    let store = MemoryStore::new();
    store.insert("out/kept", "k", ts(1));
    store.insert("out/gone/1", "g1", ts(1));
    store.insert("out/gone/2", "g2", ts(1));

    let mut ledger = Ledger::empty(LEDGER);
    ledger.begin_attempt("raw/kept.zip", ts(100));
    ledger.confirm("raw/kept.zip", vec!["out/kept".into()], ts(100));
    ledger.begin_attempt("raw/gone.zip", ts(100));
    ledger.confirm(
        "raw/gone.zip",
        vec!["out/gone/1".into(), "out/gone/2".into()],
        ts(100),
    );
    ledger.reset_seen_flags();
    ledger.mark_seen("raw/kept.zip");

    let summary = ledger.reconcile_stale_entries(&store).await;

    assert_eq!(summary.removed_entries, vec!["raw/gone.zip".to_string()]);
    assert_eq!(summary.deleted_outputs.len(), 2);
    assert!(summary.retained_entries.is_empty());
    assert!(ledger.get("raw/gone.zip").is_none());
    assert!(ledger.get("raw/kept.zip").is_some());
    assert!(store.contains("out/kept"));
    assert!(!store.contains("out/gone/1"));
    assert!(!store.contains("out/gone/2"));
}

#[tokio::test]
async fn test_reconcile_retains_entry_when_outputs_cannot_be_deleted() {
    let mut store = MockContentStore::new();
    store
        .expect_delete()
        .returning(|_| Err(StoreError::Backend("forbidden".into())));

    let mut ledger = Ledger::empty(LEDGER);
    ledger.begin_attempt("raw/gone.zip", ts(100));
    ledger.confirm("raw/gone.zip", vec!["out/gone".into()], ts(100));
    ledger.reset_seen_flags();

    let summary = ledger.reconcile_stale_entries(&store).await;

    assert_eq!(summary.retained_entries, vec!["raw/gone.zip".to_string()]);
    assert!(summary.removed_entries.is_empty());
    let entry = ledger
        .get("raw/gone.zip")
        .expect("Entry is kept so cleanup is retried next run");
    assert_eq!(entry.output_paths, vec!["out/gone".to_string()]);
}

#[tokio::test]
async fn test_memory_store_write_without_overwrite_refuses_existing_blob() {
    let store = MemoryStore::new();
    store.write("x", b"first", false).await.unwrap();
    let second = store.write("x", b"second", false).await;
    assert!(matches!(second, Err(StoreError::AlreadyExists(_))));
    assert_eq!(store.get("x").unwrap(), b"first".to_vec());
    store.write("x", b"third", true).await.unwrap();
    assert_eq!(store.get("x").unwrap(), b"third".to_vec());
}
