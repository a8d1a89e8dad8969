use chrono::{TimeZone, Utc};
use pipeline_ledger_core::contract::{MockContentStore, StoreError};
use pipeline_ledger_core::ignore::IgnoreList;
use pipeline_ledger_core::memory::MemoryStore;

#[test]
fn test_exact_paths_and_patterns_are_matched() {
    let list = IgnoreList::parse(
        "# exports that crash the converter\n\
         \n\
         raw/site1/broken.zip\n\
         raw/**/*.tmp\n\
         \traw/site2/also-broken.zip  \n",
    );

    assert!(list.is_ignored("raw/site1/broken.zip"));
    assert!(list.is_ignored("raw/site2/also-broken.zip"), "Lines are trimmed");
    assert!(list.is_ignored("raw/site3/deep/upload.tmp"));
    assert!(!list.is_ignored("raw/site1/broken.zip.bak"), "Exact entries match whole paths only");
    assert!(!list.is_ignored("raw/site1/fine.zip"));
    assert!(!list.is_ignored("# exports that crash the converter"));
}

#[test]
fn test_invalid_pattern_is_skipped_without_dropping_the_rest() {
    let list = IgnoreList::parse("raw/[unclosed\nraw/a.zip\nraw/*.log\n");

    assert!(list.is_ignored("raw/a.zip"));
    assert!(list.is_ignored("raw/today.log"));
    assert!(!list.is_ignored("raw/[unclosed"));
}

#[test]
fn test_empty_document_ignores_nothing() {
    let list = IgnoreList::parse("\n# only comments\n\n");
    assert!(list.is_empty());
    assert!(!list.is_ignored("raw/a.zip"));
    assert!(IgnoreList::empty().is_empty());
    assert!(IgnoreList::default().is_empty());
}

#[tokio::test]
async fn test_load_reads_document_from_store() {
    let store = MemoryStore::new();
    store.insert(
        "ignore/triton.ignore",
        "raw/a.zip\n",
        Utc.timestamp_opt(1, 0).single().unwrap(),
    );

    let list = IgnoreList::load(&store, "ignore/triton.ignore").await;
    assert!(list.is_ignored("raw/a.zip"));
}

#[tokio::test]
async fn test_load_fails_open_when_document_is_missing() {
    let store = MemoryStore::new();
    let list = IgnoreList::load(&store, "ignore/missing.ignore").await;
    assert!(list.is_empty());
}

#[tokio::test]
async fn test_load_fails_open_when_store_errors() {
    let mut store = MockContentStore::new();
    store
        .expect_read()
        .times(1)
        .returning(|_| Err(StoreError::Backend("connection reset".into())));

    let list = IgnoreList::load(&store, "ignore/triton.ignore").await;
    assert!(list.is_empty());
}
