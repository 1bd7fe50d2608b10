use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use bucket_sync_core::config::{ConnectorScope, DateBounds};
use bucket_sync_core::contract::{
    MockObjectStoreClient, MockRecordSink, MockRecordStore, MockSyncPointStore, ObjectPage,
    ObjectSummary, S3ConsoleUrls,
};
use bucket_sync_core::hierarchy::FolderHierarchySynthesizer;
use bucket_sync_core::pager::{ObjectFilters, ObjectListingPager};
use bucket_sync_core::permissions::PermissionResolver;
use bucket_sync_core::ratelimit::RateLimiter;
use bucket_sync_core::reconcile::RecordReconciler;
use bucket_sync_core::records::{FileRecord, Permission};
use bucket_sync_core::syncpoint::{SyncPoint, SyncPointKey, SyncPointPatch};

type Flush = Vec<(FileRecord, Vec<Permission>)>;

fn pager(
    client: MockObjectStoreClient,
    sink: MockRecordSink,
    sync_points: MockSyncPointStore,
    store: MockRecordStore,
    filters: ObjectFilters,
    batch_size: usize,
) -> ObjectListingPager {
    let store = Arc::new(store);
    let permissions = PermissionResolver::new(
        ConnectorScope::Team,
        "org-1".to_string(),
        None,
        store.clone(),
    );
    let reconciler = RecordReconciler::new(
        "conn-1".to_string(),
        store.clone(),
        permissions.clone(),
        Arc::new(S3ConsoleUrls),
        true,
    );
    let hierarchy = FolderHierarchySynthesizer::new(
        "conn-1".to_string(),
        store,
        permissions,
        Arc::new(S3ConsoleUrls),
    );
    ObjectListingPager::new(
        Arc::new(client),
        Arc::new(sink),
        Arc::new(sync_points),
        reconciler,
        hierarchy,
        Arc::new(RateLimiter::new(1_000)),
        filters,
        batch_size,
    )
}

fn object(key: &str, etag: &str, last_modified: i64) -> ObjectSummary {
    ObjectSummary {
        key: key.to_string(),
        etag: Some(etag.to_string()),
        last_modified: Some(last_modified),
        size: 1,
    }
}

fn empty_record_store() -> MockRecordStore {
    let mut store = MockRecordStore::new();
    store
        .expect_get_record_by_external_id()
        .returning(|_, _| Ok(None));
    store
        .expect_get_record_by_external_revision_id()
        .returning(|_, _| Ok(None));
    store
}

fn capturing_sink(flushes: Arc<Mutex<Vec<Flush>>>) -> MockRecordSink {
    let mut sink = MockRecordSink::new();
    sink.expect_on_new_records().returning(move |records| {
        flushes.lock().unwrap().push(records);
        Ok(())
    });
    sink
}

fn quiet_sync_points() -> MockSyncPointStore {
    let mut sync_points = MockSyncPointStore::new();
    sync_points.expect_read_sync_point().returning(|_| Ok(None));
    sync_points
        .expect_update_sync_point()
        .returning(|_, _| Ok(()));
    sync_points
}

#[tokio::test]
async fn test_two_page_listing_persists_then_clears_the_cursor() {
    let mut client = MockObjectStoreClient::new();
    client
        .expect_list_objects_v2()
        .withf(|bucket, _, token| bucket == "docs" && token.is_none())
        .times(1)
        .returning(|_, _, _| {
            Ok(ObjectPage {
                contents: vec![object("one.txt", "\"e1\"", 1_000)],
                is_truncated: true,
                next_continuation_token: Some("t1".to_string()),
            })
        });
    client
        .expect_list_objects_v2()
        .withf(|_, _, token| token.as_deref() == Some("t1"))
        .times(1)
        .returning(|_, _, _| {
            Ok(ObjectPage {
                contents: vec![object("two.txt", "\"e2\"", 3_000)],
                is_truncated: false,
                next_continuation_token: None,
            })
        });

    let mut sink = MockRecordSink::new();
    sink.expect_on_new_records().returning(|_| Ok(()));

    let patches: Arc<Mutex<Vec<(SyncPointKey, SyncPointPatch)>>> = Arc::new(Mutex::new(Vec::new()));
    let mut sync_points = MockSyncPointStore::new();
    sync_points.expect_read_sync_point().returning(|_| Ok(None));
    let written = patches.clone();
    sync_points
        .expect_update_sync_point()
        .returning(move |key, patch| {
            written.lock().unwrap().push((key.clone(), patch));
            Ok(())
        });

    let pager = pager(
        client,
        sink,
        sync_points,
        empty_record_store(),
        ObjectFilters::default(),
        100,
    );
    let outcome = pager
        .sync_bucket("docs", false)
        .await
        .expect("sync should succeed");

    assert!(outcome.completed, "bucket must be reported complete");
    assert_eq!(outcome.pages, 2);
    assert_eq!(outcome.listed, 2);
    assert_eq!(outcome.records_flushed, 2);
    assert_eq!(outcome.skipped, 0);

    let patches = patches.lock().unwrap();
    assert_eq!(
        patches.len(),
        2,
        "one token write and one completion write expected"
    );
    assert_eq!(patches[0].0.to_string(), "file:bucket:docs");
    assert_eq!(patches[0].1, SyncPointPatch::token("t1"));
    assert_eq!(
        patches[1].1,
        SyncPointPatch::completed(Some(3_000)),
        "completion must clear the token and record the newest timestamp"
    );
}

#[tokio::test]
async fn test_batches_flush_at_the_configured_size() {
    let mut client = MockObjectStoreClient::new();
    client.expect_list_objects_v2().returning(|_, _, _| {
        Ok(ObjectPage {
            contents: vec![
                object("a.txt", "\"e1\"", 1),
                object("b.txt", "\"e2\"", 2),
                object("c.txt", "\"e3\"", 3),
            ],
            is_truncated: false,
            next_continuation_token: None,
        })
    });

    let flushes: Arc<Mutex<Vec<Flush>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = capturing_sink(flushes.clone());

    let pager = pager(
        client,
        sink,
        quiet_sync_points(),
        empty_record_store(),
        ObjectFilters::default(),
        2,
    );
    let outcome = pager
        .sync_bucket("docs", false)
        .await
        .expect("sync should succeed");

    assert_eq!(outcome.records_flushed, 3);
    let sizes: Vec<usize> = flushes.lock().unwrap().iter().map(Vec::len).collect();
    assert_eq!(
        sizes,
        vec![2, 1],
        "a full batch mid-page and the remainder at the end"
    );
}

#[tokio::test]
async fn test_extension_and_date_filters_skip_objects() {
    let mut client = MockObjectStoreClient::new();
    client.expect_list_objects_v2().returning(|_, _, _| {
        Ok(ObjectPage {
            contents: vec![
                object("keep.pdf", "\"e1\"", 5_000),
                object("drop.txt", "\"e2\"", 5_000),
                object("Makefile", "\"e3\"", 5_000),
                object("stale.pdf", "\"e4\"", 500),
            ],
            is_truncated: false,
            next_continuation_token: None,
        })
    });

    let flushes: Arc<Mutex<Vec<Flush>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = capturing_sink(flushes.clone());

    let filters = ObjectFilters::new(
        HashSet::from(["pdf".to_string()]),
        DateBounds {
            modified_after: Some(1_000),
            ..DateBounds::default()
        },
    );
    let pager = pager(
        client,
        sink,
        quiet_sync_points(),
        empty_record_store(),
        filters,
        100,
    );
    let outcome = pager
        .sync_bucket("docs", false)
        .await
        .expect("sync should succeed");

    assert_eq!(outcome.listed, 4);
    assert_eq!(outcome.records_flushed, 1, "only keep.pdf passes every gate");
    assert_eq!(
        outcome.skipped, 3,
        "wrong extension, no extension and out-of-range must all be skipped"
    );
    let flushes = flushes.lock().unwrap();
    assert_eq!(flushes[0][0].0.external_record_id, "docs/keep.pdf");
}

#[tokio::test]
async fn test_folder_markers_bypass_the_filters() {
    let mut client = MockObjectStoreClient::new();
    client.expect_list_objects_v2().returning(|_, _, _| {
        Ok(ObjectPage {
            contents: vec![ObjectSummary {
                key: "archive/".to_string(),
                etag: None,
                last_modified: None,
                size: 0,
            }],
            is_truncated: false,
            next_continuation_token: None,
        })
    });

    let flushes: Arc<Mutex<Vec<Flush>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = capturing_sink(flushes.clone());

    let filters = ObjectFilters::new(HashSet::from(["pdf".to_string()]), DateBounds::default());
    let pager = pager(
        client,
        sink,
        quiet_sync_points(),
        empty_record_store(),
        filters,
        100,
    );
    let outcome = pager
        .sync_bucket("docs", false)
        .await
        .expect("sync should succeed");

    assert_eq!(outcome.skipped, 0, "markers exist only for the hierarchy");
    assert_eq!(outcome.records_flushed, 1);
    let flushes = flushes.lock().unwrap();
    let (folder, _) = &flushes[0][0];
    assert_eq!(folder.external_record_id, "docs/archive");
    assert!(!folder.is_file);
}

#[tokio::test]
async fn test_nested_object_is_preceded_by_its_folder_chain() {
    let mut client = MockObjectStoreClient::new();
    client.expect_list_objects_v2().returning(|_, _, _| {
        Ok(ObjectPage {
            contents: vec![object("a/b/c.txt", "\"e1\"", 1)],
            is_truncated: false,
            next_continuation_token: None,
        })
    });

    let flushes: Arc<Mutex<Vec<Flush>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = capturing_sink(flushes.clone());

    let pager = pager(
        client,
        sink,
        quiet_sync_points(),
        empty_record_store(),
        ObjectFilters::default(),
        100,
    );
    pager
        .sync_bucket("docs", false)
        .await
        .expect("sync should succeed");

    let flushes = flushes.lock().unwrap();
    let flush = &flushes[0];
    assert_eq!(flush.len(), 3, "two folders and the file itself");
    assert_eq!(flush[0].0.external_record_id, "docs/a");
    assert!(!flush[0].0.is_file);
    assert_eq!(flush[1].0.external_record_id, "docs/a/b");
    assert_eq!(
        flush[1].0.parent_external_record_id.as_deref(),
        Some("docs/a")
    );
    assert_eq!(flush[2].0.external_record_id, "docs/a/b/c.txt");
    assert!(flush[2].0.is_file);
    assert_eq!(
        flush[2].0.parent_external_record_id.as_deref(),
        Some("docs/a/b"),
        "the file must land under the deepest synthesised folder"
    );
}

#[tokio::test]
async fn test_access_denied_stops_the_bucket_without_touching_the_cursor() {
    let mut client = MockObjectStoreClient::new();
    client
        .expect_list_objects_v2()
        .returning(|_, _, _| Err("AccessDenied: not authorised".into()));

    let mut sink = MockRecordSink::new();
    sink.expect_on_new_records().never();

    let mut sync_points = MockSyncPointStore::new();
    sync_points.expect_read_sync_point().returning(|_| Ok(None));
    sync_points.expect_update_sync_point().never();

    let pager = pager(
        client,
        sink,
        sync_points,
        MockRecordStore::new(),
        ObjectFilters::default(),
        100,
    );
    let outcome = pager
        .sync_bucket("docs", false)
        .await
        .expect("a denied bucket is reported, not raised");

    assert!(!outcome.completed);
    assert_eq!(outcome.pages, 0);
    assert_eq!(outcome.listed, 0);
}

#[tokio::test]
async fn test_sink_failure_stops_the_bucket_and_leaves_the_cursor() {
    let mut client = MockObjectStoreClient::new();
    client.expect_list_objects_v2().returning(|_, _, _| {
        Ok(ObjectPage {
            contents: vec![object("a.txt", "\"e1\"", 1)],
            is_truncated: false,
            next_continuation_token: None,
        })
    });

    let mut sink = MockRecordSink::new();
    sink.expect_on_new_records()
        .returning(|_| Err("sink down".into()));

    let mut sync_points = MockSyncPointStore::new();
    sync_points.expect_read_sync_point().returning(|_| Ok(None));
    sync_points.expect_update_sync_point().never();

    let pager = pager(
        client,
        sink,
        sync_points,
        empty_record_store(),
        ObjectFilters::default(),
        100,
    );
    let outcome = pager
        .sync_bucket("docs", false)
        .await
        .expect("a failing sink stops the bucket, not the run");

    assert!(
        !outcome.completed,
        "no completion write may happen after a rejected flush"
    );
    assert_eq!(outcome.records_flushed, 0);
}

#[tokio::test]
async fn test_resumes_from_a_stored_continuation_token() {
    let mut client = MockObjectStoreClient::new();
    client
        .expect_list_objects_v2()
        .withf(|_, _, token| token.as_deref() == Some("t42"))
        .times(1)
        .returning(|_, _, _| Ok(ObjectPage::default()));

    let mut sink = MockRecordSink::new();
    sink.expect_on_new_records().never();

    let mut sync_points = MockSyncPointStore::new();
    sync_points.expect_read_sync_point().returning(|_| {
        Ok(Some(SyncPoint {
            continuation_token: Some("t42".to_string()),
            last_sync_time: None,
        }))
    });
    sync_points
        .expect_update_sync_point()
        .returning(|_, _| Ok(()));

    let pager = pager(
        client,
        sink,
        sync_points,
        MockRecordStore::new(),
        ObjectFilters::default(),
        100,
    );
    let outcome = pager
        .sync_bucket("docs", false)
        .await
        .expect("sync should succeed");
    assert!(outcome.completed, "an empty resumed page still completes");
}

#[tokio::test]
async fn test_incremental_sync_tightens_the_modified_bound() {
    let mut client = MockObjectStoreClient::new();
    client.expect_list_objects_v2().returning(|_, _, _| {
        Ok(ObjectPage {
            contents: vec![
                object("old.txt", "\"e1\"", 999),
                object("exact.txt", "\"e2\"", 1_000),
                object("new.txt", "\"e3\"", 1_500),
            ],
            is_truncated: false,
            next_continuation_token: None,
        })
    });

    let flushes: Arc<Mutex<Vec<Flush>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = capturing_sink(flushes.clone());

    let mut sync_points = MockSyncPointStore::new();
    sync_points.expect_read_sync_point().returning(|_| {
        Ok(Some(SyncPoint {
            continuation_token: None,
            last_sync_time: Some(1_000),
        }))
    });
    sync_points
        .expect_update_sync_point()
        .returning(|_, _| Ok(()));

    let pager = pager(
        client,
        sink,
        sync_points,
        empty_record_store(),
        ObjectFilters::default(),
        100,
    );
    let outcome = pager
        .sync_bucket("docs", true)
        .await
        .expect("sync should succeed");

    assert_eq!(
        outcome.records_flushed, 2,
        "the bound is inclusive, so the object at exactly the cursor passes"
    );
    assert_eq!(outcome.skipped, 1);
    let keys: Vec<String> = flushes.lock().unwrap()[0]
        .iter()
        .map(|(r, _)| r.external_record_id.clone())
        .collect();
    assert_eq!(keys, vec!["docs/exact.txt", "docs/new.txt"]);
}

#[tokio::test]
async fn test_stricter_user_bound_survives_the_incremental_merge() {
    let mut client = MockObjectStoreClient::new();
    client.expect_list_objects_v2().returning(|_, _, _| {
        Ok(ObjectPage {
            contents: vec![
                object("between.txt", "\"e1\"", 1_500),
                object("recent.txt", "\"e2\"", 2_000),
            ],
            is_truncated: false,
            next_continuation_token: None,
        })
    });

    let flushes: Arc<Mutex<Vec<Flush>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = capturing_sink(flushes.clone());

    let mut sync_points = MockSyncPointStore::new();
    sync_points.expect_read_sync_point().returning(|_| {
        Ok(Some(SyncPoint {
            continuation_token: None,
            last_sync_time: Some(1_000),
        }))
    });
    sync_points
        .expect_update_sync_point()
        .returning(|_, _| Ok(()));

    let filters = ObjectFilters::new(
        HashSet::new(),
        DateBounds {
            modified_after: Some(2_000),
            ..DateBounds::default()
        },
    );
    let pager = pager(
        client,
        sink,
        sync_points,
        empty_record_store(),
        filters,
        100,
    );
    let outcome = pager
        .sync_bucket("docs", true)
        .await
        .expect("sync should succeed");

    assert_eq!(
        outcome.records_flushed, 1,
        "the configured bound is stricter than the stored completion time and must win"
    );
    assert_eq!(outcome.skipped, 1);
    assert_eq!(
        flushes.lock().unwrap()[0][0].0.external_record_id,
        "docs/recent.txt"
    );
}

#[tokio::test]
async fn test_full_sync_ignores_the_stored_completion_time() {
    let mut client = MockObjectStoreClient::new();
    client.expect_list_objects_v2().returning(|_, _, _| {
        Ok(ObjectPage {
            contents: vec![object("old.txt", "\"e1\"", 500)],
            is_truncated: false,
            next_continuation_token: None,
        })
    });

    let flushes: Arc<Mutex<Vec<Flush>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = capturing_sink(flushes.clone());

    let mut sync_points = MockSyncPointStore::new();
    sync_points.expect_read_sync_point().returning(|_| {
        Ok(Some(SyncPoint {
            continuation_token: None,
            last_sync_time: Some(1_000),
        }))
    });
    sync_points
        .expect_update_sync_point()
        .returning(|_, _| Ok(()));

    let pager = pager(
        client,
        sink,
        sync_points,
        empty_record_store(),
        ObjectFilters::default(),
        100,
    );
    let outcome = pager
        .sync_bucket("docs", false)
        .await
        .expect("sync should succeed");

    assert_eq!(
        outcome.records_flushed, 1,
        "full syncs revisit everything regardless of the stored completion time"
    );
}

#[tokio::test]
async fn test_truncated_page_without_token_stops_instead_of_spinning() {
    let mut client = MockObjectStoreClient::new();
    client
        .expect_list_objects_v2()
        .times(1)
        .returning(|_, _, _| {
            Ok(ObjectPage {
                contents: vec![object("a.txt", "\"e1\"", 1)],
                is_truncated: true,
                next_continuation_token: None,
            })
        });

    let mut sink = MockRecordSink::new();
    sink.expect_on_new_records().returning(|_| Ok(()));

    let pager = pager(
        client,
        sink,
        quiet_sync_points(),
        empty_record_store(),
        ObjectFilters::default(),
        100,
    );
    let outcome = pager
        .sync_bucket("docs", false)
        .await
        .expect("sync should succeed");

    assert_eq!(outcome.pages, 1, "a malformed truncation marker must not loop");
}

#[tokio::test]
async fn test_reconcile_failure_skips_the_object_only() {
    let mut client = MockObjectStoreClient::new();
    client.expect_list_objects_v2().returning(|_, _, _| {
        Ok(ObjectPage {
            contents: vec![object("bad.txt", "\"e1\"", 1), object("good.txt", "\"e2\"", 2)],
            is_truncated: false,
            next_continuation_token: None,
        })
    });

    let flushes: Arc<Mutex<Vec<Flush>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = capturing_sink(flushes.clone());

    let mut store = MockRecordStore::new();
    store
        .expect_get_record_by_external_id()
        .withf(|_, external_id| external_id == "docs/bad.txt")
        .times(1)
        .returning(|_, _| Err("transaction aborted".into()));
    store
        .expect_get_record_by_external_id()
        .returning(|_, _| Ok(None));
    store
        .expect_get_record_by_external_revision_id()
        .returning(|_, _| Ok(None));

    let pager = pager(
        client,
        sink,
        quiet_sync_points(),
        store,
        ObjectFilters::default(),
        100,
    );
    let outcome = pager
        .sync_bucket("docs", false)
        .await
        .expect("sync should succeed");

    assert!(outcome.completed, "one bad object must not stop the bucket");
    assert_eq!(outcome.records_flushed, 1);
    assert_eq!(outcome.skipped, 1);
    assert_eq!(
        flushes.lock().unwrap()[0][0].0.external_record_id,
        "docs/good.txt"
    );
}
