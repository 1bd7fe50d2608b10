use std::sync::Arc;

use bucket_sync_core::config::ConnectorScope;
use bucket_sync_core::contract::{MockRecordStore, S3ConsoleUrls, StoredRecord};
use bucket_sync_core::hierarchy::{
    ancestor_paths, parent_external_id, FolderHierarchySynthesizer,
};
use bucket_sync_core::permissions::PermissionResolver;
use bucket_sync_core::records::{EntityType, PermissionType, RecordType, FOLDER_MIME_TYPE};

fn synthesizer(store: MockRecordStore) -> FolderHierarchySynthesizer {
    let store = Arc::new(store);
    let permissions = PermissionResolver::new(
        ConnectorScope::Team,
        "org-1".to_string(),
        None,
        store.clone(),
    );
    FolderHierarchySynthesizer::new(
        "conn-1".to_string(),
        store,
        permissions,
        Arc::new(S3ConsoleUrls),
    )
}

#[test]
fn test_ancestor_paths() {
    struct TestCase {
        name: &'static str,
        key: &'static str,
        expected: Vec<&'static str>,
    }
    let cases = vec![
        TestCase {
            name: "nested file",
            key: "a/b/c/file.txt",
            expected: vec!["a", "a/b", "a/b/c"],
        },
        TestCase {
            name: "root-level file has no ancestors",
            key: "file.txt",
            expected: vec![],
        },
        TestCase {
            name: "folder marker contributes its own path",
            key: "a/b/",
            expected: vec!["a", "a/b"],
        },
        TestCase {
            name: "doubled slash skips the empty segment",
            key: "a//b/c.txt",
            expected: vec!["a", "a/b"],
        },
        TestCase {
            name: "leading slash normalised away",
            key: "/a/file.txt",
            expected: vec!["a"],
        },
    ];
    for case in cases {
        assert_eq!(
            ancestor_paths(case.key),
            case.expected,
            "case '{}' produced the wrong ancestors",
            case.name
        );
    }
}

#[test]
fn test_parent_external_id_points_at_deepest_folder() {
    assert_eq!(
        parent_external_id("docs", "a/b/file.txt").as_deref(),
        Some("docs/a/b")
    );
    assert_eq!(
        parent_external_id("docs", "file.txt"),
        None,
        "root objects hang off the record group, not a folder"
    );
}

#[tokio::test]
async fn test_synthesis_builds_folder_chain_for_new_paths() {
    let mut store = MockRecordStore::new();
    store
        .expect_get_record_by_external_id()
        .returning(|_, _| Ok(None));
    let synth = synthesizer(store);

    let folders = synth
        .synthesise_for_key("docs", "a/b/c.txt")
        .await
        .expect("synthesis should succeed");

    assert_eq!(folders.len(), 2, "two directory levels expected");

    let (a, perms_a) = &folders[0];
    assert_eq!(a.external_record_id, "docs/a");
    assert_eq!(a.record_type, RecordType::Folder);
    assert!(!a.is_file, "folders must not claim to be files");
    assert_eq!(a.version, 0, "new folders start at version 0");
    assert_eq!(
        a.parent_external_record_id, None,
        "top-level folder has no parent"
    );
    assert_eq!(a.name, "a");
    assert_eq!(a.size_in_bytes, 0);
    assert_eq!(a.mime_type.as_deref(), Some(FOLDER_MIME_TYPE));
    assert_eq!(a.etag, None, "folders carry no revision");
    assert_eq!(a.external_revision_id, None);
    assert!(a.hide_weburl, "synthesised folders hide their web URL");
    assert_eq!(perms_a.len(), 1);
    assert_eq!(perms_a[0].permission_type, PermissionType::Read);
    assert_eq!(perms_a[0].entity_type, EntityType::Org);
    assert_eq!(perms_a[0].external_id, "org-1");

    let (ab, _) = &folders[1];
    assert_eq!(ab.external_record_id, "docs/a/b");
    assert_eq!(
        ab.parent_external_record_id.as_deref(),
        Some("docs/a"),
        "nested folder must point at the level above"
    );
    assert_eq!(ab.name, "b");
    assert_eq!(ab.path, "a/b");
}

#[tokio::test]
async fn test_synthesis_preserves_known_folder_identity() {
    let mut store = MockRecordStore::new();
    store
        .expect_get_record_by_external_id()
        .withf(|_, external_id| external_id == "docs/a")
        .returning(|_, _| {
            Ok(Some(StoredRecord {
                id: "folder-id-1".to_string(),
                external_record_id: "docs/a".to_string(),
                external_revision_id: None,
                version: 3,
                source_created_at: Some(1_000),
            }))
        });
    let synth = synthesizer(store);

    let folders = synth
        .synthesise_for_key("docs", "a/file.txt")
        .await
        .expect("synthesis should succeed");

    assert_eq!(folders.len(), 1);
    let (a, _) = &folders[0];
    assert_eq!(a.id, "folder-id-1", "known folder must keep its id");
    assert_eq!(a.version, 3, "folder re-upserts never bump the version");
    assert_eq!(a.source_created_at, Some(1_000));
}

#[tokio::test]
async fn test_folder_marker_key_synthesises_itself() {
    let mut store = MockRecordStore::new();
    store
        .expect_get_record_by_external_id()
        .returning(|_, _| Ok(None));
    let synth = synthesizer(store);

    let folders = synth
        .synthesise_for_key("docs", "a/b/")
        .await
        .expect("synthesis should succeed");

    assert_eq!(folders.len(), 2);
    assert_eq!(
        folders[1].0.external_record_id, "docs/a/b",
        "the marker's own path must be the last synthesised folder"
    );
}

#[tokio::test]
async fn test_synthesis_surfaces_store_errors() {
    let mut store = MockRecordStore::new();
    store
        .expect_get_record_by_external_id()
        .returning(|_, _| Err("store offline".into()));
    let synth = synthesizer(store);

    let result = synth.synthesise_for_key("docs", "a/file.txt").await;
    assert!(result.is_err(), "store failures must propagate to the caller");
}
