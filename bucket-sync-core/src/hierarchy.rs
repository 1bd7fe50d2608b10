//! Folder-hierarchy synthesis. Object stores list flat keys with no folder
//! objects, so every directory level a key implies is materialised here as a
//! folder record. Synthesis runs on every sync, not just on first sight,
//! because hierarchy edges may have been deleted independently of the
//! records; upserting the same folder twice is harmless since its identity is
//! derived purely from bucket and path.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::contract::{RecordStore, StoreError, WebUrlBuilder};
use crate::permissions::PermissionResolver;
use crate::records::{self, FileRecord, Permission, RecordType, FOLDER_MIME_TYPE};

/// Ordered directory prefixes of a key, root to leaf:
/// `a/b/c/file.txt` → `["a", "a/b", "a/b/c"]`. A trailing-slash key is a
/// folder marker and contributes its own path as the last element
/// (`a/b/` → `["a", "a/b"]`). Empty segments from doubled slashes are
/// skipped. Root-level keys have no ancestors.
pub fn ancestor_paths(key: &str) -> Vec<String> {
    let key = records::normalize_key(key);
    let dir = if key.ends_with('/') {
        key.trim_end_matches('/')
    } else {
        match key.rsplit_once('/') {
            Some((dir, _)) => dir,
            None => return Vec::new(),
        }
    };
    let mut paths = Vec::new();
    let mut current = String::new();
    for segment in dir.split('/').filter(|s| !s.is_empty()) {
        if !current.is_empty() {
            current.push('/');
        }
        current.push_str(segment);
        paths.push(current.clone());
    }
    paths
}

/// Parent identity of a key: the deepest folder above it, `None` at bucket
/// root. Never the bucket itself; the bucket is a record group, not a record.
pub fn parent_external_id(bucket: &str, key: &str) -> Option<String> {
    ancestor_paths(key)
        .last()
        .map(|path| records::external_record_id(bucket, path))
}

pub struct FolderHierarchySynthesizer {
    connector_id: String,
    store: Arc<dyn RecordStore>,
    permissions: PermissionResolver,
    urls: Arc<dyn WebUrlBuilder>,
}

impl FolderHierarchySynthesizer {
    pub fn new(
        connector_id: String,
        store: Arc<dyn RecordStore>,
        permissions: PermissionResolver,
        urls: Arc<dyn WebUrlBuilder>,
    ) -> Self {
        FolderHierarchySynthesizer {
            connector_id,
            store,
            permissions,
            urls,
        }
    }

    /// Folder records (with permissions) for every directory level of `key`,
    /// root to leaf, ready to join the current batch. An existing folder
    /// keeps its id and version; folders carry no revision, so nothing here
    /// ever bumps one. Folders are never move-detected.
    pub async fn synthesise_for_key(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Vec<(FileRecord, Vec<Permission>)>, StoreError> {
        let paths = ancestor_paths(key);
        let mut out = Vec::with_capacity(paths.len());
        for (depth, path) in paths.iter().enumerate() {
            let external_record_id = records::external_record_id(bucket, path);
            let existing = self
                .store
                .get_record_by_external_id(&self.connector_id, &external_record_id)
                .await?;
            let (id, version, source_created_at) = match &existing {
                Some(rec) => (rec.id.clone(), rec.version, rec.source_created_at),
                None => (Uuid::new_v4().to_string(), 0, None),
            };
            debug!(
                folder = %external_record_id,
                known = existing.is_some(),
                "Synthesised folder record"
            );
            let parent_external_record_id = depth
                .checked_sub(1)
                .map(|i| records::external_record_id(bucket, &paths[i]));
            let parent_record_type = parent_external_record_id
                .as_ref()
                .map(|_| RecordType::Folder);
            let record = FileRecord {
                id,
                external_record_id: external_record_id.clone(),
                external_record_group_id: bucket.to_string(),
                external_revision_id: None,
                parent_external_record_id,
                parent_record_type,
                record_type: RecordType::Folder,
                name: records::file_name(path).to_string(),
                is_file: false,
                size_in_bytes: 0,
                extension: None,
                mime_type: Some(FOLDER_MIME_TYPE.to_string()),
                path: path.clone(),
                etag: None,
                version,
                source_created_at,
                source_updated_at: None,
                weburl: Some(self.urls.build_parent_url(&external_record_id)),
                hide_weburl: true,
                indexing_disabled: false,
            };
            let permissions = self.permissions.resolve().await;
            out.push((record, permissions));
        }
        Ok(out)
    }
}
