//! Local development host: an object-store client over a directory tree, a
//! JSON-file record store and JSON-file sync points, so the whole pipeline
//! runs without cloud credentials. The layout mirrors the remote shape:
//! first-level directories under the root are buckets, nested files are
//! objects, and content hashes stand in for ETags.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use bucket_sync_core::contract::{
    BucketSummary, HeadObjectInfo, ObjectPage, ObjectStoreClient, ObjectSummary, RecordSink,
    RecordStore, StoreError, StoredRecord, SyncPointStore, UserInfo,
};
use bucket_sync_core::records::{AppUser, FileRecord, Permission, RecordGroup};
use bucket_sync_core::syncpoint::{SyncPoint, SyncPointKey, SyncPointPatch};

use crate::load_config::OutputSection;

/// `ObjectStoreClient` over a directory tree.
pub struct LocalBucketClient {
    root: PathBuf,
}

impl LocalBucketClient {
    pub fn new(root: PathBuf) -> Self {
        LocalBucketClient { root }
    }

    fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }

    /// Every key in the bucket in lexicographic order. Files become objects;
    /// a directory with no entries underneath becomes a folder marker, the
    /// way consoles materialise empty "folders".
    fn list_keys(&self, bucket: &str) -> Result<Vec<ObjectSummary>, StoreError> {
        let dir = self.bucket_dir(bucket);
        if !dir.is_dir() {
            return Err(format!("bucket {bucket} not found under {:?}", self.root).into());
        }
        let mut keys = Vec::new();
        collect_keys(&dir, "", &mut keys)?;
        keys.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(keys)
    }
}

fn collect_keys(dir: &Path, prefix: &str, out: &mut Vec<ObjectSummary>) -> Result<(), StoreError> {
    let mut entries = fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.file_name());
    if entries.is_empty() && !prefix.is_empty() {
        out.push(ObjectSummary {
            key: prefix.to_string(),
            etag: None,
            last_modified: None,
            size: 0,
        });
        return Ok(());
    }
    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();
        if path.is_dir() {
            collect_keys(&path, &format!("{prefix}{name}/"), out)?;
        } else {
            let metadata = entry.metadata()?;
            let bytes = fs::read(&path)?;
            out.push(ObjectSummary {
                key: format!("{prefix}{name}"),
                etag: Some(format!("\"{:x}\"", md5::compute(&bytes))),
                last_modified: modified_epoch_ms(&metadata),
                size: metadata.len() as i64,
            });
        }
    }
    Ok(())
}

fn modified_epoch_ms(metadata: &fs::Metadata) -> Option<i64> {
    let modified = metadata.modified().ok()?;
    Some(DateTime::<Utc>::from(modified).timestamp_millis())
}

#[async_trait]
impl ObjectStoreClient for LocalBucketClient {
    async fn list_buckets(&self) -> Result<Vec<BucketSummary>, StoreError> {
        let mut buckets = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.path().is_dir() {
                buckets.push(BucketSummary {
                    name: entry.file_name().to_string_lossy().into_owned(),
                });
            }
        }
        buckets.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(count = buckets.len(), "Listed local buckets");
        Ok(buckets)
    }

    async fn list_objects_v2(
        &self,
        bucket: &str,
        max_keys: usize,
        continuation_token: Option<String>,
    ) -> Result<ObjectPage, StoreError> {
        let keys = self.list_keys(bucket)?;
        let offset = match continuation_token.as_deref() {
            Some(token) => match token.parse::<usize>() {
                Ok(n) => n,
                Err(_) => {
                    return Err(format!("malformed continuation token {token:?}").into());
                }
            },
            None => 0,
        };
        let start = offset.min(keys.len());
        let end = (start + max_keys).min(keys.len());
        let contents = keys[start..end].to_vec();
        let is_truncated = end < keys.len();
        let next_continuation_token = is_truncated.then(|| end.to_string());
        debug!(
            bucket = %bucket,
            offset,
            returned = contents.len(),
            is_truncated,
            "Listed local objects page"
        );
        Ok(ObjectPage {
            contents,
            is_truncated,
            next_continuation_token,
        })
    }

    async fn get_bucket_location(&self, bucket: &str) -> Result<Option<String>, StoreError> {
        if !self.bucket_dir(bucket).is_dir() {
            return Err(format!("bucket {bucket} not found").into());
        }
        // Local trees have no region; the engine treats this as us-east-1.
        Ok(None)
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<HeadObjectInfo, StoreError> {
        let path = self.bucket_dir(bucket).join(key);
        let metadata = match fs::metadata(&path) {
            Ok(m) if m.is_file() => m,
            _ => return Err(format!("object {bucket}/{key} not found").into()),
        };
        let bytes = fs::read(&path)?;
        Ok(HeadObjectInfo {
            etag: Some(format!("\"{:x}\"", md5::compute(&bytes))),
            last_modified: modified_epoch_ms(&metadata),
            content_length: metadata.len() as i64,
        })
    }

    async fn generate_presigned_url(
        &self,
        method: &str,
        bucket: &str,
        key: &str,
        expires_in_secs: u64,
        _region: &str,
    ) -> Result<String, StoreError> {
        if !method.eq_ignore_ascii_case("get") {
            return Err(format!("unsupported presign method {method}").into());
        }
        let path = self.bucket_dir(bucket).join(key);
        if !path.is_file() {
            return Err(format!("object {bucket}/{key} not found").into());
        }
        Ok(format!(
            "file://{}?expires_in={}",
            path.display(),
            expires_in_secs
        ))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    /// Records keyed by external record id.
    records: HashMap<String, FileRecord>,
    /// Revision id to external record id.
    revision_index: HashMap<String, String>,
    /// Internal record id to external record id, for move bookkeeping.
    id_index: HashMap<String, String>,
    /// Parent edges, record id to parent external id.
    edges: HashMap<String, String>,
    groups: Vec<RecordGroup>,
    app_users: Vec<AppUser>,
    /// User directory, user id to email.
    users: HashMap<String, String>,
}

#[derive(Serialize)]
struct ExportLine<'a> {
    action: &'static str,
    record: &'a FileRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    permissions: Option<&'a Vec<Permission>>,
}

/// JSON-file-backed record store. Serves both `RecordStore` and `RecordSink`
/// so the engine's lookups observe its own writes, which is what makes
/// refreshes, updates and move detection work across CLI invocations.
pub struct LocalRecordStore {
    state: Mutex<StoreState>,
    state_file: PathBuf,
    export_file: Option<PathBuf>,
}

impl LocalRecordStore {
    pub fn open(output: &OutputSection, users: HashMap<String, String>) -> Result<Self> {
        let mut state = if output.state_file.is_file() {
            let content = fs::read_to_string(&output.state_file)
                .with_context(|| format!("Failed to read state file {:?}", output.state_file))?;
            serde_json::from_str(&content)
                .with_context(|| format!("State file {:?} is not valid JSON", output.state_file))?
        } else {
            StoreState::default()
        };
        state.users.extend(users);
        info!(
            records = state.records.len(),
            state_file = ?output.state_file,
            "Opened local record store"
        );
        Ok(LocalRecordStore {
            state: Mutex::new(state),
            state_file: output.state_file.clone(),
            export_file: output.export_file.clone(),
        })
    }

    /// Every stored file record in external-id order, for reindex passes.
    pub fn all_file_records(&self) -> Vec<FileRecord> {
        let state = self.state();
        let mut records: Vec<FileRecord> = state
            .records
            .values()
            .filter(|r| r.is_file)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.external_record_id.cmp(&b.external_record_id));
        records
    }

    pub fn record_by_external_id(&self, external_id: &str) -> Option<FileRecord> {
        self.state().records.get(external_id).cloned()
    }

    pub fn record_count(&self) -> usize {
        self.state().records.len()
    }

    pub fn parent_edge(&self, record_id: &str) -> Option<String> {
        self.state().edges.get(record_id).cloned()
    }

    pub fn groups(&self) -> Vec<RecordGroup> {
        self.state().groups.clone()
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, state: &StoreState) -> Result<(), StoreError> {
        if let Some(parent) = self.state_file.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(state)?;
        fs::write(&self.state_file, json)?;
        Ok(())
    }

    fn export(
        &self,
        action: &'static str,
        record: &FileRecord,
        permissions: Option<&Vec<Permission>>,
    ) -> Result<(), StoreError> {
        let Some(path) = &self.export_file else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let line = serde_json::to_string(&ExportLine {
            action,
            record,
            permissions,
        })?;
        let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

fn stored_slice(record: &FileRecord) -> StoredRecord {
    StoredRecord {
        id: record.id.clone(),
        external_record_id: record.external_record_id.clone(),
        external_revision_id: record.external_revision_id.clone(),
        version: record.version,
        source_created_at: record.source_created_at,
    }
}

fn upsert_record(state: &mut StoreState, record: &FileRecord) {
    // A moved record is still stored under its old path; drop that entry and
    // its revision index before the new path takes over.
    if let Some(previous_external) = state.id_index.get(&record.id).cloned() {
        if previous_external != record.external_record_id {
            if let Some(previous) = state.records.remove(&previous_external) {
                if let Some(revision) = previous.external_revision_id {
                    state.revision_index.remove(&revision);
                }
            }
        }
    }
    let stale_revision = state
        .records
        .get(&record.external_record_id)
        .and_then(|previous| {
            (previous.external_revision_id != record.external_revision_id)
                .then(|| previous.external_revision_id.clone())
                .flatten()
        });
    if let Some(revision) = stale_revision {
        state.revision_index.remove(&revision);
    }
    state
        .id_index
        .insert(record.id.clone(), record.external_record_id.clone());
    if let Some(revision) = record.external_revision_id.clone() {
        state
            .revision_index
            .insert(revision, record.external_record_id.clone());
    }
    match record.parent_external_record_id.clone() {
        Some(parent) => {
            state.edges.insert(record.id.clone(), parent);
        }
        None => {
            state.edges.remove(&record.id);
        }
    }
    state
        .records
        .insert(record.external_record_id.clone(), record.clone());
}

#[async_trait]
impl RecordStore for LocalRecordStore {
    async fn get_record_by_external_id(
        &self,
        _connector_id: &str,
        external_id: &str,
    ) -> Result<Option<StoredRecord>, StoreError> {
        let state = self.state();
        Ok(state.records.get(external_id).map(stored_slice))
    }

    async fn get_record_by_external_revision_id(
        &self,
        _connector_id: &str,
        revision_id: &str,
    ) -> Result<Option<StoredRecord>, StoreError> {
        let state = self.state();
        let external_id = match state.revision_index.get(revision_id) {
            Some(id) => id,
            None => return Ok(None),
        };
        Ok(state.records.get(external_id).map(stored_slice))
    }

    async fn delete_parent_child_edge_to_record(
        &self,
        record_id: &str,
    ) -> Result<u64, StoreError> {
        let mut state = self.state();
        let removed = state.edges.remove(record_id).map_or(0, |_| 1);
        if removed > 0 {
            self.persist(&state)?;
        }
        Ok(removed)
    }

    async fn get_user_by_id(&self, user_id: &str) -> Result<Option<UserInfo>, StoreError> {
        let state = self.state();
        Ok(state.users.get(user_id).map(|email| UserInfo {
            email: email.clone(),
        }))
    }
}

#[async_trait]
impl RecordSink for LocalRecordStore {
    async fn on_new_record_groups(
        &self,
        groups: Vec<(RecordGroup, Vec<Permission>)>,
    ) -> Result<(), StoreError> {
        let mut state = self.state();
        for (group, _permissions) in groups {
            state
                .groups
                .retain(|g| g.external_group_id != group.external_group_id);
            state.groups.push(group);
        }
        self.persist(&state)?;
        Ok(())
    }

    async fn on_new_records(
        &self,
        records: Vec<(FileRecord, Vec<Permission>)>,
    ) -> Result<(), StoreError> {
        let mut state = self.state();
        for (record, permissions) in &records {
            upsert_record(&mut state, record);
            self.export("upsert", record, Some(permissions))?;
        }
        self.persist(&state)?;
        debug!(count = records.len(), "Stored record batch");
        Ok(())
    }

    async fn reindex_existing_records(&self, records: Vec<FileRecord>) -> Result<(), StoreError> {
        for record in &records {
            self.export("reindex", record, None)?;
        }
        debug!(count = records.len(), "Recorded reindex batch");
        Ok(())
    }

    async fn on_new_app_users(&self, users: Vec<AppUser>) -> Result<(), StoreError> {
        let mut state = self.state();
        for user in users {
            state
                .app_users
                .retain(|u| u.external_user_id != user.external_user_id);
            state.app_users.push(user);
        }
        self.persist(&state)?;
        Ok(())
    }
}

/// JSON-file-backed sync points, merged with [`SyncPoint::apply`].
pub struct LocalSyncPointStore {
    state: Mutex<HashMap<String, SyncPoint>>,
    file: PathBuf,
}

impl LocalSyncPointStore {
    pub fn open(file: PathBuf) -> Result<Self> {
        let state = if file.is_file() {
            let content = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read sync point file {file:?}"))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Sync point file {file:?} is not valid JSON"))?
        } else {
            HashMap::new()
        };
        Ok(LocalSyncPointStore {
            state: Mutex::new(state),
            file,
        })
    }

    pub fn get(&self, key: &SyncPointKey) -> Option<SyncPoint> {
        self.state().get(&key.to_string()).cloned()
    }

    fn state(&self) -> MutexGuard<'_, HashMap<String, SyncPoint>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SyncPointStore for LocalSyncPointStore {
    async fn read_sync_point(&self, key: &SyncPointKey) -> Result<Option<SyncPoint>, StoreError> {
        Ok(self.state().get(&key.to_string()).cloned())
    }

    async fn update_sync_point(
        &self,
        key: &SyncPointKey,
        patch: SyncPointPatch,
    ) -> Result<(), StoreError> {
        let mut state = self.state();
        let point = state.entry(key.to_string()).or_default();
        point.apply(&patch);
        if let Some(parent) = self.file.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(&*state)?;
        fs::write(&self.file, json)?;
        Ok(())
    }
}
