//! Object-identity reconciliation: is a listed object new, updated, moved,
//! or already known?
//!
//! Object stores give no stable object id and no rename event, so identity is
//! reconstructed from two keys, always in this order:
//!   1. path identity (`"{bucket}/{normalized_key}"`) — the primary lookup;
//!   2. revision identity (`"{bucket}/{etag}"`, key-derived fallback when the
//!      store reports no ETag) — consulted only when the path lookup misses,
//!      which is what turns "deleted here, created there" into a move.
//!
//! The order is never inverted: content hashes collide across genuinely
//! distinct objects (identical bytes uploaded twice), paths do not.
//!
//! Versions start at 0 and increase by exactly 1 on every reconciled change
//! (revision change or move). An unchanged object is still rebuilt and
//! re-emitted with its version kept, so downstream hierarchy edges and
//! permissions converge on every sync.

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::contract::{
    HeadObjectInfo, ObjectSummary, RecordStore, StoreError, StoredRecord, WebUrlBuilder,
};
use crate::hierarchy;
use crate::permissions::PermissionResolver;
use crate::records::{self, FileRecord, Permission, RecordType};

/// How one listed object relates to what the record graph already knew.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileDecision {
    /// Unknown path and unknown revision: fresh identity, version 0.
    Created,
    /// Known path, different revision.
    Updated,
    /// Known revision at a new path: same record re-parented, old hierarchy
    /// edge severed.
    Moved,
    /// Known path, unchanged revision. Re-emitted without a version bump.
    Refreshed,
}

#[derive(Debug, Clone)]
pub struct ReconciledObject {
    pub record: FileRecord,
    pub permissions: Vec<Permission>,
    pub decision: ReconcileDecision,
}

/// Outcome of re-checking a previously-seen record against fresh head-object
/// metadata (the reindex path).
#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    /// Revision unchanged; route the record to the reindex sink as-is.
    Unchanged,
    /// Revision changed; the rebuilt record, version + 1.
    Updated {
        record: FileRecord,
        permissions: Vec<Permission>,
    },
}

pub struct RecordReconciler {
    connector_id: String,
    store: Arc<dyn RecordStore>,
    permissions: PermissionResolver,
    urls: Arc<dyn WebUrlBuilder>,
    index_file_content: bool,
}

impl RecordReconciler {
    pub fn new(
        connector_id: String,
        store: Arc<dyn RecordStore>,
        permissions: PermissionResolver,
        urls: Arc<dyn WebUrlBuilder>,
        index_file_content: bool,
    ) -> Self {
        RecordReconciler {
            connector_id,
            store,
            permissions,
            urls,
            index_file_content,
        }
    }

    /// Reconciles one listed object into a record ready for the sink.
    /// Errors are store-transaction failures; the pager logs them and skips
    /// the object.
    pub async fn reconcile_object(
        &self,
        bucket: &str,
        object: &ObjectSummary,
    ) -> Result<ReconciledObject, StoreError> {
        let external_record_id = records::external_record_id(bucket, &object.key);
        let revision = records::composite_revision(bucket, &object.key, object.etag.as_deref());

        let by_path = self
            .store
            .get_record_by_external_id(&self.connector_id, &external_record_id)
            .await?;

        let (decision, prior) = match by_path {
            Some(prior) => {
                if revision_unchanged(&prior, &revision) {
                    (ReconcileDecision::Refreshed, Some(prior))
                } else {
                    (ReconcileDecision::Updated, Some(prior))
                }
            }
            None => {
                match self
                    .store
                    .get_record_by_external_revision_id(&self.connector_id, &revision)
                    .await?
                {
                    Some(prior) if prior.external_record_id != external_record_id => {
                        let severed = self
                            .store
                            .delete_parent_child_edge_to_record(&prior.id)
                            .await?;
                        debug!(
                            record = %prior.id,
                            from = %prior.external_record_id,
                            to = %external_record_id,
                            severed,
                            "Move detected, severed old parent edge"
                        );
                        (ReconcileDecision::Moved, Some(prior))
                    }
                    // A revision hit on our own path while the path lookup
                    // missed means the store indexes disagree; converge on
                    // the stored identity without inventing a change.
                    Some(prior) => (ReconcileDecision::Refreshed, Some(prior)),
                    None => (ReconcileDecision::Created, None),
                }
            }
        };

        let (id, version, created_at) = match (decision, prior.as_ref()) {
            (ReconcileDecision::Created, _) | (_, None) => (Uuid::new_v4().to_string(), 0, None),
            (ReconcileDecision::Refreshed, Some(prior)) => {
                (prior.id.clone(), prior.version, prior.source_created_at)
            }
            (_, Some(prior)) => (prior.id.clone(), prior.version + 1, prior.source_created_at),
        };

        let record = self.build_file_record(
            bucket,
            &object.key,
            object.etag.as_deref(),
            object.last_modified,
            object.size,
            id,
            version,
            created_at,
        );
        match serde_json::to_string(&record) {
            Ok(json) => debug!(decision = ?decision, json = %json, "Reconciled object"),
            Err(e) => warn!(error = ?e, record = %record.external_record_id, "Failed to serialise reconciled record"),
        }

        let permissions = self.permissions.resolve().await;
        Ok(ReconciledObject {
            record,
            permissions,
            decision,
        })
    }

    /// Reindex support: decide whether a previously-emitted record is stale
    /// given a fresh head-object response for the same key.
    pub async fn refresh_from_head(
        &self,
        record: &FileRecord,
        head: &HeadObjectInfo,
    ) -> RefreshOutcome {
        let bucket = &record.external_record_group_id;
        let revision = records::composite_revision(bucket, &record.path, head.etag.as_deref());
        if record.external_revision_id.as_deref() == Some(revision.as_str()) {
            return RefreshOutcome::Unchanged;
        }
        let rebuilt = self.build_file_record(
            bucket,
            &record.path,
            head.etag.as_deref(),
            head.last_modified,
            head.content_length,
            record.id.clone(),
            record.version + 1,
            record.source_created_at,
        );
        let permissions = self.permissions.resolve().await;
        RefreshOutcome::Updated {
            record: rebuilt,
            permissions,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_file_record(
        &self,
        bucket: &str,
        key: &str,
        etag: Option<&str>,
        last_modified: Option<i64>,
        size: i64,
        id: String,
        version: i64,
        source_created_at: Option<i64>,
    ) -> FileRecord {
        let external_record_id = records::external_record_id(bucket, key);
        let revision = records::composite_revision(bucket, key, etag);
        let parent_external_record_id = hierarchy::parent_external_id(bucket, key);
        let extension = records::extension_of(key);
        let mime_type = extension
            .as_deref()
            .and_then(records::mime_type_for_extension)
            .map(str::to_string);
        FileRecord {
            id,
            external_record_id,
            external_record_group_id: bucket.to_string(),
            external_revision_id: Some(revision),
            parent_record_type: parent_external_record_id
                .as_ref()
                .map(|_| RecordType::Folder),
            parent_external_record_id,
            record_type: RecordType::File,
            name: records::file_name(key).to_string(),
            is_file: true,
            size_in_bytes: size,
            extension,
            mime_type,
            path: key.to_string(),
            etag: etag.map(|e| records::strip_etag_quotes(e).to_string()),
            version,
            // Stores report no creation time; first sight pins it to the
            // listed modification time and updates preserve it.
            source_created_at: source_created_at.or(last_modified),
            source_updated_at: last_modified,
            weburl: Some(
                self.urls
                    .build_object_url(bucket, records::normalize_key(key)),
            ),
            hide_weburl: false,
            indexing_disabled: !self.index_file_content,
        }
    }
}

fn revision_unchanged(prior: &StoredRecord, revision: &str) -> bool {
    matches!(
        prior.external_revision_id.as_deref(),
        Some(prev) if !prev.is_empty() && prev == revision
    )
}
