//! Paginated bucket listing: the per-bucket sync loop.
//!
//! One page of keys at a time, each object filtered, given its folder
//! ancestry, reconciled, and batched towards the sink. The continuation
//! token is persisted after every page so a crash resumes near where it
//! stopped, and cleared at completion so the next run knows the bucket
//! finished. Bucket-level trouble (listing denied, sink rejecting a batch)
//! stops this bucket only; object-level trouble skips that object only.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::DateBounds;
use crate::contract::{
    is_access_denied, ObjectStoreClient, RecordSink, StoreError, SyncPointStore,
};
use crate::errors::SyncError;
use crate::hierarchy::FolderHierarchySynthesizer;
use crate::ratelimit::RateLimiter;
use crate::reconcile::RecordReconciler;
use crate::records::{extension_of, FileRecord, Permission};
use crate::syncpoint::{SyncPointKey, SyncPointPatch};

/// Gates applied to listed objects before reconciliation.
#[derive(Debug, Clone, Default)]
pub struct ObjectFilters {
    extensions: HashSet<String>,
    bounds: DateBounds,
}

impl ObjectFilters {
    pub fn new(extensions: HashSet<String>, bounds: DateBounds) -> Self {
        ObjectFilters { extensions, bounds }
    }

    /// Incremental runs fold the previous completion time into the
    /// modified-after bound; the stricter of the two wins.
    pub fn with_last_sync_time(mut self, last_sync_time: Option<i64>) -> Self {
        self.bounds.modified_after = match (self.bounds.modified_after, last_sync_time) {
            (Some(user), Some(last)) => Some(user.max(last)),
            (user, last) => user.or(last),
        };
        self
    }

    pub fn modified_after(&self) -> Option<i64> {
        self.bounds.modified_after
    }

    /// Keys without an extension never pass; an empty allow-list admits
    /// every extension.
    pub fn passes_extension(&self, key: &str) -> bool {
        match extension_of(key) {
            Some(ext) => self.extensions.is_empty() || self.extensions.contains(&ext),
            None => false,
        }
    }

    /// Date gate with conservative inclusion: objects the store reports no
    /// timestamp for always pass, and the bounds themselves are inclusive.
    /// Re-admitting a boundary object is harmless; missing one is not.
    pub fn passes_dates(&self, last_modified: Option<i64>) -> bool {
        let Some(ts) = last_modified else { return true };
        let DateBounds {
            modified_after,
            modified_before,
            created_after,
            created_before,
        } = self.bounds;
        // Listings expose one timestamp, so created bounds check it too.
        for after in [modified_after, created_after].into_iter().flatten() {
            if ts < after {
                return false;
            }
        }
        for before in [modified_before, created_before].into_iter().flatten() {
            if ts > before {
                return false;
            }
        }
        true
    }
}

/// What one bucket's pagination achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketOutcome {
    pub pages: usize,
    pub listed: usize,
    pub records_flushed: usize,
    pub skipped: usize,
    /// False when the bucket stopped early; its stored continuation token is
    /// then left in place for the next run to resume from.
    pub completed: bool,
}

pub struct ObjectListingPager {
    client: Arc<dyn ObjectStoreClient>,
    sink: Arc<dyn RecordSink>,
    sync_points: Arc<dyn SyncPointStore>,
    reconciler: RecordReconciler,
    hierarchy: FolderHierarchySynthesizer,
    limiter: Arc<RateLimiter>,
    filters: ObjectFilters,
    batch_size: usize,
}

impl ObjectListingPager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn ObjectStoreClient>,
        sink: Arc<dyn RecordSink>,
        sync_points: Arc<dyn SyncPointStore>,
        reconciler: RecordReconciler,
        hierarchy: FolderHierarchySynthesizer,
        limiter: Arc<RateLimiter>,
        filters: ObjectFilters,
        batch_size: usize,
    ) -> Self {
        ObjectListingPager {
            client,
            sink,
            sync_points,
            reconciler,
            hierarchy,
            limiter,
            filters,
            batch_size,
        }
    }

    /// Pages through one bucket. `Err` is reserved for sync-point access
    /// failures; everything else is handled here and reported in the
    /// outcome.
    pub async fn sync_bucket(
        &self,
        bucket: &str,
        incremental: bool,
    ) -> Result<BucketOutcome, SyncError> {
        let key = SyncPointKey::files_in_bucket(bucket);
        let stored = self
            .sync_points
            .read_sync_point(&key)
            .await
            .map_err(|e| SyncError::SyncPoint {
                key: key.to_string(),
                source: e,
            })?
            .unwrap_or_default();

        let filters = if incremental {
            let merged = self
                .filters
                .clone()
                .with_last_sync_time(stored.last_sync_time);
            if let Some(after) = merged.modified_after() {
                info!(bucket = %bucket, modified_after = after, "Incremental sync, skipping objects modified before the bound");
            }
            merged
        } else {
            self.filters.clone()
        };

        let mut token = stored.continuation_token;
        if token.is_some() {
            info!(bucket = %bucket, "Resuming pagination from stored continuation token");
        }

        let mut outcome = BucketOutcome::default();
        let mut batch: Vec<(FileRecord, Vec<Permission>)> = Vec::new();
        let mut max_timestamp: Option<i64> = None;

        loop {
            self.limiter.acquire().await;
            let page = match self
                .client
                .list_objects_v2(bucket, self.batch_size, token.clone())
                .await
            {
                Ok(page) => page,
                Err(e) if is_access_denied(&e) => {
                    error!(
                        bucket = %bucket,
                        error = %e,
                        "Access denied listing bucket; grant s3:ListBucket, s3:GetObject and s3:GetBucketLocation to the sync principal"
                    );
                    return Ok(outcome);
                }
                Err(e) => {
                    error!(bucket = %bucket, error = %e, "Listing failed, stopping this bucket");
                    return Ok(outcome);
                }
            };
            outcome.pages += 1;

            for object in &page.contents {
                outcome.listed += 1;
                if let Some(ts) = object.last_modified {
                    max_timestamp = Some(max_timestamp.map_or(ts, |m| m.max(ts)));
                }

                let is_folder = object.key.ends_with('/');
                if is_folder {
                    // Folder markers pass every filter; they only exist to
                    // keep the hierarchy complete.
                    match self.hierarchy.synthesise_for_key(bucket, &object.key).await {
                        Ok(folders) => batch.extend(folders),
                        Err(e) => {
                            warn!(key = %object.key, error = %e, "Skipping folder marker after synthesis failure");
                            outcome.skipped += 1;
                            continue;
                        }
                    }
                } else {
                    if !filters.passes_extension(&object.key) {
                        debug!(key = %object.key, "Skipped by extension filter");
                        outcome.skipped += 1;
                        continue;
                    }
                    if !filters.passes_dates(object.last_modified) {
                        debug!(key = %object.key, "Skipped by date filters");
                        outcome.skipped += 1;
                        continue;
                    }
                    match self.hierarchy.synthesise_for_key(bucket, &object.key).await {
                        Ok(folders) => batch.extend(folders),
                        Err(e) => {
                            warn!(key = %object.key, error = %e, "Skipping object after folder synthesis failure");
                            outcome.skipped += 1;
                            continue;
                        }
                    }
                    match self.reconciler.reconcile_object(bucket, object).await {
                        Ok(reconciled) => batch.push((reconciled.record, reconciled.permissions)),
                        Err(e) => {
                            warn!(key = %object.key, error = %e, "Skipping object after reconcile failure");
                            outcome.skipped += 1;
                            continue;
                        }
                    }
                }

                if batch.len() >= self.batch_size {
                    if let Err(e) = self.flush_batch(bucket, &mut batch, &mut outcome).await {
                        error!(bucket = %bucket, error = %e, "Record sink rejected batch, stopping this bucket");
                        return Ok(outcome);
                    }
                }
            }

            token = page.next_continuation_token.clone();
            if let Some(t) = &token {
                self.sync_points
                    .update_sync_point(&key, SyncPointPatch::token(t.clone()))
                    .await
                    .map_err(|e| SyncError::SyncPoint {
                        key: key.to_string(),
                        source: e,
                    })?;
                debug!(bucket = %bucket, page = outcome.pages, "Persisted continuation token");
            }

            if !page.is_truncated {
                break;
            }
            if token.is_none() {
                warn!(bucket = %bucket, "Listing claims truncation but returned no continuation token, stopping");
                break;
            }
        }

        if let Err(e) = self.flush_batch(bucket, &mut batch, &mut outcome).await {
            error!(bucket = %bucket, error = %e, "Record sink rejected final batch, stopping this bucket");
            return Ok(outcome);
        }

        self.sync_points
            .update_sync_point(&key, SyncPointPatch::completed(max_timestamp))
            .await
            .map_err(|e| SyncError::SyncPoint {
                key: key.to_string(),
                source: e,
            })?;
        outcome.completed = true;
        info!(
            bucket = %bucket,
            pages = outcome.pages,
            listed = outcome.listed,
            records = outcome.records_flushed,
            skipped = outcome.skipped,
            "Bucket listing complete"
        );
        Ok(outcome)
    }

    async fn flush_batch(
        &self,
        bucket: &str,
        batch: &mut Vec<(FileRecord, Vec<Permission>)>,
        outcome: &mut BucketOutcome,
    ) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let records = std::mem::take(batch);
        let count = records.len();
        self.sink.on_new_records(records).await?;
        outcome.records_flushed += count;
        debug!(bucket = %bucket, count, total = outcome.records_flushed, "Flushed record batch");
        Ok(())
    }
}
