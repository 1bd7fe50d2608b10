//! High-level pipeline: orchestrates bucket enumeration → listing →
//! reconciliation → sink for S3-compatible object stores.
//!
//! This module provides the top-level orchestration logic for synchronising
//! all candidate buckets into the record graph. It implements a coordinated
//! pipeline that:
//!   - Resolves candidate buckets (one configured bucket, a filtered list, or
//!     everything the credentials can see)
//!   - Resolves and caches each bucket's region up front
//!   - Creates one record group per bucket before any object sync (full sync)
//!   - Pages every bucket sequentially through [`ObjectListingPager`]
//!   - Aggregates and returns a [`SyncReport`] of what happened per bucket.
//!
//! # Major Types
//! - [`SyncOrchestrator`]: owns the injected collaborators for a run
//! - [`SyncReport`] / [`BucketReport`]: per-bucket outcome for downstream audit
//! - [`ReindexReport`]: outcome of a reindex pass
//!
//! # Error Handling
//! Only connector-level failures (invalid config, bucket enumeration, the
//! up-front record-group flush) abort a run. A failing bucket is logged,
//! reported, and the loop carries on; its cursor stays put for the next run.
//!
//! # Callable From
//! - Used by the CLI host crate and by integration tests, which inject
//!   mockall collaborators through the [`contract`](crate::contract) traits.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::ConnectorConfig;
use crate::contract::{
    is_not_found, ObjectStoreClient, RecordSink, RecordStore, SyncPointStore, WebUrlBuilder,
};
use crate::errors::SyncError;
use crate::hierarchy::FolderHierarchySynthesizer;
use crate::pager::{BucketOutcome, ObjectFilters, ObjectListingPager};
use crate::permissions::PermissionResolver;
use crate::ratelimit::RateLimiter;
use crate::reconcile::{RecordReconciler, RefreshOutcome};
use crate::records::{FileRecord, Permission, RecordGroup};

pub const DEFAULT_REGION: &str = "us-east-1";

/// Region lookups are cached for the orchestrator's lifetime, read-through
/// on miss. A mutex keeps the cache coherent even though the engine itself
/// pages buckets sequentially.
#[derive(Debug, Default)]
pub struct RegionCache {
    inner: Mutex<HashMap<String, String>>,
}

impl RegionCache {
    pub async fn get(&self, bucket: &str) -> Option<String> {
        self.inner.lock().await.get(bucket).cloned()
    }

    pub async fn insert(&self, bucket: &str, region: String) {
        self.inner.lock().await.insert(bucket.to_string(), region);
    }
}

/// Output report of a sync run, one entry per candidate bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub buckets: Vec<BucketReport>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketReport {
    pub bucket: String,
    pub region: String,
    pub pages: usize,
    pub listed: usize,
    pub records_flushed: usize,
    pub skipped: usize,
    pub completed: bool,
    pub failure: Option<String>,
}

/// Output report of a reindex pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReindexReport {
    pub unchanged: usize,
    pub updated: usize,
    /// Objects no longer at their key. Not treated as deletes; the engine
    /// cannot confirm staleness from a miss.
    pub missing: usize,
    pub skipped: usize,
}

pub struct SyncOrchestrator {
    config: ConnectorConfig,
    client: Arc<dyn ObjectStoreClient>,
    record_store: Arc<dyn RecordStore>,
    sink: Arc<dyn RecordSink>,
    sync_points: Arc<dyn SyncPointStore>,
    urls: Arc<dyn WebUrlBuilder>,
    limiter: Arc<RateLimiter>,
    regions: RegionCache,
    filters: ObjectFilters,
}

impl SyncOrchestrator {
    /// Validates the configuration and wires the engine. Everything behind
    /// the traits is injected; the orchestrator owns no I/O of its own.
    pub fn new(
        config: ConnectorConfig,
        client: Arc<dyn ObjectStoreClient>,
        record_store: Arc<dyn RecordStore>,
        sink: Arc<dyn RecordSink>,
        sync_points: Arc<dyn SyncPointStore>,
        urls: Arc<dyn WebUrlBuilder>,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let bounds = config.filters.parse_bounds()?;
        let filters = ObjectFilters::new(config.filters.normalized_extensions(), bounds);
        let limiter = Arc::new(RateLimiter::new(config.requests_per_second));
        config.trace_loaded();
        Ok(SyncOrchestrator {
            config,
            client,
            record_store,
            sink,
            sync_points,
            urls,
            limiter,
            regions: RegionCache::default(),
            filters,
        })
    }

    /// Full sync: record groups and app users first, then every candidate
    /// bucket from the top (modulo a stored resume cursor).
    pub async fn run_full_sync(&self) -> Result<SyncReport, SyncError> {
        info!("[SYNC] Starting full synchronisation run");

        let buckets = self.candidate_buckets().await?;
        if buckets.is_empty() {
            warn!("[SYNC] No candidate buckets to synchronise");
            return Ok(SyncReport::default());
        }

        self.push_owner_app_user().await;

        let permissions = self.permission_resolver();
        let mut regions = Vec::with_capacity(buckets.len());
        let mut groups = Vec::with_capacity(buckets.len());
        for bucket in &buckets {
            regions.push(self.bucket_region(bucket).await);
            let group = RecordGroup {
                external_group_id: bucket.clone(),
                name: bucket.clone(),
                connector_id: self.config.connector_id.clone(),
                weburl: Some(self.urls.build_parent_url(bucket)),
            };
            groups.push((group, permissions.resolve().await));
        }
        if let Err(e) = self.sink.on_new_record_groups(groups).await {
            error!(error = %e, "[SYNC][ERROR] Record sink rejected record groups");
            return Err(SyncError::Sink(e));
        }
        info!(count = buckets.len(), "[SYNC] Record groups created");

        Ok(self.sync_buckets(&buckets, &regions, false).await)
    }

    /// Incremental sync: no group or app-user work, and each bucket's stored
    /// completion time tightens the modified-after filter.
    pub async fn run_incremental_sync(&self) -> Result<SyncReport, SyncError> {
        info!("[SYNC] Starting incremental synchronisation run");

        let buckets = self.candidate_buckets().await?;
        if buckets.is_empty() {
            warn!("[SYNC] No candidate buckets to synchronise");
            return Ok(SyncReport::default());
        }

        let mut regions = Vec::with_capacity(buckets.len());
        for bucket in &buckets {
            regions.push(self.bucket_region(bucket).await);
        }

        Ok(self.sync_buckets(&buckets, &regions, true).await)
    }

    /// Re-checks previously-emitted records against the store: unchanged
    /// revisions go to the reindex sink, changed ones are rebuilt, missing
    /// objects are skipped.
    pub async fn reindex(&self, records: Vec<FileRecord>) -> Result<ReindexReport, SyncError> {
        info!(count = records.len(), "[SYNC] Starting reindex pass");

        let permissions = self.permission_resolver();
        let reconciler = RecordReconciler::new(
            self.config.connector_id.clone(),
            Arc::clone(&self.record_store),
            permissions,
            Arc::clone(&self.urls),
            self.config.filters.index_file_content,
        );

        let mut report = ReindexReport::default();
        let mut unchanged: Vec<FileRecord> = Vec::new();
        let mut updated: Vec<(FileRecord, Vec<Permission>)> = Vec::new();

        for record in records {
            if !record.is_file {
                debug!(record = %record.external_record_id, "Reindex skipped folder record, folders carry no revision");
                report.skipped += 1;
                continue;
            }
            self.limiter.acquire().await;
            let head = match self
                .client
                .head_object(&record.external_record_group_id, &record.path)
                .await
            {
                Ok(head) => head,
                Err(e) if is_not_found(&e) => {
                    info!(record = %record.external_record_id, "Object no longer at its key, skipping");
                    report.missing += 1;
                    continue;
                }
                Err(e) => {
                    warn!(record = %record.external_record_id, error = %e, "Head failed, skipping record");
                    report.skipped += 1;
                    continue;
                }
            };
            match reconciler.refresh_from_head(&record, &head).await {
                RefreshOutcome::Unchanged => {
                    report.unchanged += 1;
                    unchanged.push(record);
                }
                RefreshOutcome::Updated {
                    record,
                    permissions,
                } => {
                    report.updated += 1;
                    updated.push((record, permissions));
                }
            }
        }

        if !unchanged.is_empty() {
            if let Err(e) = self.sink.reindex_existing_records(unchanged).await {
                error!(error = %e, "[SYNC][ERROR] Reindex sink rejected unchanged records");
                return Err(SyncError::Sink(e));
            }
        }
        if !updated.is_empty() {
            if let Err(e) = self.sink.on_new_records(updated).await {
                error!(error = %e, "[SYNC][ERROR] Record sink rejected rebuilt records");
                return Err(SyncError::Sink(e));
            }
        }

        info!(
            unchanged = report.unchanged,
            updated = report.updated,
            missing = report.missing,
            skipped = report.skipped,
            "[SYNC] Reindex finished"
        );
        Ok(report)
    }

    async fn sync_buckets(
        &self,
        buckets: &[String],
        regions: &[String],
        incremental: bool,
    ) -> SyncReport {
        let pager = self.pager();
        let mut report = SyncReport::default();

        for (bucket, region) in buckets.iter().zip(regions.iter()) {
            info!(bucket = %bucket, region = %region, incremental, "[SYNC] Synchronising bucket");
            match pager.sync_bucket(bucket, incremental).await {
                Ok(outcome) => {
                    if outcome.completed {
                        info!(
                            bucket = %bucket,
                            records = outcome.records_flushed,
                            "[SYNC] Bucket synchronised"
                        );
                    } else {
                        warn!(bucket = %bucket, "[SYNC] Bucket stopped early, cursor left in place for resume");
                    }
                    report
                        .buckets
                        .push(bucket_report(bucket, region, outcome, None));
                }
                Err(e) => {
                    error!(bucket = %bucket, error = %e, "[SYNC][ERROR] Bucket failed");
                    report.buckets.push(bucket_report(
                        bucket,
                        region,
                        BucketOutcome::default(),
                        Some(e.to_string()),
                    ));
                }
            }
        }

        info!(
            buckets = report.buckets.len(),
            completed = report.buckets.iter().filter(|b| b.completed).count(),
            "[SYNC] Run finished"
        );
        report
    }

    async fn candidate_buckets(&self) -> Result<Vec<String>, SyncError> {
        if let Some(bucket) = self.config.bucket_name.as_deref() {
            if !bucket.is_empty() {
                return Ok(vec![bucket.to_string()]);
            }
        }

        self.limiter.acquire().await;
        let listed = self
            .client
            .list_buckets()
            .await
            .map_err(SyncError::BucketEnumeration)?;
        let mut buckets: Vec<String> = listed.into_iter().map(|b| b.name).collect();
        if !self.config.bucket_filter.is_empty() {
            let allowed: HashSet<&str> = self
                .config
                .bucket_filter
                .iter()
                .map(String::as_str)
                .collect();
            buckets.retain(|b| allowed.contains(b.as_str()));
        }
        info!(count = buckets.len(), "[SYNC] Candidate buckets resolved");
        Ok(buckets)
    }

    /// Region for a bucket, cached. An empty or absent location constraint
    /// is `us-east-1`; a failed lookup falls back to the configured default.
    async fn bucket_region(&self, bucket: &str) -> String {
        if let Some(region) = self.regions.get(bucket).await {
            return region;
        }
        self.limiter.acquire().await;
        let region = match self.client.get_bucket_location(bucket).await {
            Ok(Some(constraint)) if !constraint.is_empty() => constraint,
            Ok(_) => DEFAULT_REGION.to_string(),
            Err(e) => {
                warn!(
                    bucket = %bucket,
                    error = %e,
                    default = %self.config.default_region,
                    "Region lookup failed, using configured default"
                );
                self.config.default_region.clone()
            }
        };
        self.regions.insert(bucket, region.clone()).await;
        region
    }

    async fn push_owner_app_user(&self) {
        let Some(user) = self.permission_resolver().owner_app_user().await else {
            return;
        };
        match self.sink.on_new_app_users(vec![user.clone()]).await {
            Ok(()) => {
                info!(user = %user.external_user_id, "[SYNC] Connector owner pushed as app user")
            }
            Err(e) => warn!(error = %e, "[SYNC] Failed to push connector owner as app user"),
        }
    }

    fn permission_resolver(&self) -> PermissionResolver {
        PermissionResolver::new(
            self.config.scope,
            self.config.org_id.clone(),
            self.config.created_by.clone(),
            Arc::clone(&self.record_store),
        )
    }

    fn pager(&self) -> ObjectListingPager {
        let permissions = self.permission_resolver();
        let reconciler = RecordReconciler::new(
            self.config.connector_id.clone(),
            Arc::clone(&self.record_store),
            permissions.clone(),
            Arc::clone(&self.urls),
            self.config.filters.index_file_content,
        );
        let hierarchy = FolderHierarchySynthesizer::new(
            self.config.connector_id.clone(),
            Arc::clone(&self.record_store),
            permissions,
            Arc::clone(&self.urls),
        );
        ObjectListingPager::new(
            Arc::clone(&self.client),
            Arc::clone(&self.sink),
            Arc::clone(&self.sync_points),
            reconciler,
            hierarchy,
            Arc::clone(&self.limiter),
            self.filters.clone(),
            self.config.batch_size,
        )
    }
}

fn bucket_report(
    bucket: &str,
    region: &str,
    outcome: BucketOutcome,
    failure: Option<String>,
) -> BucketReport {
    BucketReport {
        bucket: bucket.to_string(),
        region: region.to_string(),
        pages: outcome.pages,
        listed: outcome.listed,
        records_flushed: outcome.records_flushed,
        skipped: outcome.skipped,
        completed: outcome.completed,
        failure,
    }
}
