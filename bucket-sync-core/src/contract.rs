#![allow(unused)]

//! # contract: interfaces for everything the sync engine consumes
//!
//! This module defines the traits for the four external collaborators the
//! engine is wired with (object-store client, record store, record sink,
//! sync-point store) plus the per-flavour web-URL strategy, and the plain
//! exchange types they speak in.
//!
//! ## Interface & Extensibility
//! - Implement [`ObjectStoreClient`] against a real wire client (aws-sdk,
//!   MinIO, or anything ListObjectsV2-shaped); the engine never sees the wire.
//! - All methods are async, returning results and using boxed error types.
//! - Error handling is uniform: the engine classifies failures only through
//!   [`is_access_denied`] / [`is_not_found`] substring matching. Callers that
//!   need structured error variants should widen this contract.
//!
//! ## Mocking & Testing
//! - Every trait is annotated for `mockall`, and the mocks are exported under
//!   the default `test-export-mocks` feature so dependents can script
//!   deterministic collaborators in their own tests.
//!
//! ## Type Sources
//! - Exchange types (`ObjectPage`, `ObjectSummary`, `HeadObjectInfo`,
//!   `StoredRecord`, ...) are plain data; timestamps are epoch milliseconds.

use async_trait::async_trait;

use mockall::{automock, predicate::*};

use crate::records::{normalize_key, AppUser, FileRecord, Permission, RecordGroup};
use crate::syncpoint::{SyncPoint, SyncPointKey, SyncPointPatch};

/// Error type shared by every contract trait (simple boxed error for now).
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// Whether a collaborator failure reads as an authorisation problem.
/// Matches the S3 `AccessDenied` code and the plainer phrasings proxies use.
pub fn is_access_denied(err: &StoreError) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("access denied") || msg.contains("accessdenied") || msg.contains("forbidden")
}

/// Whether a collaborator failure reads as a missing object or bucket.
pub fn is_not_found(err: &StoreError) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("not found")
        || msg.contains("notfound")
        || msg.contains("no such key")
        || msg.contains("404")
}

/// One bucket as reported by `list_buckets`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketSummary {
    pub name: String,
}

/// One listed object. A key with a trailing `/` is a folder marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub etag: Option<String>,
    /// Epoch ms; stores may omit it, and the engine then includes the object
    /// conservatively wherever a date filter would apply.
    pub last_modified: Option<i64>,
    pub size: i64,
}

/// One page of a ListObjectsV2-shaped listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectPage {
    pub contents: Vec<ObjectSummary>,
    pub is_truncated: bool,
    pub next_continuation_token: Option<String>,
}

/// Metadata from a head-object call, used by reindexing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadObjectInfo {
    pub etag: Option<String>,
    pub last_modified: Option<i64>,
    pub content_length: i64,
}

/// The slice of an existing record the reconciler needs for its decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub id: String,
    pub external_record_id: String,
    pub external_revision_id: Option<String>,
    pub version: i64,
    pub source_created_at: Option<i64>,
}

/// Resolved directory entry for a user id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub email: String,
}

/// Read access to an S3-compatible object store.
///
/// The engine rate-limits and sequences its own calls; implementations should
/// not retry internally, only translate wire responses. An empty or absent
/// location constraint means `us-east-1`, which the engine normalises itself.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    /// List every bucket the credentials can see.
    async fn list_buckets(&self) -> Result<Vec<BucketSummary>, StoreError>;

    /// One ListObjectsV2 page of at most `max_keys` keys, resuming from
    /// `continuation_token` when given.
    async fn list_objects_v2(
        &self,
        bucket: &str,
        max_keys: usize,
        continuation_token: Option<String>,
    ) -> Result<ObjectPage, StoreError>;

    /// The bucket's location constraint, `None`/empty meaning `us-east-1`.
    async fn get_bucket_location(&self, bucket: &str) -> Result<Option<String>, StoreError>;

    /// Current metadata for a single object.
    async fn head_object(&self, bucket: &str, key: &str) -> Result<HeadObjectInfo, StoreError>;

    /// Presigned URL for direct object access. Not used by the sync
    /// algorithms; carried for hosts that stream file bytes downstream.
    async fn generate_presigned_url(
        &self,
        method: &str,
        bucket: &str,
        key: &str,
        expires_in_secs: u64,
        region: &str,
    ) -> Result<String, StoreError>;
}

/// Lookups against the durable record graph. Each call is one short
/// transaction; the engine never holds one open across a page or bucket.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Record by primary identity (`"{bucket}/{normalized_key}"`).
    async fn get_record_by_external_id(
        &self,
        connector_id: &str,
        external_id: &str,
    ) -> Result<Option<StoredRecord>, StoreError>;

    /// Record by revision identity, the move-detection fallback.
    async fn get_record_by_external_revision_id(
        &self,
        connector_id: &str,
        revision_id: &str,
    ) -> Result<Option<StoredRecord>, StoreError>;

    /// Severs the record's parent edge ahead of re-parenting a moved record.
    /// Returns how many edges were removed.
    async fn delete_parent_child_edge_to_record(&self, record_id: &str)
        -> Result<u64, StoreError>;

    /// Directory lookup used for owner permissions.
    async fn get_user_by_id(&self, user_id: &str) -> Result<Option<UserInfo>, StoreError>;
}

/// Downstream consumer of everything the engine produces.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Record groups (one per bucket), created before any object sync so
    /// hierarchy edges always have a target.
    async fn on_new_record_groups(
        &self,
        groups: Vec<(RecordGroup, Vec<Permission>)>,
    ) -> Result<(), StoreError>;

    /// Created, updated and moved records, in listing order.
    async fn on_new_records(
        &self,
        records: Vec<(FileRecord, Vec<Permission>)>,
    ) -> Result<(), StoreError>;

    /// Records whose revision is unchanged but which should be re-queued for
    /// indexing without a data change.
    async fn reindex_existing_records(&self, records: Vec<FileRecord>) -> Result<(), StoreError>;

    /// Users discovered while resolving permissions (individual scope).
    async fn on_new_app_users(&self, users: Vec<AppUser>) -> Result<(), StoreError>;
}

/// Durable cursor storage. `update_sync_point` is a partial merge, not an
/// overwrite; the merge rule is [`SyncPoint::apply`].
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait SyncPointStore: Send + Sync {
    async fn read_sync_point(&self, key: &SyncPointKey) -> Result<Option<SyncPoint>, StoreError>;

    async fn update_sync_point(
        &self,
        key: &SyncPointKey,
        patch: SyncPointPatch,
    ) -> Result<(), StoreError>;
}

/// Per-flavour web URLs for records. Implemented once per store console
/// (AWS, MinIO); the engine takes one as a constructor-injected dependency.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait WebUrlBuilder: Send + Sync {
    fn build_object_url(&self, bucket: &str, key: &str) -> String;

    /// URL for a parent identity (`"{bucket}"` or `"{bucket}/{prefix}"`).
    fn build_parent_url(&self, parent_external_id: &str) -> String;
}

impl std::fmt::Debug for dyn WebUrlBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad("WebUrlBuilder")
    }
}

/// AWS console URLs.
#[derive(Debug, Clone, Default)]
pub struct S3ConsoleUrls;

impl WebUrlBuilder for S3ConsoleUrls {
    fn build_object_url(&self, bucket: &str, key: &str) -> String {
        format!(
            "https://s3.console.aws.amazon.com/s3/object/{}?prefix={}",
            bucket,
            normalize_key(key)
        )
    }

    fn build_parent_url(&self, parent_external_id: &str) -> String {
        match parent_external_id.split_once('/') {
            Some((bucket, prefix)) => format!(
                "https://s3.console.aws.amazon.com/s3/buckets/{}?prefix={}/",
                bucket, prefix
            ),
            None => format!(
                "https://s3.console.aws.amazon.com/s3/buckets/{}",
                parent_external_id
            ),
        }
    }
}

/// MinIO console URLs, rooted at the deployment's console base.
#[derive(Debug, Clone)]
pub struct MinioConsoleUrls {
    console_base: String,
}

impl MinioConsoleUrls {
    pub fn new(console_base: impl Into<String>) -> Self {
        MinioConsoleUrls {
            console_base: console_base.into().trim_end_matches('/').to_string(),
        }
    }
}

impl WebUrlBuilder for MinioConsoleUrls {
    fn build_object_url(&self, bucket: &str, key: &str) -> String {
        format!(
            "{}/browser/{}/{}",
            self.console_base,
            bucket,
            normalize_key(key)
        )
    }

    fn build_parent_url(&self, parent_external_id: &str) -> String {
        format!("{}/browser/{}", self.console_base, parent_external_id)
    }
}
