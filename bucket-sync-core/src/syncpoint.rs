//! Sync cursors: where a bucket's pagination left off and when it last
//! completed. One cursor per (record kind, scope, bucket); this engine only
//! ever writes file-kind cursors at bucket scope.

use serde::{Deserialize, Serialize};

pub const RECORD_KIND_FILE: &str = "file";
pub const SYNC_SCOPE_BUCKET: &str = "bucket";

/// Key of one bucket's cursor, rendered `"file:bucket:{bucket}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncPointKey {
    pub record_kind: String,
    pub scope: String,
    pub bucket: String,
}

impl SyncPointKey {
    pub fn files_in_bucket(bucket: &str) -> Self {
        SyncPointKey {
            record_kind: RECORD_KIND_FILE.to_string(),
            scope: SYNC_SCOPE_BUCKET.to_string(),
            bucket: bucket.to_string(),
        }
    }
}

impl std::fmt::Display for SyncPointKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.record_kind, self.scope, self.bucket)
    }
}

/// Persisted cursor state. A present continuation token means the bucket's
/// previous run stopped mid-pagination; a cleared token means it completed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncPoint {
    pub continuation_token: Option<String>,
    /// Epoch ms of the newest object timestamp observed by the last completed
    /// sync. Merged into the modified-after filter on incremental runs.
    pub last_sync_time: Option<i64>,
}

/// Partial-merge update for a sync point. Fields left `None` keep their
/// stored value; `continuation_token: Some(None)` clears the token.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncPointPatch {
    pub continuation_token: Option<Option<String>>,
    pub last_sync_time: Option<i64>,
}

impl SyncPointPatch {
    /// Records the pager's position after a page.
    pub fn token(token: impl Into<String>) -> Self {
        SyncPointPatch {
            continuation_token: Some(Some(token.into())),
            last_sync_time: None,
        }
    }

    /// Marks a bucket complete: clears the token and, when a timestamp was
    /// observed during the run, advances the completion time.
    pub fn completed(last_sync_time: Option<i64>) -> Self {
        SyncPointPatch {
            continuation_token: Some(None),
            last_sync_time,
        }
    }
}

impl SyncPoint {
    /// The merge rule every store implementation must follow.
    pub fn apply(&mut self, patch: &SyncPointPatch) {
        if let Some(token) = &patch.continuation_token {
            self.continuation_token = token.clone();
        }
        if let Some(ts) = patch.last_sync_time {
            self.last_sync_time = Some(ts);
        }
    }
}
