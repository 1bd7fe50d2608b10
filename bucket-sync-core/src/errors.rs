//! Error taxonomy for the sync engine.
//!
//! Only failures that abort a whole run surface as [`SyncError`]. Bucket-level
//! problems (listing denied, flush failed) and object-level problems (one
//! malformed or unreadable object) are logged inside the engine, reported per
//! bucket, and never escape the public API. No retries happen at this layer;
//! retry and backoff belong to the underlying client implementations.

use thiserror::Error;

use crate::contract::StoreError;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Configuration rejected at construction (bad date bound, zero batch size).
    #[error("invalid connector configuration: {0}")]
    Config(String),

    /// A required collaborator or identifier is missing.
    #[error("connector is not initialised: {0}")]
    NotInitialised(String),

    /// Listing the account's buckets failed when the run needed it to select
    /// candidates. Nothing has been synced at this point.
    #[error("failed to enumerate buckets: {0}")]
    BucketEnumeration(StoreError),

    /// The record sink rejected a flush the run cannot proceed without: the
    /// up-front record groups, or a reindex pass's final routing.
    #[error("record sink rejected a required flush: {0}")]
    Sink(StoreError),

    /// A sync point could not be read or written for a bucket. The
    /// orchestrator treats this as a bucket-level failure and carries on with
    /// the remaining buckets.
    #[error("sync point {key} could not be accessed: {source}")]
    SyncPoint { key: String, source: StoreError },
}
