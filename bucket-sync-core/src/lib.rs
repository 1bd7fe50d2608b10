#![doc = "bucket-sync-core: core sync engine library for bucket-sync."]

//! This crate contains all logic for synchronising S3-compatible buckets into a
//! normalised record store: listing, identity reconciliation, folder-hierarchy
//! synthesis, permission derivation and sync-cursor bookkeeping.
//! Wire-level clients and durable storage are not included here; they are
//! consumed through the traits in [`contract`].
//!
//! # Usage
//! Construct a [`synchronise::SyncOrchestrator`] with a [`config::ConnectorConfig`]
//! and implementations of the contract traits, then call `run_full_sync`,
//! `run_incremental_sync` or `reindex`.

pub mod config;
pub mod contract;
pub mod errors;
pub mod hierarchy;
pub mod pager;
pub mod permissions;
pub mod ratelimit;
pub mod reconcile;
pub mod records;
pub mod syncpoint;
pub mod synchronise;
