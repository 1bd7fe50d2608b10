//! Connector configuration: which buckets to sync, whose permissions records
//! carry, and which objects make it through the filters. Hosts deserialise
//! this from their own config surface (the CLI uses YAML) and hand it to the
//! orchestrator, which validates it once at construction.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::SyncError;

/// Whose permissions new records carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorScope {
    #[default]
    Team,
    Individual,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_batch_size() -> usize {
    100
}

fn default_requests_per_second() -> u32 {
    50
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Identity under which records are stored and looked up.
    pub connector_id: String,
    /// Organisation granted READ in team scope and on owner-lookup fallback.
    pub org_id: String,
    #[serde(default)]
    pub scope: ConnectorScope,
    /// Owner of the connector; resolved to OWNER permissions in individual
    /// scope.
    #[serde(default)]
    pub created_by: Option<String>,
    /// Sync exactly this bucket when set; bucket enumeration is skipped.
    #[serde(default)]
    pub bucket_name: Option<String>,
    /// When `bucket_name` is unset, keep only listed buckets with these
    /// names. Empty means every bucket the credentials can see.
    #[serde(default)]
    pub bucket_filter: Vec<String>,
    /// Used when a bucket's location lookup fails.
    #[serde(default = "default_region")]
    pub default_region: String,
    #[serde(default)]
    pub filters: FilterConfig,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Extension allow-list, matched case-insensitively with leading dots
    /// ignored. Empty allows every extension; keys without one are always
    /// skipped because the indexer has nothing to route them to.
    #[serde(default)]
    pub file_extensions: Vec<String>,
    /// RFC 3339 bounds applied to the listed last-modified timestamp.
    #[serde(default)]
    pub modified_after: Option<String>,
    #[serde(default)]
    pub modified_before: Option<String>,
    /// Listings expose no creation time, so these bound last-modified too.
    #[serde(default)]
    pub created_after: Option<String>,
    #[serde(default)]
    pub created_before: Option<String>,
    /// When false, records are emitted with indexing disabled instead of
    /// being dropped, so the hierarchy stays intact.
    #[serde(default = "default_true")]
    pub index_file_content: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            file_extensions: Vec::new(),
            modified_after: None,
            modified_before: None,
            created_after: None,
            created_before: None,
            index_file_content: true,
        }
    }
}

/// Date bounds in epoch ms, parsed once per run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateBounds {
    pub modified_after: Option<i64>,
    pub modified_before: Option<i64>,
    pub created_after: Option<i64>,
    pub created_before: Option<i64>,
}

impl ConnectorConfig {
    pub fn trace_loaded(&self) {
        info!(
            connector_id = %self.connector_id,
            org_id = %self.org_id,
            scope = ?self.scope,
            bucket = self.bucket_name.as_deref().unwrap_or("<all>"),
            bucket_filter_count = self.bucket_filter.len(),
            extensions_count = self.filters.file_extensions.len(),
            batch_size = self.batch_size,
            requests_per_second = self.requests_per_second,
            "Loaded ConnectorConfig"
        );
        debug!(?self, "ConnectorConfig loaded (full debug)");
    }

    /// Checks everything that can be rejected before any collaborator is
    /// touched.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.connector_id.trim().is_empty() {
            return Err(SyncError::NotInitialised("connector_id is empty".into()));
        }
        if self.org_id.trim().is_empty() {
            return Err(SyncError::NotInitialised("org_id is empty".into()));
        }
        if self.batch_size == 0 {
            return Err(SyncError::Config("batch_size must be at least 1".into()));
        }
        if self.requests_per_second == 0 {
            return Err(SyncError::Config(
                "requests_per_second must be at least 1".into(),
            ));
        }
        self.filters.parse_bounds().map(|_| ())
    }
}

impl FilterConfig {
    /// Parses the RFC 3339 bounds into epoch ms, rejecting malformed input.
    pub fn parse_bounds(&self) -> Result<DateBounds, SyncError> {
        Ok(DateBounds {
            modified_after: parse_bound("modified_after", self.modified_after.as_deref())?,
            modified_before: parse_bound("modified_before", self.modified_before.as_deref())?,
            created_after: parse_bound("created_after", self.created_after.as_deref())?,
            created_before: parse_bound("created_before", self.created_before.as_deref())?,
        })
    }

    /// The allow-list normalised the way keys are matched: lower-case, no
    /// leading dot.
    pub fn normalized_extensions(&self) -> HashSet<String> {
        self.file_extensions
            .iter()
            .map(|ext| ext.trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect()
    }
}

fn parse_bound(field: &str, value: Option<&str>) -> Result<Option<i64>, SyncError> {
    match value {
        None => Ok(None),
        Some(raw) => match chrono::DateTime::parse_from_rfc3339(raw) {
            Ok(dt) => Ok(Some(dt.timestamp_millis())),
            Err(e) => Err(SyncError::Config(format!(
                "{field} is not an RFC 3339 timestamp ({raw:?}): {e}"
            ))),
        },
    }
}
