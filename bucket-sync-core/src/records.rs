//! Record data model: the normalised shapes this engine emits.
//!
//! Object stores expose a flat list of keys; the record graph downstream wants
//! files, folders and groups with stable identities. The types here are plain
//! data, serialisable for export and transport. The helper functions at the
//! bottom define the identity scheme: every identity string is derived from
//! the bucket name plus the normalised object key.

use serde::{Deserialize, Serialize};

/// MIME type assigned to synthesized folder records.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.folder";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordType {
    File,
    Folder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PermissionType {
    Read,
    Owner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityType {
    Org,
    User,
}

/// One object or synthesized folder, normalised for the record graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Internally generated id (UUID v4), stable once assigned.
    pub id: String,
    /// Primary identity: `"{bucket}/{normalized_key}"`.
    pub external_record_id: String,
    /// The bucket this record belongs to.
    pub external_record_group_id: String,
    /// Secondary identity for move detection: `"{bucket}/{etag}"`, or
    /// `"{bucket}/{key}|"` when the store reported no ETag.
    pub external_revision_id: Option<String>,
    /// `None` at bucket root; otherwise the folder record above this one.
    pub parent_external_record_id: Option<String>,
    pub parent_record_type: Option<RecordType>,
    pub record_type: RecordType,
    /// Display name: the last path segment.
    pub name: String,
    pub is_file: bool,
    pub size_in_bytes: i64,
    /// Lower-cased, no leading dot.
    pub extension: Option<String>,
    pub mime_type: Option<String>,
    /// The raw object key as listed.
    pub path: String,
    pub etag: Option<String>,
    /// Monotonic counter, 0 for a new record, +1 on every reconciled change.
    pub version: i64,
    pub source_created_at: Option<i64>,
    pub source_updated_at: Option<i64>,
    pub weburl: Option<String>,
    /// Folder console URLs are synthetic, so folders hide theirs.
    pub hide_weburl: bool,
    /// Set when configuration disables content indexing; the record is still
    /// emitted so the hierarchy stays intact.
    pub indexing_disabled: bool,
}

/// One record group per bucket; hierarchy edges hang off it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordGroup {
    pub external_group_id: String,
    pub name: String,
    pub connector_id: String,
    pub weburl: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    pub permission_type: PermissionType,
    pub entity_type: EntityType,
    pub external_id: String,
    pub email: Option<String>,
}

/// A user pushed to the sink during full sync (individual scope only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppUser {
    pub external_user_id: String,
    pub email: Option<String>,
}

/// Strips leading slashes from an object key. Keys arriving with a leading
/// `/` would otherwise mint a different identity for the same object.
pub fn normalize_key(key: &str) -> &str {
    key.trim_start_matches('/')
}

/// Primary identity for an object: `"{bucket}/{normalized_key}"`.
pub fn external_record_id(bucket: &str, key: &str) -> String {
    format!("{}/{}", bucket, normalize_key(key))
}

/// S3 ETags are returned wrapped in double quotes.
pub fn strip_etag_quotes(etag: &str) -> &str {
    etag.trim_matches('"')
}

/// Revision identity: content hash when available, key-derived fallback
/// (trailing `|` keeps it disjoint from any real ETag value) otherwise.
pub fn composite_revision(bucket: &str, key: &str, etag: Option<&str>) -> String {
    match etag {
        Some(e) if !e.is_empty() => format!("{}/{}", bucket, strip_etag_quotes(e)),
        _ => format!("{}/{}|", bucket, normalize_key(key)),
    }
}

/// Last path segment of a key, used as the record's display name.
pub fn file_name(key: &str) -> &str {
    let key = normalize_key(key).trim_end_matches('/');
    key.rsplit_once('/').map(|(_, name)| name).unwrap_or(key)
}

/// Extension of the last path segment, lower-cased, without the dot.
/// Keys with no extension (or a bare trailing dot) have none.
pub fn extension_of(key: &str) -> Option<String> {
    let name = file_name(key);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext.to_lowercase()),
        _ => None,
    }
}

/// Static extension-to-MIME mapping for the formats the indexer understands.
/// Anything unknown is emitted without a MIME type rather than guessed.
pub fn mime_type_for_extension(extension: &str) -> Option<&'static str> {
    let mime = match extension {
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "xml" => "application/xml",
        "json" => "application/json",
        "yaml" | "yml" => "application/yaml",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        _ => return None,
    };
    Some(mime)
}
