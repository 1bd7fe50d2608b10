/// `load_config` module: Loads and adapts a static YAML config into the typed
/// configuration the core engine and the local host consume.
///
/// This module is the only place where untrusted YAML is parsed and mapped to rich,
/// strongly-typed internal structs.
///
/// # Responsibilities
/// - Parse user-supplied YAML configuration files into type-safe Rust structs
/// - Map the `connector` section straight onto [`ConnectorConfig`] (the core's own
///   serde surface), so defaults and validation live in one place
/// - Fold an optional top-level `filters` section into the connector config
/// - Select the web-URL flavour (`s3` or `minio`) for emitted records
/// - Ensure robust error messages for CLI and tests: any failure in loading must
///   result in clear diagnostics.
///
/// # Errors
/// All errors in this module use `anyhow::Error` for context-rich diagnostics, and are
/// surfaced at the CLI boundary.
///
/// ---
///
/// Internal implementation begins below.
///
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use serde::Deserialize;
use tracing::{error, info};

use bucket_sync_core::config::{ConnectorConfig, FilterConfig};
use bucket_sync_core::contract::{MinioConsoleUrls, S3ConsoleUrls, WebUrlBuilder};

#[derive(Debug)]
pub struct CliConfig {
    pub connector: ConnectorConfig,
    pub source: SourceSection,
    pub output: OutputSection,
    /// Local user directory for owner lookups, user id to email.
    pub users: HashMap<String, String>,
}

/// Which console the record web URLs point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    S3,
    Minio,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceSection {
    /// Directory whose first-level subdirectories are treated as buckets.
    pub root_dir: PathBuf,
    #[serde(default)]
    pub provider: Provider,
    /// Console base URL; required for the minio provider.
    #[serde(default)]
    pub minio_console: Option<String>,
}

impl SourceSection {
    pub fn url_builder(&self) -> Result<Arc<dyn WebUrlBuilder>> {
        match self.provider {
            Provider::S3 => Ok(Arc::new(S3ConsoleUrls)),
            Provider::Minio => {
                let base = self.minio_console.as_deref().ok_or_else(|| {
                    anyhow::anyhow!("provider 'minio' requires source.minio_console to be set")
                })?;
                Ok(Arc::new(MinioConsoleUrls::new(base)))
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputSection {
    /// JSON state file holding records, edges, groups and users between runs.
    pub state_file: PathBuf,
    /// Optional JSONL audit log of everything the sink receives.
    #[serde(default)]
    pub export_file: Option<PathBuf>,
    pub sync_points_file: PathBuf,
}

/// Loads a static YAML config file and maps it onto the core connector config
/// plus the local host sections. Returns a processable CLI config.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    #[derive(Debug, Deserialize)]
    struct RawConfig {
        connector: ConnectorConfig,
        source: SourceSection,
        #[serde(default)]
        filters: Option<FilterConfig>,
        output: OutputSection,
        #[serde(default)]
        users: HashMap<String, String>,
    }

    let mut raw: RawConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    // A top-level filters section overrides whatever the connector block set;
    // it reads better in hand-written configs.
    if let Some(filters) = raw.filters.take() {
        raw.connector.filters = filters;
    }

    Ok(CliConfig {
        connector: raw.connector,
        source: raw.source,
        output: raw.output,
        users: raw.users,
    })
}
