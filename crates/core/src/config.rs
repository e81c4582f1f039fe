//! Store configuration via `storekit.toml`
//!
//! Every field has a default, so an empty file is a valid configuration.
//! On first start a commented default file can be written with
//! [`StoreConfig::write_default_if_missing`].

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Config file name
pub const CONFIG_FILE_NAME: &str = "storekit.toml";

/// Runtime limits shared by backends and the trigger dispatcher
///
/// # Example
///
/// ```toml
/// max_local_search_size = 1000
/// default_search_limit = 20
/// max_search_limit = 1000
/// trigger_workers = 1
/// trigger_queue_depth = 1024
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum rows buffered by a local sort
    pub max_local_search_size: usize,
    /// Page size when a request has no limit
    pub default_search_limit: usize,
    /// Larger requested limits are clamped to this
    pub max_search_limit: usize,
    /// Background trigger worker threads
    pub trigger_workers: usize,
    /// Capacity of the trigger queue
    pub trigger_queue_depth: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            max_local_search_size: 1000,
            default_search_limit: 20,
            max_search_limit: 1000,
            trigger_workers: 1,
            trigger_queue_depth: 1024,
        }
    }
}

impl StoreConfig {
    /// Default config file content with comments
    pub fn default_toml() -> &'static str {
        r#"# storekit configuration

# Maximum number of rows a search may buffer when it has to sort locally
# (the order does not match an index sort key). Searches that would buffer
# more fail with a sort_overflow error.
max_local_search_size = 1000

# Page size used when a search request does not set a limit
default_search_limit = 20

# Requested page sizes above this are clamped
max_search_limit = 1000

# Number of background threads running after-create/update/delete triggers
trigger_workers = 1

# Trigger events queued beyond this are dropped (and logged)
trigger_queue_depth = 1024
"#
    }

    /// Parse TOML text
    ///
    /// # Errors
    ///
    /// Returns `Config` if the text does not parse or a value is invalid.
    pub fn from_toml_str(content: &str) -> StoreResult<Self> {
        let config: StoreConfig = toml::from_str(content)
            .map_err(|e| StoreError::config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a config file
    ///
    /// # Errors
    ///
    /// Returns `Config` if the file cannot be read, does not parse, or holds
    /// an invalid value.
    pub fn from_file(path: &Path) -> StoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StoreError::config(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config = Self::from_toml_str(&content).map_err(|e| match e {
            StoreError::Config { reason } => {
                StoreError::config(format!("{}: {}", path.display(), reason))
            }
            other => other,
        })?;
        info!(target: "storekit::config", path = %path.display(), ?config, "loaded config");
        Ok(config)
    }

    /// Write the default config file if it does not already exist
    pub fn write_default_if_missing(path: &Path) -> StoreResult<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                StoreError::config(format!(
                    "failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
            info!(
                target: "storekit::config",
                path = %path.display(),
                "wrote default config file"
            );
        }
        Ok(())
    }

    /// Check value ranges
    pub fn validate(&self) -> StoreResult<()> {
        let positive = [
            ("max_local_search_size", self.max_local_search_size),
            ("default_search_limit", self.default_search_limit),
            ("max_search_limit", self.max_search_limit),
            ("trigger_workers", self.trigger_workers),
            ("trigger_queue_depth", self.trigger_queue_depth),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(StoreError::config(format!("{} must be positive", name)));
            }
        }
        if self.max_search_limit < self.default_search_limit {
            return Err(StoreError::config(format!(
                "max_search_limit ({}) is below default_search_limit ({})",
                self.max_search_limit, self.default_search_limit
            )));
        }
        Ok(())
    }
}
