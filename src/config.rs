//! File access parameters: the Rust-native stand-in for whatever property
//! list mechanism a host file-format library uses to pass driver options.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

fn default_page_size() -> u64 {
    2 * 1024 * 1024
}

fn default_page_cache_size() -> usize {
    0
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_use_tls() -> bool {
    true
}

/// Driver-level configuration: page geometry plus the backend to bind to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// `0` means "adopt the backend's existing page size, or its default
    /// for a new backend".
    #[serde(default = "default_page_size")]
    pub page_size: u64,

    /// Maximum pages held in memory. `0` means "as many as fit in 4 GiB".
    #[serde(default = "default_page_cache_size")]
    pub page_cache_size: usize,

    pub backend: BackendConfig,
}

/// Which key-value backend to open, and its connection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    Filesystem {
        root: PathBuf,
    },
    S3 {
        /// `s3://bucket/path`
        uri: String,
        access_key: String,
        secret_key: String,
        #[serde(default = "default_region")]
        region: String,
        /// Endpoint override, e.g. `localhost:9000` for a MinIO test
        /// fixture. `None` uses the default AWS virtual-hosted endpoint.
        #[serde(default)]
        host: Option<String>,
        #[serde(default = "default_use_tls")]
        use_tls: bool,
    },
}

impl DriverConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }
}
