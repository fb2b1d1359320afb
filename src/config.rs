//! Ingestion configuration.
//!
//! Every field has a default, so a JSON file only needs the values it changes:
//!
//! ```json
//! { "scanMaxDepth": 2, "gpsdump": { "binDir": "/opt/logfly/bin_ext" } }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};
use crate::gpsdump::Platform;

/// Configuration for folder scans and track parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IngestConfig {
    /// Maximum directory depth below the scan root.
    /// Default: 3
    pub scan_max_depth: usize,

    /// Directory names never descended into (in addition to `.`/`_` prefixed entries).
    /// Default: `node_modules`, `__MACOSX`
    pub skipped_dir_names: Vec<String>,

    /// Bytes read from the end of an IGC file when looking for the last fix.
    /// Default: 4096
    pub tail_read_bytes: u64,

    /// GPSDump location and host platform.
    pub gpsdump: GpsDumpConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            scan_max_depth: 3,
            skipped_dir_names: vec!["node_modules".to_string(), "__MACOSX".to_string()],
            tail_read_bytes: 4096,
            gpsdump: GpsDumpConfig::default(),
        }
    }
}

impl IngestConfig {
    /// Load configuration from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(IngestError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| IngestError::Config {
            message: e.to_string(),
        })
    }
}

/// Where the GPSDump executable lives and where it may write scratch files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GpsDumpConfig {
    /// Directory holding the per-platform GPSDump executables.
    /// Default: `bin_ext`
    pub bin_dir: PathBuf,

    /// Directory for the flight list file (Windows) and downloaded tracks.
    /// Default: the system temp directory
    pub temp_dir: PathBuf,

    /// Platform whose argument conventions apply. `None` uses the host platform.
    pub platform: Option<Platform>,
}

impl Default for GpsDumpConfig {
    fn default() -> Self {
        Self {
            bin_dir: PathBuf::from("bin_ext"),
            temp_dir: std::env::temp_dir(),
            platform: None,
        }
    }
}

impl GpsDumpConfig {
    /// Configured platform, or the one this binary runs on.
    pub fn effective_platform(&self) -> Platform {
        self.platform.unwrap_or_else(Platform::current)
    }

    /// Full path of the GPSDump executable for `platform`.
    pub fn executable_path(&self, platform: Platform) -> PathBuf {
        self.bin_dir.join(platform.executable_name())
    }
}
