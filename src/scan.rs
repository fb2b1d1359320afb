//! Folder scan for track files.

use std::fs;
use std::path::Path;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::{TrackExtension, TrackFile};

/// Track files found under a folder, split by format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub igc_files: Vec<TrackFile>,
    pub gpx_files: Vec<TrackFile>,
    pub total_count: usize,
}

/// Recursively collect `.igc` and `.gpx` files below `folder`.
///
/// Entries whose name starts with `.` or `_` are ignored, as are the configured
/// directory names. Files deeper than `scan_max_depth` directories below the
/// root are not visited. Within a directory, entries are visited by name.
pub fn scan_folder(folder: &Path, config: &IngestConfig) -> Result<ScanResult> {
    if !folder.is_dir() {
        return Err(IngestError::FolderNotFound {
            path: folder.to_path_buf(),
        });
    }

    info!("[Scan] Scanning folder {}", folder.display());
    let mut result = ScanResult::default();
    scan_dir(folder, 0, config, &mut result)?;
    result.total_count = result.igc_files.len() + result.gpx_files.len();

    info!(
        "[Scan] Found {} IGC and {} GPX files",
        result.igc_files.len(),
        result.gpx_files.len()
    );
    Ok(result)
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.') || name.starts_with('_')
}

fn scan_dir(dir: &Path, depth: usize, config: &IngestConfig, result: &mut ScanResult) -> Result<()> {
    if depth > config.scan_max_depth {
        return Ok(());
    }

    let mut entries = fs::read_dir(dir)?.collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_hidden(&name) {
            continue;
        }

        let path = entry.path();
        let file_type = match entry.file_type() {
            Ok(file_type) => file_type,
            Err(e) => {
                warn!("[Scan] Skipping {}: {}", path.display(), e);
                continue;
            }
        };

        if file_type.is_dir() {
            if config.skipped_dir_names.iter().any(|skip| *skip == name) {
                debug!("[Scan] Skipping directory {}", path.display());
                continue;
            }
            scan_dir(&path, depth + 1, config, result)?;
        } else if file_type.is_file() {
            let Some(extension) = path
                .extension()
                .and_then(|ext| ext.to_str())
                .and_then(TrackExtension::from_extension)
            else {
                continue;
            };

            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            let file = TrackFile {
                name,
                path,
                extension,
                size,
            };
            match extension {
                TrackExtension::Igc => result.igc_files.push(file),
                TrackExtension::Gpx => result.gpx_files.push(file),
            }
        }
    }
    Ok(())
}
