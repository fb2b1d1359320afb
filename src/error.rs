//! Unified error handling for the ingestion library.
//!
//! Only failures that stop a whole operation show up here. Malformed lines,
//! unreadable single files and timezone misses are absorbed where they happen
//! and never surface as an `IngestError`.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Unified error type for ingestion operations.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Folder to scan does not exist
    #[error("Folder not found: {}", path.display())]
    FolderNotFound { path: PathBuf },

    /// Track file does not exist
    #[error("File not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    /// Logbook database does not exist
    #[error("Logbook not found: {}", path.display())]
    LogbookNotFound { path: PathBuf },

    /// Filesystem failure while enumerating or reading
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Logbook query failure
    #[cfg(feature = "persistence")]
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Configuration file could not be parsed
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The GPSDump executable is missing
    #[error("GPSDump not found at {}", path.display())]
    DumpNotFound { path: PathBuf },

    /// The GPSDump executable ran but failed
    #[error("GPSDump error: {message}")]
    DumpExecution { message: String },

    /// GPSDump returned nothing usable
    #[error("No response from GPSDump")]
    EmptyResponse,

    /// Platform tag without a parameter table
    #[error("Unsupported OS: {tag}")]
    UnsupportedPlatform { tag: String },

    /// Device model code without a device-type flag
    #[error("Unknown GPS model: {code}")]
    UnknownDeviceModel { code: String },

    /// Device/order token that does not split into flag, port and model
    #[error("Invalid device token: {token}")]
    InvalidDeviceToken { token: String },

    /// Downloaded track is empty or truncated
    #[error("IGC file is empty or too short ({length} bytes)")]
    TrackTooShort { length: usize },
}

/// Coarse failure classes a caller can branch on without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureCategory {
    /// Missing folder, file or database
    AbsentInput,
    /// Filesystem or database failure
    Io,
    /// Dump utility is not installed where expected
    DumpNotFound,
    /// Dump utility or device communication failed
    DumpExecution,
    /// The request itself was invalid (platform, model, token, config)
    Request,
}

impl IngestError {
    /// Classify the error for callers.
    pub fn category(&self) -> FailureCategory {
        match self {
            IngestError::FolderNotFound { .. }
            | IngestError::FileNotFound { .. }
            | IngestError::LogbookNotFound { .. } => FailureCategory::AbsentInput,
            IngestError::Io(_) => FailureCategory::Io,
            #[cfg(feature = "persistence")]
            IngestError::Database(_) => FailureCategory::Io,
            IngestError::DumpNotFound { .. } => FailureCategory::DumpNotFound,
            IngestError::DumpExecution { .. }
            | IngestError::EmptyResponse
            | IngestError::TrackTooShort { .. } => FailureCategory::DumpExecution,
            IngestError::Config { .. }
            | IngestError::UnsupportedPlatform { .. }
            | IngestError::UnknownDeviceModel { .. }
            | IngestError::InvalidDeviceToken { .. } => FailureCategory::Request,
        }
    }
}

/// Result type alias for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestError>;
