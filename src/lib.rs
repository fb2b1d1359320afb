//! # Flightlog Ingest
//!
//! Flight track ingestion and logbook duplicate detection.
//!
//! This library provides:
//! - Minimal-read IGC parsing (headers, first and last fix only)
//! - Timezone resolution from takeoff coordinates
//! - Decoding of GPSDump flight lists for every supported OS/device combination
//! - Duplicate detection against a pilot logbook, exact and tolerance-based
//!
//! ## Features
//!
//! - **`persistence`** (default) - SQLite-backed [`logbook::SqliteLogbook`]
//!
//! ## Quick Start
//!
//! ```rust
//! use flightlog_ingest::igc::{parse_date_header, FixRecord};
//!
//! let date = parse_date_header("HFDTEDATE:180624,01").unwrap();
//! assert_eq!(date.iso, "2024-06-18");
//!
//! let fix = FixRecord::parse("B1023454553000N00612000EA0123401250").unwrap();
//! assert_eq!(fix.gnss_altitude, 1250);
//! ```

use std::fmt;
use std::path::PathBuf;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{FailureCategory, IngestError, Result};

// Configuration (scan limits, GPSDump location)
pub mod config;
pub use config::{GpsDumpConfig, IngestConfig};

// Minimal IGC track parsing
pub mod igc;
pub use igc::{parse_igc_file, FixRecord};

// Coordinate + instant -> UTC offset
pub mod timezone;
pub use timezone::{OffsetResolution, TimeZoneResolver, ZoneLookup};

// GPSDump invocation and output decoding
pub mod gpsdump;
pub use gpsdump::{DeviceModel, DumpCommand, DumpInvoker, Platform, ProcessInvoker};

// Logbook query interface
pub mod logbook;
#[cfg(feature = "persistence")]
pub use logbook::SqliteLogbook;
pub use logbook::{InMemoryLogbook, Logbook};

// Duplicate detection (exact and fuzzy)
pub mod matching;
pub use matching::{check_flight_exists, check_flights_batch, match_device_flights, DuplicateVerdict};

// Folder discovery
pub mod scan;
pub use scan::{scan_folder, ScanResult};

// Run orchestration
pub mod ingest;
pub use ingest::{IngestPhase, IngestionCoordinator};

// ============================================================================
// Core Types
// ============================================================================

/// Track file extensions picked up by a folder scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackExtension {
    Igc,
    Gpx,
}

impl TrackExtension {
    /// Match a file extension, ignoring case.
    pub fn from_extension(ext: &str) -> Option<Self> {
        if ext.eq_ignore_ascii_case("igc") {
            Some(TrackExtension::Igc)
        } else if ext.eq_ignore_ascii_case("gpx") {
            Some(TrackExtension::Gpx)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackExtension::Igc => "igc",
            TrackExtension::Gpx => "gpx",
        }
    }
}

/// A track file found on disk. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackFile {
    /// File name without directory
    pub name: String,
    /// Absolute path
    pub path: PathBuf,
    pub extension: TrackExtension,
    /// Size in bytes
    pub size: u64,
}

/// Identification fields for one flight, from a track file or a device download.
///
/// `date_iso` and `start_time_utc` are always both present on a valid summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedFlightSummary {
    pub is_valid: bool,
    /// Display date, DD/MM/YYYY
    pub date: String,
    /// YYYY-MM-DD
    #[serde(rename = "dateISO")]
    pub date_iso: String,
    /// First fix time, HH:MM:SS (UTC)
    pub start_time_utc: String,
    /// First fix time shifted to local civil time, HH:MM:SS
    pub takeoff_time_local: String,
    /// Seconds between first and last fix, wrapped across midnight
    pub duration_seconds: u32,
    /// HHhMMmn
    pub duration_str: String,
    pub pilot_name: String,
    pub glider_name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// GNSS altitude of the first fix in meters
    pub altitude: i32,
    /// Local time minus UTC, in minutes
    #[serde(rename = "offsetUTC")]
    pub utc_offset_minutes: i32,
}

impl ParsedFlightSummary {
    /// UTC instant of the first fix in milliseconds, derived from `date_iso` + `start_time_utc`.
    pub fn utc_timestamp_millis(&self) -> Option<i64> {
        utc_millis(&self.date_iso, &self.start_time_utc)
    }
}

/// Combine a `YYYY-MM-DD` date and an `HH:MM:SS` time as a UTC instant.
pub fn utc_millis(date_iso: &str, time: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(&format!("{} {}", date_iso, time), "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc().timestamp_millis())
}

/// Format a duration as `HHhMMmn`. Seconds are dropped.
pub fn format_duration(seconds: u32) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    format!("{:02}h{:02}mn", hours, minutes)
}

/// One flight as listed by a GPSDump device query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpsDumpFlightEntry {
    /// False once the duplicate matcher found it in the logbook
    #[serde(rename = "new")]
    pub is_new: bool,
    /// Device-formatted date (usually DD.MM.YY)
    pub date: String,
    /// HH:MM:SS, already local to the device clock
    #[serde(rename = "takeoff")]
    pub takeoff_time: String,
    /// H:MM:SS or HH:MM:SS
    #[serde(rename = "duration")]
    pub duration_str: String,
    /// `<gps flag>,<port arg>,<model code>`, replayed to download the track
    #[serde(rename = "gpsdump")]
    pub device_order_token: String,
}

impl GpsDumpFlightEntry {
    pub fn new(date: &str, takeoff_time: &str, duration_str: &str, token: &str) -> Self {
        Self {
            is_new: true,
            date: date.to_string(),
            takeoff_time: takeoff_time.to_string(),
            duration_str: duration_str.to_string(),
            device_order_token: token.to_string(),
        }
    }
}

/// An output line no grammar pattern recognised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnrecognizedLine {
    /// 0-based line index in the dump output
    pub index: usize,
    pub text: String,
}

impl fmt::Display for UnrecognizedLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Line {}: {}", self.index, self.text)
    }
}

/// Decoded flight list for one device query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlightListResult {
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    #[serde(rename = "serial")]
    pub serial_number: Option<String>,
    #[serde(rename = "firmware")]
    pub firmware_version: Option<String>,
    pub error: bool,
    pub flights: Vec<GpsDumpFlightEntry>,
    #[serde(rename = "otherlines")]
    pub unrecognized_lines: Vec<UnrecognizedLine>,
}

impl FlightListResult {
    /// Copy of this list with `is_new` taken from positionally aligned verdicts.
    pub fn with_verdicts(&self, verdicts: &[DuplicateVerdict]) -> Self {
        let mut result = self.clone();
        for (flight, verdict) in result.flights.iter_mut().zip(verdicts) {
            flight.is_new = !verdict.is_duplicate;
        }
        result
    }

    /// Number of flights not yet in the logbook.
    pub fn new_flight_count(&self) -> usize {
        self.flights.iter().filter(|f| f.is_new).count()
    }
}

/// A logbook row as seen through the query interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogbookFlightRow {
    pub id: i64,
    /// `YYYY-MM-DD HH:MM:SS`, local takeoff time
    pub timestamp_local: String,
    pub duration_seconds: i64,
    pub latitude: f64,
    pub longitude: f64,
}

/// A parsed track file together with its logbook status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportCandidate {
    pub file: TrackFile,
    pub summary: ParsedFlightSummary,
    #[serde(rename = "existsInDB")]
    pub exists_in_logbook: bool,
}

impl ImportCandidate {
    /// Candidates still to import.
    pub fn to_store(&self) -> bool {
        !self.exists_in_logbook
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "00h00mn");
        assert_eq!(format_duration(1200), "00h20mn");
        assert_eq!(format_duration(3 * 3600 + 41 * 60 + 59), "03h41mn");
    }

    #[test]
    fn test_track_extension_case_insensitive() {
        assert_eq!(TrackExtension::from_extension("IGC"), Some(TrackExtension::Igc));
        assert_eq!(TrackExtension::from_extension("gpx"), Some(TrackExtension::Gpx));
        assert_eq!(TrackExtension::from_extension("kml"), None);
    }

    #[test]
    fn test_utc_timestamp_millis() {
        let summary = ParsedFlightSummary {
            date_iso: "2024-06-18".to_string(),
            start_time_utc: "10:23:45".to_string(),
            ..Default::default()
        };
        assert_eq!(summary.utc_timestamp_millis(), Some(1_718_706_225_000));
        assert_eq!(utc_millis("2024-13-01", "10:00:00"), None);
    }

    #[test]
    fn test_with_verdicts_leaves_original_untouched() {
        let list = FlightListResult {
            flights: vec![
                GpsDumpFlightEntry::new("23.07.20", "06:08:16", "01:21:57", "-gyn,-cu0,flysd"),
                GpsDumpFlightEntry::new("24.07.20", "07:00:00", "00:45:00", "-gyn,-cu0,flysd"),
            ],
            ..Default::default()
        };
        let verdicts = vec![
            DuplicateVerdict { index: 0, is_duplicate: true },
            DuplicateVerdict { index: 1, is_duplicate: false },
        ];

        let checked = list.with_verdicts(&verdicts);
        assert!(!checked.flights[0].is_new);
        assert!(checked.flights[1].is_new);
        assert_eq!(checked.new_flight_count(), 1);
        assert_eq!(list.new_flight_count(), 2);
    }

    #[test]
    fn test_flight_list_json_shape() {
        let list = FlightListResult {
            model: Some("Flymaster GpsSD".to_string()),
            flights: vec![GpsDumpFlightEntry::new(
                "23.07.20",
                "06:08:16",
                "01:21:57",
                "-gyn,-cu0,flysd",
            )],
            unrecognized_lines: vec![UnrecognizedLine {
                index: 2,
                text: "garbage".to_string(),
            }],
            ..Default::default()
        };
        let json = serde_json::to_value(&list).unwrap();
        assert_eq!(json["flights"][0]["takeoff"], "06:08:16");
        assert_eq!(json["flights"][0]["new"], true);
        assert_eq!(json["otherlines"][0]["index"], 2);
    }
}
