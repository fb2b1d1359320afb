//! # Logbook
//!
//! Read-only view of the pilot's logbook. Duplicate detection needs exactly two
//! queries, so the store is consumed through the [`Logbook`] trait:
//!
//! - count of flights whose local takeoff falls in a given minute
//! - all flights whose local takeoff falls in a timestamp range
//!
//! [`SqliteLogbook`] reads the `Vol` table of an existing logbook database.
//! [`InMemoryLogbook`] holds rows directly.

#[cfg(feature = "persistence")]
use std::path::Path;

#[cfg(feature = "persistence")]
use log::debug;

#[cfg(feature = "persistence")]
use rusqlite::{params, types::ValueRef, Connection, OpenFlags};

#[cfg(feature = "persistence")]
use crate::error::IngestError;
use crate::error::Result;
use crate::LogbookFlightRow;

/// Query interface over stored flights. Timestamps are local, `YYYY-MM-DD HH:MM:SS`.
pub trait Logbook {
    /// Number of flights whose takeoff matches `minute_key` (`YYYY-MM-DD HH:MM`).
    fn count_by_local_minute(&self, minute_key: &str) -> Result<u32>;

    /// Flights with `start <= takeoff <= end`, compared as timestamp strings.
    fn rows_in_date_range(&self, start: &str, end: &str) -> Result<Vec<LogbookFlightRow>>;
}

// ============================================================================
// SQLite
// ============================================================================

/// A logbook database opened read-only.
#[cfg(feature = "persistence")]
pub struct SqliteLogbook {
    db: Connection,
}

#[cfg(feature = "persistence")]
impl SqliteLogbook {
    /// Open an existing logbook. A missing file is reported, never created.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(IngestError::LogbookNotFound {
                path: path.to_path_buf(),
            });
        }
        let db = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        debug!("[Duplicates] Opened logbook {}", path.display());
        Ok(Self { db })
    }

    /// Wrap an already open connection.
    pub fn from_connection(db: Connection) -> Self {
        Self { db }
    }
}

#[cfg(feature = "persistence")]
impl Logbook for SqliteLogbook {
    fn count_by_local_minute(&self, minute_key: &str) -> Result<u32> {
        let count: i64 = self.db.query_row(
            "SELECT COUNT(*) FROM Vol WHERE strftime('%Y-%m-%d %H:%M', V_Date) = ?1",
            params![minute_key],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u32)
    }

    fn rows_in_date_range(&self, start: &str, end: &str) -> Result<Vec<LogbookFlightRow>> {
        let mut stmt = self.db.prepare(
            "SELECT V_ID, V_Date, V_Duree, V_LatDeco, V_LongDeco
             FROM Vol WHERE V_Date >= ?1 AND V_Date <= ?2",
        )?;
        let rows = stmt
            .query_map(params![start, end], |row| {
                Ok(LogbookFlightRow {
                    id: row.get(0)?,
                    timestamp_local: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    duration_seconds: seconds_value(row.get_ref(2)?),
                    latitude: row.get::<_, Option<f64>>(3)?.unwrap_or_default(),
                    longitude: row.get::<_, Option<f64>>(4)?.unwrap_or_default(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

/// `V_Duree` is an integer in most logbooks, text in some imports.
#[cfg(feature = "persistence")]
fn seconds_value(value: ValueRef<'_>) -> i64 {
    match value {
        ValueRef::Integer(i) => i,
        ValueRef::Real(f) => f as i64,
        ValueRef::Text(bytes) => leading_integer(&String::from_utf8_lossy(bytes)),
        ValueRef::Null | ValueRef::Blob(_) => 0,
    }
}

/// Digits at the start of `text`, 0 if there are none.
#[cfg(any(feature = "persistence", test))]
fn leading_integer(text: &str) -> i64 {
    let trimmed = text.trim_start();
    let end = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    trimmed[..end].parse().unwrap_or(0)
}

// ============================================================================
// In memory
// ============================================================================

/// Logbook rows held in a vector.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLogbook {
    rows: Vec<LogbookFlightRow>,
}

impl InMemoryLogbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: Vec<LogbookFlightRow>) -> Self {
        Self { rows }
    }

    /// Add a flight at `timestamp_local` lasting `duration_seconds`.
    pub fn push(&mut self, timestamp_local: &str, duration_seconds: i64) {
        let id = self.rows.len() as i64 + 1;
        self.rows.push(LogbookFlightRow {
            id,
            timestamp_local: timestamp_local.to_string(),
            duration_seconds,
            latitude: 0.0,
            longitude: 0.0,
        });
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl Logbook for InMemoryLogbook {
    fn count_by_local_minute(&self, minute_key: &str) -> Result<u32> {
        Ok(self
            .rows
            .iter()
            .filter(|row| row.timestamp_local.get(..16) == Some(minute_key))
            .count() as u32)
    }

    fn rows_in_date_range(&self, start: &str, end: &str) -> Result<Vec<LogbookFlightRow>> {
        Ok(self
            .rows
            .iter()
            .filter(|row| row.timestamp_local.as_str() >= start && row.timestamp_local.as_str() <= end)
            .cloned()
            .collect())
    }
}
