//! Duplicate detection against the logbook.
//!
//! Two strategies, chosen by where the candidate came from:
//!
//! - **Exact**: track files know their takeoff to the minute, so a candidate
//!   exists when the logbook has a flight at the same local `YYYY-MM-DD HH:MM`.
//! - **Fuzzy**: device listings carry a clock that may have drifted from the
//!   logbook. A candidate matches a flight of the same day when its
//!   minute-and-second offsets are close and the durations agree once the
//!   offset difference is taken out.
//!
//! Neither strategy fails a batch: a candidate whose query errors is reported
//! as not found.

use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::logbook::Logbook;
use crate::GpsDumpFlightEntry;

/// Raw differences above this are assumed to straddle an hour boundary.
pub const HOUR_WRAP_THRESHOLD_SECS: i64 = 300;

/// Largest wrapped difference still accepted.
pub const WRAPPED_TOLERANCE_SECS: i64 = 360;

/// Largest duration disagreement still accepted.
pub const DURATION_TOLERANCE_SECS: i64 = 180;

static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("iso date pattern"));

static SLASH_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{2})/(\d{2})/(\d{4})$").expect("slash date pattern"));

static MINUTE_SECOND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r":([0-5][0-9]):([0-5][0-9])").expect("minute second pattern"));

// ============================================================================
// Exact
// ============================================================================

/// Identification fields of a flight to look up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlightCheckRequest {
    /// DD/MM/YYYY or YYYY-MM-DD
    pub date: String,
    #[serde(rename = "dateISO")]
    pub date_iso: String,
    /// HH:MM:SS, UTC
    pub start_time: String,
    /// HH:MM:SS, local. Preferred over `start_time` when set.
    pub takeoff_time: Option<String>,
}

impl FlightCheckRequest {
    pub fn from_summary(summary: &crate::ParsedFlightSummary) -> Self {
        Self {
            date: summary.date.clone(),
            date_iso: summary.date_iso.clone(),
            start_time: summary.start_time_utc.clone(),
            takeoff_time: Some(summary.takeoff_time_local.clone()).filter(|t| !t.is_empty()),
        }
    }

    /// `YYYY-MM-DD HH:MM` lookup key, or `None` when date or time is missing.
    pub fn minute_key(&self) -> Option<String> {
        let date = normalize_date_to_iso(&self.date, &self.date_iso);
        let time = self
            .takeoff_time
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.start_time);
        let minute: String = time.chars().take(5).collect();

        if date.is_empty() || minute.is_empty() {
            None
        } else {
            Some(format!("{} {}", date, minute))
        }
    }
}

/// Outcome for one request, positionally aligned with the input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightCheckResult {
    pub exists: bool,
}

/// Canonical `YYYY-MM-DD` date.
///
/// A well-formed `date_iso` wins. Otherwise `DD/MM/YYYY` is reordered, and
/// anything else is returned unchanged.
pub fn normalize_date_to_iso(date: &str, date_iso: &str) -> String {
    if ISO_DATE.is_match(date_iso) {
        return date_iso.to_string();
    }
    if let Some(caps) = SLASH_DATE.captures(date) {
        return format!("{}-{}-{}", &caps[3], &caps[2], &caps[1]);
    }
    date.to_string()
}

/// Look up one flight by its local takeoff minute.
pub fn check_flight_exists(logbook: &dyn Logbook, request: &FlightCheckRequest) -> FlightCheckResult {
    let Some(key) = request.minute_key() else {
        debug!("[Duplicates] Missing date or time: {:?}", request);
        return FlightCheckResult { exists: false };
    };

    match logbook.count_by_local_minute(&key) {
        Ok(count) => {
            let exists = count > 0;
            debug!(
                "[Duplicates] {} -> {}",
                key,
                if exists { "EXISTS" } else { "NEW" }
            );
            FlightCheckResult { exists }
        }
        Err(e) => {
            warn!("[Duplicates] Lookup failed for {}: {}", key, e);
            FlightCheckResult { exists: false }
        }
    }
}

/// Check a batch of flights. Without a logbook every flight is new.
pub fn check_flights_batch(
    logbook: Option<&dyn Logbook>,
    requests: &[FlightCheckRequest],
) -> Vec<FlightCheckResult> {
    let Some(logbook) = logbook else {
        info!("[Duplicates] No logbook, marking {} flights as new", requests.len());
        return vec![FlightCheckResult { exists: false }; requests.len()];
    };

    let results: Vec<FlightCheckResult> = requests
        .iter()
        .map(|request| check_flight_exists(logbook, request))
        .collect();

    info!(
        "[Duplicates] Found {}/{} existing flights",
        results.iter().filter(|r| r.exists).count(),
        requests.len()
    );
    results
}

// ============================================================================
// Fuzzy
// ============================================================================

/// Whether the device flight at `index` is already in the logbook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateVerdict {
    pub index: usize,
    pub is_duplicate: bool,
}

/// Device date `DD.MM.YY` (or `DD.MM.YYYY`) as `YYYY-MM-DD`.
pub fn device_date_to_iso(date: &str) -> Option<String> {
    let parts: Vec<&str> = date.split('.').collect();
    let [day, month, year] = parts.as_slice() else {
        return None;
    };
    let year = if year.len() == 4 {
        year.to_string()
    } else {
        format!("20{}", year)
    };
    Some(format!("{}-{}-{}", year, month, day))
}

/// Parse `H:MM:SS` into its three components.
fn clock_parts(value: &str) -> Option<(i64, i64, i64)> {
    let mut parts = value.split(':');
    let (Some(h), Some(m), Some(s)) = (parts.next(), parts.next(), parts.next()) else {
        return None;
    };
    Some((
        h.trim().parse().ok()?,
        m.trim().parse().ok()?,
        s.trim().parse().ok()?,
    ))
}

/// Minutes and seconds past the hour of a logbook timestamp.
fn minute_second_offset(timestamp: &str) -> Option<i64> {
    let caps = MINUTE_SECOND.captures(timestamp)?;
    let minutes: i64 = caps[1].parse().ok()?;
    let seconds: i64 = caps[2].parse().ok()?;
    Some(minutes * 60 + seconds)
}

/// Apply the hour-boundary correction to a raw offset difference.
///
/// Returns the difference to use for the duration check and whether the
/// takeoff times are close enough. Differences up to 300 s (negative ones
/// included) pass as they are; larger ones are taken as `3600 - diff` and
/// pass below 360 s.
pub fn time_check(raw_diff: i64) -> (i64, bool) {
    if raw_diff > HOUR_WRAP_THRESHOLD_SECS {
        let wrapped = 3600 - raw_diff;
        (wrapped, wrapped < WRAPPED_TOLERANCE_SECS)
    } else {
        (raw_diff, true)
    }
}

/// `|(candidate - diff) - existing| < 180`.
pub fn within_duration(candidate_secs: i64, diff: i64, existing_secs: i64) -> bool {
    ((candidate_secs - diff) - existing_secs).abs() < DURATION_TOLERANCE_SECS
}

/// Fuzzy test of one device flight against one logbook row.
fn matches_row(takeoff_offset: i64, candidate_duration: i64, row_timestamp: &str, row_duration: i64) -> bool {
    let Some(row_offset) = minute_second_offset(row_timestamp) else {
        return false;
    };
    let (diff, time_ok) = time_check(row_offset - takeoff_offset);
    time_ok && within_duration(candidate_duration, diff, row_duration)
}

/// Fuzzy verdict for one device flight. Unparseable fields mean "not a duplicate".
fn is_duplicate(logbook: &dyn Logbook, flight: &GpsDumpFlightEntry) -> bool {
    let Some(date) = device_date_to_iso(&flight.date) else {
        return false;
    };
    let Some((_, minutes, seconds)) = clock_parts(&flight.takeoff_time) else {
        return false;
    };
    let Some((dh, dm, ds)) = clock_parts(&flight.duration_str) else {
        return false;
    };
    let takeoff_offset = minutes * 60 + seconds;
    let candidate_duration = dh * 3600 + dm * 60 + ds;

    let start = format!("{} 00:00:00", date);
    let end = format!("{} 23:59:59", date);
    let rows = match logbook.rows_in_date_range(&start, &end) {
        Ok(rows) => rows,
        Err(e) => {
            warn!("[Duplicates] Day query failed for {}: {}", date, e);
            return false;
        }
    };

    rows.iter().any(|row| {
        matches_row(
            takeoff_offset,
            candidate_duration,
            &row.timestamp_local,
            row.duration_seconds,
        )
    })
}

/// Fuzzy-match device flights against the logbook, one verdict per entry.
///
/// Entries are not modified; apply the verdicts with
/// [`FlightListResult::with_verdicts`](crate::FlightListResult::with_verdicts).
pub fn match_device_flights(
    logbook: &dyn Logbook,
    flights: &[GpsDumpFlightEntry],
) -> Vec<DuplicateVerdict> {
    let verdicts: Vec<DuplicateVerdict> = flights
        .iter()
        .enumerate()
        .map(|(index, flight)| DuplicateVerdict {
            index,
            is_duplicate: is_duplicate(logbook, flight),
        })
        .collect();

    info!(
        "[Duplicates] {}/{} device flights already in logbook",
        verdicts.iter().filter(|v| v.is_duplicate).count(),
        flights.len()
    );
    verdicts
}
