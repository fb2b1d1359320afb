//! # IGC Track Parsing
//!
//! Minimal-read extraction of the fields needed to identify a flight:
//! date, pilot and glider headers, the first fix, and the time of the last fix.
//!
//! The header pass stops at the first B record. The last fix is found by
//! reading only the tail of the file, so a multi-megabyte track costs two
//! small reads.
//!
//! ## Fix record layout
//!
//! ```text
//! B HHMMSS DDMMmmm N DDDMMmmm E A PPPPP GGGGG
//! ```
//!
//! Pressure and GNSS altitudes are five digits, or a minus sign and four digits.

use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use chrono::{NaiveTime, Timelike};
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{IngestError, Result};
use crate::timezone::TimeZoneResolver;
use crate::{format_duration, utc_millis, ParsedFlightSummary};

const SECONDS_PER_DAY: u32 = 86_400;

/// Tail size used when no configuration is supplied.
pub const DEFAULT_TAIL_BYTES: u64 = 4096;

static DATE_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^H.DTE(?:DATE:)?(\d{2})(\d{2})(\d{2})(?:,?(\d{2}))?")
        .expect("date header pattern")
});

static FIX_RECORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^B(\d{2})(\d{2})(\d{2})(\d{2})(\d{2})(\d{3})([NS])(\d{3})(\d{2})(\d{3})([EW])([AV])(\d{5}|-\d{4})(\d{5}|-\d{4})",
    )
    .expect("fix record pattern")
});

static FIX_TIME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^B(\d{2})(\d{2})(\d{2})").expect("fix time pattern"));

// ============================================================================
// Headers
// ============================================================================

/// Flight date from an `H?DTE` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgcDate {
    /// YYYY-MM-DD
    pub iso: String,
    /// DD/MM/YYYY
    pub display: String,
}

/// Expand a two-digit IGC year.
///
/// A leading `8` or `9` means the 1900s, anything else the 2000s. Years from
/// 2080 on therefore read as 1980-1999; this matches what existing logbooks hold.
pub fn expand_year(year_short: &str) -> String {
    let last_century = year_short.starts_with('8') || year_short.starts_with('9');
    format!("{}{}", if last_century { "19" } else { "20" }, year_short)
}

/// Parse `HFDTE180624`, `HFDTEDATE:180624,01` and friends.
pub fn parse_date_header(line: &str) -> Option<IgcDate> {
    let caps = DATE_HEADER.captures(line)?;
    let day = &caps[1];
    let month = &caps[2];
    let year = expand_year(&caps[3]);

    Some(IgcDate {
        iso: format!("{}-{}-{}", year, month, day),
        display: format!("{}/{}/{}", day, month, year),
    })
}

/// Value of a header line: text after the first colon, underscores as spaces, trimmed.
pub fn parse_header_value(line: &str) -> String {
    match line.find(':') {
        Some(idx) if idx > 0 => line[idx + 1..].replace('_', " ").trim().to_string(),
        _ => String::new(),
    }
}

/// Three-letter record subtype at offset 2 (`DTE`, `PLT`, `GTY`, ...).
fn header_code(line: &str) -> Option<&str> {
    line.get(2..5)
}

// ============================================================================
// Fix records
// ============================================================================

/// One decoded B record.
#[derive(Debug, Clone, PartialEq)]
pub struct FixRecord {
    /// UTC time of day
    pub time: NaiveTime,
    /// Decimal degrees, south negative
    pub latitude: f64,
    /// Decimal degrees, west negative
    pub longitude: f64,
    /// `A` (3D fix) rather than `V`
    pub valid: bool,
    pub pressure_altitude: i32,
    pub gnss_altitude: i32,
}

impl FixRecord {
    /// Decode a B record line. Trailing extension fields are ignored.
    pub fn parse(line: &str) -> Option<Self> {
        let caps = FIX_RECORD.captures(line)?;
        let num = |i: usize| caps[i].parse::<u32>().ok();

        let time = NaiveTime::from_hms_opt(num(1)?, num(2)?, num(3)?)?;

        let lat_minutes = (num(5)? * 1000 + num(6)?) as f64 / 1000.0;
        let mut latitude = num(4)? as f64 + lat_minutes / 60.0;
        if &caps[7] == "S" {
            latitude = -latitude;
        }

        let lon_minutes = (num(9)? * 1000 + num(10)?) as f64 / 1000.0;
        let mut longitude = num(8)? as f64 + lon_minutes / 60.0;
        if &caps[11] == "W" {
            longitude = -longitude;
        }

        Some(Self {
            time,
            latitude,
            longitude,
            valid: &caps[12] == "A",
            pressure_altitude: caps[13].parse().ok()?,
            gnss_altitude: caps[14].parse().ok()?,
        })
    }

    /// Encode back into the fixed-width B record layout.
    pub fn encode(&self) -> String {
        let (lat_deg, lat_milli) = split_degrees(self.latitude.abs());
        let (lon_deg, lon_milli) = split_degrees(self.longitude.abs());
        format!(
            "B{}{:02}{:05}{}{:03}{:05}{}{}{}{}",
            self.time.format("%H%M%S"),
            lat_deg,
            lat_milli,
            if self.latitude < 0.0 { 'S' } else { 'N' },
            lon_deg,
            lon_milli,
            if self.longitude < 0.0 { 'W' } else { 'E' },
            if self.valid { 'A' } else { 'V' },
            encode_altitude(self.pressure_altitude),
            encode_altitude(self.gnss_altitude),
        )
    }

    /// HH:MM:SS
    pub fn time_string(&self) -> String {
        self.time.format("%H:%M:%S").to_string()
    }

    /// Seconds since midnight.
    pub fn seconds_of_day(&self) -> u32 {
        self.time.num_seconds_from_midnight()
    }
}

/// Whole degrees and thousandths of a minute, carrying a rounded-up 60'.
fn split_degrees(value: f64) -> (u32, u32) {
    let mut degrees = value.trunc() as u32;
    let mut milli_minutes = ((value - value.trunc()) * 60_000.0).round() as u32;
    if milli_minutes >= 60_000 {
        degrees += 1;
        milli_minutes -= 60_000;
    }
    (degrees, milli_minutes)
}

fn encode_altitude(altitude: i32) -> String {
    if altitude < 0 {
        format!("-{:04}", altitude.unsigned_abs())
    } else {
        format!("{:05}", altitude)
    }
}

/// Seconds since midnight from the time field of a B record.
pub fn fix_time_seconds(line: &str) -> Option<u32> {
    let caps = FIX_TIME.captures(line)?;
    let h: u32 = caps[1].parse().ok()?;
    let m: u32 = caps[2].parse().ok()?;
    let s: u32 = caps[3].parse().ok()?;
    Some(h * 3600 + m * 60 + s)
}

/// Elapsed seconds from `first` to `last`, wrapping a midnight crossing.
pub fn duration_between(first_seconds: u32, last_seconds: u32) -> u32 {
    (last_seconds as i64 - first_seconds as i64).rem_euclid(SECONDS_PER_DAY as i64) as u32
}

// ============================================================================
// Readers
// ============================================================================

/// Header fields and first fix of a track.
#[derive(Debug, Clone, PartialEq)]
pub struct IgcHeader {
    pub date: IgcDate,
    pub pilot: String,
    pub glider: String,
    pub first_fix: FixRecord,
}

/// Header plus the duration measured to the last fix.
#[derive(Debug, Clone, PartialEq)]
pub struct IgcTrackInfo {
    pub header: IgcHeader,
    pub duration_seconds: u32,
}

impl IgcTrackInfo {
    /// Resolve the UTC offset at the first fix and build the flight summary.
    pub fn into_summary(self, resolver: &TimeZoneResolver) -> ParsedFlightSummary {
        let fix = &self.header.first_fix;
        let start_time = fix.time_string();

        let (offset, takeoff_time) = match utc_millis(&self.header.date.iso, &start_time) {
            Some(millis) => {
                let offset = resolver.offset_minutes(fix.latitude, fix.longitude, millis);
                (offset, resolver.local_time(millis, offset))
            }
            None => {
                warn!(
                    "[IgcParser] Unusable date {} {}, keeping UTC takeoff time",
                    self.header.date.iso, start_time
                );
                (0, start_time.clone())
            }
        };

        ParsedFlightSummary {
            is_valid: true,
            date: self.header.date.display,
            date_iso: self.header.date.iso,
            start_time_utc: start_time,
            takeoff_time_local: takeoff_time,
            duration_seconds: self.duration_seconds,
            duration_str: format_duration(self.duration_seconds),
            pilot_name: self.header.pilot,
            glider_name: self.header.glider,
            latitude: fix.latitude,
            longitude: fix.longitude,
            altitude: fix.gnss_altitude,
            utc_offset_minutes: offset,
        }
    }
}

/// Read lines until the first B record.
///
/// Returns `None` when the stream has no date header or no decodable first fix.
/// Bytes that are not UTF-8 (Latin-1 pilot names) are replaced, not rejected.
pub fn read_igc_header<R: BufRead>(mut reader: R) -> Result<Option<IgcHeader>> {
    let mut date = None;
    let mut pilot = String::new();
    let mut glider = String::new();
    let mut first_fix = None;

    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let text = String::from_utf8_lossy(&buf);
        let line = text.trim_end_matches(['\r', '\n']);

        match header_code(line) {
            Some("DTE") => {
                if let Some(parsed) = parse_date_header(line) {
                    date = Some(parsed);
                }
            }
            Some("PLT") => pilot = parse_header_value(line),
            Some("GTY") => glider = parse_header_value(line),
            _ => {}
        }

        if line.starts_with('B') {
            first_fix = FixRecord::parse(line);
            break;
        }
    }

    Ok(match (date, first_fix) {
        (Some(date), Some(first_fix)) => Some(IgcHeader {
            date,
            pilot,
            glider,
            first_fix,
        }),
        _ => None,
    })
}

/// Time of the last B record within the final `tail_bytes` of a file.
pub fn read_last_fix_seconds(path: &Path, tail_bytes: u64) -> Result<Option<u32>> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    let read_size = tail_bytes.min(size);
    file.seek(SeekFrom::Start(size - read_size))?;

    let mut buf = Vec::with_capacity(read_size as usize);
    file.take(read_size).read_to_end(&mut buf)?;

    Ok(last_fix_seconds(&String::from_utf8_lossy(&buf)))
}

/// Time of the last B record in a block of text.
pub fn last_fix_seconds(text: &str) -> Option<u32> {
    text.split('\n')
        .rev()
        .filter(|line| line.starts_with('B'))
        .find_map(fix_time_seconds)
}

/// Header pass plus tail read for a track file, without timezone resolution.
pub fn read_track_info(path: &Path, tail_bytes: u64) -> Result<Option<IgcTrackInfo>> {
    if !path.exists() {
        return Err(IngestError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let header = {
        let file = File::open(path)?;
        read_igc_header(BufReader::new(file))?
    };
    let Some(header) = header else {
        debug!("[IgcParser] No date header or fix in {}", path.display());
        return Ok(None);
    };

    let duration_seconds = match read_last_fix_seconds(path, tail_bytes) {
        Ok(Some(last)) => duration_between(header.first_fix.seconds_of_day(), last),
        Ok(None) => 0,
        Err(e) => {
            warn!("[IgcParser] Tail read failed for {}: {}", path.display(), e);
            0
        }
    };

    Ok(Some(IgcTrackInfo {
        header,
        duration_seconds,
    }))
}

/// Parse a track file into a flight summary.
///
/// `Ok(None)` means the file is readable but not an identifiable flight.
pub fn parse_igc_file(
    path: &Path,
    tail_bytes: u64,
    resolver: &TimeZoneResolver,
) -> Result<Option<ParsedFlightSummary>> {
    Ok(read_track_info(path, tail_bytes)?.map(|info| info.into_summary(resolver)))
}

/// Track info from IGC text already in memory (device downloads).
pub fn track_info_from_text(text: &str) -> Option<IgcTrackInfo> {
    let header = read_igc_header(Cursor::new(text.as_bytes())).ok()??;
    let duration_seconds = last_fix_seconds(text)
        .map(|last| duration_between(header.first_fix.seconds_of_day(), last))
        .unwrap_or(0);
    Some(IgcTrackInfo {
        header,
        duration_seconds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timezone::FixedZoneLookup;
    use std::io::Write;

    const SAMPLE: &str = "AXCTABCDEF\r\n\
HFDTEDATE:180624,01\r\n\
HFPLTPILOTINCHARGE:JOHN_DOE\r\n\
HFGTYGLIDERTYPE:Ozone_Rush 6 \r\n\
B1023454553000N00612000EA0123401250\r\n\
B1023504553010N00612010EA0123501251\r\n\
B1405104553500N00612500EA0090000910\r\n\
LXCT end\r\n";

    fn utc_resolver() -> TimeZoneResolver {
        TimeZoneResolver::new(Box::new(FixedZoneLookup::new("UTC")))
    }

    #[test]
    fn test_century_inference() {
        assert_eq!(expand_year("79"), "2079");
        assert_eq!(expand_year("80"), "1980");
        assert_eq!(expand_year("99"), "1999");
        assert_eq!(expand_year("00"), "2000");
        assert_eq!(expand_year("05"), "2005");
    }

    #[test]
    fn test_date_header_variants() {
        let date = parse_date_header("HFDTE180624").unwrap();
        assert_eq!(date.iso, "2024-06-18");
        assert_eq!(date.display, "18/06/2024");

        let date = parse_date_header("HFDTEDATE:010898,02").unwrap();
        assert_eq!(date.iso, "1998-08-01");

        assert!(parse_date_header("HPDTE150379").is_some());
        assert!(parse_date_header("HFDTEDATE:1806").is_none());
        assert!(parse_date_header("HFPLTPILOT:x").is_none());
    }

    #[test]
    fn test_header_value() {
        assert_eq!(parse_header_value("HFPLTPILOTINCHARGE:JOHN_DOE"), "JOHN DOE");
        assert_eq!(parse_header_value("HFGTYGLIDERTYPE:  Ozone_Rush_6  "), "Ozone Rush 6");
        assert_eq!(parse_header_value("HFPLTPILOTINCHARGE"), "");
        assert_eq!(parse_header_value(":leading"), "");
    }

    #[test]
    fn test_fix_record_parse() {
        let fix = FixRecord::parse("B1023454553000N00612000EA0123401250").unwrap();
        assert_eq!(fix.time_string(), "10:23:45");
        assert!((fix.latitude - 45.883333).abs() < 1e-5);
        assert!((fix.longitude - 6.2).abs() < 1e-5);
        assert!(fix.valid);
        assert_eq!(fix.pressure_altitude, 1234);
        assert_eq!(fix.gnss_altitude, 1250);
    }

    #[test]
    fn test_fix_record_hemispheres_and_negative_altitude() {
        let fix = FixRecord::parse("B0000003330000S07030000WV-0012-0015").unwrap();
        assert!((fix.latitude + 33.5).abs() < 1e-9);
        assert!((fix.longitude + 70.5).abs() < 1e-9);
        assert!(!fix.valid);
        assert_eq!(fix.gnss_altitude, -15);
    }

    #[test]
    fn test_fix_record_round_trip() {
        let original = FixRecord {
            time: NaiveTime::from_hms_opt(14, 5, 10).unwrap(),
            latitude: -22.906847,
            longitude: -43.172897,
            valid: true,
            pressure_altitude: -25,
            gnss_altitude: 2817,
        };
        let line = original.encode();
        assert_eq!(line.len(), 35);

        let decoded = FixRecord::parse(&line).unwrap();
        assert_eq!(decoded.time, original.time);
        assert!((decoded.latitude - original.latitude).abs() < 1e-5);
        assert!((decoded.longitude - original.longitude).abs() < 1e-5);
        assert_eq!(decoded.pressure_altitude, -25);
        assert_eq!(decoded.gnss_altitude, 2817);
        assert_eq!(decoded.encode(), line);
    }

    #[test]
    fn test_duration_midnight_wrap() {
        let first = fix_time_seconds("B235000").unwrap();
        let last = fix_time_seconds("B001000").unwrap();
        assert_eq!(duration_between(first, last), 1200);
        assert_eq!(duration_between(last, last), 0);
    }

    #[test]
    fn test_read_header_stops_at_first_fix() {
        let header = read_igc_header(Cursor::new(SAMPLE.as_bytes())).unwrap().unwrap();
        assert_eq!(header.date.iso, "2024-06-18");
        assert_eq!(header.pilot, "JOHN DOE");
        assert_eq!(header.glider, "Ozone Rush 6");
        assert_eq!(header.first_fix.time_string(), "10:23:45");
    }

    #[test]
    fn test_missing_date_is_no_summary() {
        let text = "HFPLTPILOT:Someone\nB1023454553000N00612000EA0123401250\n";
        assert!(read_igc_header(Cursor::new(text.as_bytes())).unwrap().is_none());
    }

    #[test]
    fn test_missing_fix_is_no_summary() {
        let text = "HFDTE180624\nHFPLTPILOT:Someone\n";
        assert!(read_igc_header(Cursor::new(text.as_bytes())).unwrap().is_none());
    }

    #[test]
    fn test_header_after_first_fix_ignored() {
        let text = "HFDTE180624\nB1023454553000N00612000EA0123401250\nHFPLTPILOT:Late\n";
        let header = read_igc_header(Cursor::new(text.as_bytes())).unwrap().unwrap();
        assert_eq!(header.pilot, "");
    }

    #[test]
    fn test_last_fix_from_text() {
        assert_eq!(last_fix_seconds(SAMPLE), Some(14 * 3600 + 5 * 60 + 10));
        assert_eq!(last_fix_seconds("no fixes\n"), None);
    }

    #[test]
    fn test_parse_igc_file_end_to_end() {
        let mut file = tempfile::Builder::new().suffix(".igc").tempfile().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let summary = parse_igc_file(file.path(), DEFAULT_TAIL_BYTES, &utc_resolver())
            .unwrap()
            .unwrap();
        assert!(summary.is_valid);
        assert_eq!(summary.date_iso, "2024-06-18");
        assert_eq!(summary.date, "18/06/2024");
        assert_eq!(summary.pilot_name, "JOHN DOE");
        assert_eq!(summary.start_time_utc, "10:23:45");
        assert_eq!(summary.takeoff_time_local, "10:23:45");
        assert_eq!(summary.duration_seconds, 13_285);
        assert_eq!(summary.duration_str, "03h41mn");
        assert_eq!(summary.altitude, 1250);
    }

    #[test]
    fn test_tail_read_smaller_than_file() {
        let mut text = String::from("HFDTE180624\n");
        for i in 0..500 {
            text.push_str(&format!("B10{:02}{:02}4553000N00612000EA0123401250\n", i / 60 % 60, i % 60));
        }
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();

        let last = read_last_fix_seconds(file.path(), 256).unwrap();
        assert_eq!(last, Some(10 * 3600 + 8 * 60 + 19));
    }

    #[test]
    fn test_missing_file_is_error() {
        let err = read_track_info(Path::new("/nonexistent/track.igc"), 4096).unwrap_err();
        assert!(matches!(err, IngestError::FileNotFound { .. }));
    }
}
