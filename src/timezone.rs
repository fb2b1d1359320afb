//! Timezone resolution for takeoff times.
//!
//! Two steps: coordinates to an IANA zone name, then the zone's civil offset
//! at the given instant (so DST is taken from the date of the flight, not from
//! today). Lookup failures degrade to an offset of 0.

use chrono::{DateTime, FixedOffset, Offset, Utc};
use chrono_tz::Tz;
use log::{debug, warn};
use once_cell::sync::Lazy;
use tzf_rs::DefaultFinder;

static FINDER: Lazy<DefaultFinder> = Lazy::new(DefaultFinder::new);

/// Maps a coordinate to an IANA timezone name.
pub trait ZoneLookup: Send + Sync {
    fn zone_name(&self, latitude: f64, longitude: f64) -> Option<String>;
}

/// Offline polygon lookup backed by `tzf-rs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct GeographicZoneLookup;

impl ZoneLookup for GeographicZoneLookup {
    fn zone_name(&self, latitude: f64, longitude: f64) -> Option<String> {
        let name = FINDER.get_tz_name(longitude, latitude);
        if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        }
    }
}

/// Always answers with the same zone. Useful when every flight shares a region.
#[derive(Debug, Clone)]
pub struct FixedZoneLookup {
    zone: String,
}

impl FixedZoneLookup {
    pub fn new(zone: &str) -> Self {
        Self {
            zone: zone.to_string(),
        }
    }
}

impl ZoneLookup for FixedZoneLookup {
    fn zone_name(&self, _latitude: f64, _longitude: f64) -> Option<String> {
        Some(self.zone.clone())
    }
}

/// Outcome of an offset lookup before it is collapsed for callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetResolution {
    /// Local time minus UTC, in minutes
    Resolved(i32),
    Unresolved,
}

impl OffsetResolution {
    pub fn minutes_or_zero(self) -> i32 {
        match self {
            OffsetResolution::Resolved(minutes) => minutes,
            OffsetResolution::Unresolved => 0,
        }
    }
}

/// Coordinate + instant to UTC offset, and UTC instant to local clock time.
pub struct TimeZoneResolver {
    lookup: Box<dyn ZoneLookup>,
}

impl Default for TimeZoneResolver {
    fn default() -> Self {
        Self::geographic()
    }
}

impl TimeZoneResolver {
    pub fn new(lookup: Box<dyn ZoneLookup>) -> Self {
        Self { lookup }
    }

    /// Resolver using the bundled timezone polygons.
    pub fn geographic() -> Self {
        Self::new(Box::new(GeographicZoneLookup))
    }

    /// Typed lookup result.
    pub fn resolve(&self, latitude: f64, longitude: f64, utc_millis: i64) -> OffsetResolution {
        if !latitude.is_finite() || !longitude.is_finite() {
            return OffsetResolution::Unresolved;
        }

        let Some(zone_name) = self.lookup.zone_name(latitude, longitude) else {
            debug!("[TimeZone] No zone for ({:.5}, {:.5})", latitude, longitude);
            return OffsetResolution::Unresolved;
        };

        let Ok(zone) = zone_name.parse::<Tz>() else {
            debug!("[TimeZone] Unknown zone name {}", zone_name);
            return OffsetResolution::Unresolved;
        };

        match DateTime::<Utc>::from_timestamp_millis(utc_millis) {
            Some(instant) => {
                let seconds = instant.with_timezone(&zone).offset().fix().local_minus_utc();
                OffsetResolution::Resolved(seconds / 60)
            }
            None => OffsetResolution::Unresolved,
        }
    }

    /// Offset in minutes, positive east of Greenwich. Failures give 0.
    pub fn offset_minutes(&self, latitude: f64, longitude: f64, utc_millis: i64) -> i32 {
        let resolution = self.resolve(latitude, longitude, utc_millis);
        if resolution == OffsetResolution::Unresolved {
            warn!(
                "[TimeZone] Offset unresolved at ({:.5}, {:.5}), using UTC",
                latitude, longitude
            );
        }
        resolution.minutes_or_zero()
    }

    /// Wall-clock `HH:MM:SS` of `utc_millis` shifted by `offset_minutes`.
    pub fn local_time(&self, utc_millis: i64, offset_minutes: i32) -> String {
        local_time(utc_millis, offset_minutes)
    }
}

/// Wall-clock `HH:MM:SS` of `utc_millis` shifted by `offset_minutes`. The date part is dropped.
pub fn local_time(utc_millis: i64, offset_minutes: i32) -> String {
    let Some(instant) = DateTime::<Utc>::from_timestamp_millis(utc_millis) else {
        return "00:00:00".to_string();
    };
    let offset = FixedOffset::east_opt(offset_minutes * 60)
        .unwrap_or_else(|| Utc.fix());
    instant.with_timezone(&offset).format("%H:%M:%S").to_string()
}
