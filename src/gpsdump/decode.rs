//! GPSDump flight-list grammars.
//!
//! One decoding function per output layout, chosen from the platform and
//! device model. A line is a product banner, a flight, or a diagnostic; a
//! malformed line never fails the list.
//!
//! | Grammar | Produced by | Flight line |
//! |---|---|---|
//! | `Semicolon` | Flytec 6015 on mac64/linux | `1; 21.06.25; 14:38:50;        1; 00:17:45;` |
//! | `LabeledFixedWidth` | mac64/linux | `1   23.07.20   06:08:16   01:21:57` |
//! | `Prose` | mac32 | `1 Flight date 29.07.22, time 06:00:54, duration 00:00:34` |
//! | `CommaReordered` | win | `2022.06.18,13:06:13,1:25:54` |

use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;

use super::{model_display_name, DeviceModel, Platform};
use crate::error::{IngestError, Result};
use crate::{FlightListResult, GpsDumpFlightEntry, UnrecognizedLine};

static PRODUCT_BANNER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(Product:)[ ]{1,}(\w*)[ ]{1,}(\S*)[ ]{1,}(\S*)[ ]{1,}(\S*)")
        .expect("product banner pattern")
});

static LABELED_FLIGHT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"((\d{1,2}\.){2}\d{2}(\d{2})?)[ ]{1,}((\d{1,2}:){2}\d{2}(\d{2})?)[ ]{1,}((\d{1,2}:){2}\d{2}(\d{2})?)",
    )
    .expect("labeled flight pattern")
});

static PROSE_FLIGHT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"Flight date ([0-9]+(\.[0-9]+)+), time ([0-9]+(:[0-9]+)+), duration ([0-9]+(:[0-9]+)+)",
    )
    .expect("prose flight pattern")
});

static COMMA_FLIGHT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"((\d{1,2}\.){2}\d{2}(\d{2})?)[,]{1,}((\d{1,2}:){2}\d{2}(\d{2})?)[,]{1,}((\d{1,2}:){2}\d{2}(\d{2})?)",
    )
    .expect("comma flight pattern")
});

static SEMICOLON_FLIGHT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([^;]*);([^;]*);([^;]*);([^;]*);([^;]*);").expect("semicolon flight pattern")
});

/// Device identity printed by the labeled layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductBanner {
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    pub firmware_version: String,
}

/// What one output line turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedLine {
    Banner(ProductBanner),
    Flight(GpsDumpFlightEntry),
}

/// Flight-list output layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grammar {
    Semicolon,
    LabeledFixedWidth,
    Prose,
    CommaReordered,
}

impl Grammar {
    /// Layout for a platform/model pair. The Flytec 6015 layout wins where it applies.
    pub fn select(platform: Platform, model_code: &str) -> Self {
        let flytec15 = model_code == DeviceModel::Flytec15.code();
        match platform {
            Platform::Mac64 | Platform::Linux if flytec15 => Grammar::Semicolon,
            Platform::Mac64 | Platform::Linux => Grammar::LabeledFixedWidth,
            Platform::Mac32 => Grammar::Prose,
            Platform::Windows => Grammar::CommaReordered,
        }
    }

    /// Index of the first line worth decoding. Prose and comma output open with a title line.
    pub fn first_line(&self) -> usize {
        match self {
            Grammar::Prose | Grammar::CommaReordered => 1,
            Grammar::Semicolon | Grammar::LabeledFixedWidth => 0,
        }
    }

    /// Decode one line, `None` if it is neither banner nor flight.
    pub fn decode_line(&self, line: &str, token: &str) -> Option<DecodedLine> {
        match self {
            Grammar::Semicolon => decode_semicolon(line, token),
            Grammar::LabeledFixedWidth => decode_labeled(line, token),
            Grammar::Prose => decode_prose(line, token),
            Grammar::CommaReordered => decode_comma(line, token),
        }
    }
}

fn decode_labeled(line: &str, token: &str) -> Option<DecodedLine> {
    if let Some(caps) = PRODUCT_BANNER.captures(line) {
        return Some(DecodedLine::Banner(ProductBanner {
            manufacturer: caps[2].to_string(),
            model: format!("{} {}", &caps[2], &caps[3]),
            serial_number: caps[4].to_string(),
            firmware_version: caps[5].to_string(),
        }));
    }
    let caps = LABELED_FLIGHT.captures(line)?;
    Some(DecodedLine::Flight(GpsDumpFlightEntry::new(
        &caps[1], &caps[4], &caps[7], token,
    )))
}

fn decode_prose(line: &str, token: &str) -> Option<DecodedLine> {
    let caps = PROSE_FLIGHT.captures(line)?;
    Some(DecodedLine::Flight(GpsDumpFlightEntry::new(
        &caps[1], &caps[3], &caps[5], token,
    )))
}

fn decode_comma(line: &str, token: &str) -> Option<DecodedLine> {
    let caps = COMMA_FLIGHT.captures(line)?;
    Some(DecodedLine::Flight(GpsDumpFlightEntry::new(
        &reorder_dotted_date(&caps[1]),
        &caps[4],
        &caps[7],
        token,
    )))
}

fn decode_semicolon(line: &str, token: &str) -> Option<DecodedLine> {
    let caps = SEMICOLON_FLIGHT.captures(line)?;
    Some(DecodedLine::Flight(GpsDumpFlightEntry::new(
        &swap_date_fields(&caps[2]),
        caps[3].trim(),
        caps[5].trim(),
        token,
    )))
}

/// `YY.MM.DD` to `DD.MM.YY` by fixed slices: `[6..] + [2..6] + [0..2]`.
///
/// Assumes two-digit components. A four-digit year comes out scrambled.
pub fn reorder_dotted_date(date: &str) -> String {
    format!(
        "{}{}{}",
        date.get(6..).unwrap_or_default(),
        date.get(2..6).unwrap_or_default(),
        date.get(0..2).unwrap_or_default()
    )
}

/// Reverse the three dot-separated fields, trimming each. Other shapes pass through.
fn swap_date_fields(date: &str) -> String {
    let parts: Vec<&str> = date.split('.').collect();
    if parts.len() == 3 {
        format!("{}.{}.{}", parts[2].trim(), parts[1].trim(), parts[0].trim())
    } else {
        date.to_string()
    }
}

/// Decode raw GPSDump output into a flight list.
///
/// Only empty output is an error. Unmatched lines are kept as diagnostics
/// tagged with their 0-based index.
pub fn decode_flight_list(
    output: &str,
    model_code: &str,
    platform: Platform,
    token: &str,
) -> Result<FlightListResult> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Err(IngestError::EmptyResponse);
    }

    let grammar = Grammar::select(platform, model_code);
    let lines: Vec<&str> = trimmed.lines().collect();
    debug!(
        "[GpsDump] Decoding {} lines for {} with {:?}",
        lines.len(),
        model_code,
        grammar
    );

    let mut result = FlightListResult {
        model: Some(model_display_name(model_code)),
        ..Default::default()
    };

    for (index, line) in lines.iter().enumerate().skip(grammar.first_line()) {
        match grammar.decode_line(line, token) {
            Some(DecodedLine::Banner(banner)) => {
                result.manufacturer = Some(banner.manufacturer);
                result.model = Some(banner.model);
                result.serial_number = Some(banner.serial_number);
                result.firmware_version = Some(banner.firmware_version);
            }
            Some(DecodedLine::Flight(entry)) => result.flights.push(entry),
            None => result.unrecognized_lines.push(UnrecognizedLine {
                index,
                text: line.to_string(),
            }),
        }
    }

    info!("[GpsDump] Decoded {} flights", result.flights.len());
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "-gyn,-cu0,flysd";

    #[test]
    fn test_grammar_selection() {
        assert_eq!(Grammar::select(Platform::Linux, "fly15"), Grammar::Semicolon);
        assert_eq!(Grammar::select(Platform::Mac64, "fly15"), Grammar::Semicolon);
        assert_eq!(Grammar::select(Platform::Windows, "fly15"), Grammar::CommaReordered);
        assert_eq!(Grammar::select(Platform::Mac32, "fly15"), Grammar::Prose);
        assert_eq!(Grammar::select(Platform::Linux, "flysd"), Grammar::LabeledFixedWidth);
        assert_eq!(Grammar::select(Platform::Mac64, "fly20"), Grammar::LabeledFixedWidth);
    }

    #[test]
    fn test_labeled_banner_and_flights() {
        let output = "Product: Flymaster GpsSD  SN02988  SW2.03h\n\
                      1   23.07.20   06:08:16   01:21:57\n\
                      2   22.07.20   14:10:02   0:45:10\n";
        let list = decode_flight_list(output, "flysd", Platform::Linux, TOKEN).unwrap();

        assert_eq!(list.manufacturer.as_deref(), Some("Flymaster"));
        assert_eq!(list.model.as_deref(), Some("Flymaster GpsSD"));
        assert_eq!(list.serial_number.as_deref(), Some("SN02988"));
        assert_eq!(list.firmware_version.as_deref(), Some("SW2.03h"));
        assert_eq!(list.flights.len(), 2);
        assert_eq!(list.flights[0].date, "23.07.20");
        assert_eq!(list.flights[0].takeoff_time, "06:08:16");
        assert_eq!(list.flights[0].duration_str, "01:21:57");
        assert_eq!(list.flights[1].duration_str, "0:45:10");
        assert!(list.flights.iter().all(|f| f.is_new && f.device_order_token == TOKEN));
        assert!(list.unrecognized_lines.is_empty());
    }

    #[test]
    fn test_malformed_line_becomes_indexed_diagnostic() {
        let output = "Product: Flymaster GpsSD  SN02988  SW2.03h\n\
                      1   23.07.20   06:08:16   01:21:57\n\
                      Reading flight memory...\n\
                      2   22.07.20   14:10:02   00:45:10\n\
                      3   21.07.20   11:00:00   02:00:00";
        let list = decode_flight_list(output, "flysd", Platform::Mac64, TOKEN).unwrap();

        assert_eq!(list.flights.len(), 3);
        assert_eq!(list.unrecognized_lines.len(), 1);
        assert_eq!(list.unrecognized_lines[0].index, 2);
        assert_eq!(list.unrecognized_lines[0].text, "Reading flight memory...");
        assert_eq!(
            list.unrecognized_lines[0].to_string(),
            "Line 2: Reading flight memory..."
        );
        let dates: Vec<&str> = list.flights.iter().map(|f| f.date.as_str()).collect();
        assert_eq!(dates, vec!["23.07.20", "22.07.20", "21.07.20"]);
    }

    #[test]
    fn test_prose_skips_title_line() {
        let output = "GpsDump flight list\n\
                      1 Flight date 29.07.22, time 06:00:54, duration 00:00:34\n\
                      ???\n\
                      2 Flight date 28.07.22, time 13:20:00, duration 01:10:00\n\
                      3 Flight date 27.07.22, time 12:00:00, duration 00:30:00";
        let list = decode_flight_list(output, "flyold", Platform::Mac32, TOKEN).unwrap();

        assert_eq!(list.flights.len(), 3);
        assert_eq!(list.flights[0].date, "29.07.22");
        assert_eq!(list.flights[0].takeoff_time, "06:00:54");
        assert_eq!(list.flights[0].duration_str, "00:00:34");
        assert_eq!(list.unrecognized_lines.len(), 1);
        assert_eq!(list.unrecognized_lines[0].index, 2);
        assert!(list.manufacturer.is_none());
        assert_eq!(list.model.as_deref(), Some("flyold"));
    }

    #[test]
    fn test_comma_reorders_date() {
        let output = "Flight list\n2022.06.18,13:06:13,1:25:54\n2022.06.17,09:00:00,0:05:00\n";
        let list = decode_flight_list(output, "fly20", Platform::Windows, TOKEN).unwrap();

        assert_eq!(list.model.as_deref(), Some("Flytec 20/30 Compeo"));
        assert_eq!(list.flights.len(), 2);
        assert_eq!(list.flights[0].date, "18.06.22");
        assert_eq!(list.flights[0].takeoff_time, "13:06:13");
        assert_eq!(list.flights[0].duration_str, "1:25:54");
        assert_eq!(list.flights[1].date, "17.06.22");
    }

    #[test]
    fn test_reorder_dotted_date_slicing() {
        assert_eq!(reorder_dotted_date("22.06.18"), "18.06.22");
        // four-digit years are not handled
        assert_eq!(reorder_dotted_date("18.06.2022"), "2022.06.18");
        assert_eq!(reorder_dotted_date("1."), "1.");
    }

    #[test]
    fn test_semicolon_layout() {
        let output = "1; 21.06.25; 14:38:50;        1; 00:17:45;\r\n\
                      2; 21.06.24; 10:00:00;        2; 01:02:03;\r\n\
                      end of list\r\n";
        let list = decode_flight_list(output, "fly15", Platform::Linux, TOKEN).unwrap();

        assert_eq!(list.model.as_deref(), Some("Flytec 6015 / Brau IQ basic"));
        assert_eq!(list.flights.len(), 2);
        assert_eq!(list.flights[0].date, "25.06.21");
        assert_eq!(list.flights[0].takeoff_time, "14:38:50");
        assert_eq!(list.flights[0].duration_str, "00:17:45");
        assert_eq!(list.unrecognized_lines.len(), 1);
        assert_eq!(list.unrecognized_lines[0].index, 2);
        assert_eq!(list.unrecognized_lines[0].text, "end of list");
    }

    #[test]
    fn test_empty_output_is_hard_failure() {
        let err = decode_flight_list("  \n\n", "flysd", Platform::Linux, TOKEN).unwrap_err();
        assert!(matches!(err, IngestError::EmptyResponse));
    }

    #[test]
    fn test_decoding_is_deterministic() {
        let output = "x\n1 Flight date 29.07.22, time 06:00:54, duration 00:00:34\n";
        let a = decode_flight_list(output, "fly20", Platform::Mac32, TOKEN).unwrap();
        let b = decode_flight_list(output, "fly20", Platform::Mac32, TOKEN).unwrap();
        assert_eq!(a, b);
    }
}
