//! Download of a single flight from a device.
//!
//! The order token captured when the flight list was decoded is replayed with
//! the flight's index. GPSDump writes the track to a scratch IGC file, which is
//! read back and run through the same header and fix rules as a track on disk.

use std::path::Path;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::{DeviceModel, DumpCommand, DumpInvoker, OutputSource, Platform, EXIT, NO_WINDOW};
use crate::config::GpsDumpConfig;
use crate::error::{IngestError, Result};
use crate::igc::track_info_from_text;
use crate::timezone::TimeZoneResolver;
use crate::ParsedFlightSummary;

/// Downloads shorter than this are treated as failed transfers.
pub const MIN_TRACK_BYTES: usize = 100;

const SCRATCH_TRACK: &str = "gpsdump.igc";

/// A downloaded flight: its summary and the raw IGC text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceFlight {
    pub summary: ParsedFlightSummary,
    pub igc_text: String,
}

/// The three parts of an order token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderToken<'a> {
    pub device_flag: &'a str,
    pub port_arg: &'a str,
    pub model: DeviceModel,
}

impl<'a> OrderToken<'a> {
    pub fn parse(token: &'a str) -> Result<Self> {
        let mut parts = token.split(',');
        let (Some(device_flag), Some(port_arg), Some(model_code), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(IngestError::InvalidDeviceToken {
                token: token.to_string(),
            });
        };
        Ok(Self {
            device_flag,
            port_arg,
            model: DeviceModel::from_code(model_code)?,
        })
    }
}

/// Track number GPSDump expects for a 0-based list index.
///
/// Flymaster SD numbering is 1-based everywhere. Other models are 1-based
/// except on Windows.
pub fn device_track_index(platform: Platform, model: DeviceModel, index: usize) -> usize {
    match (model, platform) {
        (DeviceModel::FlymasterSd, _) => index + 1,
        (_, Platform::Windows) => index,
        _ => index + 1,
    }
}

/// Build the download command for flight `index` of the device named by `token`.
pub fn download_command(
    platform: Platform,
    token: &str,
    index: usize,
    temp_dir: &Path,
) -> Result<DumpCommand> {
    let order = OrderToken::parse(token)?;
    let params = platform.params();

    let track_path = temp_dir.join(SCRATCH_TRACK);
    let param_file = format!("{}{}", params.temp, track_path.display());
    let param_index = format!(
        "{}{}",
        params.track,
        device_track_index(platform, order.model, index)
    );

    let args = match platform {
        Platform::Windows => vec![
            NO_WINDOW.to_string(),
            order.port_arg.to_string(),
            order.device_flag.to_string(),
            param_file,
            param_index,
            EXIT.to_string(),
        ],
        Platform::Mac32 => vec![order.device_flag.to_string(), param_file, param_index],
        Platform::Mac64 | Platform::Linux => vec![
            order.device_flag.to_string(),
            order.port_arg.to_string(),
            param_file,
            param_index,
        ],
    };

    Ok(DumpCommand {
        args,
        output: OutputSource::File(track_path),
    })
}

/// Download one flight and summarise it.
pub fn download_flight(
    invoker: &dyn DumpInvoker,
    platform: Platform,
    token: &str,
    index: usize,
    config: &GpsDumpConfig,
    resolver: &TimeZoneResolver,
) -> Result<DeviceFlight> {
    let command = download_command(platform, token, index, &config.temp_dir)?;
    info!("[GpsDump] Downloading flight {} ({})", index, token);

    let igc_text = invoker.invoke(&command)?;
    if igc_text.len() < MIN_TRACK_BYTES {
        warn!("[GpsDump] Track too short: {} bytes", igc_text.len());
        return Err(IngestError::TrackTooShort {
            length: igc_text.len(),
        });
    }

    let Some(info) = track_info_from_text(&igc_text) else {
        warn!("[GpsDump] Downloaded track has no date header or fix");
        return Err(IngestError::TrackTooShort {
            length: igc_text.len(),
        });
    };

    let summary = info.into_summary(resolver);
    info!(
        "[GpsDump] Downloaded {} bytes, date {}",
        igc_text.len(),
        summary.date_iso
    );
    Ok(DeviceFlight { summary, igc_text })
}
