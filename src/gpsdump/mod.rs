//! # GPSDump
//!
//! GPSDump is an external command-line tool that talks to serial/USB flight
//! instruments. Each OS build takes different arguments and prints the flight
//! list in a different textual layout, so everything here is keyed by
//! [`Platform`] and [`DeviceModel`].
//!
//! Process execution sits behind [`DumpInvoker`]; tests swap in a double that
//! returns canned output.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::GpsDumpConfig;
use crate::error::{IngestError, Result};
use crate::FlightListResult;

pub mod decode;
pub mod flight;

pub use decode::{decode_flight_list, Grammar};
pub use flight::{download_flight, DeviceFlight};

pub(crate) const NO_WINDOW: &str = "/win=0";
pub(crate) const EXIT: &str = "/exit";
const OVERWRITE: &str = "/overwrite";

// ============================================================================
// Tags
// ============================================================================

/// OS build of GPSDump. Each has its own arguments and output layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[serde(rename = "win")]
    Windows,
    Mac32,
    Mac64,
    Linux,
}

impl Platform {
    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag {
            "win" => Ok(Platform::Windows),
            "mac32" => Ok(Platform::Mac32),
            "mac64" => Ok(Platform::Mac64),
            "linux" => Ok(Platform::Linux),
            _ => Err(IngestError::UnsupportedPlatform {
                tag: tag.to_string(),
            }),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Platform::Windows => "win",
            Platform::Mac32 => "mac32",
            Platform::Mac64 => "mac64",
            Platform::Linux => "linux",
        }
    }

    /// Platform of the running binary.
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            if cfg!(target_pointer_width = "64") {
                Platform::Mac64
            } else {
                Platform::Mac32
            }
        } else {
            Platform::Linux
        }
    }

    pub fn executable_name(&self) -> &'static str {
        match self {
            Platform::Windows => "GpsDump542.exe",
            Platform::Mac32 => "gpsdumpMac32_54",
            Platform::Mac64 => "gpsdumpMac64_14",
            Platform::Linux => "gpsdumpLin64_28",
        }
    }

    /// Argument table for this build.
    pub fn params(&self) -> GpsDumpParams {
        match self {
            Platform::Windows => GpsDumpParams {
                flymaster: "/gps=flymaster",
                flymaster_old: "/gps=flymasterold",
                flytec20: "/gps=iqcompeo",
                flytec15: "/gps=iqbasic",
                list: "/flightlist",
                list_file: Some("gpslist.txt"),
                temp: "/igc_log=",
                track: "/track=",
            },
            Platform::Mac32 => GpsDumpParams {
                flymaster: "/gps=flymaster",
                flymaster_old: "/gps=flymasterold",
                flytec20: "/gps=flytec",
                flytec15: "/gps=iqbasic",
                list: "/flightlist",
                list_file: None,
                temp: "/name=",
                track: "/track=",
            },
            Platform::Mac64 | Platform::Linux => GpsDumpParams {
                flymaster: "-gyn",
                flymaster_old: "-gy",
                flytec20: "-gc",
                flytec15: "-giq",
                list: "-f0",
                list_file: Some("-lnomatter.txt"),
                temp: "-l",
                track: "-f",
            },
        }
    }
}

/// Serial instruments GPSDump can list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceModel {
    /// Flymaster SD series
    #[serde(rename = "flysd")]
    FlymasterSd,
    /// Flymaster before the SD series
    #[serde(rename = "flyold")]
    FlymasterOld,
    /// Flytec 5020/5030/6030, Compeo, Competino, Galileo
    #[serde(rename = "fly20")]
    Flytec20,
    /// Flytec 6015, Bräuniger IQ Basic
    #[serde(rename = "fly15")]
    Flytec15,
}

impl DeviceModel {
    pub fn from_code(code: &str) -> Result<Self> {
        match code {
            "flysd" => Ok(DeviceModel::FlymasterSd),
            "flyold" => Ok(DeviceModel::FlymasterOld),
            "fly20" => Ok(DeviceModel::Flytec20),
            "fly15" => Ok(DeviceModel::Flytec15),
            _ => Err(IngestError::UnknownDeviceModel {
                code: code.to_string(),
            }),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            DeviceModel::FlymasterSd => "flysd",
            DeviceModel::FlymasterOld => "flyold",
            DeviceModel::Flytec20 => "fly20",
            DeviceModel::Flytec15 => "fly15",
        }
    }

    /// Device-type flag from a platform's argument table.
    pub fn device_flag(&self, params: &GpsDumpParams) -> &'static str {
        match self {
            DeviceModel::FlymasterSd => params.flymaster,
            DeviceModel::FlymasterOld => params.flymaster_old,
            DeviceModel::Flytec20 => params.flytec20,
            DeviceModel::Flytec15 => params.flytec15,
        }
    }
}

/// Human-readable name for a model code. Unknown codes pass through.
pub fn model_display_name(code: &str) -> String {
    match code {
        "fly20" => "Flytec 20/30 Compeo".to_string(),
        "fly15" => "Flytec 6015 / Brau IQ basic".to_string(),
        other => other.to_string(),
    }
}

/// Per-platform GPSDump switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpsDumpParams {
    pub flymaster: &'static str,
    pub flymaster_old: &'static str,
    pub flytec20: &'static str,
    pub flytec15: &'static str,
    /// Flight list selector
    pub list: &'static str,
    /// Windows: list file name in the temp dir. Mac64/Linux: literal output switch.
    pub list_file: Option<&'static str>,
    /// Prefix for the downloaded track path
    pub temp: &'static str,
    /// Prefix for the track index
    pub track: &'static str,
}

// ============================================================================
// Invocation
// ============================================================================

/// Where GPSDump leaves its answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSource {
    Stdout,
    File(PathBuf),
}

/// One GPSDump run: arguments and where to collect the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpCommand {
    pub args: Vec<String>,
    pub output: OutputSource,
}

/// Runs GPSDump. Returns its output as text, or a categorised failure.
///
/// Blocking, no cancellation. Callers wanting a timeout kill the process from outside.
pub trait DumpInvoker {
    fn invoke(&self, command: &DumpCommand) -> Result<String>;
}

/// Spawns the real GPSDump executable.
#[derive(Debug, Clone)]
pub struct ProcessInvoker {
    executable: PathBuf,
}

impl ProcessInvoker {
    pub fn new(executable: PathBuf) -> Self {
        Self { executable }
    }

    /// Invoker for the configured platform's executable.
    pub fn from_config(config: &GpsDumpConfig) -> Self {
        Self::new(config.executable_path(config.effective_platform()))
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }
}

impl DumpInvoker for ProcessInvoker {
    fn invoke(&self, command: &DumpCommand) -> Result<String> {
        if !self.executable.exists() {
            warn!("[GpsDump] Executable not found at {}", self.executable.display());
            return Err(IngestError::DumpNotFound {
                path: self.executable.clone(),
            });
        }

        if let OutputSource::File(path) = &command.output {
            remove_stale(path);
        }

        info!(
            "[GpsDump] {} {}",
            self.executable
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            command.args.join(" ")
        );

        let output = Command::new(&self.executable)
            .args(&command.args)
            .output()
            .map_err(|e| IngestError::DumpExecution {
                message: e.to_string(),
            })?;

        match &command.output {
            OutputSource::Stdout => {
                if !output.status.success() && output.stdout.is_empty() {
                    return Err(IngestError::DumpExecution {
                        message: failure_message(&output),
                    });
                }
                Ok(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            OutputSource::File(path) => {
                if !output.status.success() {
                    return Err(IngestError::DumpExecution {
                        message: failure_message(&output),
                    });
                }
                if !path.exists() {
                    debug!("[GpsDump] No output file at {}", path.display());
                    return Ok(String::new());
                }
                let bytes = fs::read(path)?;
                remove_stale(path);
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
        }
    }
}

fn failure_message(output: &std::process::Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.trim().is_empty() {
        format!("exited with {}", output.status)
    } else {
        stderr.trim().to_string()
    }
}

fn remove_stale(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            warn!("[GpsDump] Could not delete {}: {}", path.display(), e);
        }
    }
}

// ============================================================================
// Flight list
// ============================================================================

/// Port argument in the form each build expects.
pub fn port_argument(platform: Platform, port: &str) -> String {
    match platform {
        Platform::Windows => format!("/com={}", port.replacen("COM", "", 1)),
        Platform::Mac32 | Platform::Mac64 => port.replacen("/dev/tty", "-cu", 1),
        Platform::Linux => match port.get(..9) {
            Some("/dev/ttyA") => port.replacen("/dev/ttyACM", "-ca", 1),
            Some("/dev/ttyS") => port.replacen("/dev/ttyS", "-c", 1),
            Some("/dev/ttyU") => port.replacen("/dev/ttyUSB", "-cu", 1),
            _ => port.to_string(),
        },
    }
}

/// Token stored on each listed flight so it can be downloaded later.
pub fn order_token(device_flag: &str, port_arg: &str, model: DeviceModel) -> String {
    format!("{},{},{}", device_flag, port_arg, model.code())
}

/// A ready-to-run list command plus the token its flights will carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRequest {
    pub command: DumpCommand,
    pub order_token: String,
}

/// Build the flight-list command for a device on `port`.
pub fn list_command(
    platform: Platform,
    model: DeviceModel,
    port: &str,
    temp_dir: &Path,
) -> ListRequest {
    let params = platform.params();
    let device_flag = model.device_flag(&params);
    let port_arg = port_argument(platform, port);

    let (args, output) = match platform {
        Platform::Windows => {
            let list_path = temp_dir.join(params.list_file.unwrap_or("gpslist.txt"));
            let args = vec![
                NO_WINDOW.to_string(),
                port_arg.clone(),
                device_flag.to_string(),
                params.list.to_string(),
                format!("/notify={}", list_path.display()),
                OVERWRITE.to_string(),
                EXIT.to_string(),
            ];
            (args, OutputSource::File(list_path))
        }
        Platform::Mac32 => (
            vec![
                device_flag.to_string(),
                port_arg.clone(),
                params.list.to_string(),
            ],
            OutputSource::Stdout,
        ),
        Platform::Mac64 | Platform::Linux => (
            vec![
                device_flag.to_string(),
                port_arg.clone(),
                params.list_file.unwrap_or_default().to_string(),
                params.list.to_string(),
            ],
            OutputSource::Stdout,
        ),
    };

    ListRequest {
        command: DumpCommand { args, output },
        order_token: order_token(device_flag, &port_arg, model),
    }
}

/// Ask the device on `port` for its flight list and decode it.
///
/// Duplicate status is not checked here; every flight comes back marked new.
pub fn list_flights(
    invoker: &dyn DumpInvoker,
    platform: Platform,
    model_code: &str,
    port: &str,
    config: &GpsDumpConfig,
) -> Result<FlightListResult> {
    let model = DeviceModel::from_code(model_code)?;
    let request = list_command(platform, model, port, &config.temp_dir);
    info!(
        "[GpsDump] Listing flights for {} on {} ({})",
        model.code(),
        port,
        platform.tag()
    );

    let output = invoker.invoke(&request.command)?;
    decode_flight_list(&output, model.code(), platform, &request.order_token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct CannedInvoker {
        output: String,
        seen: RefCell<Vec<DumpCommand>>,
    }

    impl DumpInvoker for CannedInvoker {
        fn invoke(&self, command: &DumpCommand) -> Result<String> {
            self.seen.borrow_mut().push(command.clone());
            Ok(self.output.clone())
        }
    }

    #[test]
    fn test_platform_tags() {
        for tag in ["win", "mac32", "mac64", "linux"] {
            assert_eq!(Platform::from_tag(tag).unwrap().tag(), tag);
        }
        assert!(matches!(
            Platform::from_tag("beos"),
            Err(IngestError::UnsupportedPlatform { .. })
        ));
    }

    #[test]
    fn test_model_display_names() {
        assert_eq!(model_display_name("fly20"), "Flytec 20/30 Compeo");
        assert_eq!(model_display_name("fly15"), "Flytec 6015 / Brau IQ basic");
        assert_eq!(model_display_name("flysd"), "flysd");
        assert_eq!(model_display_name("mystery"), "mystery");
    }

    #[test]
    fn test_linux_port_mapping() {
        assert_eq!(port_argument(Platform::Linux, "/dev/ttyACM0"), "-ca0");
        assert_eq!(port_argument(Platform::Linux, "/dev/ttyS1"), "-c1");
        assert_eq!(port_argument(Platform::Linux, "/dev/ttyUSB2"), "-cu2");
        assert_eq!(port_argument(Platform::Linux, "/dev/ttyAMA0"), "/dev/ttyAMA0");
        assert_eq!(port_argument(Platform::Linux, "COM1"), "COM1");
    }

    #[test]
    fn test_other_port_mapping() {
        assert_eq!(port_argument(Platform::Windows, "COM7"), "/com=7");
        assert_eq!(
            port_argument(Platform::Mac64, "/dev/tty.usbserial-1410"),
            "-cu.usbserial-1410"
        );
    }

    #[test]
    fn test_windows_list_command_reads_file() {
        let request = list_command(
            Platform::Windows,
            DeviceModel::Flytec20,
            "COM3",
            Path::new("/tmp/logfly"),
        );
        assert_eq!(request.command.args[0], "/win=0");
        assert_eq!(request.command.args[1], "/com=3");
        assert_eq!(request.command.args[2], "/gps=iqcompeo");
        assert_eq!(request.command.args[3], "/flightlist");
        assert!(request.command.args[4].starts_with("/notify="));
        assert_eq!(
            request.command.output,
            OutputSource::File(PathBuf::from("/tmp/logfly/gpslist.txt"))
        );
        assert_eq!(request.order_token, "/gps=iqcompeo,/com=3,fly20");
    }

    #[test]
    fn test_unix_list_commands() {
        let request = list_command(
            Platform::Linux,
            DeviceModel::FlymasterSd,
            "/dev/ttyACM0",
            Path::new("/tmp"),
        );
        assert_eq!(request.command.args, vec!["-gyn", "-ca0", "-lnomatter.txt", "-f0"]);
        assert_eq!(request.command.output, OutputSource::Stdout);
        assert_eq!(request.order_token, "-gyn,-ca0,flysd");

        let request = list_command(
            Platform::Mac32,
            DeviceModel::FlymasterOld,
            "/dev/tty.usbmodem1",
            Path::new("/tmp"),
        );
        assert_eq!(
            request.command.args,
            vec!["/gps=flymasterold", "-cu.usbmodem1", "/flightlist"]
        );
    }

    #[test]
    fn test_list_flights_uses_invoker() {
        let invoker = CannedInvoker {
            output: "Product: Flymaster GpsSD  SN02988  SW2.03h\n 1   23.07.20   06:08:16   01:21:57\n"
                .to_string(),
            seen: RefCell::new(Vec::new()),
        };
        let config = GpsDumpConfig::default();

        let list = list_flights(&invoker, Platform::Linux, "flysd", "/dev/ttyUSB0", &config).unwrap();
        assert_eq!(list.flights.len(), 1);
        assert_eq!(list.flights[0].device_order_token, "-gyn,-cu0,flysd");
        assert_eq!(invoker.seen.borrow().len(), 1);
    }

    #[test]
    fn test_unknown_model_never_invokes() {
        let invoker = CannedInvoker {
            output: String::new(),
            seen: RefCell::new(Vec::new()),
        };
        let err = list_flights(
            &invoker,
            Platform::Linux,
            "sky3",
            "/dev/ttyUSB0",
            &GpsDumpConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, IngestError::UnknownDeviceModel { .. }));
        assert!(invoker.seen.borrow().is_empty());
    }

    #[test]
    fn test_missing_executable_is_not_found() {
        let invoker = ProcessInvoker::new(PathBuf::from("/nonexistent/gpsdumpLin64_28"));
        let command = DumpCommand {
            args: vec![],
            output: OutputSource::Stdout,
        };
        let err = invoker.invoke(&command).unwrap_err();
        assert_eq!(err.category(), crate::FailureCategory::DumpNotFound);
    }
}
