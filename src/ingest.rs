//! # Ingestion runs
//!
//! [`IngestionCoordinator`] drives one run at a time through
//!
//! ```text
//! Idle -> Scanning -> Parsing -> OffsetResolving -> Matching -> Done
//! ```
//!
//! with `Failed` reachable from any phase when the run cannot continue (missing
//! folder, dump utility failure). A track that cannot be parsed is logged and
//! left out; it never fails the run.

use std::path::Path;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::gpsdump::{self, DeviceFlight, DumpInvoker};
use crate::igc::{read_track_info, IgcTrackInfo};
use crate::logbook::Logbook;
use crate::matching::{check_flights_batch, match_device_flights, FlightCheckRequest};
use crate::scan::{scan_folder, ScanResult};
use crate::timezone::TimeZoneResolver;
use crate::{FlightListResult, ImportCandidate, TrackExtension, TrackFile};

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IngestPhase {
    Idle,
    Scanning,
    Parsing,
    OffsetResolving,
    Matching,
    Done,
    Failed,
}

/// Sequential driver for file and device ingestion.
pub struct IngestionCoordinator {
    config: IngestConfig,
    resolver: TimeZoneResolver,
    phase: IngestPhase,
}

impl IngestionCoordinator {
    pub fn new(config: IngestConfig, resolver: TimeZoneResolver) -> Self {
        Self {
            config,
            resolver,
            phase: IngestPhase::Idle,
        }
    }

    /// Coordinator resolving offsets from the bundled timezone polygons.
    pub fn with_config(config: IngestConfig) -> Self {
        Self::new(config, TimeZoneResolver::geographic())
    }

    pub fn phase(&self) -> IngestPhase {
        self.phase
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    fn enter(&mut self, phase: IngestPhase) {
        debug!("[Ingest] {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    fn fail<T>(&mut self, error: IngestError) -> Result<T> {
        warn!("[Ingest] Run failed in {:?}: {}", self.phase, error);
        self.enter(IngestPhase::Failed);
        Err(error)
    }

    // ========================================================================
    // Files
    // ========================================================================

    /// Enumerate track files below `folder`.
    pub fn scan(&mut self, folder: &Path) -> Result<ScanResult> {
        self.enter(IngestPhase::Scanning);
        match scan_folder(folder, &self.config) {
            Ok(result) => Ok(result),
            Err(e) => self.fail(e),
        }
    }

    /// Parse IGC files into candidates, newest first.
    ///
    /// Files that fail to read or carry no identifiable flight are skipped.
    /// GPX files are discovered by the scan but not parsed.
    pub fn parse_batch(&mut self, files: &[TrackFile]) -> Vec<ImportCandidate> {
        self.enter(IngestPhase::Parsing);
        let parsed: Vec<(TrackFile, IgcTrackInfo)> = files
            .iter()
            .filter(|file| file.extension == TrackExtension::Igc)
            .filter_map(|file| match read_track_info(&file.path, self.config.tail_read_bytes) {
                Ok(Some(info)) => Some((file.clone(), info)),
                Ok(None) => {
                    debug!("[Ingest] No flight in {}", file.name);
                    None
                }
                Err(e) => {
                    warn!("[Ingest] Error parsing {}: {}", file.name, e);
                    None
                }
            })
            .collect();

        self.enter(IngestPhase::OffsetResolving);
        let mut candidates: Vec<ImportCandidate> = parsed
            .into_iter()
            .map(|(file, info)| ImportCandidate {
                file,
                summary: info.into_summary(&self.resolver),
                exists_in_logbook: false,
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.summary
                .utc_timestamp_millis()
                .cmp(&a.summary.utc_timestamp_millis())
        });

        info!(
            "[Ingest] Parsed {}/{} files",
            candidates.len(),
            files.len()
        );
        candidates
    }

    /// Scan, parse and check a folder against the logbook.
    ///
    /// Without a logbook every candidate is marked to store.
    pub fn import_folder(
        &mut self,
        folder: &Path,
        logbook: Option<&dyn Logbook>,
    ) -> Result<Vec<ImportCandidate>> {
        let scanned = self.scan(folder)?;
        let mut candidates = self.parse_batch(&scanned.igc_files);

        self.enter(IngestPhase::Matching);
        let requests: Vec<FlightCheckRequest> = candidates
            .iter()
            .map(|c| FlightCheckRequest::from_summary(&c.summary))
            .collect();
        let results = check_flights_batch(logbook, &requests);
        for (candidate, result) in candidates.iter_mut().zip(results) {
            candidate.exists_in_logbook = result.exists;
        }

        self.enter(IngestPhase::Done);
        info!(
            "[Ingest] {} flights, {} to import",
            candidates.len(),
            candidates.iter().filter(|c| c.to_store()).count()
        );
        Ok(candidates)
    }

    // ========================================================================
    // Devices
    // ========================================================================

    /// Query a device's flight list and mark flights already in the logbook.
    pub fn list_device_flights(
        &mut self,
        invoker: &dyn DumpInvoker,
        model_code: &str,
        port: &str,
        logbook: Option<&dyn Logbook>,
    ) -> Result<FlightListResult> {
        let platform = self.config.gpsdump.effective_platform();

        self.enter(IngestPhase::Scanning);
        let listed = match gpsdump::list_flights(invoker, platform, model_code, port, &self.config.gpsdump) {
            Ok(list) => list,
            Err(e) => return self.fail(e),
        };

        self.enter(IngestPhase::Matching);
        let result = match logbook {
            Some(logbook) => listed.with_verdicts(&match_device_flights(logbook, &listed.flights)),
            None => listed,
        };

        self.enter(IngestPhase::Done);
        Ok(result)
    }

    /// Download one listed flight and summarise it.
    pub fn fetch_device_flight(
        &mut self,
        invoker: &dyn DumpInvoker,
        token: &str,
        index: usize,
    ) -> Result<DeviceFlight> {
        let platform = self.config.gpsdump.effective_platform();

        self.enter(IngestPhase::Parsing);
        match gpsdump::download_flight(
            invoker,
            platform,
            token,
            index,
            &self.config.gpsdump,
            &self.resolver,
        ) {
            Ok(flight) => {
                self.enter(IngestPhase::Done);
                Ok(flight)
            }
            Err(e) => self.fail(e),
        }
    }
}
