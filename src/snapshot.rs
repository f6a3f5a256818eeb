use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Serialize;
use std::{
    fs::Permissions,
    io::Write,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;

use crate::{
    attitude::AttitudeState,
    classifier::ClassifierStats,
    position::{FixQuality, PositionFix},
    relay::RelayStats,
    sky::{ClassTally, SatelliteRecord},
    RelayError,
};

/// Default location of the snapshot document
pub const DEFAULT_SNAPSHOT_PATH: &str = "/tmp/gnssai_dashboard_data.json";
/// Mode of the published document; monitoring clients run as other users
const SNAPSHOT_MODE: u32 = 0o644;

#[derive(Debug, Clone, PartialEq, Serialize)]
/// Position part of the snapshot
pub struct SnapshotPosition {
    /// Latitude in decimal degrees
    pub lat: f64,
    /// Longitude in decimal degrees
    pub lon: f64,
    /// Altitude above mean sea level
    pub alt: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
/// Point-in-time copy of the pipeline state, as published to monitoring clients
pub struct SnapshotDocument {
    /// Latest position
    pub position: SnapshotPosition,
    /// Satellite count
    pub satellites: u32,
    /// Tracked satellites, sorted by identifier
    pub satellites_detail: Vec<SatelliteRecord>,
    /// Raw fix quality code
    pub quality: u8,
    /// Horizontal dilution of precision
    pub hdop: f64,
    /// Accepted sentences relayed downstream
    pub nmea_sent: u64,
    /// Accepted sentences dropped because no reader was attached
    pub nmea_dropped: u64,
    /// Successful transport (re)connections
    pub reconnects: u64,
    /// Satellites-in-view sentences refined by the classifier
    pub ml_corrections: u64,
    /// Changes of the attitude source sentence kind
    pub format_switches: u64,
    /// Line-of-sight satellites in the table
    pub los_sats: u32,
    /// Multipath satellites in the table
    pub multipath_sats: u32,
    /// Non-line-of-sight satellites in the table
    pub nlos_sats: u32,
    /// Mean classification confidence of the table, in percent
    pub avg_confidence: f64,
    /// Satellites classified since startup
    pub total_classifications: u64,
    /// Active classifier strategy
    pub classifier: &'static str,
    /// Rough accuracy estimate in centimetres
    pub estimated_accuracy: f64,
    /// Fix quality label
    pub rtk_status: FixQuality,
    /// Input format
    pub format: &'static str,
    /// Attitude
    pub tilt: AttitudeState,
    /// Generation time
    pub last_update: DateTime<Utc>,
}

/// Everything a snapshot is projected from
pub struct SnapshotSource<'a> {
    /// Position fix
    pub position: &'a PositionFix,
    /// Table view after eviction
    pub satellites: Vec<SatelliteRecord>,
    /// Class counts over the same view
    pub tally: ClassTally,
    /// Attitude
    pub attitude: &'a AttitudeState,
    /// Transport counters
    pub relay: &'a RelayStats,
    /// Classifier statistics
    pub classifier: ClassifierStats,
    /// Classifier strategy name
    pub classifier_name: &'static str,
    /// Refined satellites-in-view sentences
    pub corrections: u64,
    /// Attitude source changes
    pub format_switches: u64,
}

impl SnapshotDocument {
    /// Project the pipeline state
    pub fn project(src: SnapshotSource, now: DateTime<Utc>) -> Self {
        let quality = src.position.fix_quality();
        Self {
            position: SnapshotPosition {
                lat: src.position.lat,
                lon: src.position.lon,
                alt: src.position.alt,
            },
            satellites: src.position.satellites,
            satellites_detail: src.satellites,
            quality: src.position.quality,
            hdop: src.position.hdop,
            nmea_sent: src.relay.relayed,
            nmea_dropped: src.relay.dropped,
            reconnects: src.relay.reconnects,
            ml_corrections: src.corrections,
            format_switches: src.format_switches,
            los_sats: src.tally.los,
            multipath_sats: src.tally.multipath,
            nlos_sats: src.tally.nlos,
            avg_confidence: src.tally.avg_confidence * 100.0,
            total_classifications: src.classifier.total_classifications,
            classifier: src.classifier_name,
            estimated_accuracy: quality.estimated_accuracy(src.position.hdop),
            rtk_status: quality,
            format: "NMEA",
            tilt: src.attitude.clone(),
            last_update: now,
        }
    }

    /// Pretty printed JSON
    pub fn to_json(&self) -> Result<String, RelayError> {
        serde_json::to_string_pretty(self).map_err(|e| RelayError::Snapshot(e.to_string()))
    }
}

#[derive(Debug)]
/// Writes snapshot documents atomically to a fixed location
pub struct SnapshotPublisher {
    path: PathBuf,
    staging: PathBuf,
    published: u64,
    failures: u64,
}

impl SnapshotPublisher {
    /// Publish to `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        // the temp file must share the target's filesystem for an atomic rename
        let staging = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Self {
            path,
            staging,
            published: 0,
            failures: 0,
        }
    }

    /// Target path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Successful writes
    pub fn published(&self) -> u64 {
        self.published
    }

    /// Failed writes
    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Replace the document on disk. The previous file stays intact on failure.
    pub fn write(&self, doc: &SnapshotDocument) -> Result<(), RelayError> {
        let json = doc.to_json()?;
        let mut tmp =
            NamedTempFile::new_in(&self.staging).map_err(|e| RelayError::Snapshot(e.to_string()))?;
        tmp.as_file()
            .set_permissions(Permissions::from_mode(SNAPSHOT_MODE))
            .map_err(|e| RelayError::Snapshot(e.to_string()))?;
        tmp.write_all(json.as_bytes())
            .and_then(|_| tmp.flush())
            .map_err(|e| RelayError::Snapshot(e.to_string()))?;
        tmp.persist(&self.path)
            .map_err(|e| RelayError::Snapshot(e.error.to_string()))?;
        Ok(())
    }

    /// Write, logging instead of failing. Returns whether the write succeeded.
    pub fn publish(&mut self, doc: &SnapshotDocument) -> bool {
        match self.write(doc) {
            Ok(()) => {
                self.published += 1;
                debug!("Snapshot written to {:?}", self.path);
                true
            }
            Err(e) => {
                self.failures += 1;
                warn!("Error writing snapshot {:?}: {}", self.path, e);
                false
            }
        }
    }
}
