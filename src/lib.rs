#![deny(missing_docs)]
//! # GNSS AI Relay
//! Bridges a GNSS receiver's NMEA stream to a downstream consumer.
//!
//! Validates sentences read from a serial device, extracts position,
//! satellite and attitude state, classifies each satellite's signal as
//! line-of-sight, multipath or non-line-of-sight, relays the accepted
//! sentences to a named pipe and periodically publishes a JSON snapshot
//! of the state for monitoring clients.
mod attitude;
mod classifier;
mod config;
mod frame;
mod history;
mod nmea;
mod pipeline;
mod position;
mod relay;
mod runner;
mod sky;
mod snapshot;

pub use attitude::{AttitudeSource, AttitudeState};
pub use classifier::{
    build_classifier, classify_features, Classification, ClassifierKind, ClassifierStats,
    FeatureVector, HistoryClassifier, RuleClassifier, SignalClassifier, DEFAULT_HISTORY_LEN,
    SIGNAL_HISTORY_LEN,
};
pub use config::RelayCfg;
pub use frame::{open_serial, FrameReader, MAX_LINE_LEN};
pub use history::{trend, BoundedHistory};
pub use nmea::{parse_coordinate, Sentence, SENTENCE_MARKER};
pub use pipeline::{Pipeline, PipelineOptions};
pub use position::{FixQuality, PositionFix};
pub use relay::{ensure_fifo, Connection, OutputRelay, RelayStats, DEFAULT_FIFO_PATH};
pub use runner::{CancelToken, RelayOptions, Runner, DEFAULT_SNAPSHOT_EVERY};
pub use sky::{
    ClassTally, Constellation, GsvReport, SatelliteObservation, SatelliteRecord, SatelliteTable,
    SignalClass,
};
pub use snapshot::{
    SnapshotDocument, SnapshotPosition, SnapshotPublisher, SnapshotSource, DEFAULT_SNAPSHOT_PATH,
};

use thiserror::Error;

#[derive(Error, Debug)]
/// Errors raised by the relay
pub enum RelayError {
    /// The receiver could not be opened or read
    #[error("Source error: {0}")]
    Source(#[source] std::io::Error),
    /// The snapshot could not be serialized or written
    #[error("Snapshot error: {0}")]
    Snapshot(String),
    /// The configuration could not be loaded or stored
    #[error("Configuration error: {0}")]
    Config(String),
    /// Other I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
