use chrono::{DateTime, Utc};
use log::debug;
use std::time::Duration;

use crate::{
    attitude::{AttitudeSource, AttitudeState},
    classifier::{
        build_classifier, ClassifierKind, ClassifierStats, SignalClassifier, DEFAULT_HISTORY_LEN,
    },
    nmea::Sentence,
    position::PositionFix,
    relay::RelayStats,
    sky::{GsvReport, SatelliteTable},
    snapshot::{SnapshotDocument, SnapshotSource},
};

#[derive(Debug, Clone, Copy, PartialEq)]
/// Tunables of the processing pipeline
pub struct PipelineOptions {
    /// Satellites silent for longer than this are evicted
    pub stale_after: Duration,
    /// Classification history kept per satellite
    pub history_len: usize,
    /// Classifier strategy
    pub classifier: ClassifierKind,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(SatelliteTable::DEFAULT_STALE_SECS),
            history_len: DEFAULT_HISTORY_LEN,
            classifier: ClassifierKind::default(),
        }
    }
}

/// Processing context: the single owner of position, satellite and attitude state
pub struct Pipeline {
    position: PositionFix,
    sky: SatelliteTable,
    classifier: Box<dyn SignalClassifier>,
    attitude: AttitudeState,
    corrections: u64,
    format_switches: u64,
}

impl Pipeline {
    /// Build a pipeline, selecting the classifier strategy once
    pub fn new(opts: PipelineOptions) -> Self {
        Self::with_classifier(opts, build_classifier(opts.classifier, opts.history_len))
    }

    /// Build a pipeline around a given classifier
    pub fn with_classifier(opts: PipelineOptions, classifier: Box<dyn SignalClassifier>) -> Self {
        Self {
            position: PositionFix::default(),
            sky: SatelliteTable::new(opts.stale_after),
            classifier,
            attitude: AttitudeState::default(),
            corrections: 0,
            format_switches: 0,
        }
    }

    /// Validate a raw line and feed it to every extractor it concerns.
    ///
    /// Returns the accepted sentence, or `None` if the line was discarded.
    /// Nothing is mutated for a discarded line.
    pub fn process_line(&mut self, raw: &str, now: DateTime<Utc>) -> Option<Sentence> {
        let sentence = Sentence::validate(raw)?;
        if sentence.has_tag("GGA") && !self.position.update_from_gga(&sentence) {
            debug!("Short fix sentence ignored: {}", sentence.line());
        }
        if sentence.has_tag("GSV") {
            self.ingest_gsv(&sentence, now);
        }
        let previous = self.attitude.status;
        if let Some(source) = self.attitude.update(&sentence) {
            if previous != AttitudeSource::None && previous != source {
                self.format_switches += 1;
            }
        }
        Some(sentence)
    }

    fn ingest_gsv(&mut self, sentence: &Sentence, now: DateTime<Utc>) {
        let Some(report) = GsvReport::parse(sentence) else {
            return;
        };
        if let Some(in_view) = report.in_view {
            self.position.observe_in_view(in_view);
        }
        for sat in &report.satellites {
            self.sky.upsert(sat, now);
        }
        let results = self.classifier.classify(&report.satellites, now);
        if results.is_empty() {
            return;
        }
        for c in &results {
            self.sky.set_class(&c.prn, c.class, c.confidence);
        }
        self.corrections += 1;
    }

    /// Evict stale satellites and project a consistent copy of the state
    pub fn snapshot(&mut self, relay: &RelayStats, now: DateTime<Utc>) -> SnapshotDocument {
        let evicted = self.sky.evict_stale(now);
        if !evicted.is_empty() {
            debug!("Evicted stale satellites {:?}", evicted);
        }
        self.classifier.prune(now, self.sky.stale_after());
        SnapshotDocument::project(
            SnapshotSource {
                position: &self.position,
                satellites: self.sky.view(),
                tally: self.sky.tally(),
                attitude: &self.attitude,
                relay,
                classifier: self.classifier.stats(),
                classifier_name: self.classifier.name(),
                corrections: self.corrections,
                format_switches: self.format_switches,
            },
            now,
        )
    }

    /// Latest position fix
    pub fn position(&self) -> &PositionFix {
        &self.position
    }

    /// Satellite table
    pub fn satellites(&self) -> &SatelliteTable {
        &self.sky
    }

    /// Latest attitude
    pub fn attitude(&self) -> &AttitudeState {
        &self.attitude
    }

    /// Classifier statistics
    pub fn classifier_stats(&self) -> ClassifierStats {
        self.classifier.stats()
    }

    /// Satellites-in-view sentences refined by the classifier
    pub fn corrections(&self) -> u64 {
        self.corrections
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(PipelineOptions::default())
    }
}
