use chrono::{DateTime, Duration, Timelike, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, str::FromStr};

use crate::{
    history::{trend, BoundedHistory},
    sky::{SatelliteObservation, SignalClass},
};

/// Default capacity of the per-satellite classification history
pub const DEFAULT_HISTORY_LEN: usize = 20;
/// Capacity of the per-satellite signal sample history
pub const SIGNAL_HISTORY_LEN: usize = 50;
/// SNR assumed for satellites reported without one
const MISSING_SNR: f64 = 25.0;
/// Minimum seconds between classifier statistics log lines
const STATS_LOG_INTERVAL: i64 = 30;

const ELEVATION_LOS_MIN: f64 = 20.0;
const SNR_LOS_MIN: f64 = 35.0;
const ELEVATION_NLOS_MAX: f64 = 15.0;
const SNR_NLOS_MAX: f64 = 25.0;
const SNR_MULTIPATH_MIN: f64 = 25.0;
const SNR_MULTIPATH_MAX: f64 = 35.0;
const ELEVATION_MULTIPATH_MIN: f64 = 10.0;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Classifier strategy, chosen once at startup
pub enum ClassifierKind {
    /// Bare threshold rule only
    Rules,
    /// Feature based rules with temporal confidence smoothing
    #[default]
    Hybrid,
}

impl FromStr for ClassifierKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rules" => Ok(Self::Rules),
            "hybrid" | "ml" => Ok(Self::Hybrid),
            other => Err(format!("unknown classifier '{other}', expected 'rules' or 'hybrid'")),
        }
    }
}

impl fmt::Display for ClassifierKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Rules => write!(f, "rules"),
            Self::Hybrid => write!(f, "hybrid"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
/// Inputs of the hybrid rule set
pub struct FeatureVector {
    /// Elevation in degrees
    pub elevation: f64,
    /// SNR in dB-Hz
    pub snr: f64,
    /// Azimuth in degrees
    pub azimuth: f64,
    /// Seconds since UTC midnight
    pub time_of_day: f64,
    /// SNR normalized to 0..1
    pub snr_quality: f64,
    /// Elevation normalized to 0..1
    pub elevation_quality: f64,
    /// Slope of recent SNR samples
    pub snr_trend: f64,
    /// Slope of recent elevation samples
    pub elevation_trend: f64,
}

#[derive(Debug, Clone, PartialEq)]
/// Classifier output for one satellite
pub struct Classification {
    /// Satellite identifier
    pub prn: String,
    /// Assigned class
    pub class: SignalClass,
    /// Confidence after temporal smoothing, in [0.5, 0.99]
    pub confidence: f64,
    /// Features the decision was based on
    pub features: FeatureVector,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
/// Cumulative classifier statistics
pub struct ClassifierStats {
    /// Satellites classified since startup
    pub total_classifications: u64,
    /// Line-of-sight results since startup
    pub los_count: u64,
    /// Multipath results since startup
    pub multipath_count: u64,
    /// Non-line-of-sight results since startup
    pub nlos_count: u64,
    /// Mean confidence of the most recent batch
    pub avg_confidence: f64,
}

/// A satellite signal classification strategy.
///
/// Implementations may refine the bare-rule tags of the satellite table; a
/// strategy that does not refine returns no classifications.
pub trait SignalClassifier: Send {
    /// Short name for logs and snapshots
    fn name(&self) -> &'static str;

    /// Whether [`SignalClassifier::classify`] produces results at all
    fn refines(&self) -> bool;

    /// Classify the satellites of one satellites-in-view sentence
    fn classify(
        &mut self,
        batch: &[SatelliteObservation],
        now: DateTime<Utc>,
    ) -> Vec<Classification>;

    /// Drop per-satellite history not updated within `max_age`
    fn prune(&mut self, now: DateTime<Utc>, max_age: Duration);

    /// Cumulative statistics
    fn stats(&self) -> ClassifierStats;
}

/// Build the strategy for `kind`
pub fn build_classifier(kind: ClassifierKind, history_len: usize) -> Box<dyn SignalClassifier> {
    match kind {
        ClassifierKind::Rules => Box::new(RuleClassifier),
        ClassifierKind::Hybrid => Box::new(HistoryClassifier::new(history_len)),
    }
}

#[derive(Debug, Default, Clone, Copy)]
/// Leaves the bare threshold tags in place
pub struct RuleClassifier;

impl SignalClassifier for RuleClassifier {
    fn name(&self) -> &'static str {
        "rules"
    }

    fn refines(&self) -> bool {
        false
    }

    fn classify(&mut self, _: &[SatelliteObservation], _: DateTime<Utc>) -> Vec<Classification> {
        Vec::new()
    }

    fn prune(&mut self, _: DateTime<Utc>, _: Duration) {}

    fn stats(&self) -> ClassifierStats {
        ClassifierStats::default()
    }
}

#[derive(Debug, Clone, Copy)]
struct SignalSample {
    elevation: f64,
    snr: f64,
    at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct HistoryEntry {
    class: SignalClass,
    confidence: f64,
    at: DateTime<Utc>,
}

#[derive(Debug)]
/// Feature based classifier with bounded per-satellite history
pub struct HistoryClassifier {
    history_len: usize,
    signals: HashMap<String, BoundedHistory<SignalSample>>,
    classes: HashMap<String, BoundedHistory<HistoryEntry>>,
    stats: ClassifierStats,
    last_log: Option<DateTime<Utc>>,
}

impl HistoryClassifier {
    /// Create a classifier keeping `history_len` classifications per satellite
    pub fn new(history_len: usize) -> Self {
        Self {
            history_len,
            signals: HashMap::new(),
            classes: HashMap::new(),
            stats: ClassifierStats::default(),
            last_log: None,
        }
    }

    /// Number of satellites with a classification history
    pub fn tracked(&self) -> usize {
        self.classes.len()
    }

    /// Confidence of the newest recorded classification of `prn`
    pub fn last_confidence(&self, prn: &str) -> Option<f64> {
        self.classes.get(prn).and_then(|h| h.last()).map(|e| e.confidence)
    }

    fn extract(&mut self, obs: &SatelliteObservation, now: DateTime<Utc>) -> FeatureVector {
        let snr = if obs.snr > 0.0 { obs.snr } else { MISSING_SNR };
        let samples = self
            .signals
            .entry(obs.prn.clone())
            .or_insert_with(|| BoundedHistory::new(SIGNAL_HISTORY_LEN));
        let snrs: Vec<f64> = samples.iter().map(|s| s.snr).collect();
        let elevations: Vec<f64> = samples.iter().map(|s| s.elevation).collect();
        samples.push(SignalSample {
            elevation: obs.elevation,
            snr,
            at: now,
        });
        FeatureVector {
            elevation: obs.elevation,
            snr,
            azimuth: obs.azimuth,
            time_of_day: now.num_seconds_from_midnight() as f64,
            snr_quality: (snr / 50.0).min(1.0),
            elevation_quality: obs.elevation / 90.0,
            snr_trend: trend(&snrs),
            elevation_trend: trend(&elevations),
        }
    }

    fn adjust(&mut self, prn: &str, class: SignalClass, confidence: f64, now: DateTime<Utc>) -> f64 {
        let history_len = self.history_len;
        let history = self
            .classes
            .entry(prn.to_string())
            .or_insert_with(|| BoundedHistory::new(history_len));
        let mut confidence = confidence;
        if history.len() >= 3 {
            let same = history.recent(3).filter(|h| h.class == class).count();
            confidence *= if same >= 2 { 1.1 } else { 0.9 };
        }
        let confidence = round3(confidence.min(0.95).clamp(0.5, 0.99));
        history.push(HistoryEntry {
            class,
            confidence,
            at: now,
        });
        confidence
    }

    fn log_stats(&mut self, batch: &[Classification], now: DateTime<Utc>) {
        if let Some(last) = self.last_log {
            if now - last < Duration::seconds(STATS_LOG_INTERVAL) {
                return;
            }
        }
        self.last_log = Some(now);
        let total = batch.len() as f64;
        let pct = |class| batch.iter().filter(|c| c.class == class).count() as f64 / total * 100.0;
        info!(
            "Classifier: LOS={:.1}% NLOS={:.1}% Multipath={:.1}% Conf={:.2} Sats={}",
            pct(SignalClass::Los),
            pct(SignalClass::Nlos),
            pct(SignalClass::Multipath),
            self.stats.avg_confidence,
            batch.len()
        );
    }
}

/// The hybrid rule set, before temporal smoothing
pub fn classify_features(f: &FeatureVector) -> (SignalClass, f64) {
    let (elevation, snr) = (f.elevation, f.snr);
    if elevation >= ELEVATION_LOS_MIN && snr >= SNR_LOS_MIN {
        (SignalClass::Los, 0.85 + (snr - 35.0) * 0.01)
    } else if elevation <= ELEVATION_NLOS_MAX && snr <= SNR_NLOS_MAX {
        (SignalClass::Nlos, 0.70 + (15.0 - elevation) * 0.02)
    } else if (SNR_MULTIPATH_MIN..=SNR_MULTIPATH_MAX).contains(&snr)
        && elevation >= ELEVATION_MULTIPATH_MIN
    {
        (SignalClass::Multipath, 0.65 + (30.0 - snr).abs() * 0.01)
    } else {
        let elevation_boost = (elevation / 90.0) * 0.2;
        let snr_boost = ((snr - 20.0) / 30.0).min(0.2);
        (SignalClass::Los, 0.6 + elevation_boost + snr_boost)
    }
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

impl SignalClassifier for HistoryClassifier {
    fn name(&self) -> &'static str {
        "hybrid"
    }

    fn refines(&self) -> bool {
        true
    }

    fn classify(
        &mut self,
        batch: &[SatelliteObservation],
        now: DateTime<Utc>,
    ) -> Vec<Classification> {
        let mut out = Vec::with_capacity(batch.len());
        for obs in batch {
            let features = self.extract(obs, now);
            let (class, confidence) = classify_features(&features);
            let confidence = self.adjust(&obs.prn, class, confidence, now);
            debug!("PRN {}: {:?} ({:.3})", obs.prn, class, confidence);
            out.push(Classification {
                prn: obs.prn.clone(),
                class,
                confidence,
                features,
            });
        }
        if out.is_empty() {
            return out;
        }
        self.stats.total_classifications += out.len() as u64;
        for c in &out {
            match c.class {
                SignalClass::Los => self.stats.los_count += 1,
                SignalClass::Multipath => self.stats.multipath_count += 1,
                SignalClass::Nlos => self.stats.nlos_count += 1,
            }
        }
        self.stats.avg_confidence =
            round3(out.iter().map(|c| c.confidence).sum::<f64>() / out.len() as f64);
        self.log_stats(&out, now);
        out
    }

    fn prune(&mut self, now: DateTime<Utc>, max_age: Duration) {
        self.signals
            .retain(|_, h| h.last().map_or(false, |s| now - s.at <= max_age));
        self.classes
            .retain(|_, h| h.last().map_or(false, |e| now - e.at <= max_age));
    }

    fn stats(&self) -> ClassifierStats {
        self.stats
    }
}
