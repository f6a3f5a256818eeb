use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::nmea::{parse_field, Sentence};

/// Satellites reported per GSV sentence
const GSV_GROUPS: usize = 4;
/// Fields per satellite group (PRN, elevation, azimuth, SNR)
const GSV_GROUP_LEN: usize = 4;
/// Index of the first satellite group
const GSV_FIRST_GROUP: usize = 4;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
/// Signal propagation class of a satellite
pub enum SignalClass {
    /// Line of sight
    Los,
    /// Multipath affected
    Multipath,
    /// Non line of sight
    Nlos,
}

impl SignalClass {
    /// The bare threshold rule used when no richer classifier refines the tag
    pub fn from_rule(elevation: f64, snr: f64) -> Self {
        if snr >= 38.0 && elevation >= 15.0 {
            Self::Los
        } else if snr >= 25.0 {
            Self::Multipath
        } else {
            Self::Nlos
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// Constellation inferred from the talker of a GSV sentence
pub enum Constellation {
    /// GPS (`GP`)
    #[serde(rename = "GPS")]
    Gps,
    /// GLONASS (`GL`)
    #[serde(rename = "GLONASS")]
    Glonass,
    /// Galileo (`GA`)
    Galileo,
    /// BeiDou (`GB`, `BD`)
    BeiDou,
    /// QZSS (`GQ`)
    #[serde(rename = "QZSS")]
    Qzss,
    /// Combined multi-constellation talker (`GN`)
    #[serde(rename = "Multi GNSS")]
    Multi,
    /// Any other talker
    #[serde(rename = "GNSS")]
    Unknown,
}

impl Constellation {
    /// Look up a two character talker prefix
    pub fn from_talker(talker: &str) -> Self {
        match talker.to_ascii_uppercase().as_str() {
            "GP" => Self::Gps,
            "GL" => Self::Glonass,
            "GA" => Self::Galileo,
            "GB" | "BD" => Self::BeiDou,
            "GQ" => Self::Qzss,
            "GN" => Self::Multi,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// One satellite as reported by a GSV sentence
pub struct SatelliteObservation {
    /// Satellite identifier as sent by the receiver
    pub prn: String,
    /// Constellation of the reporting talker
    pub constellation: Constellation,
    /// Elevation in degrees
    pub elevation: f64,
    /// Azimuth in degrees
    pub azimuth: f64,
    /// Signal to noise ratio in dB-Hz (0 when not tracked)
    pub snr: f64,
}

#[derive(Debug, Clone, PartialEq)]
/// Contents of one satellites-in-view sentence
pub struct GsvReport {
    /// Total satellites in view, when the field is readable
    pub in_view: Option<u32>,
    /// Satellites carried by this sentence (up to four)
    pub satellites: Vec<SatelliteObservation>,
}

impl GsvReport {
    /// Parse a GSV sentence. Unreadable numeric fields become `0.0`;
    /// sentences with fewer than four fields are rejected.
    pub fn parse(sentence: &Sentence) -> Option<Self> {
        let parts = sentence.fields();
        if parts.len() < GSV_FIRST_GROUP {
            return None;
        }
        let constellation = Constellation::from_talker(sentence.talker());
        let in_view = parse_field(parts.get(3));
        let mut satellites = Vec::with_capacity(GSV_GROUPS);
        for idx in 0..GSV_GROUPS {
            let base = GSV_FIRST_GROUP + idx * GSV_GROUP_LEN;
            if base + GSV_GROUP_LEN - 1 >= parts.len() {
                break;
            }
            let prn = parts[base].trim();
            if prn.is_empty() {
                continue;
            }
            satellites.push(SatelliteObservation {
                prn: prn.to_string(),
                constellation,
                elevation: parse_field(parts.get(base + 1)).unwrap_or(0.0),
                azimuth: parse_field(parts.get(base + 2)).unwrap_or(0.0),
                snr: parse_field(parts.get(base + 3)).unwrap_or(0.0),
            });
        }
        Some(Self {
            in_view,
            satellites,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
/// A tracked satellite and its latest classification
pub struct SatelliteRecord {
    /// Satellite identifier
    pub prn: String,
    /// Constellation of the last report
    pub constellation: Constellation,
    /// Elevation in degrees
    pub elevation: f64,
    /// Azimuth in degrees
    pub azimuth: f64,
    /// Signal to noise ratio in dB-Hz
    pub snr: f64,
    /// Latest classification
    #[serde(rename = "status")]
    pub class: SignalClass,
    /// Confidence of the latest classification, if the classifier gives one
    pub confidence: Option<f64>,
    /// When the satellite was last reported
    #[serde(skip)]
    pub last_seen: DateTime<Utc>,
}

impl SatelliteRecord {
    /// Numeric ordering key; non-numeric identifiers sort as zero
    pub fn sort_key(&self) -> u32 {
        self.prn.parse().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
/// Class counts over the current table
pub struct ClassTally {
    /// Line-of-sight satellites
    pub los: u32,
    /// Multipath satellites
    pub multipath: u32,
    /// Non-line-of-sight satellites
    pub nlos: u32,
    /// Mean confidence of the classified satellites (0 if none carry one)
    pub avg_confidence: f64,
}

#[derive(Debug, Clone)]
/// Per-satellite record store with staleness eviction
pub struct SatelliteTable {
    records: BTreeMap<String, SatelliteRecord>,
    stale_after: Duration,
}

impl SatelliteTable {
    /// Default staleness bound in seconds
    pub const DEFAULT_STALE_SECS: u64 = 60;

    /// Create an empty table evicting satellites silent for longer than `stale_after`
    pub fn new(stale_after: std::time::Duration) -> Self {
        Self {
            records: BTreeMap::new(),
            stale_after: Duration::from_std(stale_after)
                .unwrap_or_else(|_| Duration::seconds(Self::DEFAULT_STALE_SECS as i64)),
        }
    }

    /// Staleness bound
    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Insert or refresh a satellite, tagging it with the bare rule
    pub fn upsert(&mut self, obs: &SatelliteObservation, now: DateTime<Utc>) {
        let class = SignalClass::from_rule(obs.elevation, obs.snr);
        self.records
            .entry(obs.prn.clone())
            .and_modify(|rec| {
                rec.constellation = obs.constellation;
                rec.elevation = obs.elevation;
                rec.azimuth = obs.azimuth;
                rec.snr = obs.snr;
                rec.class = class;
                rec.confidence = None;
                rec.last_seen = now;
            })
            .or_insert_with(|| SatelliteRecord {
                prn: obs.prn.clone(),
                constellation: obs.constellation,
                elevation: obs.elevation,
                azimuth: obs.azimuth,
                snr: obs.snr,
                class,
                confidence: None,
                last_seen: now,
            });
    }

    /// Overwrite the tag of a tracked satellite with a classifier result
    pub fn set_class(&mut self, prn: &str, class: SignalClass, confidence: f64) -> bool {
        match self.records.get_mut(prn) {
            Some(rec) => {
                rec.class = class;
                rec.confidence = Some(confidence);
                true
            }
            None => false,
        }
    }

    /// Remove satellites not reported for longer than the staleness bound
    pub fn evict_stale(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let stale_after = self.stale_after;
        let stale: Vec<String> = self
            .records
            .values()
            .filter(|rec| now - rec.last_seen > stale_after)
            .map(|rec| rec.prn.clone())
            .collect();
        for prn in &stale {
            self.records.remove(prn);
        }
        stale
    }

    /// Look up a satellite
    pub fn get(&self, prn: &str) -> Option<&SatelliteRecord> {
        self.records.get(prn)
    }

    /// Number of tracked satellites
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Copy of all records, sorted by numeric identifier
    pub fn view(&self) -> Vec<SatelliteRecord> {
        let mut view: Vec<SatelliteRecord> = self.records.values().cloned().collect();
        view.sort_by_key(SatelliteRecord::sort_key);
        view
    }

    /// Class counts and mean confidence over the tracked satellites
    pub fn tally(&self) -> ClassTally {
        Self::tally_of(self.records.values())
    }

    /// Like [`SatelliteTable::tally`], leaving out satellites that are stale at `now`
    pub fn tally_at(&self, now: DateTime<Utc>) -> ClassTally {
        Self::tally_of(
            self.records
                .values()
                .filter(|rec| now - rec.last_seen <= self.stale_after),
        )
    }

    fn tally_of<'a>(records: impl Iterator<Item = &'a SatelliteRecord>) -> ClassTally {
        let mut tally = ClassTally::default();
        let mut conf_sum = 0.0;
        let mut conf_n = 0u32;
        for rec in records {
            match rec.class {
                SignalClass::Los => tally.los += 1,
                SignalClass::Multipath => tally.multipath += 1,
                SignalClass::Nlos => tally.nlos += 1,
            }
            if let Some(conf) = rec.confidence {
                conf_sum += conf;
                conf_n += 1;
            }
        }
        if conf_n > 0 {
            tally.avg_confidence = conf_sum / conf_n as f64;
        }
        tally
    }
}

impl Default for SatelliteTable {
    fn default() -> Self {
        Self::new(std::time::Duration::from_secs(Self::DEFAULT_STALE_SECS))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn gsv(line: &str) -> GsvReport {
        GsvReport::parse(&Sentence::validate(line).expect("valid sentence")).expect("gsv")
    }

    #[test]
    fn bare_rule() {
        assert_eq!(SignalClass::from_rule(45.0, 42.0), SignalClass::Los);
        assert_eq!(SignalClass::from_rule(10.0, 40.0), SignalClass::Multipath);
        assert_eq!(SignalClass::from_rule(25.0, 28.0), SignalClass::Multipath);
        assert_eq!(SignalClass::from_rule(10.0, 22.0), SignalClass::Nlos);
        assert_eq!(SignalClass::from_rule(60.0, 0.0), SignalClass::Nlos);
    }

    #[test]
    fn parses_groups() {
        let report = gsv("$GPGSV,3,1,10,03,26,248,42,04,48,306,17,16,68,221,41,26,72,052,18,1*61");
        assert_eq!(report.in_view, Some(10));
        assert_eq!(report.satellites.len(), 4);
        let first = &report.satellites[0];
        assert_eq!(first.prn, "03");
        assert_eq!(first.constellation, Constellation::Gps);
        assert_eq!(first.elevation, 26.0);
        assert_eq!(first.azimuth, 248.0);
        assert_eq!(first.snr, 42.0);
    }

    #[test]
    fn partial_last_message_and_empty_snr() {
        let report = gsv("$GPGSV,1,1,02,09,16,316,,28,30,090,,0*6D");
        assert_eq!(report.satellites.len(), 2);
        assert_eq!(report.satellites[0].snr, 0.0);
        assert_eq!(report.satellites[1].prn, "28");
        let report = gsv("$GPGSV,3,3,10,44,23,237,44,46,15,247,33,1*65");
        assert_eq!(report.satellites.len(), 2);
        assert_eq!(report.satellites[1].snr, 33.0);
    }

    #[test]
    fn talkers() {
        assert_eq!(Constellation::from_talker("GL"), Constellation::Glonass);
        assert_eq!(Constellation::from_talker("BD"), Constellation::BeiDou);
        assert_eq!(Constellation::from_talker("GN"), Constellation::Multi);
        assert_eq!(Constellation::from_talker("PS"), Constellation::Unknown);
    }

    #[test]
    fn batches_accumulate_without_duplicates() {
        let now = Utc::now();
        let mut table = SatelliteTable::default();
        for line in [
            "$GPGSV,3,1,10,03,26,248,42,04,48,306,17,16,68,221,41,26,72,052,18,1*61",
            "$GPGSV,3,2,10,27,18,171,36,29,16,041,11,31,62,067,22,32,00,145,12,1*66",
            "$GPGSV,3,3,10,44,23,237,44,46,15,247,33,1*65",
            "$GPGSV,3,3,10,44,23,237,44,46,15,247,33,1*65",
        ] {
            for sat in gsv(line).satellites {
                table.upsert(&sat, now);
            }
        }
        assert_eq!(table.len(), 10);
        let view = table.view();
        let keys: Vec<u32> = view.iter().map(SatelliteRecord::sort_key).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(table.get("03").map(|r| r.class), Some(SignalClass::Los));
    }

    #[test]
    fn non_numeric_ids_sort_first() {
        let now = Utc::now();
        let mut table = SatelliteTable::default();
        for prn in ["12", "X1", "05"] {
            table.upsert(
                &SatelliteObservation {
                    prn: prn.into(),
                    constellation: Constellation::Gps,
                    elevation: 30.0,
                    azimuth: 0.0,
                    snr: 40.0,
                },
                now,
            );
        }
        let ids: Vec<String> = table.view().into_iter().map(|r| r.prn).collect();
        assert_eq!(ids, vec!["X1", "05", "12"]);
    }

    #[test]
    fn evicts_stale_satellites() {
        let t0 = Utc::now();
        let mut table = SatelliteTable::default();
        let obs = |prn: &str, snr| SatelliteObservation {
            prn: prn.into(),
            constellation: Constellation::Gps,
            elevation: 40.0,
            azimuth: 90.0,
            snr,
        };
        table.upsert(&obs("01", 45.0), t0);
        table.upsert(&obs("02", 20.0), t0 + Duration::seconds(30));
        let fresh = table.tally_at(t0 + Duration::seconds(61));
        assert_eq!((fresh.los, fresh.nlos), (0, 1));
        assert_eq!(table.len(), 2);
        assert!(table.evict_stale(t0 + Duration::seconds(60)).is_empty());
        let gone = table.evict_stale(t0 + Duration::seconds(61));
        assert_eq!(gone, vec!["01".to_string()]);
        let tally = table.tally();
        assert_eq!((tally.los, tally.multipath, tally.nlos), (0, 0, 1));
    }

    #[test]
    fn classifier_result_overrides_rule() {
        let now = Utc::now();
        let mut table = SatelliteTable::default();
        table.upsert(
            &SatelliteObservation {
                prn: "07".into(),
                constellation: Constellation::Galileo,
                elevation: 35.0,
                azimuth: 10.0,
                snr: 38.0,
            },
            now,
        );
        assert!(table.set_class("07", SignalClass::Multipath, 0.8));
        assert!(!table.set_class("08", SignalClass::Los, 0.9));
        let tally = table.tally();
        assert_eq!(tally.multipath, 1);
        assert!((tally.avg_confidence - 0.8).abs() < 1e-12);
    }
}
